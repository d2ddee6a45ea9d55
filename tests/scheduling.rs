//! End-to-end scheduling scenarios against the library API

use chrono::{Duration, NaiveDate};
use plan_engine::domain::{
    AllocationEnv, AllocationRequest, AvailabilityTimeline, CriticalPathCalculator, Dependency, DependencyType,
    Direction, EffortDuration, GraphError, IntraDayDate, PositionConstraint, ResourceAllocation, ResourceRegistry,
    ResourcesPerDay, SchedulingMode, SchedulingSettings, TaskGraph, TaskId, TaskSpec, WorkCalendar,
};
use proptest::prelude::*;

fn day(offset: i64) -> IntraDayDate {
    IntraDayDate::start_of_day(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap() + Duration::days(offset))
}

fn leaf(graph: &mut TaskGraph, name: &str, start: i64, end: i64) -> TaskId {
    graph.add(TaskSpec::leaf(name, day(start), day(end))).unwrap()
}

fn task() -> TaskId {
    "t-0".parse().unwrap()
}

fn hours(n: u64) -> EffortDuration {
    EffortDuration::hours(n)
}

fn allocate(
    allocations: &mut [ResourceAllocation],
    env: &AllocationEnv<'_>,
    direction: Direction,
    effort: EffortDuration,
) -> IntraDayDate {
    let requests = allocations.iter_mut().map(AllocationRequest::at_intended).collect();
    ResourceAllocation::allocating(requests)
        .unwrap()
        .until_allocating_in(env, direction, effort)
        .unwrap()
}

// =============================================================================
// Propagation
// =============================================================================

#[test]
fn test_chain_propagates_and_converges() {
    let mut graph = TaskGraph::new(day(0));
    let a = leaf(&mut graph, "a", 0, 2);
    let b = leaf(&mut graph, "b", 0, 3);
    let c = leaf(&mut graph, "c", 0, 1);
    graph.add_dependency(Dependency::end_start(a, b)).unwrap();
    graph.add_dependency(Dependency::end_start(b, c)).unwrap();

    graph.move_task(a, day(4)).unwrap();

    assert_eq!(graph.get(b).unwrap().start(), day(6));
    assert_eq!(graph.get(c).unwrap().start(), day(9));
    assert_eq!(graph.get(c).unwrap().end(), day(10));

    let again = graph.enforce_all_restrictions().unwrap();
    assert!(again.changed.is_empty());
}

#[test]
fn test_reverse_dependency_rejected_without_mutation() {
    let mut graph = TaskGraph::new(day(0));
    let a = leaf(&mut graph, "a", 0, 1);
    let b = leaf(&mut graph, "b", 0, 1);

    graph.add_dependency(Dependency::end_start(a, b)).unwrap();
    assert!(!graph.can_add_dependency(&Dependency::end_start(b, a)));
    let err = graph.add_dependency(Dependency::end_start(b, a)).unwrap_err();

    assert!(matches!(err, GraphError::CycleDetected(_, _)));
    assert_eq!(graph.dependencies(), vec![Dependency::end_start(a, b)]);
}

#[test]
fn test_pinned_task_blocks_violating_dependency() {
    let mut graph = TaskGraph::new(day(0));
    let a = leaf(&mut graph, "a", 0, 5);
    let b = graph.add(TaskSpec::leaf("b", day(2), day(3)).pinned()).unwrap();

    let err = graph.add_dependency(Dependency::end_start(a, b)).unwrap_err();

    assert!(matches!(err, GraphError::Unsatisfiable(_, _, _)));
    assert!(graph.dependencies().is_empty());
    assert_eq!(graph.get(b).unwrap().start(), day(2));
}

#[test]
fn test_container_follows_children_and_pushes_successors() {
    let mut graph = TaskGraph::new(day(0));
    let phase = graph.add(TaskSpec::container("phase")).unwrap();
    let x = graph.add(TaskSpec::leaf("x", day(0), day(2)).under(phase)).unwrap();
    let y = graph.add(TaskSpec::leaf("y", day(0), day(4)).under(phase)).unwrap();
    let after = leaf(&mut graph, "after", 0, 1);
    graph.add_dependency(Dependency::end_start(phase, after)).unwrap();

    assert_eq!(graph.get(phase).unwrap().start(), day(0));
    assert_eq!(graph.get(phase).unwrap().end(), day(4));
    assert_eq!(graph.get(after).unwrap().start(), day(4));

    graph.resize_task(y, day(6)).unwrap();
    assert_eq!(graph.get(phase).unwrap().end(), day(6));
    assert_eq!(graph.get(after).unwrap().start(), day(6));
    assert_eq!(graph.get(x).unwrap().start(), day(0));
}

#[test]
fn test_constraint_priority_decides_conflicts() {
    for (priority, expected_start) in [(true, day(5)), (false, day(2))] {
        let settings = SchedulingSettings {
            dependencies_have_priority: priority,
            ..SchedulingSettings::default()
        };
        let mut graph = TaskGraph::with_settings(day(0), settings);
        let a = leaf(&mut graph, "a", 0, 5);
        let b = graph
            .add(
                TaskSpec::leaf("b", day(0), day(1))
                    .with_constraint(PositionConstraint::FinishNotLaterThan(day(3))),
            )
            .unwrap();

        let report = graph.add_dependency(Dependency::end_start(a, b)).unwrap();

        assert_eq!(graph.get(b).unwrap().start(), expected_start);
        assert!(graph.get(b).unwrap().is_inconsistent());
        assert!(!report.is_consistent());
    }
}

#[test]
fn test_backward_mode_pulls_predecessors_before_deadline() {
    let settings = SchedulingSettings {
        mode: SchedulingMode::Backward,
        ..SchedulingSettings::default()
    };
    let mut graph = TaskGraph::with_settings(day(0), settings);
    graph.set_deadline(Some(day(20)));
    let a = graph
        .add(TaskSpec::leaf("a", day(0), day(2)).with_constraint(PositionConstraint::AsLateAsPossible))
        .unwrap();
    let b = graph
        .add(TaskSpec::leaf("b", day(0), day(3)).with_constraint(PositionConstraint::AsLateAsPossible))
        .unwrap();
    graph.add_dependency(Dependency::end_start(a, b)).unwrap();

    graph.enforce_all_restrictions().unwrap();

    assert_eq!(graph.get(b).unwrap().end(), day(20));
    assert_eq!(graph.get(a).unwrap().end(), day(17));
}

// =============================================================================
// Allocation
// =============================================================================

#[test]
fn test_whole_and_partial_days() {
    let mut registry = ResourceRegistry::new();
    let worker = registry.add("worker", WorkCalendar::default());
    let env = AllocationEnv::new(day(0), day(30), &registry);

    for n in 1..5u64 {
        let mut whole = vec![ResourceAllocation::specific(task(), worker, ResourcesPerDay::amount(1))];
        assert_eq!(allocate(&mut whole, &env, Direction::Forward, hours(8 * n)), day(n as i64));

        let mut partial = vec![ResourceAllocation::specific(task(), worker, ResourcesPerDay::amount(1))];
        assert_eq!(
            allocate(&mut partial, &env, Direction::Forward, hours(8 * n + 3)),
            IntraDayDate::create(day(n as i64).date(), hours(3))
        );
    }
}

#[test]
fn test_weekends_are_skipped() {
    let mut registry = ResourceRegistry::new();
    let weekdays = [
        chrono::Weekday::Mon,
        chrono::Weekday::Tue,
        chrono::Weekday::Wed,
        chrono::Weekday::Thu,
        chrono::Weekday::Fri,
    ];
    let worker = registry.add("worker", WorkCalendar::working_days(hours(8), &weekdays));
    // 2024-03-04 is a Monday
    let env = AllocationEnv::new(day(0), day(30), &registry);
    let mut allocations = vec![ResourceAllocation::specific(task(), worker, ResourcesPerDay::amount(1))];

    let end = allocate(&mut allocations, &env, Direction::Forward, hours(48));

    assert_eq!(end, day(8));
    assert_eq!(allocations[0].assigned_on(day(5).date()), EffortDuration::zero());
}

#[test]
fn test_unavailable_window_leaves_allocations_unsatisfied() {
    let mut registry = ResourceRegistry::new();
    let availability = AvailabilityTimeline::invalid_from(day(3).date());
    let a = registry.add("a", WorkCalendar::default().with_availability(availability.clone()));
    let b = registry.add("b", WorkCalendar::default().with_availability(availability));
    let env = AllocationEnv::new(day(0), day(10), &registry);

    let mut allocations = vec![
        ResourceAllocation::specific(task(), a, ResourcesPerDay::amount(1)),
        ResourceAllocation::specific(task(), b, ResourcesPerDay::amount(1)),
    ];
    let mut calls = 0;
    let mut receiver = |_: &ResourceAllocation, missing: EffortDuration| {
        assert_eq!(missing, hours(12));
        calls += 1;
    };
    let requests = allocations.iter_mut().map(AllocationRequest::at_intended).collect();
    let boundary = ResourceAllocation::allocating(requests)
        .unwrap()
        .until_allocating_with(&env, Direction::Forward, hours(60), &mut receiver)
        .unwrap();

    assert_eq!(calls, 2);
    assert_eq!(boundary, day(10));
    assert!(allocations.iter().all(|a| !a.is_satisfied()));
    assert_eq!(allocations[0].total_assigned(), hours(24));
}

#[test]
fn test_load_from_other_tasks_steers_generic_allocation() {
    let mut registry = ResourceRegistry::new();
    let ana = registry.add("ana", WorkCalendar::default());
    let bo = registry.add("bo", WorkCalendar::default());

    let mut graph = TaskGraph::new(day(0));
    let busy = leaf(&mut graph, "busy", 0, 1);
    let shared = leaf(&mut graph, "shared", 0, 1);
    graph
        .set_allocations(busy, vec![ResourceAllocation::specific(busy, ana, ResourcesPerDay::amount(1))])
        .unwrap();
    graph
        .set_allocations(shared, vec![ResourceAllocation::generic(shared, vec![ana, bo], ResourcesPerDay::amount(1))])
        .unwrap();

    let mut ignore = |_: &ResourceAllocation, _: EffortDuration| {};
    graph
        .allocate_task(busy, &registry, hours(8), Direction::Forward, 30, &mut ignore)
        .unwrap();
    let outcome = graph
        .allocate_task(shared, &registry, hours(8), Direction::Forward, 30, &mut ignore)
        .unwrap();

    assert!(outcome.satisfied);
    let allocation = &graph.get(shared).unwrap().allocations()[0];
    assert_eq!(allocation.assigned_to(bo, day(0).date()), hours(8));
    assert_eq!(allocation.assigned_to(ana, day(0).date()), EffortDuration::zero());
}

// =============================================================================
// Critical Path
// =============================================================================

#[test]
fn test_removing_bottleneck_changes_critical_set() {
    let mut graph = TaskGraph::new(day(0));
    let a = leaf(&mut graph, "a", 0, 3);
    let b = leaf(&mut graph, "b", 0, 4);
    let c = leaf(&mut graph, "c", 0, 2);
    let d = leaf(&mut graph, "d", 0, 1);
    graph.add_dependency(Dependency::end_start(a, b)).unwrap();
    graph.add_dependency(Dependency::end_start(c, d)).unwrap();
    graph.add_dependency(Dependency::new(b, d, DependencyType::EndStart)).unwrap();

    let calculator = CriticalPathCalculator::create(true);
    assert_eq!(calculator.calculate_critical_path(&graph), vec![a, b, d]);

    graph.remove_dependency(b, d).unwrap();
    assert_eq!(calculator.calculate_critical_path(&graph), vec![a, b]);
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn enforcing_twice_changes_nothing(
        lengths in prop::collection::vec(1i64..6, 2..8),
        edges in prop::collection::vec((0usize..8, 0usize..8, 0usize..4), 0..12),
    ) {
        let mut graph = TaskGraph::new(day(0));
        let ids: Vec<TaskId> = lengths
            .iter()
            .enumerate()
            .map(|(i, len)| leaf(&mut graph, &format!("t{i}"), 0, *len))
            .collect();

        let kinds = [
            DependencyType::EndStart,
            DependencyType::StartStart,
            DependencyType::EndEnd,
            DependencyType::StartEnd,
        ];
        for (from, to, kind) in edges {
            let (from, to) = (from % ids.len(), to % ids.len());
            if from < to {
                let _ = graph.add_dependency(Dependency::new(ids[from], ids[to], kinds[kind]));
            }
        }

        graph.enforce_all_restrictions().unwrap();
        let second = graph.enforce_all_restrictions().unwrap();
        prop_assert!(second.changed.is_empty());
    }

    #[test]
    fn backward_then_forward_returns_to_the_end(effort in 1u64..200, ratio in 1u32..4) {
        let mut registry = ResourceRegistry::new();
        let worker = registry.add("worker", WorkCalendar::default());
        let end = day(90);
        let mut env = AllocationEnv::new(day(0), end, &registry);

        let mut backward = vec![ResourceAllocation::specific(task(), worker, ResourcesPerDay::amount(ratio))];
        let start = allocate(&mut backward, &env, Direction::Backward, hours(effort));

        env.start = start;
        let mut forward = vec![ResourceAllocation::specific(task(), worker, ResourcesPerDay::amount(ratio))];
        let finish = allocate(&mut forward, &env, Direction::Forward, hours(effort));

        prop_assert_eq!(finish, end);
        prop_assert_eq!(forward[0].total_assigned(), hours(effort));
    }
}
