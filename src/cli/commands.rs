//! Engine commands (schedule, critical-path, allocate)

use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use super::output::Output;
use crate::domain::{
    AllocationKind, CriticalPathCalculator, Direction, EffortDuration, IntraDayDate, ResourceAllocation, ResourceId,
    Task,
};
use crate::storage::{EngineConfig, Plan};

#[derive(Serialize)]
struct TaskRow<'a> {
    name: &'a str,
    kind: &'static str,
    start: IntraDayDate,
    end: IntraDayDate,
    constraint: &'static str,
    pinned: bool,
    inconsistent: bool,
    parent: Option<&'a str>,
}

impl<'a> TaskRow<'a> {
    fn new(plan: &'a Plan, task: &'a Task) -> Self {
        Self {
            name: &task.name,
            kind: task.kind_label(),
            start: task.start(),
            end: task.end(),
            constraint: task.constraint.label(),
            pinned: task.pinned,
            inconsistent: task.is_inconsistent(),
            parent: task.parent().map(|p| plan.task_name(p)),
        }
    }
}

#[derive(Serialize)]
struct ViolationRow<'a> {
    task: &'a str,
    violation: &'static str,
}

/// Enforce every constraint and print the resulting dates
pub fn schedule(output: &Output, config: &EngineConfig, path: &Path) -> Result<()> {
    let mut plan = Plan::load(path, config)?;
    let report = plan.graph.enforce_all_restrictions()?;
    info!(changed = report.changed.len(), violations = report.violations.len(), "plan scheduled");

    let rows: Vec<TaskRow> = plan.graph.tasks().map(|t| TaskRow::new(&plan, t)).collect();
    let violations: Vec<ViolationRow> = report
        .violations
        .iter()
        .map(|v| ViolationRow {
            task: plan.task_name(v.task),
            violation: v.violation.label(),
        })
        .collect();

    if output.is_json() {
        output.data(&serde_json::json!({
            "mode": plan.graph.mode().label(),
            "tasks": rows,
            "violations": violations,
        }));
        return Ok(());
    }

    println!("Schedule ({} mode, {} tasks):", plan.graph.mode().label(), rows.len());
    println!("{:<24} {:<10} {:<18} {:<18} FLAGS", "NAME", "KIND", "START", "END");
    println!("{}", "-".repeat(80));
    for row in &rows {
        let mut flags = vec![row.constraint];
        if row.pinned {
            flags.push("pinned");
        }
        if row.inconsistent {
            flags.push("inconsistent");
        }
        println!(
            "{:<24} {:<10} {:<18} {:<18} {}",
            row.name,
            row.kind,
            row.start.to_string(),
            row.end.to_string(),
            flags.join(",")
        );
    }

    if !violations.is_empty() {
        println!();
        println!("Violations ({}):", violations.len());
        for v in &violations {
            println!("  {}: {}", v.task, v.violation);
        }
    }

    Ok(())
}

/// Print the tasks without slack
pub fn critical_path(output: &Output, config: &EngineConfig, path: &Path) -> Result<()> {
    let plan = Plan::load(path, config)?;
    let calculator = CriticalPathCalculator::create(plan.graph.dependencies_have_priority());
    let path = calculator.calculate(&plan.graph);

    let rows: Vec<TaskRow> = path
        .tasks
        .iter()
        .filter_map(|id| plan.graph.task(*id))
        .map(|t| TaskRow::new(&plan, t))
        .collect();

    if output.is_json() {
        output.data(&serde_json::json!({
            "project_duration_days": path.project_duration_days,
            "tasks": rows,
        }));
        return Ok(());
    }

    if rows.is_empty() {
        println!("No critical tasks.");
        return Ok(());
    }

    println!(
        "Critical path ({} tasks, {} days):",
        rows.len(),
        path.project_duration_days
    );
    println!("{:<24} {:<18} END", "NAME", "START");
    println!("{}", "-".repeat(60));
    for row in &rows {
        println!("{:<24} {:<18} {}", row.name, row.start.to_string(), row.end);
    }

    Ok(())
}

#[derive(Serialize)]
struct AssignmentRow<'a> {
    resource: &'a str,
    day: chrono::NaiveDate,
    effort: EffortDuration,
}

#[derive(Serialize)]
struct AllocationRow<'a> {
    kind: &'static str,
    resources: Vec<&'a str>,
    intended_resources_per_day: String,
    resources_per_day: String,
    satisfied: bool,
    assigned: EffortDuration,
    assignments: Vec<AssignmentRow<'a>>,
}

impl<'a> AllocationRow<'a> {
    fn new(plan: &'a Plan, allocation: &'a ResourceAllocation) -> Self {
        Self {
            kind: match allocation.kind() {
                AllocationKind::Specific { .. } => "specific",
                AllocationKind::Generic { .. } => "generic",
            },
            resources: allocation.candidates().iter().map(|r| plan.resource_name(*r)).collect(),
            intended_resources_per_day: allocation.intended_resources_per_day().to_string(),
            resources_per_day: allocation.resources_per_day().to_string(),
            satisfied: allocation.is_satisfied(),
            assigned: allocation.total_assigned(),
            assignments: allocation
                .assignments()
                .iter()
                .map(|a| AssignmentRow {
                    resource: plan.resource_name(a.resource),
                    day: a.day,
                    effort: a.duration,
                })
                .collect(),
        }
    }
}

/// Allocate effort to a task and print the day assignments
pub fn allocate(
    output: &Output,
    config: &EngineConfig,
    path: &Path,
    task_name: &str,
    effort: EffortDuration,
    backward: bool,
) -> Result<()> {
    let mut plan = Plan::load(path, config)?;
    plan.graph.enforce_all_restrictions()?;
    let id = plan.require_task(task_name)?;
    let direction = if backward { Direction::Backward } else { Direction::Forward };

    let mut missing: Vec<(Vec<ResourceId>, EffortDuration)> = Vec::new();
    let mut receiver = |allocation: &ResourceAllocation, effort: EffortDuration| {
        missing.push((allocation.candidates().to_vec(), effort));
    };
    let outcome = plan.graph.allocate_task(
        id,
        &plan.resources,
        effort,
        direction,
        config.allocation.max_search_days,
        &mut receiver,
    )?;

    for (resources, effort) in &missing {
        let names: Vec<&str> = resources.iter().map(|r| plan.resource_name(*r)).collect();
        warn!(task = task_name, resources = %names.join(","), missing = %effort, "not enough capacity");
    }

    let task = plan.graph.get(id)?;
    let allocations: Vec<AllocationRow> = task.allocations().iter().map(|a| AllocationRow::new(&plan, a)).collect();

    if output.is_json() {
        output.data(&serde_json::json!({
            "task": task_name,
            "direction": direction,
            "effort": effort,
            "boundary": outcome.boundary,
            "satisfied": outcome.satisfied,
            "start": task.start(),
            "end": task.end(),
            "allocations": allocations,
            "moved": outcome.report.changed.iter().map(|t| plan.task_name(*t)).collect::<Vec<_>>(),
        }));
        return Ok(());
    }

    let verb = if outcome.satisfied { "Allocated" } else { "Could not fully allocate" };
    println!("{} {} to {} ({} -> {})", verb, effort, task_name, task.start(), task.end());
    for allocation in &allocations {
        println!();
        println!(
            "{} {} at {} resources/day (realized {}): {}",
            allocation.kind,
            allocation.resources.join(", "),
            allocation.intended_resources_per_day,
            allocation.resources_per_day,
            allocation.assigned
        );
        for row in &allocation.assignments {
            println!("  {}  {:<16} {}", row.day, row.resource, row.effort);
        }
    }

    let moved = outcome.report.changed.iter().filter(|t| **t != id).count();
    if moved > 0 {
        println!();
        println!("Moved {} other tasks.", moved);
    }

    Ok(())
}
