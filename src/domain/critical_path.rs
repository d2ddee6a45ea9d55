//! Critical path over the leaf tasks of a plan
//!
//! Durations are counted in whole calendar days. Dependencies between
//! containers are expanded to every pair of their leaves, then a forward pass
//! computes earliest starts and a backward pass latest finishes. A task is
//! critical when it has no slack.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::date::IntraDayDate;
use super::graph::TaskGraph;
use super::id::TaskId;
use super::task::{DependencyType, PositionConstraint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CriticalPathCalculator {
    dependencies_have_priority: bool,
}

/// Tasks without slack, ordered by earliest start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CriticalPath {
    pub tasks: Vec<TaskId>,
    pub project_duration_days: i64,
}

impl CriticalPath {
    /// True for a critical leaf, or a container holding one
    pub fn contains(&self, graph: &TaskGraph, id: TaskId) -> bool {
        graph.leaves_of(id).iter().any(|leaf| self.tasks.contains(leaf))
    }
}

struct Node {
    id: TaskId,
    duration: i64,
    constraint: PositionConstraint,
}

impl CriticalPathCalculator {
    /// When dependencies do not have priority, start-not-earlier-than and
    /// finish-not-later-than constraints also bound the passes.
    pub fn create(dependencies_have_priority: bool) -> Self {
        Self {
            dependencies_have_priority,
        }
    }

    pub fn calculate_critical_path(&self, graph: &TaskGraph) -> Vec<TaskId> {
        self.calculate(graph).tasks
    }

    pub fn calculate(&self, graph: &TaskGraph) -> CriticalPath {
        let Some(init) = graph.tasks().filter(|t| t.has_own_dates()).map(|t| t.start().date()).min() else {
            return CriticalPath::default();
        };

        let mut dag: DiGraph<Node, DependencyType> = DiGraph::new();
        let mut index: HashMap<TaskId, NodeIndex> = HashMap::new();
        for task in graph.tasks().filter(|t| t.has_own_dates()) {
            let node = dag.add_node(Node {
                id: task.id,
                duration: task.start().days_until(&task.end()),
                constraint: task.constraint,
            });
            index.insert(task.id, node);
        }
        for dep in graph.dependencies() {
            for source in graph.leaves_of(dep.source) {
                for destination in graph.leaves_of(dep.destination) {
                    if let (Some(&s), Some(&d)) = (index.get(&source), index.get(&destination)) {
                        dag.add_edge(s, d, dep.kind);
                    }
                }
            }
        }

        let order = match toposort(&dag, None) {
            Ok(order) => order,
            Err(cycle) => {
                warn!(task = %dag[cycle.node_id()].id, "dependency cycle, no critical path");
                return CriticalPath::default();
            }
        };

        let origin = IntraDayDate::start_of_day(init);
        let n = dag.node_count();
        let duration = |node: NodeIndex| dag[node].duration;

        let mut earliest_start = vec![0i64; n];
        for &node in &order {
            let mut start = 0;
            if !self.dependencies_have_priority {
                if let PositionConstraint::StartNotEarlierThan(date) = dag[node].constraint {
                    start = start.max((date.date() - init).num_days());
                }
            }
            for edge in dag.edges_directed(node, Direction::Incoming) {
                let p = edge.source();
                let (p_start, p_finish) = (earliest_start[p.index()], earliest_start[p.index()] + duration(p));
                let bound = match edge.weight() {
                    DependencyType::EndStart => p_finish,
                    DependencyType::StartStart => p_start,
                    DependencyType::EndEnd => p_finish - duration(node),
                    DependencyType::StartEnd => p_start - duration(node),
                };
                start = start.max(bound);
            }
            earliest_start[node.index()] = start;
        }

        let project_finish = dag
            .node_indices()
            .map(|node| earliest_start[node.index()] + duration(node))
            .max()
            .unwrap_or(0);

        let mut latest_finish = vec![project_finish; n];
        for &node in order.iter().rev() {
            let mut finish = project_finish;
            if !self.dependencies_have_priority {
                if let PositionConstraint::FinishNotLaterThan(date) = dag[node].constraint {
                    finish = finish.min(origin.days_until(&date));
                }
            }
            for edge in dag.edges_directed(node, Direction::Outgoing) {
                let s = edge.target();
                let (s_start, s_finish) = (latest_finish[s.index()] - duration(s), latest_finish[s.index()]);
                let bound = match edge.weight() {
                    DependencyType::EndStart => s_start,
                    DependencyType::StartStart => s_start + duration(node),
                    DependencyType::EndEnd => s_finish,
                    DependencyType::StartEnd => s_finish + duration(node),
                };
                finish = finish.min(bound);
            }
            latest_finish[node.index()] = finish;
        }

        let mut critical: Vec<(i64, usize, TaskId)> = order
            .iter()
            .enumerate()
            .filter(|(_, node)| latest_finish[node.index()] - duration(**node) == earliest_start[node.index()])
            .map(|(position, node)| (earliest_start[node.index()], position, dag[*node].id))
            .collect();
        critical.sort();

        debug!(critical = critical.len(), duration = project_finish, "critical path computed");
        CriticalPath {
            tasks: critical.into_iter().map(|(_, _, id)| id).collect(),
            project_duration_days: project_finish,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::{Dependency, TaskSpec};
    use chrono::{Duration, NaiveDate};

    fn day(offset: i64) -> IntraDayDate {
        IntraDayDate::start_of_day(NaiveDate::from_ymd_opt(2010, 1, 4).unwrap() + Duration::days(offset))
    }

    fn leaf(graph: &mut TaskGraph, name: &str, days: i64) -> TaskId {
        graph.add(TaskSpec::leaf(name, day(0), day(days))).unwrap()
    }

    fn depend(graph: &mut TaskGraph, source: TaskId, destination: TaskId, kind: DependencyType) {
        graph.add_dependency(Dependency::new(source, destination, kind)).unwrap();
    }

    fn critical(graph: &TaskGraph) -> Vec<TaskId> {
        CriticalPathCalculator::create(true).calculate_critical_path(graph)
    }

    fn sorted(mut ids: Vec<TaskId>) -> Vec<TaskId> {
        ids.sort();
        ids
    }

    #[test]
    fn single_task_is_critical() {
        let mut graph = TaskGraph::new(day(0));
        let only = leaf(&mut graph, "only", 3);

        let path = CriticalPathCalculator::create(true).calculate(&graph);

        assert_eq!(path.tasks, vec![only]);
        assert_eq!(path.project_duration_days, 3);
    }

    #[test]
    fn empty_plan_has_no_critical_path() {
        let graph = TaskGraph::new(day(0));
        assert!(critical(&graph).is_empty());
    }

    #[test]
    fn start_start_longer_first() {
        let mut graph = TaskGraph::new(day(0));
        let t1 = leaf(&mut graph, "t1", 8);
        let t2 = leaf(&mut graph, "t2", 4);
        depend(&mut graph, t1, t2, DependencyType::StartStart);

        assert_eq!(critical(&graph), vec![t1]);
    }

    #[test]
    fn start_start_longer_second() {
        let mut graph = TaskGraph::new(day(0));
        let t1 = leaf(&mut graph, "t1", 5);
        let t2 = leaf(&mut graph, "t2", 10);
        depend(&mut graph, t1, t2, DependencyType::StartStart);

        assert_eq!(critical(&graph), vec![t1, t2]);
    }

    #[test]
    fn start_start_equal_lengths() {
        let mut graph = TaskGraph::new(day(0));
        let t1 = leaf(&mut graph, "t1", 5);
        let t2 = leaf(&mut graph, "t2", 5);
        depend(&mut graph, t1, t2, DependencyType::StartStart);

        assert_eq!(critical(&graph), vec![t1, t2]);
    }

    #[test]
    fn end_end_longer_first() {
        let mut graph = TaskGraph::new(day(0));
        let t1 = leaf(&mut graph, "t1", 10);
        let t2 = leaf(&mut graph, "t2", 5);
        depend(&mut graph, t1, t2, DependencyType::EndEnd);

        assert_eq!(critical(&graph), vec![t1, t2]);
    }

    #[test]
    fn end_end_longer_second() {
        let mut graph = TaskGraph::new(day(0));
        let t1 = leaf(&mut graph, "t1", 5);
        let t2 = leaf(&mut graph, "t2", 10);
        depend(&mut graph, t1, t2, DependencyType::EndEnd);

        assert_eq!(critical(&graph), vec![t2]);
    }

    /// Task `tN` lasts N days; `variable` is the length of the task after t6
    fn network(variable: i64) -> (TaskGraph, HashMap<&'static str, TaskId>) {
        let mut graph = TaskGraph::new(day(0));
        let mut ids = HashMap::new();
        for (name, days) in [
            ("t4", 4),
            ("t5", 5),
            ("t8", 8),
            ("t2", 2),
            ("t6", 6),
            ("tv", variable),
            ("t3", 3),
            ("t10", 10),
        ] {
            ids.insert(name, leaf(&mut graph, name, days));
        }
        for (source, destination) in [
            ("t4", "t5"),
            ("t4", "t8"),
            ("t4", "t2"),
            ("t5", "t2"),
            ("t8", "t3"),
            ("t6", "tv"),
            ("t6", "t3"),
            ("t2", "t10"),
            ("t3", "t10"),
        ] {
            depend(&mut graph, ids[source], ids[destination], DependencyType::EndStart);
        }
        (graph, ids)
    }

    #[test]
    fn long_side_branch_is_the_only_critical_chain() {
        let (graph, ids) = network(20);
        assert_eq!(critical(&graph), vec![ids["t6"], ids["tv"]]);
    }

    #[test]
    fn main_chain_is_critical_when_branch_is_short() {
        let (graph, ids) = network(10);
        assert_eq!(critical(&graph), vec![ids["t4"], ids["t8"], ids["t3"], ids["t10"]]);
    }

    #[test]
    fn equal_chains_are_both_critical() {
        let (graph, ids) = network(19);
        let path = critical(&graph);
        assert_eq!(
            sorted(path),
            sorted(vec![ids["t4"], ids["t8"], ids["t3"], ids["t10"], ids["t6"], ids["tv"]])
        );
    }

    #[test]
    fn removing_the_bottleneck_moves_the_path() {
        let (mut graph, ids) = network(10);
        graph.remove_dependency(ids["t8"], ids["t3"]).unwrap();

        assert_eq!(critical(&graph), vec![ids["t4"], ids["t5"], ids["t2"], ids["t10"]]);
    }

    #[test]
    fn container_dependencies_reach_their_leaves() {
        let mut graph = TaskGraph::new(day(0));
        let group = graph.add(TaskSpec::container("group")).unwrap();
        let a = graph.add(TaskSpec::leaf("a", day(0), day(3)).under(group)).unwrap();
        let b = graph.add(TaskSpec::leaf("b", day(0), day(1)).under(group)).unwrap();
        let after = leaf(&mut graph, "after", 2);
        depend(&mut graph, group, after, DependencyType::EndStart);

        let path = CriticalPathCalculator::create(true).calculate(&graph);

        assert_eq!(path.tasks, vec![a, after]);
        assert_eq!(path.project_duration_days, 5);
        assert!(path.contains(&graph, group));
        assert!(!path.contains(&graph, b));
    }

    #[test]
    fn constraints_count_only_without_dependency_priority() {
        let mut graph = TaskGraph::new(day(0));
        let a = leaf(&mut graph, "a", 5);
        let b = graph
            .add(TaskSpec::leaf("b", day(0), day(3)).with_constraint(PositionConstraint::StartNotEarlierThan(day(4))))
            .unwrap();

        assert_eq!(CriticalPathCalculator::create(true).calculate_critical_path(&graph), vec![a]);
        assert_eq!(CriticalPathCalculator::create(false).calculate_critical_path(&graph), vec![b]);
    }

    #[test]
    fn finish_constraint_tightens_latest_finish() {
        let mut graph = TaskGraph::new(day(0));
        let a = leaf(&mut graph, "a", 5);
        let b = graph
            .add(TaskSpec::leaf("b", day(0), day(2)).with_constraint(PositionConstraint::FinishNotLaterThan(day(2))))
            .unwrap();

        let mut path = CriticalPathCalculator::create(false).calculate_critical_path(&graph);
        path.sort();
        assert_eq!(path, vec![a, b]);
    }
}
