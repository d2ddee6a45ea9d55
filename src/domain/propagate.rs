//! Constraint propagation
//!
//! Walks the expanded dependency DAG in topological order starting from the
//! changed tasks. A task is recomputed only when one of its predecessors
//! moved, and it only passes the change on when its own dates actually
//! changed, so a pass visits each task at most once and stops as soon as the
//! plan is stable again.
//!
//! Dates are compared as positions on a linear timeline of nominal working
//! days (see [`IntraDayDate::to_position`]), which keeps task lengths intact
//! while they move.

use petgraph::algo::toposort;
use petgraph::Direction;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::date::IntraDayDate;
use super::graph::{end_bound_from_destination, start_bound_from_source, GraphError, SchedulingMode, TaskGraph};
use super::id::TaskId;
use super::task::{DependencyType, PositionConstraint};

/// Why a task could not satisfy all of its constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    /// The position constraint won over dependency bounds
    DependencyOverridden,
    /// Dependency bounds won over the position constraint
    PositionOverridden,
    /// A pinned task sits outside its dependency bounds
    PinnedConflict,
}

impl Violation {
    pub fn label(&self) -> &'static str {
        match self {
            Violation::DependencyOverridden => "dependency overridden by position constraint",
            Violation::PositionOverridden => "position constraint overridden by dependencies",
            Violation::PinnedConflict => "pinned task violates its dependencies",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConstraintViolation {
    pub task: TaskId,
    pub violation: Violation,
}

/// Outcome of one enforce pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnforceReport {
    /// Tasks whose dates changed, in propagation order
    pub changed: Vec<TaskId>,
    pub violations: Vec<ConstraintViolation>,
}

impl EnforceReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn moved(&self, task: TaskId) -> bool {
        self.changed.contains(&task)
    }
}

/// Where a task should sit after considering its constraints
struct Placement {
    start: i64,
    end: i64,
    violation: Option<Violation>,
}

impl TaskGraph {
    /// Re-establishes every constraint affected by a change to `task`
    pub fn enforce_restrictions(&mut self, task: TaskId) -> Result<EnforceReport, GraphError> {
        self.get(task)?;
        self.enforce_from(vec![task])
    }

    /// Re-establishes every constraint of the plan
    pub fn enforce_all_restrictions(&mut self) -> Result<EnforceReport, GraphError> {
        let all: Vec<TaskId> = self.tasks().map(|t| t.id).collect();
        self.enforce_from(all)
    }

    pub(crate) fn enforce_from(&mut self, seeds: Vec<TaskId>) -> Result<EnforceReport, GraphError> {
        for listener in self.listeners.before.iter_mut() {
            listener(seeds.as_slice());
        }

        let mut dirty: HashSet<TaskId> = HashSet::new();
        for seed in &seeds {
            if self.contains(*seed) {
                dirty.insert(*seed);
                dirty.extend(self.descendants(*seed));
            }
        }

        let expanded = self.expanded(self.mode(), None);
        let order = toposort(&expanded.graph, None).map_err(|cycle| {
            let id = expanded.graph[cycle.node_id()];
            GraphError::CycleDetected(id, id)
        })?;

        let mut report = EnforceReport::default();
        for node in order {
            let id = expanded.graph[node];
            if !dirty.contains(&id) {
                continue;
            }

            let changed = if self.get(id)?.is_container() {
                self.refresh_container(id)
            } else {
                self.place(id, &mut report)?
            };
            if changed {
                report.changed.push(id);
            }

            // seeds were edited by the caller, so their successors are stale either way
            if changed || seeds.contains(&id) {
                dirty.extend(
                    expanded
                        .graph
                        .neighbors_directed(node, Direction::Outgoing)
                        .map(|next| expanded.graph[next]),
                );
            }
        }

        if report.is_consistent() {
            info!(seeds = seeds.len(), changed = report.changed.len(), "enforced restrictions");
        } else {
            warn!(
                seeds = seeds.len(),
                changed = report.changed.len(),
                violations = report.violations.len(),
                "enforced restrictions with violations"
            );
        }

        for listener in self.listeners.after.iter_mut() {
            listener(&report);
        }
        Ok(report)
    }

    /// Recomputes a leaf or milestone; returns true if its dates changed
    fn place(&mut self, id: TaskId, report: &mut EnforceReport) -> Result<bool, GraphError> {
        let day = self.settings().day_length;
        let placement = match self.mode() {
            SchedulingMode::Forward => self.place_forward(id)?,
            SchedulingMode::Backward => self.place_backward(id)?,
        };

        let task = self.get_mut(id)?;
        task.set_inconsistent(placement.violation.is_some());
        if let Some(violation) = placement.violation {
            debug!(task = %id, violation = violation.label(), "constraint violation");
            report.violations.push(ConstraintViolation { task: id, violation });
        }

        if task.pinned {
            return Ok(false);
        }

        let start = IntraDayDate::from_position(placement.start, day);
        let end = IntraDayDate::from_position(placement.end, day);
        let before = (task.start().to_position(day), task.end().to_position(day));
        if before == (placement.start, placement.end) {
            return Ok(false);
        }

        debug!(task = %id, %start, %end, "task moved");
        task.set_dates(start, end);
        Ok(true)
    }

    /// Dependencies that bound `id` directly or through one of its containers,
    /// seen from the side that is being placed
    fn constraining(&self, id: TaskId, direction: Direction) -> Vec<(TaskId, DependencyType)> {
        let mut holders = vec![id];
        holders.extend(self.ancestors(id));

        holders
            .into_iter()
            .flat_map(|holder| match direction {
                Direction::Incoming => self
                    .dependencies_into(holder)
                    .into_iter()
                    .map(|d| (d.source, d.kind))
                    .collect::<Vec<_>>(),
                Direction::Outgoing => self
                    .dependencies_from(holder)
                    .into_iter()
                    .map(|d| (d.destination, d.kind))
                    .collect(),
            })
            .collect()
    }

    fn place_forward(&self, id: TaskId) -> Result<Placement, GraphError> {
        let day = self.settings().day_length;
        let priority = self.dependencies_have_priority();
        let task = self.get(id)?;
        let length = self.length_of(task);
        let current = task.start().to_position(day);

        let mut dependency_bound: Option<i64> = None;
        for (source, kind) in self.constraining(id, Direction::Incoming) {
            let src = self.get(source)?;
            let bound = start_bound_from_source(kind, src.start().to_position(day), src.end().to_position(day), length);
            dependency_bound = Some(dependency_bound.map_or(bound, |b| b.max(bound)));
        }

        if task.pinned {
            let violation = dependency_bound
                .filter(|bound| current < *bound)
                .map(|_| Violation::PinnedConflict);
            return Ok(Placement {
                start: current,
                end: current + length,
                violation,
            });
        }

        let project = self.project_start().to_position(day);
        let floor = dependency_bound.map_or(project, |b| b.max(project));

        let upper = |latest: i64, preferred: i64| {
            if floor <= latest {
                (preferred, None)
            } else if priority {
                (floor, Some(Violation::PositionOverridden))
            } else {
                (latest, Some(Violation::DependencyOverridden))
            }
        };

        let (start, violation) = match task.constraint {
            PositionConstraint::AsSoonAsPossible => (floor, None),
            PositionConstraint::StartNotEarlierThan(date) => (floor.max(date.to_position(day)), None),
            PositionConstraint::FinishNotLaterThan(date) => {
                let latest = date.to_position(day) - length;
                upper(latest, floor)
            }
            PositionConstraint::AsLateAsPossible => match self.deadline() {
                Some(deadline) => {
                    let latest = deadline.to_position(day) - length;
                    upper(latest, latest)
                }
                None => (floor, None),
            },
        };

        Ok(Placement {
            start,
            end: start + length,
            violation,
        })
    }

    fn place_backward(&self, id: TaskId) -> Result<Placement, GraphError> {
        let day = self.settings().day_length;
        let priority = self.dependencies_have_priority();
        let task = self.get(id)?;
        let length = self.length_of(task);
        let current = task.end().to_position(day);

        let mut dependency_bound: Option<i64> = None;
        for (destination, kind) in self.constraining(id, Direction::Outgoing) {
            let dst = self.get(destination)?;
            let bound =
                end_bound_from_destination(kind, dst.start().to_position(day), dst.end().to_position(day), length);
            dependency_bound = Some(dependency_bound.map_or(bound, |b| b.min(bound)));
        }

        if task.pinned {
            let violation = dependency_bound
                .filter(|bound| current > *bound)
                .map(|_| Violation::PinnedConflict);
            return Ok(Placement {
                start: current - length,
                end: current,
                violation,
            });
        }

        let deadline = self.deadline().map(|d| d.to_position(day));
        let ceiling = match (deadline, dependency_bound) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let roof = ceiling.unwrap_or(current);

        let lower = |earliest: i64, preferred: i64| {
            if roof >= earliest {
                (preferred, None)
            } else if priority {
                (roof, Some(Violation::PositionOverridden))
            } else {
                (earliest, Some(Violation::DependencyOverridden))
            }
        };

        let (end, violation) = match task.constraint {
            PositionConstraint::AsLateAsPossible => (roof, None),
            PositionConstraint::FinishNotLaterThan(date) => (roof.min(date.to_position(day)), None),
            PositionConstraint::StartNotEarlierThan(date) => {
                let earliest = date.to_position(day) + length;
                lower(earliest, roof)
            }
            PositionConstraint::AsSoonAsPossible => {
                let earliest = self.project_start().to_position(day) + length;
                lower(earliest, earliest)
            }
        };

        Ok(Placement {
            start: end - length,
            end,
            violation,
        })
    }
}
