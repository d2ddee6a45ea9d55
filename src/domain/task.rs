//! Task domain model
//!
//! Tasks are leaves (units of work), containers (derived from their
//! children) or milestones (a single date). Dates are only ever changed by
//! the graph's edit operations and the propagator.

use serde::{Deserialize, Serialize};

use super::allocation::ResourceAllocation;
use super::calendar::WorkCalendar;
use super::date::IntraDayDate;
use super::graph::SchedulingMode;
use super::id::TaskId;

/// Type of dependency between tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// destination.start >= source.end
    #[default]
    EndStart,
    /// destination.start >= source.start
    StartStart,
    /// destination.end >= source.end
    EndEnd,
    /// destination.end >= source.start
    StartEnd,
}

impl DependencyType {
    /// Returns a display label for the dependency type
    pub fn label(&self) -> &'static str {
        match self {
            DependencyType::EndStart => "end-start",
            DependencyType::StartStart => "start-start",
            DependencyType::EndEnd => "end-end",
            DependencyType::StartEnd => "start-end",
        }
    }

    /// True if the bound is on the destination's start
    pub fn constrains_start(&self) -> bool {
        matches!(self, DependencyType::EndStart | DependencyType::StartStart)
    }
}

/// A typed edge from `source` to `destination`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub source: TaskId,
    pub destination: TaskId,
    #[serde(rename = "type", default)]
    pub kind: DependencyType,
}

impl Dependency {
    pub fn new(source: TaskId, destination: TaskId, kind: DependencyType) -> Self {
        Self {
            source,
            destination,
            kind,
        }
    }

    pub fn end_start(source: TaskId, destination: TaskId) -> Self {
        Self::new(source, destination, DependencyType::EndStart)
    }
}

/// Positioning rule applied to a task independently of dependencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "date", rename_all = "snake_case")]
pub enum PositionConstraint {
    #[default]
    AsSoonAsPossible,
    AsLateAsPossible,
    StartNotEarlierThan(IntraDayDate),
    FinishNotLaterThan(IntraDayDate),
}

impl PositionConstraint {
    pub fn label(&self) -> &'static str {
        match self {
            PositionConstraint::AsSoonAsPossible => "asap",
            PositionConstraint::AsLateAsPossible => "alap",
            PositionConstraint::StartNotEarlierThan(_) => "snet",
            PositionConstraint::FinishNotLaterThan(_) => "fnlt",
        }
    }

    /// The constraint left behind when a user drags a task to `[start, end)`
    ///
    /// Only the constraints that point in the scheduling direction are
    /// replaced; the opposite kind is kept as authored.
    pub fn explicitly_moved_to(&self, start: IntraDayDate, end: IntraDayDate, mode: SchedulingMode) -> Self {
        match (mode, self) {
            (
                SchedulingMode::Forward,
                PositionConstraint::AsSoonAsPossible | PositionConstraint::StartNotEarlierThan(_),
            ) => PositionConstraint::StartNotEarlierThan(start),
            (
                SchedulingMode::Backward,
                PositionConstraint::AsLateAsPossible | PositionConstraint::FinishNotLaterThan(_),
            ) => PositionConstraint::FinishNotLaterThan(end),
            _ => *self,
        }
    }
}

/// Variant-specific payload of a task
#[derive(Debug, Clone)]
pub enum TaskKind {
    Leaf { allocations: Vec<ResourceAllocation> },
    Container { children: Vec<TaskId> },
    Milestone,
}

/// A node of the plan
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    start: IntraDayDate,
    end: IntraDayDate,
    pub constraint: PositionConstraint,
    /// Never moved by propagation
    pub pinned: bool,
    pub calendar: Option<WorkCalendar>,
    parent: Option<TaskId>,
    inconsistent: bool,
    kind: TaskKind,
}

impl Task {
    pub(crate) fn from_spec(id: TaskId, spec: TaskSpec) -> Self {
        let end = match spec.kind {
            TaskKind::Milestone => spec.start,
            _ => spec.end.max(spec.start),
        };
        Self {
            id,
            name: spec.name,
            start: spec.start,
            end,
            constraint: spec.constraint,
            pinned: spec.pinned,
            calendar: spec.calendar,
            parent: spec.parent,
            inconsistent: false,
            kind: spec.kind,
        }
    }

    pub fn start(&self) -> IntraDayDate {
        self.start
    }

    pub fn end(&self) -> IntraDayDate {
        self.end
    }

    pub fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, TaskKind::Leaf { .. })
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, TaskKind::Container { .. })
    }

    pub fn is_milestone(&self) -> bool {
        matches!(self.kind, TaskKind::Milestone)
    }

    /// Leaves and milestones carry their own dates
    pub fn has_own_dates(&self) -> bool {
        !self.is_container()
    }

    /// Last propagation could not satisfy every constraint of this task
    pub fn is_inconsistent(&self) -> bool {
        self.inconsistent
    }

    pub fn children(&self) -> &[TaskId] {
        match &self.kind {
            TaskKind::Container { children } => children,
            _ => &[],
        }
    }

    pub fn allocations(&self) -> &[ResourceAllocation] {
        match &self.kind {
            TaskKind::Leaf { allocations } => allocations,
            _ => &[],
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            TaskKind::Leaf { .. } => "leaf",
            TaskKind::Container { .. } => "container",
            TaskKind::Milestone => "milestone",
        }
    }

    pub(crate) fn set_dates(&mut self, start: IntraDayDate, end: IntraDayDate) {
        self.start = start;
        self.end = if self.is_milestone() { start } else { end.max(start) };
    }

    pub(crate) fn set_inconsistent(&mut self, inconsistent: bool) {
        self.inconsistent = inconsistent;
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<TaskId>> {
        match &mut self.kind {
            TaskKind::Container { children } => Some(children),
            _ => None,
        }
    }

    pub(crate) fn allocations_mut(&mut self) -> Option<&mut Vec<ResourceAllocation>> {
        match &mut self.kind {
            TaskKind::Leaf { allocations } => Some(allocations),
            _ => None,
        }
    }
}

/// Builder for tasks added to a graph
#[derive(Debug, Clone)]
pub struct TaskSpec {
    name: String,
    start: IntraDayDate,
    end: IntraDayDate,
    constraint: PositionConstraint,
    pinned: bool,
    calendar: Option<WorkCalendar>,
    parent: Option<TaskId>,
    kind: TaskKind,
}

impl TaskSpec {
    /// A unit of work spanning `[start, end)`
    pub fn leaf(name: impl Into<String>, start: IntraDayDate, end: IntraDayDate) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            constraint: PositionConstraint::default(),
            pinned: false,
            calendar: None,
            parent: None,
            kind: TaskKind::Leaf {
                allocations: Vec::new(),
            },
        }
    }

    /// A container whose dates follow its children
    pub fn container(name: impl Into<String>) -> Self {
        let mut spec = Self::leaf(name, IntraDayDate::start_of_day(chrono::NaiveDate::MIN), IntraDayDate::start_of_day(chrono::NaiveDate::MIN));
        spec.kind = TaskKind::Container { children: Vec::new() };
        spec
    }

    pub fn milestone(name: impl Into<String>, at: IntraDayDate) -> Self {
        let mut spec = Self::leaf(name, at, at);
        spec.kind = TaskKind::Milestone;
        spec
    }

    pub fn under(mut self, parent: TaskId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_constraint(mut self, constraint: PositionConstraint) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    pub fn with_calendar(mut self, calendar: WorkCalendar) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub(crate) fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    pub(crate) fn is_container(&self) -> bool {
        matches!(self.kind, TaskKind::Container { .. })
    }
}
