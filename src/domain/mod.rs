//! Domain models for the scheduling engine
//!
//! Contains the core planning logic without any I/O concerns.

mod allocation;
mod allocator;
mod calendar;
mod critical_path;
mod date;
mod effort;
mod graph;
mod id;
mod propagate;
mod resource;
mod task;

pub use allocation::{
    AllocationBatch, AllocationError, AllocationKind, AllocationRequest, DayAssignment, NotFulfilledReceiver,
    ResourceAllocation,
};
pub use allocator::{AllocationEnv, Direction, TaskAllocation, DEFAULT_MAX_SEARCH_DAYS};
pub use calendar::{AvailabilityTimeline, Calendar, Capacity, Overtime, WorkCalendar};
pub use critical_path::{CriticalPath, CriticalPathCalculator};
pub use date::{DateError, IntraDayDate, PartialDay};
pub use effort::{EffortDuration, EffortError, ResourcesPerDay};
pub use graph::{GraphError, SchedulingMode, SchedulingSettings, TaskGraph};
pub use id::{IdError, ResourceId, TaskId};
pub use propagate::{ConstraintViolation, EnforceReport, Violation};
pub use resource::{AssignedEffortLookup, NoAssignedEffort, Resource, ResourceRegistry};
pub use task::{Dependency, DependencyType, PositionConstraint, Task, TaskKind, TaskSpec};
