//! Resource allocations
//!
//! A [`ResourceAllocation`] binds a task to a specific resource or to a pool
//! of interchangeable ones and owns the resulting [`DayAssignment`]s. Batches
//! of allocations are validated here before the allocator touches them.

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use super::date::IntraDayDate;
use super::effort::{EffortDuration, ResourcesPerDay};
use super::graph::GraphError;
use super::id::{ResourceId, TaskId};

#[derive(Debug, Error, PartialEq)]
pub enum AllocationError {
    #[error("No allocations to allocate")]
    EmptyBatch,

    #[error("Allocations in one batch must share a task: found {0} and {1}")]
    MixedTasks(TaskId, TaskId),

    #[error("Allocation on {0} needs a positive resources per day")]
    NonPositiveResourcesPerDay(TaskId),

    #[error("Generic allocation on {0} has no candidate resources")]
    EmptyPool(TaskId),

    #[error("Unknown resource: {0}")]
    ResourceNotFound(ResourceId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Only leaf tasks carry allocations: {0}")]
    NotALeaf(TaskId),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Who an allocation draws effort from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationKind {
    /// `None` is a placeholder with no resource behind it
    Specific { resource: Option<ResourceId> },
    Generic { pool: Vec<ResourceId> },
}

/// Effort assigned to one resource on one day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayAssignment {
    pub resource: ResourceId,
    pub day: NaiveDate,
    pub duration: EffortDuration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceAllocation {
    task: TaskId,
    kind: AllocationKind,
    intended: ResourcesPerDay,
    realized: ResourcesPerDay,
    assignments: Vec<DayAssignment>,
    satisfied: bool,
    interval: Option<(IntraDayDate, IntraDayDate)>,
}

impl ResourceAllocation {
    pub fn specific(task: TaskId, resource: ResourceId, intended: ResourcesPerDay) -> Self {
        Self::new(task, AllocationKind::Specific { resource: Some(resource) }, intended)
    }

    /// A specific allocation without a resource; it never takes any effort
    pub fn unassigned(task: TaskId) -> Self {
        Self::new(task, AllocationKind::Specific { resource: None }, ResourcesPerDay::zero())
    }

    pub fn generic(task: TaskId, pool: Vec<ResourceId>, intended: ResourcesPerDay) -> Self {
        Self::new(task, AllocationKind::Generic { pool }, intended)
    }

    fn new(task: TaskId, kind: AllocationKind, intended: ResourcesPerDay) -> Self {
        Self {
            task,
            kind,
            intended,
            realized: ResourcesPerDay::zero(),
            assignments: Vec::new(),
            satisfied: true,
            interval: None,
        }
    }

    /// Validates a batch and hands it to the allocator
    pub fn allocating(requests: Vec<AllocationRequest<'_>>) -> Result<AllocationBatch<'_>, AllocationError> {
        let first = requests.first().ok_or(AllocationError::EmptyBatch)?.allocation.task;

        for request in &requests {
            let allocation = &request.allocation;
            if allocation.task != first {
                return Err(AllocationError::MixedTasks(first, allocation.task));
            }
            let zero = request.resources_per_day.is_zero();
            match &allocation.kind {
                AllocationKind::Specific { resource: None } => {}
                _ if zero => return Err(AllocationError::NonPositiveResourcesPerDay(allocation.task)),
                AllocationKind::Generic { pool } if pool.is_empty() => {
                    return Err(AllocationError::EmptyPool(allocation.task));
                }
                _ => {}
            }
        }

        Ok(AllocationBatch::new(first, requests))
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn kind(&self) -> &AllocationKind {
        &self.kind
    }

    pub fn is_generic(&self) -> bool {
        matches!(self.kind, AllocationKind::Generic { .. })
    }

    /// Resources this allocation may assign effort to
    pub fn candidates(&self) -> &[ResourceId] {
        match &self.kind {
            AllocationKind::Specific { resource } => resource.as_slice(),
            AllocationKind::Generic { pool } => pool,
        }
    }

    /// The ratio requested by the caller
    pub fn intended_resources_per_day(&self) -> ResourcesPerDay {
        self.intended
    }

    /// The ratio back-computed from the last allocation
    pub fn resources_per_day(&self) -> ResourcesPerDay {
        self.realized
    }

    pub fn assignments(&self) -> &[DayAssignment] {
        &self.assignments
    }

    pub fn is_satisfied(&self) -> bool {
        self.satisfied
    }

    /// Start and end of the span covered by the last allocation
    pub fn interval(&self) -> Option<(IntraDayDate, IntraDayDate)> {
        self.interval
    }

    pub fn total_assigned(&self) -> EffortDuration {
        self.assignments.iter().map(|a| a.duration).sum()
    }

    pub fn assigned_on(&self, day: NaiveDate) -> EffortDuration {
        self.assignments.iter().filter(|a| a.day == day).map(|a| a.duration).sum()
    }

    pub fn assigned_to(&self, resource: ResourceId, day: NaiveDate) -> EffortDuration {
        self.assignments
            .iter()
            .filter(|a| a.resource == resource && a.day == day)
            .map(|a| a.duration)
            .sum()
    }

    /// Effort per day across all resources, in day order
    pub fn daily_totals(&self) -> Vec<(NaiveDate, EffortDuration)> {
        let mut totals: Vec<(NaiveDate, EffortDuration)> = Vec::new();
        for assignment in &self.assignments {
            match totals.iter_mut().find(|(day, _)| *day == assignment.day) {
                Some((_, total)) => *total += assignment.duration,
                None => totals.push((assignment.day, assignment.duration)),
            }
        }
        totals.sort_by_key(|(day, _)| *day);
        totals
    }

    /// Drops every day assignment
    pub fn release(&mut self) {
        self.assignments.clear();
        self.realized = ResourcesPerDay::zero();
        self.interval = None;
        self.satisfied = true;
    }

    pub(crate) fn set_intended(&mut self, intended: ResourcesPerDay) {
        self.intended = intended;
    }

    pub(crate) fn record(
        &mut self,
        assignments: Vec<DayAssignment>,
        realized: ResourcesPerDay,
        interval: (IntraDayDate, IntraDayDate),
        satisfied: bool,
    ) {
        self.assignments = assignments;
        self.realized = realized;
        self.interval = Some(interval);
        self.satisfied = satisfied;
    }
}

/// An allocation paired with the ratio to allocate it at
#[derive(Debug)]
pub struct AllocationRequest<'a> {
    pub allocation: &'a mut ResourceAllocation,
    pub resources_per_day: ResourcesPerDay,
}

impl<'a> AllocationRequest<'a> {
    pub fn new(allocation: &'a mut ResourceAllocation, resources_per_day: ResourcesPerDay) -> Self {
        Self {
            allocation,
            resources_per_day,
        }
    }

    /// Request at the allocation's own intended ratio
    pub fn at_intended(allocation: &'a mut ResourceAllocation) -> Self {
        let rpd = allocation.intended;
        Self::new(allocation, rpd)
    }
}

/// Callback invoked once per request that could not be fully allocated
pub trait NotFulfilledReceiver {
    fn cant_fulfill(&mut self, allocation: &ResourceAllocation, missing: EffortDuration);
}

impl<F> NotFulfilledReceiver for F
where
    F: FnMut(&ResourceAllocation, EffortDuration),
{
    fn cant_fulfill(&mut self, allocation: &ResourceAllocation, missing: EffortDuration) {
        self(allocation, missing)
    }
}

/// A validated set of requests for a single task
#[derive(Debug)]
pub struct AllocationBatch<'a> {
    task: TaskId,
    pub(crate) requests: Vec<AllocationRequest<'a>>,
}

impl<'a> AllocationBatch<'a> {
    fn new(task: TaskId, requests: Vec<AllocationRequest<'a>>) -> Self {
        Self { task, requests }
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(n: usize) -> TaskId {
        TaskId::from_index(n)
    }

    fn resource(n: usize) -> ResourceId {
        ResourceId::from_index(n)
    }

    #[test]
    fn empty_batch_rejected() {
        let result = ResourceAllocation::allocating(vec![]);
        assert!(matches!(result, Err(AllocationError::EmptyBatch)));
    }

    #[test]
    fn mixed_tasks_rejected() {
        let mut a = ResourceAllocation::specific(task(0), resource(0), ResourcesPerDay::amount(1));
        let mut b = ResourceAllocation::specific(task(1), resource(0), ResourcesPerDay::amount(1));
        let result = ResourceAllocation::allocating(vec![
            AllocationRequest::at_intended(&mut a),
            AllocationRequest::at_intended(&mut b),
        ]);
        assert!(matches!(result, Err(AllocationError::MixedTasks(_, _))));
    }

    #[test]
    fn generic_needs_positive_ratio_and_pool() {
        let mut zero = ResourceAllocation::generic(task(0), vec![resource(0)], ResourcesPerDay::zero());
        let result = ResourceAllocation::allocating(vec![AllocationRequest::at_intended(&mut zero)]);
        assert!(matches!(result, Err(AllocationError::NonPositiveResourcesPerDay(_))));

        let mut empty = ResourceAllocation::generic(task(0), vec![], ResourcesPerDay::amount(1));
        let result = ResourceAllocation::allocating(vec![AllocationRequest::at_intended(&mut empty)]);
        assert!(matches!(result, Err(AllocationError::EmptyPool(_))));
    }

    #[test]
    fn specific_with_zero_ratio_needs_no_resource() {
        let mut staffed = ResourceAllocation::specific(task(0), resource(0), ResourcesPerDay::zero());
        let result = ResourceAllocation::allocating(vec![AllocationRequest::at_intended(&mut staffed)]);
        assert!(matches!(result, Err(AllocationError::NonPositiveResourcesPerDay(_))));

        let mut placeholder = ResourceAllocation::unassigned(task(0));
        assert!(placeholder.candidates().is_empty());
        let batch = ResourceAllocation::allocating(vec![AllocationRequest::at_intended(&mut placeholder)]).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.task(), task(0));
    }

    #[test]
    fn daily_totals_merge_resources() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let next = day.succ_opt().unwrap();
        let mut allocation = ResourceAllocation::generic(task(0), vec![resource(0), resource(1)], ResourcesPerDay::amount(2));
        allocation.record(
            vec![
                DayAssignment { resource: resource(0), day, duration: EffortDuration::hours(8) },
                DayAssignment { resource: resource(1), day, duration: EffortDuration::hours(8) },
                DayAssignment { resource: resource(0), day: next, duration: EffortDuration::hours(5) },
            ],
            ResourcesPerDay::amount(2),
            (IntraDayDate::start_of_day(day), IntraDayDate::create(next, EffortDuration::hours(5))),
            true,
        );

        assert_eq!(
            allocation.daily_totals(),
            vec![(day, EffortDuration::hours(16)), (next, EffortDuration::hours(5))]
        );
        assert_eq!(allocation.assigned_to(resource(0), next), EffortDuration::hours(5));
        assert_eq!(allocation.total_assigned(), EffortDuration::hours(21));

        allocation.release();
        assert!(allocation.assignments().is_empty());
        assert!(allocation.interval().is_none());
    }
}
