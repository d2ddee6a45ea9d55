//! Allocate until a target effort is filled
//!
//! Starting at a task boundary, each calendar day offers every request its
//! capacity at the request's resources-per-day. Whole days are taken while
//! the remaining effort covers them; the day that cannot be filled completely
//! receives the remainder split in proportion to the requested ratios, and the
//! sub-day offset where the work ends becomes the new boundary.
//!
//! Generic requests spread each day's effort over the pool members that have
//! spare time that day, in proportion to how much each has left.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::allocation::{
    AllocationBatch, AllocationError, AllocationRequest, DayAssignment, NotFulfilledReceiver, ResourceAllocation,
};
use super::calendar::{Calendar, WorkCalendar};
use super::date::{IntraDayDate, PartialDay};
use super::effort::{EffortDuration, ResourcesPerDay};
use super::graph::TaskGraph;
use super::id::{ResourceId, TaskId};
use super::propagate::EnforceReport;
use super::resource::{AssignedEffortLookup, NoAssignedEffort, ResourceRegistry};

/// Days searched before giving up on a request that cannot be filled
pub const DEFAULT_MAX_SEARCH_DAYS: u32 = 1825;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Fill from the task start; the boundary is the new end
    #[default]
    Forward,
    /// Fill backwards from the task end; the boundary is the new start
    Backward,
}

/// Everything the allocator reads besides the requests themselves
pub struct AllocationEnv<'a> {
    pub start: IntraDayDate,
    pub end: IntraDayDate,
    pub task_calendar: Option<&'a dyn Calendar>,
    pub resources: &'a ResourceRegistry,
    pub load: &'a dyn AssignedEffortLookup,
    pub max_search_days: u32,
}

impl<'a> AllocationEnv<'a> {
    pub fn new(start: IntraDayDate, end: IntraDayDate, resources: &'a ResourceRegistry) -> Self {
        Self {
            start,
            end,
            task_calendar: None,
            resources,
            load: &NoAssignedEffort,
            max_search_days: DEFAULT_MAX_SEARCH_DAYS,
        }
    }

    pub fn with_task_calendar(mut self, calendar: &'a dyn Calendar) -> Self {
        self.task_calendar = Some(calendar);
        self
    }

    pub fn with_load(mut self, load: &'a dyn AssignedEffortLookup) -> Self {
        self.load = load;
        self
    }

    pub fn with_max_search_days(mut self, days: u32) -> Self {
        self.max_search_days = days;
        self
    }
}

impl<'a> AllocationBatch<'a> {
    /// Allocates forward from the task start
    pub fn until_allocating(self, env: &AllocationEnv<'_>, effort: EffortDuration) -> Result<IntraDayDate, AllocationError> {
        self.until_allocating_in(env, Direction::Forward, effort)
    }

    pub fn until_allocating_in(
        self,
        env: &AllocationEnv<'_>,
        direction: Direction,
        effort: EffortDuration,
    ) -> Result<IntraDayDate, AllocationError> {
        let mut ignore = |_: &ResourceAllocation, _: EffortDuration| {};
        self.until_allocating_with(env, direction, effort, &mut ignore)
    }

    /// Allocates `effort` and returns the resulting boundary.
    ///
    /// When the calendars run out of usable days first, every request is
    /// marked unsatisfied, `receiver` hears about each one, and the task's own
    /// end (start, going backward) is returned.
    pub fn until_allocating_with(
        self,
        env: &AllocationEnv<'_>,
        direction: Direction,
        effort: EffortDuration,
        receiver: &mut dyn NotFulfilledReceiver,
    ) -> Result<IntraDayDate, AllocationError> {
        let task = self.task();
        let mut slots = Vec::with_capacity(self.requests.len());
        for request in &self.requests {
            slots.push(Slot::new(env, task, request)?);
        }

        debug!(%task, %effort, requests = slots.len(), ?direction, "allocating");
        let outcome = match direction {
            Direction::Forward => fill_forward(env, &mut slots, effort),
            Direction::Backward => fill_backward(env, &mut slots, effort),
        };

        let (from, to) = outcome.span;
        for (request, slot) in self.requests.into_iter().zip(slots) {
            let realized = ResourcesPerDay::calculate_from(slot.total(), slot.workable(env, &from, &to));
            let Slot { assignments, .. } = slot;
            request.allocation.set_intended(request.resources_per_day);
            request.allocation.record(assignments, realized, (from, to), outcome.missing.is_zero());
            if !outcome.missing.is_zero() {
                receiver.cant_fulfill(request.allocation, outcome.missing);
            }
        }

        if outcome.missing.is_zero() {
            info!(%task, boundary = %outcome.boundary, "allocation filled");
        } else {
            warn!(%task, missing = %outcome.missing, "allocation could not be fulfilled");
        }
        Ok(outcome.boundary)
    }
}

struct Outcome {
    boundary: IntraDayDate,
    span: (IntraDayDate, IntraDayDate),
    missing: EffortDuration,
}

/// What one request can take on a given day
struct Offer {
    capacity: EffortDuration,
    /// Capacity of one full-time resource on the same slice
    unit: EffortDuration,
    /// Capacity of one full-time resource on the whole day
    day_length: EffortDuration,
}

impl Offer {
    fn none() -> Self {
        Self {
            capacity: EffortDuration::zero(),
            unit: EffortDuration::zero(),
            day_length: EffortDuration::zero(),
        }
    }
}

/// Working state of one request during a fill
struct Slot<'e> {
    task: TaskId,
    rpd: ResourcesPerDay,
    generic: bool,
    members: Vec<(ResourceId, &'e WorkCalendar)>,
    assignments: Vec<DayAssignment>,
}

impl<'e> Slot<'e> {
    fn new(env: &AllocationEnv<'e>, task: TaskId, request: &AllocationRequest<'_>) -> Result<Self, AllocationError> {
        let mut members = Vec::new();
        for id in request.allocation.candidates() {
            let calendar = env.resources.calendar(*id).ok_or(AllocationError::ResourceNotFound(*id))?;
            members.push((*id, calendar));
        }
        Ok(Self {
            task,
            rpd: request.resources_per_day,
            generic: request.allocation.is_generic(),
            members,
            assignments: Vec::new(),
        })
    }

    fn usable(&self, env: &AllocationEnv<'_>, date: NaiveDate) -> Vec<(ResourceId, &'e WorkCalendar)> {
        if env.task_calendar.is_some_and(|c| !c.is_usable(date)) {
            return Vec::new();
        }
        self.members.iter().copied().filter(|(_, c)| c.is_usable(date)).collect()
    }

    fn offer(&self, env: &AllocationEnv<'_>, partial: &PartialDay) -> Offer {
        let usable = self.usable(env, partial.date());
        let Some((_, first)) = usable.first() else {
            return Offer::none();
        };

        let whole = PartialDay::whole(partial.date());
        let unit = mean(usable.iter().map(|(_, c)| combined_capacity(env, *c, partial)));
        let day_length = mean(usable.iter().map(|(_, c)| combined_capacity(env, *c, &whole)));
        let capacity = if self.generic {
            self.rpd.as_duration_given_working_day_of(unit)
        } else {
            let own = first.as_duration_on(partial, self.rpd);
            match env.task_calendar {
                Some(task) => own.min(task.as_duration_on(partial, self.rpd)),
                None => own,
            }
        };
        Offer {
            capacity,
            unit,
            day_length,
        }
    }

    fn assign(&mut self, env: &AllocationEnv<'_>, partial: &PartialDay, amount: EffortDuration) {
        if amount.is_zero() {
            return;
        }
        let day = partial.date();
        let usable = self.usable(env, day);

        if !self.generic {
            if let Some((resource, _)) = usable.first() {
                self.assignments.push(DayAssignment {
                    resource: *resource,
                    day,
                    duration: amount,
                });
            }
            return;
        }

        let capacities: Vec<EffortDuration> = usable.iter().map(|(_, c)| combined_capacity(env, *c, partial)).collect();
        let mut weights: Vec<u128> = usable
            .iter()
            .zip(&capacities)
            .map(|((id, _), capacity)| capacity.saturating_sub(env.load.assigned_effort(*id, day, self.task)).as_seconds() as u128)
            .collect();
        if weights.iter().all(|w| *w == 0) {
            weights = capacities.iter().map(|c| c.as_seconds() as u128).collect();
        }

        let caps = vec![amount; usable.len()];
        let shares = split_proportionally(amount, &weights, &caps);
        for ((resource, _), share) in usable.iter().zip(shares) {
            if !share.is_zero() {
                self.assignments.push(DayAssignment {
                    resource: *resource,
                    day,
                    duration: share,
                });
            }
        }
    }

    fn total(&self) -> EffortDuration {
        self.assignments.iter().map(|a| a.duration).sum()
    }

    /// One-resource capacity over `[from, to)`, counting partial end days by their fraction
    fn workable(&self, env: &AllocationEnv<'_>, from: &IntraDayDate, to: &IntraDayDate) -> EffortDuration {
        let mut total = EffortDuration::zero();
        if to <= from {
            return total;
        }
        let last = to.last_touched_day();
        let mut day = from.date();
        while day <= last {
            let partial = PartialDay::within(day, from, to);
            let usable = self.usable(env, day);
            total += mean(usable.iter().map(|(_, c)| combined_capacity(env, *c, &partial)));
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        total
    }

    /// Last day after which none of this request's calendars is valid
    fn horizon_end(&self, env: &AllocationEnv<'_>) -> Option<NaiveDate> {
        let ends: Vec<Option<NaiveDate>> = self.members.iter().map(|(_, c)| c.availability().valid_until()).collect();
        let resource = if ends.iter().any(Option::is_none) {
            None
        } else {
            ends.into_iter().flatten().max()
        };
        let task = env.task_calendar.and_then(|c| c.availability().valid_until());
        match (resource, task) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// First day before which none of this request's calendars is valid
    fn horizon_start(&self, env: &AllocationEnv<'_>) -> Option<NaiveDate> {
        let starts: Vec<Option<NaiveDate>> = self.members.iter().map(|(_, c)| c.availability().valid_from()).collect();
        let resource = if starts.iter().any(Option::is_none) {
            None
        } else {
            starts.into_iter().flatten().min()
        };
        let task = env.task_calendar.and_then(|c| c.availability().valid_from());
        match (resource, task) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// A resource's capacity on a slice, never above what the task calendar allows
fn combined_capacity(env: &AllocationEnv<'_>, calendar: &WorkCalendar, partial: &PartialDay) -> EffortDuration {
    let own = calendar.capacity_on(partial);
    match env.task_calendar {
        Some(task) => own.min(task.capacity_on(partial)),
        None => own,
    }
}

fn mean(values: impl Iterator<Item = EffortDuration>) -> EffortDuration {
    let (sum, count) = values.fold((0u64, 0u64), |(sum, count), v| (sum + v.as_seconds(), count + 1));
    if count == 0 {
        EffortDuration::zero()
    } else {
        EffortDuration::seconds(sum / count)
    }
}

/// Splits `total` by `weights` without exceeding `caps`.
///
/// Shares that would pass their cap are pinned to it and the rest is
/// re-split among the others. Whole seconds left over from rounding go to the
/// largest fractional remainders, earlier entries first on ties.
pub(crate) fn split_proportionally(total: EffortDuration, weights: &[u128], caps: &[EffortDuration]) -> Vec<EffortDuration> {
    let mut shares = vec![EffortDuration::zero(); weights.len()];
    let mut active: Vec<usize> = (0..weights.len()).filter(|i| !caps[*i].is_zero()).collect();
    let mut left = total.as_seconds() as u128;

    while !active.is_empty() && left > 0 {
        let weight_sum: u128 = active.iter().map(|i| weights[*i]).sum();
        let by_caps = weight_sum == 0;
        let weight = |i: usize| if by_caps { caps[i].as_seconds() as u128 } else { weights[i] };
        let weight_sum: u128 = active.iter().map(|i| weight(*i)).sum();

        let saturated: Vec<usize> = active
            .iter()
            .copied()
            .filter(|i| left * weight(*i) >= caps[*i].as_seconds() as u128 * weight_sum)
            .collect();
        if !saturated.is_empty() {
            for i in saturated {
                shares[i] = caps[i];
                left -= caps[i].as_seconds() as u128;
                active.retain(|a| *a != i);
            }
            continue;
        }

        let mut remainders = Vec::with_capacity(active.len());
        let mut handed_out = 0u128;
        for &i in &active {
            let numerator = left * weight(i);
            let floor = numerator / weight_sum;
            shares[i] = EffortDuration::seconds(floor as u64);
            handed_out += floor;
            remainders.push((numerator % weight_sum, i));
        }
        remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        let extra = (left - handed_out) as usize;
        for (_, i) in remainders.into_iter().take(extra) {
            shares[i] += EffortDuration::seconds(1);
        }
        break;
    }
    shares
}

fn remainder_split(slots: &[Slot<'_>], offers: &[Offer], remaining: EffortDuration) -> Vec<EffortDuration> {
    let weights: Vec<u128> = slots.iter().map(|s| s.rpd.units() as u128).collect();
    let caps: Vec<EffortDuration> = offers.iter().map(|o| o.capacity).collect();
    split_proportionally(remaining, &weights, &caps)
}

fn fill_forward(env: &AllocationEnv<'_>, slots: &mut [Slot<'_>], effort: EffortDuration) -> Outcome {
    let start = env.start;
    if effort.is_zero() {
        return Outcome {
            boundary: start,
            span: (start, start),
            missing: EffortDuration::zero(),
        };
    }

    let horizons: Vec<Option<NaiveDate>> = slots.iter().map(|s| s.horizon_end(env)).collect();
    let horizon = if horizons.iter().any(Option::is_none) {
        None
    } else {
        horizons.into_iter().flatten().max()
    };

    let mut remaining = effort;
    let mut day = start.date();
    for _ in 0..env.max_search_days {
        if horizon.is_some_and(|h| day >= h) {
            break;
        }

        let partial = if day == start.date() {
            PartialDay::starting_at(day, start.effort())
        } else {
            PartialDay::whole(day)
        };
        let offers: Vec<Offer> = slots.iter().map(|s| s.offer(env, &partial)).collect();
        let total: EffortDuration = offers.iter().map(|o| o.capacity).sum();

        if !total.is_zero() && remaining >= total {
            for (slot, offer) in slots.iter_mut().zip(&offers) {
                slot.assign(env, &partial, offer.capacity);
            }
            remaining = remaining - total;
            if remaining.is_zero() {
                let end = IntraDayDate::start_of_day(day).next_day_at_start();
                return Outcome {
                    boundary: end,
                    span: (start, end),
                    missing: remaining,
                };
            }
        } else if !total.is_zero() {
            let shares = remainder_split(slots, &offers, remaining);
            let mut end = IntraDayDate::start_of_day(day);
            for ((slot, offer), share) in slots.iter_mut().zip(&offers).zip(shares) {
                slot.assign(env, &partial, share);
                if offer.capacity.is_zero() {
                    continue;
                }
                let consumed = offer.unit.scale_ceil(share, offer.capacity);
                let reached = IntraDayDate::create(day, partial.start() + consumed).normalized(offer.day_length);
                end = end.max(reached);
            }
            return Outcome {
                boundary: end,
                span: (start, end),
                missing: EffortDuration::zero(),
            };
        }

        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    Outcome {
        boundary: env.end,
        span: (start, IntraDayDate::start_of_day(day)),
        missing: remaining,
    }
}

fn fill_backward(env: &AllocationEnv<'_>, slots: &mut [Slot<'_>], effort: EffortDuration) -> Outcome {
    let end = env.end;
    if effort.is_zero() {
        return Outcome {
            boundary: end,
            span: (end, end),
            missing: EffortDuration::zero(),
        };
    }

    let horizons: Vec<Option<NaiveDate>> = slots.iter().map(|s| s.horizon_start(env)).collect();
    let horizon = if horizons.iter().any(Option::is_none) {
        None
    } else {
        horizons.into_iter().flatten().min()
    };

    let mut remaining = effort;
    let mut day = end.last_touched_day();
    let mut searched_from = end;
    for _ in 0..env.max_search_days {
        if horizon.is_some_and(|h| day < h) {
            break;
        }

        let partial = if day == end.date() {
            PartialDay::ending_at(day, end.effort())
        } else {
            PartialDay::whole(day)
        };
        let offers: Vec<Offer> = slots.iter().map(|s| s.offer(env, &partial)).collect();
        let total: EffortDuration = offers.iter().map(|o| o.capacity).sum();

        if !total.is_zero() && remaining >= total {
            for (slot, offer) in slots.iter_mut().zip(&offers) {
                slot.assign(env, &partial, offer.capacity);
            }
            remaining = remaining - total;
            if remaining.is_zero() {
                let start = IntraDayDate::start_of_day(day);
                return Outcome {
                    boundary: start,
                    span: (start, end),
                    missing: remaining,
                };
            }
        } else if !total.is_zero() {
            let shares = remainder_split(slots, &offers, remaining);
            let mut start = IntraDayDate::start_of_day(day).next_day_at_start();
            for ((slot, offer), share) in slots.iter_mut().zip(&offers).zip(shares) {
                slot.assign(env, &partial, share);
                if offer.capacity.is_zero() {
                    continue;
                }
                let consumed = offer.unit.scale_ceil(share, offer.capacity);
                let reached = IntraDayDate::create(day, partial.end_offset(offer.day_length) - consumed);
                start = start.min(reached);
            }
            return Outcome {
                boundary: start,
                span: (start, end),
                missing: EffortDuration::zero(),
            };
        }

        searched_from = IntraDayDate::start_of_day(day);
        match day.pred_opt() {
            Some(previous) => day = previous,
            None => break,
        }
    }

    Outcome {
        boundary: env.start,
        span: (searched_from, end),
        missing: remaining,
    }
}

/// Result of allocating a task that lives in a [`TaskGraph`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskAllocation {
    pub boundary: IntraDayDate,
    pub satisfied: bool,
    pub report: EnforceReport,
}

impl TaskGraph {
    /// Allocates `effort` over the task's own allocations, moves the task
    /// boundary accordingly and re-enforces the plan.
    pub fn allocate_task(
        &mut self,
        id: TaskId,
        resources: &ResourceRegistry,
        effort: EffortDuration,
        direction: Direction,
        max_search_days: u32,
        receiver: &mut dyn NotFulfilledReceiver,
    ) -> Result<TaskAllocation, AllocationError> {
        let task = self.task(id).ok_or(AllocationError::TaskNotFound(id))?;
        if !task.is_leaf() {
            return Err(AllocationError::NotALeaf(id));
        }
        let (start, end) = (task.start(), task.end());

        let mut allocations = self.take_allocations(id)?;
        let result = {
            let calendar = self.task(id).and_then(|t| t.calendar.as_ref());
            let mut env = AllocationEnv::new(start, end, resources)
                .with_load(&*self)
                .with_max_search_days(max_search_days);
            if let Some(calendar) = calendar {
                env = env.with_task_calendar(calendar);
            }

            let requests = allocations.iter_mut().map(AllocationRequest::at_intended).collect();
            ResourceAllocation::allocating(requests)
                .and_then(|batch| batch.until_allocating_with(&env, direction, effort, receiver))
        };

        let satisfied = allocations.iter().all(ResourceAllocation::is_satisfied);
        self.set_allocations(id, allocations)?;
        let boundary = result?;

        let task = self.get_mut(id)?;
        match direction {
            Direction::Forward => task.set_dates(start, boundary),
            Direction::Backward => task.set_dates(boundary, end),
        }
        let report = self.enforce_from(vec![id])?;

        Ok(TaskAllocation {
            boundary,
            satisfied,
            report,
        })
    }
}
