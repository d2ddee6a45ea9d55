//! Resources and their existing load

use chrono::NaiveDate;

use super::calendar::WorkCalendar;
use super::effort::EffortDuration;
use super::id::{ResourceId, TaskId};

/// A worker with its own calendar
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub calendar: WorkCalendar,
}

/// Arena of resources addressed by [`ResourceId`]
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    resources: Vec<Resource>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, calendar: WorkCalendar) -> ResourceId {
        let id = ResourceId::from_index(self.resources.len());
        self.resources.push(Resource {
            id,
            name: name.into(),
            calendar,
        });
        id
    }

    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id.index())
    }

    pub fn calendar(&self, id: ResourceId) -> Option<&WorkCalendar> {
        self.get(id).map(|r| &r.calendar)
    }

    pub fn find(&self, name: &str) -> Option<ResourceId> {
        self.resources.iter().find(|r| r.name == name).map(|r| r.id)
    }

    pub fn name(&self, id: ResourceId) -> Option<&str> {
        self.get(id).map(|r| r.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Effort already committed to a resource on a day by other tasks
pub trait AssignedEffortLookup {
    fn assigned_effort(&self, resource: ResourceId, day: NaiveDate, excluding: TaskId) -> EffortDuration;
}

/// A lookup for resources with no other commitments
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAssignedEffort;

impl AssignedEffortLookup for NoAssignedEffort {
    fn assigned_effort(&self, _: ResourceId, _: NaiveDate, _: TaskId) -> EffortDuration {
        EffortDuration::zero()
    }
}
