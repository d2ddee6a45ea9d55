//! JSON plan descriptions
//!
//! A plan file names its calendars, resources and tasks and refers to them by
//! name. Loading resolves those names into a [`TaskGraph`] and a
//! [`ResourceRegistry`]. Nothing is written back.
//!
//! ```json
//! {
//!   "project_start": "2024-01-08",
//!   "calendars": { "part-time": { "hours_per_day": 4 } },
//!   "resources": [{ "name": "ana" }, { "name": "bo", "calendar": "part-time" }],
//!   "tasks": [
//!     { "name": "design", "start": "2024-01-08", "end": "2024-01-10",
//!       "allocations": [{ "resource": "ana" }] },
//!     { "name": "build", "start": "2024-01-08", "end": "2024-01-12",
//!       "allocations": [{ "pool": ["ana", "bo"], "resources_per_day": 2 }] }
//!   ],
//!   "dependencies": [{ "source": "design", "destination": "build" }]
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::config::EngineConfig;
use crate::domain::{
    AvailabilityTimeline, Dependency, DependencyType, EffortDuration, GraphError, IntraDayDate, Overtime,
    PositionConstraint, ResourceAllocation, ResourceId, ResourceRegistry, ResourcesPerDay, SchedulingMode, TaskGraph,
    TaskId, TaskSpec, WorkCalendar,
};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Failed to parse plan: {0}")]
    Parse(String),

    #[error("Duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("Duplicate resource name: {0}")]
    DuplicateResource(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Unknown calendar: {0}")]
    UnknownCalendar(String),

    #[error("Task {0} needs a start and an end")]
    MissingDates(String),

    #[error("Allocation on {0} needs exactly one of `resource` or `pool`")]
    InvalidAllocation(String),

    #[error("Unavailable range in calendar {0} needs `from` or `until`")]
    InvalidCalendar(String),

    #[error("Calendar {calendar}: hours_per_day must be between 1 and 24, got {hours}")]
    InvalidHours { calendar: String, hours: u64 },

    #[error("Allocation of {resource} on {task} needs a positive resources_per_day")]
    ZeroResourcesPerDay { task: String, resource: String },

    #[error("{task}: {source}")]
    Graph {
        task: String,
        #[source]
        source: GraphError,
    },
}

/// Root of a plan file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanFile {
    pub project_start: IntraDayDate,
    #[serde(default)]
    pub deadline: Option<IntraDayDate>,
    #[serde(default)]
    pub scheduling: SchedulingOverrides,
    #[serde(default)]
    pub calendars: BTreeMap<String, CalendarEntry>,
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
    #[serde(default)]
    pub dependencies: Vec<DependencyEntry>,
}

/// Per-plan overrides of the `[scheduling]` configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulingOverrides {
    pub mode: Option<SchedulingMode>,
    pub dependencies_have_priority: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalendarEntry {
    pub hours_per_day: Option<u64>,
    pub working_days: Option<Vec<Weekday>>,
    #[serde(default)]
    pub exceptions: BTreeMap<NaiveDate, EffortDuration>,
    #[serde(default)]
    pub unavailable: Vec<UnavailableRange>,
    /// Extra effort allowed per day; unlimited when absent
    pub overtime: Option<EffortDuration>,
}

/// Days in `[from, until)`; an open side extends forever
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnavailableRange {
    pub from: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceEntry {
    pub name: String,
    pub calendar: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEntryKind {
    #[default]
    Leaf,
    Container,
    Milestone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskEntry {
    pub name: String,
    #[serde(default)]
    pub kind: TaskEntryKind,
    pub start: Option<IntraDayDate>,
    pub end: Option<IntraDayDate>,
    /// Name of a container declared earlier in the file
    pub parent: Option<String>,
    #[serde(default)]
    pub constraint: PositionConstraint,
    #[serde(default)]
    pub pinned: bool,
    pub calendar: Option<String>,
    #[serde(default)]
    pub allocations: Vec<AllocationEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllocationEntry {
    pub resource: Option<String>,
    pub pool: Option<Vec<String>>,
    #[serde(default = "one_resource")]
    pub resources_per_day: ResourcesPerDay,
}

fn one_resource() -> ResourcesPerDay {
    ResourcesPerDay::amount(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyEntry {
    pub source: String,
    pub destination: String,
    #[serde(rename = "type", default)]
    pub kind: DependencyType,
}

/// A loaded plan, ready to schedule
#[derive(Debug)]
pub struct Plan {
    pub graph: TaskGraph,
    pub resources: ResourceRegistry,
}

impl Plan {
    /// Reads a plan file
    pub fn load(path: &Path, config: &EngineConfig) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read plan: {}", path.display()))?;
        Self::from_json_str(&content, config).with_context(|| format!("Invalid plan: {}", path.display()))
    }

    pub fn from_json_str(content: &str, config: &EngineConfig) -> Result<Self, PlanError> {
        let file: PlanFile = serde_json::from_str(content).map_err(|e| PlanError::Parse(e.to_string()))?;
        Self::build(file, config)
    }

    pub fn build(file: PlanFile, config: &EngineConfig) -> Result<Self, PlanError> {
        let calendars = file
            .calendars
            .iter()
            .map(|(name, entry)| Ok((name.clone(), build_calendar(name, entry, config)?)))
            .collect::<Result<HashMap<String, WorkCalendar>, PlanError>>()?;
        let calendar = |name: &str| {
            calendars
                .get(name)
                .cloned()
                .ok_or_else(|| PlanError::UnknownCalendar(name.to_string()))
        };

        let mut resources = ResourceRegistry::new();
        for entry in &file.resources {
            if resources.find(&entry.name).is_some() {
                return Err(PlanError::DuplicateResource(entry.name.clone()));
            }
            let cal = match &entry.calendar {
                Some(name) => calendar(name)?,
                None => config.default_calendar(),
            };
            resources.add(entry.name.clone(), cal);
        }

        let mut settings = config.scheduling_settings();
        if let Some(mode) = file.scheduling.mode {
            settings.mode = mode;
        }
        if let Some(priority) = file.scheduling.dependencies_have_priority {
            settings.dependencies_have_priority = priority;
        }
        let mut graph = TaskGraph::with_settings(file.project_start, settings);
        graph.set_deadline(file.deadline);

        let mut names: HashMap<String, TaskId> = HashMap::new();
        for entry in &file.tasks {
            if names.contains_key(&entry.name) {
                return Err(PlanError::DuplicateTask(entry.name.clone()));
            }
            let mut spec = match entry.kind {
                TaskEntryKind::Container => TaskSpec::container(&entry.name),
                TaskEntryKind::Milestone => {
                    let at = entry.start.or(entry.end).ok_or_else(|| PlanError::MissingDates(entry.name.clone()))?;
                    TaskSpec::milestone(&entry.name, at)
                }
                TaskEntryKind::Leaf => match (entry.start, entry.end) {
                    (Some(start), Some(end)) => TaskSpec::leaf(&entry.name, start, end),
                    _ => return Err(PlanError::MissingDates(entry.name.clone())),
                },
            };
            if let Some(parent) = &entry.parent {
                let parent = names.get(parent).ok_or_else(|| PlanError::UnknownTask(parent.clone()))?;
                spec = spec.under(*parent);
            }
            if let Some(name) = &entry.calendar {
                spec = spec.with_calendar(calendar(name)?);
            }
            spec = spec.with_constraint(entry.constraint);
            if entry.pinned {
                spec = spec.pinned();
            }

            let id = graph.add(spec).map_err(|source| PlanError::Graph {
                task: entry.name.clone(),
                source,
            })?;
            names.insert(entry.name.clone(), id);

            if !entry.allocations.is_empty() {
                let allocations = entry
                    .allocations
                    .iter()
                    .map(|a| build_allocation(id, &entry.name, a, &resources))
                    .collect::<Result<Vec<_>, _>>()?;
                graph.set_allocations(id, allocations).map_err(|source| PlanError::Graph {
                    task: entry.name.clone(),
                    source,
                })?;
            }
        }

        for entry in &file.dependencies {
            let lookup = |name: &String| names.get(name).copied().ok_or_else(|| PlanError::UnknownTask(name.clone()));
            let dependency = Dependency::new(lookup(&entry.source)?, lookup(&entry.destination)?, entry.kind);
            graph.add_dependency(dependency).map_err(|source| PlanError::Graph {
                task: entry.destination.clone(),
                source,
            })?;
        }

        debug!(tasks = graph.len(), resources = resources.len(), "plan loaded");
        Ok(Self { graph, resources })
    }

    pub fn task_name(&self, id: TaskId) -> &str {
        self.graph.task(id).map_or("?", |t| t.name.as_str())
    }

    pub fn resource_name(&self, id: ResourceId) -> &str {
        self.resources.name(id).unwrap_or("?")
    }

    /// Finds a task by name
    pub fn require_task(&self, name: &str) -> Result<TaskId, PlanError> {
        self.graph.find(name).ok_or_else(|| PlanError::UnknownTask(name.to_string()))
    }
}

fn build_calendar(name: &str, entry: &CalendarEntry, config: &EngineConfig) -> Result<WorkCalendar, PlanError> {
    let hours_per_day = entry.hours_per_day.unwrap_or(config.calendar.hours_per_day);
    if !(1..=24).contains(&hours_per_day) {
        return Err(PlanError::InvalidHours {
            calendar: name.to_string(),
            hours: hours_per_day,
        });
    }
    let hours = EffortDuration::hours(hours_per_day);
    let days = entry.working_days.as_ref().unwrap_or(&config.calendar.working_days);
    let mut calendar = WorkCalendar::working_days(hours, days);

    for (date, hours) in &entry.exceptions {
        calendar = calendar.with_exception(*date, *hours);
    }

    let mut availability = AvailabilityTimeline::all_valid();
    for range in &entry.unavailable {
        let invalid = match (range.from, range.until) {
            (Some(from), Some(until)) => AvailabilityTimeline::invalid_between(from, until),
            (Some(from), None) => AvailabilityTimeline::invalid_from(from),
            (None, Some(until)) => AvailabilityTimeline::invalid_until(until),
            (None, None) => return Err(PlanError::InvalidCalendar(name.to_string())),
        };
        availability = availability.and(&invalid);
    }
    calendar = calendar.with_availability(availability);

    if let Some(extra) = entry.overtime {
        calendar = calendar.with_overtime(Overtime::Limited(extra));
    }
    Ok(calendar)
}

fn build_allocation(
    task: TaskId,
    task_name: &str,
    entry: &AllocationEntry,
    resources: &ResourceRegistry,
) -> Result<ResourceAllocation, PlanError> {
    let resolve = |name: &String| resources.find(name).ok_or_else(|| PlanError::UnknownResource(name.clone()));
    match (&entry.resource, &entry.pool) {
        (Some(resource), None) => {
            if entry.resources_per_day.is_zero() {
                return Err(PlanError::ZeroResourcesPerDay {
                    task: task_name.to_string(),
                    resource: resource.clone(),
                });
            }
            Ok(ResourceAllocation::specific(task, resolve(resource)?, entry.resources_per_day))
        }
        (None, Some(pool)) => {
            let pool = pool.iter().map(resolve).collect::<Result<Vec<_>, _>>()?;
            Ok(ResourceAllocation::generic(task, pool, entry.resources_per_day))
        }
        _ => Err(PlanError::InvalidAllocation(task_name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AllocationKind, GraphError};
    use crate::domain::Calendar;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    const SAMPLE: &str = r#"{
        "project_start": "2024-01-08",
        "calendars": {
            "part-time": {
                "hours_per_day": 4,
                "exceptions": { "2024-01-09": "0h" },
                "unavailable": [{ "from": "2024-02-01" }]
            }
        },
        "resources": [{ "name": "ana" }, { "name": "bo", "calendar": "part-time" }],
        "tasks": [
            { "name": "phase", "kind": "container" },
            { "name": "design", "parent": "phase", "start": "2024-01-08", "end": "2024-01-10",
              "allocations": [{ "resource": "ana" }] },
            { "name": "build", "parent": "phase", "start": "2024-01-08", "end": "2024-01-12",
              "allocations": [{ "pool": ["ana", "bo"], "resources_per_day": 1.5 }] },
            { "name": "ship", "kind": "milestone", "start": "2024-01-08" }
        ],
        "dependencies": [
            { "source": "design", "destination": "build" },
            { "source": "phase", "destination": "ship", "type": "end_start" }
        ]
    }"#;

    #[test]
    fn loads_sample_plan() {
        let plan = Plan::from_json_str(SAMPLE, &EngineConfig::default()).unwrap();

        assert_eq!(plan.graph.len(), 4);
        assert_eq!(plan.resources.len(), 2);

        let design = plan.require_task("design").unwrap();
        let build = plan.require_task("build").unwrap();
        let ship = plan.require_task("ship").unwrap();
        let phase = plan.require_task("phase").unwrap();

        // dependencies were enforced on load
        assert_eq!(plan.graph.get(build).unwrap().start(), IntraDayDate::start_of_day(day(10)));
        assert_eq!(plan.graph.get(ship).unwrap().start(), plan.graph.get(phase).unwrap().end());
        assert_eq!(plan.graph.get(design).unwrap().parent(), Some(phase));

        let allocation = &plan.graph.get(build).unwrap().allocations()[0];
        assert!(allocation.is_generic());
        assert_eq!(allocation.intended_resources_per_day(), ResourcesPerDay::from_decimal(1.5).unwrap());
        assert!(matches!(allocation.kind(), AllocationKind::Generic { pool } if pool.len() == 2));
    }

    #[test]
    fn calendars_are_resolved() {
        let plan = Plan::from_json_str(SAMPLE, &EngineConfig::default()).unwrap();
        let bo = plan.resources.find("bo").unwrap();
        let calendar = plan.resources.calendar(bo).unwrap();

        assert_eq!(calendar.hours_on(day(8)), EffortDuration::hours(4));
        assert_eq!(calendar.hours_on(day(9)), EffortDuration::zero());
        assert_eq!(calendar.availability().valid_until(), NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(plan.resource_name(bo), "bo");
    }

    #[test]
    fn unknown_names_are_reported() {
        let config = EngineConfig::default();

        let err = Plan::from_json_str(
            r#"{ "project_start": "2024-01-08",
                 "tasks": [{ "name": "a", "start": "2024-01-08", "end": "2024-01-09",
                             "allocations": [{ "resource": "ghost" }] }] }"#,
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::UnknownResource(name) if name == "ghost"));

        let err = Plan::from_json_str(
            r#"{ "project_start": "2024-01-08",
                 "tasks": [{ "name": "a", "start": "2024-01-08", "end": "2024-01-09" }],
                 "dependencies": [{ "source": "a", "destination": "b" }] }"#,
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::UnknownTask(name) if name == "b"));
    }

    #[test]
    fn rejected_dependencies_surface_graph_errors() {
        let err = Plan::from_json_str(
            r#"{ "project_start": "2024-01-08",
                 "tasks": [
                    { "name": "a", "start": "2024-01-08", "end": "2024-01-09" },
                    { "name": "b", "start": "2024-01-08", "end": "2024-01-09" }
                 ],
                 "dependencies": [
                    { "source": "a", "destination": "b" },
                    { "source": "b", "destination": "a" }
                 ] }"#,
            &EngineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::Graph { source: GraphError::CycleDetected(_, _), .. }));
    }

    #[test]
    fn malformed_entries_rejected() {
        let config = EngineConfig::default();

        let err = Plan::from_json_str(r#"{ "project_start": "2024-01-08", "tasks": [{ "name": "a" }] }"#, &config)
            .unwrap_err();
        assert!(matches!(err, PlanError::MissingDates(_)));

        let err = Plan::from_json_str(
            r#"{ "project_start": "2024-01-08",
                 "resources": [{ "name": "r" }],
                 "tasks": [{ "name": "a", "start": "2024-01-08", "end": "2024-01-09",
                             "allocations": [{ "resource": "r", "pool": ["r"] }] }] }"#,
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::InvalidAllocation(_)));

        let err = Plan::from_json_str(r#"{ "project_start": "not a date" }"#, &config).unwrap_err();
        assert!(matches!(err, PlanError::Parse(_)));

        let err = Plan::from_json_str(
            r#"{ "project_start": "2024-01-08",
                 "resources": [{ "name": "r" }],
                 "tasks": [{ "name": "a", "start": "2024-01-08", "end": "2024-01-09",
                             "allocations": [{ "resource": "r", "resources_per_day": 0 }] }] }"#,
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::ZeroResourcesPerDay { .. }));
    }

    #[test]
    fn calendar_hours_out_of_range_rejected() {
        let config = EngineConfig::default();
        for hours in [0u64, 25, 9_999_999_999_999_999] {
            let json = format!(
                r#"{{ "project_start": "2024-01-08",
                      "calendars": {{ "huge": {{ "hours_per_day": {hours} }} }} }}"#
            );
            let err = Plan::from_json_str(&json, &config).unwrap_err();
            assert!(matches!(err, PlanError::InvalidHours { hours: h, .. } if h == hours));
        }
    }

    #[test]
    fn plan_overrides_scheduling_mode() {
        let plan = Plan::from_json_str(
            r#"{ "project_start": "2024-01-08", "scheduling": { "mode": "backward" } }"#,
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(plan.graph.mode(), SchedulingMode::Backward);
    }
}
