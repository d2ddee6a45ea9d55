//! Task graph
//!
//! Arena of tasks addressed by [`TaskId`] plus the typed dependency edges
//! between them. Dependencies live in a petgraph `StableDiGraph` so both
//! directions can be walked cheaply and removals never invalidate other
//! node indices.
//!
//! Every edit goes through this type. Edits that move dates finish by running
//! the propagator (see [`super::propagate`]) and return its report.

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use super::allocation::ResourceAllocation;
use super::date::IntraDayDate;
use super::effort::EffortDuration;
use super::id::{ResourceId, TaskId};
use super::propagate::EnforceReport;
use super::resource::AssignedEffortLookup;
use super::task::{Dependency, DependencyType, PositionConstraint, Task, TaskSpec};

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Self-dependency not allowed: {0}")]
    SelfDependency(TaskId),

    #[error("Adding dependency would create a cycle: {0} -> {1}")]
    CycleDetected(TaskId, TaskId),

    #[error("Dependency already exists: {0} -> {1}")]
    DuplicateDependency(TaskId, TaskId),

    #[error("Dependency not found: {0} -> {1}")]
    DependencyNotFound(TaskId, TaskId),

    #[error("Dependency {0} -> {1} cannot be satisfied: {2} is pinned")]
    Unsatisfiable(TaskId, TaskId, TaskId),

    #[error("Not a container: {0}")]
    NotAContainer(TaskId),

    #[error("Not a leaf task: {0}")]
    NotALeaf(TaskId),

    #[error("Dates of container {0} are derived from its children")]
    DerivedDates(TaskId),

    #[error("End {1} precedes the start of {0}")]
    InvalidInterval(TaskId, IntraDayDate),

    #[error("Allocation for {1} cannot be attached to {0}")]
    ForeignAllocation(TaskId, TaskId),
}

/// Direction in which the whole plan is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// Tasks are pushed later by their predecessors
    #[default]
    Forward,
    /// Tasks are pulled earlier by their successors
    Backward,
}

impl SchedulingMode {
    pub fn label(&self) -> &'static str {
        match self {
            SchedulingMode::Forward => "forward",
            SchedulingMode::Backward => "backward",
        }
    }
}

/// Plan-wide scheduling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingSettings {
    pub mode: SchedulingMode,
    /// Dependency bounds win over position constraints when they conflict
    pub dependencies_have_priority: bool,
    /// Nominal working-day length used to move dates by effort
    pub day_length: EffortDuration,
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            mode: SchedulingMode::Forward,
            dependencies_have_priority: true,
            day_length: EffortDuration::hours(8),
        }
    }
}

type BeforeEnforce = Box<dyn FnMut(&[TaskId])>;
type AfterEnforce = Box<dyn FnMut(&EnforceReport)>;

#[derive(Default)]
pub(crate) struct Listeners {
    pub(crate) before: Vec<BeforeEnforce>,
    pub(crate) after: Vec<AfterEnforce>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}

/// Dependency edges expanded with the task hierarchy, as propagation walks them
pub(crate) struct Expanded {
    pub(crate) graph: DiGraph<TaskId, ()>,
}

/// The plan: tasks, hierarchy and dependencies
#[derive(Debug)]
pub struct TaskGraph {
    tasks: Vec<Option<Task>>,
    roots: Vec<TaskId>,
    edges: StableDiGraph<TaskId, DependencyType>,
    node_map: HashMap<TaskId, NodeIndex>,
    settings: SchedulingSettings,
    project_start: IntraDayDate,
    deadline: Option<IntraDayDate>,
    pub(crate) listeners: Listeners,
}

impl TaskGraph {
    /// Creates an empty forward-scheduled plan
    pub fn new(project_start: IntraDayDate) -> Self {
        Self::with_settings(project_start, SchedulingSettings::default())
    }

    pub fn with_settings(project_start: IntraDayDate, settings: SchedulingSettings) -> Self {
        Self {
            tasks: Vec::new(),
            roots: Vec::new(),
            edges: StableDiGraph::new(),
            node_map: HashMap::new(),
            settings,
            project_start,
            deadline: None,
            listeners: Listeners::default(),
        }
    }

    pub fn settings(&self) -> &SchedulingSettings {
        &self.settings
    }

    pub fn mode(&self) -> SchedulingMode {
        self.settings.mode
    }

    pub fn dependencies_have_priority(&self) -> bool {
        self.settings.dependencies_have_priority
    }

    pub fn project_start(&self) -> IntraDayDate {
        self.project_start
    }

    pub fn deadline(&self) -> Option<IntraDayDate> {
        self.deadline
    }

    /// Sets the date ALAP tasks anchor on; callers re-enforce afterwards
    pub fn set_deadline(&mut self, deadline: Option<IntraDayDate>) {
        self.deadline = deadline;
    }

    /// Registers a hook run before every enforce pass with its seed tasks
    pub fn on_before_enforce(&mut self, listener: impl FnMut(&[TaskId]) + 'static) {
        self.listeners.before.push(Box::new(listener));
    }

    /// Registers a hook run after every enforce pass with its report
    pub fn on_after_enforce(&mut self, listener: impl FnMut(&EnforceReport) + 'static) {
        self.listeners.after.push(Box::new(listener));
    }

    // -------------------------------------------------------------------------
    // Tasks
    // -------------------------------------------------------------------------

    /// Adds a task; containers start empty at the project start
    pub fn add(&mut self, spec: TaskSpec) -> Result<TaskId, GraphError> {
        let parent = spec.parent();
        if let Some(parent) = parent {
            if !self.get(parent)?.is_container() {
                return Err(GraphError::NotAContainer(parent));
            }
        }

        let id = TaskId::from_index(self.tasks.len());
        let is_container = spec.is_container();
        let mut task = Task::from_spec(id, spec);
        if is_container {
            task.set_dates(self.project_start, self.project_start);
        }
        debug!(task = %id, name = %task.name, kind = task.kind_label(), "adding task");

        self.tasks.push(Some(task));
        let node = self.edges.add_node(id);
        self.node_map.insert(id, node);

        match parent {
            Some(parent) => {
                if let Some(children) = self.get_mut(parent)?.children_mut() {
                    children.push(id);
                }
                self.refresh_ancestors(id);
            }
            None => self.roots.push(id),
        }
        Ok(id)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get(&self, id: TaskId) -> Result<&Task, GraphError> {
        self.task(id).ok_or(GraphError::TaskNotFound(id))
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Result<&mut Task, GraphError> {
        self.tasks
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(GraphError::TaskNotFound(id))
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.task(id).is_some()
    }

    /// All live tasks in creation order
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter_map(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.tasks().count()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().next().is_none()
    }

    /// Top-level tasks in insertion order
    pub fn roots(&self) -> &[TaskId] {
        &self.roots
    }

    /// Finds a live task by name
    pub fn find(&self, name: &str) -> Option<TaskId> {
        self.tasks().find(|t| t.name == name).map(|t| t.id)
    }

    /// Every task below `id`, depth first
    pub fn descendants(&self, id: TaskId) -> Vec<TaskId> {
        let mut result = Vec::new();
        let mut stack: Vec<TaskId> = self.task(id).map(|t| t.children().to_vec()).unwrap_or_default();
        stack.reverse();
        while let Some(next) = stack.pop() {
            result.push(next);
            if let Some(task) = self.task(next) {
                stack.extend(task.children().iter().rev().copied());
            }
        }
        result
    }

    /// Tasks with their own dates at or below `id`
    pub fn leaves_of(&self, id: TaskId) -> Vec<TaskId> {
        match self.task(id) {
            Some(task) if task.has_own_dates() => vec![id],
            Some(_) => self
                .descendants(id)
                .into_iter()
                .filter(|d| self.task(*d).is_some_and(Task::has_own_dates))
                .collect(),
            None => vec![],
        }
    }

    /// Containers above `id`, nearest first
    pub fn ancestors(&self, id: TaskId) -> Vec<TaskId> {
        let mut result = Vec::new();
        let mut current = self.task(id).and_then(Task::parent);
        while let Some(parent) = current {
            result.push(parent);
            current = self.task(parent).and_then(Task::parent);
        }
        result
    }

    pub fn is_ancestor(&self, ancestor: TaskId, of: TaskId) -> bool {
        self.ancestors(of).contains(&ancestor)
    }

    /// Length of a task in nominal working seconds
    pub(crate) fn length_of(&self, task: &Task) -> i64 {
        let day = self.settings.day_length;
        task.end().to_position(day) - task.start().to_position(day)
    }

    /// Removes a task with its subtree, dependencies and allocations
    pub fn remove_task(&mut self, id: TaskId) -> Result<EnforceReport, GraphError> {
        let parent = self.get(id)?.parent();

        let mut removed = vec![id];
        removed.extend(self.descendants(id));

        let direction = self.propagation_direction();
        let mut seeds: Vec<TaskId> = Vec::new();
        for task in &removed {
            if let Some(node) = self.node_map.get(task) {
                for neighbour in self.edges.neighbors_directed(*node, direction) {
                    let other = self.edges[neighbour];
                    if !removed.contains(&other) && !seeds.contains(&other) {
                        seeds.push(other);
                    }
                }
            }
        }

        match parent {
            Some(parent) => {
                if let Some(children) = self.get_mut(parent)?.children_mut() {
                    children.retain(|c| *c != id);
                }
                seeds.push(parent);
            }
            None => self.roots.retain(|r| *r != id),
        }

        for task in &removed {
            if let Some(node) = self.node_map.remove(task) {
                self.edges.remove_node(node);
            }
            if let Some(slot) = self.tasks.get_mut(task.index()) {
                *slot = None;
            }
        }
        debug!(task = %id, removed = removed.len(), "removed task subtree");

        self.enforce_from(seeds)
    }

    /// Moves a task keeping its length, recording the move as a position constraint
    pub fn move_task(&mut self, id: TaskId, start: IntraDayDate) -> Result<EnforceReport, GraphError> {
        let mode = self.settings.mode;
        let day = self.settings.day_length;
        let task = self.get(id)?;
        if task.is_container() {
            return Err(GraphError::DerivedDates(id));
        }
        let length = self.length_of(task);
        let end = IntraDayDate::from_position(start.to_position(day) + length, day);

        let task = self.get_mut(id)?;
        task.constraint = task.constraint.explicitly_moved_to(start, end, mode);
        task.set_dates(start, end);
        debug!(task = %id, %start, %end, "moved task");

        self.enforce_from(vec![id])
    }

    /// Changes the end of a task, keeping its start
    pub fn resize_task(&mut self, id: TaskId, end: IntraDayDate) -> Result<EnforceReport, GraphError> {
        let task = self.get_mut(id)?;
        if task.is_container() {
            return Err(GraphError::DerivedDates(id));
        }
        if end < task.start() {
            return Err(GraphError::InvalidInterval(id, end));
        }
        let start = task.start();
        task.set_dates(start, end);

        self.enforce_from(vec![id])
    }

    pub fn set_constraint(&mut self, id: TaskId, constraint: PositionConstraint) -> Result<EnforceReport, GraphError> {
        self.get_mut(id)?.constraint = constraint;
        self.enforce_from(vec![id])
    }

    pub fn set_pinned(&mut self, id: TaskId, pinned: bool) -> Result<(), GraphError> {
        self.get_mut(id)?.pinned = pinned;
        Ok(())
    }

    /// Replaces the allocations of a leaf task
    pub fn set_allocations(&mut self, id: TaskId, allocations: Vec<ResourceAllocation>) -> Result<(), GraphError> {
        if let Some(foreign) = allocations.iter().find(|a| a.task() != id) {
            return Err(GraphError::ForeignAllocation(id, foreign.task()));
        }
        let slot = self.get_mut(id)?.allocations_mut().ok_or(GraphError::NotALeaf(id))?;
        *slot = allocations;
        Ok(())
    }

    pub(crate) fn take_allocations(&mut self, id: TaskId) -> Result<Vec<ResourceAllocation>, GraphError> {
        let slot = self.get_mut(id)?.allocations_mut().ok_or(GraphError::NotALeaf(id))?;
        Ok(std::mem::take(slot))
    }

    /// Recomputes container bounds from `id` upwards; returns the containers that changed
    pub(crate) fn refresh_ancestors(&mut self, id: TaskId) -> Vec<TaskId> {
        let mut changed = Vec::new();
        for ancestor in self.ancestors(id) {
            if self.refresh_container(ancestor) {
                changed.push(ancestor);
            }
        }
        changed
    }

    /// Sets a container to the min start / max end of its children
    pub(crate) fn refresh_container(&mut self, id: TaskId) -> bool {
        let Some(task) = self.task(id) else {
            return false;
        };
        let bounds = task
            .children()
            .iter()
            .filter_map(|c| self.task(*c))
            .fold(None, |acc: Option<(IntraDayDate, IntraDayDate)>, child| match acc {
                None => Some((child.start(), child.end())),
                Some((start, end)) => Some((start.min(child.start()), end.max(child.end()))),
            });
        // an empty container collapses onto the project start, as when it was added
        let (start, end) = bounds.unwrap_or((self.project_start, self.project_start));

        match self.tasks.get_mut(id.index()).and_then(Option::as_mut) {
            Some(task) if (task.start(), task.end()) != (start, end) => {
                task.set_dates(start, end);
                true
            }
            _ => false,
        }
    }

    // -------------------------------------------------------------------------
    // Dependencies
    // -------------------------------------------------------------------------

    /// Dependencies ending at `id`
    pub fn dependencies_into(&self, id: TaskId) -> Vec<Dependency> {
        self.edges_of(id, Direction::Incoming)
    }

    /// Dependencies starting at `id`
    pub fn dependencies_from(&self, id: TaskId) -> Vec<Dependency> {
        self.edges_of(id, Direction::Outgoing)
    }

    fn edges_of(&self, id: TaskId, direction: Direction) -> Vec<Dependency> {
        let Some(node) = self.node_map.get(&id) else {
            return vec![];
        };
        let mut deps: Vec<Dependency> = self
            .edges
            .edges_directed(*node, direction)
            .map(|edge| Dependency::new(self.edges[edge.source()], self.edges[edge.target()], *edge.weight()))
            .collect();
        deps.sort_by_key(|d| (d.source, d.destination));
        deps
    }

    /// All dependencies, ordered by source then destination
    pub fn dependencies(&self) -> Vec<Dependency> {
        let mut deps: Vec<Dependency> = self
            .edges
            .edge_indices()
            .filter_map(|edge| {
                let (source, target) = self.edges.edge_endpoints(edge)?;
                Some(Dependency::new(self.edges[source], self.edges[target], self.edges[edge]))
            })
            .collect();
        deps.sort_by_key(|d| (d.source, d.destination));
        deps
    }

    pub fn has_dependency(&self, source: TaskId, destination: TaskId) -> bool {
        match (self.node_map.get(&source), self.node_map.get(&destination)) {
            (Some(s), Some(d)) => self.edges.find_edge(*s, *d).is_some(),
            _ => false,
        }
    }

    pub fn can_add_dependency(&self, dependency: &Dependency) -> bool {
        self.check_dependency(dependency).is_ok()
    }

    /// Explains why a dependency could not be added, without mutating anything
    pub fn check_dependency(&self, dependency: &Dependency) -> Result<(), GraphError> {
        let Dependency {
            source,
            destination,
            kind,
        } = *dependency;

        if source == destination {
            return Err(GraphError::SelfDependency(source));
        }
        self.get(source)?;
        self.get(destination)?;

        if self.has_dependency(source, destination) {
            return Err(GraphError::DuplicateDependency(source, destination));
        }
        if self.is_ancestor(source, destination) || self.is_ancestor(destination, source) {
            return Err(GraphError::CycleDetected(source, destination));
        }
        for mode in [SchedulingMode::Forward, SchedulingMode::Backward] {
            if is_cyclic_directed(&self.expanded(mode, Some(dependency)).graph) {
                return Err(GraphError::CycleDetected(source, destination));
            }
        }

        if let Some(pinned) = self.pinned_violation(source, destination, kind)? {
            return Err(GraphError::Unsatisfiable(source, destination, pinned));
        }
        Ok(())
    }

    /// A pinned task that would have to move for the new edge to hold
    fn pinned_violation(&self, source: TaskId, destination: TaskId, kind: DependencyType) -> Result<Option<TaskId>, GraphError> {
        let day = self.settings.day_length;
        match self.settings.mode {
            SchedulingMode::Forward => {
                let src = self.get(source)?;
                let (s_start, s_end) = (src.start().to_position(day), src.end().to_position(day));
                for leaf in self.leaves_of(destination) {
                    let task = self.get(leaf)?;
                    if !task.pinned {
                        continue;
                    }
                    let bound = start_bound_from_source(kind, s_start, s_end, self.length_of(task));
                    if task.start().to_position(day) < bound {
                        return Ok(Some(leaf));
                    }
                }
            }
            SchedulingMode::Backward => {
                let dst = self.get(destination)?;
                let (d_start, d_end) = (dst.start().to_position(day), dst.end().to_position(day));
                for leaf in self.leaves_of(source) {
                    let task = self.get(leaf)?;
                    if !task.pinned {
                        continue;
                    }
                    let bound = end_bound_from_destination(kind, d_start, d_end, self.length_of(task));
                    if task.end().to_position(day) > bound {
                        return Ok(Some(leaf));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Adds a dependency and propagates it, or leaves the graph untouched
    pub fn add_dependency(&mut self, dependency: Dependency) -> Result<EnforceReport, GraphError> {
        self.check_dependency(&dependency)?;

        let node = |id: TaskId| self.node_map.get(&id).copied().ok_or(GraphError::TaskNotFound(id));
        let (s, d) = (node(dependency.source)?, node(dependency.destination)?);
        self.edges.add_edge(s, d, dependency.kind);
        debug!(
            source = %dependency.source,
            destination = %dependency.destination,
            kind = dependency.kind.label(),
            "added dependency"
        );

        self.enforce_from(vec![self.constrained_end(&dependency)])
    }

    /// Removes a dependency and lets the constrained task settle
    pub fn remove_dependency(&mut self, source: TaskId, destination: TaskId) -> Result<EnforceReport, GraphError> {
        let edge = match (self.node_map.get(&source), self.node_map.get(&destination)) {
            (Some(s), Some(d)) => self.edges.find_edge(*s, *d),
            _ => None,
        }
        .ok_or(GraphError::DependencyNotFound(source, destination))?;

        let kind = self.edges[edge];
        self.edges.remove_edge(edge);
        debug!(%source, %destination, "removed dependency");

        self.enforce_from(vec![self.constrained_end(&Dependency::new(source, destination, kind))])
    }

    /// The side of a dependency that moves under the current mode
    fn constrained_end(&self, dependency: &Dependency) -> TaskId {
        match self.settings.mode {
            SchedulingMode::Forward => dependency.destination,
            SchedulingMode::Backward => dependency.source,
        }
    }

    /// Edge direction that leads from a task to the tasks it constrains
    fn propagation_direction(&self) -> Direction {
        match self.settings.mode {
            SchedulingMode::Forward => Direction::Outgoing,
            SchedulingMode::Backward => Direction::Incoming,
        }
    }

    /// Propagation DAG: dependency edges oriented by `mode`, fanned out to the
    /// descendants of the constrained side, plus child -> container edges.
    pub(crate) fn expanded(&self, mode: SchedulingMode, extra: Option<&Dependency>) -> Expanded {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for task in self.tasks() {
            index.insert(task.id, graph.add_node(task.id));
        }

        for task in self.tasks() {
            if let Some((&child, &parent)) = task.parent().and_then(|p| index.get(&task.id).zip(index.get(&p))) {
                graph.add_edge(child, parent, ());
            }
        }

        let mut deps = self.dependencies();
        deps.extend(extra.copied());
        for dep in deps {
            let (from, to) = match mode {
                SchedulingMode::Forward => (dep.source, dep.destination),
                SchedulingMode::Backward => (dep.destination, dep.source),
            };
            let (Some(&from_node), Some(&to_node)) = (index.get(&from), index.get(&to)) else {
                continue;
            };
            graph.add_edge(from_node, to_node, ());
            for descendant in self.descendants(to) {
                if let Some(&node) = index.get(&descendant) {
                    graph.add_edge(from_node, node, ());
                }
            }
        }

        Expanded { graph }
    }
}

/// Lower bound on a destination start imposed by a source, in positions
pub(crate) fn start_bound_from_source(kind: DependencyType, s_start: i64, s_end: i64, length: i64) -> i64 {
    match kind {
        DependencyType::EndStart => s_end,
        DependencyType::StartStart => s_start,
        DependencyType::EndEnd => s_end - length,
        DependencyType::StartEnd => s_start - length,
    }
}

/// Upper bound on a source end imposed by a destination, in positions
pub(crate) fn end_bound_from_destination(kind: DependencyType, d_start: i64, d_end: i64, length: i64) -> i64 {
    match kind {
        DependencyType::EndStart => d_start,
        DependencyType::StartStart => d_start + length,
        DependencyType::EndEnd => d_end,
        DependencyType::StartEnd => d_end + length,
    }
}

impl AssignedEffortLookup for TaskGraph {
    fn assigned_effort(&self, resource: ResourceId, day: chrono::NaiveDate, excluding: TaskId) -> EffortDuration {
        self.tasks()
            .filter(|t| t.id != excluding)
            .flat_map(|t| t.allocations())
            .map(|a| a.assigned_to(resource, day))
            .sum()
    }
}
