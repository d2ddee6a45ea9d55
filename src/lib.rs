//! Plan engine - task scheduling for project plans
//!
//! Keeps task dates consistent with their dependencies and position
//! constraints, allocates effort to resources day by day, and computes the
//! critical path of a plan.

pub mod domain;
pub mod storage;
pub mod cli;

pub use domain::{
    CriticalPathCalculator, Dependency, DependencyType, EffortDuration, IntraDayDate, ResourceAllocation,
    ResourcesPerDay, TaskGraph, TaskId,
};
