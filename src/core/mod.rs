//! Core data model: units of work and their dependency graph.

pub mod graph;
pub mod unit;
