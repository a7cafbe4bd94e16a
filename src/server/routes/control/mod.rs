//! Control plane: `/v1/reactive-agents/*`
//!
//! Agents, skills, models, provider/evaluator listings, logs, datasets,
//! evaluation runs, and the operator event stream.

pub mod agents;
pub mod datasets;
pub mod evaluations;
pub mod events;
pub mod logs;
pub mod models;
pub mod providers;
pub mod skills;
