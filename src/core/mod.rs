//! Core gateway components
//!
//! Everything between the HTTP surface and the storage connector: the
//! canonical wire model, provider dialects, the parameter transformer,
//! cache, hooks, strategy engine, optimizer, evaluators, the request
//! pipeline, error classification, and observability.

pub mod cache;
pub mod classifier;
pub mod embeddings;
pub mod evaluators;
pub mod hooks;
pub mod observability;
pub mod optimizer;
pub mod pipeline;
pub mod providers;
pub mod strategy;
pub mod transformer;
pub mod types;
