//! # idk-gateway
//!
//! An AI-provider gateway with a per-skill adaptive optimization plane.
//! The gateway accepts OpenAI-shaped inference requests, normalizes them
//! into a canonical wire model, selects an upstream through a strategy
//! engine (single, fallback, loadbalance, conditional), rewrites the
//! payload into the provider's dialect, and normalizes the response or
//! stream on the way back.
//!
//! Skills flagged for optimization run a multi-armed bandit: requests
//! cluster by embedding proximity, Thompson Sampling picks a parameter
//! bundle (an *arm*) per cluster, and pluggable evaluators score each
//! served request to feed rewards back into the arm statistics.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use idk_gateway::config::GatewayConfig;
//! use idk_gateway::server::AppState;
//! use idk_gateway::storage::MemoryStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::load(None)?;
//!     let state = AppState::new(config, Arc::new(MemoryStorage::new()))?;
//!     idk_gateway::server::run(state).await?;
//!     Ok(())
//! }
//! ```
//!
//! Per-request behavior (targets, strategy, hooks, cache, optimization
//! binding) arrives in the `x-idk-config` header or a body-embedded
//! `idk_config` object; see [`core::types::RequestConfig`].

#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod config;
pub mod core;
pub mod server;
pub mod storage;
pub mod utils;

// Re-export main types
pub use config::GatewayConfig;
pub use core::pipeline::{PipelineContext, PipelineOutput, RequestPipeline};
pub use core::types::{CanonicalRequest, RequestConfig};
pub use server::AppState;
pub use storage::{MemoryStorage, StorageConnector};
pub use utils::error::{GatewayError, Result};
