//! HTTP server
//!
//! Actix application wiring: state, middleware, and the route tree.

pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use server::run;
pub use state::AppState;
