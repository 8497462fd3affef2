//! kess: a local environment orchestrator.
//!
//! Brings up the shared platform services a sidecar-based app expects (state
//! store, tracer, placement, ingress sidecar), then runs workloads next to
//! their sidecars. Three backends implement the same [`runtime::Runtime`]
//! contract: Docker containers, plain host processes, and a no-op.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod labels;
pub mod lifecycle;
pub mod manifest;
pub mod naming;
pub mod runtime;
pub mod testing;
