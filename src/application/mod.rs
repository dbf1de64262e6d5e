//! Application layer containing the engine that orchestrates the domain.
//!
//! `AjoEngine` is the single entry point for every state-changing operation.
//! Concurrency is handled with per-key async locks plus optimistic version
//! checks at commit time; `Reconciler` audits the result.

pub mod engine;
pub mod locks;
pub mod reconciler;
pub mod retry;
pub mod views;
