//! Offline-resilience layer for the invoice web application.
//!
//! Intercepted requests are routed to a network-first or cache-first strategy
//! over a versioned response cache. Mutations that fail while offline are
//! persisted and replayed when connectivity returns.

pub mod cache;
pub mod completion;
pub mod config;
pub mod control;
pub mod error;
pub mod host;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod network;
pub mod notify;
pub mod queue;
pub mod router;
pub mod strategy;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use worker::{Dispatched, Event, Worker};
