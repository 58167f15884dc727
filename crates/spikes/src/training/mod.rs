//! Training pipeline: windowed batches, split bookkeeping, loss, metrics,
//! post-epoch hooks, and the fit loop.

pub mod config;
pub mod data;
pub mod hooks;
pub mod loss;
pub mod metrics;
pub mod splits;
pub mod trainer;
