//! Library half of the `deep-calcium` binary: TOML layering, subcommand
//! pipelines and prediction reports.

pub mod config;
pub mod pipeline;
pub mod results;
