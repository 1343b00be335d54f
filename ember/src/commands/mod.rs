//! CLI subcommand implementations, one module per `ember` subcommand.

pub mod build;
pub mod cache;
pub mod query;
