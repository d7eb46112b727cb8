//! meshctl library surface, split out so the integration tests can drive the
//! command modules without going through `main`.

pub mod client;
pub mod commands;
pub mod output;
