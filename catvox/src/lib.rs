//! catvox: command-line and HTTP front end for catvox-core.

pub mod classify;
pub mod cli;
pub mod config;
pub mod serve;
pub mod server;
