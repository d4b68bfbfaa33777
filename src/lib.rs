//! agentwatch - activity monitor and coordination hub for agents working in
//! parallel git worktrees.
//!
//! This library crate exposes internal modules for integration testing.

pub mod agents;
pub mod commands;
pub mod config;
pub mod data;
pub mod error;
pub mod integrations;
pub mod monitor;
pub mod server;
pub mod util;
