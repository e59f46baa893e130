//! Shared library for kubectl-flame
//!
//! This crate provides the core functionality for:
//! - Job models and the agent/controller event protocol
//! - Language-specific profiling strategies and their dispatch table
//! - Target process discovery and artifact publication
//! - Line streaming of live log output to an event handler

pub mod error;
pub mod events;
pub mod exec;
pub mod models;
pub mod observability;
pub mod process;
pub mod profiler;
pub mod publish;
pub mod stream;

pub use error::{CommandError, EventParseError, ProfilerError};
pub use events::Event;
pub use models::*;
pub use observability::StructuredLogger;
pub use profiler::{Profiler, ProfilerContext, ProfilerTable, ToolPaths};
pub use stream::{spawn_pipeline, CompletionSignal, EventHandler, LogEvent};
