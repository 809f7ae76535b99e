//! CLI-specific utilities for butterfly-access
//!
//! Progress rendering and output handling for the command-line interface,
//! kept apart from the library.

pub mod output;
pub mod progress;

pub use output::{check_overwrite_permission, resolve_output, OutputDestination, OverwriteBehavior};
pub use progress::ProgressManager;
