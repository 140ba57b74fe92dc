//! Shared utilities for the codegraph workspace.

pub mod errors;
