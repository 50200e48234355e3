//! Command-line interface for sprof
//!
//! This module contains CLI argument parsing and configuration

pub mod args;

pub use args::{Args, Mode};
