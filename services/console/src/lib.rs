//! LiveMol console library crate
//!
//! Configuration, the viewer tool surface, and the interactive session loop
//! behind the `livemol` binary, which is a thin wrapper around this library.

pub mod config;
pub mod runtime;
pub mod tools;
