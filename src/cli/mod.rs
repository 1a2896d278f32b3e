//! Command-line front ends.

pub mod bake;

pub use bake::{run_bake, BakeArgs, BakeCliError, USAGE};
