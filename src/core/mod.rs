//! Core pipeline modules
//!
//! Shared GPU plumbing (resources, state tracking, pipelines, readback) plus
//! the IBL bake stages and the per-frame temporal passes built on it.

// Plumbing
pub mod barriers;
pub mod pipelines;
pub mod readback;
pub mod resources;
pub mod temporal;

// Environment preprocessing
pub mod brdf_lut;
pub mod cubemap;
pub mod environment;
pub mod envmap;
pub mod ibl_cache;
pub mod irradiance;
pub mod mipmap;
pub mod prefilter;
pub mod sh;

// Per-frame passes
pub mod camera;
pub mod hiz;
pub mod jitter;
pub mod sharpen;
pub mod taa;
