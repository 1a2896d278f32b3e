//! Image formats read and written by the bake pipeline.

pub mod hdr;
pub use hdr::{decode_hdr, encode_hdr, load_hdr, write_hdr, HdrImage};
