//! PE/COFF header validation for decoded Xbox 360 images.
//!
//! Downstream consumers only need a flat byte buffer at a known load base;
//! this crate exists to validate that an extracted image looks like an
//! executable and to report its section layout. Nothing here is a loader.

pub mod image;
pub mod structs;

pub use image::{PeImage, PeWarning};
pub use structs::{CoffHeader, Machine, SectionFlag, SectionHeader};
