//! Backend execution and artifact post-processing.
//!
//! [`runner::JobRunner`] takes one [`artgen_core::job::JobDescriptor`],
//! settles its output location, runs the backend process and finalizes
//! whatever it produced into a provenance-tagged JPEG.

pub mod device;
pub mod error;
pub mod exif;
pub mod finalize;
pub mod runner;
pub mod subprocess;
