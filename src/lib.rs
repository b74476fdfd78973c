//! Fetches STL example geometry for FluidX3D from Thingiverse.
//!
//! Thingiverse serves zip archives behind a JavaScript countdown, so archives
//! are obtained by driving Chromium and the wanted STL is then copied out of
//! the archive into an output directory.

pub mod batch;
pub mod config;
pub mod fetch;
pub mod registry;
pub mod util;

pub use batch::{BatchSummary, run_batch};
pub use fetch::{ArchiveFetcher, ChromiumFetcher, DownloadOutcome, FetchError, download_stl};
pub use registry::{StlEntry, ThingId};
