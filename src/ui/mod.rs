//! Presentation seam.
//!
//! Core logic reports progress and state changes through the [`Reporter`]
//! trait; the trait object is injected into the manager so the pipeline
//! never touches a terminal directly.

pub mod reporter;

pub use reporter::{LogReporter, NullReporter, Reporter};
