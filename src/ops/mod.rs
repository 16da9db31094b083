//! Operations: the install/update/remove pipelines and their supporting
//! pieces (error type, cancellation, conflict detection, safe removal,
//! repository sync).

pub mod cancel;
pub mod conflict;
pub mod error;
pub mod install;
pub mod remove;
pub mod sync;

pub use cancel::{CancelRegistry, CancelToken};
pub use error::EnvError;
pub use install::{EnvConfig, EnvManager};
