pub mod environment;
pub mod hash;
pub mod version;

pub use environment::{EnvRegistry, Environment, OpKind, Stage, Toolchain};
pub use hash::Sha512Digest;
pub use version::EnvVersion;
