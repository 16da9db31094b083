pub mod dmg;
pub mod download;
pub mod unpack;

/// Progress callback: receives a percentage in 0-100. Implementations are
/// expected to be cheap; stages only invoke it when the value changes.
pub type ProgressFn = Box<dyn FnMut(u8) + Send>;
