pub mod attempt;
pub mod sample;

pub use attempt::{Attempt, AttemptStats, AttemptStatus};
pub use sample::Sample;
