pub mod attempts;
pub mod samples;
