mod connection;
mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use models::{Attempt, AttemptStats, AttemptStatus, Sample};
pub use repositories::attempts::DEFAULT_RECENT_ATTEMPTS;
