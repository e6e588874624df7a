//! Anime collection backend: durable job scheduling and the file
//! identification pipeline (discover, hash, identify, relocate).

pub mod config;
pub mod db;
pub mod jobs;
pub mod scheduler;
pub mod services;

pub use config::Config;
pub use db::Database;
pub use scheduler::{Scheduler, SchedulerConfig};
