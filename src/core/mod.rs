pub mod config;
pub mod cron;
pub mod jobs;
pub mod lifecycle;
pub mod store;
pub mod terminal;
