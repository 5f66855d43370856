pub mod config;
pub mod logging;

pub mod diagnose;
pub mod dispatcher;
pub mod executor;
pub mod manager;
pub mod options;
pub mod output_parser;
pub mod probe;
pub mod progress;
pub mod strategy;
pub mod task_queue;
