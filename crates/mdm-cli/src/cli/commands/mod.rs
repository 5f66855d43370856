//! CLI command handlers, one file per command.

mod add;
mod clear;
mod probe;
mod remove;
mod retry;
mod run;
mod status;

pub use add::{run_add, AddArgs};
pub use clear::run_clear;
pub use probe::run_probe;
pub use remove::run_remove;
pub use retry::run_retry;
pub use run::run_queue;
pub use status::run_status;
