//! CLI command handlers, one file per command.

mod cancel;
mod enqueue;
mod inspect;
mod merge;
mod refresh;
mod run;
mod status;

pub use cancel::run_cancel;
pub use enqueue::run_enqueue;
pub use inspect::run_inspect;
pub use merge::run_merge;
pub use refresh::run_refresh;
pub use run::run_daemon;
pub use status::run_status;
