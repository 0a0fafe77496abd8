//! Process supervisor.
//!
//! One external capture-tool process per job. Output lines stream back as
//! [`ProcessEvent`]s, are scanned for failure signatures by a [`LineMonitor`],
//! and the terminated process is classified by [`outcome::decide`].

pub mod args;
mod active;
mod monitor;
pub mod outcome;
mod process;

pub use active::{ActiveDownload, ActiveTable, Termination, DIAGNOSTICS_CAP};
pub use args::{capture_args, tokenize_flags, validate_extra_flags, validate_link, FlagError, LinkError};
pub use monitor::{LineMonitor, LineSignal};
pub use outcome::{decide, ExitContext, ExitOutcome};
pub use process::{
    LaunchError, LaunchRequest, Launcher, OutputStream, ProcessEvent, ProcessHandle, ToolLauncher,
};
