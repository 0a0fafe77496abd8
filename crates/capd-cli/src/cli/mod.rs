//! CLI for the capd capture daemon.

mod commands;
mod control_socket;

use anyhow::Result;
use capd_core::config;
use capd_core::dispatch::FeedItem;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{
    run_cancel, run_daemon, run_enqueue, run_inspect, run_merge, run_refresh, run_status,
};

/// Top-level CLI for the capd capture daemon.
#[derive(Debug, Parser)]
#[command(name = "capd")]
#[command(about = "capd: unattended live-capture daemon", long_about = None)]
pub struct Cli {
    /// Config file to use instead of ~/.config/capd/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the daemon: feed scans, retry sweeps, watchdog and control socket.
    Run,

    /// Show the retry queue, in-flight downloads and recent history.
    Status {
        /// Number of history entries to show.
        #[arg(long, default_value = "10", value_name = "N")]
        history: usize,
    },

    /// Run one candidate through the dispatcher and persist it.
    Enqueue {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        video: String,
        #[arg(long)]
        title: String,
        /// Watch URL passed to the capture tool.
        #[arg(long)]
        link: String,
        /// Channel handle; names the channel folder.
        #[arg(long)]
        username: Option<String>,
        /// Upload time (RFC 3339), used for the folder date prefix.
        #[arg(long, value_name = "RFC3339")]
        uploaded: Option<DateTime<Utc>>,
    },

    /// Cancel a running download by id. Its title is excluded from future scans.
    Cancel {
        /// Download id as shown by `capd status`.
        id: String,
    },

    /// Ask the running daemon to scan now.
    Refresh,

    /// Merge leftover audio/video fragments in one folder or the whole download tree.
    Merge {
        /// Folder to merge; defaults to every folder under download_dir.
        dir: Option<PathBuf>,
    },

    /// Print the classification of a working directory.
    Inspect {
        dir: PathBuf,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = match &cli.config {
            Some(path) => config::load_from_path(path)?,
            None => config::load_or_init()?,
        };
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Run => run_daemon(cfg).await?,
            CliCommand::Status { history } => run_status(&cfg, history)?,
            CliCommand::Enqueue {
                channel,
                video,
                title,
                link,
                username,
                uploaded,
            } => {
                let item = FeedItem {
                    channel_id: channel,
                    video_id: video,
                    title,
                    link,
                    uploaded,
                    channel_name: username.clone(),
                    username,
                };
                run_enqueue(&cfg, item).await?;
            }
            CliCommand::Cancel { id } => run_cancel(&id).await?,
            CliCommand::Refresh => run_refresh().await?,
            CliCommand::Merge { dir } => run_merge(&cfg, dir).await?,
            CliCommand::Inspect { dir } => run_inspect(&cfg, &dir)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
