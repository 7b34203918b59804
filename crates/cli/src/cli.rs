use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use visor::OperatorKind;

#[derive(Parser, Debug)]
#[command(name = "visor")]
#[command(about = "Remote sandbox viewer - allocate sandboxes and stream live frames")]
#[command(version)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Base url of the allocation service
    #[arg(long, global = true, value_name = "URL", default_value = "http://127.0.0.1:8787")]
    pub api_url: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Allocate a sandbox and wait until it is granted
    #[command(alias = "alloc")]
    Allocate {
        /// Session identifier the allocation is tied to
        session_id: String,
        /// Operator kind backing the session
        #[arg(short, long, value_enum, default_value = "browser")]
        operator: OperatorArg,
        /// Mark the session as free-tier
        #[arg(long)]
        free: bool,
        /// Treat the session as loaded from history (free sessions will
        /// not reallocate)
        #[arg(long)]
        from_history: bool,
        /// Give up after this many seconds without a grant
        #[arg(long, default_value = "600")]
        timeout_secs: u64,
    },

    /// Release the sandbox held for a resource type
    Release {
        #[arg(short, long, value_enum, default_value = "browser")]
        operator: OperatorArg,
    },

    /// Print remaining time for a resource type (milliseconds)
    Balance {
        #[arg(short, long, value_enum, default_value = "browser")]
        operator: OperatorArg,
    },

    /// Connect to a debugging endpoint and stream screencast frames to disk
    Watch {
        /// WebSocket url of the remote debugging endpoint
        ws_url: String,
        /// Directory to write JPEG frames into
        #[arg(short, long, default_value = "frames")]
        output: PathBuf,
        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<u64>,
        /// Screencast JPEG quality (0-100)
        #[arg(long, default_value = "80")]
        quality: u8,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OperatorArg {
    Compute,
    Browser,
}

impl From<OperatorArg> for OperatorKind {
    fn from(arg: OperatorArg) -> Self {
        match arg {
            OperatorArg::Compute => OperatorKind::Compute,
            OperatorArg::Browser => OperatorKind::Browser,
        }
    }
}
