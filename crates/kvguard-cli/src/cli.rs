//! Command line arguments

use clap::{Args, Parser, Subcommand};

/// Distributed locks and membership filters over Redis
#[derive(Debug, Parser)]
#[command(name = "kvguard", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Configuration file (default: conf/kvguard.yml when present)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<String>,

    /// Store host, or a redis:// URL
    #[arg(short = 'a', long = "address", global = true, env = "KVGUARD_ADDRESS")]
    pub address: Option<String>,

    #[arg(short = 'p', long = "port", global = true, env = "KVGUARD_PORT")]
    pub port: Option<u16>,

    /// Connect to a single primary instead of a cluster
    #[arg(long = "standalone", global = true)]
    pub standalone: bool,

    /// Use an in-process store (state is lost on exit)
    #[arg(long = "memory", global = true)]
    pub memory: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Distributed lock operations
    #[command(subcommand)]
    Lock(LockCommand),

    /// Membership filter operations
    #[command(subcommand)]
    Filter(FilterCommand),
}

#[derive(Debug, Subcommand)]
pub enum LockCommand {
    /// Acquire a lock, hold it, then release it
    Acquire {
        name: String,

        #[arg(long = "ttl-ms")]
        ttl_ms: Option<u64>,

        /// Upper bound on waiting for replica acknowledgment
        #[arg(long = "wait-ms")]
        wait_ms: Option<u64>,

        /// Keep retrying for this long when the lock is held elsewhere
        #[arg(long = "retry-ms")]
        retry_ms: Option<u64>,

        /// How long to hold the lock before releasing it
        #[arg(long = "hold-ms", default_value_t = 0)]
        hold_ms: u64,
    },

    /// Run a command while holding a lock
    Run {
        name: String,

        #[arg(long = "ttl-ms")]
        ttl_ms: Option<u64>,

        /// Fail instead of skipping the command when the lock is held elsewhere
        #[arg(long = "throw")]
        throw: bool,

        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

#[derive(Debug, Args)]
pub struct FilterArgs {
    pub name: String,

    /// Expected number of insertions
    #[arg(long = "expected", default_value_t = 1_000_000)]
    pub expected: u64,

    /// Target false-positive rate (default: from configuration, 0.03)
    #[arg(long = "error-rate")]
    pub error_rate: Option<f64>,

    /// Expiration applied when the filter is first created
    #[arg(long = "expire-ms")]
    pub expire_ms: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum FilterCommand {
    /// Add elements to a filter
    Add {
        #[command(flatten)]
        filter: FilterArgs,

        #[arg(required = true)]
        elements: Vec<String>,
    },

    /// Test whether elements may have been added
    Test {
        #[command(flatten)]
        filter: FilterArgs,

        #[arg(required = true)]
        elements: Vec<String>,
    },

    /// Print the filter's derived parameters as JSON
    Info {
        #[command(flatten)]
        filter: FilterArgs,
    },
}
