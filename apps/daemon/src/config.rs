use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use pharmapos_core::remote::TenantCollection;
use pharmapos_core::sync::{SyncPolicy, DEFAULT_BACKOFF_BASE_SECS, DEFAULT_QUEUE_WARN_THRESHOLD};

pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 15;

#[derive(Parser, Debug)]
#[command(name = "pharmaposd", version, about = "Pharmacy POS offline sync daemon")]
pub struct Cli {
    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory holding the local database
    #[arg(long, env = "PHARMAPOS_DATA_DIR", default_value = "./pharmapos-data", global = true)]
    pub data_dir: String,

    /// Base URL of the document API
    #[arg(
        long,
        env = "PHARMAPOS_API_URL",
        default_value = "http://127.0.0.1:8787",
        global = true
    )]
    pub api_url: String,

    /// Bearer token sent with every API request
    #[arg(long, env = "PHARMAPOS_API_TOKEN", hide_env_values = true, global = true)]
    pub api_token: Option<String>,

    /// Pharmacy the terminal belongs to
    #[arg(long = "tenant", env = "PHARMAPOS_TENANT_ID", global = true)]
    pub tenant_id: Option<String>,

    /// First retry delay after a failed replay; doubles per failure
    #[arg(long, default_value_t = DEFAULT_BACKOFF_BASE_SECS, global = true)]
    pub backoff_base_secs: u64,

    /// Pending operation count that raises the queue pressure flag (0 disables it)
    #[arg(long, default_value_t = DEFAULT_QUEUE_WARN_THRESHOLD, global = true)]
    pub queue_warn_threshold: usize,

    /// Start with the network reported as down
    #[arg(long, global = true)]
    pub offline: bool,

    /// Seconds between reachability checks of the API while running (0 disables them)
    #[arg(
        long,
        env = "PHARMAPOS_PROBE_INTERVAL_SECS",
        default_value_t = DEFAULT_PROBE_INTERVAL_SECS,
        global = true
    )]
    pub probe_interval_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Drain the outbox in the background until interrupted
    Run,
    /// Drain the outbox once and print the report
    Sync,
    /// Print the sync status as JSON
    Status,
    /// Write every local record to a JSON file
    Export { file: PathBuf },
    /// Replace every local record with the contents of a JSON file
    Import { file: PathBuf },
    /// Pull every tenant collection into the local store
    Reconcile,
    /// Store a document locally and mirror it to the tenant collection
    Put {
        /// Collection name, e.g. `inventory` or `purchaseOrders`
        collection: String,
        id: String,
        /// Document body as JSON
        json: String,
    },
}

impl Cli {
    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy::default()
            .with_backoff_base(Duration::from_secs(self.backoff_base_secs.max(1)))
            .with_queue_warn_threshold(self.queue_warn_threshold)
    }

    pub fn probe_interval(&self) -> Option<Duration> {
        (self.probe_interval_secs > 0).then(|| Duration::from_secs(self.probe_interval_secs))
    }

    pub fn require_tenant(&self) -> anyhow::Result<&str> {
        self.tenant_id
            .as_deref()
            .map(str::trim)
            .filter(|tenant| !tenant.is_empty())
            .ok_or_else(|| anyhow::anyhow!("No tenant configured (set --tenant or PHARMAPOS_TENANT_ID)"))
    }
}

pub fn parse_collection(name: &str) -> anyhow::Result<TenantCollection> {
    TenantCollection::parse(name).ok_or_else(|| {
        let known: Vec<&str> = TenantCollection::ALL.iter().map(|c| c.as_str()).collect();
        anyhow::anyhow!(
            "Unknown collection '{}' (expected one of: {})",
            name,
            known.join(", ")
        )
    })
}
