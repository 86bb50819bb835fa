use clap::{Args, Parser, Subcommand};

/// DriftWatch — self-learning telemetry drift detection
#[derive(Parser)]
#[command(name = "driftwatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the ingest and detection server
    Serve {
        /// Port to bind (overrides DRIFTWATCH_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Generate synthetic traffic against a running instance
    Simulate(SimulateArgs),
}

#[derive(Args)]
pub struct SimulateArgs {
    /// Base URL of the target DriftWatch instance
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub target: String,

    /// Number of distinct synthetic services
    #[arg(long, default_value = "5")]
    pub services: usize,

    /// Samples per second across all services
    #[arg(long, default_value = "50")]
    pub rps: u32,

    /// How long to run, in seconds
    #[arg(long, default_value = "60")]
    pub duration: u64,

    /// Shift one service's latency upward after this many seconds
    #[arg(long)]
    pub drift_after: Option<u64>,

    /// Added latency for the drifting service (ms)
    #[arg(long, default_value = "400")]
    pub drift_latency: f64,
}
