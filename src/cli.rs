use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "previewly")]
#[command(author, version, about = "Adaptive HLS preview session server")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the preview server
    Start {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Show the forward window the configured policy picks for a network profile
    Predict {
        /// Available bandwidth in kbps
        #[arg(long, default_value_t = 5000.0)]
        bandwidth: f64,

        /// Round-trip latency in milliseconds
        #[arg(long, default_value_t = 40.0)]
        latency: f64,

        /// Latency jitter in milliseconds
        #[arg(long, default_value_t = 5.0)]
        jitter: f64,

        /// Packet loss in percent
        #[arg(long, default_value_t = 0.0)]
        loss: f64,
    },

    /// Display version information
    Version,
}
