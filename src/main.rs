mod cli;

use previewly::{config, server, session};
use previewly_av::ToolRegistry;
use previewly_stream::{NetworkMetrics, PredictorHandle, WindowSizingPolicy};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags take precedence over the config file
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting Previewly server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );
    tracing::info!(
        "Sizing: {:?}, segment duration {}s, max {} sessions",
        config.buffer.sizing,
        config.buffer.segment_duration_secs,
        config.session.max_concurrent
    );

    server::start_server(config).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "previewly=trace,previewly_av=trace,previewly_stream=trace,tower_http=debug".to_string()
        } else {
            "previewly=debug,previewly_av=debug,previewly_stream=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Predict {
            bandwidth,
            latency,
            jitter,
            loss,
        } => predict(
            cli.config.as_deref(),
            NetworkMetrics::new(bandwidth, latency, jitter, loss),
        ),
        Commands::Version => {
            println!("previewly {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    println!("Checking external tools...\n");

    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("ffmpeg is missing. Install it or set tools.ffmpeg_path to serve previews.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("✓ Configuration is valid");
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  HLS directory: {}", config.server.hls_dir.display());
    println!(
        "  Segments: {}s, backward {}, forward {} (cap {})",
        config.buffer.segment_duration_secs,
        config.buffer.backward_segments(),
        config.buffer.forward_segments(),
        config.buffer.forward_cap
    );
    println!("  Sizing: {:?}", config.buffer.sizing);
    println!(
        "  Sessions: max {}, timeout {}s",
        config.session.max_concurrent, config.session.timeout_secs
    );
    if let Some(ref model) = config.predictor.model_path {
        println!("  Predictor model: {}", model.display());
    }

    Ok(())
}

fn predict(config_path: Option<&Path>, metrics: NetworkMetrics) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    // The predictor is reported even when sizing is static.
    let handle = Arc::new(PredictorHandle::load(config.predictor.model_path.as_deref()));
    let adaptive = WindowSizingPolicy::adaptive(Arc::clone(&handle), config.buffer.forward_cap);
    let configured = session::sizing_policy(&config);

    println!("Predictor: {}", handle.get().name());
    println!(
        "Network: {} kbps, {} ms latency, {} ms jitter, {}% loss",
        metrics.bandwidth_kbps, metrics.latency_ms, metrics.jitter_ms, metrics.packet_loss_pct
    );
    println!("Adaptive forward window: {}", adaptive.evaluate(&metrics));
    println!(
        "Configured ({:?}) forward window: {}",
        config.buffer.sizing,
        configured.evaluate(&metrics)
    );

    Ok(())
}
