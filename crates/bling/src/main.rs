use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bling_core::{
    listener, ArtNetStrip, BlingConfig, Command, CommandKind, CommandListener, ConfigManager,
    JobSupervisor, PixelDevice, TcpTable,
};
use clap::Parser;
use tokio::task::JoinHandle;

mod dry_run;

use dry_run::LogStrip;

/// Plays LED strip animations requested by the robot over the shared table.
#[derive(Parser, Debug)]
#[command(name = "bling")]
#[command(about = "LED strip animation server")]
struct Args {
    /// Table server address (host:port), overrides the config file
    #[arg(short, long)]
    server: Option<String>,

    /// Number of LEDs on the strip, overrides the config file
    #[arg(short, long)]
    length: Option<usize>,

    /// Path to the JSON config file (created with defaults if missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log frames instead of sending them to the strip
    #[arg(long)]
    dry_run: bool,

    /// Append log output to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(args: &Args) -> Result<(), anyhow::Error> {
    let level = if args.verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    builder.format_timestamp_millis();

    if let Some(path) = &args.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn load_config(args: &Args) -> Result<BlingConfig, anyhow::Error> {
    let mut manager = ConfigManager::new(args.config.clone());
    let mut config = manager
        .load()
        .with_context(|| format!("loading {}", manager.config_path().display()))?;

    if let Some(server) = &args.server {
        config.server = server.clone();
    }
    if let Some(length) = args.length {
        config.led_count = length;
    }

    ConfigManager::validate(&config).map_err(|errors| anyhow::anyhow!(errors.join(", ")))?;
    Ok(config)
}

fn open_strip(args: &Args, config: &BlingConfig) -> Result<Box<dyn PixelDevice>, anyhow::Error> {
    if args.dry_run {
        log::info!("Dry run: frames for {} LEDs are logged only", config.led_count);
        return Ok(Box::new(LogStrip::new(config.led_count)));
    }

    let (bind, destination) = config.output_addrs()?;
    let strip = ArtNetStrip::new(
        bind,
        destination,
        config.led_count,
        config.output.universe,
        config.output.byte_order,
    )
    .context("opening Art-Net output")?;
    log::info!(
        "Sending {} LEDs to {} from universe {}",
        config.led_count,
        destination,
        config.output.universe
    );
    Ok(Box::new(strip))
}

/// Resolves on Ctrl-C, or SIGTERM where the platform has it.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Received Ctrl-C"),
        _ = terminate => log::info!("Received SIGTERM"),
    }
}

/// Stop taking commands, then leave the strip dark. The listener goes first
/// so no command can start a job after the final clear.
async fn stop(listener_task: JoinHandle<()>, supervisor: &JobSupervisor) {
    listener_task.abort();
    let _ = listener_task.await;
    supervisor.shutdown().await;
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    init_logging(&args)?;

    let config = load_config(&args)?;
    log::info!("Table server: {}", config.server);

    let supervisor = Arc::new(JobSupervisor::new(
        open_strip(&args, &config)?,
        config.supervisor_settings(),
    ));

    // Start dark, whatever the strip was showing before
    supervisor
        .submit(Command::new(CommandKind::Clear))
        .await
        .release();

    let (table, events, connection) =
        TcpTable::connect(config.server.clone(), config.reconnect_delay());
    let command_listener = CommandListener::new(
        table,
        supervisor.clone(),
        config.keys.clone(),
        config.defaults.clone(),
    );
    let mut listener_task = listener::spawn(command_listener, events);

    let listener_ended = tokio::select! {
        _ = shutdown_signal() => false,
        _ = &mut listener_task => true,
    };

    if listener_ended {
        log::warn!("Command listener stopped");
        supervisor.shutdown().await;
    } else {
        stop(listener_task, &supervisor).await;
    }
    connection.abort();
    log::info!("bling stopped");
    Ok(())
}
