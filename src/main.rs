// src/main.rs - Drive the virtual Marlin device from the command line
use clap::Parser;
use std::path::PathBuf;
use virtual_marlin::config::{self, Config};
use virtual_marlin::{CommandQueue, MarlinExecutor};

/// Virtual Marlin CLI
#[derive(Parser, Debug)]
#[command(name = "virtual-marlin", about = "Send G-code to a simulated Marlin device and report the replies.")]
struct Cli {
    /// Path to a TOML config file (overrides defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// G-code file to send, one command per line
    #[arg(short, long)]
    gcode: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    show_config: bool,

    /// Commands to send after the G-code file
    commands: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = match &cli.config {
        Some(path) => {
            let path = path.to_string_lossy();
            tracing::info!("Loading configuration from: {}", path);
            config::load_config(&path).map_err(|e| {
                tracing::error!("Failed to load config from '{}': {}", path, e);
                Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
            })?
        }
        None => Config::default(),
    };

    if cli.show_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let mut queue = CommandQueue::new(config.host.clone());
    if let Some(path) = &cli.gcode {
        let program = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!("Failed to read G-code file '{}': {}", path.display(), e);
            e
        })?;
        let queued = queue.enqueue_program(&program);
        tracing::info!("Queued {} commands from {}", queued, path.display());
    }
    for command in &cli.commands {
        queue.enqueue(command.as_str());
    }
    if queue.is_empty() {
        tracing::warn!("Nothing to send; pass --gcode or commands");
        return Ok(());
    }

    tracing::info!(
        "Device: {} {} ({})",
        config.device.firmware_name,
        config.device.firmware_version,
        config.device.machine_type
    );
    let mut executor = MarlinExecutor::from_config(config.device.clone());
    let summary = queue.run(&mut executor).await.map_err(|e| {
        tracing::error!("Run failed: {}", e);
        e
    })?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for outcome in &summary.outcomes {
            println!("> {}", outcome.sent);
            for line in outcome.reply.lines() {
                println!("< {}", line);
            }
            if let Some(line) = outcome.resend {
                println!("! device asked to resend line {}", line);
            }
        }
        println!("{} commands processed", summary.commands_processed);
    }
    Ok(())
}
