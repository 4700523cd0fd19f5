use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use epochsync::{EpochPipeline, SessionConfig};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(
    name = "epochsync",
    version,
    about = "Stimulus-locked epoch extraction from a streaming EEG source",
    long_about = "Connects to a TCP signal server sending length-prefixed sample frames,\n\
                  drives the stimulus timer and prints one JSON line per output."
)]
struct Cli {
    /// Session config (JSON); built-in defaults when omitted
    #[arg(short, long, env = "EPOCHSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Signal server host, overrides signal.host
    #[arg(long)]
    host: Option<String>,

    /// Signal server port, overrides signal.port
    #[arg(long)]
    port: Option<u16>,

    /// Stimulus keys, overrides stimulation.stimuli
    #[arg(long, num_args = 1..)]
    stimuli: Option<Vec<u32>>,

    #[arg(long, value_enum, default_value_t = OutputMode::Series)]
    output: OutputMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputMode {
    /// Full accumulated series per completed cycle
    Series,
    /// Ensemble means per completed cycle
    Averages,
    /// Every epoch as it leaves the extractor
    Epochs,
}

fn load_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(host) = &cli.host {
        config.signal.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.signal.port = port;
    }
    if let Some(stimuli) = &cli.stimuli {
        config.stimulation.stimuli = stimuli.clone();
    }
    config.validate()?;
    Ok(config)
}

fn emit(line: serde_json::Value) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .parse_default_env()
        .init();

    let config = load_config(&cli)?;
    let addr = format!("{}:{}", config.signal.host, config.signal.port);
    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("Failed to connect to signal server at {}", addr))?;
    log::info!("connected to {}", addr);

    let mut pipeline = EpochPipeline::new(config)?;
    let mut epochs = pipeline.subscribe_epochs();
    let mut outputs = pipeline.start(stream).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted, shutting down");
                break;
            }
            series = outputs.series.recv() => {
                let Some(series) = series else { break };
                match cli.output {
                    OutputMode::Series => emit(serde_json::to_value(&series)?)?,
                    OutputMode::Averages => emit(json!({
                        "cycle": series.cycle,
                        "depth": series.depth,
                        "averages": series.averaged(),
                    }))?,
                    OutputMode::Epochs => {}
                }
            }
            epoch = epochs.recv(), if cli.output == OutputMode::Epochs => {
                match epoch {
                    Ok(epoch) => emit(json!({
                        "key": epoch.key,
                        "timestamp": epoch.timestamp,
                        "cycle": epoch.cycle,
                        "target": epoch.target,
                        "channels": epoch.channels,
                    }))?,
                    Err(RecvError::Lagged(n)) => log::warn!("output fell behind, {} epochs dropped", n),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    // Nobody reads series any more; let the aggregator finish.
    drop(outputs);
    pipeline.stop().await?;
    eprintln!("{}", pipeline.get_monitor().generate_report());
    Ok(())
}
