use anyhow::Result;
use clap::Parser;
use epochsync::core::SampleFrame;
use epochsync::nodes::stimulus_source::wall_clock_ms;
use epochsync::nodes::{encode_frame, encode_sample};
use epochsync::{EpochPipeline, SessionConfig};
use rand::Rng;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Runs a full session against an in-process signal generator.
#[derive(Parser)]
#[command(name = "synthetic_session", version)]
struct Args {
    /// Session length in seconds
    #[arg(long, default_value_t = 5)]
    seconds: u64,

    #[arg(long, default_value_t = 4)]
    channels: usize,

    /// Standard deviation of the added noise
    #[arg(long, default_value_t = 0.1)]
    noise: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = SessionConfig::from_json(json!({
        "signal": {
            "epoch_duration_ms": 300,
            "sampling_rate_hz": 250,
            "transforms": ["remove_mean"]
        },
        "stimulation": {
            "signal_duration_ms": 100,
            "pause_duration_ms": 100,
            "stimuli": [1, 2, 3, 4]
        },
        "series": { "step": { "kind": "moving_window", "size": 5 } }
    }))?;
    let rate = config.signal.sampling_rate_hz;

    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let channels = args.channels;
    let noise = args.noise;
    let generator = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_micros(1_000_000 / u64::from(rate)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        let mut n: u64 = 0;
        loop {
            ticker.tick().await;
            let phase = n as f64 / f64::from(rate);
            let values = {
                let mut rng = rand::thread_rng();
                (0..channels)
                    .map(|c| {
                        let freq = 8.0 + c as f64 * 2.0;
                        (2.0 * std::f64::consts::PI * freq * phase).sin()
                            + rng.gen_range(-noise..=noise)
                    })
                    .collect()
            };
            let sample = SampleFrame::new(wall_clock_ms(), values);
            if server.write_all(&encode_frame(&encode_sample(&sample))).await.is_err() {
                break;
            }
            n += 1;
        }
    });

    let mut pipeline = EpochPipeline::new(config)?;
    let mut outputs = pipeline.start(client).await?;

    let deadline = tokio::time::sleep(Duration::from_secs(args.seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            series = outputs.series.recv() => {
                let Some(series) = series else { break };
                let means = series.averaged();
                let peak = means
                    .values()
                    .flat_map(|channels| channels.iter().flatten())
                    .fold(0.0f64, |acc, v| acc.max(v.abs()));
                println!(
                    "cycle {:>3}  depth {:>3}  keys {:?}  peak |mean| {:.3}",
                    series.cycle,
                    series.depth,
                    series.keys().collect::<Vec<_>>(),
                    peak
                );
            }
        }
    }

    drop(outputs);
    pipeline.stop().await?;
    generator.abort();

    println!("\n{}", pipeline.get_monitor().generate_report());
    println!("final state: {}", pipeline.state().name());
    Ok(())
}
