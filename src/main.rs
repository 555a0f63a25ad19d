// src/main.rs
use signal_pipeline::config::Config;
use signal_pipeline::domain::errors::{AppError, AppResult};
use signal_pipeline::market_data::JsonLinesSource;
use signal_pipeline::SignalPipeline;
use tokio::io::BufReader;
use tokio::signal::ctrl_c;
use tokio::sync::broadcast::error::RecvError;

/// Target of `--dump-config <path>`, if the flag is present.
fn dump_config_path(args: &[String]) -> AppResult<Option<&str>> {
    match args.iter().position(|arg| arg == "--dump-config") {
        None => Ok(None),
        Some(flag) => args
            .get(flag + 1)
            .filter(|path| !path.starts_with("--"))
            .map(|path| Some(path.as_str()))
            .ok_or_else(|| AppError::Config("--dump-config needs a file path".to_string())),
    }
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load configuration
    let config = Config::from_env()?;

    // `--dump-config <path>` writes the effective configuration and exits
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Some(path) = dump_config_path(&args)? {
        config.validate()?;
        config.to_file(path)?;
        println!("Configuration written to {}", path);
        return Ok(());
    }

    // Initialize logging
    config.init_logging()?;

    log::info!("Starting signal_pipeline v{}", env!("CARGO_PKG_VERSION"));
    log::info!(
        "Evaluating {:?} every {}s, minimum confidence {}%",
        config.scheduler.symbols,
        config.scheduler.eval_interval_secs,
        config.signal.min_confidence
    );

    // Invalid configuration stops us here
    let pipeline = SignalPipeline::new(config)?;

    // Ticks arrive as JSON lines on stdin
    let source = JsonLinesSource::new(BufReader::new(tokio::io::stdin()));
    let mut signals = pipeline.subscribe();
    let running = pipeline.start(source)?;

    let consumer = tokio::spawn(async move {
        loop {
            match signals.recv().await {
                Ok(signal) => match serde_json::to_string(&signal) {
                    Ok(json) => println!("{}", json),
                    Err(e) => log::error!("Failed to serialize signal: {}", AppError::from(e)),
                },
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Signal consumer lagged, {} signals skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Wait for shutdown signal
    log::info!("Pipeline is running. Press Ctrl+C to stop.");
    ctrl_c().await?;

    // Shutdown
    log::info!("Shutting down...");
    running.shutdown().await;
    let calls = pipeline.tracker().overall();
    log::info!(
        "Calls: {} tracked, {} resolved, hit rate {}",
        calls.tracked,
        calls.resolved(),
        calls
            .hit_rate()
            .map(|rate| format!("{:.1}%", rate * 100.0))
            .unwrap_or_else(|| "n/a".to_string())
    );
    drop(pipeline);
    if let Err(e) = consumer.await {
        log::error!("Signal consumer ended abnormally: {}", e);
    }

    log::info!("Shutdown complete. Goodbye!");
    Ok(())
}
