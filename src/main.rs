use anyhow::Context;
use genre_cnn::config::Config;
use genre_cnn::pipeline;
use std::env;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Loading config from {config_path}"))?;

    let summary = pipeline::run(&config).context("Training genre classifier")?;

    for skipped in &summary.extraction.skipped {
        log::debug!("skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    println!(
        "Trained on {} samples, tested on {} ({} files skipped)",
        summary.train_size,
        summary.test_size,
        summary.extraction.skipped.len()
    );
    if let Some(best) = summary.history.best_epoch {
        println!("Best epoch: {best} of {}", summary.history.epochs.len());
    }
    println!("{}", summary.evaluation);
    println!("Model saved to {}", summary.model_path.display());

    Ok(())
}
