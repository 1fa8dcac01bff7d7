//! One pipeline pass from the command line; prints the finished run record as JSON.
//!
//! Usage: `run_once <query> [hybrid|transformers|llm]`

use anyhow::{anyhow, Context};
use product_sentiment_analyzer::analyze::AnalysisMode;
use product_sentiment_analyzer::AppServices;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let query = args
        .next()
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| anyhow!("usage: run_once <query> [hybrid|transformers|llm]"))?;
    let mode: AnalysisMode = match args.next() {
        Some(m) => m.parse().map_err(|e: String| anyhow!(e))?,
        None => AnalysisMode::default(),
    };

    let services = AppServices::from_env().context("building services")?;
    let record = services.pipeline.run(query.trim(), mode).await;

    println!(
        "{}",
        serde_json::to_string_pretty(&record).context("encoding run record")?
    );
    Ok(())
}
