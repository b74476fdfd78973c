use std::process::ExitCode;

use clap::Parser;
use stlfetch::{ChromiumFetcher, config::BatchConfig, registry, run_batch, util::init_tracing};

#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_tracing();
    color_eyre::install()?;

    let config = BatchConfig::parse();

    let entries = match &config.registry {
        Some(path) => registry::load(path).await?,
        None => registry::builtin(),
    };

    let rule = "=".repeat(60);
    println!("{rule}");
    println!("FluidX3D STL Downloader");
    println!("{rule}");
    println!("Output directory: {}", config.output.display());
    println!();

    let fetcher = ChromiumFetcher::new(config.browser.clone());
    let summary = run_batch(&fetcher, &entries, &config.output, config.force).await;
    summary.print_report(&config.output);

    Ok(ExitCode::from(summary.exit_code()))
}
