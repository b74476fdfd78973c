use std::process::ExitCode;

use bytesize::ByteSize;
use clap::Parser;
use stlfetch::{
    ChromiumFetcher, DownloadOutcome, config::SingleConfig, download_stl,
    fetch::remove_existing, util::init_tracing,
};

#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_tracing();
    color_eyre::install()?;

    let config = SingleConfig::parse();

    if config.force {
        remove_existing(&config.output, &config.stl).await?;
    }

    let fetcher = ChromiumFetcher::new(config.browser.clone());
    match download_stl(&fetcher, &config.thing_id, &config.stl, &config.output).await {
        Ok(DownloadOutcome::AlreadyPresent { path, size }) => {
            println!("STL file already exists: {} ({})", path.display(), ByteSize::b(size));
            println!("Use --force to re-download");
            Ok(ExitCode::SUCCESS)
        }
        Ok(DownloadOutcome::Downloaded { path, size }) => {
            println!("Saved {} ({})", path.display(), ByteSize::b(size));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::error!(error = %e, "Download failed");
            eprintln!("Try a manual download from:");
            eprintln!("  {}", stlfetch::ArchiveFetcher::manual_url(&fetcher, &config.thing_id));
            Ok(ExitCode::FAILURE)
        }
    }
}
