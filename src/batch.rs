//! Batch driver: fetches every registered STL file, one at a time.
//!
//! A failed item never stops the batch; it is counted and reported with a link
//! for downloading it by hand.

use std::path::Path;

use bytesize::ByteSize;
use tracing::{error, info};

use crate::{
    fetch::{ArchiveFetcher, DownloadOutcome, download_stl, remove_existing, satisfied_size},
    registry::StlEntry,
};

/// A registered file that could not be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub entry: StlEntry,
    pub error: String,
    pub manual_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<FailedItem>,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Process exit code: 1 if anything failed
    pub fn exit_code(&self) -> u8 {
        if self.is_success() { 0 } else { 1 }
    }

    /// Prints the end-of-run report to stdout.
    pub fn print_report(&self, output_dir: &Path) {
        let rule = "=".repeat(60);
        println!("{rule}");
        println!("Download Summary");
        println!("{rule}");
        println!("Total:      {}", self.total);
        println!("Downloaded: {}", self.downloaded);
        println!("Skipped:    {}", self.skipped);
        println!("Failed:     {}", self.failed);
        println!("{rule}");
        println!();

        if self.is_success() {
            println!("All STL files ready!");
            println!("Location: {}", output_dir.display());
            return;
        }

        println!("Some downloads failed. Please download them manually:");
        for failure in &self.failures {
            println!("  {} -> {}", failure.entry.file_name, failure.manual_url);
        }
        println!("and place them in: {}", output_dir.display());
    }
}

enum ItemResult {
    Downloaded,
    Skipped,
    Failed(FailedItem),
}

/// Fetches every entry into `output_dir` in order.
///
/// Files already present are skipped unless `force` is set, in which case they
/// are deleted and fetched again.
pub async fn run_batch<F: ArchiveFetcher>(
    fetcher: &F,
    entries: &[StlEntry],
    output_dir: &Path,
    force: bool,
) -> BatchSummary {
    let total = entries.len();
    let mut summary = BatchSummary {
        total,
        ..Default::default()
    };

    info!(total, output_dir = ?output_dir, force, "Starting batch download");
    println!("Found {total} STL files to download");
    println!();

    for (idx, entry) in entries.iter().enumerate() {
        println!("[{}/{}] {}", idx + 1, total, entry.file_name);
        match &entry.label {
            Some(label) => println!("          Thing ID: {} ({label})", entry.thing_id),
            None => println!("          Thing ID: {}", entry.thing_id),
        }

        match process_entry(fetcher, entry, output_dir, force).await {
            ItemResult::Downloaded => summary.downloaded += 1,
            ItemResult::Skipped => summary.skipped += 1,
            ItemResult::Failed(item) => {
                summary.failed += 1;
                summary.failures.push(item);
            }
        }
        println!();
    }

    info!(
        downloaded = summary.downloaded,
        skipped = summary.skipped,
        failed = summary.failed,
        "Batch finished"
    );
    summary
}

async fn process_entry<F: ArchiveFetcher>(
    fetcher: &F,
    entry: &StlEntry,
    output_dir: &Path,
    force: bool,
) -> ItemResult {
    let path = output_dir.join(&entry.file_name);

    if !force {
        if let Some(size) = satisfied_size(&path).await {
            println!("          Status: Already exists ({})", ByteSize::b(size));
            return ItemResult::Skipped;
        }
    }

    println!("          Status: Downloading...");

    let result = match remove_forced(force, output_dir, &entry.file_name).await {
        Ok(()) => download_stl(fetcher, &entry.thing_id, &entry.file_name, output_dir).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(DownloadOutcome::Downloaded { size, .. }) => {
            println!("          Status: Downloaded ({})", ByteSize::b(size));
            ItemResult::Downloaded
        }
        Ok(DownloadOutcome::AlreadyPresent { size, .. }) => {
            println!("          Status: Already exists ({})", ByteSize::b(size));
            ItemResult::Skipped
        }
        Err(e) => {
            let manual_url = fetcher.manual_url(&entry.thing_id);
            error!(
                thing = %entry.thing_id,
                stl = %entry.file_name,
                error = %e,
                "Download failed"
            );
            println!("          Status: FAILED");
            println!("          Manual download: {manual_url}");
            ItemResult::Failed(FailedItem {
                entry: entry.clone(),
                error: e.to_string(),
                manual_url,
            })
        }
    }
}

async fn remove_forced(
    force: bool,
    output_dir: &Path,
    file_name: &str,
) -> crate::fetch::Result<()> {
    if force {
        remove_existing(output_dir, file_name).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::{FakeFetcher, stl_bytes};
    use crate::registry::ThingId;

    fn entry(id: &str, name: &str) -> StlEntry {
        StlEntry::new(id.parse::<ThingId>().unwrap(), name)
    }

    fn assert_counts_add_up(summary: &BatchSummary) {
        assert_eq!(
            summary.downloaded + summary.skipped + summary.failed,
            summary.total
        );
    }

    #[tokio::test]
    async fn test_single_cow_download() {
        let out = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::serving(vec![("Cow/files/Cow_t.stl", stl_bytes(5000))]);
        let entries = vec![entry("182114", "Cow_t.stl")];

        let summary = run_batch(&fetcher, &entries, out.path(), false).await;

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(summary.total, 1);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.exit_code(), 0);
        assert!(out.path().join("Cow_t.stl").is_file());
        assert_counts_add_up(&summary);
    }

    #[tokio::test]
    async fn test_existing_files_are_skipped() {
        let out = tempfile::tempdir().unwrap();
        tokio::fs::write(out.path().join("Cow_t.stl"), stl_bytes(4096))
            .await
            .unwrap();

        let fetcher = FakeFetcher::failing();
        let entries = vec![entry("182114", "Cow_t.stl")];
        let summary = run_batch(&fetcher, &entries, out.path(), false).await;

        assert_eq!(fetcher.calls(), 0);
        assert_eq!(summary.skipped, 1);
        assert!(summary.is_success());
        assert_counts_add_up(&summary);
    }

    #[tokio::test]
    async fn test_force_replaces_existing_file() {
        let out = tempfile::tempdir().unwrap();
        let path = out.path().join("Cow_t.stl");
        tokio::fs::write(&path, stl_bytes(4096)).await.unwrap();

        let fetcher = FakeFetcher::serving(vec![("Cow_t.stl", stl_bytes(8192))]);
        let entries = vec![entry("182114", "Cow_t.stl")];
        let summary = run_batch(&fetcher, &entries, out.path(), true).await;

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), 8192);
    }

    #[tokio::test]
    async fn test_failed_force_leaves_no_stale_file() {
        let out = tempfile::tempdir().unwrap();
        let path = out.path().join("Cow_t.stl");
        tokio::fs::write(&path, stl_bytes(4096)).await.unwrap();

        let fetcher = FakeFetcher::failing();
        let entries = vec![entry("182114", "Cow_t.stl")];
        let summary = run_batch(&fetcher, &entries, out.path(), true).await;

        assert_eq!(summary.failed, 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_force_with_path_like_name_deletes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("resources");
        tokio::fs::create_dir_all(&out).await.unwrap();
        let outside = root.path().join("victim.stl");
        tokio::fs::write(&outside, stl_bytes(4096)).await.unwrap();

        let fetcher = FakeFetcher::serving(vec![("victim.stl", stl_bytes(8192))]);
        let entries = vec![entry("182114", "../victim.stl")];
        let summary = run_batch(&fetcher, &entries, &out, true).await;

        assert_eq!(fetcher.calls(), 0);
        assert_eq!(summary.failed, 1);
        assert_eq!(tokio::fs::metadata(&outside).await.unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_batch() {
        let out = tempfile::tempdir().unwrap();
        tokio::fs::write(out.path().join("X-Wing.stl"), stl_bytes(2048))
            .await
            .unwrap();

        // Archive has the first edf part only
        let fetcher = FakeFetcher::serving(vec![("edf/edf_v39.stl", stl_bytes(2048))]);
        let entries = vec![
            entry("3014759", "edf_v39.stl"),
            entry("3014759", "edf_v391.stl"),
            entry("353276", "X-Wing.stl"),
        ];
        let summary = run_batch(&fetcher, &entries, out.path(), false).await;

        assert_eq!(fetcher.calls(), 2);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.exit_code(), 1);
        assert_counts_add_up(&summary);

        let failure = &summary.failures[0];
        assert_eq!(failure.entry.file_name, "edf_v391.stl");
        assert_eq!(
            failure.manual_url,
            "https://www.thingiverse.com/thing:3014759/files"
        );
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let out = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::failing();
        let summary = run_batch(&fetcher, &[], out.path(), false).await;

        assert_eq!(summary, BatchSummary::default());
        assert_eq!(summary.exit_code(), 0);
    }
}
