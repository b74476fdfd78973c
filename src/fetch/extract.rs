//! Pulls a single named file out of a downloaded zip archive.

use std::path::Path;

use async_zip::tokio::read::seek::ZipFileReader;
use bytesize::ByteSize;
use tokio::{fs::File, io::BufReader};
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, error, info};

use super::{FetchError, Result};

/// Picks the archive entry holding `wanted`.
///
/// Entries are matched by filename suffix since archives usually nest files under
/// a `files/` folder. An exact suffix wins over a case-insensitive one, and the
/// first match in archive order is used. Directory entries are never selected.
pub fn select_entry<S: AsRef<str>>(names: &[S], wanted: &str) -> Option<usize> {
    let is_file = |name: &str| !name.ends_with('/');

    names
        .iter()
        .position(|name| {
            let name = name.as_ref();
            is_file(name) && name.ends_with(wanted)
        })
        .or_else(|| {
            let wanted = wanted.to_lowercase();
            names.iter().position(|name| {
                let name = name.as_ref();
                is_file(name) && name.to_lowercase().ends_with(&wanted)
            })
        })
}

fn stl_candidates(names: &[String]) -> Vec<String> {
    names
        .iter()
        .filter(|name| name.to_lowercase().ends_with(".stl"))
        .cloned()
        .collect()
}

/// Extracts the entry matching `file_name` from `zip_path` to `output_dir/file_name`.
///
/// Returns the number of bytes written.
pub async fn extract_entry(zip_path: &Path, file_name: &str, output_dir: &Path) -> Result<u64> {
    info!(archive = ?zip_path, stl = file_name, "Extracting STL from zip archive");
    let file = BufReader::new(File::open(zip_path).await?);
    let mut zip = ZipFileReader::with_tokio(file).await?;

    let names = zip
        .file()
        .entries()
        .iter()
        .map(|entry| String::from_utf8_lossy(entry.filename().as_bytes()).into_owned())
        .collect::<Vec<_>>();

    debug!(entries = names.len(), "Scanning zip contents");

    let Some(index) = select_entry(&names, file_name) else {
        let candidates = stl_candidates(&names);
        error!(
            stl = file_name,
            available = ?candidates,
            "STL file not found in archive"
        );
        return Err(FetchError::EntryNotFound {
            wanted: file_name.to_string(),
            candidates,
        });
    };

    info!(entry = %names[index], "Found matching entry");

    let expected_crc = zip.file().entries()[index].crc32();
    let output_path = output_dir.join(file_name);
    let mut entry_reader = zip.reader_with_entry(index).await?.compat();
    let mut output_file = File::create(&output_path).await?;

    let copied = tokio::io::copy(&mut entry_reader, &mut output_file).await;
    let result = match copied {
        Ok(bytes) => {
            let actual_crc = entry_reader.get_mut().compute_hash();
            if actual_crc == expected_crc {
                output_file.sync_all().await.map(|()| bytes).map_err(Into::into)
            } else {
                error!(
                    entry = %names[index],
                    expected = expected_crc,
                    actual = actual_crc,
                    "CRC-32 mismatch, archive entry is corrupt"
                );
                Err(FetchError::ChecksumMismatch {
                    entry: names[index].clone(),
                    expected: expected_crc,
                    actual: actual_crc,
                })
            }
        }
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(bytes) => {
            info!(path = ?output_path, size = %ByteSize::b(bytes), "Extracted");
            Ok(bytes)
        }
        Err(e) => {
            drop(output_file);
            if let Err(rm) = tokio::fs::remove_file(&output_path).await {
                debug!(path = ?output_path, error = %rm, "Failed to remove partial file");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::{stl_bytes, write_zip};
    use async_zip::{
        Compression, StringEncoding, ZipEntryBuilder, ZipString, base::write::ZipFileWriter,
    };

    #[test]
    fn test_select_entry_prefers_exact_suffix() {
        let names = ["Cow/files/cow_t.STL", "Cow/files/Cow_t.stl", "Cow/images/cow.png"];
        assert_eq!(select_entry(&names, "Cow_t.stl"), Some(1));
    }

    #[test]
    fn test_select_entry_falls_back_to_case_insensitive() {
        let names = ["LICENSE.txt", "files/COW_T.STL"];
        assert_eq!(select_entry(&names, "Cow_t.stl"), Some(1));
    }

    #[test]
    fn test_select_entry_first_match_wins() {
        let names = ["a/X-Wing.stl", "b/X-Wing.stl"];
        assert_eq!(select_entry(&names, "X-Wing.stl"), Some(0));
    }

    #[test]
    fn test_select_entry_ignores_directories() {
        let names = ["files/Cow_t.stl/", "images/"];
        assert_eq!(select_entry(&names, "Cow_t.stl"), None);
        let empty: [&str; 0] = [];
        assert_eq!(select_entry(&empty, "Cow_t.stl"), None);
    }

    #[test]
    fn test_stl_candidates() {
        let names = vec![
            "files/a.stl".to_string(),
            "files/B.STL".to_string(),
            "README.md".to_string(),
        ];
        assert_eq!(stl_candidates(&names), vec!["files/a.stl", "files/B.STL"]);
    }

    #[tokio::test]
    async fn test_extract_entry_writes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("thing.zip");
        write_zip(
            &zip,
            &[
                ("edf/images/render.png", vec![0u8; 64]),
                ("edf/files/edf_v39.stl", stl_bytes(1500)),
                ("edf/files/edf_v391.stl", stl_bytes(2500)),
            ],
        )
        .await;

        let out = dir.path().join("out");
        tokio::fs::create_dir_all(&out).await.unwrap();

        let bytes = extract_entry(&zip, "edf_v391.stl", &out).await.unwrap();
        assert_eq!(bytes, 2500);
        assert_eq!(
            tokio::fs::read(out.join("edf_v391.stl")).await.unwrap(),
            stl_bytes(2500)
        );
        assert!(!out.join("edf_v39.stl").exists());
    }

    #[tokio::test]
    async fn test_extract_entry_missing_lists_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("thing.zip");
        write_zip(
            &zip,
            &[
                ("files/Cow.stl", stl_bytes(2000)),
                ("README.txt", b"hi".to_vec()),
            ],
        )
        .await;

        let err = extract_entry(&zip, "Cow_t.stl", dir.path()).await.unwrap_err();
        match err {
            FetchError::EntryNotFound { wanted, candidates } => {
                assert_eq!(wanted, "Cow_t.stl");
                assert_eq!(candidates, vec!["files/Cow.stl".to_string()]);
            }
            other => panic!("Expected EntryNotFound, got {other:?}"),
        }
        assert!(!dir.path().join("Cow_t.stl").exists());
    }

    #[tokio::test]
    async fn test_extract_entry_detects_corrupt_data() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("thing.zip");
        let entry = ZipEntryBuilder::new("files/Cow_t.stl".to_string().into(), Compression::Stored);
        let mut writer = ZipFileWriter::with_tokio(tokio::fs::File::create(&zip).await.unwrap());
        writer.write_entry_whole(entry, &[b'A'; 4000]).await.unwrap();
        writer.close().await.unwrap();

        // Flip one byte of the stored payload, leaving the recorded CRC alone
        let mut raw = tokio::fs::read(&zip).await.unwrap();
        let pos = raw.iter().position(|b| *b == b'A').unwrap();
        raw[pos + 100] = b'B';
        tokio::fs::write(&zip, &raw).await.unwrap();

        let out = dir.path().join("out");
        tokio::fs::create_dir_all(&out).await.unwrap();
        let err = extract_entry(&zip, "Cow_t.stl", &out).await.unwrap_err();

        assert!(matches!(err, FetchError::ChecksumMismatch { .. }));
        assert!(!out.join("Cow_t.stl").exists());
    }

    #[tokio::test]
    async fn test_extract_entry_tolerates_non_utf8_names() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("thing.zip");
        let mut writer = ZipFileWriter::with_tokio(tokio::fs::File::create(&zip).await.unwrap());
        let raw_name = ZipString::new(b"r\xE9ad.txt".to_vec(), StringEncoding::Raw);
        writer
            .write_entry_whole(ZipEntryBuilder::new(raw_name, Compression::Stored), b"readme")
            .await
            .unwrap();
        writer
            .write_entry_whole(
                ZipEntryBuilder::new("files/Cow_t.stl".to_string().into(), Compression::Deflate),
                &stl_bytes(2000),
            )
            .await
            .unwrap();
        writer.close().await.unwrap();

        let out = dir.path().join("out");
        tokio::fs::create_dir_all(&out).await.unwrap();
        let bytes = extract_entry(&zip, "Cow_t.stl", &out).await.unwrap();

        assert_eq!(bytes, 2000);
        assert_eq!(
            tokio::fs::read(out.join("Cow_t.stl")).await.unwrap(),
            stl_bytes(2000)
        );
    }

    #[tokio::test]
    async fn test_extract_entry_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("thing.zip");
        tokio::fs::write(&zip, b"<!DOCTYPE html><html>Just a moment...</html>")
            .await
            .unwrap();

        let err = extract_entry(&zip, "Cow_t.stl", dir.path()).await.unwrap_err();
        assert!(matches!(err, FetchError::ZipError(_)));
    }
}
