use super::{get_bytes_with_retry, FetchPolicy};
use crate::error::{LicsyncError, Result};
use reqwest::blocking::Client;
use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};
use tracing::info;
use url::Url;
use zip::ZipArchive;

/// Download the given ZIP URL and save it under `dest_dir` using the original filename.
/// Returns the full path of the saved file.
pub fn download_zip(
    client: &Client,
    url_str: &str,
    dest_dir: impl AsRef<Path>,
    policy: &FetchPolicy,
) -> Result<PathBuf> {
    let dest_dir = dest_dir.as_ref();
    let url = Url::parse(url_str).map_err(|e| LicsyncError::Fetch {
        url: url_str.to_string(),
        reason: e.to_string(),
    })?;
    let filename = url
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .unwrap_or("download.zip");
    let dest_path = dest_dir.join(filename);

    fs::create_dir_all(dest_dir)?;

    let bytes = get_bytes_with_retry(client, url.as_str(), policy)?;
    fs::write(&dest_path, &bytes)?;
    info!(bytes = bytes.len(), path = %dest_path.display(), "downloaded archive");

    Ok(dest_path)
}

/// Extract the archive's only `.csv` entry into `dest_dir`.
pub fn extract_single_csv(zip_path: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let layout_err = |found| LicsyncError::ArchiveLayout {
        path: zip_path.to_path_buf(),
        found,
    };
    let file = File::open(zip_path)?;
    let mut archive = ZipArchive::new(file).map_err(|_| layout_err(0))?;

    let mut csv_entries = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|_| layout_err(0))?;
        if entry.is_file() && entry.name().to_lowercase().ends_with(".csv") {
            csv_entries.push(i);
        }
    }
    let &[index] = csv_entries.as_slice() else {
        return Err(layout_err(csv_entries.len()));
    };

    let mut entry = archive.by_index(index).map_err(|_| layout_err(1))?;
    let name = Path::new(entry.name())
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "export.csv".into());
    fs::create_dir_all(dest_dir)?;
    let out_path = dest_dir.join(name);
    let mut out = File::create(&out_path)?;
    io::copy(&mut entry, &mut out)?;

    info!(path = %out_path.display(), "extracted export");
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use httpmock::prelude::*;
    use std::io::{Cursor, Write};
    use std::time::Duration;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;

    fn archive(entries: &[(&str, &str)]) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            for (name, content) in entries {
                zip.start_file(*name, options)?;
                zip.write_all(content.as_bytes())?;
            }
            zip.finish()?;
        }
        Ok(buf)
    }

    #[test]
    fn extracts_the_single_csv() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("abc.zip");
        fs::write(
            &zip_path,
            archive(&[("readme.txt", "hi"), ("data/ABC_WeeklyDataExport.csv", "A,B\n1,2\n")])?,
        )?;

        let out = extract_single_csv(&zip_path, &dir.path().join("out"))?;
        assert_eq!(out.file_name().and_then(|n| n.to_str()), Some("ABC_WeeklyDataExport.csv"));
        assert_eq!(fs::read_to_string(out)?, "A,B\n1,2\n");
        Ok(())
    }

    #[test]
    fn rejects_unexpected_layouts() -> Result<()> {
        let dir = tempdir()?;
        let none = dir.path().join("none.zip");
        fs::write(&none, archive(&[("readme.txt", "hi")])?)?;
        assert!(matches!(
            extract_single_csv(&none, dir.path()),
            Err(LicsyncError::ArchiveLayout { found: 0, .. })
        ));

        let two = dir.path().join("two.zip");
        fs::write(&two, archive(&[("a.csv", "A\n"), ("b.CSV", "B\n")])?)?;
        assert!(matches!(
            extract_single_csv(&two, dir.path()),
            Err(LicsyncError::ArchiveLayout { found: 2, .. })
        ));

        let junk = dir.path().join("junk.zip");
        fs::write(&junk, "not a zip")?;
        assert!(extract_single_csv(&junk, dir.path()).is_err());
        Ok(())
    }

    #[test]
    fn downloads_under_url_filename() -> Result<()> {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/files/ABC_WeeklyDataExport.zip");
            then.status(200).body("zipbytes");
        });
        let policy = FetchPolicy {
            timeout: Duration::from_secs(5),
            max_retries: 0,
            initial_backoff_ms: 1,
        };
        let client = super::super::build_client(&policy)?;
        let dir = tempdir()?;
        let path = download_zip(
            &client,
            &server.url("/files/ABC_WeeklyDataExport.zip"),
            dir.path(),
            &policy,
        )?;
        assert_eq!(path, dir.path().join("ABC_WeeklyDataExport.zip"));
        assert_eq!(fs::read(path)?, b"zipbytes");
        Ok(())
    }
}
