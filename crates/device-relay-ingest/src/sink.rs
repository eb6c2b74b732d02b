//! Local files for decoded media chunks.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local, TimeZone};
use device_relay_core::Modality;
use tokio::{
    fs::OpenOptions,
    io::{AsyncWrite, AsyncWriteExt},
};

/// Second-resolution timestamp used in file names.
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Upper bound on same-second suffixes before giving up.
const MAX_SUFFIX: u32 = 10_000;

/// Base file name without extension, e.g. `camera_20240101_120000`.
#[must_use]
pub fn base_name<Tz: TimeZone>(modality: Modality, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}_{}", modality.file_prefix(), at.format(TIMESTAMP_FORMAT))
}

/// Writes decoded chunks into a directory.
///
/// Chunks landing in the same second get `_1`, `_2`, ... appended instead of
/// overwriting each other.
#[derive(Debug, Clone)]
pub struct MediaSink {
    output_dir: PathBuf,
}

impl MediaSink {
    /// Create a sink writing into `output_dir`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write `bytes` to a new file named after `modality` and the local time.
    ///
    /// # Errors
    /// Returns error if the file cannot be created or written.
    pub async fn write(&self, modality: Modality, bytes: &[u8]) -> std::io::Result<PathBuf> {
        self.write_at(modality, &Local::now(), bytes).await
    }

    /// Write `bytes` as if received at `at`.
    ///
    /// # Errors
    /// Returns error if the file cannot be created or written.
    pub async fn write_at<Tz: TimeZone>(
        &self,
        modality: Modality,
        at: &DateTime<Tz>,
        bytes: &[u8],
    ) -> std::io::Result<PathBuf>
    where
        Tz::Offset: std::fmt::Display,
    {
        let base = base_name(modality, at);
        let ext = modality.extension();

        for suffix in 0..MAX_SUFFIX {
            let name = if suffix == 0 {
                format!("{base}.{ext}")
            } else {
                format!("{base}_{suffix}.{ext}")
            };
            let path = self.output_dir.join(name);
            let file = match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            };
            fill(&path, file, bytes).await?;
            return Ok(path);
        }

        Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free file name for {base}.{ext}"),
        ))
    }
}

/// Write `bytes` into a freshly created file, removing it again on failure.
async fn fill<W>(path: &Path, mut file: W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;
    if let Err(e) = written {
        drop(file);
        if let Err(remove) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %remove, "Failed to remove partial file");
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 5).unwrap()
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name(Modality::Audio, &noon()), "audio_20240309_120005");
        assert_eq!(base_name(Modality::Screen, &noon()), "screen_20240309_120005");
    }

    #[tokio::test]
    async fn test_write_uses_modality_extension() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MediaSink::new(dir.path());

        let audio = sink.write_at(Modality::Audio, &noon(), b"ID3").await.unwrap();
        let camera = sink.write_at(Modality::Camera, &noon(), b"\xff\xd8").await.unwrap();

        assert_eq!(audio.file_name().unwrap(), "audio_20240309_120005.mp3");
        assert_eq!(camera.file_name().unwrap(), "camera_20240309_120005.jpg");
        assert_eq!(std::fs::read(&audio).unwrap(), b"ID3");
    }

    #[tokio::test]
    async fn test_same_second_writes_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MediaSink::new(dir.path());

        let first = sink.write_at(Modality::Screen, &noon(), b"one").await.unwrap();
        let second = sink.write_at(Modality::Screen, &noon(), b"two").await.unwrap();
        let third = sink.write_at(Modality::Screen, &noon(), b"three").await.unwrap();

        assert_eq!(first.file_name().unwrap(), "screen_20240309_120005.jpg");
        assert_eq!(second.file_name().unwrap(), "screen_20240309_120005_1.jpg");
        assert_eq!(third.file_name().unwrap(), "screen_20240309_120005_2.jpg");
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&third).unwrap(), b"three");
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio_20240309_120005.mp3");
        std::fs::write(&path, b"").unwrap();

        let broken = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(ErrorKind::StorageFull, "disk full"))
            .build();
        let err = fill(&path, broken, b"ID3").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StorageFull);
        assert!(!path.exists());
    }
}
