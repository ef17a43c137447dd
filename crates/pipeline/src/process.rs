//! Subprocess segmentation adapter.
//!
//! Runs `<interpreter> <script>` with the photo on stdin. The script writes a
//! ZIP archive to stdout in which each garment is an image entry
//! (`<stem>.png`) optionally paired with a metadata entry (`<stem>.json`).

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use instafit_core::types::Metadata;
use instafit_core::wardrobe::{segment_id_from_filename, SegmentedImage};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::segmenter::{SegmentationError, Segmenter};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

pub struct ProcessSegmenter {
    interpreter: String,
    script: PathBuf,
    timeout: Duration,
}

impl ProcessSegmenter {
    pub fn new(interpreter: String, script: PathBuf, timeout: Duration) -> Self {
        Self {
            interpreter,
            script,
            timeout,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        // Run from the script's directory so it can find its model files.
        match (
            self.script.parent().filter(|d| !d.as_os_str().is_empty()),
            self.script.file_name(),
        ) {
            (Some(dir), Some(file)) => {
                cmd.arg(file).current_dir(dir);
            }
            _ => {
                cmd.arg(&self.script);
            }
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Segmenter for ProcessSegmenter {
    async fn segment(&self, image: Bytes) -> Result<Vec<SegmentedImage>, SegmentationError> {
        let mut child = self
            .command()
            .spawn()
            .map_err(|e| SegmentationError::Transport(format!("failed to start segmenter: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SegmentationError::Transport("segmenter stdin unavailable".into()))?;

        // Feed stdin concurrently so a script that writes before it finishes
        // reading cannot deadlock on a full pipe.
        let writer = tokio::spawn(async move {
            stdin.write_all(&image).await?;
            stdin.shutdown().await
        });

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(SegmentationError::Transport(e.to_string())),
            Err(_) => {
                writer.abort();
                tracing::warn!(script = %self.script.display(), "Segmenter process timed out");
                return Err(SegmentationError::Timeout(self.timeout.as_secs()));
            }
        };

        if let Ok(Err(e)) = writer.await {
            tracing::debug!(error = %e, "Segmenter closed stdin early");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SegmentationError::Service(format!(
                "segmenter exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_archive(&output.stdout)
    }
}

/// Split `dir/name.ext` into (`dir/name`, `ext`).
fn split_entry_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > name.rfind('/').map_or(0, |s| s + 1) => {
            (&name[..idx], &name[idx + 1..])
        }
        _ => (name, ""),
    }
}

/// Decode the ZIP archive a segmentation script writes to stdout.
///
/// Image entries are returned in name order. A metadata entry without a
/// matching image is ignored; an image without metadata gets an empty map.
pub fn parse_archive(data: &[u8]) -> Result<Vec<SegmentedImage>, SegmentationError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| SegmentationError::InvalidResponse(format!("not a zip archive: {e}")))?;

    let mut images: BTreeMap<String, (String, Vec<u8>)> = BTreeMap::new();
    let mut metadata: HashMap<String, Metadata> = HashMap::new();

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| SegmentationError::InvalidResponse(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut buf)
            .map_err(|e| SegmentationError::InvalidResponse(format!("{name}: {e}")))?;

        let (stem, ext) = split_entry_name(&name);
        let ext = ext.to_ascii_lowercase();
        if ext == "json" {
            let meta: Metadata = serde_json::from_slice(&buf).map_err(|e| {
                SegmentationError::InvalidResponse(format!("{name}: invalid metadata: {e}"))
            })?;
            metadata.insert(stem.to_string(), meta);
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            images.insert(stem.to_string(), (name.clone(), buf));
        } else {
            tracing::debug!(entry = %name, "Skipping unrecognised archive entry");
        }
    }

    Ok(images
        .into_iter()
        .map(|(stem, (name, data))| SegmentedImage {
            id: segment_id_from_filename(Some(&name)),
            image: Bytes::from(data),
            metadata: metadata.remove(&stem).unwrap_or_default(),
        })
        .collect())
}
