//! Snapshot persistence.
//!
//! Snapshots are written under a configurable directory with a sortable
//! local timestamp in the filename. An already-taken name gets a numeric
//! suffix; existing files are never overwritten.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::Local;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SnapshotError;
use crate::source::{Frame, PixelFormat};

const JPEG_QUALITY: u8 = 92;

/// On-disk snapshot encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    Jpeg,
    Png,
}

impl SnapshotFormat {
    fn extension(self) -> &'static str {
        match self {
            SnapshotFormat::Jpeg => "jpg",
            SnapshotFormat::Png => "png",
        }
    }
}

/// Encode `frame` into `dir`, returning the path written.
pub fn write_snapshot(
    frame: &Frame,
    dir: &Path,
    format: SnapshotFormat,
) -> Result<PathBuf, SnapshotError> {
    fs::create_dir_all(dir).map_err(|source| SnapshotError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f");
    let path = unique_path(dir, &format!("snapshot_{stamp}"), format.extension());

    let rgb = frame_to_rgb(frame)?;
    let width = frame.meta.width;
    let height = frame.meta.height;

    match format {
        SnapshotFormat::Jpeg => {
            let file = File::create(&path).map_err(|source| SnapshotError::Io {
                path: path.clone(),
                source,
            })?;
            let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), JPEG_QUALITY);
            encoder.encode(&rgb, width, height, ExtendedColorType::Rgb8)?;
        }
        SnapshotFormat::Png => {
            image::save_buffer(&path, &rgb, width, height, ExtendedColorType::Rgb8)?;
        }
    }

    info!("saved snapshot: {}", path.display());
    Ok(path)
}

/// First non-existing `name[_N].ext` under `dir`.
fn unique_path(dir: &Path, base: &str, ext: &str) -> PathBuf {
    let candidate = dir.join(format!("{base}.{ext}"));
    if !candidate.exists() {
        return candidate;
    }
    let mut counter = 1u32;
    loop {
        let candidate = dir.join(format!("{base}_{counter}.{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Tightly packed RGB bytes for the encoder, swapping channels for BGR input.
fn frame_to_rgb(frame: &Frame) -> Result<Vec<u8>, SnapshotError> {
    let expected = frame.meta.height as usize * frame.meta.stride as usize;
    if frame.data.len() < expected {
        return Err(SnapshotError::MalformedFrame);
    }
    match frame.meta.format {
        PixelFormat::Rgb24 => Ok(frame.data.to_vec()),
        PixelFormat::Bgr24 => {
            let mut rgb = frame.data.to_vec();
            for px in rgb.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            Ok(rgb)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(format: PixelFormat) -> Frame {
        // 2x2 with distinct channel values
        let px = [10u8, 20, 30];
        let data: Vec<u8> = px.iter().copied().cycle().take(12).collect();
        Frame::from_packed(Bytes::from(data), 2, 2, format)
    }

    #[test]
    fn writes_a_readable_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(&frame(PixelFormat::Rgb24), dir.path(), SnapshotFormat::Png)
            .unwrap();
        assert!(path.exists());

        let decoded = image::open(&path).unwrap().into_rgb8();
        assert_eq!(decoded.dimensions(), (2, 2));
        assert_eq!(decoded.get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn bgr_input_is_swapped_before_encode() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(&frame(PixelFormat::Bgr24), dir.path(), SnapshotFormat::Png)
            .unwrap();
        let decoded = image::open(&path).unwrap().into_rgb8();
        assert_eq!(decoded.get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    fn colliding_names_get_counter_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let base = "snapshot_20250101_120000_000";

        std::fs::write(dir.path().join(format!("{base}.jpg")), b"taken").unwrap();
        let first = unique_path(dir.path(), base, "jpg");
        assert!(first.to_string_lossy().ends_with("_1.jpg"));

        std::fs::write(&first, b"taken").unwrap();
        let second = unique_path(dir.path(), base, "jpg");
        assert!(second.to_string_lossy().ends_with("_2.jpg"));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let short = Frame::from_packed(Bytes::from(vec![0u8; 6]), 2, 2, PixelFormat::Rgb24);
        let dir = tempfile::tempdir().unwrap();
        let err = write_snapshot(&short, dir.path(), SnapshotFormat::Png).unwrap_err();
        assert!(matches!(err, SnapshotError::MalformedFrame));
    }
}
