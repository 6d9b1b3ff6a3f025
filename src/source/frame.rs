use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Decoded frame with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable raster data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub captured_at: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

/// Pixel formats the pipeline carries after decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
}

impl PixelFormat {
    /// Bytes per pixel
    pub fn bpp(self) -> u32 {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
        }
    }
}

impl Frame {
    /// Build a frame from tightly packed pixel data
    pub fn from_packed(data: Bytes, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            meta: Arc::new(FrameMetadata {
                width,
                height,
                stride: width * format.bpp(),
                format,
            }),
            captured_at: Instant::now(),
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("meta", &self.meta)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_frame_has_tight_stride() {
        let data = Bytes::from(vec![0u8; 4 * 2 * 3]);
        let frame = Frame::from_packed(data, 4, 2, PixelFormat::Rgb24);
        assert_eq!(frame.meta.stride, 12);
        assert_eq!(frame.data.len(), 24);
    }
}
