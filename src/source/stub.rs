//! Synthetic frame source for `stub://` endpoints.
//!
//! Produces a deterministic moving gradient so the pipeline can be exercised
//! end to end without a camera or a GStreamer install. The host part of the
//! endpoint may carry a size, e.g. `stub://320x240/`.

use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::info;

use crate::error::{ConnectError, ReadError};
use crate::source::frame::{Frame, PixelFormat};
use crate::source::{FrameStream, StreamConnector, StreamEndpoint};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Default)]
pub struct StubConnector;

impl StreamConnector for StubConnector {
    fn connect(&mut self, endpoint: &StreamEndpoint) -> Result<Box<dyn FrameStream>, ConnectError> {
        let (width, height) = parse_size(endpoint.uri()).unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));
        info!("stub source connected: {}x{}", width, height);
        Ok(Box::new(StubStream {
            width,
            height,
            frame_count: 0,
            last_frame: None,
        }))
    }
}

fn parse_size(uri: &str) -> Option<(u32, u32)> {
    let host = uri.strip_prefix("stub://")?;
    let host = host.split(['/', ':']).next()?;
    let (w, h) = host.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

struct StubStream {
    width: u32,
    height: u32,
    frame_count: u64,
    last_frame: Option<Instant>,
}

impl StubStream {
    fn generate_pixels(&self) -> Vec<u8> {
        let mut pixels = vec![0u8; (self.width * self.height * 3) as usize];
        let shift = self.frame_count as usize;
        for (i, px) in pixels.iter_mut().enumerate() {
            *px = ((i / 3 + shift) % 256) as u8;
        }
        pixels
    }
}

impl FrameStream for StubStream {
    fn read_frame(&mut self, timeout: Duration) -> Result<Frame, ReadError> {
        // Pace to roughly 30fps, but never sleep past the caller's bound.
        if let Some(last) = self.last_frame {
            let elapsed = last.elapsed();
            if elapsed < FRAME_INTERVAL {
                thread::sleep((FRAME_INTERVAL - elapsed).min(timeout));
            }
        }
        self.last_frame = Some(Instant::now());
        self.frame_count += 1;

        let pixels = self.generate_pixels();
        Ok(Frame::from_packed(
            Bytes::from(pixels),
            self.width,
            self.height,
            PixelFormat::Rgb24,
        ))
    }

    fn close(self: Box<Self>) {}
}
