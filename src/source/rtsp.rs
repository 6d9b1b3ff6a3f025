//! GStreamer-based RTSP stream source.
//!
//! Pipeline shape: `rtspsrc ! decodebin ! videoconvert ! appsink` with RGB
//! caps. The appsink keeps at most one buffer and drops stale ones, so every
//! read hands back the freshest decoded frame the camera has produced.

use std::time::Duration;

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use crate::error::{ConnectError, ReadError};
use crate::source::frame::{Frame, PixelFormat};
use crate::source::{FrameStream, StreamConnector, StreamEndpoint};

/// Connector producing GStreamer-backed RTSP streams.
pub struct RtspConnector {
    _priv: (),
}

impl RtspConnector {
    pub fn new() -> Result<Self, ConnectError> {
        gst::init().map_err(|e| ConnectError::Unreachable(format!("gstreamer init: {e}")))?;
        Ok(Self { _priv: () })
    }
}

impl StreamConnector for RtspConnector {
    fn connect(&mut self, endpoint: &StreamEndpoint) -> Result<Box<dyn FrameStream>, ConnectError> {
        let pipeline_str = format!(
            "rtspsrc location={} latency=0 ! \
             decodebin ! \
             videoconvert ! \
             video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            endpoint.uri()
        );
        debug!("RTSP pipeline: {}", pipeline_str.replace(endpoint.uri(), &endpoint.display_url()));

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| ConnectError::BadUri(format!("pipeline build: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| ConnectError::BadUri("parsed element is not a pipeline".into()))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| ConnectError::BadUri("appsink element missing".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| ConnectError::BadUri("appsink has unexpected type".into()))?;

        let caps = gst::Caps::builder("video/x-raw").field("format", "RGB").build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| ConnectError::Unreachable(format!("failed to start pipeline: {e:?}")))?;

        // Wait for preroll, bounded by the endpoint's connect timeout.
        let timeout = gst::ClockTime::from_mseconds(endpoint.connect_timeout.as_millis() as u64);
        let (state_change, _, _) = pipeline.state(Some(timeout));

        let mut stream = RtspStream { pipeline, appsink };

        match state_change {
            Ok(gst::StateChangeSuccess::Success) | Ok(gst::StateChangeSuccess::Async) => {
                info!("RTSP connected: {}", endpoint.display_url());
                Ok(Box::new(stream))
            }
            Ok(gst::StateChangeSuccess::NoPreroll) => {
                // Live sources report NoPreroll; that is still a success.
                info!("RTSP connected (live): {}", endpoint.display_url());
                Ok(Box::new(stream))
            }
            Err(_) => {
                let reason = stream
                    .drain_bus_error()
                    .unwrap_or_else(|| "failed to reach playing state".to_string());
                stream.teardown();
                Err(classify_connect_failure(reason))
            }
        }
    }
}

/// Map a GStreamer bus error onto the connect taxonomy.
fn classify_connect_failure(reason: String) -> ConnectError {
    let lowered = reason.to_ascii_lowercase();
    if lowered.contains("401") || lowered.contains("unauthorized") || lowered.contains("not authorized") {
        ConnectError::AuthRejected
    } else {
        ConnectError::Unreachable(reason)
    }
}

struct RtspStream {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
}

impl RtspStream {
    /// Pop any pending error/EOS message off the pipeline bus.
    fn drain_bus_error(&mut self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(message) = bus.timed_pop(gst::ClockTime::ZERO) {
            use gst::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => return Some("stream reached end of stream".to_string()),
                _ => {}
            }
        }
        None
    }

    fn teardown(&mut self) {
        if self.pipeline.set_state(gst::State::Null).is_err() {
            warn!("failed to set RTSP pipeline to Null; abandoning handle");
        }
    }
}

impl FrameStream for RtspStream {
    fn read_frame(&mut self, timeout: Duration) -> Result<Frame, ReadError> {
        if let Some(reason) = self.drain_bus_error() {
            return Err(ReadError::Disconnected(reason));
        }

        let timeout = gst::ClockTime::from_mseconds(timeout.as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            if self.appsink.is_eos() {
                return Err(ReadError::Disconnected("appsink reached EOS".into()));
            }
            return Err(ReadError::Timeout);
        };

        sample_to_frame(&sample)
    }

    fn close(mut self: Box<Self>) {
        self.teardown();
    }
}

impl Drop for RtspStream {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Convert an appsink sample into a tightly packed RGB frame.
fn sample_to_frame(sample: &gst::Sample) -> Result<Frame, ReadError> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| ReadError::Decode("sample contains no buffer".into()))?;
    let caps = sample
        .caps()
        .ok_or_else(|| ReadError::Decode("sample has no caps".into()))?;
    let info = gst_video::VideoInfo::from_caps(caps)
        .map_err(|e| ReadError::Decode(format!("unparseable caps: {e}")))?;

    let width = info.width();
    let height = info.height();
    let row_bytes = width as usize * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer
        .map_readable()
        .map_err(|_| ReadError::Decode("failed to map buffer".into()))?;
    let data = map.as_slice();

    let data = if stride == row_bytes {
        Bytes::copy_from_slice(data)
    } else {
        // Repack padded rows into a tight buffer.
        let mut packed = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            packed.extend_from_slice(
                data.get(start..end)
                    .ok_or_else(|| ReadError::Decode("buffer row out of bounds".into()))?,
            );
        }
        Bytes::from(packed)
    };

    Ok(Frame::from_packed(data, width, height, PixelFormat::Rgb24))
}
