//! Stream sources.
//!
//! A [`StreamConnector`] opens one endpoint and yields a [`FrameStream`]
//! producing decoded frames one read at a time. Retry and reconnect policy
//! lives in the capture loop, never in the source itself: a source reports
//! each failure exactly once and leaves the decision to the caller.

pub mod endpoint;
pub mod frame;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod stub;

use std::time::Duration;

pub use endpoint::StreamEndpoint;
pub use frame::{Frame, FrameMetadata, PixelFormat};

use crate::error::{ConnectError, ReadError};

/// Opens stream connections for one kind of transport.
pub trait StreamConnector: Send {
    fn connect(&mut self, endpoint: &StreamEndpoint) -> Result<Box<dyn FrameStream>, ConnectError>;
}

/// An established stream handle.
///
/// `read_frame` blocks for at most `timeout`; it buffers no more than one
/// in-flight frame, so a slow caller sees the freshest data the transport has.
pub trait FrameStream: Send {
    fn read_frame(&mut self, timeout: Duration) -> Result<Frame, ReadError>;

    /// Release the underlying transport. Consumes the handle so a closed
    /// stream cannot be read again.
    fn close(self: Box<Self>);
}

/// Pick the connector matching the endpoint's scheme.
///
/// `stub://` endpoints get the synthetic source; everything else goes to the
/// GStreamer RTSP client.
pub fn connector_for(endpoint: &StreamEndpoint) -> Result<Box<dyn StreamConnector>, ConnectError> {
    if endpoint.scheme() == "stub" {
        return Ok(Box::new(stub::StubConnector::default()));
    }

    #[cfg(feature = "rtsp-gstreamer")]
    {
        Ok(Box::new(rtsp::RtspConnector::new()?))
    }
    #[cfg(not(feature = "rtsp-gstreamer"))]
    {
        Err(ConnectError::BadUri(
            "RTSP playback requires the rtsp-gstreamer feature".into(),
        ))
    }
}
