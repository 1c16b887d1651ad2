mod webcam;

pub use webcam::{WebcamDevices, WebcamStream};

use image::RgbImage;

/// Capture time of a frame in milliseconds since its device source was set up.
///
/// Non-decreasing while a stream is live, and a re-acquired stream continues from
/// where the previous one stopped. Two reads that return the same value refer to the
/// same frame.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct FrameTimestamp(f64);

impl FrameTimestamp {
    pub const ZERO: FrameTimestamp = FrameTimestamp(0.0);

    pub fn from_millis(ms: f64) -> Self {
        Self(ms)
    }

    pub fn as_millis(self) -> f64 {
        self.0
    }
}

/// Exposes the current playback time of a video source
pub trait FrameClock {
    fn current_time(&self) -> FrameTimestamp;
}

/// Notifications a stream raises while being polled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// The first frame is available. Raised exactly once per stream.
    FirstFrame,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("camera {index} could not be opened: {reason}")]
    Open { index: u32, reason: String },

    #[error("camera stream failed: {0}")]
    Stream(String),

    #[error("failed to decode frame: {0}")]
    Decode(String),

    #[error("camera stream disconnected")]
    Disconnected,
}

/// A live, playable video source
pub trait VideoSource: FrameClock {
    /// Take whatever the device delivered since the last call
    fn poll(&mut self) -> Result<Option<StreamEvent>, CaptureError>;

    /// The frame `current_time` refers to, once one has arrived
    fn current_frame(&self) -> Option<&RgbImage>;

    /// Pixel dimensions of the current frame, (0, 0) before the first frame
    fn dimensions(&self) -> (u32, u32) {
        self.current_frame()
            .map(|frame| frame.dimensions())
            .unwrap_or((0, 0))
    }
}

/// Trait for camera stream providers
pub trait MediaDevices {
    /// Request a video stream. Timestamps of successive streams share one clock.
    ///
    /// Returns as soon as acquisition has started; the stream raises
    /// [`StreamEvent::FirstFrame`] (or an error) from `poll` once it resolves.
    fn request_stream(&mut self) -> Result<Box<dyn VideoSource>, CaptureError>;
}
