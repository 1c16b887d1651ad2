use crate::annotate::{AnnotationLoop, LoopError, LoopPhase, LoopStats, TickContext};
use crate::capture::{CaptureError, MediaDevices, StreamEvent, VideoSource};
use crate::detection::{DetectorError, LandmarkDetector};
use crate::overlay::{Canvas, OverlayRenderer};
use crate::scheduler::FrameScheduler;
use image::RgbImage;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("detector not loaded yet")]
    DetectorLoading,

    #[error("detector unavailable: {0}")]
    DetectorUnavailable(String),

    #[error("failed to create detector")]
    Initialization(#[source] DetectorError),

    #[error("camera acquisition failed")]
    Acquisition(#[from] CaptureError),

    #[error(transparent)]
    Loop(#[from] LoopError),
}

enum DetectorSlot {
    Loading,
    Ready(Box<dyn LandmarkDetector>),
    Failed(String),
}

/// One annotation session: the toggle state, the camera stream, the detector and
/// the loop that ties them together.
///
/// `enabled` is only ever written here; the loop reads it once per tick.
pub struct Session<C: Canvas, S: FrameScheduler> {
    enabled: bool,
    detector: DetectorSlot,
    devices: Box<dyn MediaDevices>,
    stream: Option<Box<dyn VideoSource>>,
    first_frame_seen: bool,
    annotator: AnnotationLoop,
    renderer: Box<dyn OverlayRenderer>,
    canvas: C,
    scheduler: S,
    last_error: Option<String>,
}

impl<C: Canvas, S: FrameScheduler> Session<C, S> {
    pub fn new(
        devices: Box<dyn MediaDevices>,
        renderer: Box<dyn OverlayRenderer>,
        canvas: C,
        scheduler: S,
    ) -> Self {
        Self {
            enabled: false,
            detector: DetectorSlot::Loading,
            devices,
            stream: None,
            first_frame_seen: false,
            annotator: AnnotationLoop::new(),
            renderer,
            canvas,
            scheduler,
            last_error: None,
        }
    }

    /// Create the detector. Called once, before any toggle is accepted.
    pub fn load_detector<F>(&mut self, create: F) -> Result<(), SessionError>
    where
        F: FnOnce() -> Result<Box<dyn LandmarkDetector>, DetectorError>,
    {
        match create() {
            Ok(detector) => {
                tracing::info!("{} detector ready", detector.task());
                self.detector = DetectorSlot::Ready(detector);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Detector creation failed: {}", e);
                self.detector = DetectorSlot::Failed(e.to_string());
                self.last_error = Some(e.to_string());
                Err(SessionError::Initialization(e))
            }
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Text for the toggle control
    pub fn label(&self) -> &'static str {
        if self.enabled {
            "DISABLE PREDICTIONS"
        } else {
            "ENABLE PREDICTIONS"
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.annotator.phase()
    }

    pub fn stats(&self) -> LoopStats {
        self.annotator.stats()
    }

    pub fn canvas(&self) -> &C {
        &self.canvas
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn current_frame(&self) -> Option<&RgbImage> {
        self.stream.as_ref().and_then(|stream| stream.current_frame())
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Flip enablement in response to the user.
    ///
    /// Enabling without a stream requests one; the loop starts when its first frame
    /// arrives. Enabling with a live stream restarts a stopped loop directly.
    /// Disabling only clears the flag, and the loop stops itself on its next tick.
    pub fn toggle(&mut self) -> Result<bool, SessionError> {
        match &self.detector {
            DetectorSlot::Loading => {
                tracing::warn!("Wait! Detector not loaded yet.");
                return Err(SessionError::DetectorLoading);
            }
            DetectorSlot::Failed(reason) => {
                tracing::warn!("Predictions unavailable: {}", reason);
                return Err(SessionError::DetectorUnavailable(reason.clone()));
            }
            DetectorSlot::Ready(_) => {}
        }

        self.enabled = !self.enabled;
        tracing::info!("Predictions {}", if self.enabled { "enabled" } else { "disabled" });

        if !self.enabled {
            return Ok(false);
        }

        if self.stream.is_none() {
            match self.devices.request_stream() {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.first_frame_seen = false;
                }
                Err(e) => {
                    self.enabled = false;
                    return Err(self.fail(e.into()));
                }
            }
        } else if self.first_frame_seen && !self.annotator.is_running() {
            self.start_loop()?;
        }

        Ok(true)
    }

    /// Forward stream events. Called by the host once per refresh.
    pub fn poll_stream(&mut self) -> Result<(), SessionError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };

        match stream.poll() {
            Ok(Some(StreamEvent::FirstFrame)) => {
                let (width, height) = stream.dimensions();
                tracing::info!("First frame ready ({}x{})", width, height);
                self.first_frame_seen = true;
                self.start_loop()
            }
            Ok(None) => Ok(()),
            Err(e) => {
                self.stream = None;
                self.first_frame_seen = false;
                self.enabled = false;
                self.annotator.stop();
                Err(self.fail(e.into()))
            }
        }
    }

    /// Run the tick the loop asked for
    pub fn run_tick(&mut self) -> Result<(), SessionError> {
        let DetectorSlot::Ready(detector) = &mut self.detector else {
            return Ok(());
        };
        let Some(stream) = self.stream.as_deref() else {
            self.annotator.stop();
            return Ok(());
        };

        let outcome = self.annotator.tick(TickContext {
            enabled: self.enabled,
            detector: detector.as_mut(),
            source: stream,
            renderer: self.renderer.as_ref(),
            canvas: &mut self.canvas,
            scheduler: &mut self.scheduler,
        });

        match outcome {
            Ok(_) => Ok(()),
            Err(e) => {
                self.enabled = false;
                Err(self.fail(e.into()))
            }
        }
    }

    fn start_loop(&mut self) -> Result<(), SessionError> {
        let detector = match &mut self.detector {
            DetectorSlot::Ready(detector) => detector.as_mut(),
            DetectorSlot::Loading => return Err(SessionError::DetectorLoading),
            DetectorSlot::Failed(reason) => {
                return Err(SessionError::DetectorUnavailable(reason.clone()))
            }
        };
        let Some(stream) = self.stream.as_deref() else {
            return Ok(());
        };

        let outcome = self.annotator.start(TickContext {
            enabled: self.enabled,
            detector,
            source: stream,
            renderer: self.renderer.as_ref(),
            canvas: &mut self.canvas,
            scheduler: &mut self.scheduler,
        });

        match outcome {
            Ok(_) => Ok(()),
            Err(e) => {
                self.enabled = false;
                Err(self.fail(e.into()))
            }
        }
    }

    fn fail(&mut self, error: SessionError) -> SessionError {
        tracing::error!("{}", error_chain(&error));
        self.last_error = Some(error_chain(&error));
        error
    }
}

/// "outer: inner: innermost" for logging
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
