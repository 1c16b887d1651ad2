//! Fakes shared by the loop and session tests.

use crate::capture::{
    CaptureError, FrameClock, FrameTimestamp, MediaDevices, StreamEvent, VideoSource,
};
use crate::detection::{
    DetectionResult, DetectorError, Landmark, LandmarkDetector, RunningMode, Subject, Task,
};
use crate::scheduler::FrameScheduler;
use image::RgbImage;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Everything the fake detector was asked to do, in order
#[derive(Debug, Default)]
pub struct DetectorLog {
    pub mode_switches: usize,
    pub detections: Vec<f64>,
    /// Mode at the time of each detection call
    pub modes_seen: Vec<RunningMode>,
}

pub struct FakeDetector {
    pub log: Rc<RefCell<DetectorLog>>,
    mode: RunningMode,
    results: VecDeque<DetectionResult>,
    fail_mode_switch: bool,
    fail_at: Option<f64>,
    last_timestamp: Option<f64>,
}

impl FakeDetector {
    pub fn new() -> Self {
        Self {
            log: Rc::default(),
            mode: RunningMode::Image,
            results: VecDeque::new(),
            fail_mode_switch: false,
            fail_at: None,
            last_timestamp: None,
        }
    }

    /// Results handed out by successive detections; one hand per call once exhausted
    pub fn with_results(mut self, results: Vec<DetectionResult>) -> Self {
        self.results = results.into();
        self
    }

    pub fn failing_mode_switch(mut self) -> Self {
        self.fail_mode_switch = true;
        self
    }

    pub fn failing_at(mut self, timestamp_ms: f64) -> Self {
        self.fail_at = Some(timestamp_ms);
        self
    }
}

pub fn one_hand() -> DetectionResult {
    DetectionResult {
        subjects: vec![Subject::new(
            (0..21)
                .map(|i| Landmark::new(0.3 + i as f32 * 0.01, 0.3 + i as f32 * 0.01, 0.0))
                .collect(),
        )],
    }
}

impl LandmarkDetector for FakeDetector {
    fn running_mode(&self) -> RunningMode {
        self.mode
    }

    fn set_running_mode(&mut self, mode: RunningMode) -> Result<(), DetectorError> {
        self.log.borrow_mut().mode_switches += 1;
        if self.fail_mode_switch {
            return Err(DetectorError::ModeSwitch {
                mode,
                reason: "delegate lost".into(),
            });
        }
        self.mode = mode;
        Ok(())
    }

    fn detect_for_video(
        &mut self,
        _frame: &RgbImage,
        timestamp_ms: f64,
    ) -> Result<DetectionResult, DetectorError> {
        let mut log = self.log.borrow_mut();
        log.detections.push(timestamp_ms);
        log.modes_seen.push(self.mode);
        // Same contract as the ONNX backend: strictly increasing timestamps
        if let Some(previous_ms) = self.last_timestamp {
            if timestamp_ms <= previous_ms {
                return Err(DetectorError::NonMonotonicTimestamp {
                    timestamp_ms,
                    previous_ms,
                });
            }
        }
        self.last_timestamp = Some(timestamp_ms);
        if self.fail_at == Some(timestamp_ms) {
            return Err(DetectorError::Inference("out of memory".into()));
        }
        Ok(self.results.pop_front().unwrap_or_else(one_hand))
    }

    fn task(&self) -> Task {
        Task::Hand
    }
}

/// Source whose clock the test moves by hand. Every source handed out by one
/// [`SourceControl`] shares its clock, like streams of one device.
pub struct ScriptedSource {
    clock: Rc<Cell<f64>>,
    ready: Rc<Cell<bool>>,
    error: Rc<RefCell<Option<CaptureError>>>,
    frame: RgbImage,
    announced: bool,
}

/// Test-side handle to a [`ScriptedSource`]
#[derive(Clone, Default)]
pub struct SourceControl {
    pub clock: Rc<Cell<f64>>,
    pub ready: Rc<Cell<bool>>,
    pub error: Rc<RefCell<Option<CaptureError>>>,
}

impl SourceControl {
    pub fn set_time(&self, ms: f64) {
        self.clock.set(ms);
    }

    /// Deliver the first frame at `ms`
    pub fn deliver(&self, ms: f64) {
        self.clock.set(ms);
        self.ready.set(true);
    }

    pub fn fail(&self, error: CaptureError) {
        *self.error.borrow_mut() = Some(error);
    }

    pub fn source(&self) -> ScriptedSource {
        ScriptedSource {
            clock: Rc::clone(&self.clock),
            ready: Rc::clone(&self.ready),
            error: Rc::clone(&self.error),
            frame: RgbImage::new(64, 48),
            announced: false,
        }
    }
}

impl FrameClock for ScriptedSource {
    fn current_time(&self) -> FrameTimestamp {
        FrameTimestamp::from_millis(self.clock.get())
    }
}

impl VideoSource for ScriptedSource {
    fn poll(&mut self) -> Result<Option<StreamEvent>, CaptureError> {
        if let Some(error) = self.error.borrow_mut().take() {
            return Err(error);
        }
        if self.ready.get() && !self.announced {
            self.announced = true;
            return Ok(Some(StreamEvent::FirstFrame));
        }
        Ok(None)
    }

    fn current_frame(&self) -> Option<&RgbImage> {
        self.ready.get().then_some(&self.frame)
    }
}

/// Hands out scripted sources; counts requests
#[derive(Default)]
pub struct FakeDevices {
    pub control: SourceControl,
    pub requests: Rc<Cell<usize>>,
    pub deny: bool,
}

impl MediaDevices for FakeDevices {
    fn request_stream(&mut self) -> Result<Box<dyn VideoSource>, CaptureError> {
        self.requests.set(self.requests.get() + 1);
        if self.deny {
            return Err(CaptureError::Open {
                index: 0,
                reason: "permission denied".into(),
            });
        }
        Ok(Box::new(self.control.source()))
    }
}

#[derive(Debug, Default)]
pub struct RecordingScheduler {
    pub requests: usize,
    pub pending: bool,
}

impl RecordingScheduler {
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }
}

impl FrameScheduler for RecordingScheduler {
    fn request_frame(&mut self) {
        self.requests += 1;
        self.pending = true;
    }
}
