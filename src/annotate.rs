use crate::capture::{FrameTimestamp, VideoSource};
use crate::detection::{DetectorError, LandmarkDetector, RunningMode};
use crate::mode;
use crate::overlay::{Canvas, OverlayRenderer};
use crate::scheduler::FrameScheduler;
use std::time::{Duration, Instant};

/// Log throughput every this many detections
const STATS_INTERVAL: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// Not started yet
    Idle,
    /// Started, waiting for the detector to confirm video mode
    Priming,
    /// Ticking once per display refresh
    Running,
    /// No tick is scheduled; a restart goes back through `Priming`
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("could not switch the detector to video mode")]
    ModeTransition(#[source] DetectorError),

    #[error("detection failed for frame at {timestamp_ms}ms")]
    Detection {
        timestamp_ms: f64,
        #[source]
        source: DetectorError,
    },

    #[error("detector is in {0:?} mode, expected video mode")]
    NotInVideoMode(RunningMode),
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub detected: bool,
    pub rescheduled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub detections: u64,
    pub skipped: u64,
}

/// Collaborators a tick borrows from the session
pub struct TickContext<'a> {
    pub enabled: bool,
    pub detector: &'a mut dyn LandmarkDetector,
    pub source: &'a dyn VideoSource,
    pub renderer: &'a dyn OverlayRenderer,
    pub canvas: &'a mut dyn Canvas,
    pub scheduler: &'a mut dyn FrameScheduler,
}

/// The frame-annotation loop.
///
/// Each tick resizes the overlay to the source, detects and renders if the source's
/// clock moved since the last detection, and asks the scheduler for another tick while
/// the session is enabled. A frame timestamp is never submitted twice.
pub struct AnnotationLoop {
    phase: LoopPhase,
    last_processed: Option<FrameTimestamp>,
    stats: LoopStats,
    detect_time: Duration,
    render_time: Duration,
}

impl Default for AnnotationLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnotationLoop {
    pub fn new() -> Self {
        Self {
            phase: LoopPhase::Idle,
            last_processed: None,
            stats: LoopStats::default(),
            detect_time: Duration::ZERO,
            render_time: Duration::ZERO,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn last_processed(&self) -> Option<FrameTimestamp> {
        self.last_processed
    }

    pub fn is_running(&self) -> bool {
        self.phase == LoopPhase::Running
    }

    /// End the loop without a tick, e.g. when its source went away
    pub fn stop(&mut self) {
        if matches!(self.phase, LoopPhase::Running | LoopPhase::Priming) {
            tracing::info!("Annotation loop stopped");
            self.phase = LoopPhase::Stopped;
        }
    }

    /// Prime the detector and run the first tick.
    ///
    /// Does nothing if the loop is already running. A mode-switch failure leaves the
    /// loop stopped without a detection or a scheduled tick.
    pub fn start(&mut self, ctx: TickContext<'_>) -> Result<TickOutcome, LoopError> {
        if self.phase == LoopPhase::Running || self.phase == LoopPhase::Priming {
            return Ok(TickOutcome {
                detected: false,
                rescheduled: false,
            });
        }

        tracing::info!("Annotation loop starting");
        self.phase = LoopPhase::Priming;
        if let Err(e) = mode::ensure_video_mode(ctx.detector) {
            self.phase = LoopPhase::Stopped;
            return Err(LoopError::ModeTransition(e));
        }
        self.phase = LoopPhase::Running;

        self.tick(ctx)
    }

    /// Run one scheduled tick. Ticks arriving while the loop is not running are ignored.
    pub fn tick(&mut self, ctx: TickContext<'_>) -> Result<TickOutcome, LoopError> {
        if self.phase != LoopPhase::Running {
            tracing::debug!("Ignoring tick while {:?}", self.phase);
            return Ok(TickOutcome {
                detected: false,
                rescheduled: false,
            });
        }
        let _span = tracing::debug_span!("tick").entered();
        self.stats.ticks += 1;

        let (width, height) = ctx.source.dimensions();
        ctx.canvas.resize(width, height);

        let now = ctx.source.current_time();
        let detected = match ctx.source.current_frame() {
            Some(frame) if self.last_processed != Some(now) => {
                let mode = ctx.detector.running_mode();
                if mode != RunningMode::Video {
                    self.phase = LoopPhase::Stopped;
                    return Err(LoopError::NotInVideoMode(mode));
                }

                // Recorded before detecting so a failed frame is never resubmitted
                self.last_processed = Some(now);

                let detect_start = Instant::now();
                let result = match ctx.detector.detect_for_video(frame, now.as_millis()) {
                    Ok(result) => result,
                    Err(source) => {
                        self.phase = LoopPhase::Stopped;
                        return Err(LoopError::Detection {
                            timestamp_ms: now.as_millis(),
                            source,
                        });
                    }
                };
                self.detect_time += detect_start.elapsed();

                let render_start = Instant::now();
                ctx.renderer.render(&result, ctx.canvas);
                self.render_time += render_start.elapsed();

                self.stats.detections += 1;
                tracing::debug!(
                    "Frame at {:.1}ms: {} subject(s)",
                    now.as_millis(),
                    result.subjects.len()
                );
                self.log_stats();
                true
            }
            _ => {
                self.stats.skipped += 1;
                false
            }
        };

        let rescheduled = if ctx.enabled {
            ctx.scheduler.request_frame();
            true
        } else {
            tracing::info!("Annotation loop stopped");
            self.phase = LoopPhase::Stopped;
            false
        };

        Ok(TickOutcome {
            detected,
            rescheduled,
        })
    }

    fn log_stats(&self) {
        let detections = self.stats.detections;
        if detections % STATS_INTERVAL != 0 {
            return;
        }
        let avg_detect_ms = self.detect_time.as_secs_f64() * 1000.0 / detections as f64;
        let avg_render_ms = self.render_time.as_secs_f64() * 1000.0 / detections as f64;
        tracing::info!(
            "Detection {}: detect={:.1}ms, render={:.1}ms, ticks={}, skipped={}",
            detections,
            avg_detect_ms,
            avg_render_ms,
            self.stats.ticks,
            self.stats.skipped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::DetectionResult;
    use crate::overlay::{HandOverlay, ImageCanvas, RecordingCanvas};
    use crate::testing::{one_hand, FakeDetector, RecordingScheduler, SourceControl};

    struct Harness {
        detector: FakeDetector,
        control: SourceControl,
        source: crate::testing::ScriptedSource,
        renderer: HandOverlay,
        canvas: RecordingCanvas,
        scheduler: RecordingScheduler,
        annotator: AnnotationLoop,
    }

    impl Harness {
        fn new(detector: FakeDetector) -> Self {
            let control = SourceControl::default();
            control.deliver(1.0);
            let source = control.source();
            Self {
                detector,
                control,
                source,
                renderer: HandOverlay::new(),
                canvas: RecordingCanvas::default(),
                scheduler: RecordingScheduler::default(),
                annotator: AnnotationLoop::new(),
            }
        }

        fn ctx(&mut self, enabled: bool) -> TickContext<'_> {
            TickContext {
                enabled,
                detector: &mut self.detector,
                source: &self.source,
                renderer: &self.renderer,
                canvas: &mut self.canvas,
                scheduler: &mut self.scheduler,
            }
        }

        fn start(&mut self) -> Result<TickOutcome, LoopError> {
            let mut annotator = std::mem::take(&mut self.annotator);
            let outcome = annotator.start(self.ctx(true));
            self.annotator = annotator;
            outcome
        }

        fn tick_at(&mut self, ms: f64, enabled: bool) -> Result<TickOutcome, LoopError> {
            self.control.set_time(ms);
            let mut annotator = std::mem::take(&mut self.annotator);
            let outcome = annotator.tick(self.ctx(enabled));
            self.annotator = annotator;
            outcome
        }

        fn clears(&self) -> usize {
            self.canvas.calls.iter().filter(|c| *c == "clear").count()
        }
    }

    #[test]
    fn test_repeated_timestamps_detect_once_each() {
        let detector = FakeDetector::new();
        let log = detector.log.clone();
        let mut h = Harness::new(detector);
        h.control.set_time(0.5);
        h.start().unwrap();

        for t in [0.5, 1.0, 1.0, 1.0, 2.0] {
            h.tick_at(t, true).unwrap();
        }
        assert_eq!(log.borrow().detections, vec![0.5, 1.0, 2.0]);
        assert_eq!(h.annotator.stats().skipped, 3);
    }

    #[test]
    fn test_repeated_timestamp_skips_render() {
        let mut h = Harness::new(FakeDetector::new());
        h.start().unwrap();
        let outcome = h.tick_at(1.0, true).unwrap();
        assert!(!outcome.detected);
        assert!(outcome.rescheduled);
        assert_eq!(h.clears(), 1);
    }

    #[test]
    fn test_mode_switched_once_before_first_detection() {
        let detector = FakeDetector::new();
        let log = detector.log.clone();
        let mut h = Harness::new(detector);
        h.start().unwrap();
        for t in 2..10 {
            h.tick_at(t as f64, true).unwrap();
        }

        let log = log.borrow();
        assert_eq!(log.mode_switches, 1);
        assert!(log.modes_seen.iter().all(|m| *m == RunningMode::Video));
    }

    #[test]
    fn test_resize_runs_every_tick() {
        let mut h = Harness::new(FakeDetector::new());
        h.start().unwrap();
        h.tick_at(1.0, true).unwrap();
        h.tick_at(1.0, true).unwrap();
        let resizes = h
            .canvas
            .calls
            .iter()
            .filter(|c| c.as_str() == "resize 64x48")
            .count();
        assert_eq!(resizes, 3);
    }

    #[test]
    fn test_empty_result_repaints() {
        let detector =
            FakeDetector::new().with_results(vec![one_hand(), DetectionResult::default()]);
        let mut h = Harness::new(detector);
        h.start().unwrap();
        h.tick_at(2.0, true).unwrap();
        assert_eq!(h.clears(), 2);
        assert_eq!(h.canvas.calls.last().map(String::as_str), Some("clear"));
    }

    #[test]
    fn test_empty_result_leaves_no_geometry_on_image_canvas() {
        let detector =
            FakeDetector::new().with_results(vec![one_hand(), DetectionResult::default()]);
        let control = SourceControl::default();
        control.deliver(1.0);
        let source = control.source();
        let mut detector = detector;
        let mut canvas = ImageCanvas::new(1, 1);
        let mut scheduler = RecordingScheduler::default();
        let renderer = HandOverlay::new();
        let mut annotator = AnnotationLoop::new();

        annotator
            .start(TickContext {
                enabled: true,
                detector: &mut detector,
                source: &source,
                renderer: &renderer,
                canvas: &mut canvas,
                scheduler: &mut scheduler,
            })
            .unwrap();
        assert!(!canvas.is_blank());

        control.set_time(2.0);
        annotator
            .tick(TickContext {
                enabled: true,
                detector: &mut detector,
                source: &source,
                renderer: &renderer,
                canvas: &mut canvas,
                scheduler: &mut scheduler,
            })
            .unwrap();
        assert!(canvas.is_blank());
    }

    #[test]
    fn test_disabled_tick_stops_without_rescheduling() {
        let mut h = Harness::new(FakeDetector::new());
        h.start().unwrap();
        assert_eq!(h.scheduler.requests, 1);

        let outcome = h.tick_at(2.0, false).unwrap();
        assert!(outcome.detected);
        assert!(!outcome.rescheduled);
        assert_eq!(h.scheduler.requests, 1);
        assert_eq!(h.annotator.phase(), LoopPhase::Stopped);
    }

    #[test]
    fn test_ticks_after_stop_are_ignored() {
        let detector = FakeDetector::new();
        let log = detector.log.clone();
        let mut h = Harness::new(detector);
        h.start().unwrap();
        h.tick_at(1.0, false).unwrap();

        let outcome = h.tick_at(5.0, true).unwrap();
        assert!(!outcome.detected);
        assert_eq!(log.borrow().detections, vec![1.0]);
    }

    #[test]
    fn test_mode_failure_stops_before_detection() {
        let detector = FakeDetector::new().failing_mode_switch();
        let log = detector.log.clone();
        let mut h = Harness::new(detector);

        let err = h.start().unwrap_err();
        assert!(matches!(err, LoopError::ModeTransition(_)));
        assert_eq!(h.annotator.phase(), LoopPhase::Stopped);
        assert!(log.borrow().detections.is_empty());
        assert_eq!(h.scheduler.requests, 0);
    }

    #[test]
    fn test_detection_failure_is_fatal_and_not_retried() {
        let detector = FakeDetector::new().failing_at(2.0);
        let log = detector.log.clone();
        let mut h = Harness::new(detector);
        h.start().unwrap();

        let err = h.tick_at(2.0, true).unwrap_err();
        assert!(matches!(err, LoopError::Detection { timestamp_ms, .. } if timestamp_ms == 2.0));
        assert_eq!(h.annotator.phase(), LoopPhase::Stopped);
        assert_eq!(h.scheduler.requests, 1);

        // Restarting on the same frame skips it
        h.start().unwrap();
        assert_eq!(log.borrow().detections, vec![1.0, 2.0]);
        assert_eq!(h.annotator.last_processed(), Some(FrameTimestamp::from_millis(2.0)));
    }

    #[test]
    fn test_start_while_running_is_noop() {
        let detector = FakeDetector::new();
        let log = detector.log.clone();
        let mut h = Harness::new(detector);
        h.start().unwrap();
        h.control.set_time(2.0);
        let outcome = h.start().unwrap();
        assert!(!outcome.detected);
        assert_eq!(log.borrow().detections, vec![1.0]);
        assert_eq!(h.scheduler.requests, 1);
    }

    #[test]
    fn test_stop_allows_restart() {
        let detector = FakeDetector::new();
        let log = detector.log.clone();
        let mut h = Harness::new(detector);
        h.start().unwrap();
        h.annotator.stop();
        assert_eq!(h.annotator.phase(), LoopPhase::Stopped);

        // A pending tick after stop does nothing
        assert!(!h.tick_at(2.0, true).unwrap().detected);

        h.control.set_time(3.0);
        h.start().unwrap();
        assert!(h.annotator.is_running());
        assert_eq!(log.borrow().detections, vec![1.0, 3.0]);
        assert_eq!(log.borrow().mode_switches, 1);
    }

    #[test]
    fn test_stop_before_start_stays_idle() {
        let mut annotator = AnnotationLoop::new();
        annotator.stop();
        assert_eq!(annotator.phase(), LoopPhase::Idle);
    }
}
