use crate::detection::{DetectorError, LandmarkDetector, RunningMode};

/// Switches a detector into video mode before it is first used on the stream.
///
/// Checks the detector's own mode flag; only the first call on a still-image detector
/// reconfigures it.
pub fn ensure_video_mode(detector: &mut dyn LandmarkDetector) -> Result<(), DetectorError> {
    if detector.running_mode() == RunningMode::Video {
        return Ok(());
    }

    tracing::info!("Switching {} detector to video mode", detector.task());
    detector.set_running_mode(RunningMode::Video)?;

    // Reported success without the mode taking effect
    if detector.running_mode() != RunningMode::Video {
        return Err(DetectorError::ModeSwitch {
            mode: RunningMode::Video,
            reason: format!("detector still reports {:?}", detector.running_mode()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{DetectionResult, Task};
    use image::RgbImage;

    struct ModeOnly {
        mode: RunningMode,
        switches: usize,
        fail: bool,
        ignore: bool,
    }

    impl ModeOnly {
        fn new() -> Self {
            Self {
                mode: RunningMode::Image,
                switches: 0,
                fail: false,
                ignore: false,
            }
        }
    }

    impl LandmarkDetector for ModeOnly {
        fn running_mode(&self) -> RunningMode {
            self.mode
        }

        fn set_running_mode(&mut self, mode: RunningMode) -> Result<(), DetectorError> {
            self.switches += 1;
            if self.fail {
                return Err(DetectorError::ModeSwitch {
                    mode,
                    reason: "graph rebuild failed".into(),
                });
            }
            if !self.ignore {
                self.mode = mode;
            }
            Ok(())
        }

        fn detect_for_video(
            &mut self,
            _frame: &RgbImage,
            _timestamp_ms: f64,
        ) -> Result<DetectionResult, DetectorError> {
            Ok(DetectionResult::default())
        }

        fn task(&self) -> Task {
            Task::Face
        }
    }

    #[test]
    fn test_switches_once() {
        let mut detector = ModeOnly::new();
        for _ in 0..5 {
            ensure_video_mode(&mut detector).unwrap();
        }
        assert_eq!(detector.switches, 1);
        assert_eq!(detector.mode, RunningMode::Video);
    }

    #[test]
    fn test_already_video_is_noop() {
        let mut detector = ModeOnly::new();
        detector.mode = RunningMode::Video;
        ensure_video_mode(&mut detector).unwrap();
        assert_eq!(detector.switches, 0);
    }

    #[test]
    fn test_failure_propagates() {
        let mut detector = ModeOnly::new();
        detector.fail = true;
        let err = ensure_video_mode(&mut detector).unwrap_err();
        assert!(matches!(err, DetectorError::ModeSwitch { .. }));
        assert_eq!(detector.mode, RunningMode::Image);
    }

    #[test]
    fn test_silent_noop_switch_is_failure() {
        let mut detector = ModeOnly::new();
        detector.ignore = true;
        assert!(ensure_video_mode(&mut detector).is_err());
    }
}
