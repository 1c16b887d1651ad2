use super::blendshapes::{require_outputs, BlendshapeModel};
use super::preprocess::Preprocessor;
use super::types::{
    Delegate, DetectionResult, DetectorConfig, DetectorError, Handedness, Landmark,
    LandmarkDetector, RunningMode, Subject, Task,
};
use image::RgbImage;
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

fn load_error(path: &Path, reason: impl std::fmt::Display) -> DetectorError {
    DetectorError::ModelLoad {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Build an ONNX Runtime session for `path`, registering CUDA for `Delegate::Gpu`.
pub(crate) fn build_session(path: &Path, delegate: Delegate) -> Result<Session, DetectorError> {
    let mut builder = Session::builder()
        .map_err(|e| load_error(path, e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| load_error(path, e))?
        .with_intra_threads(4)
        .map_err(|e| load_error(path, e))?;

    if delegate == Delegate::Gpu {
        builder = builder
            .with_execution_providers([CUDAExecutionProvider::default().build()])
            .map_err(|e| DetectorError::ExecutionProvider {
                delegate,
                reason: e.to_string(),
            })?;
    }

    builder
        .commit_from_file(path)
        .map_err(|e| load_error(path, e))
}

/// Rejects timestamps that do not move forward, as video-mode inference requires.
#[derive(Debug, Default)]
pub(crate) struct TimestampGuard {
    last: Option<f64>,
}

impl TimestampGuard {
    pub(crate) fn admit(&mut self, timestamp_ms: f64) -> Result<(), DetectorError> {
        if let Some(previous_ms) = self.last {
            if timestamp_ms <= previous_ms {
                return Err(DetectorError::NonMonotonicTimestamp {
                    timestamp_ms,
                    previous_ms,
                });
            }
        }
        self.last = Some(timestamp_ms);
        Ok(())
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Some exports emit logits, some probabilities.
fn as_probability(raw: f32) -> f32 {
    if (0.0..=1.0).contains(&raw) {
        raw
    } else {
        sigmoid(raw)
    }
}

/// Turn raw landmark model outputs into a subject, or `None` if nothing is present.
pub(crate) fn decode_subject(
    task: Task,
    preprocessor: &Preprocessor,
    raw_landmarks: &[f32],
    raw_presence: f32,
    raw_handedness: Option<f32>,
    min_presence: f32,
) -> Result<Option<Subject>, DetectorError> {
    let count = task.landmark_count();
    if raw_landmarks.len() < count * 3 {
        return Err(DetectorError::OutputShape(format!(
            "expected {} landmark values for {} task, got {}",
            count * 3,
            task,
            raw_landmarks.len()
        )));
    }

    let presence = as_probability(raw_presence);
    if presence < min_presence {
        return Ok(None);
    }

    let landmarks = raw_landmarks
        .chunks_exact(3)
        .take(count)
        .map(|p| {
            let (x, y, z) = preprocessor.normalize_point(p[0], p[1], p[2]);
            Landmark::new(x, y, z)
        })
        .collect();

    let mut subject = Subject::new(landmarks);
    subject.presence = presence;
    subject.handedness = raw_handedness.map(|raw| {
        let p = as_probability(raw);
        if p > 0.5 {
            (Handedness::Right, p)
        } else {
            (Handedness::Left, 1.0 - p)
        }
    });
    Ok(Some(subject))
}

/// This backend runs the landmark model on the whole frame, without a region
/// detection stage, so it finds one subject at most.
const MAX_SUBJECTS: usize = 1;

pub(crate) fn validate_config(config: &DetectorConfig) -> Result<(), DetectorError> {
    if config.max_subjects == 0 || config.max_subjects > MAX_SUBJECTS {
        return Err(DetectorError::InvalidConfig(format!(
            "max_subjects must be between 1 and {}, got {}",
            MAX_SUBJECTS, config.max_subjects
        )));
    }
    Ok(())
}

/// Full-frame landmark detector backed by ONNX Runtime. Reports at most one subject.
pub struct OnnxLandmarker {
    session: Session,
    blendshapes: Option<BlendshapeModel>,
    preprocessor: Preprocessor,
    config: DetectorConfig,
    mode: RunningMode,
    timestamps: TimestampGuard,
}

impl OnnxLandmarker {
    pub fn new(config: DetectorConfig) -> Result<Self, DetectorError> {
        validate_config(&config)?;
        let path = config.model_path.as_path();

        tracing::info!("Loading {} landmark model from {}", config.task, path.display());

        let session = build_session(path, config.delegate)?;

        let blendshapes = match (&config.blendshape_model_path, config.output_blend_scores) {
            (Some(bs_path), true) if config.task == Task::Face => Some(BlendshapeModel::new(
                bs_path,
                config.delegate,
                config.task.input_size(),
            )?),
            (None, true) if config.task == Task::Face => {
                tracing::warn!("Blend scores requested but no blendshape model given");
                None
            }
            _ => None,
        };

        tracing::info!("{} landmark model loaded successfully", config.task);

        Ok(Self {
            session,
            blendshapes,
            preprocessor: Preprocessor::square(config.task.input_size()),
            mode: config.running_mode,
            config,
            timestamps: TimestampGuard::default(),
        })
    }

    fn infer(&mut self, frame: &RgbImage) -> Result<Option<Subject>, DetectorError> {
        let input = self.preprocessor.preprocess(frame);
        let input = Tensor::from_array(input).map_err(|e| DetectorError::Inference(e.to_string()))?;

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        // Outputs: landmarks (N*3 in input pixels), presence, optional handedness
        require_outputs(outputs.len(), 2)?;
        let extract = |i: usize| {
            outputs[i]
                .try_extract_tensor::<f32>()
                .map(|(_, data)| data)
                .map_err(|e| DetectorError::OutputShape(e.to_string()))
        };

        let raw_landmarks = extract(0)?;
        let raw_presence = extract(1)?.first().copied().unwrap_or(0.0);
        let raw_handedness = if self.config.task == Task::Hand && outputs.len() > 2 {
            extract(2)?.first().copied()
        } else {
            None
        };

        decode_subject(
            self.config.task,
            &self.preprocessor,
            raw_landmarks,
            raw_presence,
            raw_handedness,
            self.config.min_presence,
        )
    }
}

impl LandmarkDetector for OnnxLandmarker {
    fn running_mode(&self) -> RunningMode {
        self.mode
    }

    fn set_running_mode(&mut self, mode: RunningMode) -> Result<(), DetectorError> {
        if self.mode == RunningMode::Video && mode == RunningMode::Image {
            return Err(DetectorError::ModeSwitch {
                mode,
                reason: "a video-mode detector cannot go back to image mode".into(),
            });
        }
        tracing::info!("Detector running mode: {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        Ok(())
    }

    fn detect_for_video(
        &mut self,
        frame: &RgbImage,
        timestamp_ms: f64,
    ) -> Result<DetectionResult, DetectorError> {
        let _span = tracing::debug_span!("detect_for_video", timestamp_ms).entered();

        if self.mode != RunningMode::Video {
            return Err(DetectorError::WrongMode(self.mode));
        }
        self.timestamps.admit(timestamp_ms)?;

        let mut subjects: Vec<Subject> = self.infer(frame)?.into_iter().collect();
        subjects.truncate(self.config.max_subjects);

        if let Some(model) = self.blendshapes.as_mut() {
            for subject in &mut subjects {
                subject.blend_scores = Some(model.score(&subject.landmarks)?);
            }
        }

        Ok(DetectionResult { subjects })
    }

    fn task(&self) -> Task {
        self.config.task
    }
}
