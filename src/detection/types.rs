use image::RgbImage;
use std::fmt;
use std::path::PathBuf;

/// Which landmark model a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Task {
    Face,
    Hand,
}

impl Task {
    /// Number of landmarks the model emits per subject
    pub fn landmark_count(self) -> usize {
        match self {
            Task::Face => 478,
            Task::Hand => 21,
        }
    }

    /// Square input edge length the model expects
    pub fn input_size(self) -> u32 {
        match self {
            Task::Face => 192,
            Task::Hand => 224,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Face => f.write_str("face"),
            Task::Hand => f.write_str("hand"),
        }
    }
}

/// Operating mode of a detector.
///
/// Detectors start in `Image` mode and are switched to `Video` once, before the
/// first call to [`LandmarkDetector::detect_for_video`]. There is no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningMode {
    Image,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Delegate {
    Cpu,
    Gpu,
}

impl fmt::Display for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delegate::Cpu => f.write_str("cpu"),
            Delegate::Gpu => f.write_str("gpu"),
        }
    }
}

/// Everything needed to create a detector.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub task: Task,
    pub model_path: PathBuf,
    pub delegate: Delegate,
    pub max_subjects: usize,
    pub output_blend_scores: bool,
    pub blendshape_model_path: Option<PathBuf>,
    pub running_mode: RunningMode,
    /// Subjects below this presence score are dropped
    pub min_presence: f32,
}

impl DetectorConfig {
    pub fn new(task: Task, model_path: impl Into<PathBuf>) -> Self {
        Self {
            task,
            model_path: model_path.into(),
            delegate: Delegate::Gpu,
            max_subjects: 1,
            output_blend_scores: task == Task::Face,
            blendshape_model_path: None,
            running_mode: RunningMode::Image,
            min_presence: 0.5,
        }
    }
}

/// A single normalized landmark. `x` and `y` are in [0, 1] relative to the frame,
/// `z` is depth relative to the subject's reference point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: Option<f32>,
    pub presence: Option<f32>,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            visibility: None,
            presence: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

/// A named expression coefficient in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct BlendScore {
    pub index: usize,
    pub category_name: String,
    pub display_name: Option<String>,
    pub score: f32,
}

impl BlendScore {
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.category_name)
    }
}

/// One detected face or hand.
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub landmarks: Vec<Landmark>,
    pub blend_scores: Option<Vec<BlendScore>>,
    pub handedness: Option<(Handedness, f32)>,
    pub presence: f32,
}

impl Subject {
    pub fn new(landmarks: Vec<Landmark>) -> Self {
        Self {
            landmarks,
            blend_scores: None,
            handedness: None,
            presence: 1.0,
        }
    }
}

/// Output of a single detection call. Lives for exactly one render.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    pub subjects: Vec<Subject>,
}

impl DetectionResult {
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("failed to load model from {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("failed to initialize {delegate:?} execution provider: {reason}")]
    ExecutionProvider { delegate: Delegate, reason: String },

    #[error("failed to switch detector to {mode:?} mode: {reason}")]
    ModeSwitch { mode: RunningMode, reason: String },

    #[error("detect_for_video called while the detector is in {0:?} mode")]
    WrongMode(RunningMode),

    #[error("timestamp {timestamp_ms}ms is not after the previous one ({previous_ms}ms)")]
    NonMonotonicTimestamp { timestamp_ms: f64, previous_ms: f64 },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("unexpected model output: {0}")]
    OutputShape(String),

    #[error("unsupported detector configuration: {0}")]
    InvalidConfig(String),
}

/// A landmark detection capability.
///
/// Implementations own whatever inference state they need; the session holds the
/// only instance and reconfigures it rather than recreating it.
pub trait LandmarkDetector {
    fn running_mode(&self) -> RunningMode;

    /// Reconfigure the operating mode. Returns once the new mode is in effect.
    fn set_running_mode(&mut self, mode: RunningMode) -> Result<(), DetectorError>;

    /// Detect landmarks on one video frame.
    ///
    /// Only valid in [`RunningMode::Video`], and each timestamp must belong to a frame
    /// that has not been submitted before.
    fn detect_for_video(
        &mut self,
        frame: &RgbImage,
        timestamp_ms: f64,
    ) -> Result<DetectionResult, DetectorError>;

    fn task(&self) -> Task;
}
