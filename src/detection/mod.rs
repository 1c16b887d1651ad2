mod blendshapes;
mod onnx;
mod preprocess;
pub mod types;

pub use onnx::OnnxLandmarker;
pub use types::{
    BlendScore, Delegate, DetectionResult, DetectorConfig, DetectorError, Handedness, Landmark,
    LandmarkDetector, RunningMode, Subject, Task,
};

/// Create the default landmark detector (ONNX Runtime) for `config`
pub fn create_detector(config: DetectorConfig) -> Result<Box<dyn LandmarkDetector>, DetectorError> {
    let detector = OnnxLandmarker::new(config)?;
    Ok(Box::new(detector))
}
