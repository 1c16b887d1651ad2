//! Face blendshape coefficients.
//!
//! The blendshape model takes a fixed subset of 146 face landmarks, as (x, y) in
//! model input pixels, and returns one coefficient per ARKit-style category in the
//! fixed order below. The subset includes the iris, so it needs the 478-point mesh.

use super::onnx::build_session;
use super::types::{BlendScore, Delegate, DetectorError, Landmark};
use ndarray::Array3;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

pub const BLENDSHAPE_NAMES: [&str; 52] = [
    "_neutral",
    "browDownLeft",
    "browDownRight",
    "browInnerUp",
    "browOuterUpLeft",
    "browOuterUpRight",
    "cheekPuff",
    "cheekSquintLeft",
    "cheekSquintRight",
    "eyeBlinkLeft",
    "eyeBlinkRight",
    "eyeLookDownLeft",
    "eyeLookDownRight",
    "eyeLookInLeft",
    "eyeLookInRight",
    "eyeLookOutLeft",
    "eyeLookOutRight",
    "eyeLookUpLeft",
    "eyeLookUpRight",
    "eyeSquintLeft",
    "eyeSquintRight",
    "eyeWideLeft",
    "eyeWideRight",
    "jawForward",
    "jawLeft",
    "jawOpen",
    "jawRight",
    "mouthClose",
    "mouthDimpleLeft",
    "mouthDimpleRight",
    "mouthFrownLeft",
    "mouthFrownRight",
    "mouthFunnel",
    "mouthLeft",
    "mouthLowerDownLeft",
    "mouthLowerDownRight",
    "mouthPressLeft",
    "mouthPressRight",
    "mouthPucker",
    "mouthRight",
    "mouthRollLower",
    "mouthRollUpper",
    "mouthShrugLower",
    "mouthShrugUpper",
    "mouthSmileLeft",
    "mouthSmileRight",
    "mouthStretchLeft",
    "mouthStretchRight",
    "mouthUpperUpLeft",
    "mouthUpperUpRight",
    "noseSneerLeft",
    "noseSneerRight",
];

/// Mesh points fed to the blendshape model, in model input order
#[rustfmt::skip]
pub const BLENDSHAPE_LANDMARKS: [usize; 146] = [
    0, 1, 4, 5, 6, 7, 8, 10, 13, 14, 17, 21, 33, 37, 39,
    40, 46, 52, 53, 54, 55, 58, 61, 63, 65, 66, 67, 70, 78, 80,
    81, 82, 84, 87, 88, 91, 93, 95, 103, 105, 107, 109, 127, 132, 133,
    136, 144, 145, 146, 148, 149, 150, 152, 153, 154, 155, 157, 158, 159, 160,
    161, 162, 163, 168, 172, 173, 176, 178, 181, 185, 191, 195, 197, 234, 246,
    249, 251, 263, 267, 269, 270, 276, 282, 283, 284, 285, 288, 291, 293, 295,
    296, 297, 300, 308, 310, 311, 312, 314, 317, 318, 321, 323, 324, 332, 334,
    336, 338, 356, 361, 362, 365, 373, 374, 375, 377, 378, 379, 380, 381, 382,
    384, 385, 386, 387, 388, 389, 390, 397, 398, 400, 402, 405, 409, 415, 454,
    466, 468, 469, 470, 471, 472, 473, 474, 475, 476, 477,
];

/// `[1, 146, 2]` model input: the subset's (x, y) scaled from normalized coordinates
pub fn blendshape_input(
    landmarks: &[Landmark],
    scale: f32,
) -> Result<Array3<f32>, DetectorError> {
    let required = BLENDSHAPE_LANDMARKS[BLENDSHAPE_LANDMARKS.len() - 1] + 1;
    if landmarks.len() < required {
        return Err(DetectorError::OutputShape(format!(
            "blendshapes need {} face landmarks, got {}",
            required,
            landmarks.len()
        )));
    }

    Ok(Array3::from_shape_fn(
        (1, BLENDSHAPE_LANDMARKS.len(), 2),
        |(_, i, axis)| {
            let landmark = &landmarks[BLENDSHAPE_LANDMARKS[i]];
            let v = if axis == 0 { landmark.x } else { landmark.y };
            v * scale
        },
    ))
}

pub struct BlendshapeModel {
    session: Session,
    /// Edge length of the landmark model input, used to scale normalized points back
    input_size: f32,
}

impl BlendshapeModel {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        delegate: Delegate,
        input_size: u32,
    ) -> Result<Self, DetectorError> {
        let session = build_session(model_path.as_ref(), delegate)?;
        tracing::info!("Blendshape model loaded");
        Ok(Self {
            session,
            input_size: input_size as f32,
        })
    }

    pub fn score(&mut self, landmarks: &[Landmark]) -> Result<Vec<BlendScore>, DetectorError> {
        let _span = tracing::debug_span!("blendshapes").entered();

        let points = blendshape_input(landmarks, self.input_size)?;
        let input = Tensor::from_array(points)
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        require_outputs(outputs.len(), 1)?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::OutputShape(e.to_string()))?;

        scores_from_output(raw)
    }
}

/// Fail with `OutputShape` when a model returned fewer outputs than decoding reads.
pub(crate) fn require_outputs(count: usize, needed: usize) -> Result<(), DetectorError> {
    if count < needed {
        return Err(DetectorError::OutputShape(format!(
            "expected at least {} outputs, got {}",
            needed, count
        )));
    }
    Ok(())
}

/// Name raw model output in its native order, clamped to [0, 1].
pub fn scores_from_output(raw: &[f32]) -> Result<Vec<BlendScore>, DetectorError> {
    if raw.len() != BLENDSHAPE_NAMES.len() {
        return Err(DetectorError::OutputShape(format!(
            "expected {} blendshape scores, got {}",
            BLENDSHAPE_NAMES.len(),
            raw.len()
        )));
    }

    Ok(raw
        .iter()
        .zip(BLENDSHAPE_NAMES)
        .enumerate()
        .map(|(index, (&score, name))| BlendScore {
            index,
            category_name: name.to_string(),
            display_name: None,
            score: score.clamp(0.0, 1.0),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn mesh(count: usize) -> Vec<Landmark> {
        (0..count)
            .map(|i| Landmark::new(i as f32 / 1000.0, 0.5, 0.0))
            .collect()
    }

    #[test]
    fn test_subset_is_sorted_and_unique() {
        assert!(BLENDSHAPE_LANDMARKS.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(BLENDSHAPE_LANDMARKS[145], 477);
    }

    #[test]
    fn test_input_takes_subset_in_order() {
        let input = blendshape_input(&mesh(478), 192.0).unwrap();
        assert_eq!(input.shape(), &[1, 146, 2]);
        // Third subset entry is landmark 4
        assert_relative_eq!(input[[0, 2, 0]], 4.0 / 1000.0 * 192.0, epsilon = 1e-4);
        assert_relative_eq!(input[[0, 2, 1]], 96.0, epsilon = 1e-4);
        assert_relative_eq!(input[[0, 145, 0]], 477.0 / 1000.0 * 192.0, epsilon = 1e-4);
    }

    #[test]
    fn test_input_without_iris_is_rejected() {
        let err = blendshape_input(&mesh(468), 192.0).unwrap_err();
        assert!(matches!(err, DetectorError::OutputShape(_)));
    }

    #[test]
    fn test_missing_outputs_are_an_error() {
        let err = require_outputs(0, 1).unwrap_err();
        assert!(matches!(err, DetectorError::OutputShape(ref m) if m.contains("got 0")));
        assert!(require_outputs(1, 1).is_ok());
        assert!(require_outputs(3, 2).is_ok());
    }

    #[test]
    fn test_scores_keep_native_order() {
        let raw: Vec<f32> = (0..52).map(|i| 1.0 - i as f32 / 52.0).collect();
        let scores = scores_from_output(&raw).unwrap();
        assert_eq!(scores.len(), 52);
        assert_eq!(scores[0].category_name, "_neutral");
        assert_eq!(scores[25].category_name, "jawOpen");
        assert_eq!(scores[51].category_name, "noseSneerRight");
        assert!(scores.iter().enumerate().all(|(i, s)| s.index == i));
    }

    #[test]
    fn test_scores_are_clamped() {
        let mut raw = vec![0.5; 52];
        raw[3] = 1.7;
        raw[4] = -0.2;
        let scores = scores_from_output(&raw).unwrap();
        assert_eq!(scores[3].score, 1.0);
        assert_eq!(scores[4].score, 0.0);
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        let err = scores_from_output(&[0.1; 10]).unwrap_err();
        assert!(matches!(err, DetectorError::OutputShape(_)));
    }
}
