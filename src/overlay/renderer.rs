use super::canvas::{parse_color, Canvas, DrawStyle};
use super::topology::{
    face_tesselation, Connection, FACE_LEFT_EYE, FACE_OVAL, FACE_RIGHT_EYE, HAND_CONNECTIONS,
};
use crate::detection::{BlendScore, DetectionResult, Task};
use image::Rgba;

/// Draws one detection result onto a canvas.
///
/// Every call starts from a cleared canvas, so nothing from an earlier result can
/// survive a render, including when `result` has no subjects.
pub trait OverlayRenderer {
    fn render(&self, result: &DetectionResult, canvas: &mut dyn Canvas);
}

/// Overlay renderer for a detection task
pub fn renderer_for(task: Task, show_blend_scores: bool) -> Box<dyn OverlayRenderer> {
    match task {
        Task::Face => Box::new(FaceOverlay::new(show_blend_scores)),
        Task::Hand => Box::new(HandOverlay::new()),
    }
}

pub struct FaceOverlay {
    mesh: DrawStyle,
    contours: Vec<(&'static [Connection], DrawStyle)>,
    show_blend_scores: bool,
    bar_color: Rgba<u8>,
    panel_color: Rgba<u8>,
}

impl FaceOverlay {
    pub fn new(show_blend_scores: bool) -> Self {
        Self {
            mesh: DrawStyle::new("#C0C0C070", 1.0),
            contours: vec![
                (FACE_RIGHT_EYE, DrawStyle::new("#FF3030", 1.0)),
                (FACE_LEFT_EYE, DrawStyle::new("#30FF30", 1.0)),
                (FACE_OVAL, DrawStyle::new("#E0E0E0", 1.0)),
            ],
            show_blend_scores,
            bar_color: parse_color("#007F8B").unwrap_or(Rgba([0, 127, 139, 255])),
            panel_color: Rgba([0, 0, 0, 96]),
        }
    }

    /// One bar per score down the left edge, width proportional to the score.
    /// Rows keep the model's order.
    fn draw_blend_scores(&self, scores: &[BlendScore], canvas: &mut dyn Canvas) {
        let (width, height) = canvas.size();
        if scores.is_empty() || width == 0 || height == 0 {
            return;
        }

        let panel_width = width as f32 * 0.25;
        let row_height = (height as f32 / scores.len() as f32).clamp(1.0, 12.0);
        let bar_height = (row_height - 1.0).max(1.0);

        canvas.fill_rect(
            0.0,
            0.0,
            panel_width,
            row_height * scores.len() as f32,
            self.panel_color,
        );
        for (row, score) in scores.iter().enumerate() {
            canvas.fill_rect(
                0.0,
                row as f32 * row_height,
                panel_width * score.score.clamp(0.0, 1.0),
                bar_height,
                self.bar_color,
            );
        }
    }
}

impl OverlayRenderer for FaceOverlay {
    fn render(&self, result: &DetectionResult, canvas: &mut dyn Canvas) {
        canvas.clear();

        for subject in &result.subjects {
            let mesh = face_tesselation(&subject.landmarks);
            canvas.draw_connectors(&subject.landmarks, &mesh, &self.mesh);
            for (connections, style) in &self.contours {
                canvas.draw_connectors(&subject.landmarks, connections, style);
            }
        }

        // Scores of the first face only
        if self.show_blend_scores {
            if let Some(scores) = result
                .subjects
                .first()
                .and_then(|subject| subject.blend_scores.as_deref())
            {
                self.draw_blend_scores(scores, canvas);
            }
        }
    }
}

pub struct HandOverlay {
    connectors: DrawStyle,
    points: DrawStyle,
}

impl HandOverlay {
    pub fn new() -> Self {
        Self {
            connectors: DrawStyle::new("#00FF00", 5.0),
            points: DrawStyle::new("#FF0000", 2.0),
        }
    }
}

impl Default for HandOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayRenderer for HandOverlay {
    fn render(&self, result: &DetectionResult, canvas: &mut dyn Canvas) {
        canvas.clear();

        for subject in &result.subjects {
            canvas.draw_connectors(&subject.landmarks, HAND_CONNECTIONS, &self.connectors);
            canvas.draw_landmarks(&subject.landmarks, &self.points);
        }
    }
}
