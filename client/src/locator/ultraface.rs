//! UltraFace (RFB-320) face detection through ONNX Runtime.
//!
//! The model takes a 320x240 NCHW frame normalised to `(p - 127) / 128` and
//! scores a fixed grid of SSD-style prior boxes. Boxes above the score
//! threshold are decoded against their priors, overlapping ones are merged by
//! non-maximum suppression, and the survivors are scaled back to the frame.

use facecall_common::frame::{FaceBox, Frame};
use image::imageops::{self, FilterType};

pub const INPUT_WIDTH: u32 = 320;
pub const INPUT_HEIGHT: u32 = 240;

const CENTER_VARIANCE: f32 = 0.1;
const SIZE_VARIANCE: f32 = 0.2;
/// Boxes overlapping a stronger one by more than this are dropped.
const IOU_THRESHOLD: f32 = 0.3;

const STRIDES: [u32; 4] = [8, 16, 32, 64];
/// Prior edge lengths in input pixels, per stride.
const MIN_BOXES: [&[f32]; 4] = [
    &[10.0, 16.0, 24.0],
    &[32.0, 48.0],
    &[64.0, 96.0],
    &[128.0, 192.0, 256.0],
];

/// Prior box, normalised to the model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Anchor {
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
}

/// Decoded detection, normalised corners.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    score: f32,
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x1 - self.x0).max(0.0) * (self.y1 - self.y0).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let w = (self.x1.min(other.x1) - self.x0.max(other.x0)).max(0.0);
        let h = (self.y1.min(other.y1) - self.y0.max(other.y0)).max(0.0);
        let overlap = w * h;
        let union = self.area() + other.area() - overlap;
        if union <= 0.0 {
            0.0
        } else {
            overlap / union
        }
    }
}

fn generate_anchors(width: u32, height: u32) -> Vec<Anchor> {
    let (w, h) = (width as f32, height as f32);
    let mut anchors = Vec::new();
    for (stride, sizes) in STRIDES.iter().zip(MIN_BOXES) {
        let feature_w = width.div_ceil(*stride);
        let feature_h = height.div_ceil(*stride);
        let s = *stride as f32;
        for v in 0..feature_h {
            for u in 0..feature_w {
                let cx = (u as f32 * s + s / 2.0) / w;
                let cy = (v as f32 * s + s / 2.0) / h;
                for &size in sizes {
                    anchors.push(Anchor {
                        cx,
                        cy,
                        w: size / w,
                        h: size / h,
                    });
                }
            }
        }
    }
    anchors
}

/// Resized, channel-planar, normalised model input.
fn to_input(frame: &Frame) -> Vec<f32> {
    let resized = imageops::resize(&frame.image, INPUT_WIDTH, INPUT_HEIGHT, FilterType::Triangle);
    let plane = (INPUT_WIDTH * INPUT_HEIGHT) as usize;
    let mut input = vec![0.0f32; 3 * plane];
    for (i, p) in resized.pixels().enumerate() {
        for c in 0..3 {
            input[c * plane + i] = (p[c] as f32 - 127.0) / 128.0;
        }
    }
    input
}

/// `scores` holds `[background, face]` pairs and `boxes` holds
/// `[cx, cy, w, h]` offsets, one entry per anchor.
fn decode(anchors: &[Anchor], scores: &[f32], boxes: &[f32], threshold: f32) -> Vec<Candidate> {
    anchors
        .iter()
        .zip(scores.chunks_exact(2))
        .zip(boxes.chunks_exact(4))
        .filter(|((_, score), _)| score[1] > threshold)
        .map(|((a, score), offsets)| {
            let cx = offsets[0] * CENTER_VARIANCE * a.w + a.cx;
            let cy = offsets[1] * CENTER_VARIANCE * a.h + a.cy;
            let w = (offsets[2] * SIZE_VARIANCE).exp() * a.w;
            let h = (offsets[3] * SIZE_VARIANCE).exp() * a.h;
            Candidate {
                score: score[1],
                x0: cx - w / 2.0,
                y0: cy - h / 2.0,
                x1: cx + w / 2.0,
                y1: cy + h / 2.0,
            }
        })
        .collect()
}

/// Greedy non-maximum suppression, strongest first.
fn suppress(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= IOU_THRESHOLD) {
            kept.push(candidate);
        }
    }
    kept
}

/// Scales to frame pixels, clips to the frame, largest first.
fn to_faces(candidates: &[Candidate], frame_w: u32, frame_h: u32) -> Vec<FaceBox> {
    let (fw, fh) = (frame_w as f32, frame_h as f32);
    let mut faces = candidates
        .iter()
        .filter_map(|c| {
            let x0 = (c.x0 * fw).clamp(0.0, fw) as u32;
            let y0 = (c.y0 * fh).clamp(0.0, fh) as u32;
            let x1 = (c.x1 * fw).clamp(0.0, fw) as u32;
            let y1 = (c.y1 * fh).clamp(0.0, fh) as u32;
            let face = FaceBox::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0));
            (!face.is_empty()).then_some(face)
        })
        .collect::<Vec<_>>();
    faces.sort_by(|a, b| b.area().cmp(&a.area()));
    faces
}

#[cfg(feature = "face-model")]
pub use model::UltraFaceLocator;

#[cfg(feature = "face-model")]
mod model {
    use super::*;
    use crate::locator::{FaceLocator, LocatorError};
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use ort::value::Tensor;
    use std::path::Path;
    use tracing::{info, warn};

    pub struct UltraFaceLocator {
        session: Session,
        anchors: Vec<Anchor>,
        score_threshold: f32,
    }

    fn unavailable(path: &Path, e: impl std::fmt::Display) -> LocatorError {
        LocatorError::ModelUnavailable(format!("{}: {e}", path.display()))
    }

    impl UltraFaceLocator {
        pub fn open(path: &Path, score_threshold: f32) -> Result<Self, LocatorError> {
            let session = Session::builder()
                .map_err(|e| unavailable(path, e))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| unavailable(path, e))?
                .with_intra_threads(2)
                .map_err(|e| unavailable(path, e))?
                .commit_from_file(path)
                .map_err(|e| unavailable(path, e))?;
            info!(model = %path.display(), score_threshold, "face model loaded");
            Ok(Self {
                session,
                anchors: generate_anchors(INPUT_WIDTH, INPUT_HEIGHT),
                score_threshold,
            })
        }

        fn infer(&mut self, frame: &Frame) -> ort::Result<Vec<FaceBox>> {
            let shape = vec![1_i64, 3, INPUT_HEIGHT as i64, INPUT_WIDTH as i64];
            let input = Tensor::from_array((shape, to_input(frame)))?;
            let outputs = self.session.run(ort::inputs![input])?;
            let (_, scores) = outputs["scores"].try_extract_tensor::<f32>()?;
            let (_, boxes) = outputs["boxes"].try_extract_tensor::<f32>()?;
            let candidates = suppress(decode(&self.anchors, scores, boxes, self.score_threshold));
            Ok(to_faces(&candidates, frame.width(), frame.height()))
        }
    }

    impl FaceLocator for UltraFaceLocator {
        fn detect(&mut self, frame: &Frame) -> Vec<FaceBox> {
            match self.infer(frame) {
                Ok(faces) => faces,
                Err(e) => {
                    warn!(error = %e, "face model inference failed, skipping frame");
                    Vec::new()
                }
            }
        }

        fn name(&self) -> &str {
            "ultraface"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn anchor(cx: f32, cy: f32, w: f32, h: f32) -> Anchor {
        Anchor { cx, cy, w, h }
    }

    fn candidate(score: f32, x0: f32, y0: f32, x1: f32, y1: f32) -> Candidate {
        Candidate {
            score,
            x0,
            y0,
            x1,
            y1,
        }
    }

    #[test]
    fn prior_grid_matches_model_outputs() {
        let anchors = generate_anchors(INPUT_WIDTH, INPUT_HEIGHT);
        assert_eq!(anchors.len(), 4420);
        assert_eq!(
            anchors[0],
            anchor(4.0 / 320.0, 4.0 / 240.0, 10.0 / 320.0, 10.0 / 240.0)
        );
    }

    #[test]
    fn zero_offsets_decode_to_the_prior() {
        let anchors = [anchor(0.5, 0.5, 0.25, 0.25)];
        let found = decode(&anchors, &[0.1, 0.9], &[0.0; 4], 0.7);
        assert_eq!(found, vec![candidate(0.9, 0.375, 0.375, 0.625, 0.625)]);

        let faces = to_faces(&found, 320, 240);
        assert_eq!(faces, vec![FaceBox::new(120, 90, 80, 60)]);
    }

    #[test]
    fn low_scores_are_dropped() {
        let anchors = [anchor(0.5, 0.5, 0.25, 0.25), anchor(0.2, 0.2, 0.1, 0.1)];
        let found = decode(&anchors, &[0.5, 0.5, 0.4, 0.6], &[0.0; 8], 0.7);
        assert!(found.is_empty());
    }

    #[test]
    fn overlapping_boxes_collapse_to_the_strongest() {
        let kept = suppress(vec![
            candidate(0.8, 0.10, 0.10, 0.40, 0.40),
            candidate(0.95, 0.12, 0.12, 0.42, 0.42),
            candidate(0.75, 0.60, 0.60, 0.90, 0.95),
        ]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.95);
        assert_eq!(kept[1].score, 0.75);
    }

    #[test]
    fn faces_are_clipped_and_ordered_by_area() {
        let faces = to_faces(
            &[
                candidate(0.9, 0.5, 0.5, 0.6, 0.6),
                candidate(0.8, -0.1, -0.1, 0.5, 0.5),
                candidate(0.7, 1.2, 1.2, 1.4, 1.4),
            ],
            100,
            100,
        );
        // The off-frame box clips to nothing and is dropped.
        assert_eq!(
            faces,
            vec![FaceBox::new(0, 0, 50, 50), FaceBox::new(50, 50, 10, 10)]
        );
    }

    #[test]
    fn input_is_planar_and_normalised() {
        let image = RgbImage::from_pixel(64, 48, Rgb([127, 127, 127]));
        let input = to_input(&Frame::new(image, 0, 0));
        assert_eq!(input.len(), 3 * 320 * 240);
        assert!(input.iter().all(|v| v.abs() < 0.01));

        let red = to_input(&Frame::new(RgbImage::from_pixel(32, 24, Rgb([255, 0, 127])), 0, 0));
        let plane = 320 * 240;
        assert!((red[0] - 1.0).abs() < 0.01);
        assert!((red[plane] + 127.0 / 128.0).abs() < 0.01);
        assert!(red[2 * plane].abs() < 0.01);
    }
}
