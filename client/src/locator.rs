//! Face localisation by skin-chroma segmentation.
//!
//! The frame is sampled on a coarse grid, each cell is classified by its YCbCr
//! chroma, isolated cells are dropped unless enough neighbours agree, and the
//! surviving cells are grouped into 4-connected regions. Regions that are
//! large and solid enough are reported as faces. Every call is independent:
//! there is no tracking or smoothing between frames.
//!
//! With the `face-model` feature, [`open_locator`] can load an
//! UltraFace ONNX model instead.

use facecall_common::config::DetectorConfig;
use facecall_common::frame::{FaceBox, Frame};
use image::Rgb;
use std::ops::RangeInclusive;
use tracing::info;

#[cfg(any(feature = "face-model", test))]
pub mod ultraface;

/// Grid spacing in pixels between sampled cells.
pub const GRID_STEP: u32 = 4;
/// Blue-difference chroma window classified as skin.
const CB_SKIN: RangeInclusive<f32> = 77.0..=127.0;
/// Red-difference chroma window classified as skin.
const CR_SKIN: RangeInclusive<f32> = 133.0..=173.0;
/// A skin cell survives only with at least this many skin cells among its 8
/// neighbours.
pub const MIN_NEIGHBORS: usize = 5;
/// Smallest reported box edge, in pixels.
pub const MIN_FACE_SIZE: u32 = 30;
/// Fraction of a region's bounding box that must be skin.
pub const MIN_FILL_RATIO: f32 = 0.4;

/// Finds face rectangles in a frame.
pub trait FaceLocator: Send {
    /// Returns the faces found, largest first. Empty when there are none.
    fn detect(&mut self, frame: &Frame) -> Vec<FaceBox>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    #[error("unknown face locator {0:?}, expected 'skin' or 'model'")]
    UnknownBackend(String),
    #[error("face model unavailable: {0}")]
    ModelUnavailable(String),
}

/// Builds the locator selected by `config.backend`.
pub fn open_locator(config: &DetectorConfig) -> Result<Box<dyn FaceLocator>, LocatorError> {
    let locator: Box<dyn FaceLocator> = match config.backend.as_str() {
        "skin" => Box::new(SkinRegionLocator::new()),
        "model" => open_model(config)?,
        other => return Err(LocatorError::UnknownBackend(other.to_string())),
    };
    info!(locator = locator.name(), "face locator ready");
    Ok(locator)
}

#[cfg(feature = "face-model")]
fn open_model(config: &DetectorConfig) -> Result<Box<dyn FaceLocator>, LocatorError> {
    Ok(Box::new(ultraface::UltraFaceLocator::open(
        &config.model,
        config.score_threshold,
    )?))
}

#[cfg(not(feature = "face-model"))]
fn open_model(_config: &DetectorConfig) -> Result<Box<dyn FaceLocator>, LocatorError> {
    Err(LocatorError::ModelUnavailable(
        "built without the `face-model` feature".into(),
    ))
}

/// Model-free fallback: skin-chroma segmentation.
#[derive(Debug, Default)]
pub struct SkinRegionLocator;

impl SkinRegionLocator {
    pub fn new() -> Self {
        Self
    }
}

impl FaceLocator for SkinRegionLocator {
    fn detect(&mut self, frame: &Frame) -> Vec<FaceBox> {
        let grid = SkinGrid::sample(frame).with_neighbor_support();
        let (labels, count) = label_components(&grid);
        let mut faces = regions(&grid, &labels, count)
            .into_iter()
            .filter_map(|region| region.to_face(frame.width(), frame.height()))
            .collect::<Vec<_>>();
        faces.sort_by(|a, b| b.area().cmp(&a.area()));
        faces
    }

    fn name(&self) -> &str {
        "skin-region"
    }
}

fn is_skin(p: &Rgb<u8>) -> bool {
    let [r, g, b] = p.0.map(f32::from);
    let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    CB_SKIN.contains(&cb) && CR_SKIN.contains(&cr)
}

struct SkinGrid {
    cells: Vec<bool>,
    width: usize,
    height: usize,
}

impl SkinGrid {
    fn sample(frame: &Frame) -> Self {
        let width = (frame.width() / GRID_STEP) as usize;
        let height = (frame.height() / GRID_STEP) as usize;
        let half = GRID_STEP / 2;
        let mut cells = Vec::with_capacity(width * height);
        for gy in 0..height as u32 {
            for gx in 0..width as u32 {
                let p = frame.image.get_pixel(gx * GRID_STEP + half, gy * GRID_STEP + half);
                cells.push(is_skin(p));
            }
        }
        Self {
            cells,
            width,
            height,
        }
    }

    fn at(&self, x: isize, y: isize) -> bool {
        if x < 0 || y < 0 || x >= self.width as isize || y >= self.height as isize {
            return false;
        }
        self.cells[y as usize * self.width + x as usize]
    }

    fn with_neighbor_support(self) -> Self {
        let mut cells = vec![false; self.cells.len()];
        for y in 0..self.height {
            for x in 0..self.width {
                if !self.cells[y * self.width + x] {
                    continue;
                }
                let (cx, cy) = (x as isize, y as isize);
                let neighbors = (-1..=1)
                    .flat_map(|dy| (-1..=1).map(move |dx| (dx, dy)))
                    .filter(|&(dx, dy)| (dx, dy) != (0, 0) && self.at(cx + dx, cy + dy))
                    .count();
                cells[y * self.width + x] = neighbors >= MIN_NEIGHBORS;
            }
        }
        Self { cells, ..self }
    }
}

fn find_root(parents: &mut [usize], label: usize) -> usize {
    let mut current = label;
    while current != parents[current] {
        parents[current] = parents[parents[current]];
        current = parents[current];
    }
    current
}

fn union_labels(parents: &mut [usize], a: usize, b: usize) -> usize {
    let root_a = find_root(parents, a);
    let root_b = find_root(parents, b);
    if root_a < root_b {
        parents[root_b] = root_a;
        root_a
    } else {
        parents[root_a] = root_b;
        root_b
    }
}

/// Two-pass 4-connected labelling. Label 0 is background; regions are
/// numbered `1..=count`.
fn label_components(grid: &SkinGrid) -> (Vec<usize>, usize) {
    let mut labels = vec![0usize; grid.cells.len()];
    let mut parents = vec![0usize];

    for y in 0..grid.height {
        for x in 0..grid.width {
            let idx = y * grid.width + x;
            if !grid.cells[idx] {
                continue;
            }
            let left = if x > 0 { labels[idx - 1] } else { 0 };
            let up = if y > 0 { labels[idx - grid.width] } else { 0 };
            labels[idx] = match (left, up) {
                (0, 0) => {
                    let next = parents.len();
                    parents.push(next);
                    next
                }
                (l, 0) => l,
                (0, u) => u,
                (l, u) => union_labels(&mut parents, l, u),
            };
        }
    }

    // Compact roots to consecutive labels.
    let mut remap = vec![0usize; parents.len()];
    let mut count = 0;
    for label in 1..parents.len() {
        let root = find_root(&mut parents, label);
        if remap[root] == 0 {
            count += 1;
            remap[root] = count;
        }
        remap[label] = remap[root];
    }
    for label in labels.iter_mut().filter(|l| **l != 0) {
        *label = remap[*label];
    }
    (labels, count)
}

#[derive(Debug, Clone, Copy)]
struct Region {
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
    cells: usize,
}

impl Region {
    fn to_face(self, frame_w: u32, frame_h: u32) -> Option<FaceBox> {
        let span_x = self.max_x - self.min_x + 1;
        let span_y = self.max_y - self.min_y + 1;
        let fill = self.cells as f32 / (span_x * span_y) as f32;

        let x = self.min_x as u32 * GRID_STEP;
        let y = self.min_y as u32 * GRID_STEP;
        let width = (span_x as u32 * GRID_STEP).min(frame_w - x);
        let height = (span_y as u32 * GRID_STEP).min(frame_h - y);

        if width < MIN_FACE_SIZE || height < MIN_FACE_SIZE || fill < MIN_FILL_RATIO {
            return None;
        }
        Some(FaceBox::new(x, y, width, height))
    }
}

fn regions(grid: &SkinGrid, labels: &[usize], count: usize) -> Vec<Region> {
    let mut regions: Vec<Option<Region>> = vec![None; count + 1];
    for (idx, &label) in labels.iter().enumerate() {
        if label == 0 {
            continue;
        }
        let (x, y) = (idx % grid.width, idx / grid.width);
        let region = regions[label].get_or_insert(Region {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            cells: 0,
        });
        region.min_x = region.min_x.min(x);
        region.min_y = region.min_y.min(y);
        region.max_x = region.max_x.max(x);
        region.max_y = region.max_y.max(y);
        region.cells += 1;
    }
    regions.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    const SKIN: Rgb<u8> = Rgb([224, 172, 140]);
    const BACKDROP: Rgb<u8> = Rgb([40, 60, 160]);

    fn detector(backend: &str) -> DetectorConfig {
        DetectorConfig {
            backend: backend.into(),
            ..DetectorConfig::default()
        }
    }

    #[test]
    fn open_locator_picks_backend() {
        let locator = open_locator(&detector("skin")).unwrap();
        assert_eq!(locator.name(), "skin-region");
        assert!(matches!(
            open_locator(&detector("haar")),
            Err(LocatorError::UnknownBackend(name)) if name == "haar"
        ));
    }

    #[cfg(not(feature = "face-model"))]
    #[test]
    fn model_backend_needs_face_model_feature() {
        assert!(matches!(
            open_locator(&detector("model")),
            Err(LocatorError::ModelUnavailable(_))
        ));
    }

    fn frame_with_patches(width: u32, height: u32, patches: &[(u32, u32, u32, u32)]) -> Frame {
        let mut image = RgbImage::from_pixel(width, height, BACKDROP);
        for &(px, py, pw, ph) in patches {
            for y in py..(py + ph).min(height) {
                for x in px..(px + pw).min(width) {
                    image.put_pixel(x, y, SKIN);
                }
            }
        }
        Frame::new(image, 0, 0)
    }

    #[test]
    fn skin_classifier() {
        assert!(is_skin(&SKIN));
        assert!(is_skin(&Rgb([198, 134, 66])));
        assert!(!is_skin(&BACKDROP));
        assert!(!is_skin(&Rgb([128, 128, 128])));
        assert!(!is_skin(&Rgb([0, 255, 0])));
    }

    #[test]
    fn finds_single_face() {
        let frame = frame_with_patches(320, 240, &[(100, 60, 80, 100)]);
        let faces = SkinRegionLocator::new().detect(&frame);
        assert_eq!(faces.len(), 1);
        let face = faces[0];
        assert!(face.x.abs_diff(100) <= GRID_STEP, "{face:?}");
        assert!(face.y.abs_diff(60) <= GRID_STEP, "{face:?}");
        assert!(face.width.abs_diff(80) <= GRID_STEP, "{face:?}");
        assert!(face.height.abs_diff(100) <= GRID_STEP, "{face:?}");
    }

    #[test]
    fn orders_multiple_faces_largest_first() {
        let frame = frame_with_patches(400, 300, &[(20, 20, 40, 50), (200, 100, 120, 150)]);
        let faces = SkinRegionLocator::new().detect(&frame);
        assert_eq!(faces.len(), 2);
        assert!(faces[0].area() > faces[1].area());
        assert!(faces[0].x >= 196);
        assert!(faces[1].x <= 24);
    }

    #[test]
    fn ignores_small_and_empty_frames() {
        let mut locator = SkinRegionLocator::new();
        assert!(locator.detect(&frame_with_patches(320, 240, &[])).is_empty());
        assert!(locator
            .detect(&frame_with_patches(320, 240, &[(50, 50, 20, 20)]))
            .is_empty());
        assert!(locator.detect(&frame_with_patches(2, 2, &[])).is_empty());
    }

    #[test]
    fn scattered_skin_pixels_lack_neighbor_support() {
        let mut image = RgbImage::from_pixel(320, 240, BACKDROP);
        for y in (0..240).step_by(8) {
            for x in (0..320).step_by(8) {
                for dy in 0..4 {
                    for dx in 0..4 {
                        image.put_pixel(x + dx, y + dy, SKIN);
                    }
                }
            }
        }
        let faces = SkinRegionLocator::new().detect(&Frame::new(image, 0, 0));
        assert!(faces.is_empty(), "{faces:?}");
    }

    #[test]
    fn touching_edges_are_clipped_to_frame() {
        let frame = frame_with_patches(322, 242, &[(250, 170, 72, 72)]);
        let faces = SkinRegionLocator::new().detect(&frame);
        assert_eq!(faces.len(), 1);
        let face = faces[0];
        assert!(face.x + face.width <= 322);
        assert!(face.y + face.height <= 242);
    }

    #[test]
    fn labelling_merges_u_shapes() {
        // Two vertical bars joined at the bottom form one region.
        let grid = SkinGrid {
            cells: vec![
                true, false, true, //
                true, false, true, //
                true, true, true,
            ],
            width: 3,
            height: 3,
        };
        let (labels, count) = label_components(&grid);
        assert_eq!(count, 1);
        assert!(labels.iter().all(|&l| l <= 1));
    }
}
