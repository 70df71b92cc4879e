//! Where each filter lands relative to a face box.
//!
//! Every filter kind maps to one [`Placement`] row in [`PLACEMENTS`]. Adding a
//! filter means adding a row; the compositor has no per-filter branches.

use facecall_common::frame::FaceBox;

use super::FilterKind;

/// Vertical anchor of the overlay's top edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerticalAnchor {
    /// `y + h * f`: a fraction of the face height below the face top.
    Face(f64),
    /// `y - overlay_h * f`: raised above the face top by a fraction of the
    /// scaled overlay's own height.
    Raise(f64),
}

/// One row of the placement table. All fractions are of the face box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Horizontal offset from the face's left edge, as a fraction of width.
    pub x: f64,
    pub y: VerticalAnchor,
    /// Drawn region `(width, height)` as fractions of the face box. `None`
    /// draws the overlay scaled to the face width with its aspect kept.
    pub region: Option<(f64, f64)>,
}

const ABOVE_CENTERED: Placement = Placement {
    x: 0.0,
    y: VerticalAnchor::Raise(0.5),
    region: None,
};

const CROWN: Placement = Placement {
    x: -0.1,
    y: VerticalAnchor::Face(-0.2),
    region: Some((1.2, 0.4)),
};

// flower_crown and butterfly share a row.
pub const PLACEMENTS: &[(FilterKind, Placement)] = &[
    (FilterKind::Hat, ABOVE_CENTERED),
    (
        FilterKind::Sunglass,
        Placement {
            x: 0.0,
            y: VerticalAnchor::Face(0.25),
            region: Some((1.0, 0.25)),
        },
    ),
    (
        FilterKind::Mustache,
        Placement {
            x: 0.25,
            y: VerticalAnchor::Face(1.0 / 1.5),
            region: Some((0.5, 1.0 / 6.0)),
        },
    ),
    (FilterKind::FlowerCrown, CROWN),
    (FilterKind::Butterfly, CROWN),
    (
        FilterKind::Beard,
        Placement {
            x: 0.25,
            y: VerticalAnchor::Face(0.75),
            region: Some((0.5, 0.3)),
        },
    ),
];

/// Looks up the row for `kind`. `None` has no placement.
pub fn placement(kind: FilterKind) -> Option<Placement> {
    PLACEMENTS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, p)| *p)
}

/// Resolved geometry for one overlay on one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Top-left corner in frame coordinates. `x` may be negative; `y` is
    /// clamped to the frame's top edge.
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

// Truncates toward zero like the integer conversions the offsets were tuned with.
fn frac(value: u32, f: f64) -> i64 {
    (value as f64 * f) as i64
}

impl Placement {
    /// Size of the overlay once scaled for `face`.
    pub fn scaled_size(&self, face: &FaceBox, overlay_w: u32, overlay_h: u32) -> (u32, u32) {
        match self.region {
            Some((fw, fh)) => (
                frac(face.width, fw).max(0) as u32,
                frac(face.height, fh).max(0) as u32,
            ),
            None => {
                if overlay_w == 0 {
                    return (0, 0);
                }
                let scale = face.width as f64 / overlay_w as f64;
                (face.width, (overlay_h as f64 * scale) as u32)
            }
        }
    }

    /// Full placement geometry for an overlay of `overlay_w` x `overlay_h`.
    pub fn resolve(&self, face: &FaceBox, overlay_w: u32, overlay_h: u32) -> Geometry {
        let (width, height) = self.scaled_size(face, overlay_w, overlay_h);
        let x = face.x as i64 + frac(face.width, self.x);
        let y = match self.y {
            VerticalAnchor::Face(f) => face.y as i64 + frac(face.height, f),
            VerticalAnchor::Raise(f) => face.y as i64 - frac(height, f),
        };
        Geometry {
            x,
            y: y.max(0),
            width,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_filter_but_none_has_a_row() {
        for kind in FilterKind::ALL {
            assert_eq!(placement(kind).is_some(), kind != FilterKind::None, "{kind}");
        }
    }

    #[test]
    fn mustache_sits_on_lower_third() {
        let face = FaceBox::new(100, 100, 200, 200);
        let geometry = placement(FilterKind::Mustache)
            .unwrap()
            .resolve(&face, 400, 120);
        assert_eq!(
            geometry,
            Geometry {
                x: 150,
                y: 233,
                width: 100,
                height: 33
            }
        );
    }

    #[test]
    fn hat_is_raised_by_half_its_height() {
        let face = FaceBox::new(100, 100, 200, 200);
        // 400x200 overlay scales to 200x100 and is raised by 50.
        let geometry = placement(FilterKind::Hat).unwrap().resolve(&face, 400, 200);
        assert_eq!(
            geometry,
            Geometry {
                x: 100,
                y: 50,
                width: 200,
                height: 100
            }
        );
    }

    #[test]
    fn vertical_offset_never_goes_above_frame() {
        let face = FaceBox::new(5, 10, 100, 100);
        let geometry = placement(FilterKind::FlowerCrown)
            .unwrap()
            .resolve(&face, 50, 50);
        assert_eq!(geometry.y, 0);
        // Horizontal offset is not clamped.
        assert_eq!(geometry.x, -5);
        assert_eq!((geometry.width, geometry.height), (120, 40));
    }

    #[test]
    fn crown_and_butterfly_share_geometry() {
        let face = FaceBox::new(80, 120, 150, 180);
        assert_eq!(
            placement(FilterKind::FlowerCrown).unwrap().resolve(&face, 64, 32),
            placement(FilterKind::Butterfly).unwrap().resolve(&face, 64, 32)
        );
    }

    #[test]
    fn sunglasses_cover_the_eye_band() {
        let face = FaceBox::new(100, 100, 200, 200);
        let geometry = placement(FilterKind::Sunglass)
            .unwrap()
            .resolve(&face, 300, 100);
        assert_eq!(
            geometry,
            Geometry {
                x: 100,
                y: 150,
                width: 200,
                height: 50
            }
        );
        // Inside the face box, unlike the hat.
        assert!(geometry.y >= face.y as i64);
        assert!(geometry.y + geometry.height as i64 <= (face.y + face.height) as i64);
    }

    #[test]
    fn beard_geometry() {
        let face = FaceBox::new(100, 100, 200, 200);
        let geometry = placement(FilterKind::Beard).unwrap().resolve(&face, 10, 10);
        assert_eq!(
            geometry,
            Geometry {
                x: 150,
                y: 250,
                width: 100,
                height: 60
            }
        );
    }

    #[test]
    fn zero_width_overlay_scales_to_nothing() {
        let face = FaceBox::new(0, 0, 100, 100);
        assert_eq!(placement(FilterKind::Hat).unwrap().scaled_size(&face, 0, 10), (0, 0));
    }
}
