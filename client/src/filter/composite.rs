use facecall_common::frame::{FaceBox, Frame};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Pixel, Rgb, RgbImage, Rgba};
use std::ops::Range;

use super::placement::{placement, Geometry};
use super::FilterKind;
use crate::assets::{OverlayAsset, OverlayPixels};

/// Draws `overlay` onto `frame` for one detected face.
///
/// Leaves the frame untouched when the overlay is absent, the filter is
/// `None`, or the scaled overlay has no pixels. Overlay pixels that land
/// outside the frame are skipped.
pub fn apply(frame: &mut Frame, face: &FaceBox, overlay: Option<&OverlayAsset>, kind: FilterKind) {
    let (Some(overlay), Some(rule)) = (overlay, placement(kind)) else {
        return;
    };
    if face.is_empty() {
        return;
    }

    let (overlay_w, overlay_h) = overlay.dimensions();
    let at = rule.resolve(face, overlay_w, overlay_h);
    if at.width == 0 || at.height == 0 {
        return;
    }

    match &overlay.pixels {
        OverlayPixels::Opaque(img) => {
            let scaled = imageops::resize(img, at.width, at.height, FilterType::Triangle);
            composite(&mut frame.image, &scaled, at, |dst, src| *dst = *src);
        }
        OverlayPixels::Masked(img) => {
            let scaled = imageops::resize(img, at.width, at.height, FilterType::Triangle);
            composite(&mut frame.image, &scaled, at, blend);
        }
    }
}

/// `dst = (1 - a) * dst + a * src` with `a = alpha / 255`, rounded.
fn blend(dst: &mut Rgb<u8>, src: &Rgba<u8>) {
    let alpha = src[3] as u32;
    if alpha == 0 {
        return;
    }
    for c in 0..3 {
        let mixed = (dst[c] as u32 * (255 - alpha) + src[c] as u32 * alpha + 127) / 255;
        dst[c] = mixed as u8;
    }
}

/// Overlay-local indices along one axis that land inside `0..frame_len`.
fn visible_span(offset: i64, overlay_len: u32, frame_len: u32) -> Range<u32> {
    let start = (-offset).clamp(0, overlay_len as i64);
    let end = (frame_len as i64 - offset).clamp(0, overlay_len as i64);
    start as u32..end.max(start) as u32
}

fn composite<P>(
    frame: &mut RgbImage,
    overlay: &ImageBuffer<P, Vec<u8>>,
    at: Geometry,
    mut write: impl FnMut(&mut Rgb<u8>, &P),
) where
    P: Pixel<Subpixel = u8>,
{
    let (frame_w, frame_h) = frame.dimensions();
    let cols = visible_span(at.x, overlay.width(), frame_w);
    let rows = visible_span(at.y, overlay.height(), frame_h);

    for oy in rows {
        let ty = (at.y + oy as i64) as u32;
        for ox in cols.clone() {
            let tx = (at.x + ox as i64) as u32;
            write(frame.get_pixel_mut(tx, ty), overlay.get_pixel(ox, oy));
        }
    }
}
