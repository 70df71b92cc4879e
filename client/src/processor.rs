use facecall_common::frame::Frame;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::assets::OverlayAssetStore;
use crate::camera::{CaptureError, FrameSource};
use crate::filter::{self, FilterKind, FilterSelection};
use crate::locator::FaceLocator;

/// Capture → detect → composite for one frame at a time.
///
/// Owns the single frame source of the process. Shared by the outbound loop
/// and the render tick, each of which pulls its own frames.
pub struct VideoProcessor {
    source: Box<dyn FrameSource>,
    locator: Box<dyn FaceLocator>,
    assets: Arc<OverlayAssetStore>,
    selection: FilterSelection,
    released: bool,
}

impl VideoProcessor {
    pub fn new(
        source: Box<dyn FrameSource>,
        locator: Box<dyn FaceLocator>,
        assets: Arc<OverlayAssetStore>,
        selection: FilterSelection,
    ) -> Self {
        Self {
            source,
            locator,
            assets,
            selection,
            released: false,
        }
    }

    /// Next processed frame, or `None` when the source missed a read or has
    /// been released.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let mut frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(CaptureError::Released) => {
                debug!(source = self.source.name(), "frame source released");
                return None;
            }
            Err(e) => {
                warn!(error = %e, source = self.source.name(), "frame read failed, skipping");
                return None;
            }
        };

        // Read once so the whole frame uses one filter.
        let kind = self.selection.get();
        if kind == FilterKind::None {
            return Some(frame);
        }
        let Some(overlay) = self.assets.get(kind) else {
            return Some(frame);
        };

        let faces = self.locator.detect(&frame);
        for face in &faces {
            filter::apply(&mut frame, face, Some(overlay), kind);
        }
        if !faces.is_empty() {
            debug!(
                seq = frame.seq,
                faces = faces.len(),
                overlay = overlay.name,
                locator = self.locator.name(),
                "overlay applied"
            );
        }
        Some(frame)
    }

    pub fn selection(&self) -> &FilterSelection {
        &self.selection
    }

    pub fn assets(&self) -> &OverlayAssetStore {
        &self.assets
    }

    /// Releases the frame source. Later calls to `next_frame` return `None`.
    pub fn release(&mut self) {
        if !self.released {
            self.source.close();
            self.released = true;
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}
