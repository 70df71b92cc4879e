use image::{RgbImage, RgbaImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::filter::FilterKind;

/// Overlay pixels as loaded from disk. The alpha channel, when present, is the
/// per-pixel opacity mask.
#[derive(Debug, Clone)]
pub enum OverlayPixels {
    Opaque(RgbImage),
    Masked(RgbaImage),
}

/// A named overlay image. Immutable after loading.
#[derive(Debug, Clone)]
pub struct OverlayAsset {
    pub name: &'static str,
    pub pixels: OverlayPixels,
}

impl OverlayAsset {
    pub fn new(name: &'static str, pixels: OverlayPixels) -> Self {
        Self { name, pixels }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match &self.pixels {
            OverlayPixels::Opaque(img) => img.dimensions(),
            OverlayPixels::Masked(img) => img.dimensions(),
        }
    }

    pub fn has_alpha(&self) -> bool {
        matches!(self.pixels, OverlayPixels::Masked(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("failed to load overlay {path}: {source}")]
    Open {
        path: PathBuf,
        source: image::ImageError,
    },
}

fn load_asset(name: &'static str, path: &Path) -> Result<OverlayAsset, AssetError> {
    let img = image::open(path).map_err(|source| AssetError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let pixels = if img.color().has_alpha() {
        OverlayPixels::Masked(img.into_rgba8())
    } else {
        OverlayPixels::Opaque(img.into_rgb8())
    };
    Ok(OverlayAsset::new(name, pixels))
}

/// The fixed set of filter overlays, loaded once at startup.
///
/// A file that is missing or unreadable is logged and left absent; the filter
/// then draws nothing.
#[derive(Debug, Default)]
pub struct OverlayAssetStore {
    assets: HashMap<FilterKind, Arc<OverlayAsset>>,
}

impl OverlayAssetStore {
    pub fn load(dir: &Path) -> Self {
        let mut assets = HashMap::new();
        for kind in FilterKind::ALL {
            let Some(file) = kind.asset_file() else {
                continue;
            };
            match load_asset(kind.name(), &dir.join(file)) {
                Ok(asset) => {
                    let (width, height) = asset.dimensions();
                    info!(
                        filter = asset.name,
                        width,
                        height,
                        alpha = asset.has_alpha(),
                        "loaded overlay"
                    );
                    assets.insert(kind, Arc::new(asset));
                }
                Err(e) => {
                    warn!(error = %e, filter = kind.name(), "overlay unavailable, filter will be a no-op");
                }
            }
        }
        Self { assets }
    }

    pub fn get(&self, kind: FilterKind) -> Option<&OverlayAsset> {
        self.assets.get(&kind).map(Arc::as_ref)
    }

    /// Every selectable filter name, `none` first.
    pub fn names(&self) -> Vec<&'static str> {
        FilterKind::ALL.iter().map(|k| k.name()).collect()
    }

    /// Filters whose overlay actually loaded.
    pub fn available(&self) -> Vec<FilterKind> {
        FilterKind::ALL
            .into_iter()
            .filter(|k| self.assets.contains_key(k))
            .collect()
    }

    #[cfg(test)]
    pub fn with_assets(assets: impl IntoIterator<Item = (FilterKind, OverlayAsset)>) -> Self {
        Self {
            assets: assets
                .into_iter()
                .map(|(kind, asset)| (kind, Arc::new(asset)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};

    #[test]
    fn missing_files_degrade_to_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = OverlayAssetStore::load(dir.path());
        for kind in FilterKind::ALL {
            assert!(store.get(kind).is_none());
        }
        assert!(store.available().is_empty());
        assert_eq!(store.names().len(), FilterKind::ALL.len());
        assert_eq!(store.names()[0], "none");
    }

    #[test]
    fn loads_png_with_alpha_and_jpeg_without() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(8, 4, Rgba([1, 2, 3, 128]))
            .save(dir.path().join("beard.png"))
            .unwrap();
        RgbImage::from_pixel(6, 3, Rgb([200, 10, 10]))
            .save(dir.path().join("hat.jpg"))
            .unwrap();

        let store = OverlayAssetStore::load(dir.path());
        let beard = store.get(FilterKind::Beard).unwrap();
        assert!(beard.has_alpha());
        assert_eq!(beard.dimensions(), (8, 4));
        assert_eq!(beard.name, "beard");

        let hat = store.get(FilterKind::Hat).unwrap();
        assert!(!hat.has_alpha());
        assert_eq!(hat.dimensions(), (6, 3));

        assert_eq!(store.available(), vec![FilterKind::Hat, FilterKind::Beard]);
        assert!(store.get(FilterKind::None).is_none());
    }

    #[test]
    fn unreadable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sunglass.png"), b"not a png").unwrap();
        let store = OverlayAssetStore::load(dir.path());
        assert!(store.get(FilterKind::Sunglass).is_none());
    }
}
