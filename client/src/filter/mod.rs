pub mod composite;
pub mod placement;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

pub use composite::apply;

/// The face filters a user can pick. `None` disables overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FilterKind {
    None = 0,
    Hat = 1,
    Mustache = 2,
    Sunglass = 3,
    FlowerCrown = 4,
    Beard = 5,
    Butterfly = 6,
}

impl FilterKind {
    /// Display order for selection widgets.
    pub const ALL: [FilterKind; 7] = [
        FilterKind::None,
        FilterKind::Hat,
        FilterKind::Mustache,
        FilterKind::Sunglass,
        FilterKind::FlowerCrown,
        FilterKind::Beard,
        FilterKind::Butterfly,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FilterKind::None => "none",
            FilterKind::Hat => "hat",
            FilterKind::Mustache => "mustache",
            FilterKind::Sunglass => "sunglass",
            FilterKind::FlowerCrown => "flower_crown",
            FilterKind::Beard => "beard",
            FilterKind::Butterfly => "butterfly",
        }
    }

    /// Overlay image file loaded for this filter, relative to the asset dir.
    pub fn asset_file(self) -> Option<&'static str> {
        match self {
            FilterKind::None => None,
            FilterKind::Hat => Some("hat.jpg"),
            FilterKind::Mustache => Some("mustache.jpg"),
            FilterKind::Sunglass => Some("sunglass.png"),
            FilterKind::FlowerCrown => Some("flower_crown.png"),
            FilterKind::Beard => Some("beard.png"),
            FilterKind::Butterfly => Some("butterfly.png"),
        }
    }

    fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(FilterKind::None)
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown filter {0:?}")]
pub struct UnknownFilter(pub String);

impl FromStr for FilterKind {
    type Err = UnknownFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownFilter(name.to_string()))
    }
}

/// The currently active filter, shared between the control surface and the
/// frame pipeline.
///
/// Writers and readers never block each other. The pipeline reads the value
/// once per frame, so a change lands on the next processed frame; a write
/// racing a frame in flight may miss that one frame.
#[derive(Debug, Clone, Default)]
pub struct FilterSelection(Arc<AtomicU8>);

impl FilterSelection {
    pub fn new(initial: FilterKind) -> Self {
        Self(Arc::new(AtomicU8::new(initial as u8)))
    }

    pub fn get(&self) -> FilterKind {
        FilterKind::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, kind: FilterKind) {
        self.0.store(kind as u8, Ordering::Release);
    }
}
