use bytes::Bytes;
use image::RgbImage;

/// A captured or decoded video frame with timestamp metadata.
///
/// The pixel grid is RGB8. A frame is owned by exactly one pipeline stage at a
/// time and is moved, not shared, from capture through compositing to the
/// encoder.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new(image: RgbImage, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            image,
            captured_at_ms,
            seq,
        }
    }

    /// Wrap an image stamped with the current wall-clock time.
    pub fn now(image: RgbImage, seq: u64) -> Self {
        Self::new(image, chrono::Utc::now().timestamp_millis(), seq)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Size of the raw pixel buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.image.as_raw().len()
    }
}

/// Axis-aligned face rectangle in frame pixel coordinates.
///
/// Produced fresh for every frame; there is no identity across frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// One compressed frame exactly as it travels on the wire.
///
/// There is no header: the datagram boundary is the framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket(Bytes);

impl EncodedPacket {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}
