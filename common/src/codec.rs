use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, ImageReader};
use std::io::Cursor;

use crate::frame::{EncodedPacket, Frame};

/// Largest UDP payload that fits one IPv4 datagram.
///
/// Frames are never fragmented: an encoded frame above this size cannot be
/// delivered.
pub const MAX_DATAGRAM_PAYLOAD: usize = 65_507;

/// JPEG quality used for the outbound stream. Low enough that a 640x480
/// camera frame stays well under [`MAX_DATAGRAM_PAYLOAD`].
pub const DEFAULT_QUALITY: u8 = 30;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode frame: {0}")]
    Encode(String),
    #[error("corrupt packet ({len} bytes): {reason}")]
    CorruptPacket { len: usize, reason: String },
}

/// Compress a frame to baseline JPEG. `quality` is clamped to 1..=100.
pub fn encode(frame: &Frame, quality: u8) -> Result<EncodedPacket, CodecError> {
    let quality = quality.clamp(1, 100);
    // JPEG at these qualities rarely exceeds a quarter of the raw size.
    let mut buf = Vec::with_capacity(frame.byte_len() / 4);
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(&frame.image)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(EncodedPacket::new(buf))
}

/// Parse a received datagram back into a frame.
///
/// The frame is stamped with the time of decoding and `seq` 0; the receiver
/// assigns its own sequence numbers.
pub fn decode(data: &[u8]) -> Result<Frame, CodecError> {
    let corrupt = |reason: String| CodecError::CorruptPacket {
        len: data.len(),
        reason,
    };
    if data.is_empty() {
        return Err(corrupt("empty datagram".into()));
    }
    let image = ImageReader::with_format(Cursor::new(data), ImageFormat::Jpeg)
        .decode()
        .map_err(|e| corrupt(e.to_string()))?
        .into_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(corrupt("zero-sized image".into()));
    }
    Ok(Frame::now(image, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Smooth gradient with a few flat shapes, roughly what a webcam sees.
    fn representative_frame(width: u32, height: u32) -> Frame {
        let image = RgbImage::from_fn(width, height, |x, y| {
            let cx = x as i64 - width as i64 / 2;
            let cy = y as i64 - height as i64 / 2;
            if cx * cx + cy * cy < (height as i64 / 4).pow(2) {
                Rgb([224, 172, 140])
            } else {
                Rgb([
                    (x * 255 / width) as u8,
                    (y * 255 / height) as u8,
                    ((x + y) * 127 / (width + height)) as u8 + 64,
                ])
            }
        });
        Frame::new(image, 1708300000000, 1)
    }

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 2) as u8, (y * 2) as u8, 128])
        });
        Frame::new(image, 1708300000000, 1)
    }

    #[test]
    fn quality_100_is_near_lossless() {
        let frame = gradient_frame(96, 64);
        let packet = encode(&frame, 100).unwrap();
        let decoded = decode(packet.as_bytes()).unwrap();
        assert_eq!(decoded.dimensions(), frame.dimensions());

        let max_err = frame
            .image
            .as_raw()
            .iter()
            .zip(decoded.image.as_raw())
            .map(|(a, b)| (*a as i16 - *b as i16).unsigned_abs())
            .max()
            .unwrap();
        assert!(max_err <= 12, "max per-channel error {max_err}");
    }

    #[test]
    fn low_quality_keeps_dimensions() {
        let frame = representative_frame(320, 240);
        let packet = encode(&frame, DEFAULT_QUALITY).unwrap();
        let decoded = decode(packet.as_bytes()).unwrap();
        assert_eq!(decoded.dimensions(), (320, 240));
    }

    #[test]
    fn default_quality_fits_one_datagram() {
        for (w, h) in [(320, 240), (640, 480), (1280, 720)] {
            let packet = encode(&representative_frame(w, h), DEFAULT_QUALITY).unwrap();
            assert!(
                packet.len() < MAX_DATAGRAM_PAYLOAD,
                "{w}x{h} encoded to {} bytes",
                packet.len()
            );
        }
    }

    #[test]
    fn out_of_range_quality_is_clamped() {
        let frame = gradient_frame(16, 16);
        assert!(encode(&frame, 0).is_ok());
        assert!(encode(&frame, 255).is_ok());
    }

    #[test]
    fn non_jpeg_bytes_are_corrupt() {
        for garbage in [
            &b""[..],
            &b"definitely not a jpeg"[..],
            &[0xFF, 0xD8][..],
            &[0u8; 512][..],
        ] {
            match decode(garbage) {
                Err(CodecError::CorruptPacket { len, .. }) => assert_eq!(len, garbage.len()),
                other => panic!("expected CorruptPacket, got {other:?}"),
            }
        }
    }
}
