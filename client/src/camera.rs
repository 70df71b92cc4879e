use facecall_common::config::CameraConfig;
use facecall_common::frame::Frame;
use image::{Rgb, RgbImage};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("frame read failed: {0}")]
    FrameReadFailure(String),
    #[error("frame source already released")]
    Released,
}

/// Produces frames on demand and owns the capture device.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Releases the device. Safe to call more than once.
    fn close(&mut self);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Opens the source selected by `config.backend`.
pub fn open_source(config: &CameraConfig) -> Result<Box<dyn FrameSource>, CaptureError> {
    let source: Box<dyn FrameSource> = match config.backend.as_str() {
        "test_pattern" => Box::new(TestPatternSource::new(config.width, config.height)),
        "device" => open_device(config)?,
        other => {
            return Err(CaptureError::DeviceUnavailable(format!(
                "unknown camera backend {other:?}, expected 'device' or 'test_pattern'"
            )))
        }
    };
    info!(source = source.name(), "frame source opened");
    Ok(source)
}

#[cfg(feature = "camera")]
fn open_device(config: &CameraConfig) -> Result<Box<dyn FrameSource>, CaptureError> {
    Ok(Box::new(device::DeviceCamera::open(config.index)?))
}

#[cfg(not(feature = "camera"))]
fn open_device(_config: &CameraConfig) -> Result<Box<dyn FrameSource>, CaptureError> {
    Err(CaptureError::DeviceUnavailable(
        "built without the `camera` feature".into(),
    ))
}

#[cfg(feature = "camera")]
mod device {
    use super::CaptureError;
    use crossbeam_channel::{bounded, Sender};
    use facecall_common::frame::Frame;
    use image::RgbImage;
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
    use nokhwa::Camera;
    use std::thread::JoinHandle;
    use tracing::{info, warn};

    type Reply = Sender<Result<Frame, CaptureError>>;

    /// Webcam owned by a dedicated `camera-capture` thread.
    ///
    /// The device handle never leaves that thread; frames are requested over
    /// a channel so the source itself can move between threads.
    pub struct DeviceCamera {
        requests: Option<Sender<Reply>>,
        thread: Option<JoinHandle<()>>,
        name: String,
    }

    impl DeviceCamera {
        pub fn open(index: u32) -> Result<Self, CaptureError> {
            let (opened_tx, opened_rx) = bounded::<Result<String, CaptureError>>(1);
            let (request_tx, request_rx) = bounded::<Reply>(1);

            let thread = std::thread::Builder::new()
                .name("camera-capture".to_string())
                .spawn(move || {
                    let mut camera = match open_camera(index) {
                        Ok(camera) => camera,
                        Err(e) => {
                            let _ = opened_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = opened_tx.send(Ok(camera.info().human_name()));

                    let mut seq = 0u64;
                    // Ends when the request sender is dropped by `close`.
                    while let Ok(reply) = request_rx.recv() {
                        let frame = capture(&mut camera, seq);
                        if frame.is_ok() {
                            seq += 1;
                        }
                        let _ = reply.send(frame);
                    }

                    if let Err(e) = camera.stop_stream() {
                        warn!(error = %e, "failed to stop camera stream");
                    }
                    info!("camera released");
                })
                .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

            let name = opened_rx
                .recv()
                .map_err(|_| CaptureError::DeviceUnavailable("capture thread exited".into()))??;
            info!(camera = name, "camera stream open");

            Ok(Self {
                requests: Some(request_tx),
                thread: Some(thread),
                name,
            })
        }
    }

    fn open_camera(index: u32) -> Result<Camera, CaptureError> {
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(index), requested)
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
        camera
            .open_stream()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
        Ok(camera)
    }

    fn capture(camera: &mut Camera, seq: u64) -> Result<Frame, CaptureError> {
        let buffer = camera
            .frame()
            .map_err(|e| CaptureError::FrameReadFailure(e.to_string()))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CaptureError::FrameReadFailure(e.to_string()))?;
        // nokhwa links its own `image` release; move the raw pixels across.
        let (width, height) = (decoded.width(), decoded.height());
        let image = RgbImage::from_raw(width, height, decoded.into_raw()).ok_or_else(|| {
            CaptureError::FrameReadFailure(format!("short buffer for {width}x{height}"))
        })?;
        Ok(Frame::now(image, seq))
    }

    impl super::FrameSource for DeviceCamera {
        fn next_frame(&mut self) -> Result<Frame, CaptureError> {
            let requests = self.requests.as_ref().ok_or(CaptureError::Released)?;
            let (reply_tx, reply_rx) = bounded(1);
            requests
                .send(reply_tx)
                .map_err(|_| CaptureError::FrameReadFailure("capture thread gone".into()))?;
            reply_rx
                .recv()
                .map_err(|_| CaptureError::FrameReadFailure("capture thread gone".into()))?
        }

        fn close(&mut self) {
            self.requests.take();
            if let Some(thread) = self.thread.take() {
                if thread.join().is_err() {
                    warn!("camera thread panicked");
                }
            }
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    impl Drop for DeviceCamera {
        fn drop(&mut self) {
            super::FrameSource::close(self);
        }
    }
}

const PATCH_SKIN: Rgb<u8> = Rgb([224, 172, 140]);

/// Synthetic camera: a gradient backdrop with a skin-toned face patch that
/// drifts left and right. Used for headless runs and tests.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    seq: u64,
    closed: bool,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            seq: 0,
            closed: false,
        }
    }

    /// Top-left corner and size of the face patch in frame `seq`.
    pub fn patch_at(&self, seq: u64) -> (u32, u32, u32, u32) {
        let size = (self.width.min(self.height) / 3).max(1);
        let travel = self.width.saturating_sub(size).max(1) as u64;
        let phase = (seq * 4) % (2 * travel);
        let x = (if phase < travel { phase } else { 2 * travel - phase }) as u32;
        let y = (self.height.saturating_sub(size)) / 2;
        (x.min(self.width.saturating_sub(size)), y, size, size)
    }

    fn render(&self, seq: u64) -> RgbImage {
        let (px, py, pw, ph) = self.patch_at(seq);
        let (w, h) = (self.width.max(1), self.height.max(1));
        RgbImage::from_fn(self.width, self.height, |x, y| {
            if x >= px && x < px + pw && y >= py && y < py + ph {
                PATCH_SKIN
            } else {
                Rgb([
                    (x * 96 / w) as u8 + 20,
                    (y * 96 / h) as u8 + 40,
                    160,
                ])
            }
        })
    }
}

impl FrameSource for TestPatternSource {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.closed {
            return Err(CaptureError::Released);
        }
        let frame = Frame::now(self.render(self.seq), self.seq);
        self.seq += 1;
        Ok(frame)
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn name(&self) -> &str {
        "test-pattern"
    }
}
