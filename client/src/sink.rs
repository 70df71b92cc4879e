use facecall_common::codec;
use facecall_common::frame::Frame;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Where the render tick delivers frames. A windowing front end implements
/// this with its two video panes.
pub trait FrameSink {
    fn show_local(&mut self, frame: &Frame);
    fn show_remote(&mut self, frame: &Frame);
}

const LOG_EVERY: u64 = 100;
const SNAPSHOT_QUALITY: u8 = 90;

/// Display stand-in for headless runs: counts frames and optionally writes
/// periodic JPEG snapshots of both panes.
pub struct HeadlessSink {
    local_shown: u64,
    remote_shown: u64,
    last_remote_seq: Option<u64>,
    snapshot_dir: Option<PathBuf>,
    snapshot_every: u64,
}

impl HeadlessSink {
    pub fn new(snapshot_dir: Option<PathBuf>, snapshot_every: u64) -> Self {
        if let Some(dir) = &snapshot_dir {
            info!(dir = %dir.display(), every = snapshot_every, "writing snapshots");
        }
        Self {
            local_shown: 0,
            remote_shown: 0,
            last_remote_seq: None,
            snapshot_dir,
            snapshot_every: snapshot_every.max(1),
        }
    }

    pub fn local_shown(&self) -> u64 {
        self.local_shown
    }

    pub fn remote_shown(&self) -> u64 {
        self.remote_shown
    }

    fn snapshot(&self, pane: &str, frame: &Frame, count: u64) {
        let Some(dir) = &self.snapshot_dir else {
            return;
        };
        if count % self.snapshot_every != 0 {
            return;
        }
        let path = dir.join(format!("{pane}.jpg"));
        let result = codec::encode(frame, SNAPSHOT_QUALITY)
            .map_err(|e| e.to_string())
            .and_then(|packet| std::fs::write(&path, packet.as_bytes()).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!(error = %e, path = %path.display(), "failed to write snapshot");
        }
    }
}

impl FrameSink for HeadlessSink {
    fn show_local(&mut self, frame: &Frame) {
        self.local_shown += 1;
        if self.local_shown % LOG_EVERY == 0 {
            debug!(total = self.local_shown, "local frames shown");
        }
        self.snapshot("local", frame, self.local_shown);
    }

    fn show_remote(&mut self, frame: &Frame) {
        // The render tick re-shows the last remote frame until a new one lands.
        if self.last_remote_seq == Some(frame.seq) {
            return;
        }
        self.last_remote_seq = Some(frame.seq);
        self.remote_shown += 1;
        if self.remote_shown % LOG_EVERY == 0 {
            debug!(total = self.remote_shown, "remote frames shown");
        }
        self.snapshot("remote", frame, self.remote_shown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn repeated_remote_frame_counts_once() {
        let mut sink = HeadlessSink::new(None, 1);
        let frame = Frame::new(RgbImage::new(8, 8), 0, 3);
        sink.show_remote(&frame);
        sink.show_remote(&frame);
        sink.show_local(&frame);
        assert_eq!(sink.remote_shown(), 1);
        assert_eq!(sink.local_shown(), 1);
    }

    #[test]
    fn writes_snapshots_on_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = HeadlessSink::new(Some(dir.path().to_path_buf()), 2);
        let frame = Frame::new(RgbImage::new(8, 8), 0, 0);
        sink.show_local(&frame);
        assert!(!dir.path().join("local.jpg").exists());
        sink.show_local(&frame);
        let bytes = std::fs::read(dir.path().join("local.jpg")).unwrap();
        assert_eq!(codec::decode(&bytes).unwrap().dimensions(), (8, 8));
    }
}
