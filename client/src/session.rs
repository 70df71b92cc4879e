use facecall_common::codec::{self, MAX_DATAGRAM_PAYLOAD};
use facecall_common::frame::Frame;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::filter::{FilterKind, FilterSelection};
use crate::processor::VideoProcessor;
use crate::sink::FrameSink;
use crate::slot::LatestFrame;
use crate::transport::{DatagramReceiver, TransportError, UdpTransport};

/// Back-off after a camera read miss or a socket error before trying again.
const RETRY_BACKOFF: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub quality: u8,
    pub shutdown_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            quality: codec::DEFAULT_QUALITY,
            shutdown_timeout: Duration::from_secs(1),
        }
    }
}

/// Frames produced by one render tick.
#[derive(Debug, Default)]
pub struct RenderFrames {
    pub local: Option<Frame>,
    pub remote: Option<Arc<Frame>>,
}

/// A live call: an outbound send loop, an inbound receive loop, and the
/// render tick driven by the caller.
///
/// The session is live as soon as it starts; there is no handshake.
pub struct Session {
    processor: Arc<Mutex<VideoProcessor>>,
    selection: FilterSelection,
    filter_names: Vec<&'static str>,
    remote: Arc<LatestFrame>,
    transport: Arc<UdpTransport>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    settings: SessionSettings,
}

impl Session {
    /// Spawns the send and receive loops. Must be called inside a tokio
    /// runtime.
    pub fn start(
        processor: VideoProcessor,
        transport: UdpTransport,
        settings: SessionSettings,
    ) -> Self {
        let selection = processor.selection().clone();
        let filter_names = processor.assets().names();
        let processor = Arc::new(Mutex::new(processor));
        let transport = Arc::new(transport);
        let remote = Arc::new(LatestFrame::new());
        let (shutdown, _) = watch::channel(false);

        let outbound = tokio::spawn(run_outbound(
            Arc::clone(&processor),
            Arc::clone(&transport),
            settings.quality,
            shutdown.subscribe(),
        ));
        let inbound = tokio::spawn(run_inbound(Arc::clone(&transport), Arc::clone(&remote)));

        info!(peer = %transport.peer(), quality = settings.quality, "session started");

        Self {
            processor,
            selection,
            filter_names,
            remote,
            transport,
            shutdown,
            tasks: vec![("outbound", outbound), ("inbound", inbound)],
            settings,
        }
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown.borrow()
    }

    /// A receiver that flips to `true` when the session stops.
    pub fn stopped(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn filter(&self) -> FilterKind {
        self.selection.get()
    }

    /// Takes effect on the next processed frame.
    pub fn set_filter(&self, kind: FilterKind) {
        info!(filter = %kind, "filter selected");
        self.selection.set(kind);
    }

    /// Selects a filter by name. Unknown names are ignored and return `false`.
    pub fn set_filter_by_name(&self, name: &str) -> bool {
        match name.parse::<FilterKind>() {
            Ok(kind) => {
                self.set_filter(kind);
                true
            }
            Err(e) => {
                debug!(error = %e, "ignoring filter selection");
                false
            }
        }
    }

    pub fn filter_names(&self) -> &[&'static str] {
        &self.filter_names
    }

    pub fn remote(&self) -> &LatestFrame {
        &self.remote
    }

    /// Local preview capture plus the newest remote frame.
    ///
    /// The local frame comes from its own capture, not the one just sent.
    /// This runs capture and detection synchronously, so a slow detection
    /// pass delays the caller.
    pub fn render_tick(&self) -> RenderFrames {
        if !self.is_running() {
            return RenderFrames::default();
        }
        RenderFrames {
            local: self.processor.lock().next_frame(),
            remote: self.remote.latest(),
        }
    }

    /// Signals both loops, releases the camera, closes the transport, then
    /// waits up to the shutdown timeout for each loop before aborting it.
    /// A camera read that never returns delays none of these steps beyond
    /// the timeout. Calling it again is a no-op.
    pub async fn stop(&mut self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        info!("stopping session");

        let camera_released = self.release_camera().await;
        self.transport.close();

        for (name, handle) in self.tasks.drain(..) {
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.settings.shutdown_timeout, handle).await {
                Ok(Ok(())) => debug!(task = name, "task finished"),
                Ok(Err(e)) => error!(task = name, error = %e, "task failed"),
                Err(_) => {
                    warn!(task = name, "task did not stop in time, aborting");
                    abort.abort();
                }
            }
        }
        self.remote.take();
        info!(
            remote_frames = self.remote.published(),
            remote_dropped = self.remote.overwritten(),
            camera_released,
            "session stopped"
        );
    }

    /// Releases the frame source unless a capture holds it past the shutdown
    /// timeout. The wait runs on the blocking pool.
    async fn release_camera(&self) -> bool {
        let processor = Arc::clone(&self.processor);
        let timeout = self.settings.shutdown_timeout;
        let release = tokio::task::spawn_blocking(move || {
            let mut processor = processor.try_lock_for(timeout)?;
            processor.release();
            Some(processor.is_released())
        });
        match release.await {
            Ok(Some(released)) => released,
            Ok(None) => {
                warn!("frame source busy, release deferred to drop");
                false
            }
            Err(e) => {
                error!(error = %e, "camera release task failed");
                false
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.shutdown.send_replace(true) {
            self.transport.close();
            for (_, handle) in &self.tasks {
                handle.abort();
            }
        }
    }
}

async fn run_outbound(
    processor: Arc<Mutex<VideoProcessor>>,
    transport: Arc<UdpTransport>,
    quality: u8,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sent: u64 = 0;

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let job = {
            let processor = Arc::clone(&processor);
            tokio::task::spawn_blocking(move || {
                let frame = processor.lock().next_frame()?;
                Some(codec::encode(&frame, quality).map(|packet| (frame.seq, packet)))
            })
        };

        let result = tokio::select! {
            _ = shutdown.changed() => break,
            result = job => result,
        };

        let (seq, packet) = match result {
            Ok(Some(Ok(encoded))) => encoded,
            Ok(Some(Err(e))) => {
                warn!(error = %e, "failed to encode frame, dropping");
                continue;
            }
            Ok(None) => {
                tokio::time::sleep(RETRY_BACKOFF).await;
                continue;
            }
            Err(e) => {
                error!(error = %e, "capture task failed");
                break;
            }
        };

        match transport.send(&packet).await {
            Ok(bytes) => {
                sent += 1;
                if sent % 100 == 0 {
                    debug!(sent, seq, bytes, "frames sent");
                }
            }
            Err(TransportError::Closed) => break,
            Err(e @ TransportError::Oversized { .. }) => {
                debug!(error = %e, seq, "frame undeliverable, dropping");
            }
            Err(e) => {
                warn!(error = %e, seq, "failed to send frame");
            }
        }
    }

    info!(sent, "outbound loop stopped");
}

async fn run_inbound<R: DatagramReceiver>(transport: Arc<R>, remote: Arc<LatestFrame>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_PAYLOAD];
    let mut received: u64 = 0;
    let mut corrupt: u64 = 0;

    loop {
        let (len, from) = match transport.recv_datagram(&mut buf).await {
            Ok(datagram) => datagram,
            Err(TransportError::Closed) => break,
            Err(e) => {
                warn!(error = %e, "receive error");
                tokio::time::sleep(RETRY_BACKOFF).await;
                continue;
            }
        };

        match codec::decode(&buf[..len]) {
            Ok(mut frame) => {
                frame.seq = received;
                received += 1;
                if received % 100 == 0 {
                    debug!(received, corrupt, from = %from, "frames received");
                }
                remote.publish(frame);
            }
            Err(e) => {
                corrupt += 1;
                debug!(error = %e, from = %from, "dropping corrupt packet");
            }
        }
    }

    info!(received, corrupt, "inbound loop stopped");
}

/// Drives the render tick at a fixed interval until the session stops.
pub async fn run_render_loop(session: &Session, sink: &mut dyn FrameSink, interval: Duration) {
    let mut stopped = session.stopped();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stopped.wait_for(|s| *s) => break,
            _ = ticker.tick() => {}
        }
        let frames = session.render_tick();
        if let Some(local) = &frames.local {
            sink.show_local(local);
        }
        if let Some(remote) = &frames.remote {
            sink.show_remote(remote);
        }
    }
}
