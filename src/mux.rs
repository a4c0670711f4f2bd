//! Storage/mux collaborator boundary.
//!
//! External consumers (segmenters, MP4 writers, recorders) attach a
//! [`VideoSink`] to the session and receive encoded access units with
//! presentation timestamps. At most one sink is attached at a time; the
//! sink is started lazily on the first access unit so it always receives
//! the codec's initial parameter sets up front.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::decoder::VideoCodec;
use crate::error::{CameraError, Result};
use crate::media::AccessUnit;

/// Receiver of encoded video handed out of the ingest path.
///
/// Methods are called on the session's packet-processing thread:
/// implementations should hand the data off quickly (queue, channel)
/// rather than block.
pub trait VideoSink: Send + Sync {
    /// Called once before the first access unit, with the codec and its
    /// initial parameter sets (SPS/PPS for H264).
    fn start(&self, codec: VideoCodec, initial_parameters: &[Vec<u8>]) -> Result<()>;

    /// One encoded access unit with its presentation timestamp.
    fn write_packet(&self, codec: VideoCodec, au: &AccessUnit, pts: Duration) -> Result<()>;

    /// Called when the stream ends or the sink is detached.
    fn stop(&self) -> Result<()>;
}

struct Attached {
    sink: Arc<dyn VideoSink>,
    started: bool,
}

/// Single-slot sink attachment with busy/not-found semantics.
///
/// Sink failures are logged and swallowed: a broken recorder must never
/// take down live ingest.
#[derive(Default)]
pub struct VideoRequest {
    attached: Mutex<Option<Attached>>,
}

impl VideoRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.attached.lock().is_some()
    }

    /// Attach a sink. Fails with [`CameraError::SinkBusy`] while another
    /// sink holds the slot.
    pub fn attach(&self, sink: Arc<dyn VideoSink>) -> Result<()> {
        let mut attached = self.attached.lock();
        if attached.is_some() {
            return Err(CameraError::SinkBusy);
        }
        *attached = Some(Attached {
            sink,
            started: false,
        });
        tracing::info!("video sink attached");
        Ok(())
    }

    /// Detach `sink`, stopping it if it had started.
    ///
    /// Detaching when nothing is attached is a no-op; detaching a sink
    /// that is not the attached one fails with
    /// [`CameraError::SinkNotFound`].
    pub fn detach(&self, sink: &Arc<dyn VideoSink>) -> Result<()> {
        let mut attached = self.attached.lock();
        let Some(current) = attached.as_ref() else {
            return Ok(());
        };
        if !Arc::ptr_eq(&current.sink, sink) {
            return Err(CameraError::SinkNotFound);
        }
        let current = attached.take();
        drop(attached);
        if let Some(current) = current {
            if current.started {
                if let Err(e) = current.sink.stop() {
                    tracing::error!(error = %e, "error stopping video sink");
                }
            }
        }
        tracing::info!("video sink detached");
        Ok(())
    }

    /// Hand one access unit to the attached sink, starting it first if
    /// needed. No-op when no sink is attached.
    pub fn write(
        &self,
        codec: VideoCodec,
        initial_parameters: &[Vec<u8>],
        au: &AccessUnit,
        pts: Duration,
    ) {
        let mut attached = self.attached.lock();
        let Some(current) = attached.as_mut() else {
            return;
        };

        if !current.started {
            if let Err(e) = current.sink.start(codec, initial_parameters) {
                tracing::error!(%codec, error = %e, "failed to start video sink");
                return;
            }
            current.started = true;
        }
        if let Err(e) = current.sink.write_packet(codec, au, pts) {
            tracing::error!(%codec, error = %e, "video sink rejected packet");
        }
    }

    /// Stop the attached sink but keep it attached (stream interruption:
    /// it will be started again on the next access unit).
    pub fn interrupt(&self) {
        let mut attached = self.attached.lock();
        if let Some(current) = attached.as_mut() {
            if current.started {
                if let Err(e) = current.sink.stop() {
                    tracing::error!(error = %e, "error stopping video sink");
                }
            }
            current.started = false;
        }
    }

    /// Stop and drop any attached sink (session close).
    pub fn clear(&self) {
        let taken = self.attached.lock().take();
        if let Some(current) = taken {
            if current.started {
                if let Err(e) = current.sink.stop() {
                    tracing::error!(error = %e, "error stopping video sink");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        starts: AtomicUsize,
        packets: AtomicUsize,
        stops: AtomicUsize,
    }

    impl VideoSink for RecordingSink {
        fn start(&self, _codec: VideoCodec, initial_parameters: &[Vec<u8>]) -> Result<()> {
            assert!(!initial_parameters.is_empty());
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn write_packet(&self, _codec: VideoCodec, _au: &AccessUnit, _pts: Duration) -> Result<()> {
            self.packets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn params() -> Vec<Vec<u8>> {
        vec![vec![0x67, 0x42], vec![0x68, 0xCE]]
    }

    fn au() -> AccessUnit {
        vec![vec![0x65, 0x88]]
    }

    #[test]
    fn starts_lazily_on_first_write() {
        let request = VideoRequest::new();
        let sink = Arc::new(RecordingSink::default());
        request.attach(sink.clone() as Arc<dyn VideoSink>).unwrap();
        assert_eq!(sink.starts.load(Ordering::SeqCst), 0);

        request.write(VideoCodec::H264, &params(), &au(), Duration::ZERO);
        request.write(VideoCodec::H264, &params(), &au(), Duration::from_millis(33));

        assert_eq!(sink.starts.load(Ordering::SeqCst), 1);
        assert_eq!(sink.packets.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn second_attach_is_busy() {
        let request = VideoRequest::new();
        let first = Arc::new(RecordingSink::default()) as Arc<dyn VideoSink>;
        let second = Arc::new(RecordingSink::default()) as Arc<dyn VideoSink>;
        request.attach(first).unwrap();
        assert!(matches!(request.attach(second), Err(CameraError::SinkBusy)));
    }

    #[test]
    fn detach_semantics() {
        let request = VideoRequest::new();
        let attached = Arc::new(RecordingSink::default());
        let attached_dyn = attached.clone() as Arc<dyn VideoSink>;
        let stranger = Arc::new(RecordingSink::default()) as Arc<dyn VideoSink>;

        // detach with nothing attached is a no-op
        request.detach(&stranger).unwrap();

        request.attach(attached_dyn.clone()).unwrap();
        request.write(VideoCodec::H264, &params(), &au(), Duration::ZERO);

        assert!(matches!(
            request.detach(&stranger),
            Err(CameraError::SinkNotFound)
        ));

        request.detach(&attached_dyn).unwrap();
        assert_eq!(attached.stops.load(Ordering::SeqCst), 1);
        assert!(!request.is_active());
    }

    #[test]
    fn interrupt_restarts_on_next_write() {
        let request = VideoRequest::new();
        let sink = Arc::new(RecordingSink::default());
        request.attach(sink.clone() as Arc<dyn VideoSink>).unwrap();

        request.write(VideoCodec::H264, &params(), &au(), Duration::ZERO);
        request.interrupt();
        assert_eq!(sink.stops.load(Ordering::SeqCst), 1);

        request.write(VideoCodec::H264, &params(), &au(), Duration::ZERO);
        assert_eq!(sink.starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_stops_started_sink() {
        let request = VideoRequest::new();
        let sink = Arc::new(RecordingSink::default());
        request.attach(sink.clone() as Arc<dyn VideoSink>).unwrap();
        request.write(VideoCodec::H264, &params(), &au(), Duration::ZERO);

        request.clear();
        assert_eq!(sink.stops.load(Ordering::SeqCst), 1);
        assert!(!request.is_active());

        // clearing an empty slot is fine
        request.clear();
    }
}
