use std::{fmt, sync::Arc};

use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::{
    CaptureConstraints, CaptureError, CaptureFeed, CaptureResult, Clip, PreviewInfo, Segment,
    SharedDevice,
};

/// Lifecycle of the capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    /// Device not acquired yet (or released).
    Uninitialized,
    /// Device acquired, live preview running, not recording.
    Ready,
    /// Segments are being accumulated for the current round.
    Recording,
    /// Device acquisition or recording failed.
    Error,
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CaptureStatus::Uninitialized => "uninitialized",
            CaptureStatus::Ready => "ready",
            CaptureStatus::Recording => "recording",
            CaptureStatus::Error => "in error",
        };
        f.write_str(label)
    }
}

/// Exclusive owner of one capture device, producing one clip per round.
///
/// Segments of the current recording are drained into a buffer owned by a
/// collector task; the buffer never leaves the session until it is frozen
/// into a [`Clip`]. The session keeps the only strong reference to the
/// latest clip, rounds only hold weak handles on it.
pub struct CaptureSession {
    device: SharedDevice,
    constraints: CaptureConstraints,
    feed: Option<Box<dyn CaptureFeed>>,
    status: CaptureStatus,
    collector: Option<JoinHandle<Vec<Segment>>>,
    current_clip: Option<Arc<Clip>>,
}

impl CaptureSession {
    /// Build a session bound to `device`; nothing is acquired yet.
    pub fn new(device: SharedDevice, constraints: CaptureConstraints) -> Self {
        Self {
            device,
            constraints,
            feed: None,
            status: CaptureStatus::Uninitialized,
            collector: None,
            current_clip: None,
        }
    }

    /// Current device status.
    pub fn status(&self) -> CaptureStatus {
        self.status
    }

    /// Live preview description, available once acquired.
    pub fn preview(&self) -> Option<PreviewInfo> {
        self.feed.as_ref().map(|feed| feed.preview())
    }

    /// Latest finalized clip, if any.
    pub fn current_clip(&self) -> Option<Arc<Clip>> {
        self.current_clip.clone()
    }

    /// Request exclusive access to the device.
    ///
    /// Acquiring while already `Ready` is a no-op; acquiring while recording
    /// is a lifecycle error. A previous `Error` state is retried.
    pub async fn acquire(&mut self) -> CaptureResult<()> {
        match self.status {
            CaptureStatus::Ready => return Ok(()),
            CaptureStatus::Recording => {
                return Err(CaptureError::InvalidState {
                    expected: CaptureStatus::Uninitialized,
                    actual: self.status,
                });
            }
            CaptureStatus::Uninitialized | CaptureStatus::Error => {}
        }

        let device = self.device.name().to_string();
        match self.device.open(self.constraints.clone()).await {
            Ok(feed) => {
                let preview = feed.preview();
                info!(
                    %device,
                    width = preview.width,
                    height = preview.height,
                    facing = %preview.facing,
                    "capture device acquired"
                );
                self.feed = Some(feed);
                self.status = CaptureStatus::Ready;
                Ok(())
            }
            Err(err) => {
                warn!(%device, error = %err, "capture device acquisition failed");
                self.status = CaptureStatus::Error;
                Err(err)
            }
        }
    }

    /// Begin accumulating segments for a new round.
    pub fn start_round(&mut self) -> CaptureResult<()> {
        if self.status != CaptureStatus::Ready {
            return Err(CaptureError::InvalidState {
                expected: CaptureStatus::Ready,
                actual: self.status,
            });
        }
        let Some(feed) = self.feed.as_mut() else {
            return Err(CaptureError::InvalidState {
                expected: CaptureStatus::Ready,
                actual: CaptureStatus::Uninitialized,
            });
        };

        let receiver = match feed.start_recording() {
            Ok(receiver) => receiver,
            Err(err) => {
                warn!(error = %err, "failed to start recording");
                self.status = CaptureStatus::Error;
                return Err(err);
            }
        };

        self.collector = Some(tokio::spawn(collect_segments(receiver)));
        self.status = CaptureStatus::Recording;
        debug!("recording started");
        Ok(())
    }

    /// Stop recording and freeze every delivered segment into a new clip.
    ///
    /// The previous clip is released before the new one is created. The
    /// returned clip is the round's "clip ready" notification: it is produced
    /// exactly once per completed recording.
    pub async fn end_round(&mut self) -> CaptureResult<Arc<Clip>> {
        if self.status != CaptureStatus::Recording {
            return Err(CaptureError::InvalidState {
                expected: CaptureStatus::Recording,
                actual: self.status,
            });
        }

        let stopped = match self.feed.as_mut() {
            Some(feed) => feed.stop_recording(),
            None => Err(CaptureError::Unavailable("capture feed vanished".into())),
        };
        let collector = self.collector.take();

        if let Err(err) = stopped {
            warn!(error = %err, "failed to stop recording");
            if let Some(handle) = collector {
                handle.abort();
            }
            self.status = CaptureStatus::Error;
            return Err(err);
        }

        let segments = match collector {
            Some(handle) => match handle.await {
                Ok(segments) => segments,
                Err(err) => {
                    warn!(error = %err, "segment collector aborted");
                    self.status = CaptureStatus::Error;
                    return Err(CaptureError::Unavailable(
                        "segment delivery interrupted".into(),
                    ));
                }
            },
            None => Vec::new(),
        };

        self.current_clip.take();
        let clip = Arc::new(Clip::from_segments(
            self.constraints.mime_type.clone(),
            segments,
        ));
        debug!(
            clip = %clip.id(),
            segments = clip.segment_count(),
            bytes = clip.len(),
            "clip finalized"
        );
        self.current_clip = Some(Arc::clone(&clip));
        self.status = CaptureStatus::Ready;
        Ok(clip)
    }

    /// Throw away the recording in progress without producing a clip.
    ///
    /// Leaves the session `Ready` when the device is still held, so the next
    /// round can start straight away.
    pub fn abandon_recording(&mut self) {
        if let Some(handle) = self.collector.take() {
            handle.abort();
        }
        match self.feed.as_mut() {
            Some(feed) => {
                if self.status == CaptureStatus::Recording {
                    if let Err(err) = feed.stop_recording() {
                        debug!(error = %err, "stop while abandoning recording failed");
                    }
                }
                if matches!(self.status, CaptureStatus::Recording | CaptureStatus::Error) {
                    self.status = CaptureStatus::Ready;
                }
            }
            None => self.status = CaptureStatus::Uninitialized,
        }
    }

    /// Release the device and drop any in-progress recording.
    pub fn release(&mut self) {
        if let Some(handle) = self.collector.take() {
            handle.abort();
        }
        if let Some(mut feed) = self.feed.take() {
            if self.status == CaptureStatus::Recording {
                if let Err(err) = feed.stop_recording() {
                    debug!(error = %err, "stop during release failed");
                }
            }
            feed.release();
            info!(device = self.device.name(), "capture device released");
        }
        self.current_clip = None;
        self.status = CaptureStatus::Uninitialized;
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Drain the driver channel until it closes, keeping arrival order.
async fn collect_segments(mut receiver: mpsc::Receiver<Segment>) -> Vec<Segment> {
    let mut buffer = Vec::new();
    while let Some(segment) = receiver.recv().await {
        if !segment.bytes.is_empty() {
            buffer.push(segment);
        }
    }
    buffer
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use futures::future::BoxFuture;

    use super::*;
    use crate::capture::{CaptureDevice, Facing};

    /// Device whose feed hands the test the segment sender of each recording.
    #[derive(Default)]
    pub(crate) struct ScriptedDevice {
        pub deny: bool,
        pub releases: Arc<AtomicUsize>,
        pub senders: Arc<Mutex<Vec<mpsc::Sender<Segment>>>>,
    }

    struct ScriptedFeed {
        releases: Arc<AtomicUsize>,
        senders: Arc<Mutex<Vec<mpsc::Sender<Segment>>>>,
    }

    impl CaptureDevice for ScriptedDevice {
        fn name(&self) -> &str {
            "scripted"
        }

        fn open(
            &self,
            _constraints: CaptureConstraints,
        ) -> BoxFuture<'static, CaptureResult<Box<dyn CaptureFeed>>> {
            let deny = self.deny;
            let feed = ScriptedFeed {
                releases: Arc::clone(&self.releases),
                senders: Arc::clone(&self.senders),
            };
            Box::pin(async move {
                if deny {
                    Err(CaptureError::PermissionDenied("user said no".into()))
                } else {
                    Ok(Box::new(feed) as Box<dyn CaptureFeed>)
                }
            })
        }
    }

    impl CaptureFeed for ScriptedFeed {
        fn preview(&self) -> PreviewInfo {
            PreviewInfo {
                device: "scripted".into(),
                width: 320,
                height: 240,
                facing: Facing::Environment,
            }
        }

        fn start_recording(&mut self) -> CaptureResult<mpsc::Receiver<Segment>> {
            let (tx, rx) = mpsc::channel(16);
            self.senders.lock().unwrap().push(tx);
            Ok(rx)
        }

        fn stop_recording(&mut self) -> CaptureResult<()> {
            // Dropping the sender closes the channel once queued segments drain.
            self.senders.lock().unwrap().clear();
            Ok(())
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn session(device: ScriptedDevice) -> CaptureSession {
        CaptureSession::new(Arc::new(device), CaptureConstraints::default())
    }

    #[tokio::test]
    async fn start_round_requires_ready() {
        let mut session = session(ScriptedDevice::default());
        let err = session.start_round().unwrap_err();
        assert_eq!(
            err,
            CaptureError::InvalidState {
                expected: CaptureStatus::Ready,
                actual: CaptureStatus::Uninitialized,
            }
        );

        session.acquire().await.unwrap();
        session.start_round().unwrap();
        assert!(matches!(
            session.start_round(),
            Err(CaptureError::InvalidState {
                actual: CaptureStatus::Recording,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn permission_denied_moves_to_error() {
        let mut session = session(ScriptedDevice {
            deny: true,
            ..Default::default()
        });
        let err = session.acquire().await.unwrap_err();
        assert!(matches!(err, CaptureError::PermissionDenied(_)));
        assert_eq!(session.status(), CaptureStatus::Error);
        assert!(session.preview().is_none());
    }

    #[tokio::test]
    async fn end_round_includes_segments_queued_before_stop() {
        let device = ScriptedDevice::default();
        let senders = Arc::clone(&device.senders);
        let mut session = session(device);
        session.acquire().await.unwrap();
        session.start_round().unwrap();

        let tx = senders.lock().unwrap()[0].clone();
        for sequence in 0..3u64 {
            tx.send(Segment {
                sequence,
                bytes: vec![sequence as u8; 2],
            })
            .await
            .unwrap();
        }
        // Keep one in-flight sender alive past stop; the clip must wait for it.
        let late = tokio::spawn(async move {
            tokio::task::yield_now().await;
            tx.send(Segment {
                sequence: 3,
                bytes: vec![9],
            })
            .await
            .unwrap();
        });

        let clip = session.end_round().await.unwrap();
        late.await.unwrap();
        assert_eq!(clip.segment_count(), 4);
        assert_eq!(clip.data(), &[0, 0, 1, 1, 2, 2, 9]);
        assert_eq!(session.status(), CaptureStatus::Ready);
    }

    #[tokio::test]
    async fn new_clip_releases_previous_one() {
        let mut session = session(ScriptedDevice::default());
        session.acquire().await.unwrap();

        session.start_round().unwrap();
        let first = Arc::downgrade(&session.end_round().await.unwrap());
        assert!(first.upgrade().is_some());

        session.start_round().unwrap();
        let second = session.end_round().await.unwrap();
        assert!(first.upgrade().is_none());
        assert_eq!(session.current_clip().map(|clip| clip.id()), Some(second.id()));
    }

    #[tokio::test]
    async fn abandoned_recording_leaves_session_ready() {
        let mut session = session(ScriptedDevice::default());
        session.acquire().await.unwrap();
        session.start_round().unwrap();

        session.abandon_recording();
        assert_eq!(session.status(), CaptureStatus::Ready);
        assert!(session.current_clip().is_none());
        session.start_round().unwrap();
    }

    #[tokio::test]
    async fn drop_releases_device() {
        let device = ScriptedDevice::default();
        let releases = Arc::clone(&device.releases);
        {
            let mut session = session(device);
            session.acquire().await.unwrap();
            session.start_round().unwrap();
        }
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
