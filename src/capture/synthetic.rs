use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    CaptureConstraints, CaptureDevice, CaptureError, CaptureFeed, CaptureResult, PreviewInfo,
    Segment,
};

const SEGMENT_CHANNEL_CAPACITY: usize = 64;

/// Failure a [`SyntheticCamera`] can be told to simulate on `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntheticFailure {
    /// Refuse access as if the user denied the permission prompt.
    PermissionDenied,
    /// Report that no camera is present.
    Unavailable,
}

/// Software camera emitting fixed-size segments on a timer.
///
/// Stands in for a hardware driver during development and in tests.
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    segment_interval: Duration,
    segment_size: usize,
    failure: Option<SyntheticFailure>,
}

impl SyntheticCamera {
    /// Camera emitting `segment_size` bytes every `segment_interval`.
    pub fn new(segment_interval: Duration, segment_size: usize) -> Self {
        Self {
            segment_interval,
            segment_size,
            failure: None,
        }
    }

    /// Make every `open` call fail with the given error.
    pub fn failing(mut self, failure: SyntheticFailure) -> Self {
        self.failure = Some(failure);
        self
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), 4 * 1024)
    }
}

impl CaptureDevice for SyntheticCamera {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(
        &self,
        constraints: CaptureConstraints,
    ) -> BoxFuture<'static, CaptureResult<Box<dyn CaptureFeed>>> {
        let camera = self.clone();
        Box::pin(async move {
            match camera.failure {
                Some(SyntheticFailure::PermissionDenied) => Err(CaptureError::PermissionDenied(
                    "synthetic camera configured to deny access".into(),
                )),
                Some(SyntheticFailure::Unavailable) => Err(CaptureError::Unavailable(
                    "synthetic camera configured as unavailable".into(),
                )),
                None => Ok(Box::new(SyntheticFeed {
                    camera,
                    constraints,
                    stop: None,
                }) as Box<dyn CaptureFeed>),
            }
        })
    }
}

struct SyntheticFeed {
    camera: SyntheticCamera,
    constraints: CaptureConstraints,
    stop: Option<CancellationToken>,
}

impl CaptureFeed for SyntheticFeed {
    fn preview(&self) -> PreviewInfo {
        PreviewInfo {
            device: "synthetic".into(),
            width: self.constraints.width,
            height: self.constraints.height,
            facing: self.constraints.facing,
        }
    }

    fn start_recording(&mut self) -> CaptureResult<mpsc::Receiver<Segment>> {
        if self.stop.is_some() {
            return Err(CaptureError::Unavailable(
                "synthetic camera already recording".into(),
            ));
        }

        let (tx, rx) = mpsc::channel(SEGMENT_CHANNEL_CAPACITY);
        let stop = CancellationToken::new();
        let cancelled = stop.clone();
        let interval = self.camera.segment_interval;
        let size = self.camera.segment_size;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut sequence = 0u64;

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(synthetic_segment(sequence, size)).await.is_err() {
                            return;
                        }
                        sequence += 1;
                    }
                }
            }

            // Flush the partially filled segment, then close the channel.
            let _ = tx.send(synthetic_segment(sequence, size / 2)).await;
            debug!(segments = sequence + 1, "synthetic recording flushed");
        });

        self.stop = Some(stop);
        Ok(rx)
    }

    fn stop_recording(&mut self) -> CaptureResult<()> {
        match self.stop.take() {
            Some(stop) => {
                stop.cancel();
                Ok(())
            }
            None => Err(CaptureError::Unavailable(
                "synthetic camera is not recording".into(),
            )),
        }
    }

    fn release(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.cancel();
        }
    }
}

fn synthetic_segment(sequence: u64, size: usize) -> Segment {
    Segment {
        sequence,
        bytes: vec![(sequence % 251) as u8; size.max(1)],
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::capture::{CaptureSession, CaptureStatus};

    #[tokio::test]
    async fn synthetic_round_produces_non_empty_clip() {
        let camera = SyntheticCamera::new(Duration::from_millis(5), 8);
        let mut session = CaptureSession::new(Arc::new(camera), CaptureConstraints::default());
        session.acquire().await.unwrap();
        session.start_round().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let clip = session.end_round().await.unwrap();
        assert!(clip.segment_count() >= 2);
        assert!(!clip.is_empty());
        assert_eq!(session.status(), CaptureStatus::Ready);
    }

    #[tokio::test]
    async fn configured_failures_surface_on_acquire() {
        let camera = SyntheticCamera::default().failing(SyntheticFailure::Unavailable);
        let mut session = CaptureSession::new(Arc::new(camera), CaptureConstraints::default());
        assert!(matches!(
            session.acquire().await,
            Err(CaptureError::Unavailable(_))
        ));
    }
}
