//! Capture device seam and the per-round clip recorder built on top of it.
//!
//! A [`CaptureDevice`] is the raw driver: it hands out a [`CaptureFeed`] once
//! access has been granted. The [`CaptureSession`] owns that feed exclusively
//! and turns each recording interval into one immutable [`Clip`].

pub(crate) mod session;
mod synthetic;

use std::{fmt, sync::Arc};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use utoipa::ToSchema;
use uuid::Uuid;

pub use session::{CaptureSession, CaptureStatus};
pub use synthetic::{SyntheticCamera, SyntheticFailure};

/// Result alias for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Failures raised by capture devices and the capture session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The user or the platform refused access to the camera.
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    /// No usable camera, or the driver stopped responding.
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    /// Lifecycle misuse (e.g. starting a round while already recording).
    #[error("capture session is {actual}, expected {expected}")]
    InvalidState {
        /// Status the operation requires.
        expected: CaptureStatus,
        /// Status the session was in.
        actual: CaptureStatus,
    },
}

/// Camera orientation requested from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    /// Rear camera pointed at the board.
    #[default]
    Environment,
    /// Front camera.
    User,
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facing::Environment => f.write_str("environment"),
            Facing::User => f.write_str("user"),
        }
    }
}

/// Requested capture characteristics (320x240 rear camera, ~200 kbps webm).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Requested camera.
    pub facing: Facing,
    /// Target encoder bitrate.
    pub bitrate_bps: u32,
    /// Container type of recorded clips.
    pub mime_type: String,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            facing: Facing::Environment,
            bitrate_bps: 200_000,
            mime_type: "video/webm".to_string(),
        }
    }
}

/// One encoded chunk delivered by the driver while recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Position of the chunk within the current recording.
    pub sequence: u64,
    /// Encoded payload.
    pub bytes: Vec<u8>,
}

/// Description of the live preview exposed once the device is acquired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PreviewInfo {
    /// Driver name.
    pub device: String,
    /// Preview width in pixels.
    pub width: u32,
    /// Preview height in pixels.
    pub height: u32,
    /// Camera in use.
    pub facing: Facing,
}

/// Finalized, immutable recording of a single round.
#[derive(Debug, PartialEq, Eq)]
pub struct Clip {
    id: Uuid,
    mime_type: String,
    segments: usize,
    data: Vec<u8>,
}

impl Clip {
    /// Concatenate ordered segments into one clip.
    pub fn from_segments(mime_type: impl Into<String>, mut segments: Vec<Segment>) -> Self {
        segments.sort_by_key(|segment| segment.sequence);
        let count = segments.len();
        let data = segments.into_iter().flat_map(|segment| segment.bytes).collect();
        Self {
            id: Uuid::new_v4(),
            mime_type: mime_type.into(),
            segments: count,
            data,
        }
    }

    /// Unique id assigned when the clip was frozen.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Container type reported to the classifier.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Number of driver segments folded into this clip.
    pub fn segment_count(&self) -> usize {
        self.segments
    }

    /// Concatenated segment bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size of the clip in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no bytes were recorded.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Raw capture driver able to grant exclusive access to a camera.
pub trait CaptureDevice: Send + Sync {
    /// Driver name used in logs and previews.
    fn name(&self) -> &str;

    /// Request exclusive access with the given constraints.
    fn open(
        &self,
        constraints: CaptureConstraints,
    ) -> BoxFuture<'static, CaptureResult<Box<dyn CaptureFeed>>>;
}

/// Live handle on an acquired camera.
///
/// The segment channel returned by [`CaptureFeed::start_recording`] must be
/// closed by the driver once [`CaptureFeed::stop_recording`] has flushed the
/// last segment: the session uses the channel closing as its "all segments
/// delivered" signal.
pub trait CaptureFeed: Send + Sync {
    /// Describe the live preview.
    fn preview(&self) -> PreviewInfo;

    /// Start a recording and return the channel its segments arrive on.
    fn start_recording(&mut self) -> CaptureResult<mpsc::Receiver<Segment>>;

    /// Flush the last segment and close the recording channel.
    fn stop_recording(&mut self) -> CaptureResult<()>;

    /// Stop every track and hand the camera back to the platform.
    fn release(&mut self);
}

/// Shared handle on a device driver.
pub type SharedDevice = Arc<dyn CaptureDevice>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_orders_segments_by_sequence() {
        let clip = Clip::from_segments(
            "video/webm",
            vec![
                Segment {
                    sequence: 1,
                    bytes: vec![3, 4],
                },
                Segment {
                    sequence: 0,
                    bytes: vec![1, 2],
                },
            ],
        );
        assert_eq!(clip.data(), &[1, 2, 3, 4]);
        assert_eq!(clip.segment_count(), 2);
        assert_eq!(clip.mime_type(), "video/webm");
    }

    #[test]
    fn default_constraints_are_low_resolution() {
        let constraints = CaptureConstraints::default();
        assert_eq!((constraints.width, constraints.height), (320, 240));
        assert_eq!(constraints.facing, Facing::Environment);
    }
}
