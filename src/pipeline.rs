// SPDX-License-Identifier: GPL-3.0-only

//! Downstream handoff contracts
//!
//! The capture pipeline hands raw sensor output to external collaborators
//! through two narrow traits: [`RawCodec`] for RAW-to-DNG conversion and
//! [`OutputSink`] for file/container packaging. Both are treated as opaque
//! and potentially slow; a capture module reaches `Done` once the sink has
//! *acknowledged* the handoff, never once writing physically completes.

use crate::errors::{CameraError, CameraResult};
use crate::hal::SensorFrame;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Per-device calibration metadata forwarded to the RAW codec
#[derive(Debug, Clone)]
pub struct CalibrationMetadata {
    pub device_id: String,
    pub sensor_model: Option<String>,
    /// Normalized sensor black level (0..1)
    pub black_level: f32,
}

/// Encoded output of the RAW codec
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// Container tag, e.g. "dng"
    pub format: &'static str,
    pub bytes: Arc<[u8]>,
}

/// Narrow conversion interface to the native RAW/DNG pixel codec.
/// Invoked only from the `Processing` state.
pub trait RawCodec: Send + Sync {
    fn convert(
        &self,
        raw: &SensorFrame,
        calibration: &CalibrationMetadata,
    ) -> CameraResult<EncodedImage>;
}

/// Stand-in codec for the virtual device: tags the sensor bytes as DNG
/// without touching the pixels. Real deployments plug the native codec in
/// behind the same trait.
#[derive(Debug, Default)]
pub struct PassthroughCodec;

impl RawCodec for PassthroughCodec {
    fn convert(
        &self,
        raw: &SensorFrame,
        _calibration: &CalibrationMetadata,
    ) -> CameraResult<EncodedImage> {
        if raw.data.is_empty() {
            return Err(CameraError::CodecFailure("empty raw buffer".into()));
        }
        Ok(EncodedImage {
            format: "dng",
            bytes: Arc::clone(&raw.data),
        })
    }
}

/// Codec that always fails; used to exercise the `Error(CodecFailure)` path
#[derive(Debug, Default)]
pub struct FailingCodec;

impl RawCodec for FailingCodec {
    fn convert(
        &self,
        _raw: &SensorFrame,
        _calibration: &CalibrationMetadata,
    ) -> CameraResult<EncodedImage> {
        Err(CameraError::CodecFailure("conversion rejected".into()))
    }
}

/// What a capture module hands downstream
#[derive(Debug, Clone)]
pub enum CaptureOutput {
    /// One or more still frames
    Frames(Vec<SensorFrame>),
    /// Codec output (RAW module)
    Encoded(EncodedImage),
    /// A recorded clip worth of frames
    Clip {
        frames: Vec<SensorFrame>,
        duration: Duration,
    },
}

impl CaptureOutput {
    pub fn frame_count(&self) -> usize {
        match self {
            CaptureOutput::Frames(frames) => frames.len(),
            CaptureOutput::Encoded(_) => 1,
            CaptureOutput::Clip { frames, .. } => frames.len(),
        }
    }
}

/// Acknowledgement returned by a sink once it has taken ownership of the
/// output. Physical writing may still be in flight on the sink's executor.
#[derive(Debug, Clone)]
pub struct HandoffTicket {
    pub id: Uuid,
    pub items: usize,
}

/// Downstream consumer of capture output
pub trait OutputSink: Send + Sync {
    /// Take ownership of the output and acknowledge. Must not block on
    /// physical writing.
    fn submit(&self, output: CaptureOutput) -> CameraResult<HandoffTicket>;
}

/// Sink that enqueues output for a consumer draining on its own context.
/// Acknowledges as soon as the output is enqueued.
pub struct ChannelSink {
    sender: futures::channel::mpsc::UnboundedSender<CaptureOutput>,
}

impl ChannelSink {
    pub fn pair() -> (
        Self,
        futures::channel::mpsc::UnboundedReceiver<CaptureOutput>,
    ) {
        let (sender, receiver) = futures::channel::mpsc::unbounded();
        (Self { sender }, receiver)
    }
}

impl OutputSink for ChannelSink {
    fn submit(&self, output: CaptureOutput) -> CameraResult<HandoffTicket> {
        let items = output.frame_count();
        self.sender
            .unbounded_send(output)
            .map_err(|_| CameraError::CodecFailure("output consumer gone".into()))?;
        Ok(HandoffTicket {
            id: Uuid::new_v4(),
            items,
        })
    }
}

/// Sink that accepts and discards everything
#[derive(Debug, Default)]
pub struct DiscardSink;

impl OutputSink for DiscardSink {
    fn submit(&self, output: CaptureOutput) -> CameraResult<HandoffTicket> {
        Ok(HandoffTicket {
            id: Uuid::new_v4(),
            items: output.frame_count(),
        })
    }
}
