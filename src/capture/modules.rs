// SPDX-License-Identifier: GPL-3.0-only

//! Built-in capture modules
//!
//! Photo, burst, RAW and video acquisition, each expressed as a
//! [`CaptureModule`] the controller drives through the shared state machine.

use super::{CaptureModule, CaptureProgress, ParameterRequirement};
use crate::constants::keys;
use crate::device::CaptureDevice;
use crate::errors::{CameraError, CameraResult};
use crate::hal::driver::CaptureRequest;
use crate::hal::SensorFrame;
use crate::params::ParameterValue;
use crate::pipeline::{CalibrationMetadata, CaptureOutput, RawCodec};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Single still capture
#[derive(Debug, Default)]
pub struct PhotoModule;

impl CaptureModule for PhotoModule {
    fn name(&self) -> &str {
        "photo"
    }

    fn request(&self) -> CaptureRequest {
        CaptureRequest::single()
    }

    fn is_complete(&self, progress: &CaptureProgress) -> bool {
        !progress.frames.is_empty()
    }

    fn process(
        &self,
        frames: Vec<SensorFrame>,
        _codec: &dyn RawCodec,
        _device: &CaptureDevice,
    ) -> CameraResult<CaptureOutput> {
        Ok(CaptureOutput::Frames(frames))
    }
}

/// Fixed-length rapid sequence
#[derive(Debug)]
pub struct BurstModule {
    count: u32,
}

impl BurstModule {
    pub fn new(count: u32) -> Self {
        Self { count: count.max(1) }
    }
}

impl CaptureModule for BurstModule {
    fn name(&self) -> &str {
        "burst"
    }

    fn request(&self) -> CaptureRequest {
        CaptureRequest::frames(self.count)
    }

    fn is_complete(&self, progress: &CaptureProgress) -> bool {
        progress.frames.len() >= self.count as usize
    }

    fn process(
        &self,
        frames: Vec<SensorFrame>,
        _codec: &dyn RawCodec,
        _device: &CaptureDevice,
    ) -> CameraResult<CaptureOutput> {
        Ok(CaptureOutput::Frames(frames))
    }
}

/// Unprocessed Bayer capture converted through the RAW codec.
///
/// Only activates on sensors that advertise RAW readout; anything else fails
/// preparation with `UnsupportedConfiguration` rather than producing a fake
/// RAW file.
#[derive(Debug)]
pub struct RawModule {
    black_level: f32,
}

impl Default for RawModule {
    fn default() -> Self {
        Self { black_level: 0.063 }
    }
}

impl RawModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_black_level(black_level: f32) -> Self {
        Self { black_level }
    }
}

impl CaptureModule for RawModule {
    fn name(&self) -> &str {
        "raw"
    }

    fn required_parameters(&self) -> Vec<ParameterRequirement> {
        vec![ParameterRequirement::equals(
            keys::RAW_CAPABLE,
            ParameterValue::Bool(true),
        )]
    }

    fn request(&self) -> CaptureRequest {
        CaptureRequest::single().raw()
    }

    fn is_complete(&self, progress: &CaptureProgress) -> bool {
        !progress.frames.is_empty()
    }

    fn process(
        &self,
        frames: Vec<SensorFrame>,
        codec: &dyn RawCodec,
        device: &CaptureDevice,
    ) -> CameraResult<CaptureOutput> {
        let frame = frames
            .into_iter()
            .find(|f| f.raw_bayer)
            .ok_or_else(|| CameraError::CodecFailure("no raw frame delivered".into()))?;
        let calibration = CalibrationMetadata {
            device_id: device.device_id.clone(),
            sensor_model: Some(device.identity.model.clone()),
            black_level: self.black_level,
        };
        let encoded = codec.convert(&frame, &calibration)?;
        Ok(CaptureOutput::Encoded(encoded))
    }
}

/// Clip recording; completes when the duration elapses or the stop signal
/// fires, whichever comes first. Unlike cancellation, stopping finalizes the
/// clip with the frames recorded so far.
#[derive(Debug)]
pub struct VideoModule {
    duration: Duration,
    stop: Arc<AtomicBool>,
}

impl VideoModule {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record until the signal is set, bounded only by the given maximum
    pub fn until_stopped(max_duration: Duration) -> (Self, Arc<AtomicBool>) {
        let module = Self::new(max_duration);
        let stop = Arc::clone(&module.stop);
        (module, stop)
    }
}

impl CaptureModule for VideoModule {
    fn name(&self) -> &str {
        "video"
    }

    fn request(&self) -> CaptureRequest {
        CaptureRequest::streaming()
    }

    fn is_complete(&self, progress: &CaptureProgress) -> bool {
        self.stop.load(Ordering::SeqCst) || progress.elapsed() >= self.duration
    }

    fn process(
        &self,
        frames: Vec<SensorFrame>,
        _codec: &dyn RawCodec,
        _device: &CaptureDevice,
    ) -> CameraResult<CaptureOutput> {
        let duration = self.duration;
        Ok(CaptureOutput::Clip { frames, duration })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn progress_with(frames: usize) -> CaptureProgress {
        let frame = SensorFrame {
            sequence: 0,
            timestamp_us: 0,
            width: 1,
            height: 1,
            data: std::sync::Arc::from(vec![0u8].into_boxed_slice()),
            exposure_us: None,
            raw_bayer: false,
        };
        CaptureProgress {
            frames: vec![frame; frames],
            started: Instant::now(),
        }
    }

    #[test]
    fn test_photo_completes_on_first_frame() {
        let module = PhotoModule;
        assert!(!module.is_complete(&progress_with(0)));
        assert!(module.is_complete(&progress_with(1)));
    }

    #[test]
    fn test_burst_waits_for_count() {
        let module = BurstModule::new(3);
        assert!(!module.is_complete(&progress_with(2)));
        assert!(module.is_complete(&progress_with(3)));
    }

    #[test]
    fn test_burst_count_never_zero() {
        assert_eq!(BurstModule::new(0).request().frame_count, Some(1));
    }

    #[test]
    fn test_raw_requires_capability() {
        let requirements = RawModule::new().required_parameters();
        assert_eq!(requirements.len(), 1);
        assert_eq!(requirements[0].key, keys::RAW_CAPABLE);
        assert_eq!(requirements[0].expect, Some(ParameterValue::Bool(true)));
    }

    #[test]
    fn test_video_stop_signal_finalizes() {
        let (module, stop) = VideoModule::until_stopped(Duration::from_secs(60));
        assert!(!module.is_complete(&progress_with(1)));
        stop.store(true, Ordering::SeqCst);
        assert!(module.is_complete(&progress_with(1)));
    }

    #[test]
    fn test_video_completes_by_duration() {
        let module = VideoModule::new(Duration::from_millis(0));
        assert!(module.is_complete(&progress_with(0)));
        let long = VideoModule::new(Duration::from_secs(60));
        assert!(!long.is_complete(&progress_with(100)));
    }
}
