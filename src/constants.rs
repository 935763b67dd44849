// SPDX-License-Identifier: GPL-3.0-only

//! Crate-wide constants: well-known parameter keys, timeouts and retry bounds

use std::time::Duration;

/// Well-known parameter keys shared by both API generations.
///
/// Keys are opaque strings at the driver seam; these are the normalized names
/// the capability model maps vendor variants onto. Vendor-specific keys stay
/// as probed and are surfaced through quirk remapping.
pub mod keys {
    /// ISO sensitivity
    pub const ISO: &str = "iso";
    /// Exposure time in microseconds
    pub const SHUTTER_US: &str = "shutter-us";
    /// Focus mode (auto, continuous, manual, infinity)
    pub const FOCUS_MODE: &str = "focus-mode";
    /// White balance preset
    pub const WHITE_BALANCE: &str = "white-balance";
    /// Exposure compensation in 1/6 EV steps
    pub const EXPOSURE_BIAS: &str = "exposure-bias";
    /// Whether the sensor can deliver RAW Bayer output
    pub const RAW_CAPABLE: &str = "raw-capable";
    /// JPEG encode quality (0-100)
    pub const JPEG_QUALITY: &str = "jpeg-quality";
    /// Digital zoom ratio times 100
    pub const ZOOM_RATIO: &str = "zoom-ratio";
}

/// Deadline for a hardware open round-trip before the wrapper gives up
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for any marshalled device-context command to reply
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for each hardware frame callback during capture
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// Attempts for a transiently busy device before open surfaces the error
pub const MAX_OPEN_ATTEMPTS: u32 = 3;

/// Delay between open retries
pub const OPEN_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Bounded auto-retries for recoverable capture errors before Error state
pub const MAX_CAPTURE_RETRIES: u32 = 2;

/// Depth of the bounded channel carrying hardware frame callbacks into the
/// capture context. Driver threads block (briefly) when the capture context
/// falls behind rather than dropping capture frames.
pub const FRAME_CHANNEL_DEPTH: usize = 8;

/// Buffer size of the lossy preview frame stream. Preview drops frames when
/// the consumer lags; capture never does.
pub const PREVIEW_CHANNEL_DEPTH: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_ordered() {
        // Frame deadline must be shorter than the command round-trip deadline,
        // otherwise a stalled capture could never report Timeout first.
        assert!(FRAME_TIMEOUT < COMMAND_TIMEOUT);
        assert!(MAX_OPEN_ATTEMPTS >= 1);
        assert!(FRAME_CHANNEL_DEPTH > 0);
    }
}
