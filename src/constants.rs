// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

use std::time::Duration;

/// Number of slots in the sample ring buffer.
///
/// Arrivals beyond this are dropped (newest first) rather than blocking the
/// capture callback.
pub const SAMPLE_QUEUE_CAPACITY: usize = 5;

/// Maximum number of "request sample" calls outstanding at the capture source.
pub const MAX_OUTSTANDING_REQUESTS: usize = 3;

/// Default output size when the configuration does not specify one
pub const DEFAULT_OUTPUT_WIDTH: u32 = 1280;
pub const DEFAULT_OUTPUT_HEIGHT: u32 = 720;

/// Default display refresh rate used by the interval refresh clock
pub const DEFAULT_REFRESH_RATE_HZ: u32 = 60;

/// Upper bound accepted for the configured refresh rate
pub const MAX_REFRESH_RATE_HZ: u32 = 1000;

/// Bytes per pixel of the presentation format (BGRA8)
pub const PRESENT_BYTES_PER_PIXEL: u32 = 4;

/// How long the render thread waits for the UI thread in one slice before
/// re-checking its interruption flag.
pub const PRESENT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Total time the render thread waits for a present to complete before
/// giving up on that frame.
pub const PRESENT_TIMEOUT: Duration = Duration::from_millis(250);

/// Name given to render threads (suffixed with the pipeline label)
pub const RENDER_THREAD_PREFIX: &str = "preview-render";

/// How often (in frames) the render loop logs a progress line
pub const LOG_EVERY_N_FRAMES: u64 = 120;
