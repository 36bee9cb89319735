// SPDX-License-Identifier: GPL-3.0-only

//! Capture source abstraction
//!
//! The capture device is an external collaborator. The pipeline only needs
//! two things from it: a pacing call to request the next sample, and somewhere
//! to report activation failures.
//!
//! ```text
//! ┌──────────────────────┐  request_sample(ticket)  ┌──────────────────┐
//! │    PreviewPipeline   │ ───────────────────────▶ │  CaptureSource   │
//! │                      │ ◀─────────────────────── │  (callback thr.) │
//! └──────────────────────┘  on_sample_captured(..)  └──────────────────┘
//!            │                 on_clock_event(..)
//!            ▼
//! ┌──────────────────────┐
//! │   CaptureErrorSink   │  ← activation failures only
//! └──────────────────────┘
//! ```

pub mod synthetic;
pub mod types;

pub use types::*;

use crate::errors::CaptureError;

/// Capture device pacing interface
pub trait CaptureSource: Send + Sync {
    /// Ask the device for one more sample.
    ///
    /// Must not block. The device later hands the frame back together with
    /// `request` through the pipeline's sample-captured callback, on any thread.
    fn request_sample(&self, request: SampleRequest) -> Result<(), CaptureError>;

    /// Human-readable identifier, also the key into the device policy table
    fn device_identifier(&self) -> String;
}

/// Receives activation-level failures (the owning collaborator)
pub trait CaptureErrorSink: Send + Sync {
    fn capture_error(&self, error: CaptureError);
}

/// Error sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorSink;

impl CaptureErrorSink for LogErrorSink {
    fn capture_error(&self, error: CaptureError) {
        tracing::error!(error = %error, "Capture error");
    }
}
