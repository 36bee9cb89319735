// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the preview pipeline
//!
//! Only [`CaptureError`] ever leaves the pipeline (through
//! [`CaptureErrorSink`](crate::backends::camera::CaptureErrorSink)). Everything
//! else is contained inside the render loop, logged, and retried.

use thiserror::Error;

/// Result type alias for GPU operations
pub type GpuResult<T> = Result<T, GpuError>;

/// Result type alias for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Failures raised by a [`GpuBackend`](crate::gpu::GpuBackend)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GpuError {
    /// The process-wide render device could not be created
    #[error("render device unavailable: {0}")]
    DeviceUnavailable(String),
    /// Allocating the shared output texture failed
    #[error("shared texture creation failed: {0}")]
    TextureCreation(String),
    /// Exporting the cross-device share handle failed
    #[error("share handle export failed: {0}")]
    ShareExport(String),
    /// Binding the second-API surface onto the shared texture failed
    #[error("surface creation failed: {0}")]
    SurfaceCreation(String),
    /// Opening a captured frame through its share handle failed
    #[error("failed to open shared frame: {0}")]
    OpenShared(String),
    /// The frame lives on a device the render device cannot reach
    #[error("frame device {frame} is not reachable from render device {render}")]
    DeviceMismatch { frame: u64, render: u64 },
    /// Creating the converter/processor object failed
    #[error("blit processor creation failed: {0}")]
    ProcessorCreation(String),
    /// Creating the output view onto the shared texture failed
    #[error("output view creation failed: {0}")]
    OutputView(String),
    /// The blit itself failed
    #[error("blit failed: {0}")]
    Blit(String),
    /// Reading a GPU frame back to CPU memory failed
    #[error("readback failed: {0}")]
    Readback(String),
    /// The interop resources are not ready for use
    #[error("interop resources not ready")]
    NotReady,
}

/// Failure while waiting for the next display refresh
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("display refresh wait failed: {0}")]
pub struct RefreshError(pub String);

/// Failures handing a frame to the UI thread
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PresentError {
    /// The UI event loop is gone
    #[error("UI dispatcher closed")]
    DispatcherClosed,
    /// The UI thread did not run the present work in time
    #[error("present timed out")]
    Timeout,
    /// The render thread was asked to stop while waiting
    #[error("present interrupted")]
    Interrupted,
    /// The surface was replaced before the UI thread could bind it
    #[error("surface generation {surface} is stale (current {current})")]
    Stale { surface: u64, current: u64 },
    /// The consumer rejected the frame
    #[error("consumer rejected frame: {0}")]
    Rejected(String),
}

/// Activation-level failures reported to the owning collaborator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// The render thread could not be started
    #[error("failed to start render thread: {0}")]
    ThreadSpawn(String),
    /// The capture source refused a sample request during activation
    #[error("capture source rejected sample request: {0}")]
    RequestRejected(String),
    /// The capture device or render device is unavailable
    #[error("capture device error: {0}")]
    Device(String),
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GpuError::DeviceMismatch {
            frame: 2,
            render: 1,
        };
        assert_eq!(
            err.to_string(),
            "frame device 2 is not reachable from render device 1"
        );

        let err = PresentError::Stale {
            surface: 3,
            current: 4,
        };
        assert!(err.to_string().contains("stale"));
    }

    #[test]
    fn test_config_error_from_json() {
        let parse = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: ConfigError = parse.into();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
