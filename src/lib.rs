// SPDX-License-Identifier: GPL-3.0-only

//! Camera preview pipeline
//!
//! Moves captured camera frames through GPU memory to an on-screen surface
//! with as little copying as possible, coordinating the capture device's
//! clock with the display refresh.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Capture source seam and frame types
//! - [`gpu`]: Render device provider, share handles and the wgpu backend
//! - [`pipeline`]: Sample queue, resource state, blitter, render thread,
//!   activation and presentation
//! - [`config`]: Pipeline configuration and device policy
//!
//! # Example
//!
//! ```ignore
//! let pipeline = PreviewPipeline::new(&config, parts)?;
//! pipeline.on_clock_event(ClockEvent::Start);
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod pipeline;

// Re-export commonly used types
pub use backends::camera::{
    CaptureErrorSink, CaptureSource, ClockEvent, DeviceId, FrameBuffer, FrameSize, FrameStorage,
    SampleRequest, ShareHandle,
};
pub use config::{CameraFacing, DevicePolicy, PipelineConfig, RenderMode, ScanLineOrder};
pub use errors::{CaptureError, ConfigError, GpuError, PresentError, RefreshError};
pub use gpu::GpuBackend;
pub use pipeline::{ActivationState, DirtyState, PipelineParts, PreviewPipeline, StatsSnapshot};
