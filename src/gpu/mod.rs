// SPDX-License-Identifier: GPL-3.0-only

//! Render device seam.
//!
//! [`GpuBackend`] is the narrow interface the render thread drives: allocate
//! the shareable output texture, export it, bind a second-API surface onto
//! it, and blit captured frames into it. [`wgpu_backend::WgpuBackend`] is the
//! production implementation on top of the process-wide device from
//! [`device`]; tests substitute a scripted backend.
//!
//! All resource types are plain owned values. Dropping one releases it, so
//! every early return in the pipeline cleans up without explicit release
//! calls.

pub mod device;
pub mod share;
pub mod wgpu_backend;

pub use ::wgpu;

use crate::backends::camera::{DeviceId, FrameSize, ShareHandle};
use crate::config::ScanLineOrder;
use crate::errors::GpuResult;
use std::sync::Arc;

/// Operations the render thread performs on the render device
pub trait GpuBackend: Send + 'static {
    /// Shareable output texture (the blit destination)
    type Texture: Send;
    /// Second-API view bound onto a shared texture, handed to the UI thread
    type Surface: Send + Sync + 'static;
    /// A captured frame opened on the render device
    type Source;
    /// Converter/processor object used by the blit
    type Processor: Send;
    /// Render-target view onto the shared texture
    type OutputView: Send;

    /// Identity of the render device
    fn device_id(&self) -> DeviceId;

    /// Allocate a shareable texture of `size`
    fn create_shared_texture(&mut self, size: FrameSize) -> GpuResult<Self::Texture>;

    /// Export the cross-device share handle of `texture`
    fn export_share_handle(&mut self, texture: &mut Self::Texture) -> GpuResult<ShareHandle>;

    /// Create the cross-API surface bound to `texture`
    fn create_surface(
        &mut self,
        texture: &Self::Texture,
        handle: ShareHandle,
    ) -> GpuResult<Self::Surface>;

    /// Open a captured frame's texture through its share handle
    fn open_shared(&mut self, device: DeviceId, handle: ShareHandle) -> GpuResult<Self::Source>;

    /// Create the converter used to blit into a target of `target_size`
    fn create_processor(
        &mut self,
        target_size: FrameSize,
        order: ScanLineOrder,
    ) -> GpuResult<Self::Processor>;

    /// Create an output view writing into `target`
    fn create_output_view(&mut self, target: &Self::Texture) -> GpuResult<Self::OutputView>;

    /// Issue one blit from `source` into `output`
    fn blit(
        &mut self,
        processor: &Self::Processor,
        source: &Self::Source,
        output: &Self::OutputView,
    ) -> GpuResult<()>;

    /// Copy a GPU-resident frame into tightly packed BGRA8 rows
    fn read_back(
        &mut self,
        device: DeviceId,
        handle: ShareHandle,
        size: FrameSize,
    ) -> GpuResult<Arc<[u8]>>;
}
