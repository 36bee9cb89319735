// SPDX-License-Identifier: GPL-3.0-only

//! GPU-to-GPU copy of a captured frame into the shared output texture
//!
//! The converter and the output view are expensive to build, so they are
//! cached against the pair (frame device, target texture generation) and
//! only rebuilt when one of those changes. A failing blit drops the frame but
//! leaves the cache alone.

use crate::backends::camera::{DeviceId, FrameBuffer, FrameSize, FrameStorage};
use crate::config::ScanLineOrder;
use crate::errors::{GpuError, GpuResult};
use crate::gpu::GpuBackend;
use crate::pipeline::resource_state::SharedTexture;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheKey {
    /// Device the captured frames come from
    device: DeviceId,
    target_generation: u64,
}

struct Cached<B: GpuBackend> {
    key: CacheKey,
    processor: B::Processor,
    output: B::OutputView,
}

/// Blits frames into the shared texture, caching the converter objects
pub struct Blitter<B: GpuBackend> {
    cache: Option<Cached<B>>,
    rebuilds: u64,
}

impl<B: GpuBackend> Default for Blitter<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GpuBackend> Blitter<B> {
    pub fn new() -> Self {
        Self {
            cache: None,
            rebuilds: 0,
        }
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Copy `frame` into `target`.
    ///
    /// `frame` must be GPU-resident; a CPU frame is rejected without touching
    /// the cache.
    pub fn blit(
        &mut self,
        backend: &mut B,
        frame: &FrameBuffer,
        target: &SharedTexture<B::Texture>,
        target_size: FrameSize,
        order: ScanLineOrder,
    ) -> GpuResult<()> {
        let FrameStorage::Gpu { device, handle, .. } = &frame.storage else {
            return Err(GpuError::Blit(format!(
                "frame {} is not GPU-resident",
                frame.sequence
            )));
        };

        let source = backend.open_shared(*device, *handle)?;

        let key = CacheKey {
            device: *device,
            target_generation: target.generation,
        };
        if self.cache.as_ref().map(|c| c.key) != Some(key) {
            // Old objects reference the previous target; free them first
            self.cache = None;
            let processor = backend.create_processor(target_size, order)?;
            let output = backend.create_output_view(&target.texture)?;
            self.rebuilds += 1;
            debug!(
                device = %key.device,
                cross_device = key.device != backend.device_id(),
                generation = key.target_generation,
                rebuilds = self.rebuilds,
                "Blit converter rebuilt"
            );
            self.cache = Some(Cached {
                key,
                processor,
                output,
            });
        }

        let Some(cached) = self.cache.as_ref() else {
            return Err(GpuError::NotReady);
        };
        backend.blit(&cached.processor, &source, &cached.output)?;
        trace!(sequence = frame.sequence, generation = target.generation, "Frame blitted");
        Ok(())
    }
}
