// SPDX-License-Identifier: GPL-3.0-only

//! Dirty-state machine for the shared output texture and its cross-API surface
//!
//! ```text
//!            size / mode / orientation change
//!   NotDirty ───────────────────────────────▶ TextureDirty
//!      ▲                                          │ allocate + export
//!      │ create + bind surface                    ▼
//!      └──────────────────────────────────── SurfaceDirty
//! ```
//!
//! Switching to a mode without GPU interop releases both resources at once
//! and forces `NotDirty`. A failed transition leaves the state where it was,
//! so the render loop simply retries on its next iteration.
//!
//! Every texture gets a new generation number. The generation of the surface
//! that may currently be presented is published through an atomic that the
//! UI thread checks before binding; it is cleared the moment the state turns
//! dirty, so a surface derived from a replaced texture is never presented.

use crate::backends::camera::{FrameSize, ShareHandle};
use crate::config::{RenderMode, ScanLineOrder};
use crate::errors::{GpuError, GpuResult};
use crate::gpu::GpuBackend;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Published when no surface may be presented
pub const NO_LIVE_GENERATION: u64 = 0;

/// Validity of the interop resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirtyState {
    NotDirty,
    TextureDirty,
    SurfaceDirty,
}

/// The shareable blit destination and its exported handle
#[derive(Debug)]
pub struct SharedTexture<T> {
    pub texture: T,
    pub handle: ShareHandle,
    pub generation: u64,
}

/// Second-API view bound onto one generation of the shared texture
#[derive(Debug)]
pub struct CrossApiSurface<S> {
    generation: u64,
    size: FrameSize,
    inner: S,
}

impl<S> CrossApiSurface<S> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

/// Owner of the interop resources; mutated only by the render thread and
/// by mode switches holding the render lock
pub struct ResourceState<B: GpuBackend> {
    mode: RenderMode,
    order: ScanLineOrder,
    size: FrameSize,
    dirty: DirtyState,
    texture: Option<SharedTexture<B::Texture>>,
    surface: Option<Arc<CrossApiSurface<B::Surface>>>,
    last_generation: u64,
    live_generation: Arc<AtomicU64>,
}

impl<B: GpuBackend> ResourceState<B> {
    pub fn new(mode: RenderMode, order: ScanLineOrder, size: FrameSize) -> Self {
        Self {
            mode,
            order,
            size,
            dirty: if mode.uses_interop() {
                DirtyState::TextureDirty
            } else {
                DirtyState::NotDirty
            },
            texture: None,
            surface: None,
            last_generation: NO_LIVE_GENERATION,
            live_generation: Arc::new(AtomicU64::new(NO_LIVE_GENERATION)),
        }
    }

    pub fn dirty(&self) -> DirtyState {
        self.dirty
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn scan_line_order(&self) -> ScanLineOrder {
        self.order
    }

    pub fn output_size(&self) -> FrameSize {
        self.size
    }

    /// Number of textures allocated so far
    pub fn generations_created(&self) -> u64 {
        self.last_generation
    }

    /// Shared cell holding the generation the UI thread may present
    pub fn live_generation(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.live_generation)
    }

    /// The blit destination, only while the resources are ready
    pub fn target(&self) -> Option<&SharedTexture<B::Texture>> {
        match self.dirty {
            DirtyState::NotDirty => self.texture.as_ref(),
            _ => None,
        }
    }

    /// The surface to present, only while the resources are ready
    pub fn surface(&self) -> Option<Arc<CrossApiSurface<B::Surface>>> {
        match self.dirty {
            DirtyState::NotDirty => self.surface.clone(),
            _ => None,
        }
    }

    pub fn has_resources(&self) -> bool {
        self.texture.is_some() || self.surface.is_some()
    }

    /// Change the output size; recreates the resources when interop is in use
    pub fn set_output_size(&mut self, size: FrameSize) {
        if size == self.size {
            return;
        }
        debug!(from = %self.size, to = %size, "Output size changed");
        self.size = size;
        self.mark_texture_dirty();
    }

    /// Change the scan-line order; the blit is rebuilt against a new texture
    pub fn set_scan_line_order(&mut self, order: ScanLineOrder) {
        if order == self.order {
            return;
        }
        debug!(from = ?self.order, to = ?order, "Scan-line order changed");
        self.order = order;
        self.mark_texture_dirty();
    }

    /// Switch rendering mode
    pub fn set_mode(&mut self, mode: RenderMode) {
        if mode == self.mode {
            return;
        }
        info!(from = %self.mode, to = %mode, "Render mode switched");
        self.mode = mode;
        if mode.uses_interop() {
            self.mark_texture_dirty();
        } else {
            self.release();
        }
    }

    fn mark_texture_dirty(&mut self) {
        self.live_generation
            .store(NO_LIVE_GENERATION, Ordering::SeqCst);
        if self.mode.uses_interop() {
            self.dirty = DirtyState::TextureDirty;
        }
    }

    /// Drive the dirty state towards `NotDirty`.
    ///
    /// On error the state is exactly what it was before the failing step and
    /// no partially created resource is kept.
    pub fn prepare(&mut self, backend: &mut B) -> GpuResult<DirtyState> {
        if self.dirty == DirtyState::TextureDirty {
            self.recreate_texture(backend)?;
        }
        if self.dirty == DirtyState::SurfaceDirty {
            self.bind_surface(backend)?;
        }
        Ok(self.dirty)
    }

    fn recreate_texture(&mut self, backend: &mut B) -> GpuResult<()> {
        // The old surface must go before its texture is replaced
        self.surface = None;
        self.texture = None;

        let mut texture = backend.create_shared_texture(self.size).inspect_err(|e| {
            warn!(size = %self.size, error = %e, "Shared texture allocation failed, will retry");
        })?;
        // On export failure the fresh texture is dropped here
        let handle = backend.export_share_handle(&mut texture).inspect_err(|e| {
            warn!(error = %e, "Share handle export failed, will retry");
        })?;

        self.last_generation += 1;
        let generation = self.last_generation;
        self.texture = Some(SharedTexture {
            texture,
            handle,
            generation,
        });
        self.dirty = DirtyState::SurfaceDirty;
        debug!(generation, handle = %handle, size = %self.size, "Shared texture ready");
        Ok(())
    }

    fn bind_surface(&mut self, backend: &mut B) -> GpuResult<()> {
        let Some(shared) = self.texture.as_ref() else {
            // Lost the texture somehow; start over from allocation
            self.dirty = DirtyState::TextureDirty;
            return Err(GpuError::NotReady);
        };
        let inner = backend
            .create_surface(&shared.texture, shared.handle)
            .inspect_err(|e| {
                warn!(generation = shared.generation, error = %e, "Surface creation failed, will retry");
            })?;

        let generation = shared.generation;
        self.surface = Some(Arc::new(CrossApiSurface {
            generation,
            size: self.size,
            inner,
        }));
        self.dirty = DirtyState::NotDirty;
        self.live_generation.store(generation, Ordering::SeqCst);
        debug!(generation, "Cross-API surface bound");
        Ok(())
    }

    /// Release both resources; the state is `NotDirty` in non-interop mode
    /// and `TextureDirty` otherwise
    pub fn release(&mut self) {
        self.live_generation
            .store(NO_LIVE_GENERATION, Ordering::SeqCst);
        let had_resources = self.has_resources();
        self.surface = None;
        self.texture = None;
        self.dirty = if self.mode.uses_interop() {
            DirtyState::TextureDirty
        } else {
            DirtyState::NotDirty
        };
        if had_resources {
            debug!("Interop resources released");
        }
    }
}
