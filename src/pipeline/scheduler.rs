// SPDX-License-Identifier: GPL-3.0-only

//! Render thread: one refresh-paced iteration, and the thread that runs it
//!
//! Each iteration:
//!
//! 1. recreate the interop resources if they are dirty (skip on failure)
//! 2. wait for the display refresh (skip on failure)
//! 3. take the next frame and blit it, or pass its pixels through
//! 4. hand the result to the UI thread and wait for it to be presented
//!
//! Every failure drops at most one frame and the next iteration starts over.
//! Nothing here is fatal and nothing escalates past the render thread.

use crate::backends::camera::{FrameBuffer, FrameStorage};
use crate::constants::LOG_EVERY_N_FRAMES;
use crate::errors::PresentError;
use crate::gpu::GpuBackend;
use crate::pipeline::activation::SampleRequester;
use crate::pipeline::blitter::Blitter;
use crate::pipeline::presenter::{PresentedFrame, Presenter};
use crate::pipeline::refresh::RefreshClock;
use crate::pipeline::resource_state::{DirtyState, ResourceState};
use crate::pipeline::sample_queue::SampleQueue;
use crate::pipeline::stats::{PipelineStats, SkipReason};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Everything the render thread mutates, behind one short-held lock
pub struct RenderState<B: GpuBackend> {
    pub backend: B,
    pub resources: ResourceState<B>,
    pub blitter: Blitter<B>,
}

impl<B: GpuBackend> RenderState<B> {
    pub fn new(backend: B, resources: ResourceState<B>) -> Self {
        Self {
            backend,
            resources,
            blitter: Blitter::new(),
        }
    }
}

/// Result of one render iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Frame with this sequence number reached the consumer
    Presented(u64),
    Skipped(SkipReason),
}

/// One pipeline's render iteration and its collaborators
pub struct RenderLoop<B: GpuBackend> {
    render: Arc<Mutex<RenderState<B>>>,
    queue: Arc<SampleQueue>,
    requester: Arc<SampleRequester>,
    refresh: Arc<dyn RefreshClock>,
    presenter: Arc<Presenter<B::Surface>>,
    stats: Arc<PipelineStats>,
}

impl<B: GpuBackend> Clone for RenderLoop<B> {
    fn clone(&self) -> Self {
        Self {
            render: Arc::clone(&self.render),
            queue: Arc::clone(&self.queue),
            requester: Arc::clone(&self.requester),
            refresh: Arc::clone(&self.refresh),
            presenter: Arc::clone(&self.presenter),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<B: GpuBackend> RenderLoop<B> {
    pub fn new(
        render: Arc<Mutex<RenderState<B>>>,
        queue: Arc<SampleQueue>,
        requester: Arc<SampleRequester>,
        refresh: Arc<dyn RefreshClock>,
        presenter: Arc<Presenter<B::Surface>>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            render,
            queue,
            requester,
            refresh,
            presenter,
            stats,
        }
    }

    /// Run one iteration; `stop` is the cooperative interruption flag
    pub fn run_iteration(&self, stop: &AtomicBool) -> IterationOutcome {
        let outcome = self.iterate(stop);
        match outcome {
            IterationOutcome::Presented(sequence) => {
                self.stats.record_presented();
                let presented = self.stats.presented();
                if presented % LOG_EVERY_N_FRAMES == 0 {
                    info!(presented, sequence, "Preview frames presented");
                }
            }
            IterationOutcome::Skipped(reason) => self.stats.record_skip(reason),
        }
        outcome
    }

    fn iterate(&self, stop: &AtomicBool) -> IterationOutcome {
        // 1. Resources first, so a recreation strictly precedes any use
        {
            let mut guard = self.render.lock().unwrap_or_else(|e| e.into_inner());
            let RenderState {
                backend, resources, ..
            } = &mut *guard;
            if resources.dirty() != DirtyState::NotDirty
                && resources.prepare(backend).is_err()
            {
                return IterationOutcome::Skipped(SkipReason::ResourcesNotReady);
            }
        }

        // Restart pacing if the source refused every request earlier
        if let Err(e) = self.requester.recover() {
            debug!(error = %e, "Sample request refused, retrying next iteration");
        }

        // 2. Pace on the display
        if let Err(e) = self.refresh.wait_for_refresh() {
            debug!(error = %e, "Refresh wait failed, skipping iteration");
            return IterationOutcome::Skipped(SkipReason::RefreshWaitFailed);
        }
        if stop.load(Ordering::SeqCst) {
            return IterationOutcome::Skipped(SkipReason::Interrupted);
        }

        // 3. Next frame. Changes that landed during the refresh wait are
        // applied before a frame is taken.
        let presented = {
            let mut guard = self.render.lock().unwrap_or_else(|e| e.into_inner());
            let RenderState {
                backend, resources, ..
            } = &mut *guard;
            if resources.dirty() != DirtyState::NotDirty && resources.prepare(backend).is_err() {
                return IterationOutcome::Skipped(SkipReason::ResourcesNotReady);
            }
            let Some(frame) = self.queue.dequeue() else {
                return IterationOutcome::Skipped(SkipReason::NoFrame);
            };
            match self.produce(&mut guard, frame) {
                Ok(presented) => presented,
                Err(reason) => return IterationOutcome::Skipped(reason),
            }
        };

        // 4. Present on the UI thread
        let sequence = presented.sequence();
        match self.presenter.present(presented, stop) {
            Ok(()) => IterationOutcome::Presented(sequence),
            Err(PresentError::Stale { surface, current }) => {
                debug!(surface, current, sequence, "Dropped frame bound to a replaced surface");
                IterationOutcome::Skipped(SkipReason::StaleSurface)
            }
            Err(PresentError::Interrupted) => IterationOutcome::Skipped(SkipReason::Interrupted),
            Err(e) => {
                debug!(error = %e, sequence, "Present failed");
                IterationOutcome::Skipped(SkipReason::PresentFailed)
            }
        }
    }

    /// Turn a dequeued frame into something presentable. The frame is
    /// consumed here and its lease released on return.
    fn produce(
        &self,
        state: &mut RenderState<B>,
        frame: FrameBuffer,
    ) -> Result<PresentedFrame<B::Surface>, SkipReason> {
        let RenderState {
            backend,
            resources,
            blitter,
        } = state;
        let sequence = frame.sequence;

        // CPU frames have nothing to blit; they pass through in either mode
        if let FrameStorage::Cpu { data, stride } = &frame.storage {
            return Ok(PresentedFrame::Pixels {
                data: Arc::clone(data),
                size: frame.size,
                stride: *stride,
                sequence,
            });
        }

        if resources.mode().uses_interop() {
            let (Some(target), Some(surface)) = (resources.target(), resources.surface()) else {
                trace!(sequence, "Interop resources not ready, dropping frame");
                return Err(SkipReason::ResourcesNotReady);
            };
            blitter
                .blit(
                    backend,
                    &frame,
                    target,
                    resources.output_size(),
                    resources.scan_line_order(),
                )
                .map_err(|e| {
                    debug!(error = %e, sequence, "Blit failed, dropping frame");
                    SkipReason::BlitFailed
                })?;
            return Ok(PresentedFrame::Texture { surface, sequence });
        }

        let FrameStorage::Gpu { device, handle, .. } = &frame.storage else {
            return Err(SkipReason::ReadbackFailed);
        };
        let data = backend
            .read_back(*device, *handle, frame.size)
            .map_err(|e| {
                debug!(error = %e, sequence, "Readback failed, dropping frame");
                SkipReason::ReadbackFailed
            })?;
        Ok(PresentedFrame::Pixels {
            data,
            size: frame.size,
            stride: frame.size.packed_stride(),
            sequence,
        })
    }
}

/// Dedicated render thread for one active pipeline
///
/// Shutdown is synchronous: [`RenderScheduler::stop`] raises the
/// interruption flag and joins the thread before returning.
pub struct RenderScheduler {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Cooperative interruption flag, checked between iterations
    stop_signal: Arc<AtomicBool>,
    /// Name for logging
    name: String,
}

impl RenderScheduler {
    /// Spawn the render thread running `iteration` until interrupted
    pub fn start<F>(name: &str, mut iteration: F) -> std::io::Result<Self>
    where
        F: FnMut(&AtomicBool) + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        info!(name = %name, "Starting render thread");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %name_clone, "Render thread started");
                while !stop_signal_clone.load(Ordering::SeqCst) {
                    iteration(&stop_signal_clone);
                }
                info!(name = %name_clone, "Render thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Start a render thread driving `render_loop`
    pub fn spawn_loop<B: GpuBackend>(name: &str, render_loop: RenderLoop<B>) -> std::io::Result<Self> {
        Self::start(name, move |stop| {
            render_loop.run_iteration(stop);
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Raise the interruption flag without waiting
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting render thread stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Interrupt and join
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.name, "Waiting for render thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Render thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Render thread finished");
            }
        }
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "RenderScheduler dropped, stopping thread");
            self.stop();
        }
    }
}
