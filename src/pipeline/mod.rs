// SPDX-License-Identifier: GPL-3.0-only

//! Camera preview pipeline
//!
//! Captured frames travel from the capture source into the [`SampleQueue`],
//! are consumed by the refresh-paced render thread, blitted into the shared
//! output texture (or passed through as pixels in software mode) and handed
//! to the UI thread for presentation.
//!
//! ```text
//! capture thread(s)          render thread                 UI thread
//! ─────────────────          ─────────────                 ─────────
//! on_sample_captured ─▶ SampleQueue ─▶ RenderLoop ─▶ Presenter ─▶ FrameSink
//!        ▲                            │  ResourceState
//!        └── request_sample ◀─────────┤  Blitter
//! on_clock_event ─▶ ActivationController (starts/stops the render thread)
//! ```
//!
//! [`PreviewPipeline`] wires the components together and is the only type
//! most callers need.

pub mod activation;
pub mod blitter;
pub mod presenter;
pub mod refresh;
pub mod resource_state;
pub mod sample_queue;
pub mod scheduler;
pub mod stats;

pub use activation::{ActivationController, ActivationState, SampleRequester};
pub use presenter::{
    EventLoopDispatcher, FrameSink, PresentedFrame, Presenter, UiDispatcher, UiEventLoop,
    UiTask, ui_event_loop,
};
pub use refresh::{IntervalRefreshClock, RefreshClock};
pub use resource_state::{CrossApiSurface, DirtyState, ResourceState};
pub use sample_queue::{Completion, SampleQueue};
pub use scheduler::{IterationOutcome, RenderLoop, RenderScheduler, RenderState};
pub use stats::{PipelineStats, SkipReason, StatsSnapshot};

use crate::backends::camera::{
    CaptureErrorSink, CaptureSource, ClockEvent, FrameBuffer, FrameSize, SampleRequest,
};
use crate::config::{PipelineConfig, RenderMode, ScanLineOrder};
use crate::errors::ConfigResult;
use crate::gpu::GpuBackend;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

/// External collaborators a pipeline is built from
pub struct PipelineParts<B: GpuBackend> {
    pub backend: B,
    pub source: Arc<dyn CaptureSource>,
    pub refresh: Arc<dyn RefreshClock>,
    pub dispatcher: Arc<dyn UiDispatcher>,
    pub sink: Arc<dyn FrameSink<B::Surface>>,
    pub error_sink: Arc<dyn CaptureErrorSink>,
}

/// One camera preview: capture in, presented frames out
pub struct PreviewPipeline<B: GpuBackend> {
    render: Arc<Mutex<RenderState<B>>>,
    queue: Arc<SampleQueue>,
    requester: Arc<SampleRequester>,
    stats: Arc<PipelineStats>,
    activation: ActivationController<B>,
}

impl<B: GpuBackend> PreviewPipeline<B> {
    /// Build a stopped pipeline.
    ///
    /// The rendering mode is resolved once here from the config and the
    /// capture device's policy entry.
    pub fn new(config: &PipelineConfig, parts: PipelineParts<B>) -> ConfigResult<Self> {
        config.validate()?;

        let device_identifier = parts.source.device_identifier();
        let mode = config.effective_render_mode(&device_identifier);
        let order = config.effective_scan_line_order();
        let size = config.output_size();
        info!(
            device = %device_identifier,
            render_device = %parts.backend.device_id(),
            mode = %mode,
            order = ?order,
            size = %size,
            "Creating preview pipeline"
        );

        let resources = ResourceState::new(mode, order, size);
        let live_generation = resources.live_generation();
        let render = Arc::new(Mutex::new(RenderState::new(parts.backend, resources)));
        let queue = Arc::new(SampleQueue::new());
        let requester = Arc::new(SampleRequester::new(Arc::clone(&queue), parts.source));
        let stats = Arc::new(PipelineStats::default());
        let presenter = Arc::new(Presenter::new(parts.dispatcher, parts.sink, live_generation));

        let render_loop = RenderLoop::new(
            Arc::clone(&render),
            Arc::clone(&queue),
            Arc::clone(&requester),
            parts.refresh,
            presenter,
            Arc::clone(&stats),
        );
        let activation = ActivationController::new(
            render_loop,
            Arc::clone(&queue),
            Arc::clone(&requester),
            parts.error_sink,
        );

        Ok(Self {
            render,
            queue,
            requester,
            stats,
            activation,
        })
    }

    fn lock_render(&self) -> MutexGuard<'_, RenderState<B>> {
        self.render.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clock notification from the capture device (any thread)
    pub fn on_clock_event(&self, event: ClockEvent) {
        self.activation.on_clock_event(event);
    }

    /// Sample-captured completion from the capture device (any thread).
    ///
    /// Never blocks on activation changes and never fails. Returns whether
    /// the frame was queued.
    pub fn on_sample_captured(&self, request: SampleRequest, frame: FrameBuffer) -> bool {
        if !self.activation.state().accepts_samples() {
            trace!(sequence = frame.sequence, "Pipeline inactive, ignoring sample");
            return false;
        }
        let completion = self.queue.complete(request, frame);
        if completion == Completion::Stale {
            return false;
        }
        // Only top up for the activation this completion belongs to
        if let Err(e) = self.requester.top_up_in(request.epoch) {
            warn!(error = %e, "Capture source refused sample request");
        }
        completion == Completion::Enqueued
    }

    /// Switch rendering mode under the render lock
    pub fn set_render_mode(&self, mode: RenderMode) {
        let mut render = self.lock_render();
        render.resources.set_mode(mode);
        if !mode.uses_interop() {
            render.blitter.invalidate();
        }
    }

    pub fn set_output_size(&self, size: FrameSize) {
        if size.is_empty() {
            warn!(size = %size, "Ignoring empty output size");
            return;
        }
        self.lock_render().resources.set_output_size(size);
    }

    pub fn set_scan_line_order(&self, order: ScanLineOrder) {
        self.lock_render().resources.set_scan_line_order(order);
    }

    pub fn state(&self) -> ActivationState {
        self.activation.state()
    }

    /// Whether the render thread is alive
    pub fn is_rendering(&self) -> bool {
        self.activation.is_rendering()
    }

    pub fn render_mode(&self) -> RenderMode {
        self.lock_render().resources.mode()
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.lock_render().resources.dirty()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn outstanding_requests(&self) -> usize {
        self.queue.outstanding()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.frames_enqueued = self.queue.enqueued_total();
        snapshot.frames_dropped = self.queue.dropped_total();
        snapshot.texture_generations = self.lock_render().resources.generations_created();
        snapshot
    }

    /// Stop the pipeline and release GPU resources
    pub fn shutdown(&self) {
        self.activation.on_clock_event(ClockEvent::Stop);
        self.lock_render().resources.release();
        self.lock_render().blitter.invalidate();
        debug!("Preview pipeline shut down");
    }
}
