// SPDX-License-Identifier: GPL-3.0-only

//! Capture-clock driven activation
//!
//! ```text
//!            start / restart                 requests primed
//!  Stopped ──────────────────▶ Starting ───────────────────────▶ Active
//!     ▲  ▲                        │ spawn or request failure       │
//!     │  └────────────────────────┘ (reported as capture error)    │
//!     │                 stop                                       │ pause
//!     ├──────────────────────────────────── Paused ◀───────────────┘
//!     └──────────────────────── stop ─────────────────────────────────
//! ```
//!
//! Clock notifications arrive on arbitrary capture threads. Transitions are
//! serialised by a mutex; the current state is also mirrored into an atomic
//! tag so the sample-captured callback can check it without ever waiting on
//! a transition in progress.

use crate::backends::camera::{CaptureErrorSink, CaptureSource, ClockEvent, SampleRequest};
use crate::constants::RENDER_THREAD_PREFIX;
use crate::errors::CaptureError;
use crate::gpu::GpuBackend;
use crate::pipeline::sample_queue::SampleQueue;
use crate::pipeline::scheduler::{RenderLoop, RenderScheduler};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Issues sample requests to the capture source while below the cap
pub struct SampleRequester {
    queue: Arc<SampleQueue>,
    source: Arc<dyn CaptureSource>,
}

impl SampleRequester {
    pub fn new(queue: Arc<SampleQueue>, source: Arc<dyn CaptureSource>) -> Self {
        Self { queue, source }
    }

    /// Request samples until the outstanding cap is reached.
    ///
    /// Returns how many requests were issued. A refused request gives its
    /// slot back and stops the top-up.
    pub fn top_up(&self) -> Result<usize, CaptureError> {
        self.fill(|| self.queue.try_reserve_request())
    }

    /// Top up on behalf of a completion accounted against `epoch`.
    ///
    /// Stops as soon as the queue has been flushed since, so a completion
    /// racing a stop never paces the source of a stopped pipeline.
    pub fn top_up_in(&self, epoch: u64) -> Result<usize, CaptureError> {
        self.fill(|| self.queue.try_reserve_request_in(epoch))
    }

    /// Top up only when nothing is in flight.
    ///
    /// With requests outstanding their completions do the top-up; with none
    /// (the source refused earlier ones) nothing else would.
    pub fn recover(&self) -> Result<usize, CaptureError> {
        if self.queue.outstanding() > 0 {
            return Ok(0);
        }
        self.top_up()
    }

    fn fill(&self, mut reserve: impl FnMut() -> Option<SampleRequest>) -> Result<usize, CaptureError> {
        let mut issued = 0;
        while let Some(request) = reserve() {
            if let Err(e) = self.source.request_sample(request) {
                self.queue.cancel_request(request);
                return Err(e);
            }
            issued += 1;
        }
        Ok(issued)
    }
}

/// Activation state of one pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationState {
    Stopped,
    Starting,
    Active,
    Paused,
}

impl ActivationState {
    fn tag(self) -> u8 {
        match self {
            ActivationState::Stopped => 0,
            ActivationState::Starting => 1,
            ActivationState::Active => 2,
            ActivationState::Paused => 3,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            1 => ActivationState::Starting,
            2 => ActivationState::Active,
            3 => ActivationState::Paused,
            _ => ActivationState::Stopped,
        }
    }

    /// Whether arriving samples are accepted in this state
    pub fn accepts_samples(self) -> bool {
        matches!(self, ActivationState::Starting | ActivationState::Active)
    }
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationState::Stopped => write!(f, "stopped"),
            ActivationState::Starting => write!(f, "starting"),
            ActivationState::Active => write!(f, "active"),
            ActivationState::Paused => write!(f, "paused"),
        }
    }
}

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// Translates capture clock events into render-thread start and stop
pub struct ActivationController<B: GpuBackend> {
    name: String,
    state_tag: AtomicU8,
    scheduler: Mutex<Option<RenderScheduler>>,
    render_loop: RenderLoop<B>,
    queue: Arc<SampleQueue>,
    requester: Arc<SampleRequester>,
    error_sink: Arc<dyn CaptureErrorSink>,
}

impl<B: GpuBackend> ActivationController<B> {
    pub fn new(
        render_loop: RenderLoop<B>,
        queue: Arc<SampleQueue>,
        requester: Arc<SampleRequester>,
        error_sink: Arc<dyn CaptureErrorSink>,
    ) -> Self {
        let id = NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            name: format!("{}-{}", RENDER_THREAD_PREFIX, id),
            state_tag: AtomicU8::new(ActivationState::Stopped.tag()),
            scheduler: Mutex::new(None),
            render_loop,
            queue,
            requester,
            error_sink,
        }
    }

    pub fn state(&self) -> ActivationState {
        ActivationState::from_tag(self.state_tag.load(Ordering::SeqCst))
    }

    /// Whether the render thread is currently alive
    pub fn is_rendering(&self) -> bool {
        self.scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(RenderScheduler::is_running)
    }

    fn set_state(&self, state: ActivationState) {
        let previous = ActivationState::from_tag(self.state_tag.swap(state.tag(), Ordering::SeqCst));
        if previous != state {
            debug!(name = %self.name, from = %previous, to = %state, "Activation state changed");
        }
    }

    /// Handle a clock notification from the capture device
    pub fn on_clock_event(&self, event: ClockEvent) {
        debug!(name = %self.name, event = %event, "Clock event");
        match event {
            ClockEvent::Start | ClockEvent::Restart => self.activate(),
            ClockEvent::Stop => self.deactivate(ActivationState::Stopped),
            ClockEvent::Pause => self.deactivate(ActivationState::Paused),
        }
    }

    fn activate(&self) {
        let mut scheduler = self.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(
            self.state(),
            ActivationState::Active | ActivationState::Starting
        ) {
            debug!(name = %self.name, "Already active, ignoring start");
            return;
        }
        self.set_state(ActivationState::Starting);

        // Fresh epoch: completions from any earlier activation are ignored
        self.queue.discard();

        match RenderScheduler::spawn_loop(&self.name, self.render_loop.clone()) {
            Ok(started) => *scheduler = Some(started),
            Err(e) => {
                self.fail_activation(&mut scheduler, CaptureError::ThreadSpawn(e.to_string()));
                return;
            }
        }

        if let Err(e) = self.requester.top_up() {
            let message = e.to_string();
            self.fail_activation(&mut scheduler, CaptureError::RequestRejected(message));
            return;
        }

        self.set_state(ActivationState::Active);
        info!(name = %self.name, "Preview pipeline active");
    }

    fn fail_activation(&self, scheduler: &mut Option<RenderScheduler>, err: CaptureError) {
        error!(name = %self.name, error = %err, "Preview activation failed");
        self.set_state(ActivationState::Stopped);
        if let Some(mut running) = scheduler.take() {
            running.stop();
        }
        self.queue.discard();
        self.error_sink.capture_error(err);
    }

    /// Stop or pause. Always succeeds and is idempotent.
    fn deactivate(&self, target: ActivationState) {
        let mut scheduler = self.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.state();
        if current == target || current == ActivationState::Stopped {
            debug!(name = %self.name, state = %current, "Already inactive, ignoring");
            return;
        }

        // Stop accepting samples before the thread goes away
        self.set_state(target);
        if let Some(mut running) = scheduler.take() {
            running.stop();
        }
        self.queue.discard();
        info!(name = %self.name, state = %target, "Preview pipeline deactivated");
    }
}

impl<B: GpuBackend> Drop for ActivationController<B> {
    fn drop(&mut self) {
        self.deactivate(ActivationState::Stopped);
    }
}
