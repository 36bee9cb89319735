// SPDX-License-Identifier: GPL-3.0-only

//! Hands finished frames to the UI thread
//!
//! The render thread never touches the presentation consumer directly. It
//! posts a closure to the UI thread's event loop through a [`UiDispatcher`]
//! and waits for that closure to report back. The wait is sliced so the
//! render thread notices a stop request even if the UI thread is the one
//! asking it to stop, and it is bounded so a stalled UI thread costs one
//! dropped frame rather than a hung render loop.

use crate::backends::camera::FrameSize;
use crate::constants::{PRESENT_POLL_INTERVAL, PRESENT_TIMEOUT};
use crate::errors::PresentError;
use crate::pipeline::resource_state::CrossApiSurface;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Work item executed on the UI thread
pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

/// Posts work onto the UI/owner thread's event loop
pub trait UiDispatcher: Send + Sync {
    fn dispatch(&self, task: UiTask) -> Result<(), PresentError>;
}

/// What the presentation consumer receives
#[derive(Debug)]
pub enum PresentedFrame<S> {
    /// Zero-copy: the surface bound onto the shared texture
    Texture {
        surface: Arc<CrossApiSurface<S>>,
        sequence: u64,
    },
    /// Mapped BGRA8 rows
    Pixels {
        data: Arc<[u8]>,
        size: FrameSize,
        stride: u32,
        sequence: u64,
    },
}

impl<S> PresentedFrame<S> {
    pub fn sequence(&self) -> u64 {
        match self {
            PresentedFrame::Texture { sequence, .. } | PresentedFrame::Pixels { sequence, .. } => {
                *sequence
            }
        }
    }

    pub fn size(&self) -> FrameSize {
        match self {
            PresentedFrame::Texture { surface, .. } => surface.size(),
            PresentedFrame::Pixels { size, .. } => *size,
        }
    }
}

/// Presentation consumer; always called on the UI thread
pub trait FrameSink<S>: Send + Sync {
    fn present(&self, frame: PresentedFrame<S>) -> Result<(), PresentError>;
}

/// Receiving half of a simple UI event loop
pub struct UiEventLoop {
    receiver: mpsc::Receiver<UiTask>,
}

/// Sending half of [`UiEventLoop`]
#[derive(Clone)]
pub struct EventLoopDispatcher {
    sender: mpsc::Sender<UiTask>,
}

/// Create a UI event loop to be pumped by the owning thread
pub fn ui_event_loop() -> (UiEventLoop, EventLoopDispatcher) {
    let (sender, receiver) = mpsc::channel();
    (UiEventLoop { receiver }, EventLoopDispatcher { sender })
}

impl UiDispatcher for EventLoopDispatcher {
    fn dispatch(&self, task: UiTask) -> Result<(), PresentError> {
        self.sender
            .send(task)
            .map_err(|_| PresentError::DispatcherClosed)
    }
}

impl UiEventLoop {
    /// Run every task that is already queued; returns how many ran
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Pump the loop for `duration`, running tasks as they arrive
    pub fn run_for(&self, duration: Duration) -> usize {
        let deadline = Instant::now() + duration;
        let mut ran = 0;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return ran;
            }
            match self.receiver.recv_timeout(deadline - now) {
                Ok(task) => {
                    task();
                    ran += 1;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => return ran,
                Err(mpsc::RecvTimeoutError::Disconnected) => return ran,
            }
        }
    }
}

/// Marshals frames onto the UI thread and waits for them to be presented
pub struct Presenter<S> {
    dispatcher: Arc<dyn UiDispatcher>,
    sink: Arc<dyn FrameSink<S>>,
    live_generation: Arc<AtomicU64>,
    timeout: Duration,
}

impl<S: Send + Sync + 'static> Presenter<S> {
    pub fn new(
        dispatcher: Arc<dyn UiDispatcher>,
        sink: Arc<dyn FrameSink<S>>,
        live_generation: Arc<AtomicU64>,
    ) -> Self {
        Self {
            dispatcher,
            sink,
            live_generation,
            timeout: PRESENT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Present `frame` on the UI thread and wait for the outcome.
    ///
    /// A texture frame is checked against the live surface generation on the
    /// UI thread, right before binding; a replaced surface is rejected as
    /// [`PresentError::Stale`] and never reaches the sink.
    pub fn present(&self, frame: PresentedFrame<S>, stop: &AtomicBool) -> Result<(), PresentError> {
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let sink = Arc::clone(&self.sink);
        let live_generation = Arc::clone(&self.live_generation);
        let sequence = frame.sequence();

        self.dispatcher.dispatch(Box::new(move || {
            let stale = match &frame {
                PresentedFrame::Texture { surface, .. } => {
                    let current = live_generation.load(Ordering::SeqCst);
                    (surface.generation() != current).then_some(PresentError::Stale {
                        surface: surface.generation(),
                        current,
                    })
                }
                PresentedFrame::Pixels { .. } => None,
            };
            let result = match stale {
                Some(err) => Err(err),
                None => sink.present(frame),
            };
            let _ = done_tx.send(result);
        }))?;

        let started = Instant::now();
        loop {
            match done_rx.recv_timeout(PRESENT_POLL_INTERVAL) {
                Ok(result) => {
                    trace!(sequence, "Present completed on UI thread");
                    return result;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(PresentError::DispatcherClosed);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if stop.load(Ordering::SeqCst) {
                        return Err(PresentError::Interrupted);
                    }
                    if started.elapsed() >= self.timeout {
                        return Err(PresentError::Timeout);
                    }
                }
            }
        }
    }
}
