// SPDX-License-Identifier: GPL-3.0-only

//! Lock-free pipeline counters, readable from any thread

use std::sync::atomic::{AtomicU64, Ordering};

/// Why an iteration ended without presenting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Interop resources could not be (re)created this iteration
    ResourcesNotReady,
    RefreshWaitFailed,
    /// Nothing was queued
    NoFrame,
    BlitFailed,
    ReadbackFailed,
    PresentFailed,
    /// The surface was replaced before the UI thread bound it
    StaleSurface,
    /// The render thread was asked to stop mid-iteration
    Interrupted,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    presented: AtomicU64,
    resources_not_ready: AtomicU64,
    refresh_failed: AtomicU64,
    no_frame: AtomicU64,
    blit_failed: AtomicU64,
    readback_failed: AtomicU64,
    present_failed: AtomicU64,
    stale_surface: AtomicU64,
    interrupted: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`] plus queue and resource counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_enqueued: u64,
    pub frames_dropped: u64,
    pub frames_presented: u64,
    pub skipped_resources: u64,
    pub skipped_refresh: u64,
    pub skipped_no_frame: u64,
    pub skipped_blit: u64,
    pub skipped_readback: u64,
    pub skipped_present: u64,
    pub stale_surfaces: u64,
    pub interrupted: u64,
    pub texture_generations: u64,
}

impl PipelineStats {
    pub fn record_presented(&self) {
        self.presented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self, reason: SkipReason) {
        let counter = match reason {
            SkipReason::ResourcesNotReady => &self.resources_not_ready,
            SkipReason::RefreshWaitFailed => &self.refresh_failed,
            SkipReason::NoFrame => &self.no_frame,
            SkipReason::BlitFailed => &self.blit_failed,
            SkipReason::ReadbackFailed => &self.readback_failed,
            SkipReason::PresentFailed => &self.present_failed,
            SkipReason::StaleSurface => &self.stale_surface,
            SkipReason::Interrupted => &self.interrupted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    /// Snapshot the render-side counters; queue and resource fields are
    /// filled in by the caller
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_presented: self.presented.load(Ordering::Relaxed),
            skipped_resources: self.resources_not_ready.load(Ordering::Relaxed),
            skipped_refresh: self.refresh_failed.load(Ordering::Relaxed),
            skipped_no_frame: self.no_frame.load(Ordering::Relaxed),
            skipped_blit: self.blit_failed.load(Ordering::Relaxed),
            skipped_readback: self.readback_failed.load(Ordering::Relaxed),
            skipped_present: self.present_failed.load(Ordering::Relaxed),
            stale_surfaces: self.stale_surface.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}
