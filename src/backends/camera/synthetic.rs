// SPDX-License-Identifier: GPL-3.0-only

//! Test-pattern capture source
//!
//! Behaves like a real capture device from the pipeline's point of view:
//! sample requests are queued to a worker thread, which paces them at the
//! configured frame rate and completes each one on its own thread. Frames
//! are either plain BGRA rows in memory or textures on the render device
//! exported through the share-handle registry.

use super::{CaptureSource, FrameBuffer, FrameSize, SampleRequest};
use crate::errors::CaptureError;
use crate::gpu::device::GpuDevice;
use crate::gpu::wgpu_backend::upload_frame_texture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Completion callback, invoked on the camera's worker thread
pub type SampleCallback = Arc<dyn Fn(SampleRequest, FrameBuffer) + Send + Sync>;

/// Where generated frames live
#[derive(Clone)]
pub enum SyntheticOutput {
    /// Mapped BGRA8 rows
    Cpu,
    /// Textures on the given device
    Gpu(Arc<GpuDevice>),
}

/// Settings for a [`SyntheticCamera`]
#[derive(Clone)]
pub struct SyntheticConfig {
    /// Identifier reported to the device policy table
    pub device_id: String,
    pub size: FrameSize,
    pub fps: u32,
    pub output: SyntheticOutput,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            device_id: "synthetic:color-bars".to_string(),
            size: FrameSize::new(640, 480),
            fps: 30,
            output: SyntheticOutput::Cpu,
        }
    }
}

struct Worker {
    sender: mpsc::Sender<SampleRequest>,
    handle: JoinHandle<()>,
}

/// A camera that renders moving color bars
pub struct SyntheticCamera {
    config: SyntheticConfig,
    worker: Mutex<Option<Worker>>,
    stop_signal: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    requested: AtomicU64,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            worker: Mutex::new(None),
            stop_signal: Arc::new(AtomicBool::new(false)),
            delivered: Arc::new(AtomicU64::new(0)),
            requested: AtomicU64::new(0),
        }
    }

    /// Start delivering frames to `on_sample`
    pub fn connect(&self, on_sample: SampleCallback) -> std::io::Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            return Ok(());
        }

        let (sender, receiver) = mpsc::channel::<SampleRequest>();
        let config = self.config.clone();
        let stop_signal = Arc::clone(&self.stop_signal);
        let delivered = Arc::clone(&self.delivered);

        info!(device = %config.device_id, size = %config.size, fps = config.fps, "Starting synthetic camera");

        let handle = thread::Builder::new()
            .name("synthetic-camera".to_string())
            .spawn(move || {
                let period = Duration::from_secs_f64(1.0 / f64::from(config.fps.max(1)));
                let mut next_frame = Instant::now();
                let mut sequence = 0u64;

                while !stop_signal.load(Ordering::SeqCst) {
                    let request = match receiver.recv_timeout(Duration::from_millis(50)) {
                        Ok(request) => request,
                        Err(mpsc::RecvTimeoutError::Timeout) => continue,
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    };

                    let now = Instant::now();
                    if next_frame > now {
                        thread::sleep(next_frame - now);
                    }
                    next_frame = Instant::now().max(next_frame) + period;

                    match generate_frame(&config, sequence) {
                        Ok(frame) => {
                            on_sample(request, frame);
                            delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => warn!(error = %e, sequence, "Synthetic frame generation failed"),
                    }
                    sequence += 1;
                }
                debug!("Synthetic camera worker exiting");
            })?;

        *worker = Some(Worker { sender, handle });
        Ok(())
    }

    /// Frames handed to the callback so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Sample requests received so far
    pub fn requested(&self) -> u64 {
        self.requested.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(Worker { sender, handle }) = worker {
            drop(sender);
            if handle.join().is_err() {
                warn!("Synthetic camera worker panicked");
            }
        }
    }
}

impl CaptureSource for SyntheticCamera {
    fn request_sample(&self, request: SampleRequest) -> Result<(), CaptureError> {
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        let Some(worker) = worker.as_ref() else {
            return Err(CaptureError::Device("synthetic camera not connected".to_string()));
        };
        worker
            .sender
            .send(request)
            .map_err(|_| CaptureError::Device("synthetic camera stopped".to_string()))?;
        self.requested.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn device_identifier(&self) -> String {
        self.config.device_id.clone()
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

fn generate_frame(config: &SyntheticConfig, sequence: u64) -> Result<FrameBuffer, CaptureError> {
    let pixels = color_bars(config.size, sequence);
    match &config.output {
        SyntheticOutput::Cpu => Ok(FrameBuffer::cpu(
            sequence,
            config.size,
            Arc::from(pixels),
            config.size.packed_stride(),
        )),
        SyntheticOutput::Gpu(gpu) => {
            let registration = upload_frame_texture(gpu, config.size, &pixels)
                .map_err(|e| CaptureError::Device(e.to_string()))?;
            let handle = registration.handle();
            Ok(FrameBuffer::gpu(
                sequence,
                config.size,
                gpu.id,
                handle,
                Some(Box::new(registration)),
            ))
        }
    }
}

/// BGRA8 color bars scrolling one bar width every 30 frames
pub fn color_bars(size: FrameSize, sequence: u64) -> Vec<u8> {
    // White, yellow, cyan, green, magenta, red, blue, black (BGRA)
    const BARS: [[u8; 4]; 8] = [
        [255, 255, 255, 255],
        [0, 255, 255, 255],
        [255, 255, 0, 255],
        [0, 255, 0, 255],
        [255, 0, 255, 255],
        [0, 0, 255, 255],
        [255, 0, 0, 255],
        [0, 0, 0, 255],
    ];

    let width = size.width as usize;
    let height = size.height as usize;
    let bar_width = width.div_ceil(BARS.len()).max(1);
    let shift = (sequence / 30) as usize;

    let mut row = Vec::with_capacity(width * 4);
    for x in 0..width {
        row.extend_from_slice(&BARS[(x / bar_width + shift) % BARS.len()]);
    }
    row.repeat(height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_bars_layout() {
        let size = FrameSize::new(16, 2);
        let pixels = color_bars(size, 0);
        assert_eq!(pixels.len(), 16 * 2 * 4);
        // First bar white, last bar black
        assert_eq!(&pixels[0..4], &[255, 255, 255, 255]);
        assert_eq!(&pixels[15 * 4..16 * 4], &[0, 0, 0, 255]);
        // Rows are identical
        assert_eq!(&pixels[..64], &pixels[64..]);
    }

    #[test]
    fn test_request_before_connect_fails() {
        let camera = SyntheticCamera::new(SyntheticConfig::default());
        let result = camera.request_sample(SampleRequest { epoch: 0, id: 0 });
        assert!(matches!(result, Err(CaptureError::Device(_))));
    }

    #[test]
    fn test_delivers_one_frame_per_request() {
        let camera = SyntheticCamera::new(SyntheticConfig {
            size: FrameSize::new(8, 8),
            fps: 500,
            ..Default::default()
        });
        let (tx, rx) = mpsc::channel();
        camera
            .connect(Arc::new(move |request: SampleRequest, frame: FrameBuffer| {
                let _ = tx.send((request.id, frame.sequence));
            }))
            .expect("connect");

        for id in 0..3 {
            camera
                .request_sample(SampleRequest { epoch: 0, id })
                .expect("request");
        }
        let got: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).expect("frame"))
            .collect();
        assert_eq!(got, vec![(0, 0), (1, 1), (2, 2)]);
        assert_eq!(camera.requested(), 3);

        camera.stop();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
