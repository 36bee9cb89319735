// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for the preview pipeline
//!
//! This module provides command-line functionality for:
//! - Running the pipeline against the synthetic camera
//! - Reporting the selected render device

use camera_preview::backends::camera::synthetic::{
    SampleCallback, SyntheticCamera, SyntheticConfig, SyntheticOutput,
};
use camera_preview::backends::camera::{LogErrorSink, SampleRequest};
use camera_preview::gpu::device::shared_device;
use camera_preview::gpu::wgpu_backend::{WgpuBackend, WgpuSurface};
use camera_preview::pipeline::{
    FrameSink, IntervalRefreshClock, PipelineParts, PresentedFrame, PreviewPipeline,
    ui_event_loop,
};
use camera_preview::{
    CaptureSource, ClockEvent, FrameBuffer, PipelineConfig, PresentError, RenderMode,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Options of the `run` command
pub struct RunOptions {
    pub config: Option<PathBuf>,
    pub frames: u64,
    pub mode: Option<RenderMode>,
    pub device_id: String,
    pub fps: u32,
    pub cpu_frames: bool,
}

/// Counts what reaches the "screen"
#[derive(Default)]
struct ConsoleSink {
    textures: AtomicU64,
    pixel_frames: AtomicU64,
    last_sequence: AtomicU64,
}

impl ConsoleSink {
    fn presented(&self) -> u64 {
        self.textures.load(Ordering::Relaxed) + self.pixel_frames.load(Ordering::Relaxed)
    }
}

impl FrameSink<WgpuSurface> for ConsoleSink {
    fn present(&self, frame: PresentedFrame<WgpuSurface>) -> Result<(), PresentError> {
        match &frame {
            PresentedFrame::Texture { surface, .. } => {
                // Binding the view is all a compositor would need
                let _view = &surface.inner().view;
                self.textures.fetch_add(1, Ordering::Relaxed);
            }
            PresentedFrame::Pixels { data, size, stride, .. } => {
                let needed = *stride as usize * size.height as usize;
                if data.len() < needed {
                    return Err(PresentError::Rejected(format!(
                        "{} frame has {} bytes, expected {}",
                        size,
                        data.len(),
                        needed
                    )));
                }
                self.pixel_frames.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.last_sequence.store(frame.sequence(), Ordering::Relaxed);
        Ok(())
    }
}

/// Run the preview pipeline until enough frames were presented or Ctrl+C
pub fn run_preview(options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &options.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    // Both modes render on the GPU; CPU frames only change the capture side
    let gpu = shared_device().map_err(|e| format!("no render device available: {}", e))?;
    let output = if options.cpu_frames {
        SyntheticOutput::Cpu
    } else {
        SyntheticOutput::Gpu(Arc::clone(&gpu))
    };
    let camera = Arc::new(SyntheticCamera::new(SyntheticConfig {
        device_id: options.device_id.clone(),
        size: config.output_size(),
        fps: options.fps,
        output,
    }));

    let (event_loop, dispatcher) = ui_event_loop();
    let sink = Arc::new(ConsoleSink::default());

    let pipeline = Arc::new(PreviewPipeline::new(
        &config,
        PipelineParts {
            backend: WgpuBackend::new(gpu),
            source: Arc::clone(&camera) as Arc<dyn CaptureSource>,
            refresh: Arc::new(IntervalRefreshClock::new(config.refresh_rate_hz)),
            dispatcher: Arc::new(dispatcher),
            sink: Arc::clone(&sink) as Arc<dyn FrameSink<WgpuSurface>>,
            error_sink: Arc::new(LogErrorSink),
        },
    )?);
    if let Some(mode) = options.mode {
        pipeline.set_render_mode(mode);
    }

    // The camera only holds a weak reference back to the pipeline
    let weak: Weak<PreviewPipeline<WgpuBackend>> = Arc::downgrade(&pipeline);
    let on_sample: SampleCallback = Arc::new(move |request: SampleRequest, frame: FrameBuffer| {
        if let Some(pipeline) = weak.upgrade() {
            pipeline.on_sample_captured(request, frame);
        }
    });
    camera.connect(on_sample)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = Arc::clone(&interrupted);
    ctrlc::set_handler(move || interrupted_clone.store(true, Ordering::SeqCst))?;

    println!(
        "Previewing {} at {} ({} mode), {} frames...",
        options.device_id,
        config.output_size(),
        pipeline.render_mode(),
        options.frames
    );

    let started = Instant::now();
    pipeline.on_clock_event(ClockEvent::Start);
    // This thread plays the UI thread
    while sink.presented() < options.frames && !interrupted.load(Ordering::SeqCst) {
        event_loop.run_for(Duration::from_millis(50));
    }
    pipeline.on_clock_event(ClockEvent::Stop);
    camera.stop();
    // Run whatever the render thread posted before it stopped
    event_loop.run_pending();

    let elapsed = started.elapsed().as_secs_f64();
    let stats = pipeline.stats();
    pipeline.shutdown();

    println!();
    println!("Presented:        {}", sink.presented());
    println!("  as textures:    {}", sink.textures.load(Ordering::Relaxed));
    println!("  as pixels:      {}", sink.pixel_frames.load(Ordering::Relaxed));
    println!("Last sequence:    {}", sink.last_sequence.load(Ordering::Relaxed));
    println!("Frames captured:  {}", camera.delivered());
    println!("Queue drops:      {}", stats.frames_dropped);
    println!("Stale surfaces:   {}", stats.stale_surfaces);
    println!("Textures created: {}", stats.texture_generations);
    if elapsed > 0.0 {
        println!("Average rate:     {:.1} fps", sink.presented() as f64 / elapsed);
    }

    Ok(())
}

/// Report the render device selected by the process-wide provider
pub fn check_device() -> Result<(), Box<dyn std::error::Error>> {
    let gpu = shared_device()?;
    let limits = gpu.device.limits();

    println!("camera-preview {}", env!("GIT_VERSION"));
    println!("Render device:   {}", gpu.id);
    println!("Adapter:         {}", gpu.info.adapter_name);
    println!("Backend:         {:?}", gpu.info.backend);
    println!(
        "Type:            {}",
        if gpu.info.is_software {
            "software fallback"
        } else {
            "hardware"
        }
    );
    println!("Max texture:     {}", limits.max_texture_dimension_2d);

    Ok(())
}
