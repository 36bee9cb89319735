// SPDX-License-Identifier: GPL-3.0-only

//! Shared fixtures for the integration tests: a scripted GPU backend, a
//! recording capture source, a collecting frame sink and refresh clocks.

#![allow(dead_code)]

use camera_preview::backends::camera::{CaptureErrorSink, CaptureSource};
use camera_preview::pipeline::{
    FrameSink, IntervalRefreshClock, PipelineParts, PresentedFrame, PreviewPipeline,
    RefreshClock, UiEventLoop, ui_event_loop,
};
use camera_preview::{
    CaptureError, DeviceId, FrameBuffer, FrameSize, GpuBackend, GpuError, PipelineConfig,
    PresentError, RefreshError, SampleRequest, ScanLineOrder, ShareHandle,
};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

pub const OUTPUT_SIZE: FrameSize = FrameSize::new(64, 48);

/// Knobs and counters shared between a test and its [`MockBackend`]
#[derive(Default)]
pub struct MockControl {
    pub fail_texture: AtomicBool,
    pub fail_export: AtomicBool,
    pub fail_surface: AtomicBool,
    pub fail_blit: AtomicBool,
    pub textures_created: AtomicU64,
    pub live_textures: AtomicI64,
    pub surfaces_created: AtomicU64,
    pub processors_created: AtomicU64,
    /// (frame handle, target texture id) per successful blit
    pub blits: Mutex<Vec<(u64, u64)>>,
    /// Capture devices whose share handles cannot be opened here
    pub unreachable_devices: Mutex<Vec<DeviceId>>,
}

impl MockControl {
    pub fn blit_count(&self) -> usize {
        self.blits.lock().expect("lock").len()
    }

    pub fn make_unreachable(&self, device: DeviceId) {
        self.unreachable_devices.lock().expect("lock").push(device);
    }

    fn is_reachable(&self, device: DeviceId) -> bool {
        !self.unreachable_devices.lock().expect("lock").contains(&device)
    }
}

pub struct MockTexture {
    pub id: u64,
    pub size: FrameSize,
    control: Arc<MockControl>,
}

impl Drop for MockTexture {
    fn drop(&mut self) {
        self.control.live_textures.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MockSurface {
    pub texture_id: u64,
    pub handle: ShareHandle,
}

pub struct MockSource {
    handle: ShareHandle,
}

pub struct MockProcessor {
    order: ScanLineOrder,
}

pub struct MockOutputView {
    texture_id: u64,
}

/// Scripted render backend that never touches a GPU
pub struct MockBackend {
    device: DeviceId,
    control: Arc<MockControl>,
}

impl MockBackend {
    pub fn new(device: DeviceId, control: Arc<MockControl>) -> Self {
        Self { device, control }
    }
}

impl GpuBackend for MockBackend {
    type Texture = MockTexture;
    type Surface = MockSurface;
    type Source = MockSource;
    type Processor = MockProcessor;
    type OutputView = MockOutputView;

    fn device_id(&self) -> DeviceId {
        self.device
    }

    fn create_shared_texture(&mut self, size: FrameSize) -> Result<MockTexture, GpuError> {
        if self.control.fail_texture.load(Ordering::SeqCst) {
            return Err(GpuError::TextureCreation("scripted failure".into()));
        }
        let id = self.control.textures_created.fetch_add(1, Ordering::SeqCst) + 1;
        self.control.live_textures.fetch_add(1, Ordering::SeqCst);
        Ok(MockTexture {
            id,
            size,
            control: Arc::clone(&self.control),
        })
    }

    fn export_share_handle(&mut self, texture: &mut MockTexture) -> Result<ShareHandle, GpuError> {
        if self.control.fail_export.load(Ordering::SeqCst) {
            return Err(GpuError::ShareExport("scripted failure".into()));
        }
        Ok(ShareHandle(0x8000 + texture.id))
    }

    fn create_surface(
        &mut self,
        texture: &MockTexture,
        handle: ShareHandle,
    ) -> Result<MockSurface, GpuError> {
        if self.control.fail_surface.load(Ordering::SeqCst) {
            return Err(GpuError::SurfaceCreation("scripted failure".into()));
        }
        self.control.surfaces_created.fetch_add(1, Ordering::SeqCst);
        Ok(MockSurface {
            texture_id: texture.id,
            handle,
        })
    }

    /// Frames from any device open through their share handle unless the
    /// test marked the device unreachable
    fn open_shared(&mut self, device: DeviceId, handle: ShareHandle) -> Result<MockSource, GpuError> {
        if !self.control.is_reachable(device) {
            return Err(GpuError::DeviceMismatch {
                frame: device.0,
                render: self.device.0,
            });
        }
        Ok(MockSource { handle })
    }

    fn create_processor(
        &mut self,
        _target_size: FrameSize,
        order: ScanLineOrder,
    ) -> Result<MockProcessor, GpuError> {
        self.control.processors_created.fetch_add(1, Ordering::SeqCst);
        Ok(MockProcessor { order })
    }

    fn create_output_view(&mut self, target: &MockTexture) -> Result<MockOutputView, GpuError> {
        Ok(MockOutputView {
            texture_id: target.id,
        })
    }

    fn blit(
        &mut self,
        processor: &MockProcessor,
        source: &MockSource,
        output: &MockOutputView,
    ) -> Result<(), GpuError> {
        let _ = processor.order;
        if self.control.fail_blit.load(Ordering::SeqCst) {
            return Err(GpuError::Blit("scripted failure".into()));
        }
        self.control
            .blits
            .lock()
            .expect("lock")
            .push((source.handle.0, output.texture_id));
        Ok(())
    }

    fn read_back(
        &mut self,
        device: DeviceId,
        handle: ShareHandle,
        size: FrameSize,
    ) -> Result<Arc<[u8]>, GpuError> {
        if !self.control.is_reachable(device) {
            return Err(GpuError::Readback(format!("{} is unreachable", device)));
        }
        let len = size.packed_stride() as usize * size.height as usize;
        Ok(Arc::from(vec![handle.0 as u8; len]))
    }
}

/// Capture source that records every request and can refuse them
pub struct RecordingSource {
    pub identifier: String,
    pub reject: AtomicBool,
    requests: Mutex<Vec<SampleRequest>>,
    /// One-shot hold: (entered, release) for the next request
    gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
}

impl RecordingSource {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            reject: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    /// Hold the next `request_sample` call until released.
    ///
    /// Returns a receiver that fires once that call is inside the source and
    /// the sender that lets it continue.
    pub fn hold_next_request(&self) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().expect("lock") = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    pub fn requests(&self) -> Vec<SampleRequest> {
        self.requests.lock().expect("lock").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("lock").len()
    }
}

impl CaptureSource for RecordingSource {
    fn request_sample(&self, request: SampleRequest) -> Result<(), CaptureError> {
        let gate = self.gate.lock().expect("lock").take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv_timeout(Duration::from_secs(3));
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(CaptureError::RequestRejected("scripted refusal".into()));
        }
        self.requests.lock().expect("lock").push(request);
        Ok(())
    }

    fn device_identifier(&self) -> String {
        self.identifier.clone()
    }
}

/// What the sink saw for one presented frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Texture { sequence: u64, generation: u64 },
    Pixels { sequence: u64, len: usize },
}

impl Seen {
    pub fn sequence(&self) -> u64 {
        match self {
            Seen::Texture { sequence, .. } | Seen::Pixels { sequence, .. } => *sequence,
        }
    }
}

/// Records presented frames without keeping them alive
#[derive(Default)]
pub struct CollectingSink {
    seen: Mutex<Vec<Seen>>,
}

impl CollectingSink {
    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().expect("lock").clone()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.seen().iter().map(Seen::sequence).collect()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().expect("lock").len()
    }
}

impl FrameSink<MockSurface> for CollectingSink {
    fn present(&self, frame: PresentedFrame<MockSurface>) -> Result<(), PresentError> {
        let seen = match &frame {
            PresentedFrame::Texture { surface, sequence } => Seen::Texture {
                sequence: *sequence,
                generation: surface.generation(),
            },
            PresentedFrame::Pixels { data, sequence, .. } => Seen::Pixels {
                sequence: *sequence,
                len: data.len(),
            },
        };
        self.seen.lock().expect("lock").push(seen);
        Ok(())
    }
}

#[derive(Default)]
pub struct CollectingErrors {
    errors: Mutex<Vec<CaptureError>>,
}

impl CollectingErrors {
    pub fn errors(&self) -> Vec<CaptureError> {
        self.errors.lock().expect("lock").clone()
    }
}

impl CaptureErrorSink for CollectingErrors {
    fn capture_error(&self, error: CaptureError) {
        self.errors.lock().expect("lock").push(error);
    }
}

/// Refresh clock driven tick by tick from the test.
///
/// Without a tick the wait fails after a short timeout, so the render loop
/// keeps polling its stop flag.
pub struct ManualRefresh {
    ticks: Mutex<mpsc::Receiver<Result<(), RefreshError>>>,
}

impl ManualRefresh {
    pub fn new() -> (Self, mpsc::Sender<Result<(), RefreshError>>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                ticks: Mutex::new(rx),
            },
            tx,
        )
    }
}

impl RefreshClock for ManualRefresh {
    fn wait_for_refresh(&self) -> Result<(), RefreshError> {
        let ticks = self.ticks.lock().expect("lock");
        match ticks.recv_timeout(Duration::from_millis(5)) {
            Ok(result) => result,
            Err(_) => Err(RefreshError("no tick".into())),
        }
    }
}

/// A pipeline on the mock backend plus every fixture around it
pub struct Harness {
    pub pipeline: PreviewPipeline<MockBackend>,
    pub control: Arc<MockControl>,
    pub source: Arc<RecordingSource>,
    pub sink: Arc<CollectingSink>,
    pub errors: Arc<CollectingErrors>,
    pub event_loop: UiEventLoop,
    pub device: DeviceId,
}

impl Harness {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_refresh(config, Arc::new(IntervalRefreshClock::new(500)))
    }

    pub fn with_refresh(config: PipelineConfig, refresh: Arc<dyn RefreshClock>) -> Self {
        Self::build(config, refresh, "test:camera")
    }

    pub fn build(config: PipelineConfig, refresh: Arc<dyn RefreshClock>, identifier: &str) -> Self {
        let device = DeviceId::next();
        let control = Arc::new(MockControl::default());
        let source = Arc::new(RecordingSource::new(identifier));
        let sink = Arc::new(CollectingSink::default());
        let errors = Arc::new(CollectingErrors::default());
        let (event_loop, dispatcher) = ui_event_loop();

        let pipeline = PreviewPipeline::new(
            &config,
            PipelineParts {
                backend: MockBackend::new(device, Arc::clone(&control)),
                source: Arc::clone(&source) as Arc<dyn CaptureSource>,
                refresh,
                dispatcher: Arc::new(dispatcher),
                sink: Arc::clone(&sink) as Arc<dyn FrameSink<MockSurface>>,
                error_sink: Arc::clone(&errors) as Arc<dyn CaptureErrorSink>,
            },
        )
        .expect("valid config");

        Self {
            pipeline,
            control,
            source,
            sink,
            errors,
            event_loop,
            device,
        }
    }

    /// A GPU frame on the render device whose handle encodes its sequence
    pub fn gpu_frame(&self, sequence: u64) -> FrameBuffer {
        FrameBuffer::gpu(sequence, OUTPUT_SIZE, self.device, ShareHandle(sequence), None)
    }

    /// Complete the `index`-th recorded request with a GPU frame
    pub fn deliver(&self, index: usize, sequence: u64) -> bool {
        self.deliver_from(index, self.device, sequence)
    }

    /// Complete the `index`-th recorded request with a frame allocated on
    /// `device`
    pub fn deliver_from(&self, index: usize, device: DeviceId, sequence: u64) -> bool {
        let request = self.source.requests()[index];
        let frame = FrameBuffer::gpu(sequence, OUTPUT_SIZE, device, ShareHandle(sequence), None);
        self.pipeline.on_sample_captured(request, frame)
    }

    /// Run the UI event loop until `cond` holds or `timeout` passes
    pub fn pump_until(&self, timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            self.event_loop.run_for(Duration::from_millis(5));
        }
        cond()
    }

    /// Run the UI event loop for a fixed time
    pub fn pump_for(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            self.event_loop.run_for(Duration::from_millis(5));
        }
    }
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        output_width: OUTPUT_SIZE.width,
        output_height: OUTPUT_SIZE.height,
        ..Default::default()
    }
}
