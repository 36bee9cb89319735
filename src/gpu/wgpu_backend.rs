// SPDX-License-Identifier: GPL-3.0-only

//! wgpu implementation of [`GpuBackend`]
//!
//! The shared output texture is a BGRA8 render target registered in the
//! share-handle table. The "second API" surface is a view opened back through
//! that handle, which is what a presentation layer binds for drawing. Blits
//! are a single fullscreen-triangle render pass that scales the captured
//! frame to the output size and flips rows when the sensor delivers them
//! bottom-to-top.
//!
//! wgpu textures cannot cross devices, so frames are only opened when the
//! capture side allocated them on this backend's own device. A frame from any
//! other device fails with [`GpuError::DeviceMismatch`] and the pipeline drops
//! it. The converter cache still keys on the frame's device so a backend that
//! can import foreign handles rebuilds when the capture device changes.

use super::device::GpuDevice;
use super::share::{self, ShareRegistration};
use super::{GpuBackend, wgpu};
use crate::backends::camera::{DeviceId, FrameSize, ShareHandle};
use crate::config::ScanLineOrder;
use crate::constants::PRESENT_BYTES_PER_PIXEL;
use crate::errors::{GpuError, GpuResult};
use std::sync::Arc;
use tracing::{debug, info};

/// Pixel format of every texture this backend produces
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;

/// Blit parameters uniform (must match shader struct)
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct BlitParams {
    flip_y: u32,
    _pad: [u32; 3],
}

/// Shareable output texture
#[derive(Debug)]
pub struct WgpuSharedTexture {
    texture: wgpu::Texture,
    size: FrameSize,
    registration: Option<ShareRegistration>,
}

/// View onto the shared texture, opened through its share handle
#[derive(Debug)]
pub struct WgpuSurface {
    pub handle: ShareHandle,
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub size: FrameSize,
}

/// Captured frame opened on the render device
#[derive(Debug)]
pub struct WgpuSource {
    view: wgpu::TextureView,
    size: FrameSize,
}

/// Cached blit pipeline state
#[derive(Debug)]
pub struct BlitProcessor {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    params: wgpu::Buffer,
    target_size: FrameSize,
}

/// Render backend on the process-wide wgpu device
pub struct WgpuBackend {
    gpu: Arc<GpuDevice>,
}

impl WgpuBackend {
    pub fn new(gpu: Arc<GpuDevice>) -> Self {
        info!(
            adapter = %gpu.info.adapter_name,
            backend = ?gpu.info.backend,
            device = %gpu.id,
            "Using wgpu render backend"
        );
        Self { gpu }
    }

    fn check_size(&self, size: FrameSize) -> GpuResult<()> {
        let max = self.gpu.device.limits().max_texture_dimension_2d;
        if size.is_empty() || size.width > max || size.height > max {
            return Err(GpuError::TextureCreation(format!(
                "size {} outside device limits (max {})",
                size, max
            )));
        }
        Ok(())
    }

    fn open(&self, device: DeviceId, handle: ShareHandle) -> GpuResult<share::SharedTextureRef> {
        if device != self.gpu.id {
            return Err(GpuError::DeviceMismatch {
                frame: device.0,
                render: self.gpu.id.0,
            });
        }
        let shared = share::open(handle)
            .ok_or_else(|| GpuError::OpenShared(format!("{} is not registered", handle)))?;
        if shared.device != self.gpu.id {
            return Err(GpuError::DeviceMismatch {
                frame: shared.device.0,
                render: self.gpu.id.0,
            });
        }
        Ok(shared)
    }
}

impl GpuBackend for WgpuBackend {
    type Texture = WgpuSharedTexture;
    type Surface = WgpuSurface;
    type Source = WgpuSource;
    type Processor = BlitProcessor;
    type OutputView = wgpu::TextureView;

    fn device_id(&self) -> DeviceId {
        self.gpu.id
    }

    fn create_shared_texture(&mut self, size: FrameSize) -> GpuResult<Self::Texture> {
        self.check_size(size)?;

        let texture = self.gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("preview_shared_texture"),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OUTPUT_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        debug!(size = %size, "Shared texture allocated");
        Ok(WgpuSharedTexture {
            texture,
            size,
            registration: None,
        })
    }

    fn export_share_handle(&mut self, texture: &mut Self::Texture) -> GpuResult<ShareHandle> {
        if let Some(registration) = &texture.registration {
            return Ok(registration.handle());
        }
        let registration = share::export(self.gpu.id, texture.texture.clone(), texture.size);
        let handle = registration.handle();
        texture.registration = Some(registration);
        Ok(handle)
    }

    fn create_surface(
        &mut self,
        texture: &Self::Texture,
        handle: ShareHandle,
    ) -> GpuResult<Self::Surface> {
        let shared = share::open(handle)
            .ok_or_else(|| GpuError::SurfaceCreation(format!("{} is not registered", handle)))?;
        if shared.texture != texture.texture {
            return Err(GpuError::SurfaceCreation(format!(
                "{} does not refer to the current shared texture",
                handle
            )));
        }
        let view = shared.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("preview_surface_view"),
            ..Default::default()
        });
        Ok(WgpuSurface {
            handle,
            texture: shared.texture,
            view,
            size: shared.size,
        })
    }

    fn open_shared(&mut self, device: DeviceId, handle: ShareHandle) -> GpuResult<Self::Source> {
        let shared = self.open(device, handle)?;
        let view = shared.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("preview_source_view"),
            ..Default::default()
        });
        Ok(WgpuSource {
            view,
            size: shared.size,
        })
    }

    fn create_processor(
        &mut self,
        target_size: FrameSize,
        order: ScanLineOrder,
    ) -> GpuResult<Self::Processor> {
        self.check_size(target_size)
            .map_err(|e| GpuError::ProcessorCreation(e.to_string()))?;

        let device = &self.gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("preview_blit_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("blit.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("preview_blit_bind_group_layout"),
            entries: &[
                // src_tex: captured frame
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // src_sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                // params: uniform buffer
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("preview_blit_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("preview_blit_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: OUTPUT_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("preview_blit_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("preview_blit_params"),
            size: std::mem::size_of::<BlitParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform = BlitParams {
            flip_y: u32::from(order.flips_vertically()),
            _pad: [0; 3],
        };
        self.gpu
            .queue
            .write_buffer(&params, 0, bytemuck::cast_slice(&[uniform]));

        debug!(target_size = %target_size, order = ?order, "Blit processor created");
        Ok(BlitProcessor {
            pipeline,
            bind_group_layout,
            sampler,
            params,
            target_size,
        })
    }

    fn create_output_view(&mut self, target: &Self::Texture) -> GpuResult<Self::OutputView> {
        if !target
            .texture
            .usage()
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
        {
            return Err(GpuError::OutputView(
                "shared texture is not a render target".to_string(),
            ));
        }
        Ok(target.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("preview_output_view"),
            ..Default::default()
        }))
    }

    fn blit(
        &mut self,
        processor: &Self::Processor,
        source: &Self::Source,
        output: &Self::OutputView,
    ) -> GpuResult<()> {
        if source.size.is_empty() {
            return Err(GpuError::Blit("source frame is empty".to_string()));
        }

        let device = &self.gpu.device;
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("preview_blit_bind_group"),
            layout: &processor.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&processor.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: processor.params.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("preview_blit_encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("preview_blit_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: output,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_viewport(
                0.0,
                0.0,
                processor.target_size.width as f32,
                processor.target_size.height as f32,
                0.0,
                1.0,
            );
            pass.set_pipeline(&processor.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.gpu.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn read_back(
        &mut self,
        device: DeviceId,
        handle: ShareHandle,
        size: FrameSize,
    ) -> GpuResult<Arc<[u8]>> {
        let shared = self
            .open(device, handle)
            .map_err(|e| GpuError::Readback(e.to_string()))?;
        if shared.size != size {
            return Err(GpuError::Readback(format!(
                "frame reports {} but texture is {}",
                size, shared.size
            )));
        }

        let row_bytes = size.width * PRESENT_BYTES_PER_PIXEL;
        let padded_row_bytes = align_to(row_bytes, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let gpu_device = &self.gpu.device;

        let staging = gpu_device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("preview_readback_buffer"),
            size: padded_row_bytes as u64 * size.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = gpu_device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("preview_readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &shared.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(size.height),
                },
            },
            wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.queue.submit(Some(encoder.finish()));

        let buffer_slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        gpu_device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| GpuError::Readback(format!("wgpu poll failed: {:?}", e)))?;
        rx.recv()
            .map_err(|_| GpuError::Readback("readback channel closed".to_string()))?
            .map_err(|e| GpuError::Readback(format!("buffer map failed: {:?}", e)))?;

        let mapped = buffer_slice.get_mapped_range();
        let row_bytes = row_bytes as usize;
        let padded_row_bytes = padded_row_bytes as usize;
        let mut out = Vec::with_capacity(row_bytes * size.height as usize);
        for row in 0..size.height as usize {
            let start = row * padded_row_bytes;
            out.extend_from_slice(&mapped[start..start + row_bytes]);
        }
        drop(mapped);
        staging.unmap();

        Ok(Arc::from(out))
    }
}

/// Upload tightly packed BGRA8 rows into a new shareable texture.
///
/// Used by capture sources that produce frames on the render device. The
/// returned registration keeps the frame texture reachable by handle.
pub fn upload_frame_texture(
    gpu: &GpuDevice,
    size: FrameSize,
    pixels: &[u8],
) -> GpuResult<ShareRegistration> {
    let expected = size.packed_stride() as usize * size.height as usize;
    if size.is_empty() || pixels.len() < expected {
        return Err(GpuError::TextureCreation(format!(
            "{} frame needs {} bytes, got {}",
            size,
            expected,
            pixels.len()
        )));
    }

    let extent = wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: 1,
    };
    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("captured_frame_texture"),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OUTPUT_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    gpu.queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &pixels[..expected],
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(size.packed_stride()),
            rows_per_image: Some(size.height),
        },
        extent,
    );

    Ok(share::export(gpu.id, texture, size))
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::device::shared_device;

    /// Validate that a WGSL shader compiles successfully using naga
    fn validate_shader(name: &str, source: &str) {
        let module = match naga::front::wgsl::parse_str(source) {
            Ok(module) => module,
            Err(e) => panic!("{} failed to parse:\n{}", name, e.emit_to_string(source)),
        };
        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module);
        if let Err(e) = info {
            panic!("{} failed validation: {:?}", name, e);
        }
    }

    #[test]
    fn test_blit_shader_compiles() {
        validate_shader("blit.wgsl", include_str!("blit.wgsl"));
    }

    #[test]
    fn test_blit_params_layout() {
        // Uniform buffers need 16-byte sized structs
        assert_eq!(std::mem::size_of::<BlitParams>(), 16);
    }

    #[test]
    fn test_align_to() {
        assert_eq!(align_to(1, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(2560, 256), 2560);
        assert_eq!(align_to(2564, 256), 2816);
    }

    #[test]
    fn test_blit_flips_bottom_to_top_frames() {
        // This test requires a GPU, so it may be skipped in CI
        let gpu = match shared_device() {
            Ok(gpu) => gpu,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let mut backend = WgpuBackend::new(Arc::clone(&gpu));
        let size = FrameSize::new(2, 2);

        // Top row red, bottom row blue (BGRA)
        let pixels: Vec<u8> = [[0, 0, 255, 255], [0, 0, 255, 255], [255, 0, 0, 255], [255, 0, 0, 255]]
            .concat();
        let frame = upload_frame_texture(&gpu, size, &pixels).expect("upload");

        let mut target = backend.create_shared_texture(size).expect("texture");
        let handle = backend.export_share_handle(&mut target).expect("export");
        let processor = backend
            .create_processor(size, ScanLineOrder::BottomToTop)
            .expect("processor");
        let view = backend.create_output_view(&target).expect("view");
        let source = backend.open_shared(gpu.id, frame.handle()).expect("open");
        backend.blit(&processor, &source, &view).expect("blit");

        let out = backend.read_back(gpu.id, handle, size).expect("readback");
        // Rows swapped: first pixel is now blue
        assert_eq!(&out[0..4], &[255, 0, 0, 255]);
        assert_eq!(&out[8..12], &[0, 0, 255, 255]);
    }

    #[test]
    fn test_surface_requires_registered_handle() {
        let gpu = match shared_device() {
            Ok(gpu) => gpu,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let mut backend = WgpuBackend::new(gpu);
        let target = backend
            .create_shared_texture(FrameSize::new(8, 8))
            .expect("texture");
        let result = backend.create_surface(&target, ShareHandle(0));
        assert!(matches!(result, Err(GpuError::SurfaceCreation(_))));
    }
}
