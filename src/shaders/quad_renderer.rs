// SPDX-License-Identifier: GPL-3.0-only

//! wgpu render backend: textured quad into offscreen targets
//!
//! Every target is an `Rgba8Unorm` texture sized to its surface. Drawing
//! renders the quad into it and queues a copy into a row-padded readback
//! buffer; presenting maps that buffer, strips the padding and hands the
//! image to the surface.

use super::gpu_processor::{
    CachedDimensions, padded_bytes_per_row, read_buffer_async, strip_row_padding,
};
use crate::backends::source::Frame;
use crate::backends::surface::{RenderedImage, SurfaceHandle};
use crate::errors::RenderError;
use crate::gpu::{self, GpuDeviceInfo, wgpu};
use crate::pipelines::render::{QuadUniforms, RenderBackend};
use tracing::{debug, info};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Triangle strip covering clip space: x, y, z, u, v
const QUAD_VERTICES: [f32; 20] = [
    -1.0, -1.0, 0.0, 0.0, 0.0, //
    1.0, -1.0, 0.0, 1.0, 0.0, //
    -1.0, 1.0, 0.0, 0.0, 1.0, //
    1.0, 1.0, 0.0, 1.0, 1.0,
];

const VERTEX_STRIDE: u64 = 5 * std::mem::size_of::<f32>() as u64;

/// WGSL source of the quad shader
pub const QUAD_SHADER: &str = include_str!("quad.wgsl");

/// Offscreen render target bound to one surface
pub struct QuadTarget {
    surface: SurfaceHandle,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_row: u32,
    drawn: bool,
}

/// Frame texture plus the bind group that samples it
struct FrameTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    dims: CachedDimensions,
}

pub struct QuadRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    vertex_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    frame: FrameTexture,
    info: GpuDeviceInfo,
}

impl QuadRenderer {
    /// Create the device, compile the program and allocate a 1x1 frame texture
    pub fn new() -> Result<Self, RenderError> {
        let (device, queue, info) = pollster::block_on(gpu::create_render_device("dualcast-render"))
            .map_err(RenderError::ContextCreation)?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("quad shader"),
            source: wgpu::ShaderSource::Wgsl(QUAD_SHADER.into()),
        });
        if let Some(e) = pollster::block_on(device.pop_error_scope()) {
            return Err(RenderError::Shader(e.to_string()));
        }

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("quad bind group layout"),
            entries: &[
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
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX,
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
            label: Some("quad pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: VERTEX_STRIDE,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2],
        };

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("quad pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[vertex_layout],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("frame sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("quad vertices"),
            size: std::mem::size_of_val(&QUAD_VERTICES) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(&vertex_buffer, 0, bytemuck::cast_slice(&QUAD_VERTICES));

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("quad uniforms"),
            size: std::mem::size_of::<QuadUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let frame = create_frame_texture(
            &device,
            &bind_group_layout,
            &sampler,
            &uniform_buffer,
            1,
            1,
        );

        info!(adapter = %info.adapter_name, "Quad renderer ready");

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            sampler,
            vertex_buffer,
            uniform_buffer,
            frame,
            info,
        })
    }
}

fn create_frame_texture(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    uniforms: &wgpu::Buffer,
    width: u32,
    height: u32,
) -> FrameTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("frame texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("quad bind group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: uniforms.as_entire_binding(),
            },
        ],
    });

    FrameTexture {
        texture,
        bind_group,
        dims: CachedDimensions::new(width, height),
    }
}

impl RenderBackend for QuadRenderer {
    type Target = QuadTarget;

    fn create_target(&mut self, surface: SurfaceHandle) -> Result<QuadTarget, RenderError> {
        let (width, height) = surface.size();
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(RenderError::InvalidSurface(format!(
                "{} has unsupported size {}x{}",
                surface.label(),
                width,
                height
            )));
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(surface.label()),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let padded_row = padded_bytes_per_row(width);
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("target readback"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        debug!(surface = %surface.label(), width, height, "Created render target");

        Ok(QuadTarget {
            surface,
            texture,
            view,
            readback,
            width,
            height,
            padded_row,
            drawn: false,
        })
    }

    fn destroy_target(&mut self, target: QuadTarget) {
        debug!(surface = %target.surface.label(), "Destroying render target");
        target.readback.destroy();
        target.texture.destroy();
    }

    fn update_texture(&mut self, frame: &Frame) -> Result<(), RenderError> {
        let expected = frame.width as usize * frame.height as usize * 4;
        if frame.width == 0 || frame.height == 0 || frame.data.len() < expected {
            return Err(RenderError::Draw(format!(
                "frame {} has {} bytes for {}x{}",
                frame.sequence,
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }

        if self.frame.dims.needs_update(frame.width, frame.height) {
            debug!(
                width = frame.width,
                height = frame.height,
                "Reallocating frame texture"
            );
            self.frame.texture.destroy();
            self.frame = create_frame_texture(
                &self.device,
                &self.bind_group_layout,
                &self.sampler,
                &self.uniform_buffer,
                frame.width,
                frame.height,
            );
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.frame.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data[..expected],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * frame.width),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn draw(&mut self, target: &mut QuadTarget, uniforms: &QuadUniforms) -> Result<(), RenderError> {
        if !target.surface.is_valid() {
            return Err(RenderError::InvalidSurface(format!(
                "{} was released",
                target.surface.label()
            )));
        }

        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("quad draw"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("quad pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_viewport(0.0, 0.0, target.width as f32, target.height as f32, 0.0, 1.0);
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.frame.bind_group, &[]);
            pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            pass.draw(0..4, 0..1);
        }

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &target.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(target.padded_row),
                    rows_per_image: Some(target.height),
                },
            },
            wgpu::Extent3d {
                width: target.width,
                height: target.height,
                depth_or_array_layers: 1,
            },
        );

        self.queue.submit(std::iter::once(encoder.finish()));
        target.drawn = true;
        Ok(())
    }

    fn present(&mut self, target: &mut QuadTarget) -> Result<(), RenderError> {
        if !target.drawn {
            return Err(RenderError::Present(format!(
                "{} presented before drawing",
                target.surface.label()
            )));
        }
        target.drawn = false;

        let padded = pollster::block_on(read_buffer_async(&self.device, &target.readback))
            .map_err(RenderError::Present)?;
        let data = strip_row_padding(&padded, target.width, target.height, target.padded_row);

        let image = RenderedImage {
            data: data.into(),
            width: target.width,
            height: target.height,
        };
        target.surface.present(&image)?;
        Ok(())
    }

    fn release(&mut self) {
        self.frame.texture.destroy();
        self.vertex_buffer.destroy();
        self.uniform_buffer.destroy();
        info!(adapter = %self.info.adapter_name, "Quad renderer released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::source::{FrameSlot, FrameSource, VERTICAL_FLIP_TRANSFORM};
    use crate::backends::surface::ChannelSurface;
    use crate::pipelines::render::RenderEngine;
    use std::sync::Arc;
    use std::time::Duration;

    /// Validate WGSL shader using naga
    fn validate_shader(source: &str) -> Result<(), String> {
        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| format!("Parse error: {}", e.emit_to_string(source)))?;
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator
            .validate(&module)
            .map_err(|e| format!("Validation error: {:?}", e))?;
        Ok(())
    }

    #[test]
    fn test_quad_shader_valid() {
        if let Err(e) = validate_shader(QUAD_SHADER) {
            panic!("Quad shader validation failed: {}", e);
        }
    }

    #[test]
    fn test_uniform_layout() {
        assert_eq!(std::mem::size_of::<QuadUniforms>(), 128);
        assert_eq!(VERTEX_STRIDE, 20);
    }

    #[test]
    fn test_render_to_channel_surface() {
        // Requires a GPU (or a software adapter), skipped otherwise
        let renderer = match QuadRenderer::new() {
            Ok(r) => r,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };

        let slot = FrameSlot::new();
        let (preview, mut rx) = ChannelSurface::new("preview", 4, 2, 4);
        let engine = RenderEngine::start(
            slot.clone() as Arc<dyn FrameSource>,
            preview,
            move || Ok(renderer),
        )
        .unwrap();

        // Solid red 2x2 frame
        let red: Vec<u8> = [255u8, 0, 0, 255].repeat(4);
        slot.publish(red.into(), 2, 2, VERTICAL_FLIP_TRANSFORM);
        engine
            .binding()
            .unwrap()
            .flush(Duration::from_secs(10))
            .unwrap();

        let image = rx.try_recv().unwrap();
        assert_eq!((image.width, image.height), (4, 2));
        assert_eq!(image.data.len(), 4 * 2 * 4);
        assert_eq!(&image.data[..4], &[255, 0, 0, 255]);
    }
}
