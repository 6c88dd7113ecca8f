// SPDX-License-Identifier: GPL-3.0-only

//! GPU device creation for the render worker
//!
//! The render worker owns exactly one device/queue pair for its whole life.
//! Nothing here is shared with other threads.

pub use wgpu;

use tracing::{debug, info};

/// Information about the created GPU device
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    /// Name of the GPU adapter
    pub adapter_name: String,
    /// Backend being used (Vulkan, GL, Metal)
    pub backend: wgpu::Backend,
}

/// Create a wgpu device and queue for offscreen rendering
///
/// Prefers a hardware adapter; software adapters (llvmpipe, lavapipe) are
/// accepted so headless machines can still render.
pub async fn create_render_device(
    label: &str,
) -> Result<(wgpu::Device, wgpu::Queue, GpuDeviceInfo), String> {
    info!(label = label, "Creating GPU device for rendering");

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN | wgpu::Backends::GL | wgpu::Backends::METAL,
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| format!("Failed to find suitable GPU adapter: {}", e))?;

    let adapter_info = adapter.get_info();
    info!(
        adapter = %adapter_info.name,
        backend = ?adapter_info.backend,
        "GPU adapter selected for rendering"
    );

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                .using_resolution(adapter.limits()),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await
        .map_err(|e| format!("Failed to create GPU device: {}", e))?;

    debug!(
        max_texture = device.limits().max_texture_dimension_2d,
        "Render device limits"
    );

    let info = GpuDeviceInfo {
        adapter_name: adapter_info.name.clone(),
        backend: adapter_info.backend,
    };

    Ok((device, queue, info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_render_device() {
        // Requires a GPU (or a software adapter), skipped otherwise
        match pollster::block_on(create_render_device("test_device")) {
            Ok((device, queue, info)) => {
                println!("Created device: {:?}", info);
                assert!(!info.adapter_name.is_empty());
                drop(queue);
                drop(device);
            }
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
            }
        }
    }
}
