use ash::vk;

use crate::descriptors::descriptor_table::{DescriptorKind, DescriptorSlot, DescriptorTables, GpuDescriptorHandle};
use crate::foundation::device::{GfxDevice, GfxViewDesc, GpuMemoryHandle};
use crate::resources::gpu_resource::{GfxMemorySource, GfxResource, GfxResourceKind, GpuResource};
use crate::resources::resource_state::GfxResourceState;

/// 建立在别的资源内存之上的只读 view
///
/// 不持有内存，底层资源的状态切换由内存的持有者负责
pub struct ShaderResourceResource {
    base: GpuResource,
    format: vk::Format,
    srv: DescriptorSlot,
}
// new & init
impl ShaderResourceResource {
    pub fn new(
        device: &mut dyn GfxDevice,
        tables: &mut DescriptorTables,
        memory: GpuMemoryHandle,
        format: vk::Format,
        name: impl AsRef<str>,
    ) -> Self {
        let srv = tables.allocate(DescriptorKind::ShaderResource);
        device.write_descriptor(
            &srv,
            Some(memory),
            &GfxViewDesc::ShaderResource {
                format,
                aspect: vk::ImageAspectFlags::COLOR,
            },
        );

        Self {
            base: GpuResource::new(
                name.as_ref(),
                GfxMemorySource::External(memory),
                vec![GfxResourceState::SHADER_READ_FRAGMENT],
            ),
            format,
            srv,
        }
    }
}
// destroy
impl ShaderResourceResource {
    pub fn destroy(self, device: &mut dyn GfxDevice, tables: &mut DescriptorTables) {
        tables.free(self.srv);
        self.base.release(device);
    }
}
// getter
impl ShaderResourceResource {
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }
    #[inline]
    pub fn srv_handle(&self) -> GpuDescriptorHandle {
        self.srv.gpu_handle()
    }
}
impl GfxResource for ShaderResourceResource {
    #[inline]
    fn gpu_resource(&self) -> &GpuResource {
        &self.base
    }
    #[inline]
    fn gpu_resource_mut(&mut self) -> &mut GpuResource {
        &mut self.base
    }
    #[inline]
    fn kind(&self) -> GfxResourceKind {
        GfxResourceKind::ShaderResource
    }
    #[inline]
    fn view(&self) -> Option<&DescriptorSlot> {
        Some(&self.srv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::descriptor_table::DescriptorCapacities;
    use crate::foundation::headless_device::HeadlessDevice;
    use crate::resources::render_target::{GfxRenderTargetDesc, RenderTargetResource};

    #[test]
    fn test_view_shares_render_target_memory() {
        let mut device = HeadlessDevice::new();
        let mut tables = DescriptorTables::new(&device, &DescriptorCapacities::default());
        let rt = RenderTargetResource::new(
            &mut device,
            &mut tables,
            &GfxRenderTargetDesc {
                extent: vk::Extent2D { width: 8, height: 8 },
                format: vk::Format::R16G16B16A16_SFLOAT,
                clear_color: [0.0; 4],
            },
            "rt",
        )
        .unwrap();

        let srv = ShaderResourceResource::new(&mut device, &mut tables, rt.memory().handle(), rt.format(), "rt.srv");
        assert_eq!(srv.memory(), GfxMemorySource::External(rt.memory().handle()));
        assert!(!srv.srv_handle().is_null());

        srv.destroy(&mut device, &mut tables);
        assert_eq!(device.live_memory_count(), 1);
        rt.destroy(&mut device, &mut tables);
        assert_eq!(device.live_memory_count(), 0);
    }
}
