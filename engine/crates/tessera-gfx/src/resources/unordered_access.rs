use ash::vk;

use crate::descriptors::descriptor_table::{DescriptorKind, DescriptorSlot, DescriptorTables, GpuDescriptorHandle};
use crate::error::GfxResult;
use crate::foundation::device::{GfxDevice, GfxImageDesc, GfxViewDesc};
use crate::resources::gpu_resource::{GfxMemorySource, GfxResource, GfxResourceKind, GpuResource};
use crate::resources::resource_state::GfxResourceState;

/// 计算着色器读写的 storage image：{读写, 被采样}
pub struct UnorderedAccessResource {
    base: GpuResource,
    extent: vk::Extent2D,
    format: vk::Format,
    uav: DescriptorSlot,
    srv: DescriptorSlot,
}
// new & init
impl UnorderedAccessResource {
    pub const STATES: [GfxResourceState; 2] =
        [GfxResourceState::STORAGE_READ_WRITE_COMPUTE, GfxResourceState::SHADER_READ_COMPUTE];

    pub fn new(
        device: &mut dyn GfxDevice,
        tables: &mut DescriptorTables,
        extent: vk::Extent2D,
        format: vk::Format,
        name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let memory = device.create_image(
            &GfxImageDesc::new_2d(extent, format, vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED),
            Self::STATES[0],
            name.as_ref(),
        )?;

        let uav = tables.allocate(DescriptorKind::ShaderResource);
        device.write_descriptor(&uav, Some(memory), &GfxViewDesc::UnorderedAccess { format });
        let srv = tables.allocate(DescriptorKind::ShaderResource);
        device.write_descriptor(
            &srv,
            Some(memory),
            &GfxViewDesc::ShaderResource {
                format,
                aspect: vk::ImageAspectFlags::COLOR,
            },
        );

        Ok(Self {
            base: GpuResource::new(name.as_ref(), GfxMemorySource::Owned(memory), Self::STATES.to_vec()),
            extent,
            format,
            uav,
            srv,
        })
    }
}
// destroy
impl UnorderedAccessResource {
    pub fn destroy(self, device: &mut dyn GfxDevice, tables: &mut DescriptorTables) {
        tables.free(self.uav);
        tables.free(self.srv);
        self.base.release(device);
    }
}
// getter
impl UnorderedAccessResource {
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }
    #[inline]
    pub fn uav_handle(&self) -> GpuDescriptorHandle {
        self.uav.gpu_handle()
    }
    #[inline]
    pub fn srv_handle(&self) -> GpuDescriptorHandle {
        self.srv.gpu_handle()
    }
}
impl GfxResource for UnorderedAccessResource {
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
        GfxResourceKind::UnorderedAccess
    }
    #[inline]
    fn view(&self) -> Option<&DescriptorSlot> {
        Some(&self.uav)
    }
}
