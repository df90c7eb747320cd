use ash::vk;

use crate::descriptors::descriptor_table::{DescriptorKind, DescriptorSlot, DescriptorTables, GpuDescriptorHandle};
use crate::error::{GfxError, GfxResult};
use crate::foundation::device::{GfxBufferDesc, GfxDevice, GfxViewDesc};
use crate::resources::gpu_resource::{GfxMemorySource, GfxResource, GfxResourceKind, GpuResource};
use crate::resources::resource_state::GfxResourceState;

/// CPU 可写的常量缓冲
pub struct ConstantBufferResource {
    base: GpuResource,
    size: vk::DeviceSize,
    cbv: DescriptorSlot,
}
// new & init
impl ConstantBufferResource {
    /// 常量缓冲的大小按 256 字节对齐
    pub const ALIGNMENT: vk::DeviceSize = 256;

    pub fn new(
        device: &mut dyn GfxDevice,
        tables: &mut DescriptorTables,
        size: vk::DeviceSize,
        name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let size = size.max(1).next_multiple_of(Self::ALIGNMENT);
        let memory = device.create_buffer(
            &GfxBufferDesc {
                size,
                usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
                host_visible: true,
            },
            GfxResourceState::UNIFORM_READ,
            name.as_ref(),
        )?;

        let cbv = tables.allocate(DescriptorKind::ShaderResource);
        device.write_descriptor(&cbv, Some(memory), &GfxViewDesc::ConstantBuffer { size });

        Ok(Self {
            base: GpuResource::new(
                name.as_ref(),
                GfxMemorySource::Owned(memory),
                vec![GfxResourceState::UNIFORM_READ],
            ),
            size,
            cbv,
        })
    }
}
// destroy
impl ConstantBufferResource {
    pub fn destroy(self, device: &mut dyn GfxDevice, tables: &mut DescriptorTables) {
        tables.free(self.cbv);
        self.base.release(device);
    }
}
// getter
impl ConstantBufferResource {
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
    #[inline]
    pub fn cbv_handle(&self) -> GpuDescriptorHandle {
        self.cbv.gpu_handle()
    }
}
// 写入
impl ConstantBufferResource {
    pub fn write<T: bytemuck::Pod>(&self, device: &mut dyn GfxDevice, data: &T) -> GfxResult<()> {
        self.write_bytes(device, bytemuck::bytes_of(data))
    }

    pub fn write_bytes(&self, device: &mut dyn GfxDevice, bytes: &[u8]) -> GfxResult<()> {
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(GfxError::BufferWriteOutOfRange {
                name: self.base.name().to_string(),
                offset: 0,
                len: bytes.len() as u64,
                size: self.size,
            });
        }
        device.write_buffer(self.base.memory().handle(), 0, bytes)
    }
}
impl GfxResource for ConstantBufferResource {
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
        GfxResourceKind::ConstantBuffer
    }
    #[inline]
    fn view(&self) -> Option<&DescriptorSlot> {
        Some(&self.cbv)
    }
}
