use ash::vk;

use crate::descriptors::descriptor_table::DescriptorSlot;
use crate::error::{GfxError, GfxResult};
use crate::foundation::device::{GfxBufferDesc, GfxDevice};
use crate::resources::gpu_resource::{GfxMemorySource, GfxResource, GfxResourceKind, GpuResource};
use crate::resources::resource_state::GfxResourceState;

/// 索引缓冲，直接绑定到管线，不占用 descriptor
pub struct IndexBufferResource {
    base: GpuResource,
    index_type: vk::IndexType,
    capacity: u32,
    count: u32,
}
// new & init
impl IndexBufferResource {
    pub fn new(
        device: &mut dyn GfxDevice,
        index_type: vk::IndexType,
        capacity: u32,
        name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let size = capacity as vk::DeviceSize * Self::index_size(index_type);
        let memory = device.create_buffer(
            &GfxBufferDesc {
                size,
                usage: vk::BufferUsageFlags::INDEX_BUFFER,
                host_visible: true,
            },
            GfxResourceState::INDEX_READ,
            name.as_ref(),
        )?;

        Ok(Self {
            base: GpuResource::new(
                name.as_ref(),
                GfxMemorySource::Owned(memory),
                vec![GfxResourceState::INDEX_READ],
            ),
            index_type,
            capacity,
            count: 0,
        })
    }

    #[inline]
    fn index_size(index_type: vk::IndexType) -> vk::DeviceSize {
        if index_type == vk::IndexType::UINT16 { 2 } else { 4 }
    }
}
// destroy
impl IndexBufferResource {
    pub fn destroy(self, device: &mut dyn GfxDevice) {
        self.base.release(device);
    }
}
// getter
impl IndexBufferResource {
    #[inline]
    pub fn index_type(&self) -> vk::IndexType {
        self.index_type
    }
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
    /// 最近一次写入的索引数量
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }
}
// 写入
impl IndexBufferResource {
    pub fn write_u16(&mut self, device: &mut dyn GfxDevice, indices: &[u16]) -> GfxResult<()> {
        debug_assert_eq!(self.index_type, vk::IndexType::UINT16);
        self.write_raw(device, bytemuck::cast_slice(indices), indices.len())
    }

    pub fn write_u32(&mut self, device: &mut dyn GfxDevice, indices: &[u32]) -> GfxResult<()> {
        debug_assert_eq!(self.index_type, vk::IndexType::UINT32);
        self.write_raw(device, bytemuck::cast_slice(indices), indices.len())
    }

    fn write_raw(&mut self, device: &mut dyn GfxDevice, bytes: &[u8], count: usize) -> GfxResult<()> {
        if count > self.capacity as usize {
            return Err(GfxError::BufferWriteOutOfRange {
                name: self.base.name().to_string(),
                offset: 0,
                len: bytes.len() as u64,
                size: self.capacity as u64 * Self::index_size(self.index_type),
            });
        }
        device.write_buffer(self.base.memory().handle(), 0, bytes)?;
        self.count = count as u32;
        Ok(())
    }
}
impl GfxResource for IndexBufferResource {
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
        GfxResourceKind::IndexBuffer
    }
    #[inline]
    fn view(&self) -> Option<&DescriptorSlot> {
        None
    }
}
