use ash::vk;

use crate::commands::command_recorder::CommandRecorder;
use crate::descriptors::descriptor_table::{CpuDescriptorHandle, DescriptorKind, DescriptorSlot, DescriptorTables};
use crate::error::GfxResult;
use crate::foundation::device::{GfxDevice, GfxImageDesc, GfxViewDesc, GpuMemoryHandle};
use crate::resources::gpu_resource::{GfxMemorySource, GfxResource, GfxResourceKind, GpuResource};
use crate::resources::resource_state::GfxResourceState;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GfxRenderTargetDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub clear_color: [f32; 4],
}

/// 颜色渲染目标：{写入, 被采样} 两个状态
pub struct RenderTargetResource {
    base: GpuResource,
    desc: GfxRenderTargetDesc,
    rtv: DescriptorSlot,
}
// new & init
impl RenderTargetResource {
    pub const STATES: [GfxResourceState; 2] =
        [GfxResourceState::COLOR_ATTACHMENT_WRITE, GfxResourceState::SHADER_READ_FRAGMENT];

    pub fn new(
        device: &mut dyn GfxDevice,
        tables: &mut DescriptorTables,
        desc: &GfxRenderTargetDesc,
        name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let image_desc = GfxImageDesc::new_2d(
            desc.extent,
            desc.format,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        );
        let memory = device.create_image(&image_desc, Self::STATES[0], name.as_ref())?;
        Ok(Self::with_memory(device, tables, desc, GfxMemorySource::Owned(memory), name))
    }

    /// 在外部提供的 image 上创建 render target，例如 swapchain image
    pub fn from_external(
        device: &mut dyn GfxDevice,
        tables: &mut DescriptorTables,
        desc: &GfxRenderTargetDesc,
        memory: GpuMemoryHandle,
        name: impl AsRef<str>,
    ) -> Self {
        Self::with_memory(device, tables, desc, GfxMemorySource::External(memory), name)
    }

    fn with_memory(
        device: &mut dyn GfxDevice,
        tables: &mut DescriptorTables,
        desc: &GfxRenderTargetDesc,
        memory: GfxMemorySource,
        name: impl AsRef<str>,
    ) -> Self {
        let rtv = tables.allocate(DescriptorKind::RenderTarget);
        device.write_descriptor(&rtv, Some(memory.handle()), &GfxViewDesc::RenderTarget { format: desc.format });

        Self {
            base: GpuResource::new(name.as_ref(), memory, Self::STATES.to_vec()),
            desc: *desc,
            rtv,
        }
    }
}
// destroy
impl RenderTargetResource {
    pub fn destroy(self, device: &mut dyn GfxDevice, tables: &mut DescriptorTables) {
        tables.free(self.rtv);
        self.base.release(device);
    }
}
// getter
impl RenderTargetResource {
    #[inline]
    pub fn desc(&self) -> &GfxRenderTargetDesc {
        &self.desc
    }
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }
    #[inline]
    pub fn rtv_handle(&self) -> CpuDescriptorHandle {
        self.rtv.cpu_handle()
    }
}
// 命令
impl RenderTargetResource {
    /// 使用创建时指定的颜色清屏，资源必须处于写入状态
    pub fn clear(&self, cmd: &mut CommandRecorder) {
        debug_assert!(self.base.is_in_state(GfxResourceState::COLOR_ATTACHMENT_WRITE));
        cmd.clear_color(self.rtv.cpu_handle(), self.desc.clear_color);
    }
}
impl GfxResource for RenderTargetResource {
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
        GfxResourceKind::RenderTarget
    }
    #[inline]
    fn view(&self) -> Option<&DescriptorSlot> {
        Some(&self.rtv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::command_recorder::{CommandRecorderId, GfxCommand};
    use crate::descriptors::descriptor_table::DescriptorCapacities;
    use crate::foundation::headless_device::HeadlessDevice;

    fn desc() -> GfxRenderTargetDesc {
        GfxRenderTargetDesc {
            extent: vk::Extent2D { width: 32, height: 16 },
            format: vk::Format::B8G8R8A8_UNORM,
            clear_color: [0.1, 0.2, 0.3, 1.0],
        }
    }

    #[test]
    fn test_create_and_destroy() {
        let mut device = HeadlessDevice::new();
        let mut tables = DescriptorTables::new(&device, &DescriptorCapacities::default());

        let rt = RenderTargetResource::new(&mut device, &mut tables, &desc(), "rt").unwrap();
        assert_eq!(rt.state(), GfxResourceState::COLOR_ATTACHMENT_WRITE);
        assert_eq!(rt.kind(), GfxResourceKind::RenderTarget);
        assert!(device.descriptor(rt.view().unwrap()).is_some());
        assert_eq!(device.live_memory_count(), 1);

        rt.destroy(&mut device, &mut tables);
        assert_eq!(device.live_memory_count(), 0);
        assert_eq!(tables.live_total(), 0);
    }

    #[test]
    fn test_external_memory_is_not_released() {
        let mut device = HeadlessDevice::new();
        let mut tables = DescriptorTables::new(&device, &DescriptorCapacities::default());
        let image_desc = GfxImageDesc::new_2d(
            desc().extent,
            desc().format,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
        );
        let memory = device.create_image(&image_desc, GfxResourceState::UNDEFINED, "swapchain").unwrap();

        let rt = RenderTargetResource::from_external(&mut device, &mut tables, &desc(), memory, "rt");
        rt.destroy(&mut device, &mut tables);
        assert!(device.allocation(memory).is_some());

        device.destroy_memory(memory);
    }

    #[test]
    fn test_clear_uses_desc_color() {
        let mut device = HeadlessDevice::new();
        let mut tables = DescriptorTables::new(&device, &DescriptorCapacities::default());
        let rt = RenderTargetResource::new(&mut device, &mut tables, &desc(), "rt").unwrap();

        let mut cmd = CommandRecorder::new(CommandRecorderId(0), "test");
        cmd.begin();
        rt.clear(&mut cmd);
        assert_eq!(
            cmd.commands()[0],
            GfxCommand::ClearColor {
                target: rt.rtv_handle(),
                color: [0.1, 0.2, 0.3, 1.0],
            }
        );

        rt.destroy(&mut device, &mut tables);
    }
}
