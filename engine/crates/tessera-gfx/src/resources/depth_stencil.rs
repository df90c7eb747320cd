use ash::vk;

use crate::commands::barrier::infer_image_aspect;
use crate::commands::command_recorder::CommandRecorder;
use crate::descriptors::descriptor_table::{
    CpuDescriptorHandle, DescriptorKind, DescriptorSlot, DescriptorTables, GpuDescriptorHandle,
};
use crate::error::GfxResult;
use crate::foundation::device::{GfxDevice, GfxImageDesc, GfxViewDesc};
use crate::resources::gpu_resource::{GfxMemorySource, GfxResource, GfxResourceKind, GpuResource};
use crate::resources::resource_state::GfxResourceState;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GfxDepthStencilDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub clear_depth: f32,
    pub clear_stencil: u32,
    /// 作为纹理采样时使用的格式；`None` 表示不需要 SRV
    pub shader_view_format: Option<vk::Format>,
}

/// 深度缓冲
///
/// - 不带 SRV：{深度写入, 深度只读}
/// - 带 SRV：{深度写入, 深度只读, 被采样}
pub struct DepthStencilResource {
    base: GpuResource,
    desc: GfxDepthStencilDesc,
    dsv: DescriptorSlot,
    srv: Option<DescriptorSlot>,
}
// new & init
impl DepthStencilResource {
    pub fn new(
        device: &mut dyn GfxDevice,
        tables: &mut DescriptorTables,
        desc: &GfxDepthStencilDesc,
        name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let mut usage = vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        if desc.shader_view_format.is_some() {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        let states = Self::states_for(desc.shader_view_format.is_some());
        let memory = device.create_image(&GfxImageDesc::new_2d(desc.extent, desc.format, usage), states[0], name.as_ref())?;

        let dsv = tables.allocate(DescriptorKind::DepthStencil);
        device.write_descriptor(&dsv, Some(memory), &GfxViewDesc::DepthStencil { format: desc.format });

        // 采样深度时只读取 depth aspect
        let srv = desc.shader_view_format.map(|format| {
            let slot = tables.allocate(DescriptorKind::ShaderResource);
            device.write_descriptor(
                &slot,
                Some(memory),
                &GfxViewDesc::ShaderResource {
                    format,
                    aspect: vk::ImageAspectFlags::DEPTH,
                },
            );
            slot
        });

        let base = GpuResource::new(name.as_ref(), GfxMemorySource::Owned(memory), states)
            .with_aspect(infer_image_aspect(desc.format));

        Ok(Self {
            base,
            desc: *desc,
            dsv,
            srv,
        })
    }

    pub fn states_for(with_shader_view: bool) -> Vec<GfxResourceState> {
        let mut states = vec![GfxResourceState::DEPTH_ATTACHMENT_WRITE, GfxResourceState::DEPTH_ATTACHMENT_READ];
        if with_shader_view {
            states.push(GfxResourceState::SHADER_READ_DEPTH);
        }
        states
    }

    /// 根据深度格式推断采样时使用的格式
    pub fn shader_view_format_for(depth_format: vk::Format) -> Option<vk::Format> {
        match depth_format {
            vk::Format::D16_UNORM => Some(vk::Format::R16_UNORM),
            vk::Format::D32_SFLOAT => Some(vk::Format::R32_SFLOAT),
            // Vulkan 没有与 D24 / D32S8 兼容的颜色格式，只能用原格式 + depth aspect
            vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT | vk::Format::X8_D24_UNORM_PACK32 => {
                Some(depth_format)
            }
            _ => None,
        }
    }
}
// destroy
impl DepthStencilResource {
    pub fn destroy(self, device: &mut dyn GfxDevice, tables: &mut DescriptorTables) {
        tables.free(self.dsv);
        if let Some(srv) = self.srv {
            tables.free(srv);
        }
        self.base.release(device);
    }
}
// getter
impl DepthStencilResource {
    #[inline]
    pub fn desc(&self) -> &GfxDepthStencilDesc {
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
    pub fn dsv_handle(&self) -> CpuDescriptorHandle {
        self.dsv.cpu_handle()
    }
    #[inline]
    pub fn has_shader_view(&self) -> bool {
        self.srv.is_some()
    }
    #[inline]
    pub fn srv_handle(&self) -> GpuDescriptorHandle {
        self.srv.as_ref().map_or(GpuDescriptorHandle::NULL, |srv| srv.gpu_handle())
    }
    /// 写入结束后的可读状态：有 SRV 时为被采样，否则为深度只读
    #[inline]
    pub fn readable_state(&self) -> GfxResourceState {
        if self.has_shader_view() {
            GfxResourceState::SHADER_READ_DEPTH
        } else {
            GfxResourceState::DEPTH_ATTACHMENT_READ
        }
    }
}
// 命令
impl DepthStencilResource {
    pub fn clear(&self, cmd: &mut CommandRecorder) {
        debug_assert!(self.base.is_in_state(GfxResourceState::DEPTH_ATTACHMENT_WRITE));
        cmd.clear_depth_stencil(self.dsv.cpu_handle(), self.desc.clear_depth, self.desc.clear_stencil);
    }

    #[inline]
    pub fn transition_to_shader_resource(&mut self, cmd: &mut CommandRecorder) -> GfxResult<bool> {
        let state = self.readable_state();
        self.base.transition_to(state, cmd)
    }
}
impl GfxResource for DepthStencilResource {
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
        GfxResourceKind::DepthStencil
    }
    #[inline]
    fn view(&self) -> Option<&DescriptorSlot> {
        Some(&self.dsv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::command_recorder::CommandRecorderId;
    use crate::descriptors::descriptor_table::DescriptorCapacities;
    use crate::foundation::headless_device::HeadlessDevice;

    fn desc(shader_view_format: Option<vk::Format>) -> GfxDepthStencilDesc {
        GfxDepthStencilDesc {
            extent: vk::Extent2D { width: 64, height: 64 },
            format: vk::Format::D32_SFLOAT,
            clear_depth: 1.0,
            clear_stencil: 0,
            shader_view_format,
        }
    }

    #[test]
    fn test_state_cycle_depends_on_srv() {
        let mut device = HeadlessDevice::new();
        let mut tables = DescriptorTables::new(&device, &DescriptorCapacities::default());

        let plain = DepthStencilResource::new(&mut device, &mut tables, &desc(None), "plain").unwrap();
        assert_eq!(plain.gpu_resource().states().len(), 2);
        assert!(plain.srv_handle().is_null());
        assert_eq!(plain.readable_state(), GfxResourceState::DEPTH_ATTACHMENT_READ);

        let sampled =
            DepthStencilResource::new(&mut device, &mut tables, &desc(Some(vk::Format::R32_SFLOAT)), "shadow").unwrap();
        assert_eq!(sampled.gpu_resource().states().len(), 3);
        assert!(!sampled.srv_handle().is_null());

        plain.destroy(&mut device, &mut tables);
        sampled.destroy(&mut device, &mut tables);
        assert_eq!(tables.live_total(), 0);
        assert_eq!(device.live_memory_count(), 0);
    }

    #[test]
    fn test_transition_to_shader_resource() {
        let mut device = HeadlessDevice::new();
        let mut tables = DescriptorTables::new(&device, &DescriptorCapacities::default());
        let mut depth =
            DepthStencilResource::new(&mut device, &mut tables, &desc(Some(vk::Format::R32_SFLOAT)), "shadow").unwrap();

        let mut cmd = CommandRecorder::new(CommandRecorderId(0), "test");
        cmd.begin();
        depth.gpu_resource_mut().attach_recorder(cmd.id());
        depth.clear(&mut cmd);
        assert!(depth.transition_to_shader_resource(&mut cmd).unwrap());
        assert_eq!(depth.state(), GfxResourceState::SHADER_READ_DEPTH);

        depth.destroy(&mut device, &mut tables);
    }

    #[test]
    fn test_shader_view_format_guess() {
        assert_eq!(
            DepthStencilResource::shader_view_format_for(vk::Format::D32_SFLOAT),
            Some(vk::Format::R32_SFLOAT)
        );
        assert_eq!(
            DepthStencilResource::shader_view_format_for(vk::Format::D24_UNORM_S8_UINT),
            Some(vk::Format::D24_UNORM_S8_UINT)
        );
        assert_eq!(DepthStencilResource::shader_view_format_for(vk::Format::R8_UNORM), None);
    }
}
