//! 资源状态切换对应的 barrier

use ash::vk;

use crate::foundation::device::GpuMemoryHandle;
use crate::resources::resource_state::GfxResourceState;

/// 一次资源状态切换
#[derive(Clone, Debug, PartialEq)]
pub struct GfxResourceBarrier {
    pub memory: GpuMemoryHandle,
    pub src_state: GfxResourceState,
    pub dst_state: GfxResourceState,
    /// 对 buffer 无意义，保持为空
    pub aspect: vk::ImageAspectFlags,
}
impl GfxResourceBarrier {
    pub fn new(memory: GpuMemoryHandle, src_state: GfxResourceState, dst_state: GfxResourceState) -> Self {
        let aspect = if src_state.is_image_state() || dst_state.is_image_state() {
            vk::ImageAspectFlags::COLOR
        } else {
            vk::ImageAspectFlags::empty()
        };
        Self {
            memory,
            src_state,
            dst_state,
            aspect,
        }
    }

    /// 设置 aspect
    #[inline]
    pub fn with_aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect;
        self
    }

    /// 源端需要等待的 access，只读访问不需要 flush
    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        self.src_state.src_access()
    }

    /// 是否会改变 image layout
    #[inline]
    pub fn is_layout_transition(&self) -> bool {
        self.src_state.layout != self.dst_state.layout
    }
}

/// 根据格式推断 image aspect
pub fn infer_image_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// 是否是深度格式
#[inline]
pub fn is_depth_format(format: vk::Format) -> bool {
    infer_image_aspect(format).contains(vk::ImageAspectFlags::DEPTH)
}
