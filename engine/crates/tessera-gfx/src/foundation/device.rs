use ash::vk;

use crate::commands::command_recorder::CommandRecorderId;
use crate::descriptors::descriptor_table::{DescriptorHeapInfo, DescriptorKind, DescriptorSlot};
use crate::descriptors::sampler::GfxSamplerDesc;
use crate::error::GfxResult;
use crate::resources::resource_state::GfxResourceState;

/// 设备分配出的一块 GPU 内存（image 或 buffer）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuMemoryHandle(pub u64);

/// 2D image 的创建参数
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GfxImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}
impl GfxImageDesc {
    #[inline]
    pub fn new_2d(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self { extent, format, usage }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GfxBufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    /// 是否需要 CPU 映射写入
    pub host_visible: bool,
}

/// 写入 descriptor 时的 view 描述
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GfxViewDesc {
    RenderTarget { format: vk::Format },
    DepthStencil { format: vk::Format },
    ShaderResource { format: vk::Format, aspect: vk::ImageAspectFlags },
    UnorderedAccess { format: vk::Format },
    ConstantBuffer { size: vk::DeviceSize },
    Sampler(GfxSamplerDesc),
}

/// 图形设备的抽象
///
/// 只负责内存、descriptor 的创建与写入，以及命令分配器的重置。
/// 录制好的命令（`RecordedBatch`）由外部的 Renderer 负责回放和提交。
pub trait GfxDevice {
    fn name(&self) -> &str;

    /// 创建 image，初始状态为 `initial_state`
    fn create_image(
        &mut self,
        desc: &GfxImageDesc,
        initial_state: GfxResourceState,
        debug_name: &str,
    ) -> GfxResult<GpuMemoryHandle>;

    fn create_buffer(
        &mut self,
        desc: &GfxBufferDesc,
        initial_state: GfxResourceState,
        debug_name: &str,
    ) -> GfxResult<GpuMemoryHandle>;

    fn destroy_memory(&mut self, memory: GpuMemoryHandle);

    /// 写入 host visible 的 buffer
    fn write_buffer(&mut self, memory: GpuMemoryHandle, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()>;

    /// 某种 descriptor 表的地址信息
    fn descriptor_heap(&self, kind: DescriptorKind, capacity: u32) -> DescriptorHeapInfo;

    /// 在 slot 处写入一个 view，sampler 没有对应的 memory
    fn write_descriptor(&mut self, slot: &DescriptorSlot, memory: Option<GpuMemoryHandle>, view: &GfxViewDesc);

    /// 重置某个录制器对应的命令分配器
    ///
    /// 上一次提交的命令仍在执行等情况下会失败
    fn reset_command_allocator(&mut self, recorder: CommandRecorderId) -> GfxResult<()>;
}
