//! 不依赖 GPU 的设备实现
//!
//! 只在内存中记录分配与 descriptor 写入，用于测试以及离线校验录制结果。

use std::collections::{HashMap, HashSet};

use ash::vk;

use crate::commands::command_recorder::CommandRecorderId;
use crate::descriptors::descriptor_table::{DescriptorHeapInfo, DescriptorKind, DescriptorSlot};
use crate::error::{GfxError, GfxResult};
use crate::foundation::device::{GfxBufferDesc, GfxDevice, GfxImageDesc, GfxViewDesc, GpuMemoryHandle};
use crate::resources::resource_state::GfxResourceState;

#[derive(Clone, Debug)]
pub enum HeadlessMemory {
    Image {
        desc: GfxImageDesc,
        initial_state: GfxResourceState,
    },
    Buffer {
        desc: GfxBufferDesc,
        contents: Vec<u8>,
    },
}

#[derive(Clone, Debug)]
pub struct HeadlessAllocation {
    pub name: String,
    pub memory: HeadlessMemory,
}

pub struct HeadlessDevice {
    next_memory_id: u64,
    allocations: HashMap<GpuMemoryHandle, HeadlessAllocation>,
    /// (kind, index) -> 最近一次写入的 view
    descriptors: HashMap<(DescriptorKind, u32), (Option<GpuMemoryHandle>, GfxViewDesc)>,

    failing_resets: HashSet<CommandRecorderId>,
    failing_allocations: HashSet<String>,
    reset_count: usize,
}
impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl HeadlessDevice {
    const DESCRIPTOR_STRIDE: u64 = 64;

    pub fn new() -> Self {
        Self {
            next_memory_id: 1,
            allocations: HashMap::new(),
            descriptors: HashMap::new(),
            failing_resets: HashSet::new(),
            failing_allocations: HashSet::new(),
            reset_count: 0,
        }
    }
}
// 故障注入
impl HeadlessDevice {
    /// 下一次重置该录制器时失败
    pub fn fail_next_reset(&mut self, recorder: CommandRecorderId) {
        self.failing_resets.insert(recorder);
    }

    /// 名字为 `name` 的下一次分配失败
    pub fn fail_next_allocation(&mut self, name: impl Into<String>) {
        self.failing_allocations.insert(name.into());
    }
}
// getter
impl HeadlessDevice {
    #[inline]
    pub fn live_memory_count(&self) -> usize {
        self.allocations.len()
    }
    #[inline]
    pub fn allocation(&self, memory: GpuMemoryHandle) -> Option<&HeadlessAllocation> {
        self.allocations.get(&memory)
    }
    #[inline]
    pub fn buffer_contents(&self, memory: GpuMemoryHandle) -> Option<&[u8]> {
        match &self.allocations.get(&memory)?.memory {
            HeadlessMemory::Buffer { contents, .. } => Some(contents),
            HeadlessMemory::Image { .. } => None,
        }
    }
    #[inline]
    pub fn descriptor(&self, slot: &DescriptorSlot) -> Option<&(Option<GpuMemoryHandle>, GfxViewDesc)> {
        self.descriptors.get(&(slot.kind(), slot.index()))
    }
    #[inline]
    pub fn reset_count(&self) -> usize {
        self.reset_count
    }

    fn allocate(&mut self, name: &str, memory: HeadlessMemory) -> GfxResult<GpuMemoryHandle> {
        if self.failing_allocations.remove(name) {
            return Err(GfxError::AllocationFailed {
                name: name.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        let handle = GpuMemoryHandle(self.next_memory_id);
        self.next_memory_id += 1;
        self.allocations.insert(
            handle,
            HeadlessAllocation {
                name: name.to_string(),
                memory,
            },
        );
        log::debug!("headless: allocate {handle:?} '{name}'");
        Ok(handle)
    }
}
impl GfxDevice for HeadlessDevice {
    fn name(&self) -> &str {
        "headless"
    }

    fn create_image(
        &mut self,
        desc: &GfxImageDesc,
        initial_state: GfxResourceState,
        debug_name: &str,
    ) -> GfxResult<GpuMemoryHandle> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(GfxError::InvalidExtent {
                width: desc.extent.width,
                height: desc.extent.height,
            });
        }
        self.allocate(
            debug_name,
            HeadlessMemory::Image {
                desc: *desc,
                initial_state,
            },
        )
    }

    fn create_buffer(
        &mut self,
        desc: &GfxBufferDesc,
        _initial_state: GfxResourceState,
        debug_name: &str,
    ) -> GfxResult<GpuMemoryHandle> {
        self.allocate(
            debug_name,
            HeadlessMemory::Buffer {
                desc: *desc,
                contents: vec![0; desc.size as usize],
            },
        )
    }

    fn destroy_memory(&mut self, memory: GpuMemoryHandle) {
        if self.allocations.remove(&memory).is_none() {
            log::warn!("headless: destroy unknown memory {memory:?}");
        }
        self.descriptors.retain(|_, (m, _)| *m != Some(memory));
    }

    fn write_buffer(&mut self, memory: GpuMemoryHandle, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        let allocation = self.allocations.get_mut(&memory).ok_or(GfxError::ResourceNotFound)?;
        let HeadlessMemory::Buffer { desc, contents } = &mut allocation.memory else {
            return Err(GfxError::ResourceNotFound);
        };
        if !desc.host_visible {
            return Err(GfxError::AllocationFailed {
                name: allocation.name.clone(),
                reason: "buffer is not host visible".to_string(),
            });
        }

        let end = offset + data.len() as u64;
        if end > desc.size {
            return Err(GfxError::BufferWriteOutOfRange {
                name: allocation.name.clone(),
                offset,
                len: data.len() as u64,
                size: desc.size,
            });
        }
        contents[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn descriptor_heap(&self, kind: DescriptorKind, _capacity: u32) -> DescriptorHeapInfo {
        // 每种表使用不同的地址段，便于在测试中区分
        let segment = (kind as u64 + 1) << 32;
        DescriptorHeapInfo {
            cpu_base: segment,
            gpu_base: kind.is_shader_visible().then_some(segment | (1 << 48)),
            stride: Self::DESCRIPTOR_STRIDE,
        }
    }

    fn write_descriptor(&mut self, slot: &DescriptorSlot, memory: Option<GpuMemoryHandle>, view: &GfxViewDesc) {
        self.descriptors.insert((slot.kind(), slot.index()), (memory, *view));
    }

    fn reset_command_allocator(&mut self, recorder: CommandRecorderId) -> GfxResult<()> {
        if self.failing_resets.remove(&recorder) {
            return Err(GfxError::RecorderResetFailed { recorder });
        }
        self.reset_count += 1;
        Ok(())
    }
}
