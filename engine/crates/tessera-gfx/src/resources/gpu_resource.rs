//! 所有 GPU 资源共享的状态机
//!
//! 每种资源在创建时声明一个 1~3 个状态的循环，资源只能处于其中之一。
//! 状态切换必须在一个已经 attach 到该资源、并且正在录制的 recorder 上进行，
//! 每次真正发生的切换恰好产生一条 barrier。

use crate::commands::barrier::GfxResourceBarrier;
use crate::commands::command_recorder::{CommandRecorder, CommandRecorderId};
use crate::descriptors::descriptor_table::DescriptorSlot;
use crate::error::{GfxError, GfxResult};
use crate::foundation::device::{GfxDevice, GpuMemoryHandle};
use crate::resources::resource_state::GfxResourceState;
use ash::vk;

/// GPU 内存的来源
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxMemorySource {
    /// 由资源自己创建，销毁时释放
    Owned(GpuMemoryHandle),
    /// 由外部提供（例如别的资源的 view），销毁时不释放
    External(GpuMemoryHandle),
}
impl GfxMemorySource {
    #[inline]
    pub fn handle(&self) -> GpuMemoryHandle {
        match self {
            GfxMemorySource::Owned(handle) | GfxMemorySource::External(handle) => *handle,
        }
    }
}

/// 资源的种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxResourceKind {
    RenderTarget,
    DepthStencil,
    ShaderResource,
    ConstantBuffer,
    IndexBuffer,
    UnorderedAccess,
}

/// 状态机本体
pub struct GpuResource {
    name: String,
    memory: GfxMemorySource,
    states: Vec<GfxResourceState>,
    current: usize,
    aspect: vk::ImageAspectFlags,

    attached_recorder: Option<CommandRecorderId>,
}
// new & init
impl GpuResource {
    /// 资源初始处于 `states[0]`
    pub fn new(name: impl Into<String>, memory: GfxMemorySource, states: Vec<GfxResourceState>) -> Self {
        assert!(
            (1..=3).contains(&states.len()),
            "a resource declares 1 to 3 states, got {}",
            states.len()
        );
        Self {
            name: name.into(),
            memory,
            states,
            current: 0,
            aspect: vk::ImageAspectFlags::COLOR,
            attached_recorder: None,
        }
    }

    #[inline]
    pub fn with_aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect;
        self
    }
}
// destroy
impl GpuResource {
    /// 释放自己持有的内存，外部提供的内存保持不动
    pub fn release(self, device: &mut dyn GfxDevice) {
        if let GfxMemorySource::Owned(memory) = self.memory {
            device.destroy_memory(memory);
        }
    }
}
// getter
impl GpuResource {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[inline]
    pub fn memory(&self) -> GfxMemorySource {
        self.memory
    }
    #[inline]
    pub fn states(&self) -> &[GfxResourceState] {
        &self.states
    }
    #[inline]
    pub fn state(&self) -> GfxResourceState {
        self.states[self.current]
    }
    #[inline]
    pub fn state_index(&self) -> usize {
        self.current
    }
    #[inline]
    pub fn is_in_state(&self, state: GfxResourceState) -> bool {
        self.state() == state
    }
    #[inline]
    pub fn attached_recorder(&self) -> Option<CommandRecorderId> {
        self.attached_recorder
    }
}
// 状态切换
impl GpuResource {
    /// 每次录制开始时调用一次
    #[inline]
    pub fn attach_recorder(&mut self, recorder: CommandRecorderId) {
        self.attached_recorder = Some(recorder);
    }

    #[inline]
    pub fn detach_recorder(&mut self) {
        self.attached_recorder = None;
    }

    fn check_recorder(&self, cmd: &CommandRecorder) -> GfxResult<()> {
        match self.attached_recorder {
            None => Err(GfxError::NoRecorderAttached {
                resource: self.name.clone(),
            }),
            Some(attached) if attached != cmd.id() => Err(GfxError::RecorderMismatch {
                resource: self.name.clone(),
                attached,
                used: cmd.id(),
            }),
            Some(_) if !cmd.is_recording() => Err(GfxError::RecorderNotRecording { recorder: cmd.id() }),
            Some(_) => Ok(()),
        }
    }

    fn transition_to_index(&mut self, target: usize, cmd: &mut CommandRecorder) -> GfxResult<bool> {
        self.check_recorder(cmd)?;
        if target == self.current {
            return Ok(false);
        }

        let barrier = GfxResourceBarrier::new(self.memory.handle(), self.states[self.current], self.states[target])
            .with_aspect(self.aspect);
        cmd.resource_barrier(barrier);
        self.current = target;
        Ok(true)
    }

    /// 切换到 `state`
    ///
    /// # 返回
    /// 是否真的产生了 barrier；已经处于目标状态时返回 `false`
    ///
    /// # Panics
    /// `state` 不在该资源声明的状态循环中
    pub fn transition_to(&mut self, state: GfxResourceState, cmd: &mut CommandRecorder) -> GfxResult<bool> {
        let Some(target) = self.states.iter().position(|s| *s == state) else {
            log::error!("resource '{}' has no state {:?}", self.name, state);
            panic!(
                "resource '{}' cannot transition to {:?}, declared states: {:?}",
                self.name,
                state.layout,
                self.states.iter().map(|s| s.layout).collect::<Vec<_>>()
            );
        };
        self.transition_to_index(target, cmd)
    }

    /// 录制器被重置时退回跟踪的状态，不产生 barrier
    ///
    /// 已经录制的 barrier 随录制器一起丢弃，跟踪的状态必须和实际的状态一致
    pub fn restore_state_index(&mut self, index: usize) {
        assert!(
            index < self.states.len(),
            "resource '{}' has {} states, cannot restore to {index}",
            self.name,
            self.states.len()
        );
        self.current = index;
    }

    /// 切换到循环中的下一个状态
    pub fn transition_to_next(&mut self, cmd: &mut CommandRecorder) -> GfxResult<bool> {
        let next = (self.current + 1) % self.states.len();
        self.transition_to_index(next, cmd)
    }
}

/// 各种资源对外的公共接口
pub trait GfxResource {
    fn gpu_resource(&self) -> &GpuResource;
    fn gpu_resource_mut(&mut self) -> &mut GpuResource;
    fn kind(&self) -> GfxResourceKind;

    /// 资源的主要 view，index buffer 没有 view
    fn view(&self) -> Option<&DescriptorSlot>;

    #[inline]
    fn memory(&self) -> GfxMemorySource {
        self.gpu_resource().memory()
    }

    #[inline]
    fn state(&self) -> GfxResourceState {
        self.gpu_resource().state()
    }

    fn transition_to(&mut self, state: GfxResourceState, cmd: &mut CommandRecorder) -> GfxResult<bool> {
        self.gpu_resource_mut().transition_to(state, cmd)
    }

    fn transition_to_next(&mut self, cmd: &mut CommandRecorder) -> GfxResult<bool> {
        self.gpu_resource_mut().transition_to_next(cmd)
    }
}
