//! 命令录制
//!
//! `CommandRecorder` 只负责把命令按顺序记录下来，关闭后得到 `RecordedBatch`，
//! 由外部的 Renderer 回放到真正的 command buffer 并提交。

use ash::vk;

use crate::commands::barrier::GfxResourceBarrier;
use crate::descriptors::descriptor_table::{CpuDescriptorHandle, GpuDescriptorHandle};
use crate::error::{GfxError, GfxResult};

/// 录制器的 id
///
/// 录制器池中的 id 从 0 开始连续分配，`IMMEDIATE` 保留给一次性命令
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandRecorderId(pub u32);
impl CommandRecorderId {
    pub const IMMEDIATE: Self = Self(u32::MAX);
}

/// 一条被录制的命令
#[derive(Clone, Debug, PartialEq)]
pub enum GfxCommand {
    Barrier(GfxResourceBarrier),
    SetRenderTargets {
        colors: Vec<CpuDescriptorHandle>,
        depth: Option<CpuDescriptorHandle>,
    },
    ClearColor {
        target: CpuDescriptorHandle,
        color: [f32; 4],
    },
    ClearDepthStencil {
        target: CpuDescriptorHandle,
        depth: f32,
        stencil: u32,
    },
    SetViewport(GfxViewport),
    SetScissor(GfxScissor),
    SetPipeline {
        name: String,
    },
    SetConstants {
        name: String,
        data: Vec<u8>,
    },
    BindDescriptor {
        name: String,
        handle: GpuDescriptorHandle,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
    },
}

/// 覆盖 `[x, x + width) x [y, y + height)` 的 viewport
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GfxViewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}
impl GfxViewport {
    pub fn full(extent: vk::Extent2D) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxScissor {
    pub x: i32,
    pub y: i32,
    pub extent: vk::Extent2D,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Closed,
}

/// 录制完成、等待提交的一批命令
#[derive(Clone, Debug)]
pub struct RecordedBatch {
    pub recorder: CommandRecorderId,
    pub name: String,
    pub commands: Vec<GfxCommand>,
}
impl RecordedBatch {
    pub fn barrier_count(&self) -> usize {
        self.commands.iter().filter(|cmd| matches!(cmd, GfxCommand::Barrier(_))).count()
    }

    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|cmd| matches!(cmd, GfxCommand::Draw { .. } | GfxCommand::DrawIndexed { .. }))
            .count()
    }
}

pub struct CommandRecorder {
    id: CommandRecorderId,
    name: String,
    state: RecorderState,
    commands: Vec<GfxCommand>,
}
// new & init
impl CommandRecorder {
    pub fn new(id: CommandRecorderId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: RecorderState::Idle,
            commands: Vec::new(),
        }
    }
}
// getter
impl CommandRecorder {
    #[inline]
    pub fn id(&self) -> CommandRecorderId {
        self.id
    }
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[inline]
    pub fn state(&self) -> RecorderState {
        self.state
    }
    #[inline]
    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }
    #[inline]
    pub fn commands(&self) -> &[GfxCommand] {
        &self.commands
    }
}
// 生命周期
impl CommandRecorder {
    #[inline]
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// 丢弃之前的命令，开始新的录制
    pub fn begin(&mut self) {
        self.commands.clear();
        self.state = RecorderState::Recording;
    }

    /// 结束录制，取出命令
    pub fn close(&mut self) -> GfxResult<RecordedBatch> {
        if self.state != RecorderState::Recording {
            return Err(GfxError::RecorderNotRecording { recorder: self.id });
        }
        self.state = RecorderState::Closed;
        Ok(RecordedBatch {
            recorder: self.id,
            name: self.name.clone(),
            commands: std::mem::take(&mut self.commands),
        })
    }

    /// 回到空闲状态，用于归还到录制器池
    pub fn reset(&mut self) {
        self.commands.clear();
        self.state = RecorderState::Idle;
    }

    #[inline]
    fn push(&mut self, command: GfxCommand) {
        debug_assert!(self.is_recording(), "recorder '{}' is not recording", self.name);
        self.commands.push(command);
    }
}
// 命令
impl CommandRecorder {
    pub fn resource_barrier(&mut self, barrier: GfxResourceBarrier) {
        log::trace!(
            "[{}] barrier {:?}: {:?} -> {:?}",
            self.name,
            barrier.memory,
            barrier.src_state.layout,
            barrier.dst_state.layout
        );
        self.push(GfxCommand::Barrier(barrier));
    }

    pub fn set_render_targets(&mut self, colors: &[CpuDescriptorHandle], depth: Option<CpuDescriptorHandle>) {
        self.push(GfxCommand::SetRenderTargets {
            colors: colors.to_vec(),
            depth,
        });
    }

    pub fn clear_color(&mut self, target: CpuDescriptorHandle, color: [f32; 4]) {
        self.push(GfxCommand::ClearColor { target, color });
    }

    pub fn clear_depth_stencil(&mut self, target: CpuDescriptorHandle, depth: f32, stencil: u32) {
        self.push(GfxCommand::ClearDepthStencil { target, depth, stencil });
    }

    /// viewport 和 scissor 都覆盖整个 extent
    pub fn set_viewport_and_scissor(&mut self, extent: vk::Extent2D) {
        self.push(GfxCommand::SetViewport(GfxViewport::full(extent)));
        self.push(GfxCommand::SetScissor(GfxScissor { x: 0, y: 0, extent }));
    }

    pub fn set_pipeline(&mut self, name: impl Into<String>) {
        self.push(GfxCommand::SetPipeline { name: name.into() });
    }

    pub fn set_constants(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.push(GfxCommand::SetConstants {
            name: name.into(),
            data,
        });
    }

    pub fn bind_descriptor(&mut self, name: impl Into<String>, handle: GpuDescriptorHandle) {
        self.push(GfxCommand::BindDescriptor {
            name: name.into(),
            handle,
        });
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32) {
        self.push(GfxCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
        });
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32) {
        self.push(GfxCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
        });
    }
}
