//! 后处理 pass 的声明
//!
//! 每个后处理组件在每一帧根据 owner buffer 的当前尺寸重新生成自己的 pass 列表，
//! 执行器严格按照生成顺序执行，不做任何重排。pass 之间的依赖完全由生成顺序
//! 和共享的中间目标表达。

use ash::vk;
use tessera_gfx::commands::command_recorder::CommandRecorder;
use tessera_gfx::descriptors::descriptor_table::{CpuDescriptorHandle, GpuDescriptorHandle};
use tessera_gfx::descriptors::sampler::DefaultSampler;
use tessera_gfx::error::GfxResult;
use tessera_gfx::resources::handles::GfxResourceHandle;
use tessera_gfx::resources::manager::GfxResourceManager;
use tessera_gfx::resources::resource_state::GfxResourceState;

use crate::gfx_context::GfxContext;
use crate::screen_buffer::ScreenBufferHandle;

/// 按名字绑定 shader 变量
pub trait ShaderVariableBinder {
    /// 绑定一个 descriptor；NULL handle 或未知的名字返回 `false`
    fn bind_descriptor(&mut self, name: &str, handle: GpuDescriptorHandle) -> bool;

    fn bind_sampler(&mut self, name: &str, sampler: DefaultSampler) -> bool;

    /// 当前 pipeline 是否有这个变量
    fn contains(&self, name: &str) -> bool;
}

/// pass 录制时可用的上下文
pub struct PassRecordContext<'a> {
    pub cmd: &'a mut CommandRecorder,
    pub resources: &'a mut GfxResourceManager,
}
impl PassRecordContext<'_> {
    /// 把 render target 切换到写入状态并设为当前目标
    ///
    /// 中间目标由当前录制器临时持有，因此每次都重新 attach
    pub fn begin_render_target(&mut self, handle: GfxResourceHandle, clear: bool) -> bool {
        if let Err(err) = self.resources.attach_and_transition(handle, GfxResourceState::COLOR_ATTACHMENT_WRITE, self.cmd)
        {
            log::warn!("post effect target begin failed: {err}");
            return false;
        }
        let Some(rt) = self.resources.render_target(handle) else {
            return false;
        };

        self.cmd.set_render_targets(&[rt.rtv_handle()], None);
        if clear {
            rt.clear(self.cmd);
        }
        self.cmd.set_viewport_and_scissor(rt.extent());
        true
    }

    /// 写入结束，切换到被采样状态
    pub fn end_render_target(&mut self, handle: GfxResourceHandle) -> bool {
        match self.resources.transition(handle, GfxResourceState::SHADER_READ_FRAGMENT, self.cmd) {
            Ok(_) => true,
            Err(err) => {
                log::warn!("post effect target end failed: {err}");
                false
            }
        }
    }

    /// 重新绑定 owner buffer 的写入目标
    pub fn bind_pass_target(&mut self, target: &PassTarget) {
        self.cmd.set_render_targets(&[target.color], target.depth);
        self.cmd.set_viewport_and_scissor(target.extent);
    }
}

/// owner buffer 当前帧的写入目标
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassTarget {
    pub color: CpuDescriptorHandle,
    pub depth: Option<CpuDescriptorHandle>,
    pub extent: vk::Extent2D,
}

/// pass 最终的绘制命令
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderCommand {
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
impl RenderCommand {
    /// 全屏三角形之类的无实例绘制
    #[inline]
    pub fn draw(vertex_count: u32) -> Self {
        Self::Draw {
            vertex_count,
            instance_count: 1,
            first_vertex: 0,
        }
    }

    #[inline]
    pub fn draw_indexed(index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32) -> Self {
        Self::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
        }
    }
}

/// 常量缓冲的需求：名字和字节大小
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstantBufferRequirement {
    pub name: String,
    pub size: usize,
}

pub type UpdateConstantBuffersFn = Box<dyn Fn(&mut [Vec<u8>]) -> bool>;
pub type BindResourcesFn = Box<dyn Fn(&mut dyn ShaderVariableBinder) -> bool>;
pub type RecordFn = Box<dyn Fn(&mut PassRecordContext) -> bool>;
pub type RenderCommandFn = Box<dyn Fn() -> Option<RenderCommand>>;

/// 一个后处理 pass
///
/// 所有函数都是可选的；返回 `false` 表示这一帧跳过该 pass
pub struct PostEffectPass {
    pub pipeline_name: String,
    pub pass_name: String,
    pub batch_key: u64,
    pub constant_buffer_requirements: Vec<ConstantBufferRequirement>,
    pub update_constant_buffers: Option<UpdateConstantBuffersFn>,
    pub bind_resources: Option<BindResourcesFn>,
    pub begin_record: Option<RecordFn>,
    pub end_record: Option<RecordFn>,
    pub render_command: Option<RenderCommandFn>,
}
// new & init
impl PostEffectPass {
    pub fn new(pipeline_name: impl Into<String>, pass_name: impl Into<String>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            pass_name: pass_name.into(),
            batch_key: 0,
            constant_buffer_requirements: Vec::new(),
            update_constant_buffers: None,
            bind_resources: None,
            begin_record: None,
            end_record: None,
            render_command: None,
        }
    }

    pub fn with_batch_key(mut self, batch_key: u64) -> Self {
        self.batch_key = batch_key;
        self
    }

    pub fn with_constant_buffer(mut self, name: impl Into<String>, size: usize) -> Self {
        self.constant_buffer_requirements.push(ConstantBufferRequirement {
            name: name.into(),
            size,
        });
        self
    }

    pub fn with_update_constant_buffers(mut self, f: impl Fn(&mut [Vec<u8>]) -> bool + 'static) -> Self {
        self.update_constant_buffers = Some(Box::new(f));
        self
    }

    pub fn with_bind_resources(mut self, f: impl Fn(&mut dyn ShaderVariableBinder) -> bool + 'static) -> Self {
        self.bind_resources = Some(Box::new(f));
        self
    }

    pub fn with_begin_record(mut self, f: impl Fn(&mut PassRecordContext) -> bool + 'static) -> Self {
        self.begin_record = Some(Box::new(f));
        self
    }

    pub fn with_end_record(mut self, f: impl Fn(&mut PassRecordContext) -> bool + 'static) -> Self {
        self.end_record = Some(Box::new(f));
        self
    }

    pub fn with_render_command(mut self, f: impl Fn() -> Option<RenderCommand> + 'static) -> Self {
        self.render_command = Some(Box::new(f));
        self
    }

    /// 渲染到一个中间目标：开始时切换为写入并清屏，结束时切换为被采样
    pub fn with_render_target(self, target: GfxResourceHandle) -> Self {
        self.with_begin_record(move |ctx| ctx.begin_render_target(target, true))
            .with_end_record(move |ctx| ctx.end_render_target(target))
    }
}
impl std::fmt::Debug for PostEffectPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostEffectPass")
            .field("pipeline_name", &self.pipeline_name)
            .field("pass_name", &self.pass_name)
            .field("batch_key", &self.batch_key)
            .field("constant_buffer_requirements", &self.constant_buffer_requirements)
            .finish_non_exhaustive()
    }
}

/// 把一个 `Pod` 值写入常量缓冲；大小不足时返回 `false`
pub fn write_constants<T: bytemuck::Pod>(buffer: &mut [u8], value: &T) -> bool {
    let bytes = bytemuck::bytes_of(value);
    let Some(dst) = buffer.get_mut(..bytes.len()) else {
        log::warn!("constant buffer too small: {} < {}", buffer.len(), bytes.len());
        return false;
    };
    dst.copy_from_slice(bytes);
    true
}

/// 组件看到的 owner buffer 快照
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PostEffectOwner {
    pub handle: ScreenBufferHandle,
    pub width: u32,
    pub height: u32,
    pub color_format: vk::Format,
    /// 读面的颜色 SRV
    pub shader_resource: GpuDescriptorHandle,
    /// 读面的深度 SRV
    pub depth_shader_resource: GpuDescriptorHandle,
}
impl PostEffectOwner {
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

/// 挂在 ScreenBuffer 上的后处理组件
pub trait PostEffectComponent {
    /// 组件种类，用于限制每个 buffer 上的实例数量
    fn component_type(&self) -> &str;

    fn max_count_per_buffer(&self) -> usize {
        0xFF
    }

    /// 越小越先执行，相同时保持注册顺序
    fn apply_priority(&self) -> i32 {
        0
    }

    fn initialize(&mut self, _owner: &PostEffectOwner, _ctx: &mut GfxContext) {}

    /// 释放组件持有的 GPU 资源
    fn finalize(&mut self, _ctx: &mut GfxContext) {}

    /// 根据 owner 的当前状态生成这一帧的 pass 列表
    fn build_passes(&mut self, owner: &PostEffectOwner, ctx: &mut GfxContext) -> GfxResult<Vec<PostEffectPass>>;

    /// 复制参数，不复制 GPU 资源
    fn clone_component(&self) -> Box<dyn PostEffectComponent>;
}
