//! 双缓冲的离屏颜色目标
//!
//! 每个 ScreenBuffer 持有两组 (render target, depth stencil, SRV)，每帧先交换读写面再开始录制：
//! 这一帧写入 write 面，其他 pass 采样的是上一帧写完的 read 面。
//! 创建之后两组资源都会立刻切换到可采样状态，所以第一帧的读取也是有效的。

use ash::vk;
use itertools::Itertools;
use tessera_gfx::commands::command_recorder::{CommandRecorder, CommandRecorderId, RecordedBatch};
use tessera_gfx::descriptors::descriptor_table::GpuDescriptorHandle;
use tessera_gfx::error::{GfxError, GfxResult};
use tessera_gfx::resources::depth_stencil::{DepthStencilResource, GfxDepthStencilDesc};
use tessera_gfx::resources::handles::GfxResourceHandle;
use tessera_gfx::resources::manager::GfxResourceManager;
use tessera_gfx::resources::render_target::GfxRenderTargetDesc;
use tessera_gfx::resources::resource_state::GfxResourceState;

use crate::deferred_registry::DeferredDestroyRegistry;
use crate::gfx_context::{GfxContext, GfxParts};
use crate::persistent_pass::{PersistentPassHandle, PersistentPassRegistry, ScreenBufferPass};
use crate::post_effect::{PassTarget, PostEffectComponent, PostEffectOwner, PostEffectPass};

slotmap::new_key_type! {
    pub struct ScreenBufferHandle;
}

/// ping-pong 的面数
pub const SCREEN_BUFFER_COUNT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq)]
struct ScreenBufferDesc {
    extent: vk::Extent2D,
    color_format: vk::Format,
    depth_format: vk::Format,
    clear_color: [f32; 4],
    clear_depth: f32,
    clear_stencil: u32,
}

/// 一个面的三个资源
#[derive(Clone, Copy, Debug)]
struct ScreenBufferSlot {
    render_target: GfxResourceHandle,
    depth_stencil: GfxResourceHandle,
    shader_resource: GfxResourceHandle,

    /// 缓存的 GPU handle，查询时不需要访问资源管理器
    srv: GpuDescriptorHandle,
    depth_srv: GpuDescriptorHandle,
}
impl ScreenBufferSlot {
    /// view 在前，内存的持有者在后
    #[inline]
    fn resources(&self) -> [GfxResourceHandle; 3] {
        [self.shader_resource, self.depth_stencil, self.render_target]
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct RecordState {
    wrote_depth: bool,
    discard: bool,
}

pub struct ScreenBuffer {
    name: String,
    desc: ScreenBufferDesc,
    slots: [ScreenBufferSlot; SCREEN_BUFFER_COUNT],

    color_write_index: usize,
    depth_write_index: usize,
    depth_write_enabled: bool,

    /// begin_record 成功之后才有值
    record: Option<RecordState>,

    post_effects: Vec<Box<dyn PostEffectComponent>>,
    recorder: CommandRecorderId,
    persistent_pass: Option<PersistentPassHandle>,
}
// getter
impl ScreenBuffer {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[inline]
    pub fn width(&self) -> u32 {
        self.desc.extent.width
    }
    #[inline]
    pub fn height(&self) -> u32 {
        self.desc.extent.height
    }
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }
    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.desc.color_format
    }
    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.desc.depth_format
    }
    #[inline]
    pub fn write_index(&self) -> usize {
        self.color_write_index
    }
    #[inline]
    pub fn read_index(&self) -> usize {
        (self.color_write_index + 1) % SCREEN_BUFFER_COUNT
    }
    #[inline]
    pub fn depth_write_index(&self) -> usize {
        self.depth_write_index
    }
    #[inline]
    pub fn depth_read_index(&self) -> usize {
        (self.depth_write_index + 1) % SCREEN_BUFFER_COUNT
    }
    #[inline]
    pub fn is_depth_write_enabled(&self) -> bool {
        self.depth_write_enabled
    }
    #[inline]
    pub fn is_recording(&self) -> bool {
        self.record.is_some()
    }
    #[inline]
    pub fn recorder_id(&self) -> CommandRecorderId {
        self.recorder
    }
    #[inline]
    pub fn persistent_pass(&self) -> Option<PersistentPassHandle> {
        self.persistent_pass
    }
    #[inline]
    pub fn post_effect_count(&self) -> usize {
        self.post_effects.len()
    }

    #[inline]
    pub fn render_target(&self, index: usize) -> GfxResourceHandle {
        self.slots[index].render_target
    }
    #[inline]
    pub fn depth_stencil(&self, index: usize) -> GfxResourceHandle {
        self.slots[index].depth_stencil
    }
    #[inline]
    pub fn shader_resource(&self, index: usize) -> GfxResourceHandle {
        self.slots[index].shader_resource
    }

    /// read 面的颜色 SRV
    #[inline]
    pub fn shader_resource_handle(&self) -> GpuDescriptorHandle {
        self.slots[self.read_index()].srv
    }
    #[inline]
    pub fn shader_resource_handle_at(&self, index: usize) -> GpuDescriptorHandle {
        self.slots.get(index).map_or(GpuDescriptorHandle::NULL, |slot| slot.srv)
    }
    /// read 面的深度 SRV；深度格式不支持采样时为 NULL
    #[inline]
    pub fn depth_shader_resource_handle(&self) -> GpuDescriptorHandle {
        self.slots[self.depth_read_index()].depth_srv
    }

    pub fn post_effect_types(&self) -> Vec<String> {
        self.post_effects.iter().map(|effect| effect.component_type().to_string()).collect_vec()
    }

    fn owner(&self, handle: ScreenBufferHandle) -> PostEffectOwner {
        PostEffectOwner {
            handle,
            width: self.width(),
            height: self.height(),
            color_format: self.color_format(),
            shader_resource: self.shader_resource_handle(),
            depth_shader_resource: self.depth_shader_resource_handle(),
        }
    }
}
// update
impl ScreenBuffer {
    /// 交换读写面，必须在 begin_record 之前调用
    ///
    /// 深度写入被关闭时深度面保持不变
    pub fn advance_frame_buffer_index(&mut self) {
        debug_assert!(self.record.is_none(), "advance while recording '{}'", self.name);
        self.color_write_index = (self.color_write_index + 1) % SCREEN_BUFFER_COUNT;
        if self.depth_write_enabled {
            self.depth_write_index = (self.depth_write_index + 1) % SCREEN_BUFFER_COUNT;
        }
    }

    /// 关闭后只写入颜色，不清除也不切换深度
    #[inline]
    pub fn set_depth_write_enabled(&mut self, enabled: bool) {
        self.depth_write_enabled = enabled;
    }
}
// 录制
impl ScreenBuffer {
    fn record_begin(&self, cmd: &mut CommandRecorder, resources: &mut GfxResourceManager) -> GfxResult<()> {
        let color = self.slots[self.color_write_index].render_target;
        let depth = self.slots[self.depth_write_index].depth_stencil;

        // 切换之前先取出 view，之后的步骤不会再失败
        let rtv = resources.render_target(color).ok_or(GfxError::ResourceNotFound)?.rtv_handle();
        let dsv = if self.depth_write_enabled {
            Some(resources.depth_stencil(depth).ok_or(GfxError::ResourceNotFound)?.dsv_handle())
        } else {
            None
        };

        let mut targets = vec![(color, GfxResourceState::COLOR_ATTACHMENT_WRITE)];
        if dsv.is_some() {
            targets.push((depth, GfxResourceState::DEPTH_ATTACHMENT_WRITE));
        }
        resources.attach_and_transition_all(&targets, cmd)?;

        cmd.set_render_targets(&[rtv], dsv);
        if let Some(rt) = resources.render_target(color) {
            rt.clear(cmd);
        }
        if let Some(ds) = dsv.and_then(|_| resources.depth_stencil(depth)) {
            ds.clear(cmd);
        }
        cmd.set_viewport_and_scissor(self.desc.extent);
        Ok(())
    }

    fn record_end(
        &self,
        cmd: &mut CommandRecorder,
        resources: &mut GfxResourceManager,
        wrote_depth: bool,
    ) -> GfxResult<()> {
        let color = self.slots[self.color_write_index];
        resources.transition(color.render_target, GfxResourceState::SHADER_READ_FRAGMENT, cmd)?;

        // begin 时没有碰深度，这里也不碰
        if wrote_depth {
            let depth = self.slots[self.depth_write_index].depth_stencil;
            let readable = resources.depth_stencil(depth).ok_or(GfxError::ResourceNotFound)?.readable_state();
            resources.transition(depth, readable, cmd)?;
        }
        Ok(())
    }
}

/// 所有 ScreenBuffer 的注册表
///
/// 销毁分两步：`destroy_notify` 只做标记，`commit_destroy` 在帧末真正释放。
/// 被标记但尚未提交的 buffer 仍然可以查询，只是不会再开始新的录制。
#[derive(Default)]
pub struct ScreenBufferManager {
    buffers: DeferredDestroyRegistry<ScreenBufferHandle, ScreenBuffer>,
    next_serial: u64,
}
// new & init
impl ScreenBufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        ctx: &mut GfxContext,
        width: u32,
        height: u32,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> GfxResult<ScreenBufferHandle> {
        if width == 0 || height == 0 {
            return Err(GfxError::InvalidExtent { width, height });
        }
        if !ctx.is_initialized() {
            return Err(GfxError::NotInitialized);
        }

        let settings = ctx.settings().screen_buffer;
        let desc = ScreenBufferDesc {
            extent: vk::Extent2D { width, height },
            color_format,
            depth_format,
            clear_color: settings.clear_color.to_array(),
            clear_depth: settings.clear_depth,
            clear_stencil: settings.clear_stencil,
        };
        let name = format!("ScreenBuffer#{}", self.next_serial);
        self.next_serial += 1;

        let recorder = ctx.acquire_recorder(name.as_str())?;
        let slots = match create_slots(ctx, &name, &desc) {
            Ok(slots) => slots,
            Err(err) => {
                ctx.release_recorder(recorder);
                return Err(err);
            }
        };

        let handle = self.buffers.insert(ScreenBuffer {
            name,
            desc,
            slots,
            color_write_index: 0,
            depth_write_index: 0,
            depth_write_enabled: true,
            record: None,
            post_effects: Vec::new(),
            recorder,
            persistent_pass: None,
        });
        log::info!(
            "create screen buffer {handle:?}: {width}x{height}, {color_format:?}/{depth_format:?}, recorder {recorder:?}"
        );
        Ok(handle)
    }

    /// 使用配置中的默认格式
    pub fn create_default(&mut self, ctx: &mut GfxContext, width: u32, height: u32) -> GfxResult<ScreenBufferHandle> {
        let settings = ctx.settings().screen_buffer;
        self.create(ctx, width, height, settings.color_format, settings.depth_format)
    }
}
// destroy
impl ScreenBufferManager {
    /// 标记为待销毁；重复标记或者 handle 不存在时什么也不做
    pub fn destroy_notify(&mut self, handle: ScreenBufferHandle) {
        if self.buffers.mark_destroy(handle) {
            log::debug!("screen buffer {handle:?} pending destroy");
        }
    }

    /// 帧末调用：释放所有被标记的 buffer
    ///
    /// # 返回
    /// 实际销毁的数量
    pub fn commit_destroy(&mut self, ctx: &mut GfxContext, persistent: &mut PersistentPassRegistry) -> usize {
        let committed = self.buffers.take_committed();
        let count = committed.len();
        for (handle, buffer) in committed {
            teardown(handle, buffer, ctx, persistent, false);
        }
        count
    }

    /// 立刻销毁所有 buffer，用于退出
    pub fn destroy_all(&mut self, ctx: &mut GfxContext, persistent: &mut PersistentPassRegistry) {
        for (handle, buffer) in self.buffers.drain() {
            teardown(handle, buffer, ctx, persistent, true);
        }
    }
}
impl Drop for ScreenBufferManager {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        debug_assert!(self.buffers.is_empty(), "ScreenBufferManager dropped with live buffers");
    }
}
// getter
impl ScreenBufferManager {
    #[inline]
    pub fn get(&self, handle: ScreenBufferHandle) -> Option<&ScreenBuffer> {
        self.buffers.get(handle)
    }
    #[inline]
    pub fn get_mut(&mut self, handle: ScreenBufferHandle) -> Option<&mut ScreenBuffer> {
        self.buffers.get_mut(handle)
    }
    /// 被标记但还没提交的 buffer 仍然存在
    #[inline]
    pub fn is_exist(&self, handle: ScreenBufferHandle) -> bool {
        self.buffers.contains(handle)
    }
    #[inline]
    pub fn is_pending_destroy(&self, handle: ScreenBufferHandle) -> bool {
        self.buffers.is_pending_destroy(handle)
    }
    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
    #[inline]
    pub fn handles(&self) -> Vec<ScreenBufferHandle> {
        self.buffers.iter().map(|(handle, _)| handle).collect_vec()
    }

    /// 不存在时返回 NULL
    #[inline]
    pub fn shader_resource_handle(&self, handle: ScreenBufferHandle) -> GpuDescriptorHandle {
        self.buffers.get(handle).map_or(GpuDescriptorHandle::NULL, ScreenBuffer::shader_resource_handle)
    }

    /// 当前帧的写入目标
    pub fn pass_target(&self, handle: ScreenBufferHandle, resources: &GfxResourceManager) -> Option<PassTarget> {
        let buffer = self.buffers.get(handle)?;
        let color = resources.render_target(buffer.slots[buffer.color_write_index].render_target)?;
        let with_depth = buffer.record.map_or(buffer.depth_write_enabled, |record| record.wrote_depth);
        let depth = if with_depth {
            Some(resources.depth_stencil(buffer.slots[buffer.depth_write_index].depth_stencil)?.dsv_handle())
        } else {
            None
        };

        Some(PassTarget {
            color: color.rtv_handle(),
            depth,
            extent: buffer.extent(),
        })
    }
}
// 录制
impl ScreenBufferManager {
    /// 重置专属录制器，切换写入面并清屏
    ///
    /// 失败时录制器会被重置，调用方应当跳过这个 buffer
    pub fn begin_record(&mut self, handle: ScreenBufferHandle, ctx: &mut GfxContext) -> GfxResult<CommandRecorderId> {
        let pending = self.buffers.is_pending_destroy(handle);
        let buffer = self.buffers.get_mut(handle).ok_or(GfxError::ResourceNotFound)?;
        if pending {
            return Err(GfxError::PendingDestroy {
                resource: buffer.name.clone(),
            });
        }
        if buffer.record.is_some() {
            return Err(GfxError::ResourceBusy {
                resource: buffer.name.clone(),
            });
        }

        let GfxParts {
            device,
            resources,
            recorders,
            ..
        } = ctx.parts_mut()?;
        let cmd = recorders.begin(buffer.recorder, device)?;
        if let Err(err) = buffer.record_begin(cmd, resources) {
            cmd.reset();
            return Err(err);
        }

        buffer.record = Some(RecordState {
            wrote_depth: buffer.depth_write_enabled,
            discard: false,
        });
        Ok(buffer.recorder)
    }

    /// 把写入面切换为可采样状态并结束录制
    ///
    /// `discard` 为 `true` 时状态照常切换，但录制结果不会返回给调用方
    pub fn end_record(
        &mut self,
        handle: ScreenBufferHandle,
        ctx: &mut GfxContext,
        discard: bool,
    ) -> GfxResult<Option<RecordedBatch>> {
        let buffer = self.buffers.get_mut(handle).ok_or(GfxError::ResourceNotFound)?;
        let Some(record) = buffer.record.take() else {
            return Err(GfxError::RecorderNotRecording {
                recorder: buffer.recorder,
            });
        };

        let GfxParts {
            resources, recorders, ..
        } = ctx.parts_mut()?;
        let cmd = recorders.get_mut(buffer.recorder).ok_or(GfxError::RecorderNotRecording {
            recorder: buffer.recorder,
        })?;
        if let Err(err) = buffer.record_end(cmd, resources, record.wrote_depth) {
            cmd.reset();
            return Err(err);
        }
        let batch = cmd.close()?;

        if discard || record.discard {
            log::debug!("discard recording of '{}'", buffer.name);
            return Ok(None);
        }
        Ok(Some(batch))
    }

    /// 对每个存活且未被标记销毁的 buffer：先交换读写面，再开始录制
    ///
    /// # 返回
    /// 成功开始录制的 buffer
    pub fn all_begin_record(&mut self, ctx: &mut GfxContext) -> Vec<ScreenBufferHandle> {
        let mut started = Vec::new();
        for handle in self.buffers.live_keys() {
            let Some(buffer) = self.buffers.get_mut(handle) else {
                continue;
            };
            if buffer.is_recording() {
                log::warn!("screen buffer '{}' is already recording", buffer.name);
                continue;
            }
            buffer.advance_frame_buffer_index();

            match self.begin_record(handle, ctx) {
                Ok(_) => started.push(handle),
                Err(err) => log::warn!("skip screen buffer {handle:?} this frame: {err}"),
            }
        }
        started
    }

    /// 下一次 `all_end_record` 丢弃这个 buffer 的录制结果
    pub fn mark_discard(&mut self, handle: ScreenBufferHandle) -> bool {
        match self.buffers.get_mut(handle).and_then(|buffer| buffer.record.as_mut()) {
            Some(record) => {
                record.discard = true;
                true
            }
            None => false,
        }
    }

    /// 结束所有正在录制的 buffer，返回需要提交的录制结果
    pub fn all_end_record(&mut self, ctx: &mut GfxContext) -> Vec<RecordedBatch> {
        let recording = self
            .buffers
            .iter()
            .filter(|(_, buffer)| buffer.is_recording())
            .map(|(handle, _)| handle)
            .collect_vec();

        let mut batches = Vec::with_capacity(recording.len());
        for handle in recording {
            match self.end_record(handle, ctx, false) {
                Ok(Some(batch)) => batches.push(batch),
                Ok(None) => {}
                Err(err) => log::warn!("end record of screen buffer {handle:?} failed: {err}"),
            }
        }
        batches
    }
}
// 尺寸
impl ScreenBufferManager {
    /// 重新创建六个资源，后处理组件和常驻 pass 保持不变
    ///
    /// 读写面的索引回到初始值，新资源同样会预先切换到可采样状态
    pub fn resize(&mut self, handle: ScreenBufferHandle, ctx: &mut GfxContext, width: u32, height: u32) -> GfxResult<()> {
        if width == 0 || height == 0 {
            return Err(GfxError::InvalidExtent { width, height });
        }
        let buffer = self.buffers.get(handle).ok_or(GfxError::ResourceNotFound)?;
        if buffer.is_recording() {
            return Err(GfxError::ResourceBusy {
                resource: buffer.name.clone(),
            });
        }
        if buffer.width() == width && buffer.height() == height {
            return Ok(());
        }

        let mut desc = buffer.desc;
        desc.extent = vk::Extent2D { width, height };
        let name = buffer.name.clone();
        let slots = create_slots(ctx, &name, &desc)?;

        let buffer = self.buffers.get_mut(handle).ok_or(GfxError::ResourceNotFound)?;
        let old_slots = std::mem::replace(&mut buffer.slots, slots);
        buffer.desc = desc;
        buffer.color_write_index = 0;
        buffer.depth_write_index = 0;
        for resource in old_slots.iter().flat_map(ScreenBufferSlot::resources) {
            ctx.destroy_resource_deferred(resource);
        }

        log::info!("resize screen buffer '{name}' to {width}x{height}");
        Ok(())
    }
}
// 后处理
impl ScreenBufferManager {
    /// 注册后处理组件
    ///
    /// 同种组件超过其允许的数量时拒绝注册；组件按 apply_priority 稳定排序
    pub fn register_post_effect(
        &mut self,
        handle: ScreenBufferHandle,
        mut component: Box<dyn PostEffectComponent>,
        ctx: &mut GfxContext,
    ) -> bool {
        let Some(buffer) = self.buffers.get_mut(handle) else {
            return false;
        };

        let component_type = component.component_type().to_string();
        let existing = buffer
            .post_effects
            .iter()
            .filter(|effect| effect.component_type() == component_type)
            .count();
        if existing >= component.max_count_per_buffer() {
            log::warn!(
                "screen buffer '{}' already has {existing} '{component_type}' effects",
                buffer.name
            );
            return false;
        }

        let owner = buffer.owner(handle);
        component.initialize(&owner, ctx);
        buffer.post_effects.push(component);
        buffer.post_effects.sort_by_key(|effect| effect.apply_priority());
        true
    }

    /// 移除某种组件
    ///
    /// # 返回
    /// 被移除的数量
    pub fn remove_post_effects(&mut self, handle: ScreenBufferHandle, component_type: &str, ctx: &mut GfxContext) -> usize {
        let Some(buffer) = self.buffers.get_mut(handle) else {
            return 0;
        };

        let (mut removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut buffer.post_effects)
            .into_iter()
            .partition(|effect| effect.component_type() == component_type);
        buffer.post_effects = kept;
        for effect in removed.iter_mut() {
            effect.finalize(ctx);
        }
        removed.len()
    }

    pub fn post_effect_types(&self, handle: ScreenBufferHandle) -> Vec<String> {
        self.buffers.get(handle).map(ScreenBuffer::post_effect_types).unwrap_or_default()
    }

    #[inline]
    pub fn has_post_effects(&self, handle: ScreenBufferHandle) -> bool {
        self.buffers.get(handle).is_some_and(|buffer| !buffer.post_effects.is_empty())
    }

    /// 按优先级依次收集每个组件这一帧的 pass
    ///
    /// 某个组件生成失败时只跳过该组件
    pub fn build_post_effect_passes(&mut self, handle: ScreenBufferHandle, ctx: &mut GfxContext) -> Vec<PostEffectPass> {
        let Some(buffer) = self.buffers.get_mut(handle) else {
            return Vec::new();
        };

        let owner = buffer.owner(handle);
        let mut passes = Vec::new();
        for effect in buffer.post_effects.iter_mut() {
            match effect.build_passes(&owner, ctx) {
                Ok(effect_passes) => passes.extend(effect_passes),
                Err(err) => log::warn!(
                    "post effect '{}' of '{}' skipped: {err}",
                    effect.component_type(),
                    buffer.name
                ),
            }
        }
        passes
    }
}
// 常驻 pass
impl ScreenBufferManager {
    /// 注册为常驻 pass；已经注册过时替换原来的
    pub fn attach_to_renderer(
        &mut self,
        handle: ScreenBufferHandle,
        registry: &mut PersistentPassRegistry,
        pipeline_name: &str,
        pass_name: &str,
    ) -> bool {
        let Some(buffer) = self.buffers.get_mut(handle) else {
            return false;
        };

        if let Some(previous) = buffer.persistent_pass.take() {
            registry.unregister(previous);
        }
        buffer.persistent_pass = Some(registry.register(ScreenBufferPass {
            screen_buffer: handle,
            pipeline_name: pipeline_name.to_string(),
            pass_name: pass_name.to_string(),
            batch_key: 0,
        }));
        true
    }

    /// 可以重复调用
    pub fn detach_from_renderer(&mut self, handle: ScreenBufferHandle, registry: &mut PersistentPassRegistry) {
        if let Some(pass) = self.buffers.get_mut(handle).and_then(|buffer| buffer.persistent_pass.take()) {
            registry.unregister(pass);
        }
    }
}

fn create_slots(
    ctx: &mut GfxContext,
    name: &str,
    desc: &ScreenBufferDesc,
) -> GfxResult<[ScreenBufferSlot; SCREEN_BUFFER_COUNT]> {
    let mut created = Vec::new();
    let result = try_create_slots(ctx, name, desc, &mut created);
    if result.is_err() {
        for resource in created.into_iter().rev() {
            ctx.destroy_resource_immediate(resource);
        }
    }
    result
}

fn try_create_slots(
    ctx: &mut GfxContext,
    name: &str,
    desc: &ScreenBufferDesc,
    created: &mut Vec<GfxResourceHandle>,
) -> GfxResult<[ScreenBufferSlot; SCREEN_BUFFER_COUNT]> {
    let slots = [
        create_slot(ctx, name, desc, 0, created)?,
        create_slot(ctx, name, desc, 1, created)?,
    ];

    ctx.one_time_exec(&format!("{name}.InitialTransition"), |cmd, resources| {
        for slot in &slots {
            resources.attach_and_transition(slot.render_target, GfxResourceState::SHADER_READ_FRAGMENT, cmd)?;
            let readable = resources
                .depth_stencil(slot.depth_stencil)
                .ok_or(GfxError::ResourceNotFound)?
                .readable_state();
            resources.attach_and_transition(slot.depth_stencil, readable, cmd)?;
        }
        Ok(())
    })?;

    Ok(slots)
}

fn create_slot(
    ctx: &mut GfxContext,
    name: &str,
    desc: &ScreenBufferDesc,
    index: usize,
    created: &mut Vec<GfxResourceHandle>,
) -> GfxResult<ScreenBufferSlot> {
    let render_target = ctx.create_render_target(
        &GfxRenderTargetDesc {
            extent: desc.extent,
            format: desc.color_format,
            clear_color: desc.clear_color,
        },
        &format!("{name}.Color[{index}]"),
    )?;
    created.push(render_target);

    let depth_stencil = ctx.create_depth_stencil(
        &GfxDepthStencilDesc {
            extent: desc.extent,
            format: desc.depth_format,
            clear_depth: desc.clear_depth,
            clear_stencil: desc.clear_stencil,
            shader_view_format: DepthStencilResource::shader_view_format_for(desc.depth_format),
        },
        &format!("{name}.Depth[{index}]"),
    )?;
    created.push(depth_stencil);

    let shader_resource = ctx.create_shader_resource_view(render_target, &format!("{name}.ColorSrv[{index}]"))?;
    created.push(shader_resource);

    let resources = ctx.resources();
    Ok(ScreenBufferSlot {
        render_target,
        depth_stencil,
        shader_resource,
        srv: resources
            .shader_resource(shader_resource)
            .map_or(GpuDescriptorHandle::NULL, |srv| srv.srv_handle()),
        depth_srv: resources
            .depth_stencil(depth_stencil)
            .map_or(GpuDescriptorHandle::NULL, |ds| ds.srv_handle()),
    })
}

fn teardown(
    handle: ScreenBufferHandle,
    mut buffer: ScreenBuffer,
    ctx: &mut GfxContext,
    persistent: &mut PersistentPassRegistry,
    immediate: bool,
) {
    if buffer.is_recording() {
        log::warn!("screen buffer '{}' destroyed while recording", buffer.name);
    }
    if let Some(pass) = buffer.persistent_pass.take() {
        persistent.unregister(pass);
    }
    for effect in buffer.post_effects.iter_mut() {
        effect.finalize(ctx);
    }

    for resource in buffer.slots.iter().flat_map(ScreenBufferSlot::resources) {
        if immediate {
            ctx.destroy_resource_immediate(resource);
        } else {
            ctx.destroy_resource_deferred(resource);
        }
    }
    ctx.release_recorder(buffer.recorder);
    log::info!("destroy screen buffer {handle:?} '{}'", buffer.name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_crate_tools::init_log::init_test_log;
    use tessera_gfx::commands::command_recorder::GfxCommand;
    use tessera_gfx::foundation::headless_device::HeadlessDevice;

    use crate::settings::GfxSettings;

    fn context_with(device: HeadlessDevice, settings: GfxSettings) -> GfxContext {
        init_test_log();
        let mut ctx = GfxContext::new(settings);
        ctx.init(Box::new(device));
        ctx
    }

    fn context() -> GfxContext {
        context_with(HeadlessDevice::new(), GfxSettings::default())
    }

    fn shutdown(mut manager: ScreenBufferManager, mut ctx: GfxContext, mut persistent: PersistentPassRegistry) {
        manager.destroy_all(&mut ctx, &mut persistent);
        assert!(persistent.is_empty());
        ctx.destroy();
    }

    fn create(manager: &mut ScreenBufferManager, ctx: &mut GfxContext, width: u32, height: u32) -> ScreenBufferHandle {
        manager
            .create(ctx, width, height, vk::Format::B8G8R8A8_UNORM, vk::Format::D24_UNORM_S8_UINT)
            .unwrap()
    }

    #[derive(Clone)]
    struct TaggedEffect {
        tag: &'static str,
        priority: i32,
        max: usize,
    }
    impl PostEffectComponent for TaggedEffect {
        fn component_type(&self) -> &str {
            self.tag
        }
        fn max_count_per_buffer(&self) -> usize {
            self.max
        }
        fn apply_priority(&self) -> i32 {
            self.priority
        }
        fn build_passes(&mut self, _owner: &PostEffectOwner, _ctx: &mut GfxContext) -> GfxResult<Vec<PostEffectPass>> {
            Ok(vec![PostEffectPass::new("Tagged", self.tag)])
        }
        fn clone_component(&self) -> Box<dyn PostEffectComponent> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn test_create_pre_transitions_both_slots() {
        let mut ctx = context();
        let mut manager = ScreenBufferManager::new();
        let handle = create(&mut manager, &mut ctx, 64, 32);

        let buffer = manager.get(handle).unwrap();
        for i in 0..SCREEN_BUFFER_COUNT {
            assert!(!buffer.shader_resource_handle_at(i).is_null());
            let rt = ctx.resources().get(buffer.render_target(i)).unwrap();
            assert_eq!(rt.state(), GfxResourceState::SHADER_READ_FRAGMENT);
            let ds = ctx.resources().get(buffer.depth_stencil(i)).unwrap();
            assert_eq!(ds.state(), GfxResourceState::SHADER_READ_DEPTH);
        }
        assert!(!buffer.depth_shader_resource_handle().is_null());
        assert_ne!(buffer.shader_resource_handle_at(0), buffer.shader_resource_handle_at(1));

        let pending = ctx.take_pending_submissions();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].barrier_count(), 4);

        shutdown(manager, ctx, PersistentPassRegistry::new());
    }

    #[test]
    fn test_create_failures() {
        init_test_log();
        let mut manager = ScreenBufferManager::new();

        let mut uninitialized = GfxContext::new(GfxSettings::default());
        assert!(matches!(
            manager.create_default(&mut uninitialized, 16, 16),
            Err(GfxError::NotInitialized)
        ));
        uninitialized.destroy();

        let mut ctx = context();
        assert!(matches!(
            manager.create_default(&mut ctx, 0, 16),
            Err(GfxError::InvalidExtent { width: 0, height: 16 })
        ));
        assert_eq!(manager.buffer_count(), 0);
        assert_eq!(ctx.recorders().in_use_count(), 0);

        shutdown(manager, ctx, PersistentPassRegistry::new());
    }

    #[test]
    fn test_recorder_pool_exhaustion() {
        let settings = GfxSettings {
            max_command_recorders: 1,
            ..Default::default()
        };
        let mut ctx = context_with(HeadlessDevice::new(), settings);
        let mut manager = ScreenBufferManager::new();

        create(&mut manager, &mut ctx, 8, 8);
        let live = ctx.resources().len();
        assert!(matches!(
            manager.create_default(&mut ctx, 8, 8),
            Err(GfxError::RecorderPoolExhausted { capacity: 1 })
        ));
        assert_eq!(ctx.resources().len(), live);

        shutdown(manager, ctx, PersistentPassRegistry::new());
    }

    #[test]
    fn test_allocation_failure_releases_partial_resources() {
        let mut device = HeadlessDevice::new();
        device.fail_next_allocation("ScreenBuffer#0.Depth[1]");
        let mut ctx = context_with(device, GfxSettings::default());
        let mut manager = ScreenBufferManager::new();

        assert!(matches!(
            manager.create_default(&mut ctx, 8, 8),
            Err(GfxError::AllocationFailed { .. })
        ));
        assert!(ctx.resources().is_empty());
        assert_eq!(ctx.recorders().in_use_count(), 0);
        // 只剩默认 sampler
        assert_eq!(ctx.descriptors().unwrap().live_total(), 4);

        shutdown(manager, ctx, PersistentPassRegistry::new());
    }

    #[test]
    fn test_advance_swaps_read_and_write() {
        let mut ctx = context();
        let mut manager = ScreenBufferManager::new();
        let handle = create(&mut manager, &mut ctx, 8, 8);

        let buffer = manager.get_mut(handle).unwrap();
        for _ in 0..4 {
            let write_before = buffer.write_index();
            buffer.advance_frame_buffer_index();
            assert_eq!(buffer.read_index(), write_before);
            assert_ne!(buffer.write_index(), buffer.read_index());
        }

        shutdown(manager, ctx, PersistentPassRegistry::new());
    }

    #[test]
    fn test_record_round_trip_keeps_size() {
        let mut ctx = context();
        let mut manager = ScreenBufferManager::new();
        let handle = create(&mut manager, &mut ctx, 256, 256);

        let recorder = manager.begin_record(handle, &mut ctx).unwrap();
        assert_eq!(recorder, manager.get(handle).unwrap().recorder_id());
        assert!(ctx.recorder(recorder).unwrap().is_recording());
        let target = manager.pass_target(handle, ctx.resources()).unwrap();
        assert!(target.depth.is_some());
        assert_eq!(target.extent, vk::Extent2D { width: 256, height: 256 });

        let batch = manager.end_record(handle, &mut ctx, false).unwrap().unwrap();
        assert_eq!(batch.recorder, recorder);
        assert_eq!(batch.barrier_count(), 4);
        assert!(batch.commands.iter().any(|c| matches!(c, GfxCommand::ClearDepthStencil { .. })));

        let buffer = manager.get(handle).unwrap();
        assert_eq!((buffer.width(), buffer.height()), (256, 256));
        let rt = ctx.resources().get(buffer.render_target(buffer.write_index())).unwrap();
        assert_eq!(rt.state(), GfxResourceState::SHADER_READ_FRAGMENT);

        assert!(matches!(
            manager.end_record(handle, &mut ctx, false),
            Err(GfxError::RecorderNotRecording { .. })
        ));

        shutdown(manager, ctx, PersistentPassRegistry::new());
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let mut ctx = context();
        let mut manager = ScreenBufferManager::new();
        let handle = create(&mut manager, &mut ctx, 8, 8);

        manager.begin_record(handle, &mut ctx).unwrap();
        assert!(matches!(
            manager.begin_record(handle, &mut ctx),
            Err(GfxError::ResourceBusy { .. })
        ));
        assert!(manager.end_record(handle, &mut ctx, false).unwrap().is_some());

        shutdown(manager, ctx, PersistentPassRegistry::new());
    }

    #[test]
    fn test_failed_begin_keeps_tracked_states() {
        let mut ctx = context();
        let mut manager = ScreenBufferManager::new();
        let handle = create(&mut manager, &mut ctx, 8, 8);

        let buffer = manager.get(handle).unwrap();
        let color = buffer.render_target(buffer.write_index());
        let depth = buffer.depth_stencil(buffer.depth_write_index());
        ctx.destroy_resource_immediate(depth);

        assert!(matches!(
            manager.begin_record(handle, &mut ctx),
            Err(GfxError::ResourceNotFound)
        ));
        assert!(!manager.get(handle).unwrap().is_recording());
        assert_eq!(ctx.resources().get(color).unwrap().state(), GfxResourceState::SHADER_READ_FRAGMENT);

        // 录制器被重置过，颜色目标的 barrier 必须重新录制
        manager.get_mut(handle).unwrap().set_depth_write_enabled(false);
        manager.begin_record(handle, &mut ctx).unwrap();
        let batch = manager.end_record(handle, &mut ctx, false).unwrap().unwrap();
        assert_eq!(batch.barrier_count(), 2);

        shutdown(manager, ctx, PersistentPassRegistry::new());
    }

    #[test]
    fn test_depth_write_disabled_keeps_depth_slot() {
        let mut ctx = context();
        let mut manager = ScreenBufferManager::new();
        let handle = create(&mut manager, &mut ctx, 8, 8);

        let buffer = manager.get_mut(handle).unwrap();
        buffer.set_depth_write_enabled(false);
        let depth_before = buffer.depth_write_index();
        buffer.advance_frame_buffer_index();
        assert_eq!(buffer.depth_write_index(), depth_before);

        manager.begin_record(handle, &mut ctx).unwrap();
        assert_eq!(manager.pass_target(handle, ctx.resources()).unwrap().depth, None);
        let batch = manager.end_record(handle, &mut ctx, false).unwrap().unwrap();
        assert_eq!(batch.barrier_count(), 2);
        assert!(!batch.commands.iter().any(|c| matches!(c, GfxCommand::ClearDepthStencil { .. })));

        shutdown(manager, ctx, PersistentPassRegistry::new());
    }

    #[test]
    fn test_frame_driver_skips_failed_and_pending_buffers() {
        let mut device = HeadlessDevice::new();
        // 第一个 buffer 拿到 0 号录制器
        device.fail_next_reset(CommandRecorderId(0));
        let mut ctx = context_with(device, GfxSettings::default());
        let mut manager = ScreenBufferManager::new();

        let failing = create(&mut manager, &mut ctx, 8, 8);
        let healthy = create(&mut manager, &mut ctx, 8, 8);
        let pending = create(&mut manager, &mut ctx, 8, 8);
        manager.destroy_notify(pending);

        let started = manager.all_begin_record(&mut ctx);
        assert_eq!(started, vec![healthy]);
        assert!(!manager.get(failing).unwrap().is_recording());
        assert!(manager.is_exist(pending));

        let batches = manager.all_end_record(&mut ctx);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].recorder, manager.get(healthy).unwrap().recorder_id());

        // 故障只注入一次，下一帧恢复
        assert_eq!(manager.all_begin_record(&mut ctx).len(), 2);
        assert_eq!(manager.all_end_record(&mut ctx).len(), 2);

        shutdown(manager, ctx, PersistentPassRegistry::new());
    }

    #[test]
    fn test_discarded_recording_is_not_returned() {
        let mut ctx = context();
        let mut manager = ScreenBufferManager::new();
        let kept = create(&mut manager, &mut ctx, 8, 8);
        let discarded = create(&mut manager, &mut ctx, 8, 8);

        manager.all_begin_record(&mut ctx);
        assert!(manager.mark_discard(discarded));
        let batches = manager.all_end_record(&mut ctx);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].recorder, manager.get(kept).unwrap().recorder_id());

        // 丢弃的 buffer 状态照常切换
        let buffer = manager.get(discarded).unwrap();
        let rt = ctx.resources().get(buffer.render_target(buffer.write_index())).unwrap();
        assert_eq!(rt.state(), GfxResourceState::SHADER_READ_FRAGMENT);
        assert!(!manager.mark_discard(discarded));

        shutdown(manager, ctx, PersistentPassRegistry::new());
    }

    #[test]
    fn test_destroy_is_deferred_until_commit() {
        let mut ctx = context();
        let mut manager = ScreenBufferManager::new();
        let mut persistent = PersistentPassRegistry::new();
        let handle = create(&mut manager, &mut ctx, 8, 8);
        let other = create(&mut manager, &mut ctx, 8, 8);
        assert!(manager.attach_to_renderer(handle, &mut persistent, "Screen.Copy", "Main"));

        manager.destroy_notify(handle);
        manager.destroy_notify(handle);
        assert!(manager.is_exist(handle));
        assert!(manager.is_pending_destroy(handle));
        assert!(!manager.shader_resource_handle(handle).is_null());
        assert!(matches!(
            manager.begin_record(handle, &mut ctx),
            Err(GfxError::PendingDestroy { .. })
        ));

        let rt = manager.get(handle).unwrap().render_target(0);
        assert_eq!(manager.commit_destroy(&mut ctx, &mut persistent), 1);
        assert!(!manager.is_exist(handle));
        assert!(manager.is_exist(other));
        assert_eq!(manager.buffer_count(), 1);
        assert!(persistent.is_empty());
        assert_eq!(ctx.recorders().in_use_count(), 1);
        assert!(manager.shader_resource_handle(handle).is_null());
        assert_eq!(manager.commit_destroy(&mut ctx, &mut persistent), 0);

        // GPU 资源等待若干帧之后才释放
        assert!(ctx.resources().contains(rt));
        for _ in 0..ctx.settings().resource_destroy_delay_frames {
            ctx.end_frame();
        }
        assert!(!ctx.resources().contains(rt));

        shutdown(manager, ctx, persistent);
    }

    #[test]
    fn test_attach_replaces_and_detach_is_idempotent() {
        let mut ctx = context();
        let mut manager = ScreenBufferManager::new();
        let mut persistent = PersistentPassRegistry::new();
        let handle = create(&mut manager, &mut ctx, 8, 8);

        manager.attach_to_renderer(handle, &mut persistent, "Screen.Copy", "First");
        manager.attach_to_renderer(handle, &mut persistent, "Screen.Copy", "Second");
        assert_eq!(persistent.len(), 1);
        let pass = persistent.get(manager.get(handle).unwrap().persistent_pass().unwrap()).unwrap();
        assert_eq!(pass.pass_name, "Second");
        assert_eq!(pass.screen_buffer, handle);

        manager.detach_from_renderer(handle, &mut persistent);
        manager.detach_from_renderer(handle, &mut persistent);
        assert!(persistent.is_empty());

        shutdown(manager, ctx, persistent);
    }

    #[test]
    fn test_post_effect_limit_and_priority() {
        let mut ctx = context();
        let mut manager = ScreenBufferManager::new();
        let handle = create(&mut manager, &mut ctx, 8, 8);
        let effect = |tag, priority, max| -> Box<dyn PostEffectComponent> { Box::new(TaggedEffect { tag, priority, max }) };

        assert!(manager.register_post_effect(handle, effect("late", 10, 4), &mut ctx));
        assert!(manager.register_post_effect(handle, effect("single", 0, 1), &mut ctx));
        assert!(!manager.register_post_effect(handle, effect("single", 0, 1), &mut ctx));
        assert!(manager.register_post_effect(handle, effect("late", 10, 4), &mut ctx));
        assert!(manager.register_post_effect(handle, effect("early", -5, 4), &mut ctx));

        assert_eq!(manager.post_effect_types(handle), ["early", "single", "late", "late"]);
        let passes = manager.build_post_effect_passes(handle, &mut ctx);
        assert_eq!(passes.iter().map(|p| p.pass_name.as_str()).collect_vec(), ["early", "single", "late", "late"]);

        assert_eq!(manager.remove_post_effects(handle, "late", &mut ctx), 2);
        assert_eq!(manager.post_effect_types(handle), ["early", "single"]);

        shutdown(manager, ctx, PersistentPassRegistry::new());
    }

    #[test]
    fn test_resize_rebuilds_resources() {
        let mut ctx = context();
        let mut manager = ScreenBufferManager::new();
        let handle = create(&mut manager, &mut ctx, 8, 8);
        manager.get_mut(handle).unwrap().advance_frame_buffer_index();
        let old_rt = manager.get(handle).unwrap().render_target(0);

        manager.resize(handle, &mut ctx, 32, 16).unwrap();
        let buffer = manager.get(handle).unwrap();
        assert_eq!((buffer.width(), buffer.height()), (32, 16));
        assert_eq!(buffer.write_index(), 0);
        assert_ne!(buffer.render_target(0), old_rt);
        assert!(!buffer.shader_resource_handle().is_null());
        let rt = ctx.resources().render_target(buffer.render_target(0)).unwrap();
        assert_eq!(rt.extent(), vk::Extent2D { width: 32, height: 16 });
        assert_eq!(ctx.resources().pending_destroy_count(), 6);

        assert!(manager.resize(handle, &mut ctx, 0, 16).is_err());

        shutdown(manager, ctx, PersistentPassRegistry::new());
    }
}
