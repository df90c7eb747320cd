//! 单缓冲的深度离屏目标，用于 shadow map
//!
//! shadow map 每帧都会在被采样之前完整重绘，所以不需要读写面的交换。

use ash::vk;
use itertools::Itertools;
use tessera_gfx::commands::command_recorder::{CommandRecorder, CommandRecorderId, RecordedBatch};
use tessera_gfx::descriptors::descriptor_table::GpuDescriptorHandle;
use tessera_gfx::error::{GfxError, GfxResult};
use tessera_gfx::resources::depth_stencil::GfxDepthStencilDesc;
use tessera_gfx::resources::handles::GfxResourceHandle;
use tessera_gfx::resources::manager::GfxResourceManager;
use tessera_gfx::resources::resource_state::GfxResourceState;

use crate::deferred_registry::DeferredDestroyRegistry;
use crate::gfx_context::{GfxContext, GfxParts};

slotmap::new_key_type! {
    pub struct ShadowMapBufferHandle;
}

#[derive(Clone, Copy, Debug, Default)]
struct RecordState {
    discard: bool,
}

pub struct ShadowMapBuffer {
    name: String,
    extent: vk::Extent2D,
    depth_format: vk::Format,
    shader_view_format: vk::Format,

    depth_stencil: GfxResourceHandle,
    srv: GpuDescriptorHandle,

    record: Option<RecordState>,
    recorder: CommandRecorderId,
}
// getter
impl ShadowMapBuffer {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[inline]
    pub fn width(&self) -> u32 {
        self.extent.width
    }
    #[inline]
    pub fn height(&self) -> u32 {
        self.extent.height
    }
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }
    #[inline]
    pub fn shader_view_format(&self) -> vk::Format {
        self.shader_view_format
    }
    #[inline]
    pub fn depth_stencil(&self) -> GfxResourceHandle {
        self.depth_stencil
    }
    #[inline]
    pub fn shader_resource_handle(&self) -> GpuDescriptorHandle {
        self.srv
    }
    #[inline]
    pub fn recorder_id(&self) -> CommandRecorderId {
        self.recorder
    }
    #[inline]
    pub fn is_recording(&self) -> bool {
        self.record.is_some()
    }
}
// 录制
impl ShadowMapBuffer {
    fn record_begin(&self, cmd: &mut CommandRecorder, resources: &mut GfxResourceManager) -> GfxResult<()> {
        let dsv = resources
            .depth_stencil(self.depth_stencil)
            .ok_or(GfxError::ResourceNotFound)?
            .dsv_handle();
        resources.attach_and_transition_all(&[(self.depth_stencil, GfxResourceState::DEPTH_ATTACHMENT_WRITE)], cmd)?;

        cmd.set_render_targets(&[], Some(dsv));
        if let Some(ds) = resources.depth_stencil(self.depth_stencil) {
            ds.clear(cmd);
        }
        cmd.set_viewport_and_scissor(self.extent);
        Ok(())
    }

    fn record_end(&self, cmd: &mut CommandRecorder, resources: &mut GfxResourceManager) -> GfxResult<()> {
        let ds = resources.depth_stencil_mut(self.depth_stencil).ok_or(GfxError::ResourceNotFound)?;
        ds.transition_to_shader_resource(cmd)?;
        Ok(())
    }
}

/// 所有 ShadowMapBuffer 的注册表，销毁协议与 ScreenBuffer 相同
#[derive(Default)]
pub struct ShadowMapBufferManager {
    buffers: DeferredDestroyRegistry<ShadowMapBufferHandle, ShadowMapBuffer>,
    next_serial: u64,
}
// new & init
impl ShadowMapBufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        ctx: &mut GfxContext,
        width: u32,
        height: u32,
        depth_format: vk::Format,
        shader_view_format: vk::Format,
    ) -> GfxResult<ShadowMapBufferHandle> {
        if width == 0 || height == 0 {
            return Err(GfxError::InvalidExtent { width, height });
        }
        if !ctx.is_initialized() {
            return Err(GfxError::NotInitialized);
        }

        let name = format!("ShadowMap#{}", self.next_serial);
        self.next_serial += 1;
        let extent = vk::Extent2D { width, height };
        let clear_depth = ctx.settings().shadow_map.clear_depth;

        let recorder = ctx.acquire_recorder(name.as_str())?;
        let depth_stencil = match ctx.create_depth_stencil(
            &GfxDepthStencilDesc {
                extent,
                format: depth_format,
                clear_depth,
                clear_stencil: 0,
                shader_view_format: Some(shader_view_format),
            },
            &format!("{name}.Depth"),
        ) {
            Ok(handle) => handle,
            Err(err) => {
                ctx.release_recorder(recorder);
                return Err(err);
            }
        };

        // 在第一次录制之前就可以被采样
        let initial = ctx.one_time_exec(&format!("{name}.InitialTransition"), |cmd, resources| {
            resources.attach_and_transition(depth_stencil, GfxResourceState::SHADER_READ_DEPTH, cmd)?;
            Ok(())
        });
        if let Err(err) = initial {
            ctx.destroy_resource_immediate(depth_stencil);
            ctx.release_recorder(recorder);
            return Err(err);
        }

        let srv = ctx
            .resources()
            .depth_stencil(depth_stencil)
            .map_or(GpuDescriptorHandle::NULL, |ds| ds.srv_handle());
        let handle = self.buffers.insert(ShadowMapBuffer {
            name,
            extent,
            depth_format,
            shader_view_format,
            depth_stencil,
            srv,
            record: None,
            recorder,
        });
        log::info!("create shadow map {handle:?}: {width}x{height}, {depth_format:?} sampled as {shader_view_format:?}");
        Ok(handle)
    }

    pub fn create_default(&mut self, ctx: &mut GfxContext, width: u32, height: u32) -> GfxResult<ShadowMapBufferHandle> {
        let settings = ctx.settings().shadow_map;
        self.create(ctx, width, height, settings.depth_format, settings.shader_view_format)
    }
}
// destroy
impl ShadowMapBufferManager {
    pub fn destroy_notify(&mut self, handle: ShadowMapBufferHandle) {
        if self.buffers.mark_destroy(handle) {
            log::debug!("shadow map {handle:?} pending destroy");
        }
    }

    pub fn commit_destroy(&mut self, ctx: &mut GfxContext) -> usize {
        let committed = self.buffers.take_committed();
        let count = committed.len();
        for (handle, buffer) in committed {
            teardown(handle, buffer, ctx, false);
        }
        count
    }

    pub fn destroy_all(&mut self, ctx: &mut GfxContext) {
        for (handle, buffer) in self.buffers.drain() {
            teardown(handle, buffer, ctx, true);
        }
    }
}
impl Drop for ShadowMapBufferManager {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        debug_assert!(self.buffers.is_empty(), "ShadowMapBufferManager dropped with live buffers");
    }
}
// getter
impl ShadowMapBufferManager {
    #[inline]
    pub fn get(&self, handle: ShadowMapBufferHandle) -> Option<&ShadowMapBuffer> {
        self.buffers.get(handle)
    }
    #[inline]
    pub fn is_exist(&self, handle: ShadowMapBufferHandle) -> bool {
        self.buffers.contains(handle)
    }
    #[inline]
    pub fn is_pending_destroy(&self, handle: ShadowMapBufferHandle) -> bool {
        self.buffers.is_pending_destroy(handle)
    }
    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
    #[inline]
    pub fn shader_resource_handle(&self, handle: ShadowMapBufferHandle) -> GpuDescriptorHandle {
        self.buffers.get(handle).map_or(GpuDescriptorHandle::NULL, ShadowMapBuffer::shader_resource_handle)
    }
}
// 录制
impl ShadowMapBufferManager {
    /// 切换到深度写入，只绑定深度目标并清除
    pub fn begin_record(&mut self, handle: ShadowMapBufferHandle, ctx: &mut GfxContext) -> GfxResult<CommandRecorderId> {
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

        buffer.record = Some(RecordState::default());
        Ok(buffer.recorder)
    }

    /// 切换到可采样状态并结束录制
    pub fn end_record(
        &mut self,
        handle: ShadowMapBufferHandle,
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
        if let Err(err) = buffer.record_end(cmd, resources) {
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

    pub fn all_begin_record(&mut self, ctx: &mut GfxContext) -> Vec<ShadowMapBufferHandle> {
        let mut started = Vec::new();
        for handle in self.buffers.live_keys() {
            if self.buffers.get(handle).is_some_and(ShadowMapBuffer::is_recording) {
                continue;
            }
            match self.begin_record(handle, ctx) {
                Ok(_) => started.push(handle),
                Err(err) => log::warn!("skip shadow map {handle:?} this frame: {err}"),
            }
        }
        started
    }

    pub fn mark_discard(&mut self, handle: ShadowMapBufferHandle) -> bool {
        match self.buffers.get_mut(handle).and_then(|buffer| buffer.record.as_mut()) {
            Some(record) => {
                record.discard = true;
                true
            }
            None => false,
        }
    }

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
                Err(err) => log::warn!("end record of shadow map {handle:?} failed: {err}"),
            }
        }
        batches
    }
}

fn teardown(handle: ShadowMapBufferHandle, buffer: ShadowMapBuffer, ctx: &mut GfxContext, immediate: bool) {
    if buffer.is_recording() {
        log::warn!("shadow map '{}' destroyed while recording", buffer.name);
    }
    if immediate {
        ctx.destroy_resource_immediate(buffer.depth_stencil);
    } else {
        ctx.destroy_resource_deferred(buffer.depth_stencil);
    }
    ctx.release_recorder(buffer.recorder);
    log::info!("destroy shadow map {handle:?} '{}'", buffer.name);
}
