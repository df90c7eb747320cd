use ash::vk;
use tessera_gfx::commands::command_recorder::{CommandRecorder, CommandRecorderId, RecordedBatch};
use tessera_gfx::commands::recorder_pool::CommandRecorderPool;
use tessera_gfx::descriptors::descriptor_table::{DescriptorCapacities, DescriptorTables};
use tessera_gfx::descriptors::sampler::SamplerTable;
use tessera_gfx::error::{GfxError, GfxResult};
use tessera_gfx::foundation::device::GfxDevice;
use tessera_gfx::resources::constant_buffer::ConstantBufferResource;
use tessera_gfx::resources::depth_stencil::{DepthStencilResource, GfxDepthStencilDesc};
use tessera_gfx::resources::gpu_resource::GfxResource;
use tessera_gfx::resources::handles::GfxResourceHandle;
use tessera_gfx::resources::index_buffer::IndexBufferResource;
use tessera_gfx::resources::manager::{GfxResourceEntry, GfxResourceManager};
use tessera_gfx::resources::render_target::{GfxRenderTargetDesc, RenderTargetResource};
use tessera_gfx::resources::shader_resource::ShaderResourceResource;
use tessera_gfx::resources::unordered_access::UnorderedAccessResource;

use crate::frame_counter::FrameCounter;
use crate::settings::GfxSettings;

/// 初始化之后才存在的部分
struct GfxCore {
    device: Box<dyn GfxDevice>,
    descriptors: DescriptorTables,
    samplers: SamplerTable,
}

/// 同时借用上下文中各个部分
pub struct GfxParts<'a> {
    pub device: &'a mut dyn GfxDevice,
    pub descriptors: &'a mut DescriptorTables,
    pub samplers: &'a SamplerTable,
    pub resources: &'a mut GfxResourceManager,
    pub recorders: &'a mut CommandRecorderPool,
}

/// GPU 资源层的上下文
///
/// 所有创建、销毁、录制的入口都显式接收这个对象，不存在全局状态。
/// 生命周期：`new` -> `init(device)` -> ... -> `destroy`
pub struct GfxContext {
    settings: GfxSettings,
    core: Option<GfxCore>,

    resources: GfxResourceManager,
    recorders: CommandRecorderPool,

    /// 一次性命令使用的录制器
    immediate: CommandRecorder,
    /// 一次性命令录制的结果，等待 Renderer 在下一次提交时取走
    pending_submissions: Vec<RecordedBatch>,

    frame_counter: FrameCounter,
}
// new & init
impl GfxContext {
    pub fn new(settings: GfxSettings) -> Self {
        let recorders = CommandRecorderPool::new(settings.max_command_recorders);
        Self {
            settings,
            core: None,
            resources: GfxResourceManager::new(),
            recorders,
            immediate: CommandRecorder::new(CommandRecorderId::IMMEDIATE, "immediate"),
            pending_submissions: Vec::new(),
            frame_counter: FrameCounter::new(1),
        }
    }

    /// 绑定设备并创建 descriptor 表与默认 sampler
    pub fn init(&mut self, mut device: Box<dyn GfxDevice>) {
        if self.core.is_some() {
            log::warn!("GfxContext is already initialized, ignore device '{}'", device.name());
            return;
        }

        let capacities: DescriptorCapacities = self.settings.descriptors.into();
        let mut descriptors = DescriptorTables::new(device.as_ref(), &capacities);
        let samplers = SamplerTable::new(device.as_mut(), &mut descriptors);
        log::info!(
            "GfxContext init with device '{}': {:?}, {} command recorders",
            device.name(),
            capacities,
            self.recorders.capacity()
        );

        self.core = Some(GfxCore {
            device,
            descriptors,
            samplers,
        });
    }
}
// destroy
impl GfxContext {
    /// 释放所有资源并解除设备
    pub fn destroy(&mut self) {
        let Some(mut core) = self.core.take() else {
            return;
        };

        self.resources.destroy_all(core.device.as_mut(), &mut core.descriptors);
        core.samplers.destroy(&mut core.descriptors);
        self.pending_submissions.clear();

        let leaked = core.descriptors.live_total();
        if leaked > 0 {
            log::warn!("GfxContext destroyed with {leaked} descriptor slots still allocated");
        }
        if self.recorders.in_use_count() > 0 {
            log::warn!(
                "GfxContext destroyed with {} command recorders still in use",
                self.recorders.in_use_count()
            );
        }
        log::info!("GfxContext destroyed");
    }
}
impl Drop for GfxContext {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        debug_assert!(self.core.is_none(), "GfxContext dropped without destroy");
    }
}
// getter
impl GfxContext {
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.core.is_some()
    }
    #[inline]
    pub fn settings(&self) -> &GfxSettings {
        &self.settings
    }
    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }
    #[inline]
    pub fn resources(&self) -> &GfxResourceManager {
        &self.resources
    }
    #[inline]
    pub fn recorders(&self) -> &CommandRecorderPool {
        &self.recorders
    }
    #[inline]
    pub fn descriptors(&self) -> Option<&DescriptorTables> {
        self.core.as_ref().map(|core| &core.descriptors)
    }
    #[inline]
    pub fn samplers(&self) -> Option<&SamplerTable> {
        self.core.as_ref().map(|core| &core.samplers)
    }
    #[inline]
    pub fn device(&self) -> Option<&dyn GfxDevice> {
        self.core.as_ref().map(|core| core.device.as_ref())
    }
    #[inline]
    pub fn device_mut(&mut self) -> Option<&mut (dyn GfxDevice + 'static)> {
        self.core.as_mut().map(|core| core.device.as_mut())
    }

    /// 同时借出各个部分；未初始化时返回错误
    pub fn parts_mut(&mut self) -> GfxResult<GfxParts<'_>> {
        let core = self.core.as_mut().ok_or(GfxError::NotInitialized)?;
        Ok(GfxParts {
            device: core.device.as_mut(),
            descriptors: &mut core.descriptors,
            samplers: &core.samplers,
            resources: &mut self.resources,
            recorders: &mut self.recorders,
        })
    }
}
// 一次性命令
impl GfxContext {
    /// 录制一次性命令，结果进入待提交队列
    ///
    /// 用于创建资源后的初始状态切换等不属于任何离屏缓冲的命令
    pub fn one_time_exec<F>(&mut self, name: &str, f: F) -> GfxResult<()>
    where
        F: FnOnce(&mut CommandRecorder, &mut GfxResourceManager) -> GfxResult<()>,
    {
        if self.core.is_none() {
            return Err(GfxError::NotInitialized);
        }

        self.immediate.set_name(name);
        self.immediate.begin();
        if let Err(err) = f(&mut self.immediate, &mut self.resources) {
            self.immediate.reset();
            return Err(err);
        }
        let batch = self.immediate.close()?;
        self.pending_submissions.push(batch);
        Ok(())
    }

    /// 取走所有待提交的一次性命令
    #[inline]
    pub fn take_pending_submissions(&mut self) -> Vec<RecordedBatch> {
        std::mem::take(&mut self.pending_submissions)
    }
}
// 资源创建
impl GfxContext {
    fn core_mut(&mut self) -> GfxResult<&mut GfxCore> {
        self.core.as_mut().ok_or(GfxError::NotInitialized)
    }

    pub fn create_render_target(&mut self, desc: &GfxRenderTargetDesc, name: &str) -> GfxResult<GfxResourceHandle> {
        let core = self.core_mut()?;
        let rt = RenderTargetResource::new(core.device.as_mut(), &mut core.descriptors, desc, name)?;
        Ok(self.resources.register(GfxResourceEntry::RenderTarget(rt)))
    }

    pub fn create_depth_stencil(&mut self, desc: &GfxDepthStencilDesc, name: &str) -> GfxResult<GfxResourceHandle> {
        let core = self.core_mut()?;
        let ds = DepthStencilResource::new(core.device.as_mut(), &mut core.descriptors, desc, name)?;
        Ok(self.resources.register(GfxResourceEntry::DepthStencil(ds)))
    }

    /// 在一个 render target 之上创建只读 view
    pub fn create_shader_resource_view(
        &mut self,
        render_target: GfxResourceHandle,
        name: &str,
    ) -> GfxResult<GfxResourceHandle> {
        let (memory, format) = {
            let rt = self.resources.render_target(render_target).ok_or(GfxError::ResourceNotFound)?;
            (rt.memory().handle(), rt.format())
        };
        let core = self.core_mut()?;
        let srv = ShaderResourceResource::new(core.device.as_mut(), &mut core.descriptors, memory, format, name);
        Ok(self.resources.register(GfxResourceEntry::ShaderResource(srv)))
    }

    pub fn create_constant_buffer(&mut self, size: vk::DeviceSize, name: &str) -> GfxResult<GfxResourceHandle> {
        let core = self.core_mut()?;
        let cb = ConstantBufferResource::new(core.device.as_mut(), &mut core.descriptors, size, name)?;
        Ok(self.resources.register(GfxResourceEntry::ConstantBuffer(cb)))
    }

    pub fn create_index_buffer(
        &mut self,
        index_type: vk::IndexType,
        capacity: u32,
        name: &str,
    ) -> GfxResult<GfxResourceHandle> {
        let core = self.core_mut()?;
        let ib = IndexBufferResource::new(core.device.as_mut(), index_type, capacity, name)?;
        Ok(self.resources.register(GfxResourceEntry::IndexBuffer(ib)))
    }

    pub fn create_unordered_access(
        &mut self,
        extent: vk::Extent2D,
        format: vk::Format,
        name: &str,
    ) -> GfxResult<GfxResourceHandle> {
        let core = self.core_mut()?;
        let uav = UnorderedAccessResource::new(core.device.as_mut(), &mut core.descriptors, extent, format, name)?;
        Ok(self.resources.register(GfxResourceEntry::UnorderedAccess(uav)))
    }

    pub fn write_constant_buffer<T: bytemuck::Pod>(&mut self, handle: GfxResourceHandle, data: &T) -> GfxResult<()> {
        let core = self.core.as_mut().ok_or(GfxError::NotInitialized)?;
        let cb = self.resources.constant_buffer(handle).ok_or(GfxError::ResourceNotFound)?;
        cb.write(core.device.as_mut(), data)
    }

    pub fn write_indices(&mut self, handle: GfxResourceHandle, indices: &[u32]) -> GfxResult<()> {
        let core = self.core.as_mut().ok_or(GfxError::NotInitialized)?;
        let ib = self.resources.index_buffer_mut(handle).ok_or(GfxError::ResourceNotFound)?;
        ib.write_u32(core.device.as_mut(), indices)
    }
}
// 资源销毁
impl GfxContext {
    /// 等待若干帧之后再释放，期间资源仍然可以被已经录制的命令引用
    #[inline]
    pub fn destroy_resource_deferred(&mut self, handle: GfxResourceHandle) {
        self.resources.destroy_deferred(handle, self.frame_counter.frame_id());
    }

    pub fn destroy_resource_immediate(&mut self, handle: GfxResourceHandle) {
        if let Some(core) = self.core.as_mut() {
            self.resources.destroy_immediate(handle, core.device.as_mut(), &mut core.descriptors);
        }
    }
}
// 录制器
impl GfxContext {
    #[inline]
    pub fn acquire_recorder(&mut self, name: impl Into<String>) -> GfxResult<CommandRecorderId> {
        self.recorders.try_acquire(name)
    }

    #[inline]
    pub fn release_recorder(&mut self, id: CommandRecorderId) {
        self.recorders.release(id);
    }

    #[inline]
    pub fn recorder(&self, id: CommandRecorderId) -> Option<&CommandRecorder> {
        self.recorders.get(id)
    }
}
// update
impl GfxContext {
    /// 帧结束：推进帧号并清理到期的资源
    pub fn end_frame(&mut self) {
        self.frame_counter.next_frame();
        if let Some(core) = self.core.as_mut() {
            self.resources.cleanup(
                self.frame_counter.frame_id(),
                self.settings.resource_destroy_delay_frames,
                core.device.as_mut(),
                &mut core.descriptors,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_crate_tools::init_log::init_test_log;
    use tessera_gfx::foundation::headless_device::HeadlessDevice;
    use tessera_gfx::resources::resource_state::GfxResourceState;

    fn rt_desc() -> GfxRenderTargetDesc {
        GfxRenderTargetDesc {
            extent: vk::Extent2D { width: 8, height: 8 },
            format: vk::Format::B8G8R8A8_UNORM,
            clear_color: [0.0; 4],
        }
    }

    #[test]
    fn test_create_before_init_fails() {
        init_test_log();
        let mut ctx = GfxContext::new(GfxSettings::default());
        assert!(matches!(
            ctx.create_render_target(&rt_desc(), "rt"),
            Err(GfxError::NotInitialized)
        ));
        assert!(ctx.parts_mut().is_err());
        ctx.destroy();
    }

    #[test]
    fn test_deferred_resource_release() {
        init_test_log();
        let mut ctx = GfxContext::new(GfxSettings::default());
        ctx.init(Box::new(HeadlessDevice::new()));

        let rt = ctx.create_render_target(&rt_desc(), "rt").unwrap();
        let srv = ctx.create_shader_resource_view(rt, "rt.srv").unwrap();
        ctx.destroy_resource_deferred(srv);
        ctx.destroy_resource_deferred(rt);

        let delay = ctx.settings().resource_destroy_delay_frames;
        for _ in 1..delay {
            ctx.end_frame();
            assert!(ctx.resources().contains(rt));
        }
        ctx.end_frame();
        assert!(!ctx.resources().contains(rt));
        assert!(!ctx.resources().contains(srv));

        // 只剩下默认 sampler
        assert_eq!(ctx.descriptors().unwrap().live_total(), 4);
        ctx.destroy();
    }

    #[test]
    fn test_one_time_exec_queues_batch() {
        init_test_log();
        let mut ctx = GfxContext::new(GfxSettings::default());
        ctx.init(Box::new(HeadlessDevice::new()));
        let rt = ctx.create_render_target(&rt_desc(), "rt").unwrap();

        ctx.one_time_exec("init", |cmd, resources| {
            resources.attach_and_transition(rt, GfxResourceState::SHADER_READ_FRAGMENT, cmd)?;
            Ok(())
        })
        .unwrap();

        let batches = ctx.take_pending_submissions();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].recorder, CommandRecorderId::IMMEDIATE);
        assert_eq!(batches[0].barrier_count(), 1);
        assert!(ctx.take_pending_submissions().is_empty());

        ctx.destroy();
        assert!(!ctx.is_initialized());
    }

    #[test]
    fn test_constant_buffer_write_through_context() {
        init_test_log();
        let mut ctx = GfxContext::new(GfxSettings::default());
        ctx.init(Box::new(HeadlessDevice::new()));

        let cb = ctx.create_constant_buffer(16, "cb").unwrap();
        ctx.write_constant_buffer(cb, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let ib = ctx.create_index_buffer(vk::IndexType::UINT32, 3, "ib").unwrap();
        ctx.write_indices(ib, &[0, 1, 2]).unwrap();
        assert!(ctx.write_indices(ib, &[0, 1, 2, 3]).is_err());

        ctx.destroy();
    }
}
