use slotmap::SlotMap;

use crate::commands::command_recorder::{CommandRecorder, CommandRecorderId};
use crate::descriptors::descriptor_table::DescriptorTables;
use crate::error::{GfxError, GfxResult};
use crate::foundation::device::GfxDevice;
use crate::resources::constant_buffer::ConstantBufferResource;
use crate::resources::depth_stencil::DepthStencilResource;
use crate::resources::gpu_resource::GfxResource;
use crate::resources::handles::GfxResourceHandle;
use crate::resources::index_buffer::IndexBufferResource;
use crate::resources::render_target::RenderTargetResource;
use crate::resources::resource_state::GfxResourceState;
use crate::resources::shader_resource::ShaderResourceResource;
use crate::resources::unordered_access::UnorderedAccessResource;

/// 资源管理器中存放的资源，种类是封闭的
pub enum GfxResourceEntry {
    RenderTarget(RenderTargetResource),
    DepthStencil(DepthStencilResource),
    ShaderResource(ShaderResourceResource),
    ConstantBuffer(ConstantBufferResource),
    IndexBuffer(IndexBufferResource),
    UnorderedAccess(UnorderedAccessResource),
}
impl GfxResourceEntry {
    pub fn as_resource(&self) -> &dyn GfxResource {
        match self {
            GfxResourceEntry::RenderTarget(r) => r,
            GfxResourceEntry::DepthStencil(r) => r,
            GfxResourceEntry::ShaderResource(r) => r,
            GfxResourceEntry::ConstantBuffer(r) => r,
            GfxResourceEntry::IndexBuffer(r) => r,
            GfxResourceEntry::UnorderedAccess(r) => r,
        }
    }

    pub fn as_resource_mut(&mut self) -> &mut dyn GfxResource {
        match self {
            GfxResourceEntry::RenderTarget(r) => r,
            GfxResourceEntry::DepthStencil(r) => r,
            GfxResourceEntry::ShaderResource(r) => r,
            GfxResourceEntry::ConstantBuffer(r) => r,
            GfxResourceEntry::IndexBuffer(r) => r,
            GfxResourceEntry::UnorderedAccess(r) => r,
        }
    }

    /// 释放内存和 descriptor slot
    pub fn destroy(self, device: &mut dyn GfxDevice, tables: &mut DescriptorTables) {
        match self {
            GfxResourceEntry::RenderTarget(r) => r.destroy(device, tables),
            GfxResourceEntry::DepthStencil(r) => r.destroy(device, tables),
            GfxResourceEntry::ShaderResource(r) => r.destroy(device, tables),
            GfxResourceEntry::ConstantBuffer(r) => r.destroy(device, tables),
            GfxResourceEntry::IndexBuffer(r) => r.destroy(device),
            GfxResourceEntry::UnorderedAccess(r) => r.destroy(device, tables),
        }
    }
}

/// 资源管理器
///
/// 使用 SlotMap 存储所有资源，对外提供轻量级的 Handle。
/// 支持资源的延迟销毁：提交销毁时记录帧号，若干帧之后才真正释放。
pub struct GfxResourceManager {
    pool: SlotMap<GfxResourceHandle, GfxResourceEntry>,

    // 待销毁队列 (handle, frame_id)
    pending_destroy: Vec<(GfxResourceHandle, u64)>,

    destroyed: bool,
}
impl Default for GfxResourceManager {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl GfxResourceManager {
    pub fn new() -> Self {
        Self {
            pool: SlotMap::with_key(),
            pending_destroy: Vec::new(),
            destroyed: false,
        }
    }
}
// destroy
impl GfxResourceManager {
    /// 立即销毁所有资源，包括还在待销毁队列中的
    pub fn destroy_all(&mut self, device: &mut dyn GfxDevice, tables: &mut DescriptorTables) {
        let count = self.pool.len();
        for (_, entry) in self.pool.drain() {
            entry.destroy(device, tables);
        }
        self.pending_destroy.clear();
        log::info!("GfxResourceManager: destroyed {count} resources");

        self.destroyed = true;
    }
}
impl Drop for GfxResourceManager {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        debug_assert!(self.destroyed || self.pool.is_empty(), "GfxResourceManager dropped without destroy_all");
    }
}
// 注册与查询
impl GfxResourceManager {
    pub fn register(&mut self, entry: GfxResourceEntry) -> GfxResourceHandle {
        self.destroyed = false;
        self.pool.insert(entry)
    }

    #[inline]
    pub fn contains(&self, handle: GfxResourceHandle) -> bool {
        self.pool.contains_key(handle)
    }
    #[inline]
    pub fn len(&self) -> usize {
        self.pool.len()
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
    #[inline]
    pub fn pending_destroy_count(&self) -> usize {
        self.pending_destroy.len()
    }

    #[inline]
    pub fn get(&self, handle: GfxResourceHandle) -> Option<&dyn GfxResource> {
        self.pool.get(handle).map(GfxResourceEntry::as_resource)
    }
    #[inline]
    pub fn get_mut(&mut self, handle: GfxResourceHandle) -> Option<&mut dyn GfxResource> {
        self.pool.get_mut(handle).map(GfxResourceEntry::as_resource_mut)
    }

    pub fn render_target(&self, handle: GfxResourceHandle) -> Option<&RenderTargetResource> {
        match self.pool.get(handle)? {
            GfxResourceEntry::RenderTarget(r) => Some(r),
            _ => None,
        }
    }
    pub fn depth_stencil(&self, handle: GfxResourceHandle) -> Option<&DepthStencilResource> {
        match self.pool.get(handle)? {
            GfxResourceEntry::DepthStencil(r) => Some(r),
            _ => None,
        }
    }
    pub fn depth_stencil_mut(&mut self, handle: GfxResourceHandle) -> Option<&mut DepthStencilResource> {
        match self.pool.get_mut(handle)? {
            GfxResourceEntry::DepthStencil(r) => Some(r),
            _ => None,
        }
    }
    pub fn shader_resource(&self, handle: GfxResourceHandle) -> Option<&ShaderResourceResource> {
        match self.pool.get(handle)? {
            GfxResourceEntry::ShaderResource(r) => Some(r),
            _ => None,
        }
    }
    pub fn constant_buffer(&self, handle: GfxResourceHandle) -> Option<&ConstantBufferResource> {
        match self.pool.get(handle)? {
            GfxResourceEntry::ConstantBuffer(r) => Some(r),
            _ => None,
        }
    }
    pub fn index_buffer_mut(&mut self, handle: GfxResourceHandle) -> Option<&mut IndexBufferResource> {
        match self.pool.get_mut(handle)? {
            GfxResourceEntry::IndexBuffer(r) => Some(r),
            _ => None,
        }
    }
    pub fn unordered_access(&self, handle: GfxResourceHandle) -> Option<&UnorderedAccessResource> {
        match self.pool.get(handle)? {
            GfxResourceEntry::UnorderedAccess(r) => Some(r),
            _ => None,
        }
    }
}
// 状态切换
impl GfxResourceManager {
    pub fn attach_recorder(&mut self, handle: GfxResourceHandle, recorder: CommandRecorderId) -> GfxResult<()> {
        let resource = self.get_mut(handle).ok_or(GfxError::ResourceNotFound)?;
        resource.gpu_resource_mut().attach_recorder(recorder);
        Ok(())
    }

    pub fn transition(
        &mut self,
        handle: GfxResourceHandle,
        state: GfxResourceState,
        cmd: &mut CommandRecorder,
    ) -> GfxResult<bool> {
        let resource = self.get_mut(handle).ok_or(GfxError::ResourceNotFound)?;
        resource.transition_to(state, cmd)
    }

    /// attach 之后切换，用于一次性命令或者中间目标
    pub fn attach_and_transition(
        &mut self,
        handle: GfxResourceHandle,
        state: GfxResourceState,
        cmd: &mut CommandRecorder,
    ) -> GfxResult<bool> {
        self.attach_recorder(handle, cmd.id())?;
        self.transition(handle, state, cmd)
    }

    /// 依次 attach 并切换多个资源
    ///
    /// 任何一个失败时，之前切换过的资源退回原来的状态；调用方随后应当重置录制器
    pub fn attach_and_transition_all(
        &mut self,
        targets: &[(GfxResourceHandle, GfxResourceState)],
        cmd: &mut CommandRecorder,
    ) -> GfxResult<()> {
        let mut previous = Vec::with_capacity(targets.len());
        for &(handle, state) in targets {
            let result = match self.get(handle) {
                Some(resource) => {
                    previous.push((handle, resource.gpu_resource().state_index()));
                    self.attach_and_transition(handle, state, cmd)
                }
                None => Err(GfxError::ResourceNotFound),
            };
            if let Err(err) = result {
                for (handle, index) in previous.into_iter().rev() {
                    if let Some(resource) = self.get_mut(handle) {
                        resource.gpu_resource_mut().restore_state_index(index);
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }
}
// 销毁
impl GfxResourceManager {
    pub fn destroy_immediate(
        &mut self,
        handle: GfxResourceHandle,
        device: &mut dyn GfxDevice,
        tables: &mut DescriptorTables,
    ) {
        if let Some(entry) = self.pool.remove(handle) {
            entry.destroy(device, tables);
        }
    }

    /// 标记为待销毁，资源在 `cleanup` 中真正释放
    pub fn destroy_deferred(&mut self, handle: GfxResourceHandle, frame_id: u64) {
        if !self.pool.contains_key(handle) {
            return;
        }
        if self.pending_destroy.iter().any(|(h, _)| *h == handle) {
            return;
        }
        self.pending_destroy.push((handle, frame_id));
    }

    /// 清理已过期的资源
    ///
    /// 提交销毁时的帧号 + `delay_frames` <= `current_frame_id` 的资源会被释放
    pub fn cleanup(
        &mut self,
        current_frame_id: u64,
        delay_frames: u64,
        device: &mut dyn GfxDevice,
        tables: &mut DescriptorTables,
    ) {
        let mut expired = Vec::new();
        self.pending_destroy.retain(|(handle, frame_id)| {
            if *frame_id + delay_frames <= current_frame_id {
                expired.push(*handle);
                false
            } else {
                true
            }
        });

        for handle in expired {
            self.destroy_immediate(handle, device, tables);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::descriptor_table::DescriptorCapacities;
    use crate::foundation::headless_device::HeadlessDevice;
    use crate::resources::gpu_resource::GfxResourceKind;
    use crate::resources::render_target::GfxRenderTargetDesc;
    use ash::vk;

    fn make_rt(device: &mut HeadlessDevice, tables: &mut DescriptorTables) -> GfxResourceEntry {
        GfxResourceEntry::RenderTarget(
            RenderTargetResource::new(
                device,
                tables,
                &GfxRenderTargetDesc {
                    extent: vk::Extent2D { width: 4, height: 4 },
                    format: vk::Format::B8G8R8A8_UNORM,
                    clear_color: [0.0; 4],
                },
                "rt",
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_deferred_destroy_waits_for_delay() {
        let mut device = HeadlessDevice::new();
        let mut tables = DescriptorTables::new(&device, &DescriptorCapacities::default());
        let mut manager = GfxResourceManager::new();

        let entry = make_rt(&mut device, &mut tables);
        let handle = manager.register(entry);
        manager.destroy_deferred(handle, 10);
        manager.destroy_deferred(handle, 11);
        assert_eq!(manager.pending_destroy_count(), 1);

        manager.cleanup(12, 3, &mut device, &mut tables);
        assert!(manager.contains(handle));

        manager.cleanup(13, 3, &mut device, &mut tables);
        assert!(!manager.contains(handle));
        assert_eq!(device.live_memory_count(), 0);
        assert_eq!(tables.live_total(), 0);

        manager.destroy_all(&mut device, &mut tables);
    }

    #[test]
    fn test_failed_group_transition_restores_states() {
        let mut device = HeadlessDevice::new();
        let mut tables = DescriptorTables::new(&device, &DescriptorCapacities::default());
        let mut manager = GfxResourceManager::new();
        let mut cmd = CommandRecorder::new(CommandRecorderId(0), "group");
        cmd.begin();

        let entry = make_rt(&mut device, &mut tables);
        let rt = manager.register(entry);
        let entry = make_rt(&mut device, &mut tables);
        let stale = manager.register(entry);
        manager.destroy_immediate(stale, &mut device, &mut tables);

        let result = manager.attach_and_transition_all(
            &[
                (rt, GfxResourceState::SHADER_READ_FRAGMENT),
                (stale, GfxResourceState::SHADER_READ_FRAGMENT),
            ],
            &mut cmd,
        );
        assert!(matches!(result, Err(GfxError::ResourceNotFound)));
        // barrier 已经录制，但跟踪的状态回到了切换之前
        assert_eq!(cmd.commands().len(), 1);
        assert_eq!(manager.get(rt).unwrap().state(), GfxResourceState::COLOR_ATTACHMENT_WRITE);

        // 录制器重置之后，下一次切换会重新产生 barrier
        cmd.reset();
        cmd.begin();
        manager
            .attach_and_transition_all(&[(rt, GfxResourceState::SHADER_READ_FRAGMENT)], &mut cmd)
            .unwrap();
        assert_eq!(cmd.commands().len(), 1);
        assert_eq!(manager.get(rt).unwrap().state(), GfxResourceState::SHADER_READ_FRAGMENT);

        manager.destroy_all(&mut device, &mut tables);
    }

    #[test]
    fn test_typed_getters() {
        let mut device = HeadlessDevice::new();
        let mut tables = DescriptorTables::new(&device, &DescriptorCapacities::default());
        let mut manager = GfxResourceManager::new();

        let entry = make_rt(&mut device, &mut tables);
        let handle = manager.register(entry);
        assert!(manager.render_target(handle).is_some());
        assert!(manager.depth_stencil(handle).is_none());
        assert_eq!(manager.get(handle).unwrap().kind(), GfxResourceKind::RenderTarget);

        manager.destroy_all(&mut device, &mut tables);
        assert!(manager.is_empty());
        assert_eq!(device.live_memory_count(), 0);
    }

    #[test]
    fn test_transition_through_manager() {
        let mut device = HeadlessDevice::new();
        let mut tables = DescriptorTables::new(&device, &DescriptorCapacities::default());
        let mut manager = GfxResourceManager::new();
        let entry = make_rt(&mut device, &mut tables);
        let handle = manager.register(entry);

        let mut cmd = CommandRecorder::new(CommandRecorderId(0), "test");
        cmd.begin();
        assert!(matches!(
            manager.transition(handle, GfxResourceState::SHADER_READ_FRAGMENT, &mut cmd),
            Err(GfxError::NoRecorderAttached { .. })
        ));
        assert!(
            manager
                .attach_and_transition(handle, GfxResourceState::SHADER_READ_FRAGMENT, &mut cmd)
                .unwrap()
        );

        manager.destroy_all(&mut device, &mut tables);
    }
}
