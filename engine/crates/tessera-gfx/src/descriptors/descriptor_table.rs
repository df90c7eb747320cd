//! 固定容量的 descriptor slot 表
//!
//! 每种 descriptor（RTV / DSV / CBV_SRV_UAV / Sampler）各有一张表，
//! 容量在初始化时确定且永不增长。slot 通过 `kind` 字段弱引用所属的表，
//! 由表负责回收（`free`），slot 本身不持有表。

use crate::error::{GfxError, GfxResult};
use crate::foundation::device::GfxDevice;

/// descriptor 的种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorKind {
    RenderTarget,
    DepthStencil,
    /// CBV / SRV / UAV 共用一张表
    ShaderResource,
    Sampler,
}
impl DescriptorKind {
    pub const ALL: [DescriptorKind; 4] = [
        DescriptorKind::RenderTarget,
        DescriptorKind::DepthStencil,
        DescriptorKind::ShaderResource,
        DescriptorKind::Sampler,
    ];

    /// 只有 shader 可见的表才有 GPU 地址
    #[inline]
    pub fn is_shader_visible(self) -> bool {
        matches!(self, DescriptorKind::ShaderResource | DescriptorKind::Sampler)
    }
}

/// CPU 可见的 descriptor 地址
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct CpuDescriptorHandle(pub u64);

/// GPU 可见的 descriptor 地址，0 表示无效
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct GpuDescriptorHandle(pub u64);
impl GpuDescriptorHandle {
    pub const NULL: Self = Self(0);

    #[inline]
    pub fn null() -> Self {
        Self::NULL
    }
    #[inline]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// 设备为某张表提供的地址信息
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorHeapInfo {
    pub cpu_base: u64,
    /// 非 shader 可见的表没有 GPU 地址
    pub gpu_base: Option<u64>,
    /// 相邻两个 descriptor 之间的字节距离
    pub stride: u64,
}

/// 一个已分配的 descriptor slot
///
/// 不可 Clone：同一个 index 在任何时刻只能有一个存活的 slot
#[derive(Debug, PartialEq, Eq)]
pub struct DescriptorSlot {
    kind: DescriptorKind,
    index: u32,
    cpu: CpuDescriptorHandle,
    gpu: GpuDescriptorHandle,
}
// getter
impl DescriptorSlot {
    #[inline]
    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }
    #[inline]
    pub fn cpu_handle(&self) -> CpuDescriptorHandle {
        self.cpu
    }
    #[inline]
    pub fn gpu_handle(&self) -> GpuDescriptorHandle {
        self.gpu
    }
}

/// 单一种类的 descriptor slot 表
pub struct DescriptorSlotTable {
    kind: DescriptorKind,
    capacity: u32,
    heap: DescriptorHeapInfo,

    /// 空闲的 index，从尾部弹出
    free_indices: Vec<u32>,
    /// 每个 index 是否已经被分配，用于检查重复释放
    allocated: Vec<bool>,
}
// new & init
impl DescriptorSlotTable {
    pub fn new(kind: DescriptorKind, capacity: u32, heap: DescriptorHeapInfo) -> Self {
        debug_assert_eq!(kind.is_shader_visible(), heap.gpu_base.is_some());

        // 倒序填充，使得 0 号最先被分配
        let free_indices = (0..capacity).rev().collect();

        Self {
            kind,
            capacity,
            heap,
            free_indices,
            allocated: vec![false; capacity as usize],
        }
    }
}
// tools
impl DescriptorSlotTable {
    /// 分配一个 slot；表已满时返回错误
    pub fn try_allocate(&mut self) -> GfxResult<DescriptorSlot> {
        let Some(index) = self.free_indices.pop() else {
            return Err(GfxError::DescriptorTableExhausted {
                kind: self.kind,
                capacity: self.capacity,
            });
        };
        self.allocated[index as usize] = true;

        let offset = index as u64 * self.heap.stride;
        Ok(DescriptorSlot {
            kind: self.kind,
            index,
            cpu: CpuDescriptorHandle(self.heap.cpu_base + offset),
            gpu: self.heap.gpu_base.map_or(GpuDescriptorHandle::NULL, |base| GpuDescriptorHandle(base + offset)),
        })
    }

    /// 分配一个 slot；表已满属于容量配置错误，直接 panic
    pub fn allocate(&mut self) -> DescriptorSlot {
        match self.try_allocate() {
            Ok(slot) => slot,
            Err(err) => {
                log::error!("{err}, increase the capacity in GfxSettings");
                panic!("{err}");
            }
        }
    }

    /// 归还 slot
    ///
    /// 只应该在资源销毁的路径上调用
    pub fn free(&mut self, slot: DescriptorSlot) {
        assert_eq!(slot.kind, self.kind, "descriptor slot freed into the wrong table");
        assert!(
            slot.index < self.capacity,
            "descriptor index {} out of range (capacity {})",
            slot.index,
            self.capacity
        );
        assert!(self.allocated[slot.index as usize], "descriptor index {} freed twice", slot.index);

        self.allocated[slot.index as usize] = false;
        self.free_indices.push(slot.index);
    }
}
// getter
impl DescriptorSlotTable {
    #[inline]
    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
    #[inline]
    pub fn free_count(&self) -> u32 {
        self.free_indices.len() as u32
    }
    #[inline]
    pub fn live_count(&self) -> u32 {
        self.capacity - self.free_count()
    }
    #[inline]
    pub fn heap(&self) -> &DescriptorHeapInfo {
        &self.heap
    }
}

/// 每种 descriptor 表的容量
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorCapacities {
    pub render_target: u32,
    pub depth_stencil: u32,
    pub shader_resource: u32,
    pub sampler: u32,
}
impl Default for DescriptorCapacities {
    fn default() -> Self {
        Self {
            render_target: 256,
            depth_stencil: 128,
            shader_resource: 1024,
            sampler: 16,
        }
    }
}
impl DescriptorCapacities {
    #[inline]
    pub fn of(&self, kind: DescriptorKind) -> u32 {
        match kind {
            DescriptorKind::RenderTarget => self.render_target,
            DescriptorKind::DepthStencil => self.depth_stencil,
            DescriptorKind::ShaderResource => self.shader_resource,
            DescriptorKind::Sampler => self.sampler,
        }
    }
}

/// 四张 descriptor 表的集合
pub struct DescriptorTables {
    render_target: DescriptorSlotTable,
    depth_stencil: DescriptorSlotTable,
    shader_resource: DescriptorSlotTable,
    sampler: DescriptorSlotTable,
}
// new & init
impl DescriptorTables {
    pub fn new(device: &dyn GfxDevice, capacities: &DescriptorCapacities) -> Self {
        let create = |kind: DescriptorKind| {
            let capacity = capacities.of(kind);
            DescriptorSlotTable::new(kind, capacity, device.descriptor_heap(kind, capacity))
        };

        Self {
            render_target: create(DescriptorKind::RenderTarget),
            depth_stencil: create(DescriptorKind::DepthStencil),
            shader_resource: create(DescriptorKind::ShaderResource),
            sampler: create(DescriptorKind::Sampler),
        }
    }
}
// tools
impl DescriptorTables {
    #[inline]
    pub fn table(&self, kind: DescriptorKind) -> &DescriptorSlotTable {
        match kind {
            DescriptorKind::RenderTarget => &self.render_target,
            DescriptorKind::DepthStencil => &self.depth_stencil,
            DescriptorKind::ShaderResource => &self.shader_resource,
            DescriptorKind::Sampler => &self.sampler,
        }
    }

    #[inline]
    pub fn table_mut(&mut self, kind: DescriptorKind) -> &mut DescriptorSlotTable {
        match kind {
            DescriptorKind::RenderTarget => &mut self.render_target,
            DescriptorKind::DepthStencil => &mut self.depth_stencil,
            DescriptorKind::ShaderResource => &mut self.shader_resource,
            DescriptorKind::Sampler => &mut self.sampler,
        }
    }

    #[inline]
    pub fn allocate(&mut self, kind: DescriptorKind) -> DescriptorSlot {
        self.table_mut(kind).allocate()
    }

    #[inline]
    pub fn try_allocate(&mut self, kind: DescriptorKind) -> GfxResult<DescriptorSlot> {
        self.table_mut(kind).try_allocate()
    }

    /// 按照 slot 记录的 kind 归还到对应的表
    #[inline]
    pub fn free(&mut self, slot: DescriptorSlot) {
        self.table_mut(slot.kind()).free(slot)
    }

    /// 所有表中仍然存活的 slot 数量
    pub fn live_total(&self) -> u32 {
        DescriptorKind::ALL.iter().map(|kind| self.table(*kind).live_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    fn heap(kind: DescriptorKind) -> DescriptorHeapInfo {
        DescriptorHeapInfo {
            cpu_base: 0x1000,
            gpu_base: kind.is_shader_visible().then_some(0x8000),
            stride: 32,
        }
    }

    #[test]
    fn test_exhaustion_and_recovery() {
        let mut table = DescriptorSlotTable::new(DescriptorKind::ShaderResource, 4, heap(DescriptorKind::ShaderResource));

        let mut slots = (0..4).map(|_| table.try_allocate().unwrap()).collect_vec();
        assert_eq!(table.free_count(), 0);
        assert!(matches!(
            table.try_allocate(),
            Err(GfxError::DescriptorTableExhausted { capacity: 4, .. })
        ));

        table.free(slots.pop().unwrap());
        let slot = table.try_allocate().unwrap();
        assert_eq!(table.live_count(), 4);

        table.free(slot);
        slots.into_iter().for_each(|slot| table.free(slot));
        assert_eq!(table.live_count(), 0);
    }

    #[test]
    fn test_live_indices_are_unique() {
        let mut table = DescriptorSlotTable::new(DescriptorKind::RenderTarget, 8, heap(DescriptorKind::RenderTarget));
        let a = table.allocate();
        let b = table.allocate();
        table.free(a);
        let c = table.allocate();
        let d = table.allocate();

        let indices = [b.index(), c.index(), d.index()];
        assert_eq!(indices.iter().unique().count(), 3);
        assert!(indices.iter().all(|i| *i < table.capacity()));

        for slot in [b, c, d] {
            table.free(slot);
        }
    }

    #[test]
    fn test_addresses() {
        let mut rtv = DescriptorSlotTable::new(DescriptorKind::RenderTarget, 4, heap(DescriptorKind::RenderTarget));
        let mut srv = DescriptorSlotTable::new(DescriptorKind::ShaderResource, 4, heap(DescriptorKind::ShaderResource));

        let rt = rtv.allocate();
        assert_eq!(rt.cpu_handle(), CpuDescriptorHandle(0x1000 + rt.index() as u64 * 32));
        assert!(rt.gpu_handle().is_null());

        let sr = srv.allocate();
        assert_eq!(sr.gpu_handle(), GpuDescriptorHandle(0x8000 + sr.index() as u64 * 32));
        assert!(!sr.gpu_handle().is_null());

        rtv.free(rt);
        srv.free(sr);
    }

    #[test]
    #[should_panic]
    fn test_allocate_past_capacity_is_fatal() {
        let mut table = DescriptorSlotTable::new(DescriptorKind::DepthStencil, 1, heap(DescriptorKind::DepthStencil));
        let _first = table.allocate();
        let _second = table.allocate();
    }

    #[test]
    #[should_panic]
    fn test_free_into_wrong_table() {
        let mut rtv = DescriptorSlotTable::new(DescriptorKind::RenderTarget, 1, heap(DescriptorKind::RenderTarget));
        let mut dsv = DescriptorSlotTable::new(DescriptorKind::DepthStencil, 1, heap(DescriptorKind::DepthStencil));
        let slot = rtv.allocate();
        dsv.free(slot);
    }
}
