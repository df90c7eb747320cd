use ash::vk;
use std::hash::Hash;

use crate::descriptors::descriptor_table::{DescriptorKind, DescriptorSlot, DescriptorTables, GpuDescriptorHandle};
use crate::foundation::device::{GfxDevice, GfxViewDesc};

// Sampler descriptor
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxSamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub max_anisotropy: u32,
    pub compare_op: Option<vk::CompareOp>,
    pub mipmap_mode: vk::SamplerMipmapMode,
}
impl Default for GfxSamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: 0,
            compare_op: None,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        }
    }
}
impl GfxSamplerDesc {
    fn with_filter_and_address(filter: vk::Filter, address: vk::SamplerAddressMode) -> Self {
        let mipmap_mode = if filter == vk::Filter::NEAREST {
            vk::SamplerMipmapMode::NEAREST
        } else {
            vk::SamplerMipmapMode::LINEAR
        };
        Self {
            mag_filter: filter,
            min_filter: filter,
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mipmap_mode,
            ..Default::default()
        }
    }
}

/// 引擎内置的几种常用 sampler
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DefaultSampler {
    LinearClamp,
    LinearWrap,
    PointClamp,
    PointWrap,
}
impl DefaultSampler {
    pub const ALL: [DefaultSampler; 4] = [
        DefaultSampler::LinearClamp,
        DefaultSampler::LinearWrap,
        DefaultSampler::PointClamp,
        DefaultSampler::PointWrap,
    ];

    pub fn desc(self) -> GfxSamplerDesc {
        match self {
            DefaultSampler::LinearClamp => {
                GfxSamplerDesc::with_filter_and_address(vk::Filter::LINEAR, vk::SamplerAddressMode::CLAMP_TO_EDGE)
            }
            DefaultSampler::LinearWrap => {
                GfxSamplerDesc::with_filter_and_address(vk::Filter::LINEAR, vk::SamplerAddressMode::REPEAT)
            }
            DefaultSampler::PointClamp => {
                GfxSamplerDesc::with_filter_and_address(vk::Filter::NEAREST, vk::SamplerAddressMode::CLAMP_TO_EDGE)
            }
            DefaultSampler::PointWrap => {
                GfxSamplerDesc::with_filter_and_address(vk::Filter::NEAREST, vk::SamplerAddressMode::REPEAT)
            }
        }
    }
}

/// 内置 sampler 在 sampler 表中的 slot
pub struct SamplerTable {
    slots: Vec<(DefaultSampler, DescriptorSlot)>,
}
// new & init
impl SamplerTable {
    pub fn new(device: &mut dyn GfxDevice, tables: &mut DescriptorTables) -> Self {
        let slots = DefaultSampler::ALL
            .iter()
            .map(|sampler| {
                let slot = tables.allocate(DescriptorKind::Sampler);
                device.write_descriptor(&slot, None, &GfxViewDesc::Sampler(sampler.desc()));
                (*sampler, slot)
            })
            .collect();

        Self { slots }
    }
}
// destroy
impl SamplerTable {
    pub fn destroy(self, tables: &mut DescriptorTables) {
        for (_, slot) in self.slots {
            tables.free(slot);
        }
    }
}
// getter
impl SamplerTable {
    #[inline]
    pub fn gpu_handle(&self, sampler: DefaultSampler) -> GpuDescriptorHandle {
        self.slots
            .iter()
            .find(|(s, _)| *s == sampler)
            .map_or(GpuDescriptorHandle::NULL, |(_, slot)| slot.gpu_handle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::descriptor_table::DescriptorCapacities;
    use crate::foundation::headless_device::HeadlessDevice;

    #[test]
    fn test_default_samplers_are_resolvable() {
        let mut device = HeadlessDevice::new();
        let mut tables = DescriptorTables::new(&device, &DescriptorCapacities::default());
        let samplers = SamplerTable::new(&mut device, &mut tables);

        for sampler in DefaultSampler::ALL {
            assert!(!samplers.gpu_handle(sampler).is_null());
        }
        assert_ne!(
            samplers.gpu_handle(DefaultSampler::LinearClamp),
            samplers.gpu_handle(DefaultSampler::PointWrap)
        );
        assert_eq!(tables.table(DescriptorKind::Sampler).live_count(), 4);

        samplers.destroy(&mut tables);
        assert_eq!(tables.live_total(), 0);
    }

    #[test]
    fn test_point_samplers_use_nearest_mips() {
        let desc = DefaultSampler::PointClamp.desc();
        assert_eq!(desc.mag_filter, vk::Filter::NEAREST);
        assert_eq!(desc.mipmap_mode, vk::SamplerMipmapMode::NEAREST);
        assert_eq!(desc.address_mode_u, vk::SamplerAddressMode::CLAMP_TO_EDGE);
    }
}
