use tessera_gfx::descriptors::sampler::DefaultSampler;
use tessera_gfx::error::GfxResult;
use tessera_render_interface::gfx_context::GfxContext;
use tessera_render_interface::post_effect::{
    PostEffectComponent, PostEffectOwner, PostEffectPass, RenderCommand, write_constants,
};

use crate::post_effect::{FULLSCREEN_VERTEX_COUNT, SAMPLER, TEXTURE};

pub const CHROMATIC_ABERRATION_CB: &str = "Pixel:ChromaticAberrationCB";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChromaticAberrationParams {
    /// RGB 三个通道沿这个方向错开
    pub direction: [f32; 2],
    /// 以 uv 为单位的偏移量
    pub strength: f32,
}
impl Default for ChromaticAberrationParams {
    fn default() -> Self {
        Self {
            direction: [1.0, 0.0],
            strength: 0.0025,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ChromaticAberrationConstants {
    pub direction: [f32; 2],
    pub strength: f32,
    pub _pad: f32,
}
impl From<&ChromaticAberrationParams> for ChromaticAberrationConstants {
    fn from(params: &ChromaticAberrationParams) -> Self {
        Self {
            direction: params.direction.map(|v| v.clamp(-1.0, 1.0)),
            strength: params.strength.max(0.0),
            _pad: 0.0,
        }
    }
}

/// 色差，单 pass 绘制到 owner 的写入面
#[derive(Default)]
pub struct ChromaticAberrationEffect {
    params: ChromaticAberrationParams,
}
impl ChromaticAberrationEffect {
    pub fn new(params: ChromaticAberrationParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &ChromaticAberrationParams {
        &self.params
    }
    #[inline]
    pub fn set_params(&mut self, params: ChromaticAberrationParams) {
        self.params = params;
    }
}
impl PostEffectComponent for ChromaticAberrationEffect {
    fn component_type(&self) -> &str {
        "ChromaticAberrationEffect"
    }

    fn max_count_per_buffer(&self) -> usize {
        1
    }

    fn build_passes(&mut self, owner: &PostEffectOwner, _ctx: &mut GfxContext) -> GfxResult<Vec<PostEffectPass>> {
        let constants = ChromaticAberrationConstants::from(&self.params);
        let source = owner.shader_resource;

        let pass = PostEffectPass::new("PostEffect.ChromaticAberration", "ChromaticAberration")
            .with_constant_buffer(CHROMATIC_ABERRATION_CB, size_of::<ChromaticAberrationConstants>())
            .with_update_constant_buffers(move |buffers| {
                buffers.first_mut().is_some_and(|buffer| write_constants(buffer, &constants))
            })
            .with_bind_resources(move |binder| {
                binder.bind_descriptor(TEXTURE, source) && binder.bind_sampler(SAMPLER, DefaultSampler::LinearClamp)
            })
            .with_render_command(|| Some(RenderCommand::draw(FULLSCREEN_VERTEX_COUNT)));
        Ok(vec![pass])
    }

    fn clone_component(&self) -> Box<dyn PostEffectComponent> {
        Box::new(ChromaticAberrationEffect::new(self.params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;
    use tessera_crate_tools::init_log::init_test_log;
    use tessera_gfx::descriptors::descriptor_table::GpuDescriptorHandle;
    use tessera_render_interface::screen_buffer::ScreenBufferHandle;
    use tessera_render_interface::settings::GfxSettings;

    #[test]
    fn test_single_pass_with_constants() {
        init_test_log();
        let mut ctx = GfxContext::new(GfxSettings::default());
        let owner = PostEffectOwner {
            handle: ScreenBufferHandle::default(),
            width: 64,
            height: 64,
            color_format: vk::Format::B8G8R8A8_UNORM,
            shader_resource: GpuDescriptorHandle(0x10),
            depth_shader_resource: GpuDescriptorHandle::NULL,
        };
        let mut effect = ChromaticAberrationEffect::new(ChromaticAberrationParams {
            direction: [0.0, 3.0],
            strength: 0.01,
        });

        let passes = effect.build_passes(&owner, &mut ctx).unwrap();
        assert_eq!(passes.len(), 1);
        let pass = &passes[0];
        assert_eq!(pass.pipeline_name, "PostEffect.ChromaticAberration");
        assert_eq!(pass.pass_name, "ChromaticAberration");
        assert!(pass.begin_record.is_none());
        assert_eq!(pass.constant_buffer_requirements[0].name, CHROMATIC_ABERRATION_CB);
        assert_eq!(size_of::<ChromaticAberrationConstants>(), 16);

        let mut buffers = vec![vec![0u8; pass.constant_buffer_requirements[0].size]];
        assert!((pass.update_constant_buffers.as_ref().unwrap())(buffers.as_mut_slice()));
        let written: ChromaticAberrationConstants = bytemuck::pod_read_unaligned(&buffers[0]);
        assert_eq!(written.direction, [0.0, 1.0]);
        assert_eq!(written.strength, 0.01);

        assert_eq!(effect.clone_component().component_type(), "ChromaticAberrationEffect");
        ctx.destroy();
    }
}
