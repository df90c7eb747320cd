use tessera_gfx::descriptors::sampler::DefaultSampler;
use tessera_gfx::error::GfxResult;
use tessera_render_interface::gfx_context::GfxContext;
use tessera_render_interface::post_effect::{
    PostEffectComponent, PostEffectOwner, PostEffectPass, RenderCommand, write_constants,
};

use crate::post_effect::{FULLSCREEN_VERTEX_COUNT, SAMPLER, TEXTURE};

pub const FXAA_CB: &str = "Pixel:FXAACB";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FxaaParams {
    pub threshold: f32,
    pub threshold_min: f32,
    pub strength: f32,
}
impl Default for FxaaParams {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            threshold_min: 0.001,
            strength: 1.0,
        }
    }
}

/// 对齐到 16 字节
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FxaaConstants {
    pub texel_size: [f32; 2],
    pub threshold: f32,
    pub threshold_min: f32,
    pub strength: f32,
    pub _pad: [f32; 3],
}
impl FxaaConstants {
    pub fn new(params: &FxaaParams, width: u32, height: u32) -> Self {
        let texel = |size: u32| if size > 0 { 1.0 / size as f32 } else { 0.0 };
        Self {
            texel_size: [texel(width), texel(height)],
            threshold: params.threshold.clamp(0.0, 1.0),
            threshold_min: params.threshold_min.clamp(0.0, 1.0),
            strength: params.strength.clamp(0.0, 1.0),
            _pad: [0.0; 3],
        }
    }
}

/// 单 pass 的 FXAA，直接绘制到 owner 的写入面
#[derive(Default)]
pub struct FxaaEffect {
    params: FxaaParams,
}
impl FxaaEffect {
    pub fn new(params: FxaaParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &FxaaParams {
        &self.params
    }
    #[inline]
    pub fn set_params(&mut self, params: FxaaParams) {
        self.params = params;
    }
}
impl PostEffectComponent for FxaaEffect {
    fn component_type(&self) -> &str {
        "FxaaEffect"
    }

    fn max_count_per_buffer(&self) -> usize {
        1
    }

    fn build_passes(&mut self, owner: &PostEffectOwner, _ctx: &mut GfxContext) -> GfxResult<Vec<PostEffectPass>> {
        let constants = FxaaConstants::new(&self.params, owner.width, owner.height);
        let source = owner.shader_resource;

        let pass = PostEffectPass::new("PostEffect.FXAA", "FXAA.Pass")
            .with_constant_buffer(FXAA_CB, size_of::<FxaaConstants>())
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
        Box::new(FxaaEffect::new(self.params))
    }
}
