use tessera_gfx::descriptors::sampler::DefaultSampler;
use tessera_gfx::error::GfxResult;
use tessera_render_interface::gfx_context::GfxContext;
use tessera_render_interface::post_effect::{
    PostEffectComponent, PostEffectOwner, PostEffectPass, RenderCommand, write_constants,
};

use crate::post_effect::{FULLSCREEN_VERTEX_COUNT, SAMPLER, TEXTURE};

pub const DOT_MATRIX_CB: &str = "Pixel:DotMatrixCB";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DotMatrixParams {
    /// 点的间隔，单位是像素
    pub dot_spacing: f32,
    /// 点的半径，单位是像素
    pub dot_radius: f32,
    /// 亮度低于阈值的点不绘制，0 表示不启用
    pub threshold: f32,
    pub intensity: f32,
    pub monochrome: bool,
}
impl Default for DotMatrixParams {
    fn default() -> Self {
        Self {
            dot_spacing: 8.0,
            dot_radius: 3.5,
            threshold: 0.0,
            intensity: 1.0,
            monochrome: false,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DotMatrixConstants {
    pub inv_resolution: [f32; 2],
    pub dot_spacing: f32,
    pub dot_radius: f32,
    pub threshold: f32,
    pub intensity: f32,
    pub monochrome: u32,
    pub _pad: u32,
}
impl DotMatrixConstants {
    pub fn new(params: &DotMatrixParams, width: u32, height: u32) -> Self {
        let inv = |size: u32| if size > 0 { 1.0 / size as f32 } else { 0.0 };
        Self {
            inv_resolution: [inv(width), inv(height)],
            dot_spacing: params.dot_spacing.max(1.0),
            dot_radius: params.dot_radius.max(0.0),
            threshold: params.threshold.clamp(0.0, 1.0),
            intensity: params.intensity.max(0.0),
            monochrome: params.monochrome as u32,
            _pad: 0,
        }
    }
}

/// 把画面重新采样成规则排列的圆点
#[derive(Default)]
pub struct DotMatrixEffect {
    params: DotMatrixParams,
}
impl DotMatrixEffect {
    pub fn new(params: DotMatrixParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &DotMatrixParams {
        &self.params
    }
    #[inline]
    pub fn set_params(&mut self, params: DotMatrixParams) {
        self.params = params;
    }
}
impl PostEffectComponent for DotMatrixEffect {
    fn component_type(&self) -> &str {
        "DotMatrixEffect"
    }

    fn max_count_per_buffer(&self) -> usize {
        1
    }

    fn build_passes(&mut self, owner: &PostEffectOwner, _ctx: &mut GfxContext) -> GfxResult<Vec<PostEffectPass>> {
        let constants = DotMatrixConstants::new(&self.params, owner.width, owner.height);
        let source = owner.shader_resource;

        let pass = PostEffectPass::new("PostEffect.DotMatrix", "DotMatrix")
            .with_constant_buffer(DOT_MATRIX_CB, size_of::<DotMatrixConstants>())
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
        Box::new(DotMatrixEffect::new(self.params))
    }
}
