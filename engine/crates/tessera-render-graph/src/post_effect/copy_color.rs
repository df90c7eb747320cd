use tessera_gfx::error::GfxResult;
use tessera_render_interface::gfx_context::GfxContext;
use tessera_render_interface::post_effect::{PostEffectComponent, PostEffectOwner, PostEffectPass, RenderCommand};

use crate::post_effect::{FULLSCREEN_VERTEX_COUNT, TEXTURE};

/// 把 owner 的读面原样绘制到写入面
///
/// pipeline 由调用方提供；pipeline 没有 `Pixel:gTexture` 时不绑定任何东西
pub struct CopyColorEffect {
    pipeline_name: String,
}
impl CopyColorEffect {
    pub fn new(pipeline_name: impl Into<String>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
        }
    }

    #[inline]
    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }
}
impl PostEffectComponent for CopyColorEffect {
    fn component_type(&self) -> &str {
        "CopyColorEffect"
    }

    fn max_count_per_buffer(&self) -> usize {
        1
    }

    fn build_passes(&mut self, owner: &PostEffectOwner, _ctx: &mut GfxContext) -> GfxResult<Vec<PostEffectPass>> {
        let source = owner.shader_resource;
        let pass = PostEffectPass::new(self.pipeline_name.as_str(), "CopyColor")
            .with_bind_resources(move |binder| !binder.contains(TEXTURE) || binder.bind_descriptor(TEXTURE, source))
            .with_render_command(|| Some(RenderCommand::draw(FULLSCREEN_VERTEX_COUNT)));
        Ok(vec![pass])
    }

    fn clone_component(&self) -> Box<dyn PostEffectComponent> {
        Box::new(CopyColorEffect::new(self.pipeline_name.as_str()))
    }
}
