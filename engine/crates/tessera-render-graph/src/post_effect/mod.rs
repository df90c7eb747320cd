//! 内置的后处理组件

use ash::vk;
use tessera_gfx::descriptors::descriptor_table::GpuDescriptorHandle;
use tessera_gfx::error::{GfxError, GfxResult};
use tessera_gfx::resources::handles::GfxResourceHandle;
use tessera_gfx::resources::render_target::GfxRenderTargetDesc;
use tessera_render_interface::gfx_context::GfxContext;

pub mod bloom;
pub mod chromatic_aberration;
pub mod copy_color;
pub mod dot_matrix;
pub mod fxaa;
pub mod motion_blur;

/// 输入纹理
pub const TEXTURE: &str = "Pixel:gTexture";
pub const SAMPLER: &str = "Pixel:gSampler";

/// 全屏三角形
pub const FULLSCREEN_VERTEX_COUNT: u32 = 3;

/// 组件自己持有的中间目标：render target 和它的只读 view
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EffectTarget {
    pub render_target: GfxResourceHandle,
    pub shader_resource: GfxResourceHandle,
    pub srv: GpuDescriptorHandle,
    pub extent: vk::Extent2D,
}
impl EffectTarget {
    /// view 在前，销毁时先于 render target 释放
    #[inline]
    pub fn handles(self) -> [GfxResourceHandle; 2] {
        [self.shader_resource, self.render_target]
    }
}

/// 创建一个中间目标，成功创建的资源依次记录到 `created` 中，失败时由调用方回收
pub(crate) fn create_effect_target(
    ctx: &mut GfxContext,
    name: &str,
    extent: vk::Extent2D,
    format: vk::Format,
    created: &mut Vec<GfxResourceHandle>,
) -> GfxResult<EffectTarget> {
    let render_target = ctx.create_render_target(
        &GfxRenderTargetDesc {
            extent,
            format,
            clear_color: [0.0, 0.0, 0.0, 0.0],
        },
        name,
    )?;
    created.push(render_target);

    let shader_resource = ctx.create_shader_resource_view(render_target, &format!("{name}.Srv"))?;
    created.push(shader_resource);

    let srv = ctx
        .resources()
        .shader_resource(shader_resource)
        .ok_or(GfxError::ResourceNotFound)?
        .srv_handle();
    Ok(EffectTarget {
        render_target,
        shader_resource,
        srv,
        extent,
    })
}
