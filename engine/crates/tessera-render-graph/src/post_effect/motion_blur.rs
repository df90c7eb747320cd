//! 基于上一帧画面的运动模糊
//!
//! 每帧三个 pass：
//!
//! ```text
//! ToInternal:  (scene, velocity, history) -> blur
//! CopyToPrev:  scene -> history
//! BlitToOwner: blur  -> owner 的写入面
//! ```

use ash::vk;
use tessera_gfx::descriptors::descriptor_table::GpuDescriptorHandle;
use tessera_gfx::descriptors::sampler::DefaultSampler;
use tessera_gfx::error::GfxResult;
use tessera_gfx::resources::handles::GfxResourceHandle;
use tessera_gfx::resources::resource_state::GfxResourceState;
use tessera_render_interface::gfx_context::GfxContext;
use tessera_render_interface::post_effect::{
    PassRecordContext, PostEffectComponent, PostEffectOwner, PostEffectPass, RenderCommand, write_constants,
};

use crate::post_effect::bloom::SCENE_TEXTURE;
use crate::post_effect::{EffectTarget, FULLSCREEN_VERTEX_COUNT, SAMPLER, create_effect_target};

pub const MOTION_BLUR_CB: &str = "Pixel:MotionBlurCB";
pub const VELOCITY_TEXTURE: &str = "Pixel:gVelocityTexture";
pub const HISTORY_TEXTURE: &str = "Pixel:gHistoryTexture";

pub const MAX_SAMPLES: u32 = 32;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionBlurParams {
    pub intensity: f32,
    /// 帧间差异换算成速度的比例
    pub velocity_scale: f32,
    /// 最大模糊半径，单位是像素
    pub max_blur_pixels: f32,
    /// 采样次数，限制在 1..=32
    pub samples: u32,
}
impl Default for MotionBlurParams {
    fn default() -> Self {
        Self {
            intensity: 1.0,
            velocity_scale: 1.0,
            max_blur_pixels: 24.0,
            samples: 8,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MotionBlurConstants {
    pub intensity: f32,
    pub velocity_scale: f32,
    pub max_blur_pixels: f32,
    pub samples: u32,
    pub inv_resolution: [f32; 2],
    pub _pad: [f32; 2],
}
impl MotionBlurConstants {
    pub fn new(params: &MotionBlurParams, extent: vk::Extent2D) -> Self {
        let inv = |size: u32| if size > 0 { 1.0 / size as f32 } else { 0.0 };
        Self {
            intensity: params.intensity,
            velocity_scale: params.velocity_scale,
            max_blur_pixels: params.max_blur_pixels,
            samples: params.samples.clamp(1, MAX_SAMPLES),
            inv_resolution: [inv(extent.width), inv(extent.height)],
            _pad: [0.0; 2],
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct MotionBlurTargets {
    format: vk::Format,
    history: EffectTarget,
    blur: EffectTarget,
}
impl MotionBlurTargets {
    fn handles(&self) -> impl Iterator<Item = GfxResourceHandle> + use<> {
        self.history.handles().into_iter().chain(self.blur.handles())
    }
}

pub struct MotionBlurEffect {
    params: MotionBlurParams,
    velocity: Option<GpuDescriptorHandle>,
    targets: Option<MotionBlurTargets>,
}
// new & init
impl MotionBlurEffect {
    pub fn new(params: MotionBlurParams) -> Self {
        Self {
            params,
            velocity: None,
            targets: None,
        }
    }
}
impl Default for MotionBlurEffect {
    fn default() -> Self {
        Self::new(MotionBlurParams::default())
    }
}
// getter
impl MotionBlurEffect {
    #[inline]
    pub fn params(&self) -> &MotionBlurParams {
        &self.params
    }
    #[inline]
    pub fn set_params(&mut self, params: MotionBlurParams) {
        self.params = params;
    }

    /// 速度纹理，`None` 时使用 owner 自己的读面
    ///
    /// 来源如果是另一个 ScreenBuffer，它的读面每帧都会交换，需要每帧重新设置
    #[inline]
    pub fn set_velocity_source(&mut self, velocity: Option<GpuDescriptorHandle>) {
        self.velocity = velocity;
    }

    /// 上一帧画面和内部模糊结果，首次 build 之前为 `None`
    #[inline]
    pub fn targets(&self) -> Option<(EffectTarget, EffectTarget)> {
        self.targets.map(|targets| (targets.history, targets.blur))
    }
}
// 中间目标
impl MotionBlurEffect {
    fn ensure_targets(&mut self, owner: &PostEffectOwner, ctx: &mut GfxContext) -> GfxResult<MotionBlurTargets> {
        let extent = owner.extent();
        let format = owner.color_format;
        if let Some(targets) = self.targets.filter(|t| t.format == format && t.history.extent == extent) {
            return Ok(targets);
        }

        let mut created = Vec::new();
        let targets = create_effect_target(ctx, "MotionBlur.History", extent, format, &mut created).and_then(|history| {
            let blur = create_effect_target(ctx, "MotionBlur.Blur", extent, format, &mut created)?;
            Ok(MotionBlurTargets { format, history, blur })
        });
        let targets = match targets {
            Ok(targets) => targets,
            Err(err) => {
                for handle in created.into_iter().rev() {
                    ctx.destroy_resource_immediate(handle);
                }
                return Err(err);
            }
        };

        if let Some(old) = self.targets.replace(targets) {
            log::debug!(
                "motion blur targets {}x{} -> {}x{}",
                old.history.extent.width,
                old.history.extent.height,
                extent.width,
                extent.height
            );
            for handle in old.handles() {
                ctx.destroy_resource_deferred(handle);
            }
        }
        Ok(targets)
    }
}

impl PostEffectComponent for MotionBlurEffect {
    fn component_type(&self) -> &str {
        "MotionBlurEffect"
    }

    fn max_count_per_buffer(&self) -> usize {
        1
    }

    fn initialize(&mut self, owner: &PostEffectOwner, ctx: &mut GfxContext) {
        if owner.width == 0 || owner.height == 0 {
            return;
        }
        if let Err(err) = self.ensure_targets(owner, ctx) {
            log::warn!("motion blur initialize failed: {err}");
        }
    }

    fn finalize(&mut self, ctx: &mut GfxContext) {
        if let Some(targets) = self.targets.take() {
            for handle in targets.handles() {
                ctx.destroy_resource_deferred(handle);
            }
        }
    }

    fn build_passes(&mut self, owner: &PostEffectOwner, ctx: &mut GfxContext) -> GfxResult<Vec<PostEffectPass>> {
        if owner.width == 0 || owner.height == 0 {
            return Ok(Vec::new());
        }

        let MotionBlurTargets { history, blur, .. } = self.ensure_targets(owner, ctx)?;
        let constants = MotionBlurConstants::new(&self.params, owner.extent());
        let scene = owner.shader_resource;
        let velocity = self.velocity.unwrap_or(scene);

        let to_internal = PostEffectPass::new("PostEffect.MotionBlur", "MotionBlur.ToInternal")
            .with_begin_record(move |ctx| {
                sample_target(ctx, history.render_target) && ctx.begin_render_target(blur.render_target, false)
            })
            .with_end_record(move |ctx| ctx.end_render_target(blur.render_target))
            .with_constant_buffer(MOTION_BLUR_CB, size_of::<MotionBlurConstants>())
            .with_update_constant_buffers(move |buffers| {
                buffers.first_mut().is_some_and(|buffer| write_constants(buffer, &constants))
            })
            .with_bind_resources(move |binder| {
                binder.bind_descriptor(SCENE_TEXTURE, scene)
                    && binder.bind_descriptor(VELOCITY_TEXTURE, velocity)
                    && (!binder.contains(HISTORY_TEXTURE) || binder.bind_descriptor(HISTORY_TEXTURE, history.srv))
                    && binder.bind_sampler(SAMPLER, DefaultSampler::LinearClamp)
            })
            .with_render_command(|| Some(RenderCommand::draw(FULLSCREEN_VERTEX_COUNT)));

        let copy_to_prev = PostEffectPass::new("PostEffect.MotionBlur.HistoryCopy", "MotionBlur.CopyToPrev")
            .with_begin_record(move |ctx| ctx.begin_render_target(history.render_target, false))
            .with_end_record(move |ctx| ctx.end_render_target(history.render_target))
            .with_bind_resources(move |binder| {
                binder.bind_descriptor(SCENE_TEXTURE, scene) && binder.bind_sampler(SAMPLER, DefaultSampler::LinearClamp)
            })
            .with_render_command(|| Some(RenderCommand::draw(FULLSCREEN_VERTEX_COUNT)));

        let blit_to_owner = PostEffectPass::new("PostEffect.MotionBlur.HistoryCopy", "MotionBlur.BlitToOwner")
            .with_bind_resources(move |binder| {
                binder.bind_descriptor(SCENE_TEXTURE, blur.srv)
                    && binder.bind_sampler(SAMPLER, DefaultSampler::LinearClamp)
            })
            .with_render_command(|| Some(RenderCommand::draw(FULLSCREEN_VERTEX_COUNT)));

        Ok(vec![to_internal, copy_to_prev, blit_to_owner])
    }

    fn clone_component(&self) -> Box<dyn PostEffectComponent> {
        Box::new(MotionBlurEffect::new(self.params))
    }
}

/// 上一帧画面在这一帧第一次被读取，需要重新 attach 到当前录制器
fn sample_target(ctx: &mut PassRecordContext, handle: GfxResourceHandle) -> bool {
    match ctx
        .resources
        .attach_and_transition(handle, GfxResourceState::SHADER_READ_FRAGMENT, ctx.cmd)
    {
        Ok(_) => true,
        Err(err) => {
            log::warn!("motion blur history unavailable: {err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_crate_tools::init_log::init_test_log;
    use tessera_gfx::foundation::headless_device::HeadlessDevice;
    use tessera_render_interface::post_effect::ShaderVariableBinder;
    use tessera_render_interface::screen_buffer::ScreenBufferHandle;
    use tessera_render_interface::settings::GfxSettings;

    #[derive(Default)]
    struct NameBinder {
        bound: Vec<(String, GpuDescriptorHandle)>,
    }
    impl ShaderVariableBinder for NameBinder {
        fn bind_descriptor(&mut self, name: &str, handle: GpuDescriptorHandle) -> bool {
            self.bound.push((name.to_string(), handle));
            true
        }

        fn bind_sampler(&mut self, _name: &str, _sampler: DefaultSampler) -> bool {
            true
        }

        fn contains(&self, _name: &str) -> bool {
            true
        }
    }

    fn bound(pass: &PostEffectPass) -> Vec<(String, GpuDescriptorHandle)> {
        let mut binder = NameBinder::default();
        assert!((pass.bind_resources.as_ref().unwrap())(&mut binder));
        binder.bound
    }

    fn context() -> GfxContext {
        init_test_log();
        let mut ctx = GfxContext::new(GfxSettings::default());
        ctx.init(Box::new(HeadlessDevice::new()));
        ctx
    }

    fn owner(width: u32, height: u32) -> PostEffectOwner {
        PostEffectOwner {
            handle: ScreenBufferHandle::default(),
            width,
            height,
            color_format: vk::Format::B8G8R8A8_UNORM,
            shader_resource: GpuDescriptorHandle(0x40),
            depth_shader_resource: GpuDescriptorHandle::NULL,
        }
    }

    #[test]
    fn test_constants_clamp_samples() {
        assert_eq!(size_of::<MotionBlurConstants>(), 32);
        let extent = vk::Extent2D { width: 4, height: 8 };

        let constants = MotionBlurConstants::new(&MotionBlurParams::default(), extent);
        assert_eq!(constants.samples, 8);
        assert_eq!(constants.inv_resolution, [0.25, 0.125]);

        let none = MotionBlurParams {
            samples: 0,
            ..Default::default()
        };
        assert_eq!(MotionBlurConstants::new(&none, extent).samples, 1);
        let many = MotionBlurParams {
            samples: 100,
            ..Default::default()
        };
        assert_eq!(MotionBlurConstants::new(&many, extent).samples, MAX_SAMPLES);
    }

    #[test]
    fn test_three_passes_through_history() {
        let mut ctx = context();
        let mut effect = MotionBlurEffect::default();
        assert!(effect.build_passes(&owner(0, 32), &mut ctx).unwrap().is_empty());
        assert!(ctx.resources().is_empty());

        let owner = owner(64, 32);
        let passes = effect.build_passes(&owner, &mut ctx).unwrap();
        assert_eq!(
            passes.iter().map(|p| p.pass_name.as_str()).collect::<Vec<_>>(),
            ["MotionBlur.ToInternal", "MotionBlur.CopyToPrev", "MotionBlur.BlitToOwner"]
        );
        assert_eq!(passes[0].constant_buffer_requirements[0].name, MOTION_BLUR_CB);
        assert!(passes[1].constant_buffer_requirements.is_empty());
        assert!(passes[..2].iter().all(|p| p.begin_record.is_some() && p.end_record.is_some()));
        assert!(passes[2].begin_record.is_none());

        let (history, blur) = effect.targets().unwrap();
        assert_eq!(history.extent, vk::Extent2D { width: 64, height: 32 });
        assert_eq!(ctx.resources().len(), 4);

        // 没有单独的速度纹理时使用 owner 的读面
        assert_eq!(
            bound(&passes[0]),
            [
                (SCENE_TEXTURE.to_string(), owner.shader_resource),
                (VELOCITY_TEXTURE.to_string(), owner.shader_resource),
                (HISTORY_TEXTURE.to_string(), history.srv),
            ]
        );
        assert_eq!(bound(&passes[1]), [(SCENE_TEXTURE.to_string(), owner.shader_resource)]);
        assert_eq!(bound(&passes[2]), [(SCENE_TEXTURE.to_string(), blur.srv)]);

        effect.set_velocity_source(Some(GpuDescriptorHandle(0x99)));
        let passes = effect.build_passes(&owner, &mut ctx).unwrap();
        assert_eq!(bound(&passes[0])[1], (VELOCITY_TEXTURE.to_string(), GpuDescriptorHandle(0x99)));

        effect.finalize(&mut ctx);
        ctx.destroy();
    }

    #[test]
    fn test_targets_follow_owner_extent() {
        let mut ctx = context();
        let mut effect = MotionBlurEffect::default();

        effect.build_passes(&owner(32, 32), &mut ctx).unwrap();
        let first = effect.targets().unwrap();
        effect.build_passes(&owner(32, 32), &mut ctx).unwrap();
        assert_eq!(effect.targets().unwrap(), first);
        assert_eq!(ctx.resources().pending_destroy_count(), 0);

        effect.build_passes(&owner(48, 32), &mut ctx).unwrap();
        assert_ne!(effect.targets().unwrap(), first);
        assert_eq!(ctx.resources().pending_destroy_count(), 4);

        let clone = effect.clone_component();
        assert_eq!(clone.component_type(), "MotionBlurEffect");

        effect.finalize(&mut ctx);
        assert!(effect.targets().is_none());
        assert_eq!(ctx.resources().pending_destroy_count(), 8);
        ctx.destroy();
    }
}
