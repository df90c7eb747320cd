//! Bloom 金字塔
//!
//! 对 L 层金字塔，每帧按以下顺序生成 3L 个 pass：
//!
//! ```text
//! prefilter: scene        -> pyramid[0]
//! blur:      pyramid[0]   -> blur[0]
//! i = 1..L:  downsample   blur[i-1]  -> pyramid[i]
//!            blur         pyramid[i] -> blur[i]
//! i = L-1..1 upsample     (low, blur[i-1]) -> accum[i-1]
//! composite: (scene, accum[0]) -> owner 的写入面
//! ```
//!
//! 最深一层的 upsample 直接以 blur[L-1] 作为 low；
//! 执行器不会检查依赖，顺序错了只会得到不完整的 bloom。

use ash::vk;
use itertools::Itertools;
use tessera_gfx::descriptors::descriptor_table::GpuDescriptorHandle;
use tessera_gfx::descriptors::sampler::DefaultSampler;
use tessera_gfx::error::{GfxError, GfxResult};
use tessera_gfx::resources::handles::GfxResourceHandle;
use tessera_render_interface::gfx_context::GfxContext;
use tessera_render_interface::post_effect::{
    PostEffectComponent, PostEffectOwner, PostEffectPass, RenderCommand, ShaderVariableBinder, write_constants,
};

use crate::post_effect::{EffectTarget, FULLSCREEN_VERTEX_COUNT, SAMPLER, TEXTURE, create_effect_target};

pub const BLOOM_CB: &str = "Pixel:BloomCB";
pub const LOW_TEXTURE: &str = "Pixel:gLowTexture";
pub const HIGH_TEXTURE: &str = "Pixel:gHighTexture";
pub const SCENE_TEXTURE: &str = "Pixel:gSceneTexture";
pub const BLOOM_TEXTURE: &str = "Pixel:gBloomTexture";

pub const MAX_LEVELS: u32 = 16;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BloomParams {
    pub threshold: f32,
    pub soft_knee: f32,
    pub intensity: f32,
    pub blur_radius: f32,
    /// 金字塔层数，限制在 1..=16
    pub iterations: u32,
}
impl Default for BloomParams {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            soft_knee: 0.5,
            intensity: 0.8,
            blur_radius: 1.0,
            iterations: 4,
        }
    }
}
impl BloomParams {
    #[inline]
    pub fn levels(&self) -> usize {
        self.iterations.clamp(1, MAX_LEVELS) as usize
    }

    fn constants(&self) -> BloomConstants {
        BloomConstants {
            threshold: self.threshold,
            soft_knee: self.soft_knee,
            intensity: self.intensity,
            blur_radius: self.blur_radius,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BloomConstants {
    pub threshold: f32,
    pub soft_knee: f32,
    pub intensity: f32,
    pub blur_radius: f32,
}

/// 每层的尺寸：第 0 层是 owner 的一半，之后逐层减半，最小为 1
pub fn level_extents(extent: vk::Extent2D, levels: usize) -> Vec<vk::Extent2D> {
    let mut current = extent;
    (0..levels)
        .map(|_| {
            current = vk::Extent2D {
                width: (current.width / 2).max(1),
                height: (current.height / 2).max(1),
            };
            current
        })
        .collect_vec()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BloomLevel {
    pub pyramid: EffectTarget,
    pub blur: EffectTarget,
    /// 最深一层没有
    pub accum: Option<EffectTarget>,
}
impl BloomLevel {
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.pyramid.extent
    }

    fn handles(&self) -> impl Iterator<Item = GfxResourceHandle> + use<> {
        [Some(self.pyramid), Some(self.blur), self.accum]
            .into_iter()
            .flatten()
            .flat_map(EffectTarget::handles)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BloomTargetsKey {
    extent: vk::Extent2D,
    format: vk::Format,
    levels: usize,
}
impl BloomTargetsKey {
    /// 格式和层数相同时，尺寸没有变化的层可以保留
    #[inline]
    fn shares_layout(&self, other: &Self) -> bool {
        self.format == other.format && self.levels == other.levels
    }
}

struct BloomTargets {
    key: BloomTargetsKey,
    levels: Vec<BloomLevel>,
}
impl BloomTargets {
    fn handles(&self) -> impl Iterator<Item = GfxResourceHandle> + '_ {
        self.levels.iter().flat_map(BloomLevel::handles)
    }
}

pub struct BloomEffect {
    params: BloomParams,
    targets: Option<BloomTargets>,
}
// new & init
impl BloomEffect {
    pub fn new(params: BloomParams) -> Self {
        Self { params, targets: None }
    }
}
impl Default for BloomEffect {
    fn default() -> Self {
        Self::new(BloomParams::default())
    }
}
// getter
impl BloomEffect {
    #[inline]
    pub fn params(&self) -> &BloomParams {
        &self.params
    }
    #[inline]
    pub fn set_params(&mut self, params: BloomParams) {
        self.params = params;
    }
    /// 当前持有的中间目标，首次 build 之前为空
    #[inline]
    pub fn levels(&self) -> &[BloomLevel] {
        match &self.targets {
            Some(targets) => &targets.levels,
            None => &[],
        }
    }
}
// 中间目标
impl BloomEffect {
    /// key 没有变化时直接复用；格式和层数不变时只重建尺寸变化的层
    fn ensure_targets(&mut self, owner: &PostEffectOwner, ctx: &mut GfxContext) -> GfxResult<&[BloomLevel]> {
        let key = BloomTargetsKey {
            extent: owner.extent(),
            format: owner.color_format,
            levels: self.params.levels(),
        };
        if self.targets.as_ref().is_some_and(|targets| targets.key == key) {
            return Ok(self.levels());
        }

        let reusable = match &self.targets {
            Some(targets) if targets.key.shares_layout(&key) => targets.levels.clone(),
            _ => Vec::new(),
        };
        let mut created = Vec::new();
        let levels = match create_levels(ctx, &key, &reusable, &mut created) {
            Ok(levels) => levels,
            Err(err) => {
                for handle in created.into_iter().rev() {
                    ctx.destroy_resource_immediate(handle);
                }
                return Err(err);
            }
        };

        if let Some(old) = self.targets.take() {
            let retired = old.levels.iter().filter(|&level| !levels.contains(level)).collect_vec();
            log::debug!(
                "bloom targets {}x{} L{} -> {}x{} L{}, rebuild {} levels",
                old.key.extent.width,
                old.key.extent.height,
                old.key.levels,
                key.extent.width,
                key.extent.height,
                key.levels,
                retired.len()
            );
            for handle in retired.into_iter().flat_map(BloomLevel::handles) {
                ctx.destroy_resource_deferred(handle);
            }
        }
        self.targets = Some(BloomTargets { key, levels });
        Ok(self.levels())
    }
}

impl PostEffectComponent for BloomEffect {
    fn component_type(&self) -> &str {
        "BloomEffect"
    }

    fn max_count_per_buffer(&self) -> usize {
        1
    }

    fn initialize(&mut self, owner: &PostEffectOwner, ctx: &mut GfxContext) {
        if owner.width == 0 || owner.height == 0 {
            return;
        }
        if let Err(err) = self.ensure_targets(owner, ctx) {
            log::warn!("bloom initialize failed: {err}");
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

        let constants = self.params.constants();
        let scene = owner.shader_resource;
        let levels = self.ensure_targets(owner, ctx)?;
        let last = levels.len() - 1;

        let mut passes = Vec::with_capacity(levels.len() * 3);
        passes.push(
            level_pass("PostEffect.Bloom.Prefilter", "Bloom.Prefilter", 0, &levels[0].pyramid)
                .with_bloom_constants(constants)
                .with_bind_resources(move |binder| bind_texture(binder, scene)),
        );
        passes.push(blur_pass(0, &levels[0], constants));

        for i in 1..levels.len() {
            let source = levels[i - 1].blur.srv;
            passes.push(
                level_pass("PostEffect.Bloom.Downsample", "Bloom.Downsample", i, &levels[i].pyramid)
                    .with_bind_resources(move |binder| bind_texture(binder, source)),
            );
            passes.push(blur_pass(i, &levels[i], constants));
        }

        for i in (1..levels.len()).rev() {
            let dst = levels[i - 1].accum.ok_or(GfxError::ResourceNotFound)?;
            let low = if i == last {
                levels[i].blur.srv
            } else {
                levels[i].accum.ok_or(GfxError::ResourceNotFound)?.srv
            };
            let high = levels[i - 1].blur.srv;
            passes.push(
                level_pass("PostEffect.Bloom.Upsample", "Bloom.Upsample", i - 1, &dst).with_bind_resources(
                    move |binder| {
                        binder.bind_descriptor(LOW_TEXTURE, low)
                            && binder.bind_descriptor(HIGH_TEXTURE, high)
                            && binder.bind_sampler(SAMPLER, DefaultSampler::LinearClamp)
                    },
                ),
            );
        }

        let bloom = levels[0].accum.map_or(levels[0].blur.srv, |accum| accum.srv);
        passes.push(
            PostEffectPass::new("PostEffect.Bloom.Composite", "Bloom.Composite")
                .with_bloom_constants(constants)
                .with_bind_resources(move |binder| {
                    binder.bind_descriptor(SCENE_TEXTURE, scene)
                        && binder.bind_descriptor(BLOOM_TEXTURE, bloom)
                        && binder.bind_sampler(SAMPLER, DefaultSampler::LinearClamp)
                })
                .with_render_command(|| Some(RenderCommand::draw(FULLSCREEN_VERTEX_COUNT))),
        );

        Ok(passes)
    }

    fn clone_component(&self) -> Box<dyn PostEffectComponent> {
        Box::new(BloomEffect::new(self.params))
    }
}

trait BloomPassExt {
    fn with_bloom_constants(self, constants: BloomConstants) -> Self;
}
impl BloomPassExt for PostEffectPass {
    fn with_bloom_constants(self, constants: BloomConstants) -> Self {
        self.with_constant_buffer(BLOOM_CB, size_of::<BloomConstants>())
            .with_update_constant_buffers(move |buffers| {
                buffers.first_mut().is_some_and(|buffer| write_constants(buffer, &constants))
            })
    }
}

fn bind_texture(binder: &mut dyn ShaderVariableBinder, texture: GpuDescriptorHandle) -> bool {
    binder.bind_descriptor(TEXTURE, texture) && binder.bind_sampler(SAMPLER, DefaultSampler::LinearClamp)
}

/// 渲染到某一层中间目标的全屏 pass
fn level_pass(pipeline_name: &str, pass_name: &str, level: usize, target: &EffectTarget) -> PostEffectPass {
    PostEffectPass::new(pipeline_name, pass_name)
        .with_batch_key(level as u64)
        .with_render_target(target.render_target)
        .with_render_command(|| Some(RenderCommand::draw(FULLSCREEN_VERTEX_COUNT)))
}

fn blur_pass(level: usize, targets: &BloomLevel, constants: BloomConstants) -> PostEffectPass {
    let source = targets.pyramid.srv;
    level_pass("PostEffect.Bloom.Blur", "Bloom.Blur", level, &targets.blur)
        .with_bloom_constants(constants)
        .with_bind_resources(move |binder| bind_texture(binder, source))
}

fn create_levels(
    ctx: &mut GfxContext,
    key: &BloomTargetsKey,
    reusable: &[BloomLevel],
    created: &mut Vec<GfxResourceHandle>,
) -> GfxResult<Vec<BloomLevel>> {
    let extents = level_extents(key.extent, key.levels);
    let last = extents.len() - 1;

    let mut levels = Vec::with_capacity(extents.len());
    for (i, extent) in extents.into_iter().enumerate() {
        if let Some(level) = reusable.get(i).filter(|level| level.extent() == extent) {
            levels.push(*level);
            continue;
        }
        let mut target =
            |kind: &str| create_effect_target(ctx, &format!("Bloom.{kind}[{i}]"), extent, key.format, created);
        let pyramid = target("Pyramid")?;
        let blur = target("Blur")?;
        let accum = if i < last { Some(target("Accum")?) } else { None };
        levels.push(BloomLevel { pyramid, blur, accum });
    }
    Ok(levels)
}
