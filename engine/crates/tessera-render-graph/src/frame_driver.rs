//! 一帧之内离屏缓冲的驱动顺序
//!
//! ```text
//! begin_frame -> (外部录制场景) -> record_post_effects -> end_frame -> (提交) -> commit
//! ```
//!
//! 提交顺序固定为：一次性命令 -> 阴影贴图 -> 屏幕缓冲，
//! 后者会采样前者的结果。

use tessera_gfx::commands::command_recorder::RecordedBatch;
use tessera_gfx::error::GfxError;
use tessera_render_interface::gfx_context::{GfxContext, GfxParts};
use tessera_render_interface::persistent_pass::PersistentPassRegistry;
use tessera_render_interface::screen_buffer::{ScreenBufferHandle, ScreenBufferManager};
use tessera_render_interface::shadow_map_buffer::{ShadowMapBufferHandle, ShadowMapBufferManager};

use crate::executor::{PostEffectExecutor, PostEffectReport};

/// 一帧需要提交的全部录制结果，按提交顺序排列
#[derive(Debug, Default)]
pub struct FrameSubmission {
    pub frame_id: u64,
    pub batches: Vec<RecordedBatch>,
}
impl FrameSubmission {
    #[inline]
    pub fn batch_names(&self) -> Vec<&str> {
        self.batches.iter().map(|batch| batch.name.as_str()).collect()
    }
}

#[derive(Default)]
pub struct FrameDriver {
    executor: PostEffectExecutor,

    recording_screens: Vec<ScreenBufferHandle>,
    recording_shadows: Vec<ShadowMapBufferHandle>,
}
// new & init
impl FrameDriver {
    pub fn new(executor: PostEffectExecutor) -> Self {
        Self {
            executor,
            recording_screens: Vec::new(),
            recording_shadows: Vec::new(),
        }
    }
}
// getter
impl FrameDriver {
    #[inline]
    pub fn executor(&self) -> &PostEffectExecutor {
        &self.executor
    }
    #[inline]
    pub fn executor_mut(&mut self) -> &mut PostEffectExecutor {
        &mut self.executor
    }
    /// 这一帧成功开始录制的屏幕缓冲
    #[inline]
    pub fn recording_screens(&self) -> &[ScreenBufferHandle] {
        &self.recording_screens
    }
    #[inline]
    pub fn recording_shadows(&self) -> &[ShadowMapBufferHandle] {
        &self.recording_shadows
    }
}
// update
impl FrameDriver {
    /// 所有离屏缓冲开始录制；开始失败的缓冲这一帧被跳过
    pub fn begin_frame(
        &mut self,
        ctx: &mut GfxContext,
        screens: &mut ScreenBufferManager,
        shadows: &mut ShadowMapBufferManager,
    ) {
        if !self.recording_screens.is_empty() || !self.recording_shadows.is_empty() {
            log::warn!("begin_frame called twice without end_frame");
        }

        self.recording_shadows = shadows.all_begin_record(ctx);
        self.recording_screens = screens.all_begin_record(ctx);
        log::trace!(
            "[{}] recording {} shadow maps, {} screen buffers",
            ctx.frame_counter().frame_name(),
            self.recording_shadows.len(),
            self.recording_screens.len()
        );
    }

    /// 在每个正在录制的屏幕缓冲的录制器上执行它的后处理
    pub fn record_post_effects(
        &mut self,
        ctx: &mut GfxContext,
        screens: &mut ScreenBufferManager,
    ) -> Vec<(ScreenBufferHandle, PostEffectReport)> {
        let mut reports = Vec::new();
        for &handle in &self.recording_screens {
            if !screens.has_post_effects(handle) {
                continue;
            }
            let Some(recorder) = screens.get(handle).filter(|b| b.is_recording()).map(|b| b.recorder_id()) else {
                continue;
            };

            let passes = screens.build_post_effect_passes(handle, ctx);
            let GfxParts {
                resources,
                recorders,
                samplers,
                ..
            } = match ctx.parts_mut() {
                Ok(parts) => parts,
                Err(err) => {
                    log::error!("record post effects failed: {err}");
                    break;
                }
            };
            let target = screens.pass_target(handle, resources);
            let Some(cmd) = recorders.get_mut(recorder) else {
                log::warn!("{}", GfxError::RecorderNotRecording { recorder });
                continue;
            };

            let report = self.executor.execute(&passes, cmd, resources, samplers, target.as_ref());
            reports.push((handle, report));
        }
        reports
    }

    /// 结束所有录制，按提交顺序收集结果
    pub fn end_frame(
        &mut self,
        ctx: &mut GfxContext,
        screens: &mut ScreenBufferManager,
        shadows: &mut ShadowMapBufferManager,
    ) -> FrameSubmission {
        let mut batches = ctx.take_pending_submissions();
        batches.extend(shadows.all_end_record(ctx));
        batches.extend(screens.all_end_record(ctx));

        self.recording_screens.clear();
        self.recording_shadows.clear();

        FrameSubmission {
            frame_id: ctx.frame_counter().frame_id(),
            batches,
        }
    }

    /// 提交之后调用：释放被通知销毁的缓冲，推进帧号，清理到期资源
    pub fn commit(
        &mut self,
        ctx: &mut GfxContext,
        screens: &mut ScreenBufferManager,
        shadows: &mut ShadowMapBufferManager,
        persistent: &mut PersistentPassRegistry,
    ) {
        let released = screens.commit_destroy(ctx, persistent) + shadows.commit_destroy(ctx);
        if released > 0 {
            log::debug!("released {released} offscreen buffers");
        }
        ctx.end_frame();
    }
}
