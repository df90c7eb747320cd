//! 后处理 pass 执行器
//!
//! pass 之间的依赖只由生成顺序表达，这里不做任何排序或者合并，
//! 只是把每个 pass 翻译成录制器上的命令：
//! begin -> pipeline -> 常量 -> 绑定 -> draw -> end

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use tessera_gfx::commands::command_recorder::CommandRecorder;
use tessera_gfx::descriptors::descriptor_table::GpuDescriptorHandle;
use tessera_gfx::descriptors::sampler::{DefaultSampler, SamplerTable};
use tessera_gfx::resources::manager::GfxResourceManager;
use tessera_render_interface::post_effect::{
    PassRecordContext, PassTarget, PostEffectPass, RenderCommand, ShaderVariableBinder,
};

/// 每个 pipeline 声明的 shader 变量名
///
/// 没有声明过的 pipeline 接受任意名字
#[derive(Default)]
pub struct ShaderVariableTable {
    pipelines: HashMap<String, HashSet<String>>,
}
impl ShaderVariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare<I, S>(&mut self, pipeline_name: impl Into<String>, variables: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pipelines
            .insert(pipeline_name.into(), variables.into_iter().map(Into::into).collect());
    }

    #[inline]
    pub fn variables(&self, pipeline_name: &str) -> Option<&HashSet<String>> {
        self.pipelines.get(pipeline_name)
    }
}

/// 把绑定直接录制为 `BindDescriptor` 命令
pub struct RecordingBinder<'a> {
    cmd: &'a mut CommandRecorder,
    samplers: &'a SamplerTable,
    variables: Option<&'a HashSet<String>>,
}
impl<'a> RecordingBinder<'a> {
    pub fn new(cmd: &'a mut CommandRecorder, samplers: &'a SamplerTable, variables: Option<&'a HashSet<String>>) -> Self {
        Self {
            cmd,
            samplers,
            variables,
        }
    }
}
impl ShaderVariableBinder for RecordingBinder<'_> {
    fn bind_descriptor(&mut self, name: &str, handle: GpuDescriptorHandle) -> bool {
        if handle.is_null() {
            log::warn!("bind null descriptor to '{name}'");
            return false;
        }
        if !self.contains(name) {
            log::warn!("pipeline has no shader variable '{name}'");
            return false;
        }
        self.cmd.bind_descriptor(name, handle);
        true
    }

    fn bind_sampler(&mut self, name: &str, sampler: DefaultSampler) -> bool {
        let handle = self.samplers.gpu_handle(sampler);
        self.bind_descriptor(name, handle)
    }

    fn contains(&self, name: &str) -> bool {
        self.variables.is_none_or(|variables| variables.contains(name))
    }
}

/// 一次执行的结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostEffectReport {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
}
impl PostEffectReport {
    #[inline]
    pub fn pass_count(&self) -> usize {
        self.executed.len() + self.skipped.len()
    }
}

enum PassOutcome {
    Executed,
    Skipped,
    NotBegun,
}

#[derive(Default)]
pub struct PostEffectExecutor {
    variables: ShaderVariableTable,
}
// new & init
impl PostEffectExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables(variables: ShaderVariableTable) -> Self {
        Self { variables }
    }
}
// getter
impl PostEffectExecutor {
    #[inline]
    pub fn variables(&self) -> &ShaderVariableTable {
        &self.variables
    }
    #[inline]
    pub fn variables_mut(&mut self) -> &mut ShaderVariableTable {
        &mut self.variables
    }
}
// tools
impl PostEffectExecutor {
    /// 按顺序执行所有 pass
    ///
    /// 没有 begin 函数的 pass 绘制到 `default_target`（owner buffer 的写入面）上。
    /// 绑定或者绘制失败时只跳过这个 pass，begin 成功时 end 总会被调用；
    /// begin 失败时后面的 pass 会读到没有写入过的目标，整条链都跳过。
    pub fn execute(
        &self,
        passes: &[PostEffectPass],
        cmd: &mut CommandRecorder,
        resources: &mut GfxResourceManager,
        samplers: &SamplerTable,
        default_target: Option<&PassTarget>,
    ) -> PostEffectReport {
        let mut report = PostEffectReport::default();
        for (i, pass) in passes.iter().enumerate() {
            match self.execute_pass(pass, cmd, resources, samplers, default_target) {
                PassOutcome::Executed => report.executed.push(pass.pass_name.clone()),
                PassOutcome::Skipped => {
                    log::debug!("skip post effect pass '{}' ({})", pass.pass_name, pass.pipeline_name);
                    report.skipped.push(pass.pass_name.clone());
                }
                PassOutcome::NotBegun => {
                    log::warn!(
                        "post effect pass '{}' failed to begin, skip {} remaining passes",
                        pass.pass_name,
                        passes.len() - i
                    );
                    report.skipped.extend(passes[i..].iter().map(|rest| rest.pass_name.clone()));
                    break;
                }
            }
        }
        report
    }

    fn execute_pass(
        &self,
        pass: &PostEffectPass,
        cmd: &mut CommandRecorder,
        resources: &mut GfxResourceManager,
        samplers: &SamplerTable,
        default_target: Option<&PassTarget>,
    ) -> PassOutcome {
        let began = {
            let mut ctx = PassRecordContext {
                cmd: &mut *cmd,
                resources: &mut *resources,
            };
            match (&pass.begin_record, default_target) {
                (Some(begin), _) => begin(&mut ctx),
                (None, Some(target)) => {
                    ctx.bind_pass_target(target);
                    true
                }
                (None, None) => {
                    log::warn!("post effect pass '{}' has no target", pass.pass_name);
                    false
                }
            }
        };
        if !began {
            return PassOutcome::NotBegun;
        }

        let drawn = self.record_body(pass, cmd, samplers);

        let ended = match &pass.end_record {
            Some(end) => end(&mut PassRecordContext {
                cmd: &mut *cmd,
                resources: &mut *resources,
            }),
            None => true,
        };
        if drawn && ended {
            PassOutcome::Executed
        } else {
            PassOutcome::Skipped
        }
    }

    fn record_body(&self, pass: &PostEffectPass, cmd: &mut CommandRecorder, samplers: &SamplerTable) -> bool {
        cmd.set_pipeline(pass.pipeline_name.as_str());

        if !pass.constant_buffer_requirements.is_empty() {
            let mut buffers = pass
                .constant_buffer_requirements
                .iter()
                .map(|requirement| vec![0u8; requirement.size])
                .collect_vec();
            if let Some(update) = &pass.update_constant_buffers {
                if !update(buffers.as_mut_slice()) {
                    return false;
                }
            }
            for (requirement, data) in pass.constant_buffer_requirements.iter().zip(buffers) {
                cmd.set_constants(requirement.name.as_str(), data);
            }
        }

        if let Some(bind) = &pass.bind_resources {
            let mut binder = RecordingBinder::new(cmd, samplers, self.variables.variables(&pass.pipeline_name));
            if !bind(&mut binder) {
                return false;
            }
        }

        let Some(command) = pass.render_command.as_ref().and_then(|render| render()) else {
            return false;
        };
        match command {
            RenderCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
            } => cmd.draw(vertex_count, instance_count, first_vertex),
            RenderCommand::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
            } => cmd.draw_indexed(index_count, instance_count, first_index, vertex_offset),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;
    use tessera_crate_tools::init_log::init_test_log;
    use tessera_gfx::commands::command_recorder::{CommandRecorderId, GfxCommand};
    use tessera_gfx::descriptors::descriptor_table::{CpuDescriptorHandle, DescriptorCapacities, DescriptorTables};
    use tessera_gfx::foundation::headless_device::HeadlessDevice;
    use tessera_gfx::resources::gpu_resource::GfxResource;
    use tessera_gfx::resources::manager::GfxResourceEntry;
    use tessera_gfx::resources::render_target::{GfxRenderTargetDesc, RenderTargetResource};
    use tessera_gfx::resources::resource_state::GfxResourceState;

    struct Fixture {
        device: HeadlessDevice,
        tables: DescriptorTables,
        samplers: Option<SamplerTable>,
        resources: GfxResourceManager,
        cmd: CommandRecorder,
    }
    impl Fixture {
        fn new() -> Self {
            init_test_log();
            let mut device = HeadlessDevice::new();
            let mut tables = DescriptorTables::new(&device, &DescriptorCapacities::default());
            let samplers = SamplerTable::new(&mut device, &mut tables);
            let mut cmd = CommandRecorder::new(CommandRecorderId(3), "post");
            cmd.begin();
            Self {
                device,
                tables,
                samplers: Some(samplers),
                resources: GfxResourceManager::new(),
                cmd,
            }
        }

        fn render_target(&mut self) -> tessera_gfx::resources::handles::GfxResourceHandle {
            let rt = RenderTargetResource::new(
                &mut self.device,
                &mut self.tables,
                &GfxRenderTargetDesc {
                    extent: vk::Extent2D { width: 4, height: 4 },
                    format: vk::Format::R16G16B16A16_SFLOAT,
                    clear_color: [0.0; 4],
                },
                "intermediate",
            )
            .unwrap();
            self.resources.register(GfxResourceEntry::RenderTarget(rt))
        }

        fn execute(&mut self, executor: &PostEffectExecutor, passes: &[PostEffectPass]) -> PostEffectReport {
            let target = PassTarget {
                color: CpuDescriptorHandle(0xC0),
                depth: None,
                extent: vk::Extent2D { width: 8, height: 8 },
            };
            executor.execute(
                passes,
                &mut self.cmd,
                &mut self.resources,
                self.samplers.as_ref().unwrap(),
                Some(&target),
            )
        }

        fn finish(mut self) {
            self.resources.destroy_all(&mut self.device, &mut self.tables);
            self.samplers.take().unwrap().destroy(&mut self.tables);
            assert_eq!(self.tables.live_total(), 0);
        }
    }

    fn fullscreen(name: &str) -> PostEffectPass {
        PostEffectPass::new(format!("Pipeline.{name}"), name).with_render_command(|| Some(RenderCommand::draw(3)))
    }

    #[test]
    fn test_passes_run_in_emission_order() {
        let mut fixture = Fixture::new();
        let target = fixture.render_target();
        let source = GpuDescriptorHandle(0x1000);

        let passes = vec![
            fullscreen("First")
                .with_render_target(target)
                .with_bind_resources(move |binder| binder.bind_descriptor("Pixel:gTexture", source)),
            fullscreen("Second")
                .with_constant_buffer("Pixel:CB", 8)
                .with_update_constant_buffers(|buffers| {
                    buffers[0].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
                    true
                })
                .with_bind_resources(|binder| binder.bind_sampler("Pixel:gSampler", DefaultSampler::LinearClamp)),
        ];

        let report = fixture.execute(&PostEffectExecutor::new(), &passes);
        assert_eq!(report.executed, ["First", "Second"]);
        assert!(report.skipped.is_empty());

        let pipelines = fixture
            .cmd
            .commands()
            .iter()
            .filter_map(|c| match c {
                GfxCommand::SetPipeline { name } => Some(name.as_str()),
                _ => None,
            })
            .collect_vec();
        assert_eq!(pipelines, ["Pipeline.First", "Pipeline.Second"]);

        // 中间目标：begin 切换为写入，end 切换为被采样
        assert_eq!(
            fixture.resources.get(target).unwrap().state(),
            GfxResourceState::SHADER_READ_FRAGMENT
        );
        // 第二个 pass 没有 begin，绘制到默认目标
        assert!(fixture.cmd.commands().iter().any(|c| matches!(
            c,
            GfxCommand::SetRenderTargets { colors, .. } if colors == &[CpuDescriptorHandle(0xC0)]
        )));
        assert!(fixture.cmd.commands().contains(&GfxCommand::SetConstants {
            name: "Pixel:CB".to_string(),
            data: vec![1, 2, 3, 4, 5, 6, 7, 8],
        }));
        assert_eq!(
            fixture
                .cmd
                .commands()
                .iter()
                .filter(|c| matches!(c, GfxCommand::Draw { .. }))
                .count(),
            2
        );

        fixture.finish();
    }

    #[test]
    fn test_failed_binding_skips_draw_but_ends_target() {
        let mut fixture = Fixture::new();
        let target = fixture.render_target();

        let passes = vec![
            fullscreen("NullInput")
                .with_render_target(target)
                .with_bind_resources(|binder| binder.bind_descriptor("Pixel:gTexture", GpuDescriptorHandle::NULL)),
            PostEffectPass::new("Pipeline.NoDraw", "NoDraw"),
        ];

        let report = fixture.execute(&PostEffectExecutor::new(), &passes);
        assert!(report.executed.is_empty());
        assert_eq!(report.skipped, ["NullInput", "NoDraw"]);
        assert_eq!(report.pass_count(), 2);
        assert!(!fixture.cmd.commands().iter().any(|c| matches!(c, GfxCommand::Draw { .. })));
        assert_eq!(
            fixture.resources.get(target).unwrap().state(),
            GfxResourceState::SHADER_READ_FRAGMENT
        );

        fixture.finish();
    }

    #[test]
    fn test_declared_variables_limit_bindings() {
        let mut fixture = Fixture::new();
        let mut variables = ShaderVariableTable::new();
        variables.declare("Pipeline.Copy", ["Pixel:gTexture"]);
        let executor = PostEffectExecutor::with_variables(variables);

        let passes = vec![
            fullscreen("Copy").with_bind_resources(|binder| {
                assert!(binder.contains("Pixel:gTexture"));
                assert!(!binder.contains("Pixel:gSampler"));
                binder.bind_sampler("Pixel:gSampler", DefaultSampler::LinearClamp)
            }),
        ];

        let report = fixture.execute(&executor, &passes);
        assert_eq!(report.skipped, ["Copy"]);
        assert!(!fixture.cmd.commands().iter().any(|c| matches!(c, GfxCommand::BindDescriptor { .. })));

        fixture.finish();
    }

    #[test]
    fn test_failed_begin_stops_the_chain() {
        let mut fixture = Fixture::new();
        let target = fixture.render_target();

        let passes = vec![
            fullscreen("Before"),
            fullscreen("Broken").with_begin_record(|_| false),
            fullscreen("ReadsBroken")
                .with_render_target(target)
                .with_bind_resources(|binder| binder.bind_descriptor("Pixel:gTexture", GpuDescriptorHandle(0x2000))),
            fullscreen("Composite"),
        ];

        let report = fixture.execute(&PostEffectExecutor::new(), &passes);
        assert_eq!(report.executed, ["Before"]);
        assert_eq!(report.skipped, ["Broken", "ReadsBroken", "Composite"]);
        assert_eq!(report.pass_count(), passes.len());

        let pipelines = fixture
            .cmd
            .commands()
            .iter()
            .filter_map(|c| match c {
                GfxCommand::SetPipeline { name } => Some(name.as_str()),
                _ => None,
            })
            .collect_vec();
        assert_eq!(pipelines, ["Pipeline.Before"]);
        // 后面的中间目标没有被 begin
        assert_eq!(
            fixture.resources.get(target).unwrap().state(),
            GfxResourceState::COLOR_ATTACHMENT_WRITE
        );

        fixture.finish();
    }
}
