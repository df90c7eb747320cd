//! 运行时配置
//!
//! 所有容量都在初始化时确定，之后不会再增长，因此需要在启动时给出足够大的值。
//! 配置可以从 TOML 读取，未出现的字段使用默认值。

use std::path::Path;

use ash::vk;
use serde::Deserialize;
use tessera_gfx::descriptors::descriptor_table::DescriptorCapacities;

use crate::frame_counter::FrameCounter;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// 每种 descriptor 表的容量
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DescriptorSettings {
    pub render_target: u32,
    pub depth_stencil: u32,
    pub shader_resource: u32,
    pub sampler: u32,
}
impl Default for DescriptorSettings {
    fn default() -> Self {
        let capacities = DescriptorCapacities::default();
        Self {
            render_target: capacities.render_target,
            depth_stencil: capacities.depth_stencil,
            shader_resource: capacities.shader_resource,
            sampler: capacities.sampler,
        }
    }
}
impl From<DescriptorSettings> for DescriptorCapacities {
    fn from(settings: DescriptorSettings) -> Self {
        Self {
            render_target: settings.render_target,
            depth_stencil: settings.depth_stencil,
            shader_resource: settings.shader_resource,
            sampler: settings.sampler,
        }
    }
}

/// ScreenBuffer 的默认配置
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScreenBufferSettings {
    #[serde(with = "format_by_name")]
    pub color_format: vk::Format,
    #[serde(with = "format_by_name")]
    pub depth_format: vk::Format,
    pub clear_color: glam::Vec4,
    pub clear_depth: f32,
    pub clear_stencil: u32,
}
impl Default for ScreenBufferSettings {
    fn default() -> Self {
        Self {
            color_format: vk::Format::B8G8R8A8_UNORM,
            depth_format: vk::Format::D24_UNORM_S8_UINT,
            clear_color: glam::Vec4::new(0.0, 0.0, 0.0, 1.0),
            clear_depth: 1.0,
            clear_stencil: 0,
        }
    }
}

/// ShadowMapBuffer 的默认配置
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShadowMapSettings {
    #[serde(with = "format_by_name")]
    pub depth_format: vk::Format,
    #[serde(with = "format_by_name")]
    pub shader_view_format: vk::Format,
    pub clear_depth: f32,
}
impl Default for ShadowMapSettings {
    fn default() -> Self {
        Self {
            depth_format: vk::Format::D32_SFLOAT,
            shader_view_format: vk::Format::R32_SFLOAT,
            clear_depth: 1.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct GfxSettings {
    pub descriptors: DescriptorSettings,
    /// 每个离屏缓冲独占一个录制器
    pub max_command_recorders: usize,
    /// 延迟销毁的资源需要等待的帧数
    pub resource_destroy_delay_frames: u64,
    pub screen_buffer: ScreenBufferSettings,
    pub shadow_map: ShadowMapSettings,
}
impl Default for GfxSettings {
    fn default() -> Self {
        Self {
            descriptors: DescriptorSettings::default(),
            max_command_recorders: 64,
            resource_destroy_delay_frames: FrameCounter::fif_count() as u64,
            screen_buffer: ScreenBufferSettings::default(),
            shadow_map: ShadowMapSettings::default(),
        }
    }
}
impl GfxSettings {
    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let settings = Self::from_toml_str(&text)?;
        log::info!("load gfx settings from {}", path.display());
        Ok(settings)
    }
}

/// 在配置文件中用名字表示 `vk::Format`
mod format_by_name {
    use ash::vk;
    use serde::{Deserialize, Deserializer};

    const FORMATS: &[(&str, vk::Format)] = &[
        ("R8G8B8A8_UNORM", vk::Format::R8G8B8A8_UNORM),
        ("R8G8B8A8_SRGB", vk::Format::R8G8B8A8_SRGB),
        ("B8G8R8A8_UNORM", vk::Format::B8G8R8A8_UNORM),
        ("B8G8R8A8_SRGB", vk::Format::B8G8R8A8_SRGB),
        ("R16G16B16A16_SFLOAT", vk::Format::R16G16B16A16_SFLOAT),
        ("R32G32B32A32_SFLOAT", vk::Format::R32G32B32A32_SFLOAT),
        ("R16_UNORM", vk::Format::R16_UNORM),
        ("R32_SFLOAT", vk::Format::R32_SFLOAT),
        ("D16_UNORM", vk::Format::D16_UNORM),
        ("D32_SFLOAT", vk::Format::D32_SFLOAT),
        ("D24_UNORM_S8_UINT", vk::Format::D24_UNORM_S8_UINT),
        ("D32_SFLOAT_S8_UINT", vk::Format::D32_SFLOAT_S8_UINT),
    ];

    pub fn parse(name: &str) -> Option<vk::Format> {
        FORMATS.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, f)| *f)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<vk::Format, D::Error> {
        let name = String::deserialize(deserializer)?;
        parse(&name).ok_or_else(|| serde::de::Error::custom(format!("unknown format '{name}'")))
    }
}
