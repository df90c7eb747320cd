//! GPU 的边界
//!
//! `GfxContext` 是显式传递的上下文，持有设备、descriptor 表、录制器池和资源管理器。
//! 在它之上提供两种离屏缓冲（`ScreenBuffer` / `ShadowMapBuffer`）、延迟销毁注册表、
//! 常驻 pass 注册表，以及后处理 pass 的描述方式。

pub mod deferred_registry;
pub mod frame_counter;
pub mod gfx_context;
pub mod persistent_pass;
pub mod post_effect;
pub mod screen_buffer;
pub mod settings;
pub mod shadow_map_buffer;
