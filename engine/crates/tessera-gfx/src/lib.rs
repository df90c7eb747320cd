//! Tessera 的 GFX 层
//!
//! - `foundation`：设备抽象（`GfxDevice`）以及无 GPU 的 `HeadlessDevice`
//! - `descriptors`：固定容量的 descriptor slot 表和默认 sampler
//! - `commands`：命令录制、barrier、录制器池
//! - `resources`：资源状态、`GpuResource` 状态机、各类资源以及资源管理器

pub mod commands;
pub mod descriptors;
pub mod error;
pub mod foundation;
pub mod resources;
