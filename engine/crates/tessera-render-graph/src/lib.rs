//! 后处理 pass 的执行以及一帧之内的录制顺序
//!
//! - `executor`：严格按照生成顺序执行 `PostEffectPass`
//! - `frame_driver`：shadow map -> screen buffer -> 后处理 -> 提交 -> 延迟销毁
//! - `post_effect`：内置的后处理效果（bloom / FXAA / 颜色拷贝）

pub mod executor;
pub mod frame_driver;
pub mod post_effect;
