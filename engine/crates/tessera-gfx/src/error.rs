use crate::commands::command_recorder::CommandRecorderId;
use crate::descriptors::descriptor_table::DescriptorKind;

/// GFX 层的错误
///
/// 容量耗尽（descriptor / recorder）属于静态配置错误，调用方通常直接 panic；
/// 其余错误会沿着 `Result` 传播，由 frame driver 决定跳过当前帧的某个 buffer。
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    #[error("gfx context is not initialized")]
    NotInitialized,

    #[error("descriptor table {kind:?} exhausted (capacity {capacity})")]
    DescriptorTableExhausted { kind: DescriptorKind, capacity: u32 },

    #[error("command recorder pool exhausted (capacity {capacity})")]
    RecorderPoolExhausted { capacity: usize },

    #[error("resource '{resource}' has no command recorder attached")]
    NoRecorderAttached { resource: String },

    #[error("resource '{resource}' is attached to recorder {attached:?}, but {used:?} was used")]
    RecorderMismatch {
        resource: String,
        attached: CommandRecorderId,
        used: CommandRecorderId,
    },

    #[error("failed to reset command recorder {recorder:?}")]
    RecorderResetFailed { recorder: CommandRecorderId },

    #[error("command recorder {recorder:?} is not recording")]
    RecorderNotRecording { recorder: CommandRecorderId },

    #[error("failed to allocate gpu memory for '{name}': {reason}")]
    AllocationFailed { name: String, reason: String },

    #[error("invalid extent {width}x{height}")]
    InvalidExtent { width: u32, height: u32 },

    #[error("resource handle does not exist")]
    ResourceNotFound,

    #[error("'{resource}' is busy with an active recording")]
    ResourceBusy { resource: String },

    #[error("'{resource}' is pending destroy")]
    PendingDestroy { resource: String },

    #[error("write to '{name}' out of range: offset {offset} + {len} > {size}")]
    BufferWriteOutOfRange { name: String, offset: u64, len: u64, size: u64 },
}

pub type GfxResult<T> = Result<T, GfxError>;
