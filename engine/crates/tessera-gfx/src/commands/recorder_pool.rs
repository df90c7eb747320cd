use crate::commands::command_recorder::{CommandRecorder, CommandRecorderId};
use crate::error::{GfxError, GfxResult};
use crate::foundation::device::GfxDevice;

/// 固定容量的录制器池
///
/// 每个 offscreen buffer 在创建时从这里独占一个录制器，销毁时归还。
pub struct CommandRecorderPool {
    recorders: Vec<CommandRecorder>,
    in_use: Vec<bool>,
    /// 空闲 id，从尾部弹出
    free_ids: Vec<u32>,
}
// new & init
impl CommandRecorderPool {
    pub fn new(capacity: usize) -> Self {
        let recorders = (0..capacity as u32)
            .map(|id| CommandRecorder::new(CommandRecorderId(id), format!("recorder-{id}")))
            .collect();

        Self {
            recorders,
            in_use: vec![false; capacity],
            free_ids: (0..capacity as u32).rev().collect(),
        }
    }
}
// tools
impl CommandRecorderPool {
    /// 独占一个录制器
    pub fn try_acquire(&mut self, name: impl Into<String>) -> GfxResult<CommandRecorderId> {
        let Some(id) = self.free_ids.pop() else {
            return Err(GfxError::RecorderPoolExhausted {
                capacity: self.capacity(),
            });
        };

        let recorder = &mut self.recorders[id as usize];
        recorder.reset();
        recorder.set_name(name);
        self.in_use[id as usize] = true;
        Ok(CommandRecorderId(id))
    }

    /// 归还录制器；重复归还会被忽略
    pub fn release(&mut self, id: CommandRecorderId) {
        let Some(in_use) = self.in_use.get_mut(id.0 as usize) else {
            log::warn!("release unknown recorder {id:?}");
            return;
        };
        if !*in_use {
            log::warn!("recorder {id:?} released twice");
            return;
        }

        *in_use = false;
        self.recorders[id.0 as usize].reset();
        self.free_ids.push(id.0);
    }

    /// 重置命令分配器并开始录制
    pub fn begin(&mut self, id: CommandRecorderId, device: &mut dyn GfxDevice) -> GfxResult<&mut CommandRecorder> {
        if !self.is_in_use(id) {
            return Err(GfxError::RecorderNotRecording { recorder: id });
        }
        device.reset_command_allocator(id)?;

        let recorder = &mut self.recorders[id.0 as usize];
        recorder.begin();
        Ok(recorder)
    }
}
// getter
impl CommandRecorderPool {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.recorders.len()
    }
    #[inline]
    pub fn in_use_count(&self) -> usize {
        self.capacity() - self.free_ids.len()
    }
    #[inline]
    pub fn is_in_use(&self, id: CommandRecorderId) -> bool {
        self.in_use.get(id.0 as usize).copied().unwrap_or(false)
    }
    #[inline]
    pub fn get(&self, id: CommandRecorderId) -> Option<&CommandRecorder> {
        if self.is_in_use(id) { self.recorders.get(id.0 as usize) } else { None }
    }
    #[inline]
    pub fn get_mut(&mut self, id: CommandRecorderId) -> Option<&mut CommandRecorder> {
        if self.is_in_use(id) { self.recorders.get_mut(id.0 as usize) } else { None }
    }
}
