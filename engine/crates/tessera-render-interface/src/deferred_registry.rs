//! 两阶段销毁的注册表
//!
//! `mark_destroy` 只修改元数据；`take_committed` 在每帧的安全点调用，
//! 把被标记的条目真正移出注册表并交给调用方释放。

use itertools::Itertools;
use slotmap::{Key, SlotMap};

pub struct DeferredDestroyRegistry<K: Key, T> {
    entries: SlotMap<K, T>,
    pending_destroy: Vec<K>,
}
impl<K: Key, T> Default for DeferredDestroyRegistry<K, T> {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl<K: Key, T> DeferredDestroyRegistry<K, T> {
    pub fn new() -> Self {
        Self {
            entries: SlotMap::with_key(),
            pending_destroy: Vec::new(),
        }
    }
}
// 注册与查询
impl<K: Key, T> DeferredDestroyRegistry<K, T> {
    #[inline]
    pub fn insert(&mut self, value: T) -> K {
        self.entries.insert(value)
    }
    /// 被标记但尚未提交的条目仍然存在
    #[inline]
    pub fn contains(&self, key: K) -> bool {
        self.entries.contains_key(key)
    }
    #[inline]
    pub fn get(&self, key: K) -> Option<&T> {
        self.entries.get(key)
    }
    #[inline]
    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.entries.get_mut(key)
    }
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    #[inline]
    pub fn is_pending_destroy(&self, key: K) -> bool {
        self.pending_destroy.contains(&key)
    }

    /// 未被标记销毁的条目的 key，按 slot 顺序
    pub fn live_keys(&self) -> Vec<K> {
        self.entries
            .keys()
            .filter(|key| !self.pending_destroy.contains(key))
            .collect_vec()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.entries.iter()
    }
}
// 两阶段销毁
impl<K: Key + Ord, T> DeferredDestroyRegistry<K, T> {
    /// 标记为待销毁
    ///
    /// # 返回
    /// 这次调用是否新增了标记；重复标记或 key 不存在时返回 `false`
    pub fn mark_destroy(&mut self, key: K) -> bool {
        if !self.entries.contains_key(key) || self.pending_destroy.contains(&key) {
            return false;
        }
        self.pending_destroy.push(key);
        true
    }

    /// 取出所有被标记的条目，去重并按 key 排序
    pub fn take_committed(&mut self) -> Vec<(K, T)> {
        let mut pending = std::mem::take(&mut self.pending_destroy);
        pending.sort();
        pending.dedup();

        pending
            .into_iter()
            .filter_map(|key| self.entries.remove(key).map(|value| (key, value)))
            .collect_vec()
    }

    /// 无视标记，取出所有条目（用于整体销毁）
    pub fn drain(&mut self) -> Vec<(K, T)> {
        self.pending_destroy.clear();
        self.entries.drain().collect_vec()
    }
}
