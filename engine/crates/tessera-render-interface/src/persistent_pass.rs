use slotmap::SlotMap;

use crate::screen_buffer::ScreenBufferHandle;

slotmap::new_key_type! {
    pub struct PersistentPassHandle;
}

/// 一个常驻的 ScreenBuffer pass：每帧都会把 buffer 的内容重新合成一次
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScreenBufferPass {
    pub screen_buffer: ScreenBufferHandle,
    pub pipeline_name: String,
    pub pass_name: String,
    pub batch_key: u64,
}

/// 常驻 pass 的注册表，由 Renderer 持有
#[derive(Default)]
pub struct PersistentPassRegistry {
    passes: SlotMap<PersistentPassHandle, ScreenBufferPass>,
    /// 注册顺序，Renderer 按这个顺序执行
    order: Vec<PersistentPassHandle>,
}
// new & init
impl PersistentPassRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}
// tools
impl PersistentPassRegistry {
    pub fn register(&mut self, pass: ScreenBufferPass) -> PersistentPassHandle {
        let handle = self.passes.insert(pass);
        self.order.push(handle);
        handle
    }

    /// # 返回
    /// handle 是否存在
    pub fn unregister(&mut self, handle: PersistentPassHandle) -> bool {
        if self.passes.remove(handle).is_none() {
            return false;
        }
        self.order.retain(|h| *h != handle);
        true
    }
}
// getter
impl PersistentPassRegistry {
    #[inline]
    pub fn get(&self, handle: PersistentPassHandle) -> Option<&ScreenBufferPass> {
        self.passes.get(handle)
    }
    #[inline]
    pub fn len(&self) -> usize {
        self.passes.len()
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
    /// 按注册顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = (PersistentPassHandle, &ScreenBufferPass)> {
        self.order.iter().filter_map(|h| self.passes.get(*h).map(|pass| (*h, pass)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::Key;

    fn pass(name: &str) -> ScreenBufferPass {
        ScreenBufferPass {
            screen_buffer: ScreenBufferHandle::null(),
            pipeline_name: "Screen.Copy".to_string(),
            pass_name: name.to_string(),
            batch_key: 0,
        }
    }

    #[test]
    fn test_registration_order_survives_removal() {
        let mut registry = PersistentPassRegistry::new();
        let a = registry.register(pass("a"));
        let b = registry.register(pass("b"));
        let c = registry.register(pass("c"));

        assert!(registry.unregister(b));
        assert!(!registry.unregister(b));
        let d = registry.register(pass("d"));

        let names: Vec<_> = registry.iter().map(|(_, p)| p.pass_name.as_str()).collect();
        assert_eq!(names, ["a", "c", "d"]);
        assert!(registry.get(a).is_some() && registry.get(c).is_some() && registry.get(d).is_some());
        assert_eq!(registry.len(), 3);
    }
}
