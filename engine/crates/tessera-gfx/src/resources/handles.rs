slotmap::new_key_type! {
    /// 资源管理器中任意一种 GPU 资源的句柄
    pub struct GfxResourceHandle;
}
