pub mod constant_buffer;
pub mod depth_stencil;
pub mod gpu_resource;
pub mod handles;
pub mod index_buffer;
pub mod manager;
pub mod render_target;
pub mod resource_state;
pub mod shader_resource;
pub mod unordered_access;
