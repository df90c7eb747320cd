pub mod descriptor_table;
pub mod sampler;
