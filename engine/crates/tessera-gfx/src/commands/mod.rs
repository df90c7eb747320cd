pub mod barrier;
pub mod command_recorder;
pub mod recorder_pool;
