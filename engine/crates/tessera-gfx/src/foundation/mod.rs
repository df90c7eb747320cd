pub mod device;
pub mod headless_device;
