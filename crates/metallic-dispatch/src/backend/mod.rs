//! Device implementations.

#[cfg(target_os = "macos")]
pub mod metal;
pub mod sim;

#[cfg(target_os = "macos")]
pub use metal::MetalDevice;
pub use sim::{SimDevice, SimDeviceConfig};
