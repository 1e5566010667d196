//! Audio path: ring buffer feeding and real-time output

#[cfg(feature = "device")]
pub mod device;
pub mod interleave;
pub mod output;
pub mod renderer;

#[cfg(feature = "device")]
pub use device::DeviceOutput;
pub use output::{AudioBackend, NullOutput, OutputClock, OutputPump};
pub use renderer::{AudioBufferSettings, AudioRenderer, AudioRendererStats};
