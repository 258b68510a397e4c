// Backend module - Vulkan abstraction layer
//
// Design: thin wrappers around ash, one per resource kind, each releasing
// what it created on every exit path.
// Lifetimes: instance -> device -> swapchain -> pipeline, torn down in reverse.

pub mod context;
pub mod debug;
pub mod device;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod release;
pub mod selection;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use context::{GraphicsContext, InstanceScope};
pub use debug::Diagnostics;
pub use device::{LogicalDevice, PhysicalDevice};
pub use error::RenderError;
pub use pipeline::{Pipeline, PipelineDesc};
pub use release::ReleaseStack;
pub use shader::{ShaderModule, ShaderStage};
pub use swapchain::Swapchain;
pub use sync::FrameSync;
