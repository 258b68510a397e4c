// Error taxonomy for the rendering backend
//
// Everything in here is fatal: there is no local recovery or retry in the
// backend. Errors travel as `anyhow::Error`; callers that care about the
// kind can `downcast_ref::<RenderError>()`.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

use super::ShaderStage;

#[derive(Debug, Error)]
pub enum RenderError {
    /// Creating an instance/device/swapchain/pipeline-level object failed
    #[error("failed to create {stage}: {result}")]
    Init {
        stage: &'static str,
        result: vk::Result,
    },

    #[error("no Vulkan-capable GPU found")]
    NoSuitableDevice,

    #[error("selected GPU has no graphics-capable queue family")]
    NoGraphicsQueueFamily,

    #[error("no queue family can present to the surface from the graphics queue")]
    NoPresentQueueFamily,

    #[error("selected GPU does not support device extension {0}")]
    MissingDeviceExtension(String),

    #[error("shader not found: {}", .0.display())]
    ShaderNotFound(PathBuf),

    #[error("failed to read shader {}: {source}", path.display())]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is a {found:?} shader, expected {expected:?}", path.display())]
    WrongShaderStage {
        path: PathBuf,
        expected: ShaderStage,
        found: ShaderStage,
    },

    #[error("swapchain is out of date (surface changed underneath it)")]
    SwapchainOutOfDate,

    #[error("{operation} called while frame is {phase}")]
    FrameOrder {
        operation: &'static str,
        phase: &'static str,
    },

    #[error("in-flight fence was reset but never submitted; waiting on it would hang")]
    FenceDeadlock,

    #[error("{operation} failed: {result}")]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
    },
}

impl RenderError {
    /// Map a creation failure into a fatal init error
    pub fn init(stage: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Init { stage, result }
    }

    /// Map a runtime failure into a fatal error, keeping out-of-date apart
    pub fn vulkan(operation: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| match check(result, operation) {
            Err(err) => err,
            Ok(()) => Self::Vulkan { operation, result },
        }
    }
}

/// Convert a raw result code into a `Result`.
///
/// `INCOMPLETE` only means a query had more data than the buffer we passed;
/// we always size buffers from a count query first, so it counts as success.
pub fn check(result: vk::Result, operation: &'static str) -> Result<(), RenderError> {
    match result {
        vk::Result::SUCCESS | vk::Result::INCOMPLETE => Ok(()),
        vk::Result::ERROR_OUT_OF_DATE_KHR => Err(RenderError::SwapchainOutOfDate),
        result => Err(RenderError::Vulkan { operation, result }),
    }
}
