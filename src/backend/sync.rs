// Synchronization primitives for the single in-flight frame
//
// One fence for CPU/GPU handoff, one semaphore for "image acquired", one for
// "render finished", plus the command pool and the one command buffer the
// fence guards.

use anyhow::Result;
use ash::vk;

use super::{ReleaseStack, RenderError};

/// The pool itself is only reachable through the release stack
pub struct FrameSync {
    pub command_buffer: vk::CommandBuffer,
    pub image_acquired: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    /// Start signaled: the first frame has no previous frame to wait for
    pub const FENCE_FLAGS: vk::FenceCreateFlags = vk::FenceCreateFlags::SIGNALED;

    /// Everything created here is registered on `release`.
    pub fn new(device: &ash::Device, queue_family: u32, release: &mut ReleaseStack) -> Result<Self> {
        // RESET: the one command buffer is re-recorded every frame
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(RenderError::init("command pool"))?;
        {
            let device = device.clone();
            release.push("command pool", move || unsafe {
                device.destroy_command_pool(command_pool, None)
            });
        }

        // Freed together with the pool
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(RenderError::init("command buffer"))?[0];

        let image_acquired = create_semaphore(device, release, "image acquired semaphore")?;
        let render_finished = create_semaphore(device, release, "render finished semaphore")?;

        let fence_info = vk::FenceCreateInfo::builder().flags(Self::FENCE_FLAGS);
        let in_flight_fence = unsafe { device.create_fence(&fence_info, None) }
            .map_err(RenderError::init("in-flight fence"))?;
        {
            let device = device.clone();
            release.push("in-flight fence", move || unsafe {
                device.destroy_fence(in_flight_fence, None)
            });
        }

        Ok(Self {
            command_buffer,
            image_acquired,
            render_finished,
            in_flight_fence,
        })
    }
}

fn create_semaphore(
    device: &ash::Device,
    release: &mut ReleaseStack,
    label: &'static str,
) -> Result<vk::Semaphore> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    let semaphore = unsafe { device.create_semaphore(&semaphore_info, None) }
        .map_err(RenderError::init(label))?;

    let device = device.clone();
    release.push(label, move || unsafe { device.destroy_semaphore(semaphore, None) });
    Ok(semaphore)
}
