// Swapchain & frame resources - window presentation and the frame protocol
//
// Owns the surface, the swapchain images with one view and one framebuffer
// each, the render pass, and the single in-flight frame's command buffer and
// sync objects. Exposes the Begin -> Apply -> End protocol.
//
// Exactly one frame is in flight, and End waits for the device to go idle
// before returning, so CPU and GPU never overlap across frames.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;

use super::frame::FrameCycle;
use super::pipeline::{full_scissor, full_viewport};
use super::{selection, FrameSync, GraphicsContext, Pipeline, ReleaseStack, RenderError};

/// Opaque black
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// The hardcoded triangle; positions are generated in the vertex shader
pub const TRIANGLE_VERTEX_COUNT: u32 = 3;

const WAIT_STAGES: [vk::PipelineStageFlags; 1] = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];

pub struct Swapchain {
    // Destroys everything below in reverse creation order
    release: ReleaseStack,

    pub surface: vk::SurfaceKHR,
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub render_pass: vk::RenderPass,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub sync: FrameSync,

    present_queue: vk::Queue,
    cycle: FrameCycle,
    image_index: u32,
    warned_suboptimal: bool,
    context: Arc<GraphicsContext>,
}

impl Swapchain {
    /// Create the surface for `window` and every per-swapchain resource.
    ///
    /// `framebuffer_size` is the window's pixel size, used when the surface
    /// leaves the extent up to us.
    pub fn new<W>(context: Arc<GraphicsContext>, window: &W, framebuffer_size: (u32, u32)) -> Result<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        let mut release = ReleaseStack::new();
        let device = context.device.device.clone();
        let physical_device = context.physical.handle;
        let surface_loader = &context.surface_loader;

        // ─────────────────────────────────────────────────────────────────────
        // Surface
        // ─────────────────────────────────────────────────────────────────────
        let surface = unsafe {
            ash_window::create_surface(
                &context.entry,
                &context.instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .map_err(RenderError::init("window surface"))?;
        {
            let surface_loader = surface_loader.clone();
            release.push("surface", move || unsafe {
                surface_loader.destroy_surface(surface, None)
            });
        }

        // The command pool must live on a family that can both draw and
        // present; the device only owns the graphics queue.
        let present_support = (0..context.physical.queue_families.len() as u32)
            .map(|family| unsafe {
                surface_loader.get_physical_device_surface_support(physical_device, family, surface)
            })
            .collect::<Result<Vec<bool>, vk::Result>>()
            .map_err(RenderError::init("surface support query"))?;
        let graphics_family = context.device.graphics_queue_family;
        let present_family = selection::find_present_family(graphics_family, &present_support)
            .filter(|&family| family == graphics_family)
            .ok_or(RenderError::NoPresentQueueFamily)?;

        // ─────────────────────────────────────────────────────────────────────
        // Negotiate format, present mode, extent and image count
        // ─────────────────────────────────────────────────────────────────────
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)
        }
        .map_err(RenderError::init("surface capabilities query"))?;

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)
        }
        .map_err(RenderError::init("surface format query"))?;

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)
        }
        .map_err(RenderError::init("present mode query"))?;

        let format = selection::choose_surface_format(&formats).context("Surface reports no formats")?;
        let present_mode = selection::choose_present_mode(&present_modes);
        let extent = selection::resolve_extent(&capabilities, framebuffer_size);
        let image_count = selection::image_count(&capabilities);

        log::info!(
            "Swapchain: {:?}/{:?}, {:?}, {}x{}, {} images requested",
            format.format,
            format.color_space,
            present_mode,
            extent.width,
            extent.height,
            image_count
        );

        // ─────────────────────────────────────────────────────────────────────
        // Swapchain + images
        // ─────────────────────────────────────────────────────────────────────
        let swapchain_loader = khr::Swapchain::new(&context.instance, &device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(RenderError::init("swapchain"))?;
        {
            let swapchain_loader = swapchain_loader.clone();
            release.push("swapchain", move || unsafe {
                swapchain_loader.destroy_swapchain(swapchain, None)
            });
        }

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(RenderError::init("swapchain image list"))?;
        log::info!("Created swapchain with {} images", images.len());

        // ─────────────────────────────────────────────────────────────────────
        // One view per image
        // ─────────────────────────────────────────────────────────────────────
        let image_views = {
            let destroy_device = device.clone();
            create_per_image(
                &images,
                &mut release,
                "image view",
                |_, image| create_image_view(&device, image, format.format),
                move |view| unsafe { destroy_device.destroy_image_view(view, None) },
            )?
        };

        // ─────────────────────────────────────────────────────────────────────
        // Render pass
        // ─────────────────────────────────────────────────────────────────────
        let render_pass = create_render_pass(&device, format.format)?;
        {
            let device = device.clone();
            release.push("render pass", move || unsafe {
                device.destroy_render_pass(render_pass, None)
            });
        }

        // ─────────────────────────────────────────────────────────────────────
        // One framebuffer per view
        // ─────────────────────────────────────────────────────────────────────
        let framebuffers = {
            let destroy_device = device.clone();
            create_per_image(
                &image_views,
                &mut release,
                "framebuffer",
                |_, view| create_framebuffer(&device, render_pass, view, extent),
                move |framebuffer| unsafe { destroy_device.destroy_framebuffer(framebuffer, None) },
            )?
        };

        // ─────────────────────────────────────────────────────────────────────
        // Command buffer + sync objects
        // ─────────────────────────────────────────────────────────────────────
        let sync = FrameSync::new(&device, present_family, &mut release)?;

        let present_queue = context.device.graphics_queue;

        Ok(Self {
            release,
            surface,
            swapchain,
            swapchain_loader,
            images,
            image_views,
            framebuffers,
            render_pass,
            format,
            present_mode,
            extent,
            sync,
            present_queue,
            cycle: FrameCycle::new(FrameSync::FENCE_FLAGS),
            image_index: 0,
            warned_suboptimal: false,
            context,
        })
    }

    pub fn image_count(&self) -> usize {
        debug_assert_eq!(self.images.len(), self.image_views.len());
        self.images.len()
    }

    pub fn cycle(&self) -> &FrameCycle {
        &self.cycle
    }

    /// Wait for the previous frame, acquire an image and open the render pass.
    ///
    /// Both waits are unbounded.
    pub fn begin(&mut self) -> Result<()> {
        let device = &self.context.device.device;
        let sync = &self.sync;
        let swapchain = self.swapchain;
        let swapchain_loader = &self.swapchain_loader;
        let render_pass = self.render_pass;
        let framebuffers = &self.framebuffers;
        let extent = self.extent;

        let wait_and_reset = || -> Result<()> {
            let fence = sync.in_flight_fence;
            unsafe { device.wait_for_fences(&[fence], true, u64::MAX) }
                .map_err(RenderError::vulkan("wait for in-flight fence"))?;
            unsafe { device.reset_fences(&[fence]) }
                .map_err(RenderError::vulkan("reset in-flight fence"))?;
            Ok(())
        };

        let open = || -> Result<(u32, bool)> {
            let (image_index, suboptimal) = unsafe {
                swapchain_loader.acquire_next_image(
                    swapchain,
                    u64::MAX,
                    sync.image_acquired,
                    vk::Fence::null(),
                )
            }
            .map_err(RenderError::vulkan("acquire next image"))?;

            let cmd = sync.command_buffer;
            unsafe {
                device
                    .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                    .map_err(RenderError::vulkan("reset command buffer"))?;

                let begin_info = vk::CommandBufferBeginInfo::builder();
                device
                    .begin_command_buffer(cmd, &begin_info)
                    .map_err(RenderError::vulkan("begin command buffer"))?;

                let clear_values = [vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: CLEAR_COLOR,
                    },
                }];
                let render_pass_info = vk::RenderPassBeginInfo::builder()
                    .render_pass(render_pass)
                    .framebuffer(framebuffers[image_index as usize])
                    .render_area(full_scissor(extent))
                    .clear_values(&clear_values);

                device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            }
            Ok((image_index, suboptimal))
        };

        let (image_index, suboptimal) = self.cycle.begin_frame(wait_and_reset, open)?;
        self.image_index = image_index;
        self.note_suboptimal(suboptimal);
        Ok(())
    }

    /// Record the triangle draw with `pipeline`
    pub fn apply(&mut self, pipeline: &Pipeline) -> Result<()> {
        let device = &self.context.device.device;
        let cmd = self.sync.command_buffer;
        let extent = self.extent;

        self.cycle.apply_frame(|| {
            unsafe {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
                device.cmd_set_viewport(cmd, 0, &[full_viewport(extent)]);
                device.cmd_set_scissor(cmd, 0, &[full_scissor(extent)]);
                device.cmd_draw(cmd, TRIANGLE_VERTEX_COUNT, 1, 0, 0);
            }
            Ok(())
        })
    }

    /// Close the frame, submit, present, and wait for the device to go idle
    pub fn end(&mut self) -> Result<()> {
        let context = &self.context;
        let device = &context.device.device;
        let sync = &self.sync;
        let cmd = sync.command_buffer;
        let signal_semaphores = [sync.render_finished];

        // Submit: wait for the image, signal render-finished and the fence
        let submit = || -> Result<()> {
            unsafe {
                device.cmd_end_render_pass(cmd);
                device
                    .end_command_buffer(cmd)
                    .map_err(RenderError::vulkan("end command buffer"))?;
            }

            let wait_semaphores = [sync.image_acquired];
            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::builder()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&WAIT_STAGES)
                .command_buffers(&command_buffers)
                .signal_semaphores(&signal_semaphores);

            unsafe {
                device.queue_submit(
                    context.device.graphics_queue,
                    &[submit_info.build()],
                    sync.in_flight_fence,
                )
            }
            .map_err(RenderError::vulkan("queue submit"))?;
            Ok(())
        };

        // Present once rendering is finished
        let swapchains = [self.swapchain];
        let image_indices = [self.image_index];
        let swapchain_loader = &self.swapchain_loader;
        let present_queue = self.present_queue;
        let present = || -> Result<bool> {
            let present_info = vk::PresentInfoKHR::builder()
                .wait_semaphores(&signal_semaphores)
                .swapchains(&swapchains)
                .image_indices(&image_indices);

            let suboptimal = unsafe { swapchain_loader.queue_present(present_queue, &present_info) }
                .map_err(RenderError::vulkan("queue present"))?;
            Ok(suboptimal)
        };

        // No overlap between frames
        let suboptimal = self.cycle.end_frame(submit, present, || context.wait_idle())?;
        self.note_suboptimal(suboptimal);
        Ok(())
    }

    fn note_suboptimal(&mut self, suboptimal: bool) {
        if suboptimal && !self.warned_suboptimal {
            log::warn!("Swapchain no longer matches the surface exactly; still presenting");
            self.warned_suboptimal = true;
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        log::info!(
            "Destroying swapchain on surface {:?} ({} objects, {} frames rendered)",
            self.surface,
            self.release.len(),
            self.cycle.frames_submitted()
        );
        let _ = self.context.wait_idle();
        self.release.flush();
    }
}

/// Create one object per input, registering each for release as soon as it
/// exists. Output index i always corresponds to input index i.
fn create_per_image<T, U>(
    inputs: &[T],
    release: &mut ReleaseStack,
    label: &'static str,
    mut create: impl FnMut(usize, T) -> Result<U>,
    destroy: impl Fn(U) + Clone + Send + Sync + 'static,
) -> Result<Vec<U>>
where
    T: Copy,
    U: Copy + Send + Sync + 'static,
{
    let mut outputs = Vec::with_capacity(inputs.len());
    for (index, &input) in inputs.iter().enumerate() {
        let output = create(index, input).with_context(|| format!("{} {}", label, index))?;
        let destroy = destroy.clone();
        release.push(label, move || destroy(output));
        outputs.push(output);
    }
    Ok(outputs)
}

fn create_image_view(device: &ash::Device, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    let view = unsafe { device.create_image_view(&create_info, None) }
        .map_err(RenderError::init("image view"))?;
    Ok(view)
}

/// Single colour attachment, cleared on load and left ready to present
fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = [color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachments)
        .build();

    // Hold colour writes until the acquired image is actually available
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = [color_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    let render_pass = unsafe { device.create_render_pass(&render_pass_info, None) }
        .map_err(RenderError::init("render pass"))?;
    Ok(render_pass)
}

fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    view: vk::ImageView,
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let attachments = [view];
    let framebuffer_info = vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass)
        .attachments(&attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    let framebuffer = unsafe { device.create_framebuffer(&framebuffer_info, None) }
        .map_err(RenderError::init("framebuffer"))?;
    Ok(framebuffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mock handle: (kind, index of the source it was made from)
    type Handle = (&'static str, usize);

    #[test]
    fn images_views_and_framebuffers_stay_one_to_one() {
        for n in 1..=5 {
            let images: Vec<Handle> = (0..n).map(|i| ("image", i)).collect();
            let destroyed = Arc::new(Mutex::new(Vec::new()));
            let mut release = ReleaseStack::new();

            let log = destroyed.clone();
            let views = create_per_image(
                &images,
                &mut release,
                "image view",
                |i, image: Handle| {
                    assert_eq!(image.1, i);
                    Ok(("view", image.1))
                },
                move |view| log.lock().unwrap().push(view),
            )
            .unwrap();

            let log = destroyed.clone();
            let framebuffers = create_per_image(
                &views,
                &mut release,
                "framebuffer",
                |_, view: Handle| Ok(("framebuffer", view.1)),
                move |fb| log.lock().unwrap().push(fb),
            )
            .unwrap();

            assert_eq!(images.len(), n);
            assert_eq!(views.len(), n);
            assert_eq!(framebuffers.len(), n);
            for i in 0..n {
                assert_eq!(views[i], ("view", i));
                assert_eq!(framebuffers[i], ("framebuffer", i));
            }

            release.flush();
            let destroyed = destroyed.lock().unwrap();
            assert_eq!(destroyed.len(), 2 * n);
            // Framebuffers go before the views they were built on
            assert!(destroyed[..n].iter().all(|h| h.0 == "framebuffer"));
            assert!(destroyed[n..].iter().all(|h| h.0 == "view"));
        }
    }

    #[test]
    fn failed_creation_releases_what_was_made() {
        let images: Vec<Handle> = (0..4).map(|i| ("image", i)).collect();
        let destroyed = Arc::new(Mutex::new(Vec::new()));
        let mut release = ReleaseStack::new();

        let log = destroyed.clone();
        let result = create_per_image(
            &images,
            &mut release,
            "image view",
            |i, image: Handle| {
                if i == 2 {
                    anyhow::bail!("out of device memory");
                }
                Ok(("view", image.1))
            },
            move |view| log.lock().unwrap().push(view),
        );

        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("image view 2"));
        drop(release);
        assert_eq!(*destroyed.lock().unwrap(), vec![("view", 1), ("view", 0)]);
    }
}
