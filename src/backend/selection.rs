// Selection policies
//
// Pure decisions made from what the driver reports: which adapter, which
// queue family, which surface format / present mode / extent / image count.
// Kept free of Vulkan calls so they can be checked without a GPU.

use ash::vk;

/// Prefer the first discrete GPU; otherwise fall back to the last adapter
/// enumerated. `None` only when the list is empty.
pub fn select_adapter(device_types: &[vk::PhysicalDeviceType]) -> Option<usize> {
    device_types
        .iter()
        .position(|&ty| ty == vk::PhysicalDeviceType::DISCRETE_GPU)
        .or_else(|| device_types.len().checked_sub(1))
}

/// First queue family (in enumeration order) that can do graphics work
pub fn find_graphics_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|index| index as u32)
}

/// Family to present from, given per-family surface support.
///
/// The graphics family wins if it can present; otherwise the first family
/// that can.
pub fn find_present_family(graphics_family: u32, present_support: &[bool]) -> Option<u32> {
    if present_support
        .get(graphics_family as usize)
        .copied()
        .unwrap_or(false)
    {
        return Some(graphics_family);
    }

    present_support
        .iter()
        .position(|&supported| supported)
        .map(|index| index as u32)
}

/// Prefer 8-bit BGRA sRGB with the sRGB non-linear colour space, else the
/// first format the surface reports.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// MAILBOX if available, otherwise FIFO (the one mode every driver must support)
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Resolve the swapchain extent.
///
/// A current extent of `u32::MAX` means "match the window": use the
/// framebuffer pixel size clamped into the surface's bounds.
pub fn resolve_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_size: (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (width, height) = framebuffer_size;
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One image above the minimum so we never wait on the driver to release
/// one, capped at the maximum (0 means no maximum).
pub fn image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = capabilities.min_image_count + 1;
    if capabilities.max_image_count == 0 {
        wanted
    } else {
        wanted.min(capabilities.max_image_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn capabilities(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn discrete_gpu_wins_wherever_it_is() {
        let types = [
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vk::PhysicalDeviceType::VIRTUAL_GPU,
        ];
        assert_eq!(select_adapter(&types), Some(2));
    }

    #[test]
    fn first_discrete_gpu_is_taken() {
        let types = [
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
        ];
        assert_eq!(select_adapter(&types), Some(0));
    }

    #[test]
    fn without_discrete_gpu_the_last_adapter_is_taken() {
        let types = [
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::VIRTUAL_GPU,
        ];
        assert_eq!(select_adapter(&types), Some(2));
        assert_eq!(select_adapter(&[vk::PhysicalDeviceType::CPU]), Some(0));
    }

    #[test]
    fn no_adapters_means_no_selection() {
        assert_eq!(select_adapter(&[]), None);
    }

    #[test]
    fn graphics_family_is_first_graphics_capable() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        assert_eq!(find_graphics_family(&families), Some(2));
    }

    #[test]
    fn graphics_family_stays_unresolved_without_candidates() {
        let families = [family(vk::QueueFlags::TRANSFER), family(vk::QueueFlags::COMPUTE)];
        assert_eq!(find_graphics_family(&families), None);
        assert_eq!(find_graphics_family(&[]), None);
    }

    #[test]
    fn present_family_prefers_graphics_family() {
        assert_eq!(find_present_family(2, &[true, false, true]), Some(2));
        assert_eq!(find_present_family(1, &[false, false, true]), Some(2));
        assert_eq!(find_present_family(0, &[false, false]), None);
        assert_eq!(find_present_family(5, &[false, true]), Some(1));
    }

    #[test]
    fn preferred_format_found_regardless_of_position() {
        let preferred = format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let others = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        for position in 0..=others.len() {
            let mut formats = others.to_vec();
            formats.insert(position, preferred);
            assert_eq!(choose_surface_format(&formats), Some(preferred));
        }
    }

    #[test]
    fn preferred_format_needs_matching_color_space() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn mailbox_preferred_fifo_fallback() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED]),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(choose_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn sentinel_extent_clamps_framebuffer_size() {
        let caps = capabilities((u32::MAX, u32::MAX), (100, 100), (1920, 1080));
        assert_eq!(
            resolve_extent(&caps, (800, 600)),
            vk::Extent2D { width: 800, height: 600 }
        );
        assert_eq!(
            resolve_extent(&caps, (4000, 50)),
            vk::Extent2D { width: 1920, height: 100 }
        );
    }

    #[test]
    fn concrete_extent_is_used_verbatim() {
        let caps = capabilities((1024, 768), (1, 1), (4096, 4096));
        assert_eq!(
            resolve_extent(&caps, (800, 600)),
            vk::Extent2D { width: 1024, height: 768 }
        );
    }

    #[test]
    fn image_count_is_one_above_minimum_capped_at_maximum() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(image_count(&caps), 2);

        caps.max_image_count = 0;
        caps.min_image_count = 7;
        assert_eq!(image_count(&caps), 8);
    }
}
