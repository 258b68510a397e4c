// Vulkan Device - adapter selection and the logical device
//
// Responsibilities:
// - Physical device selection (prefer discrete GPU, else last enumerated)
// - Immutable snapshot of the chosen adapter
// - Graphics queue family resolution (checked once, fatal if missing)
// - Logical device + graphics queue creation

use anyhow::Result;
use ash::extensions::khr;
use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

use super::{selection, RenderError};

/// Queue family index per role; a role stays `None` until a search finds it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn resolve(families: &[vk::QueueFamilyProperties]) -> Self {
        Self {
            graphics: selection::find_graphics_family(families),
        }
    }

    pub fn require_graphics(&self) -> Result<u32, RenderError> {
        self.graphics.ok_or(RenderError::NoGraphicsQueueFamily)
    }
}

/// Snapshot of the selected adapter, taken once and never mutated
pub struct PhysicalDevice {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub extensions: HashSet<String>,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Resolved at selection time; a GPU without one is never selected
    pub graphics_family: u32,
}

impl PhysicalDevice {
    pub fn select(instance: &ash::Instance) -> Result<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(RenderError::init("physical device list"))?;

        let device_types: Vec<_> = devices
            .iter()
            .map(|&device| unsafe { instance.get_physical_device_properties(device) }.device_type)
            .collect();

        let index = selection::select_adapter(&device_types).ok_or(RenderError::NoSuitableDevice)?;
        let handle = devices[index];
        log::info!("Found {} GPU(s), picked #{}", devices.len(), index);

        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let features = unsafe { instance.get_physical_device_features(handle) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(handle) };

        let extensions: HashSet<String> = unsafe { instance.enumerate_device_extension_properties(handle) }
            .map_err(RenderError::init("device extension list"))?
            .iter()
            .map(|ext| {
                unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(handle) };
        let graphics_family = QueueFamilyIndices::resolve(&queue_families).require_graphics()?;

        let device = Self {
            handle,
            properties,
            features,
            memory_properties,
            extensions,
            queue_families,
            graphics_family,
        };

        log::info!("Selected GPU: {} ({:?})", device.name(), properties.device_type);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "{} device extensions, {} queue families, graphics family {}",
            device.extensions.len(),
            device.queue_families.len(),
            graphics_family
        );
        log::debug!(
            "{} memory types across {} heaps",
            memory_properties.memory_type_count,
            memory_properties.memory_heap_count
        );

        Ok(device)
    }

    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    pub fn supports_extension(&self, name: &CStr) -> bool {
        self.extensions.contains(name.to_string_lossy().as_ref())
    }
}

/// Connection to the selected adapter plus its one graphics queue.
///
/// Destruction belongs to the owning context; the queue dies with the device.
pub struct LogicalDevice {
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
}

impl LogicalDevice {
    pub fn new(instance: &ash::Instance, physical: &PhysicalDevice) -> Result<Self> {
        let swapchain_extension = khr::Swapchain::name();
        if !physical.supports_extension(swapchain_extension) {
            return Err(RenderError::MissingDeviceExtension(
                swapchain_extension.to_string_lossy().into_owned(),
            )
            .into());
        }

        let graphics_queue_family = physical.graphics_family;
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions = [swapchain_extension.as_ptr()];

        // Everything the adapter reports, not a curated subset
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions)
            .enabled_features(&physical.features);

        let device = unsafe { instance.create_device(physical.handle, &create_info, None) }
            .map_err(RenderError::init("logical device"))?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        Ok(Self {
            device,
            graphics_queue,
            graphics_queue_family,
        })
    }
}
