// Graphics context - the Instance Scope
//
// One explicit context per process instead of global handles: everything
// that needs the instance or device holds an `Arc<GraphicsContext>`, so the
// context cannot be torn down while a swapchain or pipeline still uses it.
//
// Creation order: instance -> diagnostics -> physical device -> logical device
// Teardown is the exact reverse, driven by the release stack.

use anyhow::{Context as _, Result};
use ash::extensions::{ext, khr};
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use super::{Diagnostics, LogicalDevice, PhysicalDevice, ReleaseStack, RenderError};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct GraphicsContext {
    // Released newest-first in Drop, before any field below goes away
    release: ReleaseStack,

    pub device: LogicalDevice,
    pub physical: PhysicalDevice,
    pub diagnostics: Option<Diagnostics>,
    pub surface_loader: khr::Surface,
    pub instance: ash::Instance,

    // Keeps the Vulkan library loaded; must outlive every handle above
    pub entry: Entry,
}

impl GraphicsContext {
    /// Create the instance and everything hanging off it.
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `request_validation` - Try to enable the Khronos validation layer
    /// * `display_handle` - Decides which platform surface extensions we need
    pub fn new(
        app_name: &str,
        request_validation: bool,
        display_handle: RawDisplayHandle,
    ) -> Result<Self> {
        log::info!("Creating graphics context: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let (entry, release, (instance, diagnostics, physical, device)) =
            with_library(entry, |entry, release| {
                // Step 2: Create instance (validation layer only if present)
                let (instance, validation_enabled) =
                    Self::create_instance(entry, app_name, request_validation, display_handle)?;
                {
                    let instance = instance.clone();
                    release.push("instance", move || unsafe { instance.destroy_instance(None) });
                }

                // Step 3: Register the diagnostics sink
                let diagnostics = if validation_enabled {
                    let diagnostics = Diagnostics::new(entry, &instance)?;
                    let sink = diagnostics.clone();
                    release.push("debug messenger", move || sink.destroy());
                    Some(diagnostics)
                } else {
                    None
                };

                // Step 4: Pick physical device (GPU); nothing to release
                let physical = PhysicalDevice::select(&instance)?;

                // Step 5: Create logical device
                let device = LogicalDevice::new(&instance, &physical)?;
                {
                    let device = device.device.clone();
                    release.push("logical device", move || unsafe { device.destroy_device(None) });
                }

                Ok((instance, diagnostics, physical, device))
            })?;

        let surface_loader = khr::Surface::new(&entry, &instance);

        Ok(Self {
            release,
            device,
            physical,
            diagnostics,
            surface_loader,
            instance,
            entry,
        })
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        request_validation: bool,
        display_handle: RawDisplayHandle,
    ) -> Result<(ash::Instance, bool)> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("Triangle Bootstrap")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        // Platform presentation extensions
        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display_handle)
                .map_err(RenderError::init("surface extension list"))?
                .to_vec();

        // Debug/introspection extensions, when the loader has them
        let supported = entry
            .enumerate_instance_extension_properties(None)
            .map_err(RenderError::init("instance extension list"))?;
        let supported_names: Vec<&CStr> = supported
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();
        for optional in [
            ext::DebugUtils::name(),
            khr::GetPhysicalDeviceProperties2::name(),
        ] {
            if supported_names.contains(&optional) {
                extensions.push(optional.as_ptr());
            }
        }
        log::info!(
            "Enabled extensions: {}, supported extensions: {}",
            extensions.len(),
            supported_names.len()
        );

        // Validation layer, only if installed
        let layers = entry
            .enumerate_instance_layer_properties()
            .map_err(RenderError::init("instance layer list"))?;
        let layer_names: Vec<&CStr> = layers
            .iter()
            .map(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) })
            .collect();
        for name in &layer_names {
            log::debug!("Instance layer: {}", name.to_string_lossy());
        }

        let validation_enabled = request_validation
            && validation_available(&layer_names)
            && supported_names.contains(&ext::DebugUtils::name());
        if !validation_enabled {
            log::warn!("Validation is disabled");
        }

        let enabled_layers = if validation_enabled {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let enables = [vk::ValidationFeatureEnableEXT::BEST_PRACTICES];
        let mut validation_features =
            vk::ValidationFeaturesEXT::builder().enabled_validation_features(&enables);

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&enabled_layers);
        if validation_enabled {
            create_info = create_info.push_next(&mut validation_features);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(RenderError::init("instance"))?;

        Ok((instance, validation_enabled))
    }

    pub fn validation_enabled(&self) -> bool {
        self.diagnostics.is_some()
    }

    /// Block until every queue on the device is idle
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device.device_wait_idle() }
            .map_err(RenderError::vulkan("device wait idle"))?;
        Ok(())
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        if self.release.is_empty() {
            return;
        }
        log::info!("Destroying graphics context ({} objects)...", self.release.len());
        let _ = self.wait_idle();
        self.release.flush();
    }
}

/// Build objects whose release calls go through `library`.
///
/// On failure everything already registered is released while the library is
/// still loaded, and only then is the library dropped.
fn with_library<L, T>(
    library: L,
    build: impl FnOnce(&L, &mut ReleaseStack) -> Result<T>,
) -> Result<(L, ReleaseStack, T)> {
    let mut release = ReleaseStack::new();
    match build(&library, &mut release) {
        Ok(built) => Ok((library, release, built)),
        Err(err) => {
            release.flush();
            drop(library);
            Err(err)
        }
    }
}

fn validation_available(layer_names: &[&CStr]) -> bool {
    layer_names.contains(&VALIDATION_LAYER)
}

/// Owner of the process's single context.
///
/// `initialize_with` is idempotent: once a value exists later calls hand
/// back the same one without running the constructor again.
pub struct Scope<T> {
    slot: Option<Arc<T>>,
}

impl<T> Scope<T> {
    pub const fn new() -> Self {
        Self { slot: None }
    }

    pub fn initialize_with(&mut self, create: impl FnOnce() -> Result<T>) -> Result<Arc<T>> {
        if let Some(existing) = &self.slot {
            return Ok(existing.clone());
        }
        let created = Arc::new(create()?);
        self.slot = Some(created.clone());
        Ok(created)
    }

    pub fn get(&self) -> Option<&Arc<T>> {
        self.slot.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.is_some()
    }

    /// Drop our handle. The value is destroyed once the last borrower lets go;
    /// calling this on an empty scope does nothing.
    pub fn shutdown(&mut self) {
        if let Some(value) = self.slot.take() {
            if Arc::strong_count(&value) > 1 {
                log::warn!(
                    "Scope shut down with {} outstanding handle(s)",
                    Arc::strong_count(&value) - 1
                );
            }
        }
    }
}

impl<T> Default for Scope<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub type InstanceScope = Scope<GraphicsContext>;

impl InstanceScope {
    pub fn initialize(
        &mut self,
        app_name: &str,
        request_validation: bool,
        display_handle: RawDisplayHandle,
    ) -> Result<Arc<GraphicsContext>> {
        self.initialize_with(|| GraphicsContext::new(app_name, request_validation, display_handle))
    }
}
