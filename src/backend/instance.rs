// Vulkan Instance - loader, instance, debug messenger, window surface
//
// Everything here outlives the logical device: the surface is destroyed
// after the swapchain, the instance after the device.

use anyhow::{Context, Result};
use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};

use crate::platform::{self, Window};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"vulkan-frame-backend";

pub struct VulkanInstance {
    pub entry: Entry,
    pub instance: ash::Instance,
    /// Present only when validation is enabled in a debug build.
    pub debug_utils: Option<ash::extensions::ext::DebugUtils>,
    messenger: vk::DebugUtilsMessengerEXT,
    pub surface_loader: ash::extensions::khr::Surface,
    pub surface: vk::SurfaceKHR,
}

impl VulkanInstance {
    /// Load Vulkan, create the instance and a surface for `window`.
    pub fn new(application_name: &str, validation: bool, window: &Window) -> Result<Self> {
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let debug = cfg!(debug_assertions) && validation;
        let instance = Self::create_instance(&entry, application_name, debug, window)?;

        // From here on `this` owns the instance and Drop cleans up whatever
        // has been created when a later step fails.
        let mut this = Self {
            surface_loader: ash::extensions::khr::Surface::new(&entry, &instance),
            entry,
            instance,
            debug_utils: None,
            messenger: vk::DebugUtilsMessengerEXT::null(),
            surface: vk::SurfaceKHR::null(),
        };

        if debug {
            let debug_utils = ash::extensions::ext::DebugUtils::new(&this.entry, &this.instance);
            this.messenger = Self::create_messenger(&debug_utils)?;
            this.debug_utils = Some(debug_utils);
        }

        this.surface = unsafe { platform::create_surface(&this.entry, &this.instance, window) }?;

        log::info!("Vulkan instance created (validation: {})", debug);
        Ok(this)
    }

    fn create_instance(
        entry: &Entry,
        application_name: &str,
        debug: bool,
        window: &Window,
    ) -> Result<ash::Instance> {
        let app_name = CString::new(application_name)?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions: Vec<*const c_char> =
            platform::required_instance_extensions(window.display)?
                .iter()
                .map(|ext| ext.as_ptr())
                .collect();
        if debug {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let layer_names = if debug {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")
    }

    fn create_messenger(
        debug_utils: &ash::extensions::ext::DebugUtils,
    ) -> Result<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            if let Some(debug_utils) = self.debug_utils.take() {
                if self.messenger != vk::DebugUtilsMessengerEXT::null() {
                    debug_utils.destroy_debug_utils_messenger(self.messenger, None);
                }
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Route validation messages into `log` by severity.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::info!("[Vulkan] {}", message),
        _ => log::trace!("[Vulkan] {}", message),
    }

    vk::FALSE
}
