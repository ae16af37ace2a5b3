// Graphics context - Vulkan instance and presentation surface
//
// Responsibilities:
// - Load the Vulkan library and create the instance
// - Route validation messages into `log`
// - Own the window surface (none for headless contexts)
//
// Everything created from the instance (devices, swapchains) must be dropped
// before the context.

use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{c_char, CStr, CString};

use crate::error::{RenderError, RenderResult, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan 1.3 is required for dynamic rendering and timeline semaphores.
pub const API_VERSION: u32 = vk::API_VERSION_1_3;

/// Window size in physical pixels, as the swapchain sees it.
pub trait DrawableSize {
    fn drawable_size(&self) -> vk::Extent2D;
}

impl DrawableSize for winit::window::Window {
    fn drawable_size(&self) -> vk::Extent2D {
        let size = self.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}

impl DrawableSize for vk::Extent2D {
    fn drawable_size(&self) -> vk::Extent2D {
        *self
    }
}

pub struct GraphicsContext {
    surface: Option<vk::SurfaceKHR>,
    surface_loader: ash::khr::surface::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    instance: ash::Instance,
    entry: Entry,
}

impl GraphicsContext {
    /// Create an instance able to present to `window`.
    pub fn new<W>(window: &W, app_name: &str, enable_validation: bool) -> RenderResult<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| RenderError::WindowHandle(e.to_string()))?
            .as_raw();
        let window = window
            .window_handle()
            .map_err(|e| RenderError::WindowHandle(e.to_string()))?
            .as_raw();

        let entry = unsafe { Entry::load() }?;
        let surface_extensions = ash_window::enumerate_required_extensions(display)
            .describe("vkEnumerateInstanceExtensionProperties")?;

        let mut context = Self::create(entry, app_name, enable_validation, surface_extensions)?;
        let surface = unsafe {
            ash_window::create_surface(&context.entry, &context.instance, display, window, None)
        }
        .describe("vkCreateSurfaceKHR")?;
        context.surface = Some(surface);

        Ok(context)
    }

    /// Create an instance without a surface, for tools and tests.
    pub fn headless(app_name: &str, enable_validation: bool) -> RenderResult<Self> {
        let entry = unsafe { Entry::load() }?;
        Self::create(entry, app_name, enable_validation, &[])
    }

    fn create(
        entry: Entry,
        app_name: &str,
        enable_validation: bool,
        surface_extensions: &[*const c_char],
    ) -> RenderResult<Self> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let instance_version = unsafe { entry.try_enumerate_instance_version() }
            .describe("vkEnumerateInstanceVersion")?
            .unwrap_or(vk::API_VERSION_1_0);
        if instance_version < API_VERSION {
            return Err(RenderError::DeviceCreationFailed {
                reason: format!(
                    "Vulkan loader reports {}.{}, 1.3 is required",
                    vk::api_version_major(instance_version),
                    vk::api_version_minor(instance_version)
                ),
                result: vk::Result::ERROR_INCOMPATIBLE_DRIVER,
            });
        }

        let enable_validation = enable_validation && Self::validation_available(&entry);

        let app_name = CString::new(app_name).unwrap_or_else(|_| c"kiln".to_owned());
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"kiln")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(API_VERSION);

        let mut extensions = surface_extensions.to_vec();
        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        let layers = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance =
            unsafe { entry.create_instance(&create_info, None) }.describe("vkCreateInstance")?;

        let debug_utils = if enable_validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        Ok(Self {
            surface: None,
            surface_loader,
            debug_utils,
            instance,
            entry,
        })
    }

    fn validation_available(entry: &Entry) -> bool {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
        let found = layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
        if !found {
            log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
        found
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> RenderResult<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .describe("vkCreateDebugUtilsMessengerEXT")?;

        Ok((debug_utils, messenger))
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn surface(&self) -> Option<vk::SurfaceKHR> {
        self.surface
    }

    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        log::info!("Destroying graphics context...");
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            if let Some(surface) = self.surface.take() {
                self.surface_loader.destroy_surface(surface, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
