// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, physical device and queues for one window.

use std::collections::BTreeSet;
use std::ffi::{c_char, CStr, CString};

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, error, info, warn};

use crate::ash_gpu::AshGpu;
use crate::context::DeviceContext;
use crate::error::{PrestoError, Result};
use crate::surface::{create_surface, required_instance_extensions, WindowHandles};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Debug)]
pub struct ContextOptions {
    pub app_name: String,
    /// Enables the Khronos validation layer and routes its messages to tracing.
    /// Silently skipped when the layer is not installed.
    pub validation: bool,
    pub prefer_discrete: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            app_name: "presto".into(),
            validation: cfg!(debug_assertions),
            prefer_discrete: true,
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    // SAFETY: the loader hands us a valid struct for the duration of the call.
    let msg = unsafe {
        if data.is_null() || (*data).p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr((*data).p_message).to_string_lossy()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else {
        debug!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

fn layer_available(entry: &ash::Entry, name: &CStr) -> bool {
    // SAFETY: plain loader query.
    unsafe { entry.enumerate_instance_layer_properties() }
        .unwrap_or_default()
        .iter()
        .any(|l| l.layer_name_as_c_str() == Ok(name))
}

/// Returns the instance and whether validation ended up enabled.
fn create_instance(
    entry: &ash::Entry,
    handles: WindowHandles,
    options: &ContextOptions,
) -> Result<(ash::Instance, bool)> {
    let app_name = CString::new(options.app_name.as_str())
        .map_err(|_| PrestoError::Configuration("application name contains NUL".into()))?;

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: 0,
        p_engine_name: c"presto".as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_1,
        ..Default::default()
    };

    let mut extensions = required_instance_extensions(handles.display)?;
    let mut layers: Vec<*const c_char> = Vec::new();
    let validation = options.validation && layer_available(entry, VALIDATION_LAYER);
    if validation {
        layers.push(VALIDATION_LAYER.as_ptr());
        extensions.push(debug_utils::NAME.as_ptr());
    } else if options.validation {
        warn!("validation requested but {VALIDATION_LAYER:?} is not installed");
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    // SAFETY: every pointer in create_info borrows a local alive until return.
    let instance = unsafe { entry.create_instance(&create_info, None) }
        .map_err(PrestoError::resource("instance"))?;
    Ok((instance, validation))
}

fn create_debug_messenger(
    entry: &ash::Entry,
    instance: &ash::Instance,
) -> Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    // SAFETY: instance was created with debug_utils enabled.
    match unsafe { loader.create_debug_utils_messenger(&ci, None) } {
        Ok(messenger) => Some((loader, messenger)),
        Err(e) => {
            warn!("debug messenger unavailable: {e}");
            None
        }
    }
}

#[derive(Clone, Debug)]
struct PickedDevice {
    phys: vk::PhysicalDevice,
    graphics_family: u32,
    present_family: u32,
    name: String,
    discrete: bool,
}

/// Graphics family first; presentation prefers the same family and falls back
/// to any family that can present.
fn evaluate_device(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Option<PickedDevice> {
    // SAFETY: phys was enumerated from this instance.
    let (exts, families, props) = unsafe {
        (
            instance.enumerate_device_extension_properties(phys).ok()?,
            instance.get_physical_device_queue_family_properties(phys),
            instance.get_physical_device_properties(phys),
        )
    };
    let has_swapchain = exts
        .iter()
        .any(|e| e.extension_name_as_c_str() == Ok(swapchain::NAME));
    if !has_swapchain {
        return None;
    }

    let can_present = |family: u32| {
        // SAFETY: family indexes this device's queue families.
        unsafe { surface_loader.get_physical_device_surface_support(phys, family, surface) }
            .unwrap_or(false)
    };
    let graphics_family = families
        .iter()
        .position(|q| q.queue_flags.contains(vk::QueueFlags::GRAPHICS))? as u32;
    let present_family = if can_present(graphics_family) {
        graphics_family
    } else {
        (0..families.len() as u32).find(|&f| can_present(f))?
    };

    Some(PickedDevice {
        phys,
        graphics_family,
        present_family,
        name: props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        discrete: props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU,
    })
}

fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    prefer_discrete: bool,
) -> Result<PickedDevice> {
    // SAFETY: plain instance query.
    let devices = unsafe { instance.enumerate_physical_devices()? };
    let mut best: Option<PickedDevice> = None;
    for phys in devices {
        let Some(candidate) = evaluate_device(instance, surface_loader, surface, phys) else {
            continue;
        };
        debug!(
            "candidate GPU {} (discrete={}, graphics={}, present={})",
            candidate.name, candidate.discrete, candidate.graphics_family, candidate.present_family
        );
        let better = match &best {
            None => true,
            Some(current) => prefer_discrete && candidate.discrete && !current.discrete,
        };
        if better {
            best = Some(candidate);
        }
    }
    best.ok_or_else(|| {
        PrestoError::Configuration(
            "no GPU offers graphics, presentation to this surface and VK_KHR_swapchain".into(),
        )
    })
}

fn create_device(instance: &ash::Instance, picked: &PickedDevice) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let families: BTreeSet<u32> = [picked.graphics_family, picked.present_family]
        .into_iter()
        .collect();
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .iter()
        .map(|&family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();
    let device_exts = [swapchain::NAME.as_ptr()];

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };
    // SAFETY: dinfo only borrows locals above.
    unsafe { instance.create_device(picked.phys, &dinfo, None) }
        .map_err(PrestoError::resource("logical device"))
}

/// Owns the instance-level and device-level Vulkan objects a frame cycle
/// runs on. Any [`crate::FrameCycle`] built from [`VulkanContext::device_context`]
/// must be dropped first.
pub struct VulkanContext {
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
    device: ash::Device,
    graphics_family: u32,
    present_family: u32,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    device_name: String,
}

impl VulkanContext {
    pub fn new<W: HasWindowHandle + HasDisplayHandle + ?Sized>(
        window: &W,
        options: &ContextOptions,
    ) -> Result<Self> {
        // STRICT ORDER:
        // 1) Instance with the platform's WSI extensions
        // 2) Surface from THIS instance
        // 3) Physical device and queue families judged against THIS surface
        // 4) Device with VK_KHR_swapchain
        let handles = WindowHandles::of(window)?;
        // SAFETY: the loader library stays loaded for as long as `entry` lives.
        let entry = unsafe { ash::Entry::load()? };
        let (instance, validation) = create_instance(&entry, handles, options)?;
        let debug = if validation {
            create_debug_messenger(&entry, &instance)
        } else {
            None
        };
        let surface_loader = surface::Instance::new(&entry, &instance);

        // Unwinds instance-level objects when a later step fails.
        type Messenger = Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>;
        let unwind = |surface: Option<vk::SurfaceKHR>, debug: Messenger| {
            // SAFETY: nothing else references these objects yet.
            unsafe {
                if let Some(surface) = surface {
                    surface_loader.destroy_surface(surface, None);
                }
                if let Some((loader, messenger)) = debug {
                    loader.destroy_debug_utils_messenger(messenger, None);
                }
                instance.destroy_instance(None);
            }
        };

        // SAFETY: instance was created with the extensions for this display.
        let surface = match unsafe { create_surface(&entry, &instance, handles) } {
            Ok(surface) => surface,
            Err(e) => {
                unwind(None, debug);
                return Err(e);
            }
        };
        let (picked, device) =
            match pick_physical_device(&instance, &surface_loader, surface, options.prefer_discrete)
                .and_then(|picked| create_device(&instance, &picked).map(|device| (picked, device)))
            {
                Ok(pair) => pair,
                Err(e) => {
                    unwind(Some(surface), debug);
                    return Err(e);
                }
            };

        // SAFETY: both families were requested with one queue each.
        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(picked.graphics_family, 0),
                device.get_device_queue(picked.present_family, 0),
            )
        };
        info!(
            "GPU: {} (graphics family {}, present family {}, validation={})",
            picked.name, picked.graphics_family, picked.present_family, validation
        );

        Ok(Self {
            entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys: picked.phys,
            device,
            graphics_family: picked.graphics_family,
            present_family: picked.present_family,
            graphics_queue,
            present_queue,
            device_name: picked.name,
        })
    }

    pub fn device_context(&self) -> DeviceContext<AshGpu> {
        DeviceContext {
            gpu: AshGpu::new(&self.entry, &self.instance, &self.device, self.phys),
            physical_device: self.phys,
            graphics_queue: self.graphics_queue,
            present_queue: self.present_queue,
            graphics_family: self.graphics_family,
            present_family: self.present_family,
        }
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

// STRICT TEARDOWN ORDER:
// - device_wait_idle()
// - Destroy device BEFORE surface
// - Destroy surface and debug messenger BEFORE instance
// - Instance last
impl Drop for VulkanContext {
    fn drop(&mut self) {
        // SAFETY: frame cycles built on this context are gone by contract.
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                warn!("device_wait_idle during context teardown: {e}");
            }
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
