// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection and the logical device built on it.
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use ash::khr::swapchain;
use ash::vk;
use quint_core::Logger;
use quint_render::RenderError;

use crate::context::GraphicsContext;
use crate::surface::Surface;
use crate::vk_error;

/// Device extensions a candidate must expose to be usable at all.
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

/// Graphics and present family indices found on one physical device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Single pass over `families`. The first family with queues that supports
    /// a role wins that role; the scan stops once both roles are filled.
    pub fn scan<E>(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> Result<bool, E>,
    ) -> Result<Self, E> {
        let mut found = Self::default();
        for (index, family) in (0u32..).zip(families) {
            if family.queue_count == 0 {
                continue;
            }
            if found.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                found.graphics = Some(index);
            }
            if found.present.is_none() && supports_present(index)? {
                found.present = Some(index);
            }
            if found.is_complete() {
                break;
            }
        }
        Ok(found)
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }
}

/// What device selection needs to know about a candidate.
///
/// The driver-backed implementation queries the surface; tests supply fakes.
pub trait DeviceQueries {
    fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties>;
    fn supports_present(&self, device: vk::PhysicalDevice, family: u32)
        -> Result<bool, RenderError>;
    fn extension_names(&self, device: vk::PhysicalDevice) -> Result<Vec<CString>, RenderError>;
    fn surface_formats(
        &self,
        device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::SurfaceFormatKHR>, RenderError>;
    fn present_modes(&self, device: vk::PhysicalDevice)
        -> Result<Vec<vk::PresentModeKHR>, RenderError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhysicalDeviceChoice {
    pub physical_device: vk::PhysicalDevice,
    pub graphics_family: u32,
    pub present_family: u32,
}

impl PhysicalDeviceChoice {
    /// Distinct families, ascending; one queue gets created per entry.
    pub fn unique_families(&self) -> Vec<u32> {
        BTreeSet::from([self.graphics_family, self.present_family])
            .into_iter()
            .collect()
    }

    /// Separate graphics and present families mean the swapchain images are
    /// shared between both.
    pub fn shares_images(&self) -> bool {
        self.graphics_family != self.present_family
    }
}

/// Picks the first device, in enumeration order, that has graphics and
/// present families, every extension in `required`, and at least one surface
/// format and present mode. Each rejection is logged at debug level.
pub fn select_physical_device(
    devices: &[vk::PhysicalDevice],
    queries: &impl DeviceQueries,
    required: &[&CStr],
    logger: &Logger,
) -> Result<PhysicalDeviceChoice, RenderError> {
    if devices.is_empty() {
        return Err(RenderError::NoDeviceFound);
    }
    for &device in devices {
        match evaluate(device, queries, required)? {
            Ok(choice) => return Ok(choice),
            Err(reason) => logger.debug(format!("Device {device:?} rejected: {reason}")),
        }
    }
    Err(RenderError::NoSuitableDevice)
}

/// Inner `Err` is the reason the device is unusable.
fn evaluate(
    device: vk::PhysicalDevice,
    queries: &impl DeviceQueries,
    required: &[&CStr],
) -> Result<Result<PhysicalDeviceChoice, String>, RenderError> {
    let families = queries.queue_families(device);
    let indices =
        QueueFamilyIndices::scan(&families, |family| queries.supports_present(device, family))?;
    let (Some(graphics_family), Some(present_family)) = (indices.graphics, indices.present) else {
        return Ok(Err("no graphics/present queue family".to_owned()));
    };

    let available = queries.extension_names(device)?;
    if let Some(missing) = required
        .iter()
        .find(|name| !available.iter().any(|a| a.as_c_str() == **name))
    {
        return Ok(Err(format!("missing extension {}", missing.to_string_lossy())));
    }

    if queries.surface_formats(device)?.is_empty() || queries.present_modes(device)?.is_empty() {
        return Ok(Err("no surface formats or present modes".to_owned()));
    }

    Ok(Ok(PhysicalDeviceChoice {
        physical_device: device,
        graphics_family,
        present_family,
    }))
}

/// Queries a real driver through the instance and the window surface.
pub(crate) struct DriverQueries<'a> {
    pub instance: &'a ash::Instance,
    pub surface: &'a Surface,
}

impl DeviceQueries for DriverQueries<'_> {
    fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            self.instance
                .get_physical_device_queue_family_properties(device)
        }
    }

    fn supports_present(
        &self,
        device: vk::PhysicalDevice,
        family: u32,
    ) -> Result<bool, RenderError> {
        self.surface.supports_present(device, family)
    }

    fn extension_names(&self, device: vk::PhysicalDevice) -> Result<Vec<CString>, RenderError> {
        let props = unsafe {
            self.instance
                .enumerate_device_extension_properties(device)
        }
        .map_err(vk_error("vkEnumerateDeviceExtensionProperties"))?;
        Ok(props
            .iter()
            .filter_map(|p| p.extension_name_as_c_str().ok())
            .map(CStr::to_owned)
            .collect())
    }

    fn surface_formats(
        &self,
        device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::SurfaceFormatKHR>, RenderError> {
        self.surface.formats(device)
    }

    fn present_modes(
        &self,
        device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>, RenderError> {
        self.surface.present_modes(device)
    }
}

/// Enumerates the instance's devices and selects one for `surface`.
pub(crate) fn pick_device(
    context: &GraphicsContext,
    surface: &Surface,
) -> Result<PhysicalDeviceChoice, RenderError> {
    let instance = context.instance();
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(vk_error("vkEnumeratePhysicalDevices"))?;
    context
        .logger()
        .debug(format!("{} physical device(s) enumerated", devices.len()));

    let queries = DriverQueries { instance, surface };
    select_physical_device(
        &devices,
        &queries,
        &REQUIRED_DEVICE_EXTENSIONS,
        context.logger(),
    )
}

/// The logical device with its graphics and present queues.
pub struct LogicalDevice {
    device: ash::Device,
    swapchain_loader: swapchain::Device,
    choice: PhysicalDeviceChoice,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    name: String,
    logger: Arc<Logger>,
}

impl LogicalDevice {
    pub fn new(
        context: &GraphicsContext,
        choice: PhysicalDeviceChoice,
    ) -> Result<Self, RenderError> {
        let logger = context.logger().clone();
        let instance = context.instance();

        let props = unsafe { instance.get_physical_device_properties(choice.physical_device) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from("<unnamed device>"));
        logger.info(format!(
            "Physical device selected: {name} (graphics family {}, present family {})",
            choice.graphics_family, choice.present_family
        ));

        logger.debug("Logical device creating...");
        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = choice
            .unique_families()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();
        let ext_ptrs: Vec<*const c_char> =
            REQUIRED_DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };

        // SAFETY: queue_infos, priorities, ext_ptrs and features outlive the call.
        let device = unsafe { instance.create_device(choice.physical_device, &create_info, None) }
            .map_err(|e| RenderError::init(format!("vkCreateDevice: {e}")))?;
        let graphics_queue = unsafe { device.get_device_queue(choice.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(choice.present_family, 0) };
        let swapchain_loader = swapchain::Device::new(instance, &device);

        logger.info("Logical device created");
        Ok(Self {
            device,
            swapchain_loader,
            choice,
            graphics_queue,
            present_queue,
            name,
            logger,
        })
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    pub fn choice(&self) -> &PhysicalDeviceChoice {
        &self.choice
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wait_idle(&self) -> Result<(), RenderError> {
        unsafe { self.device.device_wait_idle() }.map_err(vk_error("vkDeviceWaitIdle"))
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        self.logger.debug("Logical device destroying...");
        // SAFETY: all device children were dropped first.
        unsafe { self.device.destroy_device(None) };
        self.logger.debug("Logical device destroyed");
    }
}
