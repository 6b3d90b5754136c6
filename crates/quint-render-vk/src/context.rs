// SPDX-License-Identifier: CEPL-1.0
//! The Vulkan instance and, when validation is on, its debug messenger.
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use ash::ext::debug_utils;
use ash::{vk, Entry, Instance};
use quint_core::{LogLevel, Logger};
use quint_render::RenderError;
use raw_window_handle::RawDisplayHandle;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Debug)]
pub struct ContextOptions {
    pub app_name: String,
    pub validation: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            app_name: "quintessence".to_owned(),
            validation: cfg!(debug_assertions),
        }
    }
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

/// Owns the instance. Everything else in the backend borrows from it, so it is
/// the last Vulkan object to go.
pub struct GraphicsContext {
    debug: Option<DebugMessenger>,
    instance: Instance,
    entry: Entry,
    // The messenger holds a raw pointer to this logger; it must outlive it.
    logger: Arc<Logger>,
}

impl GraphicsContext {
    pub fn new(
        display: RawDisplayHandle,
        options: &ContextOptions,
        logger: Arc<Logger>,
    ) -> Result<Self, RenderError> {
        logger.debug("Graphics context creating...");
        let entry = Entry::linked();

        let platform_exts = ash_window::enumerate_required_extensions(display)
            .map_err(|e| RenderError::init(format!("enumerate_required_extensions: {e}")))?;
        // SAFETY: ash-window hands out pointers to static, NUL-terminated names.
        let mut extensions: Vec<&CStr> = platform_exts
            .iter()
            .map(|&p| unsafe { CStr::from_ptr(p) })
            .collect();
        let mut layers: Vec<&CStr> = Vec::new();
        if options.validation {
            layers.push(VALIDATION_LAYER);
            extensions.push(debug_utils::NAME);
        }

        check_instance_support(&entry, &layers, &extensions)?;

        let app_name = CString::new(options.app_name.as_str())
            .map_err(|e| RenderError::init(format!("application name: {e}")))?;
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: app_name.as_ptr(),
            application_version: vk::make_api_version(0, 1, 0, 0),
            p_engine_name: app_name.as_ptr(),
            engine_version: vk::make_api_version(0, 1, 0, 0),
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };

        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();
        let ext_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();
        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_layer_count: layer_ptrs.len() as u32,
            pp_enabled_layer_names: layer_ptrs.as_ptr(),
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            ..Default::default()
        };

        // SAFETY: every pointer in create_info outlives this call.
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| RenderError::init(format!("vkCreateInstance: {e}")))?;

        let mut context = Self {
            debug: None,
            instance,
            entry,
            logger,
        };
        if options.validation {
            context.install_messenger()?;
        }

        context.logger.info(format!(
            "Graphics context created (validation {})",
            if options.validation { "on" } else { "off" }
        ));
        Ok(context)
    }

    fn install_messenger(&mut self) -> Result<(), RenderError> {
        let loader = debug_utils::Instance::new(&self.entry, &self.instance);
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            p_user_data: Arc::as_ptr(&self.logger) as *mut c_void,
            ..Default::default()
        };
        // SAFETY: the user-data pointer stays valid until the messenger is
        // destroyed in Drop, before `self.logger` is released.
        let handle = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .map_err(|e| RenderError::init(format!("vkCreateDebugUtilsMessengerEXT: {e}")))?;
        self.debug = Some(DebugMessenger { loader, handle });
        self.logger.debug("Debug messenger installed");
        Ok(())
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        self.logger.debug("Graphics context destroying...");
        // SAFETY: every child object was dropped before the context.
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.handle, None);
            }
            self.instance.destroy_instance(None);
        }
        self.logger.debug("Graphics context destroyed");
    }
}

fn check_instance_support(
    entry: &Entry,
    layers: &[&CStr],
    extensions: &[&CStr],
) -> Result<(), RenderError> {
    // SAFETY: plain enumeration calls on a loaded entry.
    let available_layers = unsafe { entry.enumerate_instance_layer_properties() }
        .map_err(|e| RenderError::init(format!("vkEnumerateInstanceLayerProperties: {e}")))?;
    let layer_names: Vec<&CStr> = available_layers
        .iter()
        .filter_map(|l| l.layer_name_as_c_str().ok())
        .collect();
    let missing = missing_names(layers, &layer_names);
    if !missing.is_empty() {
        return Err(RenderError::init(format!(
            "instance layers not available: {}",
            missing.join(", ")
        )));
    }

    let available_exts = unsafe { entry.enumerate_instance_extension_properties(None) }
        .map_err(|e| {
            RenderError::init(format!("vkEnumerateInstanceExtensionProperties: {e}"))
        })?;
    let ext_names: Vec<&CStr> = available_exts
        .iter()
        .filter_map(|e| e.extension_name_as_c_str().ok())
        .collect();
    let missing = missing_names(extensions, &ext_names);
    if !missing.is_empty() {
        return Err(RenderError::init(format!(
            "instance extensions not available: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Names in `required` that do not appear in `available`.
pub(crate) fn missing_names(required: &[&CStr], available: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !available.contains(*name))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

fn level_for(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> LogLevel {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        LogLevel::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        LogLevel::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        LogLevel::Info
    } else {
        LogLevel::Debug
    }
}

fn kind_for(types: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user_data: *mut c_void,
) -> vk::Bool32 {
    // Unwinding across the driver boundary is undefined behavior.
    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
        if data.is_null() || user_data.is_null() {
            return;
        }
        // SAFETY: the driver passes a valid callback struct for the duration
        // of the call, and user_data is the Arc<Logger> pointer installed in
        // `install_messenger`.
        let (message, logger) = unsafe {
            let p_message = (*data).p_message;
            let message = if p_message.is_null() {
                String::from("<no message>")
            } else {
                CStr::from_ptr(p_message).to_string_lossy().into_owned()
            };
            (message, &*(user_data as *const Logger))
        };
        logger.write(
            level_for(severity),
            &format!("[vulkan:{}] {message}", kind_for(types)),
        );
    }));
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_only_absent_names() {
        let required = [VALIDATION_LAYER, debug_utils::NAME];
        let available = [debug_utils::NAME, c"VK_KHR_surface"];
        assert_eq!(
            missing_names(&required, &available),
            vec!["VK_LAYER_KHRONOS_validation".to_owned()]
        );
        assert!(missing_names(&[], &available).is_empty());
    }

    #[test]
    fn severities_map_to_log_levels() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        assert_eq!(level_for(S::ERROR), LogLevel::Error);
        assert_eq!(level_for(S::WARNING), LogLevel::Warn);
        assert_eq!(level_for(S::INFO), LogLevel::Info);
        assert_eq!(level_for(S::VERBOSE), LogLevel::Debug);
    }

    #[test]
    fn message_types_are_labelled() {
        use vk::DebugUtilsMessageTypeFlagsEXT as T;
        assert_eq!(kind_for(T::VALIDATION), "validation");
        assert_eq!(kind_for(T::PERFORMANCE), "performance");
        assert_eq!(kind_for(T::GENERAL), "general");
    }

    #[test]
    fn callback_routes_into_the_logger_and_never_aborts() {
        use quint_core::LogSink;
        use std::sync::Mutex;

        #[derive(Clone, Default)]
        struct Capture(Arc<Mutex<Vec<(LogLevel, String)>>>);
        impl LogSink for Capture {
            fn write(&self, level: LogLevel, message: &str) {
                self.0.lock().unwrap().push((level, message.to_owned()));
            }
        }

        let capture = Capture::default();
        let logger = Arc::new(Logger::new().with_sink(capture.clone()));
        let text = c"vkCreateImage: bad usage";
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message: text.as_ptr(),
            ..Default::default()
        };

        let result = unsafe {
            debug_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                Arc::as_ptr(&logger) as *mut c_void,
            )
        };
        assert_eq!(result, vk::FALSE);
        // A null payload is ignored.
        let result = unsafe {
            debug_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
                std::ptr::null(),
                Arc::as_ptr(&logger) as *mut c_void,
            )
        };
        assert_eq!(result, vk::FALSE);

        let seen = capture.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, LogLevel::Error);
        assert_eq!(seen[0].1, "[vulkan:validation] vkCreateImage: bad usage");
    }
}
