//! Vulkan instance creation.
use std::{
    borrow::Cow,
    ffi::{c_void, CStr, CString, NulError},
    fmt,
};

use ash::{
    extensions::{ext::DebugUtils, khr::Surface},
    vk, Entry, Instance,
};
use cstr::cstr;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

use crate::{
    util::{to_blue_string, to_red_string, to_yellow_string},
    AbcgSmallVec, Error, Result,
};

/// Name of the Khronos validation layer.
pub const VALIDATION_LAYER: &CStr = cstr!("VK_LAYER_KHRONOS_validation");

/// Require, request or disable validation layers.
#[derive(Debug, Copy, Clone)]
pub enum ValidationLayers {
    /// Instance creation will fail if there are no validation layers installed.
    Require,
    /// If there are validation layers installed, enable them.
    Request,
    /// Don't enable validation layers.
    Disable,
}

impl ValidationLayers {
    /// Request layers in debug builds, disable them in release builds.
    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            ValidationLayers::Request
        } else {
            ValidationLayers::Disable
        }
    }
}

/// Enable or disable the debug messenger, optionally providing a custom callback.
#[derive(Copy, Clone)]
pub enum DebugMessenger {
    /// Enables the debug messenger with the [`default_debug_callback`]
    /// callback.
    Default,
    /// Enables the debug messenger with a custom, user-provided callback.
    Custom {
        /// The user provided callback function.
        callback: vk::PFN_vkDebugUtilsMessengerCallbackEXT,
        /// A user data pointer passed to the debug callback.
        user_data_pointer: *mut c_void,
    },
    /// Disables the debug messenger.
    Disable,
}

fn message_type_name(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL) {
        "general"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "unknown"
    }
}

fn severity_name(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> &'static str {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        "error"
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        "warning"
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        "info"
    } else {
        "verbose"
    }
}

/// The default debug callback used in [`DebugMessenger::Default`].
///
/// Forwards messages to the `log` facade with a colored
/// `[vulkan <type> <severity>]:` header.
pub unsafe extern "system" fn default_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        Cow::Borrowed("")
    } else {
        CStr::from_ptr((*p_callback_data).p_message).to_string_lossy()
    };

    let header = format!(
        "[vulkan {} {}]:",
        message_type_name(message_type),
        severity_name(message_severity)
    );

    use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
    if message_severity.contains(Severity::ERROR) {
        log::error!("{} {message}", to_red_string(&header));
    } else if message_severity.contains(Severity::WARNING) {
        log::warn!("{} {message}", to_yellow_string(&header));
    } else if message_severity.contains(Severity::INFO) {
        log::info!("{} {message}", to_blue_string(&header));
    } else {
        log::debug!("{header} {message}");
    }

    vk::FALSE
}

/// Metadata for after instance creation.
#[derive(Clone)]
pub struct InstanceMetadata {
    api_version: u32,
    enabled_layers: AbcgSmallVec<CString>,
    enabled_extensions: AbcgSmallVec<CString>,
}

impl InstanceMetadata {
    /// Retrieve the used instance API version.
    #[inline]
    pub fn api_version_raw(&self) -> u32 {
        self.api_version
    }

    /// Retrieve the used instance API major version.
    #[inline]
    pub fn api_version_major(&self) -> u32 {
        vk::api_version_major(self.api_version)
    }

    /// Retrieve the used instance API minor version.
    #[inline]
    pub fn api_version_minor(&self) -> u32 {
        vk::api_version_minor(self.api_version)
    }

    /// List of all enabled layers in the instance.
    #[inline]
    pub fn enabled_layers(&self) -> &[CString] {
        &self.enabled_layers
    }

    /// Returns true if `layer` is enabled.
    #[inline]
    pub fn is_layer_enabled(&self, layer: &CStr) -> bool {
        self.enabled_layers.iter().any(|e| e.as_c_str() == layer)
    }

    /// List of all enabled extensions in the instance.
    #[inline]
    pub fn enabled_extensions(&self) -> &[CString] {
        &self.enabled_extensions
    }

    /// Returns true if `extension` is enabled.
    #[inline]
    pub fn is_extension_enabled(&self, extension: &CStr) -> bool {
        self.enabled_extensions
            .iter()
            .any(|e| e.as_c_str() == extension)
    }
}

impl fmt::Debug for InstanceMetadata {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("InstanceMetadata")
            .field(
                "api_version",
                &format_args!("{}.{}", self.api_version_major(), self.api_version_minor()),
            )
            .field("enabled_layers", &self.enabled_layers)
            .field("enabled_extensions", &self.enabled_extensions)
            .finish()
    }
}

/// Splits requested names into the ones to enable and the required ones that
/// are missing.
fn partition_supported(
    wanted: &[(CString, bool)],
    supported: &[&CStr],
) -> (AbcgSmallVec<CString>, Vec<CString>) {
    let mut enabled = AbcgSmallVec::new();
    let mut missing = Vec::new();
    for (name, required) in wanted {
        let present = supported.iter().any(|s| *s == name.as_c_str());
        match (required, present) {
            (_, true) => {
                if !enabled.contains(name) {
                    enabled.push(name.clone());
                }
            }
            (true, false) => missing.push(name.clone()),
            (false, false) => log::debug!("Skipping unsupported {:?}", name),
        }
    }
    (enabled, missing)
}

/// Builds a [`VulkanInstance`].
pub struct InstanceBuilder {
    app_name: CString,
    app_version: u32,
    engine_name: CString,
    engine_version: u32,
    required_api_version: u32,
    layers: AbcgSmallVec<(CString, bool)>,
    extensions: AbcgSmallVec<(CString, bool)>,
    debug_messenger: DebugMessenger,
    debug_message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    debug_message_type: vk::DebugUtilsMessageTypeFlagsEXT,
}

impl InstanceBuilder {
    /// Create a new instance builder with opinionated defaults.
    #[inline]
    pub fn new() -> Self {
        InstanceBuilder {
            app_name: CString::default(),
            app_version: vk::make_api_version(0, 1, 0, 0),
            engine_name: cstr!("ABCg").to_owned(),
            engine_version: vk::make_api_version(0, 3, 0, 0),
            required_api_version: vk::API_VERSION_1_1,
            layers: AbcgSmallVec::new(),
            extensions: AbcgSmallVec::new(),
            debug_messenger: DebugMessenger::Disable,
            debug_message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            debug_message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        }
    }

    /// Application name to advertise.
    #[inline]
    pub fn app_name(mut self, app_name: &str) -> Result<Self, NulError> {
        self.app_name = CString::new(app_name)?;
        Ok(self)
    }

    /// Application version to advertise.
    #[inline]
    pub fn app_version(mut self, major: u32, minor: u32) -> Self {
        self.app_version = vk::make_api_version(0, major, minor, 0);
        self
    }

    /// Engine name to advertise.
    #[inline]
    pub fn engine_name(mut self, engine_name: &str) -> Result<Self, NulError> {
        self.engine_name = CString::new(engine_name)?;
        Ok(self)
    }

    /// Engine version to advertise.
    #[inline]
    pub fn engine_version(mut self, major: u32, minor: u32) -> Self {
        self.engine_version = vk::make_api_version(0, major, minor, 0);
        self
    }

    /// Instance API version to be used as minimum requirement.
    #[inline]
    pub fn require_api_version(mut self, major: u32, minor: u32) -> Self {
        self.required_api_version = vk::make_api_version(0, major, minor, 0);
        self
    }

    /// Try to enable this layer, ignore if it's not supported.
    #[inline]
    pub fn request_layer(mut self, layer: &CStr) -> Self {
        self.layers.push((layer.to_owned(), false));
        self
    }

    /// Enable this layer, fail if it's not supported.
    #[inline]
    pub fn require_layer(mut self, layer: &CStr) -> Self {
        self.layers.push((layer.to_owned(), true));
        self
    }

    /// Try to enable this extension, ignore if it is not supported.
    #[inline]
    pub fn request_extension(mut self, extension: &CStr) -> Self {
        self.extensions.push((extension.to_owned(), false));
        self
    }

    /// Enable this extension, fail if it's not supported.
    #[inline]
    pub fn require_extension(mut self, extension: &CStr) -> Self {
        self.extensions.push((extension.to_owned(), true));
        self
    }

    /// Adds a requirement on all Vulkan extensions necessary to create a
    /// surface for `display_handle`.
    pub fn require_surface_extensions(
        mut self,
        display_handle: &impl HasRawDisplayHandle,
    ) -> Result<Self> {
        let required_extensions =
            ash_window::enumerate_required_extensions(display_handle.raw_display_handle())?;
        self.extensions.extend(
            required_extensions
                .iter()
                .map(|&name| (unsafe { CStr::from_ptr(name) }.to_owned(), true)),
        );
        Ok(self)
    }

    /// Add Khronos validation layers.
    #[inline]
    pub fn validation_layers(mut self, validation_layers: ValidationLayers) -> Self {
        match validation_layers {
            ValidationLayers::Require | ValidationLayers::Request => {
                self.layers.push((
                    VALIDATION_LAYER.to_owned(),
                    matches!(validation_layers, ValidationLayers::Require),
                ));
            }
            ValidationLayers::Disable => (),
        }

        self
    }

    /// Try to create a debug messenger with the config provided by
    /// `debug_messenger`.
    #[inline]
    pub fn request_debug_messenger(mut self, debug_messenger: DebugMessenger) -> Self {
        if !matches!(debug_messenger, DebugMessenger::Disable) {
            self.extensions.push((DebugUtils::name().to_owned(), false));
        }

        self.debug_messenger = debug_messenger;
        self
    }

    /// Filter for the severity of debug messages.
    #[inline]
    pub fn debug_message_severity(
        mut self,
        severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    ) -> Self {
        self.debug_message_severity = severity;
        self
    }

    /// Filter for the type of debug messages.
    #[inline]
    pub fn debug_message_type(mut self, ty: vk::DebugUtilsMessageTypeFlagsEXT) -> Self {
        self.debug_message_type = ty;
        self
    }

    /// Creates the instance, and the debug messenger if it was requested and
    /// the debug utils extension is available.
    pub fn build(self, entry: Entry) -> Result<VulkanInstance> {
        let instance_version = entry
            .try_enumerate_instance_version()?
            .unwrap_or(vk::API_VERSION_1_0);
        if instance_version < self.required_api_version {
            return Err(vk::Result::ERROR_INCOMPATIBLE_DRIVER.into());
        }

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&self.app_name)
            .application_version(self.app_version)
            .engine_name(&self.engine_name)
            .engine_version(self.engine_version)
            .api_version(self.required_api_version);

        let layer_properties = entry.enumerate_instance_layer_properties()?;
        let supported_layers: Vec<&CStr> = layer_properties
            .iter()
            .map(|p| unsafe { CStr::from_ptr(p.layer_name.as_ptr()) })
            .collect();
        let (enabled_layers, layers_not_present) =
            partition_supported(&self.layers, &supported_layers);
        if !layers_not_present.is_empty() {
            return Err(Error::LayersNotPresent(layers_not_present));
        }

        let mut extension_properties = entry.enumerate_instance_extension_properties(None)?;
        for layer_name in &enabled_layers {
            extension_properties.extend(
                entry.enumerate_instance_extension_properties(Some(layer_name.as_c_str()))?,
            );
        }
        let supported_extensions: Vec<&CStr> = extension_properties
            .iter()
            .map(|p| unsafe { CStr::from_ptr(p.extension_name.as_ptr()) })
            .collect();
        let (enabled_extensions, extensions_not_present) =
            partition_supported(&self.extensions, &supported_extensions);
        if !extensions_not_present.is_empty() {
            return Err(Error::ExtensionsNotPresent(extensions_not_present));
        }

        let is_debug_utils_enabled = enabled_extensions
            .iter()
            .any(|e| e.as_c_str() == DebugUtils::name());
        let messenger_info = match (self.debug_messenger, is_debug_utils_enabled) {
            (DebugMessenger::Disable, _) | (_, false) => None,
            (DebugMessenger::Default, true) => Some(
                vk::DebugUtilsMessengerCreateInfoEXT::builder()
                    .message_severity(self.debug_message_severity)
                    .message_type(self.debug_message_type)
                    .pfn_user_callback(Some(default_debug_callback))
                    .build(),
            ),
            (
                DebugMessenger::Custom {
                    callback,
                    user_data_pointer,
                },
                true,
            ) => Some(
                vk::DebugUtilsMessengerCreateInfoEXT::builder()
                    .message_severity(self.debug_message_severity)
                    .message_type(self.debug_message_type)
                    .pfn_user_callback(callback)
                    .user_data(user_data_pointer)
                    .build(),
            ),
        };

        let layer_ptrs: AbcgSmallVec<_> = enabled_layers.iter().map(|l| l.as_ptr()).collect();
        let extension_ptrs: AbcgSmallVec<_> =
            enabled_extensions.iter().map(|e| e.as_ptr()).collect();
        let mut instance_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs);

        let mut instance_messenger_info;
        if let Some(info) = messenger_info {
            instance_messenger_info = info;
            instance_info = instance_info.push_next(&mut instance_messenger_info);
        }

        let instance = unsafe { entry.create_instance(&instance_info, None)? };

        let debug_utils = match messenger_info {
            Some(info) => {
                let loader = DebugUtils::new(&entry, &instance);
                match unsafe { loader.create_debug_utils_messenger(&info, None) } {
                    Ok(messenger) => Some((loader, messenger)),
                    Err(err) => {
                        unsafe { instance.destroy_instance(None) };
                        return Err(err.into());
                    }
                }
            }
            None => None,
        };

        let surface_loader = Surface::new(&entry, &instance);
        let metadata = InstanceMetadata {
            api_version: self.required_api_version,
            enabled_layers,
            enabled_extensions,
        };
        log::debug!("Created Vulkan instance {:?}", metadata);

        Ok(VulkanInstance {
            entry,
            instance,
            debug_utils,
            surface_loader,
            metadata,
        })
    }
}

impl Default for InstanceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A Vulkan instance together with its debug messenger and surface loader.
pub struct VulkanInstance {
    entry: Entry,
    instance: Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface_loader: Surface,
    metadata: InstanceMetadata,
}

impl VulkanInstance {
    /// The loaded Vulkan entry points.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// The `ash` instance.
    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Loader for `VK_KHR_surface` functions.
    #[inline]
    pub fn surface_loader(&self) -> &Surface {
        &self.surface_loader
    }

    /// What the instance was created with.
    #[inline]
    pub fn metadata(&self) -> &InstanceMetadata {
        &self.metadata
    }

    /// Creates a presentation surface for a window.
    pub fn create_surface(
        &self,
        window: &(impl HasRawDisplayHandle + HasRawWindowHandle),
    ) -> Result<vk::SurfaceKHR> {
        let surface = unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )?
        };
        Ok(surface)
    }

    /// Destroys a surface created with [`VulkanInstance::create_surface`].
    pub unsafe fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        if surface != vk::SurfaceKHR::null() {
            self.surface_loader.destroy_surface(surface, None);
        }
    }

    /// Destroys the debug messenger, then the instance.
    pub unsafe fn destroy(&mut self) {
        if let Some((loader, messenger)) = self.debug_utils.take() {
            loader.destroy_debug_utils_messenger(messenger, None);
        }
        self.instance.destroy_instance(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<CString> {
        list.iter().map(|s| CString::new(*s).unwrap()).collect()
    }

    #[test]
    fn message_names() {
        assert_eq!(
            message_type_name(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION),
            "validation"
        );
        assert_eq!(
            message_type_name(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE),
            "performance"
        );
        assert_eq!(
            severity_name(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING),
            "warning"
        );
        assert_eq!(
            severity_name(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE),
            "verbose"
        );
    }

    #[test]
    fn required_missing_names_are_reported() {
        let supported = names(&["VK_KHR_surface", "VK_EXT_debug_utils"]);
        let supported: Vec<&CStr> = supported.iter().map(|s| s.as_c_str()).collect();
        let wanted: Vec<(CString, bool)> = vec![
            (CString::new("VK_KHR_surface").unwrap(), true),
            (CString::new("VK_KHR_xcb_surface").unwrap(), true),
            (CString::new("VK_EXT_debug_utils").unwrap(), false),
            (CString::new("VK_EXT_validation_features").unwrap(), false),
        ];
        let (enabled, missing) = partition_supported(&wanted, &supported);
        assert_eq!(
            enabled.to_vec(),
            names(&["VK_KHR_surface", "VK_EXT_debug_utils"])
        );
        assert_eq!(missing, names(&["VK_KHR_xcb_surface"]));
    }

    #[test]
    fn duplicates_are_enabled_once() {
        let supported = names(&["VK_KHR_surface"]);
        let supported: Vec<&CStr> = supported.iter().map(|s| s.as_c_str()).collect();
        let wanted = vec![
            (CString::new("VK_KHR_surface").unwrap(), true),
            (CString::new("VK_KHR_surface").unwrap(), false),
        ];
        let (enabled, missing) = partition_supported(&wanted, &supported);
        assert_eq!(enabled.len(), 1);
        assert!(missing.is_empty());
    }

    #[test]
    fn validation_layer_is_requested() {
        let builder = InstanceBuilder::new()
            .validation_layers(ValidationLayers::Request)
            .request_debug_messenger(DebugMessenger::Default);
        assert_eq!(builder.layers.len(), 1);
        assert_eq!(builder.layers[0].0.as_c_str(), VALIDATION_LAYER);
        assert!(!builder.layers[0].1);
        assert!(builder
            .extensions
            .iter()
            .any(|(e, _)| e.as_c_str() == DebugUtils::name()));
    }
}
