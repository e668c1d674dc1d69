//! Error types shared by the whole crate.
use std::{ffi::CString, fmt, panic::Location, path::PathBuf};

use ash::{vk, LoadingError};
use thiserror::Error;

use crate::settings::ConfigError;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A failed Vulkan call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VulkanError(pub vk::Result);

impl VulkanError {
    /// The raw result code.
    #[inline]
    pub fn result(&self) -> vk::Result {
        self.0
    }

    /// Human readable text for a result code.
    pub fn description(result: vk::Result) -> String {
        let text = match result {
            vk::Result::SUCCESS => "VK_SUCCESS: command successfully completed",
            vk::Result::NOT_READY => "VK_NOT_READY: a fence or query has not yet completed",
            vk::Result::TIMEOUT => {
                "VK_TIMEOUT: a wait operation has not completed in the specified time"
            }
            vk::Result::EVENT_SET => "VK_EVENT_SET: an event is signaled",
            vk::Result::EVENT_RESET => "VK_EVENT_RESET: an event is unsignaled",
            vk::Result::INCOMPLETE => "VK_INCOMPLETE: a return array was too small for the result",
            vk::Result::SUBOPTIMAL_KHR => {
                "VK_SUBOPTIMAL_KHR: a swapchain no longer matches the surface properties exactly, \
                 but can still be used to present to the surface successfully"
            }
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                "VK_ERROR_OUT_OF_HOST_MEMORY: a host memory allocation has failed"
            }
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                "VK_ERROR_OUT_OF_DEVICE_MEMORY: a device memory allocation has failed"
            }
            vk::Result::ERROR_INITIALIZATION_FAILED => {
                "VK_ERROR_INITIALIZATION_FAILED: initialization of an object could not be \
                 completed for implementation-specific reasons"
            }
            vk::Result::ERROR_DEVICE_LOST => {
                "VK_ERROR_DEVICE_LOST: the logical or physical device has been lost"
            }
            vk::Result::ERROR_MEMORY_MAP_FAILED => {
                "VK_ERROR_MEMORY_MAP_FAILED: mapping of a memory object has failed"
            }
            vk::Result::ERROR_LAYER_NOT_PRESENT => {
                "VK_ERROR_LAYER_NOT_PRESENT: a requested layer is not present or could not be \
                 loaded"
            }
            vk::Result::ERROR_EXTENSION_NOT_PRESENT => {
                "VK_ERROR_EXTENSION_NOT_PRESENT: a requested extension is not supported"
            }
            vk::Result::ERROR_FEATURE_NOT_PRESENT => {
                "VK_ERROR_FEATURE_NOT_PRESENT: a requested feature is not supported"
            }
            vk::Result::ERROR_INCOMPATIBLE_DRIVER => {
                "VK_ERROR_INCOMPATIBLE_DRIVER: the requested version of Vulkan is not supported \
                 by the driver or is otherwise incompatible for implementation-specific reasons"
            }
            vk::Result::ERROR_TOO_MANY_OBJECTS => {
                "VK_ERROR_TOO_MANY_OBJECTS: too many objects of the type have already been created"
            }
            vk::Result::ERROR_FORMAT_NOT_SUPPORTED => {
                "VK_ERROR_FORMAT_NOT_SUPPORTED: a requested format is not supported on this device"
            }
            vk::Result::ERROR_FRAGMENTED_POOL => {
                "VK_ERROR_FRAGMENTED_POOL: a pool allocation has failed due to fragmentation of \
                 the pool's memory"
            }
            vk::Result::ERROR_UNKNOWN => {
                "VK_ERROR_UNKNOWN: an unknown error has occurred; either the application has \
                 provided invalid input, or an implementation failure has occurred"
            }
            vk::Result::ERROR_OUT_OF_POOL_MEMORY => {
                "VK_ERROR_OUT_OF_POOL_MEMORY: a pool memory allocation has failed"
            }
            vk::Result::ERROR_INVALID_EXTERNAL_HANDLE => {
                "VK_ERROR_INVALID_EXTERNAL_HANDLE: an external handle is not a valid handle of \
                 the specified type"
            }
            vk::Result::ERROR_FRAGMENTATION => {
                "VK_ERROR_FRAGMENTATION: a descriptor pool creation has failed due to \
                 fragmentation"
            }
            vk::Result::ERROR_INVALID_OPAQUE_CAPTURE_ADDRESS => {
                "VK_ERROR_INVALID_OPAQUE_CAPTURE_ADDRESS: a buffer creation or memory allocation \
                 failed because the requested address is not available"
            }
            vk::Result::ERROR_SURFACE_LOST_KHR => {
                "VK_ERROR_SURFACE_LOST_KHR: a surface is no longer available"
            }
            vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR => {
                "VK_ERROR_NATIVE_WINDOW_IN_USE_KHR: the requested window is already in use by \
                 Vulkan or another API in a manner which prevents it from being used again"
            }
            vk::Result::ERROR_OUT_OF_DATE_KHR => {
                "VK_ERROR_OUT_OF_DATE_KHR: a surface has changed in such a way that it is no \
                 longer compatible with the swapchain"
            }
            vk::Result::ERROR_INCOMPATIBLE_DISPLAY_KHR => {
                "VK_ERROR_INCOMPATIBLE_DISPLAY_KHR: the display used by a swapchain does not use \
                 the same presentable image layout, or is incompatible in a way that prevents \
                 sharing an image"
            }
            vk::Result::ERROR_VALIDATION_FAILED_EXT => {
                "VK_ERROR_VALIDATION_FAILED_EXT: a validation layer found an error"
            }
            vk::Result::ERROR_INVALID_SHADER_NV => {
                "VK_ERROR_INVALID_SHADER_NV: one or more shaders failed to compile or link"
            }
            vk::Result::ERROR_FULL_SCREEN_EXCLUSIVE_MODE_LOST_EXT => {
                "VK_ERROR_FULL_SCREEN_EXCLUSIVE_MODE_LOST_EXT: an operation on a swapchain \
                 created with exclusive full-screen access failed as it did not have exclusive \
                 full-screen access"
            }
            vk::Result::THREAD_IDLE_KHR => {
                "VK_THREAD_IDLE_KHR: a deferred operation is not complete but there is currently \
                 no work for this thread to do at the time of this call"
            }
            vk::Result::THREAD_DONE_KHR => {
                "VK_THREAD_DONE_KHR: a deferred operation is not complete but there is no work \
                 remaining to assign to additional threads"
            }
            vk::Result::OPERATION_DEFERRED_KHR => {
                "VK_OPERATION_DEFERRED_KHR: a deferred operation was requested and at least some \
                 of the work was deferred"
            }
            vk::Result::OPERATION_NOT_DEFERRED_KHR => {
                "VK_OPERATION_NOT_DEFERRED_KHR: a deferred operation was requested and no \
                 operations were deferred"
            }
            vk::Result::PIPELINE_COMPILE_REQUIRED => {
                "VK_PIPELINE_COMPILE_REQUIRED: a requested pipeline creation would have required \
                 compilation, but the application requested compilation to not be performed"
            }
            other => return format!("Unknown error code {}", other.as_raw()),
        };
        text.to_owned()
    }
}

impl fmt::Display for VulkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vulkan error ({})", Self::description(self.0))
    }
}

impl std::error::Error for VulkanError {}

/// Checks a raw result code.
///
/// Error codes become [`VulkanError`]s. Success codes other than
/// `VK_SUCCESS` are logged and accepted.
pub fn check_vk_result(result: vk::Result) -> Result<(), VulkanError> {
    if result.as_raw() < 0 {
        return Err(VulkanError(result));
    }
    if result != vk::Result::SUCCESS {
        log::info!("{}.", VulkanError::description(result));
    }
    Ok(())
}

/// Joins C strings for display.
struct Names<'a>(&'a [CString]);

impl fmt::Display for Names<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(&name.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Everything that can go wrong in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Generic runtime failure with the location where it was raised.
    #[error("{message} in {}:{}", .location.file(), .location.line())]
    Runtime {
        /// What happened.
        message: String,
        /// Where it happened.
        location: &'static Location<'static>,
    },
    /// The windowing layer failed to create a window.
    #[error("Window error: {0}")]
    Window(#[from] winit::error::OsError),
    /// A texture file could not be decoded.
    #[error("Failed to load texture file {}", .path.display())]
    ImageLoad {
        /// The offending file.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: ::image::ImageError,
    },
    /// A Vulkan call failed.
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
    /// The Vulkan loader library could not be opened.
    #[error("Vulkan loader not found")]
    Loader(#[from] LoadingError),
    /// One or more required layers are missing.
    #[error("Required layers not supported: {}", Names(.0))]
    LayersNotPresent(Vec<CString>),
    /// One or more required extensions are missing.
    #[error("Required extensions not supported: {}", Names(.0))]
    ExtensionsNotPresent(Vec<CString>),
    /// A file could not be read.
    #[error("Failed to read {}", .path.display())]
    Io {
        /// The offending file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Settings could not be loaded or saved.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A shader could not be turned into SPIR-V.
    #[error("Failed to compile {stage} shader\n{log}")]
    ShaderCompilation {
        /// Display name of the stage.
        stage: &'static str,
        /// Compiler output.
        log: String,
    },
}

impl Error {
    /// Creates a [`Error::Runtime`] at the caller's location.
    #[track_caller]
    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime {
            message: message.into(),
            location: Location::caller(),
        }
    }

    /// The Vulkan result code, if this is a Vulkan error.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            Error::Vulkan(err) => Some(err.0),
            _ => None,
        }
    }
}

impl From<vk::Result> for Error {
    fn from(result: vk::Result) -> Self {
        Error::Vulkan(VulkanError(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_error_message() {
        let err = Error::from(vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(
            err.to_string(),
            "Vulkan error (VK_ERROR_DEVICE_LOST: the logical or physical device has been lost)"
        );
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_DEVICE_LOST));
    }

    #[test]
    fn unknown_code() {
        assert_eq!(
            VulkanError::description(vk::Result::from_raw(-12345)),
            "Unknown error code -12345"
        );
    }

    #[test]
    fn check_results() {
        assert!(check_vk_result(vk::Result::SUCCESS).is_ok());
        assert!(check_vk_result(vk::Result::SUBOPTIMAL_KHR).is_ok());
        assert_eq!(
            check_vk_result(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            Err(VulkanError(vk::Result::ERROR_OUT_OF_HOST_MEMORY))
        );
    }

    #[test]
    fn runtime_records_location() {
        let err = Error::runtime("Failed to find depth format");
        let text = err.to_string();
        assert!(text.starts_with("Failed to find depth format in "));
        assert!(text.contains("error.rs:"));
    }

    #[test]
    fn missing_names_are_listed() {
        let err = Error::ExtensionsNotPresent(vec![
            CString::new("VK_KHR_surface").unwrap(),
            CString::new("VK_KHR_xcb_surface").unwrap(),
        ]);
        assert_eq!(
            err.to_string(),
            "Required extensions not supported: VK_KHR_surface VK_KHR_xcb_surface"
        );
    }
}
