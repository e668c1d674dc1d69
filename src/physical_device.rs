//! Physical device selection.
use std::{
    borrow::Cow,
    ffi::{CStr, CString},
};

use ash::{extensions::khr::Surface, vk, Instance};

use crate::{AbcgSmallVec, Error, Result, VulkanInstance};

/// Queue family indices used by the device.
///
/// `compute` and `transfer` fall back to the graphics family when the device
/// has no better match.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QueueFamilies {
    /// First family with graphics support.
    pub graphics: u32,
    /// First family that can present to the surface.
    pub present: u32,
    /// Last family with compute support.
    pub compute: u32,
    /// Family used for uploads.
    pub transfer: u32,
}

impl QueueFamilies {
    /// Picks queue families from `properties`.
    ///
    /// `present_support` is asked for each family index. With
    /// `separate_transfer`, the transfer family must differ from both the
    /// graphics and the compute family.
    pub fn find(
        properties: &[vk::QueueFamilyProperties],
        mut present_support: impl FnMut(u32) -> Result<bool>,
        separate_transfer: bool,
    ) -> Result<Self> {
        let with_flag = |flag: vk::QueueFlags| {
            properties
                .iter()
                .enumerate()
                .filter(move |(_, p)| p.queue_count > 0 && p.queue_flags.contains(flag))
                .map(|(i, _)| i as u32)
        };

        let graphics = with_flag(vk::QueueFlags::GRAPHICS).next();
        let compute = with_flag(vk::QueueFlags::COMPUTE).last();

        let mut present = None;
        for (i, p) in properties.iter().enumerate() {
            if p.queue_count > 0 && present_support(i as u32)? {
                present = Some(i as u32);
                break;
            }
        }

        let (graphics, present) = match (graphics, present) {
            (Some(graphics), Some(present)) => (graphics, present),
            _ => return Err(Error::runtime("Device does not have a graphics or present queue")),
        };
        let compute = compute.unwrap_or(graphics);

        let transfer = if separate_transfer {
            with_flag(vk::QueueFlags::TRANSFER)
                .filter(|&i| i != graphics && i != compute)
                .last()
                .ok_or_else(|| Error::runtime("Device does not have a separate transfer queue"))?
        } else {
            with_flag(vk::QueueFlags::TRANSFER).next().unwrap_or(graphics)
        };

        Ok(QueueFamilies {
            graphics,
            present,
            compute,
            transfer,
        })
    }

    /// Distinct family indices, in graphics, present, compute, transfer order.
    pub fn unique(&self) -> AbcgSmallVec<u32> {
        let mut unique = AbcgSmallVec::new();
        for family in [self.graphics, self.present, self.compute, self.transfer] {
            if !unique.contains(&family) {
                unique.push(family);
            }
        }
        unique
    }
}

/// Index of the first memory type allowed by `type_bits` that has all of
/// `properties`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    memory_properties.memory_types[..memory_properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .find(|(i, memory_type)| {
            type_bits & (1 << *i) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(i, _)| i as u32)
}

/// Highest sample count usable for both color and depth framebuffers.
pub fn max_usable_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| counts.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// The first of `candidates` whose properties for `tiling` include
/// `features`.
pub(crate) fn first_supported(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    mut format_properties: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| {
        let props = format_properties(format);
        match tiling {
            vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
            vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
            _ => false,
        }
    })
}

/// A selected GPU and what we know about it.
#[derive(Clone)]
pub struct VulkanPhysicalDevice {
    handle: vk::PhysicalDevice,
    instance: Instance,
    surface_loader: Surface,
    surface: vk::SurfaceKHR,
    properties: vk::PhysicalDeviceProperties,
    features: vk::PhysicalDeviceFeatures,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue_families: QueueFamilies,
    sample_count: vk::SampleCountFlags,
}

impl VulkanPhysicalDevice {
    /// Picks a GPU that can render to `surface`.
    ///
    /// Suitable discrete GPUs win over other suitable devices. If no device
    /// is suitable the first one is used, which fails if it lacks the needed
    /// queues.
    pub fn select(
        instance: &VulkanInstance,
        surface: vk::SurfaceKHR,
        required_extensions: &[&CStr],
        requested_samples: u32,
        separate_transfer: bool,
    ) -> Result<Self> {
        let ash_instance = instance.instance();
        let surface_loader = instance.surface_loader();

        let physical_devices = unsafe { ash_instance.enumerate_physical_devices()? };
        if physical_devices.is_empty() {
            return Err(Error::runtime("Failed to find a GPU with Vulkan support"));
        }

        let device_type_preference = [
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vk::PhysicalDeviceType::INTEGRATED_GPU,
        ];
        let mut devices_properties: Vec<_> = physical_devices
            .iter()
            .map(|&physical_device| {
                (physical_device, unsafe {
                    ash_instance.get_physical_device_properties(physical_device)
                })
            })
            .collect();
        devices_properties.sort_by_key(|(_, properties)| {
            device_type_preference
                .iter()
                .position(|&preference| properties.device_type == preference)
                .unwrap_or(usize::MAX)
        });

        let mut perfect_candidates = AbcgSmallVec::new();
        let mut imperfect_candidates = AbcgSmallVec::new();
        for &(physical_device, properties) in &devices_properties {
            let suitable = unsafe {
                Self::is_suitable(
                    ash_instance,
                    surface_loader,
                    physical_device,
                    surface,
                    required_extensions,
                    separate_transfer,
                )?
            };
            if !suitable {
                continue;
            }
            if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
                perfect_candidates.push(physical_device);
            } else {
                imperfect_candidates.push(physical_device);
            }
        }

        let handle = perfect_candidates
            .first()
            .or_else(|| imperfect_candidates.first())
            .copied()
            .unwrap_or(physical_devices[0]);

        let (properties, features, memory_properties, queue_family_properties) = unsafe {
            (
                ash_instance.get_physical_device_properties(handle),
                ash_instance.get_physical_device_features(handle),
                ash_instance.get_physical_device_memory_properties(handle),
                ash_instance.get_physical_device_queue_family_properties(handle),
            )
        };

        let queue_families = QueueFamilies::find(
            &queue_family_properties,
            |i| unsafe {
                Ok(surface_loader.get_physical_device_surface_support(handle, i, surface)?)
            },
            separate_transfer,
        )?;

        let max_samples = max_usable_sample_count(&properties.limits);
        let sample_count =
            vk::SampleCountFlags::from_raw(requested_samples.max(1).min(max_samples.as_raw()));

        let physical_device = VulkanPhysicalDevice {
            handle,
            instance: ash_instance.clone(),
            surface_loader: surface_loader.clone(),
            surface,
            properties,
            features,
            memory_properties,
            queue_families,
            sample_count,
        };
        log::info!(
            "Using {} ({:?}), queue families {:?}, {} sample(s)",
            physical_device.device_name(),
            properties.device_type,
            queue_families,
            sample_count.as_raw()
        );

        Ok(physical_device)
    }

    unsafe fn is_suitable(
        instance: &Instance,
        surface_loader: &Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        required_extensions: &[&CStr],
        separate_transfer: bool,
    ) -> Result<bool> {
        let queue_family_properties =
            instance.get_physical_device_queue_family_properties(physical_device);
        let has_queues = QueueFamilies::find(
            &queue_family_properties,
            |i| {
                Ok(surface_loader.get_physical_device_surface_support(
                    physical_device,
                    i,
                    surface,
                )?)
            },
            separate_transfer,
        )
        .is_ok();
        if !has_queues {
            return Ok(false);
        }

        let extension_properties = instance.enumerate_device_extension_properties(physical_device)?;
        let has_extensions = required_extensions.iter().all(|&required| {
            extension_properties
                .iter()
                .any(|p| CStr::from_ptr(p.extension_name.as_ptr()) == required)
        });
        if !has_extensions {
            return Ok(false);
        }

        let formats = surface_loader.get_physical_device_surface_formats(physical_device, surface)?;
        let present_modes =
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?;
        let features = instance.get_physical_device_features(physical_device);

        Ok(!formats.is_empty()
            && !present_modes.is_empty()
            && features.sampler_anisotropy == vk::TRUE)
    }

    /// The physical device handle.
    #[inline]
    pub fn handle(&self) -> vk::PhysicalDevice {
        self.handle
    }

    /// The instance the device belongs to.
    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// The surface the device was selected for.
    #[inline]
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Device properties and limits.
    #[inline]
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    /// Supported device features.
    #[inline]
    pub fn features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.features
    }

    /// Memory heaps and types.
    #[inline]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Queue families chosen at selection.
    #[inline]
    pub fn queue_families(&self) -> &QueueFamilies {
        &self.queue_families
    }

    /// Samples used for MSAA, never more than the device supports.
    #[inline]
    pub fn sample_count(&self) -> vk::SampleCountFlags {
        self.sample_count
    }

    /// Name of the physical device.
    #[inline]
    pub fn device_name(&self) -> Cow<'_, str> {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()).to_string_lossy() }
    }

    /// Supported device extensions.
    pub fn extensions(&self) -> Result<Vec<CString>> {
        let properties = unsafe {
            self.instance
                .enumerate_device_extension_properties(self.handle)?
        };
        Ok(properties
            .iter()
            .map(|p| unsafe { CStr::from_ptr(p.extension_name.as_ptr()) }.to_owned())
            .collect())
    }

    /// Surface capabilities for this device.
    pub fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        Ok(unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.handle, self.surface)?
        })
    }

    /// Surface formats supported by this device.
    pub fn surface_formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>> {
        Ok(unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.handle, self.surface)?
        })
    }

    /// Present modes supported by this device.
    pub fn present_modes(&self) -> Result<Vec<vk::PresentModeKHR>> {
        Ok(unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.handle, self.surface)?
        })
    }

    /// Format support for `format`.
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.handle, format)
        }
    }

    /// Memory type index matching `type_bits` and `properties`.
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        find_memory_type(&self.memory_properties, type_bits, properties)
            .ok_or_else(|| Error::runtime("Failed to find suitable memory type"))
    }

    /// The first candidate format that supports `features` with `tiling`.
    pub fn first_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Option<vk::Format> {
        first_supported(candidates, tiling, features, |format| {
            self.format_properties(format)
        })
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

    fn typical_families() -> Vec<vk::QueueFamilyProperties> {
        use vk::QueueFlags as Q;
        vec![
            family(Q::GRAPHICS | Q::COMPUTE | Q::TRANSFER),
            family(Q::COMPUTE | Q::TRANSFER),
            family(Q::TRANSFER),
        ]
    }

    #[test]
    fn shared_families() {
        let families = QueueFamilies::find(&typical_families(), |_| Ok(true), false).unwrap();
        assert_eq!(
            families,
            QueueFamilies {
                graphics: 0,
                present: 0,
                compute: 1,
                transfer: 0,
            }
        );
        assert_eq!(families.unique().to_vec(), vec![0, 1]);
    }

    #[test]
    fn separate_transfer_family() {
        let families = QueueFamilies::find(&typical_families(), |_| Ok(true), true).unwrap();
        assert_eq!(families.transfer, 2);
        assert_eq!(families.unique().to_vec(), vec![0, 1, 2]);
    }

    #[test]
    fn present_can_differ() {
        let families = QueueFamilies::find(&typical_families(), |i| Ok(i == 1), false).unwrap();
        assert_eq!(families.present, 1);
    }

    #[test]
    fn missing_graphics_or_present() {
        let only_compute = vec![family(vk::QueueFlags::COMPUTE)];
        let err = QueueFamilies::find(&only_compute, |_| Ok(true), false).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Device does not have a graphics or present queue"));

        let err = QueueFamilies::find(&typical_families(), |_| Ok(false), false).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Device does not have a graphics or present queue"));
    }

    #[test]
    fn missing_separate_transfer() {
        let single = vec![family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let err = QueueFamilies::find(&single, |_| Ok(true), true).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Device does not have a separate transfer queue"));

        let families = QueueFamilies::find(&single, |_| Ok(true), false).unwrap();
        assert_eq!(families.unique().to_vec(), vec![0]);
    }

    #[test]
    fn memory_type_lookup() {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        props.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        props.memory_types[2].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(find_memory_type(&props, 0b111, host), Some(1));
        assert_eq!(find_memory_type(&props, 0b100, host), Some(2));
        assert_eq!(find_memory_type(&props, 0b001, host), None);
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
    }

    #[test]
    fn memory_types_past_count_are_ignored() {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 1,
            ..Default::default()
        };
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(
            find_memory_type(&props, u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }

    #[test]
    fn sample_counts() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(
            max_usable_sample_count(&limits),
            vk::SampleCountFlags::TYPE_4
        );
        assert_eq!(
            max_usable_sample_count(&vk::PhysicalDeviceLimits::default()),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn supported_format_respects_tiling() {
        let props = |format: vk::Format| {
            if format == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatProperties {
                    optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                    ..Default::default()
                }
            } else {
                vk::FormatProperties::default()
            }
        };
        let candidates = [vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT];
        let feature = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        assert_eq!(
            first_supported(&candidates, vk::ImageTiling::OPTIMAL, feature, props),
            Some(vk::Format::D24_UNORM_S8_UINT)
        );
        assert_eq!(
            first_supported(&candidates, vk::ImageTiling::LINEAR, feature, props),
            None
        );
    }
}
