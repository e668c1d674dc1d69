//! Logical device, queues and command pools.
use std::ffi::{CStr, CString};

use ash::{extensions::khr::Swapchain, vk, Device};

use crate::{AbcgSmallVec, Result, VulkanPhysicalDevice};

/// Queues fetched from the device.
#[derive(Debug, Copy, Clone)]
pub struct VulkanQueues {
    /// Graphics queue.
    pub graphics: vk::Queue,
    /// Queue presenting to the surface.
    pub present: vk::Queue,
    /// Compute queue.
    pub compute: vk::Queue,
    /// Transfer queue, used for uploads.
    pub transfer: vk::Queue,
}

/// Command pools for one-shot command buffers.
///
/// `compute` and `transfer` are the graphics pool when their queue family is
/// the graphics family.
#[derive(Debug, Copy, Clone)]
pub struct VulkanCommandPools {
    /// Pool for the graphics queue family.
    pub graphics: vk::CommandPool,
    /// Pool for the compute queue family.
    pub compute: vk::CommandPool,
    /// Pool for the transfer queue family.
    pub transfer: vk::CommandPool,
}

/// A logical device created from a [`VulkanPhysicalDevice`].
pub struct VulkanDevice {
    physical_device: VulkanPhysicalDevice,
    device: Device,
    swapchain_loader: Swapchain,
    queues: VulkanQueues,
    command_pools: VulkanCommandPools,
    enabled_extensions: AbcgSmallVec<CString>,
}

impl VulkanDevice {
    /// Creates the device with one queue per distinct family and the given
    /// extensions enabled.
    pub fn create(physical_device: VulkanPhysicalDevice, extensions: &[&CStr]) -> Result<Self> {
        let instance = physical_device.instance();
        let families = *physical_device.queue_families();

        let priorities = [1.0f32];
        let queue_create_infos: AbcgSmallVec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        // Everything the device offers, sampler anisotropy included.
        let features = *physical_device.features();

        let extension_ptrs: AbcgSmallVec<_> = extensions.iter().map(|e| e.as_ptr()).collect();
        let device_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&features);

        let device =
            unsafe { instance.create_device(physical_device.handle(), &device_info, None)? };
        let swapchain_loader = Swapchain::new(instance, &device);

        let queues = unsafe {
            VulkanQueues {
                graphics: device.get_device_queue(families.graphics, 0),
                present: device.get_device_queue(families.present, 0),
                compute: device.get_device_queue(families.compute, 0),
                transfer: device.get_device_queue(families.transfer, 0),
            }
        };

        let create_pool = |family: u32| unsafe {
            let info = vk::CommandPoolCreateInfo::builder()
                .flags(vk::CommandPoolCreateFlags::TRANSIENT)
                .queue_family_index(family);
            device.create_command_pool(&info, None)
        };
        let graphics_pool = create_pool(families.graphics)?;
        let compute_pool = if families.compute == families.graphics {
            graphics_pool
        } else {
            create_pool(families.compute)?
        };
        let transfer_pool = if families.transfer == families.graphics {
            graphics_pool
        } else {
            create_pool(families.transfer)?
        };

        log::debug!("Created logical device on {}", physical_device.device_name());

        Ok(VulkanDevice {
            physical_device,
            device,
            swapchain_loader,
            queues,
            command_pools: VulkanCommandPools {
                graphics: graphics_pool,
                compute: compute_pool,
                transfer: transfer_pool,
            },
            enabled_extensions: extensions.iter().map(|&e| e.to_owned()).collect(),
        })
    }

    /// The `ash` device.
    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The physical device this device was created from.
    #[inline]
    pub fn physical_device(&self) -> &VulkanPhysicalDevice {
        &self.physical_device
    }

    /// Loader for `VK_KHR_swapchain` functions.
    #[inline]
    pub fn swapchain_loader(&self) -> &Swapchain {
        &self.swapchain_loader
    }

    /// Queues fetched at creation.
    #[inline]
    pub fn queues(&self) -> &VulkanQueues {
        &self.queues
    }

    /// Command pools, one per queue family.
    #[inline]
    pub fn command_pools(&self) -> &VulkanCommandPools {
        &self.command_pools
    }

    /// List of all enabled device extensions.
    #[inline]
    pub fn enabled_extensions(&self) -> &[CString] {
        &self.enabled_extensions
    }

    /// Queue and command pool serving `queue_flags`. Anything other than
    /// compute or transfer goes to graphics.
    fn queue_and_pool(&self, queue_flags: vk::QueueFlags) -> (vk::Queue, vk::CommandPool) {
        if queue_flags == vk::QueueFlags::COMPUTE {
            (self.queues.compute, self.command_pools.compute)
        } else if queue_flags == vk::QueueFlags::TRANSFER {
            (self.queues.transfer, self.command_pools.transfer)
        } else {
            (self.queues.graphics, self.command_pools.graphics)
        }
    }

    /// Records a one-time command buffer with `record`, submits it to the
    /// queue selected by `queue_flags` and waits for it to finish.
    pub fn with_command_buffer(
        &self,
        record: impl FnOnce(vk::CommandBuffer) -> Result<()>,
        queue_flags: vk::QueueFlags,
        level: vk::CommandBufferLevel,
    ) -> Result<()> {
        let (queue, pool) = self.queue_and_pool(queue_flags);

        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(level)
            .command_buffer_count(1);
        let command_buffers = unsafe { self.device.allocate_command_buffers(&allocate_info)? };
        let command_buffer = command_buffers[0];

        let result = (|| -> Result<()> {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe {
                self.device
                    .begin_command_buffer(command_buffer, &begin_info)?;
            }

            record(command_buffer)?;

            unsafe {
                self.device.end_command_buffer(command_buffer)?;
                let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
                self.device
                    .queue_submit(queue, &[submit_info.build()], vk::Fence::null())?;
                self.device.queue_wait_idle(queue)?;
            }
            Ok(())
        })();

        unsafe {
            self.device.free_command_buffers(pool, &command_buffers);
        }
        result
    }

    /// Shorthand for a primary command buffer on the graphics queue.
    pub fn with_graphics_commands(
        &self,
        record: impl FnOnce(vk::CommandBuffer) -> Result<()>,
    ) -> Result<()> {
        self.with_command_buffer(
            record,
            vk::QueueFlags::GRAPHICS,
            vk::CommandBufferLevel::PRIMARY,
        )
    }

    /// Blocks until the device is idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Destroys the command pools, then the device.
    pub unsafe fn destroy(&mut self) {
        let pools = self.command_pools;
        if pools.compute != pools.graphics {
            self.device.destroy_command_pool(pools.compute, None);
        }
        if pools.transfer != pools.graphics {
            self.device.destroy_command_pool(pools.transfer, None);
        }
        self.device.destroy_command_pool(pools.graphics, None);
        self.device.destroy_device(None);
    }
}
