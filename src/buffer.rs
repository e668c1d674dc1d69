//! Buffers backed by device memory.
use ash::vk;

use crate::{AbcgSmallVec, Error, Result, VulkanDevice};

/// Parameters of [`VulkanBuffer::create`].
#[derive(Debug, Clone, Copy)]
pub struct VulkanBufferCreateInfo<'a> {
    /// Size in bytes. Taken from `data` when zero.
    pub size: vk::DeviceSize,
    /// How the buffer is used.
    pub usage: vk::BufferUsageFlags,
    /// Required memory properties. Without `HOST_VISIBLE` the data goes
    /// through a staging buffer.
    pub properties: vk::MemoryPropertyFlags,
    /// Initial contents.
    pub data: Option<&'a [u8]>,
}

impl Default for VulkanBufferCreateInfo<'_> {
    fn default() -> Self {
        VulkanBufferCreateInfo {
            size: 0,
            usage: vk::BufferUsageFlags::empty(),
            properties: vk::MemoryPropertyFlags::empty(),
            data: None,
        }
    }
}

impl<'a> VulkanBufferCreateInfo<'a> {
    /// Size to allocate, at least the length of `data`.
    fn effective_size(&self) -> vk::DeviceSize {
        let data_len = self.data.map_or(0, |d| d.len() as vk::DeviceSize);
        self.size.max(data_len)
    }
}

/// Sharing mode and queue families for resources touched by uploads.
pub(crate) fn upload_sharing(device: &VulkanDevice) -> (vk::SharingMode, AbcgSmallVec<u32>) {
    let families = device.physical_device().queue_families();
    let mut indices = AbcgSmallVec::new();
    for family in [families.graphics, families.compute, families.transfer] {
        if !indices.contains(&family) {
            indices.push(family);
        }
    }
    if families.graphics != families.transfer {
        (vk::SharingMode::CONCURRENT, indices)
    } else {
        (vk::SharingMode::EXCLUSIVE, AbcgSmallVec::new())
    }
}

fn check_write_range(
    offset: vk::DeviceSize,
    len: vk::DeviceSize,
    size: vk::DeviceSize,
) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(Error::runtime(format!(
            "Write of {len} bytes at offset {offset} exceeds buffer size {size}"
        ))),
    }
}

/// A buffer and the memory bound to it.
#[derive(Debug, Default)]
pub struct VulkanBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl VulkanBuffer {
    /// Creates the buffer.
    ///
    /// Host visible buffers are filled directly. Otherwise, when `data` is
    /// given, it goes through a staging buffer and the transfer queue.
    pub fn create(device: &VulkanDevice, info: &VulkanBufferCreateInfo) -> Result<Self> {
        let size = info.effective_size();
        let properties = info.properties;

        if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            let buffer = Self::allocate(device, size, info.usage, info.properties)?;
            if let Some(data) = info.data {
                buffer.load_data(device, data, 0)?;
            }
            return Ok(buffer);
        }

        let data = match info.data {
            Some(data) => data,
            None => return Self::allocate(device, size, info.usage, info.properties),
        };

        let mut staging = Self::allocate(
            device,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let result = staging.load_data(device, data, 0).and_then(|_| {
            let buffer = Self::allocate(
                device,
                size,
                info.usage | vk::BufferUsageFlags::TRANSFER_DST,
                info.properties,
            )?;
            let copied = device.with_command_buffer(
                |command_buffer| {
                    let region = vk::BufferCopy::builder().size(size).build();
                    unsafe {
                        device.device().cmd_copy_buffer(
                            command_buffer,
                            staging.buffer,
                            buffer.buffer,
                            &[region],
                        );
                    }
                    Ok(())
                },
                vk::QueueFlags::TRANSFER,
                vk::CommandBufferLevel::PRIMARY,
            );
            match copied {
                Ok(()) => Ok(buffer),
                Err(err) => {
                    let mut buffer = buffer;
                    unsafe { buffer.destroy(device) };
                    Err(err)
                }
            }
        });

        unsafe { staging.destroy(device) };
        result
    }

    fn allocate(
        device: &VulkanDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let (sharing_mode, queue_family_indices) = upload_sharing(device);
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing_mode)
            .queue_family_indices(&queue_family_indices);

        let ash_device = device.device();
        let buffer = unsafe { ash_device.create_buffer(&buffer_info, None)? };

        let requirements = unsafe { ash_device.get_buffer_memory_requirements(buffer) };
        let memory_type = match device
            .physical_device()
            .find_memory_type(requirements.memory_type_bits, properties)
        {
            Ok(memory_type) => memory_type,
            Err(err) => {
                unsafe { ash_device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = unsafe {
            match ash_device.allocate_memory(&allocate_info, None) {
                Ok(memory) => memory,
                Err(err) => {
                    ash_device.destroy_buffer(buffer, None);
                    return Err(err.into());
                }
            }
        };

        let buffer = VulkanBuffer {
            buffer,
            memory,
            size,
        };
        if let Err(err) = unsafe { ash_device.bind_buffer_memory(buffer.buffer, memory, 0) } {
            let mut buffer = buffer;
            unsafe { buffer.destroy(device) };
            return Err(err.into());
        }
        Ok(buffer)
    }

    /// Copies `data` into host visible memory at `offset`.
    ///
    /// Fails when the write would end past the buffer.
    pub fn load_data(
        &self,
        device: &VulkanDevice,
        data: &[u8],
        offset: vk::DeviceSize,
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        check_write_range(offset, data.len() as vk::DeviceSize, self.size)?;
        let ash_device = device.device();
        unsafe {
            let mapped = ash_device.map_memory(
                self.memory,
                offset,
                data.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.cast::<u8>(), data.len());
            ash_device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// The buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Memory bound to the buffer.
    #[inline]
    pub fn device_memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Frees the memory and destroys the buffer.
    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        let ash_device = device.device();
        if self.buffer != vk::Buffer::null() {
            ash_device.destroy_buffer(self.buffer, None);
            self.buffer = vk::Buffer::null();
        }
        if self.memory != vk::DeviceMemory::null() {
            ash_device.free_memory(self.memory, None);
            self.memory = vk::DeviceMemory::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_covers_data() {
        let data = [0u8; 12];
        let info = VulkanBufferCreateInfo {
            size: 4,
            data: Some(&data),
            ..Default::default()
        };
        assert_eq!(info.effective_size(), 12);

        let info = VulkanBufferCreateInfo {
            size: 64,
            data: Some(&data),
            ..Default::default()
        };
        assert_eq!(info.effective_size(), 64);
        assert_eq!(VulkanBufferCreateInfo::default().effective_size(), 0);
    }

    #[test]
    fn writes_must_fit_the_buffer() {
        assert!(check_write_range(0, 16, 16).is_ok());
        assert!(check_write_range(8, 8, 16).is_ok());
        assert!(check_write_range(8, 9, 16).is_err());
        assert!(check_write_range(17, 0, 16).is_err());
        assert!(check_write_range(vk::DeviceSize::MAX, 1, 16).is_err());
    }
}
