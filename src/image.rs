//! Images, image views and texture loading.
use std::path::Path;

use ::image::{imageops, RgbaImage};
use ash::vk;

use crate::{
    buffer::upload_sharing, Error, Result, VulkanBuffer, VulkanBufferCreateInfo, VulkanDevice,
};

/// Parameters of [`VulkanImage::create`].
///
/// Leave `view_info.image` null to have the image created and bound to
/// memory with `properties`. Set `view_info.format` to
/// [`vk::Format::UNDEFINED`] to skip the view.
#[derive(Debug, Clone, Copy, Default)]
pub struct VulkanImageCreateInfo {
    /// Image to create. Ignored when `view_info.image` is set.
    pub info: vk::ImageCreateInfo,
    /// Memory properties of the image allocation.
    pub properties: vk::MemoryPropertyFlags,
    /// View to create over the image.
    pub view_info: vk::ImageViewCreateInfo,
}

/// Number of mip levels down to 1x1 for an image of the given size.
pub fn mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Access mask that covers what a layout is used for.
pub fn access_mask(layout: vk::ImageLayout) -> vk::AccessFlags {
    match layout {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::PREINITIALIZED => vk::AccessFlags::HOST_WRITE,
        _ => vk::AccessFlags::empty(),
    }
}

/// Pipeline stage where a layout is produced or consumed.
pub fn stage_mask(layout: vk::ImageLayout) -> vk::PipelineStageFlags {
    match layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL | vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            vk::PipelineStageFlags::TRANSFER
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        }
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::PipelineStageFlags::FRAGMENT_SHADER,
        vk::ImageLayout::PREINITIALIZED => vk::PipelineStageFlags::HOST,
        vk::ImageLayout::UNDEFINED => vk::PipelineStageFlags::TOP_OF_PIPE,
        _ => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
    }
}

/// Mirrors the image left to right.
pub fn flip_horizontally(image: &mut RgbaImage) {
    imageops::flip_horizontal_in_place(image);
}

/// Mirrors the image top to bottom.
pub fn flip_vertically(image: &mut RgbaImage) {
    imageops::flip_vertical_in_place(image);
}

fn color_range(base_mip_level: u32, level_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level,
        level_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn layout_barrier(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    range: vk::ImageSubresourceRange,
) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .src_access_mask(access_mask(old_layout))
        .dst_access_mask(access_mask(new_layout))
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .build()
}

/// Records a layout transition of `range`.
pub fn cmd_transition_layout(
    device: &VulkanDevice,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    range: vk::ImageSubresourceRange,
) {
    let barrier = layout_barrier(image, old_layout, new_layout, range);
    unsafe {
        device.device().cmd_pipeline_barrier(
            command_buffer,
            stage_mask(old_layout),
            stage_mask(new_layout),
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// An image with its memory, view and sampler, each optional.
#[derive(Debug, Default)]
pub struct VulkanImage {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    sampler: vk::Sampler,
    owns_image: bool,
    mip_levels: u32,
    descriptor_image_info: vk::DescriptorImageInfo,
}

impl VulkanImage {
    /// Creates an image and/or its view as described by `info`.
    pub fn create(device: &VulkanDevice, info: &VulkanImageCreateInfo) -> Result<Self> {
        let mut result = VulkanImage {
            mip_levels: info.info.mip_levels.max(1),
            ..Default::default()
        };

        if info.view_info.image == vk::Image::null() {
            if let Err(err) = result.create_image(device, &info.info, info.properties) {
                unsafe { result.destroy(device) };
                return Err(err);
            }
        } else {
            result.image = info.view_info.image;
        }

        if info.view_info.format != vk::Format::UNDEFINED {
            let mut view_info = info.view_info;
            view_info.image = result.image;
            match unsafe { device.device().create_image_view(&view_info, None) } {
                Ok(view) => result.view = view,
                Err(err) => {
                    unsafe { result.destroy(device) };
                    return Err(err.into());
                }
            }
        }

        Ok(result)
    }

    fn create_image(
        &mut self,
        device: &VulkanDevice,
        info: &vk::ImageCreateInfo,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<()> {
        let ash_device = device.device();
        self.image = unsafe { ash_device.create_image(info, None)? };
        self.owns_image = true;

        let requirements = unsafe { ash_device.get_image_memory_requirements(self.image) };
        let memory_type = device
            .physical_device()
            .find_memory_type(requirements.memory_type_bits, properties)?;
        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        unsafe {
            self.memory = ash_device.allocate_memory(&allocate_info, None)?;
            ash_device.bind_image_memory(self.image, self.memory, 0)?;
        }
        Ok(())
    }

    /// Loads a texture from an image file.
    pub fn from_file(
        device: &VulkanDevice,
        path: impl AsRef<Path>,
        generate_mipmaps: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        let pixels = ::image::open(path)
            .map_err(|source| Error::ImageLoad {
                path: path.to_owned(),
                source,
            })?
            .to_rgba8();
        log::debug!(
            "Loaded {} ({}x{})",
            path.display(),
            pixels.width(),
            pixels.height()
        );
        Self::from_rgba(device, &pixels, generate_mipmaps)
    }

    /// Uploads RGBA pixels into a sampled sRGB texture.
    pub fn from_rgba(
        device: &VulkanDevice,
        pixels: &RgbaImage,
        generate_mipmaps: bool,
    ) -> Result<Self> {
        let (width, height) = pixels.dimensions();
        let levels = if generate_mipmaps {
            mip_levels(width, height)
        } else {
            1
        };
        let format = vk::Format::R8G8B8A8_SRGB;

        let mut staging = VulkanBuffer::create(
            device,
            &VulkanBufferCreateInfo {
                usage: vk::BufferUsageFlags::TRANSFER_SRC,
                properties: vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
                data: Some(pixels.as_raw()),
                ..Default::default()
            },
        )?;

        let mut usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;
        if levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        let (sharing_mode, queue_family_indices) = upload_sharing(device);
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .build();

        let mut texture = VulkanImage {
            mip_levels: levels,
            ..Default::default()
        };
        let uploaded = texture
            .create_image(device, &image_info, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .and_then(|_| texture.upload(device, &staging, width, height, format));
        unsafe { staging.destroy(device) };
        if let Err(err) = uploaded {
            unsafe { texture.destroy(device) };
            return Err(err);
        }

        if let Err(err) = texture.create_sampled_view(device, format) {
            unsafe { texture.destroy(device) };
            return Err(err);
        }
        Ok(texture)
    }

    fn upload(
        &self,
        device: &VulkanDevice,
        staging: &VulkanBuffer,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> Result<()> {
        let all_levels = color_range(0, self.mip_levels);

        device.with_command_buffer(
            |command_buffer| {
                cmd_transition_layout(
                    device,
                    command_buffer,
                    self.image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    all_levels,
                );
                let region = vk::BufferImageCopy::builder()
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_extent(vk::Extent3D {
                        width,
                        height,
                        depth: 1,
                    })
                    .build();
                unsafe {
                    device.device().cmd_copy_buffer_to_image(
                        command_buffer,
                        staging.handle(),
                        self.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
                Ok(())
            },
            vk::QueueFlags::TRANSFER,
            vk::CommandBufferLevel::PRIMARY,
        )?;

        if self.mip_levels > 1 {
            self.generate_mipmaps(device, width, height, format)
        } else {
            device.with_graphics_commands(|command_buffer| {
                cmd_transition_layout(
                    device,
                    command_buffer,
                    self.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    all_levels,
                );
                Ok(())
            })
        }
    }

    /// Fills levels 1.. by repeatedly blitting the previous level at half
    /// size. Every level ends up in `SHADER_READ_ONLY_OPTIMAL`.
    fn generate_mipmaps(
        &self,
        device: &VulkanDevice,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> Result<()> {
        let properties = device.physical_device().format_properties(format);
        if !properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            return Err(Error::runtime(
                "Texture image format does not support linear blitting",
            ));
        }

        device.with_graphics_commands(|command_buffer| {
            let ash_device = device.device();
            let mut mip_width = width as i32;
            let mut mip_height = height as i32;

            for level in 1..self.mip_levels {
                let previous = color_range(level - 1, 1);
                cmd_transition_layout(
                    device,
                    command_buffer,
                    self.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    previous,
                );

                let next_width = (mip_width / 2).max(1);
                let next_height = (mip_height / 2).max(1);
                let blit = vk::ImageBlit {
                    src_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: level - 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    src_offsets: [
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: mip_width,
                            y: mip_height,
                            z: 1,
                        },
                    ],
                    dst_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: level,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    dst_offsets: [
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: next_width,
                            y: next_height,
                            z: 1,
                        },
                    ],
                };
                unsafe {
                    ash_device.cmd_blit_image(
                        command_buffer,
                        self.image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        self.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[blit],
                        vk::Filter::LINEAR,
                    );
                }

                cmd_transition_layout(
                    device,
                    command_buffer,
                    self.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    previous,
                );

                mip_width = next_width;
                mip_height = next_height;
            }

            cmd_transition_layout(
                device,
                command_buffer,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                color_range(self.mip_levels - 1, 1),
            );
            Ok(())
        })
    }

    fn create_sampled_view(&mut self, device: &VulkanDevice, format: vk::Format) -> Result<()> {
        let ash_device = device.device();
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(color_range(0, self.mip_levels));
        self.view = unsafe { ash_device.create_image_view(&view_info, None)? };

        let physical_device = device.physical_device();
        let anisotropy = physical_device.features().sampler_anisotropy == vk::TRUE;
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy {
                physical_device.properties().limits.max_sampler_anisotropy
            } else {
                1.0
            })
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(if self.mip_levels > 1 {
                self.mip_levels as f32
            } else {
                0.0
            })
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);
        self.sampler = unsafe { ash_device.create_sampler(&sampler_info, None)? };

        self.descriptor_image_info = vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        Ok(())
    }

    /// The image handle.
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// The image view, or null without one.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// The sampler, or null without one.
    #[inline]
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Memory bound to the image.
    #[inline]
    pub fn device_memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Number of mip levels.
    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Sampler, view and layout for binding a loaded texture.
    #[inline]
    pub fn descriptor_image_info(&self) -> &vk::DescriptorImageInfo {
        &self.descriptor_image_info
    }

    /// Destroys whatever was created. Images passed in through
    /// `view_info.image` are left alone.
    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        let ash_device = device.device();
        if self.sampler != vk::Sampler::null() {
            ash_device.destroy_sampler(self.sampler, None);
        }
        if self.view != vk::ImageView::null() {
            ash_device.destroy_image_view(self.view, None);
        }
        if self.owns_image && self.image != vk::Image::null() {
            ash_device.destroy_image(self.image, None);
        }
        if self.memory != vk::DeviceMemory::null() {
            ash_device.free_memory(self.memory, None);
        }
        *self = VulkanImage::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::image::Rgba;

    #[test]
    fn mip_level_count() {
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(2, 1), 2);
        assert_eq!(mip_levels(256, 256), 9);
        assert_eq!(mip_levels(300, 20), 9);
        assert_eq!(mip_levels(512, 1024), 11);
        assert_eq!(mip_levels(0, 0), 1);
    }

    #[test]
    fn layout_masks() {
        assert_eq!(
            access_mask(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            vk::AccessFlags::TRANSFER_WRITE
        );
        assert_eq!(
            access_mask(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            vk::AccessFlags::SHADER_READ
        );
        assert_eq!(
            access_mask(vk::ImageLayout::UNDEFINED),
            vk::AccessFlags::empty()
        );
        assert_eq!(
            stage_mask(vk::ImageLayout::UNDEFINED),
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
        assert_eq!(
            stage_mask(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        );
        assert_eq!(
            stage_mask(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE
        );
    }

    #[test]
    fn barrier_uses_layout_masks() {
        let barrier = layout_barrier(
            vk::Image::null(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            color_range(3, 1),
        );
        assert_eq!(barrier.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::TRANSFER_READ);
        assert_eq!(barrier.subresource_range.base_mip_level, 3);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    fn strip() -> RgbaImage {
        let mut image = RgbaImage::new(2, 3);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgba([x as u8, y as u8, 0, 255]);
        }
        image
    }

    #[test]
    fn horizontal_flip() {
        let mut image = strip();
        flip_horizontally(&mut image);
        assert_eq!(image.get_pixel(0, 0), &Rgba([1, 0, 0, 255]));
        assert_eq!(image.get_pixel(1, 2), &Rgba([0, 2, 0, 255]));
    }

    #[test]
    fn vertical_flip_keeps_middle_row() {
        let mut image = strip();
        flip_vertically(&mut image);
        assert_eq!(image.get_pixel(0, 0), &Rgba([0, 2, 0, 255]));
        assert_eq!(image.get_pixel(1, 1), &Rgba([1, 1, 0, 255]));
        assert_eq!(image.get_pixel(1, 2), &Rgba([1, 0, 0, 255]));
    }
}
