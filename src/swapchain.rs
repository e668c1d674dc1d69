//! Swapchain, main render pass and per-image frame resources.
//!
//! The rebuild flow follows the swapchain handling of [Ralith]
//! (<https://github.com/MaikKlein/ash/pull/506>): the swapchain is marked
//! stale on `SUBOPTIMAL`/`OUT_OF_DATE` and recreated, passing the previous
//! handle as `old_swapchain`.
//!
//! [Ralith]: https://github.com/Ralith

use std::mem;

use ash::vk;

use crate::{
    AbcgSmallVec, Error, Result, VulkanDevice, VulkanImage, VulkanImageCreateInfo,
    VulkanSettings,
};

/// Resources for rendering into one swapchain image, handed to the paint
/// callback.
#[derive(Debug, Copy, Clone)]
pub struct VulkanFrame {
    /// Index of the swapchain image.
    pub index: u32,
    /// Pool owning `command_buffer`. Reset at the start of every frame.
    pub command_pool: vk::CommandPool,
    /// Primary command buffer, already in the recording state during paint.
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when the GPU is done with this frame.
    pub fence: vk::Fence,
    /// View of the swapchain image.
    pub color_view: vk::ImageView,
    /// Framebuffer of the main render pass for this image.
    pub framebuffer: vk::Framebuffer,
    /// The main render pass, compatible with `framebuffer`.
    pub render_pass: vk::RenderPass,
    /// Size of the swapchain images.
    pub extent: vk::Extent2D,
    /// The render pass has a depth/stencil attachment.
    pub depth: bool,
    /// The render pass renders into a multisampled image and resolves it.
    pub multisampled: bool,
}

impl VulkanFrame {
    /// Clear values matching the attachments of the main render pass.
    pub fn clear_values(&self, color: [f32; 4]) -> AbcgSmallVec<vk::ClearValue> {
        clear_values(color, self.depth, self.multisampled)
    }

    /// Begins the main render pass on the frame's command buffer, covering
    /// the whole frame.
    pub fn begin_render_pass(&self, device: &VulkanDevice, clear_color: [f32; 4]) {
        let clear_values = self.clear_values(clear_color);
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: self.extent,
            })
            .clear_values(&clear_values);
        unsafe {
            device.device().cmd_begin_render_pass(
                self.command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    /// Ends the main render pass.
    pub fn end_render_pass(&self, device: &VulkanDevice) {
        unsafe { device.device().cmd_end_render_pass(self.command_buffer) };
    }
}

fn clear_values(color: [f32; 4], depth: bool, multisampled: bool) -> AbcgSmallVec<vk::ClearValue> {
    let color = vk::ClearValue {
        color: vk::ClearColorValue { float32: color },
    };
    let mut values = AbcgSmallVec::new();
    values.push(color);
    if depth {
        values.push(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        });
    }
    if multisampled {
        values.push(color);
    }
    values
}

#[derive(Debug, Copy, Clone)]
struct FrameSemaphores {
    present_complete: vk::Semaphore,
    render_complete: vk::Semaphore,
}

/// [`VulkanSwapchain`] configuration.
#[derive(Debug, Clone)]
pub struct SwapchainOptions {
    format_preference: Vec<vk::SurfaceFormatKHR>,
    present_mode_preference: Vec<vk::PresentModeKHR>,
    depth_buffer_size: u32,
    stencil_buffer_size: u32,
    usage: vk::ImageUsageFlags,
}

impl SwapchainOptions {
    /// Uses the default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for the given window settings. Without vsync, immediate
    /// presentation is preferred.
    pub fn from_settings(settings: &VulkanSettings) -> Self {
        let mut options = Self::default();
        if !settings.vsync {
            options
                .present_mode_preference
                .insert(0, vk::PresentModeKHR::IMMEDIATE);
        }
        options.depth_buffer_size = settings.depth_buffer_size;
        options.stencil_buffer_size = settings.stencil_buffer_size;
        options
    }

    /// Preference-ordered list of image formats and color spaces. Defaults to
    /// 8-bit UNORM formats with the sRGB non-linear color space.
    pub fn format_preference(&mut self, formats: &[vk::SurfaceFormatKHR]) -> &mut Self {
        self.format_preference = formats.into();
        self
    }

    /// Preference-ordered list of presentation modes. FIFO is used when none
    /// is available. Defaults to mailbox, then FIFO.
    pub fn present_mode_preference(&mut self, modes: &[vk::PresentModeKHR]) -> &mut Self {
        self.present_mode_preference = modes.into();
        self
    }

    /// Minimum depth bits, 0 to render without depth. Defaults to 24.
    pub fn depth_buffer_size(&mut self, bits: u32) -> &mut Self {
        self.depth_buffer_size = bits;
        self
    }

    /// Minimum stencil bits, 0 to render without stencil. Defaults to 0.
    pub fn stencil_buffer_size(&mut self, bits: u32) -> &mut Self {
        self.stencil_buffer_size = bits;
        self
    }

    /// Swapchain image usage flags. Defaults to [`vk::ImageUsageFlags::COLOR_ATTACHMENT`].
    pub fn usage(&mut self, usage: vk::ImageUsageFlags) -> &mut Self {
        self.usage = usage;
        self
    }
}

impl Default for SwapchainOptions {
    fn default() -> Self {
        let srgb = |format| vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        Self {
            format_preference: vec![
                srgb(vk::Format::B8G8R8A8_UNORM),
                srgb(vk::Format::R8G8B8A8_UNORM),
                srgb(vk::Format::B8G8R8_UNORM),
                srgb(vk::Format::R8G8B8_UNORM),
            ],
            present_mode_preference: vec![vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
            depth_buffer_size: 24,
            stencil_buffer_size: 0,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        }
    }
}

/// The most preferred available format, or the first available one.
pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preference: &[vk::SurfaceFormatKHR],
) -> vk::SurfaceFormatKHR {
    available
        .iter()
        .filter_map(|&format| {
            let priority = preference.iter().position(|p| {
                p.format == format.format && p.color_space == format.color_space
            })?;
            Some((format, priority))
        })
        .min_by_key(|&(_, priority)| priority)
        .map(|(format, _)| format)
        .or_else(|| available.first().copied())
        .unwrap_or_default()
}

/// The most preferred available present mode, or FIFO.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preference: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    preference
        .iter()
        .copied()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Image count suited to `present_mode`, within the surface limits.
pub fn min_image_count(
    present_mode: vk::PresentModeKHR,
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> u32 {
    let wanted = match present_mode {
        vk::PresentModeKHR::MAILBOX => 3,
        vk::PresentModeKHR::FIFO | vk::PresentModeKHR::FIFO_RELAXED => 2,
        _ => 1,
    };
    let count = capabilities.min_image_count.max(wanted);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// The surface extent, or the window size clamped to the surface limits when
/// the surface leaves it to us.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_size: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    let min = capabilities.min_image_extent;
    let max = vk::Extent2D {
        width: capabilities.max_image_extent.width.max(min.width),
        height: capabilities.max_image_extent.height.max(min.height),
    };
    vk::Extent2D {
        width: window_size.width.clamp(min.width, max.width),
        height: window_size.height.clamp(min.height, max.height),
    }
}

/// First supported of pre-multiplied, post-multiplied and inherit; opaque
/// otherwise.
pub fn choose_composite_alpha(
    supported: vk::CompositeAlphaFlagsKHR,
) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&flag| supported.contains(flag))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Depth/stencil formats to try, best first.
pub fn depth_format_candidates(depth_bits: u32, stencil_bits: u32) -> &'static [vk::Format] {
    use vk::Format as F;
    match (depth_bits > 0, stencil_bits > 0) {
        (false, false) => &[F::UNDEFINED],
        (true, false) => &[
            F::D32_SFLOAT,
            F::D32_SFLOAT_S8_UINT,
            F::D24_UNORM_S8_UINT,
            F::D16_UNORM,
            F::D16_UNORM_S8_UINT,
        ],
        (false, true) => &[
            F::S8_UINT,
            F::D16_UNORM_S8_UINT,
            F::D24_UNORM_S8_UINT,
            F::D32_SFLOAT_S8_UINT,
        ],
        (true, true) => &[
            F::D32_SFLOAT_S8_UINT,
            F::D24_UNORM_S8_UINT,
            F::D16_UNORM_S8_UINT,
        ],
    }
}

fn depth_bits(format: vk::Format) -> u32 {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D32_SFLOAT_S8_UINT => 32,
        vk::Format::D24_UNORM_S8_UINT | vk::Format::X8_D24_UNORM_PACK32 => 24,
        vk::Format::D16_UNORM | vk::Format::D16_UNORM_S8_UINT => 16,
        _ => 0,
    }
}

fn stencil_bits(format: vk::Format) -> u32 {
    match format {
        vk::Format::S8_UINT
        | vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => 8,
        _ => 0,
    }
}

/// Checks that `format` provides the requested depth and stencil bits.
pub fn validate_depth_format(format: vk::Format, depth: u32, stencil: u32) -> Result<()> {
    if stencil > 8 || (stencil > 0 && stencil_bits(format) < 8) {
        return Err(Error::runtime("Failed to find stencil format"));
    }
    if depth > 32 || (depth > 0 && depth_bits(format) < depth) {
        return Err(Error::runtime("Failed to find depth format"));
    }
    Ok(())
}

/// Aspects covered by a depth/stencil format.
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    let mut aspect = vk::ImageAspectFlags::empty();
    if depth_bits(format) > 0 {
        aspect |= vk::ImageAspectFlags::DEPTH;
    }
    if stencil_bits(format) > 0 {
        aspect |= vk::ImageAspectFlags::STENCIL;
    }
    aspect
}

/// Picks and validates the depth/stencil format.
/// [`vk::Format::UNDEFINED`] means no depth attachment.
fn choose_depth_format(
    depth: u32,
    stencil: u32,
    format_properties: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Result<vk::Format> {
    let candidates = depth_format_candidates(depth, stencil);
    if candidates == [vk::Format::UNDEFINED] {
        return Ok(vk::Format::UNDEFINED);
    }
    let format = crate::physical_device::first_supported(
        candidates,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        format_properties,
    )
    .ok_or_else(|| Error::runtime("Failed to find depth format"))?;
    validate_depth_format(format, depth, stencil)?;
    Ok(format)
}

/// Dependency ordering the first use of the attachments after the
/// previous frame and image acquisition.
fn subpass_dependency(has_depth: bool) -> vk::SubpassDependency {
    let mut stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let mut src_access = vk::AccessFlags::empty();
    let mut dst_access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    if has_depth {
        stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        src_access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        dst_access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages,
        dst_stage_mask: stages,
        src_access_mask: src_access,
        dst_access_mask: dst_access,
        dependency_flags: vk::DependencyFlags::empty(),
    }
}

/// Manages the swapchain, the main render pass and everything that depends
/// on the swapchain images.
pub struct VulkanSwapchain {
    options: SwapchainOptions,

    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    depth_format: vk::Format,

    render_pass: vk::RenderPass,
    frames: Vec<VulkanFrame>,
    color_images: Vec<VulkanImage>,
    depth_image: Option<VulkanImage>,
    msaa_image: Option<VulkanImage>,
    semaphores: Vec<FrameSemaphores>,

    current_semaphore: usize,
    current_frame: u32,
    frame_submitted: bool,
    needs_rebuild: bool,
}

impl VulkanSwapchain {
    /// Creates the swapchain for a window of `window_size`.
    ///
    /// Nothing is built while the window has no area; see
    /// [`check_rebuild`](Self::check_rebuild).
    pub fn create(
        device: &VulkanDevice,
        options: SwapchainOptions,
        window_size: vk::Extent2D,
    ) -> Result<Self> {
        let mut swapchain = VulkanSwapchain {
            options,
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: window_size,
            depth_format: vk::Format::UNDEFINED,
            render_pass: vk::RenderPass::null(),
            frames: Vec::new(),
            color_images: Vec::new(),
            depth_image: None,
            msaa_image: None,
            semaphores: Vec::new(),
            current_semaphore: 0,
            current_frame: 0,
            frame_submitted: false,
            needs_rebuild: true,
        };
        if let Err(err) = swapchain.check_rebuild(device, window_size) {
            unsafe { swapchain.destroy(device) };
            return Err(err);
        }
        Ok(swapchain)
    }

    /// Forces a rebuild on the next [`check_rebuild`](Self::check_rebuild).
    #[inline]
    pub fn request_rebuild(&mut self) {
        self.needs_rebuild = true;
    }

    /// The swapchain is stale and will be rebuilt.
    #[inline]
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    /// Rebuilds the swapchain and its dependent resources if it was marked
    /// stale. Returns `true` if a new swapchain was built.
    pub fn check_rebuild(
        &mut self,
        device: &VulkanDevice,
        window_size: vk::Extent2D,
    ) -> Result<bool> {
        if !self.needs_rebuild {
            return Ok(false);
        }

        device.wait_idle()?;
        unsafe { self.destroy_resources(device) };

        let physical_device = device.physical_device();
        let capabilities = physical_device.surface_capabilities()?;
        let format = choose_surface_format(
            &physical_device.surface_formats()?,
            &self.options.format_preference,
        );
        let present_mode = choose_present_mode(
            &physical_device.present_modes()?,
            &self.options.present_mode_preference,
        );
        let extent = choose_extent(&capabilities, window_size);
        if extent.width == 0 || extent.height == 0 {
            return Ok(false);
        }

        let families = physical_device.queue_families();
        let family_indices = [families.graphics, families.present];
        let (sharing_mode, queue_family_indices): (_, &[u32]) =
            if families.graphics != families.present {
                (vk::SharingMode::CONCURRENT, &family_indices[..])
            } else {
                (vk::SharingMode::EXCLUSIVE, &[])
            };

        let old_swapchain = mem::replace(&mut self.handle, vk::SwapchainKHR::null());
        let swapchain_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(physical_device.surface())
            .min_image_count(min_image_count(present_mode, &capabilities))
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(self.options.usage)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(queue_family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(choose_composite_alpha(capabilities.supported_composite_alpha))
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let loader = device.swapchain_loader();
        let handle = unsafe { loader.create_swapchain(&swapchain_info, None) };
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { loader.destroy_swapchain(old_swapchain, None) };
        }
        self.handle = handle?;
        self.images = unsafe { loader.get_swapchain_images(self.handle)? };
        self.format = format;
        self.present_mode = present_mode;
        self.extent = extent;

        self.depth_format = choose_depth_format(
            self.options.depth_buffer_size,
            self.options.stencil_buffer_size,
            |f| physical_device.format_properties(f),
        )?;

        self.create_render_pass(device)?;
        self.create_attachments(device)?;
        self.create_frames(device)?;

        self.current_semaphore = 0;
        self.frame_submitted = false;
        self.needs_rebuild = false;

        log::info!(
            "Swapchain {}x{}, {:?}, {:?}, {} image(s), depth {:?}",
            extent.width,
            extent.height,
            format.format,
            present_mode,
            self.images.len(),
            self.depth_format
        );
        Ok(true)
    }

    fn sample_count(device: &VulkanDevice) -> vk::SampleCountFlags {
        device.physical_device().sample_count()
    }

    fn create_render_pass(&mut self, device: &VulkanDevice) -> Result<()> {
        let samples = Self::sample_count(device);
        let multisampled = samples != vk::SampleCountFlags::TYPE_1;
        let has_depth = self.depth_format != vk::Format::UNDEFINED;
        let has_stencil = stencil_bits(self.depth_format) > 0;

        let mut attachments: AbcgSmallVec<vk::AttachmentDescription> = AbcgSmallVec::new();
        attachments.push(vk::AttachmentDescription {
            format: self.format.format,
            samples,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: if multisampled {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::PRESENT_SRC_KHR
            },
            ..Default::default()
        });
        let color_ref = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let depth_ref = vk::AttachmentReference {
            attachment: attachments.len() as u32,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        if has_depth {
            attachments.push(vk::AttachmentDescription {
                format: self.depth_format,
                samples,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: if has_stencil {
                    vk::AttachmentLoadOp::CLEAR
                } else {
                    vk::AttachmentLoadOp::DONT_CARE
                },
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            });
        }

        let resolve_ref = [vk::AttachmentReference {
            attachment: attachments.len() as u32,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        if multisampled {
            attachments.push(vk::AttachmentDescription {
                format: self.format.format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::DONT_CARE,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                ..Default::default()
            });
        }

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_ref);
        if has_depth {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        if multisampled {
            subpass = subpass.resolve_attachments(&resolve_ref);
        }
        let subpasses = [subpass.build()];
        let dependencies = [subpass_dependency(has_depth)];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        self.render_pass = unsafe { device.device().create_render_pass(&render_pass_info, None)? };
        Ok(())
    }

    /// Depth and MSAA color images shared by all frames.
    fn create_attachments(&mut self, device: &VulkanDevice) -> Result<()> {
        let samples = Self::sample_count(device);
        let extent = vk::Extent3D {
            width: self.extent.width,
            height: self.extent.height,
            depth: 1,
        };

        let attachment_info = |format, usage, aspect_mask| VulkanImageCreateInfo {
            info: vk::ImageCreateInfo::builder()
                .image_type(vk::ImageType::TYPE_2D)
                .format(format)
                .extent(extent)
                .mip_levels(1)
                .array_layers(1)
                .samples(samples)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .build(),
            properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            view_info: vk::ImageViewCreateInfo::builder()
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .build(),
        };

        if self.depth_format != vk::Format::UNDEFINED {
            self.depth_image = Some(VulkanImage::create(
                device,
                &attachment_info(
                    self.depth_format,
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                    depth_aspect(self.depth_format),
                ),
            )?);
        }

        if samples != vk::SampleCountFlags::TYPE_1 {
            self.msaa_image = Some(VulkanImage::create(
                device,
                &attachment_info(
                    self.format.format,
                    vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                        | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                    vk::ImageAspectFlags::COLOR,
                ),
            )?);
        }
        Ok(())
    }

    fn create_frames(&mut self, device: &VulkanDevice) -> Result<()> {
        let ash_device = device.device();
        let graphics_family = device.physical_device().queue_families().graphics;
        let depth_view = self.depth_image.as_ref().map(VulkanImage::view);
        let msaa_view = self.msaa_image.as_ref().map(VulkanImage::view);

        for (index, &image) in self.images.iter().enumerate() {
            let color_image = VulkanImage::create(
                device,
                &VulkanImageCreateInfo {
                    view_info: vk::ImageViewCreateInfo::builder()
                        .image(image)
                        .view_type(vk::ImageViewType::TYPE_2D)
                        .format(self.format.format)
                        .subresource_range(vk::ImageSubresourceRange {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            base_mip_level: 0,
                            level_count: 1,
                            base_array_layer: 0,
                            layer_count: 1,
                        })
                        .build(),
                    ..Default::default()
                },
            )?;
            let color_view = color_image.view();
            self.color_images.push(color_image);

            let mut attachments: AbcgSmallVec<vk::ImageView> = AbcgSmallVec::new();
            match msaa_view {
                Some(msaa_view) => {
                    attachments.push(msaa_view);
                    attachments.extend(depth_view);
                    attachments.push(color_view);
                }
                None => {
                    attachments.push(color_view);
                    attachments.extend(depth_view);
                }
            }

            unsafe {
                let framebuffer_info = vk::FramebufferCreateInfo::builder()
                    .render_pass(self.render_pass)
                    .attachments(&attachments)
                    .width(self.extent.width)
                    .height(self.extent.height)
                    .layers(1);
                let framebuffer = ash_device.create_framebuffer(&framebuffer_info, None)?;

                let pool_info = vk::CommandPoolCreateInfo::builder()
                    .flags(vk::CommandPoolCreateFlags::TRANSIENT)
                    .queue_family_index(graphics_family);
                let command_pool = match ash_device.create_command_pool(&pool_info, None) {
                    Ok(pool) => pool,
                    Err(err) => {
                        ash_device.destroy_framebuffer(framebuffer, None);
                        return Err(err.into());
                    }
                };

                // Tracked right away so a failure below is cleaned up by
                // `destroy_resources`.
                self.frames.push(VulkanFrame {
                    index: index as u32,
                    command_pool,
                    command_buffer: vk::CommandBuffer::null(),
                    fence: vk::Fence::null(),
                    color_view,
                    framebuffer,
                    render_pass: self.render_pass,
                    extent: self.extent,
                    depth: depth_view.is_some(),
                    multisampled: msaa_view.is_some(),
                });
                let frame = index;

                let allocate_info = vk::CommandBufferAllocateInfo::builder()
                    .command_pool(command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1);
                self.frames[frame].command_buffer =
                    ash_device.allocate_command_buffers(&allocate_info)?[0];

                let fence_info =
                    vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
                self.frames[frame].fence = ash_device.create_fence(&fence_info, None)?;

                let semaphore_info = vk::SemaphoreCreateInfo::default();
                let present_complete = ash_device.create_semaphore(&semaphore_info, None)?;
                let render_complete = match ash_device.create_semaphore(&semaphore_info, None) {
                    Ok(semaphore) => semaphore,
                    Err(err) => {
                        ash_device.destroy_semaphore(present_complete, None);
                        return Err(err.into());
                    }
                };
                self.semaphores.push(FrameSemaphores {
                    present_complete,
                    render_complete,
                });
            }
        }
        Ok(())
    }

    /// Acquires the next image and records it with `record`.
    ///
    /// The frame's command buffer is begun before and ended after `record`,
    /// then submitted to the graphics queue. If the swapchain turns out to be
    /// stale nothing is recorded and a rebuild is requested.
    pub fn render(
        &mut self,
        device: &VulkanDevice,
        record: impl FnOnce(&VulkanFrame) -> Result<()>,
    ) -> Result<()> {
        self.frame_submitted = false;
        if self.needs_rebuild || self.handle == vk::SwapchainKHR::null() {
            return Ok(());
        }

        let semaphores = self.semaphores[self.current_semaphore];
        let acquired = unsafe {
            device.swapchain_loader().acquire_next_image(
                self.handle,
                u64::MAX,
                semaphores.present_complete,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((index, false)) => self.current_frame = index,
            Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.needs_rebuild = true;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        let frame = self.frames[self.current_frame as usize];
        let ash_device = device.device();
        unsafe {
            ash_device.wait_for_fences(&[frame.fence], true, u64::MAX)?;
            ash_device.reset_fences(&[frame.fence])?;
            ash_device.reset_command_pool(frame.command_pool, vk::CommandPoolResetFlags::empty())?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            ash_device.begin_command_buffer(frame.command_buffer, &begin_info)?;
        }

        record(&frame)?;

        let wait_semaphores = [semaphores.present_complete];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [semaphores.render_complete];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();
        unsafe {
            ash_device.end_command_buffer(frame.command_buffer)?;
            ash_device.queue_submit(device.queues().graphics, &[submit_info], frame.fence)?;
        }
        self.frame_submitted = true;
        Ok(())
    }

    /// Presents the frame submitted by the last [`render`](Self::render).
    pub fn present(&mut self, device: &VulkanDevice) -> Result<()> {
        if self.needs_rebuild || !self.frame_submitted {
            return Ok(());
        }
        self.frame_submitted = false;

        let wait_semaphores = [self.semaphores[self.current_semaphore].render_complete];
        let swapchains = [self.handle];
        let image_indices = [self.current_frame];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let presented = unsafe {
            device
                .swapchain_loader()
                .queue_present(device.queues().present, &present_info)
        };
        match presented {
            Ok(false) => {
                self.current_semaphore = (self.current_semaphore + 1) % self.semaphores.len();
                Ok(())
            }
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.needs_rebuild = true;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Per-image frames.
    #[inline]
    pub fn frames(&self) -> &[VulkanFrame] {
        &self.frames
    }

    /// The frame of the most recently acquired image.
    #[inline]
    pub fn current_frame(&self) -> Option<&VulkanFrame> {
        self.frames.get(self.current_frame as usize)
    }

    /// Render pass drawing into the swapchain images.
    #[inline]
    pub fn main_render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Dimensions of the swapchain images.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Format and color space of the swapchain images.
    #[inline]
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Presentation mode in use.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Depth/stencil attachment, if the render pass has one.
    #[inline]
    pub fn depth_image(&self) -> Option<&VulkanImage> {
        self.depth_image.as_ref()
    }

    /// Format of the depth/stencil attachment, `UNDEFINED` without one.
    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    unsafe fn destroy_resources(&mut self, device: &VulkanDevice) {
        let ash_device = device.device();
        for frame in self.frames.drain(..) {
            if frame.fence != vk::Fence::null() {
                ash_device.destroy_fence(frame.fence, None);
            }
            ash_device.destroy_command_pool(frame.command_pool, None);
            ash_device.destroy_framebuffer(frame.framebuffer, None);
        }
        for semaphores in self.semaphores.drain(..) {
            ash_device.destroy_semaphore(semaphores.present_complete, None);
            ash_device.destroy_semaphore(semaphores.render_complete, None);
        }
        for mut image in self.color_images.drain(..) {
            image.destroy(device);
        }
        if let Some(mut image) = self.depth_image.take() {
            image.destroy(device);
        }
        if let Some(mut image) = self.msaa_image.take() {
            image.destroy(device);
        }
        if self.render_pass != vk::RenderPass::null() {
            ash_device.destroy_render_pass(self.render_pass, None);
            self.render_pass = vk::RenderPass::null();
        }
    }

    /// Destroys all swapchain resources. Must not be called while any frames
    /// are still in flight on the GPU.
    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        self.destroy_resources(device);
        if self.handle != vk::SwapchainKHR::null() {
            device
                .swapchain_loader()
                .destroy_swapchain(self.handle, None);
            self.handle = vk::SwapchainKHR::null();
        }
        self.images.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srgb(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn surface_format_preference() {
        let options = SwapchainOptions::default();
        let available = [
            srgb(vk::Format::B8G8R8A8_SRGB),
            srgb(vk::Format::R8G8B8A8_UNORM),
            srgb(vk::Format::B8G8R8A8_UNORM),
        ];
        let chosen = choose_surface_format(&available, &options.format_preference);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);

        let linear = [vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        }];
        let chosen = choose_surface_format(&linear, &options.format_preference);
        assert_eq!(
            chosen.color_space,
            vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT
        );

        let odd = [srgb(vk::Format::A2B10G10R10_UNORM_PACK32)];
        let chosen = choose_surface_format(&odd, &options.format_preference);
        assert_eq!(chosen.format, vk::Format::A2B10G10R10_UNORM_PACK32);
        assert_eq!(
            choose_surface_format(&[], &options.format_preference).format,
            vk::Format::UNDEFINED
        );
    }

    #[test]
    fn present_mode_follows_vsync() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        let vsync = SwapchainOptions::from_settings(&VulkanSettings {
            vsync: true,
            ..Default::default()
        });
        assert_eq!(
            choose_present_mode(&all, &vsync.present_mode_preference),
            vk::PresentModeKHR::MAILBOX
        );

        let no_vsync = SwapchainOptions::from_settings(&VulkanSettings::default());
        assert_eq!(
            choose_present_mode(&all, &no_vsync.present_mode_preference),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(
                &[vk::PresentModeKHR::FIFO_RELAXED],
                &no_vsync.present_mode_preference
            ),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn image_count_per_present_mode() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(min_image_count(vk::PresentModeKHR::MAILBOX, &caps), 3);
        assert_eq!(min_image_count(vk::PresentModeKHR::FIFO, &caps), 2);
        assert_eq!(min_image_count(vk::PresentModeKHR::IMMEDIATE, &caps), 2);

        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 1,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(min_image_count(vk::PresentModeKHR::MAILBOX, &capped), 2);
        assert_eq!(min_image_count(vk::PresentModeKHR::IMMEDIATE, &capped), 1);
    }

    #[test]
    fn extent_from_surface_or_window() {
        let window = vk::Extent2D {
            width: 5000,
            height: 10,
        };
        let fixed = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        assert_eq!(choose_extent(&fixed, window), fixed.current_extent);

        let flexible = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 16,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };
        assert_eq!(
            choose_extent(&flexible, window),
            vk::Extent2D {
                width: 4096,
                height: 16
            }
        );
    }

    #[test]
    fn composite_alpha_order() {
        use vk::CompositeAlphaFlagsKHR as A;
        assert_eq!(choose_composite_alpha(A::OPAQUE | A::INHERIT), A::INHERIT);
        assert_eq!(
            choose_composite_alpha(A::POST_MULTIPLIED | A::PRE_MULTIPLIED),
            A::PRE_MULTIPLIED
        );
        assert_eq!(choose_composite_alpha(A::OPAQUE), A::OPAQUE);
        assert_eq!(choose_composite_alpha(A::empty()), A::OPAQUE);
    }

    #[test]
    fn depth_candidates() {
        assert_eq!(depth_format_candidates(0, 0), &[vk::Format::UNDEFINED]);
        assert_eq!(depth_format_candidates(24, 0)[0], vk::Format::D32_SFLOAT);
        assert_eq!(depth_format_candidates(0, 8)[0], vk::Format::S8_UINT);
        assert!(depth_format_candidates(24, 8)
            .iter()
            .all(|&f| stencil_bits(f) == 8 && depth_bits(f) > 0));
    }

    #[test]
    fn depth_validation() {
        use vk::Format as F;
        assert!(validate_depth_format(F::D24_UNORM_S8_UINT, 24, 8).is_ok());
        assert!(validate_depth_format(F::D32_SFLOAT, 32, 0).is_ok());
        assert!(validate_depth_format(F::D16_UNORM, 16, 0).is_ok());

        let err = validate_depth_format(F::D16_UNORM, 24, 0).unwrap_err();
        assert!(err.to_string().starts_with("Failed to find depth format"));
        assert!(validate_depth_format(F::D32_SFLOAT, 33, 0).is_err());
        assert!(validate_depth_format(F::S8_UINT, 16, 8).is_err());

        let err = validate_depth_format(F::D32_SFLOAT, 24, 8).unwrap_err();
        assert!(err.to_string().starts_with("Failed to find stencil format"));
        let too_much_stencil = validate_depth_format(F::D32_SFLOAT_S8_UINT, 24, 16);
        assert!(too_much_stencil.is_err());
    }

    #[test]
    fn depth_format_selection() {
        let only_d24s8 = |format: vk::Format| vk::FormatProperties {
            optimal_tiling_features: if format == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        };
        assert_eq!(
            choose_depth_format(24, 0, only_d24s8).unwrap(),
            vk::Format::D24_UNORM_S8_UINT
        );
        assert_eq!(
            choose_depth_format(0, 0, only_d24s8).unwrap(),
            vk::Format::UNDEFINED
        );
        assert!(choose_depth_format(32, 0, only_d24s8).is_err());
        let unsupported = |_: vk::Format| vk::FormatProperties::default();
        assert!(choose_depth_format(16, 0, unsupported).is_err());
    }

    #[test]
    fn aspects() {
        assert_eq!(
            depth_aspect(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            depth_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            depth_aspect(vk::Format::S8_UINT),
            vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn dependency_stages() {
        let color_only = subpass_dependency(false);
        assert_eq!(color_only.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(
            color_only.dst_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(color_only.src_access_mask, vk::AccessFlags::empty());

        let with_depth = subpass_dependency(true);
        assert!(with_depth
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert!(with_depth
            .dst_access_mask
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn clear_value_layout() {
        assert_eq!(clear_values([0.0; 4], false, false).len(), 1);
        assert_eq!(clear_values([0.0; 4], true, false).len(), 2);
        let values = clear_values([0.5; 4], true, true);
        assert_eq!(values.len(), 3);
        unsafe {
            assert_eq!(values[1].depth_stencil.depth, 1.0);
            assert_eq!(values[2].color.float32, [0.5; 4]);
        }
    }
}
