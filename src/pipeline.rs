//! Graphics pipelines targeting the main render pass.
use ash::vk;
use cstr::cstr;

use crate::{AbcgSmallVec, Result, VulkanDevice, VulkanShader, VulkanSwapchain};

/// Parameters of [`VulkanPipeline::create`].
///
/// Fields left as `None` are derived from the device and the swapchain when
/// the pipeline is created.
#[derive(Clone)]
pub struct VulkanPipelineCreateInfo {
    /// Shader stages of the pipeline.
    pub shaders: Vec<VulkanShader>,
    /// Vertex buffer bindings.
    pub binding_descriptions: Vec<vk::VertexInputBindingDescription>,
    /// Vertex attributes.
    pub attribute_descriptions: Vec<vk::VertexInputAttributeDescription>,
    /// Defaults to a triangle list.
    pub input_assembly_state: vk::PipelineInputAssemblyStateCreateInfo,
    /// Defaults to the whole swapchain extent.
    pub viewports: Option<Vec<vk::Viewport>>,
    /// Defaults to the whole swapchain extent.
    pub scissors: Option<Vec<vk::Rect2D>>,
    /// Defaults to filled, unculled polygons with counter-clockwise front faces.
    pub rasterization_state: vk::PipelineRasterizationStateCreateInfo,
    /// Defaults to the device sample count, with sample shading when
    /// multisampling.
    pub multisample_state: Option<vk::PipelineMultisampleStateCreateInfo>,
    /// Defaults to a `LESS` depth test when the swapchain has a depth buffer.
    pub depth_stencil_state: Option<vk::PipelineDepthStencilStateCreateInfo>,
    /// Defaults to a single attachment writing RGBA without blending.
    pub color_blend_attachments: Option<Vec<vk::PipelineColorBlendAttachmentState>>,
    /// States set while recording instead of at creation.
    pub dynamic_states: Vec<vk::DynamicState>,
    /// Descriptor set layouts of the pipeline layout.
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    /// Push constant ranges of the pipeline layout.
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
    /// Cache used when creating the pipeline, may be null.
    pub pipeline_cache: vk::PipelineCache,
}

impl Default for VulkanPipelineCreateInfo {
    fn default() -> Self {
        VulkanPipelineCreateInfo {
            shaders: Vec::new(),
            binding_descriptions: Vec::new(),
            attribute_descriptions: Vec::new(),
            input_assembly_state: vk::PipelineInputAssemblyStateCreateInfo::builder()
                .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
                .build(),
            viewports: None,
            scissors: None,
            rasterization_state: vk::PipelineRasterizationStateCreateInfo::builder()
                .polygon_mode(vk::PolygonMode::FILL)
                .cull_mode(vk::CullModeFlags::NONE)
                .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
                .line_width(1.0)
                .build(),
            multisample_state: None,
            depth_stencil_state: None,
            color_blend_attachments: None,
            dynamic_states: Vec::new(),
            set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
            pipeline_cache: vk::PipelineCache::null(),
        }
    }
}

fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    }
}

fn default_multisample_state(
    samples: vk::SampleCountFlags,
    sample_rate_shading: bool,
) -> vk::PipelineMultisampleStateCreateInfo {
    let shading = samples != vk::SampleCountFlags::TYPE_1 && sample_rate_shading;
    vk::PipelineMultisampleStateCreateInfo::builder()
        .rasterization_samples(samples)
        .sample_shading_enable(shading)
        .min_sample_shading(if shading { 0.5 } else { 0.0 })
        .build()
}

fn default_depth_stencil_state(has_depth: bool) -> vk::PipelineDepthStencilStateCreateInfo {
    vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(has_depth)
        .depth_write_enable(has_depth)
        .depth_compare_op(vk::CompareOp::LESS)
        .min_depth_bounds(0.0)
        .max_depth_bounds(1.0)
        .build()
}

fn default_color_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build()
}

/// A graphics pipeline and its layout.
#[derive(Debug, Default)]
pub struct VulkanPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl VulkanPipeline {
    /// Creates the layout and the pipeline for subpass 0 of the swapchain's
    /// main render pass.
    pub fn create(
        device: &VulkanDevice,
        swapchain: &VulkanSwapchain,
        info: &VulkanPipelineCreateInfo,
    ) -> Result<Self> {
        let ash_device = device.device();
        let physical_device = device.physical_device();
        let extent = swapchain.extent();

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&info.set_layouts)
            .push_constant_ranges(&info.push_constant_ranges);
        let layout = unsafe { ash_device.create_pipeline_layout(&layout_info, None)? };

        let entry_point = cstr!("main");
        let stages: AbcgSmallVec<_> = info
            .shaders
            .iter()
            .map(|shader| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(shader.stage().flags())
                    .module(shader.module())
                    .name(entry_point)
                    .build()
            })
            .collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&info.binding_descriptions)
            .vertex_attribute_descriptions(&info.attribute_descriptions);

        let viewports = info
            .viewports
            .clone()
            .unwrap_or_else(|| vec![full_viewport(extent)]);
        let scissors = info
            .scissors
            .clone()
            .unwrap_or_else(|| vec![full_scissor(extent)]);
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let multisample_state = info.multisample_state.unwrap_or_else(|| {
            default_multisample_state(
                physical_device.sample_count(),
                physical_device.features().sample_rate_shading == vk::TRUE,
            )
        });
        let depth_stencil_state = info
            .depth_stencil_state
            .unwrap_or_else(|| default_depth_stencil_state(swapchain.depth_image().is_some()));

        let color_blend_attachments = info
            .color_blend_attachments
            .clone()
            .unwrap_or_else(|| vec![default_color_blend_attachment()]);
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&info.dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&info.input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&info.rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(swapchain.main_render_pass())
            .subpass(0)
            .build();

        let pipelines = unsafe {
            ash_device.create_graphics_pipelines(info.pipeline_cache, &[pipeline_info], None)
        };
        match pipelines {
            Ok(pipelines) => Ok(VulkanPipeline {
                pipeline: pipelines[0],
                layout,
            }),
            Err((_, err)) => {
                unsafe { ash_device.destroy_pipeline_layout(layout, None) };
                Err(err.into())
            }
        }
    }

    /// The pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// The pipeline layout.
    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Waits for the device to go idle, then destroys the pipeline and its
    /// layout.
    pub unsafe fn destroy(&mut self, device: &VulkanDevice) -> Result<()> {
        device.wait_idle()?;
        let ash_device = device.device();
        if self.pipeline != vk::Pipeline::null() {
            ash_device.destroy_pipeline(self.pipeline, None);
            self.pipeline = vk::Pipeline::null();
        }
        if self.layout != vk::PipelineLayout::null() {
            ash_device.destroy_pipeline_layout(self.layout, None);
            self.layout = vk::PipelineLayout::null();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_info_defaults() {
        let info = VulkanPipelineCreateInfo::default();
        assert_eq!(
            info.input_assembly_state.topology,
            vk::PrimitiveTopology::TRIANGLE_LIST
        );
        assert_eq!(info.rasterization_state.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(info.rasterization_state.line_width, 1.0);
        assert!(info.viewports.is_none());
        assert!(info.multisample_state.is_none());
        assert!(info.shaders.is_empty());
        assert_eq!(info.pipeline_cache, vk::PipelineCache::null());
    }

    #[test]
    fn viewport_covers_extent() {
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let viewport = full_viewport(extent);
        assert_eq!((viewport.width, viewport.height), (640.0, 480.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
        assert_eq!(full_scissor(extent).extent, extent);
    }

    #[test]
    fn sample_shading_only_with_msaa() {
        let single = default_multisample_state(vk::SampleCountFlags::TYPE_1, true);
        assert_eq!(single.sample_shading_enable, vk::FALSE);

        let msaa = default_multisample_state(vk::SampleCountFlags::TYPE_4, true);
        assert_eq!(msaa.rasterization_samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(msaa.sample_shading_enable, vk::TRUE);
        assert_eq!(msaa.min_sample_shading, 0.5);

        let unsupported = default_multisample_state(vk::SampleCountFlags::TYPE_4, false);
        assert_eq!(unsupported.sample_shading_enable, vk::FALSE);
    }

    #[test]
    fn depth_test_follows_depth_buffer() {
        let depth = default_depth_stencil_state(true);
        assert_eq!(depth.depth_test_enable, vk::TRUE);
        assert_eq!(depth.depth_write_enable, vk::TRUE);
        assert_eq!(depth.depth_compare_op, vk::CompareOp::LESS);
        assert_eq!(
            default_depth_stencil_state(false).depth_test_enable,
            vk::FALSE
        );
    }

    #[test]
    fn blend_writes_rgba() {
        let attachment = default_color_blend_attachment();
        assert_eq!(attachment.color_write_mask, vk::ColorComponentFlags::RGBA);
        assert_eq!(attachment.blend_enable, vk::FALSE);
    }
}
