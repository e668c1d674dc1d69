// A colored triangle spun with the mouse through a virtual trackball.
//
// Run with `cargo run --example triangle --features shaderc`.

use std::path::Path;

use abcg::{
    Application, Settings, ShaderSource, ShaderStage, TrackBall, VulkanApp, VulkanBuffer,
    VulkanBufferCreateInfo, VulkanContext, VulkanDevice, VulkanFrame, VulkanPipeline,
    VulkanPipelineCreateInfo, VulkanShader, VulkanWindow,
};
use ash::vk;
use glam::{IVec2, Mat4};
use winit::event::{ElementState, MouseButton, WindowEvent};

// x, y, r, g, b
const VERTICES: [[f32; 5]; 3] = [
    [0.0, -0.5, 1.0, 0.0, 0.0],
    [0.5, 0.5, 0.0, 1.0, 0.0],
    [-0.5, 0.5, 0.0, 0.0, 1.0],
];

struct Triangle {
    assets_path: String,
    trackball: TrackBall,
    cursor: IVec2,
    rotation: Mat4,
    vertex_buffer: VulkanBuffer,
    shaders: Vec<VulkanShader>,
    pipeline: VulkanPipeline,
}

impl Triangle {
    fn new(assets_path: String) -> Self {
        let mut trackball = TrackBall::new();
        trackball.set_axis(glam::Vec3::Y);
        trackball.set_velocity(0.001);
        Triangle {
            assets_path,
            trackball,
            cursor: IVec2::ZERO,
            rotation: Mat4::IDENTITY,
            vertex_buffer: VulkanBuffer::default(),
            shaders: Vec::new(),
            pipeline: VulkanPipeline::default(),
        }
    }
}

impl VulkanApp for Triangle {
    fn on_event(&mut self, event: &WindowEvent<'_>) -> abcg::Result<()> {
        match event {
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = IVec2::new(position.x as i32, position.y as i32);
                self.trackball.mouse_move(self.cursor);
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => match state {
                ElementState::Pressed => self.trackball.mouse_press(self.cursor),
                ElementState::Released => self.trackball.mouse_release(self.cursor),
            },
            _ => {}
        }
        Ok(())
    }

    fn on_create(&mut self, ctx: &VulkanContext) -> abcg::Result<()> {
        self.vertex_buffer = VulkanBuffer::create(
            ctx.device,
            &VulkanBufferCreateInfo {
                usage: vk::BufferUsageFlags::VERTEX_BUFFER,
                properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                data: Some(bytemuck::cast_slice(&VERTICES)),
                ..Default::default()
            },
        )?;

        for (file, stage) in [
            ("triangle.vert", ShaderStage::Vertex),
            ("triangle.frag", ShaderStage::Fragment),
        ] {
            let source = ShaderSource::new(format!("{}{file}", self.assets_path), stage);
            let shader = VulkanShader::create(ctx.device, &source)?;
            self.shaders.push(shader);
        }
        Ok(())
    }

    fn on_resize(&mut self, ctx: &VulkanContext) -> abcg::Result<()> {
        let extent = ctx.swapchain.extent();
        self.trackball
            .resize_viewport(IVec2::new(extent.width as i32, extent.height as i32));

        // The render pass is recreated with the swapchain.
        unsafe { self.pipeline.destroy(ctx.device)? };
        self.pipeline = VulkanPipeline::create(
            ctx.device,
            ctx.swapchain,
            &VulkanPipelineCreateInfo {
                shaders: self.shaders.clone(),
                binding_descriptions: vec![vk::VertexInputBindingDescription {
                    binding: 0,
                    stride: std::mem::size_of::<[f32; 5]>() as u32,
                    input_rate: vk::VertexInputRate::VERTEX,
                }],
                attribute_descriptions: vec![
                    vk::VertexInputAttributeDescription {
                        location: 0,
                        binding: 0,
                        format: vk::Format::R32G32_SFLOAT,
                        offset: 0,
                    },
                    vk::VertexInputAttributeDescription {
                        location: 1,
                        binding: 0,
                        format: vk::Format::R32G32B32_SFLOAT,
                        offset: 2 * std::mem::size_of::<f32>() as u32,
                    },
                ],
                dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
                push_constant_ranges: vec![vk::PushConstantRange {
                    stage_flags: vk::ShaderStageFlags::VERTEX,
                    offset: 0,
                    size: std::mem::size_of::<Mat4>() as u32,
                }],
                ..Default::default()
            },
        )?;
        Ok(())
    }

    fn on_update(&mut self, _ctx: &VulkanContext) -> abcg::Result<()> {
        self.rotation = Mat4::from_quat(self.trackball.rotation());
        Ok(())
    }

    fn on_paint(&mut self, device: &VulkanDevice, frame: &VulkanFrame) -> abcg::Result<()> {
        let ash_device = device.device();
        let command_buffer = frame.command_buffer;

        frame.begin_render_pass(device, [0.1, 0.1, 0.1, 1.0]);
        unsafe {
            ash_device.cmd_set_viewport(
                command_buffer,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: frame.extent.width as f32,
                    height: frame.extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            ash_device.cmd_set_scissor(
                command_buffer,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: frame.extent,
                }],
            );
            ash_device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.handle(),
            );
            ash_device.cmd_push_constants(
                command_buffer,
                self.pipeline.layout(),
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::cast_slice(&self.rotation.to_cols_array()),
            );
            ash_device.cmd_bind_vertex_buffers(
                command_buffer,
                0,
                &[self.vertex_buffer.handle()],
                &[0],
            );
            ash_device.cmd_draw(command_buffer, VERTICES.len() as u32, 1, 0, 0);
        }
        frame.end_render_pass(device);
        Ok(())
    }

    fn on_destroy(&mut self, ctx: &VulkanContext) -> abcg::Result<()> {
        unsafe {
            self.pipeline.destroy(ctx.device)?;
            for shader in &mut self.shaders {
                shader.destroy(ctx.device);
            }
            self.vertex_buffer.destroy(ctx.device);
        }
        Ok(())
    }
}

fn main() -> abcg::Result<()> {
    let app = Application::new();

    // Next to the binary when installed, otherwise straight from the sources.
    let assets_path = if Path::new(app.assets_path()).is_dir() {
        app.assets_path().to_owned()
    } else {
        concat!(env!("CARGO_MANIFEST_DIR"), "/demos/assets/").to_owned()
    };

    let settings_file = format!("{assets_path}triangle.toml");
    let mut settings = if Path::new(&settings_file).is_file() {
        Settings::load(&settings_file)?
    } else {
        Settings::default()
    };
    settings.window.title = "Triangle".into();
    settings.vulkan.samples = settings.vulkan.samples.max(4);

    let mut window = VulkanWindow::new(
        settings.window,
        settings.vulkan,
        Triangle::new(assets_path),
    );
    app.run(&mut window)
}
