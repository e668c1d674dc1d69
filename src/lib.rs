#![allow(clippy::missing_safety_doc)]
#![warn(missing_docs)]
/*!
Application base classes for small interactive Vulkan programs.

- ✅ Window creation and the event loop ([`Application`], [`Window`])
- ✅ Instance creation, with validation layers in debug builds
- ✅ Physical device selection and logical device creation
- ✅ Swapchain creation/recreation with depth and MSAA attachments
- ✅ Buffers, textures, shaders and graphics pipelines
- ✅ Timers and a virtual trackball

## Cargo Features

- `shaderc`: compile GLSL shaders at runtime. Without it shaders must be
  given as SPIR-V (`.spv`) files.

## Example

```rust,ignore
struct Triangle;

impl VulkanApp for Triangle {
    fn on_paint(&mut self, device: &VulkanDevice, frame: &VulkanFrame) -> abcg::Result<()> {
        frame.begin_render_pass(device, [0.0, 0.0, 0.0, 1.0]);
        // Bind a pipeline and draw.
        frame.end_render_pass(device);
        Ok(())
    }
}

let app = Application::new();
let mut window = VulkanWindow::new(WindowSettings::default(), VulkanSettings::default(), Triangle);
app.run(&mut window)?;
```

A complete program lives in `demos/triangle.rs`.
*/

pub mod application;
pub mod buffer;
pub mod device;
pub mod error;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod settings;
pub mod shader;
pub mod swapchain;
pub mod timer;
pub mod trackball;
pub mod util;
pub mod vulkan_window;
pub mod window;

pub use self::image::*;
pub use application::*;
pub use buffer::*;
pub use device::*;
pub use error::*;
pub use instance::*;
pub use physical_device::*;
pub use pipeline::*;
pub use settings::*;
pub use shader::*;
pub use swapchain::*;
pub use timer::*;
pub use trackball::*;
pub use util::*;
pub use vulkan_window::*;
pub use window::*;

type AbcgSmallVec<T> = smallvec::SmallVec<[T; 8]>;
