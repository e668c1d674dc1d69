//! A [`Window`] rendering with Vulkan, customized through [`VulkanApp`]
//! hooks.
use ash::{extensions::khr::Swapchain, vk, Entry};
use winit::{
    dpi::PhysicalSize, event::WindowEvent, event_loop::EventLoopWindowTarget, window::WindowId,
};

use crate::{
    DebugMessenger, Error, InstanceBuilder, Result, SwapchainOptions, ValidationLayers,
    VulkanDevice, VulkanFrame, VulkanInstance, VulkanPhysicalDevice, VulkanSettings,
    VulkanSwapchain, Window, WindowBase, WindowSettings,
};

/// What the hooks of a [`VulkanApp`] can see.
pub struct VulkanContext<'a> {
    /// Window state shared with the app.
    pub base: &'a WindowBase,
    /// The logical device.
    pub device: &'a VulkanDevice,
    /// The swapchain and its frames.
    pub swapchain: &'a VulkanSwapchain,
    /// Vulkan settings of the window.
    pub settings: &'a VulkanSettings,
}

/// Application hooks called by [`VulkanWindow`]. Every hook does nothing by
/// default.
pub trait VulkanApp {
    /// Any event addressed to the window, after the window handled it.
    fn on_event(&mut self, _event: &WindowEvent<'_>) -> Result<()> {
        Ok(())
    }

    /// Once, after the device and the swapchain were created.
    fn on_create(&mut self, _ctx: &VulkanContext) -> Result<()> {
        Ok(())
    }

    /// Records the frame. The command buffer is already recording and is
    /// submitted afterwards.
    fn on_paint(&mut self, _device: &VulkanDevice, _frame: &VulkanFrame) -> Result<()> {
        Ok(())
    }

    /// After creation and every swapchain rebuild.
    fn on_resize(&mut self, _ctx: &VulkanContext) -> Result<()> {
        Ok(())
    }

    /// Once per loop iteration, even while the window is hidden.
    fn on_update(&mut self, _ctx: &VulkanContext) -> Result<()> {
        Ok(())
    }

    /// Before the swapchain and the device are destroyed. The device is idle.
    fn on_destroy(&mut self, _ctx: &VulkanContext) -> Result<()> {
        Ok(())
    }
}

fn extent(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

/// Window owning the Vulkan instance, device and swapchain.
pub struct VulkanWindow<A: VulkanApp> {
    app: A,
    base: WindowBase,
    vulkan_settings: VulkanSettings,

    instance: Option<VulkanInstance>,
    surface: vk::SurfaceKHR,
    device: Option<VulkanDevice>,
    swapchain: Option<VulkanSwapchain>,

    hidden: bool,
    minimized: bool,
}

impl<A: VulkanApp> VulkanWindow<A> {
    /// Window running `app`. Nothing is created until the event loop starts.
    pub fn new(window_settings: WindowSettings, vulkan_settings: VulkanSettings, app: A) -> Self {
        VulkanWindow {
            app,
            base: WindowBase::new(window_settings),
            vulkan_settings,
            instance: None,
            surface: vk::SurfaceKHR::null(),
            device: None,
            swapchain: None,
            hidden: false,
            minimized: false,
        }
    }

    /// The application.
    #[inline]
    pub fn app(&self) -> &A {
        &self.app
    }

    /// The application, mutably.
    #[inline]
    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    /// The OS window state.
    #[inline]
    pub fn base(&self) -> &WindowBase {
        &self.base
    }

    /// The OS window state, mutably.
    #[inline]
    pub fn base_mut(&mut self) -> &mut WindowBase {
        &mut self.base
    }

    /// Vulkan settings in use.
    #[inline]
    pub fn vulkan_settings(&self) -> &VulkanSettings {
        &self.vulkan_settings
    }

    /// Only takes effect if called before the window is created.
    pub fn set_vulkan_settings(&mut self, settings: VulkanSettings) {
        if self.device.is_some() {
            log::warn!("Vulkan settings changed after creation are ignored");
            return;
        }
        self.vulkan_settings = settings;
    }

    /// The device, once created.
    #[inline]
    pub fn device(&self) -> Option<&VulkanDevice> {
        self.device.as_ref()
    }

    /// The swapchain, once created.
    #[inline]
    pub fn swapchain(&self) -> Option<&VulkanSwapchain> {
        self.swapchain.as_ref()
    }

    /// The window is hidden.
    #[inline]
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// The window is minimized and skips painting.
    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    fn create_vulkan(&mut self, target: &EventLoopWindowTarget<()>) -> Result<()> {
        self.base.create_window(target)?;
        let window = self.base.os_window()?;
        let window_size = window.inner_size();

        let entry = unsafe { Entry::load()? };
        let instance = InstanceBuilder::new()
            .app_name(&self.base.window_settings().title)
            .map_err(|_| Error::runtime("Window title contains a nul byte"))?
            .require_surface_extensions(window)?
            .validation_layers(ValidationLayers::for_build())
            .request_debug_messenger(if cfg!(debug_assertions) {
                DebugMessenger::Default
            } else {
                DebugMessenger::Disable
            })
            .build(entry)?;
        let instance = self.instance.insert(instance);

        self.surface = instance.create_surface(window)?;

        self.vulkan_settings.samples = self.vulkan_settings.sample_count();
        let device_extensions = [Swapchain::name()];
        let physical_device = VulkanPhysicalDevice::select(
            instance,
            self.surface,
            &device_extensions,
            self.vulkan_settings.samples,
            false,
        )?;
        let device = self
            .device
            .insert(VulkanDevice::create(physical_device, &device_extensions)?);

        self.swapchain = Some(VulkanSwapchain::create(
            device,
            SwapchainOptions::from_settings(&self.vulkan_settings),
            extent(window_size),
        )?);
        Ok(())
    }
}

impl<A: VulkanApp> Window for VulkanWindow<A> {
    fn create(&mut self, target: &EventLoopWindowTarget<()>) -> Result<()> {
        self.create_vulkan(target)?;

        let (Some(device), Some(swapchain)) = (&self.device, &self.swapchain) else {
            return Err(Error::runtime("Vulkan resources are missing after creation"));
        };
        let ctx = VulkanContext {
            base: &self.base,
            device,
            swapchain,
            settings: &self.vulkan_settings,
        };
        self.app.on_create(&ctx)?;
        self.app.on_resize(&ctx)
    }

    fn handle_event(&mut self, event: &WindowEvent<'_>) -> Result<()> {
        self.base.handle_base_event(event);
        match event {
            WindowEvent::Resized(size) => {
                self.minimized = size.width == 0 || size.height == 0;
                if let Some(swapchain) = &mut self.swapchain {
                    swapchain.request_rebuild();
                }
            }
            WindowEvent::Occluded(occluded) => self.hidden = *occluded,
            _ => {}
        }
        self.app.on_event(event)
    }

    fn paint(&mut self) -> Result<()> {
        self.base.update_delta_time();

        let (Some(device), Some(swapchain)) = (&self.device, &mut self.swapchain) else {
            return Ok(());
        };
        self.app.on_update(&VulkanContext {
            base: &self.base,
            device,
            swapchain,
            settings: &self.vulkan_settings,
        })?;

        if self.hidden || self.minimized {
            return Ok(());
        }

        if swapchain.check_rebuild(device, extent(self.base.window_size()))? {
            self.app.on_resize(&VulkanContext {
                base: &self.base,
                device,
                swapchain,
                settings: &self.vulkan_settings,
            })?;
        }

        let app = &mut self.app;
        swapchain.render(device, |frame| app.on_paint(device, frame))?;
        swapchain.present(device)?;

        self.base.update_fps();
        Ok(())
    }

    fn destroy(&mut self) {
        if let (Some(device), Some(swapchain)) = (&self.device, &self.swapchain) {
            if let Err(err) = device.wait_idle() {
                log::error!("Failed to wait for the device: {err}");
            }
            let ctx = VulkanContext {
                base: &self.base,
                device,
                swapchain,
                settings: &self.vulkan_settings,
            };
            if let Err(err) = self.app.on_destroy(&ctx) {
                log::error!("{err}");
            }
        }

        if let Some(mut device) = self.device.take() {
            unsafe {
                if let Some(mut swapchain) = self.swapchain.take() {
                    swapchain.destroy(&device);
                }
                device.destroy();
            }
        }
        if let Some(mut instance) = self.instance.take() {
            unsafe {
                instance.destroy_surface(self.surface);
                instance.destroy();
            }
        }
        self.surface = vk::SurfaceKHR::null();
        self.base.destroy();
    }

    #[inline]
    fn window_id(&self) -> Option<WindowId> {
        self.base.window_id()
    }

    #[inline]
    fn is_done(&self) -> bool {
        self.base.is_done()
    }
}
