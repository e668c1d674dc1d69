//! The window contract driven by [`Application::run`](crate::Application::run)
//! and the state every window shares.
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, KeyboardInput, VirtualKeyCode, WindowEvent},
    event_loop::EventLoopWindowTarget,
    window::{Fullscreen, Window as OsWindow, WindowBuilder, WindowId},
};

use crate::{Error, Result, Timer, WindowSettings};

/// Shortest interval between two delta time updates, in seconds.
pub const MIN_DELTA_TIME: f64 = 1.0 / 480.0;

/// A window driven by the application loop.
pub trait Window {
    /// Creates the OS window and everything rendering needs.
    fn create(&mut self, target: &EventLoopWindowTarget<()>) -> Result<()>;
    /// Called for every event addressed to this window.
    fn handle_event(&mut self, event: &WindowEvent<'_>) -> Result<()>;
    /// Called once per loop iteration, after all pending events.
    fn paint(&mut self) -> Result<()>;
    /// Releases everything created by [`Window::create`]. Must cope with a
    /// partially created window.
    fn destroy(&mut self);
    /// Id of the OS window, once created.
    fn window_id(&self) -> Option<WindowId>;
    /// The window wants the application loop to stop.
    fn is_done(&self) -> bool;
}

/// Averages frame rate over one second windows.
#[derive(Debug, Default, Clone, Copy)]
struct FpsCounter {
    frames: u32,
    since: f64,
    fps: f64,
}

impl FpsCounter {
    /// Counts a frame at `now` seconds. Returns the new average when a second
    /// has passed since the last one.
    fn tick(&mut self, now: f64) -> Option<f64> {
        self.frames += 1;
        let span = now - self.since;
        if span < 1.0 {
            return None;
        }
        self.fps = f64::from(self.frames) / span;
        self.frames = 0;
        self.since = now;
        Some(self.fps)
    }
}

/// Title showing the average frame rate.
pub fn fps_title(title: &str, fps: f64) -> String {
    format!("{title} - {fps:.1} FPS")
}

/// OS window, settings, timers and the done flag.
#[derive(Debug)]
pub struct WindowBase {
    window: Option<OsWindow>,
    settings: WindowSettings,
    done: bool,
    fullscreen: bool,
    delta_timer: Timer,
    elapsed_timer: Timer,
    delta_time: f64,
    fps: FpsCounter,
}

impl WindowBase {
    /// Window state for `settings`. The OS window is created later.
    pub fn new(settings: WindowSettings) -> Self {
        WindowBase {
            window: None,
            settings,
            done: false,
            fullscreen: false,
            delta_timer: Timer::new(),
            elapsed_timer: Timer::new(),
            delta_time: 0.0,
            fps: FpsCounter::default(),
        }
    }

    /// Opens a resizable window with the title and size from the settings.
    pub fn create_window(&mut self, target: &EventLoopWindowTarget<()>) -> Result<&OsWindow> {
        let window = WindowBuilder::new()
            .with_title(&self.settings.title)
            .with_inner_size(PhysicalSize::new(self.settings.width, self.settings.height))
            .with_resizable(true)
            .build(target)?;
        log::debug!(
            "Created window \"{}\" ({}x{})",
            self.settings.title,
            self.settings.width,
            self.settings.height
        );

        self.delta_timer.restart();
        self.elapsed_timer.restart();
        self.fps = FpsCounter::default();
        Ok(self.window.insert(window))
    }

    /// The OS window, once created.
    #[inline]
    pub fn window(&self) -> Option<&OsWindow> {
        self.window.as_ref()
    }

    /// The OS window, or an error if it was not created yet.
    pub fn os_window(&self) -> Result<&OsWindow> {
        self.window
            .as_ref()
            .ok_or_else(|| Error::runtime("Window has not been created"))
    }

    /// Id of the OS window, once created.
    #[inline]
    pub fn window_id(&self) -> Option<WindowId> {
        self.window.as_ref().map(OsWindow::id)
    }

    /// Inner size of the window in pixels, or the configured size before the
    /// window exists.
    pub fn window_size(&self) -> PhysicalSize<u32> {
        match &self.window {
            Some(window) => window.inner_size(),
            None => PhysicalSize::new(self.settings.width, self.settings.height),
        }
    }

    /// Refreshes the delta time. See [`delta_time`](Self::delta_time).
    pub fn update_delta_time(&mut self) -> f64 {
        self.delta_time = if self.delta_timer.elapsed() >= MIN_DELTA_TIME {
            self.delta_timer.restart()
        } else {
            0.0
        };
        self.delta_time
    }

    /// Seconds since the previous frame, or 0 when less than
    /// [`MIN_DELTA_TIME`] passed.
    #[inline]
    pub fn delta_time(&self) -> f64 {
        self.delta_time
    }

    /// Seconds since the window was created.
    #[inline]
    pub fn elapsed_time(&self) -> f64 {
        self.elapsed_timer.elapsed()
    }

    /// Counts a presented frame and refreshes the title once per second when
    /// the frame rate is shown.
    pub fn update_fps(&mut self) {
        let Some(fps) = self.fps.tick(self.elapsed_timer.elapsed()) else {
            return;
        };
        if let (true, Some(window)) = (self.settings.show_fps, &self.window) {
            window.set_title(&fps_title(&self.settings.title, fps));
        }
    }

    /// Average frames per second over the last full second.
    #[inline]
    pub fn fps(&self) -> f64 {
        self.fps.fps
    }

    /// Current window settings.
    #[inline]
    pub fn window_settings(&self) -> &WindowSettings {
        &self.settings
    }

    /// Replaces the settings, applying title and size changes to an open
    /// window.
    pub fn set_window_settings(&mut self, settings: WindowSettings) {
        if let Some(window) = &self.window {
            if settings.title != self.settings.title {
                window.set_title(&settings.title);
            }
            let size_changed =
                settings.width != self.settings.width || settings.height != self.settings.height;
            if size_changed && !self.fullscreen {
                window.set_inner_size(PhysicalSize::new(settings.width, settings.height));
            }
        }
        self.settings = settings;
    }

    /// The window covers the whole monitor.
    #[inline]
    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    /// Switches between borderless fullscreen and windowed mode. The cursor is
    /// hidden in fullscreen.
    pub fn toggle_fullscreen(&mut self) {
        let Some(window) = &self.window else {
            return;
        };
        if self.fullscreen {
            window.set_fullscreen(None);
            window.set_inner_size(PhysicalSize::new(self.settings.width, self.settings.height));
            window.set_cursor_visible(true);
        } else {
            window.set_fullscreen(Some(Fullscreen::Borderless(None)));
            window.set_cursor_visible(false);
        }
        self.fullscreen = !self.fullscreen;
    }

    /// Handles closing, resizing and the F11 fullscreen toggle.
    pub fn handle_base_event(&mut self, event: &WindowEvent<'_>) {
        match event {
            WindowEvent::CloseRequested => self.done = true,
            WindowEvent::Resized(size) => {
                if !self.fullscreen && size.width > 0 && size.height > 0 {
                    self.settings.width = size.width;
                    self.settings.height = size.height;
                }
            }
            WindowEvent::KeyboardInput {
                input:
                    KeyboardInput {
                        state: ElementState::Released,
                        virtual_keycode: Some(VirtualKeyCode::F11),
                        ..
                    },
                ..
            } => self.toggle_fullscreen(),
            _ => {}
        }
    }

    /// The window was asked to close.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Asks the application loop to stop.
    #[inline]
    pub fn close(&mut self) {
        self.done = true;
    }

    /// Closes the OS window.
    pub fn destroy(&mut self) {
        self.window = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_averages_over_a_second() {
        let mut counter = FpsCounter::default();
        for i in 1..60 {
            assert_eq!(counter.tick(f64::from(i) / 60.0), None);
        }
        let fps = counter.tick(1.0).unwrap();
        assert!((fps - 60.0).abs() < 1e-9);
        assert_eq!(counter.frames, 0);
        assert_eq!(counter.tick(1.5), None);
    }

    #[test]
    fn title_with_fps() {
        assert_eq!(fps_title("ABCg Window", 59.94), "ABCg Window - 59.9 FPS");
    }

    #[test]
    fn close_and_resize_events() {
        let mut base = WindowBase::new(WindowSettings::default());
        assert!(!base.is_done());

        base.handle_base_event(&WindowEvent::Resized(PhysicalSize::new(1024, 768)));
        assert_eq!(base.window_settings().width, 1024);
        assert_eq!(base.window_settings().height, 768);
        assert_eq!(base.window_size(), PhysicalSize::new(1024, 768));

        base.handle_base_event(&WindowEvent::Resized(PhysicalSize::new(0, 0)));
        assert_eq!(base.window_settings().width, 1024);

        base.handle_base_event(&WindowEvent::CloseRequested);
        assert!(base.is_done());
    }

    #[test]
    fn delta_time_is_capped() {
        let mut base = WindowBase::new(WindowSettings::default());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(base.update_delta_time() >= MIN_DELTA_TIME);
        // Immediately after a refresh less than 1/480 s has passed.
        assert_eq!(base.update_delta_time(), 0.0);
        assert_eq!(base.delta_time(), 0.0);
    }

    #[test]
    fn settings_without_window() {
        let mut base = WindowBase::new(WindowSettings::default());
        base.toggle_fullscreen();
        assert!(!base.is_fullscreen());

        let settings = WindowSettings {
            title: "Renamed".into(),
            ..Default::default()
        };
        base.set_window_settings(settings.clone());
        assert_eq!(base.window_settings().title, "Renamed");
        assert!(base.os_window().is_err());
    }
}
