//! Program paths and the event loop.
use env_logger::Env;
use winit::{
    event::Event,
    event_loop::{ControlFlow, EventLoop},
    platform::run_return::EventLoopExtRunReturn,
};

use crate::{Result, Window};

/// Directory part of `program_path`, or `.` when it has none.
pub fn base_path_of(program_path: &str) -> &str {
    let separator = if cfg!(windows) {
        program_path.rfind(|c| c == '/' || c == '\\')
    } else {
        program_path.rfind('/')
    };
    match separator {
        Some(index) => &program_path[..index],
        None => ".",
    }
}

/// Entry point of an abcg program: knows where its assets are and runs the
/// window's event loop.
#[derive(Debug, Clone)]
pub struct Application {
    base_path: String,
    assets_path: String,
}

impl Application {
    /// Installs the logger and derives the paths from the program name in
    /// the command line.
    pub fn new() -> Self {
        let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();
        let program_path = std::env::args().next().unwrap_or_default();
        Self::from_program_path(&program_path)
    }

    /// Application whose base path is the directory of `program_path`.
    pub fn from_program_path(program_path: &str) -> Self {
        let base_path = base_path_of(program_path).to_owned();
        let assets_path = format!("{base_path}/assets/");
        Application {
            base_path,
            assets_path,
        }
    }

    /// Directory holding the executable.
    #[inline]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// `assets/` under [`base_path`](Self::base_path), with a trailing slash.
    #[inline]
    pub fn assets_path(&self) -> &str {
        &self.assets_path
    }

    /// Creates `window`, then dispatches events and paints until the window is
    /// done or a hook fails. The window is destroyed before returning.
    pub fn run(&self, window: &mut impl Window) -> Result<()> {
        let mut event_loop = EventLoop::new();
        if let Err(err) = window.create(&event_loop) {
            window.destroy();
            return Err(err);
        }

        let mut failure = None;
        event_loop.run_return(|event, _, control_flow| {
            if let ControlFlow::ExitWithCode(_) = *control_flow {
                return;
            }
            *control_flow = ControlFlow::Poll;

            let result = match event {
                Event::WindowEvent { window_id, event }
                    if Some(window_id) == window.window_id() =>
                {
                    window.handle_event(&event)
                }
                Event::MainEventsCleared => window.paint(),
                _ => Ok(()),
            };
            if let Err(err) = result {
                log::error!("{err}");
                failure = Some(err);
            }
            if failure.is_some() || window.is_done() {
                *control_flow = ControlFlow::Exit;
            }
        });

        window.destroy();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_from_program() {
        let app = Application::from_program_path("/opt/demo/bin/triangle");
        assert_eq!(app.base_path(), "/opt/demo/bin");
        assert_eq!(app.assets_path(), "/opt/demo/bin/assets/");

        let app = Application::from_program_path("./triangle");
        assert_eq!(app.base_path(), ".");
        assert_eq!(app.assets_path(), "./assets/");
    }

    #[test]
    fn bare_program_name() {
        assert_eq!(base_path_of("triangle"), ".");
        assert_eq!(base_path_of(""), ".");
        assert_eq!(
            Application::from_program_path("triangle").assets_path(),
            "./assets/"
        );
    }

    #[cfg(windows)]
    #[test]
    fn windows_separator() {
        assert_eq!(base_path_of(r"C:\demo\triangle.exe"), r"C:\demo");
    }
}
