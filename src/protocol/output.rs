//! wl_output event encoding
//!
//! An [`Output`] is described to clients as geometry, mode, scale, name and
//! description followed by `done`.

use wayland_server::protocol::wl_output::{self, WlOutput};
use wayland_server::Resource;

use crate::compositor::Output;

/// Output geometry event data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputGeometryEvent {
    pub x: i32,
    pub y: i32,
    pub physical_width: i32,
    pub physical_height: i32,
    pub make: String,
    pub model: String,
    pub transform: u32,
}

impl From<&Output> for OutputGeometryEvent {
    fn from(output: &Output) -> Self {
        Self {
            x: output.position.0,
            y: output.position.1,
            physical_width: output.physical_size.0,
            physical_height: output.physical_size.1,
            make: output.make.clone(),
            model: output.model.clone(),
            transform: output.transform.to_wayland(),
        }
    }
}

/// Output mode event data; winland exposes exactly one mode per output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputModeEvent {
    pub width: i32,
    pub height: i32,
    pub refresh: i32,
}

impl From<&Output> for OutputModeEvent {
    fn from(output: &Output) -> Self {
        Self {
            width: output.mode.width,
            height: output.mode.height,
            refresh: output.mode.refresh,
        }
    }
}

/// Human-readable description sent with wl_output version 4
pub fn description(output: &Output) -> String {
    format!("{} {}", output.make, output.model)
}

/// Send the full description of `output`, ending with `done`
pub fn send_output(resource: &WlOutput, output: &Output) {
    let geometry = OutputGeometryEvent::from(output);
    let transform = wl_output::Transform::try_from(geometry.transform).unwrap_or(wl_output::Transform::Normal);
    resource.geometry(
        geometry.x,
        geometry.y,
        geometry.physical_width,
        geometry.physical_height,
        wl_output::Subpixel::Unknown,
        geometry.make,
        geometry.model,
        transform,
    );

    let mode = OutputModeEvent::from(output);
    resource.mode(
        wl_output::Mode::Current | wl_output::Mode::Preferred,
        mode.width,
        mode.height,
        mode.refresh,
    );

    if resource.version() >= 2 {
        resource.scale(output.scale);
    }
    if resource.version() >= 4 {
        resource.name(output.name.clone());
        resource.description(description(output));
    }
    if resource.version() >= 2 {
        resource.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::compositor::OutputMode;

    fn output() -> Output {
        let mut output = Output::new(
            "HEADLESS-1",
            OutputMode {
                width: 1920,
                height: 1080,
                refresh: 60_000,
            },
        );
        output.make = "winland".to_string();
        output.model = "headless".to_string();
        output.position = (1920, 0);
        output.physical_size = (527, 296);
        output
    }

    #[test]
    fn test_geometry_event() {
        let geometry = OutputGeometryEvent::from(&output());
        assert_eq!((geometry.x, geometry.y), (1920, 0));
        assert_eq!(geometry.physical_width, 527);
        assert_eq!(geometry.make, "winland");
        assert_eq!(geometry.transform, 0);
    }

    #[test]
    fn test_mode_event() {
        let mode = OutputModeEvent::from(&output());
        assert_eq!((mode.width, mode.height, mode.refresh), (1920, 1080, 60_000));
    }

    #[test]
    fn test_description() {
        assert_eq!(description(&output()), "winland headless");
    }
}
