//! Origin axes drawn with gizmos.

use bevy::color::palettes::css::{BLUE, RED, YELLOW};
use bevy::prelude::*;

use crate::launch_params::LaunchParams;

/// Length of each axis arrow in world units.
pub const AXIS_LENGTH: f32 = 1.0;

pub struct AxesPlugin;

impl Plugin for AxesPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, draw_axes.run_if(axes_enabled));
    }
}

/// Axis directions and their colors: X red, Y blue, Z yellow.
#[must_use]
pub fn axis_arrows() -> [(Vec3, Color); 3] {
    [
        (Vec3::X * AXIS_LENGTH, RED.into()),
        (Vec3::Y * AXIS_LENGTH, BLUE.into()),
        (Vec3::Z * AXIS_LENGTH, YELLOW.into()),
    ]
}

fn axes_enabled(params: Option<Res<LaunchParams>>) -> bool {
    params.is_some_and(|p| p.show_axes)
}

fn draw_axes(mut gizmos: Gizmos) {
    for (tip, color) in axis_arrows() {
        gizmos.arrow(Vec3::ZERO, tip, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axes_are_unit_and_orthogonal() {
        let arrows = axis_arrows();
        for (tip, _) in arrows {
            assert!((tip.length() - AXIS_LENGTH).abs() < f32::EPSILON);
        }
        assert_eq!(arrows[0].0.dot(arrows[1].0), 0.0);
        assert_eq!(arrows[1].0.dot(arrows[2].0), 0.0);
        assert_eq!(arrows[0].1, Color::from(RED));
    }
}
