// SPDX-License-Identifier: CEPL-1.0
pub use glam;
pub use glam::{Mat4, Vec2, Vec3, Vec4};

/// Right-handed perspective with 0..1 depth and Y flipped, since Vulkan's
/// NDC Y axis points down.
pub fn vulkan_perspective(fovy_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let mut proj = Mat4::perspective_rh(fovy_radians, aspect, near, far);
    proj.y_axis.y *= -1.0;
    proj
}

/// Axis-aligned box the animated point lights live in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightVolume {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for LightVolume {
    fn default() -> Self {
        Self {
            min: Vec3::new(-15.0, -5.0, -5.0),
            max: Vec3::new(15.0, 20.0, 5.0),
        }
    }
}

impl LightVolume {
    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    /// Moves `pos` up by `speed * dt`; once it passes the top it drops by
    /// one full volume height.
    pub fn rise(&self, pos: Vec3, speed: f32, dt: f32) -> Vec3 {
        let mut next = pos + Vec3::Y * (speed * dt);
        if next.y > self.max.y {
            next.y -= self.height();
        }
        next
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_flips_y_only() {
        let gl = Mat4::perspective_rh(45f32.to_radians(), 4.0 / 3.0, 0.5, 100.0);
        let vk = vulkan_perspective(45f32.to_radians(), 4.0 / 3.0, 0.5, 100.0);
        assert_eq!(vk.y_axis.y, -gl.y_axis.y);
        assert_eq!(vk.x_axis, gl.x_axis);
        assert_eq!(vk.z_axis, gl.z_axis);
        assert_eq!(vk.w_axis, gl.w_axis);
    }

    #[test]
    fn rise_wraps_past_the_top() {
        let vol = LightVolume::default();
        let p = vol.rise(Vec3::new(0.0, 19.5, 0.0), 3.0, 0.5);
        assert!((p.y - (21.0 - 25.0)).abs() < 1e-5);
        assert!(vol.contains(p));
    }

    #[test]
    fn rise_below_top_is_linear() {
        let vol = LightVolume::default();
        let p = vol.rise(Vec3::new(1.0, 0.0, 2.0), 3.0, 1.0);
        assert_eq!(p, Vec3::new(1.0, 3.0, 2.0));
    }
}
