// SPDX-License-Identifier: CEPL-1.0
use fplus_math::{Mat4, Vec3};

/// Circles the scene centre at a fixed height, looking at the centre.
#[derive(Clone, Copy, Debug)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub radius: f32,
    pub height: f32,
    /// Radians per second.
    pub speed: f32,
    angle: f32,
    paused: bool,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            target: Vec3::new(0.0, 2.0, 0.0),
            radius: 18.0,
            height: 9.0,
            speed: 0.25,
            angle: 0.0,
            paused: false,
        }
    }
}

impl OrbitCamera {
    pub fn update(&mut self, dt: f32) {
        if self.paused {
            return;
        }
        self.angle = (self.angle + self.speed * dt).rem_euclid(std::f32::consts::TAU);
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(
            self.target.x + self.radius * self.angle.cos(),
            self.height,
            self.target.z + self.radius * self.angle.sin(),
        )
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orbit_keeps_its_radius_and_height() {
        let mut cam = OrbitCamera::default();
        for _ in 0..100 {
            cam.update(0.37);
            let p = cam.position();
            let flat = Vec3::new(p.x - cam.target.x, 0.0, p.z - cam.target.z);
            assert!((flat.length() - cam.radius).abs() < 1e-3);
            assert_eq!(p.y, cam.height);
        }
    }

    #[test]
    fn paused_orbit_holds_still() {
        let mut cam = OrbitCamera::default();
        cam.update(1.0);
        let before = cam.angle();
        assert!(cam.toggle_pause());
        cam.update(5.0);
        assert_eq!(cam.angle(), before);
        assert!(!cam.toggle_pause());
        cam.update(1.0);
        assert!(cam.angle() > before);
    }

    #[test]
    fn view_maps_target_onto_the_forward_axis() {
        let cam = OrbitCamera::default();
        let t = cam.view().transform_point3(cam.target);
        assert!(t.x.abs() < 1e-4 && t.y.abs() < 1e-4);
        assert!(t.z < 0.0);
    }
}
