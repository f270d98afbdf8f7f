// Scene contents and their uniform blocks
//
// Binding 0 holds per-frame scene data, binding 1 one slice per object at a
// dynamic offset. Both layouts must match the blocks in shaders/scene.vert.

use crate::backend::uniform::{Std140Layout, Std140Writer, UniformType};
use crate::camera::Camera;
use anyhow::Result;
use glam::{Mat4, Quat, Vec3, Vec4};

/// Upper bound on objects per frame; sizes the dynamic uniform buffer.
pub const MAX_OBJECTS: usize = 64;

/// Must match MAX_POINT_LIGHTS in the shaders
pub const MAX_POINT_LIGHTS: usize = 4;

pub fn scene_layout() -> Result<Std140Layout> {
    Std140Layout::builder()
        .field("view", UniformType::Mat4)
        .field("projection", UniformType::Mat4)
        .field("light_direction", UniformType::Vec4)
        .field("light_color", UniformType::Vec4)
        .field("camera_position", UniformType::Vec3)
        .field("time", UniformType::Float)
        .array("point_light_positions", UniformType::Vec4, MAX_POINT_LIGHTS)
        .array("point_light_colors", UniformType::Vec4, MAX_POINT_LIGHTS)
        .build()
}

pub fn object_layout() -> Result<Std140Layout> {
    Std140Layout::builder()
        .field("model", UniformType::Mat4)
        .field("tint", UniformType::Vec4)
        .build()
}

#[derive(Debug, Clone, Copy)]
pub struct Light {
    /// Direction the light travels, world space
    pub direction: Vec3,
    /// rgb colour, w = ambient strength
    pub color: Vec4,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.4, -1.0, -0.6).normalize(),
            color: Vec4::new(1.0, 0.96, 0.9, 0.15),
        }
    }
}

/// Coloured light with a linear falloff to zero at `radius`
#[derive(Debug, Clone, Copy)]
pub struct PointLight {
    pub position: Vec3,
    pub radius: f32,
    pub color: Vec3,
    pub intensity: f32,
}

pub fn demo_point_lights() -> Vec<PointLight> {
    vec![
        PointLight {
            position: Vec3::new(0.0, 1.5, 2.0),
            radius: 5.0,
            color: Vec3::new(1.0, 0.45, 0.2),
            intensity: 1.5,
        },
        PointLight {
            position: Vec3::new(-2.0, -0.5, -1.5),
            radius: 4.0,
            color: Vec3::new(0.2, 0.5, 1.0),
            intensity: 1.2,
        },
    ]
}

/// A cube spinning around a fixed axis
#[derive(Debug, Clone, Copy)]
pub struct SceneObject {
    pub position: Vec3,
    pub axis: Vec3,
    /// Radians per second
    pub spin_speed: f32,
    pub scale: f32,
    pub tint: Vec4,
}

impl SceneObject {
    pub fn model(&self, time: f32) -> Mat4 {
        let rotation = Quat::from_axis_angle(self.axis.normalize_or_zero(), self.spin_speed * time);
        Mat4::from_scale_rotation_translation(Vec3::splat(self.scale), rotation, self.position)
    }
}

pub fn demo_objects() -> Vec<SceneObject> {
    let mut objects = vec![SceneObject {
        position: Vec3::ZERO,
        axis: Vec3::new(0.3, 1.0, 0.1),
        spin_speed: 0.8,
        scale: 1.0,
        tint: Vec4::ONE,
    }];

    let ring = [
        Vec4::new(1.0, 0.55, 0.5, 1.0),
        Vec4::new(0.55, 1.0, 0.6, 1.0),
        Vec4::new(0.5, 0.65, 1.0, 1.0),
        Vec4::new(1.0, 0.9, 0.5, 1.0),
    ];
    for (i, tint) in ring.into_iter().enumerate() {
        let angle = i as f32 * std::f32::consts::FRAC_PI_2;
        objects.push(SceneObject {
            position: Vec3::new(angle.cos() * 2.5, 0.0, angle.sin() * 2.5),
            axis: Vec3::new(angle.sin(), 1.0, angle.cos()),
            spin_speed: 1.2 + i as f32 * 0.3,
            scale: 0.5,
            tint,
        });
    }

    objects
}

/// Drop objects that do not fit in the per-frame object buffer.
pub fn fit_to_capacity(mut objects: Vec<SceneObject>) -> Vec<SceneObject> {
    if objects.len() > MAX_OBJECTS {
        log::warn!(
            "Scene has {} objects; only the first {} are drawn",
            objects.len(),
            MAX_OBJECTS
        );
        objects.truncate(MAX_OBJECTS);
    }
    objects
}

/// Unused point light slots stay zeroed, which the shader treats as off.
/// More than [`MAX_POINT_LIGHTS`] lights is an error.
pub fn write_scene<'a>(
    layout: &'a Std140Layout,
    camera: &Camera,
    aspect: f32,
    light: &Light,
    point_lights: &[PointLight],
    time: f32,
) -> Result<Std140Writer<'a>> {
    let mut writer = Std140Writer::new(layout);
    writer
        .set("view", camera.view())?
        .set("projection", camera.projection(aspect))?
        .set("light_direction", light.direction.extend(0.0))?
        .set("light_color", light.color)?
        .set("camera_position", camera.position)?
        .set("time", time)?;

    for (index, point) in point_lights.iter().enumerate() {
        writer
            .set_element("point_light_positions", index, point.position.extend(point.radius))?
            .set_element("point_light_colors", index, point.color.extend(point.intensity))?;
    }
    Ok(writer)
}

/// Pack one object block per object, `stride` bytes apart.
pub fn pack_objects(
    layout: &Std140Layout,
    stride: usize,
    objects: &[SceneObject],
    time: f32,
) -> Result<Vec<u8>> {
    let mut bytes = vec![0; stride * objects.len()];
    for (object, slot) in objects.iter().zip(bytes.chunks_mut(stride)) {
        let mut writer = Std140Writer::new(layout);
        writer.set("model", object.model(time))?.set("tint", object.tint)?;
        slot[..layout.size()].copy_from_slice(writer.bytes());
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CameraConfig, ControlsConfig};
    use approx::assert_relative_eq;

    fn read_f32(bytes: &[u8], at: usize) -> f32 {
        f32::from_ne_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    fn offset(layout: &Std140Layout, name: &str) -> Option<usize> {
        layout.field(name).map(|field| field.offset)
    }

    fn camera() -> Camera {
        Camera::new(&CameraConfig::default(), &ControlsConfig::default())
    }

    #[test]
    fn layouts_match_shader_blocks() {
        let scene = scene_layout().unwrap();
        assert_eq!(scene.size(), 304);
        assert_eq!(offset(&scene, "light_direction"), Some(128));
        assert_eq!(offset(&scene, "camera_position"), Some(160));
        assert_eq!(offset(&scene, "time"), Some(172));
        assert_eq!(offset(&scene, "point_light_positions"), Some(176));
        assert_eq!(offset(&scene, "point_light_colors"), Some(240));

        let object = object_layout().unwrap();
        assert_eq!(object.size(), 80);
        assert_eq!(offset(&object, "tint"), Some(64));
    }

    #[test]
    fn objects_land_at_stride_offsets() {
        let layout = object_layout().unwrap();
        let objects = demo_objects();
        let bytes = pack_objects(&layout, 256, &objects, 0.0).unwrap();
        assert_eq!(bytes.len(), 256 * objects.len());

        // Second object: translation in column 3, tint after the matrix
        let base = 256;
        let expected = objects[1].position;
        assert_relative_eq!(read_f32(&bytes, base + 48), expected.x, epsilon = 1e-5);
        assert_relative_eq!(read_f32(&bytes, base + 56), expected.z, epsilon = 1e-5);
        assert_relative_eq!(read_f32(&bytes, base + 64), objects[1].tint.x);
        assert_relative_eq!(read_f32(&bytes, base + 76), 1.0);
    }

    #[test]
    fn model_at_time_zero_is_scale_then_translate() {
        let object = SceneObject {
            position: Vec3::new(1.0, 2.0, 3.0),
            axis: Vec3::Y,
            spin_speed: 5.0,
            scale: 0.5,
            tint: Vec4::ONE,
        };
        let p = object.model(0.0).transform_point3(Vec3::new(2.0, 0.0, 0.0));
        assert!(p.abs_diff_eq(Vec3::new(2.0, 2.0, 3.0), 1e-5));
    }

    #[test]
    fn demo_fits_dynamic_buffer() {
        let demo = demo_objects();
        assert_eq!(fit_to_capacity(demo.clone()).len(), demo.len());
    }

    #[test]
    fn point_lights_fill_array_slots_and_leave_the_rest_off() {
        let layout = scene_layout().unwrap();
        let lights = demo_point_lights();
        assert!(lights.len() < MAX_POINT_LIGHTS);

        let writer = write_scene(&layout, &camera(), 1.5, &Light::default(), &lights, 2.0).unwrap();
        let bytes = writer.bytes();

        // Second light, 16 byte stride; w carries radius / intensity
        assert_relative_eq!(read_f32(bytes, 176 + 16), lights[1].position.x);
        assert_relative_eq!(read_f32(bytes, 176 + 16 + 12), lights[1].radius);
        assert_relative_eq!(read_f32(bytes, 240 + 16 + 12), lights[1].intensity);
        // Unused slot
        assert_eq!(read_f32(bytes, 240 + 16 * 3 + 12), 0.0);
        assert_relative_eq!(read_f32(bytes, 172), 2.0);
    }

    #[test]
    fn too_many_point_lights_is_an_error() {
        let layout = scene_layout().unwrap();
        let lights = vec![demo_point_lights()[0]; MAX_POINT_LIGHTS + 1];
        assert!(write_scene(&layout, &camera(), 1.0, &Light::default(), &lights, 0.0).is_err());
    }

    #[test]
    fn overflowing_scene_is_cut_to_capacity() {
        let objects = vec![demo_objects()[0]; MAX_OBJECTS + 6];
        let kept = fit_to_capacity(objects);
        assert_eq!(kept.len(), MAX_OBJECTS);
    }
}
