use bytemuck::{Pod, Zeroable};

use crate::Vector3;

/// Surface description in the renderer's layout. Texture ids are `-1.0` when unused.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Material {
    pub albedo: Vector3,
    pub material_type: f32,
    pub emission: Vector3,
    pub unused: f32,
    pub metallic: f32,
    pub roughness: f32,
    pub ior: f32,
    pub transmittance: f32,
    pub albedo_tex_id: f32,
    pub metallic_roughness_tex_id: f32,
    pub normalmap_tex_id: f32,
    pub heightmap_tex_id: f32,
}

impl Default for Material {
    fn default() -> Material {
        Material {
            albedo: Vector3::new(1.0, 1.0, 1.0),
            material_type: 0.0,
            emission: Vector3::zeros(),
            unused: 0.0,
            metallic: 0.0,
            roughness: 0.5,
            ior: 1.45,
            transmittance: 0.0,
            albedo_tex_id: -1.0,
            metallic_roughness_tex_id: -1.0,
            normalmap_tex_id: -1.0,
            heightmap_tex_id: -1.0,
        }
    }
}

impl Material {
    pub fn with_albedo_texture(mut self, texture_id: usize) -> Material {
        self.albedo_tex_id = texture_id as f32;
        self
    }
}
