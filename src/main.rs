use std::f32::consts::PI;
use std::time::Instant;

use log::info;
use scene_bvh::scene::{
    Material, MemoryLoader, MeshData, MeshInstance, Scene, SceneError, SceneOptions,
};
use scene_bvh::{Mat4, Vector3, Vector4};

/// A UV sphere as a triangle soup.
fn sphere(radius: f32, rings: usize, segments: usize) -> MeshData {
    let vertex = |ring: usize, segment: usize| {
        let theta = ring as f32 / rings as f32 * PI;
        let phi = segment as f32 / segments as f32 * 2.0 * PI;
        let normal = Vector3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
        let u = segment as f32 / segments as f32;
        let v = ring as f32 / rings as f32;
        (
            Vector4::new(normal.x * radius, normal.y * radius, normal.z * radius, u),
            Vector4::new(normal.x, normal.y, normal.z, v),
        )
    };

    let mut data = MeshData::default();
    for ring in 0..rings {
        for segment in 0..segments {
            let quad = [
                vertex(ring, segment),
                vertex(ring + 1, segment),
                vertex(ring + 1, segment + 1),
                vertex(ring, segment + 1),
            ];
            for index in [0, 1, 2, 0, 2, 3] {
                data.vertices_uvx.push(quad[index].0);
                data.normals_uvy.push(quad[index].1);
            }
        }
    }
    data
}

/// A wavy height field in the XZ plane.
fn terrain(size: usize) -> MeshData {
    let vertex = |x: usize, z: usize| {
        let (fx, fz) = (x as f32, z as f32);
        let height = (fx * 0.3).sin() * (fz * 0.2).cos() * 2.0;
        (
            Vector4::new(fx, height, fz, fx / size as f32),
            Vector4::new(0.0, 1.0, 0.0, fz / size as f32),
        )
    };

    let mut data = MeshData::default();
    for z in 0..size {
        for x in 0..size {
            let quad = [vertex(x, z), vertex(x + 1, z), vertex(x + 1, z + 1), vertex(x, z + 1)];
            for index in [0, 2, 1, 0, 3, 2] {
                data.vertices_uvx.push(quad[index].0);
                data.normals_uvy.push(quad[index].1);
            }
        }
    }
    data
}

pub fn main() -> Result<(), SceneError> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let loader = MemoryLoader::new()
        .with_mesh("sphere", sphere(1.0, 32, 64))
        .with_mesh("terrain", terrain(128));
    let mut scene = Scene::new(SceneOptions::default(), loader)?;

    let sphere = scene.add_mesh("sphere");
    let terrain = scene.add_mesh("terrain");
    let ground = scene.add_material(Material::default());
    let shiny = scene.add_material(Material {
        metallic: 1.0,
        roughness: 0.1,
        ..Material::default()
    });

    scene.add_mesh_instance(MeshInstance::new("ground", terrain, Mat4::identity(), ground))?;
    for i in 0..64 {
        let position = Vector3::new((i % 8) as f32 * 16.0 + 4.0, 4.0, (i / 8) as f32 * 16.0 + 4.0);
        let transform = Mat4::new_translation(&position) * Mat4::new_scaling(1.0 + (i % 3) as f32);
        let name = format!("sphere {}", i);
        scene.add_mesh_instance(MeshInstance::new(name, sphere, transform, shiny))?;
    }

    let start = Instant::now();
    scene.create_acceleration_structures()?;
    let translator = scene.bvh_translator();
    info!(
        "full build took {:?}: {} nodes in a {}x{} texture, top level at {}",
        start.elapsed(),
        translator.nodes().len(),
        translator.node_tex_width(),
        translator.node_tex_width(),
        translator.top_level_index()
    );
    for mesh in scene.meshes() {
        if let Some(bvh) = &mesh.bvh {
            info!(
                "{}: {} triangles, {} references, height {}",
                mesh.name,
                mesh.num_triangles(),
                bvh.num_indices(),
                bvh.height()
            );
        }
    }
    info!("scene bounds: {}", scene.scene_bounds());

    let start = Instant::now();
    for frame in 0..10 {
        for instance in 1..scene.mesh_instances().len() {
            let offset = Vector3::new(0.0, (frame as f32 * 0.5 + instance as f32).sin(), 0.0);
            let transform = scene.mesh_instances()[instance].transform;
            scene.set_instance_transform(instance, Mat4::new_translation(&offset) * transform)?;
        }
        scene.rebuild_instances_data()?;
        scene.clear_instances_modified();
    }
    let translator = scene.bvh_translator();
    info!(
        "10 instance updates took {:?}, re-uploading {} of {} nodes from row {}",
        start.elapsed(),
        translator.dirty_range().len(),
        translator.nodes().len(),
        translator.dirty_row()
    );
    Ok(())
}
