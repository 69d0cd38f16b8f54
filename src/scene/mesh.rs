use crate::aabb::Aabb;
use crate::bvh::{Bvh, SplitBvhBuilder};
use crate::scene::MeshData;
use crate::{Mat4, Point3, Vector4};

/// A triangle mesh and its bottom level hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub name: String,
    pub vertices_uvx: Vec<Vector4>,
    pub normals_uvy: Vec<Vector4>,
    pub bvh: Option<Bvh>,
    pub loaded: bool,
}

impl Mesh {
    /// A mesh which still has to be loaded.
    pub fn new(name: impl Into<String>) -> Mesh {
        Mesh {
            name: name.into(),
            vertices_uvx: Vec::new(),
            normals_uvy: Vec::new(),
            bvh: None,
            loaded: false,
        }
    }

    pub fn from_data(name: impl Into<String>, data: MeshData) -> Mesh {
        let mut mesh = Mesh::new(name);
        mesh.set_data(data);
        mesh
    }

    pub fn set_data(&mut self, data: MeshData) {
        self.vertices_uvx = data.vertices_uvx;
        self.normals_uvy = data.normals_uvy;
        self.bvh = None;
        self.loaded = true;
    }

    pub fn num_triangles(&self) -> usize {
        self.vertices_uvx.len() / 3
    }

    /// Bounds of every triangle, in vertex order.
    pub fn triangle_bounds(&self) -> Vec<Aabb> {
        triangle_bounds(&self.vertices_uvx)
    }

    pub fn build_bvh(&mut self, builder: &SplitBvhBuilder) {
        self.bvh = Some(builder.build(&self.triangle_bounds()));
    }
}

pub(crate) fn triangle_bounds(vertices_uvx: &[Vector4]) -> Vec<Aabb> {
    vertices_uvx
        .chunks_exact(3)
        .map(|triangle| {
            triangle.iter().fold(Aabb::empty(), |aabb, vertex| {
                aabb.grow(&Point3::from(vertex.xyz()))
            })
        })
        .collect()
}

/// A placement of a [`Mesh`] in the scene.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshInstance {
    pub name: String,
    pub mesh_id: usize,
    /// Object to world transform, applied to column vectors.
    pub transform: Mat4,
    pub material_id: usize,
}

impl MeshInstance {
    pub fn new(
        name: impl Into<String>,
        mesh_id: usize,
        transform: Mat4,
        material_id: usize,
    ) -> MeshInstance {
        MeshInstance {
            name: name.into(),
            mesh_id,
            transform,
            material_id,
        }
    }

    /// World space position of the object origin.
    pub fn translation(&self) -> Point3 {
        Point3::new(
            self.transform[(0, 3)],
            self.transform[(1, 3)],
            self.transform[(2, 3)],
        )
    }
}
