//! Common utilities shared by unit tests.
#![cfg(test)]

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::aabb::Aabb;
use crate::bvh::Bvh;
use crate::scene::{MeshData, TextureData};
use crate::{Point3, Vector3, Vector4};

/// A vector represented as a tuple
pub type TupleVec = (f32, f32, f32);

/// Generate a `TupleVec` for [`proptest::strategy::Strategy`] from -10e10 to 10e10
/// A small enough range to prevent most fp32 errors from breaking certain tests
pub fn tuplevec_small_strategy() -> impl Strategy<Value = TupleVec> {
    (
        -10e10_f32..10e10_f32,
        -10e10_f32..10e10_f32,
        -10e10_f32..10e10_f32,
    )
}

/// Convert a `TupleVec` to a [`Point3`].
pub fn tuple_to_point(tpl: &TupleVec) -> Point3 {
    Point3::new(tpl.0, tpl.1, tpl.2)
}

/// Generate a list of 1 to 64 boxes, each spanned by two `TupleVec` corners.
pub fn aabbs_small_strategy() -> impl Strategy<Value = Vec<Aabb>> {
    prop::collection::vec(
        (tuplevec_small_strategy(), tuplevec_small_strategy()),
        1..64,
    )
    .prop_map(|corners| {
        corners
            .iter()
            .map(|(a, b)| Aabb::empty().grow(&tuple_to_point(a)).grow(&tuple_to_point(b)))
            .collect()
    })
}

/// Union of all `bounds`.
pub fn union_of(bounds: &[Aabb]) -> Aabb {
    bounds.iter().fold(Aabb::empty(), |acc, aabb| acc.join(aabb))
}

/// Unit size box centered at `pos`.
pub fn unit_box_at(pos: Point3) -> Aabb {
    let half = Vector3::new(0.5, 0.5, 0.5);
    Aabb::with_bounds(pos - half, pos + half)
}

/// Generates 21 unit boxes along the X axis centered on whole numbers (-10,...,10).
pub fn generate_aligned_boxes() -> Vec<Aabb> {
    (-10..11)
        .map(|x| unit_box_at(Point3::new(x as f32, 0.0, 0.0)))
        .collect()
}

/// `n` unit cubes with deterministic random centers inside a 1000 unit wide cube.
pub fn random_unit_cubes(n: usize, seed: u64) -> Vec<Aabb> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            unit_box_at(Point3::new(
                rng.random_range(-500.0..500.0),
                rng.random_range(-500.0..500.0),
                rng.random_range(-500.0..500.0),
            ))
        })
        .collect()
}

fn triangle_bounds(a: Point3, b: Point3, c: Point3) -> Aabb {
    Aabb::empty().grow(&a).grow(&b).grow(&c)
}

/// Bounds of a 30x20 height field of quads, two triangles each.
pub fn build_1200_triangles_bounds() -> Vec<Aabb> {
    let height = |x: usize, y: usize| {
        Point3::new(
            x as f32,
            y as f32,
            (x as f32 * 0.4).sin() * (y as f32 * 0.3).cos() * 3.0,
        )
    };
    let mut bounds = Vec::with_capacity(1200);
    for y in 0..20 {
        for x in 0..30 {
            let a = height(x, y);
            let b = height(x + 1, y);
            let c = height(x + 1, y + 1);
            let d = height(x, y + 1);
            bounds.push(triangle_bounds(a, b, c));
            bounds.push(triangle_bounds(a, c, d));
        }
    }
    bounds
}

/// A 2x1 quad in the XY plane made of two triangles.
pub fn quad_triangle_bounds() -> Vec<Aabb> {
    let a = Point3::new(0.0, 0.0, 0.0);
    let b = Point3::new(2.0, 0.0, 0.0);
    let c = Point3::new(2.0, 1.0, 0.0);
    let d = Point3::new(0.0, 1.0, 0.0);
    vec![triangle_bounds(a, b, c), triangle_bounds(a, c, d)]
}

/// `n` unit boxes in a row along X, overlapped by `n / 8` boxes spanning the whole row.
/// Object splits can't separate the long boxes, spatial splits can.
pub fn long_and_short_bounds(n: usize) -> Vec<Aabb> {
    let mut bounds: Vec<Aabb> = (0..n)
        .map(|i| {
            let min = Point3::new(i as f32, 0.0, 0.0);
            Aabb::with_bounds(min, min + Vector3::new(1.0, 1.0, 1.0))
        })
        .collect();
    let long = Aabb::with_bounds(Point3::new(0.0, 0.0, 0.0), Point3::new(n as f32, 1.0, 1.0));
    bounds.extend(std::iter::repeat(long).take(n / 8));
    bounds
}

/// Primitive indices of every leaf in arena order, sorted within a leaf.
pub fn leaf_partition(bvh: &Bvh) -> Vec<Vec<usize>> {
    bvh.leaves()
        .filter_map(|leaf| leaf.leaf_range())
        .map(|(start, count)| {
            let mut prims = bvh.indices()[start..start + count].to_vec();
            prims.sort_unstable();
            prims
        })
        .collect()
}

/// Triangle soup of an axis aligned cube with the given center and half size.
/// Each vertex carries its UV in the `w` components.
pub fn cube_mesh_data(center: Point3, half: f32) -> MeshData {
    let corner = |x: f32, y: f32, z: f32| center + Vector3::new(x, y, z) * half;
    let tfr = corner(1.0, 1.0, -1.0);
    let tbr = corner(1.0, 1.0, 1.0);
    let tbl = corner(-1.0, 1.0, 1.0);
    let tfl = corner(-1.0, 1.0, -1.0);
    let bfr = corner(1.0, -1.0, -1.0);
    let bbr = corner(1.0, -1.0, 1.0);
    let bbl = corner(-1.0, -1.0, 1.0);
    let bfl = corner(-1.0, -1.0, -1.0);

    let faces = [
        ([tbr, tfr, tfl], Vector3::y()),
        ([tfl, tbl, tbr], Vector3::y()),
        ([bfl, bfr, bbr], -Vector3::y()),
        ([bbr, bbl, bfl], -Vector3::y()),
        ([tbl, tfl, bfl], -Vector3::x()),
        ([bfl, bbl, tbl], -Vector3::x()),
        ([bfr, tfr, tbr], Vector3::x()),
        ([tbr, bbr, bfr], Vector3::x()),
        ([tfl, tfr, bfr], -Vector3::z()),
        ([bfr, bfl, tfl], -Vector3::z()),
        ([bbr, tbr, tbl], Vector3::z()),
        ([tbl, bbl, bbr], Vector3::z()),
    ];

    let uvs = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)];
    let mut data = MeshData::default();
    for (points, normal) in faces {
        for (p, (u, v)) in points.iter().zip(uvs) {
            data.vertices_uvx.push(Vector4::new(p.x, p.y, p.z, u));
            data.normals_uvy
                .push(Vector4::new(normal.x, normal.y, normal.z, v));
        }
    }
    data
}

/// A `width` x `height` checkerboard with `components` channels per pixel.
pub fn checker_texture_data(width: u32, height: u32, components: u32) -> TextureData {
    let mut data = Vec::with_capacity((width * height * components) as usize);
    for y in 0..height {
        for x in 0..width {
            let value = if (x + y) % 2 == 0 { 0 } else { 200 };
            data.extend(std::iter::repeat(value).take(components as usize));
        }
    }
    TextureData {
        width,
        height,
        components,
        data,
    }
}
