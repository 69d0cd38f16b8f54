//! The scene build pipeline: loads assets, builds one bottom level hierarchy per mesh on a
//! [`TaskThreadPool`], builds the top level hierarchy over the mesh instances and packs
//! everything into flat buffers for the renderer.

mod loader;
mod material;
mod mesh;
mod texture;

pub use self::loader::{AssetLoader, LoadError, MemoryLoader, MeshData, TextureData};
pub use self::material::Material;
pub use self::mesh::{Mesh, MeshInstance};
pub use self::texture::Texture;

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;

use crate::aabb::Aabb;
use crate::bvh::{Bvh, BvhBuilder, SplitBvhBuilder};
use crate::flat_bvh::{BvhTranslator, TranslateError, MAX_PACKED_WIDTH};
use crate::job::{PoolError, TaskThreadPool, ThreadTask};
use crate::utils::{pack_texel, square_texture_width};
use crate::{Mat4, Vector4};

/// Channel count every texture is converted to.
pub const TEXTURE_CHANNELS: u32 = 3;

/// Errors raised by the [`Scene`] pipeline.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("the scene has no mesh instances")]
    EmptyScene,

    #[error("mesh {mesh} does not exist")]
    UnknownMesh { mesh: usize },

    #[error("mesh instance {instance} does not exist")]
    UnknownInstance { instance: usize },

    #[error("acceleration structures have not been built yet")]
    NotBuilt,
}

/// Builder configuration of a [`Scene`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SceneOptions {
    /// Builder of the per mesh hierarchies.
    pub blas: SplitBvhBuilder,

    /// Builder of the hierarchy over all mesh instances.
    pub tlas: BvhBuilder,

    /// Worker count, defaults to one per core but at least eight.
    pub num_threads: Option<usize>,
}

impl Default for SceneOptions {
    fn default() -> SceneOptions {
        SceneOptions {
            blas: SplitBvhBuilder::default(),
            tlas: BvhBuilder::new(10.0, 64, false),
            num_threads: None,
        }
    }
}

enum LoadedAsset {
    /// `None` if the task was abandoned.
    Mesh(usize, Option<Result<MeshData, LoadError>>),
    Texture(usize, Option<Result<TextureData, LoadError>>),
}

struct MeshLoadJob {
    id: usize,
    name: String,
    loader: Arc<dyn AssetLoader>,
    results: Sender<LoadedAsset>,
}

impl ThreadTask for MeshLoadJob {
    fn do_threaded_work(self: Box<Self>) {
        let data = self.loader.load_mesh(&self.name);
        let _ = self.results.send(LoadedAsset::Mesh(self.id, Some(data)));
    }

    fn abandon(self: Box<Self>) {
        let _ = self.results.send(LoadedAsset::Mesh(self.id, None));
    }
}

struct TextureLoadJob {
    id: usize,
    name: String,
    loader: Arc<dyn AssetLoader>,
    results: Sender<LoadedAsset>,
}

impl ThreadTask for TextureLoadJob {
    fn do_threaded_work(self: Box<Self>) {
        let data = self.loader.load_texture(&self.name);
        let _ = self.results.send(LoadedAsset::Texture(self.id, Some(data)));
    }

    fn abandon(self: Box<Self>) {
        let _ = self.results.send(LoadedAsset::Texture(self.id, None));
    }
}

struct BuiltBlas {
    id: usize,
    vertices_uvx: Vec<Vector4>,
    /// `None` if the task was abandoned.
    bvh: Option<Bvh>,
}

/// Builds one mesh's hierarchy. The vertices travel with the job and come back with the result.
struct BuildBlasJob {
    id: usize,
    vertices_uvx: Vec<Vector4>,
    builder: SplitBvhBuilder,
    results: Sender<BuiltBlas>,
}

impl ThreadTask for BuildBlasJob {
    fn do_threaded_work(self: Box<Self>) {
        let bvh = self.builder.build(&mesh::triangle_bounds(&self.vertices_uvx));
        let _ = self.results.send(BuiltBlas {
            id: self.id,
            vertices_uvx: self.vertices_uvx,
            bvh: Some(bvh),
        });
    }

    fn abandon(self: Box<Self>) {
        let _ = self.results.send(BuiltBlas {
            id: self.id,
            vertices_uvx: self.vertices_uvx,
            bvh: None,
        });
    }
}

/// A collection of meshes, instances, materials and textures, and the acceleration
/// structures and packed buffers built from them.
///
/// # Examples
///
/// ```
/// use scene_bvh::scene::{MemoryLoader, MeshData, MeshInstance, Scene, SceneOptions};
/// use scene_bvh::{Mat4, Vector4};
///
/// let triangle = MeshData {
///     vertices_uvx: vec![
///         Vector4::new(0.0, 0.0, 0.0, 0.0),
///         Vector4::new(1.0, 0.0, 0.0, 1.0),
///         Vector4::new(0.0, 1.0, 0.0, 0.0),
///     ],
///     normals_uvy: vec![Vector4::new(0.0, 0.0, 1.0, 0.0); 3],
/// };
/// let loader = MemoryLoader::new().with_mesh("triangle", triangle);
/// let options = SceneOptions { num_threads: Some(2), ..SceneOptions::default() };
///
/// let mut scene = Scene::new(options, loader).unwrap();
/// let mesh = scene.add_mesh("triangle");
/// scene
///     .add_mesh_instance(MeshInstance::new("a", mesh, Mat4::identity(), 0))
///     .unwrap();
/// scene.create_acceleration_structures().unwrap();
///
/// assert!(scene.meshes()[mesh].loaded);
/// assert_eq!(scene.bvh_translator().nodes().len(), 2);
/// ```
pub struct Scene {
    options: SceneOptions,
    loader: Arc<dyn AssetLoader>,
    pool: TaskThreadPool,

    meshes: Vec<Mesh>,
    mesh_instances: Vec<MeshInstance>,
    materials: Vec<Material>,
    textures: Vec<Texture>,

    scene_bvh: Option<Bvh>,
    scene_bounds: Aabb,
    bvh_translator: BvhTranslator,

    vert_indices: Vec<[i32; 3]>,
    vertices_uvx: Vec<Vector4>,
    normals_uvy: Vec<Vector4>,
    transforms: Vec<Mat4>,
    texture_maps: Vec<u8>,
    indices_tex_width: usize,
    tri_data_tex_width: usize,
    tex_width: u32,
    tex_height: u32,

    instances_modified: bool,
    built: bool,
}

impl Scene {
    /// Creates an empty scene and starts its worker pool.
    pub fn new<L>(options: SceneOptions, loader: L) -> Result<Scene, SceneError>
    where
        L: AssetLoader + 'static,
    {
        let pool = match options.num_threads {
            Some(num_threads) => TaskThreadPool::new(num_threads)?,
            None => TaskThreadPool::with_default_threads()?,
        };
        Ok(Scene {
            options,
            loader: Arc::new(loader),
            pool,
            meshes: Vec::new(),
            mesh_instances: Vec::new(),
            materials: Vec::new(),
            textures: Vec::new(),
            scene_bvh: None,
            scene_bounds: Aabb::empty(),
            bvh_translator: BvhTranslator::new(),
            vert_indices: Vec::new(),
            vertices_uvx: Vec::new(),
            normals_uvy: Vec::new(),
            transforms: Vec::new(),
            texture_maps: Vec::new(),
            indices_tex_width: 0,
            tri_data_tex_width: 0,
            tex_width: 0,
            tex_height: 0,
            instances_modified: false,
            built: false,
        })
    }

    /// Registers a mesh to be loaded by name. Returns the id of an existing mesh with the
    /// same name if there is one.
    pub fn add_mesh(&mut self, name: &str) -> usize {
        if let Some(id) = self.meshes.iter().position(|mesh| mesh.name == name) {
            return id;
        }
        self.meshes.push(Mesh::new(name));
        self.meshes.len() - 1
    }

    /// Adds an already loaded mesh.
    pub fn add_mesh_data(&mut self, name: &str, data: MeshData) -> Result<usize, SceneError> {
        data.validate(name)?;
        self.meshes.push(Mesh::from_data(name, data));
        Ok(self.meshes.len() - 1)
    }

    /// Registers a texture to be loaded by name, deduplicated like [`Scene::add_mesh`].
    pub fn add_texture(&mut self, name: &str) -> usize {
        if let Some(id) = self.textures.iter().position(|texture| texture.name == name) {
            return id;
        }
        self.textures.push(Texture::new(name));
        self.textures.len() - 1
    }

    /// Adds an already decoded texture.
    pub fn add_texture_data(&mut self, name: &str, data: TextureData) -> Result<usize, SceneError> {
        data.validate(name)?;
        self.textures.push(Texture::from_data(name, data));
        Ok(self.textures.len() - 1)
    }

    pub fn add_material(&mut self, material: Material) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    pub fn add_mesh_instance(&mut self, instance: MeshInstance) -> Result<usize, SceneError> {
        if instance.mesh_id >= self.meshes.len() {
            return Err(SceneError::UnknownMesh {
                mesh: instance.mesh_id,
            });
        }
        self.mesh_instances.push(instance);
        Ok(self.mesh_instances.len() - 1)
    }

    /// Moves an instance. Call [`Scene::rebuild_instances_data`] to update the buffers.
    pub fn set_instance_transform(
        &mut self,
        instance: usize,
        transform: Mat4,
    ) -> Result<(), SceneError> {
        self.instance_mut(instance)?.transform = transform;
        Ok(())
    }

    /// Assigns another material to an instance. Like transforms, the change reaches the top
    /// level records on the next [`Scene::rebuild_instances_data`].
    pub fn set_instance_material(
        &mut self,
        instance: usize,
        material_id: usize,
    ) -> Result<(), SceneError> {
        self.instance_mut(instance)?.material_id = material_id;
        Ok(())
    }

    fn instance_mut(&mut self, instance: usize) -> Result<&mut MeshInstance, SceneError> {
        self.mesh_instances
            .get_mut(instance)
            .ok_or(SceneError::UnknownInstance { instance })
    }

    /// Runs the full pipeline: loads all pending assets, normalizes the textures, builds
    /// every mesh's hierarchy in parallel, builds the top level hierarchy, flattens both and
    /// packs the triangle data.
    pub fn create_acceleration_structures(&mut self) -> Result<(), SceneError> {
        if self.mesh_instances.is_empty() {
            return Err(SceneError::EmptyScene);
        }

        self.load_assets();
        self.validate_textures();
        self.create_blas();

        info!("Building scene BVH");
        let scene_bvh = self.create_tlas();
        {
            let meshes: Vec<&Bvh> = self
                .meshes
                .iter()
                .map(|mesh| mesh.bvh.as_ref())
                .collect::<Option<_>>()
                .ok_or(SceneError::NotBuilt)?;
            self.bvh_translator
                .process(&scene_bvh, &meshes, &self.mesh_instances)?;
        }
        self.scene_bvh = Some(scene_bvh);

        self.pack_mesh_data();
        self.transforms = self
            .mesh_instances
            .iter()
            .map(|instance| instance.transform)
            .collect();
        self.texture_maps = self
            .textures
            .iter()
            .flat_map(|texture| texture.data.iter().copied())
            .collect();

        self.built = true;
        self.instances_modified = false;
        info!(
            "Scene built: {} meshes, {} instances, {} bvh nodes",
            self.meshes.len(),
            self.mesh_instances.len(),
            self.bvh_translator.nodes().len()
        );
        Ok(())
    }

    /// Rebuilds the top level hierarchy after instances moved and rewrites only the top level
    /// records. Sets [`Scene::instances_modified`].
    pub fn rebuild_instances_data(&mut self) -> Result<(), SceneError> {
        if !self.built {
            return Err(SceneError::NotBuilt);
        }
        let scene_bvh = self.create_tlas();
        self.bvh_translator
            .update_tlas(&scene_bvh, &self.mesh_instances)?;
        self.scene_bvh = Some(scene_bvh);

        for (transform, instance) in self.transforms.iter_mut().zip(&self.mesh_instances) {
            *transform = instance.transform;
        }
        self.instances_modified = true;
        Ok(())
    }

    fn load_assets(&mut self) {
        info!("Loading assets ...");
        let (sender, receiver) = mpsc::channel();
        let mut pending = 0;

        for (id, mesh) in self.meshes.iter().enumerate().filter(|(_, mesh)| !mesh.loaded) {
            self.pool.add_task(MeshLoadJob {
                id,
                name: mesh.name.clone(),
                loader: self.loader.clone(),
                results: sender.clone(),
            });
            pending += 1;
        }
        let pending_textures = self
            .textures
            .iter()
            .enumerate()
            .filter(|(_, texture)| !texture.loaded);
        for (id, texture) in pending_textures {
            self.pool.add_task(TextureLoadJob {
                id,
                name: texture.name.clone(),
                loader: self.loader.clone(),
                results: sender.clone(),
            });
            pending += 1;
        }
        drop(sender);

        for asset in receiver.iter().take(pending) {
            match asset {
                LoadedAsset::Mesh(id, Some(Ok(data))) => {
                    let mesh = &mut self.meshes[id];
                    mesh.set_data(data);
                    info!("Mesh {} loaded.", mesh.name);
                }
                LoadedAsset::Mesh(id, result) => {
                    log_load_failure("mesh", &self.meshes[id].name, result);
                }
                LoadedAsset::Texture(id, Some(Ok(data))) => {
                    let texture = &mut self.textures[id];
                    texture.set_data(data);
                    info!("Texture {} loaded.", texture.name);
                }
                LoadedAsset::Texture(id, result) => {
                    log_load_failure("texture", &self.textures[id].name, result);
                }
            }
        }
        info!("Scene assets loaded.");
    }

    /// Converts every texture to three channels and the size of the first loaded texture, so
    /// they can be stacked into one array.
    fn validate_textures(&mut self) {
        let Some((width, height)) = self
            .textures
            .iter()
            .find(|texture| texture.loaded)
            .map(|texture| (texture.width, texture.height))
        else {
            self.tex_width = 0;
            self.tex_height = 0;
            for texture in &mut self.textures {
                texture.clear(0, 0, TEXTURE_CHANNELS);
            }
            return;
        };

        for texture in &mut self.textures {
            if !texture.loaded {
                texture.clear(width, height, TEXTURE_CHANNELS);
                continue;
            }
            texture.set_channels(TEXTURE_CHANNELS);
            if let Err(err) = texture.resize(width, height) {
                warn!("{}, replacing with a blank texture", err);
                texture.clear(width, height, TEXTURE_CHANNELS);
            }
        }
        self.tex_width = width;
        self.tex_height = height;
    }

    fn create_blas(&mut self) {
        info!("Building bottom level bvh...");
        let (sender, receiver) = mpsc::channel();
        for (id, mesh) in self.meshes.iter_mut().enumerate() {
            mesh.bvh = None;
            self.pool.add_task(BuildBlasJob {
                id,
                vertices_uvx: std::mem::take(&mut mesh.vertices_uvx),
                builder: self.options.blas,
                results: sender.clone(),
            });
        }
        drop(sender);

        for built in receiver.iter().take(self.meshes.len()) {
            let mesh = &mut self.meshes[built.id];
            mesh.vertices_uvx = built.vertices_uvx;
            match built.bvh {
                Some(bvh) => {
                    debug!(
                        "mesh {}: {} triangles, {} references, {} nodes, height {}",
                        mesh.name,
                        mesh.num_triangles(),
                        bvh.num_indices(),
                        bvh.node_count(),
                        bvh.height()
                    );
                    mesh.bvh = Some(bvh);
                    info!("Mesh {} bvh build complete.", mesh.name);
                }
                None => {
                    warn!("Mesh {} bvh build was abandoned.", mesh.name);
                    mesh.bvh = None;
                }
            }
        }
    }

    /// Builds the top level hierarchy over the world space bounds of every instance.
    fn create_tlas(&mut self) -> Bvh {
        let bounds: Vec<Aabb> = self
            .mesh_instances
            .iter()
            .map(|instance| {
                let mesh = &self.meshes[instance.mesh_id];
                match mesh.bvh.as_ref().map(Bvh::bounds) {
                    Some(bounds) if !bounds.is_empty() => bounds.transform(&instance.transform),
                    _ => {
                        warn!(
                            "instance {} references mesh {} without geometry",
                            instance.name, mesh.name
                        );
                        Aabb::from_point(instance.translation())
                    }
                }
            })
            .collect();

        let scene_bvh = self.options.tlas.build(&bounds);
        self.scene_bounds = *scene_bvh.bounds();
        scene_bvh
    }

    /// Concatenates the triangle data of all meshes. Triangles are referenced in the order of
    /// their mesh's packed hierarchy indices, each vertex as a packed texel.
    fn pack_mesh_data(&mut self) {
        self.vert_indices.clear();
        self.vertices_uvx.clear();
        self.normals_uvy.clear();

        let mut vertices_cnt = 0;
        for mesh in &self.meshes {
            if let Some(bvh) = &mesh.bvh {
                for &triangle in bvh.indices() {
                    let first = triangle * 3 + vertices_cnt;
                    self.vert_indices
                        .push([first as i32, first as i32 + 1, first as i32 + 2]);
                }
            }
            self.vertices_uvx.extend_from_slice(&mesh.vertices_uvx);
            self.normals_uvy.extend_from_slice(&mesh.normals_uvy);
            vertices_cnt += mesh.vertices_uvx.len();
        }

        self.indices_tex_width = square_texture_width(self.vert_indices.len());
        self.tri_data_tex_width = square_texture_width(self.vertices_uvx.len());
        if self.tri_data_tex_width > MAX_PACKED_WIDTH {
            warn!(
                "vertex texture width {} exceeds the addressable width {}",
                self.tri_data_tex_width, MAX_PACKED_WIDTH
            );
        }

        let width = self.tri_data_tex_width;
        for indices in &mut self.vert_indices {
            for index in indices.iter_mut() {
                *index = pack_texel(*index as usize, width);
            }
        }
        self.vert_indices
            .resize(self.indices_tex_width * self.indices_tex_width, [0; 3]);
        self.vertices_uvx.resize(width * width, Vector4::zeros());
        self.normals_uvy.resize(width * width, Vector4::zeros());
    }

    pub fn options(&self) -> &SceneOptions {
        &self.options
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn mesh_instances(&self) -> &[MeshInstance] {
        &self.mesh_instances
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn textures(&self) -> &[Texture] {
        &self.textures
    }

    /// The top level hierarchy of the last build.
    pub fn scene_bvh(&self) -> Option<&Bvh> {
        self.scene_bvh.as_ref()
    }

    pub fn scene_bounds(&self) -> &Aabb {
        &self.scene_bounds
    }

    pub fn bvh_translator(&self) -> &BvhTranslator {
        &self.bvh_translator
    }

    /// Packed vertex positions of every triangle referenced by a leaf, padded to
    /// `indices_tex_width²` entries.
    pub fn vert_indices(&self) -> &[[i32; 3]] {
        &self.vert_indices
    }

    pub fn vertices_uvx(&self) -> &[Vector4] {
        &self.vertices_uvx
    }

    pub fn normals_uvy(&self) -> &[Vector4] {
        &self.normals_uvy
    }

    /// Instance transforms, indexed by instance id.
    pub fn transforms(&self) -> &[Mat4] {
        &self.transforms
    }

    /// All textures stacked, `tex_width * tex_height * 3` bytes each.
    pub fn texture_maps(&self) -> &[u8] {
        &self.texture_maps
    }

    pub fn indices_tex_width(&self) -> usize {
        self.indices_tex_width
    }

    pub fn tri_data_tex_width(&self) -> usize {
        self.tri_data_tex_width
    }

    pub fn tex_width(&self) -> u32 {
        self.tex_width
    }

    pub fn tex_height(&self) -> u32 {
        self.tex_height
    }

    /// Whether instance data changed since the last [`Scene::clear_instances_modified`].
    pub fn instances_modified(&self) -> bool {
        self.instances_modified
    }

    pub fn clear_instances_modified(&mut self) {
        self.instances_modified = false;
    }
}

fn log_load_failure<T>(kind: &str, name: &str, result: Option<Result<T, LoadError>>) {
    match result {
        Some(Err(err)) => warn!("Failed to load {} {}: {}", kind, name, err),
        None => warn!("Loading {} {} was abandoned.", kind, name),
        Some(Ok(_)) => {}
    }
}

#[cfg(test)]
mod tests {
    use crate::aabb::Aabb;
    use crate::bvh::SplitBvhBuilder;
    use crate::scene::{
        AssetLoader, LoadError, Material, MemoryLoader, MeshData, MeshInstance, Scene,
        SceneError, SceneOptions, TextureData,
    };
    use crate::testbase::{checker_texture_data, cube_mesh_data};
    use crate::{Mat4, Point3, Vector3, EPSILON};

    fn options() -> SceneOptions {
        SceneOptions {
            num_threads: Some(4),
            ..SceneOptions::default()
        }
    }

    fn loader() -> MemoryLoader {
        MemoryLoader::new()
            .with_mesh("cube", cube_mesh_data(Point3::origin(), 1.0))
            .with_mesh("small_cube", cube_mesh_data(Point3::new(0.0, 0.5, 0.0), 0.25))
            .with_texture("albedo", checker_texture_data(8, 8, 4))
            .with_texture("roughness", checker_texture_data(4, 2, 1))
    }

    fn translation(x: f32, y: f32, z: f32) -> Mat4 {
        Mat4::new_translation(&Vector3::new(x, y, z))
    }

    /// Two loaded meshes, one inline mesh, four instances and two textures.
    fn build_scene() -> Scene {
        let mut scene = Scene::new(options(), loader()).unwrap();
        let cube = scene.add_mesh("cube");
        let small = scene.add_mesh("small_cube");
        let inline = scene
            .add_mesh_data("inline", cube_mesh_data(Point3::new(5.0, 0.0, 0.0), 2.0))
            .unwrap();
        scene.add_texture("albedo");
        scene.add_texture("roughness");
        let material = scene.add_material(Material::default());

        for (name, mesh, transform) in [
            ("a", cube, translation(0.0, 0.0, 0.0)),
            ("b", cube, translation(10.0, 0.0, 0.0)),
            ("c", small, translation(0.0, 10.0, 0.0)),
            ("d", inline, translation(0.0, 0.0, -20.0)),
        ] {
            scene
                .add_mesh_instance(MeshInstance::new(name, mesh, transform, material))
                .unwrap();
        }
        scene.create_acceleration_structures().unwrap();
        scene
    }

    fn unpack(packed: i32, width: usize) -> usize {
        (packed & 0xFFF) as usize * width + (packed >> 12) as usize
    }

    #[test]
    /// Assets are loaded and every output buffer has its expected shape.
    fn test_full_build() {
        let scene = build_scene();
        assert!(scene.meshes().iter().all(|mesh| mesh.loaded));
        assert!(scene.textures().iter().all(|texture| texture.loaded));

        let blas_nodes: usize = scene
            .meshes()
            .iter()
            .map(|mesh| mesh.bvh.as_ref().unwrap().node_count())
            .sum();
        let tlas = scene.scene_bvh().unwrap();
        assert_eq!(scene.bvh_translator().nodes().len(), blas_nodes + tlas.node_count());
        assert_eq!(scene.bvh_translator().top_level_index(), blas_nodes);

        let width = scene.indices_tex_width();
        assert_eq!(scene.vert_indices().len(), width * width);
        let width = scene.tri_data_tex_width();
        assert_eq!(scene.vertices_uvx().len(), width * width);
        assert_eq!(scene.normals_uvy().len(), width * width);
        assert_eq!(scene.transforms().len(), 4);
        assert!(!scene.instances_modified());
    }

    #[test]
    /// Every packed triangle index points at the vertices of the referenced triangle.
    fn test_vert_indices_address_triangles() {
        let scene = build_scene();
        let width = scene.tri_data_tex_width();

        let mut position = 0;
        let mut vertices_cnt = 0;
        for mesh in scene.meshes() {
            let bvh = mesh.bvh.as_ref().unwrap();
            for &triangle in bvh.indices() {
                let packed = scene.vert_indices()[position];
                for (k, &vertex) in packed.iter().enumerate() {
                    let index = unpack(vertex, width);
                    assert_eq!(index, vertices_cnt + triangle * 3 + k);
                    assert_eq!(
                        scene.vertices_uvx()[index],
                        mesh.vertices_uvx[triangle * 3 + k]
                    );
                }
                position += 1;
            }
            vertices_cnt += mesh.vertices_uvx.len();
        }
        assert!(scene.vert_indices()[position..].iter().all(|v| *v == [0; 3]));
    }

    #[test]
    /// Textures are converted to three channels at the size of the first texture.
    fn test_textures_are_normalized() {
        let scene = build_scene();
        assert_eq!((scene.tex_width(), scene.tex_height()), (8, 8));
        for texture in scene.textures() {
            assert_eq!(texture.components, 3);
            assert_eq!((texture.width, texture.height), (8, 8));
        }
        assert_eq!(scene.texture_maps().len(), 2 * 8 * 8 * 3);
    }

    #[test]
    /// The scene bounds hold every transformed instance.
    fn test_scene_bounds() {
        let scene = build_scene();
        let bounds = scene.scene_bounds();
        for instance in scene.mesh_instances() {
            let mesh = &scene.meshes()[instance.mesh_id];
            let world = mesh.bvh.as_ref().unwrap().bounds().transform(&instance.transform);
            assert!(bounds.approx_contains_aabb_eps(&world, EPSILON));
        }
        assert_eq!(bounds.min.z, -22.0);
    }

    #[test]
    /// Moving an instance only touches the top level records and flags the instances.
    fn test_rebuild_instances_data() {
        let mut scene = build_scene();
        let before = scene.bvh_translator().clone();

        scene
            .set_instance_transform(1, translation(-10.0, 3.0, 0.0))
            .unwrap();
        scene.rebuild_instances_data().unwrap();

        let after = scene.bvh_translator();
        let split = after.top_level_index();
        assert_eq!(split, before.top_level_index());
        assert_eq!(&after.nodes()[..split], &before.nodes()[..split]);
        assert_eq!(&after.bbox_min()[..split], &before.bbox_min()[..split]);
        assert_ne!(&after.bbox_min()[split..], &before.bbox_min()[split..]);
        assert_eq!(scene.transforms()[1], translation(-10.0, 3.0, 0.0));
        assert!(scene.scene_bounds().min.x <= -11.0);
        assert!(scene.instances_modified());

        scene.clear_instances_modified();
        assert!(!scene.instances_modified());
    }

    #[test]
    /// A material change rewrites only the material of the instance's top level leaf.
    fn test_rebuild_after_material_change() {
        let mut scene = build_scene();
        let before = scene.bvh_translator().clone();
        let glass = scene.add_material(Material {
            transmittance: 1.0,
            ..Material::default()
        });

        scene.set_instance_material(2, glass).unwrap();
        scene.rebuild_instances_data().unwrap();

        let after = scene.bvh_translator();
        assert_eq!(after.nodes().len(), before.nodes().len());
        assert_eq!(after.bbox_min(), before.bbox_min());
        assert_eq!(after.bbox_max(), before.bbox_max());

        let mut changed = 0;
        for (index, (new, old)) in after.nodes().iter().zip(before.nodes()).enumerate() {
            if new == old {
                continue;
            }
            assert!(index >= after.top_level_index());
            assert_eq!(new.instance(), Some(2));
            assert_eq!((new.left_index, new.leaf), (old.left_index, old.leaf));
            assert_eq!(new.right_index, glass as i32);
            changed += 1;
        }
        assert_eq!(changed, 1);
        assert_eq!(scene.mesh_instances()[2].material_id, glass);
        assert!(scene.instances_modified());

        assert!(matches!(
            scene.set_instance_material(9, glass),
            Err(SceneError::UnknownInstance { instance: 9 })
        ));
    }

    struct PanickingLoader(MemoryLoader);

    impl AssetLoader for PanickingLoader {
        fn load_mesh(&self, name: &str) -> Result<MeshData, LoadError> {
            if name == "explodes" {
                panic!("decoder crashed on {name}");
            }
            self.0.load_mesh(name)
        }

        fn load_texture(&self, name: &str) -> Result<TextureData, LoadError> {
            self.0.load_texture(name)
        }
    }

    #[test]
    /// A loader that panics is treated like a failed load instead of stalling the build.
    fn test_panicking_loader_is_tolerated() {
        let options = SceneOptions {
            num_threads: Some(1),
            ..options()
        };
        let mut scene = Scene::new(options, PanickingLoader(loader())).unwrap();
        let exploding = scene.add_mesh("explodes");
        let cube = scene.add_mesh("cube");
        scene
            .add_mesh_instance(MeshInstance::new("a", cube, Mat4::identity(), 0))
            .unwrap();
        scene
            .add_mesh_instance(MeshInstance::new("b", exploding, translation(0.0, 4.0, 0.0), 0))
            .unwrap();
        scene.create_acceleration_structures().unwrap();

        assert!(scene.meshes()[cube].loaded);
        assert!(!scene.meshes()[exploding].loaded);
        assert_eq!(scene.meshes()[exploding].bvh.as_ref().unwrap().num_indices(), 0);
        assert!(scene.scene_bounds().contains(&Point3::new(0.0, 4.0, 0.0)));
    }

    #[test]
    fn test_rebuild_requires_full_build() {
        let mut scene = Scene::new(options(), loader()).unwrap();
        let cube = scene.add_mesh("cube");
        scene
            .add_mesh_instance(MeshInstance::new("a", cube, Mat4::identity(), 0))
            .unwrap();
        assert!(matches!(
            scene.rebuild_instances_data(),
            Err(SceneError::NotBuilt)
        ));
    }

    #[test]
    /// A mesh that fails to load leaves an empty hierarchy but does not stop the build.
    fn test_failed_mesh_load_is_tolerated() {
        let mut scene = Scene::new(options(), loader()).unwrap();
        let cube = scene.add_mesh("cube");
        let missing = scene.add_mesh("missing");
        let missing_texture = scene.add_texture("missing");
        scene.add_texture("albedo");
        scene
            .add_mesh_instance(MeshInstance::new("a", cube, Mat4::identity(), 0))
            .unwrap();
        scene
            .add_mesh_instance(MeshInstance::new("b", missing, translation(3.0, 0.0, 0.0), 0))
            .unwrap();
        scene.create_acceleration_structures().unwrap();

        let mesh = &scene.meshes()[missing];
        assert!(!mesh.loaded);
        assert_eq!(mesh.bvh.as_ref().unwrap().num_indices(), 0);
        assert!(scene.scene_bounds().contains(&Point3::new(3.0, 0.0, 0.0)));

        // The failed texture is blanked at the size of the loaded one.
        let texture = &scene.textures()[missing_texture];
        assert!(!texture.loaded);
        assert_eq!(texture.data, vec![0; 8 * 8 * 3]);
    }

    #[test]
    /// Names are loaded only once.
    fn test_assets_are_deduplicated() {
        let mut scene = Scene::new(options(), loader()).unwrap();
        assert_eq!(scene.add_mesh("cube"), scene.add_mesh("cube"));
        assert_ne!(scene.add_mesh("cube"), scene.add_mesh("small_cube"));
        assert_eq!(scene.add_texture("albedo"), scene.add_texture("albedo"));
        assert_eq!(scene.meshes().len(), 2);
        assert_eq!(scene.textures().len(), 1);
    }

    #[test]
    fn test_invalid_input() {
        let mut scene = Scene::new(options(), loader()).unwrap();
        assert!(matches!(
            scene.create_acceleration_structures(),
            Err(SceneError::EmptyScene)
        ));
        assert!(matches!(
            scene.add_mesh_instance(MeshInstance::new("a", 3, Mat4::identity(), 0)),
            Err(SceneError::UnknownMesh { mesh: 3 })
        ));
        assert!(matches!(
            scene.set_instance_transform(0, Mat4::identity()),
            Err(SceneError::UnknownInstance { instance: 0 })
        ));
        let mut broken = cube_mesh_data(Point3::origin(), 1.0);
        broken.vertices_uvx.pop();
        assert!(matches!(
            scene.add_mesh_data("broken", broken),
            Err(SceneError::Load(_))
        ));
    }

    #[test]
    /// Rebuilding from scratch yields the same buffers.
    fn test_full_build_is_repeatable() {
        let mut scene = build_scene();
        let nodes = scene.bvh_translator().nodes().to_vec();
        let indices = scene.vert_indices().to_vec();
        scene.create_acceleration_structures().unwrap();
        assert_eq!(scene.bvh_translator().nodes(), &nodes[..]);
        assert_eq!(scene.vert_indices(), &indices[..]);
    }

    #[test]
    /// Object only bottom level trees reference every triangle exactly once.
    fn test_object_split_blas() {
        let options = SceneOptions {
            blas: SplitBvhBuilder {
                max_split_depth: 0,
                ..SplitBvhBuilder::default()
            },
            ..options()
        };
        let mut scene = Scene::new(options, loader()).unwrap();
        let cube = scene.add_mesh("cube");
        scene
            .add_mesh_instance(MeshInstance::new("a", cube, Mat4::identity(), 0))
            .unwrap();
        scene.create_acceleration_structures().unwrap();
        let bvh = scene.meshes()[cube].bvh.as_ref().unwrap();
        assert_eq!(bvh.num_indices(), 12);
        assert_eq!(*scene.scene_bounds(), Aabb::with_bounds(
            Point3::new(-1.0, -1.0, -1.0),
            Point3::new(1.0, 1.0, 1.0),
        ));
    }
}
