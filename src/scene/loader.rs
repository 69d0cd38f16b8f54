use std::collections::HashMap;

use thiserror::Error;

use crate::Vector4;

/// Errors raised while loading or validating an asset.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("asset {0} not found")]
    NotFound(String),

    #[error("asset {name} is malformed: {reason}")]
    Malformed { name: String, reason: String },
}

impl LoadError {
    pub(crate) fn malformed(name: &str, reason: impl Into<String>) -> LoadError {
        LoadError::Malformed {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Triangle soup of a mesh. Every three consecutive vertices form a triangle.
///
/// The `w` component of [`MeshData::vertices_uvx`] holds the first texture coordinate, the
/// `w` component of [`MeshData::normals_uvy`] the second one.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MeshData {
    pub vertices_uvx: Vec<Vector4>,
    pub normals_uvy: Vec<Vector4>,
}

impl MeshData {
    pub fn validate(&self, name: &str) -> Result<(), LoadError> {
        if self.vertices_uvx.len() % 3 != 0 {
            return Err(LoadError::malformed(
                name,
                format!("{} vertices do not form triangles", self.vertices_uvx.len()),
            ));
        }
        if self.normals_uvy.len() != self.vertices_uvx.len() {
            return Err(LoadError::malformed(
                name,
                format!(
                    "{} normals for {} vertices",
                    self.normals_uvy.len(),
                    self.vertices_uvx.len()
                ),
            ));
        }
        Ok(())
    }
}

/// Raw 8 bit pixels, row major with interleaved channels.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub components: u32,
    pub data: Vec<u8>,
}

impl TextureData {
    pub fn validate(&self, name: &str) -> Result<(), LoadError> {
        if !(1..=4).contains(&self.components) {
            return Err(LoadError::malformed(
                name,
                format!("unsupported channel count {}", self.components),
            ));
        }
        let expected = self.width as usize * self.height as usize * self.components as usize;
        if self.data.len() != expected {
            return Err(LoadError::malformed(
                name,
                format!("expected {} bytes, found {}", expected, self.data.len()),
            ));
        }
        Ok(())
    }
}

/// Source of mesh and texture data. Called from worker threads.
pub trait AssetLoader: Send + Sync {
    fn load_mesh(&self, name: &str) -> Result<MeshData, LoadError>;

    fn load_texture(&self, name: &str) -> Result<TextureData, LoadError>;
}

/// An [`AssetLoader`] serving assets registered up front.
///
/// # Examples
///
/// ```
/// use scene_bvh::scene::{AssetLoader, LoadError, MemoryLoader, MeshData};
///
/// let loader = MemoryLoader::new().with_mesh("empty", MeshData::default());
/// assert!(loader.load_mesh("empty").is_ok());
/// assert_eq!(
///     loader.load_mesh("other"),
///     Err(LoadError::NotFound("other".to_owned()))
/// );
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryLoader {
    meshes: HashMap<String, MeshData>,
    textures: HashMap<String, TextureData>,
}

impl MemoryLoader {
    pub fn new() -> MemoryLoader {
        MemoryLoader::default()
    }

    pub fn with_mesh(mut self, name: impl Into<String>, data: MeshData) -> MemoryLoader {
        self.insert_mesh(name, data);
        self
    }

    pub fn with_texture(mut self, name: impl Into<String>, data: TextureData) -> MemoryLoader {
        self.insert_texture(name, data);
        self
    }

    pub fn insert_mesh(&mut self, name: impl Into<String>, data: MeshData) {
        self.meshes.insert(name.into(), data);
    }

    pub fn insert_texture(&mut self, name: impl Into<String>, data: TextureData) {
        self.textures.insert(name.into(), data);
    }
}

impl AssetLoader for MemoryLoader {
    fn load_mesh(&self, name: &str) -> Result<MeshData, LoadError> {
        let data = self
            .meshes
            .get(name)
            .ok_or_else(|| LoadError::NotFound(name.to_owned()))?;
        data.validate(name)?;
        Ok(data.clone())
    }

    fn load_texture(&self, name: &str) -> Result<TextureData, LoadError> {
        let data = self
            .textures
            .get(name)
            .ok_or_else(|| LoadError::NotFound(name.to_owned()))?;
        data.validate(name)?;
        Ok(data.clone())
    }
}

#[cfg(test)]
mod tests {
    use crate::scene::{AssetLoader, LoadError, MemoryLoader, MeshData, TextureData};
    use crate::testbase::{checker_texture_data, cube_mesh_data};
    use crate::Point3;

    #[test]
    fn test_memory_loader_serves_registered_assets() {
        let cube = cube_mesh_data(Point3::origin(), 1.0);
        let loader = MemoryLoader::new()
            .with_mesh("cube", cube.clone())
            .with_texture("checker", checker_texture_data(4, 4, 3));
        assert_eq!(loader.load_mesh("cube").unwrap(), cube);
        assert_eq!(loader.load_texture("checker").unwrap().data.len(), 48);
        assert_eq!(
            loader.load_texture("cube"),
            Err(LoadError::NotFound("cube".to_owned()))
        );
    }

    #[test]
    /// Inconsistent data is reported as malformed.
    fn test_validation() {
        let mut cube = cube_mesh_data(Point3::origin(), 1.0);
        cube.normals_uvy.pop();
        assert!(matches!(
            cube.validate("cube"),
            Err(LoadError::Malformed { .. })
        ));

        cube.vertices_uvx.pop();
        assert!(cube.validate("cube").is_err());
        assert!(MeshData::default().validate("empty").is_ok());

        let mut texture = checker_texture_data(2, 2, 4);
        texture.data.pop();
        assert!(texture.validate("t").is_err());
        let texture = TextureData {
            components: 5,
            ..TextureData::default()
        };
        assert!(texture.validate("t").is_err());
    }
}
