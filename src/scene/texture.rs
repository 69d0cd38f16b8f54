use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, LumaA, Pixel, Rgb, Rgba};

use crate::scene::{LoadError, TextureData};

/// An 8 bit texture.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Texture {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub components: u32,
    pub data: Vec<u8>,
    pub loaded: bool,
}

impl Texture {
    /// A texture which still has to be loaded.
    pub fn new(name: impl Into<String>) -> Texture {
        Texture {
            name: name.into(),
            ..Texture::default()
        }
    }

    pub fn from_data(name: impl Into<String>, data: TextureData) -> Texture {
        let mut texture = Texture::new(name);
        texture.set_data(data);
        texture
    }

    pub fn set_data(&mut self, data: TextureData) {
        self.width = data.width;
        self.height = data.height;
        self.components = data.components;
        self.data = data.data;
        self.loaded = true;
    }

    /// Replaces the contents with black pixels of the given size.
    pub fn clear(&mut self, width: u32, height: u32, components: u32) {
        self.width = width;
        self.height = height;
        self.components = components;
        self.data = vec![0; width as usize * height as usize * components as usize];
    }

    /// Converts to `channels` channels per pixel. Dropped channels are discarded, added ones
    /// are filled with 255.
    ///
    /// # Examples
    ///
    /// ```
    /// use scene_bvh::scene::{Texture, TextureData};
    ///
    /// let mut texture = Texture::from_data(
    ///     "gray",
    ///     TextureData { width: 2, height: 1, components: 1, data: vec![10, 20] },
    /// );
    /// texture.set_channels(3);
    /// assert_eq!(texture.data, vec![10, 255, 255, 20, 255, 255]);
    /// ```
    pub fn set_channels(&mut self, channels: u32) {
        if self.components == channels {
            return;
        }
        let old = self.components as usize;
        let new = channels as usize;
        let kept = old.min(new);

        let mut data = Vec::with_capacity(self.pixel_count() * new);
        for pixel in self.data.chunks_exact(old.max(1)).take(self.pixel_count()) {
            data.extend_from_slice(&pixel[..kept]);
            data.resize(data.len() + new - kept, 255);
        }
        self.data = data;
        self.components = channels;
    }

    /// Resamples to `width` x `height`.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), LoadError> {
        if self.width == width && self.height == height {
            return Ok(());
        }
        let expected = self.pixel_count() * self.components as usize;
        if self.pixel_count() == 0 || self.data.len() != expected {
            return Err(self.cannot_resample());
        }
        let data = std::mem::take(&mut self.data);
        let resized = match self.components {
            1 => resize_pixels::<Luma<u8>>(data, self.width, self.height, width, height),
            2 => resize_pixels::<LumaA<u8>>(data, self.width, self.height, width, height),
            3 => resize_pixels::<Rgb<u8>>(data, self.width, self.height, width, height),
            4 => resize_pixels::<Rgba<u8>>(data, self.width, self.height, width, height),
            _ => None,
        };
        match resized {
            Some(data) => {
                self.data = data;
                self.width = width;
                self.height = height;
                Ok(())
            }
            None => Err(self.cannot_resample()),
        }
    }

    fn cannot_resample(&self) -> LoadError {
        LoadError::malformed(
            &self.name,
            format!(
                "cannot resample {}x{} with {} channels",
                self.width, self.height, self.components
            ),
        )
    }

    fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

fn resize_pixels<P>(
    data: Vec<u8>,
    width: u32,
    height: u32,
    new_width: u32,
    new_height: u32,
) -> Option<Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let buffer = ImageBuffer::<P, Vec<u8>>::from_raw(width, height, data)?;
    Some(imageops::resize(&buffer, new_width, new_height, FilterType::Triangle).into_raw())
}
