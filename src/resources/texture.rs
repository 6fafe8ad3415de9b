// Textures: pixel data in, sampled image out

use crate::backend::opengl::GlDriver;
use crate::backend::vulkan::{Image, VulkanDriver};
use crate::error::{RendererError, Result};
use crate::resource::{Resource, ResourceId};
use ash::vk;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Decoded pixels plus their shape.
///
/// `channels` may be 1 to 4; uploads always expand to RGBA8.
#[derive(Debug, Clone, Default)]
pub struct TextureCreateInfo {
    pub path: Option<PathBuf>,
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl TextureCreateInfo {
    /// Decode an image file (PNG or JPEG) into RGBA8
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|err| RendererError::load(path, err))?
            .to_rgba8();
        let (width, height) = image.dimensions();

        Ok(Self {
            path: Some(path.to_path_buf()),
            pixels: image.into_raw(),
            width,
            height,
            channels: 4,
        })
    }

    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            path: None,
            pixels,
            width,
            height,
            channels: 4,
        }
    }

    /// Size in bytes of the pixel data as described
    pub fn image_size(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RendererError::invalid("texture dimensions must be non-zero"));
        }
        if !(1..=4).contains(&self.channels) {
            return Err(RendererError::invalid(format!(
                "textures have 1 to 4 channels, got {}",
                self.channels
            )));
        }
        if self.pixels.len() != self.image_size() {
            return Err(RendererError::invalid(format!(
                "expected {} bytes of pixel data, got {}",
                self.image_size(),
                self.pixels.len()
            )));
        }
        Ok(())
    }

    /// Pixels expanded to RGBA8 (grey fills RGB, missing alpha is opaque)
    pub fn to_rgba(&self) -> Vec<u8> {
        if self.channels == 4 {
            return self.pixels.clone();
        }
        let channels = self.channels as usize;
        self.pixels
            .chunks_exact(channels)
            .flat_map(|px| match px {
                [l] => [*l, *l, *l, 255],
                [l, a] => [*l, *l, *l, *a],
                [r, g, b] => [*r, *g, *b, 255],
                _ => [0, 0, 0, 255],
            })
            .collect()
    }
}

/// What a binding table needs to sample a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureHandle {
    Vulkan {
        view: vk::ImageView,
        sampler: vk::Sampler,
    },
    OpenGl {
        texture: u32,
    },
}

pub(crate) enum TextureStorage {
    Vulkan {
        driver: Arc<dyn VulkanDriver>,
        image: Image,
        sampler: vk::Sampler,
    },
    OpenGl {
        driver: Arc<dyn GlDriver>,
        texture: u32,
    },
}

pub struct Texture {
    id: ResourceId,
    width: u32,
    height: u32,
    storage: TextureStorage,
}

impl Texture {
    pub(crate) fn new(width: u32, height: u32, storage: TextureStorage) -> Self {
        Self {
            id: ResourceId::next(),
            width,
            height,
            storage,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn handle(&self) -> TextureHandle {
        match &self.storage {
            TextureStorage::Vulkan { image, sampler, .. } => TextureHandle::Vulkan {
                view: image.view(),
                sampler: *sampler,
            },
            TextureStorage::OpenGl { texture, .. } => TextureHandle::OpenGl { texture: *texture },
        }
    }
}

impl Resource for Texture {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "texture"
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        match &self.storage {
            TextureStorage::Vulkan { driver, sampler, .. } => driver.destroy_sampler(*sampler),
            TextureStorage::OpenGl { driver, texture } => driver.delete_texture(*texture),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_grey_and_rgb_to_rgba() {
        let grey = TextureCreateInfo {
            pixels: vec![10, 20],
            width: 2,
            height: 1,
            channels: 1,
            ..Default::default()
        };
        assert_eq!(grey.to_rgba(), vec![10, 10, 10, 255, 20, 20, 20, 255]);

        let rgb = TextureCreateInfo {
            pixels: vec![1, 2, 3],
            width: 1,
            height: 1,
            channels: 3,
            ..Default::default()
        };
        assert_eq!(rgb.to_rgba(), vec![1, 2, 3, 255]);
    }

    #[test]
    fn rejects_mismatched_pixel_data() {
        let info = TextureCreateInfo::from_rgba(2, 2, vec![0; 15]);
        assert!(matches!(info.validate(), Err(RendererError::InvalidConfiguration(_))));
        assert!(TextureCreateInfo::from_rgba(2, 2, vec![0; 16]).validate().is_ok());
    }

    #[test]
    fn decodes_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checker.png");
        image::RgbImage::from_fn(3, 2, |x, _| image::Rgb([x as u8 * 80, 0, 0]))
            .save(&path)
            .unwrap();

        let info = TextureCreateInfo::from_path(&path).unwrap();
        assert_eq!((info.width, info.height, info.channels), (3, 2, 4));
        assert_eq!(info.image_size(), 24);
        assert_eq!(&info.pixels[4..8], &[80, 0, 0, 255]);
        assert_eq!(info.path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn unreadable_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();
        assert!(matches!(
            TextureCreateInfo::from_path(&path),
            Err(RendererError::ResourceLoad { .. })
        ));
    }
}
