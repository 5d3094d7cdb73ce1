use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::ImageEncoder;
use image::RgbaImage;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use rayon::prelude::*;

use crate::error::RenderResult;
use crate::gpu::RadianceImage;
use crate::passes::present::tonemap;

/// Tone maps a radiance image into an 8-bit image, the same way frames are presented.
pub fn capture(radiance: &RadianceImage) -> RgbaImage {
    let extent = radiance.extent();
    let mut image = RgbaImage::new(extent.width, extent.height);
    let pixels: &mut [[u8; 4]] = bytemuck::cast_slice_mut(&mut *image);
    pixels
        .par_iter_mut()
        .zip(radiance.texels().par_iter())
        .for_each(|(pixel, &texel)| *pixel = tonemap(texel));
    image
}

/// `output/render_<local time>.png`
pub fn default_path() -> PathBuf {
    let now = chrono::Local::now();
    PathBuf::from("output").join(format!("render_{}.png", now.format("%Y-%m-%d_%H-%M-%S")))
}

/// Writes `image` as PNG with fast compression, creating parent directories as needed.
pub fn save_png(image: &RgbaImage, path: &Path) -> RenderResult<()> {
    let saving_start = std::time::Instant::now();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    let encoder = PngEncoder::new_with_quality(writer, CompressionType::Fast, FilterType::NoFilter);
    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgba8,
    )?;

    log::info!(
        "saved {} ({} ms)",
        path.display(),
        saving_start.elapsed().as_millis()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_tonemaps_every_texel() {
        use crate::gpu::Extent;
        use glam::Vec4;

        let texels = vec![Vec4::ZERO, Vec4::ONE, Vec4::new(1e9, 0.0, 0.0, 1.0), Vec4::ZERO];
        let image = capture(&RadianceImage::new(Extent::new(2, 2), texels));
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [188, 188, 188, 255]);
        assert_eq!(image.get_pixel(0, 1).0, [255, 0, 0, 255]);
    }

    #[test]
    fn default_path_lives_in_output() {
        let path = default_path();
        assert_eq!(path.parent(), Some(Path::new("output")));
        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("render_") && name.ends_with(".png"));
    }

    #[test]
    fn png_is_written_into_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("frame.png");
        let mut image = RgbaImage::new(3, 2);
        image.put_pixel(2, 1, image::Rgba([10, 20, 30, 255]));

        save_png(&image, &path).unwrap();
        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded, image);
    }
}
