use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Writes an RGBA image (canvas or legend) to `path` as PNG.
pub fn save<P: AsRef<Path>>(path: P, image: &RgbaImage) -> Result<(), image::ImageError> {
    let output = BufWriter::new(File::create(path)?);
    let encoder = PngEncoder::new(output);
    encoder.write_image(image.as_raw(), image.width(), image.height(), ExtendedColorType::Rgba8)?;
    Ok(())
}

/// Encodes an RGBA image as PNG into memory.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(image.as_raw(), image.width(), image.height(), ExtendedColorType::Rgba8)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::legend::render_legend;

    #[test]
    fn save_legend_file() {
        let path = std::env::temp_dir().join("flowfield_legend_test.png");
        save(&path, &render_legend(100)).expect("Error Saving File.");

        let reloaded = image::open(&path).expect("Error Opening File.").to_rgba8();
        assert_eq!(reloaded.dimensions(), (100, 100));
        assert_eq!(reloaded, render_legend(100));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn encode_non_square_canvas() {
        let canvas = RgbaImage::from_pixel(30, 10, image::Rgba([255, 99, 71, 255]));
        let bytes = encode_png(&canvas).expect("Error Encoding File.");
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (30, 10));
        assert_eq!(*decoded.get_pixel(29, 9), image::Rgba([255, 99, 71, 255]));
    }
}
