//! Image encoding: `DynamicImage` → PNG bytes → base64 for request bodies.
//!
//! PNG is lossless; JPEG artefacts around small table digits make vision
//! models misread `8` as `3` and `1` as `7`, which is exactly the kind of
//! error a statistics report cannot absorb.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// MIME type of every page image this crate produces.
pub const PAGE_MIME_TYPE: &str = "image/png";

/// Encode a rendered page as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Base64 (standard alphabet, padded) for inline-data request fields.
pub fn to_base64(png: &[u8]) -> String {
    let b64 = STANDARD.encode(png);
    debug!("Encoded image → {} bytes base64", b64.len());
    b64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let png = encode_png(&img).expect("encode should succeed");
        assert_eq!(&png[1..4], b"PNG");

        let b64 = to_base64(&png);
        let decoded = STANDARD.decode(&b64).expect("valid base64");
        assert_eq!(decoded, png);
    }
}
