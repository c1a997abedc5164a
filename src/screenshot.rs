//! Handles decoding of screenshots received from OBS.

use anyhow::Context;
use base64::Engine;
use image::RgbaImage;

/// Decodes a base64 encoded image, optionally prefixed with a `data:image/...,` header.
pub(crate) fn decode_screenshot(payload: &str) -> anyhow::Result<RgbaImage> {
    let data = match payload.strip_prefix("data:image") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .context("data URI without a payload")?,
        None => payload,
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .context("screenshot is not valid base64")?;

    Ok(image::load_from_memory(&bytes)
        .context("failed to decode screenshot")?
        .to_rgba8())
}

/// Encodes an image as a base64 PNG data URI, the way OBS delivers screenshots.
#[cfg(test)]
pub(crate) fn encode_data_uri(image: &RgbaImage) -> String {
    let mut img_buf = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut img_buf, image::ImageOutputFormat::Png)
        .unwrap();

    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(img_buf.into_inner())
    )
}

#[cfg(test)]
mod tests {
    use base64::Engine;

    use super::*;

    fn sample() -> RgbaImage {
        let mut image = RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 255]));
        image.put_pixel(2, 1, image::Rgba([200, 100, 50, 128]));
        image
    }

    #[test]
    fn decodes_data_uri() {
        let image = sample();
        assert_eq!(decode_screenshot(&encode_data_uri(&image)).unwrap(), image);
    }

    #[test]
    fn decodes_bare_base64() {
        let image = sample();
        let uri = encode_data_uri(&image);
        let (_, bare) = uri.split_once(',').unwrap();
        assert_eq!(decode_screenshot(bare).unwrap(), image);
    }

    #[test]
    fn rgb_images_are_normalized_to_rgba() {
        let rgb = image::RgbImage::from_pixel(2, 2, image::Rgb([9, 8, 7]));
        let mut img_buf = std::io::Cursor::new(Vec::new());
        rgb.write_to(&mut img_buf, image::ImageOutputFormat::Png)
            .unwrap();
        let payload = base64::engine::general_purpose::STANDARD.encode(img_buf.into_inner());

        let decoded = decode_screenshot(&payload).unwrap();
        assert_eq!(*decoded.get_pixel(1, 1), image::Rgba([9, 8, 7, 255]));
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_screenshot("data:image/png;base64").is_err());
        assert!(decode_screenshot("not base64!").is_err());
        assert!(decode_screenshot("aGVsbG8=").is_err());
    }
}
