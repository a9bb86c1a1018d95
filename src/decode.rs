//! Image decoding service.
//!
//! Turns raw payload bytes into RGBA pixel buffers. Callers see the decoder
//! only through [`ImageDecoder`]; the upload strategies never look inside.

use crate::config::DecodeConfig;
use crate::error::DecodeError;
use crate::task::RawPayload;
use image::ImageFormat;
use rayon::prelude::*;

/// Decoded pixels ready for a single texture upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Pixel data, row-major, `channel_count` bytes per pixel
    pub pixels: Vec<u8>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes per pixel
    pub channel_count: u8,
}

impl DecodedImage {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, channel_count: u8) -> Self {
        Self {
            pixels,
            width,
            height,
            channel_count,
        }
    }

    /// Bytes the pixel buffer should hold for these dimensions
    #[inline]
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channel_count as usize
    }
}

/// Bytes in, pixels out. Must be safe to call from the worker thread.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError>;
}

/// Decoder backed by `zune-jpeg` for JPEG and `image` for everything else.
/// Always produces RGBA.
pub struct Decoder {
    config: DecodeConfig,
}

impl Decoder {
    pub fn new(config: DecodeConfig) -> Self {
        Self { config }
    }

    /// Sniff the format from magic bytes
    fn detect_format(data: &[u8]) -> Result<ImageFormat, DecodeError> {
        image::guess_format(data).map_err(|_| DecodeError::UnknownFormat)
    }

    /// Decode JPEG using zune-jpeg (fast)
    fn decode_jpeg(data: &[u8]) -> Result<(Vec<u8>, u32, u32), DecodeError> {
        let mut decoder = zune_jpeg::JpegDecoder::new(data);
        if let Ok(pixels) = decoder.decode() {
            if let Some(info) = decoder.info() {
                let (width, height) = (info.width as u32, info.height as u32);
                let area = width as usize * height as usize;
                if area > 0 && pixels.len() % area == 0 {
                    let components = (pixels.len() / area) as u8;
                    return Ok((Self::to_rgba(pixels, components), width, height));
                }
            }
        }

        // Fallback to image crate
        Self::decode_generic(data, ImageFormat::Jpeg)
    }

    /// Decode using image crate (generic fallback)
    fn decode_generic(data: &[u8], format: ImageFormat) -> Result<(Vec<u8>, u32, u32), DecodeError> {
        let img = image::load_from_memory_with_format(data, format)?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok((rgba.into_raw(), width, height))
    }

    /// Convert raw pixels to RGBA
    fn to_rgba(pixels: Vec<u8>, components: u8) -> Vec<u8> {
        match components {
            4 => pixels, // Already RGBA
            3 => pixels
                .chunks_exact(3)
                .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 255])
                .collect(),
            2 => pixels
                .chunks_exact(2)
                .flat_map(|ga| [ga[0], ga[0], ga[0], ga[1]])
                .collect(),
            1 => pixels.iter().flat_map(|&g| [g, g, g, 255]).collect(),
            _ => pixels,
        }
    }

    /// Resize using bilinear interpolation
    fn resize_bilinear(data: &[u8], src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Vec<u8> {
        if src_w == dst_w && src_h == dst_h {
            return data.to_vec();
        }

        let src_w = src_w as usize;
        let src_h = src_h as usize;
        let dst_w = dst_w as usize;
        let dst_h = dst_h as usize;

        let mut result = vec![0u8; dst_w * dst_h * 4];

        let x_ratio = (src_w as f64 - 1.0) / dst_w.max(1) as f64;
        let y_ratio = (src_h as f64 - 1.0) / dst_h.max(1) as f64;

        for y in 0..dst_h {
            let src_y = y as f64 * y_ratio;
            let y0 = src_y.floor() as usize;
            let y1 = (y0 + 1).min(src_h - 1);
            let y_frac = src_y - y0 as f64;

            for x in 0..dst_w {
                let src_x = x as f64 * x_ratio;
                let x0 = src_x.floor() as usize;
                let x1 = (x0 + 1).min(src_w - 1);
                let x_frac = src_x - x0 as f64;

                let idx00 = (y0 * src_w + x0) * 4;
                let idx01 = (y0 * src_w + x1) * 4;
                let idx10 = (y1 * src_w + x0) * 4;
                let idx11 = (y1 * src_w + x1) * 4;
                let dst_idx = (y * dst_w + x) * 4;

                for c in 0..4 {
                    let v00 = data.get(idx00 + c).copied().unwrap_or(0) as f64;
                    let v01 = data.get(idx01 + c).copied().unwrap_or(0) as f64;
                    let v10 = data.get(idx10 + c).copied().unwrap_or(0) as f64;
                    let v11 = data.get(idx11 + c).copied().unwrap_or(0) as f64;

                    let v0 = v00 * (1.0 - x_frac) + v01 * x_frac;
                    let v1 = v10 * (1.0 - x_frac) + v11 * x_frac;
                    let v = v0 * (1.0 - y_frac) + v1 * y_frac;

                    result[dst_idx + c] = v.round() as u8;
                }
            }
        }

        result
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DecodeConfig::default())
    }
}

impl ImageDecoder for Decoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let (rgba, width, height) = match Self::detect_format(bytes)? {
            ImageFormat::Jpeg => Self::decode_jpeg(bytes)?,
            format => Self::decode_generic(bytes, format)?,
        };

        if width == 0 || height == 0 {
            return Err(DecodeError::ZeroArea { width, height });
        }

        let (target_w, target_h) = self.config.target_dimensions(width, height);
        let pixels = if target_w == width && target_h == height {
            rgba
        } else {
            Self::resize_bilinear(&rgba, width, height, target_w, target_h)
        };

        Ok(DecodedImage::new(pixels, target_w, target_h, 4))
    }
}

/// Decode every payload of a batch, dropping (and logging) the failures.
///
/// With `parallel` set the payloads are spread over the rayon pool; the
/// calling thread still blocks until the whole batch is done. Output keeps
/// the payload order either way.
pub fn decode_batch(
    decoder: &dyn ImageDecoder,
    payloads: &[RawPayload],
    parallel: bool,
) -> (Vec<DecodedImage>, usize) {
    let decode_one = |(index, payload): (usize, &RawPayload)| match decoder.decode(payload.as_bytes()) {
        Ok(image) => Some(image),
        Err(e) => {
            log::warn!("Dropping payload {} ({} bytes): {}", index, payload.len(), e);
            None
        }
    };

    let results: Vec<Option<DecodedImage>> = if parallel && payloads.len() > 1 {
        payloads.par_iter().enumerate().map(decode_one).collect()
    } else {
        payloads.iter().enumerate().map(decode_one).collect()
    };

    let failures = results.iter().filter(|r| r.is_none()).count();
    (results.into_iter().flatten().collect(), failures)
}

/// Size the global rayon pool once, if a thread count is configured
pub fn configure_decode_pool(config: &DecodeConfig) {
    if config.max_parallel_tasks > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_parallel_tasks)
            .thread_name(|i| format!("decode-{i}"))
            .build_global()
            .ok(); // Ignore if already initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::png_bytes;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    #[test]
    fn test_decode_png() {
        let decoder = Decoder::default();
        let image = decoder.decode(&png_bytes(3, 2, [255, 0, 0, 255])).unwrap();

        assert_eq!((image.width, image.height, image.channel_count), (3, 2, 4));
        assert_eq!(image.pixels.len(), image.expected_len());
        assert_eq!(&image.pixels[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_decode_jpeg_to_rgba() {
        let source = RgbImage::from_pixel(16, 8, Rgb([0, 0, 255]));
        let mut bytes = Vec::new();
        source
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .unwrap();

        let image = Decoder::default().decode(&bytes).unwrap();
        assert_eq!((image.width, image.height, image.channel_count), (16, 8, 4));
        assert_eq!(image.pixels.len(), 16 * 8 * 4);
        // Lossy, but alpha is always opaque
        assert!(image.pixels.chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn test_downscale_to_max_dimension() {
        let decoder = Decoder::new(DecodeConfig {
            max_dimension: Some(4),
            ..DecodeConfig::default()
        });
        let image = decoder.decode(&png_bytes(16, 8, [0, 255, 0, 255])).unwrap();
        assert_eq!((image.width, image.height), (4, 2));
        assert_eq!(image.pixels.len(), 4 * 2 * 4);
    }

    #[test]
    fn test_rejects_garbage() {
        let decoder = Decoder::default();
        assert!(matches!(decoder.decode(b""), Err(DecodeError::Empty)));
        assert!(matches!(
            decoder.decode(b"HTTP error code: 404"),
            Err(DecodeError::UnknownFormat)
        ));
        // Valid PNG signature, truncated body
        let mut truncated = png_bytes(4, 4, [0, 0, 0, 255]);
        truncated.truncate(20);
        assert!(decoder.decode(&truncated).is_err());
    }

    #[test]
    fn test_resize() {
        // 2x2 image, all red
        let src = vec![
            255, 0, 0, 255, 255, 0, 0, 255, 255, 0, 0, 255, 255, 0, 0, 255,
        ];
        let dst = Decoder::resize_bilinear(&src, 2, 2, 4, 4);

        assert_eq!(dst.len(), 4 * 4 * 4);
        assert_eq!(&dst[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_decode_batch_counts_failures() {
        let decoder = Decoder::default();
        let payloads = vec![
            RawPayload::new(png_bytes(2, 2, [1, 2, 3, 255])),
            RawPayload::from("not an image"),
            RawPayload::new(png_bytes(5, 1, [9, 9, 9, 255])),
        ];

        for parallel in [false, true] {
            let (images, failures) = decode_batch(&decoder, &payloads, parallel);
            assert_eq!(failures, 1);
            assert_eq!(images.len(), 2);
            // Order follows the payloads
            assert_eq!(images[0].width, 2);
            assert_eq!(images[1].width, 5);
        }
    }
}
