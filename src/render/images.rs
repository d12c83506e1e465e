//! Image sniffing, decoding and sizing.

use std::io::{Cursor, Write};

use flate2::{write::ZlibEncoder, Compression};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, Limits};
use thiserror::Error;

use super::pdf::{ColorSpace, ImageFilter, PdfImage};

const PNG_SIGNATURE: [u8; 4] = [0x89, 0x50, 0x4E, 0x47];

/// Longest edge, in pixels, of re-encoded samples. Larger than either side of
/// any supported page in points, so downscaling never changes the placed size.
pub const MAX_EMBED_EDGE: u32 = 1200;

/// Images declaring a wider or taller frame are refused before decoding.
pub const MAX_DECODE_EDGE: u32 = 12_000;

/// Why a single image could not be embedded. Always isolated to that image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ResourceFetchError {
    #[error("request for {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("request for {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{url} exceeds the {limit} byte image limit")]
    TooLarge { url: String, limit: usize },
    #[error("no image registered for {url}")]
    NotFound { url: String },
    #[error("could not decode {url}: {message}")]
    Decode { url: String, message: String },
}

impl ResourceFetchError {
    pub fn url(&self) -> &str {
        match self {
            ResourceFetchError::Transport { url, .. }
            | ResourceFetchError::Status { url, .. }
            | ResourceFetchError::TooLarge { url, .. }
            | ResourceFetchError::NotFound { url }
            | ResourceFetchError::Decode { url, .. } => url,
        }
    }

    fn decode(url: &str, message: impl ToString) -> Self {
        ResourceFetchError::Decode {
            url: url.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffedFormat {
    Png,
    Jpeg,
}

/// PNG when the signature matches, JPEG otherwise.
pub fn sniff_format(bytes: &[u8]) -> SniffedFormat {
    if bytes.starts_with(&PNG_SIGNATURE) {
        SniffedFormat::Png
    } else {
        SniffedFormat::Jpeg
    }
}

/// Decodes fetched bytes into an embeddable image.
///
/// PNGs are downscaled to [`MAX_EMBED_EDGE`] and stored as Flate-compressed
/// gray or RGB samples (alpha is dropped). JPEGs are fully decoded to validate
/// them, then embedded as the original DCT stream when their frame is 8-bit
/// gray or RGB; any other frame is re-encoded like a PNG.
pub fn decode_image(url: &str, bytes: &[u8]) -> Result<PdfImage, ResourceFetchError> {
    match sniff_format(bytes) {
        SniffedFormat::Png => {
            let decoded = load(url, bytes, ImageFormat::Png)?;
            flate_samples(url, decoded)
        }
        SniffedFormat::Jpeg => {
            let decoded = load(url, bytes, ImageFormat::Jpeg)?;
            embed_jpeg(url, bytes, decoded)
        }
    }
}

fn load(url: &str, bytes: &[u8], format: ImageFormat) -> Result<DynamicImage, ResourceFetchError> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DECODE_EDGE);
    limits.max_image_height = Some(MAX_DECODE_EDGE);
    let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
    reader.limits(limits);
    reader.decode().map_err(|err| ResourceFetchError::decode(url, err))
}

fn embed_jpeg(url: &str, bytes: &[u8], decoded: DynamicImage) -> Result<PdfImage, ResourceFetchError> {
    let Some(color_space) = jpeg_frame(bytes).and_then(JpegFrame::passthrough_color_space) else {
        return flate_samples(url, decoded);
    };
    Ok(PdfImage {
        width: decoded.width(),
        height: decoded.height(),
        color_space,
        filter: ImageFilter::Dct,
        data: bytes.to_vec(),
    })
}

fn flate_samples(url: &str, decoded: DynamicImage) -> Result<PdfImage, ResourceFetchError> {
    let decoded = if decoded.width().max(decoded.height()) > MAX_EMBED_EDGE {
        decoded.resize(MAX_EMBED_EDGE, MAX_EMBED_EDGE, FilterType::Triangle)
    } else {
        decoded
    };
    let (width, height) = (decoded.width(), decoded.height());
    let (color_space, samples) = if decoded.color().has_color() {
        (ColorSpace::DeviceRgb, decoded.into_rgb8().into_raw())
    } else {
        (ColorSpace::DeviceGray, decoded.into_luma8().into_raw())
    };

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(samples.len() / 4), Compression::default());
    encoder
        .write_all(&samples)
        .map_err(|err| ResourceFetchError::decode(url, format!("compressing samples: {err}")))?;
    let data = encoder
        .finish()
        .map_err(|err| ResourceFetchError::decode(url, format!("compressing samples: {err}")))?;

    Ok(PdfImage {
        width,
        height,
        color_space,
        filter: ImageFilter::Flate,
        data,
    })
}

/// Start-of-frame header of a JPEG stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JpegFrame {
    marker: u8,
    precision: u8,
    components: u8,
}

impl JpegFrame {
    /// Color space a viewer's DCT decoder will produce from this frame, if the
    /// stream can be embedded unchanged. Only baseline, extended and
    /// progressive 8-bit frames qualify.
    fn passthrough_color_space(self) -> Option<ColorSpace> {
        if !matches!(self.marker, 0xC0..=0xC2) || self.precision != 8 {
            return None;
        }
        match self.components {
            1 => Some(ColorSpace::DeviceGray),
            3 => Some(ColorSpace::DeviceRgb),
            _ => None,
        }
    }
}

/// Walks the marker segments up to the first SOFn.
fn jpeg_frame(bytes: &[u8]) -> Option<JpegFrame> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut pos = 2;
    while pos + 1 < bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        match marker {
            // fill byte
            0xFF => {
                pos += 1;
                continue;
            }
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            0xD9 | 0xDA => return None,
            _ => {}
        }
        pos += 2;
        let length = usize::from(u16::from_be_bytes([*bytes.get(pos)?, *bytes.get(pos + 1)?]));
        if matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC) {
            return Some(JpegFrame {
                marker,
                precision: *bytes.get(pos + 2)?,
                components: *bytes.get(pos + 7)?,
            });
        }
        if length < 2 {
            return None;
        }
        pos += length;
    }
    None
}

/// Fits `src` into `max` preserving aspect ratio, never upscaling.
pub fn fit_rect(src_width: f64, src_height: f64, max_width: f64, max_height: f64) -> (f64, f64) {
    if src_width <= 0.0 || src_height <= 0.0 {
        return (0.0, 0.0);
    }
    let scale = (max_width / src_width).min(max_height / src_height).min(1.0);
    (src_width * scale, src_height * scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use image::{GrayImage, Rgb, RgbImage};
    use std::io::Read;

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        encode(DynamicImage::ImageRgb8(RgbImage::new(width, height)), ImageFormat::Png)
    }

    fn inflate(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        ZlibDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    /// SOI, an Adobe APP14 segment and a 4-component baseline frame header.
    fn cmyk_header() -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xEE, 0x00, 0x0E];
        bytes.extend_from_slice(b"Adobe");
        bytes.extend_from_slice(&[0, 100, 0, 0, 0, 0, 2]);
        bytes.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x14, 8, 0, 4, 0, 4, 4]);
        for id in 1..=4 {
            bytes.extend_from_slice(&[id, 0x11, 0]);
        }
        bytes.extend_from_slice(&[0xFF, 0xD9]);
        bytes
    }

    #[test]
    fn sniffs_png_signature() {
        assert_eq!(sniff_format(&png_bytes(1, 1)), SniffedFormat::Png);
        assert_eq!(sniff_format(b"\xFF\xD8\xFF"), SniffedFormat::Jpeg);
        assert_eq!(sniff_format(b"garbage"), SniffedFormat::Jpeg);
    }

    #[test]
    fn png_is_flate_compressed_rgb() {
        let image = decode_image("https://x/a.png", &png_bytes(4, 2)).unwrap();
        assert_eq!((image.width, image.height), (4, 2));
        assert_eq!(image.filter, ImageFilter::Flate);
        assert_eq!(image.color_space, ColorSpace::DeviceRgb);
        assert_eq!(inflate(&image.data).len(), 4 * 2 * 3);
    }

    #[test]
    fn gray_png_stays_gray() {
        let bytes = encode(DynamicImage::ImageLuma8(GrayImage::new(5, 3)), ImageFormat::Png);
        let image = decode_image("https://x/g.png", &bytes).unwrap();
        assert_eq!(image.color_space, ColorSpace::DeviceGray);
        assert_eq!(inflate(&image.data).len(), 5 * 3);
    }

    #[test]
    fn large_png_is_downscaled_without_changing_placement() {
        let photo = RgbImage::from_pixel(3000, 2000, Rgb([200, 120, 40]));
        let bytes = encode(DynamicImage::ImageRgb8(photo), ImageFormat::Png);
        let image = decode_image("https://x/big.png", &bytes).unwrap();

        assert_eq!((image.width, image.height), (1200, 800));
        assert_eq!(inflate(&image.data).len(), 1200 * 800 * 3);
        assert!(image.data.len() < 100_000, "embedded {} bytes", image.data.len());

        let (w, h) = fit_rect(f64::from(image.width), f64::from(image.height), 532.0, 300.0);
        let (ow, oh) = fit_rect(3000.0, 2000.0, 532.0, 300.0);
        assert!((w - ow).abs() < 1e-6 && (h - oh).abs() < 1e-6);
    }

    #[test]
    fn oversized_frame_is_refused_before_decoding() {
        let bytes = png_bytes(MAX_DECODE_EDGE + 1, 1);
        let err = decode_image("https://x/wide.png", &bytes).unwrap_err();
        assert!(matches!(err, ResourceFetchError::Decode { .. }));
    }

    #[test]
    fn gray_jpeg_passes_through() {
        let bytes = encode(DynamicImage::ImageLuma8(GrayImage::new(8, 8)), ImageFormat::Jpeg);
        let image = decode_image("https://x/a.jpg", &bytes).unwrap();
        assert_eq!(image.filter, ImageFilter::Dct);
        assert_eq!(image.color_space, ColorSpace::DeviceGray);
        assert_eq!(image.data, bytes);
    }

    #[test]
    fn rgb_jpeg_color_space_comes_from_the_frame() {
        let bytes = encode(DynamicImage::ImageRgb8(RgbImage::new(8, 8)), ImageFormat::Jpeg);
        let frame = jpeg_frame(&bytes).unwrap();
        assert_eq!((frame.precision, frame.components), (8, 3));
        let image = decode_image("https://x/c.jpg", &bytes).unwrap();
        assert_eq!(image.filter, ImageFilter::Dct);
        assert_eq!(image.color_space, ColorSpace::DeviceRgb);
    }

    #[test]
    fn four_component_jpeg_is_reencoded() {
        let header = cmyk_header();
        let frame = jpeg_frame(&header).unwrap();
        assert_eq!(frame.components, 4);
        assert_eq!(frame.passthrough_color_space(), None);

        let decoded = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let image = embed_jpeg("https://x/cmyk.jpg", &header, decoded).unwrap();
        assert_eq!(image.filter, ImageFilter::Flate);
        assert_eq!(image.color_space, ColorSpace::DeviceRgb);
        assert_eq!(inflate(&image.data).len(), 4 * 4 * 3);
    }

    #[test]
    fn frame_scan_stops_at_truncated_input() {
        assert_eq!(jpeg_frame(b"not a jpeg"), None);
        assert_eq!(jpeg_frame(&[0xFF, 0xD8, 0xFF, 0xC0, 0x00]), None);
        assert_eq!(jpeg_frame(&[0xFF, 0xD8, 0xFF, 0xDA, 0x00, 0x08]), None);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode_image("https://x/broken", b"not an image").unwrap_err();
        assert!(matches!(err, ResourceFetchError::Decode { .. }));
        assert_eq!(err.url(), "https://x/broken");
    }

    #[test]
    fn fit_rect_never_upscales() {
        assert_eq!(fit_rect(100.0, 50.0, 500.0, 500.0), (100.0, 50.0));
        assert_eq!(fit_rect(1000.0, 500.0, 500.0, 500.0), (500.0, 250.0));
        assert_eq!(fit_rect(500.0, 1000.0, 500.0, 250.0), (125.0, 250.0));
        assert_eq!(fit_rect(0.0, 10.0, 100.0, 100.0), (0.0, 0.0));
    }
}
