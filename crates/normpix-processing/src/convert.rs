//! JPEG conversion service.
//!
//! A conversion is a fixed pipeline over an in-memory buffer: decode,
//! apply EXIF orientation, flatten alpha onto white, encode with mozjpeg.
//! The pixel work runs on the blocking pool; the caller supplies a
//! [`ConversionTicket`] proving the engine admitted the request.

use std::io::Cursor;
use std::path::Path;

use image::{imageops, DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};

use crate::engine::ConversionTicket;
use crate::error::ConversionError;

/// One conversion job. Quality is clamped to the valid JPEG range at
/// construction so an out-of-range setting degrades instead of failing.
#[derive(Clone, Debug)]
pub struct ConversionRequest {
    pub data: Vec<u8>,
    pub source_filename: String,
    pub quality: u8,
}

impl ConversionRequest {
    pub fn new(data: Vec<u8>, source_filename: impl Into<String>, quality: u8) -> Self {
        Self {
            data,
            source_filename: source_filename.into(),
            quality: quality.min(100),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConversionResult {
    /// Encoded JPEG bytes.
    pub data: Vec<u8>,
    /// Source filename with its final extension replaced by `.jpg`.
    pub filename: String,
}

/// Stateless converter carrying the configured output quality.
#[derive(Clone, Copy, Debug)]
pub struct JpegConverter {
    quality: u8,
}

impl JpegConverter {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.min(100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn request(&self, data: Vec<u8>, source_filename: &str) -> ConversionRequest {
        ConversionRequest::new(data, source_filename, self.quality)
    }

    /// Run the pipeline for one admitted request. The ticket is consumed;
    /// its worker slot is released when the pixel work finishes, on success
    /// and on failure alike.
    pub async fn convert_to_jpeg(
        &self,
        ticket: ConversionTicket,
        request: ConversionRequest,
    ) -> Result<ConversionResult, ConversionError> {
        tokio::task::spawn_blocking(move || run_pipeline(ticket, request))
            .await
            .map_err(|e| ConversionError::EncodeFailed(format!("conversion task aborted: {e}")))?
    }
}

fn run_pipeline(
    ticket: ConversionTicket,
    request: ConversionRequest,
) -> Result<ConversionResult, ConversionError> {
    let engine = ticket.engine().clone();

    let (handle, format) = engine
        .decode(&request.data)
        .map_err(|e| ConversionError::DecodeFailed(e.to_string()))?;

    let orientation = read_orientation(&request.data, format)
        .map_err(|e| ConversionError::TransformFailed(e.to_string()))?;
    let handle = handle.map(|image| {
        Ok::<_, ConversionError>(apply_orientation(image, orientation))
    })?;

    let handle = if handle.image().color().has_alpha() {
        handle.map(|image| Ok::<_, ConversionError>(flatten_onto_white(&image)))?
    } else {
        handle
    };

    let data = encode_jpeg(handle.image(), request.quality)?;
    let filename = derive_jpeg_name(&request.source_filename);

    tracing::debug!(
        source = %request.source_filename,
        output = %filename,
        input_bytes = request.data.len(),
        output_bytes = data.len(),
        quality = request.quality,
        "Converted image to JPEG"
    );

    drop(handle);
    drop(ticket);
    Ok(ConversionResult { data, filename })
}

/// EXIF orientation of the source, 1 when absent. Only containers that can
/// carry EXIF are inspected; a missing segment is normal, a corrupt one is a
/// transform failure.
fn read_orientation(data: &[u8], format: Option<ImageFormat>) -> Result<u32, exif::Error> {
    match format {
        Some(ImageFormat::Jpeg | ImageFormat::Tiff | ImageFormat::Png | ImageFormat::WebP) => {}
        _ => return Ok(1),
    }

    match exif::Reader::new().read_from_container(&mut Cursor::new(data)) {
        Ok(metadata) => Ok(metadata
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1)),
        Err(exif::Error::NotFound(_)) => Ok(1),
        Err(e) => Err(e),
    }
}

fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate270().fliph(),
        6 => image.rotate90(),
        7 => image.rotate90().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Composite translucent pixels over an opaque white canvas. JPEG has no
/// alpha channel, so this fixes what transparency collapses to.
fn flatten_onto_white(image: &DynamicImage) -> DynamicImage {
    let (width, height) = image.dimensions();
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut canvas, &image.to_rgba8(), 0, 0);
    DynamicImage::ImageRgba8(canvas)
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ConversionError> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
    comp.set_size(width as usize, height as usize);
    comp.set_quality(quality as f32);
    comp.set_progressive_mode();
    comp.set_optimize_coding(true);

    let mut comp = comp
        .start_compress(Vec::new())
        .map_err(|e| ConversionError::EncodeFailed(e.to_string()))?;
    comp.write_scanlines(&rgb)
        .map_err(|e| ConversionError::EncodeFailed(e.to_string()))?;
    comp.finish()
        .map_err(|e| ConversionError::EncodeFailed(e.to_string()))
}

/// `photo.HEIC` becomes `photo.jpg`; a name without an extension just gains
/// one.
pub fn derive_jpeg_name(source_filename: &str) -> String {
    let stem = Path::new(source_filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(source_filename);
    format!("{stem}.jpg")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineSettings, ImageEngine};
    use img_parts::jpeg::Jpeg;
    use img_parts::{Bytes, ImageEXIF};
    use std::sync::Arc;

    // Minimal little-endian TIFF body holding a single orientation tag.
    fn exif_orientation(orientation: u16) -> Vec<u8> {
        let mut body = vec![
            0x49, 0x49, 0x2A, 0x00, // II, magic 42
            0x08, 0x00, 0x00, 0x00, // first IFD at offset 8
            0x01, 0x00, // one entry
            0x12, 0x01, // tag 0x0112 Orientation
            0x03, 0x00, // type SHORT
            0x01, 0x00, 0x00, 0x00, // count 1
        ];
        body.extend_from_slice(&orientation.to_le_bytes());
        body.extend_from_slice(&[0x00, 0x00]); // value padding
        body.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // no next IFD
        body
    }

    fn png_bytes(width: u32, height: u32, pixel: Rgba<u8>) -> Vec<u8> {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, pixel));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn jpeg_with_orientation(width: u32, height: u32, orientation: u16) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Jpeg).unwrap();

        let mut jpeg = Jpeg::from_bytes(Bytes::from(out.into_inner())).unwrap();
        jpeg.set_exif(Some(Bytes::from(exif_orientation(orientation))));
        jpeg.encoder().bytes().to_vec()
    }

    fn ready_engine() -> Arc<ImageEngine> {
        let engine = Arc::new(ImageEngine::new());
        engine.initialize(EngineSettings::default()).unwrap();
        engine
    }

    #[test]
    fn quality_is_clamped_to_jpeg_range() {
        assert_eq!(JpegConverter::new(180).quality(), 100);
        assert_eq!(JpegConverter::new(85).quality(), 85);
        assert_eq!(ConversionRequest::new(Vec::new(), "a.png", 200).quality, 100);
    }

    #[test]
    fn derived_name_replaces_final_extension() {
        assert_eq!(derive_jpeg_name("photo.HEIC"), "photo.jpg");
        assert_eq!(derive_jpeg_name("scan.tiff"), "scan.jpg");
        assert_eq!(derive_jpeg_name("archive.tar.gz"), "archive.tar.jpg");
        assert_eq!(derive_jpeg_name("noext"), "noext.jpg");
    }

    #[tokio::test]
    async fn transparent_pixels_flatten_to_white() {
        let engine = ready_engine();
        let converter = JpegConverter::new(95);
        let data = png_bytes(8, 8, Rgba([0, 0, 0, 0]));

        let ticket = engine.clone().begin_conversion().await.unwrap();
        let result = converter
            .convert_to_jpeg(ticket, converter.request(data, "overlay.png"))
            .await
            .unwrap();

        let decoded = image::load_from_memory(&result.data).unwrap();
        assert!(!decoded.color().has_alpha());
        let pixel = decoded.to_rgb8().get_pixel(4, 4).0;
        for channel in pixel {
            assert!(channel >= 250, "expected near-white, got {pixel:?}");
        }
    }

    #[tokio::test]
    async fn exif_orientation_six_swaps_dimensions() {
        let engine = ready_engine();
        let converter = JpegConverter::new(90);
        let data = jpeg_with_orientation(6, 2, 6);

        let ticket = engine.clone().begin_conversion().await.unwrap();
        let result = converter
            .convert_to_jpeg(ticket, converter.request(data, "rotated.jpg"))
            .await
            .unwrap();

        let decoded = image::load_from_memory(&result.data).unwrap();
        assert_eq!(decoded.dimensions(), (2, 6));
    }

    #[tokio::test]
    async fn missing_exif_means_identity_orientation() {
        let engine = ready_engine();
        let converter = JpegConverter::new(90);
        let data = png_bytes(6, 2, Rgba([80, 90, 100, 255]));

        let ticket = engine.clone().begin_conversion().await.unwrap();
        let result = converter
            .convert_to_jpeg(ticket, converter.request(data, "plain.png"))
            .await
            .unwrap();

        let decoded = image::load_from_memory(&result.data).unwrap();
        assert_eq!(decoded.dimensions(), (6, 2));
    }

    #[tokio::test]
    async fn corrupt_exif_fails_transform_without_leaking_handles() {
        let engine = ready_engine();
        let converter = JpegConverter::new(90);

        let image = DynamicImage::ImageRgb8(image::RgbImage::new(4, 4));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Jpeg).unwrap();
        let mut jpeg = Jpeg::from_bytes(Bytes::from(out.into_inner())).unwrap();
        // An EXIF segment that is not a TIFF stream at all.
        jpeg.set_exif(Some(Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef])));
        let data = jpeg.encoder().bytes().to_vec();

        let ticket = engine.clone().begin_conversion().await.unwrap();
        let err = converter
            .convert_to_jpeg(ticket, converter.request(data, "mangled.jpg"))
            .await
            .unwrap_err();

        assert!(matches!(err, ConversionError::TransformFailed(_)));
        assert_eq!(engine.live_handles(), 0);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn truncated_input_fails_decode_without_leaking_handles() {
        let engine = ready_engine();
        let converter = JpegConverter::new(90);
        let full = png_bytes(16, 16, Rgba([1, 2, 3, 255]));
        let truncated = full[..full.len() / 2].to_vec();

        for _ in 0..5 {
            let ticket = engine.clone().begin_conversion().await.unwrap();
            let err = converter
                .convert_to_jpeg(ticket, converter.request(truncated.clone(), "broken.png"))
                .await
                .unwrap_err();
            assert!(matches!(err, ConversionError::DecodeFailed(_)));
        }

        assert_eq!(engine.live_handles(), 0);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn output_decodes_as_jpeg_with_expected_name() {
        let engine = ready_engine();
        let converter = JpegConverter::new(100);
        let data = png_bytes(10, 10, Rgba([200, 50, 50, 255]));

        let ticket = engine.clone().begin_conversion().await.unwrap();
        let result = converter
            .convert_to_jpeg(ticket, converter.request(data, "photo.HEIC"))
            .await
            .unwrap();

        assert_eq!(result.filename, "photo.jpg");
        let format = image::guess_format(&result.data).unwrap();
        assert_eq!(format, ImageFormat::Jpeg);
    }
}
