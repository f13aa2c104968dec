/// Thumbnail generation
///
/// Derives a scaled or cropped still (PNG) or animated (GIF) rendition of a
/// stored media record and persists it. Sources that already fit within the
/// requested box are passed through untouched rather than upscaled.
use crate::{
    error::{MediaError, MediaResult},
    store::{models::Media, persister::FilePersister},
};
use image::{
    codecs::gif::{GifDecoder, GifEncoder, Repeat},
    imageops::FilterType,
    AnimationDecoder, DynamicImage, Frame, ImageFormat,
};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const METHOD_SCALE: &str = "scale";
pub const METHOD_CROP: &str = "crop";

/// A derivative produced by the thumbnailer, not yet recorded in the
/// database. In the pass-through case `location` and `content_type` are the
/// source's own.
#[derive(Debug, Clone)]
pub struct GeneratedThumbnail {
    pub content_type: String,
    pub location: String,
    pub size_bytes: i64,
    pub animated: bool,
}

/// Generates thumbnail blobs from stored media
pub struct Thumbnailer {
    persister: Arc<FilePersister>,
    animated_types: Vec<String>,
}

impl Thumbnailer {
    pub fn new(persister: Arc<FilePersister>, animated_types: Vec<String>) -> Self {
        Self {
            persister,
            animated_types,
        }
    }

    /// Downgrade an animated request when the source type cannot animate.
    /// Callers keying records by the animated flag normalize with this
    /// before looking anything up.
    pub fn normalize_animated(&self, media: &Media, animated: bool) -> bool {
        if animated && !self.is_animated_type(&media.content_type) {
            warn!(
                "Animated thumbnail requested for {}/{} but {} cannot animate, assuming animated=false",
                media.origin, media.media_id, media.content_type
            );
            return false;
        }
        animated
    }

    /// Produce a thumbnail of `media` fitting within `width` x `height`.
    ///
    /// `method` is `scale` (fit, aspect preserved) or `crop` (fill and
    /// center-crop). Sources no larger than the box are returned untouched
    /// unless `force` is set, in which case the target is clamped to the
    /// source dimensions.
    pub async fn generate(
        &self,
        media: &Media,
        width: u32,
        height: u32,
        method: &str,
        animated: bool,
        force: bool,
    ) -> MediaResult<GeneratedThumbnail> {
        let animated = self.normalize_animated(media, animated);

        let source = tokio::fs::read(&media.location).await.map_err(|e| {
            error!("Error reading {}: {}", media.location, e);
            MediaError::Decode(format!("Failed to read {}: {}", media.location, e))
        })?;
        let decoded = image::load_from_memory(&source).map_err(|e| {
            error!("Error decoding {}/{}: {}", media.origin, media.media_id, e);
            MediaError::Decode(format!(
                "Failed to decode {}/{}: {}",
                media.origin, media.media_id, e
            ))
        })?;

        let src_width = decoded.width();
        let src_height = decoded.height();

        let mut method = method;
        let aspect_ratio = src_height as f32 / src_width as f32;
        let target_aspect_ratio = width as f32 / height as f32;
        if aspect_ratio == target_aspect_ratio {
            // Unlikely, but when the ratios agree a crop is just a resize
            info!("Aspect ratio matches the target, using scale");
            method = METHOD_SCALE;
        }

        let mut width = width;
        let mut height = height;
        if src_width <= width && src_height <= height {
            if force {
                warn!(
                    "Source is only {}x{} but generation is forced, clamping the target",
                    src_width, src_height
                );
                width = src_width;
                height = src_height;
            } else {
                info!(
                    "Source {}x{} already fits within {}x{}, passing it through",
                    src_width, src_height, width, height
                );
                return Ok(GeneratedThumbnail {
                    content_type: media.content_type.clone(),
                    location: media.location.clone(),
                    size_bytes: media.size_bytes,
                    animated,
                });
            }
        }

        let (content_type, encoded) = if animated {
            ("image/gif".to_string(), render_animated(&source, width, height, method)?)
        } else {
            ("image/png".to_string(), render_still(&decoded, width, height, method)?)
        };

        let location = self.persister.persist_bytes(&encoded).await?;
        let metadata = tokio::fs::metadata(&location).await.map_err(|e| {
            MediaError::Persist(format!("Failed to stat {}: {}", location, e))
        })?;

        Ok(GeneratedThumbnail {
            content_type,
            location,
            size_bytes: metadata.len() as i64,
            animated,
        })
    }

    fn is_animated_type(&self, content_type: &str) -> bool {
        self.animated_types.iter().any(|t| t == content_type)
    }
}

fn transform_frame(
    source: &DynamicImage,
    width: u32,
    height: u32,
    method: &str,
) -> MediaResult<DynamicImage> {
    match method {
        METHOD_SCALE => Ok(source.resize(width, height, FilterType::Lanczos3)),
        METHOD_CROP => Ok(source.resize_to_fill(width, height, FilterType::Lanczos3)),
        other => Err(MediaError::UnrecognizedMethod(other.to_string())),
    }
}

fn render_still(
    source: &DynamicImage,
    width: u32,
    height: u32,
    method: &str,
) -> MediaResult<Vec<u8>> {
    let thumb = transform_frame(source, width, height, method)?;

    let mut buffer = Cursor::new(Vec::new());
    thumb.write_to(&mut buffer, ImageFormat::Png).map_err(|e| {
        error!("Error encoding thumbnail: {}", e);
        MediaError::Encode(format!("Failed to encode PNG thumbnail: {}", e))
    })?;

    Ok(buffer.into_inner())
}

/// Animated GIFs are handled frame by frame, which is resource intensive;
/// callers are responsible for limiting how often this path runs.
fn render_animated(
    source: &[u8],
    width: u32,
    height: u32,
    method: &str,
) -> MediaResult<Vec<u8>> {
    let decoder = GifDecoder::new(Cursor::new(source)).map_err(|e| {
        error!("Error decoding animated thumbnail source: {}", e);
        MediaError::Decode(format!("Failed to decode GIF: {}", e))
    })?;
    let frames = decoder.into_frames().collect_frames().map_err(|e| {
        error!("Error decoding animated thumbnail frames: {}", e);
        MediaError::Decode(format!("Failed to decode GIF frames: {}", e))
    })?;

    let mut thumbs = Vec::with_capacity(frames.len());
    for frame in frames {
        let delay = frame.delay();
        let image = DynamicImage::ImageRgba8(frame.into_buffer());
        let thumb = transform_frame(&image, width, height, method)?.to_rgba8();
        thumbs.push(Frame::from_parts(thumb, 0, 0, delay));
    }

    let mut buffer = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buffer);
        encoder.set_repeat(Repeat::Infinite).map_err(|e| {
            error!("Error encoding animated thumbnail: {}", e);
            MediaError::Encode(format!("Failed to encode GIF thumbnail: {}", e))
        })?;
        encoder.encode_frames(thumbs).map_err(|e| {
            error!("Error encoding animated thumbnail: {}", e);
            MediaError::Encode(format!("Failed to encode GIF thumbnail: {}", e))
        })?;
    }

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::registry::DatastoreRegistry;
    use chrono::Utc;
    use image::RgbImage;
    use std::path::Path;
    use tempfile::tempdir;

    async fn create_test_thumbnailer(base: &Path) -> Thumbnailer {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let persister = Arc::new(FilePersister::new(
            DatastoreRegistry::new(pool),
            base.to_path_buf(),
        ));
        Thumbnailer::new(persister, vec!["image/gif".to_string()])
    }

    async fn write_png(path: &Path, width: u32, height: u32) -> Media {
        let img = RgbImage::new(width, height);
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        let bytes = buffer.into_inner();
        tokio::fs::write(path, &bytes).await.unwrap();

        media_record(path, "image/png", bytes.len() as i64)
    }

    async fn write_gif(path: &Path, width: u32, height: u32, frames: u32) -> Media {
        let mut source_frames = Vec::new();
        for i in 0..frames {
            let shade = (i * 80) as u8;
            let img = image::RgbaImage::from_pixel(
                width,
                height,
                image::Rgba([shade, 128, 255 - shade, 255]),
            );
            source_frames.push(Frame::new(img));
        }

        let mut buffer = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut buffer);
            encoder.set_repeat(Repeat::Infinite).unwrap();
            encoder.encode_frames(source_frames).unwrap();
        }
        tokio::fs::write(path, &buffer).await.unwrap();

        media_record(path, "image/gif", buffer.len() as i64)
    }

    fn media_record(path: &Path, content_type: &str, size_bytes: i64) -> Media {
        Media {
            origin: "example.test".to_string(),
            media_id: "testmedia".to_string(),
            upload_name: None,
            content_type: content_type.to_string(),
            user_id: None,
            sha256_hash: "unused".to_string(),
            size_bytes,
            location: path.to_string_lossy().into_owned(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_small_sources_pass_through() {
        let dir = tempdir().unwrap();
        let thumbnailer = create_test_thumbnailer(dir.path()).await;
        let media = write_png(&dir.path().join("small.png"), 200, 100).await;

        let thumb = thumbnailer
            .generate(&media, 400, 400, METHOD_SCALE, false, false)
            .await
            .unwrap();

        assert_eq!(thumb.location, media.location);
        assert_eq!(thumb.content_type, "image/png");
        assert_eq!(thumb.size_bytes, media.size_bytes);
    }

    #[tokio::test]
    async fn test_scale_preserves_aspect_ratio() {
        let dir = tempdir().unwrap();
        let thumbnailer = create_test_thumbnailer(dir.path()).await;
        let media = write_png(&dir.path().join("wide.png"), 800, 400).await;

        let thumb = thumbnailer
            .generate(&media, 400, 400, METHOD_SCALE, false, false)
            .await
            .unwrap();

        assert_eq!(thumb.content_type, "image/png");
        assert_ne!(thumb.location, media.location);

        let output = image::load_from_memory(&tokio::fs::read(&thumb.location).await.unwrap()).unwrap();
        assert_eq!((output.width(), output.height()), (400, 200));
    }

    #[tokio::test]
    async fn test_crop_fills_the_box_exactly() {
        let dir = tempdir().unwrap();
        let thumbnailer = create_test_thumbnailer(dir.path()).await;
        let media = write_png(&dir.path().join("wide.png"), 800, 400).await;

        let thumb = thumbnailer
            .generate(&media, 300, 300, METHOD_CROP, false, false)
            .await
            .unwrap();

        let output = image::load_from_memory(&tokio::fs::read(&thumb.location).await.unwrap()).unwrap();
        assert_eq!((output.width(), output.height()), (300, 300));
    }

    #[tokio::test]
    async fn test_matching_aspect_ratio_turns_crop_into_scale() {
        let dir = tempdir().unwrap();
        let thumbnailer = create_test_thumbnailer(dir.path()).await;
        // 600x600 source, 300x300 target: ratios agree exactly
        let media = write_png(&dir.path().join("square.png"), 600, 600).await;

        let thumb = thumbnailer
            .generate(&media, 300, 300, METHOD_CROP, false, false)
            .await
            .unwrap();

        let output = image::load_from_memory(&tokio::fs::read(&thumb.location).await.unwrap()).unwrap();
        assert_eq!((output.width(), output.height()), (300, 300));
    }

    #[tokio::test]
    async fn test_force_clamps_to_source_dimensions() {
        let dir = tempdir().unwrap();
        let thumbnailer = create_test_thumbnailer(dir.path()).await;
        let media = write_png(&dir.path().join("small.png"), 200, 100).await;

        let thumb = thumbnailer
            .generate(&media, 400, 400, METHOD_SCALE, false, true)
            .await
            .unwrap();

        assert_ne!(thumb.location, media.location);
        let output = image::load_from_memory(&tokio::fs::read(&thumb.location).await.unwrap()).unwrap();
        assert_eq!((output.width(), output.height()), (200, 100));
    }

    #[tokio::test]
    async fn test_unrecognized_method_is_rejected() {
        let dir = tempdir().unwrap();
        let thumbnailer = create_test_thumbnailer(dir.path()).await;
        let media = write_png(&dir.path().join("wide.png"), 800, 400).await;

        let result = thumbnailer
            .generate(&media, 400, 400, "stretch", false, false)
            .await;
        assert!(matches!(result, Err(MediaError::UnrecognizedMethod(_))));
    }

    #[tokio::test]
    async fn test_animated_request_on_still_source_downgrades() {
        let dir = tempdir().unwrap();
        let thumbnailer = create_test_thumbnailer(dir.path()).await;
        let media = write_png(&dir.path().join("wide.png"), 800, 400).await;

        let thumb = thumbnailer
            .generate(&media, 400, 400, METHOD_SCALE, true, false)
            .await
            .unwrap();

        assert!(!thumb.animated);
        assert_eq!(thumb.content_type, "image/png");
    }

    #[tokio::test]
    async fn test_animated_gif_is_thumbnailed_per_frame() {
        let dir = tempdir().unwrap();
        let thumbnailer = create_test_thumbnailer(dir.path()).await;
        let media = write_gif(&dir.path().join("anim.gif"), 100, 100, 3).await;

        let thumb = thumbnailer
            .generate(&media, 50, 50, METHOD_SCALE, true, false)
            .await
            .unwrap();

        assert!(thumb.animated);
        assert_eq!(thumb.content_type, "image/gif");

        let bytes = tokio::fs::read(&thumb.location).await.unwrap();
        let decoder = GifDecoder::new(Cursor::new(bytes.as_slice())).unwrap();
        let frames = decoder.into_frames().collect_frames().unwrap();
        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert!(frame.buffer().width() <= 50);
            assert!(frame.buffer().height() <= 50);
        }
    }

    #[tokio::test]
    async fn test_size_bytes_matches_the_persisted_file() {
        let dir = tempdir().unwrap();
        let thumbnailer = create_test_thumbnailer(dir.path()).await;
        let media = write_png(&dir.path().join("wide.png"), 800, 400).await;

        let thumb = thumbnailer
            .generate(&media, 400, 400, METHOD_SCALE, false, false)
            .await
            .unwrap();

        let metadata = tokio::fs::metadata(&thumb.location).await.unwrap();
        assert_eq!(thumb.size_bytes, metadata.len() as i64);
    }
}
