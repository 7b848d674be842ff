use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cancel::{Staged, ensure_live};
use super::external::ToolRunner;
use super::traits::{ConversionError, Converter};

/// Raster conversion in-process; vector input or output and anything the
/// decoder rejects go to the external rasterizer.
#[derive(Debug, Clone)]
pub struct ImageHandler {
    tools: ToolRunner,
    rasterizer: String,
}

impl ImageHandler {
    pub fn new(tools: ToolRunner, rasterizer: impl Into<String>) -> Self {
        Self {
            tools,
            rasterizer: rasterizer.into(),
        }
    }

    async fn rasterize(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ConversionError> {
        self.tools
            .run(&self.rasterizer, [input.as_os_str(), output.as_os_str()], cancel)
            .await
    }
}

fn is_svg(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("svg"))
}

/// JPEG has no alpha channel
fn prepare_for(format: ImageFormat, img: DynamicImage) -> DynamicImage {
    match format {
        ImageFormat::Jpeg if img.color().has_alpha() => DynamicImage::ImageRgb8(img.to_rgb8()),
        _ => img,
    }
}

fn convert_raster(
    input: &Path,
    output: &Path,
    cancel: &CancellationToken,
) -> Result<(), ConversionError> {
    let format = ImageFormat::from_path(output)
        .map_err(|e| ConversionError::Processing(format!("output format: {e}")))?;
    let img = image::open(input)
        .map_err(|e| ConversionError::Processing(format!("decode: {e}")))?;
    ensure_live(cancel)?;

    let staged = Staged::next_to(output)?;
    prepare_for(format, img)
        .save_with_format(staged.path(), format)
        .map_err(|e| ConversionError::Processing(format!("encode: {e}")))?;
    staged.persist(output, cancel)
}

#[async_trait]
impl Converter for ImageHandler {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ConversionError> {
        if is_svg(input) || is_svg(output) {
            return self.rasterize(input, output, cancel).await;
        }

        let (src, dst): (PathBuf, PathBuf) = (input.to_path_buf(), output.to_path_buf());
        let token = cancel.clone();
        match tokio::task::spawn_blocking(move || convert_raster(&src, &dst, &token)).await? {
            Ok(()) => {
                debug!("Image converted in-process");
                Ok(())
            }
            Err(ConversionError::Cancelled) => Err(ConversionError::Cancelled),
            Err(err) => {
                warn!(error = %err, "In-process image conversion failed, using rasterizer");
                let _ = tokio::fs::remove_file(output).await;
                self.rasterize(input, output, cancel).await
            }
        }
    }

    fn name(&self) -> &'static str {
        "image"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};
    use std::time::Duration;
    use tempfile::TempDir;

    fn handler() -> ImageHandler {
        ImageHandler::new(ToolRunner::new(Duration::from_secs(5)), "convertbox-no-rasterizer")
    }

    #[tokio::test]
    async fn test_png_to_jpeg_drops_alpha() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("pixel.png");
        let output = dir.path().join("pixel.jpg");
        RgbaImage::from_pixel(4, 3, Rgba([200, 10, 10, 128]))
            .save(&input)
            .unwrap();

        handler()
            .convert(&input, &output, &CancellationToken::new())
            .await
            .unwrap();

        let decoded = image::open(&output).unwrap();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert!(!decoded.color().has_alpha());
    }

    #[tokio::test]
    async fn test_undecodable_input_falls_back_to_rasterizer() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("broken.png");
        let output = dir.path().join("broken.webp");
        std::fs::write(&input, b"not an image").unwrap();

        let err = handler()
            .convert(&input, &output, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::ExternalToolFailed { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn test_svg_detection() {
        assert!(is_svg(Path::new("logo.SVG")));
        assert!(!is_svg(Path::new("logo.png")));
    }
}
