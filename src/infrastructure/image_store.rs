//! 图像存储 - 基础设施层
//!
//! 持有解码后的图像，只暴露"按边界框裁剪"的能力

use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use tracing::debug;

use crate::error::{AppResult, ImageError};
use crate::models::BBox;

/// 一张已归一化（RGB、最长边受限）的图像
///
/// 职责：
/// - 持有解码后的图像
/// - 暴露 crop() 能力
/// - 不认识 Figure / Panel
pub struct FigureImage {
    image: DynamicImage,
    path: Option<PathBuf>,
}

impl FigureImage {
    /// 打开图像文件，转换为 RGB 并缩放到最长边不超过 `max_size`
    pub fn open(path: &Path, max_size: u32) -> AppResult<Self> {
        let image = image::open(path).map_err(|e| ImageError::OpenFailed {
            path: path.display().to_string(),
            source: Box::new(e),
        })?;

        debug!(
            "已打开图像 {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );

        Ok(Self {
            image: normalize(image, max_size),
            path: Some(path.to_path_buf()),
        })
    }

    /// 直接包装内存中的图像
    pub fn from_image(image: DynamicImage, max_size: u32) -> Self {
        Self {
            image: normalize(image, max_size),
            path: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 按相对坐标裁剪并编码为 PNG
    pub fn crop(&self, bbox: &BBox) -> AppResult<PanelImage> {
        let (width, height) = (self.width(), self.height());
        let (left, top, right, bottom) = bbox.to_pixels(width, height);
        let (right, bottom) = (right.min(width), bottom.min(height));

        if right <= left || bottom <= top {
            return Err(ImageError::EmptyCrop {
                bbox: (*bbox).into(),
                width,
                height,
            }
            .into());
        }

        let panel = self
            .image
            .crop_imm(left, top, right - left, bottom - top);

        let mut png = Vec::new();
        panel
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| ImageError::EncodeFailed { source: Box::new(e) })?;

        Ok(PanelImage {
            png,
            width: panel.width(),
            height: panel.height(),
        })
    }
}

/// 裁剪出的子图（PNG 编码）
#[derive(Debug, Clone)]
pub struct PanelImage {
    png: Vec<u8>,
    width: u32,
    height: u32,
}

impl PanelImage {
    pub fn is_empty(&self) -> bool {
        self.png.is_empty()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.png)
    }

    /// 用于视觉模型请求的 data URL
    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", self.base64())
    }
}

fn normalize(image: DynamicImage, max_size: u32) -> DynamicImage {
    let image = match image {
        DynamicImage::ImageRgb8(_) => image,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    };

    if image.width() <= max_size && image.height() <= max_size {
        return image;
    }

    let resized = image.resize(max_size, max_size, FilterType::Lanczos3);
    debug!(
        "图像缩放: {}x{} -> {}x{}",
        image.width(),
        image.height(),
        resized.width(),
        resized.height()
    );
    resized
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, RgbaImage};

    fn test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 10, 10])))
    }

    #[test]
    fn test_normalize_converts_and_downscales() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::new(400, 100));
        let figure = FigureImage::from_image(rgba, 200);
        assert_eq!((figure.width(), figure.height()), (200, 50));
        assert!(matches!(figure.image, DynamicImage::ImageRgb8(_)));
    }

    #[test]
    fn test_small_image_untouched() {
        let figure = FigureImage::from_image(test_image(100, 80), 2048);
        assert_eq!((figure.width(), figure.height()), (100, 80));
    }

    #[test]
    fn test_crop_uses_relative_coordinates() {
        let figure = FigureImage::from_image(test_image(100, 200), 2048);
        let panel = figure.crop(&BBox::new(0.1, 0.25, 0.5, 0.75)).unwrap();
        assert_eq!(panel.dimensions(), (40, 100));
        assert!(!panel.is_empty());
        assert!(panel.data_url().starts_with("data:image/png;base64,iVBOR"));
    }

    #[test]
    fn test_crop_rejects_empty_region() {
        let figure = FigureImage::from_image(test_image(10, 10), 2048);
        let err = figure.crop(&BBox::new(0.51, 0.5, 0.55, 0.9)).unwrap_err();
        assert!(matches!(
            err,
            crate::error::AppError::Image(ImageError::EmptyCrop { .. })
        ));
    }

    #[test]
    fn test_open_missing_file() {
        let result = FigureImage::open(Path::new("/nonexistent/figure.png"), 2048);
        assert!(result.is_err());
    }
}
