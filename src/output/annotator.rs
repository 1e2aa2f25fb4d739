// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 标注绘制: 检测框、标签、坐标文字

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ab_glyph::{FontArc, PxScale};
use anyhow::Result;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{info, warn};

use crate::detection::TaggedPerson;
use crate::{Bbox, DetectError};

pub const FONT_URL: &str = "https://ultralytics.com/assets/Arial.ttf";

pub const PERSON_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const NAME_TAG_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// 画框线宽
pub const LINE_THICKNESS: u32 = 1;
/// 框标签字号 (线宽为 1 时)
const LABEL_SCALE: f32 = 12.0;
/// 左下角坐标文字字号
const INFO_SCALE: f32 = 16.0;

pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    /// 指定字体文件必须可用; 未指定时使用缓存或下载的 Arial, 失败则只画框
    pub fn load(font: Option<&Path>) -> Result<Self> {
        if let Some(path) = font {
            let buffer = std::fs::read(path)
                .map_err(|e| DetectError::Font(format!("{}: {}", path.display(), e)))?;
            let font = FontArc::try_from_vec(buffer)
                .map_err(|e| DetectError::Font(format!("{}: {}", path.display(), e)))?;
            return Ok(Self::new(Some(font)));
        }

        match load_default_font() {
            Ok(font) => Ok(Self::new(Some(font))),
            Err(e) => {
                warn!("⚠️ 字体不可用, 仅绘制检测框: {}", e);
                Ok(Self::new(None))
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 画一个框, 标签画在左上角上方 (实心底色 + 白字)
    pub fn plot_one_box(
        &self,
        img: &mut RgbImage,
        bbox: &Bbox,
        label: Option<&str>,
        color: Rgb<u8>,
        thickness: u32,
    ) {
        let tl = thickness.max(1);
        let (x1, y1) = (bbox.xmin().round() as i32, bbox.ymin().round() as i32);
        let (x2, y2) = (bbox.xmax().round() as i32, bbox.ymax().round() as i32);
        for i in 0..tl as i32 {
            let w = (x2 - x1 + 1 - 2 * i).max(1) as u32;
            let h = (y2 - y1 + 1 - 2 * i).max(1) as u32;
            draw_hollow_rect_mut(img, Rect::at(x1 + i, y1 + i).of_size(w, h), color);
        }

        let (Some(font), Some(label)) = (self.font.as_ref(), label) else {
            return;
        };
        let scale = PxScale::from(LABEL_SCALE * tl as f32);
        let (tw, th) = text_size(scale, font, label);
        let top = y1 - th as i32 - 3;
        draw_filled_rect_mut(
            img,
            Rect::at(x1, top).of_size(tw.max(1), th + 3),
            color,
        );
        draw_text_mut(img, TEXT_COLOR, x1, top + 1, scale, font, label);
    }

    /// 文字左下角位于 (x, baseline)
    pub fn put_text(&self, img: &mut RgbImage, text: &str, x: i32, baseline: i32, color: Rgb<u8>) {
        let Some(font) = self.font.as_ref() else {
            return;
        };
        let scale = PxScale::from(INFO_SCALE);
        let (_, th) = text_size(scale, font, text);
        draw_text_mut(img, color, x, baseline - th as i32, scale, font, text);
    }

    /// 画出所有匹配: 人员绿框, 胸牌蓝框, 左下角两行坐标 (后画的覆盖先画的)
    pub fn draw_matches(&self, img: &mut RgbImage, matches: &[TaggedPerson]) {
        let h = img.height() as i32;
        for m in matches {
            self.plot_one_box(img, &m.person, Some("Person"), PERSON_COLOR, LINE_THICKNESS);
            self.plot_one_box(img, &m.tag, Some("Person"), NAME_TAG_COLOR, LINE_THICKNESS);
            self.put_text(img, &xy_text("XY Person", &m.person), 20, h - 40, PERSON_COLOR);
            self.put_text(img, &xy_text("XY Name Tag", &m.tag), 20, h - 20, NAME_TAG_COLOR);
        }
    }
}

/// `XY Person: (x1, y1, x2, y2)`
pub fn xy_text(prefix: &str, bbox: &Bbox) -> String {
    let [x1, y1, x2, y2] = bbox.xyxy();
    format!(
        "{}: ({}, {}, {}, {})",
        prefix, x1 as i32, y1 as i32, x2 as i32, y2 as i32
    )
}

fn font_cache_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("Ultralytics")
        .join("Arial.ttf")
}

/// 读取缓存字体, 不存在时下载
fn load_default_font() -> Result<FontArc> {
    let path = font_cache_path();
    if path.exists() {
        let buffer = std::fs::read(&path)?;
        return FontArc::try_from_vec(buffer)
            .map_err(|e| DetectError::Font(format!("{}: {}", path.display(), e)).into());
    }

    info!("⬇️ Downloading font: {}", FONT_URL);
    let resp = ureq::get(FONT_URL)
        .timeout(Duration::from_secs(60))
        .call()
        .map_err(|e| DetectError::Font(format!("Failed to download {}: {}", FONT_URL, e)))?;
    let mut buffer = vec![];
    resp.into_reader().read_to_end(&mut buffer)?;
    let font = FontArc::try_from_vec(buffer.clone())
        .map_err(|e| DetectError::Font(format!("{}: {}", FONT_URL, e)))?;

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut writer = std::io::BufWriter::new(std::fs::File::create(&path)?);
    writer.write_all(&buffer)?;
    info!("✅ Font saved at: {}", path.display());
    Ok(font)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(img: &RgbImage, x: u32, y: u32) -> Rgb<u8> {
        *img.get_pixel(x, y)
    }

    #[test]
    fn test_xy_text() {
        let b = Bbox::from_xyxy(10.7, 20.2, 110.9, 220.0, 0, 0.9);
        assert_eq!(xy_text("XY Person", &b), "XY Person: (10, 20, 110, 220)");
    }

    #[test]
    fn test_plot_box_without_font() {
        let annotator = Annotator::new(None);
        assert!(!annotator.has_font());
        let mut img = RgbImage::new(50, 50);
        let b = Bbox::from_xyxy(10., 10., 30., 40., 0, 0.9);
        annotator.plot_one_box(&mut img, &b, Some("Person"), PERSON_COLOR, 1);
        assert_eq!(pixel(&img, 10, 10), PERSON_COLOR);
        assert_eq!(pixel(&img, 30, 40), PERSON_COLOR);
        assert_eq!(pixel(&img, 20, 25), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_matches_colors() {
        let annotator = Annotator::new(None);
        let mut img = RgbImage::new(100, 100);
        let m = TaggedPerson {
            person: Bbox::from_xyxy(5., 5., 90., 90., 0, 0.9),
            tag: Bbox::from_xyxy(20., 20., 40., 30., 0, 0.8),
        };
        annotator.draw_matches(&mut img, &[m]);
        assert_eq!(pixel(&img, 5, 50), PERSON_COLOR);
        assert_eq!(pixel(&img, 20, 25), NAME_TAG_COLOR);
    }

    #[test]
    fn test_missing_font_file_is_error() {
        let err = Annotator::load(Some(Path::new("/no/such/font.ttf"))).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<DetectError>(),
            Some(DetectError::Font(_))
        ));
    }
}
