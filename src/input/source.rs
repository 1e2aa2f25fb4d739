// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 输入源识别: 图片/视频文件、目录、摄像头、网络流

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use crate::DetectError;

/// 支持的图片后缀
pub const IMG_FORMATS: [&str; 9] = ["bmp", "jpg", "jpeg", "png", "tif", "tiff", "dng", "webp", "mpo"];
/// 支持的视频后缀
pub const VID_FORMATS: [&str; 8] = ["mov", "avi", "mp4", "mpg", "mpeg", "m4v", "wmv", "mkv"];

const STREAM_SCHEMES: [&str; 4] = ["rtsp://", "rtmp://", "http://", "https://"];

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_image(path: &Path) -> bool {
    extension(path).is_some_and(|e| IMG_FORMATS.contains(&e.as_str()))
}

pub fn is_video(path: &Path) -> bool {
    extension(path).is_some_and(|e| VID_FORMATS.contains(&e.as_str()))
}

/// 输入源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// 图片/视频文件或目录
    Images(PathBuf),
    /// 本地摄像头
    Camera(usize),
    /// 网络流 (或 .txt 列表中的多路源)
    Streams(Vec<String>),
}

impl Source {
    pub fn parse(source: &str) -> Result<Self> {
        let source = source.trim();

        if !source.is_empty() && source.chars().all(|c| c.is_ascii_digit()) {
            return Ok(Self::Camera(source.parse()?));
        }

        let lower = source.to_ascii_lowercase();
        if STREAM_SCHEMES.iter().any(|s| lower.starts_with(s)) {
            return Ok(Self::Streams(vec![source.to_string()]));
        }

        let path = PathBuf::from(source);
        if lower.ends_with(".txt") {
            if !path.is_file() {
                return Err(DetectError::SourceNotFound(path).into());
            }
            let streams: Vec<String> = std::fs::read_to_string(&path)?
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            if streams.is_empty() {
                return Err(DetectError::EmptyStreamList(path).into());
            }
            return Ok(Self::Streams(streams));
        }

        if !path.exists() {
            return Err(DetectError::SourceNotFound(path).into());
        }
        Ok(Self::Images(path))
    }

    /// 摄像头/流: 实时输入, 多路并行
    pub fn is_webcam(&self) -> bool {
        !matches!(self, Self::Images(_))
    }
}

/// 文件列表 (图片在前, 视频在后)
#[derive(Debug, Clone, Default)]
pub struct ImageLoader {
    pub images: Vec<PathBuf>,
    pub videos: Vec<PathBuf>,
}

impl ImageLoader {
    /// 列出文件或目录下的媒体文件, 按文件名排序
    pub fn new(path: &Path) -> Result<Self> {
        let mut files = if path.is_dir() {
            std::fs::read_dir(path)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect::<Vec<_>>()
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(DetectError::SourceNotFound(path.to_path_buf()).into());
        };
        files.sort();

        let images: Vec<_> = files.iter().filter(|p| is_image(p)).cloned().collect();
        let videos: Vec<_> = files.iter().filter(|p| is_video(p)).cloned().collect();
        if images.is_empty() && videos.is_empty() {
            return Err(DetectError::NoMedia(path.to_path_buf()).into());
        }
        info!("📂 {}: {} 张图片, {} 个视频", path.display(), images.len(), videos.len());

        Ok(Self { images, videos })
    }

    /// 文件总数
    pub fn total(&self) -> usize {
        self.images.len() + self.videos.len()
    }

    /// 按 图片 → 视频 顺序
    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.images.iter().chain(self.videos.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extensions() {
        assert!(is_image(Path::new("a/b.JPG")));
        assert!(is_image(Path::new("x.webp")));
        assert!(is_video(Path::new("clip.MP4")));
        assert!(!is_image(Path::new("clip.mp4")));
        assert!(!is_video(Path::new("noext")));
    }

    #[test]
    fn test_parse_camera_and_urls() {
        assert_eq!(Source::parse("0").unwrap(), Source::Camera(0));
        assert_eq!(Source::parse("12").unwrap(), Source::Camera(12));
        assert_eq!(
            Source::parse("RTSP://10.0.0.1/live").unwrap(),
            Source::Streams(vec!["RTSP://10.0.0.1/live".into()])
        );
        assert!(Source::parse("https://host/a.m3u8").unwrap().is_webcam());
    }

    #[test]
    fn test_parse_missing_path() {
        let err = Source::parse("/definitely/not/here.jpg").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DetectError>(),
            Some(DetectError::SourceNotFound(_))
        ));
    }

    #[test]
    fn test_parse_stream_list() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("streams.txt");
        std::fs::write(&list, "rtsp://a/1\n\n  0  \n").unwrap();
        let src = Source::parse(list.to_str().unwrap()).unwrap();
        assert_eq!(src, Source::Streams(vec!["rtsp://a/1".into(), "0".into()]));

        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "\n \n").unwrap();
        let err = Source::parse(empty.to_str().unwrap()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DetectError>(),
            Some(DetectError::EmptyStreamList(_))
        ));
    }

    #[test]
    fn test_loader_sorts_and_splits() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.jpg", "a.png", "v.mp4", "notes.md"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let loader = ImageLoader::new(dir.path()).unwrap();
        assert_eq!(loader.total(), 3);
        let names: Vec<_> = loader
            .files()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["a.png", "b.jpg", "v.mp4"]);
    }

    #[test]
    fn test_loader_no_media() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.md"), b"").unwrap();
        let err = ImageLoader::new(dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DetectError>(),
            Some(DetectError::NoMedia(_))
        ));
    }
}
