// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测流水线 (Detection Pipeline)
///
/// 单线程主循环, 解码在后台线程:
/// 输入帧 → 两个模型检测 → 胸牌匹配 → 绘制 → 保存图片/视频/标签
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use image::RgbImage;
use tracing::info;

use crate::detection::{Detector, TaggedPerson};
use crate::input::{Frame, FrameReader, Mode, Source};
use crate::output::{create_save_dir, write_labels, Annotator, VideoWriter, DEFAULT_FPS};
use crate::Args;

/// 结果图片/视频路径; 流结果追加 .mp4
pub fn save_path(save_dir: &Path, frame: &Frame) -> PathBuf {
    let name = frame.file_name();
    match frame.mode {
        Mode::Stream => save_dir.join(format!("{}.mp4", name)),
        _ => save_dir.join(name),
    }
}

/// 标签路径: 图片 `<stem>.txt`, 视频/流 `<stem>_<frame>.txt`
pub fn label_path(save_dir: &Path, frame: &Frame) -> PathBuf {
    let stem = frame.stem();
    let name = match frame.mode {
        Mode::Image => format!("{}.txt", stem),
        _ => format!("{}_{}.txt", stem, frame.frame),
    };
    save_dir.join("labels").join(name)
}

/// 视频写入器槽位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriterSlot {
    /// 视频文件依次处理, 共用一个写入器
    File,
    /// 每路流一个写入器
    Stream(usize),
}

/// 图片不需要写入器
pub fn writer_key(frame: &Frame) -> Option<WriterSlot> {
    match frame.mode {
        Mode::Image => None,
        Mode::Video => Some(WriterSlot::File),
        Mode::Stream => Some(WriterSlot::Stream(frame.index)),
    }
}

/// 结果保存: 图片直接写盘, 视频/流每路一个写入器, 路径变化时轮换
pub struct Saver {
    save_dir: PathBuf,
    save_img: bool,
    save_txt: bool,
    save_conf: bool,
    writers: HashMap<WriterSlot, VideoWriter>,
}

impl Saver {
    pub fn new(save_dir: PathBuf, args: &Args) -> Self {
        Self {
            save_dir,
            save_img: args.save_img(),
            save_txt: args.save_txt,
            save_conf: args.save_conf,
            writers: HashMap::new(),
        }
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// 写标签 (若开启)
    pub fn save_labels(&self, frame: &Frame, matches: &[TaggedPerson]) -> Result<()> {
        if !self.save_txt {
            return Ok(());
        }
        let (w, h) = frame.image.dimensions();
        write_labels(&label_path(&self.save_dir, frame), matches, w, h, self.save_conf)
    }

    /// 保存绘制后的图片或视频帧
    pub fn save_frame(&mut self, frame: &Frame, img: &RgbImage) -> Result<()> {
        if !self.save_img {
            return Ok(());
        }
        let path = save_path(&self.save_dir, frame);
        let Some(key) = writer_key(frame) else {
            img.save(&path)?;
            info!("💾 结果图片已保存: {}", path.display());
            return Ok(());
        };

        if self.writers.get(&key).map(|w| w.path()) != Some(path.as_path()) {
            // 新视频: 结束上一个写入器
            if let Some(old) = self.writers.remove(&key) {
                old.finish()?;
            }
            let fps = match frame.mode {
                Mode::Video => frame.fps.unwrap_or(DEFAULT_FPS),
                _ => DEFAULT_FPS,
            };
            let (w, h) = img.dimensions();
            self.writers.insert(key, VideoWriter::new(&path, fps, w, h)?);
        }
        if let Some(writer) = self.writers.get_mut(&key) {
            writer.write(img)?;
        }
        Ok(())
    }

    /// 结束所有视频写入
    pub fn finish(&mut self) -> Result<()> {
        for (_, writer) in self.writers.drain() {
            writer.finish()?;
        }
        Ok(())
    }

    /// 已保存的标签文件数
    pub fn label_count(&self) -> usize {
        std::fs::read_dir(self.save_dir.join("labels"))
            .map(|dir| {
                dir.filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().is_some_and(|x| x == "txt"))
                    .count()
            })
            .unwrap_or(0)
    }
}

/// 主流程
pub fn run(args: &Args) -> Result<()> {
    let t0 = Instant::now();

    // 1. 输入源与输出目录
    let source = Source::parse(&args.source)?;
    let save_dir = create_save_dir(&args.project, &args.name, args.exist_ok, args.save_txt)?;
    let mut saver = Saver::new(save_dir, args);

    // 2. 模型
    let mut detector = Detector::new(args)?;
    detector.warmup()?;
    let annotator = Annotator::load(args.font.as_deref())?;

    // 3. 逐帧处理
    let reader = FrameReader::new(&source)?;
    for frame in reader {
        let frame = frame?;
        let det = detector.detect(&frame.image)?;

        let mut img = frame.image.clone();
        annotator.draw_matches(&mut img, &det.matches);
        saver.save_labels(&frame, &det.matches)?;

        info!(
            "{}Done. ({:.1}ms) Inference, ({:.1}ms) NMS",
            frame.prefix(),
            det.inference_ms,
            det.nms_ms
        );

        saver.save_frame(&frame, &img)?;
    }

    // 4. 收尾
    saver.finish()?;
    if args.save_txt {
        info!(
            "{} labels saved to {}",
            saver.label_count(),
            saver.save_dir().join("labels").display()
        );
    }
    info!("Done. ({:.3}s)", t0.elapsed().as_secs_f64());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn frame(path: &str, mode: Mode, frame: usize) -> Frame {
        Frame {
            path: path.into(),
            mode,
            index: 0,
            count: 1,
            frame,
            frames: None,
            fps: None,
            image: RgbImage::new(16, 8),
        }
    }

    #[test]
    fn test_paths() {
        let dir = Path::new("runs/detect/exp");
        let img = frame("data/bus.jpg", Mode::Image, 0);
        assert_eq!(save_path(dir, &img), dir.join("bus.jpg"));
        assert_eq!(label_path(dir, &img), dir.join("labels/bus.txt"));

        let vid = frame("data/walk.mp4", Mode::Video, 12);
        assert_eq!(save_path(dir, &vid), dir.join("walk.mp4"));
        assert_eq!(label_path(dir, &vid), dir.join("labels/walk_12.txt"));

        let cam = frame("0", Mode::Stream, 3);
        assert_eq!(save_path(dir, &cam), dir.join("0.mp4"));
        assert_eq!(label_path(dir, &cam), dir.join("labels/0_3.txt"));
    }

    #[test]
    fn test_writer_key() {
        assert_eq!(writer_key(&frame("a.jpg", Mode::Image, 0)), None);

        // 不同视频文件共用一个槽位, 切换文件时旧写入器被结束
        let mut a = frame("in/a.mp4", Mode::Video, 5);
        a.index = 1;
        let mut b = frame("in/b.mp4", Mode::Video, 1);
        b.index = 2;
        assert_eq!(writer_key(&a), Some(WriterSlot::File));
        assert_eq!(writer_key(&a), writer_key(&b));

        let mut s0 = frame("rtsp://h/0", Mode::Stream, 1);
        s0.index = 0;
        let mut s1 = frame("rtsp://h/1", Mode::Stream, 1);
        s1.index = 1;
        assert_eq!(writer_key(&s0), Some(WriterSlot::Stream(0)));
        assert_ne!(writer_key(&s0), writer_key(&s1));
    }

    #[test]
    fn test_saver_images_and_labels() {
        let tmp = tempfile::tempdir().unwrap();
        let args = Args::parse_from(["detect", "--save-txt"]);
        let save_dir = create_save_dir(tmp.path(), "exp", false, true).unwrap();
        let mut saver = Saver::new(save_dir.clone(), &args);

        let f = frame("in/a.png", Mode::Image, 0);
        let m = TaggedPerson {
            person: crate::Bbox::from_xyxy(0., 0., 16., 8., 0, 0.9),
            tag: crate::Bbox::from_xyxy(2., 2., 4., 4., 0, 0.9),
        };
        saver.save_labels(&f, &[m]).unwrap();
        saver.save_frame(&f, &f.image).unwrap();
        saver.finish().unwrap();

        assert!(save_dir.join("a.png").is_file());
        assert_eq!(saver.label_count(), 1);
    }

    #[test]
    fn test_nosave_skips_images() {
        let tmp = tempfile::tempdir().unwrap();
        let args = Args::parse_from(["detect", "--nosave"]);
        let save_dir = create_save_dir(tmp.path(), "exp", false, false).unwrap();
        let mut saver = Saver::new(save_dir.clone(), &args);
        let f = frame("in/a.png", Mode::Image, 0);
        saver.save_frame(&f, &f.image).unwrap();
        assert!(!save_dir.join("a.png").exists());
        assert_eq!(saver.label_count(), 0);
    }
}
