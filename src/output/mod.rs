/// 输出系统 (Output System)
///
/// - Annotator:   画框、标签、坐标文字
/// - VideoWriter: 视频/流结果编码 (后台线程)
/// - labels:      归一化标签文件
/// - save_dir:    runs/detect/expN 目录
pub mod annotator;
pub mod labels;
pub mod save_dir;
pub mod video_writer;

pub use annotator::{xy_text, Annotator, NAME_TAG_COLOR, PERSON_COLOR};
pub use labels::{label_line, label_lines, write_labels, NAME_TAG_CLASS, PERSON_CLASS};
pub use save_dir::{create_save_dir, increment_path};
pub use video_writer::{VideoWriter, DEFAULT_FPS};
