/// 检测系统 (Detection System)
///
/// - Detector: 两个模型的单帧检测
/// - Matcher:  人员框 ↔ 胸牌框 包含匹配
pub mod detector;
pub mod matcher;

pub use detector::{Detector, FrameDetections};
pub use matcher::{match_name_tags, TaggedPerson};
