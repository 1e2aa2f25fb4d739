// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 标签文件: `class cx cy w h [conf]`, 坐标归一化到 0..1

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::Result;

use crate::detection::TaggedPerson;
use crate::Bbox;

pub const PERSON_CLASS: usize = 0;
pub const NAME_TAG_CLASS: usize = 1;

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// 同 `%g`: 6 位有效数字, 去掉末尾的 0, 指数 < -4 或 >= 6 时用科学计数法 (`1e-05`)
fn fmt_g(v: f32) -> String {
    if v == 0.0 {
        return "0".into();
    }
    if !v.is_finite() {
        return v.to_string();
    }
    let v = v as f64;
    // 按 6 位有效数字舍入后的指数
    let sci = format!("{:.5e}", v);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    if !(-4..6).contains(&exp) {
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", trim_zeros(mantissa), sign, exp.abs());
    }
    trim_zeros(&format!("{:.*}", (5 - exp) as usize, v)).to_string()
}

/// 一行标签
pub fn label_line(class: usize, bbox: &Bbox, width: u32, height: u32, save_conf: bool) -> String {
    let (w, h) = (width.max(1) as f32, height.max(1) as f32);
    let mut fields = vec![
        class.to_string(),
        fmt_g((bbox.xmin() + bbox.width() / 2.) / w),
        fmt_g((bbox.ymin() + bbox.height() / 2.) / h),
        fmt_g(bbox.width() / w),
        fmt_g(bbox.height() / h),
    ];
    if save_conf {
        fields.push(fmt_g(bbox.confidence()));
    }
    fields.join(" ")
}

/// 每对匹配写两行: 人员在前, 胸牌在后
pub fn label_lines(matches: &[TaggedPerson], width: u32, height: u32, save_conf: bool) -> Vec<String> {
    matches
        .iter()
        .flat_map(|m| {
            [
                label_line(PERSON_CLASS, &m.person, width, height, save_conf),
                label_line(NAME_TAG_CLASS, &m.tag, width, height, save_conf),
            ]
        })
        .collect()
}

/// 追加写入标签文件, 无匹配时不创建文件
pub fn write_labels(
    path: &Path,
    matches: &[TaggedPerson],
    width: u32,
    height: u32,
    save_conf: bool,
) -> Result<()> {
    if matches.is_empty() {
        return Ok(());
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    for line in label_lines(matches, width, height, save_conf) {
        writeln!(f, "{}", line)?;
    }
    Ok(())
}
