// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 人员 ↔ 胸牌 包含匹配

use crate::Bbox;

/// 一对匹配结果: 胸牌左上角落在人员框内
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedPerson {
    pub person: Bbox,
    pub tag: Bbox,
}

/// 按 人员 × 胸牌 的顺序枚举所有包含关系
///
/// 胸牌左上角必须严格落在人员框内部。同一个人可以匹配多个胸牌,
/// 同一个胸牌也可以匹配多个 (重叠的) 人。任一侧为空时不匹配。
pub fn match_name_tags(persons: &[Bbox], tags: &[Bbox]) -> Vec<TaggedPerson> {
    if persons.is_empty() || tags.is_empty() {
        return Vec::new();
    }

    let mut pairs = Vec::new();
    for person in persons {
        for tag in tags {
            if tag.tl_strictly_inside(person) {
                pairs.push(TaggedPerson {
                    person: person.clone(),
                    tag: tag.clone(),
                });
            }
        }
    }
    pairs
}
