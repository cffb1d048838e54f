//! 段落身份与去重
//!
//! 重复出现的段落（例如页眉页脚的重复文案）只翻译一次：
//! 以节点序列的(类型, 标签, 归一化文本)元组构造稳定身份，保留首个。

use std::collections::HashSet;

use markup5ever_rcdom::NodeData;

use crate::html::dom::{text_content, text_of};
use crate::pipeline::collector::{normalize_text, SharedUnit, TextUnit};

/// 翻译单元的派生身份
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParagraphKey(String);

impl ParagraphKey {
    /// 由单元的源节点序列构造身份
    pub fn for_unit(unit: &TextUnit) -> Self {
        let segments: Vec<String> = unit
            .source_nodes
            .iter()
            .map(|node| match &node.data {
                NodeData::Text { .. } => {
                    format!("text:{}", normalize_text(&text_of(node).unwrap_or_default()))
                }
                NodeData::Element { name, .. } => {
                    format!("{}:{}", name.local, normalize_text(&text_content(node)))
                }
                _ => String::new(),
            })
            .collect();

        ParagraphKey(segments.join("|"))
    }
}

/// 去重：等键的单元只保留第一个
pub fn dedup_units(units: Vec<SharedUnit>) -> Vec<SharedUnit> {
    let mut seen: HashSet<ParagraphKey> = HashSet::with_capacity(units.len());
    let mut unique = Vec::with_capacity(units.len());

    for unit in units {
        let key = ParagraphKey::for_unit(&unit.borrow());
        if seen.insert(key) {
            unique.push(unit);
        }
    }

    unique
}
