//! 可见性与排版类别判定
//!
//! 无头DOM没有真正的计算样式，这里以内联style声明、hidden属性和
//! 标签默认排版作为判定依据。提取与写回两侧共用同一套规则。

use markup5ever_rcdom::{Handle, NodeData};

use crate::html::dom::{get_node_attr, get_node_name, get_parent_element};

/// 跳过的结构性/非内容标签
pub const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "svg", "path", "meta", "link", "br", "hr", "iframe", "img",
    "video", "audio", "canvas", "embed", "object", "template", "head", "title",
];

/// 行内排版标签：这些元素整体作为一个翻译单元
pub const INLINE_FORMAT_TAGS: &[&str] = &[
    "strong", "em", "b", "i", "span", "a", "code", "mark", "sub", "sup", "u", "small", "abbr",
];

/// 默认以块级排版的标签
pub const BLOCK_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "div", "section", "article", "aside", "header",
    "footer", "main", "nav", "ul", "ol", "li", "dl", "dt", "dd", "table", "blockquote", "pre",
    "figure", "figcaption", "form", "fieldset", "body",
];

/// 本引擎自己产出的节点所带的保留class前缀，再次提取时必须跳过
pub const RESERVED_CLASS_PREFIX: &str = "pagelingo-";

/// 解析内联style属性为(属性名, 值)序列
pub fn parse_style_declarations(style: &str) -> Vec<(String, String)> {
    style
        .split(';')
        .filter_map(|declaration| {
            let (name, value) = declaration.split_once(':')?;
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim().to_ascii_lowercase();
            if name.is_empty() || value.is_empty() {
                None
            } else {
                Some((name, value))
            }
        })
        .collect()
}

fn is_zero_size(value: &str) -> bool {
    matches!(value, "0" | "0px" | "0%" | "0em" | "0rem")
}

/// 元素是否被样式或hidden属性隐藏
pub fn is_element_hidden(element: &Handle) -> bool {
    if !matches!(element.data, NodeData::Element { .. }) {
        return false;
    }

    if get_node_attr(element, "hidden").is_some() {
        return true;
    }

    if let Some(style) = get_node_attr(element, "style") {
        for (name, value) in parse_style_declarations(&style) {
            let hidden = match name.as_str() {
                "display" => value == "none",
                "visibility" => value == "hidden" || value == "collapse",
                "opacity" => value == "0" || value == "0.0",
                "width" | "height" => is_zero_size(&value),
                _ => false,
            };
            if hidden {
                return true;
            }
        }
    }

    false
}

/// 元素class是否带有本引擎的保留前缀
pub fn has_reserved_class(element: &Handle) -> bool {
    match get_node_attr(element, "class") {
        Some(class) => class
            .split_ascii_whitespace()
            .any(|c| c.starts_with(RESERVED_CLASS_PREFIX)),
        None => false,
    }
}

/// 元素是否按块级排版
///
/// 内联style的display声明优先于标签默认值。
pub fn is_block_element(element: &Handle) -> bool {
    let tag = match get_node_name(element) {
        Some(tag) => tag,
        None => return false,
    };

    if let Some(style) = get_node_attr(element, "style") {
        for (name, value) in parse_style_declarations(&style) {
            if name == "display" {
                return matches!(value.as_str(), "block" | "flex" | "grid");
            }
        }
    }

    BLOCK_TAGS.contains(&tag)
}

/// 是否为行内排版元素
pub fn is_inline_format_element(element: &Handle) -> bool {
    match get_node_name(element) {
        Some(tag) => INLINE_FORMAT_TAGS.contains(&tag),
        None => false,
    }
}

/// 是否属于应整体跳过的标签
pub fn is_skippable_tag(tag: &str) -> bool {
    SKIP_TAGS.contains(&tag)
}

/// 找到节点最近的块级祖先
///
/// 一直爬到body为止；没有更近的块级祖先时退回最近的元素父节点。
pub fn find_block_ancestor(node: &Handle) -> Option<Handle> {
    let mut current = get_parent_element(node)?;
    loop {
        if is_block_element(&current) {
            return Some(current);
        }
        match get_parent_element(&current) {
            Some(parent) => current = parent,
            None => return Some(current),
        }
    }
}

/// 文本节点的排版优先级，取决于最近的内容性祖先标签
///
/// 数值越小越先被调度；未识别的标签排在最后。
pub fn node_priority(parent_tag: &str) -> u32 {
    match parent_tag {
        "p" => 1,
        "title" => 2,
        "h1" => 3,
        "h2" => 4,
        "h3" => 5,
        "h4" => 6,
        "h5" => 7,
        "h6" => 8,
        "div" => 9,
        "span" => 10,
        _ => 100,
    }
}
