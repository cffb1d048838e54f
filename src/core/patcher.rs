//! DOM补丁/恢复引擎
//!
//! 把单元的译文幂等地写进活文档：对照模式在块级祖先之后维护一个
//! 结构镜像的悬浮块，替换模式原位覆盖并在首次改动前留下恢复记录。
//! `restore_all`只依赖挂在DOM上的恢复记录回滚全部改动，与调度器的
//! 内存状态无关，因此任何时刻都可以恢复。
//!
//! 所有DOM引用都是借用句柄，页面脚本可能并发改树，每次写入前都要
//! 重新校验节点仍挂在文档上。

use std::cell::RefCell;
use std::rc::Rc;

use markup5ever_rcdom::{Handle, NodeData};
use serde::{Deserialize, Serialize};

use crate::config::TranslationMode;
use crate::error::{TranslateError, TranslateResult};
use crate::html::dom::{
    append_child, clone_with_cleared_text, detach, follow_index_path, get_node_attr,
    get_parent_node, index_path, insert_after, is_attached, node_position, parse_fragment,
    replace_child, set_node_attr, set_text, set_text_content,
};
use crate::html::serializer::{serialize_inner, serialize_node};
use crate::html::style::find_block_ancestor;
use crate::pipeline::collector::SharedUnit;

/// 对照模式悬浮块容器的class
pub const OVERLAY_CLASS: &str = "pagelingo-overlay";
/// 悬浮块内的结构镜像根
pub const OVERLAY_CONTENT_CLASS: &str = "pagelingo-overlay-content";
/// 路径复放失败时的纯文本回退节点
pub const OVERLAY_FALLBACK_CLASS: &str = "pagelingo-overlay-fallback";

/// 恢复记录标记：元素被翻译过
pub const ATTR_TRANSLATED: &str = "data-pagelingo-translated";
/// 恢复记录：被改写的文本子节点的下标与原文（JSON数组）
pub const ATTR_TEXT_RECORDS: &str = "data-pagelingo-nodes";
/// 恢复记录：元素改写前的完整序列化标记
pub const ATTR_ORIGINAL_HTML: &str = "data-pagelingo-original-html";
/// 恢复记录：元素改写前的内部内容，整体替换不可行时的回退
pub const ATTR_ORIGINAL_CONTENT: &str = "data-pagelingo-original-content";

const OVERLAY_MARKER_STYLE: &str =
    "border-left:2px solid #4a8af4;padding-left:10px;margin-top:10px;margin-bottom:10px;";

/// 单个被改写文本节点的恢复记录
#[derive(Debug, Serialize, Deserialize)]
struct TextNodeRecord {
    index: usize,
    content: String,
}

#[derive(Default)]
struct PatchState {
    /// 本轮已应用过译文的单元（恢复时一并清空）
    translated_units: Vec<SharedUnit>,
    /// 路径复放失败的单元对应的回退节点，保证重复应用时原地覆写
    fallbacks: Vec<(SharedUnit, Handle)>,
}

/// DOM补丁/恢复引擎，每个文档上下文一个实例
pub struct PatchEngine {
    document: Handle,
    state: RefCell<PatchState>,
}

impl PatchEngine {
    pub fn new(document: Handle) -> Self {
        Self {
            document,
            state: RefCell::new(PatchState::default()),
        }
    }

    /// 已应用译文的单元数量
    pub fn translated_unit_count(&self) -> usize {
        self.state.borrow().translated_units.len()
    }

    /// 把单元当前的译文写进文档，可对同一单元反复调用（后写覆盖）
    ///
    /// 空白译文一律不写，防止流式响应的瞬时空块把内容抹掉。
    pub fn apply(&self, unit: &SharedUnit, mode: TranslationMode) -> TranslateResult<()> {
        let translated = unit.borrow().translated_text.clone();
        if translated.trim().is_empty() {
            return Ok(());
        }

        match mode {
            TranslationMode::Compare => self.apply_compare(unit, &translated)?,
            TranslationMode::Replace => self.apply_replace(unit, &translated)?,
            // 划词/窗口翻译不触碰文档
            TranslationMode::Selection | TranslationMode::Window => return Ok(()),
        }

        let mut state = self.state.borrow_mut();
        if !state
            .translated_units
            .iter()
            .any(|u| Rc::ptr_eq(u, unit))
        {
            state.translated_units.push(Rc::clone(unit));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // 对照模式
    // ------------------------------------------------------------------

    fn apply_compare(&self, unit: &SharedUnit, translated: &str) -> TranslateResult<()> {
        let nodes = unit.borrow().source_nodes.clone();
        let first = nodes
            .first()
            .cloned()
            .ok_or_else(|| TranslateError::Processing("翻译单元没有源节点".to_string()))?;

        if !is_attached(&first, &self.document) {
            return Ok(());
        }

        let block = find_block_ancestor(&first)
            .ok_or_else(|| TranslateError::Processing("找不到块级祖先".to_string()))?;

        let content = self.find_or_create_overlay(&block)?;

        for node in &nodes {
            if !is_attached(node, &self.document) {
                continue;
            }
            match index_path(node, &block).and_then(|path| follow_index_path(&content, &path)) {
                Some(target) => match &target.data {
                    NodeData::Text { .. } => set_text(&target, translated),
                    NodeData::Element { .. } => set_text_content(&target, translated),
                    _ => {}
                },
                None => {
                    // 页面在提取后改动了自身结构，镜像里找不到对应位置，
                    // 退化为纯文本追加而不是丢掉译文
                    self.write_fallback(unit, &content, translated);
                }
            }
        }

        Ok(())
    }

    /// 在块级祖先之后找到（或创建）悬浮块，返回其中的结构镜像根
    fn find_or_create_overlay(&self, block: &Handle) -> TranslateResult<Handle> {
        let parent = get_parent_node(block)
            .ok_or_else(|| TranslateError::Processing("块级祖先已脱离文档".to_string()))?;

        if let Some(existing) = next_element_sibling(&parent, block) {
            if has_class(&existing, OVERLAY_CLASS) {
                if let Some(content) = existing.children.borrow().first().cloned() {
                    return Ok(content);
                }
            }
        }

        let overlay = new_element("div");
        set_node_attr(&overlay, "class", Some(OVERLAY_CLASS.to_string()));

        // 没有计算样式可抄，继承原块的内联样式再叠加左边线标记
        let mut style = get_node_attr(block, "style").unwrap_or_default();
        if !style.is_empty() && !style.trim_end().ends_with(';') {
            style.push(';');
        }
        style.push_str(OVERLAY_MARKER_STYLE);
        set_node_attr(&overlay, "style", Some(style));

        let content = clone_with_cleared_text(block);
        set_node_attr(&content, "class", Some(OVERLAY_CONTENT_CLASS.to_string()));
        append_child(&overlay, &content);

        if !insert_after(&parent, block, &overlay) {
            return Err(TranslateError::Processing(
                "无法在原文之后插入悬浮块".to_string(),
            ));
        }

        Ok(content)
    }

    /// 查找或创建该单元的回退节点并覆写其文本
    fn write_fallback(&self, unit: &SharedUnit, content: &Handle, translated: &str) {
        let mut state = self.state.borrow_mut();

        if let Some((_, node)) = state
            .fallbacks
            .iter()
            .find(|(u, _)| Rc::ptr_eq(u, unit))
        {
            set_text_content(node, translated);
            return;
        }

        let fallback = new_element("span");
        set_node_attr(&fallback, "class", Some(OVERLAY_FALLBACK_CLASS.to_string()));
        set_text_content(&fallback, translated);
        append_child(content, &fallback);
        state.fallbacks.push((Rc::clone(unit), fallback));
    }

    // ------------------------------------------------------------------
    // 替换模式
    // ------------------------------------------------------------------

    fn apply_replace(&self, unit: &SharedUnit, translated: &str) -> TranslateResult<()> {
        let nodes = unit.borrow().source_nodes.clone();

        for node in &nodes {
            if !is_attached(node, &self.document) {
                continue;
            }
            match &node.data {
                NodeData::Text { .. } => {
                    let parent = match get_parent_node(node) {
                        Some(parent) if matches!(parent.data, NodeData::Element { .. }) => parent,
                        _ => continue,
                    };
                    record_text_node(&parent, node)?;
                    set_text(node, translated);
                }
                NodeData::Element { .. } => {
                    record_element(node);
                    set_text_content(node, translated);
                }
                _ => {}
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // 恢复
    // ------------------------------------------------------------------

    /// 回滚自上次重置以来的全部改动，返回成功恢复的元素数
    ///
    /// 逐元素推进，单个元素失败只记日志不中断；已脱离文档的节点直接
    /// 跳过。最后移除所有悬浮块并清空引擎和调度侧的单元登记。
    pub fn restore_all(&self) -> usize {
        let mut marked = Vec::new();
        collect_elements_with_attr(&self.document, ATTR_TRANSLATED, &mut marked);

        let mut restored = 0;
        for element in &marked {
            match self.restore_element(element) {
                Ok(()) => restored += 1,
                Err(error) => {
                    tracing::warn!("恢复单个元素时出错: {}", error);
                }
            }
        }

        let mut overlays = Vec::new();
        collect_elements_with_class(&self.document, OVERLAY_CLASS, &mut overlays);
        for overlay in &overlays {
            detach(overlay);
        }

        let mut state = self.state.borrow_mut();
        state.translated_units.clear();
        state.fallbacks.clear();

        if restored > 0 || !overlays.is_empty() {
            tracing::debug!("恢复原文: {} 个元素, {} 个悬浮块", restored, overlays.len());
        }
        restored
    }

    fn restore_element(&self, element: &Handle) -> TranslateResult<()> {
        if let Some(json) = get_node_attr(element, ATTR_TEXT_RECORDS) {
            let records: Vec<TextNodeRecord> = serde_json::from_str(&json)
                .map_err(|error| TranslateError::Restore(format!("恢复记录损坏: {}", error)))?;

            for record in records {
                let child = element.children.borrow().get(record.index).cloned();
                if let Some(child) = child {
                    if matches!(child.data, NodeData::Text { .. }) {
                        set_text(&child, &record.content);
                    }
                }
            }
            remove_markers(element);
            return Ok(());
        }

        if let Some(markup) = get_node_attr(element, ATTR_ORIGINAL_HTML) {
            let parent = get_parent_node(element)
                .filter(|parent| matches!(parent.data, NodeData::Element { .. }));
            let original = parse_fragment(&markup)
                .into_iter()
                .find(|node| matches!(node.data, NodeData::Element { .. }));

            match (parent, original) {
                (Some(parent), Some(original)) => {
                    if !replace_child(&parent, element, &original) {
                        return Err(TranslateError::Restore(
                            "原元素不在其父节点的子节点中".to_string(),
                        ));
                    }
                }
                _ => {
                    // 结构上下文缺失，退回恢复内部内容
                    let inner = get_node_attr(element, ATTR_ORIGINAL_CONTENT).ok_or_else(|| {
                        TranslateError::Restore("缺少可用的恢复记录".to_string())
                    })?;
                    restore_inner_content(element, &inner);
                    remove_markers(element);
                }
            }
            return Ok(());
        }

        remove_markers(element);
        Ok(())
    }
}

// ----------------------------------------------------------------------
// 恢复记录读写
// ----------------------------------------------------------------------

/// 首次改动前记下文本子节点的下标与原文；已有同下标记录时不再覆写
fn record_text_node(parent: &Handle, node: &Handle) -> TranslateResult<()> {
    let index = match node_position(parent, node) {
        Some(index) => index,
        None => return Ok(()),
    };

    let mut records: Vec<TextNodeRecord> = match get_node_attr(parent, ATTR_TEXT_RECORDS) {
        Some(json) => serde_json::from_str(&json)?,
        None => Vec::new(),
    };

    if records.iter().any(|record| record.index == index) {
        return Ok(());
    }

    let content = match &node.data {
        NodeData::Text { contents } => contents.borrow().to_string(),
        _ => return Ok(()),
    };
    records.push(TextNodeRecord { index, content });

    set_node_attr(
        parent,
        ATTR_TEXT_RECORDS,
        Some(serde_json::to_string(&records)?),
    );
    set_node_attr(parent, ATTR_TRANSLATED, Some("true".to_string()));
    Ok(())
}

/// 首次改动前记下元素的完整标记；记录存在期间不再覆写
fn record_element(element: &Handle) {
    if get_node_attr(element, ATTR_ORIGINAL_HTML).is_some() {
        return;
    }

    // 先序列化再打标记，确保记录里没有引擎自己的属性
    let outer = serialize_node(element);
    let inner = serialize_inner(element);

    set_node_attr(element, ATTR_ORIGINAL_HTML, Some(outer));
    set_node_attr(element, ATTR_ORIGINAL_CONTENT, Some(inner));
    set_node_attr(element, ATTR_TRANSLATED, Some("true".to_string()));
}

fn remove_markers(element: &Handle) {
    set_node_attr(element, ATTR_TEXT_RECORDS, None);
    set_node_attr(element, ATTR_ORIGINAL_HTML, None);
    set_node_attr(element, ATTR_ORIGINAL_CONTENT, None);
    set_node_attr(element, ATTR_TRANSLATED, None);
}

fn restore_inner_content(element: &Handle, inner_markup: &str) {
    {
        let mut children = element.children.borrow_mut();
        for child in children.iter() {
            child.parent.set(None);
        }
        children.clear();
    }
    for node in parse_fragment(inner_markup) {
        append_child(element, &node);
    }
}

// ----------------------------------------------------------------------
// 小工具
// ----------------------------------------------------------------------

fn new_element(tag: &str) -> Handle {
    use html5ever::interface::QualName;
    use html5ever::{namespace_url, ns, LocalName};

    markup5ever_rcdom::Node::new(NodeData::Element {
        name: QualName::new(None, ns!(html), LocalName::from(tag)),
        attrs: RefCell::new(Vec::new()),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    })
}

fn has_class(element: &Handle, class: &str) -> bool {
    get_node_attr(element, "class")
        .map(|value| value.split_ascii_whitespace().any(|c| c == class))
        .unwrap_or(false)
}

/// 参照节点之后的第一个元素兄弟（跳过文本与注释）
fn next_element_sibling(parent: &Handle, reference: &Handle) -> Option<Handle> {
    let children = parent.children.borrow();
    let position = children.iter().position(|c| Rc::ptr_eq(c, reference))?;
    children[position + 1..]
        .iter()
        .find(|node| matches!(node.data, NodeData::Element { .. }))
        .cloned()
}

fn collect_elements_with_attr(node: &Handle, attr: &str, out: &mut Vec<Handle>) {
    if matches!(node.data, NodeData::Element { .. }) && get_node_attr(node, attr).is_some() {
        out.push(node.clone());
    }
    for child in node.children.borrow().iter() {
        collect_elements_with_attr(child, attr, out);
    }
}

fn collect_elements_with_class(node: &Handle, class: &str, out: &mut Vec<Handle>) {
    if matches!(node.data, NodeData::Element { .. }) && has_class(node, class) {
        out.push(node.clone());
        return; // 悬浮块整体移除，不再深入
    }
    for child in node.children.borrow().iter() {
        collect_elements_with_class(child, class, out);
    }
}
