//! 可见文本收集器
//!
//! 对DOM子树做深度优先遍历，过滤出可见的内容文本，按最近块级祖先
//! 聚成段落，再把相邻的文本与行内排版元素合并为翻译单元。单元持有的
//! 都是文档节点的借用句柄，文档本身始终归宿主所有。

use std::cell::RefCell;
use std::rc::Rc;

use markup5ever_rcdom::{Handle, NodeData};

use crate::config::constants::MIN_TEXT_LENGTH;
use crate::html::dom::{get_node_name, get_parent_node, text_content, text_of};
use crate::html::style::{
    find_block_ancestor, has_reserved_class, is_element_hidden, is_inline_format_element,
    is_skippable_tag, node_priority,
};

/// 一个翻译单元
///
/// `source_nodes`非空且`original_text`非空；空文本的单元从不产生。
#[derive(Debug)]
pub struct TextUnit {
    /// 按文档顺序排列的源节点句柄（文本节点或行内元素）
    pub source_nodes: Vec<Handle>,
    /// 归一化后的原文（修剪、压缩空白）
    pub original_text: String,
    /// 单元是否整体为一个行内元素
    pub is_inline: bool,
    /// 译文，随流式增量增长/覆盖
    pub translated_text: String,
}

/// 调度器与补丁引擎之间共享的单元引用
pub type SharedUnit = Rc<RefCell<TextUnit>>;

impl TextUnit {
    fn shared(source_nodes: Vec<Handle>, original_text: String, is_inline: bool) -> SharedUnit {
        Rc::new(RefCell::new(TextUnit {
            source_nodes,
            original_text,
            is_inline,
            translated_text: String::new(),
        }))
    }
}

/// 修剪并把空白串压缩为单个空格
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

struct Candidate {
    node: Handle,
    priority: u32,
}

/// DOM文本收集器
pub struct TextCollector {
    /// 候选文本的最小归一化长度（严格大于）
    min_text_length: usize,
}

impl Default for TextCollector {
    fn default() -> Self {
        Self {
            min_text_length: MIN_TEXT_LENGTH,
        }
    }
}

impl TextCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 收集root之下的全部翻译单元
    ///
    /// 输出顺序：段落按其候选文本的排版优先级首次出现的次序排列，
    /// 段落内的单元保持文档顺序。
    pub fn collect_units(&self, root: &Handle) -> Vec<SharedUnit> {
        let mut candidates = Vec::new();
        self.gather_candidates(root, &mut candidates);

        // 稳定排序：同优先级维持文档顺序
        candidates.sort_by_key(|candidate| candidate.priority);

        // 按最近块级祖先分组，保持首次出现的次序
        let mut groups: Vec<(Handle, Vec<Handle>)> = Vec::new();
        for candidate in candidates {
            let block = match find_block_ancestor(&candidate.node) {
                Some(block) => block,
                None => continue,
            };

            match groups.iter_mut().find(|(b, _)| Rc::ptr_eq(b, &block)) {
                Some((_, members)) => members.push(candidate.node),
                None => groups.push((block, vec![candidate.node])),
            }
        }

        let mut units = Vec::new();
        for (block, members) in &groups {
            units.extend(self.build_units_for_block(block, members));
        }

        tracing::debug!("文本收集完成: {} 个段落, {} 个单元", groups.len(), units.len());
        units
    }

    /// 深度优先收集候选文本节点，隐藏子树整体剪掉
    fn gather_candidates(&self, node: &Handle, out: &mut Vec<Candidate>) {
        match &node.data {
            NodeData::Element { .. } => {
                let tag = match get_node_name(node) {
                    Some(tag) => tag,
                    None => return,
                };
                if is_skippable_tag(tag) || is_element_hidden(node) || has_reserved_class(node) {
                    return;
                }
                for child in node.children.borrow().iter() {
                    self.gather_candidates(child, out);
                }
            }
            NodeData::Text { .. } => {
                let text = normalize_text(&text_of(node).unwrap_or_default());
                if text.chars().count() > self.min_text_length {
                    let parent_tag = get_parent_node(node)
                        .and_then(|parent| get_node_name(&parent).map(|t| t.to_string()))
                        .unwrap_or_default();
                    out.push(Candidate {
                        node: node.clone(),
                        priority: node_priority(&parent_tag),
                    });
                }
            }
            _ => {
                for child in node.children.borrow().iter() {
                    self.gather_candidates(child, out);
                }
            }
        }
    }

    /// 把块级祖先的直接子节点合并为单元
    ///
    /// 相邻的文本节点与行内排版元素构成一个run；非行内兄弟打断run。
    /// 仅含一个行内元素的run作为行内单元单独产出。
    fn build_units_for_block(&self, block: &Handle, members: &[Handle]) -> Vec<SharedUnit> {
        let mut units = Vec::new();
        let mut run: Vec<Handle> = Vec::new();

        let children: Vec<Handle> = block.children.borrow().iter().cloned().collect();
        for child in children {
            match &child.data {
                NodeData::Text { .. } => {
                    let text = normalize_text(&text_of(&child).unwrap_or_default());
                    if text.chars().count() > self.min_text_length {
                        run.push(child.clone());
                    }
                    // 纯空白不打断run
                }
                NodeData::Element { .. } => {
                    let tag = get_node_name(&child).unwrap_or_default().to_string();
                    if is_skippable_tag(&tag)
                        || is_element_hidden(&child)
                        || has_reserved_class(&child)
                    {
                        self.flush_run(&mut run, &mut units);
                        continue;
                    }
                    if is_inline_format_element(&child) {
                        let text = normalize_text(&text_content(&child));
                        if text.chars().count() > self.min_text_length {
                            run.push(child.clone());
                        }
                    } else {
                        self.flush_run(&mut run, &mut units);
                    }
                }
                _ => {}
            }
        }
        self.flush_run(&mut run, &mut units);

        // 深埋在非行内子结构里的候选文本（如表格单元格）各自成段，
        // 保证提取到的文本不会在合并阶段丢失
        for member in members {
            if units.iter().any(|unit| unit_covers(unit, member)) {
                continue;
            }
            let text = normalize_text(&text_of(member).unwrap_or_default());
            if !text.is_empty() {
                units.push(TextUnit::shared(vec![member.clone()], text, false));
            }
        }

        units
    }

    fn flush_run(&self, run: &mut Vec<Handle>, units: &mut Vec<SharedUnit>) {
        if run.is_empty() {
            return;
        }
        let nodes = std::mem::take(run);

        if nodes.len() == 1 && matches!(nodes[0].data, NodeData::Element { .. }) {
            let text = normalize_text(&text_content(&nodes[0]));
            if !text.is_empty() {
                units.push(TextUnit::shared(nodes, text, true));
            }
            return;
        }

        let mut text = String::new();
        for node in &nodes {
            let part = normalize_text(&text_content(node));
            if part.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&part);
        }
        if !text.is_empty() {
            units.push(TextUnit::shared(nodes, text, false));
        }
    }
}

/// 单元是否覆盖该节点（直接持有或持有其祖先）
fn unit_covers(unit: &SharedUnit, node: &Handle) -> bool {
    let unit = unit.borrow();
    for held in &unit.source_nodes {
        if Rc::ptr_eq(held, node) || is_ancestor_of(held, node) {
            return true;
        }
    }
    false
}

fn is_ancestor_of(ancestor: &Handle, node: &Handle) -> bool {
    let mut current = get_parent_node(node);
    while let Some(parent) = current {
        if Rc::ptr_eq(&parent, ancestor) {
            return true;
        }
        current = get_parent_node(&parent);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::dom::{find_nodes, html_to_dom};

    fn collect(html: &str) -> Vec<SharedUnit> {
        let dom = html_to_dom(html.as_bytes(), String::new());
        let body = find_nodes(&dom.document, vec!["body"]).remove(0);
        TextCollector::new().collect_units(&body)
    }

    #[test]
    fn test_simple_paragraphs_become_units() {
        let units = collect(
            "<html><body><p>First paragraph here.</p><p>Second paragraph here.</p></body></html>",
        );
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].borrow().original_text, "First paragraph here.");
        assert!(!units[0].borrow().is_inline);
    }

    #[test]
    fn test_whitespace_only_text_is_discarded() {
        let units = collect("<html><body><p>   \n\t  </p><p>real text</p></body></html>");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].borrow().original_text, "real text");
    }

    #[test]
    fn test_hidden_subtrees_are_skipped() {
        let units = collect(
            "<html><body>\
             <div style=\"display:none\"><p>invisible text</p></div>\
             <p hidden>also invisible</p>\
             <p>visible text</p>\
             </body></html>",
        );
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].borrow().original_text, "visible text");
    }

    #[test]
    fn test_script_and_style_are_skipped() {
        let units = collect(
            "<html><body><script>var x = 1;</script><style>p{color:red}</style>\
             <p>content text</p></body></html>",
        );
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn test_inline_run_merges_into_single_unit() {
        let units = collect(
            "<html><body><p>leading text <b>bold part</b> trailing text</p></body></html>",
        );
        assert_eq!(units.len(), 1);
        let unit = units[0].borrow();
        assert_eq!(unit.source_nodes.len(), 3);
        assert!(!unit.is_inline);
        assert_eq!(unit.original_text, "leading text bold part trailing text");
    }

    #[test]
    fn test_lone_inline_element_is_inline_unit() {
        let units = collect("<html><body><p><em>emphasized only</em></p></body></html>");
        assert_eq!(units.len(), 1);
        let unit = units[0].borrow();
        assert!(unit.is_inline);
        assert_eq!(unit.original_text, "emphasized only");
    }

    #[test]
    fn test_paragraphs_sorted_before_generic_containers() {
        let units = collect(
            "<html><body>\
             <section>generic container text</section>\
             <p>paragraph text</p>\
             </body></html>",
        );
        assert_eq!(units.len(), 2);
        // p(1)的优先级高于未识别标签(100)，段落先出
        assert_eq!(units[0].borrow().original_text, "paragraph text");
    }

    #[test]
    fn test_table_cell_text_survives_as_own_unit() {
        let units = collect(
            "<html><body><div><table><tbody><tr>\
             <td>cell text here</td>\
             </tr></tbody></table></div></body></html>",
        );
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].borrow().original_text, "cell text here");
    }

    #[test]
    fn test_no_empty_units_ever() {
        let units = collect(
            "<html><body><p></p><div>  </div><p>ok text</p><span>x</span></body></html>",
        );
        for unit in &units {
            let unit = unit.borrow();
            assert!(!unit.original_text.is_empty());
            assert!(!unit.source_nodes.is_empty());
        }
    }
}
