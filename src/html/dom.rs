use std::rc::Rc;

use encoding_rs::Encoding;
use html5ever::parse_document;
use html5ever::tendril::{StrTendril, TendrilSink};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom};

/// 将 HTML 字节转换为 DOM
pub fn html_to_dom(data: &[u8], document_encoding: String) -> RcDom {
    let s: String;

    if let Some(encoding) = Encoding::for_label(document_encoding.as_bytes()) {
        let (string, _, _) = encoding.decode(data);
        s = string.to_string();
    } else {
        s = String::from_utf8_lossy(data).to_string();
    }

    parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut s.as_bytes())
        .unwrap()
}

/// 将HTML片段解析为一组兄弟节点
///
/// 解析器会自动补全html/body外壳，这里取body的子节点并与临时DOM断开。
pub fn parse_fragment(markup: &str) -> Vec<Handle> {
    let dom = html_to_dom(markup.as_bytes(), String::new());

    let body = get_child_node_by_name(&dom.document, "html")
        .and_then(|html| get_child_node_by_name(&html, "body"));

    match body {
        Some(body) => {
            let children: Vec<Handle> = body.children.borrow().iter().cloned().collect();
            body.children.borrow_mut().clear();
            for child in &children {
                child.parent.set(None);
            }
            children
        }
        None => Vec::new(),
    }
}

/// 查找指定路径的DOM节点
pub fn find_nodes(node: &Handle, node_names: Vec<&str>) -> Vec<Handle> {
    assert!(!node_names.is_empty());

    let mut found_nodes = Vec::new();
    let node_name = node_names[0];

    if node_names.len() == 1 {
        if let NodeData::Element { ref name, .. } = node.data {
            if &*name.local == node_name {
                found_nodes.push(node.clone());
            }
        }

        for child_node in node.children.borrow().iter() {
            found_nodes.append(&mut find_nodes(child_node, node_names.clone()));
        }
    } else if let NodeData::Element { ref name, .. } = node.data {
        if &*name.local == node_name {
            let mut new_node_names = node_names;
            new_node_names.remove(0);
            found_nodes.append(&mut find_nodes(node, new_node_names));
        } else {
            for child_node in node.children.borrow().iter() {
                found_nodes.append(&mut find_nodes(child_node, node_names.clone()));
            }
        }
    } else {
        for child_node in node.children.borrow().iter() {
            found_nodes.append(&mut find_nodes(child_node, node_names.clone()));
        }
    }

    found_nodes
}

/// 根据名称获取子节点
pub fn get_child_node_by_name(parent: &Handle, node_name: &str) -> Option<Handle> {
    let children = parent.children.borrow();
    let matching_children = children.iter().find(|child| match child.data {
        NodeData::Element { ref name, .. } => &*name.local == node_name,
        _ => false,
    });
    matching_children.cloned()
}

/// 获取节点属性值
pub fn get_node_attr(node: &Handle, attr_name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => {
            for attr in attrs.borrow().iter() {
                if &*attr.name.local == attr_name {
                    return Some(attr.value.to_string());
                }
            }
            None
        }
        _ => None,
    }
}

/// 获取节点名称
pub fn get_node_name(node: &Handle) -> Option<&'_ str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.as_ref()),
        _ => None,
    }
}

/// 获取父节点；节点已脱离文档时返回None
pub fn get_parent_node(child: &Handle) -> Option<Handle> {
    let parent = child.parent.take();
    child.parent.set(parent.clone());
    parent.and_then(|weak| weak.upgrade())
}

/// 获取最近的元素类型父节点
pub fn get_parent_element(child: &Handle) -> Option<Handle> {
    let mut current = get_parent_node(child);
    while let Some(node) = current {
        if matches!(node.data, NodeData::Element { .. }) {
            return Some(node);
        }
        current = get_parent_node(&node);
    }
    None
}

/// 设置节点属性
pub fn set_node_attr(node: &Handle, attr_name: &str, attr_value: Option<String>) {
    use html5ever::interface::{Attribute, QualName};
    use html5ever::tendril::format_tendril;
    use html5ever::{namespace_url, ns, LocalName};

    if let NodeData::Element { attrs, .. } = &node.data {
        let attrs_mut = &mut attrs.borrow_mut();
        let mut i = 0;
        let mut found_existing_attr: bool = false;

        while i < attrs_mut.len() {
            if &attrs_mut[i].name.local == attr_name {
                found_existing_attr = true;

                if let Some(attr_value) = attr_value.clone() {
                    let _ = &attrs_mut[i].value.clear();
                    let _ = &attrs_mut[i].value.push_slice(attr_value.as_str());
                } else {
                    // Remove attr completely if attr_value is not defined
                    attrs_mut.remove(i);
                    continue;
                }
            }

            i += 1;
        }

        if !found_existing_attr {
            // Add new attribute (since originally the target node didn't have it)
            if let Some(attr_value) = attr_value.clone() {
                let name = LocalName::from(attr_name);

                attrs_mut.push(Attribute {
                    name: QualName::new(None, ns!(), name),
                    value: format_tendril!("{}", attr_value),
                });
            }
        }
    };
}

/// 判断节点当前是否仍挂在文档树上
///
/// 页面脚本可能在提取与写回之间改动DOM，所有写操作前都要重新校验。
pub fn is_attached(node: &Handle, document: &Handle) -> bool {
    if Rc::ptr_eq(node, document) {
        return true;
    }

    let mut current = get_parent_node(node);
    while let Some(parent) = current {
        if Rc::ptr_eq(&parent, document) {
            return true;
        }
        current = get_parent_node(&parent);
    }
    false
}

/// 节点在其父节点childNodes中的下标
pub fn node_position(parent: &Handle, child: &Handle) -> Option<usize> {
    parent
        .children
        .borrow()
        .iter()
        .position(|c| Rc::ptr_eq(c, child))
}

/// 计算从祖先到节点的下标路径（不含祖先本身）
///
/// 节点不在该祖先之下时返回None。
pub fn index_path(node: &Handle, ancestor: &Handle) -> Option<Vec<usize>> {
    let mut path = Vec::new();
    let mut current = node.clone();

    while !Rc::ptr_eq(&current, ancestor) {
        let parent = get_parent_node(&current)?;
        let position = node_position(&parent, &current)?;
        path.push(position);
        current = parent;
    }

    path.reverse();
    Some(path)
}

/// 沿下标路径在另一棵结构相同的子树中定位对应节点
pub fn follow_index_path(root: &Handle, path: &[usize]) -> Option<Handle> {
    let mut current = root.clone();
    for index in path {
        let next = current.children.borrow().get(*index).cloned()?;
        current = next;
    }
    Some(current)
}

/// 创建文本节点
pub fn new_text_node(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: std::cell::RefCell::new(StrTendril::from(text)),
    })
}

/// 覆写文本节点内容
pub fn set_text(node: &Handle, text: &str) {
    if let NodeData::Text { contents } = &node.data {
        let mut contents = contents.borrow_mut();
        contents.clear();
        contents.push_slice(text);
    }
}

/// 读取节点的文本节点内容（非文本节点返回None）
pub fn text_of(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Text { contents } => Some(contents.borrow().to_string()),
        _ => None,
    }
}

/// 递归拼接节点下的全部文本
pub fn text_content(node: &Handle) -> String {
    let mut out = String::new();
    collect_text(node, &mut out);
    out
}

fn collect_text(node: &Handle, out: &mut String) {
    match &node.data {
        NodeData::Text { contents } => out.push_str(&contents.borrow()),
        _ => {
            for child in node.children.borrow().iter() {
                collect_text(child, out);
            }
        }
    }
}

/// 将元素的子节点替换为单个文本节点
pub fn set_text_content(element: &Handle, text: &str) {
    let text_node = new_text_node(text);
    text_node.parent.set(Some(Rc::downgrade(element)));

    let mut children = element.children.borrow_mut();
    for child in children.iter() {
        child.parent.set(None);
    }
    children.clear();
    children.push(text_node);
}

/// 在参照节点之后插入新节点
pub fn insert_after(parent: &Handle, reference: &Handle, new_node: &Handle) -> bool {
    let position = match node_position(parent, reference) {
        Some(position) => position,
        None => return false,
    };

    new_node.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().insert(position + 1, new_node.clone());
    true
}

/// 追加子节点
pub fn append_child(parent: &Handle, child: &Handle) {
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child.clone());
}

/// 用另一节点原位替换子节点
pub fn replace_child(parent: &Handle, old: &Handle, new: &Handle) -> bool {
    let position = match node_position(parent, old) {
        Some(position) => position,
        None => return false,
    };

    new.parent.set(Some(Rc::downgrade(parent)));
    old.parent.set(None);
    parent.children.borrow_mut()[position] = new.clone();
    true
}

/// 从父节点上摘除节点
pub fn detach(node: &Handle) {
    if let Some(parent) = get_parent_node(node) {
        let mut children = parent.children.borrow_mut();
        if let Some(position) = children.iter().position(|c| Rc::ptr_eq(c, node)) {
            children.remove(position);
        }
    }
    node.parent.set(None);
}

/// 结构保留克隆：元素与属性照搬，文本全部清空
///
/// 克隆保持与原子树逐位对应的子节点布局，下标路径可以直接复放。
pub fn clone_with_cleared_text(node: &Handle) -> Handle {
    match &node.data {
        NodeData::Element {
            name,
            attrs,
            template_contents: _,
            mathml_annotation_xml_integration_point,
        } => {
            let clone = Node::new(NodeData::Element {
                name: name.clone(),
                attrs: std::cell::RefCell::new(attrs.borrow().clone()),
                template_contents: std::cell::RefCell::new(None),
                mathml_annotation_xml_integration_point: *mathml_annotation_xml_integration_point,
            });
            for child in node.children.borrow().iter() {
                let child_clone = clone_with_cleared_text(child);
                append_child(&clone, &child_clone);
            }
            clone
        }
        // 文本与其余节点类型统一降级为空文本占位，保证子节点下标不漂移
        _ => new_text_node(""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(html: &str) -> RcDom {
        html_to_dom(html.as_bytes(), String::new())
    }

    #[test]
    fn test_index_path_roundtrip() {
        let dom = parse("<html><body><div id=\"a\"><p>one</p><p><b>two</b></p></div></body></html>");
        let div = find_nodes(&dom.document, vec!["div"]).remove(0);
        let b = find_nodes(&dom.document, vec!["b"]).remove(0);

        let path = index_path(&b, &div).expect("b should live under div");
        let located = follow_index_path(&div, &path).expect("path should replay");
        assert!(Rc::ptr_eq(&located, &b));
    }

    #[test]
    fn test_attachment_check_after_detach() {
        let dom = parse("<html><body><p>hello</p></body></html>");
        let p = find_nodes(&dom.document, vec!["p"]).remove(0);
        assert!(is_attached(&p, &dom.document));

        detach(&p);
        assert!(!is_attached(&p, &dom.document));
    }

    #[test]
    fn test_cleared_clone_preserves_shape() {
        let dom = parse("<html><body><p>one<b>two</b>three</p></body></html>");
        let p = find_nodes(&dom.document, vec!["p"]).remove(0);

        let clone = clone_with_cleared_text(&p);
        assert_eq!(p.children.borrow().len(), clone.children.borrow().len());
        assert_eq!(text_content(&clone), "");
    }

    #[test]
    fn test_parse_fragment_detaches_children() {
        let nodes = parse_fragment("<b>bold</b> tail");
        assert_eq!(nodes.len(), 2);
        assert_eq!(get_node_name(&nodes[0]), Some("b"));
        assert!(get_parent_node(&nodes[0]).is_none());
    }
}
