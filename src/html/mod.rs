//! HTML文档处理模块
//!
//! - `dom` - DOM解析与节点操作
//! - `serializer` - 文档与节点序列化
//! - `style` - 内联样式可见性与块级/行内判定

pub mod dom;
pub mod serializer;
pub mod style;

pub use dom::{
    find_nodes, get_child_node_by_name, get_node_attr, get_node_name, get_parent_element,
    get_parent_node, html_to_dom, index_path, is_attached, node_position, parse_fragment,
    set_node_attr,
};
pub use serializer::{serialize_document, serialize_inner, serialize_node};
