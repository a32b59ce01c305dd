//! Contains pure functions for collecting nodes along each XPath axis.
//!
//! Every collector yields nodes in axis order: document order for forward
//! axes, nearest-first for the reverse ones. Proximity positions in
//! predicates are taken from this order.

use crate::ast::Axis;
use crate::datasource::DataSourceNode;

/// Collects the nodes on `axis` from a single context node.
pub fn collect<'a, N: DataSourceNode<'a>>(axis: Axis, node: N) -> Vec<N> {
    let mut results = Vec::new();
    match axis {
        Axis::Child => results.extend(node.children()),
        Axis::Attribute => results.extend(node.attributes()),
        Axis::Descendant => collect_descendant_nodes(node, &mut results),
        Axis::DescendantOrSelf => {
            results.push(node);
            collect_descendant_nodes(node, &mut results);
        }
        Axis::Parent => results.extend(node.parent()),
        Axis::Ancestor => collect_ancestor_nodes(node, &mut results),
        Axis::AncestorOrSelf => {
            results.push(node);
            collect_ancestor_nodes(node, &mut results);
        }
        Axis::SelfAxis => results.push(node),
        Axis::FollowingSibling => collect_following_sibling_nodes(node, &mut results),
        Axis::PrecedingSibling => collect_preceding_sibling_nodes(node, &mut results),
        Axis::Following => collect_following_nodes(node, &mut results),
        Axis::Preceding => collect_preceding_nodes(node, &mut results),
    }
    results
}

/// Pre-order walk, which is document order.
pub fn collect_descendant_nodes<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    for child in node.children() {
        results.push(child);
        collect_descendant_nodes(child, results);
    }
}

fn collect_ancestor_nodes<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    let mut current = node.parent();
    while let Some(p) = current {
        results.push(p);
        current = p.parent();
    }
}

/// Attributes have no siblings.
fn is_attribute<'a, N: DataSourceNode<'a>>(node: N) -> bool {
    node.node_type() == crate::datasource::NodeType::Attribute
}

fn collect_following_sibling_nodes<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    if is_attribute(node) {
        return;
    }
    if let Some(parent) = node.parent() {
        results.extend(parent.children().skip_while(|s| *s != node).skip(1));
    }
}

fn collect_preceding_sibling_nodes<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    if is_attribute(node) {
        return;
    }
    if let Some(parent) = node.parent() {
        let mut siblings: Vec<N> = parent.children().take_while(|s| *s != node).collect();
        siblings.reverse();
        results.extend(siblings);
    }
}

fn collect_following_nodes<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    // For an attribute, the following nodes start with its owner's children.
    let mut current = node;
    if is_attribute(node) {
        if let Some(owner) = node.parent() {
            collect_descendant_nodes(owner, results);
            current = owner;
        }
    }
    let mut cursor = Some(current);
    while let Some(c) = cursor {
        if let Some(parent) = c.parent() {
            for sibling in parent.children().skip_while(|s| *s != c).skip(1) {
                results.push(sibling);
                collect_descendant_nodes(sibling, results);
            }
            cursor = Some(parent);
        } else {
            cursor = None;
        }
    }
}

fn collect_preceding_nodes<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    let start = if is_attribute(node) {
        match node.parent() {
            Some(owner) => owner,
            None => return,
        }
    } else {
        node
    };
    // Gather in document order, excluding ancestors, then flip to axis order.
    let mut in_order = Vec::new();
    let mut chain = vec![start];
    let mut cursor = start.parent();
    while let Some(p) = cursor {
        chain.push(p);
        cursor = p.parent();
    }
    for window in chain.windows(2).rev() {
        let (child, parent) = (window[0], window[1]);
        for sibling in parent.children().take_while(|s| *s != child) {
            in_order.push(sibling);
            collect_descendant_nodes(sibling, &mut in_order);
        }
    }
    in_order.reverse();
    results.extend(in_order);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{XmlNode, parse_document};

    const DOC: &str = "<r><a id='1'><b/><c>t</c></a><!--x--><d><e/></d><f/></r>";

    fn element<'a>(root: XmlNode<'a, 'a>, local: &str) -> XmlNode<'a, 'a> {
        let mut all = Vec::new();
        collect_descendant_nodes(root, &mut all);
        all.into_iter()
            .find(|n| n.name().is_some_and(|q| q.local_part == local))
            .unwrap()
    }

    fn names<'a>(nodes: &[XmlNode<'a, 'a>]) -> Vec<String> {
        nodes
            .iter()
            .map(|n| match n.name() {
                Some(q) => q.local_part.to_string(),
                None => format!("{:?}", n.node_type()),
            })
            .collect()
    }

    #[test]
    fn test_collect_descendant_in_document_order() {
        let doc = parse_document(DOC).unwrap();
        let r = element(XmlNode::root(&doc), "r");
        let nodes = collect(Axis::Descendant, r);
        assert_eq!(names(&nodes), ["a", "b", "c", "Text", "Comment", "d", "e", "f"]);
        let mut sorted = nodes.clone();
        sorted.sort();
        assert_eq!(sorted, nodes);
    }

    #[test]
    fn test_collect_ancestor_nearest_first() {
        let doc = parse_document(DOC).unwrap();
        let root = XmlNode::root(&doc);
        let e = element(root, "e");
        assert_eq!(names(&collect(Axis::Ancestor, e)), ["d", "r", "Root"]);
        assert_eq!(names(&collect(Axis::AncestorOrSelf, e)), ["e", "d", "r", "Root"]);
    }

    #[test]
    fn test_collect_siblings() {
        let doc = parse_document(DOC).unwrap();
        let root = XmlNode::root(&doc);
        let d = element(root, "d");
        assert_eq!(names(&collect(Axis::FollowingSibling, d)), ["f"]);
        assert_eq!(names(&collect(Axis::PrecedingSibling, d)), ["Comment", "a"]);
    }

    #[test]
    fn test_collect_following_and_preceding() {
        let doc = parse_document(DOC).unwrap();
        let root = XmlNode::root(&doc);
        let c = element(root, "c");
        assert_eq!(names(&collect(Axis::Following, c)), ["Comment", "d", "e", "f"]);
        let e = element(root, "e");
        assert_eq!(names(&collect(Axis::Preceding, e)), ["Comment", "Text", "c", "b", "a"]);
    }

    #[test]
    fn test_attribute_axes() {
        let doc = parse_document(DOC).unwrap();
        let a = element(XmlNode::root(&doc), "a");
        let id = collect(Axis::Attribute, a)[0];
        assert_eq!(id.string_value(), "1");
        assert!(collect(Axis::FollowingSibling, id).is_empty());
        assert_eq!(names(&collect(Axis::Parent, id)), ["a"]);
        assert_eq!(names(&collect(Axis::Following, id))[0], "b");
    }
}
