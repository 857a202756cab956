//! Document tree, stored as an arena of nodes.

use std::fmt;

use crate::error::HostError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    id: Option<String>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    head: NodeId,
    body: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// A document with `<html>`, `<head>` and `<body>`.
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            head: NodeId(0),
            body: NodeId(0),
        };
        doc.root = doc.create_element("html");
        doc.head = doc.create_element("head");
        doc.body = doc.create_element("body");
        doc.link(doc.root, doc.head);
        doc.link(doc.root, doc.body);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn head(&self) -> NodeId {
        self.head
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            tag: tag.to_ascii_lowercase(),
            id: None,
            text: String::new(),
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn node(&self, id: NodeId) -> Result<&Node, HostError> {
        self.nodes.get(id.0).ok_or(HostError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, HostError> {
        self.nodes.get_mut(id.0).ok_or(HostError::UnknownNode(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    pub fn tag(&self, id: NodeId) -> Result<&str, HostError> {
        Ok(&self.node(id)?.tag)
    }

    pub fn element_id(&self, id: NodeId) -> Result<Option<&str>, HostError> {
        Ok(self.node(id)?.id.as_deref())
    }

    pub fn set_element_id(&mut self, id: NodeId, value: &str) -> Result<(), HostError> {
        self.node_mut(id)?.id = Some(value.to_string());
        Ok(())
    }

    pub fn text(&self, id: NodeId) -> Result<&str, HostError> {
        Ok(&self.node(id)?.text)
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), HostError> {
        self.node_mut(id)?.text = text.to_string();
        Ok(())
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, HostError> {
        Ok(self.node(id)?.parent)
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId], HostError> {
        Ok(&self.node(id)?.children)
    }

    /// Whether `id` is connected to the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == self.root {
                return true;
            }
            current = self.nodes.get(node.0).and_then(|n| n.parent);
        }
        false
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, of: NodeId) -> bool {
        let mut current = Some(of);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.nodes.get(node.0).and_then(|n| n.parent);
        }
        false
    }

    /// Moves `child` to the end of `parent`'s children.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), HostError> {
        self.node(parent)?;
        self.node(child)?;
        if self.is_ancestor_or_self(child, parent) {
            return Err(HostError::HierarchyRequest { parent, child });
        }
        self.detach(child)?;
        self.link(parent, child);
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), HostError> {
        if self.node(child)?.parent != Some(parent) {
            return Err(HostError::NotAChild { parent, child });
        }
        self.detach(child)?;
        Ok(())
    }

    /// Removes `id` from its parent. Returns whether it had one.
    pub fn detach(&mut self, id: NodeId) -> Result<bool, HostError> {
        let Some(parent) = self.node_mut(id)?.parent.take() else {
            return Ok(false);
        };
        self.node_mut(parent)?.children.retain(|c| *c != id);
        Ok(true)
    }

    /// First attached element whose `id` attribute equals `value`, in tree order.
    pub fn get_element_by_id(&self, value: &str) -> Option<NodeId> {
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            let entry = self.nodes.get(node.0)?;
            if entry.id.as_deref() == Some(value) {
                return Some(node);
            }
            stack.extend(entry.children.iter().rev().copied());
        }
        None
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.nodes.get_mut(child.0) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.nodes.get_mut(parent.0) {
            node.children.push(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skeleton_is_attached() {
        let doc = Document::new();
        assert_eq!(doc.tag(doc.head()).unwrap(), "head");
        assert!(doc.is_attached(doc.body()));
        assert_eq!(doc.children(doc.root()).unwrap(), &[doc.head(), doc.body()]);
    }

    #[test]
    fn append_moves_and_detach_disconnects() {
        let mut doc = Document::new();
        let div = doc.create_element("DIV");
        assert!(!doc.is_attached(div));
        doc.append_child(doc.body(), div).unwrap();
        assert!(doc.is_attached(div));
        doc.append_child(doc.head(), div).unwrap();
        assert!(doc.children(doc.body()).unwrap().is_empty());
        assert_eq!(doc.parent(div).unwrap(), Some(doc.head()));

        assert!(doc.detach(div).unwrap());
        assert!(!doc.is_attached(div));
        assert!(!doc.detach(div).unwrap());
    }

    #[test]
    fn cannot_insert_an_ancestor() {
        let mut doc = Document::new();
        let err = doc.append_child(doc.body(), doc.root()).unwrap_err();
        assert!(matches!(err, HostError::HierarchyRequest { .. }));
    }

    #[test]
    fn lookup_by_id_only_sees_attached_nodes() {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        doc.set_element_id(div, "app").unwrap();
        assert_eq!(doc.get_element_by_id("app"), None);
        doc.append_child(doc.body(), div).unwrap();
        assert_eq!(doc.get_element_by_id("app"), Some(div));
    }
}
