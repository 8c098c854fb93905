//! The document tree and path-based addressing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OpError;
use crate::node::{BlockType, Node};

/// Address of a node: child indices from the root, outermost first.
///
/// Paths are unstable across structural edits — inserting or removing a
/// sibling before an addressed node shifts every path at or after it.
/// Replicas that apply concurrent structural edits in different orders
/// can therefore resolve the same path to different nodes; the broadcast
/// layer makes no attempt to repair this.
pub type Path = Vec<usize>;

/// An ordered, rooted tree of blocks. Serializes as the bare JSON array
/// of top-level block nodes, the same layout the document store holds in
/// its `content` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentTree {
    pub children: Vec<Node>,
}

impl Default for DocumentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentTree {
    /// A new document: one empty paragraph.
    pub fn new() -> Self {
        Self {
            children: vec![Node::empty_paragraph()],
        }
    }

    /// Build from top-level blocks, validating the structural invariants.
    pub fn from_blocks(children: Vec<Node>) -> Result<Self, OpError> {
        let tree = Self { children };
        tree.validate()?;
        Ok(tree)
    }

    /// Decode `content` as returned by the document store.
    ///
    /// The store is expected to hold a JSON array of block nodes, but two
    /// degraded encodings have been observed in practice: the array
    /// serialized as a JSON string, and non-array values. A string is
    /// re-parsed; anything that still fails to decode or validate is
    /// replaced by a fresh single-paragraph document.
    pub fn from_store_content(value: &Value) -> Self {
        match value {
            Value::String(inner) => match serde_json::from_str::<Value>(inner) {
                Ok(reparsed) if !reparsed.is_string() => Self::from_store_content(&reparsed),
                _ => Self::new(),
            },
            Value::Array(_) => serde_json::from_value::<Vec<Node>>(value.clone())
                .ok()
                .and_then(|children| Self::from_blocks(children).ok())
                .unwrap_or_default(),
            _ => Self::new(),
        }
    }

    /// Serialize to the store's `content` representation.
    pub fn to_store_content(&self) -> Value {
        serde_json::to_value(&self.children).unwrap_or_else(|_| Value::Array(Vec::new()))
    }

    /// Resolve a path to a node.
    pub fn node_at(&self, path: &[usize]) -> Option<&Node> {
        let (&first, rest) = path.split_first()?;
        let mut node = self.children.get(first)?;
        for &idx in rest {
            node = node.children()?.get(idx)?;
        }
        Some(node)
    }

    /// Resolve a path to a mutable node.
    pub fn node_at_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        let (&first, rest) = path.split_first()?;
        let mut node = self.children.get_mut(first)?;
        for &idx in rest {
            node = node.children_mut()?.get_mut(idx)?;
        }
        Some(node)
    }

    /// The sibling list containing the node at `path`, or `None` if the
    /// parent does not resolve to the root or a block.
    pub fn siblings_mut(&mut self, path: &[usize]) -> Option<&mut Vec<Node>> {
        let (parent, _) = path.split_last().map(|(last, parent)| (parent, last))?;
        if parent.is_empty() {
            Some(&mut self.children)
        } else {
            self.node_at_mut(parent)?.children_mut()
        }
    }

    /// Paths of all text leaves in document order.
    pub fn text_paths(&self) -> Vec<Path> {
        fn walk(nodes: &[Node], prefix: &mut Path, out: &mut Vec<Path>) {
            for (i, node) in nodes.iter().enumerate() {
                prefix.push(i);
                match node {
                    Node::Text { .. } => out.push(prefix.clone()),
                    Node::Block { children, .. } => walk(children, prefix, out),
                }
                prefix.pop();
            }
        }
        let mut out = Vec::new();
        walk(&self.children, &mut Vec::new(), &mut out);
        out
    }

    /// Concatenated text content of the block at `path`.
    pub fn block_text(&self, path: &[usize]) -> Option<String> {
        fn collect(node: &Node, out: &mut String) {
            match node {
                Node::Text { text, .. } => out.push_str(text),
                Node::Block { children, .. } => {
                    for child in children {
                        collect(child, out);
                    }
                }
            }
        }
        let node = self.node_at(path)?;
        let mut out = String::new();
        collect(node, &mut out);
        Some(out)
    }

    /// Check every structural invariant:
    /// - the root holds only blocks, and at least one;
    /// - every block has at least one child;
    /// - tables hold only rows, rows only cells, and rows are equal width.
    pub fn validate(&self) -> Result<(), OpError> {
        if self.children.is_empty() {
            return Err(OpError::invalid("document has no blocks"));
        }
        for (i, node) in self.children.iter().enumerate() {
            if node.is_text() {
                return Err(OpError::invalid(format!(
                    "text leaf at root index {i}"
                )));
            }
            validate_node(node)?;
        }
        Ok(())
    }
}

fn validate_node(node: &Node) -> Result<(), OpError> {
    let Node::Block {
        block_type,
        children,
    } = node
    else {
        return Ok(());
    };

    if children.is_empty() {
        return Err(OpError::invalid(format!(
            "{block_type:?} block has no children"
        )));
    }

    match block_type {
        BlockType::Table => {
            let mut width: Option<usize> = None;
            for row in children {
                if row.block_type() != Some(BlockType::TableRow) {
                    return Err(OpError::invalid("table child is not a table-row"));
                }
                let cells = row.children().map(Vec::len).unwrap_or(0);
                if let Some(w) = width {
                    if w != cells {
                        return Err(OpError::invalid(format!(
                            "ragged table: row widths {w} and {cells}"
                        )));
                    }
                } else {
                    width = Some(cells);
                }
            }
        }
        BlockType::TableRow => {
            for cell in children {
                if cell.block_type() != Some(BlockType::TableCell) {
                    return Err(OpError::invalid("table-row child is not a table-cell"));
                }
            }
        }
        _ => {}
    }

    for child in children {
        validate_node(child)?;
    }
    Ok(())
}
