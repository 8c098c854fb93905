//! Document node model: blocks and formatted text leaves.
//!
//! The serde shapes match the JSON the editor persists: elements are
//! `{"type": "...", "children": [...]}` and text leaves are
//! `{"text": "...", "bold": true, ...}` with false marks omitted.

use serde::{Deserialize, Serialize};

/// The closed set of block kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockType {
    Paragraph,
    HeadingOne,
    HeadingTwo,
    HeadingThree,
    BulletedList,
    NumberedList,
    ListItem,
    Table,
    TableRow,
    TableCell,
}

impl BlockType {
    /// List container kinds (the wrap/unwrap targets of block toggling).
    pub fn is_list(self) -> bool {
        matches!(self, BlockType::BulletedList | BlockType::NumberedList)
    }

    /// Table structure kinds, mutated only through row/column operations.
    pub fn is_table_kind(self) -> bool {
        matches!(
            self,
            BlockType::Table | BlockType::TableRow | BlockType::TableCell
        )
    }
}

/// Boolean formatting marks carried by text leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    Bold,
    Italic,
    Underline,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// A node in the document tree: either a block element or a text leaf.
///
/// Untagged so that the on-disk JSON stays Slate-shaped: blocks carry
/// `type` + `children`, text leaves carry `text` + mark flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Block {
        #[serde(rename = "type")]
        block_type: BlockType,
        children: Vec<Node>,
    },
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "is_false")]
        bold: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        italic: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        underline: bool,
    },
}

impl Node {
    /// Plain text leaf with no marks.
    pub fn text(text: impl Into<String>) -> Self {
        Node::Text {
            text: text.into(),
            bold: false,
            italic: false,
            underline: false,
        }
    }

    /// Block with the given children.
    pub fn block(block_type: BlockType, children: Vec<Node>) -> Self {
        Node::Block {
            block_type,
            children,
        }
    }

    /// Paragraph wrapping a single text leaf.
    pub fn paragraph(text: impl Into<String>) -> Self {
        Node::block(BlockType::Paragraph, vec![Node::text(text)])
    }

    /// The canonical empty block: a paragraph holding one empty text leaf.
    pub fn empty_paragraph() -> Self {
        Node::paragraph("")
    }

    /// An empty table cell.
    pub fn empty_cell() -> Self {
        Node::block(BlockType::TableCell, vec![Node::text("")])
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Node::Block { .. })
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Node::Text { .. })
    }

    pub fn block_type(&self) -> Option<BlockType> {
        match self {
            Node::Block { block_type, .. } => Some(*block_type),
            Node::Text { .. } => None,
        }
    }

    pub fn children(&self) -> Option<&Vec<Node>> {
        match self {
            Node::Block { children, .. } => Some(children),
            Node::Text { .. } => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Node>> {
        match self {
            Node::Block { children, .. } => Some(children),
            Node::Text { .. } => None,
        }
    }

    pub fn text_content(&self) -> Option<&str> {
        match self {
            Node::Text { text, .. } => Some(text),
            Node::Block { .. } => None,
        }
    }

    /// Whether a mark is set on this text leaf. Always false for blocks.
    pub fn mark(&self, mark: Mark) -> bool {
        match self {
            Node::Text {
                bold,
                italic,
                underline,
                ..
            } => match mark {
                Mark::Bold => *bold,
                Mark::Italic => *italic,
                Mark::Underline => *underline,
            },
            Node::Block { .. } => false,
        }
    }

    /// Set a mark flag on a text leaf. No-op on blocks.
    pub fn set_mark(&mut self, mark: Mark, value: bool) {
        if let Node::Text {
            bold,
            italic,
            underline,
            ..
        } = self
        {
            match mark {
                Mark::Bold => *bold = value,
                Mark::Italic => *italic = value,
                Mark::Underline => *underline = value,
            }
        }
    }
}
