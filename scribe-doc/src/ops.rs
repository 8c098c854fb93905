//! The operation vocabulary and its pure application function.
//!
//! An [`Operation`] is the unit of network transmission: self-contained,
//! applied locally before publishing and replayed verbatim by every
//! other replica. [`apply`] either produces a new tree satisfying all
//! structural invariants or fails without touching the input. Applying
//! the same operation twice is not idempotent (two `InsertText`s insert
//! twice); dedup and ordering are the broadcast layer's concern.

use serde::{Deserialize, Serialize};

use crate::error::OpError;
use crate::node::{BlockType, Mark, Node};
use crate::tree::{DocumentTree, Path};

/// An inclusive range of text leaves, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRange {
    pub start: Path,
    pub end: Path,
}

impl PathRange {
    pub fn new(start: Path, end: Path) -> Self {
        Self { start, end }
    }

    /// A range covering a single text leaf.
    pub fn leaf(path: Path) -> Self {
        Self {
            start: path.clone(),
            end: path,
        }
    }
}

/// An atomic edit against a document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    InsertText {
        path: Path,
        offset: usize,
        text: String,
    },
    DeleteText {
        path: Path,
        offset: usize,
        length: usize,
    },
    SetMark {
        range: PathRange,
        mark: Mark,
        value: bool,
    },
    SetBlockType {
        path: Path,
        new_type: BlockType,
    },
    InsertNode {
        path: Path,
        node: Node,
    },
    RemoveNode {
        path: Path,
    },
    InsertRow {
        table_path: Path,
        row_index: usize,
    },
    DeleteRow {
        table_path: Path,
        row_index: usize,
    },
    InsertColumn {
        table_path: Path,
        col_index: usize,
    },
    DeleteColumn {
        table_path: Path,
        col_index: usize,
    },
}

/// Apply one operation, yielding a new tree or failing with the input
/// untouched. Offsets are in characters, not bytes.
pub fn apply(tree: &DocumentTree, op: &Operation) -> Result<DocumentTree, OpError> {
    let mut next = tree.clone();
    match op {
        Operation::InsertText { path, offset, text } => {
            insert_text(&mut next, path, *offset, text)?
        }
        Operation::DeleteText {
            path,
            offset,
            length,
        } => delete_text(&mut next, path, *offset, *length)?,
        Operation::SetMark { range, mark, value } => set_mark(&mut next, range, *mark, *value)?,
        Operation::SetBlockType { path, new_type } => set_block_type(&mut next, path, *new_type)?,
        Operation::InsertNode { path, node } => insert_node(&mut next, path, node)?,
        Operation::RemoveNode { path } => remove_node(&mut next, path)?,
        Operation::InsertRow {
            table_path,
            row_index,
        } => insert_row(&mut next, table_path, *row_index)?,
        Operation::DeleteRow {
            table_path,
            row_index,
        } => delete_row(&mut next, table_path, *row_index)?,
        Operation::InsertColumn {
            table_path,
            col_index,
        } => insert_column(&mut next, table_path, *col_index)?,
        Operation::DeleteColumn {
            table_path,
            col_index,
        } => delete_column(&mut next, table_path, *col_index)?,
    }
    next.validate()?;
    Ok(next)
}

/// Apply a sequence of operations in order, failing on the first bad one.
pub fn apply_all(tree: &DocumentTree, ops: &[Operation]) -> Result<DocumentTree, OpError> {
    let mut current = tree.clone();
    for op in ops {
        current = apply(&current, op)?;
    }
    Ok(current)
}

fn byte_offset(s: &str, char_offset: usize) -> Option<usize> {
    s.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(s.len()))
        .nth(char_offset)
}

fn text_at_mut<'a>(
    tree: &'a mut DocumentTree,
    path: &[usize],
) -> Result<&'a mut String, OpError> {
    match tree.node_at_mut(path) {
        Some(Node::Text { text, .. }) => Ok(text),
        Some(Node::Block { .. }) => Err(OpError::invalid(format!(
            "path {path:?} addresses a block, expected text"
        ))),
        None => Err(OpError::invalid(format!("path {path:?} does not resolve"))),
    }
}

fn insert_text(
    tree: &mut DocumentTree,
    path: &[usize],
    offset: usize,
    new_text: &str,
) -> Result<(), OpError> {
    let text = text_at_mut(tree, path)?;
    let at = byte_offset(text, offset)
        .ok_or_else(|| OpError::invalid(format!("offset {offset} past end of text leaf")))?;
    text.insert_str(at, new_text);
    Ok(())
}

fn delete_text(
    tree: &mut DocumentTree,
    path: &[usize],
    offset: usize,
    length: usize,
) -> Result<(), OpError> {
    let text = text_at_mut(tree, path)?;
    let start = byte_offset(text, offset)
        .ok_or_else(|| OpError::invalid(format!("offset {offset} past end of text leaf")))?;
    // The length comes off the wire; the sum must not be trusted either.
    let end = offset
        .checked_add(length)
        .and_then(|upper| byte_offset(text, upper))
        .ok_or_else(|| {
            OpError::invalid(format!("range {offset}+{length} past end of text leaf"))
        })?;
    text.replace_range(start..end, "");
    Ok(())
}

fn set_mark(
    tree: &mut DocumentTree,
    range: &PathRange,
    mark: Mark,
    value: bool,
) -> Result<(), OpError> {
    let leaves = tree.text_paths();
    let pos = |p: &Path| leaves.iter().position(|l| l == p);
    let (Some(a), Some(b)) = (pos(&range.start), pos(&range.end)) else {
        return Err(OpError::invalid(
            "mark range endpoint does not resolve to a text leaf",
        ));
    };
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    for leaf in &leaves[lo..=hi] {
        if let Some(node) = tree.node_at_mut(leaf) {
            node.set_mark(mark, value);
        }
    }
    Ok(())
}

fn set_block_type(
    tree: &mut DocumentTree,
    path: &[usize],
    new_type: BlockType,
) -> Result<(), OpError> {
    if new_type.is_table_kind() {
        return Err(OpError::invalid(
            "table structure is mutated only through row/column operations",
        ));
    }
    match tree.node_at_mut(path) {
        Some(Node::Block { block_type, .. }) => {
            if block_type.is_table_kind() {
                return Err(OpError::invalid(
                    "cannot retype a table structure block",
                ));
            }
            *block_type = new_type;
            Ok(())
        }
        Some(Node::Text { .. }) => Err(OpError::invalid(format!(
            "path {path:?} addresses text, expected a block"
        ))),
        None => Err(OpError::invalid(format!("path {path:?} does not resolve"))),
    }
}

fn insert_node(tree: &mut DocumentTree, path: &[usize], node: &Node) -> Result<(), OpError> {
    let Some((&index, parent)) = path.split_last() else {
        return Err(OpError::invalid("insert path is empty"));
    };
    let siblings = if parent.is_empty() {
        &mut tree.children
    } else {
        match tree.node_at_mut(parent) {
            Some(Node::Block { children, .. }) => children,
            Some(Node::Text { .. }) => {
                return Err(OpError::invalid("insert parent is a text leaf"))
            }
            None => {
                return Err(OpError::invalid(format!(
                    "insert parent {parent:?} does not resolve"
                )))
            }
        }
    };
    if index > siblings.len() {
        return Err(OpError::invalid(format!(
            "insert index {index} past end of {} siblings",
            siblings.len()
        )));
    }
    siblings.insert(index, node.clone());
    Ok(())
}

fn remove_node(tree: &mut DocumentTree, path: &[usize]) -> Result<(), OpError> {
    let Some((&index, parent)) = path.split_last() else {
        return Err(OpError::invalid("remove path is empty"));
    };
    if parent.is_empty() {
        if index >= tree.children.len() {
            return Err(OpError::invalid(format!("path {path:?} does not resolve")));
        }
        tree.children.remove(index);
        if tree.children.is_empty() {
            tree.children.push(Node::empty_paragraph());
        }
        return Ok(());
    }
    match tree.node_at_mut(parent) {
        Some(Node::Block { children, .. }) => {
            if index >= children.len() {
                return Err(OpError::invalid(format!("path {path:?} does not resolve")));
            }
            children.remove(index);
            // A block is never left empty; an empty text leaf stands in.
            if children.is_empty() {
                children.push(Node::text(""));
            }
            Ok(())
        }
        _ => Err(OpError::invalid(format!(
            "remove parent {parent:?} does not resolve to a block"
        ))),
    }
}

fn table_rows_mut<'a>(
    tree: &'a mut DocumentTree,
    table_path: &[usize],
) -> Result<&'a mut Vec<Node>, OpError> {
    match tree.node_at_mut(table_path) {
        Some(Node::Block {
            block_type: BlockType::Table,
            children,
        }) => Ok(children),
        Some(_) => Err(OpError::invalid(format!(
            "path {table_path:?} is not a table"
        ))),
        None => Err(OpError::invalid(format!(
            "table path {table_path:?} does not resolve"
        ))),
    }
}

fn row_width(row: &Node) -> usize {
    row.children().map(Vec::len).unwrap_or(0)
}

fn insert_row(
    tree: &mut DocumentTree,
    table_path: &[usize],
    row_index: usize,
) -> Result<(), OpError> {
    let rows = table_rows_mut(tree, table_path)?;
    if row_index > rows.len() {
        return Err(OpError::invalid(format!(
            "row index {row_index} past end of {} rows",
            rows.len()
        )));
    }
    // Match the width of the row at the insertion point (clamped to the
    // last row when appending).
    let width = if rows.is_empty() {
        1
    } else {
        row_width(&rows[row_index.min(rows.len() - 1)])
    };
    let cells = (0..width).map(|_| Node::empty_cell()).collect();
    rows.insert(row_index, Node::block(BlockType::TableRow, cells));
    Ok(())
}

fn delete_row(
    tree: &mut DocumentTree,
    table_path: &[usize],
    row_index: usize,
) -> Result<(), OpError> {
    let rows = table_rows_mut(tree, table_path)?;
    if rows.len() <= 1 {
        return Err(OpError::violation("a table keeps at least one row"));
    }
    if row_index >= rows.len() {
        return Err(OpError::invalid(format!(
            "row index {row_index} past end of {} rows",
            rows.len()
        )));
    }
    rows.remove(row_index);
    Ok(())
}

fn insert_column(
    tree: &mut DocumentTree,
    table_path: &[usize],
    col_index: usize,
) -> Result<(), OpError> {
    let rows = table_rows_mut(tree, table_path)?;
    let width = rows.first().map(row_width).unwrap_or(0);
    if col_index > width {
        return Err(OpError::invalid(format!(
            "column index {col_index} past table width {width}"
        )));
    }
    for row in rows.iter_mut() {
        if let Some(cells) = row.children_mut() {
            cells.insert(col_index, Node::empty_cell());
        }
    }
    Ok(())
}

fn delete_column(
    tree: &mut DocumentTree,
    table_path: &[usize],
    col_index: usize,
) -> Result<(), OpError> {
    let rows = table_rows_mut(tree, table_path)?;
    let width = rows.first().map(row_width).unwrap_or(0);
    if width <= 1 {
        return Err(OpError::violation("a table keeps at least one column"));
    }
    if col_index >= width {
        return Err(OpError::invalid(format!(
            "column index {col_index} past table width {width}"
        )));
    }
    for row in rows.iter_mut() {
        if let Some(cells) = row.children_mut() {
            cells.remove(col_index);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: usize, cols: usize) -> Node {
        Node::block(
            BlockType::Table,
            (0..rows)
                .map(|_| {
                    Node::block(
                        BlockType::TableRow,
                        (0..cols).map(|_| Node::empty_cell()).collect(),
                    )
                })
                .collect(),
        )
    }

    fn doc(blocks: Vec<Node>) -> DocumentTree {
        DocumentTree::from_blocks(blocks).unwrap()
    }

    #[test]
    fn insert_text_at_offset() {
        let tree = doc(vec![Node::paragraph("held")]);
        let op = Operation::InsertText {
            path: vec![0, 0],
            offset: 2,
            text: "llo wor".into(),
        };
        let next = apply(&tree, &op).unwrap();
        assert_eq!(next.block_text(&[0]).unwrap(), "hello world");
        // The input tree is untouched.
        assert_eq!(tree.block_text(&[0]).unwrap(), "held");
    }

    #[test]
    fn insert_text_is_not_idempotent() {
        let tree = doc(vec![Node::paragraph("")]);
        let op = Operation::InsertText {
            path: vec![0, 0],
            offset: 0,
            text: "x".into(),
        };
        let once = apply(&tree, &op).unwrap();
        let twice = apply(&once, &op).unwrap();
        assert_eq!(twice.block_text(&[0]).unwrap(), "xx");
    }

    #[test]
    fn insert_text_char_offsets() {
        let tree = doc(vec![Node::paragraph("né")]);
        let op = Operation::InsertText {
            path: vec![0, 0],
            offset: 2,
            text: "e".into(),
        };
        assert_eq!(apply(&tree, &op).unwrap().block_text(&[0]).unwrap(), "née");
    }

    #[test]
    fn insert_text_rejects_bad_targets() {
        let tree = doc(vec![Node::paragraph("hi")]);
        let past_end = Operation::InsertText {
            path: vec![0, 0],
            offset: 3,
            text: "x".into(),
        };
        assert!(matches!(
            apply(&tree, &past_end),
            Err(OpError::InvalidOperation(_))
        ));
        let on_block = Operation::InsertText {
            path: vec![0],
            offset: 0,
            text: "x".into(),
        };
        assert!(apply(&tree, &on_block).is_err());
        let unresolved = Operation::InsertText {
            path: vec![3, 0],
            offset: 0,
            text: "x".into(),
        };
        assert!(apply(&tree, &unresolved).is_err());
    }

    #[test]
    fn delete_text_range() {
        let tree = doc(vec![Node::paragraph("hello world")]);
        let op = Operation::DeleteText {
            path: vec![0, 0],
            offset: 5,
            length: 6,
        };
        assert_eq!(apply(&tree, &op).unwrap().block_text(&[0]).unwrap(), "hello");

        let overlong = Operation::DeleteText {
            path: vec![0, 0],
            offset: 8,
            length: 10,
        };
        assert!(apply(&tree, &overlong).is_err());
    }

    #[test]
    fn delete_text_rejects_overflowing_length() {
        let tree = doc(vec![Node::paragraph("hi")]);
        let op = Operation::DeleteText {
            path: vec![0, 0],
            offset: 1,
            length: usize::MAX,
        };
        match apply(&tree, &op) {
            Err(OpError::InvalidOperation(_)) => {}
            other => panic!("expected invalid operation, got {other:?}"),
        }
    }

    #[test]
    fn set_mark_over_range() {
        let tree = doc(vec![
            Node::paragraph("a"),
            Node::paragraph("b"),
            Node::paragraph("c"),
        ]);
        let op = Operation::SetMark {
            range: PathRange::new(vec![0, 0], vec![1, 0]),
            mark: Mark::Bold,
            value: true,
        };
        let next = apply(&tree, &op).unwrap();
        assert!(next.node_at(&[0, 0]).unwrap().mark(Mark::Bold));
        assert!(next.node_at(&[1, 0]).unwrap().mark(Mark::Bold));
        assert!(!next.node_at(&[2, 0]).unwrap().mark(Mark::Bold));
    }

    #[test]
    fn set_mark_reversed_range_normalizes() {
        let tree = doc(vec![Node::paragraph("a"), Node::paragraph("b")]);
        let op = Operation::SetMark {
            range: PathRange::new(vec![1, 0], vec![0, 0]),
            mark: Mark::Italic,
            value: true,
        };
        let next = apply(&tree, &op).unwrap();
        assert!(next.node_at(&[0, 0]).unwrap().mark(Mark::Italic));
        assert!(next.node_at(&[1, 0]).unwrap().mark(Mark::Italic));
    }

    #[test]
    fn set_block_type_retypes_block() {
        let tree = doc(vec![Node::paragraph("title")]);
        let op = Operation::SetBlockType {
            path: vec![0],
            new_type: BlockType::HeadingOne,
        };
        let next = apply(&tree, &op).unwrap();
        assert_eq!(next.node_at(&[0]).unwrap().block_type(), Some(BlockType::HeadingOne));
    }

    #[test]
    fn set_block_type_rejects_text_and_table_kinds() {
        let tree = doc(vec![Node::paragraph("p"), table(2, 2)]);
        let on_text = Operation::SetBlockType {
            path: vec![0, 0],
            new_type: BlockType::HeadingOne,
        };
        assert!(apply(&tree, &on_text).is_err());
        let to_table = Operation::SetBlockType {
            path: vec![0],
            new_type: BlockType::TableCell,
        };
        assert!(apply(&tree, &to_table).is_err());
        let from_table = Operation::SetBlockType {
            path: vec![1],
            new_type: BlockType::Paragraph,
        };
        assert!(apply(&tree, &from_table).is_err());
    }

    #[test]
    fn insert_node_as_sibling() {
        let tree = doc(vec![Node::paragraph("a"), Node::paragraph("c")]);
        let op = Operation::InsertNode {
            path: vec![1],
            node: Node::paragraph("b"),
        };
        let next = apply(&tree, &op).unwrap();
        assert_eq!(next.block_text(&[1]).unwrap(), "b");
        assert_eq!(next.block_text(&[2]).unwrap(), "c");
    }

    #[test]
    fn insert_node_rejects_text_at_root() {
        let tree = doc(vec![Node::paragraph("a")]);
        let op = Operation::InsertNode {
            path: vec![0],
            node: Node::text("loose"),
        };
        assert!(apply(&tree, &op).is_err());
    }

    #[test]
    fn insert_node_rejects_ragged_table_edit() {
        // Inserting a cell directly into one row breaks rectangularity.
        let tree = doc(vec![table(2, 2)]);
        let op = Operation::InsertNode {
            path: vec![0, 0, 2],
            node: Node::empty_cell(),
        };
        assert!(apply(&tree, &op).is_err());
    }

    #[test]
    fn remove_node_normalizes_empty_block() {
        let tree = doc(vec![Node::paragraph("only")]);
        let op = Operation::RemoveNode { path: vec![0, 0] };
        let next = apply(&tree, &op).unwrap();
        // The paragraph keeps an empty text leaf rather than zero children.
        assert_eq!(next.block_text(&[0]).unwrap(), "");
        next.validate().unwrap();
    }

    #[test]
    fn remove_last_root_block_leaves_empty_paragraph() {
        let tree = doc(vec![Node::paragraph("only")]);
        let op = Operation::RemoveNode { path: vec![0] };
        let next = apply(&tree, &op).unwrap();
        assert_eq!(next, DocumentTree::new());
    }

    #[test]
    fn insert_row_duplicates_width() {
        let tree = doc(vec![table(2, 3)]);
        let op = Operation::InsertRow {
            table_path: vec![0],
            row_index: 1,
        };
        let next = apply(&tree, &op).unwrap();
        let rows = next.node_at(&[0]).unwrap().children().unwrap();
        assert_eq!(rows.len(), 3);
        for row in rows {
            assert_eq!(row.children().unwrap().len(), 3);
        }
    }

    #[test]
    fn delete_row_refuses_last_row() {
        let tree = doc(vec![table(1, 2)]);
        let op = Operation::DeleteRow {
            table_path: vec![0],
            row_index: 0,
        };
        let err = apply(&tree, &op).unwrap_err();
        assert!(matches!(err, OpError::InvariantViolation(_)));
        // And a 2-row table deletes fine.
        let tree2 = doc(vec![table(2, 2)]);
        let next = apply(
            &tree2,
            &Operation::DeleteRow {
                table_path: vec![0],
                row_index: 0,
            },
        )
        .unwrap();
        assert_eq!(next.node_at(&[0]).unwrap().children().unwrap().len(), 1);
    }

    #[test]
    fn insert_column_adds_one_cell_per_row() {
        for rows in 1..=4 {
            let tree = doc(vec![table(rows, 2)]);
            let op = Operation::InsertColumn {
                table_path: vec![0],
                col_index: 1,
            };
            let next = apply(&tree, &op).unwrap();
            for row in next.node_at(&[0]).unwrap().children().unwrap() {
                assert_eq!(row.children().unwrap().len(), 3);
            }
        }
    }

    #[test]
    fn delete_column_refuses_last_column() {
        let tree = doc(vec![table(2, 1)]);
        let op = Operation::DeleteColumn {
            table_path: vec![0],
            col_index: 0,
        };
        assert!(matches!(
            apply(&tree, &op),
            Err(OpError::InvariantViolation(_))
        ));
    }

    #[test]
    fn delete_column_stays_rectangular() {
        let tree = doc(vec![table(3, 3)]);
        let next = apply(
            &tree,
            &Operation::DeleteColumn {
                table_path: vec![0],
                col_index: 1,
            },
        )
        .unwrap();
        for row in next.node_at(&[0]).unwrap().children().unwrap() {
            assert_eq!(row.children().unwrap().len(), 2);
        }
        next.validate().unwrap();
    }

    #[test]
    fn operation_json_round_trip() {
        let op = Operation::InsertText {
            path: vec![0, 0],
            offset: 0,
            text: "hi".into(),
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"op\":\"insert_text\""));
        assert_eq!(serde_json::from_str::<Operation>(&json).unwrap(), op);
    }

    // Same-order replay: a replica applying a published sequence in the
    // delivered order converges to the sender's tree.
    #[test]
    fn same_order_replay_converges() {
        let base = doc(vec![Node::paragraph("")]);
        let ops = vec![
            Operation::InsertText {
                path: vec![0, 0],
                offset: 0,
                text: "hello".into(),
            },
            Operation::InsertNode {
                path: vec![1],
                node: Node::paragraph("world"),
            },
            Operation::SetBlockType {
                path: vec![0],
                new_type: BlockType::HeadingOne,
            },
        ];
        let sender = apply_all(&base, &ops).unwrap();
        let receiver = apply_all(&base, &ops).unwrap();
        assert_eq!(sender, receiver);
    }

    // Characterization, not a guarantee: concurrent structural edits from
    // two senders observed in different orders can diverge, because paths
    // shift under insertion. Accepted relay-layer gap.
    #[test]
    fn cross_sender_reorder_can_diverge() {
        let base = doc(vec![Node::paragraph("z")]);
        let from_a = Operation::InsertNode {
            path: vec![0],
            node: Node::paragraph("a"),
        };
        let from_b = Operation::InsertNode {
            path: vec![0],
            node: Node::paragraph("b"),
        };

        let replica_1 = apply_all(&base, &[from_a.clone(), from_b.clone()]).unwrap();
        let replica_2 = apply_all(&base, &[from_b, from_a]).unwrap();

        assert_eq!(replica_1.block_text(&[0]).unwrap(), "b");
        assert_eq!(replica_2.block_text(&[0]).unwrap(), "a");
        assert_ne!(replica_1, replica_2);
    }
}
