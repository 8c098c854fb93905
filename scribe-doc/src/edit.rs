//! Local-edit helpers: the toolbar-level operations a client performs.
//!
//! Each helper inspects the current tree and returns the operation
//! sequence that effects the edit; the caller applies it locally and
//! publishes the same sequence so every replica replays the identical
//! structural change.

use crate::error::OpError;
use crate::node::{BlockType, Mark, Node};
use crate::ops::{apply, Operation, PathRange};
use crate::tree::{DocumentTree, Path};

/// Whether every text leaf in the range carries the mark.
pub fn is_mark_active(tree: &DocumentTree, range: &PathRange, mark: Mark) -> bool {
    let leaves = tree.text_paths();
    let pos = |p: &Path| leaves.iter().position(|l| l == p);
    let (Some(a), Some(b)) = (pos(&range.start), pos(&range.end)) else {
        return false;
    };
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    leaves[lo..=hi]
        .iter()
        .all(|leaf| tree.node_at(leaf).is_some_and(|n| n.mark(mark)))
}

/// Toggle a mark over a range: removes it when fully active, sets it
/// otherwise.
pub fn toggle_mark(tree: &DocumentTree, range: PathRange, mark: Mark) -> Vec<Operation> {
    let value = !is_mark_active(tree, &range, mark);
    vec![Operation::SetMark { range, mark, value }]
}

/// Nearest strict ancestor of `path` that is a list container.
fn list_ancestor(tree: &DocumentTree, path: &[usize]) -> Option<Path> {
    (1..path.len())
        .rev()
        .map(|len| path[..len].to_vec())
        .find(|prefix| {
            tree.node_at(prefix)
                .and_then(Node::block_type)
                .is_some_and(BlockType::is_list)
        })
}

/// Whether the block format is active at `path`. For list formats this
/// asks whether the nearest list ancestor has that type; for other
/// formats it compares the block at `path` itself.
pub fn is_block_active(tree: &DocumentTree, path: &[usize], format: BlockType) -> bool {
    if format.is_list() {
        list_ancestor(tree, path)
            .and_then(|lp| tree.node_at(&lp).and_then(Node::block_type))
            == Some(format)
    } else {
        tree.node_at(path).and_then(Node::block_type) == Some(format)
    }
}

/// Toggle a block format at `path`.
///
/// Semantics:
/// - an active non-list format reverts the block to `paragraph`;
/// - any toggle first unwraps an enclosing list (splitting it at the
///   target's boundaries), then a list format wraps the target in a
///   fresh `list > list-item` container of that type.
///
/// Returns the operation sequence already verified against a scratch
/// copy of the tree.
pub fn toggle_block(
    tree: &DocumentTree,
    path: &[usize],
    format: BlockType,
) -> Result<Vec<Operation>, OpError> {
    if format.is_table_kind() {
        return Err(OpError::invalid(
            "table structure is mutated only through row/column operations",
        ));
    }
    let target = tree
        .node_at(path)
        .ok_or_else(|| OpError::invalid(format!("path {path:?} does not resolve")))?;
    let Some(target_type) = target.block_type() else {
        return Err(OpError::invalid("toggle target is a text leaf"));
    };
    if target_type.is_table_kind() || target_type.is_list() {
        return Err(OpError::invalid(
            "toggle targets a content block, not a container",
        ));
    }

    let active = is_block_active(tree, path, format);
    let mut ops = Vec::new();
    let mut work = tree.clone();
    let mut cur = path.to_vec();

    // Unwrap an enclosing list, splitting it around the target item.
    if let Some(lp) = list_ancestor(&work, &cur) {
        let list = work
            .node_at(&lp)
            .ok_or_else(|| OpError::invalid("list ancestor vanished"))?;
        let list_type = list.block_type().unwrap_or(BlockType::BulletedList);
        let items = list.children().cloned().unwrap_or_default();
        let item_index = cur[lp.len()];
        if item_index >= items.len() {
            return Err(OpError::invalid("toggle target outside its list"));
        }

        let extracted_children = items[item_index]
            .children()
            .cloned()
            .unwrap_or_else(|| vec![items[item_index].clone()]);

        let mut replacements = Vec::new();
        if item_index > 0 {
            replacements.push(Node::block(list_type, items[..item_index].to_vec()));
        }
        let extracted_slot = replacements.len();
        replacements.push(Node::block(BlockType::Paragraph, extracted_children));
        if item_index + 1 < items.len() {
            replacements.push(Node::block(list_type, items[item_index + 1..].to_vec()));
        }

        // Insert the replacements after the list, then remove the list;
        // removal never empties a parent this way, so no normalization
        // artifacts sneak into the sequence.
        let base = *lp.last().expect("list ancestor path is non-empty");
        for (k, node) in replacements.into_iter().enumerate() {
            let mut at = lp.clone();
            *at.last_mut().unwrap() = base + 1 + k;
            let op = Operation::InsertNode { path: at, node };
            work = apply(&work, &op)?;
            ops.push(op);
        }
        let op = Operation::RemoveNode { path: lp.clone() };
        work = apply(&work, &op)?;
        ops.push(op);

        cur = lp;
        *cur.last_mut().unwrap() = base + extracted_slot;
    }

    if format.is_list() {
        if !active {
            let children = work
                .node_at(&cur)
                .and_then(Node::children)
                .cloned()
                .unwrap_or_else(|| vec![Node::text("")]);
            let wrapped = Node::block(
                format,
                vec![Node::block(BlockType::ListItem, children)],
            );
            let mut after = cur.clone();
            *after.last_mut().unwrap() += 1;
            let insert = Operation::InsertNode {
                path: after,
                node: wrapped,
            };
            work = apply(&work, &insert)?;
            ops.push(insert);
            let remove = Operation::RemoveNode { path: cur.clone() };
            work = apply(&work, &remove)?;
            ops.push(remove);
        }
        // Active list toggle: the unwrap above already reverted the item
        // to a plain paragraph.
    } else {
        let desired = if active { BlockType::Paragraph } else { format };
        if work.node_at(&cur).and_then(Node::block_type) != Some(desired) {
            let op = Operation::SetBlockType {
                path: cur.clone(),
                new_type: desired,
            };
            work = apply(&work, &op)?;
            ops.push(op);
        }
    }

    let _ = work;
    Ok(ops)
}

/// Row/column edits, one operation each.
pub fn insert_table_row(table_path: Path, row_index: usize) -> Operation {
    Operation::InsertRow {
        table_path,
        row_index,
    }
}

pub fn delete_table_row(table_path: Path, row_index: usize) -> Operation {
    Operation::DeleteRow {
        table_path,
        row_index,
    }
}

pub fn insert_table_column(table_path: Path, col_index: usize) -> Operation {
    Operation::InsertColumn {
        table_path,
        col_index,
    }
}

pub fn delete_table_column(table_path: Path, col_index: usize) -> Operation {
    Operation::DeleteColumn {
        table_path,
        col_index,
    }
}
