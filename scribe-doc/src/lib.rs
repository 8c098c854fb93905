//! # scribe-doc — Rich-text document tree and edit operations
//!
//! The structural model shared by every replica of a collaborative
//! document: an ordered tree of blocks (paragraphs, headings, lists,
//! tables) with formatted text leaves, plus the closed vocabulary of
//! atomic edits applied to it.
//!
//! ## Modules
//!
//! - [`node`] — block/text node model with Slate-shaped JSON serde
//! - [`tree`] — [`DocumentTree`], path addressing, invariant validation
//! - [`ops`] — [`Operation`] variants and the pure [`apply`] function
//! - [`edit`] — toolbar-level helpers producing operation sequences
//! - [`error`] — [`OpError`] (invalid operation / invariant violation)
//!
//! Every replica owns its tree; operations are the unit of network
//! transmission and are replayed verbatim by remote peers. `apply`
//! guarantees the invariants hold after every successful edit; it makes
//! no ordering or idempotency promise across replicas.

pub mod edit;
pub mod error;
pub mod node;
pub mod ops;
pub mod tree;

pub use edit::{
    delete_table_column, delete_table_row, insert_table_column, insert_table_row,
    is_block_active, is_mark_active, toggle_block, toggle_mark,
};
pub use error::OpError;
pub use node::{BlockType, Mark, Node};
pub use ops::{apply, apply_all, Operation, PathRange};
pub use tree::{DocumentTree, Path};
