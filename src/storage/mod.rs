//! Storage layer for chainback
//!
//! JSON files with atomic writes, plus the file-tree primitives the backup
//! engine uses to copy and measure artifacts.

pub mod file_io;
pub mod tree;

pub use file_io::{read_json_optional, read_json_required, write_json_atomic};
pub use tree::{copy_file, copy_tree, list_files, TreeFile};
