//! Line diffing and marker relocation.

pub mod calculator;
pub mod diff;
pub mod matcher;

pub use calculator::{relocate, relocate_all};
pub use diff::{diff_text, split_lines, Hunk};
pub use matcher::{best_matching_line, locate_by_code};
