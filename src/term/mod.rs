//! Terminal emulation: colour model, cell grid, and ANSI dispatch.

pub mod ansi;
pub mod color;
pub mod grid;
