//! Channel layer for pattern matching on interactive shells.
//!
//! This module handles prompt detection, scripted answers and ANSI
//! stripping for devices driven through a PTY.

mod buffer;
mod patterns;

pub use buffer::PatternBuffer;
pub use patterns::{Answer, compile_prompt_pattern, normalize_output};
