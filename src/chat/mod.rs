//! Request-time retrieval orchestration.

mod pipeline;
mod prompt;

pub use pipeline::{ChatAnswer, ChatError, ChatPipeline, ChatTurn, DEFAULT_TOP_K};

/// Largest char boundary not exceeding `index`.
pub(crate) fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}
