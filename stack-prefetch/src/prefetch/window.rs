//! Index range helpers.
//!
//! The batch window is positional: it starts at the viewer's cursor and
//! covers up to `ceiling` items forward, regardless of which of those items
//! are still pending. Loading an item that is already cached is expected to
//! be a cheap no-op at the loader level.

use std::ops::Range;

/// All indices of a stack, ascending: `0..=stack_len - 1`.
pub fn initial_indices(stack_len: usize) -> Range<usize> {
    0..stack_len
}

/// Indices to request in one pass.
///
/// Starts at `current_index` (clamped to the last valid index) and extends
/// forward by at most `ceiling` items, never past the end of the stack.
/// Empty only when the stack is empty or `ceiling` is zero.
pub fn batch_window(current_index: usize, ceiling: usize, stack_len: usize) -> Range<usize> {
    if stack_len == 0 {
        return 0..0;
    }
    let start = current_index.min(stack_len - 1);
    let end = start.saturating_add(ceiling).min(stack_len);
    start..end
}
