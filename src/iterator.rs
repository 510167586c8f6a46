//! The iterator capability shared by blocks and tables (§5, §7): a cursor
//! over sorted key/value pairs that can move both forward and backward and
//! jump straight to a key.
//!
//! This does not extend `std::iter::Iterator`: that trait has no way to
//! express "step backward" or "jump to this key" without forcing every
//! implementor to buffer its output, and every block/table here is already a
//! random-access structure that can satisfy those operations directly.

use crate::error::Result;

/// A stateful cursor over key/value pairs in sorted order. Implementors keep
/// track of "the current entry", which `current` returns without consuming
/// it; `next`/`prev` advance the cursor and return the new current entry (or
/// `None` if the cursor has moved past either end, at which point it is no
/// longer valid until seeked).
pub trait LdbIterator {
    /// Advances to the next entry, returning it, or `None` if there is none.
    /// Once `None` is returned the iterator is invalid until a seek call.
    fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)>;

    /// Moves to the previous entry, returning it, or `None` if there is none.
    fn prev(&mut self) -> Option<(Vec<u8>, Vec<u8>)>;

    /// Positions the cursor at the first entry with a key `>= target`. Marks
    /// the iterator invalid if no such entry exists.
    fn seek(&mut self, target: &[u8]) -> Result<()>;

    /// Positions the cursor before the first entry.
    fn seek_to_first(&mut self) -> Result<()>;

    /// Whether the cursor currently rests on a valid entry.
    fn valid(&self) -> bool;

    /// Returns the entry the cursor currently rests on, without advancing.
    /// Panics if `!self.valid()`.
    fn current(&self) -> (Vec<u8>, Vec<u8>);
}
