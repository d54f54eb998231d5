//! # Character Sources
//!
//! A character source hands the tokenizer one byte of a JSON document at a
//! time. Two implementations exist: [`SliceSource`] for documents already in
//! memory and [`RingSource`] for documents streamed from a [`std::io::Read`]
//! through a fixed-size ring buffer.
//!
//! Tokens are zero-copy views into [`CharacterSource::buffer`]. To keep a
//! partially scanned token alive across a refill, the tokenizer *pins* the
//! token's first byte; cells at or after the pin are never overwritten until
//! the pin is released.
pub mod ring;
pub mod slice;

use crate::error::SourceError;

// Re-exports
pub use ring::{DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE, RingSource};
pub use slice::SliceSource;

/// Supplies the bytes of a JSON document to the tokenizer.
pub trait CharacterSource {
    /// Returns the byte under the read point, or `None` once the source is
    /// exhausted.
    fn current(&self) -> Option<u8>;

    /// Moves the read point forward by one byte.
    ///
    /// Returns `Ok(false)` when there is no byte left after advancing.
    ///
    /// # Errors
    ///
    /// Fails with [`SourceError::Capacity`] when advancing would overwrite a
    /// pinned cell, or with [`SourceError::Io`] when refilling fails.
    fn advance(&mut self) -> Result<bool, SourceError>;

    /// Pins the current position, releasing any previous pin, and returns the
    /// buffer index of the pinned byte.
    fn pin(&mut self) -> usize;

    /// Releases the current pin, if any.
    fn release(&mut self);

    /// Returns `true` once every byte of the document has been consumed.
    fn is_at_end(&self) -> bool;

    /// The buffer that token spans index into. Indices wrap modulo its length.
    fn buffer(&self) -> &[u8];

    /// Absolute document offset of the byte under the read point.
    fn offset(&self) -> u64;
}

impl<S: CharacterSource + ?Sized> CharacterSource for Box<S> {
    fn current(&self) -> Option<u8> {
        (**self).current()
    }

    fn advance(&mut self) -> Result<bool, SourceError> {
        (**self).advance()
    }

    fn pin(&mut self) -> usize {
        (**self).pin()
    }

    fn release(&mut self) {
        (**self).release();
    }

    fn is_at_end(&self) -> bool {
        (**self).is_at_end()
    }

    fn buffer(&self) -> &[u8] {
        (**self).buffer()
    }

    fn offset(&self) -> u64 {
        (**self).offset()
    }
}
