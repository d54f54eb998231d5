//! In-memory character source.
use crate::error::SourceError;
use crate::source::CharacterSource;

/// A [`CharacterSource`] over a document that is entirely in memory.
///
/// The whole input is the buffer, so pins never constrain anything and token
/// spans never wrap.
#[derive(Debug, Clone)]
pub struct SliceSource<'a> {
    /// The input sequence of bytes
    input: &'a [u8],
    /// Current position (current byte)
    position: usize,
}

impl<'a> SliceSource<'a> {
    /// Creates a source positioned at the first byte of `input`.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, position: 0 }
    }
}

impl CharacterSource for SliceSource<'_> {
    fn current(&self) -> Option<u8> {
        self.input.get(self.position).copied()
    }

    fn advance(&mut self) -> Result<bool, SourceError> {
        if self.position < self.input.len() {
            self.position += 1;
        }
        Ok(self.position < self.input.len())
    }

    fn pin(&mut self) -> usize {
        self.position
    }

    fn release(&mut self) {}

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn buffer(&self) -> &[u8] {
        self.input
    }

    fn offset(&self) -> u64 {
        self.position as u64
    }
}
