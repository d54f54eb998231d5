//! Streaming character source backed by a fixed-size ring buffer.
//!
//! Positions are tracked as absolute document offsets; the buffer cell of an
//! offset is `offset % buffer.len()`. Three offsets matter:
//!
//! - the *read point*, the byte currently under examination,
//! - the *load point*, one past the last byte pulled from the stream,
//! - the optional *pin*, the first byte that must survive refills.
//!
//! Refills write between the load point and the pin (or the read point when
//! nothing is pinned), wrapping to the start of the buffer. When the pinned
//! span already occupies every cell, one byte of lookahead is kept outside
//! the ring so the tokenizer can still see what terminates the token; trying
//! to move past that byte while pinned is a capacity error.
use std::io::{ErrorKind, Read};

use log::trace;

use crate::error::{Error, SourceError};
use crate::source::CharacterSource;

/// Buffer size used when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Smallest accepted buffer size.
pub const MIN_BUFFER_SIZE: usize = 32;

/// A [`CharacterSource`] that streams from a reader through a ring buffer.
pub struct RingSource<R> {
    reader: R,
    buffer: Box<[u8]>,
    /// Absolute offset of the current byte.
    read: u64,
    /// Absolute offset one past the last byte stored in `buffer`.
    loaded: u64,
    /// Absolute offset of the pinned byte.
    pinned: Option<u64>,
    /// Byte at offset `loaded`, read while the pinned span filled the ring.
    lookahead: Option<u8>,
    /// The reader returned zero bytes.
    exhausted: bool,
}

impl<R: Read> RingSource<R> {
    /// Creates a ring source and performs the initial fill.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `buffer_size` is below
    /// [`MIN_BUFFER_SIZE`] and [`Error::Io`] if the first read fails.
    pub fn new(reader: R, buffer_size: usize) -> Result<Self, Error> {
        if buffer_size < MIN_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "read buffer size {buffer_size} is below the minimum of \
                 {MIN_BUFFER_SIZE}"
            )));
        }
        let mut source = Self {
            reader,
            buffer: vec![0; buffer_size].into_boxed_slice(),
            read: 0,
            loaded: 0,
            pinned: None,
            lookahead: None,
            exhausted: false,
        };
        source.fill()?;
        Ok(source)
    }

    /// Size of the ring buffer in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn index(&self, offset: u64) -> usize {
        // the remainder is below `buffer.len()`, so it fits in usize
        (offset % self.buffer.len() as u64) as usize
    }

    /// Pulls more bytes from the reader once the read point has caught up
    /// with the load point.
    fn fill(&mut self) -> Result<(), SourceError> {
        if self.exhausted {
            return Ok(());
        }
        let size = self.buffer.len();
        let floor = self.pinned.unwrap_or(self.read);
        let used = usize::try_from(self.loaded - floor).unwrap_or(usize::MAX);

        if used >= size {
            // every cell belongs to the pinned token; peek one byte past it
            let mut byte = [0u8; 1];
            if read_retrying(&mut self.reader, &mut byte)? == 0 {
                self.exhausted = true;
            } else {
                self.lookahead = Some(byte[0]);
            }
            trace!(
                "ring buffer full at offset {}, holding lookahead",
                self.loaded
            );
            return Ok(());
        }

        let start = self.index(self.loaded);
        let end = size.min(start + (size - used));
        let count =
            read_retrying(&mut self.reader, &mut self.buffer[start..end])?;
        if count == 0 {
            self.exhausted = true;
        } else {
            self.loaded += count as u64;
        }
        trace!(
            "refilled {count} bytes into cells {start}..{end} (pin: {:?})",
            self.pinned
        );
        Ok(())
    }

    /// Moves the lookahead byte into the ring. Only valid once the pin that
    /// forced it out has been released.
    fn flush_lookahead(&mut self) {
        if let Some(byte) = self.lookahead.take() {
            let cell = self.index(self.loaded);
            self.buffer[cell] = byte;
            self.loaded += 1;
        }
    }
}

impl<R: Read> CharacterSource for RingSource<R> {
    fn current(&self) -> Option<u8> {
        if self.read < self.loaded {
            Some(self.buffer[self.index(self.read)])
        } else {
            self.lookahead
        }
    }

    fn advance(&mut self) -> Result<bool, SourceError> {
        if self.is_at_end() {
            return Ok(false);
        }
        if self.lookahead.is_some() {
            return Err(SourceError::Capacity {
                buffer_size: self.buffer.len(),
                token_start: self.pinned.unwrap_or(self.read),
            });
        }
        self.read += 1;
        if self.read == self.loaded {
            self.fill()?;
        }
        Ok(!self.is_at_end())
    }

    fn pin(&mut self) -> usize {
        self.release();
        self.pinned = Some(self.read);
        self.index(self.read)
    }

    fn release(&mut self) {
        self.pinned = None;
        self.flush_lookahead();
    }

    fn is_at_end(&self) -> bool {
        self.read >= self.loaded && self.lookahead.is_none()
    }

    fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    fn offset(&self) -> u64 {
        self.read
    }
}

/// Reads into `buf`, retrying reads interrupted by a signal.
fn read_retrying<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<usize, SourceError> {
    loop {
        match reader.read(buf) {
            Ok(count) => return Ok(count),
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(SourceError::Io(err)),
        }
    }
}
