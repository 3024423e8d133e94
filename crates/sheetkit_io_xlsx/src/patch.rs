//! Buffered writer over a one-way sink that can still overwrite one reserved window.
//!
//! Bytes are held in memory and forwarded to the sink in `size_buffer` chunks.
//! While a window is reserved, nothing at or after the window start is
//! forwarded, so the window can be spliced with its final content later.

use std::io::Write;

use tracing::trace;

use crate::conf::C_DIMENSION_REF_MAX;
use crate::spec::{SpecCancelToken, XlsxStreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SpecReservation {
    offset: u64,
    width: usize,
}

/// How the dimension element was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumDimensionSlot {
    /// Final range was known and written directly.
    Exact,
    /// A window was reserved and must be patched before the final flush.
    Reserved {
        /// Logical offset of the window.
        offset: u64,
        /// Window width in bytes.
        width: usize,
    },
}

/// Write-through buffer with a single retroactive patch window.
pub struct BufferedPatchWriter<W: Write> {
    sink: W,
    buffer: Vec<u8>,
    size_buffer: usize,
    n_bytes_forwarded: u64,
    reservation: Option<SpecReservation>,
    cancel: SpecCancelToken,
}

impl<W: Write> BufferedPatchWriter<W> {
    /// Wrap `sink`; `size_buffer` of zero forwards on every write.
    pub fn new(sink: W, size_buffer: usize, cancel: SpecCancelToken) -> Self {
        Self {
            sink,
            buffer: Vec::with_capacity(usize::min(size_buffer, 1 << 20)),
            size_buffer,
            n_bytes_forwarded: 0,
            reservation: None,
            cancel,
        }
    }

    /// Logical offset of the next written byte.
    pub fn current_offset(&self) -> u64 {
        self.n_bytes_forwarded + self.buffer.len() as u64
    }

    /// Borrow the underlying sink.
    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// Append bytes.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), XlsxStreamError> {
        self.cancel.check()?;
        self.buffer.extend_from_slice(bytes);
        self.forward_if_full()
    }

    /// Append UTF-8 text.
    pub fn write_str(&mut self, text: &str) -> Result<(), XlsxStreamError> {
        self.write(text.as_bytes())
    }

    /// Write `width` filler bytes and return their logical offset.
    ///
    /// Only one window may be outstanding at a time.
    pub fn reserve(&mut self, width: usize) -> Result<u64, XlsxStreamError> {
        self.cancel.check()?;
        if let Some(reservation) = self.reservation {
            return Err(XlsxStreamError::InvalidInput(format!(
                "a window is already reserved at offset {}",
                reservation.offset
            )));
        }

        let n_offset = self.current_offset();
        self.buffer.resize(self.buffer.len() + width, b' ');
        self.reservation = Some(SpecReservation {
            offset: n_offset,
            width,
        });
        trace!(offset = n_offset, width, "reserved patch window");
        Ok(n_offset)
    }

    /// Replace the reserved window at `offset` with `bytes`.
    ///
    /// The window shrinks to `bytes.len()`; unused filler is dropped.
    pub fn patch(&mut self, offset: u64, bytes: &[u8]) -> Result<(), XlsxStreamError> {
        if offset < self.n_bytes_forwarded {
            return Err(XlsxStreamError::AlreadyFlushed { offset });
        }
        let Some(reservation) = self.reservation.filter(|r| r.offset == offset) else {
            return Err(XlsxStreamError::PatchOutOfRange { offset });
        };
        if bytes.len() > reservation.width {
            return Err(XlsxStreamError::PatchOverflow {
                len: bytes.len(),
                width: reservation.width,
            });
        }

        let n_start = (offset - self.n_bytes_forwarded) as usize;
        self.buffer
            .splice(n_start..n_start + reservation.width, bytes.iter().copied());
        self.reservation = None;
        trace!(offset, len = bytes.len(), "patched reserved window");
        self.forward_if_full()
    }

    /// Forward every buffered byte. An outstanding window becomes unpatchable.
    pub fn flush(&mut self) -> Result<(), XlsxStreamError> {
        self.cancel.check()?;
        let n_len = self.buffer.len();
        self.forward(n_len)?;
        self.reservation = None;
        self.sink.flush()?;
        Ok(())
    }

    /// Flush and hand the sink back.
    pub fn finish(mut self) -> Result<W, XlsxStreamError> {
        self.flush()?;
        Ok(self.sink)
    }

    /// Open the dimension element: written directly when `range` is known,
    /// otherwise reserved wide enough for any sheet.
    pub fn open_dimension(
        &mut self,
        range: Option<&str>,
    ) -> Result<EnumDimensionSlot, XlsxStreamError> {
        if let Some(range) = range {
            self.write_str(&render_dimension_element(range))?;
            return Ok(EnumDimensionSlot::Exact);
        }

        let n_width = render_dimension_element(C_DIMENSION_REF_MAX).len();
        let n_offset = self.reserve(n_width)?;
        Ok(EnumDimensionSlot::Reserved {
            offset: n_offset,
            width: n_width,
        })
    }

    /// Complete the dimension element opened by [`Self::open_dimension`].
    pub fn close_dimension(
        &mut self,
        slot: EnumDimensionSlot,
        range: &str,
    ) -> Result<(), XlsxStreamError> {
        match slot {
            EnumDimensionSlot::Exact => Ok(()),
            EnumDimensionSlot::Reserved { offset, .. } => {
                self.patch(offset, render_dimension_element(range).as_bytes())
            }
        }
    }

    fn forward_if_full(&mut self) -> Result<(), XlsxStreamError> {
        if self.buffer.len() < self.size_buffer {
            return Ok(());
        }
        let n_safe = match self.reservation {
            None => self.buffer.len(),
            Some(reservation) => (reservation.offset - self.n_bytes_forwarded) as usize,
        };
        self.forward(n_safe)
    }

    fn forward(&mut self, n_len: usize) -> Result<(), XlsxStreamError> {
        if n_len == 0 {
            return Ok(());
        }
        self.cancel.check()?;
        self.sink.write_all(&self.buffer[..n_len])?;
        self.buffer.drain(..n_len);
        self.n_bytes_forwarded += n_len as u64;
        Ok(())
    }
}

/// `<x:dimension ref="…"/>` for a range reference.
pub fn render_dimension_element(range: &str) -> String {
    format!("<x:dimension ref=\"{range}\"/>")
}
