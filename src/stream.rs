use crate::buffer::XzBuf;
use crate::error::XzError;
use crate::xz::{XzInner, FOOTER_MAGIC, STREAM_MAGIC};
use crate::DICT_SIZE_DEFAULT_MAX;
use core::fmt::{Debug, Formatter};
use core::num::NonZeroUsize;
use std::io::Read;

/// Cap on index-derived pre-allocation; headers are untrusted input.
const PREALLOC_CAP: u64 = 1 << 28;

/// Decodes one little-endian base-128 integer out of a scan slice.
fn scan_vli(buf: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value = 0u64;
    let mut bits = 0;
    loop {
        let byte = *buf.get(*pos)?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << bits;
        if byte & 0x80 == 0 {
            if byte == 0 && bits != 0 {
                return None;
            }
            return Some(value);
        }
        bits += 7;
        if bits >= 63 {
            return None;
        }
    }
}

/// Walks the streams backward through their footers and indices and
/// sums the declared uncompressed sizes, so the one-shot decoder can
/// pre-allocate. Purely a hint: `None` whenever anything along the
/// walk looks off, and never an error — the forward decode is the
/// single source of truth for diagnostics.
fn prescan(data: &[u8]) -> Option<u64> {
    let mut end = data.len();
    let mut total: u64 = 0;
    let mut streams = 0u32;
    loop {
        while end >= 4 && data[end - 4..end] == [0, 0, 0, 0] {
            end -= 4;
        }
        if end == 0 {
            return if streams > 0 { Some(total) } else { None };
        }
        if end < 32 || &data[end - 2..end] != FOOTER_MAGIC {
            return None;
        }

        let backward = u64::from(u32::from_le_bytes([
            data[end - 8],
            data[end - 7],
            data[end - 6],
            data[end - 5],
        ]));
        let index_size = usize::try_from((backward + 1) * 4).ok()?;
        let footer_start = end - 12;
        let index_start = footer_start.checked_sub(index_size)?;
        let idx = &data[index_start..footer_start];
        if idx.first() != Some(&0) {
            return None;
        }

        let mut pos = 1usize;
        let count = scan_vli(idx, &mut pos)?;
        let mut blocks_size: u64 = 0;
        let mut stream_total: u64 = 0;
        for _ in 0..count {
            let unpadded = scan_vli(idx, &mut pos)?;
            let uncompressed = scan_vli(idx, &mut pos)?;
            blocks_size = blocks_size.checked_add((unpadded + 3) & !3)?;
            stream_total = stream_total.checked_add(uncompressed)?;
        }

        let blocks_size = usize::try_from(blocks_size).ok()?;
        let header_end = index_start.checked_sub(blocks_size)?;
        let stream_start = header_end.checked_sub(12)?;
        if &data[stream_start..stream_start + 6] != STREAM_MAGIC {
            return None;
        }

        total = total.checked_add(stream_total)?;
        streams += 1;
        end = stream_start;
    }
}

/// Decodes a complete XZ byte buffer, including concatenated streams
/// and trailing padding, into one output buffer.
pub fn decode_xz(data: &[u8]) -> Result<Vec<u8>, XzError> {
    let hint = prescan(data);
    let capacity = hint.map_or(0, |n| usize::try_from(n.min(PREALLOC_CAP)).unwrap_or(0));
    log::debug!("one-shot decode of {} bytes, size hint {hint:?}", data.len());

    let mut inner = XzInner::new(DICT_SIZE_DEFAULT_MAX, true);
    let mut out = Vec::with_capacity(capacity);
    let mut b = XzBuf::new(data, &mut out);
    inner.decode(&mut b)?;
    drop(b);
    inner.check_finished()?;
    Ok(out)
}

/// Push-style streaming XZ decoder.
///
/// Feed input in chunks of any size with [`XzStreamDecoder::push`];
/// each call returns the bytes that became available. Call
/// [`XzStreamDecoder::finish`] after the last chunk to verify the
/// container ended cleanly. Output is identical to [`decode_xz`] of
/// the concatenated input, for every partitioning.
pub struct XzStreamDecoder {
    /// The container machine.
    inner: XzInner,
}

impl XzStreamDecoder {
    /// Decoder with the default dictionary cap of 64 MiB.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_dict(DICT_SIZE_DEFAULT_MAX)
    }

    /// Decoder accepting dictionaries up to `max_dict` bytes.
    #[must_use]
    pub fn with_max_dict(max_dict: usize) -> Self {
        Self {
            inner: XzInner::new(max_dict.min(crate::DICT_SIZE_MAX), true),
        }
    }

    /// Enables or disables integrity-check verification. Disabled,
    /// check fields are skipped by length and never compared.
    pub fn set_verify_checks(&mut self, verify: bool) {
        self.inner.set_verify_checks(verify);
    }

    /// Feeds one input chunk, returning the decoded bytes it
    /// produced. After an error every further call repeats it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<u8>, XzError> {
        let mut out = Vec::new();
        let mut b = XzBuf::new(chunk, &mut out);
        self.inner.decode(&mut b)?;
        debug_assert_eq!(b.input_remaining(), 0);
        drop(b);
        Ok(out)
    }

    /// Signals end of input. Fails unless the input ended exactly on
    /// a stream boundary (trailing padding permitting).
    pub fn finish(self) -> Result<Vec<u8>, XzError> {
        self.inner.check_finished()?;
        Ok(Vec::new())
    }
}

impl Default for XzStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for XzStreamDecoder {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("XzStreamDecoder").finish_non_exhaustive()
    }
}

/// [`Read`] adapter decoding an XZ stream from an inner reader.
pub struct XzReader<R: Read> {
    /// The container machine.
    inner: XzInner,
    /// The compressed source.
    reader: R,
    /// Input staging buffer.
    in_buf: Vec<u8>,
    /// Decoded bytes not yet handed to the caller.
    out_buf: Vec<u8>,
    /// Read position in `out_buf`.
    out_pos: usize,
    /// Source exhausted and container verified.
    eos: bool,
}

impl<R: Read> XzReader<R> {
    /// Reader with an 8 KiB input buffer.
    pub fn new(reader: R) -> Self {
        Self::with_buffer_size(reader, NonZeroUsize::new(8192).unwrap_or(NonZeroUsize::MIN))
    }

    /// Reader with a chosen input buffer size.
    pub fn with_buffer_size(reader: R, buffer_size: NonZeroUsize) -> Self {
        Self {
            inner: XzInner::new(DICT_SIZE_DEFAULT_MAX, true),
            reader,
            in_buf: vec![0; buffer_size.get()],
            out_buf: Vec::new(),
            out_pos: 0,
            eos: false,
        }
    }

    /// Gives the inner reader back.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> Read for XzReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.out_pos < self.out_buf.len() {
                let n = (self.out_buf.len() - self.out_pos).min(buf.len());
                buf[..n].copy_from_slice(&self.out_buf[self.out_pos..self.out_pos + n]);
                self.out_pos += n;
                return Ok(n);
            }
            if self.eos {
                return Ok(0);
            }

            self.out_buf.clear();
            self.out_pos = 0;
            let read = self.reader.read(&mut self.in_buf)?;
            if read == 0 {
                self.inner
                    .check_finished()
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                self.eos = true;
                return Ok(0);
            }
            let mut b = XzBuf::new(&self.in_buf[..read], &mut self.out_buf);
            self.inner
                .decode(&mut b)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        }
    }
}

impl<R: Read + Debug> Debug for XzReader<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("XzReader")
            .field("reader", &self.reader)
            .field("buffered", &(self.out_buf.len() - self.out_pos))
            .field("eos", &self.eos)
            .finish_non_exhaustive()
    }
}
