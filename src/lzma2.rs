use crate::buffer::{Flow, XzBuf};
use crate::dict::DictBuffer;
use crate::error::XzError;
use crate::lzma::LzmaCoder;
use crate::rc::{RcBuf, RcDecoder};
use crate::DICT_SIZE_DEFAULT_MAX;

/// Worst-case input bytes one LZMA symbol can consume. The framer
/// only lets the symbol loop start while at least this much input is
/// reachable, so a symbol never splits across a push boundary.
const IN_REQUIRED: usize = 21;

/// Size of the chunk-boundary lookahead buffer.
const LOOKAHEAD: usize = 3 * IN_REQUIRED;

/// What the framer expects next in the chunk stream.
///
/// Control byte values:
///   `0x00` end marker, `0x01`/`0x02` uncompressed chunk (with /
///   without dictionary reset), `0x80..=0xFF` LZMA chunk. For LZMA
///   chunks the top three bits select the reset level: `0xE0`
///   dictionary + state + properties, `0xC0` state + properties,
///   `0xA0` state only, `0x80` fully solid. The low five bits are
///   bits 16-20 of `uncompressed size - 1`. `0x03..=0x7F` is invalid.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq)]
enum Lzma2Seq {
    #[default]
    Control,
    Uncompressed1,
    Uncompressed2,
    Compressed0,
    Compressed1,
    Properties,
    LzmaPrepare,
    LzmaRun,
    Copy,
}

/// The LZMA2 framing layer: parses chunk headers, applies the
/// mandated resets and drives the LZMA coder with exact byte
/// accounting per chunk.
#[derive(Debug)]
pub(crate) struct Lzma2Decoder {
    /// Range decoder, re-armed per chunk.
    rc: RcDecoder,
    /// Current position in the chunk grammar.
    sequence: Lzma2Seq,
    /// Where to continue after the size fields.
    next: Lzma2Seq,
    /// Uncompressed bytes remaining in the current chunk.
    uncompressed: usize,
    /// Compressed bytes remaining in the current chunk.
    compressed: usize,
    /// The next chunk must reset the dictionary.
    need_dict_reset: bool,
    /// The next LZMA chunk must carry new properties.
    need_props: bool,
    /// The LZMA symbol decoder.
    coder: LzmaCoder,
    /// Bytes currently held in the lookahead buffer.
    temp_size: usize,
    /// Lookahead buffer bridging chunk data across push boundaries.
    temp_buf: [u8; LOOKAHEAD],
}

impl Lzma2Decoder {
    /// Constructor.
    pub fn new() -> Self {
        Self {
            rc: RcDecoder::new(),
            sequence: Lzma2Seq::Control,
            next: Lzma2Seq::Control,
            uncompressed: 0,
            compressed: 0,
            need_dict_reset: true,
            need_props: true,
            coder: LzmaCoder::new(),
            temp_size: 0,
            temp_buf: [0; LOOKAHEAD],
        }
    }

    /// Prepares for a block: decodes the dictionary-size property
    /// byte, sizes the window, and rewinds the chunk grammar.
    pub fn reset_for_block(&mut self, props: u8, d: &mut DictBuffer) -> Result<(), XzError> {
        if props > 40 {
            return Err(XzError::InvalidProperties);
        }
        let dict_size: u64 = if props == 40 {
            u64::from(u32::MAX)
        } else {
            u64::from(2 | u32::from(props & 1)) << (u32::from(props >> 1) + 11)
        };
        d.alloc(dict_size)?;

        self.rc.reset();
        self.sequence = Lzma2Seq::Control;
        self.next = Lzma2Seq::Control;
        self.need_dict_reset = true;
        self.temp_size = 0;
        self.uncompressed = 0;
        self.compressed = 0;
        Ok(())
    }

    /// Advances the chunk state machine as far as the input allows.
    pub fn run(&mut self, b: &mut XzBuf, d: &mut DictBuffer) -> Result<Flow, XzError> {
        loop {
            match self.sequence {
                Lzma2Seq::Control => {
                    let Some(control) = b.input_read_byte::<u8>() else {
                        return Ok(Flow::More);
                    };

                    if control == 0 {
                        return Ok(Flow::Done);
                    }
                    if control > 0x02 && control < 0x80 {
                        return Err(XzError::BadControl(control));
                    }
                    log::trace!("lzma2 control byte {control:#04x}");

                    if control >= 0xe0 || control == 0x01 {
                        self.need_props = true;
                        self.need_dict_reset = false;
                        d.reset();
                    } else if self.need_dict_reset {
                        return Err(XzError::DictResetExpected);
                    }

                    if control < 0x80 {
                        self.sequence = Lzma2Seq::Compressed0;
                        self.next = Lzma2Seq::Copy;
                        continue;
                    }

                    self.uncompressed = (usize::from(control) & 0x1f) << 16;
                    self.sequence = Lzma2Seq::Uncompressed1;
                    if control >= 0xc0 {
                        self.need_props = false;
                        self.next = Lzma2Seq::Properties;
                        continue;
                    }
                    if self.need_props {
                        return Err(XzError::MissingProperties);
                    }
                    self.next = Lzma2Seq::LzmaPrepare;
                    if control >= 0xa0 {
                        self.coder.reset_state();
                        self.rc.reset();
                    }
                }
                Lzma2Seq::Uncompressed1 => {
                    let Some(byte) = b.input_read_byte::<usize>() else {
                        return Ok(Flow::More);
                    };
                    self.uncompressed += byte << 8;
                    self.sequence = Lzma2Seq::Uncompressed2;
                }
                Lzma2Seq::Uncompressed2 => {
                    let Some(byte) = b.input_read_byte::<usize>() else {
                        return Ok(Flow::More);
                    };
                    self.uncompressed += byte + 1;
                    self.sequence = Lzma2Seq::Compressed0;
                }
                Lzma2Seq::Compressed0 => {
                    let Some(byte) = b.input_read_byte::<usize>() else {
                        return Ok(Flow::More);
                    };
                    self.compressed = byte << 8;
                    self.sequence = Lzma2Seq::Compressed1;
                }
                Lzma2Seq::Compressed1 => {
                    let Some(byte) = b.input_read_byte::<usize>() else {
                        return Ok(Flow::More);
                    };
                    self.compressed += byte + 1;
                    self.sequence = self.next;
                }
                Lzma2Seq::Properties => {
                    let Some(byte) = b.input_read_byte::<u8>() else {
                        return Ok(Flow::More);
                    };
                    self.coder.set_props_byte(byte)?;
                    self.rc.reset();
                    self.sequence = Lzma2Seq::LzmaPrepare;
                }
                Lzma2Seq::LzmaPrepare => {
                    if self.compressed < 5 {
                        return Err(XzError::TruncatedChunk);
                    }
                    if !self.rc.read_init(b) {
                        return Ok(Flow::More);
                    }
                    self.compressed -= 5;
                    self.sequence = Lzma2Seq::LzmaRun;
                }
                Lzma2Seq::LzmaRun => {
                    d.set_limit(self.uncompressed);
                    self.lzma_chunk(b, d)?;
                    let flushed = d.flush(b.out_mut());
                    self.uncompressed -= flushed;

                    if self.coder.end_marker() {
                        // Chunk sizes already delimit LZMA2 payloads;
                        // an embedded end marker is corruption.
                        return Err(XzError::SizeMismatch);
                    }
                    if self.uncompressed == 0 {
                        if self.compressed > 0
                            || self.coder.pending_len() > 0
                            || !self.rc.is_finished()
                        {
                            return Err(XzError::SizeMismatch);
                        }
                        self.rc.reset();
                        self.sequence = Lzma2Seq::Control;
                        continue;
                    }
                    if b.input_remaining() == 0 && self.temp_size < self.compressed {
                        return Ok(Flow::More);
                    }
                }
                Lzma2Seq::Copy => {
                    if b.input_remaining() == 0 {
                        return Ok(Flow::More);
                    }
                    self.compressed = d.copy_uncompressed(b, self.compressed);
                    if self.compressed > 0 {
                        return Ok(Flow::More);
                    }
                    self.sequence = Lzma2Seq::Control;
                }
            }
        }
    }

    /// Runs the symbol loop over as much chunk input as is reachable,
    /// bridging push boundaries through the lookahead buffer. The
    /// symbol loop may only start while `IN_REQUIRED` bytes are
    /// reachable; the tail of each chunk decodes from the zero-padded
    /// lookahead copy instead.
    fn lzma_chunk(&mut self, b: &mut XzBuf, d: &mut DictBuffer) -> Result<(), XzError> {
        let mut in_avail = b.input_remaining();

        if self.temp_size > 0 || self.compressed == 0 {
            debug_assert!(self.temp_size <= self.compressed);
            let tmplen = (LOOKAHEAD - IN_REQUIRED - self.temp_size)
                .min(self.compressed - self.temp_size)
                .min(in_avail);
            self.temp_buf[self.temp_size..self.temp_size + tmplen]
                .copy_from_slice(&b.input_slice()[..tmplen]);

            let limit;
            if self.temp_size + tmplen == self.compressed {
                self.temp_buf[self.temp_size + tmplen..].fill(0);
                limit = self.temp_size + tmplen;
            } else if self.temp_size + tmplen < IN_REQUIRED {
                self.temp_size += tmplen;
                b.input_seek_add(tmplen);
                return Ok(());
            } else {
                limit = self.temp_size + tmplen - IN_REQUIRED;
            }

            let temp = self.temp_buf;
            let mut rcb = RcBuf::new(&temp, 0, limit);
            self.coder.run(&mut self.rc, &mut rcb, d)?;

            if rcb.in_pos > self.temp_size + tmplen {
                // The range coder ran into the zero padding: the
                // declared compressed size was too small.
                return Err(XzError::SizeMismatch);
            }
            self.compressed -= rcb.in_pos;
            if rcb.in_pos < self.temp_size {
                self.temp_size -= rcb.in_pos;
                self.temp_buf.copy_within(rcb.in_pos.., 0);
                return Ok(());
            }
            b.input_seek_add(rcb.in_pos - self.temp_size);
            self.temp_size = 0;
        }

        in_avail = b.input_remaining();
        if in_avail >= IN_REQUIRED {
            let start = b.input_position();
            let in_limit = if in_avail >= self.compressed + IN_REQUIRED {
                start + self.compressed
            } else {
                b.in_size() - IN_REQUIRED
            };
            let mut rcb = RcBuf::new(b.input_all(), start, in_limit);
            self.coder.run(&mut self.rc, &mut rcb, d)?;

            let consumed = rcb.in_pos - start;
            if consumed > self.compressed {
                return Err(XzError::SizeMismatch);
            }
            self.compressed -= consumed;
            b.input_seek_add(consumed);
        }

        in_avail = b.input_remaining();
        if in_avail < IN_REQUIRED {
            let copy = in_avail.min(self.compressed);
            self.temp_buf[..copy].copy_from_slice(&b.input_slice()[..copy]);
            self.temp_size = copy;
            b.input_seek_add(copy);
        }
        Ok(())
    }
}

/// Decodes a standalone LZMA2 chunk sequence.
///
/// `props` is the one-byte dictionary-size property from the filter
/// descriptor. The sequence must end with the `0x00` end marker; when
/// `unpack_size` is given, the decoded length is verified against it.
/// Input past the end marker is ignored.
pub fn decode_lzma2(data: &[u8], props: u8, unpack_size: Option<u64>) -> Result<Vec<u8>, XzError> {
    let mut dict = DictBuffer::new(DICT_SIZE_DEFAULT_MAX);
    let mut dec = Lzma2Decoder::new();
    dec.reset_for_block(props, &mut dict)?;

    let mut out = Vec::new();
    let mut b = XzBuf::new(data, &mut out);
    match dec.run(&mut b, &mut dict)? {
        Flow::Done => {}
        Flow::More => return Err(XzError::TruncatedChunk),
    }
    drop(b);

    if let Some(expect) = unpack_size {
        if out.len() as u64 != expect {
            return Err(XzError::SizeMismatch);
        }
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn uncompressed_chunks_pass_through() {
        // 0x01: dictionary reset + uncompressed chunk of four bytes.
        let data = [0x01, 0x00, 0x03, b'a', b'b', b'c', b'd', 0x00];
        assert_eq!(decode_lzma2(&data, 0, Some(4)).unwrap(), b"abcd");
    }

    #[test]
    fn second_chunk_keeps_dictionary() {
        let data = [
            0x01, 0x00, 0x01, b'h', b'i', // reset + "hi"
            0x02, 0x00, 0x00, b'!', // continuation + "!"
            0x00,
        ];
        assert_eq!(decode_lzma2(&data, 0, None).unwrap(), b"hi!");
    }

    #[test]
    fn reserved_control_byte() {
        let data = [0x03];
        assert_eq!(decode_lzma2(&data, 0, None), Err(XzError::BadControl(0x03)));
    }

    #[test]
    fn first_chunk_must_reset_dictionary() {
        let data = [0x02, 0x00, 0x00, b'x', 0x00];
        assert_eq!(
            decode_lzma2(&data, 0, None),
            Err(XzError::DictResetExpected)
        );
    }

    #[test]
    fn lzma_chunk_needs_properties() {
        // Uncompressed reset chunk, then a solid LZMA chunk without
        // any properties ever having been set.
        let data = [0x01, 0x00, 0x00, b'x', 0x80];
        assert_eq!(
            decode_lzma2(&data, 0, None),
            Err(XzError::MissingProperties)
        );
    }

    #[test]
    fn missing_end_marker_is_truncation() {
        let data = [0x01, 0x00, 0x00, b'x'];
        assert_eq!(decode_lzma2(&data, 0, None), Err(XzError::TruncatedChunk));
    }

    #[test]
    fn dictionary_byte_over_forty() {
        assert_eq!(
            decode_lzma2(&[0x00], 41, None),
            Err(XzError::InvalidProperties)
        );
    }

    #[test]
    fn four_gigabyte_dictionary_exceeds_cap() {
        assert!(matches!(
            decode_lzma2(&[0x00], 40, None),
            Err(XzError::DictionaryTooLarge(_))
        ));
    }

    #[test]
    fn unpack_size_verified() {
        let data = [0x01, 0x00, 0x00, b'x', 0x00];
        assert_eq!(
            decode_lzma2(&data, 0, Some(2)),
            Err(XzError::SizeMismatch)
        );
    }
}
