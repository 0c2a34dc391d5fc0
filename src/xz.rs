use crate::buffer::{Flow, XzBuf};
use crate::check::{CheckState, XzCheck, CRC32};
use crate::dict::DictBuffer;
use crate::error::XzError;
use crate::filter::{FilterChain, Stage};
use crate::lzma2::Lzma2Decoder;
use crate::vli::{VliDecoder, VliResult};
use core::mem;
use crc::Table;

/// Stream header and footer are both twelve bytes.
const HEADER_SIZE: usize = 12;

/// The six magic bytes opening every stream.
pub(crate) const STREAM_MAGIC: &[u8] = b"\xFD7zXZ\0";

/// The two magic bytes closing every stream.
pub(crate) const FOOTER_MAGIC: &[u8] = b"YZ";

/// Position in the container grammar.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum XzState {
    /// Twelve-byte stream header.
    StreamHeader,
    /// Either a block header size byte or the index indicator.
    StreamStart,
    /// Collecting a block header.
    BlockHeader,
    /// Decompressing block data.
    Block,
    /// Zero padding aligning the block to four bytes.
    BlockPadding,
    /// The check field after a block.
    BlockCheck,
    /// Index records.
    Index,
    /// Zero padding aligning the index to four bytes.
    IndexPadding,
    /// The CRC32 closing the index.
    IndexCrc,
    /// Twelve-byte stream footer.
    Footer,
    /// Zero padding after a stream; another stream may follow.
    StreamPadding,
}

/// Which integer of the index comes next.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
enum IndexSeq {
    #[default]
    Count,
    Unpadded,
    Uncompressed,
}

/// Running totals folded into a CRC so the blocks actually decoded
/// can be compared against what the index claims.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
struct VerifyHash {
    /// Sum of unpadded block sizes.
    unpadded: u64,
    /// Sum of uncompressed block sizes.
    uncompressed: u64,
    /// Rolling CRC over the per-block records.
    crc: u32,
}

impl VerifyHash {
    /// Folds one block record into the totals.
    fn record(&mut self, unpadded: u64, uncompressed: u64) {
        self.unpadded = self.unpadded.wrapping_add(unpadded);
        self.uncompressed = self.uncompressed.wrapping_add(uncompressed);
        let mut buf = [0u8; 20];
        buf[..8].copy_from_slice(&self.unpadded.to_le_bytes());
        buf[8..16].copy_from_slice(&self.uncompressed.to_le_bytes());
        buf[16..].copy_from_slice(&self.crc.to_le_bytes());
        self.crc = CRC32.checksum(&buf);
    }

    /// Back to zero for the next stream.
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Sizes declared by the current block header. `u64::MAX` means the
/// header did not declare the value.
#[derive(Debug, Clone, Default)]
struct BlockHeaderInfo {
    /// Declared compressed size.
    compressed: u64,
    /// Declared uncompressed size.
    uncompressed: u64,
    /// Real header size in bytes.
    size: usize,
}

/// What the blocks decoded so far actually contained.
#[derive(Debug, Clone, Default)]
struct BlockTotals {
    /// Compressed bytes of the current block.
    compressed: u64,
    /// Uncompressed bytes of the current block.
    uncompressed: u64,
    /// Blocks completed in this stream.
    count: u64,
    /// Verification totals over completed blocks.
    hash: VerifyHash,
}

/// Index bookkeeping while it is being decoded.
#[derive(Debug, Clone, Default)]
struct IndexState {
    /// Which integer comes next.
    sequence: IndexSeq,
    /// Bytes of index consumed so far (indicator through padding).
    size: u64,
    /// Records still expected.
    count: u64,
    /// Unpadded size waiting for its uncompressed partner.
    pending_unpadded: u64,
    /// Verification totals over index records.
    hash: VerifyHash,
}

impl IndexState {
    /// Back to the initial state for the next stream.
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Collects fixed-size structures (headers, footer, check fields)
/// that may arrive split across pushes.
struct TempBuf {
    /// Fill position.
    pos: usize,
    /// How many bytes the current structure needs.
    size: usize,
    /// Backing storage; block headers cap at 1024 bytes.
    buf: [u8; 1024],
}

impl TempBuf {
    /// Constructor.
    const fn new() -> Self {
        Self {
            pos: 0,
            size: HEADER_SIZE,
            buf: [0; 1024],
        }
    }

    /// The collected structure.
    fn filled(&self) -> &[u8] {
        &self.buf[self.pos..self.size]
    }

    /// Re-arms for a structure of `size` bytes.
    const fn arm(&mut self, size: usize) {
        debug_assert!(size <= 1024);
        self.pos = 0;
        self.size = size;
    }

    /// Chops the trailing CRC32 off a collected structure.
    fn split_trailing_crc(&mut self) -> u32 {
        debug_assert!(self.size >= 4 && self.pos == 0);
        self.size -= 4;
        u32::from_le_bytes([
            self.buf[self.size],
            self.buf[self.size + 1],
            self.buf[self.size + 2],
            self.buf[self.size + 3],
        ])
    }

    /// Pulls input until the structure is complete. Returns true when
    /// it is, with the fill position rewound for reading.
    fn fill(&mut self, b: &mut XzBuf) -> bool {
        let copy = (self.size - self.pos).min(b.input_remaining());
        self.buf[self.pos..self.pos + copy].copy_from_slice(&b.input_slice()[..copy]);
        b.input_seek_add(copy);
        self.pos += copy;
        if self.pos == self.size {
            self.pos = 0;
            return true;
        }
        false
    }
}

/// Decodes one VLI known to be fully inside `buf`, advancing `pos`.
fn read_header_vli(buf: &[u8], pos: &mut usize) -> Result<u64, XzError> {
    let mut vli = VliDecoder::new();
    match vli.decode(&buf[*pos..]) {
        VliResult::Ok(value, len) => {
            *pos += len;
            Ok(value)
        }
        VliResult::MoreDataNeeded(_) => Err(XzError::TruncatedBlockHeader),
        VliResult::Invalid => Err(XzError::IntegerTooLarge),
    }
}

/// The XZ container state machine: stream headers and footers, block
/// headers with their filter chains, block payloads, the index, and
/// stream padding with multi-stream concatenation.
///
/// Input arrives in arbitrary pieces; each [`XzInner::decode`] call
/// consumes everything it is given and appends decoded bytes to the
/// sink. [`XzInner::check_finished`] judges end-of-input.
pub(crate) struct XzInner {
    /// Grammar position.
    state: XzState,
    /// Check type of the current stream.
    check: XzCheck,
    /// Whether content checks are verified or skipped.
    verify_checks: bool,
    /// Stateful integer decoder for the index.
    vli: VliDecoder,
    /// Collector for fixed-size structures.
    temp: TempBuf,
    /// Sizes declared by the current block header.
    block_header: BlockHeaderInfo,
    /// Actual totals of the current stream's blocks.
    block: BlockTotals,
    /// Index bookkeeping.
    index: IndexState,
    /// Digest over the index bytes for its trailing CRC32.
    index_digest: Option<crc::Digest<'static, u32, Table<16>>>,
    /// Content check digest of the current block.
    check_state: CheckState,
    /// The LZMA2 layer.
    lzma2: Lzma2Decoder,
    /// The sliding window, shared across blocks.
    dict: DictBuffer,
    /// The current block's preprocessing filters.
    chain: FilterChain,
    /// Scratch the LZMA2 output lands in before filtering.
    block_buf: Vec<u8>,
    /// Stream padding bytes seen since the last footer.
    pad_count: u64,
    /// Terminal error, replayed on every later call.
    failed: Option<XzError>,
}

impl XzInner {
    /// Constructor.
    pub fn new(max_dict: usize, verify_checks: bool) -> Self {
        Self {
            state: XzState::StreamHeader,
            check: XzCheck::None,
            verify_checks,
            vli: VliDecoder::new(),
            temp: TempBuf::new(),
            block_header: BlockHeaderInfo::default(),
            block: BlockTotals::default(),
            index: IndexState::default(),
            index_digest: None,
            check_state: CheckState::Skip,
            lzma2: Lzma2Decoder::new(),
            dict: DictBuffer::new(max_dict),
            chain: FilterChain::new(),
            block_buf: Vec::new(),
            pad_count: 0,
            failed: None,
        }
    }

    /// Toggles content-check verification.
    pub fn set_verify_checks(&mut self, verify: bool) {
        self.verify_checks = verify;
    }

    /// Consumes all of `b`'s input, appending decoded bytes to its
    /// sink. Errors are terminal and replayed.
    pub fn decode(&mut self, b: &mut XzBuf) -> Result<(), XzError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        let result = self.dec_main(b);
        if let Err(err) = &result {
            self.failed = Some(err.clone());
        }
        result
    }

    /// End-of-input verdict: fine exactly between streams (stream
    /// padding permitting), truncation anywhere else.
    pub fn check_finished(&self) -> Result<(), XzError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        match self.state {
            XzState::StreamPadding => {
                if self.pad_count % 4 == 0 {
                    Ok(())
                } else {
                    Err(XzError::CorruptedPadding)
                }
            }
            XzState::Index | XzState::IndexPadding | XzState::IndexCrc => {
                Err(XzError::TruncatedIndex)
            }
            XzState::BlockHeader => Err(XzError::TruncatedBlockHeader),
            XzState::Block => Err(XzError::TruncatedChunk),
            _ => Err(XzError::TruncatedInput),
        }
    }

    /// Rewinds the per-stream machinery for a concatenated stream.
    fn begin_stream(&mut self) {
        self.state = XzState::StreamHeader;
        self.check = XzCheck::None;
        self.vli.reset();
        self.temp.arm(HEADER_SIZE);
        self.block = BlockTotals::default();
        self.index.reset();
        self.index_digest = None;
        self.check_state = CheckState::Skip;
    }

    /// Folds the index bytes consumed since `in_start` into the size
    /// and CRC bookkeeping.
    fn index_update(&mut self, b: &XzBuf, in_start: usize) {
        let consumed = b.input_position() - in_start;
        self.index.size = self.index.size.wrapping_add(consumed as u64);
        if let Some(digest) = &mut self.index_digest {
            digest.update(&b.input_all()[in_start..b.input_position()]);
        }
    }

    /// Decodes index records until they are exhausted or input is.
    fn dec_index(&mut self, b: &mut XzBuf, in_start: usize) -> Result<Flow, XzError> {
        loop {
            let vli = match self.vli.decode(b.input_slice()) {
                VliResult::Ok(value, len) => {
                    b.input_seek_add(len);
                    value
                }
                VliResult::MoreDataNeeded(len) => {
                    b.input_seek_add(len);
                    self.index_update(b, in_start);
                    return Ok(Flow::More);
                }
                VliResult::Invalid => return Err(XzError::IntegerTooLarge),
            };
            match self.index.sequence {
                IndexSeq::Count => {
                    if vli != self.block.count {
                        // The record count disagrees with the blocks
                        // decoded: a zero size byte put the index
                        // indicator where a block belonged, or the
                        // index lies about the block count.
                        return Err(XzError::BadBlockHeaderSize);
                    }
                    self.index.count = vli;
                    self.index.sequence = IndexSeq::Unpadded;
                }
                IndexSeq::Unpadded => {
                    self.index.pending_unpadded = vli;
                    self.index.sequence = IndexSeq::Uncompressed;
                }
                IndexSeq::Uncompressed => {
                    let unpadded = self.index.pending_unpadded;
                    self.index.hash.record(unpadded, vli);
                    self.index.count -= 1;
                    self.index.sequence = IndexSeq::Unpadded;
                }
            }
            if self.index.count == 0 {
                return Ok(Flow::Done);
            }
        }
    }

    /// Validates the collected stream header and adopts its flags.
    fn dec_stream_header(&mut self) -> Result<(), XzError> {
        let buf = self.temp.filled();
        if &buf[..STREAM_MAGIC.len()] != STREAM_MAGIC {
            return Err(XzError::InvalidMagic);
        }
        let expected = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if CRC32.checksum(&buf[6..8]) != expected {
            return Err(XzError::HeaderCrcMismatch);
        }
        if buf[6] != 0 || buf[7] > 15 {
            return Err(XzError::UnsupportedFlags);
        }
        self.check = XzCheck::try_from(buf[7])?;
        log::debug!("stream header: check type {}", self.check);
        Ok(())
    }

    /// Validates the collected stream footer against the index and
    /// the header flags.
    fn dec_stream_footer(&self) -> Result<(), XzError> {
        let buf = self.temp.filled();
        if &buf[10..12] != FOOTER_MAGIC {
            return Err(XzError::BadFooter);
        }
        let expected = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if CRC32.checksum(&buf[4..10]) != expected {
            return Err(XzError::BadFooter);
        }
        // backward-size stores (index size / 4) - 1, and our index
        // size excludes its trailing CRC32; the off-by-one cancels.
        let backward = u64::from(u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]));
        if self.index.size >> 2 != backward {
            return Err(XzError::BadFooter);
        }
        if buf[8] != 0 || buf[9] != self.check.flag() {
            return Err(XzError::BadFooter);
        }
        Ok(())
    }

    /// Parses the collected block header: flags, optional sizes, the
    /// filter chain, padding and the trailing CRC32.
    fn dec_block_header(&mut self) -> Result<(), XzError> {
        let expected = self.temp.split_trailing_crc();
        if CRC32.checksum(self.temp.filled()) != expected {
            return Err(XzError::BlockHeaderCrcMismatch);
        }

        let buf = self.temp.filled();
        let flags = buf[1];
        if flags & 0x3c != 0 {
            return Err(XzError::UnsupportedFlags);
        }
        let num_filters = usize::from(flags & 0x03) + 1;
        let mut pos = 2usize;

        self.block_header.compressed = if flags & 0x40 != 0 {
            read_header_vli(buf, &mut pos)?
        } else {
            u64::MAX
        };
        self.block_header.uncompressed = if flags & 0x80 != 0 {
            read_header_vli(buf, &mut pos)?
        } else {
            u64::MAX
        };

        let mut stages = Vec::with_capacity(num_filters - 1);
        let mut lzma2_prop = None;
        for n in 0..num_filters {
            let id = read_header_vli(buf, &mut pos)?;
            let props_size = read_header_vli(buf, &mut pos)?;
            let props_size =
                usize::try_from(props_size).map_err(|_| XzError::TruncatedBlockHeader)?;
            if buf.len() - pos < props_size {
                return Err(XzError::TruncatedBlockHeader);
            }
            let props = &buf[pos..pos + props_size];
            pos += props_size;
            let last = n + 1 == num_filters;

            if id == 0x21 {
                // LZMA2 closes the chain, nothing may follow it.
                if !last {
                    return Err(XzError::UnsupportedFilter(id));
                }
                if props_size != 1 {
                    return Err(XzError::InvalidProperties);
                }
                lzma2_prop = Some(props[0]);
            } else if last {
                return Err(XzError::UnsupportedFilter(id));
            } else if id == 0x03 {
                if props_size != 1 {
                    return Err(XzError::InvalidProperties);
                }
                stages.push(Stage::delta(usize::from(props[0]) + 1));
            } else {
                let filter = crate::bcj::BcjFilter::try_from(id)?;
                match props_size {
                    0 => {}
                    4 => {
                        let offset =
                            u32::from_le_bytes([props[0], props[1], props[2], props[3]]);
                        if offset != 0 {
                            // Non-default start offsets are not supported.
                            return Err(XzError::UnsupportedFilter(id));
                        }
                    }
                    _ => return Err(XzError::InvalidProperties),
                }
                stages.push(Stage::bcj(filter));
            }
        }

        while pos < buf.len() {
            if buf[pos] != 0 {
                return Err(XzError::CorruptedPadding);
            }
            pos += 1;
        }

        let Some(prop) = lzma2_prop else {
            return Err(XzError::UnsupportedFilter(0x21));
        };
        log::debug!(
            "block header: {num_filters} filters, dict prop {prop}, sizes {:#x}/{:#x}",
            self.block_header.compressed,
            self.block_header.uncompressed
        );
        self.chain.install(stages);
        self.lzma2.reset_for_block(prop, &mut self.dict)?;
        self.block.compressed = 0;
        self.block.uncompressed = 0;
        Ok(())
    }

    /// Runs the LZMA2 layer, routes its output through the filter
    /// chain, updates the check and the size accounting.
    fn dec_block(&mut self, b: &mut XzBuf) -> Result<Flow, XzError> {
        let in_start = b.input_position();

        let mut scratch = mem::take(&mut self.block_buf);
        scratch.clear();
        let (result, new_pos) = {
            let mut inner = XzBuf::continued(b.input_all(), in_start, &mut scratch);
            let result = self.lzma2.run(&mut inner, &mut self.dict);
            (result, inner.input_position())
        };
        b.input_seek_add(new_pos - in_start);
        let ret = result?;

        self.block.compressed = self
            .block
            .compressed
            .wrapping_add((b.input_position() - in_start) as u64);

        self.chain.feed(&mut scratch);
        if ret == Flow::Done {
            self.chain.finish(&mut scratch);
        }
        self.check_state.update(&scratch);
        self.block.uncompressed = self.block.uncompressed.wrapping_add(scratch.len() as u64);
        b.push_out(&scratch);
        self.block_buf = scratch;

        if self.block.compressed > self.block_header.compressed
            || self.block.uncompressed > self.block_header.uncompressed
        {
            return Err(XzError::SizeMismatch);
        }

        if ret == Flow::Done {
            if self.block_header.compressed != u64::MAX
                && self.block_header.compressed != self.block.compressed
            {
                return Err(XzError::SizeMismatch);
            }
            if self.block_header.uncompressed != u64::MAX
                && self.block_header.uncompressed != self.block.uncompressed
            {
                return Err(XzError::SizeMismatch);
            }
            let unpadded = self.block_header.size as u64
                + self.block.compressed
                + self.check.size() as u64;
            self.block.hash.record(unpadded, self.block.uncompressed);
            self.block.count += 1;
            log::debug!(
                "block {} done: {} -> {} bytes",
                self.block.count,
                self.block.compressed,
                self.block.uncompressed
            );
        }
        Ok(ret)
    }

    /// The main grammar loop; returns when input runs out.
    fn dec_main(&mut self, b: &mut XzBuf) -> Result<(), XzError> {
        let mut in_start = b.input_position();
        loop {
            match self.state {
                XzState::StreamHeader => {
                    if !self.temp.fill(b) {
                        return Ok(());
                    }
                    self.dec_stream_header()?;
                    self.state = XzState::StreamStart;
                }
                XzState::StreamStart => {
                    let Some(first) = b.input_peek_byte::<usize>() else {
                        return Ok(());
                    };
                    if first == 0 {
                        in_start = b.input_position();
                        b.input_seek_add(1);
                        self.index_digest = Some(CRC32.digest());
                        self.state = XzState::Index;
                        continue;
                    }
                    self.block_header.size = (first + 1) * 4;
                    self.temp.arm(self.block_header.size);
                    self.state = XzState::BlockHeader;
                }
                XzState::BlockHeader => {
                    if !self.temp.fill(b) {
                        return Ok(());
                    }
                    self.dec_block_header()?;
                    self.check_state = CheckState::begin(self.check, self.verify_checks);
                    self.state = XzState::Block;
                }
                XzState::Block => match self.dec_block(b)? {
                    Flow::Done => self.state = XzState::BlockPadding,
                    Flow::More => return Ok(()),
                },
                XzState::BlockPadding => {
                    while self.block.compressed & 3 != 0 {
                        let Some(padding) = b.input_read_byte::<u8>() else {
                            return Ok(());
                        };
                        if padding != 0 {
                            return Err(XzError::CorruptedPadding);
                        }
                        self.block.compressed = self.block.compressed.wrapping_add(1);
                    }
                    self.state = XzState::BlockCheck;
                }
                XzState::BlockCheck => {
                    if self.check.size() > 0 {
                        self.temp.arm(self.check.size());
                        if !self.temp.fill(b) {
                            return Ok(());
                        }
                        let state = mem::replace(&mut self.check_state, CheckState::Skip);
                        if !state.verify(self.temp.filled()) {
                            return Err(XzError::CheckMismatch(self.check));
                        }
                    }
                    self.state = XzState::StreamStart;
                }
                XzState::Index => {
                    match self.dec_index(b, in_start)? {
                        Flow::Done => {}
                        Flow::More => return Ok(()),
                    }
                    self.state = XzState::IndexPadding;
                }
                XzState::IndexPadding => {
                    while self
                        .index
                        .size
                        .wrapping_add((b.input_position() - in_start) as u64)
                        & 3
                        != 0
                    {
                        let Some(padding) = b.input_read_byte::<u8>() else {
                            self.index_update(b, in_start);
                            return Ok(());
                        };
                        if padding != 0 {
                            return Err(XzError::CorruptedPadding);
                        }
                    }
                    self.index_update(b, in_start);
                    if self.block.hash != self.index.hash {
                        return Err(XzError::SizeMismatch);
                    }
                    self.state = XzState::IndexCrc;
                }
                XzState::IndexCrc => {
                    self.temp.arm(4);
                    if !self.temp.fill(b) {
                        return Ok(());
                    }
                    let buf = self.temp.filled();
                    let expected = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
                    let actual = self.index_digest.take().map_or(0, |d| d.finalize());
                    if actual != expected {
                        return Err(XzError::IndexCrcMismatch);
                    }
                    self.temp.arm(HEADER_SIZE);
                    self.state = XzState::Footer;
                }
                XzState::Footer => {
                    if !self.temp.fill(b) {
                        return Ok(());
                    }
                    self.dec_stream_footer()?;
                    log::debug!(
                        "stream done: {} blocks, {} bytes out",
                        self.block.count,
                        self.block.hash.uncompressed
                    );
                    self.pad_count = 0;
                    self.state = XzState::StreamPadding;
                }
                XzState::StreamPadding => {
                    loop {
                        let Some(byte) = b.input_peek_byte::<u8>() else {
                            return Ok(());
                        };
                        if byte == 0 {
                            b.input_seek_add(1);
                            self.pad_count += 1;
                            continue;
                        }
                        if self.pad_count % 4 != 0 {
                            return Err(XzError::CorruptedPadding);
                        }
                        self.begin_stream();
                        break;
                    }
                }
            }
        }
    }
}
