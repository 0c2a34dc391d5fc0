use crate::buffer::XzBuf;
use crate::dict::DictBuffer;
use crate::error::XzError;
use crate::rc::{RcBuf, RcDecoder, PROB_INIT};
use crate::{DICT_SIZE_MAX, DICT_SIZE_MIN};
use core::mem;

/// Number of LZMA states.
const STATES: usize = 12;

/// Maximum number of position states (`pb` is at most four bits).
const POS_STATES_MAX: usize = 16;

/// Shortest match the length coders can express.
const MATCH_LEN_MIN: usize = 2;

/// Where the aligned-distance tree lives inside [`LzmaCoder::dist_slot`].
const ALIGN_OFFSET: usize = 370;

/// Where the mid-range distance trees live inside [`LzmaCoder::dist_slot`].
const DIST_SPECIAL_OFFSET: usize = 256;

/// Which LZMA symbols were seen most recently, in order. The names
/// read oldest to newest; `Rep` covers both long and short repeats,
/// `NonLit` any non-literal. The decoder predicts the next symbol
/// from this.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
enum LzmaState {
    #[default]
    LitLit = 0,
    MatchLitLit,
    RepLitLit,
    ShortRepLitLit,
    MatchLit,
    RepLit,
    ShortRepLit,
    LitMatch,
    LitLongRep,
    LitShortRep,
    NonLitMatch,
    NonLitRep,
}

impl LzmaState {
    /// Numeric value, used to index probability tables.
    const fn index(self) -> usize {
        self as usize
    }

    /// True while the previous symbol was a literal.
    const fn is_literal_state(self) -> bool {
        (self as usize) < 7
    }

    /// Transition after decoding a literal.
    const fn next_literal(self) -> Self {
        match self {
            Self::LitLit | Self::MatchLitLit | Self::RepLitLit | Self::ShortRepLitLit => {
                Self::LitLit
            }
            Self::MatchLit => Self::MatchLitLit,
            Self::RepLit => Self::RepLitLit,
            Self::ShortRepLit => Self::ShortRepLitLit,
            Self::LitMatch | Self::NonLitMatch => Self::MatchLit,
            Self::LitLongRep | Self::NonLitRep => Self::RepLit,
            Self::LitShortRep => Self::ShortRepLit,
        }
    }

    /// Transition after decoding a match.
    const fn next_match(self) -> Self {
        if self.is_literal_state() {
            Self::LitMatch
        } else {
            Self::NonLitMatch
        }
    }

    /// Transition after decoding a repeated match.
    const fn next_long_rep(self) -> Self {
        if self.is_literal_state() {
            Self::LitLongRep
        } else {
            Self::NonLitRep
        }
    }

    /// Transition after decoding a one-byte repeat.
    const fn next_short_rep(self) -> Self {
        if self.is_literal_state() {
            Self::LitShortRep
        } else {
            Self::NonLitRep
        }
    }
}

/// Match length coder: a choice bit picks the low (2-9), mid (10-17)
/// or shared high (18-273) tree.
#[derive(Clone, Debug)]
struct LenDecoder {
    /// Probability of the length being below ten.
    choice: u16,
    /// Probability of the length being below eighteen.
    choice2: u16,
    /// Per-position-state trees for lengths 2-9.
    low: [[u16; 8]; POS_STATES_MAX],
    /// Per-position-state trees for lengths 10-17.
    mid: [[u16; 8]; POS_STATES_MAX],
    /// Shared tree for lengths 18-273.
    high: [u16; 256],
}

impl LenDecoder {
    /// Constructor.
    const fn new() -> Self {
        Self {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: [[PROB_INIT; 8]; POS_STATES_MAX],
            mid: [[PROB_INIT; 8]; POS_STATES_MAX],
            high: [PROB_INIT; 256],
        }
    }

    /// Back to the initial probabilities.
    const fn reset(&mut self) {
        self.choice = PROB_INIT;
        self.choice2 = PROB_INIT;
        self.low = [[PROB_INIT; 8]; POS_STATES_MAX];
        self.mid = [[PROB_INIT; 8]; POS_STATES_MAX];
        self.high = [PROB_INIT; 256];
    }

    /// Decodes one match length.
    fn decode(&mut self, rc: &mut RcDecoder, rcb: &mut RcBuf, pos_state: usize) -> usize {
        if rc.decode_bit(&mut self.choice, rcb) == 0 {
            MATCH_LEN_MIN + rc.bittree(&mut self.low[pos_state], rcb) as usize - 8
        } else if rc.decode_bit(&mut self.choice2, rcb) == 0 {
            MATCH_LEN_MIN + 8 + rc.bittree(&mut self.mid[pos_state], rcb) as usize - 8
        } else {
            MATCH_LEN_MIN + 16 + rc.bittree(&mut self.high, rcb) as usize - 256
        }
    }
}

/// The LZMA symbol decoder: probability models, the four most recent
/// match distances, and the per-symbol decode loop.
#[derive(Clone, Debug)]
pub(crate) struct LzmaCoder {
    /// Distance of the latest match.
    rep0: u32,
    /// Second most recent match distance.
    rep1: u32,
    /// Third most recent match distance.
    rep2: u32,
    /// Fourth most recent match distance.
    rep3: u32,
    /// Pending match bytes not yet copied into the dictionary.
    len: usize,
    /// Recent-symbol state.
    state: LzmaState,
    /// Literal context bits.
    lc: u32,
    /// Mask from the literal position bits.
    literal_pos_mask: u32,
    /// Mask from the position state bits.
    pos_mask: usize,
    /// End-of-stream marker seen (distance of all ones).
    eos: bool,
    /// Match-or-literal probabilities per (state, pos_state).
    is_match: [u16; STATES * POS_STATES_MAX],
    /// Four probability groups of twelve:
    /// match vs. rep, then rep0 vs. rest, rep1 vs. rest, rep2 vs. rep3.
    is_rep: [u16; STATES * 4],
    /// Whether a rep0 match is longer than one byte, per (state, pos_state).
    is_rep0_long: [u16; STATES * POS_STATES_MAX],
    /// Distance model: four 64-entry slot trees (by length class),
    /// then the mid-range trees, then the four aligned bits.
    dist_slot: [u16; 386],
    /// Length coder for normal matches.
    match_len: LenDecoder,
    /// Length coder for repeated matches.
    rep_len: LenDecoder,
    /// Literal probabilities, `0x300 << (lc + lp)` entries.
    literal: Vec<u16>,
}

impl LzmaCoder {
    /// Constructor. Properties must be set before the first run.
    pub fn new() -> Self {
        Self {
            rep0: 0,
            rep1: 0,
            rep2: 0,
            rep3: 0,
            len: 0,
            state: LzmaState::LitLit,
            lc: 0,
            literal_pos_mask: 0,
            pos_mask: 0,
            eos: false,
            is_match: [PROB_INIT; STATES * POS_STATES_MAX],
            is_rep: [PROB_INIT; STATES * 4],
            is_rep0_long: [PROB_INIT; STATES * POS_STATES_MAX],
            dist_slot: [PROB_INIT; 386],
            match_len: LenDecoder::new(),
            rep_len: LenDecoder::new(),
            literal: Vec::new(),
        }
    }

    /// True once the end-of-stream marker was decoded.
    pub const fn end_marker(&self) -> bool {
        self.eos
    }

    /// Pending match bytes that still have to reach the dictionary.
    pub const fn pending_len(&self) -> usize {
        self.len
    }

    /// Resets the state machine, the distance queue and every
    /// probability to its initial value. Properties stay.
    pub fn reset_state(&mut self) {
        self.state = LzmaState::LitLit;
        self.rep0 = 0;
        self.rep1 = 0;
        self.rep2 = 0;
        self.rep3 = 0;
        self.len = 0;
        self.eos = false;
        self.is_match = [PROB_INIT; STATES * POS_STATES_MAX];
        self.is_rep = [PROB_INIT; STATES * 4];
        self.is_rep0_long = [PROB_INIT; STATES * POS_STATES_MAX];
        self.dist_slot = [PROB_INIT; 386];
        self.match_len.reset();
        self.rep_len.reset();
        for prob in &mut self.literal {
            *prob = PROB_INIT;
        }
    }

    /// Applies an LZMA2 properties byte. The XZ format additionally
    /// requires `lc + lp <= 4` here.
    pub fn set_props_byte(&mut self, props: u8) -> Result<(), XzError> {
        if props > 224 {
            return Err(XzError::InvalidProperties);
        }
        let lc = u32::from(props % 9);
        let rest = props / 9;
        let lp = u32::from(rest % 5);
        let pb = u32::from(rest / 5);
        if lc + lp > 4 {
            return Err(XzError::InvalidProperties);
        }
        self.configure(lc, lp, pb);
        Ok(())
    }

    /// Applies raw LZMA1 properties. Accepts the full per-field ranges.
    pub fn set_props_raw(&mut self, lc: u32, lp: u32, pb: u32) -> Result<(), XzError> {
        if lc > 8 || lp > 4 || pb > 4 {
            return Err(XzError::InvalidProperties);
        }
        self.configure(lc, lp, pb);
        Ok(())
    }

    /// Sizes the literal table for the new properties and resets.
    fn configure(&mut self, lc: u32, lp: u32, pb: u32) {
        self.lc = lc;
        self.literal_pos_mask = (1u32 << lp) - 1;
        self.pos_mask = (1usize << pb) - 1;
        self.literal.clear();
        self.literal.resize(0x300 << (lc + lp), PROB_INIT);
        self.reset_state();
    }

    /// Which literal probability group the next literal uses.
    /// The position only contributes its masked low bits.
    #[allow(clippy::cast_possible_truncation)]
    fn literal_group(&self, d: &DictBuffer) -> usize {
        let prev = u32::from(d.get(0));
        let low = prev >> (8 - self.lc);
        let high = (d.pos() as u32 & self.literal_pos_mask) << self.lc;
        (low + high) as usize
    }

    /// Decodes one literal byte into the dictionary.
    fn decode_literal(&mut self, rc: &mut RcDecoder, rcb: &mut RcBuf, d: &mut DictBuffer) {
        let group = self.literal_group(d);
        let probs = &mut self.literal[group * 0x300..(group + 1) * 0x300];

        let symbol = if self.state.is_literal_state() {
            rc.bittree(&mut probs[..0x100], rcb)
        } else {
            // After a match the byte at rep0 steers the tree: as long
            // as the decoded bits agree with it, a different subtree
            // is used for better prediction.
            let mut symbol: u32 = 1;
            let mut match_byte = u32::from(d.get(self.rep0 as usize)) << 1;
            let mut offset: u32 = 0x100;
            loop {
                let match_bit = match_byte & offset;
                match_byte <<= 1;
                let i = (offset + match_bit + symbol) as usize;
                let bit = rc.decode_bit(&mut probs[i], rcb);
                symbol = (symbol << 1) | bit;
                if bit == 0 {
                    offset &= !match_bit;
                } else {
                    offset &= match_bit;
                }
                if symbol >= 0x100 {
                    break;
                }
            }
            symbol
        };

        // the tree sentinel bit falls off with the high bits
        d.put((symbol & 0xff) as u8);
        self.state = self.state.next_literal();
    }

    /// Decodes a normal match: length, then the distance into `rep0`.
    fn decode_match(&mut self, rc: &mut RcDecoder, rcb: &mut RcBuf, pos_state: usize) {
        self.state = self.state.next_match();
        self.rep3 = self.rep2;
        self.rep2 = self.rep1;
        self.rep1 = self.rep0;

        self.len = self.match_len.decode(rc, rcb, pos_state);

        let group = (self.len - MATCH_LEN_MIN).min(3);
        let slot_probs = &mut self.dist_slot[group * 64..(group + 1) * 64];
        let dist_slot = rc.bittree(slot_probs, rcb) - 64;

        if dist_slot < 4 {
            self.rep0 = dist_slot;
            return;
        }

        let limit = (dist_slot >> 1) - 1;
        self.rep0 = 2 + (dist_slot & 1);

        if dist_slot < 14 {
            self.rep0 <<= limit;
            let offset =
                DIST_SPECIAL_OFFSET + self.rep0 as usize - dist_slot as usize - 1;
            self.rep0 =
                rc.bittree_reverse(&mut self.dist_slot[offset..], self.rep0, limit, rcb);
            return;
        }

        self.rep0 = rc.direct(self.rep0, limit - 4, rcb) << 4;
        self.rep0 =
            rc.bittree_reverse(&mut self.dist_slot[ALIGN_OFFSET..], self.rep0, 4, rcb);
        if self.rep0 == u32::MAX {
            // Distance of all ones is the end-of-stream marker.
            self.eos = true;
        }
    }

    /// Decodes a repeated match: possibly rotates the distance queue,
    /// then the length (one for a short rep).
    fn decode_rep(&mut self, rc: &mut RcDecoder, rcb: &mut RcBuf, pos_state: usize) {
        let s = self.state.index();

        if rc.decode_bit(&mut self.is_rep[s + STATES], rcb) == 0 {
            if rc
                .decode_bit(
                    &mut self.is_rep0_long[POS_STATES_MAX * s + pos_state],
                    rcb,
                )
                == 0
            {
                self.state = self.state.next_short_rep();
                self.len = 1;
                return;
            }
        } else if rc.decode_bit(&mut self.is_rep[s + 2 * STATES], rcb) == 0 {
            mem::swap(&mut self.rep1, &mut self.rep0);
        } else if rc.decode_bit(&mut self.is_rep[s + 3 * STATES], rcb) == 0 {
            let promoted = self.rep2;
            self.rep2 = self.rep1;
            self.rep1 = self.rep0;
            self.rep0 = promoted;
        } else {
            let promoted = self.rep3;
            self.rep3 = self.rep2;
            self.rep2 = self.rep1;
            self.rep1 = self.rep0;
            self.rep0 = promoted;
        }

        self.state = self.state.next_long_rep();
        self.len = self.rep_len.decode(rc, rcb, pos_state);
    }

    /// Decodes symbols until the dictionary limit, the input limit or
    /// the end marker stops it.
    pub fn run(
        &mut self,
        rc: &mut RcDecoder,
        rcb: &mut RcBuf,
        d: &mut DictBuffer,
    ) -> Result<(), XzError> {
        if d.has_space() && self.len > 0 {
            let count = d.repeat(self.rep0 as usize, self.len)?;
            self.len -= count;
        }

        while d.has_space() && !rcb.limit_exceeded() && !self.eos {
            let pos_state = d.pos() & self.pos_mask;
            let match_idx = POS_STATES_MAX * self.state.index() + pos_state;

            if rc.decode_bit(&mut self.is_match[match_idx], rcb) == 0 {
                self.decode_literal(rc, rcb, d);
                continue;
            }

            if rc.decode_bit(&mut self.is_rep[self.state.index()], rcb) == 0 {
                self.decode_match(rc, rcb, pos_state);
                if self.eos {
                    break;
                }
            } else {
                self.decode_rep(rc, rcb, pos_state);
            }

            let count = d.repeat(self.rep0 as usize, self.len)?;
            self.len -= count;
        }

        rc.normalize(rcb);
        Ok(())
    }
}

/// Decodes a raw LZMA1 stream.
///
/// `props` is the classic five-byte header: the packed
/// `(pb * 5 + lp) * 9 + lc` byte followed by the little-endian
/// dictionary size. Exactly `unpack_size` bytes are produced unless
/// the stream carries an early end marker, which fails with
/// [`XzError::SizeMismatch`].
pub fn decode_lzma1(data: &[u8], props: &[u8], unpack_size: u64) -> Result<Vec<u8>, XzError> {
    let props: &[u8; 5] = props.try_into().map_err(|_| XzError::InvalidProperties)?;
    if props[0] > 224 {
        return Err(XzError::InvalidProperties);
    }
    let lc = u32::from(props[0] % 9);
    let rest = props[0] / 9;
    let lp = u32::from(rest % 5);
    let pb = u32::from(rest / 5);
    let declared_dict = u32::from_le_bytes([props[1], props[2], props[3], props[4]]);
    log::debug!("lzma1: lc={lc} lp={lp} pb={pb} dict={declared_dict} unpack={unpack_size}");

    // The window never needs to exceed the output size.
    let window = u64::from(declared_dict)
        .max(DICT_SIZE_MIN as u64)
        .min(unpack_size.max(DICT_SIZE_MIN as u64));

    let mut remaining = usize::try_from(unpack_size).map_err(|_| XzError::SizeMismatch)?;
    let mut coder = LzmaCoder::new();
    coder.set_props_raw(lc, lp, pb)?;
    let mut dict = DictBuffer::new(DICT_SIZE_MAX);
    dict.alloc(window)?;
    dict.reset();

    let mut rc = RcDecoder::new();
    rc.reset();
    let mut out = Vec::with_capacity(remaining);
    let start = {
        let mut b = XzBuf::new(data, &mut out);
        if !rc.read_init(&mut b) {
            return Err(XzError::TruncatedInput);
        }
        b.input_position()
    };

    let mut rcb = RcBuf::new(data, start, data.len());
    while remaining > 0 {
        dict.set_limit(remaining);
        coder.run(&mut rc, &mut rcb, &mut dict)?;
        let flushed = dict.flush(&mut out);
        remaining -= flushed;
        if coder.end_marker() {
            break;
        }
        if flushed == 0 && rcb.overran() {
            return Err(XzError::TruncatedInput);
        }
    }

    if remaining > 0 {
        return Err(XzError::SizeMismatch);
    }
    Ok(out)
}
