use crate::bcj::{self, BcjFilter};
use crate::delta::DeltaDecoder;

/// One preprocessing filter inside a block's chain, with whatever
/// state it carries across chunks. A tagged enum keeps dispatch
/// monomorphic; chains are at most three stages deep.
#[derive(Debug)]
pub(crate) enum Stage {
    Delta(DeltaDecoder),
    Bcj(BcjStage),
}

impl Stage {
    /// A Delta stage for the given distance.
    pub fn delta(distance: usize) -> Self {
        Self::Delta(DeltaDecoder::new(distance))
    }

    /// A branch-filter stage.
    pub fn bcj(filter: BcjFilter) -> Self {
        Self::Bcj(BcjStage::new(filter))
    }

    /// Transforms one chunk in place. BCJ stages may hold back an
    /// incomplete instruction window for the next chunk.
    fn feed(&mut self, data: &mut Vec<u8>) {
        match self {
            Self::Delta(delta) => delta.apply(data.as_mut_slice()),
            Self::Bcj(stage) => stage.feed(data),
        }
    }

    /// End of block: `data` holds the bytes flushed out of the
    /// upstream stages. The stage prepends its own held-back tail,
    /// transforms what it can, and passes the rest through unchanged.
    fn flush(&mut self, data: &mut Vec<u8>) {
        match self {
            Self::Delta(delta) => delta.apply(data.as_mut_slice()),
            Self::Bcj(stage) => stage.flush(data),
        }
    }
}

/// Streaming state of one BCJ filter: the logical stream position,
/// the x86 false-positive mask, and the carried tail.
#[derive(Debug)]
pub(crate) struct BcjStage {
    /// Which transform runs.
    filter: BcjFilter,
    /// Logical position of the next byte in the unfiltered stream.
    pos: u32,
    /// Carried mask state, x86 only.
    x86_prev_mask: usize,
    /// Bytes currently held back.
    carry_len: usize,
    /// Held-back tail of the previous chunk.
    carry: [u8; 16],
}

impl BcjStage {
    /// Constructor.
    const fn new(filter: BcjFilter) -> Self {
        Self {
            filter,
            pos: 0,
            x86_prev_mask: 0,
            carry_len: 0,
            carry: [0; 16],
        }
    }

    /// Runs the transform over `data` and advances the stream
    /// position by the processed prefix.
    fn transform(&mut self, data: &mut [u8]) -> usize {
        let processed = match self.filter {
            BcjFilter::X86 => {
                let (n, mask) = bcj::filter_x86(self.pos, data, self.x86_prev_mask);
                self.x86_prev_mask = mask;
                n
            }
            BcjFilter::PowerPc => bcj::filter_powerpc(self.pos, data),
            BcjFilter::Ia64 => bcj::filter_ia64(self.pos, data),
            BcjFilter::Arm => bcj::filter_arm(self.pos, data),
            BcjFilter::ArmThumb => bcj::filter_armthumb(self.pos, data),
            BcjFilter::Sparc => bcj::filter_sparc(self.pos, data),
            BcjFilter::Arm64 => bcj::filter_arm64(self.pos, data),
        };
        self.pos = self.pos.wrapping_add(bcj::pos32(processed));
        processed
    }

    /// Prepends the held-back tail to `data`.
    fn reclaim_carry(&mut self, data: &mut Vec<u8>) {
        if self.carry_len > 0 {
            data.splice(0..0, self.carry[..self.carry_len].iter().copied());
            self.carry_len = 0;
        }
    }

    /// Chunk transform with hold-back.
    fn feed(&mut self, data: &mut Vec<u8>) {
        self.reclaim_carry(data);
        let processed = self.transform(data.as_mut_slice());
        let tail = data.len() - processed;
        debug_assert!(tail <= self.filter.window());
        self.carry[..tail].copy_from_slice(&data[processed..]);
        self.carry_len = tail;
        data.truncate(processed);
    }

    /// Final transform: nothing is held back, an unprocessable tail
    /// passes through unchanged, exactly like the one-shot helpers.
    fn flush(&mut self, data: &mut Vec<u8>) {
        self.reclaim_carry(data);
        let _ = self.transform(data.as_mut_slice());
    }
}

/// A block's preprocessing filters in application order, i.e. the
/// reverse of their order in the block header. The LZMA2 stage is not
/// part of the chain; its output is what gets fed here.
#[derive(Debug, Default)]
pub(crate) struct FilterChain {
    /// The stages, first one sees the LZMA2 output.
    stages: Vec<Stage>,
}

impl FilterChain {
    /// Constructor, empty chain.
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Installs the filters as declared in the block header; they run
    /// in reverse declaration order.
    pub fn install(&mut self, mut declared: Vec<Stage>) {
        declared.reverse();
        self.stages = declared;
    }

    /// Transforms one chunk of LZMA2 output in place.
    pub fn feed(&mut self, data: &mut Vec<u8>) {
        for stage in &mut self.stages {
            stage.feed(data);
        }
    }

    /// Flushes all held-back tails at the end of a block. Each
    /// stage's tail still passes through the stages after it.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        let mut data = Vec::new();
        for stage in &mut self.stages {
            stage.flush(&mut data);
        }
        out.append(&mut data);
    }
}
