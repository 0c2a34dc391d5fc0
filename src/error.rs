use crate::check::XzCheck;
use core::fmt::{Display, Formatter};

/// All the ways a decode can fail.
///
/// Every error is terminal for the decoder instance that produced it.
/// Calling a failed decoder again yields the same error.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum XzError {
    /// Stream header magic bytes are not `FD 37 7A 58 5A 00`.
    InvalidMagic,
    /// The stream flags name a check type this decoder does not know.
    UnsupportedCheck(u8),
    /// A block declares a filter id outside the supported set,
    /// an invalid filter chain, or filter properties we cannot honor.
    UnsupportedFilter(u64),
    /// Reserved bits set in stream or block header flags.
    UnsupportedFlags,
    /// LZMA properties out of bounds, or an LZMA2 dictionary byte above 40.
    InvalidProperties,
    /// An LZMA2 compressed chunk arrived before any properties were set.
    MissingProperties,
    /// LZMA2 control byte in the reserved range `0x03..=0x7F`.
    BadControl(u8),
    /// Input ended in the middle of a structure.
    TruncatedInput,
    /// Input ended in the middle of an LZMA2 chunk, or the chunk is
    /// too short to hold the range coder preamble.
    TruncatedChunk,
    /// A block header is shorter than its contents require.
    TruncatedBlockHeader,
    /// Input ended in the middle of the index.
    TruncatedIndex,
    /// A multibyte integer exceeds 63 bits or is not minimally encoded.
    IntegerTooLarge,
    /// The index indicator turned up where the block layout promised
    /// otherwise: its record count disagrees with the blocks decoded,
    /// which is what a zero block-header size byte looks like from
    /// the stream side.
    BadBlockHeaderSize,
    /// An LZMA match distance reaches beyond the decoded history
    /// or beyond the dictionary size.
    InvalidDistance,
    /// Declared sizes disagree with each other or with the decoded data.
    SizeMismatch,
    /// Stream footer magic, CRC32, backward-size or flags mismatch.
    BadFooter,
    /// Non-zero padding bytes, or stream padding that is not a
    /// multiple of four bytes.
    CorruptedPadding,
    /// The stream header CRC32 does not match its flags.
    HeaderCrcMismatch,
    /// The block header CRC32 does not match its contents.
    BlockHeaderCrcMismatch,
    /// The index CRC32 does not match its contents.
    IndexCrcMismatch,
    /// The first LZMA2 chunk of a block did not reset the dictionary.
    DictResetExpected,
    /// A block or LZMA header declares a dictionary larger than the
    /// configured limit.
    DictionaryTooLarge(u64),
    /// The decoded data does not match the block integrity check.
    /// Only raised when check verification is enabled.
    CheckMismatch(XzCheck),
}

impl Display for XzError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidMagic => f.write_str("stream header magic mismatch"),
            Self::UnsupportedCheck(t) => write!(f, "unsupported check type {t}"),
            Self::UnsupportedFilter(id) => write!(f, "unsupported filter {id:#x}"),
            Self::UnsupportedFlags => f.write_str("reserved header flags set"),
            Self::InvalidProperties => f.write_str("invalid LZMA properties"),
            Self::MissingProperties => f.write_str("LZMA2 chunk without properties"),
            Self::BadControl(c) => write!(f, "reserved LZMA2 control byte {c:#04x}"),
            Self::TruncatedInput => f.write_str("truncated input"),
            Self::TruncatedChunk => f.write_str("truncated LZMA2 chunk"),
            Self::TruncatedBlockHeader => f.write_str("truncated block header"),
            Self::TruncatedIndex => f.write_str("truncated index"),
            Self::IntegerTooLarge => f.write_str("multibyte integer out of range"),
            Self::BadBlockHeaderSize => {
                f.write_str("index indicator where a block was promised")
            }
            Self::InvalidDistance => f.write_str("match distance out of range"),
            Self::SizeMismatch => f.write_str("declared and decoded sizes disagree"),
            Self::BadFooter => f.write_str("malformed stream footer"),
            Self::CorruptedPadding => f.write_str("corrupted padding"),
            Self::HeaderCrcMismatch => f.write_str("stream header CRC32 mismatch"),
            Self::BlockHeaderCrcMismatch => f.write_str("block header CRC32 mismatch"),
            Self::IndexCrcMismatch => f.write_str("index CRC32 mismatch"),
            Self::DictResetExpected => f.write_str("first LZMA2 chunk must reset the dictionary"),
            Self::DictionaryTooLarge(size) => {
                write!(f, "dictionary of {size} bytes exceeds the configured limit")
            }
            Self::CheckMismatch(check) => write!(f, "{check} check mismatch"),
        }
    }
}

impl std::error::Error for XzError {}
