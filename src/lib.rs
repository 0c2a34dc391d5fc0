//! # unxz
//! Pure Rust decoder for the XZ container format and its LZMA/LZMA2
//! payloads, including the seven BCJ branch filters and the Delta
//! filter.
//!
//! The main entry points are [`decode_xz`] for complete buffers and
//! [`XzStreamDecoder`] for push-style streaming; [`XzReader`] wraps
//! the latter as [`std::io::Read`]. The raw payload formats are
//! reachable through [`decode_lzma1`] and [`decode_lzma2`], and the
//! preprocessing filters through the `decode_bcj_*`/[`decode_delta`]
//! helpers.
#![forbid(unsafe_code)]
#![deny(
    clippy::correctness,
    clippy::perf,
    clippy::complexity,
    clippy::style,
    clippy::clone_on_ref_ptr,
    clippy::unwrap_used
)]

/// BCJ branch filters.
mod bcj;

/// Input/output plumbing shared by the decode layers.
mod buffer;

/// Check types and checksum calculators.
mod check;

/// Delta filter.
mod delta;

/// Sliding-window dictionary.
mod dict;

/// Error type.
mod error;

/// Block filter chains.
mod filter;

/// LZMA state machine and LZMA1 decoding.
mod lzma;

/// LZMA2 chunk framing.
mod lzma2;

/// Range decoder.
mod rc;

/// One-shot and streaming orchestration.
mod stream;

/// Variable-length integer decoding.
mod vli;

/// XZ container parsing.
mod xz;

pub use bcj::{
    decode_bcj_arm, decode_bcj_arm64, decode_bcj_armthumb, decode_bcj_ia64, decode_bcj_ppc,
    decode_bcj_sparc, decode_bcj_x86,
};
pub use check::XzCheck;
pub use delta::decode_delta;
pub use error::XzError;
pub use lzma::decode_lzma1;
pub use lzma2::decode_lzma2;
pub use stream::{decode_xz, XzReader, XzStreamDecoder};

/// Minimum possible dictionary size.
pub const DICT_SIZE_MIN: usize = 4096;

/// Maximum dictionary size a decoder can be configured to accept.
pub const DICT_SIZE_MAX: usize = 3_221_225_472; //3GiB

/// Dictionary cap used by the convenience constructors (64 MiB,
/// enough for anything `xz -9` produces).
pub const DICT_SIZE_DEFAULT_MAX: usize = 1 << 26;

/// Dictionary size of files created with "xz -0 <filename>"
pub const DICT_SIZE_PROFILE_0: usize = 256 * 1024;

/// Dictionary size of files created with "xz -1 <filename>"
pub const DICT_SIZE_PROFILE_1: usize = 1024 * 1024;

/// Dictionary size of files created with "xz -2 <filename>"
pub const DICT_SIZE_PROFILE_2: usize = 2 * 1024 * 1024;

/// Dictionary size of files created with "xz -3 <filename>" and "xz -4"
pub const DICT_SIZE_PROFILE_3: usize = 4 * 1024 * 1024;

/// Dictionary size of files created with "xz -5 <filename>" and "xz -6"
pub const DICT_SIZE_PROFILE_5: usize = 8 * 1024 * 1024;

/// Dictionary size of files created with "xz -7 <filename>"
pub const DICT_SIZE_PROFILE_7: usize = 16 * 1024 * 1024;

/// Dictionary size of files created with "xz -8 <filename>"
pub const DICT_SIZE_PROFILE_8: usize = 32 * 1024 * 1024;

/// Dictionary size of files created with "xz -9 <filename>"
pub const DICT_SIZE_PROFILE_9: usize = 64 * 1024 * 1024;
