use crate::error::XzError;
use core::fmt::{Display, Formatter};
use crc::{Crc, Table, CRC_32_ISO_HDLC, CRC_64_XZ};

/// CRC32 as used throughout the XZ container.
pub(crate) static CRC32: Crc<u32, Table<16>> = Crc::<u32, Table<16>>::new(&CRC_32_ISO_HDLC);

/// CRC64 as used by the optional content check.
pub(crate) static CRC64: Crc<u64, Table<16>> = Crc::<u64, Table<16>>::new(&CRC_64_XZ);

/// The integrity check declared by a stream's flags.
///
/// All four types are always accepted; whether the check value is
/// verified depends on the decoder configuration (and, for SHA-256,
/// on the `sha256` feature). Unverified check fields are skipped.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum XzCheck {
    #[default]
    None = 0,
    Crc32 = 1,
    Crc64 = 4,
    Sha256 = 10,
}

impl XzCheck {
    /// Size in bytes of the check field after each block.
    pub const fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Crc32 => 4,
            Self::Crc64 => 8,
            Self::Sha256 => 32,
        }
    }

    /// Raw check-type nibble for footer comparison.
    pub(crate) const fn flag(self) -> u8 {
        self as u8
    }
}

impl Display for XzCheck {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Crc32 => f.write_str("crc32"),
            Self::Crc64 => f.write_str("crc64"),
            Self::Sha256 => f.write_str("sha256"),
        }
    }
}

impl TryFrom<u8> for XzCheck {
    type Error = XzError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Crc32),
            4 => Ok(Self::Crc64),
            10 => Ok(Self::Sha256),
            other => Err(XzError::UnsupportedCheck(other)),
        }
    }
}

/// Running digest over one block's decoded bytes.
pub(crate) enum CheckState {
    /// Check type none, or verification disabled.
    Skip,
    Crc32(crc::Digest<'static, u32, Table<16>>),
    Crc64(crc::Digest<'static, u64, Table<16>>),
    #[cfg(feature = "sha256")]
    Sha256(Box<sha2::Sha256>),
}

impl CheckState {
    /// Starts a digest for one block. `verify` off yields a skipping state.
    pub fn begin(check: XzCheck, verify: bool) -> Self {
        if !verify {
            return Self::Skip;
        }
        match check {
            XzCheck::None => Self::Skip,
            XzCheck::Crc32 => Self::Crc32(CRC32.digest()),
            XzCheck::Crc64 => Self::Crc64(CRC64.digest()),
            #[cfg(feature = "sha256")]
            XzCheck::Sha256 => Self::Sha256(Box::new(<sha2::Sha256 as sha2::Digest>::new())),
            // Without the feature the 32-byte field is skipped.
            #[cfg(not(feature = "sha256"))]
            XzCheck::Sha256 => Self::Skip,
        }
    }

    /// Feed decoded block bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Skip => {}
            Self::Crc32(digest) => digest.update(data),
            Self::Crc64(digest) => digest.update(data),
            #[cfg(feature = "sha256")]
            Self::Sha256(sha) => sha2::Digest::update(sha.as_mut(), data),
        }
    }

    /// Compares the digest against the check field from the stream.
    pub fn verify(self, field: &[u8]) -> bool {
        match self {
            Self::Skip => true,
            Self::Crc32(digest) => {
                field.len() == 4
                    && digest.finalize()
                        == u32::from_le_bytes([field[0], field[1], field[2], field[3]])
            }
            Self::Crc64(digest) => {
                let Ok(bytes) = <[u8; 8]>::try_from(field) else {
                    return false;
                };
                digest.finalize() == u64::from_le_bytes(bytes)
            }
            #[cfg(feature = "sha256")]
            Self::Sha256(sha) => sha2::Digest::finalize(*sha).as_slice() == field,
        }
    }
}
