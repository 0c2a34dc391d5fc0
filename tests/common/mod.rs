//! In-test XZ writer: just enough of the container encode side to
//! build real fixtures, with proper CRC32s and index bookkeeping.
#![allow(dead_code)]

use crc::{Crc, Table, CRC_32_ISO_HDLC, CRC_64_XZ};

/// Container CRC32.
pub const CRC32: Crc<u32, Table<16>> = Crc::<u32, Table<16>>::new(&CRC_32_ISO_HDLC);

/// CRC64 for content checks.
pub const CRC64: Crc<u64, Table<16>> = Crc::<u64, Table<16>>::new(&CRC_64_XZ);

/// One block of a stream under construction.
pub struct Block {
    /// Filter descriptors as (id, props), LZMA2 last.
    pub filters: Vec<(u64, Vec<u8>)>,
    /// The LZMA2-framed payload carried by the block.
    pub lzma2: Vec<u8>,
    /// What the block decodes to after all filters.
    pub decoded: Vec<u8>,
}

/// A block whose payload is stored in LZMA2 uncompressed chunks with
/// no preprocessing filters.
pub fn plain_block(payload: &[u8]) -> Block {
    Block {
        filters: vec![(0x21, vec![0x00])],
        lzma2: lzma2_uncompressed(payload),
        decoded: payload.to_vec(),
    }
}

/// Encodes a little-endian base-128 integer.
pub fn vli(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
    out
}

/// Frames a payload as LZMA2 uncompressed chunks; the first chunk
/// resets the dictionary as the format requires.
pub fn lzma2_uncompressed(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut first = true;
    for chunk in payload.chunks(0x10000) {
        out.push(if first { 0x01 } else { 0x02 });
        let n = chunk.len() - 1;
        out.push((n >> 8) as u8);
        out.push(n as u8);
        out.extend_from_slice(chunk);
        first = false;
    }
    out.push(0x00);
    out
}

/// Twelve-byte stream header for the given check type.
pub fn stream_header(check: u8) -> Vec<u8> {
    let mut out = b"\xFD7zXZ\x00".to_vec();
    let flags = [0u8, check];
    out.extend_from_slice(&flags);
    out.extend_from_slice(&CRC32.checksum(&flags).to_le_bytes());
    out
}

/// Block header for the given filter descriptors, padded and with
/// its trailing CRC32.
pub fn block_header(filters: &[(u64, Vec<u8>)]) -> Vec<u8> {
    let mut body = vec![(filters.len() - 1) as u8];
    for (id, props) in filters {
        body.extend_from_slice(&vli(*id));
        body.extend_from_slice(&vli(props.len() as u64));
        body.extend_from_slice(props);
    }
    let total = 1 + body.len() + 4;
    let size = total.div_ceil(4) * 4;
    let mut out = vec![(size / 4 - 1) as u8];
    out.extend_from_slice(&body);
    out.resize(size - 4, 0);
    let crc = CRC32.checksum(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

/// Check field over the decoded bytes.
pub fn check_field(check: u8, decoded: &[u8]) -> Vec<u8> {
    match check {
        0 => Vec::new(),
        1 => CRC32.checksum(decoded).to_le_bytes().to_vec(),
        4 => CRC64.checksum(decoded).to_le_bytes().to_vec(),
        10 => {
            use sha2::Digest;
            sha2::Sha256::digest(decoded).to_vec()
        }
        _ => panic!("unsupported check type in fixture builder"),
    }
}

/// A complete single stream: header, blocks, index, footer.
pub fn xz_stream(check: u8, blocks: &[Block]) -> Vec<u8> {
    let mut out = stream_header(check);
    let mut records = Vec::new();

    for block in blocks {
        let header = block_header(&block.filters);
        out.extend_from_slice(&header);
        out.extend_from_slice(&block.lzma2);
        let pad = (4 - block.lzma2.len() % 4) % 4;
        out.resize(out.len() + pad, 0);
        let field = check_field(check, &block.decoded);
        out.extend_from_slice(&field);
        records.push((
            (header.len() + block.lzma2.len() + field.len()) as u64,
            block.decoded.len() as u64,
        ));
    }

    let mut index = vec![0x00];
    index.extend_from_slice(&vli(records.len() as u64));
    for (unpadded, uncompressed) in &records {
        index.extend_from_slice(&vli(*unpadded));
        index.extend_from_slice(&vli(*uncompressed));
    }
    let pad = (4 - index.len() % 4) % 4;
    index.resize(index.len() + pad, 0);
    let index_crc = CRC32.checksum(&index);
    let index_size_on_disk = index.len() + 4;
    out.extend_from_slice(&index);
    out.extend_from_slice(&index_crc.to_le_bytes());

    let backward = (index_size_on_disk / 4 - 1) as u32;
    let mut tail = backward.to_le_bytes().to_vec();
    tail.extend_from_slice(&[0, check]);
    out.extend_from_slice(&CRC32.checksum(&tail).to_le_bytes());
    out.extend_from_slice(&tail);
    out.extend_from_slice(b"YZ");
    out
}

/// The classic empty stream with no blocks.
pub fn empty_stream(check: u8) -> Vec<u8> {
    xz_stream(check, &[])
}
