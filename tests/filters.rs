mod common;

use common::{lzma2_uncompressed, xz_stream, Block};
use unxz::{
    decode_bcj_arm, decode_bcj_arm64, decode_bcj_ppc, decode_bcj_x86, decode_delta, decode_xz,
    XzError,
};

/// Encoder-side ARM BL transform (relative to pseudo-absolute).
fn encode_arm(buf: &mut [u8]) {
    let mut i = 0;
    while i + 4 <= buf.len() {
        if buf[i + 3] == 0xeb {
            let addr = u32::from(buf[i]) | u32::from(buf[i + 1]) << 8 | u32::from(buf[i + 2]) << 16;
            let addr = (addr << 2).wrapping_add(i as u32 + 8) >> 2;
            buf[i] = addr as u8;
            buf[i + 1] = (addr >> 8) as u8;
            buf[i + 2] = (addr >> 16) as u8;
        }
        i += 4;
    }
}

/// Encoder-side PowerPC BL transform.
fn encode_ppc(buf: &mut [u8]) {
    let mut i = 0;
    while i + 4 <= buf.len() {
        let instr = u32::from_be_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        if instr & 0xfc00_0003 == 0x4800_0001 {
            let li = (instr & 0x03ff_fffc).wrapping_add(i as u32) & 0x03ff_fffc;
            buf[i..i + 4].copy_from_slice(&(li | 0x4800_0001).to_be_bytes());
        }
        i += 4;
    }
}

/// Encoder-side ARM64 B/BL transform.
fn encode_arm64(buf: &mut [u8]) {
    let mut i = 0;
    while i + 4 <= buf.len() {
        let instr = u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        if instr & 0x7c00_0000 == 0x1400_0000 {
            let addr = (instr & 0x03ff_ffff).wrapping_add((i as u32) >> 2);
            let instr = (instr & 0xfc00_0000) | (addr & 0x03ff_ffff);
            buf[i..i + 4].copy_from_slice(&instr.to_le_bytes());
        }
        i += 4;
    }
}

/// Encoder-side Delta transform.
fn delta_encode(data: &[u8], distance: usize) -> Vec<u8> {
    data.iter()
        .enumerate()
        .map(|(i, byte)| {
            let prev = if i < distance { 0 } else { data[i - distance] };
            byte.wrapping_sub(prev)
        })
        .collect()
}

/// Synthetic instruction stream with BL markers sprinkled in.
fn arm_like_code() -> Vec<u8> {
    let mut code: Vec<u8> = (0..512u32).map(|i| (i * 11 + 3) as u8).collect();
    for i in (3..code.len()).step_by(16) {
        code[i] = 0xeb;
    }
    code
}

#[test]
fn arm_round_trip() {
    let original = arm_like_code();
    let mut data = original.clone();
    encode_arm(&mut data);
    assert_ne!(data, original);
    decode_bcj_arm(&mut data);
    assert_eq!(data, original);
}

#[test]
fn ppc_round_trip() {
    let mut original = arm_like_code();
    // plant BL instructions: 0x48xxxxxx | 1 in big-endian words
    for i in (0..original.len()).step_by(20) {
        original[i] = 0x48;
        if i + 3 < original.len() {
            original[i + 3] |= 0x01;
            original[i + 3] &= !0x02;
        }
    }
    let mut data = original.clone();
    encode_ppc(&mut data);
    decode_bcj_ppc(&mut data);
    assert_eq!(data, original);
}

#[test]
fn arm64_round_trip() {
    let mut original = arm_like_code();
    // plant B/BL opcodes in the top byte of little-endian words
    for i in (7..original.len()).step_by(24) {
        original[i] = 0x94;
    }
    for i in (11..original.len()).step_by(40) {
        original[i] = 0x14;
    }
    let mut data = original.clone();
    encode_arm64(&mut data);
    decode_bcj_arm64(&mut data);
    assert_eq!(data, original);
}

#[test]
fn delta_round_trip_through_container() {
    let payload: Vec<u8> = (0..3000u32).map(|i| (i / 5) as u8).collect();
    for distance_prop in [0u8, 3, 255] {
        let filtered = delta_encode(&payload, usize::from(distance_prop) + 1);
        let data = xz_stream(
            1,
            &[Block {
                filters: vec![(0x03, vec![distance_prop]), (0x21, vec![0x00])],
                lzma2: lzma2_uncompressed(&filtered),
                decoded: payload.clone(),
            }],
        );
        assert_eq!(decode_xz(&data).unwrap(), payload, "distance prop {distance_prop}");
    }
}

#[test]
fn arm_chain_through_container() {
    let original = arm_like_code();
    let mut filtered = original.clone();
    encode_arm(&mut filtered);
    let data = xz_stream(
        1,
        &[Block {
            filters: vec![(0x07, Vec::new()), (0x21, vec![0x00])],
            lzma2: lzma2_uncompressed(&filtered),
            decoded: original.clone(),
        }],
    );
    assert_eq!(decode_xz(&data).unwrap(), original);
}

#[test]
fn x86_chain_matches_one_shot_filter() {
    let mut filtered: Vec<u8> = (0..700u32).map(|i| (i * 29 + 1) as u8).collect();
    for i in (0..filtered.len()).step_by(23) {
        filtered[i] = 0xe8;
    }
    let mut expected = filtered.clone();
    decode_bcj_x86(&mut expected);

    let data = xz_stream(
        1,
        &[Block {
            filters: vec![(0x04, Vec::new()), (0x21, vec![0x00])],
            lzma2: lzma2_uncompressed(&filtered),
            decoded: expected.clone(),
        }],
    );
    assert_eq!(decode_xz(&data).unwrap(), expected);
}

#[test]
fn delta_and_x86_chain_compose_in_reverse_order() {
    // declared [delta, x86, lzma2]: decoding applies x86 first, then
    // delta, mirroring the one-shot helpers applied in that order
    let mut filtered: Vec<u8> = (0..900u32).map(|i| (i * 17 + 5) as u8).collect();
    for i in (0..filtered.len()).step_by(31) {
        filtered[i] = 0xe8;
    }
    let mut expected = filtered.clone();
    decode_bcj_x86(&mut expected);
    decode_delta(&mut expected, 4);

    let data = xz_stream(
        0,
        &[Block {
            filters: vec![(0x03, vec![3]), (0x04, Vec::new()), (0x21, vec![0x00])],
            lzma2: lzma2_uncompressed(&filtered),
            decoded: expected.clone(),
        }],
    );
    assert_eq!(decode_xz(&data).unwrap(), expected);
}

#[test]
fn bcj_zero_start_offset_accepted() {
    let original = arm_like_code();
    let mut filtered = original.clone();
    encode_arm(&mut filtered);
    let data = xz_stream(
        0,
        &[Block {
            filters: vec![(0x07, vec![0, 0, 0, 0]), (0x21, vec![0x00])],
            lzma2: lzma2_uncompressed(&filtered),
            decoded: original.clone(),
        }],
    );
    assert_eq!(decode_xz(&data).unwrap(), original);
}

#[test]
fn bcj_nonzero_start_offset_rejected() {
    let data = xz_stream(
        0,
        &[Block {
            filters: vec![(0x07, vec![0, 0, 1, 0]), (0x21, vec![0x00])],
            lzma2: lzma2_uncompressed(b"x"),
            decoded: b"x".to_vec(),
        }],
    );
    assert_eq!(decode_xz(&data), Err(XzError::UnsupportedFilter(0x07)));
}

#[test]
fn delta_one_shot_distance_one() {
    let mut data = vec![10u8, 10, 10, 10];
    decode_delta(&mut data, 1);
    assert_eq!(data, [10, 20, 30, 40]);
}
