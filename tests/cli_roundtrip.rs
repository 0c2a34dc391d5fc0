//! Round trips against the real `xz` binary. These need an `xz` in
//! PATH and are opt-in: set `UNXZ_CLI_TESTS=1` to run them, otherwise
//! every test here is a no-op.

use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use unxz::{decode_xz, XzStreamDecoder};

fn enabled() -> bool {
    std::env::var("UNXZ_CLI_TESTS").is_ok_and(|v| v == "1")
}

/// Deterministic pseudo-random data with compressible stretches.
fn seeded_data(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + 128);
    let mut seed = [7u8; 32];
    while out.len() < len {
        let mut sha = Sha256::new();
        Digest::update(&mut sha, seed);
        seed.copy_from_slice(&sha.finalize());
        out.extend_from_slice(&seed);
        out.extend_from_slice(&[0x55; 96]);
    }
    out.truncate(len);
    out
}

fn temp_paths(args: &[&str], len: usize) -> (PathBuf, PathBuf) {
    let mut sha = Sha256::new();
    for a in args {
        Digest::update(&mut sha, a.as_bytes());
    }
    Digest::update(&mut sha, len.to_le_bytes());
    let tag = hex::encode(&sha.finalize()[..8]);
    let dir = std::env::temp_dir();
    let src = dir.join(format!("unxz-cli-{tag}.bin"));
    let compressed = dir.join(format!("unxz-cli-{tag}.bin.xz"));
    (src, compressed)
}

fn compress_with_cli(args: &[&str], raw: &[u8]) -> Vec<u8> {
    let (src, compressed_path) = temp_paths(args, raw.len());
    fs::write(&src, raw).unwrap();
    let _ = fs::remove_file(&compressed_path);
    let status = Command::new("xz")
        .arg("-k")
        .arg("-f")
        .args(args)
        .arg(&src)
        .status()
        .expect("xz binary not runnable");
    assert!(status.success(), "xz {args:?} failed");
    let compressed = fs::read(&compressed_path).unwrap();
    let _ = fs::remove_file(&src);
    let _ = fs::remove_file(&compressed_path);
    compressed
}

fn roundtrip(args: &[&str]) {
    if !enabled() {
        return;
    }
    let raw = seeded_data(1 << 20);
    let compressed = compress_with_cli(args, &raw);

    assert_eq!(decode_xz(&compressed).unwrap(), raw, "one-shot {args:?}");

    let mut decoder = XzStreamDecoder::new();
    let mut out = Vec::new();
    for chunk in compressed.chunks(313) {
        out.extend(decoder.push(chunk).unwrap());
    }
    out.extend(decoder.finish().unwrap());
    assert_eq!(out, raw, "streamed {args:?}");
}

#[test]
fn preset_0() {
    roundtrip(&["-0"]);
}

#[test]
fn preset_1() {
    roundtrip(&["-1"]);
}

#[test]
fn preset_6() {
    roundtrip(&["-6"]);
}

#[test]
fn preset_9() {
    roundtrip(&["-9"]);
}

#[test]
fn preset_9_extreme() {
    roundtrip(&["-9e"]);
}

#[test]
fn check_none() {
    roundtrip(&["--check=none"]);
}

#[test]
fn check_crc32() {
    roundtrip(&["--check=crc32"]);
}

#[test]
fn check_crc64() {
    roundtrip(&["--check=crc64"]);
}

#[test]
fn check_sha256() {
    roundtrip(&["--check=sha256"]);
}

#[test]
fn multiple_blocks() {
    roundtrip(&["--block-size=65536"]);
}

#[test]
fn filter_x86() {
    roundtrip(&["--x86", "--lzma2"]);
}

#[test]
fn filter_delta() {
    roundtrip(&["--delta=dist=4", "--lzma2"]);
}

#[test]
fn filter_delta_and_x86() {
    roundtrip(&["--delta=dist=1", "--x86", "--lzma2"]);
}

#[test]
fn filter_arm() {
    roundtrip(&["--arm", "--lzma2"]);
}

#[test]
fn filter_armthumb() {
    roundtrip(&["--armthumb", "--lzma2"]);
}

#[test]
fn filter_powerpc() {
    roundtrip(&["--powerpc", "--lzma2"]);
}

#[test]
fn filter_sparc() {
    roundtrip(&["--sparc", "--lzma2"]);
}

#[test]
fn filter_ia64() {
    roundtrip(&["--ia64", "--lzma2"]);
}

#[test]
fn concatenated_files() {
    if !enabled() {
        return;
    }
    let raw_a = seeded_data(200_000);
    let raw_b = seeded_data(100_000);
    let mut compressed = compress_with_cli(&["-1"], &raw_a);
    compressed.extend_from_slice(&[0, 0, 0, 0]);
    compressed.extend_from_slice(&compress_with_cli(&["-2"], &raw_b));

    let mut expected = raw_a;
    expected.extend_from_slice(&raw_b);
    assert_eq!(decode_xz(&compressed).unwrap(), expected);
}
