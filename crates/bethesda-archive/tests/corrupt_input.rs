#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! Integration tests for malformed and truncated archives
//!
//! Every reader must refuse a wrong signature with a typed error and must
//! never return short data for a truncated payload.

use bethesda_archive::ba2::Ba2Archive;
use bethesda_archive::tes3::{Tes3Archive, Tes3ArchiveState, Tes3FileState};
use bethesda_archive::tes4::{Tes4Archive, Tes4ArchiveState, Tes4FileState, Tes4Version};
use bethesda_archive::{
    ArchiveError, ArchiveState, CodecConfig, EntryRef, FileState, MemorySource, StreamSource,
    create_builder, open,
};
use std::io::Cursor;
use std::sync::Arc;

const WRONG_MAGIC: &[u8; 16] = b"NOPE\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\x0b\x0c";

fn source(bytes: &[u8]) -> Arc<dyn StreamSource> {
    Arc::new(MemorySource::new(bytes.to_vec()))
}

// --- Wrong magic, 16 bytes ---

#[test]
fn each_reader_rejects_wrong_magic() {
    let config = CodecConfig::default();

    let err = Tes3Archive::open(source(WRONG_MAGIC), &config).unwrap_err();
    assert!(
        matches!(err, ArchiveError::InvalidMagic { format: "TES3", found } if &found == b"NOPE")
    );

    let err = Tes4Archive::open(source(WRONG_MAGIC), &config).unwrap_err();
    assert!(matches!(err, ArchiveError::InvalidMagic { format: "BSA", .. }));

    let err = Ba2Archive::open(source(WRONG_MAGIC), &config).unwrap_err();
    assert!(matches!(err, ArchiveError::InvalidMagic { format: "BA2", .. }));

    let err = open(source(WRONG_MAGIC), &config).unwrap_err();
    assert!(matches!(err, ArchiveError::UnrecognizedArchive(found) if &found == b"NOPE"));
    assert!(err.is_malformed_input());
    assert!(!err.is_layout_violation());
}

#[test]
fn short_inputs_fail_cleanly() {
    let config = CodecConfig::default();
    for bytes in [&b""[..], b"BS", b"BSA\0\x68\0", b"BTDX\x01\0\0\0GN", &[0, 1, 0, 0, 4]] {
        assert!(open(source(bytes), &config).is_err(), "{bytes:02X?} should not open");
    }
}

#[test]
fn folder_count_past_end_fails() {
    // valid header claiming one folder, but no folder records follow
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"BSA\0");
    for field in [0x68u32, 0x24, 0x3, 1, 1, 0, 0, 0] {
        bytes.extend_from_slice(&field.to_le_bytes());
    }
    let err = open(source(&bytes), &CodecConfig::default()).unwrap_err();
    assert!(err.is_malformed_input(), "unexpected error {err:?}");
}

fn expect_table_overrun(bytes: &[u8], expected: u64, copied: u64) {
    let err = open(source(bytes), &CodecConfig::default()).unwrap_err();
    match &err {
        ArchiveError::Truncated {
            expected: e,
            copied: c,
        } => assert_eq!((*e, *c), (expected, copied)),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.is_malformed_input());
}

#[test]
fn huge_tes3_file_count_fails_without_allocating() {
    let mut bytes = Vec::new();
    for field in [0x100u32, 0, u32::MAX] {
        bytes.extend_from_slice(&field.to_le_bytes());
    }
    expect_table_overrun(&bytes, u64::from(u32::MAX) * 20, 0);
}

#[test]
fn huge_tes4_counts_fail_without_allocating() {
    let header = |folders: u32, files: u32| {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"BSA\0");
        for field in [0x68u32, 0x24, 0x3, folders, files, 0, 0, 0] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        bytes
    };
    expect_table_overrun(&header(u32::MAX, 1), u64::from(u32::MAX) * 16, 0);

    // one real folder record, then far fewer file records than claimed
    let mut bytes = header(1, u32::MAX);
    bytes.extend_from_slice(&[0u8; 16]);
    expect_table_overrun(&bytes, u64::from(u32::MAX) * 16, 0);
}

#[test]
fn huge_ba2_file_count_fails_without_allocating() {
    for (token, record_size) in [(b"GNRL", 36u64), (b"DX10", 24)] {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"BTDX");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(token);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        expect_table_overrun(&bytes, u64::from(u32::MAX) * record_size, 0);
    }
}

// --- Truncated payloads ---

fn built(state: ArchiveState, file: FileState, data: &[u8]) -> Vec<u8> {
    let builder = create_builder(state, &CodecConfig::default(), 0).unwrap();
    builder.add_file(file, &mut &data[..]).unwrap();
    let mut out = Cursor::new(Vec::new());
    builder.build(&mut out).unwrap();
    out.into_inner()
}

#[test]
fn truncated_raw_payload_is_an_error() {
    let mut bytes = built(
        ArchiveState::Tes3(Tes3ArchiveState::default()),
        FileState::Tes3(Tes3FileState {
            index: 0,
            path: "a.txt".to_string(),
        }),
        b"0123456789abcdef",
    );
    bytes.truncate(bytes.len() - 6);

    let archive = open(source(&bytes), &CodecConfig::default()).unwrap();
    let mut out = Vec::new();
    let err = archive.copy_entry_data(archive.entries()[0], &mut out).unwrap_err();
    assert!(matches!(err, ArchiveError::Truncated { expected: 16, copied: 10 }));
}

#[test]
fn truncated_compressed_payload_is_an_error() {
    let data = b"compressible compressible compressible compressible".repeat(20);
    for version in [Tes4Version::Fo3, Tes4Version::Sse] {
        let mut bytes = built(
            ArchiveState::Tes4(Tes4ArchiveState::new(version).with_compression(true)),
            FileState::Tes4(Tes4FileState {
                index: 0,
                path: "a\\b.txt".to_string(),
                flip_compression: false,
            }),
            &data,
        );
        bytes.truncate(bytes.len() - 8);

        let archive = open(source(&bytes), &CodecConfig::default()).unwrap();
        let mut out = Vec::new();
        let err = archive.copy_entry_data(archive.entries()[0], &mut out).unwrap_err();
        assert!(
            matches!(err, ArchiveError::Truncated { .. } | ArchiveError::Decompression(_)),
            "{version:?}: unexpected error {err:?}"
        );
        assert!(err.is_malformed_input());
        assert!(out.len() < data.len());
    }
}

#[test]
fn garbage_compressed_payload_is_an_error() {
    let data = b"some bytes to squeeze".repeat(10);
    let mut bytes = built(
        ArchiveState::Tes4(Tes4ArchiveState::new(Tes4Version::Tes4).with_compression(true)),
        FileState::Tes4(Tes4FileState {
            index: 0,
            path: "a\\b.txt".to_string(),
            flip_compression: false,
        }),
        &data,
    );
    let archive = open(source(&bytes), &CodecConfig::default()).unwrap();
    let EntryRef::Tes4(entry) = archive.entries()[0] else {
        panic!("expected a TES4 entry");
    };
    // clobber the zlib stream after the 4-byte size prefix
    let start = entry.record().offset as usize + 4;
    for b in &mut bytes[start..] {
        *b = 0xFF;
    }

    let archive = open(source(&bytes), &CodecConfig::default()).unwrap();
    let mut out = Vec::new();
    let err = archive.copy_entry_data(archive.entries()[0], &mut out).unwrap_err();
    assert!(err.is_malformed_input(), "unexpected error {err:?}");
}
