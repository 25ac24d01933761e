mod common;

use pretty_assertions::assert_eq;
use std::io::{self, Read};
use std::time::{Duration, UNIX_EPOCH};

use common::{
    CountingStore, HollowStore, SparseStore, classic_archive_with_directory_at, local_zip64, noise,
};
use rezip::zip::dos_time::{DOS_TIME_MIN, from_dos_time};
use rezip::zip::{EMPTY_MARKER_CONTENT, EMPTY_MARKER_NAME, ExtraField, UnrecognizedExtraField};
use rezip::{
    Archive, ArchiveOptions, CompressionMethod, Entry, LocalFile, MemoryStore, ReadAt, ZipError,
};

fn names<S>(archive: &Archive<S>) -> Vec<String>
where
    S: rezip::Storage,
{
    archive.entries().map(|e| e.name().to_string()).collect()
}

fn read<S: rezip::Storage>(archive: &Archive<S>, name: &str) -> Vec<u8> {
    let entry = archive.entry(name).unwrap_or_else(|| panic!("missing {name}"));
    archive.read_entry(entry).unwrap()
}

#[test]
fn round_trip_preserves_content_and_metadata() {
    let time = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
    let store = MemoryStore::new();

    let mut archive = Archive::open(&store).unwrap();
    let mut entry = archive.create_or_get_entry("docs/readme.txt");
    entry.set_time(Some(time));
    entry.set_comment(Some("first entry".into()));
    entry.write_bytes(b"read me").unwrap();

    let mut entry = archive.create_or_get_entry("bin/tool");
    entry.set_method(CompressionMethod::Stored);
    entry.set_unix_mode(0o100755);
    entry.write_bytes(&noise(4096, 7)).unwrap();
    archive.set_comment(Some("archive comment".into()));
    archive.close().unwrap();

    let archive = Archive::open(&store).unwrap();
    assert_eq!(names(&archive), ["docs/readme.txt", "bin/tool"]);
    assert_eq!(archive.comment(), Some("archive comment"));
    assert!(!archive.is_zip64());

    let readme = archive.entry("docs/readme.txt").unwrap();
    assert_eq!(readme.time(), Some(time));
    assert_eq!(readme.comment(), Some("first entry"));
    assert_eq!(readme.method(), CompressionMethod::Deflate);
    assert_eq!(read(&archive, "docs/readme.txt"), b"read me");

    let tool = archive.entry("bin/tool").unwrap();
    assert_eq!(tool.unix_mode(), Some(0o100755));
    assert_eq!(tool.compressed_size(), 4096);
    assert_eq!(read(&archive, "bin/tool"), noise(4096, 7));
}

#[test]
fn times_are_truncated_to_two_seconds_and_clamped() {
    let store = MemoryStore::new();
    let mut archive = Archive::open(&store).unwrap();
    archive
        .create_or_get_entry("odd")
        .set_time(Some(UNIX_EPOCH + Duration::from_secs(1_600_000_001)));
    archive
        .create_or_get_entry("old")
        .set_time(Some(UNIX_EPOCH + Duration::from_secs(86_400)));
    archive.create_or_get_entry("unknown");
    archive.close().unwrap();

    let archive = Archive::open(&store).unwrap();
    let time = |name: &str| archive.entry(name).unwrap().time();
    assert_eq!(time("odd"), Some(UNIX_EPOCH + Duration::from_secs(1_600_000_000)));
    assert_eq!(time("old"), from_dos_time(DOS_TIME_MIN));
    assert_eq!(time("unknown"), None);
}

#[test]
fn small_deflate_entry_is_buffered() {
    let payload: Vec<u8> = b"0123456789".repeat(10);
    let store = MemoryStore::new();

    let mut archive = Archive::open(&store).unwrap();
    archive.create_or_get_entry("hundred.txt").write_bytes(&payload).unwrap();
    // still staged: nothing has reached the store
    assert_eq!(store.size().unwrap(), 0);
    archive.close().unwrap();

    let archive = Archive::open(&store).unwrap();
    let entry = archive.entry("hundred.txt").unwrap();
    assert_eq!(entry.size(), 100);
    assert!(entry.compressed_size() < 100);
    assert_eq!(entry.crc32(), crc32fast::hash(&payload));
    assert_eq!(read(&archive, "hundred.txt"), payload);
}

#[test]
fn large_stored_entry_is_streamed() {
    const LEN: u64 = 50 * 1024 * 1024;
    let store = MemoryStore::new();

    let mut archive = Archive::open(&store).unwrap();
    let mut entry = archive.create_or_get_entry("big.bin");
    entry.set_method(CompressionMethod::Stored);
    entry.write_from(io::repeat(0x5A).take(LEN)).unwrap();
    // streamed data bypasses the staging buffer
    assert!(store.size().unwrap() > LEN);
    archive.close().unwrap();

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&vec![0x5Au8; LEN as usize]);
    let expected_crc = hasher.finalize();

    let archive = Archive::open(&store).unwrap();
    let entry = archive.entry("big.bin").unwrap();
    assert_eq!(entry.size(), LEN);
    assert_eq!(entry.compressed_size(), LEN);
    assert_eq!(entry.crc32(), expected_crc);

    let mut reader = archive.open_entry(entry).unwrap();
    let mut buf = vec![0u8; 1 << 20];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        assert!(buf[..n].iter().all(|b| *b == 0x5A));
        total += n as u64;
    }
    assert_eq!(total, LEN);
}

#[test]
fn streamed_deflate_entry_reads_back() {
    let payload = noise(200_000, 3)
        .into_iter()
        .map(|b| b & 0x0F)
        .collect::<Vec<_>>();
    let store = MemoryStore::new();
    let options = ArchiveOptions::default().with_stream_threshold(1024);

    let mut archive = Archive::open_with(&store, options).unwrap();
    archive
        .create_or_get_entry("streamed.bin")
        .write_from(payload.as_slice())
        .unwrap();
    archive.close().unwrap();

    let archive = Archive::open(&store).unwrap();
    let entry = archive.entry("streamed.bin").unwrap();
    assert!(entry.compressed_size() < entry.size());
    assert_eq!(read(&archive, "streamed.bin"), payload);
}

#[test]
fn empty_archive_gets_marker_entry() {
    let store = MemoryStore::new();
    Archive::open(&store).unwrap().close().unwrap();

    let archive = Archive::open(&store).unwrap();
    assert_eq!(names(&archive), [EMPTY_MARKER_NAME]);
    let marker = archive.entry(EMPTY_MARKER_NAME).unwrap();
    assert_eq!(marker.method(), CompressionMethod::Stored);
    assert_eq!(read(&archive, EMPTY_MARKER_NAME), EMPTY_MARKER_CONTENT);
}

#[test]
fn erased_entry_is_gone_after_reopen() {
    let store = MemoryStore::new();
    let mut archive = Archive::open(&store).unwrap();
    for name in ["a", "b", "c"] {
        archive.create_or_get_entry(name).write_bytes(name.as_bytes()).unwrap();
    }
    archive.close().unwrap();

    let mut archive = Archive::open(&store).unwrap();
    assert!(archive.erase_entry("b").is_some());
    assert!(archive.erase_entry("missing").is_none());
    archive.close().unwrap();

    let archive = Archive::open(&store).unwrap();
    assert_eq!(names(&archive), ["a", "c"]);
    assert_eq!(read(&archive, "a"), b"a");
    assert_eq!(read(&archive, "c"), b"c");
}

#[test]
fn compaction_reclaims_erased_space() {
    let store = MemoryStore::new();
    let mut archive = Archive::open(&store).unwrap();
    for (seed, name) in ["a", "b", "c"].into_iter().enumerate() {
        let mut entry = archive.create_or_get_entry(name);
        entry.set_method(CompressionMethod::Stored);
        entry.write_bytes(&noise(10_000, seed as u32)).unwrap();
    }
    archive.close().unwrap();

    let mut archive = Archive::open(&store).unwrap();
    archive.erase_entry("b");
    archive.close().unwrap();
    let before = store.size().unwrap();

    let mut archive = Archive::open(&store).unwrap();
    archive.compact().unwrap();
    archive.close().unwrap();
    let after = store.size().unwrap();
    assert!(after + 10_000 <= before, "{after} vs {before}");

    let archive = Archive::open(&store).unwrap();
    assert_eq!(names(&archive), ["a", "c"]);
    assert_eq!(read(&archive, "a"), noise(10_000, 0));
    assert_eq!(read(&archive, "c"), noise(10_000, 2));
}

#[test]
fn overwriting_then_compacting_keeps_latest_content() {
    let store = MemoryStore::new();
    let mut archive = Archive::open(&store).unwrap();
    archive.create_or_get_entry("x").write_bytes(&noise(5000, 1)).unwrap();
    archive.create_or_get_entry("x").write_bytes(b"small").unwrap();
    archive.compact().unwrap();
    archive.close().unwrap();

    let archive = Archive::open(&store).unwrap();
    assert_eq!(archive.len(), 1);
    assert_eq!(read(&archive, "x"), b"small");
    assert!(store.size().unwrap() < 500);
}

#[test]
fn extra_field_ids_stay_unique() {
    let store = MemoryStore::new();
    let mut archive = Archive::open(&store).unwrap();
    let mut entry = archive.create_or_get_entry("tagged");
    entry.add_extra(ExtraField::Unrecognized(
        UnrecognizedExtraField::new(0xCAFE).with_central(b"first".to_vec()),
    ));
    entry.add_extra(ExtraField::Unrecognized(
        UnrecognizedExtraField::new(0xCAFE).with_central(b"second".to_vec()),
    ));
    assert_eq!(entry.extra_fields().len(), 1);
    entry.write_bytes(b"x").unwrap();
    archive.close().unwrap();

    let archive = Archive::open(&store).unwrap();
    let extras = archive.entry("tagged").unwrap().extra_fields();
    assert_eq!(extras.len(), 1);
    match extras.get(0xCAFE) {
        Some(ExtraField::Unrecognized(field)) => assert_eq!(field.central_data(), b"second"),
        other => panic!("unexpected extra field {other:?}"),
    }
}

#[test]
fn comments_and_unknown_extras_survive_compaction() {
    let store = MemoryStore::new();
    let mut archive = Archive::open(&store).unwrap();
    let mut entry = archive.create_or_get_entry("kept");
    entry.set_comment(Some("entry comment".into()));
    entry.add_extra(ExtraField::Unrecognized(
        UnrecognizedExtraField::new(0x7075).with_central(vec![1, 2, 3]),
    ));
    entry.write_bytes(b"kept data").unwrap();
    archive.create_or_get_entry("dropped").write_bytes(b"gone").unwrap();
    archive.set_comment(Some("whole archive".into()));
    archive.close().unwrap();

    let mut archive = Archive::open(&store).unwrap();
    archive.erase_entry("dropped");
    archive.compact().unwrap();
    archive.close().unwrap();

    let archive = Archive::open(&store).unwrap();
    assert_eq!(archive.comment(), Some("whole archive"));
    let kept = archive.entry("kept").unwrap();
    assert_eq!(kept.comment(), Some("entry comment"));
    assert_eq!(
        kept.extra_fields().get(0x7075).map(ExtraField::central_data).as_deref(),
        Some(&[1u8, 2, 3][..])
    );
    assert_eq!(read(&archive, "kept"), b"kept data");
}

#[test]
fn appending_keeps_earlier_entries() {
    let store = MemoryStore::new();
    let mut archive = Archive::open(&store).unwrap();
    archive.create_or_get_entry("a").write_bytes(b"one").unwrap();
    archive.create_or_get_entry("b").write_bytes(b"two").unwrap();
    archive.close().unwrap();

    let mut archive = Archive::open(&store).unwrap();
    archive.create_or_get_entry("c").write_bytes(b"three").unwrap();
    archive.create_or_get_entry("a").write_bytes(b"uno").unwrap();
    archive.close().unwrap();

    let archive = Archive::open(&store).unwrap();
    assert_eq!(names(&archive), ["a", "b", "c"]);
    assert_eq!(read(&archive, "a"), b"uno");
    assert_eq!(read(&archive, "b"), b"two");
    assert_eq!(read(&archive, "c"), b"three");
}

#[test]
fn more_than_65535_entries_need_zip64() {
    fn fill(archive: &mut Archive<&MemoryStore>) {
        for i in 0..0x1_0000u32 {
            let mut entry = archive.create_or_get_entry(&format!("{i:05x}"));
            entry.set_method(CompressionMethod::Stored);
            entry.write_bytes(&[]).unwrap();
        }
    }

    let store = MemoryStore::new();
    let mut archive = Archive::open(&store).unwrap();
    fill(&mut archive);
    assert!(matches!(
        archive.close(),
        Err(ZipError::Zip64Required { field: "entry count", value: 0x1_0000 })
    ));

    let store = MemoryStore::new();
    let mut archive = Archive::open_with(&store, ArchiveOptions::default().with_zip64(true)).unwrap();
    fill(&mut archive);
    archive.close().unwrap();

    let archive = Archive::open(&store).unwrap();
    assert!(archive.is_zip64());
    assert_eq!(archive.len(), 0x1_0000);
    assert_eq!(archive.entries().last().map(Entry::name), Some("0ffff"));
    assert_eq!(read(&archive, "0ffff"), b"");
}

#[test]
fn archive_near_4gb_needs_zip64_to_grow() {
    const CD_OFFSET: u64 = 0xFFFF_FF00;
    let payload = noise(1024, 9);

    let store = SparseStore::default();
    classic_archive_with_directory_at(&store, CD_OFFSET);
    let mut archive = Archive::open(&store).unwrap();
    assert!(!archive.is_zip64());
    let mut entry = archive.create_or_get_entry("tail.bin");
    entry.set_method(CompressionMethod::Stored);
    entry.write_bytes(&payload).unwrap();
    assert!(matches!(
        archive.close(),
        Err(ZipError::Zip64Required { field: "central directory offset", .. })
    ));

    let store = SparseStore::default();
    classic_archive_with_directory_at(&store, CD_OFFSET);
    let mut archive = Archive::open(&store).unwrap();
    archive.enable_zip64();
    let mut entry = archive.create_or_get_entry("tail.bin");
    entry.set_method(CompressionMethod::Stored);
    entry.write_bytes(&payload).unwrap();
    archive.close().unwrap();

    let archive = Archive::open(&store).unwrap();
    assert!(archive.is_zip64());
    assert_eq!(names(&archive), ["big.bin", "tail.bin"]);
    let tail = archive.entry("tail.bin").unwrap();
    assert_eq!(tail.header_offset(), Some(CD_OFFSET));
    assert_eq!(read(&archive, "tail.bin"), payload);
}

#[test]
fn directory_scan_uses_few_reads() {
    let store = MemoryStore::new();
    let mut archive = Archive::open(&store).unwrap();
    for i in 0..1000 {
        archive
            .create_or_get_entry(&format!("file-{i:04}.txt"))
            .write_bytes(b"")
            .unwrap();
    }
    archive.close().unwrap();

    let counting = CountingStore::new(store.into_inner());
    let archive = Archive::open_readonly(&counting).unwrap();
    assert_eq!(archive.len(), 1000);
    assert!(counting.reads() <= 4, "{} reads", counting.reads());
}

#[test]
fn concurrent_readers_share_one_archive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.zip");

    let mut archive = Archive::open(LocalFile::open(&path).unwrap()).unwrap();
    for i in 0..8u32 {
        archive
            .create_or_get_entry(&format!("part-{i}"))
            .write_bytes(&noise(30_000, i))
            .unwrap();
    }
    archive.close().unwrap();

    let archive = Archive::open_readonly(LocalFile::open_read(&path).unwrap()).unwrap();
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for i in 0..8u32 {
                    let entry = archive.entry(&format!("part-{i}")).unwrap();
                    assert_eq!(archive.read_entry(entry).unwrap(), noise(30_000, i));
                }
            });
        }
    });
}

#[test]
fn file_entries_take_modification_time() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("input.txt");
    std::fs::write(&source, b"from disk").unwrap();
    let modified = std::fs::metadata(&source).unwrap().modified().unwrap();

    let store = MemoryStore::new();
    let mut archive = Archive::open(&store).unwrap();
    archive.create_or_get_entry("input.txt").write_file(&source).unwrap();
    archive.close().unwrap();

    let archive = Archive::open(&store).unwrap();
    let time = archive.entry("input.txt").unwrap().time().unwrap();
    let drift = modified
        .duration_since(time)
        .unwrap_or_else(|e| e.duration());
    assert!(drift < Duration::from_secs(2));
    assert_eq!(read(&archive, "input.txt"), b"from disk");
}

#[test]
fn corrupt_data_fails_crc_check() {
    let store = MemoryStore::new();
    let mut archive = Archive::open(&store).unwrap();
    let mut entry = archive.create_or_get_entry("data");
    entry.set_method(CompressionMethod::Stored);
    entry.write_bytes(b"payload").unwrap();
    archive.close().unwrap();

    let mut bytes = store.into_inner();
    // first data byte follows the 30-byte header and the 4-byte name
    bytes[34] ^= 0xFF;
    let archive = Archive::open(MemoryStore::from(bytes)).unwrap();
    let entry = archive.entry("data").unwrap();
    assert!(matches!(
        archive.read_entry(entry),
        Err(ZipError::CrcMismatch { .. })
    ));
}

#[test]
fn garbage_is_rejected() {
    let store = MemoryStore::from(vec![0x42; 100]);
    assert!(matches!(Archive::open(store), Err(ZipError::Format(_))));
}

#[test]
fn streamed_zip64_entries_patch_local_sizes() {
    let deflated: Vec<u8> = noise(300_000, 11).into_iter().map(|b| b & 0x03).collect();
    let stored = noise(300_000, 12);
    let store = MemoryStore::new();
    let options = ArchiveOptions::default()
        .with_zip64(true)
        .with_stream_threshold(4096);

    let mut archive = Archive::open_with(&store, options).unwrap();
    archive
        .create_or_get_entry("deflated.bin")
        .write_from(deflated.as_slice())
        .unwrap();
    let mut entry = archive.create_or_get_entry("stored.bin");
    entry.set_method(CompressionMethod::Stored);
    entry.write_from(stored.as_slice()).unwrap();
    archive.close().unwrap();

    let archive = Archive::open(&store).unwrap();
    assert!(archive.is_zip64());
    assert_eq!(read(&archive, "deflated.bin"), deflated);
    assert_eq!(read(&archive, "stored.bin"), stored);

    for entry in archive.entries() {
        let offset = entry.header_offset().unwrap();
        let local = local_zip64(&store, offset).unwrap();
        assert_eq!(local.size, Some(entry.size()));
        assert_eq!(local.compressed_size, Some(entry.compressed_size()));
        assert_eq!(
            entry.extra_fields().zip64().and_then(|z| z.header_offset),
            Some(offset)
        );
    }
    let deflated_entry = archive.entry("deflated.bin").unwrap();
    assert!(deflated_entry.compressed_size() < deflated_entry.size());
}

const FOUR_GIB: u64 = 1 << 32;

#[test]
fn streamed_size_of_4gib_needs_zip64() {
    let store = HollowStore::new(4096..u64::MAX);
    let mut archive = Archive::open(&store).unwrap();
    let mut entry = archive.create_or_get_entry("huge.bin");
    entry.set_method(CompressionMethod::Stored);
    let err = entry.write_stream(io::repeat(0).take(FOUR_GIB)).unwrap_err();
    assert!(
        matches!(
            err,
            ZipError::Zip64Required { field: "compressed size" | "size", value: FOUR_GIB }
        ),
        "{err:?}"
    );
}

#[test]
fn streamed_size_of_4gib_round_trips_in_zip64_mode() {
    // keep the local header and everything written past the data
    let store = HollowStore::new(4096..FOUR_GIB);
    let options = ArchiveOptions::default().with_zip64(true);

    let mut archive = Archive::open_with(&store, options).unwrap();
    let mut entry = archive.create_or_get_entry("huge.bin");
    entry.set_method(CompressionMethod::Stored);
    entry.write_stream(io::repeat(0).take(FOUR_GIB)).unwrap();
    archive.close().unwrap();

    let archive = Archive::open(&store).unwrap();
    assert!(archive.is_zip64());
    let entry = archive.entry("huge.bin").unwrap();
    assert_eq!(entry.size(), FOUR_GIB);
    assert_eq!(entry.compressed_size(), FOUR_GIB);
    assert_eq!(
        entry.extra_fields().zip64().copied(),
        Some(rezip::zip::Zip64ExtendedInfo::full(FOUR_GIB, FOUR_GIB, 0))
    );

    let local = local_zip64(&store, 0).unwrap();
    assert_eq!(local.size, Some(FOUR_GIB));
    assert_eq!(local.compressed_size, Some(FOUR_GIB));
}
