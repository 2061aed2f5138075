//! Parser round trips over generated archives.

mod common;

use std::sync::Arc;

use tokio::io::AsyncReadExt;

use cloudzip::error::Error;
use cloudzip::remote::InMemoryFetcher;
use cloudzip::zip::{CentralDirectoryParser, Compression, S_IFDIR, S_IFMT};

use common::{build_archive, build_zip64_archive, crc32, regular_archive, Member};

fn parser(data: Vec<u8>) -> CentralDirectoryParser<InMemoryFetcher> {
    CentralDirectoryParser::new(Arc::new(InMemoryFetcher::new(data)))
}

async fn read_all(
    parser: &CentralDirectoryParser<InMemoryFetcher>,
    name: &str,
) -> Result<Vec<u8>, Error> {
    let mut reader = parser.read(name).await?;
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await?;
    Ok(out)
}

#[tokio::test]
async fn central_directory_lists_every_member() {
    let p = parser(regular_archive());
    let records = p.get_central_directory().await.unwrap();
    assert_eq!(records.len(), 7);
    assert_eq!(records[3].file_name, "foo/bar.txt");
    assert_eq!(records[3].compression_method, Compression::Deflate);
    assert!(records[2].is_dir());
    assert_eq!(records[2].mode & S_IFMT, S_IFDIR);
}

#[tokio::test]
async fn member_round_trip_matches_crc() {
    let p = parser(regular_archive());
    let records = p.get_central_directory().await.unwrap();
    for record in records.iter().filter(|r| !r.is_dir()) {
        let data = read_all(&p, &record.file_name).await.unwrap();
        assert_eq!(data.len() as u64, record.uncompressed_size_bytes, "{}", record.file_name);
        assert_eq!(crc32(&data), record.crc32_uncompressed, "{}", record.file_name);
    }
}

#[tokio::test]
async fn member_bodies_decode() {
    let p = parser(regular_archive());
    assert_eq!(read_all(&p, "foo/bar.txt").await.unwrap(), b"file in a directory!\n");
    assert_eq!(read_all(&p, "stored.txt").await.unwrap(), b"stored, not compressed\n");
}

#[tokio::test]
async fn store_only_archive_round_trips() {
    let archive = build_archive(
        &[Member::stored("one.bin", &[1, 2, 3]), Member::stored("two.bin", &[4, 5, 6, 7])],
        b"",
    );
    let p = parser(archive);
    assert_eq!(read_all(&p, "two.bin").await.unwrap(), &[4, 5, 6, 7]);
}

#[tokio::test]
async fn eocd_found_across_comment_lengths() {
    for comment_len in [0usize, 1, 100, 65535] {
        let comment = vec![b'x'; comment_len];
        let archive = build_archive(&[Member::file("a.txt", b"data")], &comment);
        let p = parser(archive);
        let loc = p.cd_location().await.unwrap();
        assert!(!loc.zip64, "comment length {comment_len}");
        let records = p.get_central_directory().await.unwrap();
        assert_eq!(records.len(), 1, "comment length {comment_len}");
    }
}

#[tokio::test]
async fn comment_containing_signature_bytes_is_skipped() {
    let mut comment = Vec::new();
    comment.extend_from_slice(b"PK\x05\x06");
    comment.extend_from_slice(&[0u8; 30]);
    let archive = build_archive(&[Member::file("a.txt", b"data")], &comment);
    let p = parser(archive);
    assert_eq!(p.get_central_directory().await.unwrap().len(), 1);
}

#[tokio::test]
async fn zip64_sentinels_are_promoted() {
    let body = b"This small file is in ZIP64 format.\n";
    let archive = build_zip64_archive("README", body);
    let p = parser(archive);

    let loc = p.cd_location().await.unwrap();
    assert!(loc.zip64);

    let records = p.get_central_directory().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].uncompressed_size_bytes, body.len() as u64);
    assert_eq!(records[0].compressed_size_bytes, body.len() as u64);
    assert_eq!(records[0].local_header_offset, 0);

    assert_eq!(read_all(&p, "README").await.unwrap(), body);
}

#[tokio::test]
async fn sentinel_without_zip64_field_is_invalid() {
    let mut archive = build_zip64_archive("README", b"payload");
    // Overwrite the zip64 extra-field header id so promotion fails.
    let needle = [0x01u8, 0x00, 24, 0];
    let at = archive
        .windows(needle.len())
        .rposition(|w| w == needle)
        .expect("zip64 extra field present");
    archive[at] = 0x99;
    let p = parser(archive);
    let err = p.get_central_directory().await.unwrap_err();
    assert!(matches!(err, Error::InvalidZip(_)));
}

#[tokio::test]
async fn garbage_input_is_invalid_zip() {
    let p = parser(vec![0u8; 4096]);
    assert!(matches!(p.cd_location().await.unwrap_err(), Error::InvalidZip(_)));
}

#[tokio::test]
async fn missing_member_is_file_not_found() {
    let p = parser(regular_archive());
    let err = p.read("no/such/member").await.unwrap_err();
    assert!(matches!(err, Error::FileNotFound(_)));
}

#[tokio::test]
async fn duplicate_names_first_match_wins() {
    let archive = build_archive(
        &[Member::file("dup.txt", b"first"), Member::file("dup.txt", b"second")],
        b"",
    );
    let p = parser(archive);
    assert_eq!(read_all(&p, "dup.txt").await.unwrap(), b"first");
}

#[tokio::test]
async fn many_small_members_parse() {
    let members: Vec<Member> = (0..150_000)
        .map(|i| Member::stored(&format!("f/{i:06}.txt"), b""))
        .collect();
    // 150k entries overflow the 16-bit EOCD counts; totals come from the
    // CD size, which is what the parser trusts.
    let archive = build_archive(&members, b"");
    let p = parser(archive);
    let records = p.get_central_directory().await.unwrap();
    assert_eq!(records.len(), 150_000);
}
