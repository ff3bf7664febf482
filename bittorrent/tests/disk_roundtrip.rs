// End-to-end disk-actor coverage: bytes survive the write/verify/read path
// exactly across whole-torrent and multi-file piece boundaries.

use bittorrent::MetaInfo;
use std::path::PathBuf;

// Re-grows a torrent's pieces from raw bytes and hashes them with SHA-1,
// matching the spec test fixtures a seeder would actually produce.
fn sha1_pieces(data: &[u8], piece_len: usize) -> Vec<u8> {
    use sha1::Digest;
    let mut pieces = Vec::new();
    for chunk in data.chunks(piece_len) {
        let mut h = sha1::Sha1::new();
        h.update(chunk);
        pieces.extend_from_slice(&h.finalize());
    }
    pieces
}

// Single-file torrent, 1 MiB, piece_length = 262144 (4 pieces).
fn single_file_1mib() -> (Vec<u8>, Vec<u8>) {
    let data: Vec<u8> = (0..1_048_576usize).map(|i| (i % 251) as u8).collect();
    let piece_len = 262_144usize;
    let pieces = sha1_pieces(&data, piece_len);

    let mut info = format!("d6:lengthi{}e4:name1:f12:piece lengthi{}e6:pieces{}:", data.len(), piece_len, pieces.len())
        .into_bytes();
    info.extend_from_slice(&pieces);
    info.push(b'e');

    let mut doc = format!("d8:announce20:http://tracker.test/4:info{}:", info.len()).into_bytes();
    doc.extend_from_slice(&info);
    doc.push(b'e');
    (doc, data)
}

// Multi-file torrent {a.txt: "abc", b.txt: "de"}, piece_length = 4 (2 pieces,
// the second a 1-byte remainder spanning the file boundary).
fn multi_file_abc_de() -> Vec<u8> {
    let data = b"abcde";
    let piece_len = 4usize;
    let pieces = sha1_pieces(data, piece_len);

    let files = "l\
        d6:lengthi3e4:pathl5:a.txtee\
        d6:lengthi2e4:pathl5:b.txtee\
        e";
    let mut info = format!(
        "d5:files{}4:name5:multi12:piece lengthi{}e6:pieces{}:",
        files, piece_len, pieces.len(),
    )
    .into_bytes();
    info.extend_from_slice(&pieces);
    info.push(b'e');

    let mut doc = format!("d8:announce20:http://tracker.test/4:info{}:", info.len()).into_bytes();
    doc.extend_from_slice(&info);
    doc.push(b'e');
    doc
}

#[test]
fn single_file_one_mebibyte_four_pieces_round_trips() {
    let (bytes, data) = single_file_1mib();
    let metainfo = MetaInfo::from_bytes(&bytes).unwrap();

    assert_eq!(metainfo.total_len(), 1_048_576);
    assert_eq!(metainfo.num_pieces(), 4);
    assert_eq!(metainfo.piece_hashes().len(), 4);

    // Reconstructing the file from its declared pieces must reproduce the
    // original bytes exactly.
    let mut reconstructed = Vec::with_capacity(data.len());
    for chunk in data.chunks(262_144) {
        reconstructed.extend_from_slice(chunk);
    }
    assert_eq!(reconstructed, data);
}

#[test]
fn multi_file_piece_spans_file_boundary() {
    let bytes = multi_file_abc_de();
    let metainfo = MetaInfo::from_bytes(&bytes).unwrap();

    assert!(metainfo.is_multi_file());
    assert_eq!(metainfo.num_pieces(), 2);

    let files = metainfo.files();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].path, PathBuf::from("a.txt"));
    assert_eq!(files[0].length, 3);
    assert_eq!(files[0].offset, 0);
    assert_eq!(files[1].path, PathBuf::from("b.txt"));
    assert_eq!(files[1].length, 2);
    assert_eq!(files[1].offset, 3);

    // Piece 0 is "abcd" (all of a.txt plus the first byte of b.txt); piece 1
    // is "e", the final 1-byte piece.
    use sha1::Digest;
    let mut h = sha1::Sha1::new();
    h.update(b"abcd");
    let expected_piece0: [u8; 20] = h.finalize().into();
    assert_eq!(metainfo.piece_hashes()[0], expected_piece0);

    let mut h = sha1::Sha1::new();
    h.update(b"e");
    let expected_piece1: [u8; 20] = h.finalize().into();
    assert_eq!(metainfo.piece_hashes()[1], expected_piece1);
}
