use crate::{
    block::*,
    fs::{resume_bitfield, spawn, CommandToDisk},
    p2p::PeerCommand,
    progress::Progress,
    store::StoreInfo,
    torrent::CommandToTorrent,
    Bitfield, MetaInfo,
};

// Single file "f" of 8 bytes "abcdefgh", piece_length = 4, two pieces.
fn single_file_torrent() -> Vec<u8> {
    use sha1::Digest;
    let mut pieces = Vec::new();
    for chunk in [&b"abcd"[..], b"efgh"] {
        let mut h = sha1::Sha1::new();
        h.update(chunk);
        pieces.extend_from_slice(&h.finalize());
    }
    let mut info = b"d6:lengthi8e4:name1:f12:piece lengthi4e6:pieces40:".to_vec();
    info.extend_from_slice(&pieces);
    info.push(b'e');
    let mut doc = format!("d8:announce20:http://tracker.test/4:info{}:", info.len()).into_bytes();
    doc.extend_from_slice(&info);
    doc.push(b'e');
    doc
}

#[tokio::test]
async fn writes_then_reads_back_verified_piece() {
    let metainfo = MetaInfo::from_bytes(&single_file_torrent()).unwrap();
    let temp_dir = tempfile::tempdir().unwrap();
    let info = StoreInfo::new(&metainfo, temp_dir.path().into());
    let have = Bitfield::repeat(false, info.num_pieces as usize);

    let (torrent_tx, mut torrent_rx) = tokio::sync::mpsc::unbounded_channel();
    let (_handle, disk_tx) = spawn(info.clone(), metainfo.piece_hashes().to_vec(), have, torrent_tx)
        .await
        .unwrap();

    // Piece 0 = "abcd", written as a single 4-byte block.
    disk_tx
        .send(CommandToDisk::WriteBlock {
            block: BlockInfo { piece_idx: 0, offset: 0, len: 4 },
            data: b"abcd".to_vec(),
        })
        .unwrap();

    match torrent_rx.recv().await {
        Some(CommandToTorrent::PieceWritten { idx, valid }) => {
            assert_eq!(idx, 0);
            assert!(valid);
        }
        _ => panic!("expected a PieceWritten notification"),
    }

    let (peer_tx, mut peer_rx) = tokio::sync::mpsc::unbounded_channel();
    disk_tx
        .send(CommandToDisk::ReadBlock {
            block: BlockInfo { piece_idx: 0, offset: 0, len: 4 },
            tx: peer_tx,
        })
        .unwrap();

    match peer_rx.recv().await {
        Some(PeerCommand::BlockRead(block)) => {
            assert_eq!(block.piece_idx, 0);
            assert_eq!(block.data.into_vec(), b"abcd".to_vec());
        }
        _ => panic!("expected a BlockRead command"),
    }

    disk_tx.send(CommandToDisk::Shutdown).unwrap();
}

#[tokio::test]
async fn refuses_to_read_an_unverified_piece() {
    let metainfo = MetaInfo::from_bytes(&single_file_torrent()).unwrap();
    let temp_dir = tempfile::tempdir().unwrap();
    let info = StoreInfo::new(&metainfo, temp_dir.path().into());
    let have = Bitfield::repeat(false, info.num_pieces as usize);

    let (torrent_tx, _torrent_rx) = tokio::sync::mpsc::unbounded_channel();
    let (_handle, disk_tx) = spawn(info.clone(), metainfo.piece_hashes().to_vec(), have, torrent_tx)
        .await
        .unwrap();

    // Nothing has ever been written to piece 1; a read must not be served.
    let (peer_tx, mut peer_rx) = tokio::sync::mpsc::unbounded_channel();
    disk_tx
        .send(CommandToDisk::ReadBlock {
            block: BlockInfo { piece_idx: 1, offset: 0, len: 4 },
            tx: peer_tx,
        })
        .unwrap();

    // A write to piece 0 should still be served normally after the refusal,
    // proving the disk task itself keeps running rather than erroring out.
    disk_tx
        .send(CommandToDisk::WriteBlock {
            block: BlockInfo { piece_idx: 0, offset: 0, len: 4 },
            data: b"abcd".to_vec(),
        })
        .unwrap();

    assert!(peer_rx.try_recv().is_err());
}

#[test]
fn resume_bitfield_trusts_a_valid_progress_file() {
    let metainfo = MetaInfo::from_bytes(&single_file_torrent()).unwrap();
    let info = StoreInfo::new(&metainfo, std::path::PathBuf::from("unused"));

    let mut bf = Bitfield::repeat(false, info.num_pieces as usize);
    bf.set(0, true);
    let progress = Progress::from_bitfield(&bf);

    let resumed = resume_bitfield(&info, &metainfo.piece_hashes(), Some(progress));
    assert_eq!(resumed, bf);
}

#[test]
fn resume_bitfield_falls_back_to_on_disk_verification() {
    let metainfo = MetaInfo::from_bytes(&single_file_torrent()).unwrap();
    let temp_dir = tempfile::tempdir().unwrap();
    let info = StoreInfo::new(&metainfo, temp_dir.path().into());

    std::fs::write(info.output_dir.join("f"), b"abcdefgh").unwrap();

    let resumed = resume_bitfield(&info, &metainfo.piece_hashes(), None);
    assert!(resumed.all());
}

#[test]
fn resume_bitfield_with_no_files_on_disk_is_empty() {
    let metainfo = MetaInfo::from_bytes(&single_file_torrent()).unwrap();
    let temp_dir = tempfile::tempdir().unwrap();
    let info = StoreInfo::new(&metainfo, temp_dir.path().into());

    let resumed = resume_bitfield(&info, &metainfo.piece_hashes(), None);
    assert!(resumed.not_any());
}
