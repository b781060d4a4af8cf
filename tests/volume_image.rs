use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

use byteorder::{ByteOrder, LittleEndian};
use ocfs2_extcheck::alloc::ClusterTracker;
use ocfs2_extcheck::device::BlockIo;
use ocfs2_extcheck::error::CheckError;
use ocfs2_extcheck::extent::{ExtentBlock, ExtentRecord};
use ocfs2_extcheck::inode::Dinode;
use ocfs2_extcheck::problem::{Fixed, Recorder};
use ocfs2_extcheck::{Checker, O2Fs};

const BS: usize = 4096;
const BLOCKS: usize = 128;
const GEN: u32 = 0x0c0f_5e2a;
const INODE_BLKNO: u64 = 20;
const EB_BLKNO: u64 = 30;

fn superblock() -> Vec<u8> {
    let mut sb = vec![0u8; BS];
    sb[0..8].copy_from_slice(b"OCFSV2\0\0");
    LittleEndian::write_u32(&mut sb[0x60..0x64], GEN);
    let id2 = 0xC0;
    LittleEndian::write_u16(&mut sb[id2..id2 + 2], 0);
    LittleEndian::write_u16(&mut sb[id2 + 0x02..id2 + 0x04], 90);
    LittleEndian::write_u32(&mut sb[id2 + 0x20..id2 + 0x24], 0x0010);
    LittleEndian::write_u64(&mut sb[id2 + 0x28..id2 + 0x30], 5);
    LittleEndian::write_u64(&mut sb[id2 + 0x30..id2 + 0x38], 6);
    LittleEndian::write_u32(&mut sb[id2 + 0x38..id2 + 0x3C], 12);
    LittleEndian::write_u32(&mut sb[id2 + 0x3C..id2 + 0x40], 12);
    LittleEndian::write_u16(&mut sb[id2 + 0x40..id2 + 0x42], 4);
    sb[id2 + 0x50..id2 + 0x55].copy_from_slice(b"scrap");
    sb
}

/// A volume with one damaged file: its extent block claims the wrong
/// location and holds a leaf running off the end of the volume, and the
/// inode itself references a block past the end.
fn build_image(offset: usize) -> File {
    let mut img = vec![0u8; offset + BLOCKS * BS];
    let block = |blkno: u64| offset + blkno as usize * BS;

    img[block(2)..block(3)].copy_from_slice(&superblock());

    let mut di = Dinode::new(BS, INODE_BLKNO, GEN);
    di.i_list.l_tree_depth = 1;
    assert!(di.i_list.push(ExtentRecord::interior(0, 100, EB_BLKNO)));
    assert!(di.i_list.push(ExtentRecord::interior(100, 4, 500)));
    img[block(INODE_BLKNO)..block(INODE_BLKNO + 1)].copy_from_slice(&di.to_bytes().unwrap());

    let mut eb = ExtentBlock::new(BS, EB_BLKNO + 1, GEN, 0);
    assert!(eb.h_list.push(ExtentRecord::leaf(0, 100, 100, 0)));
    img[block(EB_BLKNO)..block(EB_BLKNO + 1)].copy_from_slice(&eb.to_bytes().unwrap());

    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&img).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file
}

#[test]
fn superblock_is_found_by_probing_block_sizes() {
    let fs = O2Fs::new(build_image(0), 0).unwrap();

    assert_eq!(fs.superblock.block_size(), 4096);
    assert_eq!(fs.superblock.cluster_size(), 4096);
    assert_eq!(fs.superblock.i_fs_generation, GEN);
    assert_eq!(fs.superblock.s_label, "scrap");
    assert_eq!(fs.superblock.s_max_slots, 4);

    let vol = fs.volume_info(None);
    assert_eq!(vol.total_clusters, BLOCKS as u32);
    assert!(vol.supports_sparse_alloc());
    assert_eq!(fs.volume_info(Some(64)).total_clusters, 64);
}

#[test]
fn volume_can_start_inside_a_larger_image() {
    let fs = O2Fs::new(build_image(64 * 1024), 64 * 1024).unwrap();
    assert_eq!(fs.superblock.block_size(), 4096);
    assert_eq!(fs.volume_info(None).total_clusters, BLOCKS as u32);
}

#[test]
fn image_without_superblock_is_rejected() {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&vec![0u8; BLOCKS * BS]).unwrap();

    match O2Fs::new(file, 0) {
        Err(CheckError::InvalidSuperblock(_)) => {}
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("an empty image has no superblock"),
    }
}

#[test]
fn repairs_reach_the_image_and_a_rerun_is_clean() {
    let mut fs = O2Fs::new(build_image(0), 0).unwrap();
    let vol = fs.volume_info(None);

    let mut di = fs.read_inode(INODE_BLKNO).unwrap();
    let mut recorder = Recorder::new(Fixed(true));
    let mut tracker = ClusterTracker::new(vol.total_clusters as u64);
    let summary = Checker::new(vol, &mut fs, &mut recorder, &mut tracker)
        .check_extents(&mut di)
        .unwrap();

    let codes: Vec<_> = recorder.findings().iter().map(|f| f.code).collect();
    assert_eq!(
        codes,
        vec!["EB_BLKNO", "EXTENT_CLUSTERS_OVERRUN", "EXTENT_BLKNO_RANGE"]
    );
    assert!(summary.changed);
    assert_eq!(summary.clusters, 28);
    assert_eq!(tracker.bitmap.used_count(), 28);

    let on_disk = fs.read_inode(INODE_BLKNO).unwrap();
    assert_eq!(on_disk.i_list.l_next_free_rec, 1);
    let eb = fs.read_extent_block(EB_BLKNO).unwrap();
    assert_eq!(eb.h_blkno, EB_BLKNO);
    assert_eq!(eb.h_list.l_recs[0].e_leaf_clusters, 28);

    // reopen from the file itself
    let mut fs = O2Fs::new(fs.into_inner(), 0).unwrap();
    let mut di = fs.read_inode(INODE_BLKNO).unwrap();
    let mut recorder = Recorder::new(Fixed(false));
    let mut tracker = ClusterTracker::new(vol.total_clusters as u64);
    let summary = Checker::new(vol, &mut fs, &mut recorder, &mut tracker)
        .check_extents(&mut di)
        .unwrap();

    assert!(recorder.findings().is_empty());
    assert!(!summary.changed);
    assert_eq!(summary.clusters, 28);
}

#[test]
fn declined_repairs_leave_the_image_untouched() {
    let mut fs = O2Fs::new(build_image(0), 0).unwrap();
    let vol = fs.volume_info(None);
    let before = fs.read_block(EB_BLKNO).unwrap();

    let mut di = fs.read_inode(INODE_BLKNO).unwrap();
    let mut recorder = Recorder::new(Fixed(false));
    let mut tracker = ClusterTracker::new(vol.total_clusters as u64);
    let summary = Checker::new(vol, &mut fs, &mut recorder, &mut tracker)
        .check_extents(&mut di)
        .unwrap();

    assert_eq!(recorder.declined(), 3);
    assert_eq!(recorder.accepted(), 0);
    assert!(!summary.changed);
    assert_eq!(fs.read_block(EB_BLKNO).unwrap(), before);
    assert_eq!(fs.read_inode(INODE_BLKNO).unwrap().i_list.l_next_free_rec, 2);
}
