/// Reference: OCFS2 on-disk format, `struct ocfs2_super_block` stored in the
/// `id2` union of the inode at block 2.
use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{ensure_len, signature_string, CheckError, Result};

pub const SUPER_BLOCK_SIGNATURE: &[u8; 8] = b"OCFSV2\0\0";
/// The superblock lives at this block number whatever the block size.
pub const SUPER_BLOCK_BLKNO: u64 = 2;

/// Byte offset of the `id2` union inside an inode block.
const ID2_OFFSET: usize = 0xC0;

pub const FEATURE_INCOMPAT_SPARSE_ALLOC: u32 = 0x0010;
pub const FEATURE_INCOMPAT_INLINE_DATA: u32 = 0x0040;
pub const FEATURE_INCOMPAT_XATTR: u32 = 0x0200;
pub const FEATURE_INCOMPAT_INDEXED_DIRS: u32 = 0x0400;
pub const FEATURE_INCOMPAT_REFCOUNT_TREE: u32 = 0x1000;
pub const FEATURE_RO_COMPAT_UNWRITTEN: u32 = 0x0001;

pub const MIN_BLOCKSIZE_BITS: u32 = 9;
pub const MAX_BLOCKSIZE_BITS: u32 = 12;
pub const MIN_CLUSTERSIZE_BITS: u32 = 12;
pub const MAX_CLUSTERSIZE_BITS: u32 = 20;

#[derive(Debug, Serialize)]
/// The OCFS2 superblock.
pub struct Superblock {
    /// Generation of the superblock inode; every metadata block must carry it.
    pub i_fs_generation: u32,
    pub s_major_rev_level: u16,
    pub s_minor_rev_level: u16,
    pub s_mnt_count: u16,
    pub s_max_mnt_count: i16,
    pub s_state: u16,
    pub s_errors: u16,
    /// Feature bits; see the `FEATURE_*` constants.
    pub s_feature_compat: u32,
    pub s_feature_incompat: u32,
    pub s_feature_ro_compat: u32,
    /// Inode of the root directory.
    pub s_root_blkno: u64,
    /// Inode of the system directory.
    pub s_system_dir_blkno: u64,
    /// log2 of the block size, 9 to 12.
    pub s_blocksize_bits: u32,
    /// log2 of the cluster size, 12 to 20.
    pub s_clustersize_bits: u32,
    /// Number of node slots.
    pub s_max_slots: u16,
    pub s_label: String,
    pub s_uuid: [u8; 16],
}

impl Superblock {
    /// Parses the superblock from a whole block read at block 2.
    ///
    /// # Arguments
    ///
    /// * `data` - The block, read with the block size being tried.
    ///
    /// # Returns
    ///
    /// The superblock, or `InvalidSuperblock` when its block or cluster
    /// size bits are out of range. The caller still has to compare the
    /// block size with the one it read at.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        ensure_len(data, ID2_OFFSET + 0xA0)?;
        if &data[0..8] != SUPER_BLOCK_SIGNATURE {
            return Err(CheckError::BadSignature {
                blkno: SUPER_BLOCK_BLKNO,
                expected: "OCFSV2",
                found: signature_string(&data[0..8]),
            });
        }
        let sb = &data[ID2_OFFSET..];
        let le_u16 = |offset: usize| -> u16 { LittleEndian::read_u16(&sb[offset..offset + 2]) };
        let le_u32 = |offset: usize| -> u32 { LittleEndian::read_u32(&sb[offset..offset + 4]) };
        let le_u64 = |offset: usize| -> u64 { LittleEndian::read_u64(&sb[offset..offset + 8]) };

        let s_blocksize_bits = le_u32(0x38);
        let s_clustersize_bits = le_u32(0x3C);
        if !(MIN_BLOCKSIZE_BITS..=MAX_BLOCKSIZE_BITS).contains(&s_blocksize_bits) {
            return Err(CheckError::InvalidSuperblock(format!(
                "block size bits {} out of range",
                s_blocksize_bits
            )));
        }
        if !(MIN_CLUSTERSIZE_BITS..=MAX_CLUSTERSIZE_BITS).contains(&s_clustersize_bits)
            || s_clustersize_bits < s_blocksize_bits
        {
            return Err(CheckError::InvalidSuperblock(format!(
                "cluster size bits {} out of range",
                s_clustersize_bits
            )));
        }

        let mut s_uuid = [0u8; 16];
        s_uuid.copy_from_slice(&sb[0x90..0xA0]);

        Ok(Superblock {
            i_fs_generation: LittleEndian::read_u32(&data[0x60..0x64]),
            s_major_rev_level: le_u16(0x00),
            s_minor_rev_level: le_u16(0x02),
            s_mnt_count: le_u16(0x04),
            s_max_mnt_count: le_u16(0x06) as i16,
            s_state: le_u16(0x08),
            s_errors: le_u16(0x0A),
            s_feature_compat: le_u32(0x1C),
            s_feature_incompat: le_u32(0x20),
            s_feature_ro_compat: le_u32(0x24),
            s_root_blkno: le_u64(0x28),
            s_system_dir_blkno: le_u64(0x30),
            s_blocksize_bits,
            s_clustersize_bits,
            s_max_slots: le_u16(0x40),
            s_label: signature_string(&sb[0x50..0x90]),
            s_uuid,
        })
    }

    pub fn block_size(&self) -> u64 {
        1 << self.s_blocksize_bits
    }

    pub fn cluster_size(&self) -> u64 {
        1 << self.s_clustersize_bits
    }

    pub fn uuid_string(&self) -> String {
        self.s_uuid.iter().map(|b| format!("{:02X}", b)).collect()
    }

    pub fn print_sp_info(&self) {
        println!("{:#?}", self);
    }

    pub fn to_json(&self) -> Value {
        json!({
            "label": self.s_label,
            "uuid": self.uuid_string(),
            "block_size": self.block_size(),
            "cluster_size": self.cluster_size(),
            "fs_generation": format!("0x{:08x}", self.i_fs_generation),
            "max_slots": self.s_max_slots,
            "root_blkno": self.s_root_blkno,
            "system_dir_blkno": self.s_system_dir_blkno,
            "feature_incompat": format!("0x{:08x}", self.s_feature_incompat),
            "feature_compat": format!("0x{:08x}", self.s_feature_compat),
            "feature_ro_compat": format!("0x{:08x}", self.s_feature_ro_compat),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
/// Read-only volume facts the extent checker needs.
pub struct VolumeInfo {
    pub blocksize_bits: u32,
    pub clustersize_bits: u32,
    /// Clusters in the volume; every data extent must end inside them.
    pub total_clusters: u32,
    /// Generation every metadata block must carry.
    pub fs_generation: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
}

impl VolumeInfo {
    pub fn new(sb: &Superblock, total_clusters: u32) -> Self {
        VolumeInfo {
            blocksize_bits: sb.s_blocksize_bits,
            clustersize_bits: sb.s_clustersize_bits,
            total_clusters,
            fs_generation: sb.i_fs_generation,
            feature_incompat: sb.s_feature_incompat,
            feature_ro_compat: sb.s_feature_ro_compat,
        }
    }

    pub fn block_size(&self) -> usize {
        1 << self.blocksize_bits
    }

    fn cluster_shift(&self) -> u32 {
        self.clustersize_bits.saturating_sub(self.blocksize_bits)
    }

    /// Cluster containing `blkno`.
    pub fn blocks_to_clusters(&self, blkno: u64) -> u64 {
        blkno >> self.cluster_shift()
    }

    /// First block of `cluster`.
    pub fn clusters_to_blocks(&self, cluster: u64) -> u64 {
        cluster << self.cluster_shift()
    }

    pub fn total_blocks(&self) -> u64 {
        self.clusters_to_blocks(self.total_clusters as u64)
    }

    /// True for block numbers that cannot hold volume metadata or data:
    /// anything before the superblock or past the last block.
    pub fn block_out_of_range(&self, blkno: u64) -> bool {
        blkno < SUPER_BLOCK_BLKNO || blkno >= self.total_blocks()
    }

    pub fn supports_sparse_alloc(&self) -> bool {
        self.feature_incompat & FEATURE_INCOMPAT_SPARSE_ALLOC != 0
    }

    pub fn writes_unwritten_extents(&self) -> bool {
        self.supports_sparse_alloc() && self.feature_ro_compat & FEATURE_RO_COMPAT_UNWRITTEN != 0
    }

    pub fn has_refcount_tree(&self) -> bool {
        self.feature_incompat & FEATURE_INCOMPAT_REFCOUNT_TREE != 0
    }

    pub fn supports_indexed_dirs(&self) -> bool {
        self.feature_incompat & FEATURE_INCOMPAT_INDEXED_DIRS != 0
    }

    pub fn supports_xattr(&self) -> bool {
        self.feature_incompat & FEATURE_INCOMPAT_XATTR != 0
    }
}
