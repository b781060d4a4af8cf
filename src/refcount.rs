/// Reference: OCFS2 on-disk format, `struct ocfs2_refcount_block` and
/// `ocfs2_refcount_list`.
use byteorder::{ByteOrder, LittleEndian};

use crate::error::{ensure_len, signature_string, CheckError, Result};
use crate::extent::{ExtentList, EXTENT_LIST_HEADER_SIZE, EXTENT_REC_SIZE};

pub const REFCOUNT_BLOCK_SIGNATURE: &[u8; 8] = b"REFCNT01";

/// The block is an interior node: the union holds an extent list whose
/// leaves point at refcount blocks.
pub const REFCOUNT_TREE_FL: u32 = 0x0001;

/// Byte offset of the `rf_records` / `rf_list` union.
const RF_UNION_OFFSET: usize = 0x80;

/// Number of extent records that fit in a refcount block.
pub fn extent_recs_per_rb(block_size: usize) -> u16 {
    let size = block_size.saturating_sub(RF_UNION_OFFSET + EXTENT_LIST_HEADER_SIZE);
    (size / EXTENT_REC_SIZE).min(u16::MAX as usize) as u16
}

#[derive(Debug, Clone)]
/// A node of a refcount tree.
pub struct RefcountBlock {
    raw: Vec<u8>,
    pub rf_fs_generation: u32,
    /// The block this node believes it lives at.
    pub rf_blkno: u64,
    /// Root block of the tree this node belongs to.
    pub rf_parent: u64,
    pub rf_last_eb_blk: u64,
    /// Number of inodes sharing the tree; meaningful in the root only.
    pub rf_count: u32,
    pub rf_flags: u32,
    /// Clusters covered by the leaves below this node.
    pub rf_clusters: u32,
    pub rf_cpos: u32,
    pub rf_generation: u32,
    /// Refcount record slots; zero for tree nodes.
    pub rl_count: u16,
    /// Refcount records in use; zero for tree nodes.
    pub rl_used: u16,
    /// The tree list; only present when `REFCOUNT_TREE_FL` is set.
    pub rf_list: Option<ExtentList>,
}

impl RefcountBlock {
    /// Creates a refcount leaf image for `blkno` in the tree rooted at
    /// `parent`, with `used` records claimed.
    pub fn new_leaf(
        block_size: usize,
        blkno: u64,
        parent: u64,
        fs_generation: u32,
        used: u16,
    ) -> Self {
        let mut raw = vec![0u8; block_size];
        raw[0..8].copy_from_slice(REFCOUNT_BLOCK_SIGNATURE);
        RefcountBlock {
            raw,
            rf_fs_generation: fs_generation,
            rf_blkno: blkno,
            rf_parent: parent,
            rf_last_eb_blk: 0,
            rf_count: 0,
            rf_flags: 0,
            rf_clusters: 0,
            rf_cpos: 0,
            rf_generation: 0,
            rl_count: used,
            rl_used: used,
            rf_list: None,
        }
    }

    /// Creates an empty tree root image at `blkno`.
    pub fn new_tree(block_size: usize, blkno: u64, fs_generation: u32) -> Self {
        let mut rb = RefcountBlock::new_leaf(block_size, blkno, blkno, fs_generation, 0);
        rb.rf_count = 1;
        rb.rf_flags = REFCOUNT_TREE_FL;
        rb.rf_list = Some(ExtentList::new(0, extent_recs_per_rb(block_size)));
        rb
    }

    /// Parses a refcount block read from `blkno`, checking only its
    /// signature.
    pub fn from_bytes(blkno: u64, data: &[u8]) -> Result<Self> {
        ensure_len(data, RF_UNION_OFFSET + EXTENT_LIST_HEADER_SIZE)?;
        if &data[0..8] != REFCOUNT_BLOCK_SIGNATURE {
            return Err(CheckError::BadSignature {
                blkno,
                expected: "REFCNT01",
                found: signature_string(&data[0..8]),
            });
        }
        let rf_flags = LittleEndian::read_u32(&data[0x34..0x38]);
        let u = RF_UNION_OFFSET;
        let (rf_list, rl_count, rl_used) = if rf_flags & REFCOUNT_TREE_FL != 0 {
            let list = ExtentList::from_bytes(&data[u..], extent_recs_per_rb(data.len()))?;
            (Some(list), 0, 0)
        } else {
            (
                None,
                LittleEndian::read_u16(&data[u..u + 2]),
                LittleEndian::read_u16(&data[u + 2..u + 4]),
            )
        };
        Ok(RefcountBlock {
            raw: data.to_vec(),
            rf_fs_generation: LittleEndian::read_u32(&data[0x0C..0x10]),
            rf_blkno: LittleEndian::read_u64(&data[0x10..0x18]),
            rf_parent: LittleEndian::read_u64(&data[0x18..0x20]),
            rf_last_eb_blk: LittleEndian::read_u64(&data[0x28..0x30]),
            rf_count: LittleEndian::read_u32(&data[0x30..0x34]),
            rf_flags,
            rf_clusters: LittleEndian::read_u32(&data[0x38..0x3C]),
            rf_cpos: LittleEndian::read_u32(&data[0x3C..0x40]),
            rf_generation: LittleEndian::read_u32(&data[0x40..0x44]),
            rl_count,
            rl_used,
            rf_list,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut data = self.raw.clone();
        LittleEndian::write_u32(&mut data[0x0C..0x10], self.rf_fs_generation);
        LittleEndian::write_u64(&mut data[0x10..0x18], self.rf_blkno);
        LittleEndian::write_u64(&mut data[0x18..0x20], self.rf_parent);
        LittleEndian::write_u64(&mut data[0x28..0x30], self.rf_last_eb_blk);
        LittleEndian::write_u32(&mut data[0x30..0x34], self.rf_count);
        LittleEndian::write_u32(&mut data[0x34..0x38], self.rf_flags);
        LittleEndian::write_u32(&mut data[0x38..0x3C], self.rf_clusters);
        LittleEndian::write_u32(&mut data[0x3C..0x40], self.rf_cpos);
        LittleEndian::write_u32(&mut data[0x40..0x44], self.rf_generation);
        let u = RF_UNION_OFFSET;
        match &self.rf_list {
            Some(list) => list.write_to(&mut data[u..])?,
            None => {
                LittleEndian::write_u16(&mut data[u..u + 2], self.rl_count);
                LittleEndian::write_u16(&mut data[u + 2..u + 4], self.rl_used);
            }
        }
        Ok(data)
    }

    pub fn is_tree(&self) -> bool {
        self.rf_flags & REFCOUNT_TREE_FL != 0
    }
}
