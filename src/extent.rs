/// Reference: OCFS2 on-disk format, `struct ocfs2_extent_rec`, `ocfs2_extent_list`
/// and `ocfs2_extent_block`.
use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::error::{ensure_len, signature_string, CheckError, Result};

pub const EXTENT_BLOCK_SIGNATURE: &[u8; 8] = b"EXBLK01\0";

/// Size of one extent record on disk.
pub const EXTENT_REC_SIZE: usize = 16;
/// Size of the extent list header that precedes the records.
pub const EXTENT_LIST_HEADER_SIZE: usize = 16;

/// Byte offset of the embedded list inside an extent block.
const EB_LIST_OFFSET: usize = 0x30;

/// The extent is allocated but its contents were never written.
pub const EXT_UNWRITTEN: u8 = 0x01;
/// The physical clusters may be shared through a refcount tree.
pub const EXT_REFCOUNTED: u8 = 0x02;

/// Number of records that fit in the list of an extent block.
pub fn extent_recs_per_eb(block_size: usize) -> u16 {
    let size = block_size.saturating_sub(EB_LIST_OFFSET + EXTENT_LIST_HEADER_SIZE);
    (size / EXTENT_REC_SIZE).min(u16::MAX as usize) as u16
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
/// A single extent record.
///
/// Bytes 4..8 are a union: a non-leaf record stores a 32-bit cluster count
/// there, a leaf record stores a 16-bit count, a reserved byte and flags.
pub struct ExtentRecord {
    /// The logical cluster offset this record starts at.
    pub e_cpos: u32,
    /// Leaf length in clusters; the low half of an interior count.
    pub e_leaf_clusters: u16,
    pub e_reserved1: u8,
    /// `EXT_UNWRITTEN` and `EXT_REFCOUNTED` on leaves.
    pub e_flags: u8,
    /// The block this record points at: data for leaves, a child extent
    /// block otherwise.
    pub e_blkno: u64,
}

impl ExtentRecord {
    /// Creates an ExtentRecord from a slice of bytes.
    ///
    /// # Arguments
    ///
    /// * `data` - At least 16 bytes holding the record.
    pub fn from_bytes(data: &[u8]) -> Result<ExtentRecord> {
        ensure_len(data, EXTENT_REC_SIZE)?;
        Ok(ExtentRecord {
            e_cpos: LittleEndian::read_u32(&data[0x0..0x4]),
            e_leaf_clusters: LittleEndian::read_u16(&data[0x4..0x6]),
            e_reserved1: data[0x6],
            e_flags: data[0x7],
            e_blkno: LittleEndian::read_u64(&data[0x8..0x10]),
        })
    }

    /// Writes the record into the first 16 bytes of `data`.
    pub fn write_to(&self, data: &mut [u8]) {
        LittleEndian::write_u32(&mut data[0x0..0x4], self.e_cpos);
        LittleEndian::write_u16(&mut data[0x4..0x6], self.e_leaf_clusters);
        data[0x6] = self.e_reserved1;
        data[0x7] = self.e_flags;
        LittleEndian::write_u64(&mut data[0x8..0x10], self.e_blkno);
    }

    /// Builds a leaf record covering `clusters` clusters at `blkno`.
    pub fn leaf(cpos: u32, clusters: u16, blkno: u64, flags: u8) -> Self {
        ExtentRecord {
            e_cpos: cpos,
            e_leaf_clusters: clusters,
            e_reserved1: 0,
            e_flags: flags,
            e_blkno: blkno,
        }
    }

    /// Builds an interior record whose child block covers `clusters`.
    pub fn interior(cpos: u32, clusters: u32, blkno: u64) -> Self {
        let mut rec = ExtentRecord {
            e_cpos: cpos,
            e_blkno: blkno,
            ..Default::default()
        };
        rec.set_int_clusters(clusters);
        rec
    }

    /// The union viewed as the 32-bit interior cluster count.
    pub fn int_clusters(&self) -> u32 {
        (self.e_leaf_clusters as u32)
            | ((self.e_reserved1 as u32) << 16)
            | ((self.e_flags as u32) << 24)
    }

    fn set_int_clusters(&mut self, clusters: u32) {
        self.e_leaf_clusters = clusters as u16;
        self.e_reserved1 = (clusters >> 16) as u8;
        self.e_flags = (clusters >> 24) as u8;
    }

    /// Cluster count of the record, read according to the depth of the
    /// list that holds it.
    pub fn clusters(&self, tree_depth: u16) -> u32 {
        if tree_depth > 0 {
            self.int_clusters()
        } else {
            self.e_leaf_clusters as u32
        }
    }

    pub fn set_clusters(&mut self, tree_depth: u16, clusters: u32) {
        if tree_depth > 0 {
            self.set_int_clusters(clusters);
        } else {
            self.e_leaf_clusters = clusters.min(u16::MAX as u32) as u16;
        }
    }

    pub fn is_unwritten(&self) -> bool {
        self.e_flags & EXT_UNWRITTEN != 0
    }

    pub fn is_refcounted(&self) -> bool {
        self.e_flags & EXT_REFCOUNTED != 0
    }

    pub fn is_empty(&self) -> bool {
        *self == ExtentRecord::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// An extent list: header plus every record slot the containing node has
/// room for.
///
/// `l_recs.len()` is the physical slot count, which never changes. The
/// declared counters are whatever the disk says and may be corrupt.
pub struct ExtentList {
    /// Zero for a list of leaves.
    pub l_tree_depth: u16,
    /// Record slots the list declares usable.
    pub l_count: u16,
    /// Slot after the last live record.
    pub l_next_free_rec: u16,
    pub l_reserved1: u16,
    pub l_reserved2: u64,
    pub l_recs: Vec<ExtentRecord>,
}

impl ExtentList {
    /// Creates an empty list with `slots` record slots, all declared usable.
    pub fn new(tree_depth: u16, slots: u16) -> Self {
        ExtentList {
            l_tree_depth: tree_depth,
            l_count: slots,
            l_next_free_rec: 0,
            l_reserved1: 0,
            l_reserved2: 0,
            l_recs: vec![ExtentRecord::default(); slots as usize],
        }
    }

    /// Parses a list header and `slots` records from `data`.
    ///
    /// # Arguments
    ///
    /// * `data` - Bytes starting at the list header.
    /// * `slots` - How many record slots the containing node has room for.
    ///
    /// # Returns
    ///
    /// The list with exactly `slots` records, whatever the header claims.
    pub fn from_bytes(data: &[u8], slots: u16) -> Result<ExtentList> {
        let need = EXTENT_LIST_HEADER_SIZE + slots as usize * EXTENT_REC_SIZE;
        ensure_len(data, need)?;

        let l_recs = data[EXTENT_LIST_HEADER_SIZE..need]
            .chunks_exact(EXTENT_REC_SIZE)
            .map(ExtentRecord::from_bytes)
            .collect::<Result<Vec<_>>>()?;

        Ok(ExtentList {
            l_tree_depth: LittleEndian::read_u16(&data[0x0..0x2]),
            l_count: LittleEndian::read_u16(&data[0x2..0x4]),
            l_next_free_rec: LittleEndian::read_u16(&data[0x4..0x6]),
            l_reserved1: LittleEndian::read_u16(&data[0x6..0x8]),
            l_reserved2: LittleEndian::read_u64(&data[0x8..0x10]),
            l_recs,
        })
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        let need = EXTENT_LIST_HEADER_SIZE + self.l_recs.len() * EXTENT_REC_SIZE;
        ensure_len(data, need)?;
        LittleEndian::write_u16(&mut data[0x0..0x2], self.l_tree_depth);
        LittleEndian::write_u16(&mut data[0x2..0x4], self.l_count);
        LittleEndian::write_u16(&mut data[0x4..0x6], self.l_next_free_rec);
        LittleEndian::write_u16(&mut data[0x6..0x8], self.l_reserved1);
        LittleEndian::write_u64(&mut data[0x8..0x10], self.l_reserved2);
        for (rec, chunk) in self
            .l_recs
            .iter()
            .zip(data[EXTENT_LIST_HEADER_SIZE..need].chunks_exact_mut(EXTENT_REC_SIZE))
        {
            rec.write_to(chunk);
        }
        Ok(())
    }

    pub fn is_leaf(&self) -> bool {
        self.l_tree_depth == 0
    }

    /// Appends a record in the next free slot. Returns false when the list
    /// is full.
    pub fn push(&mut self, rec: ExtentRecord) -> bool {
        let next = self.l_next_free_rec as usize;
        if next >= self.l_recs.len() || next >= self.l_count as usize {
            return false;
        }
        self.l_recs[next] = rec;
        self.l_next_free_rec += 1;
        true
    }

    /// Live records as declared by `l_next_free_rec`, bounded by the slots
    /// that physically exist.
    pub fn live_recs(&self) -> &[ExtentRecord] {
        let live = (self.l_next_free_rec as usize).min(self.l_recs.len());
        &self.l_recs[..live]
    }

    /// Removes the record at `index` out of the first `bound` slots.
    ///
    /// Later records shift down one slot keeping their order, the vacated
    /// slot `bound - 1` is zeroed and `l_next_free_rec` drops by one.
    pub fn remove_rec(&mut self, index: usize, bound: usize) {
        let bound = bound.min(self.l_recs.len());
        if index >= bound {
            return;
        }
        self.l_recs.copy_within(index + 1..bound, index);
        self.l_recs[bound - 1] = ExtentRecord::default();
        self.l_next_free_rec = self.l_next_free_rec.saturating_sub(1);
    }
}

#[derive(Debug, Clone)]
/// An extent block: a tree node holding one child extent list.
pub struct ExtentBlock {
    raw: Vec<u8>,
    pub h_signature: [u8; 8],
    /// Slot of the extent allocator the block came from.
    pub h_suballoc_slot: u16,
    pub h_suballoc_bit: u16,
    /// Must match the volume generation.
    pub h_fs_generation: u32,
    /// The block this node believes it lives at.
    pub h_blkno: u64,
    pub h_suballoc_loc: u64,
    /// Next leaf block to the right; only set in leaf blocks.
    pub h_next_leaf_blk: u64,
    pub h_list: ExtentList,
}

impl ExtentBlock {
    /// Creates an empty extent block image for `blkno`.
    pub fn new(block_size: usize, blkno: u64, fs_generation: u32, tree_depth: u16) -> Self {
        ExtentBlock {
            raw: vec![0u8; block_size],
            h_signature: *EXTENT_BLOCK_SIGNATURE,
            h_suballoc_slot: 0,
            h_suballoc_bit: 0,
            h_fs_generation: fs_generation,
            h_blkno: blkno,
            h_suballoc_loc: 0,
            h_next_leaf_blk: 0,
            h_list: ExtentList::new(tree_depth, extent_recs_per_eb(block_size)),
        }
    }

    /// Parses an extent block read from `blkno`.
    ///
    /// Only the signature is verified; every other field is returned as
    /// found so the caller can judge it.
    pub fn from_bytes(blkno: u64, data: &[u8]) -> Result<ExtentBlock> {
        ensure_len(data, EB_LIST_OFFSET + EXTENT_LIST_HEADER_SIZE)?;
        let mut h_signature = [0u8; 8];
        h_signature.copy_from_slice(&data[0x0..0x8]);
        if &h_signature != EXTENT_BLOCK_SIGNATURE {
            return Err(CheckError::BadSignature {
                blkno,
                expected: "EXBLK01",
                found: signature_string(&h_signature),
            });
        }

        let slots = extent_recs_per_eb(data.len());
        Ok(ExtentBlock {
            raw: data.to_vec(),
            h_signature,
            h_suballoc_slot: LittleEndian::read_u16(&data[0x10..0x12]),
            h_suballoc_bit: LittleEndian::read_u16(&data[0x12..0x14]),
            h_fs_generation: LittleEndian::read_u32(&data[0x14..0x18]),
            h_blkno: LittleEndian::read_u64(&data[0x18..0x20]),
            h_suballoc_loc: LittleEndian::read_u64(&data[0x20..0x28]),
            h_next_leaf_blk: LittleEndian::read_u64(&data[0x28..0x30]),
            h_list: ExtentList::from_bytes(&data[EB_LIST_OFFSET..], slots)?,
        })
    }

    /// Serializes the block, keeping any bytes this type does not model.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut data = self.raw.clone();
        data[0x0..0x8].copy_from_slice(&self.h_signature);
        LittleEndian::write_u16(&mut data[0x10..0x12], self.h_suballoc_slot);
        LittleEndian::write_u16(&mut data[0x12..0x14], self.h_suballoc_bit);
        LittleEndian::write_u32(&mut data[0x14..0x18], self.h_fs_generation);
        LittleEndian::write_u64(&mut data[0x18..0x20], self.h_blkno);
        LittleEndian::write_u64(&mut data[0x20..0x28], self.h_suballoc_loc);
        LittleEndian::write_u64(&mut data[0x28..0x30], self.h_next_leaf_blk);
        self.h_list.write_to(&mut data[EB_LIST_OFFSET..])?;
        Ok(data)
    }

    pub fn block_size(&self) -> usize {
        self.raw.len()
    }
}
