/// Reference: OCFS2 on-disk format, `struct ocfs2_xattr_block`,
/// `ocfs2_xattr_header`, `ocfs2_xattr_entry`, `ocfs2_xattr_tree_root` and
/// `ocfs2_xattr_value_root`.
use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use crate::error::{ensure_len, signature_string, CheckError, Result};
use crate::extent::{ExtentList, EXTENT_LIST_HEADER_SIZE, EXTENT_REC_SIZE};

pub const XATTR_BLOCK_SIGNATURE: &[u8; 8] = b"XATTR01\0";

/// The block holds a tree root instead of a header with entries.
pub const XATTR_INDEXED: u16 = 0x0001;
/// Entry type bit: the value is stored next to the name.
pub const XATTR_LOCAL: u8 = 0x80;

/// Byte offset of the `xb_attrs` union.
const XB_ATTRS_OFFSET: usize = 0x30;
/// Offset of `xt_list` inside the tree root.
const XT_LIST_OFFSET: usize = 0x10;
/// Offset of `xr_list` inside a value root.
const XR_LIST_OFFSET: usize = 0x10;
const XATTR_HEADER_SIZE: usize = 0x10;
const XATTR_ENTRY_SIZE: usize = 0x10;

/// Records a value root's list can hold.
pub const XATTR_VALUE_ROOT_RECS: u16 = 1;

/// Number of records that fit in the tree root of an indexed xattr block.
pub fn xattr_recs_per_xb(block_size: usize) -> u16 {
    let size = block_size
        .saturating_sub(XB_ATTRS_OFFSET + XT_LIST_OFFSET + EXTENT_LIST_HEADER_SIZE);
    (size / EXTENT_REC_SIZE).min(u16::MAX as usize) as u16
}

/// Names and values are padded to four bytes.
fn xattr_size(len: usize) -> usize {
    (len + 3) & !3
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The extent list of one non-local value, with where it sits in the block.
pub struct XattrValueRoot {
    /// Index of the entry in `xh_entries`.
    pub entry: usize,
    /// Byte offset of `xr_list` inside the block.
    pub offset: usize,
    pub xr_list: ExtentList,
}

#[derive(Debug, Clone)]
/// An external extended attribute block.
///
/// Unindexed blocks carry entries, and a value too large to be local gets
/// its own one-record extent list. Indexed blocks carry an extent tree
/// over the attribute buckets.
pub struct XattrBlock {
    raw: Vec<u8>,
    pub xb_fs_generation: u32,
    /// The block this one believes it lives at.
    pub xb_blkno: u64,
    pub xb_flags: u16,
    /// Root list of the bucket tree; only for indexed blocks.
    pub xt_list: Option<ExtentList>,
    /// Value roots of non-local entries; only for unindexed blocks.
    pub value_roots: Vec<XattrValueRoot>,
}

impl XattrBlock {
    /// Creates an empty unindexed block image for `blkno`.
    pub fn new(block_size: usize, blkno: u64, fs_generation: u32) -> Self {
        let mut raw = vec![0u8; block_size];
        raw[0..8].copy_from_slice(XATTR_BLOCK_SIGNATURE);
        XattrBlock {
            raw,
            xb_fs_generation: fs_generation,
            xb_blkno: blkno,
            xb_flags: 0,
            xt_list: None,
            value_roots: Vec::new(),
        }
    }

    /// Creates an empty indexed block image for `blkno`.
    pub fn new_indexed(block_size: usize, blkno: u64, fs_generation: u32) -> Self {
        let mut xb = XattrBlock::new(block_size, blkno, fs_generation);
        xb.xb_flags = XATTR_INDEXED;
        xb.xt_list = Some(ExtentList::new(0, xattr_recs_per_xb(block_size)));
        xb
    }

    /// Parses an xattr block read from `blkno`.
    ///
    /// # Arguments
    ///
    /// * `blkno` - Where the block was read from, used in errors.
    /// * `data` - The whole block.
    ///
    /// # Returns
    ///
    /// The parsed block, or `BadSignature` when `data` is not an xattr block.
    /// Entries whose value root would run past the block are skipped.
    pub fn from_bytes(blkno: u64, data: &[u8]) -> Result<Self> {
        ensure_len(data, XB_ATTRS_OFFSET + XATTR_HEADER_SIZE)?;
        if &data[0..8] != XATTR_BLOCK_SIGNATURE {
            return Err(CheckError::BadSignature {
                blkno,
                expected: "XATTR01",
                found: signature_string(&data[0..8]),
            });
        }
        let xb_flags = LittleEndian::read_u16(&data[0x20..0x22]);
        let mut xb = XattrBlock {
            raw: data.to_vec(),
            xb_fs_generation: LittleEndian::read_u32(&data[0x0C..0x10]),
            xb_blkno: LittleEndian::read_u64(&data[0x10..0x18]),
            xb_flags,
            xt_list: None,
            value_roots: Vec::new(),
        };

        if xb.is_indexed() {
            xb.xt_list = Some(ExtentList::from_bytes(
                &data[XB_ATTRS_OFFSET + XT_LIST_OFFSET..],
                xattr_recs_per_xb(data.len()),
            )?);
        } else {
            xb.value_roots = value_roots(blkno, data)?;
        }
        Ok(xb)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut data = self.raw.clone();
        LittleEndian::write_u32(&mut data[0x0C..0x10], self.xb_fs_generation);
        LittleEndian::write_u64(&mut data[0x10..0x18], self.xb_blkno);
        LittleEndian::write_u16(&mut data[0x20..0x22], self.xb_flags);
        if let Some(list) = &self.xt_list {
            list.write_to(&mut data[XB_ATTRS_OFFSET + XT_LIST_OFFSET..])?;
        }
        for root in &self.value_roots {
            root.xr_list.write_to(&mut data[root.offset..])?;
        }
        Ok(data)
    }

    pub fn is_indexed(&self) -> bool {
        self.xb_flags & XATTR_INDEXED != 0
    }

    /// Appends a non-local entry whose value root holds `xr_list`.
    ///
    /// Names and value roots are packed downward from the end of the block.
    /// Returns false when the entry does not fit.
    pub fn push_value_root(&mut self, name: &[u8], xr_list: ExtentList) -> bool {
        if self.is_indexed() {
            return false;
        }
        let hdr = XB_ATTRS_OFFSET;
        let count = LittleEndian::read_u16(&self.raw[hdr..hdr + 2]) as usize;
        let free_start = match LittleEndian::read_u16(&self.raw[hdr + 2..hdr + 4]) {
            0 => self.raw.len() - hdr,
            n => n as usize,
        };

        let root_len = XR_LIST_OFFSET
            + EXTENT_LIST_HEADER_SIZE
            + xr_list.l_recs.len() * EXTENT_REC_SIZE;
        let need = xattr_size(name.len()) + root_len;
        let entries_end = XATTR_HEADER_SIZE + (count + 1) * XATTR_ENTRY_SIZE;
        if name.len() > u8::MAX as usize || free_start < entries_end + need {
            return false;
        }

        let name_offset = free_start - need;
        let entry = hdr + XATTR_HEADER_SIZE + count * XATTR_ENTRY_SIZE;
        LittleEndian::write_u16(&mut self.raw[entry + 4..entry + 6], name_offset as u16);
        self.raw[entry + 6] = name.len() as u8;
        self.raw[entry + 7] = 0x01;
        LittleEndian::write_u64(&mut self.raw[entry + 8..entry + 16], 0);
        let name_at = hdr + name_offset;
        self.raw[name_at..name_at + name.len()].copy_from_slice(name);

        LittleEndian::write_u16(&mut self.raw[hdr..hdr + 2], (count + 1) as u16);
        LittleEndian::write_u16(&mut self.raw[hdr + 2..hdr + 4], name_offset as u16);
        self.value_roots.push(XattrValueRoot {
            entry: count,
            offset: name_at + xattr_size(name.len()) + XR_LIST_OFFSET,
            xr_list,
        });
        true
    }
}

/// Finds the value root of every non-local entry in an unindexed block.
fn value_roots(blkno: u64, data: &[u8]) -> Result<Vec<XattrValueRoot>> {
    let hdr = XB_ATTRS_OFFSET;
    let count = LittleEndian::read_u16(&data[hdr..hdr + 2]) as usize;
    let room = (data.len() - hdr - XATTR_HEADER_SIZE) / XATTR_ENTRY_SIZE;
    if count > room {
        warn!(
            "xattr block {} claims {} entries, only {} fit",
            blkno, count, room
        );
    }

    let mut roots = Vec::new();
    for entry in 0..count.min(room) {
        let at = hdr + XATTR_HEADER_SIZE + entry * XATTR_ENTRY_SIZE;
        if data[at + 7] & XATTR_LOCAL != 0 {
            continue;
        }
        let name_offset = LittleEndian::read_u16(&data[at + 4..at + 6]) as usize;
        let name_len = data[at + 6] as usize;
        let offset = hdr + name_offset + xattr_size(name_len) + XR_LIST_OFFSET;
        let end = offset + EXTENT_LIST_HEADER_SIZE + EXTENT_REC_SIZE;
        if end > data.len() {
            warn!(
                "xattr block {} entry {} puts its value root past the block",
                blkno, entry
            );
            continue;
        }
        roots.push(XattrValueRoot {
            entry,
            offset,
            xr_list: ExtentList::from_bytes(&data[offset..], XATTR_VALUE_ROOT_RECS)?,
        });
    }
    Ok(roots)
}
