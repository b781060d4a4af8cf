/// Reference: OCFS2 on-disk format, `struct ocfs2_dinode`.
use byteorder::{ByteOrder, LittleEndian};
use chrono::{TimeZone, Utc};
use prettytable::{Cell, Row, Table};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{ensure_len, signature_string, CheckError, Result};
use crate::extent::{ExtentList, EXTENT_LIST_HEADER_SIZE, EXTENT_REC_SIZE};

pub const INODE_SIGNATURE: &[u8; 8] = b"INODE01\0";

/// Byte offset of the extent list (`id2.i_list`).
const I_LIST_OFFSET: usize = 0xC0;

// i_flags
pub const VALID_FL: u32 = 0x0001;
pub const SYSTEM_FL: u32 = 0x0010;
pub const SUPER_BLOCK_FL: u32 = 0x0020;
pub const LOCAL_ALLOC_FL: u32 = 0x0040;
pub const BITMAP_FL: u32 = 0x0080;
pub const CHAIN_FL: u32 = 0x0800;
pub const DEALLOC_FL: u32 = 0x1000;

// i_dyn_features
pub const INLINE_DATA_FL: u16 = 0x0001;
pub const HAS_XATTR_FL: u16 = 0x0002;
pub const INDEXED_DIR_FL: u16 = 0x0008;
pub const HAS_REFCOUNT_FL: u16 = 0x0010;

const S_IFMT: u16 = 0o170000;
const S_IFLNK: u16 = 0o120000;
const S_IFDIR: u16 = 0o040000;
const S_IFREG: u16 = 0o100000;

/// Number of extent records an inode can hold inline.
pub fn extent_recs_per_inode(block_size: usize) -> u16 {
    let size = block_size.saturating_sub(I_LIST_OFFSET + EXTENT_LIST_HEADER_SIZE);
    (size / EXTENT_REC_SIZE).min(u16::MAX as usize) as u16
}

#[derive(Debug, Clone, Serialize)]
/// An OCFS2 inode block.
///
/// Only the fields the extent checks and the report need are decoded; the
/// rest of the block is carried in `raw` and written back untouched.
pub struct Dinode {
    #[serde(skip)]
    raw: Vec<u8>,
    /// Inode generation, bumped each time the inode number is reused.
    pub i_generation: u32,
    /// Slot of the suballocator that handed out this inode.
    pub i_suballoc_slot: u16,
    /// Bit of this inode in its suballocator group.
    pub i_suballoc_bit: u16,
    /// Clusters allocated to the file.
    pub i_clusters: u32,
    pub i_uid: u32,
    pub i_gid: u32,
    /// File size in bytes.
    pub i_size: u64,
    pub i_mode: u16,
    pub i_links_count: u16,
    /// `VALID_FL`, `SYSTEM_FL`, `CHAIN_FL` and friends.
    pub i_flags: u32,
    pub i_atime: u64,
    pub i_ctime: u64,
    pub i_mtime: u64,
    pub i_dtime: u64,
    /// Where this inode lives; also its number.
    pub i_blkno: u64,
    /// Rightmost extent block of the data tree.
    pub i_last_eb_blk: u64,
    /// Must match the volume generation.
    pub i_fs_generation: u32,
    /// `INLINE_DATA_FL`, `HAS_XATTR_FL`, `INDEXED_DIR_FL`, `HAS_REFCOUNT_FL`.
    pub i_dyn_features: u16,
    /// External xattr block, zero when there is none.
    pub i_xattr_loc: u64,
    /// Root block of the directory index.
    pub i_dx_root: u64,
    /// Root block of the shared refcount tree.
    pub i_refcount_loc: u64,
    /// The data tree root, held in `id2`.
    pub i_list: ExtentList,
}

impl Dinode {
    /// Creates an empty regular-file inode image using an extent list.
    pub fn new(block_size: usize, blkno: u64, fs_generation: u32) -> Self {
        let mut raw = vec![0u8; block_size];
        raw[0..8].copy_from_slice(INODE_SIGNATURE);
        Dinode {
            raw,
            i_generation: 0,
            i_suballoc_slot: 0,
            i_suballoc_bit: 0,
            i_clusters: 0,
            i_uid: 0,
            i_gid: 0,
            i_size: 0,
            i_mode: S_IFREG | 0o644,
            i_links_count: 1,
            i_flags: VALID_FL,
            i_atime: 0,
            i_ctime: 0,
            i_mtime: 0,
            i_dtime: 0,
            i_blkno: blkno,
            i_last_eb_blk: 0,
            i_fs_generation: fs_generation,
            i_dyn_features: 0,
            i_xattr_loc: 0,
            i_dx_root: 0,
            i_refcount_loc: 0,
            i_list: ExtentList::new(0, extent_recs_per_inode(block_size)),
        }
    }

    /// Creates a Dinode from the block read at `blkno`.
    ///
    /// # Arguments
    ///
    /// * `blkno` - The block the data was read from.
    /// * `data` - The whole inode block.
    ///
    /// # Returns
    ///
    /// The decoded inode, `BadSignature` when the block is not an inode,
    /// or `ShortBuffer` when it is too small to hold the extent list.
    pub fn from_bytes(blkno: u64, data: &[u8]) -> Result<Self> {
        ensure_len(data, I_LIST_OFFSET + EXTENT_LIST_HEADER_SIZE)?;
        if &data[0..8] != INODE_SIGNATURE {
            return Err(CheckError::BadSignature {
                blkno,
                expected: "INODE01",
                found: signature_string(&data[0..8]),
            });
        }
        let le_u16 = |offset: usize| -> u16 { LittleEndian::read_u16(&data[offset..offset + 2]) };
        let le_u32 = |offset: usize| -> u32 { LittleEndian::read_u32(&data[offset..offset + 4]) };
        let le_u64 = |offset: usize| -> u64 { LittleEndian::read_u64(&data[offset..offset + 8]) };

        Ok(Dinode {
            raw: data.to_vec(),
            i_generation: le_u32(0x08),
            i_suballoc_slot: le_u16(0x0C),
            i_suballoc_bit: le_u16(0x0E),
            i_clusters: le_u32(0x14),
            i_uid: le_u32(0x18),
            i_gid: le_u32(0x1C),
            i_size: le_u64(0x20),
            i_mode: le_u16(0x28),
            i_links_count: le_u16(0x2A),
            i_flags: le_u32(0x2C),
            i_atime: le_u64(0x30),
            i_ctime: le_u64(0x38),
            i_mtime: le_u64(0x40),
            i_dtime: le_u64(0x48),
            i_blkno: le_u64(0x50),
            i_last_eb_blk: le_u64(0x58),
            i_fs_generation: le_u32(0x60),
            i_dyn_features: le_u16(0x76),
            i_xattr_loc: le_u64(0x78),
            i_dx_root: le_u64(0x88),
            i_refcount_loc: le_u64(0x90),
            i_list: ExtentList::from_bytes(
                &data[I_LIST_OFFSET..],
                extent_recs_per_inode(data.len()),
            )?,
        })
    }

    /// Serializes the inode over the block it was read from.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut data = self.raw.clone();
        LittleEndian::write_u32(&mut data[0x08..0x0C], self.i_generation);
        LittleEndian::write_u16(&mut data[0x0C..0x0E], self.i_suballoc_slot);
        LittleEndian::write_u16(&mut data[0x0E..0x10], self.i_suballoc_bit);
        LittleEndian::write_u32(&mut data[0x14..0x18], self.i_clusters);
        LittleEndian::write_u32(&mut data[0x18..0x1C], self.i_uid);
        LittleEndian::write_u32(&mut data[0x1C..0x20], self.i_gid);
        LittleEndian::write_u64(&mut data[0x20..0x28], self.i_size);
        LittleEndian::write_u16(&mut data[0x28..0x2A], self.i_mode);
        LittleEndian::write_u16(&mut data[0x2A..0x2C], self.i_links_count);
        LittleEndian::write_u32(&mut data[0x2C..0x30], self.i_flags);
        LittleEndian::write_u64(&mut data[0x30..0x38], self.i_atime);
        LittleEndian::write_u64(&mut data[0x38..0x40], self.i_ctime);
        LittleEndian::write_u64(&mut data[0x40..0x48], self.i_mtime);
        LittleEndian::write_u64(&mut data[0x48..0x50], self.i_dtime);
        LittleEndian::write_u64(&mut data[0x50..0x58], self.i_blkno);
        LittleEndian::write_u64(&mut data[0x58..0x60], self.i_last_eb_blk);
        LittleEndian::write_u32(&mut data[0x60..0x64], self.i_fs_generation);
        LittleEndian::write_u16(&mut data[0x76..0x78], self.i_dyn_features);
        LittleEndian::write_u64(&mut data[0x78..0x80], self.i_xattr_loc);
        LittleEndian::write_u64(&mut data[0x88..0x90], self.i_dx_root);
        LittleEndian::write_u64(&mut data[0x90..0x98], self.i_refcount_loc);
        self.i_list.write_to(&mut data[I_LIST_OFFSET..])?;
        Ok(data)
    }

    pub fn is_dir(&self) -> bool {
        self.i_mode & S_IFMT == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.i_mode & S_IFMT == S_IFLNK
    }

    pub fn has_inline_data(&self) -> bool {
        self.i_dyn_features & INLINE_DATA_FL != 0
    }

    pub fn is_indexed_dir(&self) -> bool {
        self.i_dyn_features & INDEXED_DIR_FL != 0
    }

    pub fn has_refcount(&self) -> bool {
        self.i_dyn_features & HAS_REFCOUNT_FL != 0
    }

    /// Whether extended attributes live in a block outside the inode.
    pub fn has_xattr_block(&self) -> bool {
        self.i_dyn_features & HAS_XATTR_FL != 0 && self.i_xattr_loc != 0
    }

    /// Whether `id2` holds an extent list at all.
    ///
    /// Chain allocators, the superblock, local-alloc and truncate-log inodes
    /// reuse the union, inline-data inodes keep file bytes there and fast
    /// symlinks keep the target there.
    pub fn uses_extent_list(&self) -> bool {
        if self.i_flags & (SUPER_BLOCK_FL | LOCAL_ALLOC_FL | CHAIN_FL | DEALLOC_FL) != 0 {
            return false;
        }
        if self.has_inline_data() {
            return false;
        }
        !(self.is_symlink() && self.i_clusters == 0)
    }

    pub fn to_json(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        if let Some(obj) = value.as_object_mut() {
            obj.insert("mtime_h".to_string(), json!(format_time(self.i_mtime)));
            obj.insert("ctime_h".to_string(), json!(format_time(self.i_ctime)));
        }
        value
    }

    /// String representation of a Dinode using prettytable
    pub fn to_string(&self) -> String {
        let mut inode_table = Table::new();
        let rows: Vec<(&str, String)> = vec![
            ("Block", format!("{}", self.i_blkno)),
            ("Mode", format!("0o{:o}", self.i_mode)),
            ("Flags", format!("0x{:x}", self.i_flags)),
            ("Dynamic Features", format!("0x{:x}", self.i_dyn_features)),
            ("Size", format!("{}", self.i_size)),
            ("Clusters", format!("{}", self.i_clusters)),
            ("FS Generation", format!("0x{:x}", self.i_fs_generation)),
            ("Refcount Tree", format!("{}", self.i_refcount_loc)),
            ("Tree Depth", format!("{}", self.i_list.l_tree_depth)),
            (
                "Records",
                format!("{}/{}", self.i_list.l_next_free_rec, self.i_list.l_count),
            ),
            ("mtime", format_time(self.i_mtime)),
            ("ctime", format_time(self.i_ctime)),
        ];
        for (name, value) in rows {
            inode_table.add_row(Row::new(vec![Cell::new(name), Cell::new(&value)]));
        }
        inode_table.to_string()
    }
}

fn format_time(seconds: u64) -> String {
    Utc.timestamp_opt(seconds as i64, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}
