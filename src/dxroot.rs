/// Reference: OCFS2 on-disk format, `struct ocfs2_dx_root_block`.
use byteorder::{ByteOrder, LittleEndian};

use crate::error::{ensure_len, signature_string, CheckError, Result};
use crate::extent::{ExtentList, EXTENT_LIST_HEADER_SIZE, EXTENT_REC_SIZE};

pub const DX_ROOT_SIGNATURE: &[u8; 8] = b"DXDIR01\0";

/// The index entries live in the root block itself; no extent list.
pub const DX_FLAG_INLINE: u8 = 0x01;

const DR_LIST_OFFSET: usize = 0xB0;

pub fn extent_recs_per_dx_root(block_size: usize) -> u16 {
    let size = block_size.saturating_sub(DR_LIST_OFFSET + EXTENT_LIST_HEADER_SIZE);
    (size / EXTENT_REC_SIZE).min(u16::MAX as usize) as u16
}

#[derive(Debug, Clone)]
/// Root block of an indexed directory.
pub struct DxRoot {
    raw: Vec<u8>,
    pub dr_fs_generation: u32,
    pub dr_blkno: u64,
    pub dr_last_eb_blk: u64,
    pub dr_clusters: u32,
    pub dr_flags: u8,
    pub dr_dir_blkno: u64,
    pub dr_list: ExtentList,
}

impl DxRoot {
    pub fn new(block_size: usize, blkno: u64, dir_blkno: u64, fs_generation: u32) -> Self {
        let mut raw = vec![0u8; block_size];
        raw[0..8].copy_from_slice(DX_ROOT_SIGNATURE);
        DxRoot {
            raw,
            dr_fs_generation: fs_generation,
            dr_blkno: blkno,
            dr_last_eb_blk: 0,
            dr_clusters: 0,
            dr_flags: 0,
            dr_dir_blkno: dir_blkno,
            dr_list: ExtentList::new(0, extent_recs_per_dx_root(block_size)),
        }
    }

    pub fn from_bytes(blkno: u64, data: &[u8]) -> Result<Self> {
        ensure_len(data, DR_LIST_OFFSET + EXTENT_LIST_HEADER_SIZE)?;
        if &data[0..8] != DX_ROOT_SIGNATURE {
            return Err(CheckError::BadSignature {
                blkno,
                expected: "DXDIR01",
                found: signature_string(&data[0..8]),
            });
        }
        Ok(DxRoot {
            raw: data.to_vec(),
            dr_fs_generation: LittleEndian::read_u32(&data[0x14..0x18]),
            dr_blkno: LittleEndian::read_u64(&data[0x18..0x20]),
            dr_last_eb_blk: LittleEndian::read_u64(&data[0x20..0x28]),
            dr_clusters: LittleEndian::read_u32(&data[0x28..0x2C]),
            dr_flags: data[0x2C],
            dr_dir_blkno: LittleEndian::read_u64(&data[0x30..0x38]),
            dr_list: ExtentList::from_bytes(
                &data[DR_LIST_OFFSET..],
                extent_recs_per_dx_root(data.len()),
            )?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut data = self.raw.clone();
        LittleEndian::write_u32(&mut data[0x14..0x18], self.dr_fs_generation);
        LittleEndian::write_u64(&mut data[0x18..0x20], self.dr_blkno);
        LittleEndian::write_u64(&mut data[0x20..0x28], self.dr_last_eb_blk);
        LittleEndian::write_u32(&mut data[0x28..0x2C], self.dr_clusters);
        data[0x2C] = self.dr_flags;
        LittleEndian::write_u64(&mut data[0x30..0x38], self.dr_dir_blkno);
        self.dr_list.write_to(&mut data[DR_LIST_OFFSET..])?;
        Ok(data)
    }

    pub fn is_inline(&self) -> bool {
        self.dr_flags & DX_FLAG_INLINE != 0
    }
}
