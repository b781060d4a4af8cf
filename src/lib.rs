use std::io::{Read, Seek, Write};

pub mod alloc;
pub mod check;
pub mod device;
pub mod dxroot;
pub mod error;
pub mod extent;
pub mod inode;
pub mod owner;
pub mod problem;
pub mod refcount;
pub mod superblock;
pub mod xattr;

use device::{BlockIo, ImageDevice};
use error::{CheckError, Result};
use inode::Dinode;
use log::{debug, info};
use superblock::{Superblock, VolumeInfo, MAX_BLOCKSIZE_BITS, MIN_BLOCKSIZE_BITS, SUPER_BLOCK_BLKNO};

pub use check::{
    Checker, InodeLeafPolicy, LeafPolicy, RefcountLeafPolicy, WalkContext, WalkSummary,
};

/// Struct representing an OCFS2 volume image.
pub struct O2Fs<T: Read + Write + Seek> {
    pub superblock: Superblock,
    device: ImageDevice<T>,
}

impl<T: Read + Write + Seek> O2Fs<T> {
    /// Opens the volume found `offset` bytes into `body`.
    ///
    /// The block size is not known up front, so every legal size is tried
    /// until block 2 carries a superblock that agrees with it.
    pub fn new(body: T, offset: u64) -> Result<Self> {
        let mut device = ImageDevice::new(body, offset, 1 << MIN_BLOCKSIZE_BITS)?;
        for bits in MIN_BLOCKSIZE_BITS..=MAX_BLOCKSIZE_BITS {
            device.set_block_size(1 << bits)?;
            if device.blocks() <= SUPER_BLOCK_BLKNO {
                break;
            }
            let buf = device.read_block(SUPER_BLOCK_BLKNO)?;
            match Superblock::from_bytes(&buf) {
                Ok(sb) if sb.s_blocksize_bits == bits => {
                    info!(
                        "found superblock with {} byte blocks and {} byte clusters",
                        sb.block_size(),
                        sb.cluster_size()
                    );
                    return Ok(O2Fs {
                        superblock: sb,
                        device,
                    });
                }
                Ok(sb) => debug!(
                    "superblock at block size {} claims {} byte blocks",
                    1u64 << bits,
                    sb.block_size()
                ),
                Err(e) => debug!("no superblock at block size {}: {}", 1u64 << bits, e),
            }
        }
        Err(CheckError::InvalidSuperblock(
            "no OCFS2 superblock found".to_string(),
        ))
    }

    /// Volume facts for the checker.
    ///
    /// Without an explicit cluster count the whole image is taken to be
    /// the volume.
    pub fn volume_info(&self, total_clusters: Option<u32>) -> VolumeInfo {
        let clusters = total_clusters.unwrap_or_else(|| {
            let shift = self.superblock.s_clustersize_bits - self.superblock.s_blocksize_bits;
            (self.device.blocks() >> shift).min(u32::MAX as u64) as u32
        });
        VolumeInfo::new(&self.superblock, clusters)
    }

    /// Read the inode stored at `blkno`.
    pub fn read_inode(&mut self, blkno: u64) -> Result<Dinode> {
        let buf = self.device.read_block(blkno)?;
        Dinode::from_bytes(blkno, &buf)
    }

    pub fn into_inner(self) -> T {
        self.device.into_inner()
    }
}

impl<T: Read + Write + Seek> BlockIo for O2Fs<T> {
    fn block_size(&self) -> usize {
        self.device.block_size()
    }

    fn read_block(&mut self, blkno: u64) -> Result<Vec<u8>> {
        self.device.read_block(blkno)
    }

    fn write_block(&mut self, blkno: u64, data: &[u8]) -> Result<()> {
        self.device.write_block(blkno, data)
    }
}
