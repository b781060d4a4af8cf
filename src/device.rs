use std::io::{Read, Seek, SeekFrom, Write};

use log::error;

use crate::error::{CheckError, Result};
use crate::extent::ExtentBlock;

/// Block-granular access to the volume.
pub trait BlockIo {
    fn block_size(&self) -> usize;

    /// Reads one whole block.
    fn read_block(&mut self, blkno: u64) -> Result<Vec<u8>>;

    /// Writes one whole block.
    fn write_block(&mut self, blkno: u64, data: &[u8]) -> Result<()>;

    /// Reads an extent block, checking nothing but its signature.
    ///
    /// A wrong signature comes back as `CheckError::BadSignature`; every other
    /// error is an I/O failure.
    fn read_extent_block(&mut self, blkno: u64) -> Result<ExtentBlock> {
        let buf = self.read_block(blkno)?;
        ExtentBlock::from_bytes(blkno, &buf)
    }

    fn write_extent_block(&mut self, blkno: u64, eb: &ExtentBlock) -> Result<()> {
        let buf = eb.to_bytes()?;
        self.write_block(blkno, &buf)
    }
}

/// A volume image reachable through any `Read + Write + Seek` body.
pub struct ImageDevice<T: Read + Write + Seek> {
    body: T,
    offset: u64,
    block_size: usize,
    blocks: u64,
}

impl<T: Read + Write + Seek> ImageDevice<T> {
    /// Wraps `body`, whose volume starts `offset` bytes in.
    pub fn new(mut body: T, offset: u64, block_size: usize) -> Result<Self> {
        let end = body.seek(SeekFrom::End(0))?;
        let blocks = end.saturating_sub(offset) / block_size as u64;
        Ok(ImageDevice {
            body,
            offset,
            block_size,
            blocks,
        })
    }

    /// Number of whole blocks the image holds.
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    pub fn set_block_size(&mut self, block_size: usize) -> Result<()> {
        let end = self.body.seek(SeekFrom::End(0))?;
        self.block_size = block_size;
        self.blocks = end.saturating_sub(self.offset) / block_size as u64;
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.body
    }

    fn position(&self, blkno: u64) -> Result<u64> {
        if blkno >= self.blocks {
            return Err(CheckError::BlockOutOfRange {
                blkno,
                blocks: self.blocks,
            });
        }
        Ok(self.offset + blkno * self.block_size as u64)
    }
}

impl<T: Read + Write + Seek> BlockIo for ImageDevice<T> {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&mut self, blkno: u64) -> Result<Vec<u8>> {
        let pos = self.position(blkno)?;
        let mut buf = vec![0u8; self.block_size];
        self.body.seek(SeekFrom::Start(pos))?;
        self.body.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_block(&mut self, blkno: u64, data: &[u8]) -> Result<()> {
        if data.len() != self.block_size {
            error!(
                "refusing to write {} bytes to block {} (block size {})",
                data.len(),
                blkno,
                self.block_size
            );
            return Err(CheckError::ShortBuffer {
                need: self.block_size,
                got: data.len(),
            });
        }
        let pos = self.position(blkno)?;
        self.body.seek(SeekFrom::Start(pos))?;
        self.body.write_all(data)?;
        self.body.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_and_writes_blocks_past_offset() {
        let image = Cursor::new(vec![0u8; 1024 + 4 * 512]);
        let mut dev = ImageDevice::new(image, 1024, 512).unwrap();
        assert_eq!(dev.blocks(), 4);

        let block = vec![0x5Au8; 512];
        dev.write_block(3, &block).unwrap();
        assert_eq!(dev.read_block(3).unwrap(), block);

        let raw = dev.into_inner().into_inner();
        assert_eq!(raw[1024 + 3 * 512], 0x5A);
        assert_eq!(raw[1024 + 2 * 512], 0);
    }

    #[test]
    fn out_of_device_block_is_an_error() {
        let mut dev = ImageDevice::new(Cursor::new(vec![0u8; 2048]), 0, 512).unwrap();
        assert!(matches!(
            dev.read_block(4),
            Err(CheckError::BlockOutOfRange { blkno: 4, blocks: 4 })
        ));
        assert!(dev.write_block(0, &[0u8; 10]).is_err());
    }

    #[test]
    fn zeroed_block_is_not_an_extent_block() {
        let mut dev = ImageDevice::new(Cursor::new(vec![0u8; 2048]), 0, 512).unwrap();
        let err = dev.read_extent_block(2).unwrap_err();
        assert!(err.is_bad_signature());
    }
}
