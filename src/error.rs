use thiserror::Error;

/// Errors raised while reading, parsing or repairing volume metadata.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The block was read but does not carry the signature of the node
    /// type the caller asked for.
    #[error("block {blkno} has signature {found:?}, expected {expected:?}")]
    BadSignature {
        blkno: u64,
        expected: &'static str,
        found: String,
    },

    #[error("block {blkno} lies outside the device ({blocks} blocks)")]
    BlockOutOfRange { blkno: u64, blocks: u64 },

    #[error("buffer of {got} bytes is too small, {need} bytes needed")]
    ShortBuffer { need: usize, got: usize },

    #[error("invalid superblock: {0}")]
    InvalidSuperblock(String),

    #[error("refcount tree {tree} has no record of inode {owner}")]
    UnknownRefcountFile { tree: u64, owner: u64 },
}

impl CheckError {
    pub fn is_bad_signature(&self) -> bool {
        matches!(self, CheckError::BadSignature { .. })
    }
}

pub type Result<T> = std::result::Result<T, CheckError>;

/// Fails with `ShortBuffer` unless `data` holds at least `need` bytes.
pub(crate) fn ensure_len(data: &[u8], need: usize) -> Result<()> {
    if data.len() < need {
        return Err(CheckError::ShortBuffer {
            need,
            got: data.len(),
        });
    }
    Ok(())
}

/// Renders an on-disk signature for diagnostics, dropping trailing NULs.
pub(crate) fn signature_string(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches('\0')
        .to_string()
}
