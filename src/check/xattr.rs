use log::{error, warn};

use super::{Checker, InodeLeafPolicy, WalkSummary};
use crate::error::Result;
use crate::inode::Dinode;
use crate::owner::{InodeOwner, Owner};
use crate::problem::{Problem, Prompt};
use crate::xattr::{xattr_recs_per_xb, XattrBlock, XATTR_VALUE_ROOT_RECS};

impl Checker<'_> {
    /// Verifies the extent lists kept in an inode's external xattr block.
    ///
    /// # Arguments
    ///
    /// * `di` - The inode. Its xattr reference is cleared, and the inode
    ///   written, when the block turns out not to be an xattr block and
    ///   that repair is accepted.
    ///
    /// # Returns
    ///
    /// The combined walk over the bucket tree of an indexed block or over
    /// every value list of an unindexed one, or `None` when there is no
    /// block to check. Data clusters are accounted the same way as the
    /// inode's own.
    pub fn check_xattr_block(&mut self, di: &mut Dinode) -> Result<Option<WalkSummary>> {
        if !self.volume.supports_xattr() || !di.has_xattr_block() {
            return Ok(None);
        }
        let xattr_blk = di.i_xattr_loc;
        if self.volume.block_out_of_range(xattr_blk) {
            warn!(
                "inode {} points at xattr block {} outside the volume",
                di.i_blkno, xattr_blk
            );
            return Ok(None);
        }

        let buf = self.io.read_block(xattr_blk)?;
        let mut xb = match XattrBlock::from_bytes(xattr_blk, &buf) {
            Ok(xb) => xb,
            Err(e) if e.is_bad_signature() => {
                if self.prompt(
                    Prompt::new(
                        Problem::XattrBlockInvalid,
                        di.i_blkno,
                        xattr_blk,
                        format!(
                            "Extended attributes block {} has a bad signature, remove \
                             this block?",
                            xattr_blk
                        ),
                    )
                    .value("found", xattr_blk)
                    .value("fixed", 0),
                ) {
                    di.i_xattr_loc = 0;
                    let buf = di.to_bytes()?;
                    if let Err(e) = self.io.write_block(di.i_blkno, &buf) {
                        error!("while writing inode {}: {}", di.i_blkno, e);
                        return Err(e);
                    }
                }
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let owner = Owner::XattrBlock {
            inode: InodeOwner::from(&*di),
            xattr_blk,
        };
        let mut total = WalkSummary::default();

        if let Some(list) = xb.xt_list.as_mut() {
            if list.l_next_free_rec != 0 {
                let max_recs = xattr_recs_per_xb(buf.len());
                total = self.walk(&owner, &InodeLeafPolicy, list, max_recs)?;
            }
        }
        for root in xb.value_roots.iter_mut() {
            let summary =
                self.walk(&owner, &InodeLeafPolicy, &mut root.xr_list, XATTR_VALUE_ROOT_RECS)?;
            total.clusters += summary.clusters;
            total.max_size = total.max_size.max(summary.max_size);
            total.changed |= summary.changed;
        }

        if total.changed {
            let buf = xb.to_bytes()?;
            if let Err(e) = self.io.write_block(xattr_blk, &buf) {
                error!(
                    "while writing the xattr block at {} for inode {}: {}",
                    xattr_blk, di.i_blkno, e
                );
                return Err(e);
            }
        }
        Ok(Some(total))
    }
}
