use log::{error, info, warn};

use super::{Checker, LeafPolicy, RecordSite, WalkContext, WalkSummary};
use crate::error::Result;
use crate::extent::ExtentRecord;
use crate::inode::{Dinode, HAS_REFCOUNT_FL};
use crate::owner::{InodeOwner, Owner};
use crate::problem::{Problem, Prompt};
use crate::refcount::{extent_recs_per_rb, RefcountBlock};

/// Outcome of checking one refcount block.
struct RbCheck {
    valid: bool,
    /// The walk over the block's tree list, for tree nodes.
    walk: Option<WalkSummary>,
}

impl RbCheck {
    fn invalid() -> Self {
        RbCheck {
            valid: false,
            walk: None,
        }
    }
}

/// Leaf rules for refcount trees.
///
/// A leaf record points at a refcount block instead of data. The block is
/// checked in place and a record whose block cannot be trusted may be
/// disconnected. Refcount blocks come from the extent block allocator, so
/// nothing is accounted here.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefcountLeafPolicy;

impl LeafPolicy for RefcountLeafPolicy {
    fn validate_leaf(
        &self,
        checker: &mut Checker<'_>,
        owner: &Owner,
        site: RecordSite,
        rec: &mut ExtentRecord,
        changed: &mut bool,
    ) -> Result<()> {
        let root = owner.root_block();
        let checked = checker.check_rb(owner, rec.e_blkno, root, false)?;
        if !checked.valid
            && checker.prompt(
                Prompt::new(
                    Problem::RefcountBlockInvalid,
                    owner.id(),
                    site.location,
                    format!(
                        "Refcount block {} for tree {} is invalid. Remove it from \
                         the tree?",
                        rec.e_blkno, root
                    ),
                )
                .value("index", site.index as u64)
                .value("found", rec.e_blkno)
                .value("fixed", 0),
            )
        {
            rec.e_blkno = 0;
            *changed = true;
        }
        Ok(())
    }

    fn account_leaf(
        &self,
        _checker: &mut Checker<'_>,
        _owner: &Owner,
        _rec: &ExtentRecord,
        _clusters: u32,
    ) -> Result<()> {
        Ok(())
    }
}

impl Checker<'_> {
    /// Checks the refcount block at `blkno` in the tree rooted at `root`.
    ///
    /// A tree node has its list walked with [`RefcountLeafPolicy`]; that is
    /// only allowed when `descend` is set, so a tree node found where a leaf
    /// belongs counts as invalid. Repairs are written back before
    /// returning.
    fn check_rb(
        &mut self,
        owner: &Owner,
        blkno: u64,
        root: u64,
        descend: bool,
    ) -> Result<RbCheck> {
        let tree = owner.id();

        let buf = self.io.read_block(blkno)?;
        let mut rb = match RefcountBlock::from_bytes(blkno, &buf) {
            Ok(rb) => rb,
            Err(e) if e.is_bad_signature() => {
                error!(
                    "reading refcount block at {} in refcount tree {} for verification: {}",
                    blkno, tree, e
                );
                return Ok(RbCheck::invalid());
            }
            Err(e) => return Err(e),
        };

        let mut changed = false;

        if rb.rf_blkno != blkno
            && self.prompt(
                Prompt::new(
                    Problem::RefcountBlockBlkno,
                    tree,
                    blkno,
                    format!(
                        "A refcount block at {} in refcount tree {} claims to be \
                         located at block {}. Update the refcount block's location?",
                        blkno, root, rb.rf_blkno
                    ),
                )
                .value("found", rb.rf_blkno)
                .value("fixed", blkno),
            )
        {
            rb.rf_blkno = blkno;
            changed = true;
        }

        let generation = self.volume.fs_generation;
        if rb.rf_fs_generation != generation {
            if self.prompt(
                Prompt::new(
                    Problem::RefcountBlockGeneration,
                    tree,
                    blkno,
                    format!(
                        "A refcount block at {} in refcount tree {} has a generation \
                         of {:x} which doesn't match the volume's generation of {:x}. \
                         Consider this refcount block invalid?",
                        blkno, root, rb.rf_fs_generation, generation
                    ),
                )
                .value("found", rb.rf_fs_generation as u64)
                .value("expected", generation as u64),
            ) {
                return Ok(RbCheck::invalid());
            }
            if self.prompt(
                Prompt::new(
                    Problem::RefcountBlockGenerationFix,
                    tree,
                    blkno,
                    "Update the refcount block's generation to match the volume?".to_string(),
                )
                .value("found", rb.rf_fs_generation as u64)
                .value("fixed", generation as u64),
            ) {
                rb.rf_fs_generation = generation;
                changed = true;
            }
        }

        if rb.rf_blkno != root
            && rb.rf_parent != root
            && self.prompt(
                Prompt::new(
                    Problem::RefcountBlockParent,
                    tree,
                    blkno,
                    format!(
                        "A refcount block at {} in refcount tree {} claims to belong \
                         to tree {}. Update the parent's information?",
                        blkno, root, rb.rf_parent
                    ),
                )
                .value("found", rb.rf_parent)
                .value("fixed", root),
            )
        {
            rb.rf_parent = root;
            changed = true;
        }

        let mut checked = RbCheck {
            valid: true,
            walk: None,
        };

        if let Some(list) = rb.rf_list.as_mut() {
            if !descend {
                warn!(
                    "refcount block {} in tree {} is a tree node where a leaf belongs",
                    blkno, root
                );
                return Ok(RbCheck::invalid());
            }
            let mut ctx = WalkContext::new(owner, &RefcountLeafPolicy);
            let max_recs = extent_recs_per_rb(buf.len());
            let mut list_changed = false;
            self.check_el(&mut ctx, blkno, list, max_recs, &mut list_changed)?;
            changed |= list_changed;

            let found = ctx.clusters.min(u32::MAX as u64) as u32;
            if found != rb.rf_clusters
                && self.prompt(
                    Prompt::new(
                        Problem::RefcountClusters,
                        tree,
                        blkno,
                        format!(
                            "Refcount tree {} claims to have {} clusters, but we only \
                             found {}. Fix it?",
                            root, rb.rf_clusters, found
                        ),
                    )
                    .value("found", rb.rf_clusters as u64)
                    .value("fixed", found as u64),
                )
            {
                rb.rf_clusters = found;
                changed = true;
            }
            checked.walk = Some(WalkSummary {
                clusters: ctx.clusters,
                max_size: ctx.max_size,
                changed: list_changed,
            });
        } else if blkno != root
            && rb.rl_used == 0
            && self.prompt(
                Prompt::new(
                    Problem::RefcountListEmpty,
                    tree,
                    blkno,
                    format!(
                        "Refcount block {} claims to have no refcount record in it. \
                         Consider it as invalid and Remove from tree?",
                        rb.rf_blkno
                    ),
                )
                .value("found", rb.rl_used as u64),
            )
        {
            checked.valid = false;
            changed = true;
        }

        if changed {
            let buf = rb.to_bytes()?;
            if let Err(e) = self.io.write_block(blkno, &buf) {
                error!(
                    "while writing an updated refcount block at {} for refcount tree {}: {}",
                    blkno, root, e
                );
                return Err(e);
            }
        }
        Ok(checked)
    }

    /// Verifies the refcount tree an inode shares.
    ///
    /// Returns the walk over the root's tree list, or `None` when the inode
    /// has no tree, the root keeps its records flat, or the tree was found
    /// invalid. Dropping an invalid tree clears the inode's reference and
    /// writes the inode.
    pub fn check_refcount_tree(&mut self, di: &mut Dinode) -> Result<Option<WalkSummary>> {
        if !self.volume.has_refcount_tree() || !di.has_refcount() {
            return Ok(None);
        }
        let root = di.i_refcount_loc;
        let owner = Owner::RefcountTree {
            inode: InodeOwner::from(&*di),
            root,
        };

        let checked = if self.volume.block_out_of_range(root) {
            warn!(
                "inode {} points at refcount tree {} outside the volume",
                di.i_blkno, root
            );
            RbCheck::invalid()
        } else {
            self.check_rb(&owner, root, root, true)?
        };

        if !checked.valid {
            if self.prompt(
                Prompt::new(
                    Problem::RefcountRootBlockInvalid,
                    di.i_blkno,
                    di.i_blkno,
                    format!(
                        "Refcount tree {} for inode {} is invalid. Remove it and clear \
                         the flag for the inode?",
                        root, di.i_blkno
                    ),
                )
                .value("found", root)
                .value("fixed", 0),
            ) {
                di.i_refcount_loc = 0;
                di.i_dyn_features &= !HAS_REFCOUNT_FL;
                let buf = di.to_bytes()?;
                if let Err(e) = self.io.write_block(di.i_blkno, &buf) {
                    error!("while writing inode {}: {}", di.i_blkno, e);
                    return Err(e);
                }
            }
            return Ok(None);
        }

        if let Some(summary) = &checked.walk {
            info!(
                "refcount tree {}: {} clusters{}",
                root,
                summary.clusters,
                if summary.changed { ", updated" } else { "" }
            );
        }
        Ok(checked.walk)
    }
}
