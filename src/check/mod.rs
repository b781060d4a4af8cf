//! Extent tree verification and repair.
//!
//! A walk starts at an owner's root extent list and descends depth first
//! through every extent block it references:
//!
//! ```text
//! Checker::walk -> check_el <-> check_er <-> check_eb
//!                                  |
//!                                  +-> LeafPolicy::validate_leaf / account_leaf
//! ```
//!
//! The same walk serves every owner kind. File, directory index and xattr
//! trees use [`InodeLeafPolicy`]; refcount trees use [`RefcountLeafPolicy`],
//! whose leaves point at refcount blocks rather than data.
//!
//! Each repair is offered through the session's [`Confirm`] policy and
//! applied only when accepted. Blocks below the root are written back as
//! soon as their own check finishes; the owner record is written once the
//! whole walk succeeds.
mod block;
mod leaf;
mod list;
mod record;
mod refcount;
mod xattr;

use log::{error, info, warn};
use serde::Serialize;

use crate::alloc::AllocationTracker;
use crate::device::BlockIo;
use crate::dxroot::{extent_recs_per_dx_root, DxRoot};
use crate::error::Result;
use crate::extent::ExtentList;
use crate::inode::{extent_recs_per_inode, Dinode};
use crate::owner::{InodeOwner, Owner};
use crate::problem::{Confirm, Prompt};
use crate::superblock::VolumeInfo;

pub use leaf::{InodeLeafPolicy, LeafPolicy};
pub use refcount::RefcountLeafPolicy;

/// Deepest chain of extent blocks a walk will follow below the owner.
pub const MAX_TREE_DEPTH: u16 = 5;

/// Where a record sits: the block holding its list, its slot and the
/// list's depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSite {
    pub location: u64,
    pub index: usize,
    pub tree_depth: u16,
}

/// What one walk found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WalkSummary {
    /// Clusters claimed by surviving leaf records.
    pub clusters: u64,
    /// Largest byte offset any leaf record reaches.
    pub max_size: u64,
    /// Whether the owner's root list was modified.
    pub changed: bool,
}

/// State for a single walk; never shared between owners.
pub struct WalkContext<'w> {
    /// Depth the next list must have; `None` at the root.
    pub expected_depth: Option<u16>,
    pub clusters: u64,
    pub max_size: u64,
    level: u16,
    owner: &'w Owner,
    policy: &'w dyn LeafPolicy,
}

impl<'w> WalkContext<'w> {
    pub fn new(owner: &'w Owner, policy: &'w dyn LeafPolicy) -> Self {
        WalkContext {
            expected_depth: None,
            clusters: 0,
            max_size: 0,
            level: 0,
            owner,
            policy,
        }
    }

    pub fn owner(&self) -> &'w Owner {
        self.owner
    }

    pub fn policy(&self) -> &'w dyn LeafPolicy {
        self.policy
    }

    /// Number of extent blocks between the root and the current list.
    pub fn level(&self) -> u16 {
        self.level
    }
}

/// The collaborators a walk talks to.
pub struct Checker<'s> {
    volume: VolumeInfo,
    io: &'s mut dyn BlockIo,
    prompter: &'s mut dyn Confirm,
    tracker: &'s mut dyn AllocationTracker,
}

impl<'s> Checker<'s> {
    pub fn new(
        volume: VolumeInfo,
        io: &'s mut dyn BlockIo,
        prompter: &'s mut dyn Confirm,
        tracker: &'s mut dyn AllocationTracker,
    ) -> Self {
        Checker {
            volume,
            io,
            prompter,
            tracker,
        }
    }

    pub fn volume(&self) -> &VolumeInfo {
        &self.volume
    }

    /// Offers a repair; true means apply it.
    pub fn prompt(&mut self, prompt: Prompt) -> bool {
        self.prompter.confirm(&prompt)
    }

    pub fn tracker(&mut self) -> &mut dyn AllocationTracker {
        &mut *self.tracker
    }

    /// Checks the list rooted at `owner` with a fresh context.
    ///
    /// `max_recs` is the number of records the containing node has room
    /// for. Nothing is written for the root list itself; the caller owns
    /// that block and should persist it when the summary says it changed.
    pub fn walk(
        &mut self,
        owner: &Owner,
        policy: &dyn LeafPolicy,
        el: &mut ExtentList,
        max_recs: u16,
    ) -> Result<WalkSummary> {
        let mut ctx = WalkContext::new(owner, policy);
        let mut changed = false;
        self.check_el(&mut ctx, owner.root_block(), el, max_recs, &mut changed)?;
        Ok(WalkSummary {
            clusters: ctx.clusters,
            max_size: ctx.max_size,
            changed,
        })
    }

    /// Verifies the extent tree of a file or directory inode and writes the
    /// inode back if its root list was repaired.
    pub fn check_extents(&mut self, di: &mut Dinode) -> Result<WalkSummary> {
        let owner = Owner::Inode(InodeOwner::from(&*di));
        let max_recs = extent_recs_per_inode(self.io.block_size());
        let summary = self.walk(&owner, &InodeLeafPolicy, &mut di.i_list, max_recs)?;

        if summary.changed {
            let buf = di.to_bytes()?;
            if let Err(e) = self.io.write_block(di.i_blkno, &buf) {
                error!("while writing inode {}: {}", di.i_blkno, e);
                return Err(e);
            }
        }
        info!(
            "inode {}: {} clusters, max size {}{}",
            di.i_blkno,
            summary.clusters,
            summary.max_size,
            if summary.changed { ", updated" } else { "" }
        );
        Ok(summary)
    }

    /// Verifies the index tree of an indexed directory.
    ///
    /// Returns `None` when the inode has no index tree to walk.
    pub fn check_dx_root(&mut self, di: &Dinode) -> Result<Option<WalkSummary>> {
        if !self.volume.supports_indexed_dirs() || !di.is_indexed_dir() {
            return Ok(None);
        }
        let dx_blkno = di.i_dx_root;
        if self.volume.block_out_of_range(dx_blkno) {
            warn!(
                "inode {} points at dx root {} outside the volume",
                di.i_blkno, dx_blkno
            );
            return Ok(None);
        }

        let buf = self.io.read_block(dx_blkno)?;
        let mut dx_root = DxRoot::from_bytes(dx_blkno, &buf)?;
        if dx_root.is_inline() {
            return Ok(None);
        }

        let owner = Owner::DirIndexRoot {
            inode: InodeOwner::from(di),
            dx_root: dx_blkno,
        };
        let max_recs = extent_recs_per_dx_root(self.io.block_size());
        let summary = self.walk(&owner, &InodeLeafPolicy, &mut dx_root.dr_list, max_recs)?;

        if summary.changed {
            let buf = dx_root.to_bytes()?;
            if let Err(e) = self.io.write_block(dx_blkno, &buf) {
                error!(
                    "while writing an updated dx root block at {} for inode {}: {}",
                    dx_blkno, di.i_blkno, e
                );
                return Err(e);
            }
        }
        Ok(Some(summary))
    }
}
