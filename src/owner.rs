use serde::Serialize;

use crate::inode::{Dinode, HAS_REFCOUNT_FL};

/// The inode facts leaf checks and accounting need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InodeOwner {
    pub blkno: u64,
    pub dyn_features: u16,
    pub refcount_loc: u64,
}

impl InodeOwner {
    pub fn has_refcount(&self) -> bool {
        self.dyn_features & HAS_REFCOUNT_FL != 0
    }
}

impl From<&Dinode> for InodeOwner {
    fn from(di: &Dinode) -> Self {
        InodeOwner {
            blkno: di.i_blkno,
            dyn_features: di.i_dyn_features,
            refcount_loc: di.i_refcount_loc,
        }
    }
}

/// The object whose root extent list a walk starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Owner {
    /// File data tree rooted in the inode itself.
    Inode(InodeOwner),
    /// Index tree of an indexed directory, rooted in its dx root block.
    DirIndexRoot { inode: InodeOwner, dx_root: u64 },
    /// Bucket tree or value lists held in an inode's external xattr block.
    XattrBlock { inode: InodeOwner, xattr_blk: u64 },
    /// Refcount tree shared by the inode, rooted in a refcount block.
    RefcountTree { inode: InodeOwner, root: u64 },
}

impl Owner {
    /// Identity reported in prompts: the tree root for refcount trees,
    /// the inode otherwise.
    pub fn id(&self) -> u64 {
        match self {
            Owner::RefcountTree { root, .. } => *root,
            _ => self.inode().blkno,
        }
    }

    /// The inode the walk was started for.
    pub fn inode(&self) -> &InodeOwner {
        match self {
            Owner::Inode(inode)
            | Owner::DirIndexRoot { inode, .. }
            | Owner::XattrBlock { inode, .. }
            | Owner::RefcountTree { inode, .. } => inode,
        }
    }

    /// Block holding the root extent list.
    pub fn root_block(&self) -> u64 {
        match self {
            Owner::Inode(inode) => inode.blkno,
            Owner::DirIndexRoot { dx_root, .. } => *dx_root,
            Owner::XattrBlock { xattr_blk, .. } => *xattr_blk,
            Owner::RefcountTree { root, .. } => *root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INODE: InodeOwner = InodeOwner {
        blkno: 20,
        dyn_features: HAS_REFCOUNT_FL,
        refcount_loc: 60,
    };

    #[test]
    fn refcount_trees_are_named_by_their_root() {
        let owner = Owner::RefcountTree {
            inode: INODE,
            root: 60,
        };
        assert_eq!(owner.id(), 60);
        assert_eq!(owner.root_block(), 60);
        assert_eq!(owner.inode().blkno, 20);
    }

    #[test]
    fn other_trees_are_named_by_their_inode() {
        let xattr = Owner::XattrBlock {
            inode: INODE,
            xattr_blk: 44,
        };
        assert_eq!(xattr.id(), 20);
        assert_eq!(xattr.root_block(), 44);
        assert_eq!(Owner::Inode(INODE).root_block(), 20);
    }
}
