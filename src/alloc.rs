//! Cluster allocation bookkeeping fed by the extent walk.
use std::collections::BTreeMap;

use log::{debug, warn};
use serde::Serialize;

use crate::error::{CheckError, Result};

/// Receives the clusters every surviving leaf record claims.
pub trait AllocationTracker {
    /// Marks `count` clusters starting at `cluster` as in use.
    fn mark_used(&mut self, cluster: u64, count: u32);

    /// Records that a file maps `count` shared clusters at physical cluster
    /// `p_cpos` to logical cluster `v_cpos` through refcount tree `tree`.
    fn mark_refcounted(
        &mut self,
        tree: u64,
        owner: u64,
        p_cpos: u64,
        count: u32,
        v_cpos: u32,
    ) -> Result<()>;
}

trait BitmapExt {
    fn is_bit_set(&self, bit_index: usize) -> bool;
    fn set_bit(&mut self, bit_index: usize) -> bool;
}

impl BitmapExt for [u8] {
    #[inline]
    fn is_bit_set(&self, bit_index: usize) -> bool {
        let byte = self[bit_index / 8];
        let mask = 1u8 << (bit_index % 8);
        byte & mask != 0
    }

    /// Sets the bit, returning whether it was already set.
    #[inline]
    fn set_bit(&mut self, bit_index: usize) -> bool {
        let mask = 1u8 << (bit_index % 8);
        let byte = &mut self[bit_index / 8];
        let was_set = *byte & mask != 0;
        *byte |= mask;
        was_set
    }
}

/// One bit per cluster of the volume, plus a record of clusters claimed
/// more than once.
#[derive(Debug, Clone)]
pub struct ClusterBitmap {
    bits: Vec<u8>,
    duplicates: Vec<u8>,
    clusters: u64,
    has_duplicates: bool,
}

impl ClusterBitmap {
    pub fn new(clusters: u64) -> Self {
        let bytes = clusters.div_ceil(8) as usize;
        ClusterBitmap {
            bits: vec![0u8; bytes],
            duplicates: vec![0u8; bytes],
            clusters,
            has_duplicates: false,
        }
    }

    pub fn is_used(&self, cluster: u64) -> bool {
        cluster < self.clusters && self.bits.is_bit_set(cluster as usize)
    }

    pub fn is_duplicate(&self, cluster: u64) -> bool {
        cluster < self.clusters && self.duplicates.is_bit_set(cluster as usize)
    }

    pub fn has_duplicates(&self) -> bool {
        self.has_duplicates
    }

    pub fn used_count(&self) -> u64 {
        self.bits.iter().map(|b| b.count_ones() as u64).sum()
    }

    /// Clusters claimed by more than one record, in ascending order.
    pub fn duplicate_clusters(&self) -> Vec<u64> {
        (0..self.clusters)
            .filter(|&c| self.duplicates.is_bit_set(c as usize))
            .collect()
    }
}

impl AllocationTracker for ClusterBitmap {
    fn mark_used(&mut self, cluster: u64, count: u32) {
        let end = cluster.saturating_add(count as u64);
        if end > self.clusters {
            warn!(
                "clusters {}..{} run past the end of the bitmap ({} clusters), clipping",
                cluster, end, self.clusters
            );
        }
        for c in cluster..end.min(self.clusters) {
            if self.bits.set_bit(c as usize) {
                if !self.has_duplicates {
                    warn!("duplicate clusters detected");
                    self.has_duplicates = true;
                }
                debug!("cluster {} is allocated to more than one object", c);
                self.duplicates.set_bit(c as usize);
            }
        }
    }

    fn mark_refcounted(
        &mut self,
        _tree: u64,
        _owner: u64,
        p_cpos: u64,
        count: u32,
        _v_cpos: u32,
    ) -> Result<()> {
        self.mark_used(p_cpos, count);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefcountExtent {
    pub v_cpos: u32,
    pub p_cpos: u64,
    pub clusters: u32,
}

/// Shared extents each file maps through its refcount tree.
///
/// Files are registered by whoever walks the refcount trees; marking an
/// extent for an unregistered file is an error.
#[derive(Debug, Clone, Default)]
pub struct RefcountRegistry {
    files: BTreeMap<(u64, u64), Vec<RefcountExtent>>,
}

impl RefcountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_file(&mut self, tree: u64, owner: u64) {
        self.files.entry((tree, owner)).or_default();
    }

    pub fn extents(&self, tree: u64, owner: u64) -> Option<&[RefcountExtent]> {
        self.files.get(&(tree, owner)).map(|v| v.as_slice())
    }

    pub fn add(&mut self, tree: u64, owner: u64, extent: RefcountExtent) -> Result<()> {
        let extents = self
            .files
            .get_mut(&(tree, owner))
            .ok_or(CheckError::UnknownRefcountFile { tree, owner })?;
        let at = extents.partition_point(|e| e.v_cpos <= extent.v_cpos);
        extents.insert(at, extent);
        Ok(())
    }
}

/// Bitmap for plain extents, registry for refcounted ones.
#[derive(Debug, Clone)]
pub struct ClusterTracker {
    pub bitmap: ClusterBitmap,
    pub refcounts: RefcountRegistry,
}

impl ClusterTracker {
    pub fn new(clusters: u64) -> Self {
        ClusterTracker {
            bitmap: ClusterBitmap::new(clusters),
            refcounts: RefcountRegistry::new(),
        }
    }
}

impl AllocationTracker for ClusterTracker {
    fn mark_used(&mut self, cluster: u64, count: u32) {
        self.bitmap.mark_used(cluster, count);
    }

    fn mark_refcounted(
        &mut self,
        tree: u64,
        owner: u64,
        p_cpos: u64,
        count: u32,
        v_cpos: u32,
    ) -> Result<()> {
        self.refcounts.add(
            tree,
            owner,
            RefcountExtent {
                v_cpos,
                p_cpos,
                clusters: count,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_a_duplicate() {
        let mut bm = ClusterBitmap::new(20);
        bm.mark_used(2, 4);
        bm.mark_used(5, 2);
        assert_eq!(bm.used_count(), 5);
        assert!(bm.has_duplicates());
        assert_eq!(bm.duplicate_clusters(), vec![5]);
    }

    #[test]
    fn ranges_past_the_end_are_clipped() {
        let mut bm = ClusterBitmap::new(10);
        bm.mark_used(8, 5);
        assert!(bm.is_used(9));
        assert!(!bm.is_used(10));
        assert_eq!(bm.used_count(), 2);
    }

    #[test]
    fn refcount_extents_need_a_registered_file() {
        let mut tracker = ClusterTracker::new(100);
        let err = tracker.mark_refcounted(50, 20, 4, 2, 0).unwrap_err();
        assert!(matches!(
            err,
            CheckError::UnknownRefcountFile { tree: 50, owner: 20 }
        ));

        tracker.refcounts.register_file(50, 20);
        tracker.mark_refcounted(50, 20, 10, 2, 8).unwrap();
        tracker.mark_refcounted(50, 20, 4, 2, 0).unwrap();
        let v: Vec<u32> = tracker
            .refcounts
            .extents(50, 20)
            .unwrap()
            .iter()
            .map(|e| e.v_cpos)
            .collect();
        assert_eq!(v, vec![0, 8]);
        assert_eq!(tracker.bitmap.used_count(), 0);
    }
}
