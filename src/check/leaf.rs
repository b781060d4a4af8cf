use super::{Checker, RecordSite};
use crate::error::Result;
use crate::extent::{ExtentRecord, EXT_REFCOUNTED, EXT_UNWRITTEN};
use crate::owner::Owner;
use crate::problem::{Problem, Prompt};

/// Owner-specific handling of depth-0 records.
pub trait LeafPolicy {
    /// Checks one leaf record, normalizing its fields when repairs are
    /// accepted. Never removes the record.
    fn validate_leaf(
        &self,
        checker: &mut Checker<'_>,
        owner: &Owner,
        site: RecordSite,
        rec: &mut ExtentRecord,
        changed: &mut bool,
    ) -> Result<()>;

    /// Records the clusters a surviving leaf claims.
    fn account_leaf(
        &self,
        checker: &mut Checker<'_>,
        owner: &Owner,
        rec: &ExtentRecord,
        clusters: u32,
    ) -> Result<()>;
}

/// Leaf rules for trees whose data belongs to an inode.
#[derive(Debug, Clone, Copy, Default)]
pub struct InodeLeafPolicy;

impl LeafPolicy for InodeLeafPolicy {
    fn validate_leaf(
        &self,
        checker: &mut Checker<'_>,
        owner: &Owner,
        site: RecordSite,
        rec: &mut ExtentRecord,
        changed: &mut bool,
    ) -> Result<()> {
        let vol = *checker.volume();
        let inode = owner.inode();
        let owner_id = owner.id();
        let clusters = rec.clusters(site.tree_depth);

        let first_block = vol.clusters_to_blocks(vol.blocks_to_clusters(rec.e_blkno));
        if first_block != rec.e_blkno
            && checker.prompt(
                Prompt::new(
                    Problem::ExtentBlknoUnaligned,
                    owner_id,
                    site.location,
                    format!(
                        "The extent record for cluster offset {} in owner {} refers to \
                         block {} which isn't aligned with the start of a cluster. Point \
                         the extent record at block {} which starts this cluster?",
                        rec.e_cpos, owner_id, rec.e_blkno, first_block
                    ),
                )
                .value("index", site.index as u64)
                .value("found", rec.e_blkno)
                .value("fixed", first_block),
            )
        {
            rec.e_blkno = first_block;
            *changed = true;
        }

        let last_cluster = vol.blocks_to_clusters(rec.e_blkno) + clusters as u64;
        let total = vol.total_clusters as u64;
        if last_cluster > total {
            let overrun = last_cluster - total;
            let fixed = (clusters as u64).saturating_sub(overrun) as u32;
            if checker.prompt(
                Prompt::new(
                    Problem::ExtentClustersOverrun,
                    owner_id,
                    site.location,
                    format!(
                        "The extent record for cluster offset {} in owner {} refers to \
                         an extent that goes beyond the end of the volume. Truncate the \
                         extent by {} clusters to fit it in the volume?",
                        rec.e_cpos, owner_id, overrun
                    ),
                )
                .value("index", site.index as u64)
                .value("found", clusters as u64)
                .value("fixed", fixed as u64),
            ) {
                rec.set_clusters(site.tree_depth, fixed);
                *changed = true;
            }
        }

        if !vol.writes_unwritten_extents()
            && rec.is_unwritten()
            && checker.prompt(
                Prompt::new(
                    Problem::ExtentMarkedUnwritten,
                    owner_id,
                    site.location,
                    format!(
                        "The extent record for cluster offset {} in owner {} has the \
                         UNWRITTEN flag set, but this filesystem does not support \
                         unwritten extents. Clear the UNWRITTEN flag?",
                        rec.e_cpos, inode.blkno
                    ),
                )
                .value("index", site.index as u64)
                .value("found", rec.e_flags as u64)
                .value("fixed", (rec.e_flags & !EXT_UNWRITTEN) as u64),
            )
        {
            rec.e_flags &= !EXT_UNWRITTEN;
            *changed = true;
        }

        if (!vol.has_refcount_tree() || !inode.has_refcount())
            && rec.is_refcounted()
            && checker.prompt(
                Prompt::new(
                    Problem::ExtentMarkedRefcounted,
                    owner_id,
                    site.location,
                    format!(
                        "The extent record for cluster offset {} at block {} in inode {} \
                         has the REFCOUNTED flag set, while it shouldn't have that flag. \
                         Clear the REFCOUNTED flag?",
                        rec.e_cpos, rec.e_blkno, inode.blkno
                    ),
                )
                .value("index", site.index as u64)
                .value("found", rec.e_flags as u64)
                .value("fixed", (rec.e_flags & !EXT_REFCOUNTED) as u64),
            )
        {
            rec.e_flags &= !EXT_REFCOUNTED;
            *changed = true;
        }

        Ok(())
    }

    fn account_leaf(
        &self,
        checker: &mut Checker<'_>,
        owner: &Owner,
        rec: &ExtentRecord,
        clusters: u32,
    ) -> Result<()> {
        let inode = *owner.inode();
        let p_cpos = checker.volume().blocks_to_clusters(rec.e_blkno);
        if rec.is_refcounted() {
            checker.tracker().mark_refcounted(
                inode.refcount_loc,
                inode.blkno,
                p_cpos,
                clusters,
                rec.e_cpos,
            )
        } else {
            checker.tracker().mark_used(p_cpos, clusters);
            Ok(())
        }
    }
}
