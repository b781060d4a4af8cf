use log::{debug, warn};

use super::{Checker, RecordSite, WalkContext};
use crate::error::Result;
use crate::extent::ExtentList;
use crate::problem::{Problem, Prompt};

impl Checker<'_> {
    /// Checks one extent list held in block `location`.
    ///
    /// `max_recs` is the structural maximum for the containing node. Records
    /// pointing outside the volume may be removed, which compacts the list
    /// in place; that is only allowed while `l_next_free_rec` is trusted.
    pub(crate) fn check_el(
        &mut self,
        ctx: &mut WalkContext<'_>,
        location: u64,
        el: &mut ExtentList,
        max_recs: u16,
        changed: &mut bool,
    ) -> Result<()> {
        let owner = ctx.owner().id();
        debug!(
            "depth {} count {} next_free {}",
            el.l_tree_depth, el.l_count, el.l_next_free_rec
        );

        if let Some(expected) = ctx.expected_depth {
            if el.l_tree_depth != expected
                && self.prompt(
                    Prompt::new(
                        Problem::ExtentListDepth,
                        owner,
                        location,
                        format!(
                            "Extent list in owner {} is recorded as being at depth {} \
                             but we expect it to be at depth {}. Update the list?",
                            owner, el.l_tree_depth, expected
                        ),
                    )
                    .value("found", el.l_tree_depth as u64)
                    .value("fixed", expected as u64),
                )
            {
                el.l_tree_depth = expected;
                *changed = true;
            }
        }

        let slots = u16::try_from(el.l_recs.len()).unwrap_or(u16::MAX);
        let structural_max = max_recs.min(slots);

        if el.l_count > structural_max
            && self.prompt(
                Prompt::new(
                    Problem::ExtentListCount,
                    owner,
                    location,
                    format!(
                        "Extent list in owner {} claims to have {} records, \
                         but the maximum is {}. Fix the list's count?",
                        owner, el.l_count, structural_max
                    ),
                )
                .value("found", el.l_count as u64)
                .value("fixed", structural_max as u64),
            )
        {
            el.l_count = structural_max;
            *changed = true;
        }

        let capacity = structural_max.min(el.l_count);

        let mut trust_next_free = true;
        if el.l_next_free_rec > capacity {
            if self.prompt(
                Prompt::new(
                    Problem::ExtentListNextFree,
                    owner,
                    location,
                    format!(
                        "Extent list in owner {} claims {} as the next free record, \
                         but the largest valid value is {}. Clamp the next record value?",
                        owner, el.l_next_free_rec, capacity
                    ),
                )
                .value("found", el.l_next_free_rec as u64)
                .value("fixed", capacity as u64),
            ) {
                el.l_next_free_rec = capacity;
                *changed = true;
            } else {
                trust_next_free = false;
            }
        }

        let mut bound = if trust_next_free {
            el.l_next_free_rec as usize
        } else {
            capacity as usize
        };

        let mut i = 0;
        while i < bound {
            let depth = el.l_tree_depth;
            let clusters = el.l_recs[i].clusters(depth);

            // A sparse file may start with an empty interior record.
            if self.volume.supports_sparse_alloc() && depth > 0 && i == 0 && clusters == 0 {
                i += 1;
                continue;
            }

            let site = RecordSite {
                location,
                index: i,
                tree_depth: depth,
            };
            self.check_er(ctx, site, &mut el.l_recs[i], changed)?;

            let blkno = el.l_recs[i].e_blkno;
            if self.volume.block_out_of_range(blkno) {
                if !trust_next_free {
                    warn!(
                        "extent record {} in owner {} refers to out-of-range block {}, \
                         but it can't be removed because the next free record count \
                         wasn't fixed",
                        i, owner, blkno
                    );
                } else if self.prompt(
                    Prompt::new(
                        Problem::ExtentBlknoRange,
                        owner,
                        location,
                        format!(
                            "Extent record {} in owner {} refers to a block that is out \
                             of range. Remove this record from the extent list?",
                            i, owner
                        ),
                    )
                    .value("index", i as u64)
                    .value("blkno", blkno)
                    .value("next_free", el.l_next_free_rec as u64),
                ) {
                    el.remove_rec(i, bound);
                    bound -= 1;
                    *changed = true;
                    // the record that moved into slot i is looked at next
                    continue;
                }
                // kept but unusable: its clusters belong to nobody
                i += 1;
                continue;
            }

            // interior records are accounted with their extent block allocator
            if depth > 0 {
                i += 1;
                continue;
            }

            let rec = el.l_recs[i];
            let clusters = rec.clusters(depth);
            if clusters == 0 {
                warn!(
                    "extent record {} in owner {} at cpos {} covers no clusters",
                    i, owner, rec.e_cpos
                );
            }

            let policy = ctx.policy();
            policy.account_leaf(self, ctx.owner(), &rec, clusters)?;

            ctx.clusters += clusters as u64;
            let max_size = (rec.e_cpos as u64 + clusters as u64) << self.volume.clustersize_bits;
            if max_size > ctx.max_size {
                ctx.max_size = max_size;
            }
            i += 1;
        }

        Ok(())
    }
}
