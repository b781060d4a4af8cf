use log::debug;

use super::{Checker, RecordSite, WalkContext};
use crate::error::Result;
use crate::extent::ExtentRecord;
use crate::problem::{Problem, Prompt};

impl Checker<'_> {
    /// Checks one live record.
    ///
    /// Out-of-range targets are left alone here; the list check decides
    /// whether to remove the record. Interior records descend into their
    /// extent block, leaves go to the walk's leaf policy.
    pub(crate) fn check_er(
        &mut self,
        ctx: &mut WalkContext<'_>,
        site: RecordSite,
        rec: &mut ExtentRecord,
        changed: &mut bool,
    ) -> Result<()> {
        debug!(
            "cpos {} clusters {} blkno {}",
            rec.e_cpos,
            rec.clusters(site.tree_depth),
            rec.e_blkno
        );

        if self.volume.block_out_of_range(rec.e_blkno) {
            return Ok(());
        }

        if site.tree_depth > 0 {
            let owner = ctx.owner().id();
            ctx.expected_depth = Some(site.tree_depth - 1);
            let is_valid = self.check_eb(ctx, rec.e_blkno)?;
            if !is_valid
                && self.prompt(
                    Prompt::new(
                        Problem::ExtentBlockInvalid,
                        owner,
                        site.location,
                        format!(
                            "The extent record for cluster offset {} in owner {} refers \
                             to an invalid extent block at {}. Clear the reference to \
                             this invalid block?",
                            rec.e_cpos, owner, rec.e_blkno
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
            return Ok(());
        }

        let policy = ctx.policy();
        policy.validate_leaf(self, ctx.owner(), site, rec, changed)
    }
}
