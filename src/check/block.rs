use log::{error, warn};

use super::{Checker, WalkContext, MAX_TREE_DEPTH};
use crate::error::Result;
use crate::extent::extent_recs_per_eb;
use crate::problem::{Problem, Prompt};

impl Checker<'_> {
    /// Checks the extent block at `blkno` and the list inside it.
    ///
    /// Returns `Ok(false)` when the block cannot be trusted: its signature is
    /// wrong, the walk is already too deep, or its stale generation was
    /// accepted as grounds to drop it. Any other read or write failure is an
    /// error.
    pub(crate) fn check_eb(&mut self, ctx: &mut WalkContext<'_>, blkno: u64) -> Result<bool> {
        let owner = ctx.owner().id();

        if ctx.level() >= MAX_TREE_DEPTH {
            warn!(
                "extent block {} in owner {} is more than {} levels below the root",
                blkno, owner, MAX_TREE_DEPTH
            );
            return Ok(false);
        }

        let mut eb = match self.io.read_extent_block(blkno) {
            Ok(eb) => eb,
            Err(e) if e.is_bad_signature() => {
                error!(
                    "reading extent block at {} in owner {} for verification: {}",
                    blkno, owner, e
                );
                return Ok(false);
            }
            Err(e) => {
                error!(
                    "reading extent block at {} in owner {} for verification: {}",
                    blkno, owner, e
                );
                return Err(e);
            }
        };

        let mut changed = false;

        if eb.h_blkno != blkno
            && self.prompt(
                Prompt::new(
                    Problem::ExtentBlockBlkno,
                    owner,
                    blkno,
                    format!(
                        "An extent block at {} in owner {} claims to be located at \
                         block {}. Update the extent block's location?",
                        blkno, owner, eb.h_blkno
                    ),
                )
                .value("found", eb.h_blkno)
                .value("fixed", blkno),
            )
        {
            eb.h_blkno = blkno;
            changed = true;
        }

        let generation = self.volume.fs_generation;
        if eb.h_fs_generation != generation {
            if self.prompt(
                Prompt::new(
                    Problem::ExtentBlockGeneration,
                    owner,
                    blkno,
                    format!(
                        "An extent block at {} in owner {} has a generation of {:x} \
                         which doesn't match the volume's generation of {:x}. Consider \
                         this extent block invalid?",
                        blkno, owner, eb.h_fs_generation, generation
                    ),
                )
                .value("found", eb.h_fs_generation as u64)
                .value("expected", generation as u64),
            ) {
                return Ok(false);
            }
            if self.prompt(
                Prompt::new(
                    Problem::ExtentBlockGenerationFix,
                    owner,
                    blkno,
                    format!(
                        "Update the generation of extent block {} from {:x} to match \
                         the volume's {:x}?",
                        blkno, eb.h_fs_generation, generation
                    ),
                )
                .value("found", eb.h_fs_generation as u64)
                .value("fixed", generation as u64),
            ) {
                eb.h_fs_generation = generation;
                changed = true;
            }
        }

        let max_recs = extent_recs_per_eb(eb.block_size());
        ctx.level += 1;
        let checked = self.check_el(ctx, blkno, &mut eb.h_list, max_recs, &mut changed);
        ctx.level -= 1;
        checked?;

        if changed {
            if let Err(e) = self.io.write_extent_block(blkno, &eb) {
                error!(
                    "while writing an updated extent block at {} for owner {}: {}",
                    blkno, owner, e
                );
                return Err(e);
            }
        }

        Ok(true)
    }
}
