//! Checkpoint window resolution.
//!
//! A transaction at height `h` is proven against the two lattice points that bracket it.
//! The verifier then only ever needs `step` headers per proof, however far `h` is from
//! the initial checkpoint.

use tracing::debug;

use crate::{
    error::{ProofError, ProofResult},
    provider::Provider,
    types::{BlockInfo, Lattice},
};

/// The two checkpoints bracketing a block height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckpointWindow {
    pub prev: u64,
    pub next: u64,
}

impl CheckpointWindow {
    /// `prev = initial + floor((h - initial) / step) * step`, `next = prev + step`.
    pub fn resolve(lattice: Lattice, block_height: u64) -> ProofResult<Self> {
        if lattice.step == 0 {
            return Err(ProofError::ValueRange("checkpoint step must be positive".into()));
        }
        if block_height < lattice.initial_height {
            return Err(ProofError::HeightBelowCheckpoint {
                height: block_height,
                initial_height: lattice.initial_height,
            });
        }
        let index = (block_height - lattice.initial_height) / lattice.step;
        let prev = lattice.initial_height + index * lattice.step;
        let next = prev
            .checked_add(lattice.step)
            .ok_or_else(|| ProofError::ValueRange(format!("checkpoint after {prev} overflows")))?;
        Ok(CheckpointWindow { prev, next })
    }

    pub fn contains(&self, height: u64) -> bool {
        self.prev <= height && height <= self.next
    }
}

/// A window split around the containing block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowBlocks {
    pub this_block: BlockInfo,
    /// Heights in `(prev, block_height)`.
    pub parents: Vec<BlockInfo>,
    /// Heights in `(block_height, next]`.
    pub children: Vec<BlockInfo>,
}

/// Splits the blocks of `[prev, next]` around `block_height`.
///
/// Every height of the window must be present exactly once. The previous checkpoint
/// itself is trusted by the verifier and is dropped; the next checkpoint is kept as the
/// last child.
pub fn partition(
    window: CheckpointWindow,
    block_height: u64,
    mut blocks: Vec<BlockInfo>,
) -> ProofResult<WindowBlocks> {
    let inconsistent = |reason: String| ProofError::InconsistentRange {
        start: window.prev,
        end: window.next,
        reason,
    };

    if let Some(stray) = blocks.iter().find(|b| !window.contains(b.height)) {
        return Err(inconsistent(format!("unexpected block at height {}", stray.height)));
    }
    match blocks.iter().filter(|b| b.height == block_height).count() {
        0 => return Err(inconsistent(format!("height {block_height} is missing"))),
        1 => {}
        _ => return Err(inconsistent(format!("height {block_height} appears twice"))),
    }
    blocks.sort_by_key(|b| b.height);
    if let Some(gap) = (window.prev..=window.next)
        .zip(blocks.iter().map(|b| b.height).chain(std::iter::repeat(u64::MAX)))
        .find(|(expected, found)| expected != found)
    {
        return Err(inconsistent(format!(
            "expected {} consecutive blocks, got {} (first gap at {})",
            window.next - window.prev + 1,
            blocks.len(),
            gap.0
        )));
    }
    if blocks.len() as u64 != window.next - window.prev + 1 {
        return Err(inconsistent(format!(
            "expected {} consecutive blocks, got {}",
            window.next - window.prev + 1,
            blocks.len()
        )));
    }

    let mut this_block = None;
    let mut parents = Vec::new();
    let mut children = Vec::new();
    for block in blocks {
        if block.height == block_height {
            this_block = Some(block);
        } else if block.height < block_height {
            if block.height > window.prev {
                parents.push(block);
            }
        } else {
            children.push(block);
        }
    }

    let this_block =
        this_block.ok_or_else(|| inconsistent(format!("height {block_height} is missing")))?;
    Ok(WindowBlocks {
        this_block,
        parents,
        children,
    })
}

/// Fetches `[prev, next]` in one batched provider call and partitions it.
pub async fn fetch_window<P: Provider + ?Sized>(
    provider: &P,
    lattice: Lattice,
    block_height: u64,
) -> ProofResult<WindowBlocks> {
    let window = CheckpointWindow::resolve(lattice, block_height)?;
    debug!(
        block_height,
        step = lattice.step,
        initial_height = lattice.initial_height,
        prev = window.prev,
        next = window.next,
        "fetching checkpoint window"
    );
    let blocks = provider.get_blocks_in_range(window.prev, window.next).await?;
    partition(window, block_height, blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{block_at, MockProvider};

    fn lattice(step: u64, initial: u64) -> Lattice {
        Lattice::new(step, initial).unwrap()
    }

    #[test]
    fn test_resolve_brackets_height() {
        let w = CheckpointWindow::resolve(lattice(10, 100), 107).unwrap();
        assert_eq!(w, CheckpointWindow { prev: 100, next: 110 });

        let w = CheckpointWindow::resolve(lattice(10, 100), 100).unwrap();
        assert_eq!(w, CheckpointWindow { prev: 100, next: 110 });

        let w = CheckpointWindow::resolve(lattice(10, 100), 110).unwrap();
        assert_eq!(w, CheckpointWindow { prev: 110, next: 120 });
    }

    #[test]
    fn test_resolve_bounds_hold_across_lattices() {
        for step in [1u64, 2, 7, 10, 144, 2016] {
            for initial in [0u64, 3, 100, 840_000] {
                for offset in 0..(3 * step + 5) {
                    let h = initial + offset;
                    let w = CheckpointWindow::resolve(lattice(step, initial), h).unwrap();
                    assert!(w.prev <= h && h <= w.next, "{step} {initial} {h}");
                    assert_eq!(w.next - w.prev, step);
                    assert_eq!((w.prev - initial) % step, 0);
                }
            }
        }
    }

    #[test]
    fn test_resolve_below_initial_height() {
        assert_eq!(
            CheckpointWindow::resolve(lattice(10, 100), 99),
            Err(ProofError::HeightBelowCheckpoint {
                height: 99,
                initial_height: 100
            })
        );
    }

    #[test]
    fn test_partition_excludes_previous_checkpoint() {
        let window = CheckpointWindow { prev: 100, next: 110 };
        let blocks = (100..=110).rev().map(block_at).collect();
        let split = partition(window, 107, blocks).unwrap();

        assert_eq!(split.this_block.height, 107);
        let parents: Vec<u64> = split.parents.iter().map(|b| b.height).collect();
        let children: Vec<u64> = split.children.iter().map(|b| b.height).collect();
        assert_eq!(parents, (101..=106).collect::<Vec<_>>());
        assert_eq!(children, vec![108, 109, 110]);
    }

    #[test]
    fn test_partition_at_checkpoint_has_no_parents() {
        let window = CheckpointWindow { prev: 100, next: 110 };
        let blocks = (100..=110).map(block_at).collect();
        let split = partition(window, 100, blocks).unwrap();
        assert!(split.parents.is_empty());
        assert_eq!(split.children.len(), 10);
    }

    #[test]
    fn test_partition_rejects_missing_or_duplicate_self() {
        let window = CheckpointWindow { prev: 100, next: 110 };

        let missing: Vec<_> = (100..=110).filter(|h| *h != 107).map(block_at).collect();
        assert!(matches!(
            partition(window, 107, missing),
            Err(ProofError::InconsistentRange { start: 100, end: 110, .. })
        ));

        let mut duplicated: Vec<_> = (100..=110).map(block_at).collect();
        duplicated.push(block_at(107));
        assert!(matches!(
            partition(window, 107, duplicated),
            Err(ProofError::InconsistentRange { .. })
        ));

        let stray: Vec<_> = (100..=111).map(block_at).collect();
        assert!(matches!(
            partition(window, 107, stray),
            Err(ProofError::InconsistentRange { .. })
        ));
    }

    #[test]
    fn test_partition_rejects_incomplete_window() {
        let window = CheckpointWindow { prev: 100, next: 110 };

        let cut_at_tip: Vec<_> = (100..=108).map(block_at).collect();
        assert!(matches!(
            partition(window, 107, cut_at_tip),
            Err(ProofError::InconsistentRange { start: 100, end: 110, .. })
        ));

        let gap: Vec<_> = (100..=110).filter(|h| *h != 103).map(block_at).collect();
        assert!(matches!(
            partition(window, 107, gap),
            Err(ProofError::InconsistentRange { .. })
        ));

        let no_checkpoint: Vec<_> = (101..=110).map(block_at).collect();
        assert!(matches!(
            partition(window, 107, no_checkpoint),
            Err(ProofError::InconsistentRange { .. })
        ));

        let mut repeated_child: Vec<_> = (100..=110).map(block_at).collect();
        repeated_child.push(block_at(109));
        assert!(matches!(
            partition(window, 107, repeated_child),
            Err(ProofError::InconsistentRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_window_below_chain_tip() {
        let provider = MockProvider::with_chain(90, 108);
        assert!(matches!(
            fetch_window(&provider, lattice(10, 100), 107).await,
            Err(ProofError::InconsistentRange { start: 100, end: 110, .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_window_uses_single_range_request() {
        let provider = MockProvider::with_chain(90, 130);
        let split = fetch_window(&provider, lattice(10, 100), 107).await.unwrap();

        assert_eq!(provider.range_requests(), vec![(100, 110)]);
        assert_eq!(split.this_block.height, 107);
        assert_eq!(split.parents.first().map(|b| b.height), Some(101));
        assert_eq!(split.children.last().map(|b| b.height), Some(110));
    }
}
