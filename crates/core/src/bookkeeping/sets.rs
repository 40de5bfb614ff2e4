//! Per-run fragment classification.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::fragment::Fragment;

/// How each listing is turned into the next batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulationPolicy {
    /// Only fragments never dispatched before form a batch.
    #[default]
    Delta,
    /// Every batch re-submits the whole current listing, including fragments
    /// that earlier jobs already received. Downstream jobs must be idempotent.
    FullRelist,
}

/// Outcome of classifying one listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    /// Fragments seen for the first time.
    pub newly_observed: usize,
    /// Fragments pending dispatch after this listing.
    pub pending: usize,
    /// Already dispatched fragments still present in the listing.
    pub relisted: usize,
}

/// The bookkeeping sets of the active run.
///
/// `dispatched` only grows, and `to_process` never shares a fragment with it.
/// The staged batch sits between the two while a job is being rendered and
/// launched. Fragments whose data was missing when a batch was prepared are
/// retired into `excluded` and never become pending again.
#[derive(Debug, Clone, Default)]
pub struct FragmentSets {
    observed: BTreeSet<Fragment>,
    to_process: BTreeSet<Fragment>,
    relisted: BTreeSet<Fragment>,
    staged: BTreeSet<Fragment>,
    dispatched: BTreeSet<Fragment>,
    excluded: BTreeSet<Fragment>,
    expected_outputs: BTreeSet<String>,
    terminal: bool,
    jobs_rendered: u32,
}

impl FragmentSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a full listing of the watched location into the sets.
    pub fn classify(&mut self, available: BTreeSet<Fragment>) -> Classification {
        let before = self.observed.len();
        self.observed.extend(available.iter().cloned());

        let (relisted, to_process): (BTreeSet<_>, BTreeSet<_>) = available
            .into_iter()
            .filter(|fragment| !self.excluded.contains(fragment))
            .partition(|fragment| self.dispatched.contains(fragment));
        self.to_process = to_process;
        self.relisted = relisted;

        Classification {
            newly_observed: self.observed.len() - before,
            pending: self.to_process.len(),
            relisted: self.relisted.len(),
        }
    }

    /// Whether any fragment is waiting for dispatch.
    pub fn has_pending(&self) -> bool {
        !self.to_process.is_empty()
    }

    /// Whether a non-final batch should be prepared now.
    pub fn is_ready(&self, policy: AccumulationPolicy, minimum_batch: usize) -> bool {
        match policy {
            AccumulationPolicy::Delta => self.to_process.len() >= minimum_batch,
            AccumulationPolicy::FullRelist => {
                self.has_pending() && self.to_process.len() + self.relisted.len() >= minimum_batch
            }
        }
    }

    /// Fragments the next batch would contain, before validation.
    pub fn candidate_batch(&self, policy: AccumulationPolicy) -> BTreeSet<Fragment> {
        match policy {
            AccumulationPolicy::Delta => self.to_process.clone(),
            AccumulationPolicy::FullRelist => {
                self.to_process.union(&self.relisted).cloned().collect()
            }
        }
    }

    /// Stage a validated batch. `terminal` marks the run's final batch and is
    /// never cleared until reset.
    pub fn stage(&mut self, batch: BTreeSet<Fragment>, terminal: bool) {
        self.staged = batch;
        self.terminal |= terminal;
    }

    /// Retire fragments left out of a batch because their data is missing.
    /// Returns how many were retired for the first time.
    pub fn exclude<I>(&mut self, fragments: I) -> usize
    where
        I: IntoIterator<Item = Fragment>,
    {
        let before = self.excluded.len();
        for fragment in fragments {
            self.to_process.remove(&fragment);
            self.relisted.remove(&fragment);
            self.excluded.insert(fragment);
        }
        self.excluded.len() - before
    }

    /// Record that the staged batch was rendered into a job producing
    /// `outputs`. Pending fragments are consumed, including any that failed
    /// validation. Returns the number of jobs rendered so far.
    pub fn commit_render<I>(&mut self, outputs: I) -> u32
    where
        I: IntoIterator<Item = String>,
    {
        self.to_process.clear();
        self.relisted.clear();
        self.expected_outputs.extend(outputs);
        self.jobs_rendered += 1;
        self.jobs_rendered
    }

    /// Move the staged batch into `dispatched`. Returns how many fragments
    /// were dispatched for the first time.
    pub fn commit_dispatch(&mut self) -> usize {
        let staged = std::mem::take(&mut self.staged);
        let before = self.dispatched.len();
        self.dispatched.extend(staged);
        self.dispatched.len() - before
    }

    pub fn observed(&self) -> &BTreeSet<Fragment> {
        &self.observed
    }

    pub fn to_process(&self) -> &BTreeSet<Fragment> {
        &self.to_process
    }

    pub fn staged(&self) -> &BTreeSet<Fragment> {
        &self.staged
    }

    pub fn dispatched(&self) -> &BTreeSet<Fragment> {
        &self.dispatched
    }

    pub fn excluded(&self) -> &BTreeSet<Fragment> {
        &self.excluded
    }

    pub fn expected_outputs(&self) -> &BTreeSet<String> {
        &self.expected_outputs
    }

    /// Whether the final batch of the run has been staged.
    pub fn terminal(&self) -> bool {
        self.terminal
    }

    pub fn jobs_rendered(&self) -> u32 {
        self.jobs_rendered
    }

    /// `dispatched ∩ to_process = ∅`, `excluded ∩ to_process = ∅` and
    /// `to_process ⊆ observed`.
    pub fn is_consistent(&self) -> bool {
        self.to_process.is_disjoint(&self.dispatched)
            && self.to_process.is_disjoint(&self.excluded)
            && self.to_process.is_subset(&self.observed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(keys: &[u32]) -> BTreeSet<Fragment> {
        keys.iter()
            .map(|k| Fragment::new(format!("/store/run1/ls{:04}.root", k)).with_ordering_key(*k))
            .collect()
    }

    fn dispatch_all(sets: &mut FragmentSets, policy: AccumulationPolicy) {
        let batch = sets.candidate_batch(policy);
        sets.stage(batch, false);
        sets.commit_render(Vec::new());
        sets.commit_dispatch();
    }

    #[test]
    fn test_delta_excludes_dispatched() {
        let mut sets = FragmentSets::new();
        sets.classify(set(&[1, 2, 3]));
        dispatch_all(&mut sets, AccumulationPolicy::Delta);

        let c = sets.classify(set(&[1, 2, 3, 4]));
        assert_eq!(c.newly_observed, 1);
        assert_eq!(c.pending, 1);
        assert_eq!(c.relisted, 3);
        assert_eq!(sets.candidate_batch(AccumulationPolicy::Delta), set(&[4]));
        assert!(sets.is_consistent());
    }

    #[test]
    fn test_readiness_threshold() {
        let mut sets = FragmentSets::new();
        sets.classify(set(&[1, 2]));
        assert!(sets.has_pending());
        assert!(!sets.is_ready(AccumulationPolicy::Delta, 3));

        sets.classify(set(&[1, 2, 3]));
        assert!(sets.is_ready(AccumulationPolicy::Delta, 3));
    }

    #[test]
    fn test_full_relist_batch_contains_whole_listing() {
        let policy = AccumulationPolicy::FullRelist;
        let mut sets = FragmentSets::new();
        sets.classify(set(&[1]));
        assert!(sets.is_ready(policy, 1));
        dispatch_all(&mut sets, policy);

        // Nothing new: not ready even though the listing is large enough.
        sets.classify(set(&[1]));
        assert!(!sets.is_ready(policy, 1));

        sets.classify(set(&[1, 2]));
        assert!(sets.is_ready(policy, 2));
        assert!(!sets.is_ready(AccumulationPolicy::Delta, 2));
        assert_eq!(sets.candidate_batch(policy), set(&[1, 2]));
        assert_eq!(sets.to_process(), &set(&[2]));
        assert!(sets.is_consistent());
    }

    #[test]
    fn test_render_clears_pending_and_records_outputs() {
        let mut sets = FragmentSets::new();
        sets.classify(set(&[5, 6, 9]));
        sets.stage(set(&[5, 6]), false);

        let jobs = sets.commit_render(vec!["out.root".to_string()]);
        assert_eq!(jobs, 1);
        assert!(sets.to_process().is_empty());
        assert_eq!(sets.staged(), &set(&[5, 6]));
        assert!(sets.dispatched().is_empty());

        assert_eq!(sets.commit_dispatch(), 2);
        assert!(sets.staged().is_empty());
        assert_eq!(sets.dispatched(), &set(&[5, 6]));
        assert!(sets.expected_outputs().contains("out.root"));
    }

    #[test]
    fn test_terminal_flag_is_sticky() {
        let mut sets = FragmentSets::new();
        sets.stage(BTreeSet::new(), true);
        sets.stage(BTreeSet::new(), false);
        assert!(sets.terminal());
    }

    #[test]
    fn test_excluded_fragments_never_return() {
        let mut sets = FragmentSets::new();
        sets.classify(set(&[1, 2]));
        assert_eq!(sets.exclude(set(&[2])), 1);
        assert_eq!(sets.to_process(), &set(&[1]));

        sets.stage(set(&[1]), false);
        sets.commit_render(Vec::new());
        sets.commit_dispatch();

        let c = sets.classify(set(&[1, 2]));
        assert_eq!(c.pending, 0);
        assert_eq!(c.relisted, 1);
        assert!(!sets.has_pending());
        assert!(!sets.is_ready(AccumulationPolicy::Delta, 1));
        assert!(sets.candidate_batch(AccumulationPolicy::FullRelist).is_empty());
        assert_eq!(sets.excluded(), &set(&[2]));
        assert!(!sets.dispatched().contains(set(&[2]).iter().next().unwrap()));
        assert!(sets.is_consistent());
    }

    #[test]
    fn test_observed_never_shrinks() {
        let mut sets = FragmentSets::new();
        sets.classify(set(&[1, 2, 3]));
        sets.classify(set(&[2]));
        assert_eq!(sets.observed(), &set(&[1, 2, 3]));
        assert!(sets.is_consistent());
    }
}
