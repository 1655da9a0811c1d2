//! Best-first frontier of candidates awaiting refinement.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ab_model::{compare_scores, Candidate, InstanceTree};

/// Priority queue of open candidates.
///
/// Pop order: first-generation roots ahead of everything else (in insertion
/// order), then candidates with a scored report, lower score first, then
/// reports without any score, then candidates with no report at all. Equal
/// ranks pop in insertion order.
#[derive(Debug, Default)]
pub struct Frontier {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    high_water: usize,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: Candidate) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { seq, candidate });
        self.high_water = self.high_water.max(self.heap.len());
    }

    pub fn pop(&mut self) -> Option<Candidate> {
        self.heap.pop().map(|entry| entry.candidate)
    }

    pub fn peek(&self) -> Option<&Candidate> {
        self.heap.peek().map(|entry| &entry.candidate)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Largest size the frontier has reached.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Attach (or extend) the candidate's report and put it back.
    pub fn close(
        &mut self,
        mut refinement: Candidate,
        witnesses: Vec<InstanceTree>,
        scores: Vec<Option<f64>>,
    ) {
        refinement.record_results(witnesses, scores);
        self.push(refinement);
    }

    pub fn is_closed(&self, candidate: &Candidate) -> bool {
        candidate.is_closed()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.heap.iter().map(|entry| &entry.candidate)
    }
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    candidate: Candidate,
}

impl Entry {
    /// `Less` when `self` should pop before `other`.
    fn rank(&self, other: &Self) -> Ordering {
        let (a, b) = (&self.candidate, &other.candidate);
        let by_generation = b.is_first_generation().cmp(&a.is_first_generation());
        if by_generation != Ordering::Equal || a.is_first_generation() {
            return by_generation.then(self.seq.cmp(&other.seq));
        }
        let by_report = b.is_closed().cmp(&a.is_closed());
        if by_report != Ordering::Equal || !a.is_closed() {
            return by_report.then(self.seq.cmp(&other.seq));
        }
        compare_scores(a.score(), b.score()).then(self.seq.cmp(&other.seq))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap pops the greatest entry.
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank(other).reverse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_model::{Phase, RefinementRecord};
    use ab_types::Component;
    use std::sync::Arc;

    fn tree(name: &str) -> InstanceTree {
        InstanceTree::new(Arc::new(Component::new(name)))
    }

    fn root(name: &str) -> Candidate {
        Candidate::root(tree(name))
    }

    fn child(name: &str) -> Candidate {
        let t = tree(name);
        root("parent").derive(t.clone(), Phase::tuning(&t), RefinementRecord::Promotion)
    }

    fn scored(name: &str, score: Option<f64>) -> Candidate {
        let mut c = child(name);
        c.record_results(vec![tree(name)], vec![score]);
        c
    }

    fn name(candidate: &Candidate) -> String {
        candidate.tree().root().component().name.clone()
    }

    #[test]
    fn lower_score_pops_first() {
        let mut frontier = Frontier::new();
        frontier.push(scored("worse", Some(0.7)));
        frontier.push(scored("better", Some(0.3)));
        assert_eq!(name(&frontier.pop().unwrap()), "better");
        assert_eq!(name(&frontier.pop().unwrap()), "worse");
        assert!(frontier.pop().is_none());
    }

    #[test]
    fn first_generation_beats_any_score() {
        let mut frontier = Frontier::new();
        frontier.push(scored("refined", Some(-100.0)));
        frontier.push(root("root"));
        assert_eq!(name(&frontier.pop().unwrap()), "root");
    }

    #[test]
    fn first_generation_roots_pop_in_insertion_order() {
        let mut frontier = Frontier::new();
        for n in ["a", "b", "c"] {
            frontier.push(root(n));
        }
        let order: Vec<String> = std::iter::from_fn(|| frontier.pop()).map(|c| name(&c)).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn unreported_and_unscored_rank_last() {
        let mut frontier = Frontier::new();
        frontier.push(child("open"));
        frontier.push(scored("no-score", None));
        frontier.push(scored("scored", Some(5.0)));
        frontier.push(child("open-2"));
        let order: Vec<String> = std::iter::from_fn(|| frontier.pop()).map(|c| name(&c)).collect();
        assert_eq!(order, vec!["scored", "no-score", "open", "open-2"]);
        assert_eq!(frontier.high_water(), 4);
    }

    #[test]
    fn close_attaches_report_and_reinserts() {
        let mut frontier = Frontier::new();
        let candidate = child("c");
        assert!(!frontier.is_closed(&candidate));
        frontier.close(candidate, vec![tree("c")], vec![Some(1.5)]);
        let popped = frontier.pop().unwrap();
        assert!(frontier.is_closed(&popped));
        assert_eq!(popped.score(), Some(1.5));

        frontier.close(popped, vec![tree("c")], vec![Some(0.5)]);
        let popped = frontier.pop().unwrap();
        assert_eq!(popped.witness_count(), 2);
        assert_eq!(popped.score(), Some(0.5));
    }
}
