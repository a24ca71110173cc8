//! Priority queue and search models for the enumerative searcher.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use restitch_core::Program;

/// Assigns priorities to partial programs; lower runs first.
pub trait SearchModel {
    fn priority(&mut self, prog: &Program) -> f64;
}

/// Size-first search: smaller programs first.
#[derive(Debug, Default)]
pub struct SizeModel;

impl SearchModel for SizeModel {
    fn priority(&mut self, prog: &Program) -> f64 {
        prog.node_count() as f64
    }
}

/// Uniform-random search order, deterministic for a fixed seed.
#[derive(Debug)]
pub struct RandomModel {
    rng: StdRng,
}

impl RandomModel {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl SearchModel for RandomModel {
    fn priority(&mut self, _prog: &Program) -> f64 {
        self.rng.gen_range(0.0, 1.0)
    }
}

struct Entry<T> {
    priority: f64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the minimum first.
        // Ties break by insertion order (earlier first).
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-priority worklist with deterministic tie-breaking by insertion order.
pub struct PriorityQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    seq: u64,
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    pub fn push(&mut self, priority: f64, item: T) {
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(Entry {
            priority,
            seq,
            item,
        });
    }

    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|e| e.item)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
