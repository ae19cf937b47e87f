//! Probabilistic sorted index over arena-resident keys.
//!
//! Nodes live in a plain `Vec` and link to each other by index, with
//! `NIL` as the end marker, so there are no self-referential pointers.
//! Key bytes stay in the arena; the list stores only [`ArenaSlice`]
//! handles and resolves them through the arena reference passed into
//! each operation.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::arena::{Arena, ArenaSlice};

const MAX_HEIGHT: usize = 12;
const BRANCHING: u32 = 4;

/// End-of-list marker.
const NIL: u32 = u32::MAX;

struct Node {
    key: ArenaSlice,
    /// `next[i]` is the successor at level `i`; levels above the node's
    /// height are absent.
    next: Vec<u32>,
}

/// Compares two raw index keys. Implementors decide what the bytes mean;
/// the memtable feeds length-prefixed internal-key entries through this.
pub trait KeyOrder {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

pub struct SkipList<O: KeyOrder> {
    order: O,
    /// `nodes[0]` is the head sentinel; its key is never read.
    nodes: Vec<Node>,
    max_height: usize,
    rng: StdRng,
}

impl<O: KeyOrder> SkipList<O> {
    pub fn new(order: O) -> SkipList<O> {
        SkipList {
            order,
            nodes: vec![Node {
                key: ArenaSlice::default(),
                next: vec![NIL; MAX_HEIGHT],
            }],
            max_height: 1,
            // fixed seed: height draws need no entropy, and determinism
            // makes failures reproducible
            rng: StdRng::seed_from_u64(0xdead_beef),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Inserts `key`. The caller guarantees no equal key is present:
    /// sequence numbers are unique per write, so duplicate internal keys
    /// cannot occur.
    pub fn insert(&mut self, arena: &Arena, key: ArenaSlice) {
        let mut prev = [0u32; MAX_HEIGHT];
        let found = self.find_greater_or_equal(arena, arena.slice(key), Some(&mut prev));
        debug_assert!(
            found == NIL
                || self
                    .order
                    .compare(arena.slice(self.nodes[found as usize].key), arena.slice(key))
                    != Ordering::Equal
        );

        let height = self.random_height();
        if height > self.max_height {
            // prev entries above the old height already point at the head
            self.max_height = height;
        }

        let new_index = self.nodes.len() as u32;
        let mut next = Vec::with_capacity(height);
        for (level, &p) in prev.iter().enumerate().take(height) {
            next.push(self.nodes[p as usize].next[level]);
        }
        self.nodes.push(Node { key, next });
        for (level, &p) in prev.iter().enumerate().take(height) {
            self.nodes[p as usize].next[level] = new_index;
        }
    }

    /// First entry ordering at or after `target`, if any.
    pub fn seek(&self, arena: &Arena, target: &[u8]) -> Option<ArenaSlice> {
        let node = self.find_greater_or_equal(arena, target, None);
        if node == NIL {
            None
        } else {
            Some(self.nodes[node as usize].key)
        }
    }

    /// First entry in order, if any.
    pub fn first(&self) -> Option<u32> {
        match self.nodes[0].next[0] {
            NIL => None,
            n => Some(n),
        }
    }

    /// The key at `node` and its successor, for iteration.
    pub fn key_and_next(&self, node: u32) -> (ArenaSlice, Option<u32>) {
        let n = &self.nodes[node as usize];
        let next = match n.next[0] {
            NIL => None,
            x => Some(x),
        };
        (n.key, next)
    }

    fn random_height(&mut self) -> usize {
        let mut height = 1;
        while height < MAX_HEIGHT && self.rng.gen_range(0..BRANCHING) == 0 {
            height += 1;
        }
        height
    }

    /// Returns the index of the first node whose key is >= `target`
    /// (`NIL` if none), filling `prev` with the rightmost node before the
    /// result at every level when requested.
    fn find_greater_or_equal(
        &self,
        arena: &Arena,
        target: &[u8],
        mut prev: Option<&mut [u32; MAX_HEIGHT]>,
    ) -> u32 {
        let mut node = 0u32; // head
        let mut level = self.max_height - 1;
        loop {
            let next = self.nodes[node as usize].next[level];
            let after = next != NIL
                && self
                    .order
                    .compare(arena.slice(self.nodes[next as usize].key), target)
                    == Ordering::Less;
            if after {
                node = next;
            } else {
                if let Some(prev) = prev.as_deref_mut() {
                    prev[level] = node;
                }
                if level == 0 {
                    return next;
                }
                level -= 1;
            }
        }
    }
}
