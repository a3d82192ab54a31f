/// Tree-shaped logical clock.
///
/// A `TreeClock` is a version vector whose keys are member [`Id`]s, stored as
/// a tree that mirrors the Id hierarchy. Each node counts the events produced
/// by the member at that path. Clocks are persistent values: `increment`,
/// `merge` and `with_member` return a new clock and leave `self` untouched.
///
/// **Wire format:** positional CBOR. A node is the array
/// `[counter, child_0, child_1, ...]` where a child's fork sequence is its
/// array position (`null` marks a sequence the clock has no branch for). The
/// clock itself is the array of founder nodes. Ids are never written out, so a
/// leaf costs two bytes.

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

use crate::messaging::id::Id;

#[derive(Error, Debug)]
pub enum ClockError {
    #[error("Clock encoding failed: {0}")]
    Encode(String),

    #[error("Clock decoding failed: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// ClockNode
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct ClockNode {
    counter: u64,
    children: BTreeMap<u32, ClockNode>,
}

impl ClockNode {
    /// A subtree that carries no events at all.
    fn is_zero(&self) -> bool {
        self.counter == 0 && self.children.values().all(ClockNode::is_zero)
    }
}

/// Pointwise max of `from` into `into`, grafting branches `into` lacks.
fn merge_branches(into: &mut BTreeMap<u32, ClockNode>, from: &BTreeMap<u32, ClockNode>) {
    for (seq, theirs) in from {
        let ours = into.entry(*seq).or_default();
        ours.counter = ours.counter.max(theirs.counter);
        merge_branches(&mut ours.children, &theirs.children);
    }
}

/// Whether every counter under `ours` is ≤ its counterpart under `theirs`.
fn branches_le(ours: &BTreeMap<u32, ClockNode>, theirs: &BTreeMap<u32, ClockNode>) -> bool {
    ours.iter().all(|(seq, node)| match theirs.get(seq) {
        Some(other) => node.counter <= other.counter && branches_le(&node.children, &other.children),
        None => node.is_zero(),
    })
}

fn collect_ids(branches: &BTreeMap<u32, ClockNode>, prefix: &mut Vec<u32>, out: &mut BTreeSet<Id>) {
    for (seq, node) in branches {
        prefix.push(*seq);
        if let Some(id) = Id::from_path(prefix.clone()) {
            out.insert(id);
        }
        collect_ids(&node.children, prefix, out);
        prefix.pop();
    }
}

/// Ids present under `theirs` but missing from `ours`.
fn collect_missing(
    ours: Option<&BTreeMap<u32, ClockNode>>,
    theirs: &BTreeMap<u32, ClockNode>,
    prefix: &mut Vec<u32>,
    out: &mut BTreeSet<Id>,
) {
    for (seq, node) in theirs {
        prefix.push(*seq);
        let mine = ours.and_then(|branches| branches.get(seq));
        if mine.is_none() {
            if let Some(id) = Id::from_path(prefix.clone()) {
                out.insert(id);
            }
        }
        collect_missing(mine.map(|n| &n.children), &node.children, prefix, out);
        prefix.pop();
    }
}

// ---------------------------------------------------------------------------
// TreeClock
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeClock {
    roots: BTreeMap<u32, ClockNode>,
}

impl TreeClock {
    /// Clock containing exactly `ids`, all counters zero.
    pub fn init<'a, I>(ids: I) -> Self
    where
        I: IntoIterator<Item = &'a Id>,
    {
        let mut clock = TreeClock::default();
        for id in ids {
            clock.node_mut(id);
        }
        clock
    }

    /// Copy of this clock with a zero branch grafted for `id`.
    pub fn with_member(&self, id: &Id) -> Self {
        let mut next = self.clone();
        next.node_mut(id);
        next
    }

    /// Copy of this clock with `owner`'s counter advanced by one.
    pub fn increment(&self, owner: &Id) -> Self {
        let mut next = self.clone();
        next.node_mut(owner).counter += 1;
        next
    }

    /// Least upper bound of the two clocks.
    pub fn merge(&self, other: &TreeClock) -> Self {
        let mut next = self.clone();
        merge_branches(&mut next.roots, &other.roots);
        next
    }

    /// `self <= other` in the causal partial order (missing branches count as zero).
    pub fn is_before_or_equal(&self, other: &TreeClock) -> bool {
        branches_le(&self.roots, &other.roots)
    }

    /// Ids that have a branch in `other` but not in `self`.
    pub fn new_members_from(&self, other: &TreeClock) -> BTreeSet<Id> {
        let mut out = BTreeSet::new();
        collect_missing(Some(&self.roots), &other.roots, &mut Vec::new(), &mut out);
        out
    }

    /// Compare causally: `None` when neither clock dominates the other.
    pub fn causal_cmp(&self, other: &TreeClock) -> Option<Ordering> {
        match (self.is_before_or_equal(other), other.is_before_or_equal(self)) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => None,
        }
    }

    pub fn is_concurrent_with(&self, other: &TreeClock) -> bool {
        self.causal_cmp(other).is_none()
    }

    /// Event count recorded for `id` (zero when the branch is absent).
    pub fn counter(&self, id: &Id) -> u64 {
        self.node(id).map(|n| n.counter).unwrap_or(0)
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.node(id).is_some()
    }

    /// Every Id with a branch in this clock, parents first.
    pub fn ids(&self) -> BTreeSet<Id> {
        let mut out = BTreeSet::new();
        collect_ids(&self.roots, &mut Vec::new(), &mut out);
        out
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ClockError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| ClockError::Encode(e.to_string()))?;
        Ok(buf)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, ClockError> {
        ciborium::from_reader(bytes).map_err(|e| ClockError::Decode(e.to_string()))
    }

    fn node(&self, id: &Id) -> Option<&ClockNode> {
        let (first, rest) = id.path().split_first()?;
        let mut node = self.roots.get(first)?;
        for seq in rest {
            node = node.children.get(seq)?;
        }
        Some(node)
    }

    /// Walk to `id`, grafting zero nodes along the way.
    fn node_mut(&mut self, id: &Id) -> &mut ClockNode {
        let mut path = id.path().iter();
        // Id paths are never empty.
        let first = path.next().copied().unwrap_or_default();
        let mut node = self.roots.entry(first).or_default();
        for seq in path {
            node = node.children.entry(*seq).or_default();
        }
        node
    }
}

impl fmt::Display for TreeClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for id in self.ids() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", id, self.counter(&id))?;
            first = false;
        }
        write!(f, "}}")
    }
}

// ---------------------------------------------------------------------------
// Positional encoding
// ---------------------------------------------------------------------------

/// Children laid out by fork sequence, `None` for gaps.
fn dense_slots(branches: &BTreeMap<u32, ClockNode>) -> Vec<Option<&ClockNode>> {
    let width = branches.keys().next_back().map(|last| *last as usize + 1).unwrap_or(0);
    (0..width).map(|i| branches.get(&(i as u32))).collect()
}

fn read_slots<'de, A: SeqAccess<'de>>(seq: &mut A) -> Result<BTreeMap<u32, ClockNode>, A::Error> {
    let mut branches = BTreeMap::new();
    let mut position: u32 = 0;
    while let Some(slot) = seq.next_element::<Option<ClockNode>>()? {
        if let Some(node) = slot {
            branches.insert(position, node);
        }
        position = position
            .checked_add(1)
            .ok_or_else(|| de::Error::custom("clock branch index overflow"))?;
    }
    Ok(branches)
}

impl Serialize for ClockNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let slots = dense_slots(&self.children);
        let mut seq = serializer.serialize_seq(Some(slots.len() + 1))?;
        seq.serialize_element(&self.counter)?;
        for slot in &slots {
            seq.serialize_element(slot)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for ClockNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NodeVisitor;

        impl<'de> Visitor<'de> for NodeVisitor {
            type Value = ClockNode;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a clock node array [counter, children...]")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<ClockNode, A::Error> {
                let counter: u64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let children = read_slots(&mut seq)?;
                Ok(ClockNode { counter, children })
            }
        }

        deserializer.deserialize_seq(NodeVisitor)
    }
}

impl Serialize for TreeClock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let slots = dense_slots(&self.roots);
        let mut seq = serializer.serialize_seq(Some(slots.len()))?;
        for slot in &slots {
            seq.serialize_element(slot)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for TreeClock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ClockVisitor;

        impl<'de> Visitor<'de> for ClockVisitor {
            type Value = TreeClock;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an array of founder clock nodes")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<TreeClock, A::Error> {
                Ok(TreeClock { roots: read_slots(&mut seq)? })
            }
        }

        deserializer.deserialize_seq(ClockVisitor)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
