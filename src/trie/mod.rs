/*
 * Created on Tue Jul 28 2026
 *
 * This file is part of corestack, a foundational systems-toolbox library
 * providing mergeable priority queues, compressed tries, and adaptive
 * pooling/logging infrastructure for higher-level services.
 *
 * Copyright (c) 2026, The corestack developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! Compressed 16-ary nibble trie with path condensation.
//!
//! Keys are walked nibble by nibble (16-way branching), and only
//! value-bearing nodes are allowed to own a single branch — any node
//! that exists purely to fork paths must have at least two occupied
//! branch slots, so a removal that would leave a forking node with one
//! child instead dissolves that node into its parent's edge.
//!
//! Nodes live in a generation-tagged arena (`Vec<Slot<Node<T>>>`), the
//! same style used by [`crate::heap`], rather than as an owned tree of
//! boxed nodes with raw parent pointers. `Position` plays the role a raw
//! node pointer would for `insert_with_hint` / `lower_bound`, but a
//! stale one is rejected instead of dangling.
//!
//! Nibble order: for each byte of the key (bytes visited in the order the
//! caller's slice gives them), the high nibble is visited before the low
//! nibble. Keys are raw `&[u8]`; this sidesteps host-endianness questions
//! for the common case of UTF-8 byte keys.

use crate::error::{Error, ErrorKind, Result};

const ROOT: u32 = 0;

fn key_nibble_len(key: &[u8]) -> usize {
    key.len() * 2
}

fn nibble_at(key: &[u8], i: usize) -> u8 {
    let byte = key[i / 2];
    if i % 2 == 0 {
        byte >> 4
    } else {
        byte & 0x0f
    }
}

/// Nibbles of `key` from `from` (inclusive) to the end, one nibble per
/// element (each in `0..16`).
fn nibble_suffix(key: &[u8], from: usize) -> Vec<u8> {
    let total = key_nibble_len(key);
    (from..total).map(|i| nibble_at(key, i)).collect()
}

/// Count of nibbles `label` shares with `key` starting at `key_offset`,
/// capped by however much of `key` remains.
fn common_prefix_len(key: &[u8], key_offset: usize, label: &[u8]) -> usize {
    let key_len = key_nibble_len(key);
    let mut i = 0;
    while i < label.len() && key_offset + i < key_len {
        if nibble_at(key, key_offset + i) != label[i] {
            break;
        }
        i += 1;
    }
    i
}

/// Packs a nibble sequence of even length back into bytes, high nibble
/// first. Only ever called on a value node's reconstructed path, whose
/// length is always even because callers only ever insert whole byte
/// slices.
fn nibbles_to_bytes(nibbles: &[u8]) -> Vec<u8> {
    debug_assert_eq!(nibbles.len() % 2, 0);
    nibbles
        .chunks_exact(2)
        .map(|pair| (pair[0] << 4) | pair[1])
        .collect()
}

fn ls1b_off(map: u16) -> usize {
    if map == 0 {
        16
    } else {
        map.trailing_zeros() as usize
    }
}

fn ms1b_off(map: u16) -> usize {
    if map == 0 {
        16
    } else {
        15 - map.leading_zeros() as usize
    }
}

fn prev_branch_idx(map: u16, idx: usize) -> usize {
    let mask: u16 = if idx == 0 { 0 } else { 0xffff >> (16 - idx) };
    ms1b_off(map & mask)
}

fn next_branch_idx(map: u16, idx: usize) -> usize {
    let mask: u16 = if idx >= 15 { 0 } else { 0xffff << (idx + 1) };
    ls1b_off(map & mask)
}

/// A position in the trie's structure, as returned by [`CompressedTrie::lower_bound`]
/// and consumed by [`CompressedTrie::insert_with_hint`]. May denote an
/// internal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone)]
struct Edge {
    /// Nibble labels for this branch; `label[0]` equals the branch's slot
    /// index in the owning node's `branches` table.
    label: Vec<u8>,
    target: u32,
}

#[derive(Debug)]
struct Node<T> {
    parent: Option<u32>,
    /// Branch index under which this node hangs in `parent`. Meaningless
    /// for the root.
    at: u8,
    branches: [Option<Edge>; 16],
    branch_map: u16,
    /// Key offset of this node, in nibbles from the root.
    offset: u32,
    value: Option<T>,
}

impl<T> Node<T> {
    fn root() -> Self {
        Node {
            parent: None,
            at: 0,
            branches: Default::default(),
            branch_map: 0,
            offset: 0,
            value: None,
        }
    }

    fn branch_cnt(&self) -> u32 {
        self.branch_map.count_ones()
    }

    fn is_internal(&self) -> bool {
        self.value.is_none()
    }
}

enum Slot<T> {
    Occupied { node: Node<T>, generation: u32 },
    Vacant { next_free: Option<u32>, generation: u32 },
}

/// A compressed 16-ary nibble trie mapping byte-string keys to values of
/// type `T`.
///
/// Not thread-safe; callers serialize access externally, same as
/// [`crate::heap::BinomialHeap`].
pub struct CompressedTrie<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for CompressedTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CompressedTrie<T> {
    pub fn new() -> Self {
        CompressedTrie {
            slots: vec![Slot::Occupied {
                node: Node::root(),
                generation: 0,
            }],
            free_head: None,
            len: 0,
        }
    }

    /// Number of value-bearing entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total number of live nodes (internal + value-bearing), including
    /// the root.
    pub fn node_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Occupied { .. }))
            .count()
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    // -- arena plumbing --------------------------------------------------

    fn node(&self, idx: u32) -> &Node<T> {
        match &self.slots[idx as usize] {
            Slot::Occupied { node, .. } => node,
            Slot::Vacant { .. } => unreachable!("dangling trie node index"),
        }
    }

    fn node_mut(&mut self, idx: u32) -> &mut Node<T> {
        match &mut self.slots[idx as usize] {
            Slot::Occupied { node, .. } => node,
            Slot::Vacant { .. } => unreachable!("dangling trie node index"),
        }
    }

    fn generation_of(&self, idx: u32) -> u32 {
        match &self.slots[idx as usize] {
            Slot::Occupied { generation, .. } => *generation,
            Slot::Vacant { generation, .. } => *generation,
        }
    }

    fn position_of(&self, idx: u32) -> Position {
        Position {
            index: idx,
            generation: self.generation_of(idx),
        }
    }

    fn resolve(&self, pos: Position) -> Result<u32> {
        match self.slots.get(pos.index as usize) {
            Some(Slot::Occupied { generation, .. }) if *generation == pos.generation => {
                Ok(pos.index)
            }
            Some(_) => Err(Error::with_detail(
                ErrorKind::Invariant,
                "stale trie position",
            )),
            None => Err(Error::new(ErrorKind::OutOfRange)),
        }
    }

    fn alloc(&mut self, node: Node<T>) -> u32 {
        match self.free_head {
            Some(idx) => {
                let generation = match &self.slots[idx as usize] {
                    Slot::Vacant {
                        next_free,
                        generation,
                    } => {
                        self.free_head = *next_free;
                        *generation
                    }
                    Slot::Occupied { .. } => unreachable!("free list points at occupied slot"),
                };
                self.slots[idx as usize] = Slot::Occupied { node, generation };
                idx
            }
            None => {
                let idx = self.slots.len() as u32;
                self.slots.push(Slot::Occupied { node, generation: 0 });
                idx
            }
        }
    }

    fn free(&mut self, idx: u32) {
        debug_assert_ne!(idx, ROOT, "trie root is never freed");
        let generation = self.generation_of(idx).wrapping_add(1);
        self.slots[idx as usize] = Slot::Vacant {
            next_free: self.free_head,
            generation,
        };
        self.free_head = Some(idx);
    }

    // -- structural navigation -------------------------------------------

    fn first_child(&self, idx: u32) -> Option<u32> {
        let b = ls1b_off(self.node(idx).branch_map);
        (b < 16).then(|| self.node(idx).branches[b].as_ref().unwrap().target)
    }

    fn last_child(&self, idx: u32) -> Option<u32> {
        let b = ms1b_off(self.node(idx).branch_map);
        (b < 16).then(|| self.node(idx).branches[b].as_ref().unwrap().target)
    }

    fn prev_sibling(&self, idx: u32) -> Option<u32> {
        let parent = self.node(idx).parent?;
        let at = self.node(idx).at as usize;
        let b = prev_branch_idx(self.node(parent).branch_map, at);
        (b < 16).then(|| self.node(parent).branches[b].as_ref().unwrap().target)
    }

    fn next_sibling(&self, idx: u32) -> Option<u32> {
        let parent = self.node(idx).parent?;
        let at = self.node(idx).at as usize;
        let b = next_branch_idx(self.node(parent).branch_map, at);
        (b < 16).then(|| self.node(parent).branches[b].as_ref().unwrap().target)
    }

    /// Next node in depth-first pre-order, not ascending past `scope`.
    fn next_dfs_scoped(&self, idx: u32, scope: u32) -> Option<u32> {
        if let Some(c) = self.first_child(idx) {
            return Some(c);
        }
        let mut cur = idx;
        loop {
            if cur == scope {
                return None;
            }
            if let Some(sib) = self.next_sibling(cur) {
                return Some(sib);
            }
            cur = self.node(cur).parent?;
        }
    }

    /// Previous node in depth-first pre-order, not ascending past `scope`.
    fn prev_dfs_scoped(&self, idx: u32, scope: u32) -> Option<u32> {
        if idx == scope {
            return None;
        }
        match self.prev_sibling(idx) {
            Some(mut cur) => {
                while let Some(c) = self.last_child(cur) {
                    cur = c;
                }
                Some(cur)
            }
            None => self.node(idx).parent,
        }
    }

    fn next_val_dfs_scoped(&self, mut idx: u32, scope: u32) -> Option<u32> {
        loop {
            idx = self.next_dfs_scoped(idx, scope)?;
            if self.node(idx).value.is_some() {
                return Some(idx);
            }
        }
    }

    fn prev_val_dfs_scoped(&self, mut idx: u32, scope: u32) -> Option<u32> {
        loop {
            idx = self.prev_dfs_scoped(idx, scope)?;
            if self.node(idx).value.is_some() {
                return Some(idx);
            }
        }
    }

    fn first_value_scoped(&self, scope: u32) -> Option<u32> {
        if self.node(scope).value.is_some() {
            return Some(scope);
        }
        self.next_val_dfs_scoped(scope, scope)
    }

    fn deepest_rightmost(&self, idx: u32) -> u32 {
        let mut cur = idx;
        while let Some(c) = self.last_child(cur) {
            cur = c;
        }
        cur
    }

    fn last_value_scoped(&self, scope: u32) -> Option<u32> {
        let idx = self.deepest_rightmost(scope);
        if self.node(idx).value.is_some() {
            Some(idx)
        } else {
            self.prev_val_dfs_scoped(idx, scope)
        }
    }

    fn reconstruct_key(&self, mut idx: u32) -> Vec<u8> {
        let mut nibbles = Vec::with_capacity(self.node(idx).offset as usize);
        while let Some(parent) = self.node(idx).parent {
            let at = self.node(idx).at as usize;
            let label = &self.node(parent).branches[at].as_ref().unwrap().label;
            nibbles.extend(label.iter().rev());
            idx = parent;
        }
        nibbles.reverse();
        nibbles_to_bytes(&nibbles)
    }

    // -- lookup ------------------------------------------------------------

    /// Deepest node whose path is a prefix of (or equal to) `key`, plus
    /// whether that node's path equals `key` exactly and holds a value.
    pub fn lower_bound(&self, key: &[u8]) -> (Position, bool) {
        let total = key_nibble_len(key);
        let mut idx = ROOT;
        let mut offset = 0usize;
        loop {
            if offset == total {
                let found = self.node(idx).value.is_some();
                return (self.position_of(idx), found);
            }
            let head = nibble_at(key, offset) as usize;
            match &self.node(idx).branches[head] {
                None => return (self.position_of(idx), false),
                Some(edge) => {
                    let m = common_prefix_len(key, offset, &edge.label);
                    if m < edge.label.len() {
                        return (self.position_of(idx), false);
                    }
                    idx = edge.target;
                    offset += m;
                }
            }
        }
    }

    /// Node whose path equals `key` exactly (internal or value-bearing),
    /// or `None` if no such node exists.
    fn find_structural(&self, key: &[u8]) -> Option<u32> {
        let (pos, _) = self.lower_bound(key);
        let idx = pos.index;
        (self.node(idx).offset as usize == key_nibble_len(key)).then_some(idx)
    }

    pub fn get(&self, key: &[u8]) -> Option<&T> {
        let (pos, found) = self.lower_bound(key);
        if !found {
            return None;
        }
        self.node(pos.index).value.as_ref()
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut T> {
        let (pos, found) = self.lower_bound(key);
        if !found {
            return None;
        }
        self.node_mut(pos.index).value.as_mut()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    // -- insertion -----------------------------------------------------

    /// Inserts `value` under `key`. If the key already has a value, the
    /// existing value is retained and the returned flag is `false`.
    pub fn insert(&mut self, key: &[u8], value: T) -> (Position, bool) {
        self.insert_from(ROOT, 0, key, value)
    }

    /// Resumes insertion from a structural position known to be a prefix
    /// of `key`, for O(|remaining suffix|) insertion when the caller
    /// already holds a [`lower_bound`](Self::lower_bound) hint.
    pub fn insert_with_hint(
        &mut self,
        key: &[u8],
        value: T,
        hint: Position,
    ) -> Result<(Position, bool)> {
        let start = self.resolve(hint)?;
        let offset = self.node(start).offset as usize;
        Ok(self.insert_from(start, offset, key, value))
    }

    fn insert_from(&mut self, mut idx: u32, mut offset: usize, key: &[u8], value: T) -> (Position, bool) {
        let total = key_nibble_len(key);
        let mut value = Some(value);
        loop {
            if offset == total {
                return if self.node(idx).value.is_none() {
                    self.node_mut(idx).value = value.take();
                    self.len += 1;
                    (self.position_of(idx), true)
                } else {
                    (self.position_of(idx), false)
                };
            }

            let head = nibble_at(key, offset) as usize;
            match self.node(idx).branches[head].as_ref() {
                None => {
                    let label = nibble_suffix(key, offset);
                    let new_offset = offset + label.len();
                    let new_idx = self.alloc(Node {
                        parent: Some(idx),
                        at: head as u8,
                        branches: Default::default(),
                        branch_map: 0,
                        offset: new_offset as u32,
                        value: value.take(),
                    });
                    let node = self.node_mut(idx);
                    node.branches[head] = Some(Edge {
                        label,
                        target: new_idx,
                    });
                    node.branch_map |= 1 << head;
                    self.len += 1;
                    return (self.position_of(new_idx), true);
                }
                Some(edge) => {
                    let label_len = edge.label.len();
                    let m = common_prefix_len(key, offset, &edge.label);
                    if m == label_len {
                        idx = edge.target;
                        offset += m;
                        continue;
                    }
                    // Divergence inside the branch: split it.
                    let split_offset = offset + m;
                    let key_ends_here = split_offset == total;
                    let new_idx = self.split_branch(idx, head, m, split_offset as u32, key_ends_here.then(|| value.take().unwrap()));
                    if key_ends_here {
                        self.len += 1;
                        return (self.position_of(new_idx), true);
                    }
                    // Key continues past the split: attach a fresh leaf.
                    let next_head = nibble_at(key, split_offset) as usize;
                    let label = nibble_suffix(key, split_offset);
                    let leaf_offset = split_offset + label.len();
                    let leaf_idx = self.alloc(Node {
                        parent: Some(new_idx),
                        at: next_head as u8,
                        branches: Default::default(),
                        branch_map: 0,
                        offset: leaf_offset as u32,
                        value: value.take(),
                    });
                    let node = self.node_mut(new_idx);
                    node.branches[next_head] = Some(Edge {
                        label,
                        target: leaf_idx,
                    });
                    node.branch_map |= 1 << next_head;
                    self.len += 1;
                    return (self.position_of(leaf_idx), true);
                }
            }
        }
    }

    /// Splits the edge at `parent`'s `branch_head` slot at nibble offset
    /// `split_at` within the edge's label, interposing a new node (with
    /// `value`, or internal if `None`) that inherits the old edge's tail.
    fn split_branch(
        &mut self,
        parent: u32,
        branch_head: usize,
        split_at: usize,
        new_offset: u32,
        value: Option<T>,
    ) -> u32 {
        let edge = self.node_mut(parent).branches[branch_head].take().unwrap();
        let (head_label, tail_label) = edge.label.split_at(split_at);
        let head_label = head_label.to_vec();
        let tail_label = tail_label.to_vec();
        let tail_head = tail_label[0] as usize;

        let new_idx = self.alloc(Node {
            parent: Some(parent),
            at: branch_head as u8,
            branches: Default::default(),
            branch_map: 0,
            offset: new_offset,
            value,
        });

        self.node_mut(edge.target).parent = Some(new_idx);
        self.node_mut(edge.target).at = tail_head as u8;

        let new_node = self.node_mut(new_idx);
        new_node.branches[tail_head] = Some(Edge {
            label: tail_label,
            target: edge.target,
        });
        new_node.branch_map |= 1 << tail_head;

        let node = self.node_mut(parent);
        node.branches[branch_head] = Some(Edge {
            label: head_label,
            target: new_idx,
        });
        new_idx
    }

    // -- removal -------------------------------------------------------

    /// Removes the value bound to `key`, if any, leaving the trie
    /// condensed. A no-op (returns `None`) if the key is absent.
    pub fn remove(&mut self, key: &[u8]) -> Option<T> {
        let idx = self.find_structural(key)?;
        let value = self.node_mut(idx).value.take()?;
        self.len -= 1;
        if idx != ROOT {
            self.condense_from(idx);
        }
        Some(value)
    }

    fn clear_branch(&mut self, parent: u32, at: usize) {
        let node = self.node_mut(parent);
        node.branches[at] = None;
        node.branch_map &= !(1 << at);
    }

    /// Re-establishes the "internal nodes have >= 2 branches" invariant
    /// after a value was cleared at `idx`. Only ever walks up at most two
    /// levels: a non-root internal node always had >= 2 branches before
    /// losing one, so it lands on exactly 1 (dissolve, stop) or > 1
    /// (already legal, stop); it can only reach 0 when `idx` itself was
    /// the node whose value was just cleared and had no children.
    fn condense_from(&mut self, mut idx: u32) {
        loop {
            if self.node(idx).branch_cnt() != 0 {
                // Node keeps its remaining branch(es); a single-branch
                // value-cleared node simply becomes a structural internal
                // node in place, no relinking needed.
                return;
            }
            let Some(parent) = self.node(idx).parent else {
                return; // root, never removed
            };
            let at = self.node(idx).at as usize;
            self.clear_branch(parent, at);
            self.free(idx);

            if parent == ROOT || self.node(parent).value.is_some() {
                return;
            }
            match self.node(parent).branch_cnt() {
                0 => {
                    idx = parent;
                    continue;
                }
                1 => {
                    self.dissolve(parent);
                    return;
                }
                _ => return,
            }
        }
    }

    /// Merges a childless-of-value, single-branch internal node into its
    /// parent's edge, concatenating labels so the grandparent points
    /// straight at the (former) grandchild.
    fn dissolve(&mut self, idx: u32) {
        let parent = self.node(idx).parent.expect("dissolve called on root");
        let at = self.node(idx).at as usize;
        let sole = ls1b_off(self.node(idx).branch_map);
        let mut edge = self.node_mut(idx).branches[sole].take().unwrap();

        let own_label = self.node(parent).branches[at].as_ref().unwrap().label.clone();
        let mut new_label = own_label;
        new_label.extend_from_slice(&edge.label);
        edge.label = new_label;

        self.node_mut(edge.target).parent = Some(parent);
        self.node_mut(edge.target).at = at as u8;
        self.node_mut(parent).branches[at] = Some(edge);
        self.free(idx);
    }

    // -- iteration -------------------------------------------------------

    pub fn iter(&self) -> TrieIter<'_, T> {
        TrieIter {
            trie: self,
            scope: ROOT,
            front: self.first_value_scoped(ROOT),
            back: self.last_value_scoped(ROOT),
        }
    }

    /// Iterates value-bearing entries whose key has `key` as a prefix,
    /// i.e. the subtree rooted at the deepest node whose path equals
    /// `key` exactly. Empty if no node's path equals `key`.
    pub fn iter_prefix(&self, key: &[u8]) -> TrieIter<'_, T> {
        match self.find_structural(key) {
            Some(scope) => TrieIter {
                trie: self,
                scope,
                front: self.first_value_scoped(scope),
                back: self.last_value_scoped(scope),
            },
            None => TrieIter {
                trie: self,
                scope: ROOT,
                front: None,
                back: None,
            },
        }
    }

    /// Walks every live node — internal and value-bearing alike — in
    /// depth-first pre-order. Where [`iter`](Self::iter) skips nodes that
    /// exist only to fork paths, this visits them too, yielding `None` in
    /// place of a value for them.
    pub fn structural_iter(&self) -> StructuralIter<'_, T> {
        StructuralIter {
            trie: self,
            scope: ROOT,
            front: Some(ROOT),
            back: Some(self.deepest_rightmost(ROOT)),
        }
    }

    /// Like [`structural_iter`](Self::structural_iter), scoped to the
    /// subtree rooted at the deepest node whose path equals `key` exactly.
    /// Empty if no node's path equals `key`.
    pub fn structural_iter_prefix(&self, key: &[u8]) -> StructuralIter<'_, T> {
        match self.find_structural(key) {
            Some(scope) => StructuralIter {
                trie: self,
                scope,
                front: Some(scope),
                back: Some(self.deepest_rightmost(scope)),
            },
            None => StructuralIter {
                trie: self,
                scope: ROOT,
                front: None,
                back: None,
            },
        }
    }

    #[cfg(any(test, feature = "debug-invariants"))]
    pub fn debug_check_invariants(&self) -> Result<()>
    where
        T: std::fmt::Debug,
    {
        let mut live = 0usize;
        let mut values = 0usize;
        for (i, slot) in self.slots.iter().enumerate() {
            let Slot::Occupied { node, .. } = slot else {
                continue;
            };
            live += 1;
            let idx = i as u32;
            if idx == ROOT {
                if node.parent.is_some() {
                    return Err(Error::with_detail(ErrorKind::Invariant, "root has a parent"));
                }
            } else {
                let parent = node.parent.ok_or_else(|| {
                    Error::with_detail(ErrorKind::Invariant, "non-root node has no parent")
                })?;
                let edge = self.node(parent).branches[node.at as usize]
                    .as_ref()
                    .ok_or_else(|| {
                        Error::with_detail(ErrorKind::Invariant, "node missing from parent's branch table")
                    })?;
                if edge.target != idx {
                    return Err(Error::with_detail(ErrorKind::Invariant, "branch target mismatch"));
                }
                if edge.label.is_empty() {
                    return Err(Error::with_detail(ErrorKind::Invariant, "empty branch label"));
                }
                if edge.label[0] as u8 != node.at {
                    return Err(Error::with_detail(ErrorKind::Invariant, "label head != branch index"));
                }
                if node.offset as usize != self.node(parent).offset as usize + edge.label.len() {
                    return Err(Error::with_detail(ErrorKind::Invariant, "key offset mismatch"));
                }
                if node.is_internal() && node.branch_cnt() < 2 {
                    return Err(Error::with_detail(
                        ErrorKind::Invariant,
                        "internal node with fewer than 2 branches",
                    ));
                }
            }
            for b in 0..16usize {
                let bit_set = node.branch_map & (1 << b) != 0;
                let slot_set = node.branches[b].is_some();
                if bit_set != slot_set {
                    return Err(Error::with_detail(ErrorKind::Invariant, "branch_map/branches mismatch"));
                }
            }
            if node.value.is_some() {
                values += 1;
            }
        }
        if values != self.len {
            return Err(Error::with_detail(ErrorKind::Invariant, "len() mismatch"));
        }
        let _ = live;
        Ok(())
    }
}

/// Yields value-bearing entries in lexicographic (depth-first pre-order)
/// order. Also runnable back to front via [`DoubleEndedIterator`].
pub struct TrieIter<'a, T> {
    trie: &'a CompressedTrie<T>,
    scope: u32,
    front: Option<u32>,
    back: Option<u32>,
}

impl<'a, T> TrieIter<'a, T> {
    fn emit(&self, idx: u32) -> (Vec<u8>, &'a T) {
        let key = self.trie.reconstruct_key(idx);
        let value = self.trie.node(idx).value.as_ref().unwrap();
        (key, value)
    }
}

impl<'a, T> Iterator for TrieIter<'a, T> {
    type Item = (Vec<u8>, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.front?;
        let item = self.emit(idx);
        if Some(idx) == self.back {
            self.front = None;
            self.back = None;
        } else {
            self.front = self.trie.next_val_dfs_scoped(idx, self.scope);
        }
        Some(item)
    }
}

impl<'a, T> DoubleEndedIterator for TrieIter<'a, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let idx = self.back?;
        let item = self.emit(idx);
        if Some(idx) == self.front {
            self.front = None;
            self.back = None;
        } else {
            self.back = self.trie.prev_val_dfs_scoped(idx, self.scope);
        }
        Some(item)
    }
}

impl<'a, T> TrieIter<'a, T> {
    /// Switches to a structural view of the same scope, visiting internal
    /// nodes as well as value-bearing ones. Cheap: rebuilds the front/back
    /// cursors from the scope's structural bounds rather than walking the
    /// whole subtree, and discards this iterator's progress.
    pub fn into_structural(self) -> StructuralIter<'a, T> {
        StructuralIter {
            trie: self.trie,
            scope: self.scope,
            front: Some(self.scope),
            back: Some(self.trie.deepest_rightmost(self.scope)),
        }
    }
}

/// Walks every live node in a scope — internal and value-bearing alike —
/// in depth-first pre-order. Also runnable back to front via
/// [`DoubleEndedIterator`]. See [`CompressedTrie::structural_iter`].
pub struct StructuralIter<'a, T> {
    trie: &'a CompressedTrie<T>,
    scope: u32,
    front: Option<u32>,
    back: Option<u32>,
}

impl<'a, T> StructuralIter<'a, T> {
    fn emit(&self, idx: u32) -> (Vec<u8>, Option<&'a T>) {
        let key = self.trie.reconstruct_key(idx);
        let value = self.trie.node(idx).value.as_ref();
        (key, value)
    }

    /// Switches to a value-only view of the same scope. Cheap: rebuilds
    /// the front/back cursors from the scope's value bounds rather than
    /// walking the whole subtree, and discards this iterator's progress.
    pub fn into_values(self) -> TrieIter<'a, T> {
        TrieIter {
            trie: self.trie,
            scope: self.scope,
            front: self.trie.first_value_scoped(self.scope),
            back: self.trie.last_value_scoped(self.scope),
        }
    }
}

impl<'a, T> Iterator for StructuralIter<'a, T> {
    type Item = (Vec<u8>, Option<&'a T>);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.front?;
        let item = self.emit(idx);
        if Some(idx) == self.back {
            self.front = None;
            self.back = None;
        } else {
            self.front = self.trie.next_dfs_scoped(idx, self.scope);
        }
        Some(item)
    }
}

impl<'a, T> DoubleEndedIterator for StructuralIter<'a, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let idx = self.back?;
        let item = self.emit(idx);
        if Some(idx) == self.front {
            self.front = None;
            self.back = None;
        } else {
            self.back = self.trie.prev_dfs_scoped(idx, self.scope);
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_find_basic() {
        let mut t = CompressedTrie::new();
        assert_eq!(t.insert(b"abc", 1).1, true);
        assert_eq!(t.insert(b"abd", 2).1, true);
        assert_eq!(*t.get(b"abc").unwrap(), 1);
        assert_eq!(*t.get(b"abd").unwrap(), 2);
        assert!(t.get(b"ab").is_none());
        assert!(t.debug_check_invariants().is_ok());
    }

    #[test]
    fn duplicate_insert_keeps_existing() {
        let mut t = CompressedTrie::new();
        t.insert(b"x", 1);
        let (_, inserted) = t.insert(b"x", 2);
        assert!(!inserted);
        assert_eq!(*t.get(b"x").unwrap(), 1);
    }

    #[test]
    fn prefix_split_and_remove_scenario() {
        let mut t = CompressedTrie::new();
        t.insert(b"abc", 1);
        t.insert(b"abd", 2);
        t.insert(b"ab", 3);
        assert!(t.debug_check_invariants().is_ok());

        let entries: Vec<_> = t.iter().map(|(k, v)| (k, *v)).collect();
        assert_eq!(
            entries,
            vec![(b"ab".to_vec(), 3), (b"abc".to_vec(), 1), (b"abd".to_vec(), 2)]
        );

        let removed = t.remove(b"ab");
        assert_eq!(removed, Some(3));
        assert!(t.debug_check_invariants().is_ok());

        let entries: Vec<_> = t.iter().map(|(k, v)| (k, *v)).collect();
        assert_eq!(entries, vec![(b"abc".to_vec(), 1), (b"abd".to_vec(), 2)]);

        // No internal node of degree 1 remains.
        for slot in &t.slots {
            if let Slot::Occupied { node, .. } = slot {
                if node.is_internal() {
                    assert!(node.branch_cnt() >= 2 || node.parent.is_none());
                }
            }
        }
    }

    #[test]
    fn remove_absent_key_is_noop() {
        let mut t: CompressedTrie<i32> = CompressedTrie::new();
        t.insert(b"x", 1);
        assert_eq!(t.remove(b"y"), None);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn iter_prefix_scopes_to_subtree() {
        let mut t = CompressedTrie::new();
        t.insert(b"abc", 1);
        t.insert(b"abd", 2);
        t.insert(b"xyz", 3);
        let under_ab: Vec<_> = t.iter_prefix(b"ab").map(|(k, v)| (k, *v)).collect();
        assert_eq!(under_ab, vec![(b"abc".to_vec(), 1), (b"abd".to_vec(), 2)]);

        let under_nothing: Vec<_> = t.iter_prefix(b"q").collect();
        assert!(under_nothing.is_empty());
    }

    #[test]
    fn value_node_with_one_child_stays_internal_not_removed() {
        let mut t = CompressedTrie::new();
        t.insert(b"ab", 1);
        t.insert(b"abc", 2);
        // Removing "ab" must not disturb "abc"; "ab"'s node becomes a
        // structural (internal) node in place, not dissolved, since it
        // still has its one child.
        assert_eq!(t.remove(b"ab"), Some(1));
        assert!(t.debug_check_invariants().is_ok());
        assert_eq!(*t.get(b"abc").unwrap(), 2);
        assert!(t.get(b"ab").is_none());
    }

    #[test]
    fn lower_bound_hint_speeds_insertion() {
        let mut t = CompressedTrie::new();
        t.insert(b"prefix-one", 1);
        let (hint, found) = t.lower_bound(b"prefix-two");
        assert!(!found);
        let (_, inserted) = t.insert_with_hint(b"prefix-two", 2, hint).unwrap();
        assert!(inserted);
        assert_eq!(*t.get(b"prefix-two").unwrap(), 2);
        assert!(t.debug_check_invariants().is_ok());
    }

    #[test]
    fn empty_key_binds_to_root() {
        let mut t = CompressedTrie::new();
        assert_eq!(t.insert(b"", 42).1, true);
        assert_eq!(*t.get(b"").unwrap(), 42);
        assert_eq!(t.iter().next().unwrap().1, &42);
    }

    #[test]
    fn structural_iter_includes_internal_nodes() {
        let mut t = CompressedTrie::new();
        t.insert(b"abc", 1);
        t.insert(b"abd", 2);
        t.insert(b"ab", 3);

        let keys: Vec<_> = t.structural_iter().map(|(k, _)| k).collect();
        // "ab" is value-bearing; the root is the only purely-structural
        // node in this shape, visited first in pre-order.
        assert_eq!(keys, vec![b"".to_vec(), b"ab".to_vec(), b"abc".to_vec(), b"abd".to_vec()]);

        let values: Vec<_> = t.structural_iter().map(|(_, v)| v.copied()).collect();
        assert_eq!(values, vec![None, Some(3), Some(1), Some(2)]);
    }

    #[test]
    fn structural_iter_visits_pure_fork_node() {
        let mut t = CompressedTrie::new();
        t.insert(b"abc", 1);
        t.insert(b"abd", 2);
        // No value at "ab": it exists only to fork "abc"/"abd" and is
        // skipped by `iter`, but must show up as `None` in the structural
        // view.
        let entries: Vec<_> = t.structural_iter().collect();
        assert_eq!(
            entries,
            vec![
                (b"".to_vec(), None),
                (b"ab".to_vec(), None),
                (b"abc".to_vec(), Some(&1)),
                (b"abd".to_vec(), Some(&2)),
            ]
        );
    }

    #[test]
    fn structural_iter_prefix_scopes_to_subtree() {
        let mut t = CompressedTrie::new();
        t.insert(b"abc", 1);
        t.insert(b"abd", 2);
        t.insert(b"xyz", 3);
        let under_ab: Vec<_> = t.structural_iter_prefix(b"ab").collect();
        assert_eq!(
            under_ab,
            vec![(b"ab".to_vec(), None), (b"abc".to_vec(), Some(&1)), (b"abd".to_vec(), Some(&2))]
        );
        assert!(t.structural_iter_prefix(b"q").next().is_none());
    }

    #[test]
    fn structural_iter_reverse_matches_forward_reversed() {
        let mut t = CompressedTrie::new();
        t.insert(b"abc", 1);
        t.insert(b"abd", 2);
        t.insert(b"ab", 3);
        let forward: Vec<_> = t.structural_iter().map(|(k, _)| k).collect();
        let mut backward: Vec<_> = t.structural_iter().rev().map(|(k, _)| k).collect();
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn iter_and_structural_iter_convert() {
        let mut t = CompressedTrie::new();
        t.insert(b"abc", 1);
        t.insert(b"abd", 2);

        let values_via_structural: Vec<_> = t
            .structural_iter()
            .into_values()
            .map(|(k, v)| (k, *v))
            .collect();
        assert_eq!(values_via_structural, vec![(b"abc".to_vec(), 1), (b"abd".to_vec(), 2)]);

        let structural_via_values: Vec<_> = t.iter().into_structural().map(|(k, _)| k).collect();
        assert_eq!(
            structural_via_values,
            vec![b"".to_vec(), b"ab".to_vec(), b"abc".to_vec(), b"abd".to_vec()]
        );
    }

    #[test]
    fn randomized_insert_remove_preserves_invariants() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut t = CompressedTrie::new();
        let mut model = std::collections::HashMap::new();
        for _ in 0..500 {
            let key: Vec<u8> = (0..rng.gen_range(0..4))
                .map(|_| rng.gen_range(b'a'..=b'c'))
                .collect();
            if rng.gen_bool(0.6) {
                let v = rng.gen::<i32>();
                let existed = model.contains_key(&key);
                let (_, inserted) = t.insert(&key, v);
                assert_eq!(inserted, !existed);
                model.entry(key).or_insert(v);
            } else {
                let expected = model.remove(&key);
                let got = t.remove(&key);
                assert_eq!(got, expected);
            }
            t.debug_check_invariants().unwrap();
        }
        assert_eq!(t.len(), model.len());
    }
}
