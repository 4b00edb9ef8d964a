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

//! Binomial heap with stable, generation-checked handles.
//!
//! A forest of binomial trees ordered ascending by rank, a cached
//! minimum pointer, and a two-hop superior link on every node (parent if
//! the node is a first child, otherwise the first child among its
//! siblings) so parent lookup never needs a dedicated parent pointer.
//!
//! Handle stability under sift is the tricky part: a naive scheme that
//! keeps node identity by swapping the *contents* of two nodes (order,
//! links, everything but the payload) while leaving their addresses
//! fixed is fragile with raw pointers — swapping a node's links with its
//! own direct parent's links self-references whenever the node being
//! promoted is its parent's first child (the parent's child/superior
//! field and the child's field point directly at each other, so a blind
//! field-for-field swap turns one of them into a pointer to itself).
//! This module keeps the same *effect* — the handle's slot never moves,
//! decrease-key reshapes links rather than copying values — via a safe
//! arena (handles as generation-checked indices rather than raw
//! pointers) and a `rotate_up` that replaces the node-swap with an
//! explicit detach/reattach, which sidesteps the self-reference case
//! instead of papering over it.

use crate::error::{Error, ErrorKind, Result};
use std::ops::SubAssign;

/// A stable reference to a value stored in a [`BinomialHeap`].
///
/// Handles never move for the lifetime of the value they name, even
/// across `decrease_key`, `merge_from`, or other trees' inserts and
/// deletes. They carry a generation so that using a handle after its
/// value has been deleted is reported as an error rather than silently
/// acting on whatever now occupies the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

struct Node<T> {
    value: T,
    order: u32,
    super_: Option<u32>,
    child: Option<u32>,
    prev: u32,
    next: Option<u32>,
}

enum Slot<T> {
    Occupied { node: Node<T>, generation: u32 },
    Vacant { next_free: Option<u32>, generation: u32 },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Owner {
    Root,
    Node(u32),
}

/// A mergeable priority queue implemented as a forest of binomial trees.
pub struct BinomialHeap<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    roots: Option<u32>,
    min: Option<u32>,
    len: usize,
}

impl<T> Default for BinomialHeap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BinomialHeap<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            roots: None,
            min: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drops every element and returns the heap to empty, in O(n).
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn peek_min(&self) -> Result<&T> {
        let idx = self.min.ok_or_else(|| Error::new(ErrorKind::Empty))?;
        Ok(self.value(idx))
    }

    // --- slot plumbing -----------------------------------------------

    fn node(&self, idx: u32) -> &Node<T> {
        match &self.slots[idx as usize] {
            Slot::Occupied { node, .. } => node,
            Slot::Vacant { .. } => panic!("corestack: dangling internal heap index"),
        }
    }

    fn node_mut(&mut self, idx: u32) -> &mut Node<T> {
        match &mut self.slots[idx as usize] {
            Slot::Occupied { node, .. } => node,
            Slot::Vacant { .. } => panic!("corestack: dangling internal heap index"),
        }
    }

    fn value(&self, idx: u32) -> &T {
        &self.node(idx).value
    }

    fn generation_of(&self, idx: u32) -> u32 {
        match &self.slots[idx as usize] {
            Slot::Occupied { generation, .. } => *generation,
            Slot::Vacant { .. } => panic!("corestack: dangling internal heap index"),
        }
    }

    fn resolve(&self, handle: Handle) -> Result<u32> {
        match self.slots.get(handle.index as usize) {
            Some(Slot::Occupied { generation, .. }) if *generation == handle.generation => {
                Ok(handle.index)
            }
            Some(_) => Err(Error::with_detail(
                ErrorKind::Invariant,
                "stale heap handle (value already deleted)",
            )),
            None => Err(Error::new(ErrorKind::OutOfRange)),
        }
    }

    fn alloc(&mut self, node: Node<T>) -> Handle {
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
                Handle {
                    index: idx,
                    generation,
                }
            }
            None => {
                let idx = self.slots.len() as u32;
                self.slots.push(Slot::Occupied { node, generation: 0 });
                Handle {
                    index: idx,
                    generation: 0,
                }
            }
        }
    }

    fn free(&mut self, idx: u32) -> T {
        let next_generation = self.generation_of(idx).wrapping_add(1);
        let old = std::mem::replace(
            &mut self.slots[idx as usize],
            Slot::Vacant {
                next_free: self.free_head,
                generation: next_generation,
            },
        );
        self.free_head = Some(idx);
        match old {
            Slot::Occupied { node, .. } => node.value,
            Slot::Vacant { .. } => unreachable!(),
        }
    }

    // --- sibling-list / superior-link plumbing ------------------------

    fn is_first(&self, idx: u32) -> bool {
        let prev = self.node(idx).prev;
        self.node(prev).next.is_none()
    }

    fn is_root(&self, idx: u32) -> bool {
        self.node(idx).super_.is_none()
    }

    /// The node's true parent, resolved via the two-hop superior link
    /// (direct if `idx` is a first child, through the first sibling
    /// otherwise). `None` for roots.
    fn true_parent(&self, idx: u32) -> Option<u32> {
        let s = self.node(idx).super_?;
        if self.is_first(idx) {
            Some(s)
        } else {
            let parent = self.node(s).super_;
            debug_assert!(parent.is_some(), "first sibling must have a true parent");
            parent
        }
    }

    fn head(&self, owner: Owner) -> Option<u32> {
        match owner {
            Owner::Root => self.roots,
            Owner::Node(g) => self.node(g).child,
        }
    }

    fn set_head(&mut self, owner: Owner, val: Option<u32>) {
        match owner {
            Owner::Root => self.roots = val,
            Owner::Node(g) => self.node_mut(g).child = val,
        }
    }

    fn owner_of(&self, idx: u32) -> Owner {
        match self.node(idx).super_ {
            Some(g) => Owner::Node(g),
            None => Owner::Root,
        }
    }

    /// Removes `idx` from the sibling list it currently belongs to.
    fn list_remove(&mut self, owner: Owner, idx: u32) {
        let prev = self.node(idx).prev;
        let next = self.node(idx).next;
        if self.head(owner) == Some(idx) {
            self.set_head(owner, next);
        }
        if self.node(prev).next == Some(idx) {
            self.node_mut(prev).next = next;
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => {
                if let Some(h) = self.head(owner) {
                    self.node_mut(h).prev = prev;
                }
            }
        }
    }

    /// Inserts `idx` as the new first element of the list at `owner`.
    /// `idx` must not already belong to a list (its prev/next are
    /// overwritten unconditionally).
    fn list_prepend(&mut self, owner: Owner, idx: u32) {
        match self.head(owner) {
            None => {
                self.node_mut(idx).prev = idx;
                self.node_mut(idx).next = None;
            }
            Some(old_head) => {
                let last = self.node(old_head).prev;
                self.node_mut(idx).prev = last;
                self.node_mut(idx).next = Some(old_head);
                self.node_mut(old_head).prev = idx;
            }
        }
        self.set_head(owner, Some(idx));
    }

    /// Promotes `h` over its direct parent `p`, swapping their
    /// structural roles (order, superior, children, sibling position)
    /// while leaving both slots' payloads untouched. `h` ends up
    /// exactly where `p` used to sit; `p` becomes `h`'s child, carrying
    /// whatever children `h` had before.
    fn rotate_up(&mut self, h: u32, p: u32) {
        let p_super = self.node(p).super_;
        let p_owner = match p_super {
            Some(g) => Owner::Node(g),
            None => Owner::Root,
        };

        // h leaves p's children list; whatever remains becomes h's new
        // children once p and h trade places.
        self.list_remove(Owner::Node(p), h);
        let remainder = self.node(p).child;

        // h inherits p's exact position in p's own owning list.
        let p_prev = self.node(p).prev;
        let p_next = self.node(p).next;
        let p_was_head = self.head(p_owner) == Some(p);

        self.node_mut(h).prev = p_prev;
        self.node_mut(h).next = p_next;
        self.node_mut(h).super_ = p_super;

        if p_was_head {
            self.set_head(p_owner, Some(h));
        } else if self.node(p_prev).next == Some(p) {
            self.node_mut(p_prev).next = Some(h);
        }
        match p_next {
            Some(n) => self.node_mut(n).prev = h,
            None => {
                if let Some(head) = self.head(p_owner) {
                    self.node_mut(head).prev = h;
                }
            }
        }

        // h's old children become p's new children.
        let h_old_child = self.node(h).child;
        self.node_mut(p).child = h_old_child;
        let mut c = h_old_child;
        while let Some(cp) = c {
            self.node_mut(cp).super_ = Some(p);
            c = self.node(cp).next;
        }

        // p, plus the rest of its old children, become h's new children.
        self.node_mut(h).child = remainder;
        self.list_prepend(Owner::Node(h), p);
        self.node_mut(p).super_ = Some(h);
        let mut c = remainder;
        while let Some(cp) = c {
            self.node_mut(cp).super_ = Some(h);
            c = self.node(cp).next;
        }

        let h_order = self.node(h).order;
        let p_order = self.node(p).order;
        self.node_mut(h).order = p_order;
        self.node_mut(p).order = h_order;
    }

    fn sift_up_from(&mut self, idx: u32)
    where
        T: Ord,
    {
        let mut cur = idx;
        loop {
            let parent = match self.true_parent(cur) {
                Some(p) => p,
                None => break,
            };
            // Strictly-less parent means the heap property already
            // holds; otherwise the moving node wins the tie and keeps
            // climbing.
            if self.value(parent) < self.value(cur) {
                break;
            }
            self.rotate_up(cur, parent);
        }
    }

    /// Combines two equal-order roots into one of order+1. `a` wins
    /// ties (used to implement "the receiving heap's tree wins").
    fn combine_trees(&mut self, a: u32, b: u32) -> u32
    where
        T: Ord,
    {
        let (winner, loser) = if self.value(b) < self.value(a) {
            (b, a)
        } else {
            (a, b)
        };
        self.node_mut(loser).super_ = Some(winner);
        self.list_prepend(Owner::Node(winner), loser);
        self.node_mut(winner).order += 1;
        winner
    }

    /// Merges `incoming` (a standalone root list, already detached from
    /// any heap) into `self.roots`, recomputing `self.min`. `self`'s
    /// existing roots are preferred on order collisions with ties.
    fn absorb_roots(&mut self, incoming: Option<u32>)
    where
        T: Ord,
    {
        let mut buckets: Vec<Option<u32>> = Vec::new();

        let mut c = self.roots;
        while let Some(idx) = c {
            let next = self.node(idx).next;
            let order = self.node(idx).order as usize;
            if buckets.len() <= order {
                buckets.resize(order + 1, None);
            }
            buckets[order] = Some(idx);
            c = next;
        }

        let mut c = incoming;
        while let Some(start) = c {
            let next = self.node(start).next;
            c = next;
            let mut idx = start;
            let mut order = self.node(idx).order as usize;
            loop {
                if buckets.len() <= order {
                    buckets.resize(order + 1, None);
                }
                match buckets[order] {
                    None => {
                        buckets[order] = Some(idx);
                        break;
                    }
                    Some(existing) => {
                        buckets[order] = None;
                        idx = self.combine_trees(existing, idx);
                        order += 1;
                    }
                }
            }
        }

        self.roots = None;
        let mut head = None;
        let mut tail = None;
        let mut min_idx: Option<u32> = None;
        for slot in buckets {
            if let Some(idx) = slot {
                self.node_mut(idx).super_ = None;
                self.node_mut(idx).next = None;
                match tail {
                    Some(t) => {
                        self.node_mut(t).next = Some(idx);
                        self.node_mut(idx).prev = t;
                    }
                    None => {
                        head = Some(idx);
                        self.node_mut(idx).prev = idx;
                    }
                }
                tail = Some(idx);
                min_idx = Some(match min_idx {
                    Some(m) if self.value(m) <= self.value(idx) => m,
                    _ => idx,
                });
            }
        }
        if let (Some(h), Some(t)) = (head, tail) {
            self.node_mut(h).prev = t;
        }
        self.roots = head;
        self.min = min_idx;
    }

    /// Inserts a singleton tree and merges it into the forest.
    pub fn add(&mut self, value: T) -> Handle
    where
        T: Ord,
    {
        let node = Node {
            value,
            order: 0,
            super_: None,
            child: None,
            prev: 0,
            next: None,
        };
        let handle = self.alloc(node);
        let idx = handle.index;
        self.node_mut(idx).prev = idx;
        self.absorb_roots(Some(idx));
        self.len += 1;
        handle
    }

    /// Absorbs `other`'s elements into `self`. `other` is left empty.
    /// Handles issued by `other` remain valid, now against `self`.
    pub fn merge_from(&mut self, other: &mut Self)
    where
        T: Ord,
    {
        if other.len == 0 {
            return;
        }
        if self.len == 0 {
            std::mem::swap(self, other);
            return;
        }

        let other_slots = std::mem::take(&mut other.slots);
        let base = self.slots.len() as u32;
        let mut remap: Vec<Option<u32>> = Vec::with_capacity(other_slots.len());
        for slot in other_slots {
            match slot {
                Slot::Occupied { node, generation } => {
                    let new_idx = self.slots.len() as u32;
                    self.slots.push(Slot::Occupied { node, generation });
                    remap.push(Some(new_idx));
                }
                Slot::Vacant { .. } => remap.push(None),
            }
        }
        for idx in base..self.slots.len() as u32 {
            if let Slot::Occupied { node, .. } = &mut self.slots[idx as usize] {
                node.super_ = node.super_.and_then(|o| remap[o as usize]);
                node.child = node.child.and_then(|o| remap[o as usize]);
                node.next = node.next.and_then(|o| remap[o as usize]);
                node.prev = remap[node.prev as usize]
                    .expect("prev always names an occupied slot");
            }
        }

        let other_roots = other.roots.and_then(|o| remap[o as usize]);
        other.free_head = None;
        other.roots = None;
        other.min = None;
        let other_len = other.len;
        other.len = 0;

        self.absorb_roots(other_roots);
        self.len += other_len;
    }

    fn detach_and_remerge(&mut self, idx: u32)
    where
        T: Ord,
    {
        self.list_remove(Owner::Root, idx);
        let children = self.node(idx).child;
        let mut c = children;
        while let Some(cp) = c {
            let next = self.node(cp).next;
            self.node_mut(cp).super_ = None;
            c = next;
        }
        self.absorb_roots(children);
    }

    /// Removes the element named by `handle`. Unconditionally sifts it
    /// to its tree's root, unlinks that tree, splits its children into
    /// a derivative forest, and merges that forest back.
    pub fn delete(&mut self, handle: Handle) -> Result<T>
    where
        T: Ord,
    {
        let idx = self.resolve(handle)?;
        loop {
            match self.true_parent(idx) {
                Some(p) => self.rotate_up(idx, p),
                None => break,
            }
        }
        self.detach_and_remerge(idx);
        self.len -= 1;
        Ok(self.free(idx))
    }

    pub fn delete_min(&mut self) -> Result<T>
    where
        T: Ord,
    {
        let idx = self.min.ok_or_else(|| Error::new(ErrorKind::Empty))?;
        let handle = Handle {
            index: idx,
            generation: self.generation_of(idx),
        };
        self.delete(handle)
    }

    /// Decrements the value named by `handle` in place, then restores
    /// the heap property by sifting the node up. The moving node wins
    /// ties against its superior, so it climbs as high as legal.
    pub fn decrease_key(&mut self, handle: Handle, delta: T) -> Result<()>
    where
        T: Ord + SubAssign<T>,
    {
        let idx = self.resolve(handle)?;
        self.node_mut(idx).value -= delta;
        self.sift_up_from(idx);
        if let Some(m) = self.min {
            if !(self.value(m) < self.value(idx)) {
                self.min = Some(idx);
            }
        }
        Ok(())
    }

    /// Walks every tree, checking the binomial-tree shape invariant
    /// (a node of order k has exactly k children, of orders 0..k-1 in
    /// some order), the heap property, and that `min` really is the
    /// minimum. Intended for property-style tests, not production use.
    #[cfg(any(test, feature = "debug-invariants"))]
    pub fn debug_check_invariants(&self) -> std::result::Result<(), String>
    where
        T: Ord + std::fmt::Debug,
    {
        let mut seen_roots = 0usize;
        let mut total = 0usize;
        let mut true_min: Option<u32> = None;

        let mut c = self.roots;
        let mut prev_order: i64 = -1;
        while let Some(idx) = c {
            if self.node(idx).super_.is_some() {
                return Err(format!("root {idx} has a superior"));
            }
            let order = self.node(idx).order as i64;
            if order <= prev_order {
                return Err("root list not in strictly ascending order".into());
            }
            prev_order = order;
            total += self.check_subtree(idx, &mut true_min)?;
            seen_roots += 1;
            c = self.node(idx).next;
        }
        if seen_roots > 64 {
            return Err("suspiciously long root list (possible cycle)".into());
        }
        if total != self.len {
            return Err(format!("len() says {} but walk found {total}", self.len));
        }
        match (self.min, true_min) {
            (None, None) => {}
            (Some(a), Some(b)) if a == b => {}
            (Some(a), Some(b)) => {
                if self.value(a) != self.value(b) {
                    return Err("cached min does not hold the minimum value".into());
                }
            }
            _ => return Err("cached min presence disagrees with walk".into()),
        }
        Ok(())
    }

    #[cfg(any(test, feature = "debug-invariants"))]
    fn check_subtree(&self, idx: u32, true_min: &mut Option<u32>) -> std::result::Result<usize, String>
    where
        T: Ord + std::fmt::Debug,
    {
        *true_min = Some(match *true_min {
            None => idx,
            Some(m) if self.value(idx) < self.value(m) => idx,
            Some(m) => m,
        });

        let order = self.node(idx).order;
        let mut count = 1usize;
        let mut child_count = 0u32;
        let mut c = self.node(idx).child;
        let mut prev_order: i64 = -1;
        while let Some(cp) = c {
            if self.true_parent(cp) != Some(idx) {
                return Err(format!("child {cp} does not resolve parent to {idx}"));
            }
            if self.value(idx) > self.value(cp) {
                return Err(format!("heap property violated between {idx} and {cp}"));
            }
            let corder = self.node(cp).order as i64;
            if corder <= prev_order {
                return Err("children not in ascending order".into());
            }
            prev_order = corder;
            count += self.check_subtree(cp, true_min)?;
            child_count += 1;
            c = self.node(cp).next;
        }
        if child_count != order {
            return Err(format!(
                "node {idx} claims order {order} but has {child_count} children"
            ));
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_basic() {
        let mut h = BinomialHeap::new();
        for v in [5, 3, 8, 1, 9, 2, 7] {
            h.add(v);
        }
        assert!(h.debug_check_invariants().is_ok());
        let mut out = Vec::new();
        while let Ok(v) = h.delete_min() {
            out.push(v);
        }
        assert_eq!(out, vec![1, 2, 3, 5, 7, 8, 9]);
    }

    #[test]
    fn decrease_to_new_min() {
        let mut h = BinomialHeap::new();
        h.add(10);
        let handle = h.add(20);
        h.add(15);
        h.decrease_key(handle, 15).unwrap(); // 20 -> 5
        assert!(h.debug_check_invariants().is_ok());
        assert_eq!(*h.peek_min().unwrap(), 5);
        assert_eq!(h.delete_min().unwrap(), 5);
    }

    #[test]
    fn handle_survives_many_rotations() {
        let mut h = BinomialHeap::new();
        let mut handles = Vec::new();
        for v in 0..40 {
            handles.push(h.add(100 - v));
        }
        assert!(h.debug_check_invariants().is_ok());
        // decrease the very first handle well past everything else
        h.decrease_key(handles[0], 1000).unwrap();
        assert!(h.debug_check_invariants().is_ok());
        assert_eq!(*h.peek_min().unwrap(), 100 - 0 - 1000);
        assert_eq!(h.delete(handles[0]).unwrap(), 100 - 1000);
        assert!(h.debug_check_invariants().is_ok());
    }

    #[test]
    fn delete_arbitrary_then_empty() {
        let mut h = BinomialHeap::new();
        let a = h.add(1);
        assert_eq!(h.delete(a).unwrap(), 1);
        assert!(h.is_empty());
        assert!(h.peek_min().is_err());
    }

    #[test]
    fn merge_preserves_handles() {
        let mut a = BinomialHeap::new();
        let mut b = BinomialHeap::new();
        a.add(5);
        b.add(1);
        b.add(9);
        a.merge_from(&mut b);
        assert!(b.is_empty());
        assert_eq!(a.len(), 3);
        assert!(a.debug_check_invariants().is_ok());
        assert_eq!(*a.peek_min().unwrap(), 1);
    }

    #[test]
    fn merge_preserves_handles_decrease() {
        let mut a = BinomialHeap::new();
        let mut b = BinomialHeap::new();
        let from_a = a.add(50);
        b.add(1);
        b.add(9);
        a.merge_from(&mut b);
        a.decrease_key(from_a, 49).unwrap();
        assert!(a.debug_check_invariants().is_ok());
        assert_eq!(*a.peek_min().unwrap(), 1);
    }

    #[test]
    fn stale_handle_is_rejected() {
        let mut h = BinomialHeap::new();
        let handle = h.add(1);
        h.delete(handle).unwrap();
        assert!(h.delete(handle).is_err());
    }

    #[test]
    fn clear_resets_to_empty() {
        let mut h = BinomialHeap::new();
        h.add(1);
        h.add(2);
        h.clear();
        assert!(h.is_empty());
        assert!(h.peek_min().is_err());
    }
}
