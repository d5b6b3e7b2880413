// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Persistent hash map with structural sharing
//!
//! A hash array mapped trie whose nodes are reference counted. Cloning a map shares
//! the root in O(1); mutation copies only the nodes on the touched path
//! (`Arc::make_mut`), so older versions stay valid and unchanged for their readers.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::mem;
use std::sync::Arc;

const BITS: u32 = 5;
const MASK: u64 = (1 << BITS) - 1;

#[derive(Clone)]
enum Entry<K, V> {
    Leaf { hash: u64, key: K, value: V },
    /// Distinct keys sharing the full 64-bit hash
    Collision { hash: u64, pairs: Vec<(K, V)> },
    Branch(Arc<Node<K, V>>),
}

impl<K, V> Entry<K, V> {
    fn leaf_hash(&self) -> u64 {
        match self {
            Entry::Leaf { hash, .. } | Entry::Collision { hash, .. } => *hash,
            Entry::Branch(_) => unreachable!("branches carry no hash"),
        }
    }
}

#[derive(Clone)]
struct Node<K, V> {
    bitmap: u32,
    entries: Vec<Entry<K, V>>,
}

impl<K, V> Node<K, V> {
    fn empty() -> Self {
        Self {
            bitmap: 0,
            entries: Vec::new(),
        }
    }

    fn single(entry: Entry<K, V>, hash: u64, shift: u32) -> Self {
        Self {
            bitmap: bit_for(hash, shift),
            entries: vec![entry],
        }
    }
}

fn bit_for(hash: u64, shift: u32) -> u32 {
    1 << ((hash >> shift) & MASK)
}

fn slot(bitmap: u32, bit: u32) -> usize {
    (bitmap & (bit - 1)).count_ones() as usize
}

fn hash_of<Q: Hash + ?Sized>(key: &Q) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Immutable-by-version map; `clone` is O(1)
pub struct PersistentMap<K, V> {
    root: Arc<Node<K, V>>,
    len: usize,
}

impl<K, V> Clone for PersistentMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: Arc::clone(&self.root),
            len: self.len,
        }
    }
}

impl<K, V> Default for PersistentMap<K, V> {
    fn default() -> Self {
        Self {
            root: Arc::new(Node::empty()),
            len: 0,
        }
    }
}

impl<K, V> PersistentMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether two maps share the same root node
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.root, &other.root)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = hash_of(key);
        let mut node: &Node<K, V> = &self.root;
        let mut shift = 0;
        loop {
            let bit = bit_for(hash, shift);
            if node.bitmap & bit == 0 {
                return None;
            }
            match &node.entries[slot(node.bitmap, bit)] {
                Entry::Leaf { hash: h, key: k, value } => {
                    return (*h == hash && k == key).then_some(value);
                }
                Entry::Collision { hash: h, pairs } => {
                    if *h != hash {
                        return None;
                    }
                    return pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v);
                }
                Entry::Branch(child) => {
                    node = child;
                    shift += BITS;
                }
            }
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace; returns the previous value
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = hash_of(&key);
        let previous = Self::insert_at(&mut self.root, 0, hash, key, value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    fn insert_at(node: &mut Arc<Node<K, V>>, shift: u32, hash: u64, key: K, value: V) -> Option<V> {
        let node = Arc::make_mut(node);
        let bit = bit_for(hash, shift);
        let idx = slot(node.bitmap, bit);
        if node.bitmap & bit == 0 {
            node.entries.insert(idx, Entry::Leaf { hash, key, value });
            node.bitmap |= bit;
            return None;
        }

        match &mut node.entries[idx] {
            Entry::Branch(child) => Self::insert_at(child, shift + BITS, hash, key, value),
            Entry::Leaf { hash: h, key: k, value: v } if *h == hash => {
                if *k == key {
                    return Some(mem::replace(v, value));
                }
                let pairs = vec![(k.clone(), v.clone()), (key, value)];
                node.entries[idx] = Entry::Collision { hash, pairs };
                None
            }
            Entry::Collision { hash: h, pairs } if *h == hash => {
                if let Some((_, v)) = pairs.iter_mut().find(|(k, _)| *k == key) {
                    return Some(mem::replace(v, value));
                }
                pairs.push((key, value));
                None
            }
            _ => {
                // A leaf or collision with a different hash occupies the slot: push
                // it one level down and retry there.
                let existing = node.entries.remove(idx);
                let existing_hash = existing.leaf_hash();
                let mut child = Arc::new(Node::single(existing, existing_hash, shift + BITS));
                let previous = Self::insert_at(&mut child, shift + BITS, hash, key, value);
                node.entries.insert(idx, Entry::Branch(child));
                previous
            }
        }
    }

    /// Remove `key`; returns the removed value
    pub fn remove(&mut self, key: &K) -> Option<V> {
        // Avoid copying the path when there is nothing to remove.
        if !self.contains_key(key) {
            return None;
        }
        let hash = hash_of(key);
        let removed = Self::remove_at(&mut self.root, 0, hash, key);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    fn remove_at(node: &mut Arc<Node<K, V>>, shift: u32, hash: u64, key: &K) -> Option<V> {
        let node = Arc::make_mut(node);
        let bit = bit_for(hash, shift);
        if node.bitmap & bit == 0 {
            return None;
        }
        let idx = slot(node.bitmap, bit);

        let removed = match &mut node.entries[idx] {
            Entry::Leaf { hash: h, key: k, .. } => {
                if *h != hash || *k != *key {
                    return None;
                }
                node.bitmap &= !bit;
                match node.entries.remove(idx) {
                    Entry::Leaf { value, .. } => Some(value),
                    _ => None,
                }
            }
            Entry::Collision { hash: h, pairs } => {
                if *h != hash {
                    return None;
                }
                let pos = pairs.iter().position(|(k, _)| k == key)?;
                let (_, value) = pairs.remove(pos);
                if pairs.len() == 1 {
                    if let Some((k, v)) = pairs.pop() {
                        node.entries[idx] = Entry::Leaf { hash, key: k, value: v };
                    }
                }
                Some(value)
            }
            Entry::Branch(child) => {
                let removed = Self::remove_at(child, shift + BITS, hash, key);
                if removed.is_some() {
                    Self::collapse(node, idx, bit);
                }
                removed
            }
        };
        removed
    }

    /// Drop an emptied branch, or pull a lone leaf up into its parent slot
    fn collapse(node: &mut Node<K, V>, idx: usize, bit: u32) {
        let replacement = match &node.entries[idx] {
            Entry::Branch(child) if child.entries.is_empty() => None,
            Entry::Branch(child)
                if child.entries.len() == 1 && !matches!(child.entries[0], Entry::Branch(_)) =>
            {
                Some(child.entries[0].clone())
            }
            _ => return,
        };
        match replacement {
            Some(entry) => node.entries[idx] = entry,
            None => {
                node.entries.remove(idx);
                node.bitmap &= !bit;
            }
        }
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            stack: vec![self.root.entries.iter()],
            collision: None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    /// Pick an arbitrary key by descending random branches
    pub fn random_key(&self, rng: &mut fastrand::Rng) -> Option<&K> {
        if self.is_empty() {
            return None;
        }
        let mut node: &Node<K, V> = &self.root;
        loop {
            if node.entries.is_empty() {
                return None;
            }
            match &node.entries[rng.usize(..node.entries.len())] {
                Entry::Leaf { key, .. } => return Some(key),
                Entry::Collision { pairs, .. } => {
                    return pairs.get(rng.usize(..pairs.len())).map(|(k, _)| k)
                }
                Entry::Branch(child) => node = child,
            }
        }
    }
}

/// Iterator over a [`PersistentMap`]
pub struct Iter<'a, K, V> {
    stack: Vec<std::slice::Iter<'a, Entry<K, V>>>,
    collision: Option<std::slice::Iter<'a, (K, V)>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pairs) = &mut self.collision {
                if let Some((k, v)) = pairs.next() {
                    return Some((k, v));
                }
                self.collision = None;
            }
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(Entry::Leaf { key, value, .. }) => return Some((key, value)),
                Some(Entry::Collision { pairs, .. }) => self.collision = Some(pairs.iter()),
                Some(Entry::Branch(child)) => self.stack.push(child.entries.iter()),
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}
