//! In-memory ordered key store.
//!
//! An AVL tree whose nodes live in one arena and whose key bytes live in a
//! second, append-only byte arena. Every node carries an occurrence counter,
//! so a repeated key never costs memory beyond its counter bump.

use std::cmp::Ordering;

use crate::error::Result;
use crate::record::ElementCount;

const NIL: u32 = u32::MAX;

#[derive(Clone, Copy, Debug)]
struct Node {
    key_start: usize,
    count: ElementCount,
    key_len: u32,
    left: u32,
    right: u32,
    height: u8,
}

/// Bookkeeping bytes one distinct key costs on top of its own bytes.
pub const TREE_ELEMENT_SIZE: usize = std::mem::size_of::<Node>();

/// What happened to a key handed to `KeyTree::insert`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// First occurrence; the key is now stored.
    Inserted,
    /// Already present; its counter was bumped.
    Duplicate,
    /// Unknown key while the tree is closed; nothing was stored.
    Dropped,
}

/// Whether the tree may still grow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpansionState {
    Open,
    /// Known keys keep counting; new keys are dropped.
    Closed,
}

pub struct KeyTree {
    nodes: Vec<Node>,
    keys: Vec<u8>,
    root: u32,
}

impl Default for KeyTree {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyTree {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            keys: Vec::new(),
            root: NIL,
        }
    }

    /// Number of distinct keys stored.
    pub fn elements_in_tree(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drops every key.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.keys.clear();
        self.root = NIL;
    }

    fn key(&self, idx: u32) -> &[u8] {
        let node = &self.nodes[idx as usize];
        &self.keys[node.key_start..node.key_start + node.key_len as usize]
    }

    fn height(&self, idx: u32) -> u8 {
        if idx == NIL {
            0
        } else {
            self.nodes[idx as usize].height
        }
    }

    pub fn insert<C>(&mut self, key: &[u8], state: ExpansionState, cmp: &C) -> Result<InsertOutcome>
    where
        C: Fn(&[u8], &[u8]) -> Ordering + ?Sized,
    {
        // Walk down first so duplicates and dropped keys never touch the arenas.
        let mut path: Vec<(u32, Ordering)> = Vec::with_capacity(2 * self.height(self.root) as usize);
        let mut cur = self.root;
        while cur != NIL {
            let ord = cmp(key, self.key(cur));
            if ord == Ordering::Equal {
                self.nodes[cur as usize].count += 1;
                return Ok(InsertOutcome::Duplicate);
            }
            path.push((cur, ord));
            let node = &self.nodes[cur as usize];
            cur = if ord == Ordering::Less { node.left } else { node.right };
        }
        if state == ExpansionState::Closed {
            return Ok(InsertOutcome::Dropped);
        }

        self.nodes.try_reserve(1)?;
        self.keys.try_reserve(key.len())?;
        let key_start = self.keys.len();
        self.keys.extend_from_slice(key);
        let mut child = self.nodes.len() as u32;
        self.nodes.push(Node {
            key_start,
            count: 1,
            key_len: key.len() as u32,
            left: NIL,
            right: NIL,
            height: 1,
        });

        // Relink and rebalance on the way back up.
        while let Some((parent, ord)) = path.pop() {
            let node = &mut self.nodes[parent as usize];
            if ord == Ordering::Less {
                node.left = child;
            } else {
                node.right = child;
            }
            child = self.rebalance(parent);
        }
        self.root = child;
        Ok(InsertOutcome::Inserted)
    }

    fn update_height(&mut self, idx: u32) {
        let node = self.nodes[idx as usize];
        self.nodes[idx as usize].height = 1 + self.height(node.left).max(self.height(node.right));
    }

    fn balance_factor(&self, idx: u32) -> i16 {
        let node = &self.nodes[idx as usize];
        self.height(node.left) as i16 - self.height(node.right) as i16
    }

    fn rotate_right(&mut self, idx: u32) -> u32 {
        let pivot = self.nodes[idx as usize].left;
        self.nodes[idx as usize].left = self.nodes[pivot as usize].right;
        self.nodes[pivot as usize].right = idx;
        self.update_height(idx);
        self.update_height(pivot);
        pivot
    }

    fn rotate_left(&mut self, idx: u32) -> u32 {
        let pivot = self.nodes[idx as usize].right;
        self.nodes[idx as usize].right = self.nodes[pivot as usize].left;
        self.nodes[pivot as usize].left = idx;
        self.update_height(idx);
        self.update_height(pivot);
        pivot
    }

    /// Restores the AVL invariant at `idx` and returns the new subtree root.
    fn rebalance(&mut self, idx: u32) -> u32 {
        self.update_height(idx);
        let balance = self.balance_factor(idx);
        if balance > 1 {
            let left = self.nodes[idx as usize].left;
            if self.balance_factor(left) < 0 {
                self.nodes[idx as usize].left = self.rotate_left(left);
            }
            return self.rotate_right(idx);
        }
        if balance < -1 {
            let right = self.nodes[idx as usize].right;
            if self.balance_factor(right) > 0 {
                self.nodes[idx as usize].right = self.rotate_right(right);
            }
            return self.rotate_left(idx);
        }
        idx
    }

    /// Keys in ascending order with their counters.
    pub fn iter(&self) -> TreeIter<'_> {
        let mut iter = TreeIter {
            tree: self,
            stack: Vec::with_capacity(self.height(self.root) as usize),
        };
        iter.push_left(self.root);
        iter
    }
}

pub struct TreeIter<'a> {
    tree: &'a KeyTree,
    stack: Vec<u32>,
}

impl<'a> TreeIter<'a> {
    fn push_left(&mut self, mut idx: u32) {
        while idx != NIL {
            self.stack.push(idx);
            idx = self.tree.nodes[idx as usize].left;
        }
    }
}

impl<'a> Iterator for TreeIter<'a> {
    type Item = (&'a [u8], ElementCount);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.stack.pop()?;
        let tree = self.tree;
        let node = &tree.nodes[idx as usize];
        self.push_left(node.right);
        Some((tree.key(idx), node.count))
    }
}
