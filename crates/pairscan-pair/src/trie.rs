//! Prefix trie over lowercased preview base names.

use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct Node {
    children: BTreeMap<char, usize>,
    /// Indices of the values whose key ends at this node.
    values: Vec<usize>,
}

/// Arena-backed prefix trie mapping string keys to value indices.
///
/// Children are ordered, so every traversal is deterministic.
#[derive(Debug)]
pub struct PrefixTrie {
    nodes: Vec<Node>,
}

impl PrefixTrie {
    /// Create an empty trie.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }

    /// Build a trie from `(key, index)` pairs.
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = (&'a str, usize)>) -> Self {
        let mut trie = Self::new();
        for (key, index) in keys {
            trie.insert(key, index);
        }
        trie
    }

    /// Insert a key. The same key may carry several indices.
    pub fn insert(&mut self, key: &str, index: usize) {
        let mut node = 0;
        for ch in key.chars() {
            node = match self.nodes[node].children.get(&ch) {
                Some(&next) => next,
                None => {
                    let next = self.nodes.len();
                    self.nodes.push(Node::default());
                    self.nodes[node].children.insert(ch, next);
                    next
                }
            };
        }
        self.nodes[node].values.push(index);
    }

    fn find(&self, key: &str) -> Option<usize> {
        let mut node = 0;
        for ch in key.chars() {
            node = *self.nodes[node].children.get(&ch)?;
        }
        Some(node)
    }

    /// Indices stored under exactly `key`.
    pub fn exact(&self, key: &str) -> &[usize] {
        match self.find(key) {
            Some(node) => &self.nodes[node].values,
            None => &[],
        }
    }

    /// Collect indices of keys that strictly extend `prefix`, stopping once
    /// `out` holds `limit` entries. Only indices accepted by `accept` count.
    pub fn extensions_of(
        &self,
        prefix: &str,
        limit: usize,
        accept: impl Fn(usize) -> bool,
        out: &mut Vec<usize>,
    ) {
        let Some(start) = self.find(prefix) else {
            return;
        };
        let mut stack: Vec<usize> = self.nodes[start].children.values().rev().copied().collect();
        while let Some(node) = stack.pop() {
            for &index in &self.nodes[node].values {
                if out.len() >= limit {
                    return;
                }
                if accept(index) {
                    out.push(index);
                }
            }
            stack.extend(self.nodes[node].children.values().rev().copied());
        }
    }

    /// Collect indices of keys that are strict prefixes of `key`, longest
    /// first, stopping once `out` holds `limit` entries.
    pub fn prefixes_of(
        &self,
        key: &str,
        limit: usize,
        accept: impl Fn(usize) -> bool,
        out: &mut Vec<usize>,
    ) {
        let mut path = Vec::new();
        let mut node = 0;
        for ch in key.chars() {
            path.push(node);
            match self.nodes[node].children.get(&ch) {
                Some(&next) => node = next,
                None => break,
            }
        }
        // The root holds the empty key, which is not a useful match.
        for &node in path.iter().skip(1).rev() {
            for &index in &self.nodes[node].values {
                if out.len() >= limit {
                    return;
                }
                if accept(index) {
                    out.push(index);
                }
            }
        }
    }

    /// Number of nodes, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl Default for PrefixTrie {
    fn default() -> Self {
        Self::new()
    }
}
