//! Binary PATRICIA Trie over IP Prefix Bits
//!
//! `PrefixTrie` is the single-owner data structure behind every logical
//! database. It has no locking of its own; `TrieEngine` wraps it in a
//! `RwLock`.
//!
//! ## Node Layout
//!
//! ```text
//!                  [10.0.0.0/8 = "A"]
//!                   /              \
//!        [10.0.0.0/15]            [10.128.0.0/9 = "C"]
//!         /         \
//! [10.0.0.0/16 = "B"] [10.1.0.0/16 = "D"]
//! ```
//!
//! Each node records the full key bits of its path and the bit offset (`len`)
//! at which that path ends. A child hangs off the bit at index `len` of its
//! parent, so runs of single-child nodes never exist: a node either stores a
//! value or branches two ways. `[10.0.0.0/15]` above is a structural branch
//! node without a value.
//!
//! IPv4 and IPv6 keys use separate roots, so every walk is bounded by the
//! family's bit width.

use crate::storage::prefix::{bit_at, canonical, common_prefix_len, Family, PrefixKey};

type Link<V> = Option<Box<Node<V>>>;

#[derive(Debug)]
struct Node<V> {
    /// Path bits, zeroed past `len`
    key: u128,
    /// Bit offset at which this node's path ends
    len: u8,
    /// Present iff an inserted key terminates here
    value: Option<V>,
    /// Children for bit value 0 and 1 at index `len`
    children: [Link<V>; 2],
}

impl<V> Node<V> {
    fn leaf(key: u128, len: u8, value: V) -> Self {
        Self {
            key,
            len,
            value: Some(value),
            children: [None, None],
        }
    }

    fn branch(key: u128, len: u8) -> Self {
        Self {
            key: canonical(key, len),
            len,
            value: None,
            children: [None, None],
        }
    }

    /// Returns true if this node's path is a prefix of `bits`.
    #[inline]
    fn covers(&self, bits: u128) -> bool {
        common_prefix_len(self.key, bits, self.len) == self.len
    }
}

/// A path-compressed binary radix trie keyed by `PrefixKey`.
///
/// # Example
///
/// ```
/// use triedis::storage::{PrefixKey, PrefixTrie};
///
/// let mut trie = PrefixTrie::new();
/// trie.insert("10.0.0.0/8".parse().unwrap(), "A");
/// trie.insert("10.1.0.0/16".parse().unwrap(), "B");
///
/// let query: PrefixKey = "10.1.2.3".parse().unwrap();
/// let (matched, value) = trie.longest_match(&query).unwrap();
/// assert_eq!(matched.to_string(), "10.1.0.0/16");
/// assert_eq!(*value, "B");
/// ```
#[derive(Debug)]
pub struct PrefixTrie<V> {
    v4: Link<V>,
    v6: Link<V>,
    /// Number of nodes holding a value
    len: usize,
}

impl<V> Default for PrefixTrie<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> PrefixTrie<V> {
    /// Creates an empty trie.
    pub fn new() -> Self {
        Self {
            v4: None,
            v6: None,
            len: 0,
        }
    }

    fn root(&self, family: Family) -> &Link<V> {
        match family {
            Family::V4 => &self.v4,
            Family::V6 => &self.v6,
        }
    }

    fn root_mut(&mut self, family: Family) -> &mut Link<V> {
        match family {
            Family::V4 => &mut self.v4,
            Family::V6 => &mut self.v6,
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores `value` at exactly `key`, returning the value it replaced.
    pub fn insert(&mut self, key: PrefixKey, value: V) -> Option<V> {
        let previous = insert_at(
            self.root_mut(key.family()),
            key.bits(),
            key.prefix_len(),
            value,
        );
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Returns the value stored at exactly `key`. No prefix matching.
    pub fn get(&self, key: &PrefixKey) -> Option<&V> {
        let (bits, len) = (key.bits(), key.prefix_len());
        let mut cur = self.root(key.family()).as_deref();

        while let Some(node) = cur {
            if node.len > len || !node.covers(bits) {
                return None;
            }
            if node.len == len {
                return node.value.as_ref();
            }
            cur = node.children[bit_at(bits, node.len)].as_deref();
        }

        None
    }

    /// Returns the most specific stored prefix containing `query`, with its value.
    ///
    /// The query's own prefix length is an inclusive ceiling: stored keys longer
    /// than the query never match.
    pub fn longest_match(&self, query: &PrefixKey) -> Option<(PrefixKey, &V)> {
        let family = query.family();
        let (bits, len) = (query.bits(), query.prefix_len());
        let mut best = None;
        let mut cur = self.root(family).as_deref();

        while let Some(node) = cur {
            if node.len > len || !node.covers(bits) {
                break;
            }
            if let Some(value) = &node.value {
                best = Some((PrefixKey::from_parts(family, node.key, node.len), value));
            }
            if node.len == len {
                break;
            }
            cur = node.children[bit_at(bits, node.len)].as_deref();
        }

        best
    }

    /// Removes the value stored at exactly `key`, pruning emptied branches.
    pub fn remove(&mut self, key: &PrefixKey) -> Option<V> {
        let removed = remove_at(
            self.root_mut(key.family()),
            key.bits(),
            key.prefix_len(),
        );
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Drops every node.
    pub fn clear(&mut self) {
        self.v4 = None;
        self.v6 = None;
        self.len = 0;
    }

    /// Every stored key with its value, IPv4 first, in bit order.
    pub fn entries(&self) -> Vec<(PrefixKey, &V)> {
        let mut out = Vec::with_capacity(self.len);
        collect(self.v4.as_deref(), Family::V4, &mut out);
        collect(self.v6.as_deref(), Family::V6, &mut out);
        out
    }

    /// Every stored key, IPv4 first, in bit order.
    pub fn keys(&self) -> Vec<PrefixKey> {
        self.entries().into_iter().map(|(key, _)| key).collect()
    }

    /// Stored keys equal to or more specific than `filter`.
    pub fn keys_within(&self, filter: &PrefixKey) -> Vec<PrefixKey> {
        let family = filter.family();
        let (bits, len) = (filter.bits(), filter.prefix_len());
        let mut out = Vec::new();
        let mut cur = self.root(family).as_deref();

        while let Some(node) = cur {
            if node.len >= len {
                // Everything below this node shares its leading `len` bits
                if filter.contains(&PrefixKey::from_parts(family, node.key, node.len)) {
                    collect(Some(node), family, &mut out);
                }
                break;
            }
            if !node.covers(bits) {
                break;
            }
            cur = node.children[bit_at(bits, node.len)].as_deref();
        }

        out.into_iter().map(|(key, _)| key).collect()
    }

    /// Total nodes, structural branches included.
    pub fn node_count(&self) -> usize {
        count_nodes(self.v4.as_deref()) + count_nodes(self.v6.as_deref())
    }
}

fn insert_at<V>(link: &mut Link<V>, key: u128, len: u8, value: V) -> Option<V> {
    let Some(node) = link else {
        *link = Some(Box::new(Node::leaf(key, len, value)));
        return None;
    };

    let shared = common_prefix_len(key, node.key, len.min(node.len));

    if shared == node.len {
        if node.len == len {
            return node.value.replace(value);
        }
        let bit = bit_at(key, node.len);
        return insert_at(&mut node.children[bit], key, len, value);
    }

    // The new key diverges above `node`, or is a shorter prefix of it.
    // Either way `node` moves one level down.
    let node_bit = bit_at(node.key, shared);
    let existing = link.take();

    let replacement = if shared == len {
        let mut fresh = Node::leaf(key, len, value);
        fresh.children[node_bit] = existing;
        fresh
    } else {
        let mut branch = Node::branch(key, shared);
        branch.children[node_bit] = existing;
        branch.children[bit_at(key, shared)] = Some(Box::new(Node::leaf(key, len, value)));
        branch
    };

    *link = Some(Box::new(replacement));
    None
}

fn remove_at<V>(link: &mut Link<V>, key: u128, len: u8) -> Option<V> {
    let node = link.as_mut()?;
    if node.len > len || !node.covers(key) {
        return None;
    }

    let removed = if node.len == len {
        node.value.take()
    } else {
        let bit = bit_at(key, node.len);
        remove_at(&mut node.children[bit], key, len)
    };

    if removed.is_some() {
        compact(link);
    }
    removed
}

/// Restores the trie shape after a removal: a valueless node with no children
/// is dropped and one with a single child is replaced by that child.
fn compact<V>(link: &mut Link<V>) {
    let Some(node) = link.as_mut() else {
        return;
    };
    if node.value.is_some() {
        return;
    }

    let replacement = match (node.children[0].is_some(), node.children[1].is_some()) {
        (true, true) => return,
        (true, false) => node.children[0].take(),
        (false, true) => node.children[1].take(),
        (false, false) => None,
    };
    *link = replacement;
}

fn collect<'a, V>(node: Option<&'a Node<V>>, family: Family, out: &mut Vec<(PrefixKey, &'a V)>) {
    let Some(node) = node else {
        return;
    };
    if let Some(value) = &node.value {
        out.push((PrefixKey::from_parts(family, node.key, node.len), value));
    }
    collect(node.children[0].as_deref(), family, out);
    collect(node.children[1].as_deref(), family, out);
}

fn count_nodes<V>(node: Option<&Node<V>>) -> usize {
    match node {
        Some(node) => {
            1 + count_nodes(node.children[0].as_deref()) + count_nodes(node.children[1].as_deref())
        }
        None => 0,
    }
}
