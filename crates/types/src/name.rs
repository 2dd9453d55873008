use alloc::format;
use core::fmt;
use core::str::FromStr;

use msgpacker::MsgPacker;
use serde::{Deserialize, Serialize};

use crate::Error;

/// The unique id a member keeps for the lifetime of its session.
pub type MemberId = u32;

/// The `<l,v>` position of a node within the key tree.
///
/// `l` is the level (root at 0); `v` counts positions within the level, so a
/// left child sits at `2v` and a right child at `2v + 1` of its parent's `v`.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    MsgPacker,
)]
pub struct NodeName {
    /// Level index; the root is at level 0.
    pub l: u32,
    /// Position within the level, `0..2^l`.
    pub v: u32,
}

impl NodeName {
    /// Creates a name from its level and position indices.
    pub fn new(l: u32, v: u32) -> Self {
        Self { l, v }
    }

    /// The root name, `<0,0>`.
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns `true` for the root name.
    pub fn is_root(&self) -> bool {
        self.l == 0
    }

    /// Returns `true` when the node is its parent's left child.
    ///
    /// Meaningless for the root, which has no parent.
    pub fn is_left(&self) -> bool {
        self.v % 2 == 0
    }

    /// The parent name, if any.
    pub fn parent(&self) -> Option<Self> {
        (!self.is_root()).then(|| Self::new(self.l - 1, self.v / 2))
    }

    /// The sibling name, if any.
    pub fn sibling(&self) -> Option<Self> {
        (!self.is_root()).then(|| Self::new(self.l, self.v ^ 1))
    }

    /// The left child name.
    pub fn left_child(&self) -> Self {
        Self::new(self.l + 1, 2 * self.v)
    }

    /// The right child name.
    pub fn right_child(&self) -> Self {
        Self::new(self.l + 1, 2 * self.v + 1)
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{},{}>", self.l, self.v)
    }
}

impl FromStr for NodeName {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let inner = s
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .ok_or_else(|| Error::Wire(format!("node name `{s}` is not `<l,v>`")))?;

        let (l, v) = inner
            .split_once(',')
            .ok_or_else(|| Error::Wire(format!("node name `{s}` has no separator")))?;

        let l = l
            .parse()
            .map_err(|_| Error::Wire(format!("invalid level index in `{s}`")))?;
        let v = v
            .parse()
            .map_err(|_| Error::Wire(format!("invalid position index in `{s}`")))?;

        Ok(Self::new(l, v))
    }
}

/// The role a node plays within the tree.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    MsgPacker,
)]
pub enum NodeKind {
    /// The single root node.
    Root,
    /// An internal node carrying a derived key.
    #[default]
    Inter,
    /// A leaf owned by a regular member.
    Mem,
    /// The leaf of the member sponsoring the latest membership change.
    Spon,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Root => "root",
            NodeKind::Inter => "inter",
            NodeKind::Mem => "mem",
            NodeKind::Spon => "spon",
        };

        f.write_str(s)
    }
}

#[test]
fn node_name_arithmetic() {
    let root = NodeName::root();

    assert!(root.is_root());
    assert_eq!(root.parent(), None);
    assert_eq!(root.sibling(), None);
    assert_eq!(root.left_child(), NodeName::new(1, 0));
    assert_eq!(root.right_child(), NodeName::new(1, 1));

    let n = NodeName::new(2, 3);

    assert!(!n.is_left());
    assert_eq!(n.parent(), Some(NodeName::new(1, 1)));
    assert_eq!(n.sibling(), Some(NodeName::new(2, 2)));
}

#[test]
fn node_name_round_trips_through_text() {
    let n = NodeName::new(3, 5);
    let s = n.to_string();

    assert_eq!(s, "<3,5>");
    assert_eq!(s.parse::<NodeName>().unwrap(), n);

    assert!("<3;5>".parse::<NodeName>().is_err());
    assert!("3,5".parse::<NodeName>().is_err());
    assert!("<a,5>".parse::<NodeName>().is_err());
}
