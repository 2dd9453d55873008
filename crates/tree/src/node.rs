use num_bigint::BigUint;
use tgdh_types::{MemberId, NodeKind, NodeName};

/// Arena index of a node. Indices stay stable across mutations; freed slots
/// are recycled.
pub(crate) type NodeIdx = usize;

/// Which side of its parent a node hangs from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// No parent; only the root.
    #[default]
    Na,
    /// Left child.
    Left,
    /// Right child.
    Right,
}

/// One vertex of the key tree.
///
/// The `<l,v>` name is recomputed from the root after structural mutations so
/// it always matches the node's actual position. Key material is optional: a
/// member only ever holds private keys along its own key path.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: NodeName,
    pub(crate) pos: Position,
    pub(crate) kind: NodeKind,
    pub(crate) mid: Option<MemberId>,
    pub(crate) key: Option<BigUint>,
    pub(crate) bkey: Option<BigUint>,
    pub(crate) parent: Option<NodeIdx>,
    pub(crate) left: Option<NodeIdx>,
    pub(crate) right: Option<NodeIdx>,
}

impl Node {
    /// A fresh root node.
    pub(crate) fn root() -> Self {
        Self {
            name: NodeName::root(),
            pos: Position::Na,
            kind: NodeKind::Root,
            mid: None,
            key: None,
            bkey: None,
            parent: None,
            left: None,
            right: None,
        }
    }

    /// A fresh internal child attached under `parent`.
    pub(crate) fn child(name: NodeName, pos: Position, parent: NodeIdx) -> Self {
        Self {
            name,
            pos,
            kind: NodeKind::Inter,
            mid: None,
            key: None,
            bkey: None,
            parent: Some(parent),
            left: None,
            right: None,
        }
    }

    /// The `<l,v>` position of the node.
    pub fn name(&self) -> NodeName {
        self.name
    }

    /// The role of the node.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// The member id, present iff the node is a leaf.
    pub fn member(&self) -> Option<MemberId> {
        self.mid
    }

    /// The private key, if this member knows it.
    pub fn private_key(&self) -> Option<&BigUint> {
        self.key.as_ref()
    }

    /// The blinded key, if known.
    pub fn blind_key(&self) -> Option<&BigUint> {
        self.bkey.as_ref()
    }

    /// Returns `true` when the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    pub(crate) fn clear_key_material(&mut self) {
        self.key = None;
        self.bkey = None;
    }
}
