use alloc::vec::Vec;

use tgdh_types::{Error, MemberId, NodeName, Result};

use crate::node::NodeIdx;
use crate::KeyTree;

impl KeyTree {
    /// The other child of a node's parent.
    pub(crate) fn sibling(&self, idx: NodeIdx) -> Result<NodeIdx> {
        let parent = self
            .node(idx)
            .parent
            .ok_or_else(|| Error::Structure("the root has no sibling".into()))?;

        let p = self.node(parent);
        let sibling = if p.left == Some(idx) { p.right } else { p.left };

        sibling.ok_or_else(|| Error::Structure("parent is missing a child".into()))
    }

    /// The nodes from `idx` up to and including the root.
    pub(crate) fn key_path(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        let mut path = alloc::vec![idx];
        let mut cursor = idx;

        while let Some(parent) = self.node(cursor).parent {
            path.push(parent);
            cursor = parent;
        }

        path
    }

    /// The sibling of each non-root node on the key path, in the same order.
    pub(crate) fn co_path(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        self.key_path(idx)
            .into_iter()
            .filter(|n| self.node(*n).parent.is_some())
            .map(|n| self.sibling(n).expect("non-root node has a sibling"))
            .collect()
    }

    /// The owner's key path, leaf to root, as names.
    pub fn my_key_path(&self) -> Result<Vec<NodeName>> {
        let me = self.me_idx()?;

        Ok(self
            .key_path(me)
            .into_iter()
            .map(|idx| self.node(idx).name)
            .collect())
    }

    /// The owner's co-path as names.
    pub fn my_co_path(&self) -> Result<Vec<NodeName>> {
        let me = self.me_idx()?;

        Ok(self
            .co_path(me)
            .into_iter()
            .map(|idx| self.node(idx).name)
            .collect())
    }

    /// The blinded keys this member still needs after the latest membership
    /// event: the refresh path intersected with the owner's co-path.
    pub fn update_path(&self) -> Result<Vec<NodeName>> {
        let co = self.my_co_path()?;

        Ok(co
            .into_iter()
            .filter(|name| self.refresh.contains(name))
            .collect())
    }

    /// The member owning the first (left-most) leaf of the subtree rooted at
    /// `name`.
    ///
    /// Any leaf of the subtree would do, since all of them derive the same
    /// blinded key for its root; the left-most is the canonical pick, so every
    /// member computes the same subscription schedule.
    pub fn representative(&self, name: NodeName) -> Result<MemberId> {
        let mut cursor = self.find_by_name(name)?;

        while let Some(left) = self.node(cursor).left {
            cursor = left;
        }

        self.node(cursor)
            .mid
            .ok_or_else(|| Error::Structure("leaf without a member id".into()))
    }
}
