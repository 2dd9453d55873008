use tgdh_types::{Error, MemberId, NodeKind, Result, ScalarSource};

use crate::node::{NodeIdx, Position};
use crate::KeyTree;

/// Outcome of applying a join event to a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinSummary {
    /// The member sponsoring the join (previously held the insertion leaf).
    pub sponsor: MemberId,
    /// The id assigned to the new member.
    pub joined: MemberId,
}

/// Outcome of applying a leave event to a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveSummary {
    /// The member sponsoring the rekey after the departure.
    pub sponsor: MemberId,
    /// The member that left.
    pub departed: MemberId,
}

impl KeyTree {
    /// Reshapes the tree for a joining member.
    ///
    /// Two leaves are attached under the insertion point; the left one
    /// inherits the insertion leaf's identity and becomes the sponsor, the
    /// right one becomes the new member with the next id. The refresh path is
    /// the new member's key path. Deterministic, so every member applies the
    /// identical mutation locally.
    pub fn join_event(&mut self) -> Result<JoinSummary> {
        self.type_assign();

        let insertion = self.find_insertion();
        let (left, right) = self.add_children(insertion);

        let (mid, key, bkey) = {
            let node = self.node_mut(insertion);
            let moved = (node.mid.take(), node.key.take(), node.bkey.take());

            node.kind = NodeKind::Inter;

            moved
        };

        let sponsor = mid.ok_or_else(|| {
            Error::Structure("insertion node does not carry a member id".into())
        })?;

        {
            let node = self.node_mut(left);

            node.kind = NodeKind::Spon;
            node.mid = Some(sponsor);
            node.key = key;
            node.bkey = bkey;
        }

        let joined = self.next_member;

        {
            let node = self.node_mut(right);

            node.kind = NodeKind::Mem;
            node.mid = Some(joined);
        }

        self.next_member += 1;

        self.refresh = self
            .key_path(right)
            .into_iter()
            .map(|idx| self.node(idx).name)
            .collect();

        // my leaf moved into the sponsor slot if I held the insertion point
        if self.me == Some(insertion) {
            self.me = Some(left);
        }

        Ok(JoinSummary { sponsor, joined })
    }

    /// Removes a departed member by promoting its sibling.
    ///
    /// The sibling subtree takes the parent's place (or becomes the new root
    /// when the parent was the root). The sponsor is the right-most leaf of
    /// the promoted subtree; its key material is cleared so the departed
    /// member's knowledge cannot reach the next group key.
    pub fn leave_event(&mut self, departing: MemberId) -> Result<LeaveSummary> {
        {
            let root = self.node(self.root);
            let leaves = [root.left, root.right]
                .into_iter()
                .flatten()
                .filter(|idx| self.node(*idx).is_leaf())
                .count();

            if leaves == 2 {
                return Err(Error::GroupEmpty);
            }
        }

        let leaf = self.find_by_mid(departing)?;

        if !self.node(leaf).is_leaf() {
            return Err(Error::Structure("member id found on an internal node".into()));
        }

        self.type_assign();

        let parent = self
            .node(leaf)
            .parent
            .ok_or_else(|| Error::Structure("leaf without a parent".into()))?;
        let sibling = self.sibling(leaf)?;

        if parent == self.root {
            let node = self.node_mut(sibling);

            node.parent = None;
            node.pos = Position::Na;
            node.kind = NodeKind::Root;
            node.clear_key_material();

            self.release(leaf);
            self.release(parent);
            self.root = sibling;
        } else {
            let grandparent = self
                .node(parent)
                .parent
                .ok_or_else(|| Error::Structure("non-root node without a parent".into()))?;
            let slot = self.node(parent).pos;

            {
                let node = self.node_mut(sibling);

                node.parent = Some(grandparent);
                node.pos = slot;
            }

            {
                let node = self.node_mut(grandparent);

                if node.left == Some(parent) {
                    node.left = Some(sibling);
                } else {
                    node.right = Some(sibling);
                }
            }

            self.release(parent);
            self.release(leaf);
        }

        self.recalculate_names();

        let spon = self.rightmost_leaf(sibling);
        let sponsor = self
            .node(spon)
            .mid
            .ok_or_else(|| Error::Structure("sponsor leaf without a member id".into()))?;

        {
            let node = self.node_mut(spon);

            node.kind = NodeKind::Spon;
            node.clear_key_material();
        }

        self.refresh = self
            .key_path(spon)
            .into_iter()
            .map(|idx| self.node(idx).name)
            .collect();

        if self.me.is_some() {
            self.locate_self()?;
        }

        Ok(LeaveSummary {
            sponsor,
            departed: departing,
        })
    }

    /// Completes a snapshot-received tree for the joining member: claims the
    /// freshly assigned id, locates the leaf, and draws key material.
    pub fn new_member_setup(&mut self, source: &mut dyn ScalarSource) -> Result<MemberId> {
        self.uid = self.next_member.checked_sub(1).ok_or_else(|| {
            Error::Structure("snapshot carries no member id counter".into())
        })?;

        self.locate_self()?;
        self.generate_leaf_key(source)?;

        Ok(self.uid)
    }

    pub(crate) fn rightmost_leaf(&self, idx: NodeIdx) -> NodeIdx {
        let mut cursor = idx;

        while let Some(right) = self.node(cursor).right {
            cursor = right;
        }

        cursor
    }
}
