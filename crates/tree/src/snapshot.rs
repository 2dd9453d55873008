use alloc::collections::BTreeMap;
use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;

use tgdh_types::{
    Error, GroupParams, NodeKind, NodeName, Result, SnapshotNode, TreeSnapshot,
};

use crate::node::{Node, NodeIdx, Position};
use crate::KeyTree;

impl KeyTree {
    /// Serializes the tree for transfer to a joining member.
    ///
    /// Snapshots carry shape, kinds, member ids, and blinded keys only; the
    /// format has no private-key field, so the sender's secret is withheld by
    /// construction.
    pub fn snapshot(&self) -> TreeSnapshot {
        let nodes = self
            .preorder()
            .into_iter()
            .map(|idx| {
                let node = self.node(idx);
                let mut out = SnapshotNode::new(node.name, node.kind);

                if let Some(mid) = node.mid {
                    out = out.with_mid(mid);
                }

                if let Some(bkey) = &node.bkey {
                    out = out.with_bkey(bkey);
                }

                out
            })
            .collect();

        TreeSnapshot {
            next_member: self.next_member,
            refresh: self.refresh.clone(),
            nodes,
        }
    }

    /// Reconstructs a tree from a received snapshot.
    ///
    /// The result has no owning leaf yet; the joining member claims one with
    /// [`KeyTree::new_member_setup`]. Fails with a structure error when the
    /// snapshot violates tree invariants.
    pub fn from_snapshot(snapshot: &TreeSnapshot, params: Arc<GroupParams>) -> Result<Self> {
        let mut by_name = BTreeMap::new();

        for node in &snapshot.nodes {
            if by_name.insert(node.name, node).is_some() {
                return Err(Error::Structure(format!(
                    "snapshot repeats node {}",
                    node.name
                )));
            }
        }

        let root = *by_name
            .get(&NodeName::root())
            .ok_or_else(|| Error::Structure("snapshot has no root node".into()))?;

        if root.kind != NodeKind::Root {
            return Err(Error::Structure("snapshot root is mislabelled".into()));
        }

        let mut tree = Self {
            params,
            nodes: Vec::with_capacity(by_name.len()),
            free: Vec::new(),
            root: 0,
            me: None,
            uid: 0,
            next_member: snapshot.next_member,
            refresh: snapshot.refresh.clone(),
        };

        tree.nodes.push(Some(Self::restore_node(root, Position::Na, None)));
        tree.attach_children(&by_name, NodeName::root(), 0)?;

        if tree.node_count() != by_name.len() {
            return Err(Error::Structure(
                "snapshot holds nodes unreachable from the root".into(),
            ));
        }

        tree.validate()?;

        Ok(tree)
    }

    fn attach_children(
        &mut self,
        by_name: &BTreeMap<NodeName, &SnapshotNode>,
        name: NodeName,
        idx: NodeIdx,
    ) -> Result<()> {
        let left = by_name.get(&name.left_child());
        let right = by_name.get(&name.right_child());

        let (left, right) = match (left, right) {
            (Some(l), Some(r)) => (*l, *r),
            (None, None) => return Ok(()),
            _ => {
                return Err(Error::Structure(format!(
                    "snapshot node {name} has exactly one child"
                )))
            }
        };

        let l = self.alloc(Self::restore_node(left, Position::Left, Some(idx)));
        let r = self.alloc(Self::restore_node(right, Position::Right, Some(idx)));

        {
            let node = self.node_mut(idx);

            node.left = Some(l);
            node.right = Some(r);
        }

        self.attach_children(by_name, left.name, l)?;
        self.attach_children(by_name, right.name, r)
    }

    fn restore_node(snap: &SnapshotNode, pos: Position, parent: Option<NodeIdx>) -> Node {
        Node {
            name: snap.name,
            pos,
            kind: snap.kind,
            mid: snap.member(),
            key: None,
            bkey: snap.blind_key(),
            parent,
            left: None,
            right: None,
        }
    }
}
