use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;

use tgdh_types::{Error, GroupParams, MemberId, Result};

use crate::node::{Node, NodeIdx, Position};
use crate::KeyTree;

impl KeyTree {
    /// Builds the canonical initial tree for a group of `size` members, owned
    /// by member `uid`.
    ///
    /// The shape is fully determined by `size`: 2·size − 1 nodes, every leaf
    /// on the two deepest levels, deeper leaves packed to the left, member ids
    /// assigned to leaves left-to-right in increasing order. Every founding
    /// member therefore computes an identical tree and finds itself by its own
    /// id. The leaf's private key is not drawn here; see
    /// [`KeyTree::generate_leaf_key`].
    pub fn new(size: u32, uid: MemberId, params: Arc<GroupParams>) -> Result<Self> {
        if size < 2 {
            return Err(Error::Structure(
                "initial group needs at least two members".into(),
            ));
        }

        if uid == 0 || uid > size {
            return Err(Error::NotFound(format!(
                "member {uid} is outside the initial group 1..={size}"
            )));
        }

        let mut tree = Self {
            params,
            nodes: alloc::vec![Some(Node::root())],
            free: Vec::new(),
            root: 0,
            me: None,
            uid,
            next_member: size + 1,
            refresh: Vec::new(),
        };

        let nodemax = 2 * size as usize - 1;

        while tree.node_count() != nodemax {
            tree.grow(tree.root, nodemax);
        }

        tree.type_assign();
        tree.assign_ids();
        tree.locate_self()?;

        Ok(tree)
    }

    /// Expands every current leaf left-to-right until the target node count
    /// is reached; one pass per level.
    fn grow(&mut self, idx: NodeIdx, nodemax: usize) {
        let (left, right) = {
            let node = self.node(idx);
            (node.left, node.right)
        };

        match (left, right) {
            (Some(left), Some(right)) => {
                self.grow(left, nodemax);

                if self.node_count() != nodemax {
                    self.grow(right, nodemax);
                }
            }
            _ => {
                self.add_children(idx);
            }
        }
    }

    /// Attaches two fresh internal children under a leaf.
    pub(crate) fn add_children(&mut self, idx: NodeIdx) -> (NodeIdx, NodeIdx) {
        let name = self.node(idx).name;

        let left = self.alloc(Node::child(name.left_child(), Position::Left, idx));
        let right = self.alloc(Node::child(name.right_child(), Position::Right, idx));

        let node = self.node_mut(idx);

        node.left = Some(left);
        node.right = Some(right);

        (left, right)
    }

    fn assign_ids(&mut self) {
        for (i, idx) in self.leaves().into_iter().enumerate() {
            self.node_mut(idx).mid = Some(i as MemberId + 1);
        }
    }

    /// The leaf where the next join attaches: the right-most leaf on the
    /// shallowest leaf level.
    pub(crate) fn find_insertion(&self) -> NodeIdx {
        let leaves = self.leaves();

        let shallowest = leaves
            .iter()
            .map(|idx| self.node(*idx).name.l)
            .min()
            .unwrap_or(0);

        leaves
            .into_iter()
            .filter(|idx| self.node(*idx).name.l == shallowest)
            .max_by_key(|idx| self.node(*idx).name.v)
            .expect("a tree always has leaves")
    }

    /// The height the initial exchange schedule runs over for a group of
    /// `size` members.
    pub fn max_height(size: u32) -> u32 {
        let nodes = 2 * size - 1;

        u32::BITS - 1 - (nodes - 1).leading_zeros()
    }
}
