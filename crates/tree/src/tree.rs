use alloc::collections::BTreeSet;
use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;

use num_bigint::BigUint;
use tgdh_types::{
    fingerprint, Error, Fingerprint, GroupParams, MemberId, NodeKind, NodeName, Result,
    ScalarSource,
};

use crate::node::{Node, NodeIdx, Position};

/// The binary key tree owned by one member.
///
/// Every live member holds its own instance; the trees of all members agree on
/// shape and blinded keys, while private keys exist only along the owner's key
/// path.
pub struct KeyTree {
    pub(crate) params: Arc<GroupParams>,
    pub(crate) nodes: Vec<Option<Node>>,
    pub(crate) free: Vec<NodeIdx>,
    pub(crate) root: NodeIdx,
    pub(crate) me: Option<NodeIdx>,
    pub(crate) uid: MemberId,
    pub(crate) next_member: MemberId,
    pub(crate) refresh: Vec<NodeName>,
}

impl KeyTree {
    /// The group this tree derives keys in.
    pub fn params(&self) -> &GroupParams {
        &self.params
    }

    /// The owning member's id.
    pub fn uid(&self) -> MemberId {
        self.uid
    }

    /// The id the next joining member will receive.
    pub fn next_member(&self) -> MemberId {
        self.next_member
    }

    /// Nodes whose keys were invalidated by the latest membership event.
    pub fn refresh_path(&self) -> &[NodeName] {
        &self.refresh
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Ids of all live members, in leaf order.
    pub fn live_members(&self) -> Vec<MemberId> {
        self.leaves()
            .into_iter()
            .filter_map(|idx| self.node(idx).mid)
            .collect()
    }

    /// Returns `true` when a leaf carries the provided member id.
    pub fn contains_member(&self, mid: MemberId) -> bool {
        self.find_by_mid(mid).is_ok()
    }

    /// The root's private key, once the recurrence has reached it.
    pub fn root_key(&self) -> Option<&BigUint> {
        self.node(self.root).key.as_ref()
    }

    /// A loggable digest of the group key, if established.
    pub fn root_fingerprint(&self) -> Option<Fingerprint> {
        self.root_key().map(fingerprint)
    }

    /// The blinded key stored at `name`.
    pub fn blind_key(&self, name: NodeName) -> Result<BigUint> {
        let idx = self.find_by_name(name)?;

        self.node(idx).bkey.clone().ok_or(Error::Uninit(name))
    }

    /// Records a blinded key received for `name`.
    pub fn set_blind_key(&mut self, name: NodeName, bkey: BigUint) -> Result<()> {
        let idx = self.find_by_name(name)?;

        self.node_mut(idx).bkey = Some(bkey);

        Ok(())
    }

    /// Draws a fresh private scalar for the owner's leaf and blinds it.
    pub fn generate_leaf_key(&mut self, source: &mut dyn ScalarSource) -> Result<()> {
        let me = self.me_idx()?;
        let key = source.draw(&self.params);
        let bkey = self.params.blind(&key);
        let node = self.node_mut(me);

        node.key = Some(key);
        node.bkey = Some(bkey);

        Ok(())
    }

    /// The owner's leaf.
    pub fn my_node(&self) -> Result<&Node> {
        self.me_idx().map(|idx| self.node(idx))
    }

    /// Checks the structural and key invariants over the whole tree: fullness,
    /// name/position consistency, member-id placement, and blinding coherence.
    ///
    /// A failure here means the tree can no longer be trusted; callers abort.
    pub fn validate(&self) -> Result<()> {
        let root = self.node(self.root);

        if root.kind != NodeKind::Root || root.parent.is_some() || root.pos != Position::Na {
            return Err(Error::Structure("root node is mislabelled".into()));
        }

        let mut mids = BTreeSet::new();
        let mut sponsors = 0usize;
        let mut visited = 0usize;
        let mut stack = alloc::vec![self.root];

        while let Some(idx) = stack.pop() {
            let node = self.node(idx);

            visited += 1;

            if node.left.is_some() != node.right.is_some() {
                return Err(Error::Structure(format!(
                    "node {} has exactly one child",
                    node.name
                )));
            }

            if node.is_leaf() {
                if !matches!(node.kind, NodeKind::Mem | NodeKind::Spon) {
                    return Err(Error::Structure(format!(
                        "leaf {} has kind {}",
                        node.name, node.kind
                    )));
                }

                let mid = node.mid.ok_or_else(|| {
                    Error::Structure(format!("leaf {} has no member id", node.name))
                })?;

                if !mids.insert(mid) {
                    return Err(Error::Structure(format!("member id {mid} is duplicated")));
                }

                if node.kind == NodeKind::Spon {
                    sponsors += 1;
                }
            } else {
                if idx != self.root && node.kind != NodeKind::Inter {
                    return Err(Error::Structure(format!(
                        "internal node {} has kind {}",
                        node.name, node.kind
                    )));
                }

                if node.mid.is_some() {
                    return Err(Error::Structure(format!(
                        "internal node {} carries a member id",
                        node.name
                    )));
                }
            }

            if let Some(key) = &node.key {
                let expected = self.params.blind(key);

                // the root may omit its blinded key
                match &node.bkey {
                    Some(bkey) if *bkey == expected => {}
                    None if idx == self.root => {}
                    _ => {
                        return Err(Error::Structure(format!(
                            "blinded key of {} does not match its private key",
                            node.name
                        )))
                    }
                }
            }

            for (child, expected_name, expected_pos) in [
                (node.left, node.name.left_child(), Position::Left),
                (node.right, node.name.right_child(), Position::Right),
            ] {
                let Some(child) = child else { continue };
                let c = self.node(child);

                if c.parent != Some(idx) || c.pos != expected_pos || c.name != expected_name {
                    return Err(Error::Structure(format!(
                        "child {} is inconsistent with parent {}",
                        c.name, node.name
                    )));
                }

                stack.push(child);
            }
        }

        if visited != self.node_count() {
            return Err(Error::Structure("arena holds unreachable nodes".into()));
        }

        if sponsors > 1 {
            return Err(Error::Structure("more than one sponsor leaf".into()));
        }

        Ok(())
    }

    pub(crate) fn alloc(&mut self, node: Node) -> NodeIdx {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    pub(crate) fn release(&mut self, idx: NodeIdx) {
        self.nodes[idx] = None;
        self.free.push(idx);
    }

    pub(crate) fn node(&self, idx: NodeIdx) -> &Node {
        self.nodes[idx].as_ref().expect("live arena index")
    }

    pub(crate) fn node_mut(&mut self, idx: NodeIdx) -> &mut Node {
        self.nodes[idx].as_mut().expect("live arena index")
    }

    pub(crate) fn me_idx(&self) -> Result<NodeIdx> {
        self.me
            .ok_or_else(|| Error::Structure("tree has no owning leaf yet".into()))
    }

    pub(crate) fn locate_self(&mut self) -> Result<()> {
        self.me = Some(self.find_by_mid(self.uid)?);

        Ok(())
    }

    pub(crate) fn find_by_mid(&self, mid: MemberId) -> Result<NodeIdx> {
        self.leaves()
            .into_iter()
            .find(|idx| self.node(*idx).mid == Some(mid))
            .ok_or_else(|| Error::NotFound(format!("member {mid}")))
    }

    pub(crate) fn find_by_name(&self, name: NodeName) -> Result<NodeIdx> {
        self.preorder()
            .into_iter()
            .find(|idx| self.node(*idx).name == name)
            .ok_or_else(|| Error::NotFound(format!("node {name}")))
    }

    /// Leaves in left-to-right order.
    pub(crate) fn leaves(&self) -> Vec<NodeIdx> {
        let mut out = Vec::new();

        self.collect_leaves(self.root, &mut out);

        out
    }

    fn collect_leaves(&self, idx: NodeIdx, out: &mut Vec<NodeIdx>) {
        let node = self.node(idx);

        match (node.left, node.right) {
            (Some(l), Some(r)) => {
                self.collect_leaves(l, out);
                self.collect_leaves(r, out);
            }
            _ => out.push(idx),
        }
    }

    /// Nodes in pre-order.
    pub(crate) fn preorder(&self) -> Vec<NodeIdx> {
        let mut out = Vec::with_capacity(self.node_count());
        let mut stack = alloc::vec![self.root];

        while let Some(idx) = stack.pop() {
            out.push(idx);

            let node = self.node(idx);

            if let (Some(l), Some(r)) = (node.left, node.right) {
                stack.push(r);
                stack.push(l);
            }
        }

        out
    }

    /// Re-tags every leaf as a plain member, dropping stale sponsor marks.
    pub(crate) fn type_assign(&mut self) {
        for idx in self.leaves() {
            self.node_mut(idx).kind = NodeKind::Mem;
        }
    }

    /// Recomputes every `<l,v>` from the root down after a structural change.
    pub(crate) fn recalculate_names(&mut self) {
        self.node_mut(self.root).name = NodeName::root();

        let mut stack = alloc::vec![self.root];

        while let Some(idx) = stack.pop() {
            let (name, left, right) = {
                let n = self.node(idx);
                (n.name, n.left, n.right)
            };

            if let (Some(l), Some(r)) = (left, right) {
                self.node_mut(l).name = name.left_child();
                self.node_mut(r).name = name.right_child();
                stack.push(l);
                stack.push(r);
            }
        }
    }
}
