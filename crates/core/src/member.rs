use std::sync::Arc;
use std::time::Duration;

use tgdh_tree::{JoinSummary, KeyTree, LeaveSummary};
use tgdh_types::{
    Error, Fingerprint, Frame, GroupParams, KeyAnnouncement, MemberId, NodeName, Result,
    ScalarSource,
};

use crate::transport::{Address, Endpoint};

/// One protocol participant: a private key tree, a scalar source, and a
/// transport endpoint.
///
/// Members never share state; everything they learn arrives as frames through
/// their subscriptions, and everything they reveal leaves as published
/// blinded keys or snapshots.
pub struct Member<E: Endpoint> {
    tree: Option<KeyTree>,
    params: Arc<GroupParams>,
    source: Box<dyn ScalarSource>,
    endpoint: E,
    hops: usize,
}

impl<E: Endpoint> Member<E> {
    /// A founding member of a group of `size`, building its own copy of the
    /// initial tree and drawing its leaf scalar.
    pub fn founder(
        size: u32,
        uid: MemberId,
        params: Arc<GroupParams>,
        mut source: Box<dyn ScalarSource>,
        endpoint: E,
    ) -> Result<Self> {
        let mut tree = KeyTree::new(size, uid, params.clone())?;

        tree.generate_leaf_key(source.as_mut())?;

        Ok(Self {
            tree: Some(tree),
            params,
            source,
            endpoint,
            hops: 0,
        })
    }

    /// A joining member, treeless until the sponsor's snapshot arrives.
    pub fn pending(params: Arc<GroupParams>, source: Box<dyn ScalarSource>, endpoint: E) -> Self {
        Self {
            tree: None,
            params,
            source,
            endpoint,
            hops: 0,
        }
    }

    fn tree(&self) -> Result<&KeyTree> {
        self.tree
            .as_ref()
            .ok_or_else(|| Error::Structure("member has not received a tree yet".into()))
    }

    fn tree_mut(&mut self) -> Result<&mut KeyTree> {
        self.tree
            .as_mut()
            .ok_or_else(|| Error::Structure("member has not received a tree yet".into()))
    }

    /// Declares this member's publishing channel.
    pub fn bind(&mut self) -> Result<Address> {
        self.endpoint.bind()
    }

    /// Subscribes to another member's channel.
    pub fn connect(&mut self, addr: &Address) -> Result<()> {
        self.endpoint.connect(addr)
    }

    /// Tears down every binding and subscription.
    pub fn close_connections(&mut self) {
        self.endpoint.close_all();
    }

    fn publish_frame(&self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode();

        // transport policy: retry once, then give up on the exchange
        if let Err(e) = self.endpoint.publish(&bytes) {
            tracing::warn!("publish failed, retrying once: {e}");

            self.endpoint.publish(&bytes)?;
        }

        Ok(())
    }

    /// Publishes the blinded key stored at `name`.
    pub fn publish_node(&self, name: NodeName) -> Result<()> {
        let bkey = self.tree()?.blind_key(name)?;

        tracing::debug!(node = %name, "publishing blinded key");

        self.publish_frame(&Frame::Key(KeyAnnouncement::new(name, bkey)))
    }

    /// Publishes a snapshot of the whole tree (private key withheld).
    pub fn publish_snapshot(&self) -> Result<()> {
        let snapshot = self.tree()?.snapshot();

        tracing::debug!(nodes = snapshot.nodes.len(), "publishing tree snapshot");

        self.publish_frame(&Frame::Snapshot(snapshot))
    }

    /// Receives one frame per active subscription and applies each: blinded
    /// keys land in the tree, a snapshot replaces it.
    pub fn collect(&mut self, timeout: Duration) -> Result<usize> {
        let frames = self.endpoint.collect(timeout)?;
        let count = frames.len();

        for bytes in frames {
            match Frame::decode(&bytes)? {
                Frame::Key(announcement) => {
                    tracing::debug!(node = %announcement.name, "received blinded key");

                    self.tree_mut()?
                        .set_blind_key(announcement.name, announcement.bkey)?;
                }

                Frame::Snapshot(snapshot) => {
                    tracing::debug!(nodes = snapshot.nodes.len(), "received tree snapshot");

                    let tree = KeyTree::from_snapshot(&snapshot, self.params.clone())?;

                    tracing::trace!("adopted tree:\n{}", tree.describe_nodes());

                    self.tree = Some(tree);
                }
            }
        }

        Ok(count)
    }

    /// Claims the joining member's identity on a snapshot-received tree and
    /// draws fresh key material. Returns the id and leaf name.
    pub fn setup_as_new_member(&mut self) -> Result<(MemberId, NodeName)> {
        let Self { tree, source, .. } = self;

        let tree = tree
            .as_mut()
            .ok_or_else(|| Error::Structure("member has not received a tree yet".into()))?;

        let uid = tree.new_member_setup(source.as_mut())?;
        let name = tree.my_node()?.name();

        Ok((uid, name))
    }

    /// Advances the recurrence by one more hop than the previous round.
    pub fn advance_initial(&mut self) -> Result<()> {
        self.hops += 1;

        let hops = self.hops;

        self.tree_mut()?.initial_calculate_group_key(hops)
    }

    /// Runs the recurrence all the way to the root.
    pub fn compute_group_key(&mut self) -> Result<()> {
        self.tree_mut()?.calculate_group_key()
    }

    /// Draws a fresh leaf scalar; the sponsor does this after a leave so the
    /// departed member's knowledge goes stale.
    pub fn regenerate_keys(&mut self) -> Result<()> {
        let Self { tree, source, .. } = self;

        tree.as_mut()
            .ok_or_else(|| Error::Structure("member has not received a tree yet".into()))?
            .generate_leaf_key(source.as_mut())
    }

    /// Applies the join mutation to the local tree.
    pub fn apply_join(&mut self) -> Result<JoinSummary> {
        self.tree_mut()?.join_event()
    }

    /// Applies the leave mutation to the local tree.
    pub fn apply_leave(&mut self, departing: MemberId) -> Result<LeaveSummary> {
        self.tree_mut()?.leave_event(departing)
    }

    /// The member's key path and co-path, as names.
    pub fn paths(&self) -> Result<(Vec<NodeName>, Vec<NodeName>)> {
        let tree = self.tree()?;

        Ok((tree.my_key_path()?, tree.my_co_path()?))
    }

    /// The blinded keys this member still needs after the latest event.
    pub fn update_path(&self) -> Result<Vec<NodeName>> {
        self.tree()?.update_path()
    }

    /// The member owning the first leaf of the subtree rooted at `name`.
    pub fn representative(&self, name: NodeName) -> Result<MemberId> {
        self.tree()?.representative(name)
    }

    /// A loggable digest of the group key, if established.
    pub fn root_fingerprint(&self) -> Result<Option<Fingerprint>> {
        Ok(self.tree()?.root_fingerprint())
    }

    /// The rendered tree.
    pub fn render(&self) -> Result<String> {
        Ok(self.tree()?.to_string())
    }
}
