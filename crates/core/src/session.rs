use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use flume::Receiver;
use tgdh_tree::KeyTree;
use tgdh_types::{Fingerprint, GroupParams, MemberId, NodeName, RandomScalars, ScalarSource};

use crate::actor::MemberHandle;
use crate::member::Member;
use crate::transport::{MemoryBus, Transport};

/// Produces each member's private scalar source.
pub type ScalarFactory = Arc<dyn Fn(MemberId) -> Box<dyn ScalarSource> + Send + Sync>;

/// Configures and starts a [`Session`].
pub struct SessionBuilder<T: Transport> {
    size: u32,
    transport: T,
    params: Arc<GroupParams>,
    scalars: ScalarFactory,
    timeout: Duration,
}

impl SessionBuilder<MemoryBus> {
    fn new(size: u32) -> Self {
        Self {
            size,
            transport: MemoryBus::default(),
            params: Arc::new(GroupParams::modp_2048()),
            scalars: Arc::new(|_| Box::new(RandomScalars)),
            timeout: Duration::from_secs(5),
        }
    }
}

impl<T: Transport> SessionBuilder<T> {
    /// Overrides the Diffie-Hellman group.
    pub fn with_params(mut self, params: GroupParams) -> Self {
        self.params = Arc::new(params);
        self
    }

    /// Overrides the per-member scalar source factory.
    pub fn with_scalar_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(MemberId) -> Box<dyn ScalarSource> + Send + Sync + 'static,
    {
        self.scalars = Arc::new(factory);
        self
    }

    /// Overrides the per-subscription delivery timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Swaps the transport fabric.
    pub fn with_transport<U: Transport>(self, transport: U) -> SessionBuilder<U> {
        SessionBuilder {
            size: self.size,
            transport,
            params: self.params,
            scalars: self.scalars,
            timeout: self.timeout,
        }
    }

    /// Spawns the founding members and runs the initial key exchange.
    pub fn start(self) -> anyhow::Result<Session<T>> {
        let Self {
            size,
            transport,
            params,
            scalars,
            timeout,
        } = self;

        anyhow::ensure!(size >= 2, "a group needs at least two members");

        let mut session = Session {
            transport,
            params,
            scalars,
            members: BTreeMap::new(),
            timeout,
        };

        for uid in 1..=size {
            session.spawn_founder(size, uid)?;
        }

        session.initial_exchange()?;

        Ok(session)
    }
}

/// The exchange coordinator.
///
/// Owns one [`MemberHandle`] per live member and drives the round-structured
/// protocols; membership events are strictly serialized. Between rounds it
/// never holds references into any member's tree.
pub struct Session<T: Transport> {
    transport: T,
    params: Arc<GroupParams>,
    scalars: ScalarFactory,
    members: BTreeMap<MemberId, MemberHandle>,
    timeout: Duration,
}

impl Session<MemoryBus> {
    /// A builder over the in-process bus with production group parameters.
    pub fn builder(size: u32) -> SessionBuilder<MemoryBus> {
        SessionBuilder::new(size)
    }

    /// Starts a session of `size` members with every default.
    pub fn in_memory(size: u32) -> anyhow::Result<Self> {
        Self::builder(size).start()
    }
}

impl<T: Transport> Session<T> {
    fn alias(mid: MemberId) -> String {
        format!("mem_{mid}")
    }

    /// Ids of all live members, ascending.
    pub fn member_ids(&self) -> Vec<MemberId> {
        self.members.keys().copied().collect()
    }

    /// The rendered tree of one member.
    pub fn render(&self, mid: MemberId) -> anyhow::Result<String> {
        self.handle(mid)?.render()
    }

    /// The agreed group key digest; fails when any member disagrees.
    pub fn group_fingerprint(&self) -> anyhow::Result<Fingerprint> {
        self.verify_agreement()
    }

    /// Shuts every member down and drops all transport state.
    pub fn close(mut self) {
        for (_, handle) in std::mem::take(&mut self.members) {
            handle.shutdown();
        }

        tracing::info!("session closed");
    }

    fn handle(&self, mid: MemberId) -> anyhow::Result<&MemberHandle> {
        self.members
            .get(&mid)
            .ok_or_else(|| anyhow::anyhow!("member {mid} is not live"))
    }

    fn spawn_founder(&mut self, size: u32, uid: MemberId) -> anyhow::Result<()> {
        let endpoint = self.transport.endpoint(&Self::alias(uid));
        let member = Member::founder(
            size,
            uid,
            self.params.clone(),
            (self.scalars)(uid),
            endpoint,
        )?;

        self.members.insert(uid, MemberHandle::spawn(member));

        Ok(())
    }

    /// Runs max_height rounds of level-by-level blinded key publications
    /// until every founding member holds the root key.
    fn initial_exchange(&mut self) -> anyhow::Result<()> {
        let size = self.members.len() as u32;
        let rounds = KeyTree::max_height(size) as usize;

        tracing::info!(members = size, rounds, "starting initial key exchange");

        // per-member schedules, left-padded so index `round` lines up with
        // the node depth every member publishes and consumes at that round
        let mut key_paths = BTreeMap::new();
        let mut co_paths = BTreeMap::new();

        for (mid, handle) in &self.members {
            let (key, co) = handle.paths()?;

            key_paths.insert(*mid, pad_front(key, rounds + 1));
            co_paths.insert(*mid, pad_front(co, rounds));
        }

        for round in 0..rounds {
            self.initial_round(round, &key_paths, &co_paths)?;

            tracing::info!(round, "initial exchange round completed");
        }

        self.verify_agreement()?;

        tracing::info!("all founding members computed the group key");

        Ok(())
    }

    fn initial_round(
        &self,
        round: usize,
        key_paths: &BTreeMap<MemberId, Vec<Option<NodeName>>>,
        co_paths: &BTreeMap<MemberId, Vec<Option<NodeName>>>,
    ) -> anyhow::Result<()> {
        // every member binds its channel
        let mut addrs = BTreeMap::new();

        for (mid, handle) in &self.members {
            addrs.insert(*mid, handle.bind()?);
        }

        // subscribe to the member representing this round's co-path subtree
        for (mid, handle) in &self.members {
            if let Some(name) = co_paths[mid][round] {
                let rep = handle.representative(name)?;

                handle.connect(addrs[&rep].clone())?;
            }
        }

        // parallel publish; the replies are the barrier before consumption
        let mut pending = Vec::new();

        for (mid, handle) in &self.members {
            if let Some(name) = key_paths[mid][round] {
                pending.push((*mid, handle.publish_node_async(name)?));
            }
        }

        await_all(pending)?;

        // consume and advance the recurrence one hop
        let active: Vec<MemberId> = self
            .members
            .keys()
            .copied()
            .filter(|mid| co_paths[mid][round].is_some())
            .collect();

        let mut pending = Vec::new();

        for mid in &active {
            pending.push((*mid, self.handle(*mid)?.collect_async(self.timeout)?));
        }

        await_all(pending)?;

        let mut pending = Vec::new();

        for mid in &active {
            pending.push((*mid, self.handle(*mid)?.advance_initial_async()?));
        }

        await_all(pending)?;

        // tear everything down so stale keys cannot leak into later rounds
        let mut pending = Vec::new();

        for (mid, handle) in &self.members {
            pending.push((*mid, handle.close_connections_async()?));
        }

        for (_, rx) in pending {
            rx.recv().ok();
        }

        Ok(())
    }

    /// Admits a new member: mutates every tree, ships a snapshot, exchanges
    /// the newcomer's blinded key with the sponsor, and redistributes the
    /// refreshed path. Returns the new member's id.
    pub fn join(&mut self) -> anyhow::Result<MemberId> {
        tracing::info!("join event");

        let mut pending = Vec::new();

        for (mid, handle) in &self.members {
            pending.push((*mid, handle.apply_join_async()?));
        }

        let summaries = await_all(pending)?;

        let (_, summary) = summaries
            .first()
            .ok_or_else(|| anyhow::anyhow!("join on an empty session"))?;
        let (sponsor, joined) = (summary.sponsor, summary.joined);

        anyhow::ensure!(
            summaries.iter().all(|(_, s)| *s == *summary),
            "members disagree on the join outcome"
        );

        tracing::info!(sponsor, joined, "tree mutation applied on every member");

        // the joining member starts treeless
        let endpoint = self.transport.endpoint(&Self::alias(joined));
        let newcomer = MemberHandle::spawn(Member::pending(
            self.params.clone(),
            (self.scalars)(joined),
            endpoint,
        ));

        let spon = self.handle(sponsor)?;

        // snapshot transfer, sponsor to newcomer
        let addr = spon.bind()?;

        newcomer.connect(addr)?;
        spon.publish_snapshot()?;
        newcomer.collect(self.timeout)?;

        let (uid, leaf) = newcomer.setup_new_member()?;

        anyhow::ensure!(uid == joined, "snapshot assigned id {uid}, expected {joined}");

        spon.close_connections()?;
        newcomer.close_connections()?;

        // the newcomer's blinded leaf goes back to the sponsor
        let addr = newcomer.bind()?;

        spon.connect(addr)?;
        newcomer.publish_node(leaf)?;
        spon.collect(self.timeout)?;
        spon.close_connections()?;
        newcomer.close_connections()?;

        // sponsor and newcomer can now both reach the root
        let pending = vec![
            (sponsor, spon.compute_group_key_async()?),
            (joined, newcomer.compute_group_key_async()?),
        ];

        await_all(pending)?;

        // the sponsor republishes every refreshed internal node below the
        // root to whoever's update path contains it
        let (spon_key_path, _) = spon.paths()?;
        let update_paths = self.update_paths(&[sponsor])?;

        self.republish(
            sponsor,
            &spon_key_path[1..spon_key_path.len() - 1],
            &update_paths,
        )?;

        let mut pending = Vec::new();

        for mid in update_paths.keys() {
            pending.push((*mid, self.handle(*mid)?.compute_group_key_async()?));
        }

        await_all(pending)?;

        self.members.insert(joined, newcomer);
        self.verify_agreement()?;

        tracing::info!(joined, "join exchange completed");

        Ok(joined)
    }

    /// Removes a member: shuts its actor down, mutates every remaining tree,
    /// has the sponsor rekey, and redistributes the refreshed path.
    pub fn leave(&mut self, departing: MemberId) -> anyhow::Result<()> {
        tracing::info!(departing, "leave event");

        let handle = self
            .members
            .remove(&departing)
            .ok_or_else(|| anyhow::Error::new(tgdh_types::Error::NotFound(format!(
                "member {departing}"
            ))))?;

        handle.shutdown();

        let mut pending = Vec::new();

        for (mid, handle) in &self.members {
            pending.push((*mid, handle.apply_leave_async(departing)?));
        }

        let summaries = await_all(pending)?;

        let (_, summary) = summaries
            .first()
            .ok_or_else(|| anyhow::anyhow!("leave on an empty session"))?;
        let sponsor = summary.sponsor;

        anyhow::ensure!(
            summaries.iter().all(|(_, s)| *s == *summary),
            "members disagree on the leave outcome"
        );

        tracing::info!(sponsor, "sponsor drawing fresh key material");

        let spon = self.handle(sponsor)?;

        spon.regenerate_keys()?;
        spon.compute_group_key()?;

        // the whole sponsor path below the root changed, its own leaf
        // included
        let (spon_key_path, _) = spon.paths()?;
        let update_paths = self.update_paths(&[sponsor])?;

        self.republish(
            sponsor,
            &spon_key_path[..spon_key_path.len() - 1],
            &update_paths,
        )?;

        let mut pending = Vec::new();

        for mid in update_paths.keys() {
            pending.push((*mid, self.handle(*mid)?.compute_group_key_async()?));
        }

        await_all(pending)?;

        self.verify_agreement()?;

        tracing::info!(departed = departing, "leave exchange completed");

        Ok(())
    }

    fn update_paths(
        &self,
        except: &[MemberId],
    ) -> anyhow::Result<BTreeMap<MemberId, Vec<NodeName>>> {
        let mut paths = BTreeMap::new();

        for (mid, handle) in &self.members {
            if except.contains(mid) {
                continue;
            }

            paths.insert(*mid, handle.update_path()?);
        }

        Ok(paths)
    }

    /// One publication round per refreshed node: the sponsor binds, the
    /// members whose update path contains the node subscribe, and every
    /// connection is torn down before the next node.
    fn republish(
        &self,
        sponsor: MemberId,
        names: &[NodeName],
        update_paths: &BTreeMap<MemberId, Vec<NodeName>>,
    ) -> anyhow::Result<()> {
        let spon = self.handle(sponsor)?;

        for name in names {
            let targets: Vec<MemberId> = update_paths
                .iter()
                .filter(|(_, path)| path.contains(name))
                .map(|(mid, _)| *mid)
                .collect();

            if targets.is_empty() {
                continue;
            }

            let addr = spon.bind()?;

            for mid in &targets {
                self.handle(*mid)?.connect(addr.clone())?;
            }

            spon.publish_node(*name)?;

            let mut pending = Vec::new();

            for mid in &targets {
                pending.push((*mid, self.handle(*mid)?.collect_async(self.timeout)?));
            }

            await_all(pending)?;

            for mid in &targets {
                self.handle(*mid)?.close_connections()?;
            }

            spon.close_connections()?;

            tracing::debug!(node = %name, receivers = targets.len(), "refreshed key distributed");
        }

        Ok(())
    }

    /// The scheduler loop invariant: every live member holds the same root
    /// key.
    fn verify_agreement(&self) -> anyhow::Result<Fingerprint> {
        let mut agreed: Option<(MemberId, Fingerprint)> = None;

        for (mid, handle) in &self.members {
            let fp = handle
                .fingerprint()?
                .ok_or_else(|| anyhow::anyhow!("member {mid} has not derived the group key"))?;

            match &agreed {
                None => agreed = Some((*mid, fp)),
                Some((first, expected)) => anyhow::ensure!(
                    fp == *expected,
                    "members {first} and {mid} disagree on the group key"
                ),
            }
        }

        let (_, fp) = agreed.ok_or_else(|| anyhow::anyhow!("the session has no members"))?;

        tracing::info!(fingerprint = %hex::encode(&fp[..8]), "group key agreed");

        Ok(fp)
    }
}

fn pad_front(names: Vec<NodeName>, len: usize) -> Vec<Option<NodeName>> {
    let pad = len.saturating_sub(names.len());

    std::iter::repeat(None)
        .take(pad)
        .chain(names.into_iter().map(Some))
        .collect()
}

fn await_all<V>(pending: Vec<(MemberId, Receiver<tgdh_types::Result<V>>)>) -> anyhow::Result<Vec<(MemberId, V)>> {
    let mut out = Vec::with_capacity(pending.len());

    for (mid, rx) in pending {
        let value = rx
            .recv()
            .map_err(|_| anyhow::anyhow!("member {mid} dropped its reply"))?
            .map_err(|e| anyhow::Error::new(e).context(format!("member {mid}")))?;

        out.push((mid, value));
    }

    Ok(out)
}
