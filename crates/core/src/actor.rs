use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, Sender};
use tgdh_tree::{JoinSummary, LeaveSummary};
use tgdh_types::{Fingerprint, MemberId, NodeName, Result};

use crate::member::Member;
use crate::transport::{Address, Endpoint};

type Reply<T> = Sender<T>;

pub(crate) enum Command {
    Bind(Reply<Result<Address>>),
    Connect(Address, Reply<Result<()>>),
    PublishNode(NodeName, Reply<Result<()>>),
    PublishSnapshot(Reply<Result<()>>),
    Collect(Duration, Reply<Result<usize>>),
    AdvanceInitial(Reply<Result<()>>),
    ComputeGroupKey(Reply<Result<()>>),
    RegenerateKeys(Reply<Result<()>>),
    ApplyJoin(Reply<Result<JoinSummary>>),
    ApplyLeave(MemberId, Reply<Result<LeaveSummary>>),
    SetupNewMember(Reply<Result<(MemberId, NodeName)>>),
    Paths(Reply<Result<(Vec<NodeName>, Vec<NodeName>)>>),
    UpdatePath(Reply<Result<Vec<NodeName>>>),
    Representative(NodeName, Reply<Result<MemberId>>),
    Fingerprint(Reply<Result<Option<Fingerprint>>>),
    Render(Reply<Result<String>>),
    CloseConnections(Reply<()>),
    Shutdown,
}

/// Handle to a member actor running on its own thread.
///
/// The session coordinator holds one handle per live member and never touches
/// tree internals directly; every interaction is a command with a reply
/// channel, which doubles as the round barrier acknowledgement.
pub struct MemberHandle {
    tx: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl MemberHandle {
    /// Moves a member onto its own thread and returns the handle.
    pub fn spawn<E: Endpoint>(member: Member<E>) -> Self {
        let (tx, rx) = flume::unbounded();
        let thread = thread::spawn(move || run(member, rx));

        Self {
            tx,
            thread: Some(thread),
        }
    }

    fn dispatch<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> anyhow::Result<Receiver<T>> {
        let (reply, rx) = flume::bounded(1);

        self.tx
            .send(build(reply))
            .map_err(|_| anyhow::anyhow!("member actor is gone"))?;

        Ok(rx)
    }

    fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> anyhow::Result<T> {
        self.dispatch(build)?
            .recv()
            .map_err(|_| anyhow::anyhow!("member actor dropped its reply"))
    }

    pub(crate) fn bind(&self) -> anyhow::Result<Address> {
        Ok(self.request(Command::Bind)??)
    }

    pub(crate) fn connect(&self, addr: Address) -> anyhow::Result<()> {
        Ok(self.request(|r| Command::Connect(addr, r))??)
    }

    pub(crate) fn publish_node(&self, name: NodeName) -> anyhow::Result<()> {
        Ok(self.request(|r| Command::PublishNode(name, r))??)
    }

    pub(crate) fn publish_node_async(
        &self,
        name: NodeName,
    ) -> anyhow::Result<Receiver<Result<()>>> {
        self.dispatch(|r| Command::PublishNode(name, r))
    }

    pub(crate) fn publish_snapshot(&self) -> anyhow::Result<()> {
        Ok(self.request(Command::PublishSnapshot)??)
    }

    pub(crate) fn collect(&self, timeout: Duration) -> anyhow::Result<usize> {
        Ok(self.request(|r| Command::Collect(timeout, r))??)
    }

    pub(crate) fn collect_async(
        &self,
        timeout: Duration,
    ) -> anyhow::Result<Receiver<Result<usize>>> {
        self.dispatch(|r| Command::Collect(timeout, r))
    }

    pub(crate) fn advance_initial_async(&self) -> anyhow::Result<Receiver<Result<()>>> {
        self.dispatch(Command::AdvanceInitial)
    }

    pub(crate) fn compute_group_key(&self) -> anyhow::Result<()> {
        Ok(self.request(Command::ComputeGroupKey)??)
    }

    pub(crate) fn compute_group_key_async(&self) -> anyhow::Result<Receiver<Result<()>>> {
        self.dispatch(Command::ComputeGroupKey)
    }

    pub(crate) fn regenerate_keys(&self) -> anyhow::Result<()> {
        Ok(self.request(Command::RegenerateKeys)??)
    }

    pub(crate) fn apply_join_async(&self) -> anyhow::Result<Receiver<Result<JoinSummary>>> {
        self.dispatch(Command::ApplyJoin)
    }

    pub(crate) fn apply_leave_async(
        &self,
        departing: MemberId,
    ) -> anyhow::Result<Receiver<Result<LeaveSummary>>> {
        self.dispatch(|r| Command::ApplyLeave(departing, r))
    }

    pub(crate) fn setup_new_member(&self) -> anyhow::Result<(MemberId, NodeName)> {
        Ok(self.request(Command::SetupNewMember)??)
    }

    pub(crate) fn paths(&self) -> anyhow::Result<(Vec<NodeName>, Vec<NodeName>)> {
        Ok(self.request(Command::Paths)??)
    }

    pub(crate) fn update_path(&self) -> anyhow::Result<Vec<NodeName>> {
        Ok(self.request(Command::UpdatePath)??)
    }

    pub(crate) fn representative(&self, name: NodeName) -> anyhow::Result<MemberId> {
        Ok(self.request(|r| Command::Representative(name, r))??)
    }

    pub(crate) fn fingerprint(&self) -> anyhow::Result<Option<Fingerprint>> {
        Ok(self.request(Command::Fingerprint)??)
    }

    pub(crate) fn render(&self) -> anyhow::Result<String> {
        Ok(self.request(Command::Render)??)
    }

    pub(crate) fn close_connections(&self) -> anyhow::Result<()> {
        self.request(Command::CloseConnections)
    }

    pub(crate) fn close_connections_async(&self) -> anyhow::Result<Receiver<()>> {
        self.dispatch(Command::CloseConnections)
    }

    /// Stops the actor and joins its thread.
    pub fn shutdown(mut self) {
        self.tx.send(Command::Shutdown).ok();

        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}

impl Drop for MemberHandle {
    fn drop(&mut self) {
        self.tx.send(Command::Shutdown).ok();

        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}

fn run<E: Endpoint>(mut member: Member<E>, rx: Receiver<Command>) {
    while let Ok(command) = rx.recv() {
        match command {
            Command::Bind(reply) => {
                reply.send(member.bind()).ok();
            }
            Command::Connect(addr, reply) => {
                reply.send(member.connect(&addr)).ok();
            }
            Command::PublishNode(name, reply) => {
                reply.send(member.publish_node(name)).ok();
            }
            Command::PublishSnapshot(reply) => {
                reply.send(member.publish_snapshot()).ok();
            }
            Command::Collect(timeout, reply) => {
                reply.send(member.collect(timeout)).ok();
            }
            Command::AdvanceInitial(reply) => {
                reply.send(member.advance_initial()).ok();
            }
            Command::ComputeGroupKey(reply) => {
                reply.send(member.compute_group_key()).ok();
            }
            Command::RegenerateKeys(reply) => {
                reply.send(member.regenerate_keys()).ok();
            }
            Command::ApplyJoin(reply) => {
                reply.send(member.apply_join()).ok();
            }
            Command::ApplyLeave(departing, reply) => {
                reply.send(member.apply_leave(departing)).ok();
            }
            Command::SetupNewMember(reply) => {
                reply.send(member.setup_as_new_member()).ok();
            }
            Command::Paths(reply) => {
                reply.send(member.paths()).ok();
            }
            Command::UpdatePath(reply) => {
                reply.send(member.update_path()).ok();
            }
            Command::Representative(name, reply) => {
                reply.send(member.representative(name)).ok();
            }
            Command::Fingerprint(reply) => {
                reply.send(member.root_fingerprint()).ok();
            }
            Command::Render(reply) => {
                reply.send(member.render()).ok();
            }
            Command::CloseConnections(reply) => {
                member.close_connections();
                reply.send(()).ok();
            }
            Command::Shutdown => break,
        }
    }

    member.close_connections();
}
