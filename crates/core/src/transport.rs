use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, Sender};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tgdh_types::{Error, Result};

/// A channel address handed out by [`Endpoint::bind`] and consumed by
/// [`Endpoint::connect`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates an address for a publisher alias.
    pub fn new<S: Into<String>>(alias: S) -> Self {
        Self(alias.into())
    }

    /// The publisher alias behind the address.
    pub fn alias(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Factory of per-member transport endpoints.
pub trait Transport: Clone + Send + 'static {
    /// The endpoint type handed to each member.
    type Endpoint: Endpoint;

    /// Creates the endpoint for the provided publisher alias.
    fn endpoint(&self, alias: &str) -> Self::Endpoint;
}

/// One member's view of the pub/sub fabric.
///
/// Payloads are opaque byte frames; the transport guarantees per-publisher
/// ordering and bounded-delay delivery, nothing more.
pub trait Endpoint: Send + 'static {
    /// Declares this endpoint's publishing channel.
    fn bind(&mut self) -> Result<Address>;

    /// Attaches a subscription to another endpoint's channel.
    fn connect(&mut self, addr: &Address) -> Result<()>;

    /// Fire-and-forget delivery to every connected subscriber.
    fn publish(&self, frame: &[u8]) -> Result<()>;

    /// Waits for one frame per active subscription, in subscription order.
    ///
    /// Fails with a transport error when a subscription stays silent past the
    /// timeout.
    fn collect(&mut self, timeout: Duration) -> Result<Vec<Vec<u8>>>;

    /// Drops every binding and subscription owned by this endpoint.
    fn close_all(&mut self);
}

/// An in-process pub/sub bus.
///
/// Publishing enqueues synchronously into each subscriber's channel, so a
/// frame is observable by the time `publish` returns; the session coordinator
/// relies on that for its round barrier.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    channels: Arc<Mutex<HashMap<String, Vec<Sender<Vec<u8>>>>>>,
}

impl Transport for MemoryBus {
    type Endpoint = BusEndpoint;

    fn endpoint(&self, alias: &str) -> BusEndpoint {
        BusEndpoint {
            bus: self.clone(),
            alias: alias.into(),
            bound: false,
            subscriptions: Vec::new(),
        }
    }
}

/// A [`MemoryBus`] endpoint.
pub struct BusEndpoint {
    bus: MemoryBus,
    alias: String,
    bound: bool,
    subscriptions: Vec<Receiver<Vec<u8>>>,
}

impl Endpoint for BusEndpoint {
    fn bind(&mut self) -> Result<Address> {
        self.bus
            .channels
            .lock()
            .entry(self.alias.clone())
            .or_default();

        self.bound = true;

        Ok(Address::new(self.alias.clone()))
    }

    fn connect(&mut self, addr: &Address) -> Result<()> {
        let mut channels = self.bus.channels.lock();

        let subscribers = channels
            .get_mut(addr.alias())
            .ok_or_else(|| Error::Transport(format!("no channel bound at `{addr}`")))?;

        let (tx, rx) = flume::unbounded();

        subscribers.push(tx);
        self.subscriptions.push(rx);

        Ok(())
    }

    fn publish(&self, frame: &[u8]) -> Result<()> {
        if !self.bound {
            return Err(Error::Transport(format!(
                "`{}` is publishing without a binding",
                self.alias
            )));
        }

        let mut channels = self.bus.channels.lock();

        let subscribers = channels
            .get_mut(&self.alias)
            .ok_or_else(|| Error::Transport(format!("channel `{}` was dropped", self.alias)))?;

        // prune subscribers that went away
        subscribers.retain(|tx| tx.send(frame.to_vec()).is_ok());

        Ok(())
    }

    fn collect(&mut self, timeout: Duration) -> Result<Vec<Vec<u8>>> {
        let mut frames = Vec::with_capacity(self.subscriptions.len());

        for sub in &self.subscriptions {
            let frame = sub.recv_timeout(timeout).map_err(|_| {
                Error::Transport("timed out waiting for a publication".into())
            })?;

            frames.push(frame);
        }

        Ok(frames)
    }

    fn close_all(&mut self) {
        self.subscriptions.clear();

        if self.bound {
            self.bus.channels.lock().remove(&self.alias);
            self.bound = false;
        }
    }
}
