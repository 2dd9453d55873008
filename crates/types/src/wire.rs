use alloc::format;
use alloc::string::ToString as _;
use alloc::vec::Vec;
use core::fmt;
use core::str::FromStr;

use msgpacker::{MsgPacker, Packable as _, Unpackable as _};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::{Error, MemberId, NodeKind, NodeName};

/// A published blinded key for one tree node.
///
/// The wire form is the string `"<l,v>:<decimal>"`, e.g. `"<2,3>:48571"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAnnouncement {
    /// The node the blinded key belongs to.
    pub name: NodeName,
    /// The blinded key, `0 <= bkey < p`.
    pub bkey: BigUint,
}

impl KeyAnnouncement {
    /// Creates an announcement for the provided node.
    pub fn new(name: NodeName, bkey: BigUint) -> Self {
        Self { name, bkey }
    }
}

impl fmt::Display for KeyAnnouncement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.bkey)
    }
}

impl FromStr for KeyAnnouncement {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let (name, bkey) = s
            .split_once(':')
            .ok_or_else(|| Error::Wire(format!("key announcement `{s}` has no separator")))?;

        let name = name.parse()?;
        let bkey = BigUint::parse_bytes(bkey.as_bytes(), 10)
            .ok_or_else(|| Error::Wire(format!("invalid blinded key in `{s}`")))?;

        Ok(Self { name, bkey })
    }
}

/// One node of a serialized tree.
///
/// Private keys are never part of a snapshot; the receiver only ever learns
/// shape, ids, and blinded keys.
#[derive(
    Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, MsgPacker,
)]
pub struct SnapshotNode {
    /// Position of the node.
    pub name: NodeName,
    /// Role of the node.
    pub kind: NodeKind,
    /// Member id; `0` when the node carries none.
    pub mid: MemberId,
    /// Big-endian blinded key bytes; empty when unknown.
    pub bkey: Vec<u8>,
}

impl SnapshotNode {
    /// Creates a bare node entry.
    pub fn new(name: NodeName, kind: NodeKind) -> Self {
        Self {
            name,
            kind,
            mid: 0,
            bkey: Vec::new(),
        }
    }

    /// Attaches a member id.
    pub fn with_mid(mut self, mid: MemberId) -> Self {
        self.mid = mid;
        self
    }

    /// Attaches a blinded key.
    pub fn with_bkey(mut self, bkey: &BigUint) -> Self {
        self.bkey = bkey.to_bytes_be();
        self
    }

    /// The member id, if the node carries one.
    pub fn member(&self) -> Option<MemberId> {
        (self.mid != 0).then_some(self.mid)
    }

    /// The blinded key, if the node carries one.
    pub fn blind_key(&self) -> Option<BigUint> {
        (!self.bkey.is_empty()).then(|| BigUint::from_bytes_be(&self.bkey))
    }
}

/// A whole-tree snapshot, sufficient to reconstruct the tree on the receiver.
#[derive(
    Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, MsgPacker,
)]
pub struct TreeSnapshot {
    /// The id the next joining member will receive.
    pub next_member: MemberId,
    /// The refresh path recorded by the latest membership event.
    pub refresh: Vec<NodeName>,
    /// All nodes, in pre-order.
    pub nodes: Vec<SnapshotNode>,
}

/// A transport payload: either a blinded key announcement or a tree snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A `"<l,v>:<decimal>"` key publication.
    Key(KeyAnnouncement),
    /// A packed [`TreeSnapshot`].
    Snapshot(TreeSnapshot),
}

impl Frame {
    /// Leading byte of snapshot frames. Key frames always start with `<`, so
    /// the two cannot collide.
    pub const SNAPSHOT_TAG: u8 = 0x00;

    /// Encodes the frame into transport bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Key(k) => k.to_string().into_bytes(),

            Frame::Snapshot(s) => {
                let mut out = alloc::vec![Self::SNAPSHOT_TAG];

                s.pack(&mut out);

                out
            }
        }
    }

    /// Decodes a frame from transport bytes.
    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        match bytes.first() {
            None => Err(Error::Wire("empty frame".into())),

            Some(&Self::SNAPSHOT_TAG) => {
                let (_, snapshot) = TreeSnapshot::unpack(&bytes[1..])
                    .map_err(|e| Error::Wire(format!("failed to unpack snapshot: {e}")))?;

                Ok(Frame::Snapshot(snapshot))
            }

            Some(_) => {
                let text = core::str::from_utf8(bytes)
                    .map_err(|_| Error::Wire("key frame is not valid UTF-8".into()))?;

                Ok(Frame::Key(text.parse()?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_announcement_wire_format() {
        let a = KeyAnnouncement::new(NodeName::new(2, 3), BigUint::from(48571u32));

        assert_eq!(a.to_string(), "<2,3>:48571");
        assert_eq!("<2,3>:48571".parse::<KeyAnnouncement>().unwrap(), a);

        assert!("<2,3>".parse::<KeyAnnouncement>().is_err());
        assert!("<2,3>:x".parse::<KeyAnnouncement>().is_err());
    }

    #[test]
    fn frames_round_trip() {
        let key = Frame::Key(KeyAnnouncement::new(
            NodeName::new(1, 1),
            BigUint::from(18u32),
        ));

        assert_eq!(Frame::decode(&key.encode()).unwrap(), key);

        let snapshot = Frame::Snapshot(TreeSnapshot {
            next_member: 4,
            refresh: alloc::vec![NodeName::new(1, 1), NodeName::root()],
            nodes: alloc::vec![
                SnapshotNode::new(NodeName::root(), NodeKind::Root),
                SnapshotNode::new(NodeName::new(1, 0), NodeKind::Mem)
                    .with_mid(1)
                    .with_bkey(&BigUint::from(10u32)),
                SnapshotNode::new(NodeName::new(1, 1), NodeKind::Spon).with_mid(2),
            ],
        });

        assert_eq!(Frame::decode(&snapshot.encode()).unwrap(), snapshot);
    }

    #[test]
    fn snapshot_nodes_expose_optional_fields() {
        let bare = SnapshotNode::new(NodeName::new(1, 0), NodeKind::Inter);

        assert_eq!(bare.member(), None);
        assert_eq!(bare.blind_key(), None);

        let full = bare.with_mid(3).with_bkey(&BigUint::from(12u32));

        assert_eq!(full.member(), Some(3));
        assert_eq!(full.blind_key(), Some(BigUint::from(12u32)));
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(Frame::decode(b"").is_err());
        assert!(Frame::decode(&[Frame::SNAPSHOT_TAG, 0xff, 0xff]).is_err());
        assert!(Frame::decode(b"nonsense").is_err());
    }
}
