#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

mod actor;
mod member;
mod session;
mod transport;

#[cfg(test)]
mod tests;

pub use actor::*;
pub use member::*;
pub use session::*;
pub use transport::*;

pub use tgdh_tree::{JoinSummary, KeyTree, LeaveSummary};
pub use tgdh_types::{
    Error, Fingerprint, GroupParams, MemberId, RandomScalars, ScalarSource, SequenceScalars,
};
