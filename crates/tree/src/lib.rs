#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod build;
mod mutate;
mod node;
mod paths;
mod recurrence;
mod render;
mod snapshot;
mod tree;

#[cfg(test)]
mod tests;

pub use mutate::*;
pub use node::*;
pub use tree::*;
