#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod crypto;
mod error;
mod name;
mod scalar;
mod wire;

pub use crypto::*;
pub use error::*;
pub use name::*;
pub use scalar::*;
pub use wire::*;
