pub mod adapters;
pub mod domain;
pub mod error;
pub mod signing;
pub mod strategy;

pub use error::{PloyError, Result};
pub use signing::Wallet;
