#![deny(clippy::await_holding_refcell_ref)]

pub mod client;
pub mod collaborators;
pub mod common;
pub mod config;
pub mod job;
pub mod queue;
pub mod resources;
pub mod store;
pub mod worker;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::AudioqError;
pub type Result<T> = std::result::Result<T, Error>;

pub type Map<K, V> = hashbrown::HashMap<K, V>;
pub type Set<T> = hashbrown::HashSet<T>;

pub use common::WrappedRcRefCell;

pub const AUDIOQ_VERSION: &str = {
    match option_env!("AUDIOQ_BUILD_VERSION") {
        Some(version) => version,
        None => const_format::concatcp!(env!("CARGO_PKG_VERSION"), "-dev"),
    }
};
