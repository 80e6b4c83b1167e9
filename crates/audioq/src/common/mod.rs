pub mod cli;
pub mod error;
pub mod macros;
pub mod manager;
pub mod parser;
pub mod placeholders;
pub mod rpc;
pub mod setup;
pub mod utils;
pub mod wrapped;

pub use wrapped::WrappedRcRefCell;
