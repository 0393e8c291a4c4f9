//! CLI command implementations.

pub(crate) mod listen;
pub(crate) mod serve;

pub(crate) use listen::ListenArgs;
pub(crate) use serve::ServeArgs;
