//! CLI command implementations

pub(crate) mod check;
pub(crate) mod common;
pub(crate) mod migrate;
pub(crate) mod resolve;
pub(crate) mod status;
