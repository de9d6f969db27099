// bellhop-common: shared types and protocol for the Bellhop workspace

pub mod protocol;
pub mod types;
