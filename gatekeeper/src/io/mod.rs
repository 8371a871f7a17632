//! Side-effecting parts of the trust layer: files, subprocesses, git.

pub mod bootstrap;
pub mod chain;
pub mod config;
pub mod gateway;
pub mod git;
pub mod ledger;
pub mod process;
pub mod workspace;
