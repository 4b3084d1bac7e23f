use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

pub mod imap;
pub mod oauth;
#[cfg(test)]
pub mod memory;

pub const FLAG_DELETED: &str = "\\Deleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagDelta {
    Add,
    Remove,
}

impl fmt::Display for FlagDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlagDelta::Add => "+FLAGS",
            FlagDelta::Remove => "-FLAGS",
        })
    }
}

/// One authenticated session on the sync mailbox.
///
/// Sequence numbers returned here are only valid until the next expunge.
/// A session is used by one task at a time; concurrent work opens its own.
#[async_trait]
pub trait MailStore: Send {
    /// Searches the selected mailbox. Empty criteria means `ALL`.
    async fn search(&mut self, criteria: &str, keyword: &str) -> Result<Vec<u32>>;
    async fn fetch(&mut self, sequence: &str, header_only: bool) -> Result<BTreeMap<u32, Vec<u8>>>;
    /// Appends to the selected mailbox.
    async fn append(&mut self, flags: &[&str], message: &[u8]) -> Result<()>;
    async fn store(&mut self, sequence: &str, delta: FlagDelta, flags: &[&str]) -> Result<()>;
    /// Removes `\Deleted` messages, returning the sequence numbers reported gone.
    async fn expunge(&mut self) -> Result<Vec<u32>>;
    async fn logout(&mut self) -> Result<()>;
}

/// Opens fresh sessions, one per worker.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MailStore>>;
}

/// Joins sequence numbers into an IMAP sequence set (`1,4,7`).
pub fn sequence_set(ids: &[u32]) -> String {
    use itertools::Itertools;
    ids.iter().sorted().dedup().join(",")
}
