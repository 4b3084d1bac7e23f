//! In-memory mailbox used by the sync tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::mailbox::{Connector, FlagDelta, MailStore, FLAG_DELETED};
use crate::message::decode_message;

#[derive(Debug, Clone)]
struct StoredMessage {
    raw: Vec<u8>,
    deleted: bool,
}

#[derive(Default)]
struct State {
    messages: Vec<StoredMessage>,
}

/// Shared mailbox; every session opened on it sees the same messages.
#[derive(Clone, Default)]
pub struct MemoryMailbox {
    state: Arc<Mutex<State>>,
    fail_appends: Arc<AtomicBool>,
    fail_connects: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, raw: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state.messages.push(StoredMessage { raw, deleted: false });
    }

    pub fn raw_messages(&self) -> Vec<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.messages.iter().map(|m| m.raw.clone()).collect()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.raw_messages()
            .iter()
            .map(|raw| decode_message(raw, true).unwrap().subject())
            .collect()
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> MemoryMailStore {
        MemoryMailStore {
            mailbox: self.clone(),
        }
    }
}

fn header_section(raw: &[u8]) -> Vec<u8> {
    match raw.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(end) => raw[..end + 4].to_vec(),
        None => raw.to_vec(),
    }
}

fn parse_sequence(sequence: &str, exists: u32) -> Result<Vec<u32>> {
    let bound = |s: &str| -> Result<u32> {
        if s == "*" {
            Ok(exists)
        } else {
            s.parse().map_err(|_| anyhow!("BAD invalid sequence set {:?}", sequence))
        }
    };

    let mut ids = Vec::new();
    for item in sequence.split(',') {
        match item.split_once(':') {
            Some((from, to)) => {
                let (from, to) = (bound(from)?, bound(to)?);
                ids.extend(from.min(to)..=from.max(to));
            }
            None => ids.push(bound(item)?),
        }
    }
    ids.retain(|id| *id >= 1 && *id <= exists);
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

pub struct MemoryMailStore {
    mailbox: MemoryMailbox,
}

#[async_trait]
impl MailStore for MemoryMailStore {
    async fn search(&mut self, criteria: &str, keyword: &str) -> Result<Vec<u32>> {
        let state = self.mailbox.state.lock().unwrap();
        let header = match criteria.trim().to_ascii_uppercase().as_str() {
            "" | "ALL" => None,
            "SUBJECT" => Some("Subject"),
            "FROM" => Some("From"),
            other => bail!("unsupported search key {}", other),
        };

        let needle = keyword.to_lowercase();
        let mut ids = Vec::new();
        for (index, message) in state.messages.iter().enumerate() {
            let matched = match header {
                None => true,
                Some(name) => decode_message(&message.raw, true)
                    .map(|decoded| {
                        decoded
                            .header(name)
                            .unwrap_or_default()
                            .to_lowercase()
                            .contains(&needle)
                    })
                    .unwrap_or(false),
            };
            if matched {
                ids.push(index as u32 + 1);
            }
        }
        Ok(ids)
    }

    async fn fetch(&mut self, sequence: &str, header_only: bool) -> Result<BTreeMap<u32, Vec<u8>>> {
        let state = self.mailbox.state.lock().unwrap();
        let ids = parse_sequence(sequence, state.messages.len() as u32)?;
        Ok(ids
            .into_iter()
            .map(|id| {
                let raw = &state.messages[id as usize - 1].raw;
                let raw = if header_only { header_section(raw) } else { raw.clone() };
                (id, raw)
            })
            .collect())
    }

    async fn append(&mut self, _flags: &[&str], message: &[u8]) -> Result<()> {
        if self.mailbox.fail_appends.load(Ordering::SeqCst) {
            bail!("NO [OVERQUOTA] append refused");
        }
        self.mailbox.insert(message.to_vec());
        Ok(())
    }

    async fn store(&mut self, sequence: &str, delta: FlagDelta, flags: &[&str]) -> Result<()> {
        let mut state = self.mailbox.state.lock().unwrap();
        let ids = parse_sequence(sequence, state.messages.len() as u32)?;
        if !flags.contains(&FLAG_DELETED) {
            return Ok(());
        }
        for id in ids {
            state.messages[id as usize - 1].deleted = delta != FlagDelta::Remove;
        }
        Ok(())
    }

    async fn expunge(&mut self) -> Result<Vec<u32>> {
        let mut state = self.mailbox.state.lock().unwrap();
        // Each removal shifts the following sequence numbers down, as IMAP reports them
        let mut expunged = Vec::new();
        let mut seq = 1;
        state.messages.retain(|m| {
            if m.deleted {
                expunged.push(seq);
                false
            } else {
                seq += 1;
                true
            }
        });
        Ok(expunged)
    }

    async fn logout(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryMailbox {
    async fn connect(&self) -> Result<Box<dyn MailStore>> {
        if self.fail_connects.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.session()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sequence() {
        assert_eq!(parse_sequence("1,3:4", 5).unwrap(), vec![1, 3, 4]);
        assert_eq!(parse_sequence("2:*", 3).unwrap(), vec![2, 3]);
        assert_eq!(parse_sequence("9999", 3).unwrap(), Vec::<u32>::new());
        assert!(parse_sequence("x", 3).is_err());
    }
}
