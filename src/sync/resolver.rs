use anyhow::Result;
use log::{debug, warn};

use crate::mailbox::{sequence_set, MailStore};
use crate::message::decode_message;

/// Where a subject stands in the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    NotFound,
    Unique(u32),
    Ambiguous(Vec<u32>),
}

impl Resolution {
    pub fn from_matches(ids: Vec<u32>) -> Self {
        match ids.as_slice() {
            [] => Resolution::NotFound,
            [id] => Resolution::Unique(*id),
            _ => Resolution::Ambiguous(ids),
        }
    }
}

/// Messages whose subject is exactly `subject`.
///
/// The server's SUBJECT search matches substrings and may ignore whitespace,
/// so every candidate's header is fetched and compared byte for byte.
pub async fn exact_matches(store: &mut dyn MailStore, subject: &str) -> Result<Vec<u32>> {
    let candidates = store.search("SUBJECT", subject).await?;
    if candidates.is_empty() {
        return Ok(candidates);
    }

    let headers = store.fetch(&sequence_set(&candidates), true).await?;
    let mut ids = Vec::new();
    for (seq, raw) in headers {
        match decode_message(&raw, true) {
            Ok(decoded) if decoded.subject() == subject => ids.push(seq),
            Ok(decoded) => debug!("{} is not an exact match: {:?}", seq, decoded.subject()),
            Err(e) => warn!("skipping message {} with undecodable header: {}", seq, e),
        }
    }
    Ok(ids)
}

pub async fn resolve_by_subject(store: &mut dyn MailStore, subject: &str) -> Result<Resolution> {
    exact_matches(store, subject).await.map(Resolution::from_matches)
}

/// Get and Delete act on every exact match, ambiguous or not.
pub async fn resolve_union(store: &mut dyn MailStore, subject: &str) -> Result<Vec<u32>> {
    exact_matches(store, subject).await
}
