use anyhow::Result;
use log::{info, warn};
use mailparse::MailParseError;
use serde::Serialize;
use thiserror::Error;

use crate::mailbox::{sequence_set, MailStore};
use crate::message::{decode_message, select_text_part, DecodedMessage};
use crate::sync::sink::OutputSink;
use crate::sync::{Outcome, Selector};

#[derive(Debug, Error)]
#[error("on subject[{}]: {source}", .subject.as_deref().unwrap_or("?"))]
pub struct DecodeFailure {
    pub seq: u32,
    pub subject: Option<String>,
    #[source]
    pub source: MailParseError,
}

#[derive(Debug, Error)]
pub enum GetError {
    #[error(transparent)]
    Decode(#[from] DecodeFailure),
    #[error("on subject[{subject}]: no decodable message found (message {seq} has no text part)")]
    NoTextPart { seq: u32, subject: String },
}

/// One line of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    pub seq: u32,
    pub subject: String,
    pub date: String,
}

#[derive(Debug, Clone)]
pub struct GetOptions {
    pub include_header: bool,
    /// Used when the message carries no extension of its own.
    pub default_extension: String,
}

/// Full decode, falling back to a header-only decode just to name the failing message.
pub fn decode_with_context(seq: u32, raw: &[u8]) -> Result<DecodedMessage, DecodeFailure> {
    decode_message(raw, false).map_err(|source| {
        let subject = decode_message(raw, true).ok().map(|header| header.subject());
        DecodeFailure { seq, subject, source }
    })
}

/// Lists matching messages in ascending sequence order.
pub async fn list(store: &mut dyn MailStore, criteria: &str, keyword: &str) -> Result<Vec<ListEntry>> {
    let ids = if keyword.trim().is_empty() {
        store.search("ALL", "").await?
    } else {
        store.search(criteria, keyword).await?
    };
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let headers = store.fetch(&sequence_set(&ids), true).await?;
    let mut entries = Vec::with_capacity(headers.len());
    for (seq, raw) in headers {
        let decoded = decode_message(&raw, true).map_err(|source| DecodeFailure {
            seq,
            subject: None,
            source,
        })?;
        if select_text_part(&decoded.parts).is_none() {
            warn!("message {} has no parts", seq);
        }
        entries.push(ListEntry {
            seq,
            subject: decoded.subject(),
            date: decoded.header("Date").unwrap_or_default().to_string(),
        });
    }

    // Remote order is unspecified
    entries.sort_by_key(|entry| entry.seq);
    Ok(entries)
}

/// Fetches the selected messages and hands their text payloads to `sink`.
pub async fn get(
    store: &mut dyn MailStore,
    selector: &Selector,
    options: &GetOptions,
    sink: &mut dyn OutputSink,
) -> Result<Outcome> {
    let Some(sequence) = selector.resolve(store).await? else {
        return Ok(Outcome::NoMatches);
    };

    let messages = store.fetch(&sequence, false).await?;
    if messages.is_empty() {
        info!("no matches");
        return Ok(Outcome::NoMatches);
    }

    let mut written = 0;
    for (seq, raw) in messages {
        let decoded = decode_with_context(seq, &raw).map_err(GetError::from)?;
        let subject = decoded.subject();
        let part = select_text_part(&decoded.parts).ok_or_else(|| GetError::NoTextPart {
            seq,
            subject: subject.clone(),
        })?;

        let mut content = Vec::new();
        if options.include_header {
            content.extend_from_slice(&decoded.header_block());
        }
        content.extend_from_slice(&part.body);

        let extension = decoded.extension().unwrap_or(&options.default_extension);
        sink.write(&subject, extension, decoded.date(), &content)?;
        written += 1;
    }

    info!("-- got {} message(s)", written);
    Ok(Outcome::Done(written))
}
