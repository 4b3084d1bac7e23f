//! Subject-keyed file store on top of a single mailbox.
//!
//! Every operation re-derives its state from the mailbox; nothing is cached
//! between runs and sequence numbers never outlive the mutation that follows.

use anyhow::Result;
use log::info;

use crate::mailbox::MailStore;

pub mod delete;
pub mod get;
pub mod put;
pub mod resolver;
pub mod sink;

/// Which messages a Get, Show or Delete works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    Sequence(String),
    Subject(String),
}

impl Selector {
    /// Builds a selector from the command-line switches; `--all` wins over the others.
    pub fn from_flags(all: bool, sequence: Option<String>, subject: Option<String>) -> Option<Self> {
        if all {
            return Some(Selector::All);
        }
        match (subject.filter(|s| !s.is_empty()), sequence.filter(|s| !s.trim().is_empty())) {
            (Some(subject), _) => Some(Selector::Subject(subject)),
            (None, Some(sequence)) => Some(Selector::Sequence(sequence.trim().to_string())),
            (None, None) => None,
        }
    }

    /// Turns the selector into a sequence set, or `None` when nothing matches.
    pub async fn resolve(&self, store: &mut dyn MailStore) -> Result<Option<String>> {
        let ids = match self {
            Selector::Sequence(sequence) => return Ok(Some(sequence.clone())),
            Selector::All => store.search("ALL", "").await?,
            Selector::Subject(subject) => resolver::resolve_union(store, subject).await?,
        };
        if ids.is_empty() {
            info!("no matches");
            return Ok(None);
        }
        Ok(Some(crate::mailbox::sequence_set(&ids)))
    }
}

/// Outcome of an operation whose selector may resolve to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NoMatches,
    Done(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_from_flags() {
        assert_eq!(
            Selector::from_flags(true, Some("1".into()), Some("a".into())),
            Some(Selector::All)
        );
        assert_eq!(
            Selector::from_flags(false, Some("1".into()), Some("a".into())),
            Some(Selector::Subject("a".into()))
        );
        assert_eq!(
            Selector::from_flags(false, Some(" 2:3 ".into()), None),
            Some(Selector::Sequence("2:3".into()))
        );
        assert_eq!(Selector::from_flags(false, Some("".into()), Some("".into())), None);
    }
}
