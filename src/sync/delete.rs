use anyhow::{Context, Result};
use log::info;

use crate::mailbox::{FlagDelta, MailStore, FLAG_DELETED};
use crate::sync::{Outcome, Selector};

/// Flags every selected message deleted and expunges them.
pub async fn delete(store: &mut dyn MailStore, selector: &Selector) -> Result<Outcome> {
    let Some(sequence) = selector.resolve(store).await? else {
        return Ok(Outcome::NoMatches);
    };

    store
        .store(&sequence, FlagDelta::Add, &[FLAG_DELETED])
        .await
        .with_context(|| format!("flag set error of {}", sequence))?;
    let expunged = store.expunge().await.context("expunge failed")?;

    info!("-- deleted {} message(s)", expunged.len());
    Ok(Outcome::Done(expunged.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::memory::MemoryMailbox;
    use crate::tests::raw_message;

    fn mailbox() -> MemoryMailbox {
        let mailbox = MemoryMailbox::new();
        for subject in ["test", "test1", "test2", "hoge"] {
            mailbox.insert(raw_message(subject, ""));
        }
        mailbox
    }

    #[tokio::test]
    async fn test_delete_unknown_subject_is_a_no_op() {
        let mailbox = mailbox();
        let mut store = mailbox.session();
        let outcome = delete(&mut store, &Selector::Subject("aaaa".into())).await.unwrap();
        assert_eq!(outcome, Outcome::NoMatches);
        assert_eq!(mailbox.subjects(), vec!["test", "test1", "test2", "hoge"]);
    }

    #[tokio::test]
    async fn test_delete_by_subject_is_exact() {
        let mailbox = mailbox();
        let mut store = mailbox.session();
        delete(&mut store, &Selector::Subject("test".into())).await.unwrap();
        assert_eq!(mailbox.subjects(), vec!["test1", "test2", "hoge"]);
    }

    #[tokio::test]
    async fn test_delete_by_sequence() {
        let mailbox = mailbox();
        let mut store = mailbox.session();
        delete(&mut store, &Selector::Sequence("1".into())).await.unwrap();
        assert_eq!(mailbox.subjects(), vec!["test1", "test2", "hoge"]);
        delete(&mut store, &Selector::Sequence("1".into())).await.unwrap();
        assert_eq!(mailbox.subjects(), vec!["test2", "hoge"]);
    }

    #[tokio::test]
    async fn test_delete_all() {
        let mailbox = mailbox();
        let mut store = mailbox.session();
        let outcome = delete(&mut store, &Selector::All).await.unwrap();
        assert_eq!(outcome, Outcome::Done(4));
        assert!(mailbox.subjects().is_empty());

        let outcome = delete(&mut store, &Selector::All).await.unwrap();
        assert_eq!(outcome, Outcome::NoMatches);
    }
}
