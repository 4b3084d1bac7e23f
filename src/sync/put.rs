use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Local};
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::chardet;
use crate::mailbox::{Connector, FlagDelta, MailStore, FLAG_DELETED};
use crate::message::{encode_message, OutgoingMessage};
use crate::sync::resolver::{resolve_by_subject, Resolution};

#[derive(Debug, Error)]
pub enum PutError {
    #[error("failed to open file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no session to the mailbox: {0}")]
    Connect(String),
    #[error("more than one message is found for {subject:?} ({} matches). skipped.", .matches.len())]
    Ambiguous { subject: String, matches: Vec<u32> },
    #[error("{step} error of {subject:?}: {source:#}")]
    Protocol {
        subject: String,
        step: &'static str,
        source: anyhow::Error,
    },
    /// The old copy is already expunged, so the subject has no live message.
    #[error("{subject:?} was removed but its new copy could not be appended, verify the mailbox: {source:#}")]
    ReplaceWindow { subject: String, source: anyhow::Error },
}

/// Something to upload: a file in the sync directory or a named buffer read from stdin.
#[derive(Debug, Clone)]
pub enum PutSource {
    Path(PathBuf),
    Buffer {
        name: String,
        content: Vec<u8>,
        modified: DateTime<FixedOffset>,
    },
}

impl PutSource {
    pub fn name(&self) -> String {
        match self {
            PutSource::Path(path) => path.display().to_string(),
            PutSource::Buffer { name, .. } => name.clone(),
        }
    }

    /// Subject the source is stored under, known without reading it.
    pub fn subject(&self) -> String {
        let file_name = match self {
            PutSource::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            PutSource::Buffer { name, .. } => name.clone(),
        };
        split_file_name(&file_name).0
    }

    async fn load(self) -> Result<LocalFile, PutError> {
        match self {
            PutSource::Path(path) => {
                let read_error = |source| PutError::Read {
                    path: path.display().to_string(),
                    source,
                };
                let content = tokio::fs::read(&path).await.map_err(read_error)?;
                let modified = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
                    Ok(modified) => DateTime::<Local>::from(modified).fixed_offset(),
                    Err(e) => {
                        warn!("no modification time for {}: {}", path.display(), e);
                        Local::now().fixed_offset()
                    }
                };
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Ok(LocalFile::new(&file_name, modified, content))
            }
            PutSource::Buffer {
                name,
                content,
                modified,
            } => Ok(LocalFile::new(&name, modified, content)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalFile {
    pub subject: String,
    pub extension: Option<String>,
    pub modified: DateTime<FixedOffset>,
    pub content: Vec<u8>,
}

impl LocalFile {
    pub fn new(file_name: &str, modified: DateTime<FixedOffset>, content: Vec<u8>) -> Self {
        let (subject, extension) = split_file_name(file_name);
        LocalFile {
            subject,
            extension,
            modified,
            content,
        }
    }
}

/// Splits `name.ext` at the last dot. A leading dot does not start an extension.
pub fn split_file_name(file_name: &str) -> (String, Option<String>) {
    match file_name.rfind('.') {
        Some(pos) if pos > 0 => {
            let extension = &file_name[pos + 1..];
            let extension = (!extension.is_empty()).then(|| extension.to_string());
            (file_name[..pos].to_string(), extension)
        }
        _ => (file_name.to_string(), None),
    }
}

/// Expands the glob patterns relative to `dir`, keeping regular files only.
pub fn collect_sources(dir: &Path, patterns: &[String]) -> Vec<PutSource> {
    let mut paths = BTreeSet::new();
    for pattern in patterns {
        let full = dir.join(pattern);
        let entries = match glob::glob(&full.to_string_lossy()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("invalid pattern {}: {}", pattern, e);
                continue;
            }
        };
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => {
                    paths.insert(path);
                }
                Ok(path) => debug!("skipping {}", path.display()),
                Err(e) => warn!("{}", e),
            }
        }
    }
    paths.into_iter().map(PutSource::Path).collect()
}

#[derive(Debug, Default)]
pub struct PutReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, PutError)>,
}

impl PutReport {
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }
}

pub type Progress = Arc<dyn Fn(&str, Result<(), &PutError>) + Send + Sync>;

#[derive(Clone)]
pub struct PutOptions {
    /// From header of every stored message.
    pub from: String,
    /// Maximum number of concurrent sessions.
    pub concurrency: usize,
}

/// Uploads one file over an already-open session.
///
/// An existing message with the same subject is flagged, expunged, and only
/// then replaced. If the append fails after that the subject has no copy left,
/// which is reported as [`PutError::ReplaceWindow`].
pub async fn put_one(store: &mut dyn MailStore, source: PutSource, from: &str) -> Result<(), PutError> {
    let file = source.load().await?;
    let subject = file.subject.clone();
    let protocol = |step: &'static str| {
        let subject = subject.clone();
        move |source: anyhow::Error| PutError::Protocol { subject, step, source }
    };

    let replace = match resolve_by_subject(store, &subject)
        .await
        .map_err(protocol("search"))?
    {
        Resolution::NotFound => None,
        Resolution::Unique(seq) => Some(seq),
        Resolution::Ambiguous(matches) => {
            return Err(PutError::Ambiguous {
                subject: subject.clone(),
                matches,
            })
        }
    };

    let (body, charset) = chardet::normalize(file.content);
    debug!("charset of {:?} is {}", subject, charset);

    let raw = encode_message(&OutgoingMessage {
        subject: subject.clone(),
        date: file.modified,
        from: from.to_string(),
        charset,
        extension: file.extension,
        body,
    });

    if let Some(seq) = replace {
        store
            .store(&seq.to_string(), FlagDelta::Add, &[FLAG_DELETED])
            .await
            .map_err(protocol("flag set"))?;
        store.expunge().await.map_err(protocol("delete"))?;
    }

    store.append(&[], &raw).await.map_err(|source| match replace {
        Some(_) => PutError::ReplaceWindow {
            subject: subject.clone(),
            source,
        },
        None => protocol("message append")(source),
    })?;

    Ok(())
}

/// Groups sources sharing a subject, keeping the batch order within and across groups.
///
/// A group is handled start to finish by a single worker, so no two sessions
/// ever resolve or replace the same subject at once.
pub fn group_by_subject(sources: Vec<PutSource>) -> Vec<Vec<PutSource>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<PutSource>> = Vec::new();
    for source in sources {
        let slot = *index.entry(source.subject()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(source);
    }
    groups
}

struct Batch {
    queue: Mutex<VecDeque<Vec<PutSource>>>,
    report: Mutex<PutReport>,
    connect_errors: Mutex<Vec<String>>,
    from: String,
    progress: Progress,
}

async fn worker(id: usize, connector: Arc<dyn Connector>, batch: Arc<Batch>) {
    let mut store = match connector.connect().await {
        Ok(store) => store,
        Err(e) => {
            warn!("worker {}: {:#}", id, e);
            batch.connect_errors.lock().await.push(format!("{:#}", e));
            return;
        }
    };

    loop {
        let Some(group) = batch.queue.lock().await.pop_front() else {
            break;
        };
        for source in group {
            let name = source.name();
            let result = put_one(store.as_mut(), source, &batch.from).await;
            (batch.progress)(&name, result.as_ref().map(|_| ()));

            let mut report = batch.report.lock().await;
            match result {
                Ok(()) => report.succeeded.push(name),
                Err(e) => report.failed.push((name, e)),
            }
        }
    }

    if let Err(e) = store.logout().await {
        debug!("worker {}: logout failed: {:#}", id, e);
    }
}

/// Puts every source through a pool of at most `options.concurrency` workers.
///
/// Each worker owns one session for its lifetime. Files sharing a subject go
/// to the same worker in batch order, so the last of them wins. A failing
/// file never stops the others; failures are collected in the returned report.
pub async fn put(
    connector: Arc<dyn Connector>,
    sources: Vec<PutSource>,
    options: &PutOptions,
    progress: Progress,
) -> PutReport {
    if sources.is_empty() {
        return PutReport::default();
    }

    let total = sources.len();
    let groups = group_by_subject(sources);
    let workers = options.concurrency.max(1).min(groups.len());
    info!("putting {} file(s) with {} worker(s)", total, workers);

    let batch = Arc::new(Batch {
        queue: Mutex::new(groups.into()),
        report: Mutex::new(PutReport::default()),
        connect_errors: Mutex::new(Vec::new()),
        from: options.from.clone(),
        progress,
    });

    let handles: Vec<_> = (0..workers)
        .map(|id| tokio::spawn(worker(id, Arc::clone(&connector), Arc::clone(&batch))))
        .collect();
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!("put worker stopped: {}", e);
        }
    }

    // Anything left over had no worker able to connect
    let leftover: Vec<PutSource> = batch.queue.lock().await.drain(..).flatten().collect();
    let reason = batch
        .connect_errors
        .lock()
        .await
        .last()
        .cloned()
        .unwrap_or_else(|| "no worker available".to_string());

    let mut report = std::mem::take(&mut *batch.report.lock().await);
    for source in leftover {
        let name = source.name();
        let error = PutError::Connect(reason.clone());
        (batch.progress)(&name, Err(&error));
        report.failed.push((name, error));
    }
    report
}
