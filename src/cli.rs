use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use tokio::io::AsyncReadExt;

use crate::display::display_entries;
use crate::mailbox::imap::ImapConnector;
use crate::mailbox::Connector;
use crate::settings::{self, Config, DEFAULT_CONFIG_PATH};
use crate::sync::delete::delete;
use crate::sync::get::{get, list, GetOptions};
use crate::sync::put::{collect_sources, put, Progress, PutError, PutOptions, PutSource};
use crate::sync::sink::{FileSink, OutputSink, StreamSink};
use crate::sync::{Outcome, Selector};

#[derive(Parser, Debug)]
#[command(name = "pomi", version, about = "Pomera Sync IMAP tool")]
pub struct Cli {
    /// Load the configuration from CONFIG
    #[arg(long, visible_alias = "conf", global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// Local sync directory (defaults to sync.dir in the configuration)
    #[arg(short, long, global = true)]
    pub dir: Option<PathBuf>,
    /// More log output, repeat for trace
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Only warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List messages
    #[command(visible_aliases = ["l", "ls"])]
    List(ListCmd),
    /// Get messages into the sync directory
    #[command(visible_alias = "g")]
    Get(GetCmd),
    /// Show messages on stdout
    Show(ShowCmd),
    /// Put files as messages
    #[command(visible_alias = "p")]
    Put(PutCmd),
    /// Delete messages
    #[command(visible_aliases = ["del", "d"])]
    Delete(DeleteCmd),
}

#[derive(Args, Debug)]
pub struct ListCmd {
    /// Search key the keyword is matched with
    #[arg(short, long, default_value = "SUBJECT")]
    criteria: String,
    /// Print the listing as JSON
    #[arg(long)]
    json: bool,
    keyword: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SelectArgs {
    /// All messages
    #[arg(long)]
    all: bool,
    /// By sequence (comma separated or s1:s2)
    #[arg(long)]
    seq: Option<String>,
    /// By exact subject
    #[arg(short, long, visible_alias = "subj")]
    subject: Option<String>,
}

impl SelectArgs {
    fn selector(&self) -> Result<Selector> {
        Selector::from_flags(self.all, self.seq.clone(), self.subject.clone())
            .ok_or_else(|| anyhow!("specify one of --all, --seq or --subject"))
    }
}

#[derive(Args, Debug)]
pub struct GetCmd {
    #[command(flatten)]
    select: SelectArgs,
    /// File extension for messages put by other clients
    #[arg(short, long)]
    ext: Option<String>,
    /// Output mail headers
    #[arg(short = 'H', long)]
    header: bool,
}

#[derive(Args, Debug)]
pub struct ShowCmd {
    #[command(flatten)]
    select: SelectArgs,
    /// Output mail headers
    #[arg(short = 'H', long)]
    header: bool,
}

#[derive(Args, Debug)]
pub struct PutCmd {
    /// Read the content from stdin and store it under NAME
    #[arg(short, long)]
    name: Option<String>,
    /// Number of concurrent sessions (defaults to sync.concurrency)
    #[arg(short, long)]
    jobs: Option<usize>,
    /// Glob patterns relative to the sync directory
    #[arg(required_unless_present = "name")]
    patterns: Vec<String>,
}

#[derive(Args, Debug)]
pub struct DeleteCmd {
    #[command(flatten)]
    select: SelectArgs,
}

async fn open_session(config: &Config) -> Result<Box<dyn crate::mailbox::MailStore>> {
    let connector = ImapConnector::new(config.clone()).await?;
    connector
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", config.imap.server))
}

fn report_outcome(outcome: Outcome) {
    match outcome {
        Outcome::NoMatches => info!("no matches"),
        Outcome::Done(count) => info!("{} message(s)", count),
    }
}

async fn run_list(config: &Config, cmd: ListCmd) -> Result<()> {
    let mut store = open_session(config).await?;
    let keyword = cmd.keyword.join(" ");
    let entries = list(store.as_mut(), &cmd.criteria, &keyword)
        .await
        .context("listing error")?;
    store.logout().await?;

    display_entries(&entries, cmd.json);
    Ok(())
}

async fn run_get(config: &Config, select: &SelectArgs, options: GetOptions, sink: &mut dyn OutputSink) -> Result<()> {
    let selector = select.selector()?;
    let mut store = open_session(config).await?;
    let outcome = get(store.as_mut(), &selector, &options, sink).await?;
    store.logout().await?;

    report_outcome(outcome);
    Ok(())
}

async fn read_stdin(name: String) -> Result<PutSource> {
    let mut content = Vec::new();
    tokio::io::stdin().read_to_end(&mut content).await?;
    Ok(PutSource::Buffer {
        name,
        content,
        modified: chrono::Local::now().fixed_offset(),
    })
}

async fn run_put(config: &Config, cmd: PutCmd) -> Result<()> {
    let dir = &config.sync.dir;
    let sources = match cmd.name {
        Some(name) => {
            info!("reading stdin as {}", name);
            vec![read_stdin(name).await?]
        }
        None => {
            info!("searching files in {}", dir.display());
            collect_sources(dir, &cmd.patterns)
        }
    };
    if sources.is_empty() {
        info!("no matches");
        return Ok(());
    }

    let total = sources.len();
    let options = PutOptions {
        from: config.from_address(),
        concurrency: cmd.jobs.unwrap_or(config.sync.concurrency),
    };
    let progress: Progress = Arc::new(|name: &str, result: Result<(), &PutError>| match result {
        Ok(()) => info!("putting {}", name),
        Err(e) => warn!("failed to put file {}: {}", name, e),
    });

    let connector: Arc<dyn Connector> = Arc::new(ImapConnector::new(config.clone()).await?);
    let report = put(connector, sources, &options, progress).await;

    info!("put {} of {} file(s)", report.success_count(), total);
    if !report.failed.is_empty() {
        bail!("{} file(s) could not be put", report.failed.len());
    }
    Ok(())
}

async fn run_delete(config: &Config, cmd: DeleteCmd) -> Result<()> {
    let selector = cmd.select.selector()?;
    let mut store = open_session(config).await?;
    let outcome = delete(store.as_mut(), &selector).await?;
    store.logout().await?;

    report_outcome(outcome);
    Ok(())
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = settings::load_settings(&cli.config)?;
    if let Some(dir) = cli.dir {
        config.sync.dir = dir;
    }

    match cli.command {
        Command::List(cmd) => run_list(&config, cmd).await,
        Command::Get(cmd) => {
            let options = GetOptions {
                include_header: cmd.header,
                default_extension: cmd.ext.clone().unwrap_or_else(|| config.sync.extension.clone()),
            };
            let mut sink = FileSink::new(&config.sync.dir)?;
            run_get(&config, &cmd.select, options, &mut sink).await
        }
        Command::Show(cmd) => {
            let options = GetOptions {
                include_header: cmd.header,
                default_extension: String::new(),
            };
            let mut sink = StreamSink::new(std::io::stdout());
            run_get(&config, &cmd.select, options, &mut sink).await
        }
        Command::Put(cmd) => run_put(&config, cmd).await,
        Command::Delete(cmd) => run_delete(&config, cmd).await,
    }
}
