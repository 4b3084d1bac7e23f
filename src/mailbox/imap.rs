use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use async_imap::{Client, Session};
use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::mailbox::oauth::{resolve_credentials, Credentials, XOAuth2};
use crate::mailbox::{Connector, FlagDelta, MailStore};
use crate::settings::Config;
use log::{debug, info};

type ImapStream = Compat<tokio_native_tls::TlsStream<TcpStream>>;

// Establish a TLS-encrypted connection to the IMAP server
async fn connect_to_server(server: &str, port: u16) -> Result<tokio_native_tls::TlsStream<TcpStream>> {
    let imap_addr = (server, port);
    let tcp_stream = TcpStream::connect(imap_addr)
        .await
        .with_context(|| format!("can't connect to {}:{}", server, port))?;
    let tls = tokio_native_tls::TlsConnector::from(native_tls::TlsConnector::new()?);
    let tls_stream = tls.connect(server, tcp_stream).await?;

    info!("-- connected to {}:{}", server, port);
    Ok(tls_stream)
}

// Login to the IMAP server and return an authenticated session
async fn login_to_server(client: Client<ImapStream>, credentials: &Credentials) -> Result<Session<ImapStream>> {
    let imap_session = match credentials {
        Credentials::Password { user, password } => client
            .login(user, password)
            .await
            .map_err(|e| e.0)
            .with_context(|| format!("can't login as {}", user))?,
        Credentials::OAuth2 { user, access_token } => {
            let auth = XOAuth2 {
                user: user.clone(),
                access_token: access_token.clone(),
            };
            client
                .authenticate("XOAUTH2", auth)
                .await
                .map_err(|e| e.0)
                .with_context(|| format!("XOAUTH2 authentication failed for {}", user))?
        }
    };

    info!("-- logged in as {}", credentials.user());
    Ok(imap_session)
}

fn quote(keyword: &str) -> String {
    format!("\"{}\"", keyword.replace('\\', "\\\\").replace('"', "\\\""))
}

pub(crate) fn search_query(criteria: &str, keyword: &str) -> String {
    let criteria = criteria.trim();
    if criteria.is_empty() {
        return "ALL".to_string();
    }
    if keyword.is_empty() {
        return criteria.to_string();
    }
    if keyword.is_ascii() {
        format!("{} {}", criteria, quote(keyword))
    } else {
        format!("CHARSET UTF-8 {} {}", criteria, quote(keyword))
    }
}

pub struct ImapMailStore {
    session: Session<ImapStream>,
    mailbox: String,
}

impl ImapMailStore {
    pub async fn open(config: &Config, credentials: &Credentials) -> Result<Self> {
        let tls_stream = connect_to_server(&config.imap.server, config.imap.port).await?;
        let client = Client::new(tls_stream.compat());

        let mut session = login_to_server(client, credentials).await?;

        let mailbox = config.imap.mailbox.clone();
        let mailbox_data = session
            .select(&mailbox)
            .await
            .with_context(|| format!("can't select box {}", mailbox))?;
        info!("-- {} selected ({} messages)", mailbox, mailbox_data.exists);

        Ok(ImapMailStore { session, mailbox })
    }
}

#[async_trait]
impl MailStore for ImapMailStore {
    async fn search(&mut self, criteria: &str, keyword: &str) -> Result<Vec<u32>> {
        let query = search_query(criteria, keyword);
        debug!("SEARCH {}", query);
        let ids = self.session.search(&query).await?;
        let mut ids: Vec<u32> = ids.into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn fetch(&mut self, sequence: &str, header_only: bool) -> Result<BTreeMap<u32, Vec<u8>>> {
        let query = if header_only { "BODY.PEEK[HEADER]" } else { "BODY.PEEK[]" };
        debug!("FETCH {} {}", sequence, query);
        let messages_stream = self.session.fetch(sequence, query).await?;
        let messages: Vec<_> = messages_stream.try_collect().await?;

        let mut fetched = BTreeMap::new();
        for message in &messages {
            let raw = if header_only { message.header() } else { message.body() };
            let raw = raw.ok_or_else(|| anyhow!("malformed FETCH response for message {}", message.message))?;
            fetched.insert(message.message, raw.to_vec());
        }
        Ok(fetched)
    }

    async fn append(&mut self, flags: &[&str], message: &[u8]) -> Result<()> {
        let flags = (!flags.is_empty()).then(|| format!("({})", flags.join(" ")));
        self.session
            .append(&self.mailbox, flags.as_deref(), None, message)
            .await?;
        Ok(())
    }

    async fn store(&mut self, sequence: &str, delta: FlagDelta, flags: &[&str]) -> Result<()> {
        let query = format!("{} ({})", delta, flags.join(" "));
        debug!("STORE {} {}", sequence, query);
        let responses = self.session.store(sequence, &query).await?;
        let _: Vec<_> = responses.try_collect().await?;
        Ok(())
    }

    async fn expunge(&mut self) -> Result<Vec<u32>> {
        let expunged = self.session.expunge().await?;
        let expunged: Vec<u32> = expunged.try_collect().await?;
        debug!("expunged {:?}", expunged);
        Ok(expunged)
    }

    async fn logout(&mut self) -> Result<()> {
        // Be nice to the server and log out
        self.session.logout().await?;
        Ok(())
    }
}

/// Opens IMAP sessions with credentials resolved once up front.
pub struct ImapConnector {
    config: Config,
    credentials: Credentials,
}

impl ImapConnector {
    pub async fn new(config: Config) -> Result<Self> {
        let credentials = resolve_credentials(&config).await?;
        Ok(ImapConnector { config, credentials })
    }
}

#[async_trait]
impl Connector for ImapConnector {
    async fn connect(&self) -> Result<Box<dyn MailStore>> {
        let store = ImapMailStore::open(&self.config, &self.credentials).await?;
        Ok(Box::new(store))
    }
}
