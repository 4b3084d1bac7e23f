use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, FixedOffset, TimeZone};
use mailparse::{parse_headers, parse_mail, MailHeaderMap, MailParseError, ParsedMail};

use crate::chardet::Charset;

/// Header carrying the local file extension, since the subject only holds the stem.
pub const EXTENSION_HEADER: &str = "X-Pomi-Ext";

const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";
const BODY_LINE_WIDTH: usize = 76;
// 45 bytes encode to 60 base64 chars, keeping each encoded word under 75.
const ENCODED_WORD_CHUNK: usize = 45;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePart {
    pub content_type: String,
    pub body: Vec<u8>,
}

impl MessagePart {
    pub fn is_text(&self) -> bool {
        self.content_type.trim().to_ascii_lowercase().starts_with("text/")
    }
}

#[derive(Debug, Clone)]
pub struct DecodedMessage {
    pub headers: Vec<(String, String)>,
    pub parts: Vec<MessagePart>,
}

impl DecodedMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn subject(&self) -> String {
        self.header("Subject").unwrap_or_default().to_string()
    }

    pub fn date(&self) -> Option<DateTime<FixedOffset>> {
        self.header("Date").and_then(parse_date)
    }

    /// Extension recorded when the message was put, if any.
    pub fn extension(&self) -> Option<&str> {
        self.header(EXTENSION_HEADER)
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
    }

    /// Serializes the headers as `Name: value\r\n` lines followed by a blank line.
    pub fn header_block(&self) -> Vec<u8> {
        let mut block = Vec::new();
        for (key, value) in &self.headers {
            block.extend_from_slice(key.as_bytes());
            block.extend_from_slice(b": ");
            block.extend_from_slice(value.as_bytes());
            block.extend_from_slice(b"\r\n");
        }
        block.extend_from_slice(b"\r\n");
        block
    }
}

/// A plain-text message ready to be appended to the mailbox.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub subject: String,
    pub date: DateTime<FixedOffset>,
    pub from: String,
    pub charset: Charset,
    pub extension: Option<String>,
    pub body: Vec<u8>,
}

pub fn format_date<Tz: TimeZone>(date: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc2822(value.trim()).ok()
}

// Leading or trailing blanks would be lost as folding whitespace, so they
// force an encoded word too.
fn encode_header_value(value: &str) -> String {
    if value.is_ascii() && value.trim() == value {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in value.chars() {
        if chunk.len() + c.len_utf8() > ENCODED_WORD_CHUNK {
            words.push(format!("=?UTF-8?B?{}?=", BASE64.encode(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(format!("=?UTF-8?B?{}?=", BASE64.encode(chunk.as_bytes())));
    }
    words.join("\r\n ")
}

pub fn encode_message(message: &OutgoingMessage) -> Vec<u8> {
    let mut headers = vec![
        format!("Subject: {}", encode_header_value(&message.subject)),
        format!("Date: {}", format_date(&message.date)),
        format!("From: {}", message.from),
        "MIME-Version: 1.0".to_string(),
        format!("Content-Type: text/plain; charset=\"{}\"", message.charset),
        "Content-Transfer-Encoding: base64".to_string(),
    ];
    if let Some(ext) = &message.extension {
        headers.push(format!("{}: {}", EXTENSION_HEADER, ext));
    }

    let mut raw = headers.join("\r\n").into_bytes();
    raw.extend_from_slice(b"\r\n\r\n");

    let encoded = BASE64.encode(&message.body);
    for line in encoded.as_bytes().chunks(BODY_LINE_WIDTH) {
        raw.extend_from_slice(line);
        raw.extend_from_slice(b"\r\n");
    }
    raw
}

fn collect_parts(part: &ParsedMail, parts: &mut Vec<MessagePart>) -> Result<(), MailParseError> {
    if part.subparts.is_empty() {
        parts.push(MessagePart {
            content_type: part.ctype.mimetype.clone(),
            body: part.get_body_raw()?,
        });
        return Ok(());
    }

    for subpart in &part.subparts {
        collect_parts(subpart, parts)?;
    }
    Ok(())
}

/// Decodes a raw message into its headers and leaf MIME parts.
///
/// With `header_only` the body is not touched and a single empty part carries
/// the top-level content type.
pub fn decode_message(raw: &[u8], header_only: bool) -> Result<DecodedMessage, MailParseError> {
    if header_only {
        let (headers, _) = parse_headers(raw)?;
        let content_type = headers
            .get_first_value("Content-Type")
            .map(|value| mailparse::parse_content_type(&value).mimetype)
            .unwrap_or_else(|| "text/plain".to_string());
        return Ok(DecodedMessage {
            headers: headers
                .iter()
                .map(|header| (header.get_key(), header.get_value()))
                .collect(),
            parts: vec![MessagePart {
                content_type,
                body: Vec::new(),
            }],
        });
    }

    let parsed = parse_mail(raw)?;
    let mut parts = Vec::new();
    collect_parts(&parsed, &mut parts)?;

    Ok(DecodedMessage {
        headers: parsed
            .headers
            .iter()
            .map(|header| (header.get_key(), header.get_value()))
            .collect(),
        parts,
    })
}

/// Picks the part holding the plain-text payload.
///
/// A lone part is returned as-is. Among several, the first `text/*` part wins,
/// and without one the last part is used to match what older versions stored.
pub fn select_text_part(parts: &[MessagePart]) -> Option<&MessagePart> {
    match parts {
        [] => None,
        [only] => Some(only),
        _ => parts.iter().find(|part| part.is_text()).or(parts.last()),
    }
}
