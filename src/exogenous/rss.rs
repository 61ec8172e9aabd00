//! RSS 2.0 / Atom feed fetching.
//!
//! Documents are read with `quick-xml` events. An entry is any `<item>` or
//! `<entry>` element (namespace prefix ignored); only its direct children
//! become fields, so nested elements such as `<source><title>` do not
//! shadow the entry's own. HTML in descriptions is stripped.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;
use std::collections::HashMap;
use tracing::debug;

use super::ExogenousItem;
use crate::config::FeedConfig;

const SUMMARY_MAX_CHARS: usize = 1000;

/// Source of news items for one configured feed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn fetch(&self, feed: &FeedConfig) -> Result<Vec<ExogenousItem>>;
}

/// One parsed feed entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub url: String,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// HTTP fetcher
// ---------------------------------------------------------------------------

pub struct RssFetcher {
    http: Client,
}

impl RssFetcher {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("crypto-agent/0.1.0")
            .build()
            .context("Failed to build RSS HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl NewsSource for RssFetcher {
    async fn fetch(&self, feed: &FeedConfig) -> Result<Vec<ExogenousItem>> {
        let resp = self
            .http
            .get(&feed.url)
            .send()
            .await
            .with_context(|| format!("Feed request failed: {}", feed.url))?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("Feed {} returned HTTP {status}", feed.name);
        }

        let body = resp.text().await.context("Failed to read feed body")?;
        let entries = parse_feed(&body);
        debug!(feed = %feed.name, entries = entries.len(), "Parsed feed");

        let now = Utc::now();
        Ok(entries
            .into_iter()
            .map(|e| {
                ExogenousItem::new(
                    feed.name.clone(),
                    e.title,
                    e.url,
                    e.summary,
                    e.published_at.unwrap_or(now),
                )
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse every RSS `<item>` and Atom `<entry>` in a document.
/// Entries without a title or link are dropped. Parsing stops at the first
/// syntax error, keeping the entries completed before it.
pub fn parse_feed(xml: &str) -> Vec<FeedEntry> {
    let mut reader = Reader::from_str(xml);
    // Feeds routinely embed unclosed HTML such as `<br>`.
    reader.config_mut().check_end_names = false;

    let mut parser = FeedParser::default();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => parser.open(&e, false),
            Ok(Event::Empty(e)) => parser.open(&e, true),
            Ok(Event::Text(t)) => parser.text(&decode_entities(&String::from_utf8_lossy(&t))),
            Ok(Event::CData(c)) => parser.text(&String::from_utf8_lossy(&c)),
            Ok(Event::End(e)) => parser.close(&String::from_utf8_lossy(e.name().as_ref())),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, position = reader.buffer_position(), "Feed XML error");
                break;
            }
        }
    }
    parser.entries
}

/// Element stack plus the entry currently being collected.
#[derive(Default)]
struct FeedParser {
    stack: Vec<String>,
    entry: Option<PartialEntry>,
    entries: Vec<FeedEntry>,
}

struct PartialEntry {
    /// Stack depth of the `<item>`/`<entry>` element itself.
    depth: usize,
    /// Direct-child text by qualified and local name. First occurrence wins.
    fields: HashMap<String, String>,
    field: Option<OpenField>,
    href: Option<String>,
}

struct OpenField {
    qualified: String,
    local: String,
    depth: usize,
    text: String,
}

impl FeedParser {
    fn open(&mut self, e: &BytesStart, empty: bool) {
        let qualified = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        let depth = self.stack.len();

        if self.entry.is_none() {
            if !empty && (local == "item" || local == "entry") {
                self.entry = Some(PartialEntry {
                    depth,
                    fields: HashMap::new(),
                    field: None,
                    href: None,
                });
            }
        } else if let Some(entry) = self.entry.as_mut() {
            if depth == entry.depth + 1 {
                if local == "link" && entry.href.is_none() {
                    let rel = attr_value(e, b"rel");
                    if rel.is_none() || rel.as_deref() == Some("alternate") {
                        entry.href = attr_value(e, b"href");
                    }
                }
                if !empty {
                    entry.field = Some(OpenField {
                        qualified: qualified.clone(),
                        local,
                        depth,
                        text: String::new(),
                    });
                }
            } else if let Some(field) = &mut entry.field {
                // Markup nested inside a field separates words.
                field.text.push(' ');
            }
        }

        if !empty {
            self.stack.push(qualified);
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(field) = self.entry.as_mut().and_then(|e| e.field.as_mut()) {
            field.text.push_str(text);
        }
    }

    fn close(&mut self, name: &str) {
        // Unmatched end tags are ignored; a match also closes anything left
        // open inside it.
        let Some(pos) = self.stack.iter().rposition(|n| n == name) else {
            return;
        };
        self.stack.truncate(pos);
        let depth = self.stack.len();

        let Some(entry) = &mut self.entry else {
            return;
        };
        match entry.field.take() {
            Some(field) if depth <= field.depth => {
                let text = clean_text(&field.text);
                entry.fields.entry(field.local).or_insert_with(|| text.clone());
                entry.fields.entry(field.qualified).or_insert(text);
            }
            Some(mut field) => {
                field.text.push(' ');
                entry.field = Some(field);
            }
            None => {}
        }

        if depth <= entry.depth {
            if let Some(done) = self.entry.take().and_then(PartialEntry::finish) {
                self.entries.push(done);
            }
        }
    }
}

impl PartialEntry {
    fn get(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .find_map(|name| self.fields.get(*name))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn finish(self) -> Option<FeedEntry> {
        let title = self.get(&["title"])?.to_string();

        // RSS carries the link as text, Atom as an `href` attribute.
        let url = self
            .get(&["link"])
            .map(str::to_string)
            .or_else(|| self.href.clone().filter(|h| !h.is_empty()))
            .or_else(|| {
                self.get(&["guid"])
                    .filter(|g| g.starts_with("http"))
                    .map(str::to_string)
            })?;

        let summary = self
            .get(&["description", "summary", "content:encoded", "content"])
            .map(|s| truncate_chars(s, SUMMARY_MAX_CHARS))
            .unwrap_or_default();

        let published_at = self
            .get(&["pubDate", "published", "updated", "dc:date"])
            .and_then(parse_date);

        Some(FeedEntry {
            title,
            url,
            summary,
            published_at,
        })
    }
}

fn attr_value(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .map(|a| decode_entities(&String::from_utf8_lossy(&a.value)))
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Strip markup and collapse whitespace. Entities are already decoded.
fn clean_text(raw: &str) -> String {
    strip_tags(raw).split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Single-pass decode of named and numeric character references.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|&semi| semi <= 10).and_then(|semi| {
            let entity = &tail[1..semi];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity.strip_prefix('#').and_then(|num| {
                    let code = match num.strip_prefix(['x', 'X']) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => num.parse::<u32>().ok(),
                    };
                    code.and_then(char::from_u32)
                }),
            };
            c.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
