use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

use super::{first_non_empty, ParsedRecord};

static ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<item\b[^>]*>(.*?)</item\s*>").expect("item pattern is valid"));

static CDATA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("CDATA pattern is valid"));

static LINK_HREF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<link\b[^>]*\bhref\s*=\s*["']([^"']+)["']"#).expect("link pattern is valid")
});

const TAGS: [&str; 7] = ["title", "description", "content:encoded", "link", "pubDate", "updated", "dc:date"];

static TAG_RES: Lazy<HashMap<&'static str, Regex>> = Lazy::new(|| {
    TAGS.iter()
        .map(|tag| {
            let escaped = regex::escape(tag);
            let pattern = format!(r"(?is)<{0}\b[^>]*>(.*?)</{0}\s*>", escaped);
            (*tag, Regex::new(&pattern).expect("tag pattern is valid"))
        })
        .collect()
});

/// Records from an RSS document, one per `<item>` block. Documents without items are
/// handed to `feed-rs` so Atom `<entry>` feeds still produce records.
pub(crate) fn parse_records(body: &str) -> Result<Vec<ParsedRecord>, String> {
    let blocks: Vec<&str> = ITEM_RE
        .captures_iter(body)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    if blocks.is_empty() {
        debug!("No <item> blocks found, trying Atom/RSS parser");
        return parse_with_feed_rs(body);
    }

    Ok(blocks.into_iter().map(record_from_block).collect())
}

fn record_from_block(block: &str) -> ParsedRecord {
    let title = tag_text(block, "title");
    let body = first_non_empty([tag_text(block, "description"), tag_text(block, "content:encoded")]);
    let link = first_non_empty([
        tag_text(block, "link"),
        LINK_HREF_RE
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| decode_entities(m.as_str())),
    ]);
    let date = first_non_empty([
        tag_text(block, "pubDate"),
        tag_text(block, "updated"),
        tag_text(block, "dc:date"),
    ]);

    ParsedRecord {
        url: link,
        title,
        body,
        date,
        metadata: Map::new(),
    }
}

fn tag_text(block: &str, tag: &str) -> Option<String> {
    let re = TAG_RES.get(tag)?;
    let raw = re.captures(block)?.get(1)?.as_str();
    let text = element_text(raw);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Element content with CDATA sections unwrapped verbatim and entities decoded
/// everywhere else.
pub fn element_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last = 0;
    for caps in CDATA_RE.captures_iter(raw) {
        let (Some(section), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&decode_entities(&raw[last..section.start()]));
        out.push_str(inner.as_str());
        last = section.end();
    }
    out.push_str(&decode_entities(&raw[last..]));
    out
}

/// Decode the five predefined XML entities. `&amp;` goes last so `&amp;lt;` stays `&lt;`.
pub fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn parse_with_feed_rs(body: &str) -> Result<Vec<ParsedRecord>, String> {
    let feed = feed_rs::parser::parse(body.as_bytes()).map_err(|e| e.to_string())?;

    let records = feed
        .entries
        .into_iter()
        .map(|entry| {
            let date = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.with_timezone(&Utc).to_rfc3339());
            let body = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content));
            let mut metadata = Map::new();
            if !entry.id.is_empty() {
                metadata.insert("guid".to_string(), Value::String(entry.id.clone()));
            }
            ParsedRecord {
                url: entry.links.first().map(|l| l.href.clone()),
                title: entry.title.map(|t| t.content),
                body,
                date,
                metadata,
            }
        })
        .collect();

    Ok(records)
}
