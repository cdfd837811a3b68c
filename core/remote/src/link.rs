//! `Link` header parsing for page cursors.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::warn;

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<([^>]*)>\s*;\s*rel="([a-zA-Z0-9]+)""#).unwrap());

static PAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bpage=(\d+)").unwrap());

const NEXT_LINK: &str = "next";

/// Map each `rel` of a `Link` header to its URL.
pub fn parse_links(header: &str) -> HashMap<String, String> {
    LINK_RE
        .captures_iter(header)
        .map(|caps| (caps[2].to_string(), caps[1].to_string()))
        .collect()
}

/// Page number of the `next` link, if any.
pub fn next_page(header: &str) -> Option<u32> {
    let links = parse_links(header);
    let next = links.get(NEXT_LINK)?;

    let page = PAGE_RE
        .captures(next)
        .and_then(|caps| caps[1].parse::<u32>().ok());
    if page.is_none() {
        warn!("Cannot parse next page from {}", next);
    }
    page
}
