use std::collections::HashSet;
use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::debug;
use url::Url;

use crate::domain::CandidateFile;
use crate::error::GeoextentError;
use crate::http::HttpClient;
use crate::metadata::MetadataDocument;

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>.*?</a>"#).unwrap()
});
static ROW_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static SIZE_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d+(?:\.\d+)?[KMGTPkmgtp]?|-)$").unwrap());
static HUMAN_SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?)\s*([KMGTPkmgtp])?(?:i?[Bb])?$").unwrap()
});

/// Turns a document into downloadable candidates: the structured file list
/// when the metadata has one, otherwise the directory listing it points at.
pub struct FileEnumerator<'a> {
    http: &'a HttpClient,
}

impl<'a> FileEnumerator<'a> {
    pub fn new(http: &'a HttpClient) -> Self {
        Self { http }
    }

    pub fn list_files(&self, doc: &MetadataDocument) -> Result<Vec<CandidateFile>, GeoextentError> {
        if !doc.files.is_empty() {
            return Ok(doc.files.clone());
        }
        let Some(listing_url) = doc.listing_url.as_deref() else {
            return Ok(Vec::new());
        };
        let base = normalize_listing_url(listing_url)?;
        let html = self.http.get_text(base.as_str())?;
        let files = parse_directory_listing(&html, base.as_str())?;
        debug!(url = %base, files = files.len(), "parsed directory listing");
        Ok(files)
    }
}

/// Appends the trailing slash a listing URL needs before relative hrefs can
/// be joined against it; without it `join` replaces the last segment.
pub fn normalize_listing_url(listing_url: &str) -> Result<Url, GeoextentError> {
    let mut url = Url::parse(listing_url.trim())
        .map_err(|err| GeoextentError::Upstream(format!("invalid listing url {listing_url}: {err}")))?;
    url.set_query(None);
    url.set_fragment(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Parses Apache/nginx/Hyrax style indexes in either `<pre>` or `<table>`
/// layout. Parent, sort and sub-directory links are skipped. Table rows are
/// used only when they hold file links; a `<pre>` listing inside a layout
/// table is read line by line.
pub fn parse_directory_listing(
    html: &str,
    listing_url: &str,
) -> Result<Vec<CandidateFile>, GeoextentError> {
    let base = normalize_listing_url(listing_url)?;
    let rows = ROW_RE
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .filter(|row| !row.to_ascii_lowercase().contains("<pre"));
    let files = entries_to_files(rows, &base);
    if !files.is_empty() {
        return Ok(files);
    }
    Ok(entries_to_files(html.lines(), &base))
}

fn entries_to_files<'h>(entries: impl Iterator<Item = &'h str>, base: &Url) -> Vec<CandidateFile> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();
    for entry in entries {
        let Some(caps) = ANCHOR_RE.captures(entry) else {
            continue;
        };
        let (Some(anchor), Some(href)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let href = href.as_str().trim();
        if is_navigation_href(href) {
            continue;
        }
        let Ok(url) = base.join(href) else {
            debug!(href, "skipping unjoinable href");
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") || url.path().ends_with('/') {
            continue;
        }
        if !seen.insert(url.to_string()) {
            continue;
        }
        let Some(name) = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
        else {
            continue;
        };
        let trailing = TAG_RE.replace_all(&entry[anchor.end()..], " ");
        let size = trailing
            .split_whitespace()
            .find(|token| SIZE_TOKEN_RE.is_match(token))
            .map(parse_human_size)
            .unwrap_or(0);
        files.push(CandidateFile::from_listing(name, url.to_string(), size));
    }
    files
}

fn is_navigation_href(href: &str) -> bool {
    href.is_empty()
        || href.starts_with('?')
        || href.starts_with('#')
        || href.starts_with("mailto:")
        || href.starts_with("javascript:")
        || href == ".."
        || href.ends_with('/')
}

/// Sizes as printed by directory listings: a number with an optional binary
/// unit suffix (K = 1024 bytes). Anything unparseable counts as unknown (0).
pub fn parse_human_size(value: &str) -> u64 {
    let Some(caps) = HUMAN_SIZE_RE.captures(value.trim()) else {
        return 0;
    };
    let Some(number) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) else {
        return 0;
    };
    let power = match caps.get(2).map(|m| m.as_str().to_ascii_uppercase()) {
        None => 0,
        Some(unit) => match unit.as_str() {
            "K" => 1,
            "M" => 2,
            "G" => 3,
            "T" => 4,
            "P" => 5,
            _ => return 0,
        },
    };
    (number * 1024f64.powi(power)) as u64
}
