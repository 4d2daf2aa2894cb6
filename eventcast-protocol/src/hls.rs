//! HLS playlist rewriting.
//!
//! Upstream playlists are rewritten so that every URI a client can follow
//! points back at this server:
//!
//! ```text
//! master playlist   variant/rendition URI  ->  {base}/chunklist/{channel}/{n}.m3u8
//! chunklist         #EXT-X-KEY URI         ->  {base}/channels/{channel}/{part}.key
//! chunklist         segment / init URI     ->  {base}/channels/{channel}/{part}.ts
//! ```
//!
//! Part ids are a truncated SHA-256 of the absolute upstream URL, so the same
//! upstream resource always gets the same id no matter how often the live
//! chunklist is refreshed.
//!
//! URIs that do not resolve to `http`/`https` (for example `skd://` FairPlay
//! keys) are passed through untouched.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::PlaylistError;

static URI_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"URI="([^"]*)""#).expect("URI attribute pattern is valid"));

/// Bandwidth advertised when a bare media playlist is wrapped in a master.
const SYNTHETIC_BANDWIDTH: u32 = 5_000_000;

/// Builds same-origin URIs for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUris {
    base: String,
    channel_id: String,
}

impl LocalUris {
    /// `base` is the externally visible origin, e.g. `http://192.168.1.2:8000`.
    pub fn new(base: &str, channel_id: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            channel_id: channel_id.to_string(),
        }
    }

    pub fn chunklist(&self, chunklist_id: &str) -> String {
        format!("{}/chunklist/{}/{}.m3u8", self.base, self.channel_id, chunklist_id)
    }

    pub fn key(&self, part: &str) -> String {
        format!("{}/channels/{}/{}.key", self.base, self.channel_id, part)
    }

    pub fn segment(&self, part: &str) -> String {
        format!("{}/channels/{}/{}.ts", self.base, self.channel_id, part)
    }
}

/// Result of rewriting a top-level playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenMaster {
    /// Playlist text served to clients.
    pub playlist: String,
    /// `(chunklist id, upstream url)` in order of first appearance.
    pub chunklists: Vec<(String, String)>,
    /// `(part id, upstream url)` for session keys declared in the master.
    pub parts: Vec<(String, String)>,
}

/// Result of rewriting a chunklist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenChunklist {
    pub playlist: String,
    /// `(part id, upstream url)` for every key and segment referenced.
    pub parts: Vec<(String, String)>,
}

/// Stable id for an upstream key or segment URL.
pub fn part_id(upstream_url: &str) -> String {
    let digest = Sha256::digest(upstream_url.as_bytes());
    hex::encode(&digest[..8])
}

/// Whether `text` looks like an HLS playlist at all.
pub fn is_playlist(text: &str) -> bool {
    text.trim_start_matches('\u{feff}').trim_start().starts_with("#EXTM3U")
}

/// Whether `text` is a master (multivariant) playlist.
pub fn is_master(text: &str) -> bool {
    text.lines().any(|line| line.trim_start().starts_with("#EXT-X-STREAM-INF"))
}

fn parse_base(url: &str) -> Result<Url, PlaylistError> {
    Url::parse(url).map_err(|e| PlaylistError::InvalidUrl(format!("{}: {}", url, e)))
}

fn resolve(base: &Url, uri: &str) -> Option<String> {
    let resolved = base.join(uri.trim()).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved.into()),
        _ => None,
    }
}

fn rewrite_uri_attr(line: &str, mut local: impl FnMut(&str) -> Option<String>) -> String {
    URI_ATTR
        .replace_all(line, |caps: &Captures<'_>| match local(&caps[1]) {
            Some(uri) => format!("URI=\"{}\"", uri),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn finish(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Collects upstream URLs and hands out local ids.
struct IdTable<'a> {
    base: &'a Url,
    by_url: HashMap<String, String>,
    entries: Vec<(String, String)>,
    sequential: bool,
}

impl<'a> IdTable<'a> {
    fn new(base: &'a Url, sequential: bool) -> Self {
        Self {
            base,
            by_url: HashMap::new(),
            entries: Vec::new(),
            sequential,
        }
    }

    fn id_for(&mut self, uri: &str) -> Option<String> {
        let upstream = resolve(self.base, uri)?;
        if let Some(id) = self.by_url.get(&upstream) {
            return Some(id.clone());
        }
        let id = if self.sequential {
            self.entries.len().to_string()
        } else {
            part_id(&upstream)
        };
        self.by_url.insert(upstream.clone(), id.clone());
        self.entries.push((id.clone(), upstream));
        Some(id)
    }
}

/// Rewrite the playlist found at `upstream_url`.
///
/// A media playlist (no `#EXT-X-STREAM-INF`) is wrapped in a synthetic
/// single-variant master whose only chunklist is `upstream_url` itself.
pub fn rewrite_master(
    text: &str,
    upstream_url: &str,
    local: &LocalUris,
) -> Result<RewrittenMaster, PlaylistError> {
    if !is_playlist(text) {
        return Err(PlaylistError::NotAPlaylist);
    }
    let base = parse_base(upstream_url)?;

    if !is_master(text) {
        let playlist = finish(vec![
            "#EXTM3U".to_string(),
            format!("#EXT-X-STREAM-INF:BANDWIDTH={}", SYNTHETIC_BANDWIDTH),
            local.chunklist("0"),
        ]);
        return Ok(RewrittenMaster {
            playlist,
            chunklists: vec![("0".to_string(), base.into())],
            parts: Vec::new(),
        });
    }

    let mut chunklists = IdTable::new(&base, true);
    let mut keys = IdTable::new(&base, false);
    let mut lines = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with("#EXT-X-MEDIA") || trimmed.starts_with("#EXT-X-I-FRAME-STREAM-INF") {
            lines.push(rewrite_uri_attr(trimmed, |uri| {
                chunklists.id_for(uri).map(|id| local.chunklist(&id))
            }));
        } else if trimmed.starts_with("#EXT-X-SESSION-KEY") {
            lines.push(rewrite_uri_attr(trimmed, |uri| {
                keys.id_for(uri).map(|id| local.key(&id))
            }));
        } else if trimmed.starts_with('#') {
            lines.push(trimmed.to_string());
        } else {
            match chunklists.id_for(trimmed) {
                Some(id) => lines.push(local.chunklist(&id)),
                None => lines.push(trimmed.to_string()),
            }
        }
    }

    Ok(RewrittenMaster {
        playlist: finish(lines),
        chunklists: chunklists.entries,
        parts: keys.entries,
    })
}

/// Rewrite a media playlist fetched from `upstream_url`.
pub fn rewrite_chunklist(
    text: &str,
    upstream_url: &str,
    local: &LocalUris,
) -> Result<RewrittenChunklist, PlaylistError> {
    if !is_playlist(text) {
        return Err(PlaylistError::NotAPlaylist);
    }
    let base = parse_base(upstream_url)?;

    let mut parts = IdTable::new(&base, false);
    let mut lines = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with("#EXT-X-KEY") || trimmed.starts_with("#EXT-X-SESSION-KEY") {
            lines.push(rewrite_uri_attr(trimmed, |uri| {
                parts.id_for(uri).map(|id| local.key(&id))
            }));
        } else if trimmed.starts_with("#EXT-X-MAP")
            || trimmed.starts_with("#EXT-X-PART:")
            || trimmed.starts_with("#EXT-X-PRELOAD-HINT")
        {
            lines.push(rewrite_uri_attr(trimmed, |uri| {
                parts.id_for(uri).map(|id| local.segment(&id))
            }));
        } else if trimmed.starts_with('#') {
            lines.push(trimmed.to_string());
        } else {
            match parts.id_for(trimmed) {
                Some(id) => lines.push(local.segment(&id)),
                None => lines.push(trimmed.to_string()),
            }
        }
    }

    Ok(RewrittenChunklist {
        playlist: finish(lines),
        parts: parts.entries,
    })
}
