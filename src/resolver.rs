//! Media resolution
//!
//! Turns a free-form query (URL or search text) into a concrete locator plus
//! display metadata before it enters the queue. Resolution shells out to the
//! same tool the fetch stage uses, in metadata-only mode, so a queued track
//! is known to be fetchable and has a title to announce.

use crate::config::ResolverConfig;
use crate::engine::session::PlaybackRequest;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Metadata for a resolved piece of media
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    pub locator: String,
    pub title: Option<String>,
    pub duration_secs: Option<u64>,
    pub uploader: Option<String>,
}

impl ResolvedMedia {
    pub fn into_request(self) -> PlaybackRequest {
        let mut request = PlaybackRequest::new(self.locator);
        request.title = self.title;
        request.duration_secs = self.duration_secs;
        request.uploader = self.uploader;
        request
    }
}

/// Resolves queries to playable media. `Ok(None)` means the query matched
/// nothing; `Err` means the resolver itself could not run.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<Option<ResolvedMedia>>;
}

/// Subset of the yt-dlp metadata dump we care about
#[derive(Debug, Deserialize)]
struct DumpedMetadata {
    #[serde(default)]
    webpage_url: Option<String>,

    #[serde(default)]
    url: Option<String>,

    #[serde(default)]
    title: Option<String>,

    #[serde(default)]
    duration: Option<f64>,

    #[serde(default)]
    uploader: Option<String>,
}

/// Resolver backed by `yt-dlp --dump-json`. Non-URL queries become a
/// single-result search.
pub struct YtDlpResolver {
    program: String,
}

impl YtDlpResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            program: config.program.clone(),
        }
    }

    fn target_for(query: &str) -> String {
        if query.starts_with("http://") || query.starts_with("https://") {
            query.to_string()
        } else {
            format!("ytsearch1:{}", query)
        }
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<Option<ResolvedMedia>> {
        let target = Self::target_for(query);
        debug!(%target, "resolving media");

        let output = Command::new(&self.program)
            .args(["--dump-json", "--no-warnings", "--no-playlist"])
            .arg(&target)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Resolver(format!("failed to run {}: {}", self.program, e)))?;

        // A nonzero exit or empty dump means nothing matched, not a fault
        if !output.status.success() {
            warn!(%target, status = ?output.status.code(), "resolver found nothing");
            return Ok(None);
        }
        let Some(line) = output
            .stdout
            .split(|b| *b == b'\n')
            .find(|line| !line.is_empty())
        else {
            return Ok(None);
        };

        let meta: DumpedMetadata = match serde_json::from_slice(line) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(%target, "unparseable resolver output: {}", e);
                return Ok(None);
            }
        };

        let Some(locator) = meta.webpage_url.or(meta.url) else {
            warn!(%target, "resolver output has no locator");
            return Ok(None);
        };

        Ok(Some(ResolvedMedia {
            locator,
            title: meta.title,
            duration_secs: meta.duration.map(|d| d.max(0.0) as u64),
            uploader: meta.uploader,
        }))
    }
}
