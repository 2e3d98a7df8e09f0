//! Meeting log delivery over HTTP.
//!
//! Room joins and leaves are appended to the meeting service's log with
//! `POST {base}/meetings/{room}/log`. Each entry is sent from its own task;
//! failures are logged and never reach the signaling session.

use anyhow::{anyhow, Context, Result};
use relay_core::MeetingLog;
use reqwest::{Client, Url};
use serde_json::json;
use tracing::{debug, warn};

/// Header carrying the meeting service's internal key.
pub const INTERNAL_KEY_HEADER: &str = "X-Internal-Key";

/// Meeting log backed by the meeting service's HTTP API.
pub struct HttpMeetingLog {
    client: Client,
    base_url: Url,
    internal_key: Option<String>,
}

impl HttpMeetingLog {
    /// Create a log for the meeting service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute HTTP URL.
    pub fn new(base_url: &str, internal_key: Option<String>) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid meeting log URL: {base_url}"))?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(anyhow!("Meeting log URL must be http(s): {base_url}"));
        }

        Ok(Self {
            client: Client::new(),
            base_url,
            internal_key,
        })
    }

    /// The log endpoint for a room.
    fn endpoint(&self, room: &str) -> Option<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(["meetings", room, "log"]);
        Some(url)
    }
}

impl MeetingLog for HttpMeetingLog {
    fn record(&self, room: &str, entry: String) {
        let Some(url) = self.endpoint(room) else {
            warn!(room = %room, "No meeting log endpoint for room");
            return;
        };

        let mut request = self
            .client
            .post(url)
            .json(&json!({ "log_entry": entry }));
        if let Some(key) = &self.internal_key {
            request = request.header(INTERNAL_KEY_HEADER, key);
        }

        let room = room.to_string();
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(room = %room, "Meeting log entry written");
                }
                Ok(response) => {
                    warn!(room = %room, status = %response.status(), "Meeting log rejected entry");
                }
                Err(e) => {
                    warn!(room = %room, error = %e, "Failed to write meeting log entry");
                }
            }
        });
    }
}
