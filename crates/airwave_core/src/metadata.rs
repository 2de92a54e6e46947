//! ICY Metadata Lookup
//!
//! Shoutcast/Icecast servers describe a stream in `icy-*` response headers
//! when asked with `Icy-MetaData: 1`. Only the headers are read; the body is
//! dropped as soon as they arrive.

use std::time::Duration;

use tracing::debug;

use crate::error::describe_http_error;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the `StreamTitle='...';` string from the stream's name/description
pub fn format_stream_title(name: Option<&str>, description: Option<&str>) -> Option<String> {
    let name = name.map(str::trim).filter(|s| !s.is_empty());
    let description = description.map(str::trim).filter(|s| !s.is_empty());
    let title = match (name, description) {
        (Some(name), Some(description)) => format!("{name} - {description}"),
        (Some(only), None) | (None, Some(only)) => only.to_string(),
        (None, None) => return None,
    };
    Some(format!("StreamTitle='{title}';"))
}

pub struct IcyMetadataClient {
    client: reqwest::Client,
}

impl IcyMetadataClient {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(LOOKUP_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// Current title advertised by the stream, if any; failures are `None`
    pub async fn lookup(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).header("Icy-MetaData", "1").send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Metadata lookup for {} failed: {}", url, describe_http_error(&e));
                return None;
            }
        };
        if !response.status().is_success() {
            debug!("Metadata lookup for {} returned {}", url, response.status());
            return None;
        }

        let headers = response.headers();
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        format_stream_title(header("icy-name"), header("icy-description"))
    }
}
