use anyhow::Result;
use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use regex::Regex;
use reqwest::Client;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use thiserror::Error;
use url::Url;

const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("too many redirects for URL: {url}")]
    TooManyRedirects { url: String },
    #[error("HTTP status error: {status} {url}")]
    HttpStatus { status: StatusCode, url: String },
    #[error("transport error for URL {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

// The source host serves a certificate chain that standard validation
// rejects, so validation is relaxed. Redirects are followed by hand to
// enforce the hop cap.
pub fn build_client() -> Result<Client> {
    let client = Client::builder()
        .danger_accept_invalid_certs(true)
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    Ok(client)
}

// Canonical team URL: fixed path prefix, slug without slashes, no trailing
// slash. A bare numeric id maps to the equipa_<id> page. Equivalent inputs
// collapse to one ledger/cache key.
pub fn normalize_team_url(input: &str, base_url: &str) -> String {
    let prefix = format!("{}/equipa/", base_url.trim_end_matches('/'));

    if let Ok(id) = input.trim().parse::<u64>() {
        return format!("{prefix}equipa_{id}");
    }

    let slug: String = input
        .trim()
        .strip_prefix(&prefix)
        .unwrap_or(input.trim())
        .replace('/', "");

    format!("{prefix}{slug}")
}

pub fn team_page_url(id: u64, base_url: &str) -> String {
    format!("{}/equipa/equipa_{}", base_url.trim_end_matches('/'), id)
}

pub async fn fetch_page(client: &Client, url: &str) -> Result<String> {
    let mut current = url.to_string();
    let mut redirects = 0;

    loop {
        let response = client
            .get(&current)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: current.clone(),
                source: e,
            })?;

        if response.status().is_redirection() {
            if redirects == MAX_REDIRECTS {
                return Err(FetchError::TooManyRedirects {
                    url: url.to_string(),
                }
                .into());
            }
            redirects += 1;

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| FetchError::HttpStatus {
                    status: response.status(),
                    url: current.clone(),
                })?;

            current = resolve_location(&current, location);
            continue;
        }

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus {
                status: response.status(),
                url: current,
            }
            .into());
        }

        let headers = response.headers().clone();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport {
                url: current.clone(),
                source: e,
            })?;

        return Ok(decode_body(&headers, &bytes));
    }
}

fn resolve_location(current: &str, location: &str) -> String {
    match Url::parse(current).and_then(|b| b.join(location)) {
        Ok(joined) => joined.to_string(),
        Err(_) => location.to_string(),
    }
}

fn decode_body(headers: &reqwest::header::HeaderMap, bytes: &[u8]) -> String {
    // 1. Charset from the Content-Type header
    if let Some(content_type) = headers.get(CONTENT_TYPE) {
        if let Ok(content_type_str) = content_type.to_str() {
            if let Some(charset) = content_type_str.split("charset=").nth(1) {
                if let Some(encoding) = Encoding::for_label(charset.trim().as_bytes()) {
                    let (text, _, _) = encoding.decode(bytes);
                    return text.into_owned();
                }
            }
        }
    }

    // 2. Charset from a meta tag (ASCII-safe head only)
    let ascii_head = String::from_utf8_lossy(&bytes[..bytes.len().min(4096)]);

    if let Ok(re) = Regex::new(r#"charset\s*=\s*["']?([A-Za-z0-9_\-]+)"#) {
        if let Some(cap) = re.captures(&ascii_head) {
            if let Some(encoding) = cap
                .get(1)
                .and_then(|m| Encoding::for_label(m.as_str().as_bytes()))
            {
                let (text, _, _) = encoding.decode(bytes);
                return text.into_owned();
            }
        }
    }

    // 3. Fallback: detect automatically
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    let (text, _, _) = encoding.decode(bytes);

    text.into_owned()
}
