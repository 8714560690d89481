use anyhow::{Context, Error};
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

/// Retries an async operation with configurable attempts and delays
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `delay_ms`: Milliseconds between retry attempts
///
/// # Returns
/// Either the successful result or the error after all attempts
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    retries: usize,
    delay_ms: u64,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, reqwest::Error>>,
{
    let mut attempt = 1;
    loop {
        match operation().await.map_err(anyhow::Error::from) {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt > retries {
                    return Err(err);
                }
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt, retries, err
                );
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

/// HTTP client shared by the providers, with browser-like headers that upstream hosts expect.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, Error> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
    );
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent("Mozilla/5.0 (compatible; navcast/0.1)")
        .default_headers(headers)
        .build()
        .context("Failed to build HTTP client")
}

/// Body of a JSONP response: everything between the first `(` and the last `)`.
pub fn jsonp_payload(text: &str) -> Option<&str> {
    let text = text.trim();
    let open = text.find('(')?;
    let close = text.rfind(')')?;
    if close <= open {
        return None;
    }
    let payload = text[open + 1..close].trim();
    if payload.is_empty() { None } else { Some(payload) }
}

/// Strips markup and surrounding whitespace from an HTML fragment.
pub fn strip_tags(fragment: &str) -> String {
    HTML_TAG
        .replace_all(fragment, "")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}

/// Parses a percentage cell such as `"9.12%"`.
pub fn parse_percent(cell: &str) -> Option<f64> {
    cell.trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonp_payload() {
        assert_eq!(jsonp_payload("jsonpgz({\"a\":1});"), Some("{\"a\":1}"));
        assert_eq!(jsonp_payload("cb( {\"a\":1} )"), Some("{\"a\":1}"));
        assert_eq!(jsonp_payload("jsonpgz();"), None);
        assert_eq!(jsonp_payload("no parens"), None);
    }

    #[test]
    fn test_strip_tags_and_percent() {
        assert_eq!(strip_tags("<a href='x'>600519</a>&nbsp;"), "600519");
        assert_eq!(strip_tags("<td class='tor'>\n 9.12% </td>"), "9.12%");
        assert_eq!(parse_percent("9.12%"), Some(9.12));
        assert_eq!(parse_percent("---"), None);
    }
}
