//! Live quotes from the Sina quote host.

use crate::core::market::LiveQuote;
use crate::providers::util::with_retry;
use anyhow::{Context, Result};
use reqwest::header::REFERER;
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

const SINA_REFERER: &str = "https://finance.sina.com.cn/";

/// Maps a holding symbol to the Sina list code.
///
/// Six digits are A-shares (`sh` for 5/6/9 leading digits, `bj` for 4/8, `sz` otherwise),
/// five digits are Hong Kong listings, alphabetic tickers are US listings. Symbols that
/// already carry a market prefix pass through.
pub fn sina_code(symbol: &str) -> String {
    let symbol = symbol.trim();
    let lower = symbol.to_ascii_lowercase();
    let prefixed = lower.starts_with("gb_")
        || ["sh", "sz", "bj", "hk"].iter().any(|p| {
            lower
                .strip_prefix(p)
                .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        });
    if prefixed {
        return lower;
    }
    let all_digits = !symbol.is_empty() && symbol.chars().all(|c| c.is_ascii_digit());
    match (all_digits, symbol.len()) {
        (true, 6) => match symbol.as_bytes()[0] {
            b'5' | b'6' | b'9' => format!("sh{symbol}"),
            b'4' | b'8' => format!("bj{symbol}"),
            _ => format!("sz{symbol}"),
        },
        (true, 5) => format!("hk{symbol}"),
        _ => format!("gb_{}", lower.replace('.', "$")),
    }
}

/// Parses one `var hq_str_<code>="...";` line into the list code and quote.
fn parse_line(line: &str) -> Option<(String, LiveQuote)> {
    let (lhs, rhs) = line.split_once('=')?;
    let code = lhs.trim().rsplit("hq_str_").next()?.to_string();
    let content = rhs.split('"').nth(1)?;
    let parts: Vec<&str> = content.split(',').collect();
    let field = |i: usize| parts.get(i).and_then(|v| v.trim().parse::<f64>().ok());

    let (price, prior_close) = if code.starts_with("hk") {
        (field(6)?, field(3)?)
    } else if code.starts_with("gb_") {
        (field(1)?, field(26)?)
    } else {
        (field(3)?, field(2)?)
    };
    (prior_close > 0.0).then_some((code, LiveQuote { price, prior_close }))
}

/// Parses a whole response body. Lines without a usable prior close are dropped.
pub fn parse_quotes(body: &str) -> HashMap<String, LiveQuote> {
    body.lines().filter_map(parse_line).collect()
}

pub struct SinaQuoteClient {
    base_url: String,
    client: reqwest::Client,
}

impl SinaQuoteClient {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Quotes keyed by the symbols as given.
    #[instrument(name = "SinaQuotes", skip(self, symbols), fields(count = symbols.len()))]
    pub async fn fetch_quotes(&self, symbols: &[String]) -> Result<HashMap<String, LiveQuote>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        let codes: Vec<(String, &String)> = symbols.iter().map(|s| (sina_code(s), s)).collect();
        let list = codes
            .iter()
            .map(|(code, _)| code.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/list={}", self.base_url, list);
        debug!("Requesting quotes from {}", url);

        let response = with_retry(
            || async {
                self.client
                    .get(&url)
                    .header(REFERER, SINA_REFERER)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
            },
            3,
            500,
        )
        .await
        .context("Failed to request Sina quotes")?;

        // Body is GBK; only the ASCII numeric fields are read.
        let bytes = response
            .bytes()
            .await
            .context("Failed to read Sina quote body")?;
        let parsed = parse_quotes(&String::from_utf8_lossy(&bytes));

        let quotes: HashMap<String, LiveQuote> = codes
            .into_iter()
            .filter_map(|(code, symbol)| parsed.get(&code).map(|q| (symbol.clone(), *q)))
            .collect();
        if quotes.len() < symbols.len() {
            warn!(
                "Sina returned {} of {} requested quotes",
                quotes.len(),
                symbols.len()
            );
        }
        Ok(quotes)
    }
}
