//! Fund data scraped from the Eastmoney hosts.
//!
//! Holdings and asset allocation come from the F10 archive pages, NAV history from the
//! `pingzhongdata` scripts, the fund directory from `fundcode_search.js`, bars from the
//! `push2his` kline API, stock industries from the `push2` quote API and the official live
//! estimate from the `fundgz` JSONP feed. Live quotes are delegated to Sina.

use crate::core::cache::KeyValueCollection;
use crate::core::clock::exchange_offset;
use crate::core::config::EastmoneyProviderConfig;
use crate::core::fund::{
    CashRatio, FundListing, Holding, HoldingsReport, NavRecord, OfficialEstimate,
};
use crate::core::market::{
    Granularity, IndexClose, LiveQuote, MarketDataProvider, PriceBar, PriceRange,
};
use crate::providers::sina::SinaQuoteClient;
use crate::providers::util::{jsonp_payload, parse_percent, strip_tags, with_retry};
use crate::valuation::parse_report_date;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use reqwest::header::REFERER;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const EASTMONEY_REFERER: &str = "https://fund.eastmoney.com/";
const DIRECTORY_KEY: &[u8] = b"fund_directory";
const DIRECTORY_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const INDUSTRY_KEY_PREFIX: &str = "industry:";
const CASH_MARKER: &str = "现金占净比";

static APIDATA_CONTENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)content:"(.*)",\s*arryear"#).expect("valid regex"));
static REPORT_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}\s*年\s*[1-4]\s*季度股票投资明细").expect("valid regex")
});
static TABLE_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<tr(?:\s[^>]*)?>(.*?)</tr>").expect("valid regex"));
static HEADER_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<th(?:\s[^>]*)?>(.*?)</th>").expect("valid regex"));
static DATA_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<td(?:\s[^>]*)?>(.*?)</td>").expect("valid regex"));
static NET_WORTH_TREND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Data_netWorthTrend\s*=\s*(\[.*?\])\s*;").expect("valid regex")
});
static QDII_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([(（]QDII-ETF[)）])+$").expect("valid regex"));
static WRAPPER_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(发起式|发起|型|开放式|指数|证券投资|基金|份额|[ACI])+$").expect("valid regex")
});

/// Kline security id: `market.code`. Ids that already carry a market pass through.
pub fn secid(symbol: &str) -> String {
    let symbol = symbol.trim();
    if symbol.contains('.') {
        return symbol.to_string();
    }
    let all_digits = !symbol.is_empty() && symbol.chars().all(|c| c.is_ascii_digit());
    match (all_digits, symbol.len()) {
        (true, 6) => match symbol.as_bytes()[0] {
            b'5' | b'6' | b'9' => format!("1.{symbol}"),
            _ => format!("0.{symbol}"),
        },
        (true, 5) => format!("116.{symbol}"),
        _ => format!("105.{}", symbol.to_ascii_uppercase()),
    }
}

/// Holdings of the most recent report block on an F10 `jjcc` page.
pub fn parse_holdings_page(body: &str) -> Option<HoldingsReport> {
    let content = APIDATA_CONTENT
        .captures(body)
        .and_then(|c| c.get(1))
        .map_or(body, |m| m.as_str());

    let labels: Vec<_> = REPORT_LABEL.find_iter(content).collect();
    let (label, block) = labels
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let end = labels.get(i + 1).map_or(content.len(), |next| next.start());
            (m.as_str(), &content[m.end()..end])
        })
        .max_by_key(|(label, _)| parse_report_date(label))?;

    let headers: Vec<String> = HEADER_CELL
        .captures_iter(block)
        .map(|c| strip_tags(&c[1]))
        .collect();
    let column = |needle: &str| headers.iter().position(|h| h.contains(needle));
    let symbol_col = column("代码")?;
    let weight_col = column("占净值")?;
    let name_col = column("名称");

    let holdings: Vec<Holding> = TABLE_ROW
        .captures_iter(block)
        .filter_map(|row| {
            let cells: Vec<String> = DATA_CELL
                .captures_iter(&row[1])
                .map(|c| strip_tags(&c[1]))
                .collect();
            let symbol = cells.get(symbol_col)?.trim().to_string();
            let weight = parse_percent(cells.get(weight_col)?)?;
            let name = name_col
                .and_then(|i| cells.get(i))
                .cloned()
                .unwrap_or_default();
            Some(Holding {
                symbol,
                name,
                weight,
                industry: None,
            })
        })
        .collect();

    let report = HoldingsReport {
        holdings,
        report_period: Some(label.to_string()),
    }
    .normalized();
    (!report.holdings.is_empty()).then_some(report)
}

/// Cash share of NAV from the F10 asset allocation page (4th cell of the first data row).
pub fn parse_cash_ratio_page(body: &str) -> Option<CashRatio> {
    let idx = body.find(CASH_MARKER)?;
    let snippet: String = body[idx..].chars().take(2000).collect();

    let rows: Vec<Vec<String>> = TABLE_ROW
        .captures_iter(&snippet)
        .take(2)
        .map(|row| {
            DATA_CELL
                .captures_iter(&row[1])
                .map(|c| strip_tags(&c[1]))
                .collect()
        })
        .collect();
    let cells = rows.into_iter().find(|cells| cells.len() >= 4)?;

    let percent = parse_percent(&cells[3])?;
    let as_of = NaiveDate::parse_from_str(cells[0].trim(), "%Y-%m-%d").ok();
    Some(CashRatio { percent, as_of })
}

#[derive(Debug, Deserialize)]
struct NetWorthPoint {
    x: i64,
    y: f64,
    #[serde(rename = "equityReturn", default)]
    equity_return: Option<Value>,
}

/// NAV history from a `pingzhongdata` script, ascending and de-duplicated by date.
pub fn parse_nav_script(body: &str) -> Option<Vec<NavRecord>> {
    let array = NET_WORTH_TREND.captures(body)?.get(1)?.as_str();
    let points: Vec<NetWorthPoint> = serde_json::from_str(array)
        .inspect_err(|e| warn!("Malformed Data_netWorthTrend: {}", e))
        .ok()?;

    let mut records: Vec<NavRecord> = points
        .into_iter()
        .filter(|p| p.y.is_finite() && p.y > 0.0)
        .filter_map(|p| {
            let date = DateTime::from_timestamp_millis(p.x)?
                .with_timezone(&exchange_offset())
                .date_naive();
            let daily_return = p.equity_return.as_ref().and_then(|v| match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            });
            Some(NavRecord {
                date,
                nav: p.y,
                daily_return,
            })
        })
        .collect();
    records.sort_by_key(|r| r.date);
    records.dedup_by_key(|r| r.date);
    (!records.is_empty()).then_some(records)
}

/// Directory entries from `fundcode_search.js`: `[code, abbr, name, type, pinyin]` rows.
pub fn parse_fund_directory(body: &str) -> Option<Vec<FundListing>> {
    let start = body.find('[')?;
    let end = body.rfind(']')?;
    if end <= start {
        return None;
    }
    let rows: Vec<Vec<String>> = serde_json::from_str(&body[start..=end])
        .inspect_err(|e| warn!("Malformed fund directory: {}", e))
        .ok()?;
    let listings: Vec<FundListing> = rows
        .into_iter()
        .filter_map(|row| {
            let mut fields = row.into_iter();
            let code = fields.next()?;
            let name = fields.nth(1)?;
            let fund_type = fields.next().unwrap_or_default();
            Some(FundListing {
                code,
                name,
                fund_type,
            })
        })
        .collect();
    (!listings.is_empty()).then_some(listings)
}

#[derive(Debug, Deserialize)]
struct KlineResponse {
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

/// Bars from a kline response whose rows are `time,open,close,...`.
pub fn parse_klines(body: &str) -> Option<Vec<PriceBar>> {
    let body = body.trim();
    let json = if body.starts_with('{') {
        body
    } else {
        jsonp_payload(body)?
    };
    let response: KlineResponse = serde_json::from_str(json)
        .inspect_err(|e| warn!("Malformed kline response: {}", e))
        .ok()?;

    let bars: Vec<PriceBar> = response
        .data?
        .klines
        .iter()
        .filter_map(|row| {
            let parts: Vec<&str> = row.split(',').collect();
            let raw_time = parts.first()?.trim();
            let time = NaiveDateTime::parse_from_str(raw_time, "%Y-%m-%d %H:%M")
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(raw_time, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })?;
            let open = parts.get(1).and_then(|v| v.trim().parse().ok());
            let close: f64 = parts.get(2)?.trim().parse().ok()?;
            Some(PriceBar { time, open, close })
        })
        .collect();
    Some(bars)
}

#[derive(Debug, Deserialize)]
struct StockInfoResponse {
    data: Option<StockInfo>,
}

#[derive(Debug, Deserialize)]
struct StockInfo {
    /// Industry name, `-` when unclassified.
    #[serde(default)]
    f127: Option<String>,
}

/// Industry from a `push2` stock info response.
pub fn parse_stock_industry(body: &str) -> Option<String> {
    let response: StockInfoResponse = serde_json::from_str(body.trim())
        .inspect_err(|e| warn!("Malformed stock info response: {}", e))
        .ok()?;
    let industry = response.data?.f127?.trim().to_string();
    (!industry.is_empty() && industry != "-").then_some(industry)
}

#[derive(Debug, Deserialize)]
struct FundGzPayload {
    #[serde(default)]
    gszzl: String,
    #[serde(default)]
    gztime: String,
}

/// Official live estimate from a `jsonpgz(...)` body.
pub fn parse_estimate(body: &str) -> Option<OfficialEstimate> {
    let payload: FundGzPayload = serde_json::from_str(jsonp_payload(body)?).ok()?;
    let value: f64 = payload.gszzl.trim().parse().ok()?;
    let time = NaiveDateTime::parse_from_str(payload.gztime.trim(), "%Y-%m-%d %H:%M").ok()?;
    value.is_finite().then_some(OfficialEstimate { value, time })
}

/// Name of the vehicle a feeder fund invests in, used as a directory search keyword.
pub fn feeder_keyword(name: &str) -> Option<String> {
    let (head, _) = name.split_once("联接")?;
    let head = QDII_SUFFIX.replace(head, "");
    let mut keyword = WRAPPER_SUFFIX.replace(&head, "").trim().to_string();
    if let Some(idx) = keyword.find("ETF") {
        keyword.truncate(idx + "ETF".len());
    }
    (!keyword.is_empty()).then_some(keyword)
}

/// Shortest-named index fund matching `keyword` that is not itself a feeder.
pub fn pick_feeder_target(listings: &[FundListing], keyword: &str, code: &str) -> Option<String> {
    listings
        .iter()
        .filter(|l| {
            l.code != code
                && l.name.contains(keyword)
                && !l.name.contains("联接")
                && l.fund_type.contains("指数")
        })
        .min_by_key(|l| l.name.chars().count())
        .map(|l| l.code.clone())
}

pub struct EastmoneyProvider {
    config: EastmoneyProviderConfig,
    client: reqwest::Client,
    quotes: SinaQuoteClient,
    metadata: Arc<dyn KeyValueCollection>,
}

impl EastmoneyProvider {
    pub fn new(
        config: EastmoneyProviderConfig,
        client: reqwest::Client,
        quotes: SinaQuoteClient,
        metadata: Arc<dyn KeyValueCollection>,
    ) -> Self {
        Self {
            config,
            client,
            quotes,
            metadata,
        }
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        debug!("Requesting {}", url);
        let response = with_retry(
            || async {
                self.client
                    .get(url)
                    .header(REFERER, EASTMONEY_REFERER)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
            },
            3,
            500,
        )
        .await
        .with_context(|| format!("Failed to request {url}"))?;
        response
            .text()
            .await
            .with_context(|| format!("Failed to read response from {url}"))
    }

    async fn fund_directory(&self) -> Result<Vec<FundListing>> {
        if let Some(cached) = self.metadata.get(DIRECTORY_KEY).await {
            match serde_json::from_slice(&cached) {
                Ok(listings) => return Ok(listings),
                Err(e) => warn!("Discarding unreadable fund directory cache: {}", e),
            }
        }

        let url = format!("{}/js/fundcode_search.js", self.config.fund_base_url);
        let body = self.get_text(&url).await?;
        let listings =
            parse_fund_directory(&body).ok_or_else(|| anyhow!("Empty fund directory"))?;
        info!("Fetched fund directory with {} entries", listings.len());

        let encoded = serde_json::to_vec(&listings)?;
        self.metadata
            .put(DIRECTORY_KEY, &encoded, Some(DIRECTORY_TTL))
            .await;
        Ok(listings)
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        granularity: Granularity,
        range: PriceRange,
    ) -> Result<Vec<PriceBar>> {
        let klt = match granularity {
            Granularity::Daily => 101,
            Granularity::FiveMinute => 5,
        };
        let window = match range {
            PriceRange::Between(start, end) => format!(
                "beg={}&end={}",
                start.format("%Y%m%d"),
                end.format("%Y%m%d")
            ),
            PriceRange::Latest(n) => format!("lmt={n}&end=20500101"),
        };
        let url = format!(
            "{}/api/qt/stock/kline/get?secid={}&fields1=f1,f2,f3&fields2=f51,f52,f53&klt={}&fqt=1&{}",
            self.config.kline_base_url,
            secid(symbol),
            klt,
            window
        );
        let body = self.get_text(&url).await?;
        parse_klines(&body).ok_or_else(|| anyhow!("Unreadable kline response for {symbol}"))
    }
}

#[async_trait]
impl MarketDataProvider for EastmoneyProvider {
    #[instrument(name = "EastmoneyHoldings", skip(self))]
    async fn holdings(&self, code: &str, year_hint: i32) -> Option<HoldingsReport> {
        let url = format!(
            "{}/FundArchivesDatas.aspx?type=jjcc&code={}&topline=10&year={}&month=",
            self.config.f10_base_url, code, year_hint
        );
        let body = self
            .get_text(&url)
            .await
            .inspect_err(|e| warn!("Holdings fetch failed for {}: {:#}", code, e))
            .ok()?;
        let report = parse_holdings_page(&body);
        if report.is_none() {
            debug!("No holdings disclosed for {} in {}", code, year_hint);
        }
        report
    }

    #[instrument(name = "EastmoneyCashRatio", skip(self))]
    async fn cash_ratio(&self, code: &str) -> Option<CashRatio> {
        let url = format!("{}/zcpz_{}.html", self.config.f10_base_url, code);
        let body = self
            .get_text(&url)
            .await
            .inspect_err(|e| warn!("Cash ratio fetch failed for {}: {:#}", code, e))
            .ok()?;
        let ratio = parse_cash_ratio_page(&body);
        if ratio.is_none() {
            warn!("No cash ratio row found for {}", code);
        }
        ratio
    }

    #[instrument(name = "EastmoneyNav", skip(self))]
    async fn nav_history(&self, code: &str) -> Option<Vec<NavRecord>> {
        let url = format!("{}/pingzhongdata/{}.js", self.config.fund_base_url, code);
        let body = self
            .get_text(&url)
            .await
            .inspect_err(|e| warn!("NAV fetch failed for {}: {:#}", code, e))
            .ok()?;
        let history = parse_nav_script(&body);
        if history.is_none() {
            warn!("No NAV history found for {}", code);
        }
        history
    }

    async fn fund_profile(&self, code: &str) -> Option<FundListing> {
        let directory = self
            .fund_directory()
            .await
            .inspect_err(|e| warn!("Fund directory unavailable: {:#}", e))
            .ok()?;
        directory.into_iter().find(|l| l.code == code)
    }

    async fn resolve_feeder_target(&self, code: &str, name: &str) -> Option<String> {
        let keyword = feeder_keyword(name)?;
        info!(
            "Searching target fund for {} ({}) with keyword: {}",
            code, name, keyword
        );
        let directory = self
            .fund_directory()
            .await
            .inspect_err(|e| warn!("Fund directory unavailable: {:#}", e))
            .ok()?;
        let target = pick_feeder_target(&directory, &keyword, code);
        match &target {
            Some(target) => info!("Feeder {} resolved to {}", code, target),
            None => debug!("No target fund found for {}", code),
        }
        target
    }

    #[instrument(name = "EastmoneyBars", skip(self))]
    async fn price_history(
        &self,
        symbol: &str,
        granularity: Granularity,
        range: PriceRange,
    ) -> Option<Vec<PriceBar>> {
        self.fetch_bars(symbol, granularity, range)
            .await
            .inspect_err(|e| warn!("Bar fetch failed for {}: {:#}", symbol, e))
            .ok()
    }

    async fn live_quotes(&self, symbols: &[String]) -> HashMap<String, LiveQuote> {
        self.quotes
            .fetch_quotes(symbols)
            .await
            .inspect_err(|e| warn!("Quote fetch failed: {:#}", e))
            .unwrap_or_default()
    }

    async fn index_history(&self, benchmark: &str, range: PriceRange) -> Option<Vec<IndexClose>> {
        let bars = self
            .fetch_bars(benchmark, Granularity::Daily, range)
            .await
            .inspect_err(|e| warn!("Index fetch failed for {}: {:#}", benchmark, e))
            .ok()?;
        Some(
            bars.into_iter()
                .map(|b| IndexClose {
                    date: b.time.date(),
                    close: b.close,
                })
                .collect(),
        )
    }

    async fn official_estimate(&self, code: &str) -> Option<OfficialEstimate> {
        let url = format!("{}/js/{}.js", self.config.estimate_base_url, code);
        let body = self
            .get_text(&url)
            .await
            .inspect_err(|e| debug!("Official estimate unavailable for {}: {:#}", code, e))
            .ok()?;
        parse_estimate(&body)
    }

    /// A-share industries, cached without expiry in the metadata collection.
    #[instrument(name = "EastmoneyIndustry", skip(self))]
    async fn stock_industry(&self, symbol: &str) -> Option<String> {
        if symbol.len() != 6 || !symbol.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let key = format!("{INDUSTRY_KEY_PREFIX}{symbol}");
        if let Some(cached) = self.metadata.get(key.as_bytes()).await {
            return String::from_utf8(cached).ok();
        }

        let url = format!(
            "{}/api/qt/stock/get?secid={}&fields=f57,f58,f127",
            self.config.quote_base_url,
            secid(symbol)
        );
        let body = self
            .get_text(&url)
            .await
            .inspect_err(|e| warn!("Industry fetch failed for {}: {:#}", symbol, e))
            .ok()?;
        let industry = parse_stock_industry(&body)?;
        debug!("Industry of {}: {}", symbol, industry);
        self.metadata
            .put(key.as_bytes(), industry.as_bytes(), None)
            .await;
        Some(industry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryCollection;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn holdings_block(label: &str, rows: &[(&str, &str, &str)]) -> String {
        let body: String = rows
            .iter()
            .enumerate()
            .map(|(i, (symbol, name, weight))| {
                format!(
                    "<tr><td>{}</td><td><a href='//quote.eastmoney.com/{symbol}'>{symbol}</a></td><td class='tol'><a>{name}</a></td><td class='tor'><span></span></td><td class='xglj'><a>变动详情</a><a>股吧</a></td><td class='tor'>{weight}</td><td class='tor'>330.00</td></tr>",
                    i + 1
                )
            })
            .collect();
        format!(
            "<div class='box'><h4 class='t'><label class='left'><a>某基金</a>&nbsp;&nbsp;{label}</label></h4><table class='w782 comm tzxq'><thead><tr><th>序号</th><th>股票代码</th><th>股票名称</th><th>最新价</th><th class='xglj'>相关资讯</th><th>占净值<br />比例</th><th class='cgs'>持股数<br />（万股）</th></tr></thead><tbody>{body}</tbody></table></div>"
        )
    }

    fn apidata(content: &str) -> String {
        format!("var apidata={{ content:\"{content}\",arryear:[2024,2023],curyear:2024}};")
    }

    fn directory_body() -> String {
        r#"var r = [["510300","HTBRHS300ETF","华泰柏瑞沪深300ETF","指数型-股票","X"],["460300","HTBRHS300ETFLJA","华泰柏瑞沪深300ETF联接A","指数型-股票","X"],["515330","TFHS300ETF","天弘沪深300ETF","指数型-股票","X"],["161725","ZSBJ","招商中证白酒指数(LOF)A","指数型-股票","X"],["999999","HTBRHS300ETFZQ","华泰柏瑞沪深300ETF增强","指数型-股票","X"]];"#
            .to_string()
    }

    fn provider_for(server: &MockServer) -> EastmoneyProvider {
        let config = EastmoneyProviderConfig {
            fund_base_url: server.uri(),
            estimate_base_url: server.uri(),
            f10_base_url: server.uri(),
            kline_base_url: server.uri(),
            quote_base_url: server.uri(),
        };
        let client = reqwest::Client::new();
        EastmoneyProvider::new(
            config,
            client.clone(),
            SinaQuoteClient::new(&server.uri(), client),
            Arc::new(MemoryCollection::new()),
        )
    }

    #[test]
    fn test_secid() {
        assert_eq!(secid("600519"), "1.600519");
        assert_eq!(secid("510300"), "1.510300");
        assert_eq!(secid("000858"), "0.000858");
        assert_eq!(secid("00700"), "116.00700");
        assert_eq!(secid("aapl"), "105.AAPL");
        assert_eq!(secid("1.000300"), "1.000300");
        assert_eq!(secid("100.HSI"), "100.HSI");
    }

    #[test]
    fn test_parse_holdings_page_uses_latest_report() {
        let content = format!(
            "{}{}",
            holdings_block("2024年3季度股票投资明细", &[("000001", "旧", "5.00%")]),
            holdings_block(
                "2024年4季度股票投资明细",
                &[
                    ("600519", "贵州茅台", "9.85%"),
                    ("000858", "五粮液", "12.10%"),
                    ("000568", "泸州老窖", "---"),
                ],
            ),
        );
        let report = parse_holdings_page(&apidata(&content)).unwrap();

        assert_eq!(report.report_period.as_deref(), Some("2024年4季度股票投资明细"));
        assert_eq!(report.holdings.len(), 2);
        assert_eq!(report.holdings[0].symbol, "000858");
        assert_eq!(report.holdings[0].name, "五粮液");
        assert_eq!(report.holdings[0].weight, 12.10);
        assert_eq!(report.holdings[1].symbol, "600519");
    }

    #[test]
    fn test_parse_holdings_page_empty_year() {
        assert!(parse_holdings_page(&apidata("")).is_none());
    }

    #[test]
    fn test_parse_cash_ratio_page() {
        let body = "<table><thead><tr><th>报告期</th><th>股票占净比</th><th>债券占净比</th><th>现金占净比</th><th>净资产（亿元）</th></tr></thead><tbody><tr><td>2024-12-31</td><td>93.21%</td><td>0.52%</td><td>6.40%</td><td>500.12</td></tr></tbody></table>";
        let ratio = parse_cash_ratio_page(body).unwrap();
        assert_eq!(ratio.percent, 6.40);
        assert_eq!(ratio.as_of, NaiveDate::from_ymd_opt(2024, 12, 31));

        assert!(parse_cash_ratio_page("<html>nothing here</html>").is_none());
    }

    #[test]
    fn test_parse_nav_script() {
        let body = r#"var fS_name = "x";var Data_netWorthTrend = [{"x":1709222400000,"y":1.02,"equityReturn":0.98,"unitMoney":""},{"x":1709136000000,"y":1.01,"equityReturn":"","unitMoney":""},{"x":1709481600000,"y":1.03,"equityReturn":"-0.5","unitMoney":""}];var Data_ACWorthTrend = [];"#;
        let records = parse_nav_script(body).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(records[0].daily_return, None);
        assert_eq!(records[1].date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(records[1].daily_return, Some(0.98));
        assert_eq!(records[2].daily_return, Some(-0.5));
        assert_eq!(records[2].nav, 1.03);
    }

    #[test]
    fn test_parse_klines() {
        let body = r#"{"rc":0,"data":{"code":"600519","klines":["2024-03-04 09:35,10.00,10.05,10.10,9.98","2024-03-04 09:40,10.05,10.02,10.06,10.00","bad"]}}"#;
        let bars = parse_klines(body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].time.format("%H:%M").to_string(), "09:35");
        assert_eq!(bars[0].open, Some(10.00));
        assert_eq!(bars[1].close, 10.02);

        let daily = parse_klines(r#"cb({"data":{"klines":["2024-03-01,9.9,10.0"]}});"#).unwrap();
        assert_eq!(daily[0].time.date(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        assert_eq!(parse_klines(r#"{"data":null}"#), None);
    }

    #[test]
    fn test_parse_estimate() {
        let body = r#"jsonpgz({"fundcode":"161725","name":"x","jzrq":"2024-03-01","dwjz":"1.0000","gsz":"1.0085","gszzl":"0.85","gztime":"2024-03-04 10:01"});"#;
        let estimate = parse_estimate(body).unwrap();
        assert_eq!(estimate.value, 0.85);
        assert_eq!(estimate.time.format("%Y-%m-%d %H:%M").to_string(), "2024-03-04 10:01");
        assert!(parse_estimate("jsonpgz();").is_none());
    }

    #[test]
    fn test_feeder_keyword() {
        assert_eq!(
            feeder_keyword("华泰柏瑞沪深300ETF联接A").as_deref(),
            Some("华泰柏瑞沪深300ETF")
        );
        assert_eq!(
            feeder_keyword("易方达中证500发起式联接C").as_deref(),
            Some("易方达中证500")
        );
        assert_eq!(
            feeder_keyword("某纳斯达克100ETF(QDII-ETF)联接A").as_deref(),
            Some("某纳斯达克100ETF")
        );
        assert_eq!(feeder_keyword("招商中证白酒指数(LOF)A"), None);
    }

    #[test]
    fn test_pick_feeder_target_prefers_shortest_index_fund() {
        let listings = parse_fund_directory(&directory_body()).unwrap();
        assert_eq!(listings.len(), 5);
        assert_eq!(
            pick_feeder_target(&listings, "华泰柏瑞沪深300ETF", "460300").as_deref(),
            Some("510300")
        );
        assert_eq!(pick_feeder_target(&listings, "不存在", "460300"), None);
    }

    #[tokio::test]
    async fn test_provider_fetches_holdings_and_nav() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/FundArchivesDatas.aspx"))
            .and(query_param("code", "161725"))
            .and(query_param("year", "2024"))
            .respond_with(ResponseTemplate::new(200).set_body_string(apidata(&holdings_block(
                "2024年4季度股票投资明细",
                &[("600519", "贵州茅台", "15.00%")],
            ))))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pingzhongdata/161725.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"var Data_netWorthTrend = [{"x":1709222400000,"y":1.02,"equityReturn":0.98}];"#,
            ))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let report = provider.holdings("161725", 2024).await.unwrap();
        assert_eq!(report.holdings[0].symbol, "600519");

        let nav = provider.nav_history("161725").await.unwrap();
        assert_eq!(nav.len(), 1);
        assert_eq!(nav[0].daily_return, Some(0.98));
    }

    #[tokio::test]
    async fn test_fund_directory_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/js/fundcode_search.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string(directory_body()))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let listing = provider.fund_profile("161725").await.unwrap();
        assert_eq!(listing.name, "招商中证白酒指数(LOF)A");
        assert_eq!(listing.fund_type, "指数型-股票");

        let target = provider
            .resolve_feeder_target("460300", "华泰柏瑞沪深300ETF联接A")
            .await;
        assert_eq!(target.as_deref(), Some("510300"));
        assert!(provider.fund_profile("000000").await.is_none());
    }

    #[tokio::test]
    async fn test_kline_ranges_and_index_history() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/qt/stock/kline/get"))
            .and(query_param("secid", "1.000300"))
            .and(query_param("klt", "101"))
            .and(query_param("beg", "20240301"))
            .and(query_param("end", "20240304"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"data":{"klines":["2024-03-01,3500.0,3510.0","2024-03-04,3510.0,3545.1"]}}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/qt/stock/kline/get"))
            .and(query_param("secid", "0.000858"))
            .and(query_param("klt", "5"))
            .and(query_param("lmt", "48"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"data":{"klines":["2024-03-04 09:35,150.0,151.0"]}}"#,
            ))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let closes = provider
            .index_history("1.000300", PriceRange::Between(start, end))
            .await
            .unwrap();
        assert_eq!(closes.len(), 2);
        assert_eq!(closes[1].date, end);
        assert_eq!(closes[1].close, 3545.1);

        let bars = provider
            .price_history("000858", Granularity::FiveMinute, PriceRange::Latest(48))
            .await
            .unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].open, Some(150.0));
    }

    #[test]
    fn test_parse_stock_industry() {
        assert_eq!(
            parse_stock_industry(r#"{"rc":0,"data":{"f57":"600519","f58":"贵州茅台","f127":"酿酒行业"}}"#)
                .as_deref(),
            Some("酿酒行业")
        );
        assert!(parse_stock_industry(r#"{"rc":0,"data":{"f57":"600519","f127":"-"}}"#).is_none());
        assert!(parse_stock_industry(r#"{"rc":0,"data":null}"#).is_none());
    }

    #[tokio::test]
    async fn test_stock_industry_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/qt/stock/get"))
            .and(query_param("secid", "1.600519"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"rc":0,"data":{"f57":"600519","f58":"贵州茅台","f127":"酿酒行业"}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/qt/stock/get"))
            .and(query_param("secid", "0.000001"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"rc":0,"data":null}"#))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        assert_eq!(provider.stock_industry("600519").await.as_deref(), Some("酿酒行业"));
        assert_eq!(provider.stock_industry("600519").await.as_deref(), Some("酿酒行业"));
        assert!(provider.stock_industry("000001").await.is_none());
        // Hong Kong and US symbols are never looked up.
        assert!(provider.stock_industry("00700").await.is_none());
        assert!(provider.stock_industry("AAPL").await.is_none());
    }

    #[tokio::test]
    async fn test_failures_become_no_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        assert!(provider.cash_ratio("161725").await.is_none());
        assert!(provider.official_estimate("161725").await.is_none());
        assert!(provider.live_quotes(&["600519".to_string()]).await.is_empty());
    }
}
