use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_CMC_API_BASE: &str = "https://pro-api.coinmarketcap.com";
pub const CONVERT: &str = "USD";

const AVATAR_BASE_URL: &str =
    "https://github.com/hyperreal64/cryptocurrency-icons/blob/master/128/color";

pub const USAGE: &str = "
cmc_discord_bot
---------------
This program sends cryptocurrency info to a Discord webhook

Usage:
cmc_discord_bot [--dry-run] [<coin symbol>]    : Info for cryptocurrency with symbol <coin symbol>

Currently supports BTC, ETH, and BAT
";

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cmc_api_key: String,
    pub discord_webhook_url: String,
    pub cmc_api_base: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_mode(false)
    }

    /// Same as [`Config::from_env`], but the webhook URL may be missing.
    pub fn from_env_for_dry_run() -> Result<Self> {
        Self::from_env_with_mode(true)
    }

    fn from_env_with_mode(dry_run: bool) -> Result<Self> {
        let cmc_api_key = required("CMC_PRO_API_KEY")?;
        let discord_webhook_url = optional_required("DISCORD_WEBHOOK_URL", dry_run)?;
        let cmc_api_base = optional("CMC_API_BASE_URL", DEFAULT_CMC_API_BASE)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            cmc_api_key,
            discord_webhook_url,
            cmc_api_base,
        })
    }
}

fn required(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .with_context(|| format!("missing required env var {name}"))
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn optional_required(name: &str, allow_missing: bool) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ if allow_missing => Ok(String::new()),
        _ => Err(anyhow!("missing required env var {name}")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub symbol: String,
    pub avatar_url: String,
}

impl Coin {
    fn with_default_icon(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            avatar_url: format!(
                "{AVATAR_BASE_URL}/{}.png?raw=true",
                symbol.to_ascii_lowercase()
            ),
        }
    }
}

/// The coins the bot knows how to post. Add a symbol here to support it.
pub fn supported_coins() -> Vec<Coin> {
    ["BTC", "ETH", "BAT"]
        .into_iter()
        .map(Coin::with_default_icon)
        .collect()
}

pub fn resolve_coin<'a>(coins: &'a [Coin], arg: &str) -> Option<&'a Coin> {
    coins.iter().find(|c| c.symbol.eq_ignore_ascii_case(arg))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub price_usd: f64,
    pub percent_change_24h: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub content: String,
    pub avatar_url: String,
}

pub async fn run_once(config: &Config, coin: &Coin, options: &RunOptions) -> Result<()> {
    let http = HttpClient::new();

    let quote = fetch_quote(&http, config, &coin.symbol)
        .await
        .with_context(|| format!("Failed to get {} quotes", coin.symbol))?;
    info!(
        "{} quote: price={} change_24h={}",
        quote.symbol, quote.price_usd, quote.percent_change_24h
    );

    let content = format_quote(&quote);
    let body = build_payload(&content, &coin.avatar_url).context("Failed to get JSON payload")?;

    if options.dry_run {
        println!("{}", String::from_utf8_lossy(&body));
        return Ok(());
    }

    send_webhook(&http, &config.discord_webhook_url, body)
        .await
        .context("Failed to execute webhook")?;
    info!("Posted {} quote to Discord webhook.", coin.symbol);

    Ok(())
}

pub async fn fetch_quote(http: &HttpClient, config: &Config, symbol: &str) -> Result<Quote> {
    let url = format!(
        "{}/v1/cryptocurrency/quotes/latest?symbol={}&convert={}",
        config.cmc_api_base,
        urlencoding::encode(symbol),
        CONVERT
    );
    let response = http
        .get(url)
        .header("X-CMC_PRO_API_KEY", &config.cmc_api_key)
        .header("Accept", "application/json")
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await?;
    let payload: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(_) if !status.is_success() => {
            return Err(anyhow!("CMC returned {status}: {}", text.trim()));
        }
        Err(e) => return Err(e).context("CMC response is not valid JSON"),
    };

    let api_error = payload
        .pointer("/status/error_code")
        .and_then(Value::as_i64)
        .filter(|code| *code != 0);
    if !status.is_success() || api_error.is_some() {
        let message = payload
            .pointer("/status/error_message")
            .and_then(Value::as_str)
            .unwrap_or("no error message");
        return Err(anyhow!("CMC returned {status}: {message}"));
    }

    parse_quote(&payload, symbol)
}

/// Extracts the USD quote for `symbol` from a `quotes/latest` response.
///
/// `data.<SYMBOL>` is a single object on v1 and a list on v2. When several
/// entries share the symbol the last one is used.
pub fn parse_quote(payload: &Value, symbol: &str) -> Result<Quote> {
    let data = payload
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow!("CMC response missing data object"))?;

    let entry = data
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(symbol))
        .map(|(_, v)| v)
        .ok_or_else(|| anyhow!("CMC response has no entry for {symbol}"))?;

    let item = match entry {
        Value::Array(items) => {
            if items.len() > 1 {
                warn!(
                    "CMC returned {} entries for {symbol}, using the last one",
                    items.len()
                );
            }
            items
                .last()
                .ok_or_else(|| anyhow!("CMC response has an empty entry list for {symbol}"))?
        }
        other => other,
    };

    let usd = item
        .get("quote")
        .and_then(|q| q.get(CONVERT))
        .ok_or_else(|| anyhow!("CMC response missing {CONVERT} quote for {symbol}"))?;
    let price_usd = usd
        .get("price")
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow!("CMC response missing price for {symbol}"))?;
    let percent_change_24h = usd
        .get("percent_change_24h")
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow!("CMC response missing percent_change_24h for {symbol}"))?;

    Ok(Quote {
        symbol: item
            .get("symbol")
            .and_then(Value::as_str)
            .unwrap_or(symbol)
            .to_string(),
        price_usd,
        percent_change_24h,
    })
}

pub fn format_quote(quote: &Quote) -> String {
    format!(
        "{}: ${:.2}\nPercent Change 24 hours: {:.2}%\n\n",
        quote.symbol, quote.price_usd, quote.percent_change_24h
    )
}

pub fn build_payload(content: &str, avatar_url: &str) -> Result<Vec<u8>> {
    let payload = WebhookPayload {
        content: content.to_string(),
        avatar_url: avatar_url.to_string(),
    };
    serde_json::to_vec(&payload)
        .with_context(|| format!("Failed to marshal JSON object {payload:?}"))
}

// Only transport errors count. Discord's status and body are ignored.
pub async fn send_webhook(http: &HttpClient, url: &str, body: Vec<u8>) -> Result<()> {
    let request = http
        .post(url)
        .header("Content-Type", "application/json")
        .body(body)
        .build()
        .context("Failed to build webhook request")?;

    let response = http
        .execute(request)
        .await
        .context("Failed to send webhook request")?;
    debug!("webhook responded with {}", response.status());

    Ok(())
}
