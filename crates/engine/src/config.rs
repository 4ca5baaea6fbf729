//! Runtime configuration, built once from the environment and passed down
//! to each component.

use crate::alerts::AlertThresholds;
use crate::matcher::RiskPolicy;
use crate::normalizer::NormalizerPolicy;
use crate::notifier::Channel;
use crate::scorer::ScoringPolicy;
use crate::types::Platform;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// API credentials for one exchange
#[derive(Clone, Default)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: Option<String>,
}

impl ExchangeCredentials {
    pub fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.secret.is_empty()
    }
}

impl fmt::Debug for ExchangeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeCredentials")
            .field("api_key", &redact(&self.api_key))
            .field("secret", &"***")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .finish()
    }
}

fn redact(key: &str) -> String {
    match key.get(..4) {
        Some(prefix) if key.len() > 8 => format!("{prefix}***"),
        _ => "***".to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscordConfig {
    /// Legacy single webhook, used for channels without their own
    pub default_webhook: Option<String>,
    pub channel_webhooks: HashMap<Channel, String>,
    pub bot_token: Option<String>,
}

impl DiscordConfig {
    pub fn webhook_for(&self, channel: Channel) -> Option<&str> {
        self.channel_webhooks
            .get(&channel)
            .or(self.default_webhook.as_ref())
            .map(String::as_str)
    }

    pub fn is_configured(&self) -> bool {
        self.default_webhook.is_some() || !self.channel_webhooks.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub credentials: HashMap<Platform, ExchangeCredentials>,
    pub discord: DiscordConfig,
    pub taapi_secret: Option<String>,
    pub cryptonews_api_key: Option<String>,
    pub lunarcrush_api_key: Option<String>,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub keep_snapshots: usize,
    pub poll_interval: Duration,
    pub cooldown_ttl: Duration,
    /// Symbols the market scanner rotates through when no universe is given
    pub scan_symbols: Vec<String>,
    pub normalizer: NormalizerPolicy,
    pub risk: RiskPolicy,
    pub scoring: ScoringPolicy,
    pub alerts: AlertThresholds,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl SentinelConfig {
    /// Read configuration from process environment (call `dotenvy::dotenv()` first)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut credentials = HashMap::new();
        let creds = |key: &str, secret: &str, passphrase: Option<&str>| ExchangeCredentials {
            api_key: get(key).unwrap_or_default(),
            secret: get(secret).unwrap_or_default(),
            passphrase: passphrase.and_then(|k| get(k)),
        };
        credentials.insert(Platform::BingX, creds("BINGX_API_KEY", "BINGX_SECRET", None));
        credentials.insert(Platform::Kraken, creds("KRAKEN_API_KEY", "KRAKEN_SECRET", None));
        credentials.insert(
            Platform::Blofin,
            creds("BLOFIN_API_KEY", "BLOFIN_API_SECRET", Some("BLOFIN_PASSPHRASE")),
        );
        credentials.insert(
            Platform::KuCoin,
            creds("KUCOIN_API_KEY", "KUCOIN_SECRET", Some("KUCOIN_PASSPHRASE")),
        );

        let mut channel_webhooks = HashMap::new();
        for channel in Channel::ALL {
            let key = format!("DISCORD_WEBHOOK_{}", channel.key().to_uppercase());
            if let Some(url) = get(&key) {
                channel_webhooks.insert(channel, url);
            }
        }

        let data_dir = PathBuf::from(get("SENTINEL_DATA_DIR").unwrap_or_else(|| "data".into()));
        let db_path = get("SENTINEL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("sentinel.db"));

        let scan_symbols = get("SENTINEL_SCAN_SYMBOLS")
            .map(|s| {
                s.split(',')
                    .map(|x| x.trim().to_uppercase())
                    .filter(|x| !x.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            credentials,
            discord: DiscordConfig {
                default_webhook: get("DISCORD_WEBHOOK_URL"),
                channel_webhooks,
                bot_token: get("DISCORD_TOKEN"),
            },
            taapi_secret: get("TAAPI_SECRET"),
            cryptonews_api_key: get("CRYPTONEWS_API_KEY"),
            lunarcrush_api_key: get("LUNARCRUSH_API_KEY"),
            keep_snapshots: parse_or("SENTINEL_KEEP_SNAPSHOTS", get("SENTINEL_KEEP_SNAPSHOTS"), 3),
            poll_interval: Duration::from_secs(parse_or(
                "SENTINEL_POLL_INTERVAL_SECS",
                get("SENTINEL_POLL_INTERVAL_SECS"),
                3600,
            )),
            cooldown_ttl: Duration::from_secs(parse_or(
                "SENTINEL_COOLDOWN_SECS",
                get("SENTINEL_COOLDOWN_SECS"),
                1800,
            )),
            data_dir,
            db_path,
            scan_symbols,
            normalizer: NormalizerPolicy::default(),
            risk: RiskPolicy::default(),
            scoring: ScoringPolicy::default(),
            alerts: AlertThresholds::default(),
        }
    }

    pub fn credentials_for(&self, platform: Platform) -> ExchangeCredentials {
        self.credentials.get(&platform).cloned().unwrap_or_default()
    }

    pub fn configured_exchanges(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.credentials_for(*p).is_complete())
            .collect()
    }
}

fn parse_or<T: FromStr + Copy>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(v) => v.parse().unwrap_or_else(|_| {
            warn!(key, value = %v, "Invalid number in environment, using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = SentinelConfig::default();
        assert!(cfg.configured_exchanges().is_empty());
        assert_eq!(cfg.keep_snapshots, 3);
        assert_eq!(cfg.cooldown_ttl, Duration::from_secs(1800));
        assert_eq!(cfg.db_path, PathBuf::from("data").join("sentinel.db"));
        assert!(!cfg.discord.is_configured());
    }

    #[test]
    fn test_credentials_and_webhooks() {
        let cfg = SentinelConfig::from_lookup(lookup(&[
            ("BINGX_API_KEY", "key"),
            ("BINGX_SECRET", "secret"),
            ("KUCOIN_API_KEY", "key"),
            ("KUCOIN_SECRET", "  "),
            ("DISCORD_WEBHOOK_URL", "https://discord.test/default"),
            ("DISCORD_WEBHOOK_ALPHA", "https://discord.test/alpha"),
        ]));

        assert_eq!(cfg.configured_exchanges(), vec![Platform::BingX]);
        assert_eq!(
            cfg.discord.webhook_for(Channel::Alpha),
            Some("https://discord.test/alpha")
        );
        assert_eq!(
            cfg.discord.webhook_for(Channel::Portfolio),
            Some("https://discord.test/default")
        );
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let cfg = SentinelConfig::from_lookup(lookup(&[
            ("SENTINEL_KEEP_SNAPSHOTS", "many"),
            ("SENTINEL_POLL_INTERVAL_SECS", "60"),
            ("SENTINEL_SCAN_SYMBOLS", "sol, eth,,"),
        ]));
        assert_eq!(cfg.keep_snapshots, 3);
        assert_eq!(cfg.poll_interval, Duration::from_secs(60));
        assert_eq!(cfg.scan_symbols, vec!["SOL", "ETH"]);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = ExchangeCredentials {
            api_key: "abcdef123456".into(),
            secret: "topsecret".into(),
            passphrase: Some("pass".into()),
        };
        let out = format!("{creds:?}");
        assert!(out.contains("abcd***"));
        assert!(!out.contains("topsecret"));
        assert!(!out.contains("pass\""));
    }
}
