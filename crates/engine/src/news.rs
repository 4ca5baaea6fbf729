//! Headline keyword filter and the news sub-score

use crate::api::NewsArticle;
use serde::Serialize;

const BULLISH_KEYWORDS: &[&str] = &[
    "partnership",
    "listing",
    "launch",
    "upgrade",
    "approval",
    "adoption",
    "bullish",
    "surge",
    "rally",
    "breakout",
    "etf",
    "institutional",
];

const RISK_KEYWORDS: &[&str] = &[
    "hack",
    "exploit",
    "lawsuit",
    "sec",
    "delist",
    "ban",
    "crash",
    "bearish",
    "dump",
    "investigation",
    "rug",
    "liquidation",
];

/// Upper bound of the news sub-score
pub const MAX_NEWS_SCORE: f64 = 30.0;
/// Positive articles needed before news counts as a catalyst
pub const MIN_POSITIVE_ARTICLES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadlineClass {
    Bullish,
    Risk,
    Neutral,
}

fn words(title: &str) -> Vec<String> {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Suffixes accepted after any keyword ("hacks", "crashes", "listings", "dumped")
const INFLECTIONS: &[&str] = &["s", "es", "ed", "ing", "ings", "er", "ers"];

/// Acronyms match only as whole words ("SEC", never "secs")
const EXACT_KEYWORDS: &[&str] = &["sec"];

fn matches_keyword(word: &str, keyword: &str) -> bool {
    let Some(rest) = word.strip_prefix(keyword) else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    if EXACT_KEYWORDS.contains(&keyword) {
        return false;
    }
    if INFLECTIONS.contains(&rest) {
        return true;
    }
    // "surged" after a trailing e
    if rest == "d" {
        return keyword.ends_with('e');
    }
    // Doubled final consonant: "banned", "banning", "rugged"
    match (keyword.chars().last(), rest.chars().next()) {
        (Some(last), Some(first)) if last == first && !"aeiou".contains(last) => {
            matches!(&rest[first.len_utf8()..], "ed" | "ing")
        }
        _ => false,
    }
}

fn matches_any(words: &[String], keywords: &[&str]) -> bool {
    words
        .iter()
        .any(|w| keywords.iter().any(|k| matches_keyword(w, k)))
}

/// Risk wins when a title hits both vocabularies
pub fn classify_headline(title: &str) -> HeadlineClass {
    let words = words(title);
    if matches_any(&words, RISK_KEYWORDS) {
        HeadlineClass::Risk
    } else if matches_any(&words, BULLISH_KEYWORDS) {
        HeadlineClass::Bullish
    } else {
        HeadlineClass::Neutral
    }
}

/// News sub-score inputs
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewsSignals {
    pub recent_news_count: usize,
    pub positive_count: usize,
    pub positive_ratio: f64,
    pub catalyst: bool,
    pub news_score: f64,
}

/// `min(30, ratio*30 + min(10, count*2))` once at least two articles are positive
pub fn news_signals(articles: &[NewsArticle]) -> NewsSignals {
    let count = articles.len();
    if count == 0 {
        return NewsSignals::default();
    }
    let positive = articles.iter().filter(|a| a.is_positive()).count();
    let ratio = positive as f64 / count as f64;
    let catalyst = positive >= MIN_POSITIVE_ARTICLES;
    let news_score = if catalyst {
        (ratio * 30.0 + (count as f64 * 2.0).min(10.0)).min(MAX_NEWS_SCORE)
    } else {
        0.0
    };
    NewsSignals {
        recent_news_count: count,
        positive_count: positive,
        positive_ratio: ratio,
        catalyst,
        news_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(title: &str, sentiment: &str) -> NewsArticle {
        NewsArticle {
            title: title.into(),
            news_url: None,
            source_name: None,
            date: None,
            sentiment: Some(sentiment.into()),
            tickers: vec![],
        }
    }

    #[test]
    fn test_classify_headline() {
        assert_eq!(classify_headline("Coinbase announces SOL listing"), HeadlineClass::Bullish);
        assert_eq!(classify_headline("Bridge HACKED for $50M"), HeadlineClass::Risk);
        assert_eq!(classify_headline("Weekly market recap"), HeadlineClass::Neutral);
    }

    #[test]
    fn test_risk_wins_ties() {
        assert_eq!(
            classify_headline("ETF approval delayed as SEC opens investigation"),
            HeadlineClass::Risk
        );
    }

    #[test]
    fn test_inflections() {
        assert_eq!(classify_headline("Exchange banned in two states"), HeadlineClass::Risk);
        assert_eq!(classify_headline("Token launches on mainnet"), HeadlineClass::Bullish);
    }

    #[test]
    fn test_word_boundaries() {
        // "bank" must not match "ban", "second" must not match "sec"
        assert_eq!(classify_headline("Central bank second review"), HeadlineClass::Neutral);
    }

    #[test]
    fn test_short_keywords() {
        assert_eq!(classify_headline("SEC sues exchange"), HeadlineClass::Risk);
        assert_eq!(classify_headline("Block time drops to 2 secs"), HeadlineClass::Neutral);
        assert_eq!(classify_headline("Binance bans leverage tokens"), HeadlineClass::Risk);
        assert_eq!(classify_headline("Regulator banning stablecoin yield"), HeadlineClass::Risk);
        assert_eq!(classify_headline("Rock band buys bitcoin"), HeadlineClass::Neutral);
        assert_eq!(classify_headline("Banner year for miners"), HeadlineClass::Neutral);
        assert_eq!(classify_headline("Memecoin holders rugged overnight"), HeadlineClass::Risk);
        assert_eq!(classify_headline("Volume surged after upgrade"), HeadlineClass::Bullish);
    }

    #[test]
    fn test_news_score_requires_two_positive() {
        let one = vec![article("a", "Positive"), article("b", "Neutral")];
        assert_eq!(news_signals(&one).news_score, 0.0);

        let two = vec![
            article("a", "Positive"),
            article("b", "positive"),
            article("c", "Negative"),
            article("d", "Neutral"),
        ];
        let s = news_signals(&two);
        assert!(s.catalyst);
        // 0.5 * 30 + min(10, 8) = 23
        assert!((s.news_score - 23.0).abs() < 1e-9);
    }

    #[test]
    fn test_news_score_capped() {
        let all: Vec<_> = (0..10).map(|i| article(&i.to_string(), "Positive")).collect();
        assert_eq!(news_signals(&all).news_score, MAX_NEWS_SCORE);
    }

    #[test]
    fn test_empty_news() {
        assert_eq!(news_signals(&[]), NewsSignals::default());
    }
}
