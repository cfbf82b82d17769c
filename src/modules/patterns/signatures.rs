//! User-agent and traffic-shape bot signatures, used to self-check the
//! identities and pacing this crate produces.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::fmt;

use super::features::TrafficFeatures;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BotKind {
    /// Self-identified crawler such as `Googlebot`.
    KnownCrawler(String),
    Headless,
    /// HTTP library or command-line client.
    Scripted,
    /// Generic `bot`/`spider`/`crawler` token.
    Generic,
    EmptyAgent,
    /// Flagged by traffic shape rather than by agent string.
    Behavioural,
}

impl fmt::Display for BotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotKind::KnownCrawler(name) => f.write_str(name),
            BotKind::Headless => f.write_str("headless"),
            BotKind::Scripted => f.write_str("scripted"),
            BotKind::Generic => f.write_str("crawler"),
            BotKind::EmptyAgent => f.write_str("empty"),
            BotKind::Behavioural => f.write_str("behavioural"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotSignature {
    pub is_bot: bool,
    pub kind: Option<BotKind>,
    pub confidence: f64,
}

impl BotSignature {
    fn human() -> Self {
        Self {
            is_bot: false,
            kind: None,
            confidence: 0.0,
        }
    }

    fn bot(kind: BotKind, confidence: f64) -> Self {
        Self {
            is_bot: true,
            kind: Some(kind),
            confidence,
        }
    }
}

static KNOWN_CRAWLER_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(
        r"\b(Googlebot|Bingbot|Slurp|DuckDuckBot|Baiduspider|YandexBot|Applebot|facebookexternalhit|Twitterbot|AhrefsBot|SemrushBot|MJ12bot|GPTBot|CCBot)\b",
    )
    .case_insensitive(true)
    .build()
    .expect("invalid known crawler regex")
});

static HEADLESS_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"HeadlessChrome|PhantomJS|Puppeteer|Playwright|Selenium|webdriver")
        .case_insensitive(true)
        .build()
        .expect("invalid headless regex")
});

static SCRIPTED_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(
        r"^(python-requests|python-urllib|aiohttp|httpx|curl|wget|Go-http-client|okhttp|Java/|libwww-perl|Scrapy|axios|node-fetch|Apache-HttpClient|reqwest)",
    )
    .case_insensitive(true)
    .build()
    .expect("invalid scripted client regex")
});

static GENERIC_BOT_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"bot\b|crawl|spider|scraper")
        .case_insensitive(true)
        .build()
        .expect("invalid generic bot regex")
});

/// Classifies a user agent string.
pub fn detect_bot_signature(user_agent: &str) -> BotSignature {
    let agent = user_agent.trim();
    if agent.is_empty() {
        return BotSignature::bot(BotKind::EmptyAgent, 0.8);
    }
    if let Some(found) = KNOWN_CRAWLER_RE.find(agent) {
        return BotSignature::bot(BotKind::KnownCrawler(found.as_str().to_string()), 0.95);
    }
    if HEADLESS_RE.is_match(agent) {
        return BotSignature::bot(BotKind::Headless, 0.9);
    }
    if SCRIPTED_RE.is_match(agent) {
        return BotSignature::bot(BotKind::Scripted, 0.85);
    }
    if GENERIC_BOT_RE.is_match(agent) {
        return BotSignature::bot(BotKind::Generic, 0.75);
    }
    BotSignature::human()
}

/// Scores a session's traffic shape. At 0.5 or above it is flagged.
pub fn detect_bot_by_pattern(features: &TrafficFeatures) -> BotSignature {
    let mut score: f64 = 0.0;

    if features.request_rate >= 10.0 {
        score += 0.35;
    } else if features.request_rate >= 3.0 {
        score += 0.15;
    }
    if features.page_views > 100.0 && features.session_duration_secs < 60.0 {
        score += 0.25;
    }
    if features.unique_paths <= 1.0 && features.page_views > 10.0 {
        score += 0.15;
    }
    if features.session_duration_secs > 0.0
        && features.page_views / features.session_duration_secs > 2.0
    {
        score += 0.15;
    }

    let score = score.min(1.0);
    if score >= 0.5 {
        BotSignature::bot(BotKind::Behavioural, score)
    } else {
        BotSignature {
            is_bot: false,
            kind: None,
            confidence: score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_crawler() {
        let result = detect_bot_signature("Googlebot/2.1 (+http://www.google.com/bot.html)");
        assert!(result.is_bot);
        assert_eq!(result.kind.unwrap().to_string(), "Googlebot");
    }

    #[test]
    fn scripted_and_headless_clients() {
        let scripted = detect_bot_signature("python-requests/2.28.0");
        assert!(scripted.is_bot);
        assert!(scripted.confidence > 0.7);
        assert_eq!(scripted.kind, Some(BotKind::Scripted));

        let headless = detect_bot_signature(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 HeadlessChrome/120.0.0.0",
        );
        assert_eq!(headless.kind, Some(BotKind::Headless));
        assert_eq!(detect_bot_signature("  ").kind, Some(BotKind::EmptyAgent));
    }

    #[test]
    fn browsers_pass() {
        let result = detect_bot_signature(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        );
        assert!(!result.is_bot);
        assert_eq!(result.kind, None);
    }

    #[test]
    fn traffic_shape() {
        let hammering = TrafficFeatures {
            request_rate: 100.0,
            session_duration_secs: 5.0,
            page_views: 1000.0,
            unique_paths: 1.0,
            user_agent_entropy: 4.0,
        };
        let result = detect_bot_by_pattern(&hammering);
        assert!(result.is_bot);
        assert!(result.confidence > 0.8);

        let browsing = TrafficFeatures {
            request_rate: 0.1,
            session_duration_secs: 600.0,
            page_views: 12.0,
            unique_paths: 9.0,
            user_agent_entropy: 4.5,
        };
        assert!(!detect_bot_by_pattern(&browsing).is_bot);
    }
}
