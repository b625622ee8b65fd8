//! Topic briefings for the room.
//!
//! The default product (PlayStation 5) ships with a static briefing so the
//! common case costs no network call. Any other topic is looked up through
//! the DuckDuckGo Instant Answer API. Lookups degrade, never fail: no
//! answer, timeouts, and wire errors all collapse to a generic briefing
//! telling personas to draw on their own knowledge.

use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;

pub const DEFAULT_TOPIC: &str = "PlayStation 5";

const PS5_ALIASES: &[&str] = &["playstation 5", "ps5", "playstation5", "playstation"];

const PS5_BRIEFING: &str = "\
PRODUCT FOCUS: PlayStation 5 (PS5)
Manufacturer: Sony Interactive Entertainment
Original Release: November 2020
PS5 Pro Release: November 2024
Price: ~$499 (Standard Disc Edition) / ~$449 (Digital Edition) / ~$699 (PS5 Pro)

Key Features:
- Custom AMD Zen 2 CPU + RDNA 2 GPU
- Ultra-high-speed NVMe SSD (5.5 GB/s)
- DualSense haptic feedback + adaptive triggers
- 4K gaming at up to 120fps, ray tracing support
- Backwards compatible with PS4 titles
- PlayStation Network (PSN) ecosystem, a closed platform
- No mod support, no cross-buy with PC, limited cross-platform play

Notable Exclusive Library:
- God of War Ragnarok, Spider-Man 2, Returnal, Demon's Souls
- Gran Turismo 7, Ratchet & Clank: Rift Apart, Horizon Forbidden West
- Astro's Playroom (pack-in, showcases DualSense)

Relevant Comparisons Available:
- PS4 / PS4 Pro (predecessor)
- Xbox Series X (direct competitor, Game Pass ecosystem)
- Nintendo Switch / Switch OLED (family-oriented, portable)
- Gaming PC (open ecosystem, modding, higher ceiling)

Ecosystem Notes:
- Fully closed: no sideloading, no mods, no emulation
- PSN subscription (PS Plus) required for online multiplayer
- Digital storefront only for digital titles
- No native Android or iOS integration
";

pub fn is_default_topic(topic: &str) -> bool {
    let normalized = topic.trim().to_lowercase();
    PS5_ALIASES.contains(&normalized.as_str())
}

fn generic_briefing(topic: &str) -> String {
    format!(
        "TOPIC: {topic}\n\n[No additional context found. Draw on your general knowledge about {topic}.]"
    )
}

#[derive(Deserialize)]
struct InstantAnswer {
    #[serde(rename = "AbstractText", default)]
    abstract_text: String,
    #[serde(rename = "Abstract", default)]
    abstract_fallback: String,
}

async fn instant_answer(topic: &str) -> Option<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(6))
        .build()
        .ok()?;
    let url = format!(
        "https://api.duckduckgo.com/?q={}&format=json&no_html=1&skip_disambig=1",
        urlencoding::encode(topic)
    );
    let answer: InstantAnswer = client.get(&url).send().await.ok()?.json().await.ok()?;
    let text = if answer.abstract_text.is_empty() {
        answer.abstract_fallback
    } else {
        answer.abstract_text
    };
    if text.is_empty() {
        None
    } else {
        Some(format!("TOPIC: {}\n\n{}", topic, text))
    }
}

/// Produce a briefing block for `topic`. Infallible: the worst case is the
/// generic fallback.
pub async fn fetch_topic_briefing(topic: &str) -> String {
    if is_default_topic(topic) {
        return PS5_BRIEFING.to_string();
    }
    info!("fetching context for '{}'", topic);
    match instant_answer(topic).await {
        Some(briefing) => briefing,
        None => {
            debug!("no instant answer for '{}', using generic briefing", topic);
            generic_briefing(topic)
        }
    }
}

/// Briefing for the default topic, without touching the network.
pub fn default_briefing() -> String {
    PS5_BRIEFING.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_match_case_insensitively() {
        assert!(is_default_topic("PS5"));
        assert!(is_default_topic("  PlayStation 5 "));
        assert!(is_default_topic("playstation"));
        assert!(!is_default_topic("xbox series x"));
    }

    #[test]
    fn generic_briefing_names_the_topic() {
        let briefing = generic_briefing("cast iron skillets");
        assert!(briefing.starts_with("TOPIC: cast iron skillets"));
        assert!(briefing.contains("general knowledge"));
    }
}
