//! Command routing for moderator input.
//!
//! Classification is a pure function of the raw line plus the current alias
//! table (`@name` → participant key). The alias table changes every time a
//! participant joins or leaves, so callers rebuild it before each parse
//! instead of holding onto an old one.

use std::collections::HashMap;

/// One classified moderator input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `!exit` / `!quit`: end the session (summary written downstream).
    Exit,
    /// `!reset` / `!clear`: wipe per-persona conversation history. The shared
    /// transcript is kept so the session summary still covers the whole run.
    Reset,
    /// `!help` / `!commands` / `!?`.
    Help,
    /// `!observe ["seed topic"] [rounds]`.
    Observe {
        seed: Option<String>,
        rounds: Option<usize>,
    },
    /// `!focus @name`, resolved to a participant key.
    Focus { key: String },
    /// Bare `!focus`.
    Unfocus,
    /// `!add @name`, resolved to a participant key.
    Add { key: String },
    /// `!kick @name`, resolved to a participant key.
    Kick { key: String },
    /// `!topic <text>`.
    TopicSet { text: String },
    /// Bare `!topic`.
    TopicClear,
    /// `!image <path-or-url>`.
    ImageLoad { source: String },
    /// `!image clear`.
    ImageClear,
    /// `!images`.
    ImageList,
    UnknownAdd { name: String },
    UnknownKick { name: String },
    UnknownFocus { name: String },
    /// Input close to a known command; payload is the suggested form.
    DidYouMean { suggestion: String },
    /// Recognized verb, unusable arguments; payload is shown verbatim.
    UsageHint { text: String },
    /// Plain utterance addressed to the room.
    None,
}

/// Classify one raw input line. Total: every string maps to a variant.
pub fn parse(raw: &str, mention_map: &HashMap<String, String>) -> Command {
    let line = raw.trim();
    let lower = line.to_lowercase();

    if lower == "exit" || lower == "quit" {
        return Command::DidYouMean {
            suggestion: "!exit".to_string(),
        };
    }
    if !line.starts_with('!') {
        return Command::None;
    }

    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((v, r)) => (v.to_lowercase(), r.trim()),
        None => (lower.clone(), ""),
    };

    match verb.as_str() {
        "!exit" | "!quit" => Command::Exit,
        "!reset" | "!clear" => Command::Reset,
        "!help" | "!commands" | "!?" => Command::Help,
        "!observe" => parse_observe(rest),
        "!focus" => {
            if rest.is_empty() {
                Command::Unfocus
            } else {
                match resolve_mention(rest, mention_map) {
                    Resolved::Key(key) => Command::Focus { key },
                    Resolved::Unknown(name) => Command::UnknownFocus { name },
                    Resolved::NoAt(_) | Resolved::Empty => Command::UsageHint {
                        text: "Usage: !focus @name (or !focus to clear)".to_string(),
                    },
                }
            }
        }
        "!topic" => {
            if rest.is_empty() {
                Command::TopicClear
            } else {
                Command::TopicSet {
                    text: rest.to_string(),
                }
            }
        }
        "!add" => match resolve_mention(rest, mention_map) {
            Resolved::Key(key) => Command::Add { key },
            Resolved::Unknown(name) => Command::UnknownAdd { name },
            Resolved::NoAt(name) => Command::DidYouMean {
                suggestion: format!("!add @{}", name),
            },
            Resolved::Empty => Command::UsageHint {
                text: "Usage: !add @name".to_string(),
            },
        },
        "!kick" => match resolve_mention(rest, mention_map) {
            Resolved::Key(key) => Command::Kick { key },
            Resolved::Unknown(name) => Command::UnknownKick { name },
            Resolved::NoAt(name) => Command::DidYouMean {
                suggestion: format!("!kick @{}", name),
            },
            Resolved::Empty => Command::UsageHint {
                text: "Usage: !kick @name".to_string(),
            },
        },
        "!image" => {
            if rest.is_empty() {
                Command::UsageHint {
                    text: "Usage: !image <path-or-url> (or !image clear)".to_string(),
                }
            } else if rest.eq_ignore_ascii_case("clear") {
                Command::ImageClear
            } else {
                Command::ImageLoad {
                    source: strip_quotes(rest).to_string(),
                }
            }
        }
        "!images" => Command::ImageList,
        _ => Command::None,
    }
}

/// `!observe` arguments: an optional first double-quoted substring as the seed
/// topic and an optional trailing integer round count (at least 1). Anything
/// unusable in either slot is simply ignored.
fn parse_observe(rest: &str) -> Command {
    let mut seed = None;
    let mut remainder = rest;
    if let Some(open) = rest.find('"') {
        if let Some(close_rel) = rest[open + 1..].find('"') {
            let close = open + 1 + close_rel;
            let quoted = rest[open + 1..close].trim();
            if !quoted.is_empty() {
                seed = Some(quoted.to_string());
            }
            remainder = &rest[close + 1..];
        }
    }
    let rounds = remainder
        .split_whitespace()
        .last()
        .and_then(|tok| tok.parse::<usize>().ok())
        .filter(|&n| n >= 1);
    Command::Observe { seed, rounds }
}

enum Resolved {
    Key(String),
    Unknown(String),
    NoAt(String),
    Empty,
}

fn resolve_mention(arg: &str, mention_map: &HashMap<String, String>) -> Resolved {
    let name = arg.split_whitespace().next().unwrap_or("");
    if name.is_empty() {
        return Resolved::Empty;
    }
    if !name.starts_with('@') {
        return Resolved::NoAt(name.trim_start_matches('@').to_string());
    }
    let wanted = name.to_lowercase();
    for (mention, key) in mention_map {
        if mention.to_lowercase() == wanted {
            return Resolved::Key(key.clone());
        }
    }
    Resolved::Unknown(name.trim_start_matches('@').to_string())
}

/// Strip one layer of matching surrounding quotes, if present.
fn strip_quotes(s: &str) -> &str {
    let b = s.as_bytes();
    if b.len() >= 2 && (b[0] == b'"' || b[0] == b'\'') && b[b.len() - 1] == b[0] {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(m, k)| (m.to_string(), k.to_string()))
            .collect()
    }

    #[test]
    fn plain_text_is_an_utterance() {
        assert_eq!(parse("hello", &HashMap::new()), Command::None);
        assert_eq!(parse("!unknownverb stuff", &HashMap::new()), Command::None);
    }

    #[test]
    fn bare_exit_gets_a_suggestion() {
        assert_eq!(
            parse("exit", &HashMap::new()),
            Command::DidYouMean {
                suggestion: "!exit".to_string()
            }
        );
        assert_eq!(parse("!exit", &HashMap::new()), Command::Exit);
        assert_eq!(parse("!QUIT", &HashMap::new()), Command::Exit);
    }

    #[test]
    fn observe_parses_seed_and_rounds() {
        assert_eq!(
            parse("!observe \"best console ever\" 5", &HashMap::new()),
            Command::Observe {
                seed: Some("best console ever".to_string()),
                rounds: Some(5),
            }
        );
        assert_eq!(
            parse("!observe", &HashMap::new()),
            Command::Observe {
                seed: None,
                rounds: None
            }
        );
        assert_eq!(
            parse("!observe 0", &HashMap::new()),
            Command::Observe {
                seed: None,
                rounds: None
            }
        );
    }

    #[test]
    fn focus_resolves_case_insensitively() {
        let map = aliases(&[("@lena", "1")]);
        assert_eq!(
            parse("!focus @Lena", &map),
            Command::Focus {
                key: "1".to_string()
            }
        );
        assert_eq!(
            parse("!focus @lena", &HashMap::new()),
            Command::UnknownFocus {
                name: "lena".to_string()
            }
        );
        assert_eq!(parse("!focus", &map), Command::Unfocus);
    }

    #[test]
    fn add_without_at_suggests_the_mention_form() {
        let map = aliases(&[("@marcus", "2")]);
        assert_eq!(
            parse("!add marcus", &map),
            Command::DidYouMean {
                suggestion: "!add @marcus".to_string()
            }
        );
        assert!(matches!(parse("!add", &map), Command::UsageHint { .. }));
        assert!(matches!(parse("!kick", &map), Command::UsageHint { .. }));
    }

    #[test]
    fn image_strips_one_quote_layer() {
        assert_eq!(
            parse("!image \"/tmp/ad banner.png\"", &HashMap::new()),
            Command::ImageLoad {
                source: "/tmp/ad banner.png".to_string()
            }
        );
        assert_eq!(parse("!image clear", &HashMap::new()), Command::ImageClear);
        assert_eq!(parse("!images", &HashMap::new()), Command::ImageList);
        assert!(matches!(
            parse("!image", &HashMap::new()),
            Command::UsageHint { .. }
        ));
    }

    #[test]
    fn topic_bare_clears_and_text_sets() {
        assert_eq!(parse("!topic", &HashMap::new()), Command::TopicClear);
        assert_eq!(
            parse("!topic about espresso machines ", &HashMap::new()),
            Command::TopicSet {
                text: "about espresso machines".to_string()
            }
        );
    }
}
