//! End-of-session artifacts: the Markdown summary file and the terminal
//! exit brief.
//!
//! Both generations are auxiliary: a failed backend call degrades to a
//! placeholder (summary) or an empty string (brief) and never blocks exit.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use log::{info, warn};

use crate::focusroom::client_wrapper::{ClientWrapper, Message, Role};
use crate::focusroom::room::{TranscriptEntry, TranscriptKind};

fn plain_transcript(log: &[TranscriptEntry], include_system: bool) -> String {
    let mut lines = Vec::with_capacity(log.len());
    for entry in log {
        match entry.kind {
            TranscriptKind::Moderator => lines.push(format!("[Moderator]: {}", entry.content)),
            TranscriptKind::Participant => {
                lines.push(format!("[{}]: {}", entry.participant_name, entry.content))
            }
            TranscriptKind::System => {
                if include_system {
                    lines.push(format!("[System]: {}", entry.content));
                }
            }
        }
    }
    lines.join("\n")
}

fn participants_line(persona_names: &[String], fallback: &str) -> String {
    if persona_names.is_empty() {
        fallback.to_string()
    } else {
        persona_names.join(", ")
    }
}

/// Ask the backend for a 3-5 paragraph executive summary. A backend failure
/// returns a placeholder pointing at the raw log below it.
pub async fn generate_summary(
    client: &Arc<dyn ClientWrapper>,
    log: &[TranscriptEntry],
    persona_names: &[String],
    topic: &str,
    temperature: f32,
) -> String {
    if log.is_empty() {
        return "No conversation to summarize.".to_string();
    }

    let prompt = format!(
        "You are a focus group analyst. Below is a transcript of a focus group session about {topic}.\n\n\
         Participants: {participants}\n\n\
         Transcript:\n{transcript}\n\n\
         Write a concise executive summary (3-5 paragraphs) covering:\n\
         1. Key themes and opinions expressed\n\
         2. Points of agreement and disagreement between participants\n\
         3. Notable insights about {topic}\n\
         4. Overall sentiment\n\n\
         Be analytical and objective. Do not add any preamble. Start directly with the summary.\n",
        topic = topic,
        participants = participants_line(persona_names, "Unknown participants"),
        transcript = plain_transcript(log, true),
    );

    let messages = [Message {
        role: Role::Moderator,
        content: prompt,
    }];
    match client.send_message(&messages, temperature).await {
        Ok(reply) => reply.content.trim().to_string(),
        Err(e) => {
            warn!("summary generation failed: {}", e);
            format!(
                "[Summary generation failed: {}]\n\nRaw transcript available in chat log below.",
                e
            )
        }
    }
}

/// Assemble the full Markdown document: executive summary first, then the
/// complete chat log with private thoughts rendered as blockquotes.
pub fn build_markdown(summary: &str, log: &[TranscriptEntry]) -> String {
    let now = Local::now().format("%Y-%m-%d %H:%M:%S");
    let mut lines: Vec<String> = vec![
        "# Focus Group Session Summary".to_string(),
        format!("*Generated: {}*", now),
        String::new(),
        "---".to_string(),
        String::new(),
        "## Executive Summary".to_string(),
        String::new(),
        summary.to_string(),
        String::new(),
        "---".to_string(),
        String::new(),
        "## Full Chat Log".to_string(),
        String::new(),
    ];

    for entry in log {
        let ts = entry.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S");
        match entry.kind {
            TranscriptKind::System => {
                lines.push(format!("*[{}] ⚙ {}*", ts, entry.content));
                lines.push(String::new());
            }
            TranscriptKind::Moderator => {
                lines.push(format!("**[{}] Moderator:** {}", ts, entry.content));
                lines.push(String::new());
            }
            TranscriptKind::Participant => {
                lines.push(format!("**[{}] {}:**", ts, entry.participant_name));
                if !entry.thoughts.is_empty() {
                    lines.push(String::new());
                    lines.push(format!("> *💭 Thinking: {}*", entry.thoughts));
                }
                lines.push(String::new());
                lines.push(entry.content.clone());
                lines.push(String::new());
            }
        }
    }

    lines.join("\n")
}

/// Five terminal-friendly bullet insights printed on exit. Empty when the
/// session has fewer than two participant entries or the backend fails.
pub async fn generate_exit_brief(
    client: &Arc<dyn ClientWrapper>,
    log: &[TranscriptEntry],
    persona_names: &[String],
    temperature: f32,
) -> String {
    let participant_entries = log
        .iter()
        .filter(|e| e.kind == TranscriptKind::Participant)
        .count();
    if participant_entries < 2 {
        return String::new();
    }

    let prompt = format!(
        "You are a focus group analyst. The session below just ended.\n\n\
         Participants: {participants}\n\n\
         Transcript:\n{transcript}\n\n\
         Write exactly 5 bullet-point insights. Plain text, no markdown, no headers.\n\
         Each bullet starts with •, is a single sentence, and is under 20 words.\n\
         Cover: dominant sentiment, a consensus point, a key tension, one surprising insight, \
         one actionable takeaway.\n\
         Be specific to what was actually said. No generalities.\n\
         Do not add any preamble. Output only the 5 bullets.",
        participants = participants_line(persona_names, "participants"),
        transcript = plain_transcript(log, false),
    );

    let messages = [Message {
        role: Role::Moderator,
        content: prompt,
    }];
    match client.send_message(&messages, temperature).await {
        Ok(reply) => reply.content.trim().to_string(),
        Err(e) => {
            warn!("exit brief generation failed: {}", e);
            String::new()
        }
    }
}

/// Generate the summary, build the Markdown, and write it to `dir` as
/// `chat_YYYYMMDD_HHMMSS.md`. Returns the written path.
pub async fn save_chat_summary(
    client: &Arc<dyn ClientWrapper>,
    log: &[TranscriptEntry],
    persona_names: &[String],
    topic: &str,
    temperature: f32,
    dir: &Path,
) -> Result<PathBuf, Box<dyn Error>> {
    fs::create_dir_all(dir)?;
    let filename = format!("chat_{}.md", Local::now().format("%Y%m%d_%H%M%S"));
    let path = dir.join(filename);

    let summary = generate_summary(client, log, persona_names, topic, temperature).await;
    let content = build_markdown(&summary, log);
    fs::write(&path, content)?;
    info!("session summary written to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> Vec<TranscriptEntry> {
        vec![
            TranscriptEntry::system("Lena joined the room"),
            TranscriptEntry::moderator("What do you think of the price?"),
            TranscriptEntry::participant("1", "Lena", "it feels steep", "Too expensive for me."),
            TranscriptEntry::participant("2", "Marcus", "", "I'd pay it for the exclusives."),
        ]
    }

    #[test]
    fn markdown_puts_summary_before_the_log() {
        let md = build_markdown("Everyone argued about price.", &sample_log());
        let summary_at = md.find("## Executive Summary").unwrap();
        let log_at = md.find("## Full Chat Log").unwrap();
        assert!(md.starts_with("# Focus Group Session Summary"));
        assert!(summary_at < log_at);
        assert!(md.contains("**[")); // timestamped speaker lines
        assert!(md.contains("⚙ Lena joined the room"));
    }

    #[test]
    fn thoughts_render_as_blockquotes_only_when_present() {
        let md = build_markdown("s", &sample_log());
        assert!(md.contains("> *💭 Thinking: it feels steep*"));
        // Marcus had no thoughts; exactly one thinking line in the log.
        assert_eq!(md.matches("💭").count(), 1);
    }

    #[test]
    fn transcript_flattening_labels_speakers() {
        let text = plain_transcript(&sample_log(), true);
        assert!(text.contains("[Moderator]: What do you think of the price?"));
        assert!(text.contains("[Lena]: Too expensive for me."));
        assert!(text.contains("[System]: Lena joined the room"));
        let without_system = plain_transcript(&sample_log(), false);
        assert!(!without_system.contains("[System]"));
    }
}
