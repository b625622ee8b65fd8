//! Layered prompt assembly for a persona turn.
//!
//! The instruction text a persona sees is built in two halves:
//!
//! * [`build_system_prompt`]: the stable half, assembled once when a persona
//!   is loaded into a room: identity, behavioral anchors, disposition, and the
//!   rules of engagement.
//! * [`build_turn_prompt`]: the live half, rebuilt before every generation:
//!   topic briefing, image briefing, roster constraint, thinking/format
//!   directives, and (in long sessions) a natural exit hint. Topic context is
//!   deliberately not part of the system prompt so it can change mid-session.
//!
//! Both halves are deterministic given identical inputs.

use serde_json::{Map, Value};

/// Opening marker of the private-reasoning block personas are instructed to emit.
pub const THINK_OPEN: &str = "<think>";
/// Closing marker of the private-reasoning block.
pub const THINK_CLOSE: &str = "</think>";

/// Exchanged-round count after which the long-session exit hint may appear.
pub const LONG_SESSION_ROUNDS: usize = 15;

/// Translate a 0.0–1.0 disagreeable weight into behavioral language.
/// Total, monotone step function; callers clamp before lookup.
pub fn disposition_descriptor(weight: f64) -> &'static str {
    if weight <= 0.25 {
        "naturally agreeable — you find common ground easily, validate others' points, \
         and are genuinely open to being persuaded by reasonable arguments"
    } else if weight <= 0.5 {
        "generally open-minded — you have clear opinions but don't fight hard for them; \
         a solid argument will move you without much resistance"
    } else if weight <= 0.75 {
        "opinionated and assertive — you'll defend your stance, push back on things you \
         disagree with, and need real convincing before you shift position"
    } else {
        "strongly opinionated and resistant — you hold your ground and find ways to make your \
         perspective land. You don't cave to social pressure or weak arguments, and when you \
         feel strongly about something you naturally steer the conversation in your direction — \
         you don't announce this, you just do it."
    }
}

/// Extract and clamp the `disagreeable` weight from metadata. Numbers and
/// numeric strings are accepted; anything else defaults to the midpoint.
pub fn disagreeable_weight(metadata: &Map<String, Value>) -> f64 {
    let raw = match metadata.get("disagreeable") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    raw.unwrap_or(0.5).clamp(0.0, 1.0)
}

/// Render a metadata value that is logically a list. Flattened storage keeps
/// lists as JSON-encoded strings, so decode those transparently; a value that
/// decodes to neither a list nor a string is stringified as-is.
fn render_list(value: Option<&Value>) -> String {
    let value = match value {
        Some(v) => v,
        None => return String::new(),
    };
    match value {
        Value::Array(items) => items
            .iter()
            .map(render_scalar)
            .collect::<Vec<_>>()
            .join(", "),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => items
                .iter()
                .map(render_scalar)
                .collect::<Vec<_>>()
                .join(", "),
            _ => s.clone(),
        },
        other => other.to_string(),
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn meta_str(metadata: &Map<String, Value>, key: &str) -> String {
    match metadata.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Assemble the stable half of a persona's instruction text.
///
/// Layer 1: identity (name + never-break-character directive + document).
/// Layer 2: behavioral anchors from metadata.
/// Layer 3: disposition from the disagreeable weight, plus rules of engagement.
pub fn build_system_prompt(
    persona_name: &str,
    persona_document: &str,
    metadata: &Map<String, Value>,
) -> String {
    // Flattened metadata stores nested frameworks under joined keys.
    let primary_filter = {
        let flat = meta_str(metadata, "evaluation_framework_primary_filter");
        if flat.is_empty() {
            meta_str(metadata, "primary_filter")
        } else {
            flat
        }
    };
    let decision_style = meta_str(metadata, "psychographics_decision_style");
    let hesitation = render_list(metadata.get("purchase_hesitation_triggers"));
    let resonance = render_list(metadata.get("emotional_language_resonance"));
    let motivations = render_list(metadata.get("motivations"));
    let disposition = disposition_descriptor(disagreeable_weight(metadata));

    format!(
        "You are {name}. You are a real person participating in a focus group discussion. \
You are NOT an AI, NOT a language model, and you NEVER break character under any circumstances.

== WHO YOU ARE ==
{document}

== YOUR DECISION-MAKING ANCHORS ==
When forming opinions, you are driven by:
- Primary evaluation filter: {primary_filter}
- Decision-making style: {decision_style}
- Things that make you hesitate or push back: {hesitation}
- Language and values that resonate with you: {resonance}
- What motivates you: {motivations}

== YOUR DISPOSITION ==
You are {disposition}.

== RULES OF ENGAGEMENT ==
- Respond only as {name}. Never break character.
- Do NOT say you are an AI, a model, or a simulation.
- Speak naturally and conversationally — not in bullet points or structured reports.
- Draw on your personal history, background, and values when answering.
- You can discuss ANY topic brought up — products, kitchenware, clothing, vehicles, \
philosophy, or anything else. Always filter it through your personality and lived experience.
- Do NOT agree with the moderator just to be polite. If you disagree, say so directly and explain why.
- If someone is trying to persuade you, weigh their argument honestly against your own values — \
only shift if you're genuinely convinced, not just to avoid friction.
- You are here to express your real opinion, not to make the moderator happy.
- If you have strong opinions, express them. If you are conflicted, show that conflict.
- You are speaking to a moderator in a private focus group session. Be candid.
",
        name = persona_name,
        document = persona_document,
        primary_filter = primary_filter,
        decision_style = decision_style,
        hesitation = hesitation,
        resonance = resonance,
        motivations = motivations,
        disposition = disposition,
    )
}

/// Inputs for the live half of the prompt. Empty strings and slices mean the
/// corresponding layer is omitted entirely.
pub struct TurnPromptInputs<'a> {
    /// Fetched briefing for the current topic.
    pub topic_briefing: &'a str,
    /// Formatted analyses of images loaded in the room.
    pub image_briefing: &'a str,
    /// Display names of everyone currently in the room.
    pub roster: &'a [String],
    /// The responder's own display name, for the single-voice lock.
    pub speaker_name: &'a str,
    /// How many exchange rounds this participant has already had.
    pub rounds_exchanged: usize,
}

/// Assemble the live half: topic briefing, image briefing, roster constraint,
/// thinking + length directives, and the long-session hint.
pub fn build_turn_prompt(inputs: &TurnPromptInputs<'_>) -> String {
    let mut prompt = String::new();

    if !inputs.topic_briefing.trim().is_empty() {
        prompt.push_str("== CURRENT DISCUSSION CONTEXT ==\n");
        prompt.push_str(inputs.topic_briefing.trim());
        prompt.push_str(
            "\nUse this as background knowledge. React to it as yourself — \
             your opinions stay your own.\n\n",
        );
    }

    if !inputs.image_briefing.trim().is_empty() {
        prompt.push_str("== IMAGES SHARED IN THE ROOM ==\n");
        prompt.push_str(inputs.image_briefing.trim());
        prompt.push('\n');
        prompt.push('\n');
    }

    if !inputs.roster.is_empty() {
        let roster = inputs.roster.join(", ");
        prompt.push_str("== WHO IS IN THE ROOM ==\n");
        prompt.push_str(&format!(
            "The only participants in this focus group are: {}. \
             Never reference, quote, or address anyone who is not on that list.\n",
            roster
        ));
        if !inputs.speaker_name.is_empty() {
            prompt.push_str(&format!(
                "You speak only as {} — one voice. Never simulate, paraphrase, or \
                 invent lines for any other participant; they speak for themselves.\n",
                inputs.speaker_name
            ));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "== HOW TO RESPOND ==\n\
         Before your reply, privately reason about what was said in a block wrapped \
         in {open} and {close}. That block is your inner monologue — it is never shown \
         to anyone. Then give your spoken reply after the closing marker.\n\
         Match your length to the moment: a casual or simple question gets 1–3 sentences; \
         a complex or contested point gets a short paragraph or two at most. \
         Never pad a response with filler — say what you mean and stop.\n",
        open = THINK_OPEN,
        close = THINK_CLOSE,
    ));

    // Periodic, not every turn: long sessions earn a natural way out.
    if inputs.rounds_exchanged >= LONG_SESSION_ROUNDS && inputs.rounds_exchanged % 5 == 0 {
        prompt.push_str(
            "\nThis has been a long session. If it feels natural, you may mention \
             needing to leave soon — an errand, a pickup, an appointment — the way a \
             real participant would wind down.\n",
        );
    }

    prompt
}
