//! Terminal entry point: the focus-group room.
//!
//! The moderator types into a REPL; `!`-prefixed commands manage the room and
//! everything else goes to the active personas. Replies stream token by token
//! with private reasoning withheld from the live view.

use std::collections::HashMap;
use std::error::Error;
use std::io::{self, Write as _};
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::debug;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use focusroom::{
    command::{self, Command},
    image_analysis::{self, ImageService, OllamaVisionAnalyzer},
    observe::{self, ObserveEvent, ObserveOptions},
    prompt, summary, topic, ClientWrapper, FileDirectory, FileHistoryStore, HistoryStore,
    ImageRef, OllamaClient, PersonaContext, PersonaDirectory, PersonaRegistry, RegistryEntry,
    RoomConfig, RoomState, TranscriptEntry, TurnEngine,
};

const COLOUR_CYCLE: [&str; 7] = [
    "\x1b[96m", "\x1b[93m", "\x1b[95m", "\x1b[92m", "\x1b[94m", "\x1b[91m", "\x1b[97m",
];
const THINK_COLOUR: &str = "\x1b[90m";
const SYSTEM_COLOUR: &str = "\x1b[2;37m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

fn divider() -> String {
    "─".repeat(60)
}

fn persona_colour(key: &str) -> &'static str {
    match key.parse::<usize>() {
        Ok(n) if n >= 1 => COLOUR_CYCLE[(n - 1) % COLOUR_CYCLE.len()],
        _ => "\x1b[97m",
    }
}

fn cprintln(colour: &str, text: &str) {
    println!("{}{}{}", colour, text, RESET);
}

fn print_banner() {
    println!("\n{}", "=".repeat(60));
    println!("  FOCUS GROUP SIMULATION  —  Room Mode");
    println!("{}", "=".repeat(60));
    cprintln(
        SYSTEM_COLOUR,
        "  !add @name  !kick @name  !observe  !focus @name  !topic [text]  !clear  !exit  !help",
    );
    println!();
}

fn print_help() {
    let lines = [
        divider(),
        "  Room Commands".to_string(),
        divider(),
        "  !add @name           Add a persona to the room".to_string(),
        "  !kick @name          Remove a persona from the room".to_string(),
        "  !observe             Watch personas discuss (3 rounds by default)".to_string(),
        "  !observe \"topic\"     Observe with a specific seed topic".to_string(),
        "  !observe [n]         Observe for n rounds".to_string(),
        "  !focus @name         Direct questions to one persona only".to_string(),
        "  !focus               Clear focus — all personas respond again".to_string(),
        "  !topic [text]        Change the discussion topic mid-session".to_string(),
        "  !topic               Reset to the default topic".to_string(),
        "  !image <path>        Share an ad image — all personas react in character".to_string(),
        "  !images              List all images currently loaded in the room".to_string(),
        "  !image clear         Remove all shared images from the room".to_string(),
        "  !reset / !clear      Wipe conversation history for all personas".to_string(),
        "  !exit                Close the room and save a Markdown summary".to_string(),
        "  !help                Show this help".to_string(),
        divider(),
    ];
    for line in &lines {
        cprintln(SYSTEM_COLOUR, line);
    }
}

fn print_hints() {
    cprintln(
        THINK_COLOUR,
        "\n  !observe [\"topic\"] [rounds]  ·  !focus @name  ·  !focus  ·  !add @name  ·  \
         !kick @name  ·  !topic [text]  ·  !image <path>  ·  !images  ·  !clear  ·  !exit  ·  !help",
    );
}

fn read_line(label: &str) -> Option<String> {
    print!("{}", label);
    io::stdout().flush().ok()?;
    let mut buf = String::new();
    match io::stdin().read_line(&mut buf) {
        Ok(0) => None,
        Ok(_) => Some(buf.trim().to_string()),
        Err(_) => None,
    }
}

/// Seed the two shipped personas into the directory if they are not there
/// yet, so a fresh checkout works with no setup step.
async fn seed_builtin_personas(directory: &dyn PersonaDirectory) -> Result<(), Box<dyn Error>> {
    let builtin = [
        (
            "persona_german_transfer_student_23",
            "Lena is a 23-year-old German transfer student in her final year of a media \
             design degree, living in a shared flat and budgeting carefully. She grew up \
             playing split-screen games with her brother and still values gaming as social \
             time, but every large purchase competes with rent, travel home, and software \
             subscriptions. She researches obsessively before buying anything over 100 euros, \
             reads independent reviews rather than influencer content, and resents artificial \
             urgency. She is direct in the northern German way: warm once engaged, blunt when \
             something smells like marketing.",
            json!({
                "age": 23,
                "occupation": "media design student",
                "disagreeable": 0.35,
                "psychographics_decision_style": "research-heavy, slow, comparison-driven",
                "evaluation_framework_primary_filter": "price-to-longevity ratio",
                "purchase_hesitation_triggers": "[\"artificial urgency\",\"subscription lock-in\",\"hype without reviews\"]",
                "emotional_language_resonance": "[\"fair\",\"honest\",\"built to last\"]",
                "motivations": "[\"social gaming with friends\",\"value for money\",\"independence\"]"
            }),
        ),
        (
            "persona_designer_dad_38_refined",
            "Marcus is a 38-year-old senior product designer and father of two in a \
             dual-income household. He has disposable income but almost no free time, so he \
             buys things that reduce friction: premium if it saves minutes, never premium for \
             its own sake. He games maybe four hours a week after the kids sleep and cares \
             about exclusives he can finish in short sessions. Professionally he dissects \
             visual design for a living, so advertising aimed at him tends to backfire when \
             it is sloppy. He is confident, a little contrarian, and enjoys being the person \
             in the room who names the trade-off everyone else is dancing around.",
            json!({
                "age": 38,
                "occupation": "senior product designer",
                "disagreeable": 0.7,
                "psychographics_decision_style": "fast, heuristic, time-cost weighted",
                "evaluation_framework_primary_filter": "time saved per euro spent",
                "purchase_hesitation_triggers": "[\"setup overhead\",\"clutter\",\"features he will never use\"]",
                "emotional_language_resonance": "[\"effortless\",\"considered\",\"well made\"]",
                "motivations": "[\"family time\",\"craft appreciation\",\"small daily wins\"]"
            }),
        ),
    ];

    for (id, document, metadata) in builtin {
        if directory.get(id).await.is_ok() {
            continue;
        }
        let meta = metadata.as_object().cloned().unwrap_or_default();
        directory.upsert(id, document, &meta).await?;
        debug!("seeded persona {}", id);
    }
    Ok(())
}

async fn load_persona_context(
    key: &str,
    entry: &RegistryEntry,
    directory: &dyn PersonaDirectory,
    history_store: &dyn HistoryStore,
) -> Result<PersonaContext, Box<dyn Error>> {
    let record = directory.get(&entry.persona_id).await?;
    let system_prompt =
        prompt::build_system_prompt(&entry.name, &record.document, &record.metadata);
    let history = history_store.load(&entry.history_key).await?;
    Ok(PersonaContext::new(
        key,
        &entry.name,
        &entry.history_key,
        system_prompt,
        history,
    ))
}

/// Owns the process Ctrl+C handler for the whole session.
///
/// Each interruptible operation arms a fresh token; an interrupt cancels
/// whichever token is currently armed. The close path never arms one, so
/// summary generation and the final file write run to completion even if the
/// moderator keeps pressing Ctrl+C.
struct InterruptWatcher {
    armed: Arc<Mutex<CancellationToken>>,
}

impl InterruptWatcher {
    fn spawn() -> Self {
        let armed = Arc::new(Mutex::new(CancellationToken::new()));
        let shared = Arc::clone(&armed);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                shared.lock().unwrap().cancel();
            }
        });
        InterruptWatcher { armed }
    }

    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.armed.lock().unwrap() = token.clone();
        token
    }
}

fn print_persona_menu(registry: &PersonaRegistry) {
    let full = registry.full_registry();
    cprintln(
        SYSTEM_COLOUR,
        "\n── Select personas ──────────────────────────────────────",
    );
    cprintln(BOLD, "  DEFAULT PERSONAS:");
    for key in PersonaRegistry::builtin_keys() {
        if let Some(entry) = full.get(key) {
            println!("  {}. {}", key, entry.name);
            if !entry.brief.is_empty() {
                cprintln(DIM, &format!("     {}", entry.brief));
            }
        }
    }
    let custom: Vec<_> = full
        .iter()
        .filter(|(k, _)| !PersonaRegistry::builtin_keys().contains(&k.as_str()))
        .collect();
    if !custom.is_empty() {
        cprintln(BOLD, "\n  YOUR PERSONAS:");
        for (key, entry) in custom {
            println!("  {}. {}", key, entry.name);
            if !entry.brief.is_empty() {
                cprintln(DIM, &format!("     {}", entry.brief));
            }
        }
    }
    println!();
    cprintln(SYSTEM_COLOUR, "  Q  — Quit");
    cprintln(
        SYSTEM_COLOUR,
        "\n  Enter numbers to start room (e.g. '1 2'),\n  or a single custom number to manage it:",
    );
}

/// Chat / Delete / Back for a saved custom persona. Returns true to chat.
fn manage_custom_persona(registry: &PersonaRegistry, key: &str, name: &str) -> bool {
    loop {
        cprintln(SYSTEM_COLOUR, &format!("\n{}", divider()));
        cprintln(BOLD, &format!("  {}", name));
        cprintln(SYSTEM_COLOUR, &divider());
        cprintln(SYSTEM_COLOUR, "  1. Chat");
        cprintln(SYSTEM_COLOUR, "  2. Delete");
        cprintln(SYSTEM_COLOUR, "  3. Back");
        let choice = match read_line("\n> ") {
            Some(c) => c,
            None => return false,
        };
        match choice.as_str() {
            "1" => return true,
            "2" => {
                let confirm = read_line(&format!(
                    "Delete {}? This cannot be undone. (y/n): ",
                    name
                ))
                .unwrap_or_default();
                if confirm.eq_ignore_ascii_case("y") {
                    match registry.delete_custom_persona(key) {
                        Ok(_) => cprintln(SYSTEM_COLOUR, &format!("[{} deleted.]", name)),
                        Err(e) => cprintln(SYSTEM_COLOUR, &format!("[Delete failed: {}]", e)),
                    }
                    return false;
                }
            }
            "3" => return false,
            _ => cprintln(SYSTEM_COLOUR, "[Enter 1-3]"),
        }
    }
}

/// Persona selection loop. Returns the chosen keys, or None when quitting.
fn choose_initial_personas(registry: &PersonaRegistry) -> Option<Vec<String>> {
    loop {
        let full = registry.full_registry();
        print_persona_menu(registry);
        let raw = read_line("\n> ")?;
        if raw.is_empty() {
            continue;
        }
        if raw.eq_ignore_ascii_case("q") || raw.eq_ignore_ascii_case("quit") {
            return None;
        }
        let valid: Vec<String> = raw
            .split_whitespace()
            .filter(|p| full.contains_key(*p))
            .map(|p| p.to_string())
            .collect();
        if valid.is_empty() {
            cprintln(SYSTEM_COLOUR, "[No valid persona numbers. Try again.]");
            continue;
        }
        if valid.len() == 1 && !PersonaRegistry::builtin_keys().contains(&valid[0].as_str()) {
            let name = full.get(&valid[0]).map(|e| e.name.clone()).unwrap_or_default();
            if manage_custom_persona(registry, &valid[0], &name) {
                return Some(valid);
            }
            continue;
        }
        return Some(valid);
    }
}

async fn prompt_topic() -> (String, String) {
    cprintln(SYSTEM_COLOUR, &format!("\n{}", divider()));
    cprintln(
        SYSTEM_COLOUR,
        "  Discussion topic (press Enter for PlayStation 5):",
    );
    cprintln(
        SYSTEM_COLOUR,
        "  Examples: Nike Air Max · Miele espresso machines · Stoic philosophy",
    );
    let raw = read_line(&format!("\n{}Topic{} > ", DIM, RESET)).unwrap_or_default();
    let chosen = if raw.is_empty() {
        topic::DEFAULT_TOPIC.to_string()
    } else {
        raw
    };
    let briefing = topic::fetch_topic_briefing(&chosen).await;
    (chosen, briefing)
}

fn image_briefing_for(state: &RoomState, loaded: &HashMap<String, image_analysis::LoadedImage>) -> String {
    let images: Vec<_> = state
        .images
        .iter()
        .filter_map(|r| loaded.get(&r.hash).cloned())
        .collect();
    image_analysis::format_for_personas(&images)
}

fn load_image_into_room(
    state: RoomState,
    loaded: &mut HashMap<String, image_analysis::LoadedImage>,
    result: Result<(image_analysis::LoadedImage, bool), image_analysis::ImageError>,
) -> RoomState {
    match result {
        Ok((image, cached)) => {
            let filename = image.filename.clone();
            let next = state.add_image(ImageRef {
                filename: image.filename.clone(),
                hash: image.hash.clone(),
            });
            loaded.insert(image.hash.clone(), image);
            let status = if cached { "cached" } else { "analyzed" };
            cprintln(
                SYSTEM_COLOUR,
                &format!(
                    "[Image {} ({} image{} in room) — all personas are now briefed on: {}]",
                    status,
                    next.images.len(),
                    if next.images.len() == 1 { "" } else { "s" },
                    filename
                ),
            );
            next.append_transcript(TranscriptEntry::system(format!(
                "Image loaded: {}",
                filename
            )))
        }
        Err(e) => {
            cprintln(SYSTEM_COLOUR, &format!("[{}]", e));
            state
        }
    }
}

fn observe_sink() -> impl FnMut(ObserveEvent<'_>) + Send {
    move |event| match event {
        ObserveEvent::TurnStarted { key, name, round } => {
            if round > 0 {
                println!("{}[{} is thinking... (round {})]{}", DIM, name, round, RESET);
            } else {
                println!("{}[{} is wrapping up...]{}", DIM, name, RESET);
            }
            print!("{}{}{}:{} ", persona_colour(key), BOLD, name, RESET);
            let _ = io::stdout().flush();
        }
        ObserveEvent::Token { text } => {
            print!("{}", text);
            let _ = io::stdout().flush();
        }
        ObserveEvent::TurnFinished { thoughts, .. } => {
            println!();
            if !thoughts.is_empty() {
                cprintln(THINK_COLOUR, &format!("  💭 {}", thoughts));
            }
            cprintln(SYSTEM_COLOUR, &divider());
        }
        ObserveEvent::SynthesisStarted => {
            cprintln(SYSTEM_COLOUR, "\n[Final synthesis round]");
        }
        ObserveEvent::Note { text } => {
            cprintln(SYSTEM_COLOUR, &format!("[{}]", text));
        }
    }
}

/// One conversational turn for every responder, streaming replies. A turn in
/// flight when `cancel` fires is dropped before its persist step.
async fn respond_to_moderator(
    mut state: RoomState,
    engine: &TurnEngine,
    input: &str,
    image_briefing: &str,
    cancel: &CancellationToken,
) -> RoomState {
    let roster = state.roster_names();
    for key in state.responders() {
        let mut ctx = match state.personas.get(&key).cloned() {
            Some(ctx) => ctx,
            None => continue,
        };
        let colour = persona_colour(&key);
        println!("\n{}[{} is thinking...]{}", DIM, ctx.name, RESET);
        print!("{}{}{}:{} ", colour, BOLD, ctx.name, RESET);
        let _ = io::stdout().flush();

        let mut on_token = |tok: &str| {
            print!("{}", tok);
            let _ = io::stdout().flush();
        };
        let topic_briefing = state.topic_briefing.clone();
        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            res = engine.take_turn(
                &mut ctx,
                input,
                false,
                &roster,
                &topic_briefing,
                image_briefing,
                Some(&mut on_token),
            ) => Some(res),
        };
        println!();
        let result = match result {
            None => {
                cprintln(SYSTEM_COLOUR, "[Interrupted.]");
                break;
            }
            Some(res) => res,
        };
        match result {
            Ok(turn) => {
                if !turn.thoughts.is_empty() {
                    cprintln(THINK_COLOUR, &format!("  💭 {}", turn.thoughts));
                }
                cprintln(SYSTEM_COLOUR, &divider());
                let name = ctx.name.clone();
                state = state
                    .insert_persona(ctx)
                    .append_transcript(TranscriptEntry::participant(
                        &key,
                        &name,
                        &turn.thoughts,
                        &turn.reply,
                    ));
            }
            Err(e) => {
                cprintln(SYSTEM_COLOUR, &format!("[{} could not respond: {}]", ctx.name, e));
            }
        }
    }
    state
}

async fn close_room(
    state: &RoomState,
    client: &Arc<dyn ClientWrapper>,
    config: &RoomConfig,
) {
    cprintln(SYSTEM_COLOUR, "\n[Closing room...]");
    let names = state.roster_names();
    if state.transcript.is_empty() {
        cprintln(SYSTEM_COLOUR, "[No conversation to save.]");
    } else {
        let brief = summary::generate_exit_brief(
            client,
            &state.transcript,
            &names,
            config.summary_temperature,
        )
        .await;
        if !brief.is_empty() {
            cprintln(SYSTEM_COLOUR, &format!("\n{}\n{}\n{}", divider(), brief, divider()));
        }
        cprintln(SYSTEM_COLOUR, "[Generating summary, please wait...]");
        match summary::save_chat_summary(
            client,
            &state.transcript,
            &names,
            &state.topic,
            config.summary_temperature,
            &config.summaries_dir,
        )
        .await
        {
            Ok(path) => cprintln(
                SYSTEM_COLOUR,
                &format!("[Summary saved to: {}]", path.display()),
            ),
            Err(e) => cprintln(SYSTEM_COLOUR, &format!("[Could not save summary: {}]", e)),
        }
    }
    cprintln(SYSTEM_COLOUR, "[Room closed. Goodbye.]\n");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    focusroom::init_logger();
    let config = RoomConfig::from_env();
    let interrupts = InterruptWatcher::spawn();

    print_banner();

    let client: Arc<dyn ClientWrapper> =
        Arc::new(OllamaClient::new(&config.base_url, &config.model));
    let history_store = Arc::new(FileHistoryStore::new(
        &config.history_dir,
        config.history_ttl_secs,
    )?);
    let directory = FileDirectory::new(&config.personas_dir.join("db"))?;
    seed_builtin_personas(&directory).await?;
    let registry = PersonaRegistry::new(&config.personas_dir);
    let engine = TurnEngine::new(
        Arc::clone(&client),
        history_store.clone() as Arc<dyn HistoryStore>,
        config.chat_temperature,
        config.observe_temperature,
    );
    let vision = OllamaClient::new_with_api_key(
        &config.vision_base_url,
        &config.vision_model,
        &config.vision_api_key,
    );
    let image_service = ImageService::new(
        Box::new(OllamaVisionAnalyzer::new(vision)),
        &config.image_cache_dir,
        config.image_ttl_secs,
    );
    let mut loaded_images: HashMap<String, image_analysis::LoadedImage> = HashMap::new();

    let initial_keys = match choose_initial_personas(&registry) {
        Some(keys) => keys,
        None => return Ok(()),
    };
    let (chosen_topic, briefing) = prompt_topic().await;

    let mut state = RoomState::new().set_topic(&chosen_topic, &briefing);
    for key in &initial_keys {
        let full = registry.full_registry();
        let entry = match full.get(key) {
            Some(entry) => entry.clone(),
            None => continue,
        };
        cprintln(SYSTEM_COLOUR, &format!("[Loading {}...]", entry.name));
        match load_persona_context(key, &entry, &directory, history_store.as_ref()).await {
            Ok(ctx) => state = state.add(key).insert_persona(ctx),
            Err(e) => cprintln(SYSTEM_COLOUR, &format!("[Could not load {}: {}]", entry.name, e)),
        }
    }

    cprintln(SYSTEM_COLOUR, &format!("\n{}", divider()));
    cprintln(
        SYSTEM_COLOUR,
        &format!("  Room: {} ready", state.roster_names().join(", ")),
    );
    cprintln(SYSTEM_COLOUR, &format!("  Topic: {}", state.topic));
    cprintln(SYSTEM_COLOUR, &format!("{}\n", divider()));

    loop {
        // Aliases change as personas join and leave.
        let mention_map = registry.mention_map();

        let label = if !state.focus.is_empty() && state.personas.contains_key(&state.focus) {
            format!("{}You → {}{}", BOLD, state.display_name(&state.focus), RESET)
        } else {
            format!("{}You → [{}]{}", BOLD, state.roster_names().join(", "), RESET)
        };
        let mut input = match read_line(&format!("\n{}: ", label)) {
            Some(line) => line,
            None => "!exit".to_string(),
        };
        if input.is_empty() {
            continue;
        }

        match command::parse(&input, &mention_map) {
            Command::Exit => {
                close_room(&state, &client, &config).await;
                return Ok(());
            }
            Command::Reset => {
                for key in state.active.clone() {
                    if let Some(ctx) = state.personas.get(&key) {
                        if let Err(e) = history_store.delete(&ctx.history_key).await {
                            cprintln(SYSTEM_COLOUR, &format!("[Reset failed for {}: {}]", ctx.name, e));
                        }
                    }
                    state = state.update_history(&key, Vec::new());
                }
                cprintln(SYSTEM_COLOUR, "[Memory cleared — all personas reset to default.]");
                continue;
            }
            Command::Help => {
                print_help();
                continue;
            }
            Command::Observe { seed, rounds } => {
                let opts = ObserveOptions {
                    seed_topic: seed.clone(),
                    rounds,
                };
                let rounds_shown = rounds.unwrap_or(observe::DEFAULT_OBSERVE_ROUNDS);
                let note = format!(
                    "Observing ({} round{}){}.",
                    rounds_shown,
                    if rounds_shown == 1 { "" } else { "s" },
                    seed.as_deref()
                        .map(|s| format!(": {}", s))
                        .unwrap_or_default()
                );
                cprintln(SYSTEM_COLOUR, &format!("\n{}", divider()));
                cprintln(
                    SYSTEM_COLOUR,
                    &format!("  [Observing for {} round{} — Ctrl+C to stop early]",
                        rounds_shown,
                        if rounds_shown == 1 { "" } else { "s" }),
                );
                cprintln(SYSTEM_COLOUR, &format!("{}\n", divider()));

                let cancel = interrupts.arm();
                let with_note = state.append_transcript(TranscriptEntry::system(note));
                let image_briefing = image_briefing_for(&with_note, &loaded_images);
                let mut sink = observe_sink();
                match observe::run_observe(
                    &with_note,
                    &engine,
                    &opts,
                    &image_briefing,
                    &cancel,
                    &mut sink,
                )
                .await
                {
                    Ok((next, outcome)) => {
                        state = next;
                        if outcome.interrupted {
                            cprintln(SYSTEM_COLOUR, "\n[Observation stopped.]");
                        }
                    }
                    Err(e) => cprintln(SYSTEM_COLOUR, &format!("[{}]", e)),
                }
                print_hints();
                continue;
            }
            Command::Focus { key } => {
                if !state.active.contains(&key) {
                    cprintln(
                        SYSTEM_COLOUR,
                        &format!("[{} is not in the room. Use !add first.]", state.display_name(&key)),
                    );
                } else {
                    state = state.set_focus(&key);
                    let others: Vec<String> = state
                        .active
                        .iter()
                        .filter(|k| **k != key)
                        .map(|k| state.display_name(k))
                        .collect();
                    let observing = if others.is_empty() {
                        String::new()
                    } else {
                        format!(
                            " ({} {} observing)",
                            others.join(", "),
                            if others.len() == 1 { "is" } else { "are" }
                        )
                    };
                    cprintln(
                        SYSTEM_COLOUR,
                        &format!("[Focused on {}{}.]", state.display_name(&key), observing),
                    );
                }
                continue;
            }
            Command::Unfocus => {
                state = state.clear_focus();
                cprintln(SYSTEM_COLOUR, "[Focus cleared — all active personas will respond.]");
                continue;
            }
            Command::Add { key } => {
                if state.active.contains(&key) {
                    cprintln(
                        SYSTEM_COLOUR,
                        &format!("[{} is already in the room.]", state.display_name(&key)),
                    );
                    continue;
                }
                let full = registry.full_registry();
                let entry = match full.get(&key) {
                    Some(entry) => entry.clone(),
                    None => {
                        cprintln(SYSTEM_COLOUR, "[Unknown persona key.]");
                        continue;
                    }
                };
                cprintln(SYSTEM_COLOUR, &format!("[Loading {}...]", entry.name));
                if !state.personas.contains_key(&key) {
                    match load_persona_context(&key, &entry, &directory, history_store.as_ref()).await
                    {
                        Ok(ctx) => state = state.insert_persona(ctx),
                        Err(e) => {
                            cprintln(SYSTEM_COLOUR, &format!("[Could not load {}: {}]", entry.name, e));
                            continue;
                        }
                    }
                }
                state = state.add(&key);
                cprintln(
                    persona_colour(&key),
                    &format!("[{} has joined the room.]", entry.name),
                );
                state = state.append_transcript(TranscriptEntry::system(format!(
                    "{} joined the room.",
                    entry.name
                )));
                continue;
            }
            Command::Kick { key } => {
                if !state.active.contains(&key) {
                    cprintln(
                        SYSTEM_COLOUR,
                        &format!("[{} is not in the room.]", state.display_name(&key)),
                    );
                } else {
                    let name = state.display_name(&key);
                    state = state.kick(&key);
                    cprintln(persona_colour(&key), &format!("[{} has left the room.]", name));
                    state = state.append_transcript(TranscriptEntry::system(format!(
                        "{} left the room.",
                        name
                    )));
                }
                continue;
            }
            Command::TopicSet { text } => {
                cprintln(SYSTEM_COLOUR, &format!("[Switching topic to: {}]", text));
                let briefing = topic::fetch_topic_briefing(&text).await;
                state = state.set_topic(&text, &briefing);
                cprintln(
                    SYSTEM_COLOUR,
                    &format!("[Context loaded. Personas are now briefed on: {}]", text),
                );
                state = state.append_transcript(TranscriptEntry::system(format!(
                    "Topic changed to: {}",
                    text
                )));
                continue;
            }
            Command::TopicClear => {
                state = state.clear_topic(topic::DEFAULT_TOPIC, &topic::default_briefing());
                cprintln(
                    SYSTEM_COLOUR,
                    &format!("[Topic reset to default: {}]", topic::DEFAULT_TOPIC),
                );
                continue;
            }
            Command::ImageLoad { source } => {
                let path = Path::new(&source);
                if !path.exists() {
                    cprintln(SYSTEM_COLOUR, &format!("[File not found: {}]", source));
                    continue;
                }
                cprintln(
                    SYSTEM_COLOUR,
                    &format!("[Analyzing image: {}...]", source),
                );
                let result = image_service.analyze(path).await;
                state = load_image_into_room(state, &mut loaded_images, result);
                continue;
            }
            Command::ImageClear => {
                state = state.clear_images();
                loaded_images.clear();
                cprintln(SYSTEM_COLOUR, "[All images removed from the room.]");
                state = state
                    .append_transcript(TranscriptEntry::system("Image context cleared."));
                continue;
            }
            Command::ImageList => {
                if state.images.is_empty() {
                    cprintln(SYSTEM_COLOUR, "[No images loaded. Use !image <path> to share one.]");
                } else {
                    cprintln(SYSTEM_COLOUR, &format!("\n{}", divider()));
                    cprintln(
                        SYSTEM_COLOUR,
                        &format!("  Images in room ({}):", state.images.len()),
                    );
                    for (i, img) in state.images.iter().enumerate() {
                        cprintln(
                            SYSTEM_COLOUR,
                            &format!("  {}. {}  [{}...]", i + 1, img.filename, &img.hash[..8]),
                        );
                    }
                    cprintln(SYSTEM_COLOUR, &divider());
                }
                continue;
            }
            Command::DidYouMean { suggestion } => {
                cprintln(SYSTEM_COLOUR, &format!("[Did you mean: {}]", suggestion));
                continue;
            }
            Command::UsageHint { text } => {
                cprintln(SYSTEM_COLOUR, &format!("[{}]", text));
                continue;
            }
            Command::UnknownAdd { name }
            | Command::UnknownKick { name }
            | Command::UnknownFocus { name } => {
                let known: Vec<String> = mention_map.keys().cloned().collect();
                cprintln(
                    SYSTEM_COLOUR,
                    &format!("[Unknown persona @{}. Known: {}]", name, known.join(", ")),
                );
                continue;
            }
            Command::None => {}
        }

        // An !image reference embedded in an utterance loads the image first,
        // then sends the remaining text to the room.
        if let Some(pos) = input.to_lowercase().find("!image ") {
            let raw_source = input[pos + "!image ".len()..].trim();
            let source = raw_source
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .or_else(|| raw_source.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                .unwrap_or(raw_source)
                .to_string();
            let path = Path::new(&source);
            if path.exists() {
                cprintln(SYSTEM_COLOUR, &format!("[Analyzing image: {}...]", source));
                let result = image_service.analyze(path).await;
                state = load_image_into_room(state, &mut loaded_images, result);
            } else {
                cprintln(SYSTEM_COLOUR, &format!("[File not found: {}]", source));
            }
            input = input[..pos].trim().to_string();
            if input.is_empty() {
                continue;
            }
        }

        if state.active.is_empty() {
            cprintln(SYSTEM_COLOUR, "[No personas in the room. Use !add @name.]");
            continue;
        }

        state = state.append_transcript(TranscriptEntry::moderator(input.clone()));
        let image_briefing = image_briefing_for(&state, &loaded_images);
        let cancel = interrupts.arm();
        state = respond_to_moderator(state, &engine, &input, &image_briefing, &cancel).await;

        if !state.focus.is_empty() {
            let observers: Vec<String> = state
                .active
                .iter()
                .filter(|k| **k != state.focus)
                .map(|k| state.display_name(k))
                .collect();
            if !observers.is_empty() {
                cprintln(
                    SYSTEM_COLOUR,
                    &format!(
                        "  [{} {} observing]",
                        observers.join(", "),
                        if observers.len() == 1 { "is" } else { "are" }
                    ),
                );
            }
        }
        print_hints();
    }
}
