//! DebateRoom CLI - live AI debate in the terminal
//!
//! Opens one debate room, streams both agents' replies as they are typed, and
//! lets you steer the debate by typing lines on stdin.

use clap::Parser;
use colored::Colorize;
use debateroom_core::tts::turn_audio_filename;
use debateroom_core::{
    Config, EventBus, Evaluation, InboundEvent, ProviderFactory, Role, SessionEvent,
    SessionRegistry, SharedEngine, Topic, default_config,
};
use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "debateroom",
    version,
    about = "Live AI debate room - two agents argue, you interrupt",
    long_about = "Runs a turn-based debate between two AI agents using OpenAI-compatible APIs and \
                  local kokoro voices. Type a line to speak to the pros side, prefix it with \
                  '/cons ' to address the cons side, or '/quit' to leave."
)]
struct Cli {
    /// The topic to debate
    #[arg(value_name = "TOPIC")]
    topic: String,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the number of turns before the debate closes
    #[arg(short, long, value_name = "TURNS")]
    max_turns: Option<u32>,

    /// Directory to write each turn's WAV audio into
    #[arg(long, value_name = "DIR")]
    save_audio: Option<PathBuf>,

    /// Skip the judge's verdict when the debate ends
    #[arg(long)]
    no_judge: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let api_base = env::var("OPENAI_API_BASE")
        .or_else(|_| env::var("OPENAI_BASE_URL"))
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

    let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        eprintln!(
            "{}",
            "Warning: OPENAI_API_KEY not set. API calls may fail.".yellow()
        );
        String::new()
    });

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };
    if let Some(turns) = cli.max_turns {
        config.debate.max_turns = turns;
        config.validate()?;
    }

    if let Some(dir) = &cli.save_audio {
        std::fs::create_dir_all(dir)?;
    }

    println!("{}", "Loading voices...".dimmed());
    let engine = SharedEngine::new().await?;
    let factory = Arc::new(ProviderFactory::new(engine, api_base, api_key));
    factory.validate(&config)?;

    let member = env::var("USER").unwrap_or_else(|_| "guest".to_string());
    let bus = EventBus::new().shared();
    let registry = Arc::new(SessionRegistry::new(config.clone(), bus.clone(), factory.clone())?);
    let code = registry.create_session()?;
    let session = registry
        .get_session(&code)
        .ok_or("session vanished right after creation")?;
    info!(session = %code, "joined debate room");

    print_header(&config, &code, &cli.topic);
    subscribe_console(&bus, &session, cli.save_audio.clone());
    registry.join(&code, &member);

    registry.dispatch(&code, InboundEvent::SendTopic { topic: cli.topic.clone() });

    let input = tokio::spawn(read_user_input(registry.clone(), code.clone(), member));

    tokio::select! {
        _ = session.closed() => {}
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("{}", "Interrupted.".yellow());
        }
    }

    input.abort();
    registry.shutdown().await;

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  Debate concluded.".bright_green().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();

    if config.judge.enabled && !cli.no_judge {
        let topic = session.topic().unwrap_or(cli.topic);
        println!("{}", "Judging the debate...".dimmed());
        let mut evaluator = factory.judge(&config.judge)?;
        let evaluation = evaluator.evaluate(&topic, &session.messages()).await;
        print_evaluation(&config, &evaluation);
    }

    Ok(())
}

fn print_evaluation(config: &Config, evaluation: &Evaluation) {
    let verdict = &evaluation.verdict;
    println!("{}", "Verdict:".bold());
    for line in textwrap(&verdict.text, 66).lines() {
        println!("  {}", line);
    }
    println!();

    for role in Role::BOTH {
        let name = &config.agent(role).name;
        let score = verdict
            .score(role)
            .map(|s| format!("{}/10", s))
            .unwrap_or_else(|| "-".to_string());
        let marker = if verdict.winner == Some(role) { " 🏆" } else { "" };
        println!(
            "  {} score {}  diversity {:.4}{}",
            format!("{:<10}", name).bright_cyan(),
            format!("{:>5}", score).bold(),
            evaluation.diversity(role),
            marker
        );
    }
    println!();
}

fn print_header(config: &Config, code: &str, topic: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!("  {} - room {}", "DebateRoom".bold(), code)
            .bright_blue()
            .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Topic:".bold(), topic.bright_white());
    println!("{} {}", "Turns:".bold(), config.debate.max_turns);
    println!();
    println!("{}", "Participants:".bold());
    for (i, role) in Role::BOTH.iter().enumerate() {
        let profile = config.agent(*role);
        println!(
            "  {}. {} ({}) - using {} / voice {}",
            i + 1,
            profile.name.bright_cyan(),
            role.display_name().yellow(),
            profile.model.dimmed(),
            profile.voice.dimmed()
        );
    }
    println!();
    println!(
        "{}",
        "Type to speak to the pros side, '/cons <text>' for the cons side, '/quit' to leave.".dimmed()
    );
    println!("{}", "─".repeat(70).dimmed());
}

/// Print the room's events to the console. Playback counts as finished as
/// soon as a response is shown, since the terminal has no audio player.
fn subscribe_console(
    bus: &debateroom_core::SharedEventBus,
    session: &Arc<debateroom_core::Session>,
    save_audio: Option<PathBuf>,
) {
    // Characters already printed for each side's in-progress reply.
    let printed = Arc::new(Mutex::new([0usize; 2]));

    {
        let printed = printed.clone();
        bus.subscribe(Topic::AgentMessage, move |event| {
            let SessionEvent::AgentMessage { message, .. } = event else {
                return Ok(());
            };
            let mut printed = printed.lock().unwrap_or_else(|e| e.into_inner());
            let slot = &mut printed[usize::from(message.role == Role::Cons)];

            if *slot == 0 {
                println!(
                    "{} {} {}",
                    "▶".bright_cyan(),
                    message.name.bright_cyan().bold(),
                    format!("({})", message.role.display_name()).yellow()
                );
                print!("  ");
            }
            let fresh: String = message.text.chars().skip(*slot).collect();
            *slot = message.text.chars().count();
            print!("{}", fresh);

            if !message.is_typing {
                println!();
                println!();
                *slot = 0;
            }
            let _ = std::io::stdout().flush();
            Ok(())
        });
    }

    {
        let printed = printed.clone();
        bus.subscribe(Topic::ClearResponse, move |event| {
            if let SessionEvent::ClearResponse { role, .. } = event {
                printed.lock().unwrap_or_else(|e| e.into_inner())[usize::from(*role == Role::Cons)] = 0;
                println!(" {}", "[interrupted]".red());
                println!();
            }
            Ok(())
        });
    }

    {
        let session = Arc::downgrade(session);
        let turn = AtomicU32::new(0);
        bus.subscribe(Topic::AgentResponse, move |event| {
            let SessionEvent::AgentResponse { session: code, message } = event else {
                return Ok(());
            };
            let turn = turn.fetch_add(1, Ordering::SeqCst) + 1;

            if let (Some(dir), Some(audio)) = (&save_audio, &message.audio) {
                let path = dir.join(turn_audio_filename(code, turn, &message.name));
                match std::fs::write(&path, audio) {
                    Ok(()) => println!("  {} {}", "♪".dimmed(), path.display().to_string().dimmed()),
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to save audio"),
                }
            }

            if let Some(session) = session.upgrade() {
                session.signal_playback_done(message.role);
            }
            Ok(())
        });
    }

    bus.subscribe(Topic::Notification, |event| {
        if let SessionEvent::Notification { text, .. } = event {
            println!();
            println!("{}", "═".repeat(70).bright_magenta());
            println!("{}", format!("  📢 {}", text).bright_magenta().bold());
            println!("{}", "═".repeat(70).bright_magenta());
            println!();
        }
        Ok(())
    });

    bus.subscribe(Topic::UserMessage, |event| {
        if let SessionEvent::UserMessage {
            role,
            text,
            is_typing: false,
            ..
        } = event
        {
            println!(
                "{}",
                format!("You → {}:", role.display_name()).bright_green().bold()
            );
            for line in textwrap(text, 66).lines() {
                println!("  {}", line);
            }
            println!();
        }
        Ok(())
    });
}

/// Forward stdin lines to the room until EOF or `/quit`.
async fn read_user_input(registry: Arc<SessionRegistry>, code: String, member: String) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            registry.leave(&code, &member).await;
            break;
        }

        let (role, text) = match line.strip_prefix("/cons ") {
            Some(rest) => (Role::Cons, rest.trim()),
            None => (Role::Pros, line.strip_prefix("/pros ").unwrap_or(line).trim()),
        };
        if !registry.dispatch(
            &code,
            InboundEvent::UserMessage {
                role,
                text: text.to_string(),
            },
        ) {
            break;
        }
    }
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current_line_len + word_len + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word_len;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_textwrap_counts_characters() {
        let wrapped = textwrap("가나다 라마바 사아자", 7);
        assert_eq!(wrapped, "가나다 라마바\n사아자");
    }

    #[test]
    fn test_cli_parses_overrides() {
        let cli = Cli::parse_from(["debateroom", "AI", "--max-turns", "4", "--save-audio", "out"]);
        assert_eq!(cli.topic, "AI");
        assert_eq!(cli.max_turns, Some(4));
        assert_eq!(cli.save_audio, Some(PathBuf::from("out")));
        assert!(cli.config.is_none());
        assert!(!cli.no_judge);

        let cli = Cli::parse_from(["debateroom", "AI", "--no-judge"]);
        assert!(cli.no_judge);
    }
}
