//! A terminal chat shell for Flowise chatflows, built on `chatflow-embed`.

#[macro_use]
extern crate tracing;

use std::env;
use std::io::Write as _;
use std::time::Duration;

use chatflow_embed::core::message::{Message, MessageState, Role};
use chatflow_embed::protocol::Rating;
use chatflow_embed::{EmbedConfig, Observers, Turn, Widget};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;

enum WidgetEvent {
    Delta(String),
    Received(Message),
    Idle,
}

enum Command {
    Ask(String),
    Regenerate,
    Rate(Rating),
    Quit,
}

const BAR_CHAR: &str = "▎";

const HELP: &str = "Commands: /regen, /up, /down, /quit";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Ok(chatflowid) = env::var("FLOWISE_CHATFLOW_ID") else {
        eprintln!("FLOWISE_CHATFLOW_ID environment variable is not set");
        return;
    };
    let mut config = EmbedConfig::new(chatflowid);
    if let Ok(api_host) = env::var("FLOWISE_API_HOST") {
        config = config.with_api_host(api_host);
    }
    if let Ok(api_key) = env::var("FLOWISE_API_KEY") {
        config = config.with_api_key(api_key);
    }
    if let Ok(chat_id) = env::var("FLOWISE_CHAT_ID") {
        config = config.with_chat_id(chat_id);
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let observers = Observers::default()
        .on_stream_delta({
            let event_tx = event_tx.clone();
            move |delta| {
                event_tx.send(WidgetEvent::Delta(delta.to_owned())).ok();
            }
        })
        .on_message_received({
            let event_tx = event_tx.clone();
            move |message| {
                event_tx.send(WidgetEvent::Received(message.clone())).ok();
            }
        })
        .on_idle(move || {
            event_tx.send(WidgetEvent::Idle).ok();
        });
    let widget = chatflow_embed::init(config.with_observers(observers));

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    println!("{}", HELP.dimmed());
    let mut last_turn: Option<Turn> = None;

    'outer: loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line().await else {
            break;
        };
        let result = match parse_command(&line) {
            None => continue,
            Some(Command::Quit) => break,
            Some(Command::Rate(rating)) => {
                let Some(turn) = last_turn else {
                    println!("{}", "Nothing to rate yet.".dimmed());
                    continue;
                };
                match widget.rate(turn.answer, rating).await {
                    Ok(()) => println!("{}", "Thanks for the feedback!".dimmed()),
                    Err(err) => println!("{}", err.bright_red()),
                }
                continue;
            }
            Some(Command::Regenerate) => widget.regenerate().await,
            Some(Command::Ask(text)) => widget.send_prompt(text).await,
        };
        let turn = match result {
            Ok(turn) => turn,
            Err(err) => {
                println!("{}", err.bright_red());
                continue;
            }
        };
        last_turn = Some(turn);

        let mut progress_bar = None;
        let mut streaming = false;

        loop {
            if !streaming {
                progress_bar
                    .get_or_insert_with(|| {
                        let progress_bar = ProgressBar::new_spinner();
                        progress_bar.set_style(progress_style.clone());
                        progress_bar.set_message("🤔 Thinking...");
                        progress_bar
                    })
                    .inc(1);
            }

            let sleep = sleep(Duration::from_millis(100));
            let event = select! {
                event = event_rx.recv() => {
                    let Some(event) = event else {
                        break 'outer;
                    };
                    event
                },
                _ = sleep => {
                    continue;
                }
            };

            // Finish the progress bar before printing anything else.
            if let Some(progress_bar) = progress_bar.take() {
                progress_bar.finish_and_clear();
            }

            match event {
                WidgetEvent::Delta(delta) => {
                    if !streaming {
                        print!("{}🤖 ", BAR_CHAR.bright_cyan());
                        streaming = true;
                    }
                    print!("{}", delta.bright_white());
                    std::io::stdout().flush().ok();
                }
                WidgetEvent::Received(message) => {
                    if streaming {
                        println!();
                    } else {
                        println!(
                            "{}🤖 {}",
                            BAR_CHAR.bright_cyan(),
                            message.content.bright_white()
                        );
                    }
                    streaming = true;
                    print_enrichment(&message);
                }
                WidgetEvent::Idle => {
                    if streaming {
                        println!();
                    }
                    print_problems(&widget, turn).await;
                    break;
                }
            }
        }
    }

    widget.destroy().await;
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    match line {
        "" => None,
        "/quit" => Some(Command::Quit),
        "/regen" => Some(Command::Regenerate),
        "/up" => Some(Command::Rate(Rating::ThumbsUp)),
        "/down" => Some(Command::Rate(Rating::ThumbsDown)),
        _ if line.starts_with('/') => {
            println!("{}", HELP.dimmed());
            None
        }
        _ => Some(Command::Ask(line.to_owned())),
    }
}

fn print_enrichment(message: &Message) {
    let Some(enrichment) = message.enrichment() else {
        return;
    };
    let bar = BAR_CHAR.bright_black();
    for document in &enrichment.source_documents {
        if let Some(source) =
            document.metadata.get("source").and_then(|v| v.as_str())
        {
            println!("{bar}📄 {}", source.dimmed());
        }
    }
    for prompt in &enrichment.follow_up_prompts {
        println!("{bar}💡 {}", prompt.dimmed());
    }
}

/// Prints what went wrong with the answer, if anything did.
async fn print_problems(widget: &Widget, turn: Turn) {
    let Ok(messages) = widget.messages().await else {
        return;
    };
    let Some(position) = messages.iter().position(|m| m.id == turn.answer)
    else {
        return;
    };
    let answer = &messages[position];
    let banners: Vec<_> = messages[position + 1..]
        .iter()
        .filter(|message| message.role == Role::ApiMessage)
        .collect();
    match &answer.state {
        MessageState::Errored(_) if banners.is_empty() => {
            println!("{}{}", BAR_CHAR.bright_red(), answer.content.bright_red());
        }
        MessageState::Cancelled => {
            println!("{}", "(cancelled)".dimmed());
        }
        _ => {}
    }
    for banner in banners {
        println!("{}⚠️  {}", BAR_CHAR.bright_yellow(), banner.content);
    }
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
