use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use talkback::controller::{ClientEvent, ClientHandle, Command, Phase, View};
use talkback::settings::{ConfigPatch, OptionRange};
use talkback::{ClientConfig, HttpBackend, InteractionController};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Voice and text chat client for a local conversation backend
#[derive(Parser, Debug)]
#[command(name = "talkback", version, about)]
struct Args {
    /// Config file (defaults to the per-user config if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend base URL, overrides the config file
    #[arg(short, long, env = "TALKBACK_URL")]
    url: Option<String>,

    /// List audio input devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "talkback=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    if args.list_devices {
        list_devices();
        return Ok(());
    }

    let mut config = ClientConfig::discover(args.config.as_deref())?;
    if let Some(url) = args.url {
        config = config.with_base_url(url);
    }
    config.validate()?;

    info!("Starting Talkback against {}", config.base_url);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

#[cfg(feature = "audio-io")]
fn list_devices() {
    let devices = talkback::audio::list_input_devices();
    if devices.is_empty() {
        println!("No input devices found");
    }
    for device in devices {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("{}{}", device.name, marker);
    }
}

#[cfg(not(feature = "audio-io"))]
fn list_devices() {
    println!("Built without audio support");
}

async fn serve(config: ClientConfig) -> Result<()> {
    let backend = HttpBackend::new(config.clone());

    #[cfg(feature = "audio-io")]
    let microphone = talkback::audio::CpalMicrophone::new();
    #[cfg(not(feature = "audio-io"))]
    let microphone = talkback::audio::NoMicrophone;

    let (controller, handle) = InteractionController::new(config, backend, microphone)?;
    let ((), outcome) = tokio::join!(controller.run(), console(handle));
    outcome
}

/// What a line of console input asks for
#[derive(Debug, PartialEq)]
enum Input {
    Commands(Vec<Command>),
    History,
    Show,
    Help,
    Quit,
    Nothing,
}

const HELP: &str = "\
Type a message and press enter to send it.
  /record            start or stop recording
  /stop              stop recording and send
  /cancel            stop recording without sending
  /settings, /chat   switch view (leaving settings drops unsaved edits)
  /show              show the settings draft
  /set KEY VALUE     edit an option (temperature, top_p, top_k, repeat_penalty, num_predict)
  /model NAME        pick a model
  /context TEXT      set the system context
  /save              save settings
  /reset confirm     restore default settings
  /clear confirm     delete the conversation history
  /refresh           reload the conversation
  /history           print the conversation
  /quit              exit";

fn parse_line(line: &str) -> std::result::Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Nothing);
    }
    if !line.starts_with('/') {
        return Ok(Input::Commands(vec![
            Command::SetTextDraft(line.to_string()),
            Command::SubmitText,
        ]));
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let confirmed = rest == "confirm";

    let command = match word {
        "/record" => Command::ToggleRecording,
        "/stop" => Command::StopRecording,
        "/cancel" => Command::CancelRecording,
        "/settings" => Command::SwitchView(View::Settings),
        "/chat" => Command::SwitchView(View::Chat),
        "/save" => Command::SaveSettings,
        "/reset" => Command::ResetSettings { confirmed },
        "/clear" => Command::ClearHistory { confirmed },
        "/refresh" => Command::Refresh,
        "/model" if !rest.is_empty() => Command::EditSettings(ConfigPatch::model(rest)),
        "/context" => Command::EditSettings(ConfigPatch::context(rest)),
        "/set" => {
            let (key, value) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| "Usage: /set KEY VALUE".to_string())?;
            let patch = ConfigPatch::from_option_input(key, value).map_err(|e| e.user_message())?;
            Command::EditSettings(patch)
        }
        "/history" => return Ok(Input::History),
        "/show" => return Ok(Input::Show),
        "/help" => return Ok(Input::Help),
        "/quit" | "/exit" => return Ok(Input::Quit),
        _ => return Err(format!("Unknown command: {} (try /help)", word)),
    };
    Ok(Input::Commands(vec![command]))
}

async fn console(mut handle: ClientHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_phase = Phase::Idle;
    let mut last_seconds = 0;

    println!("{}", HELP);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    handle.shutdown().await?;
                    break;
                };
                match parse_line(&line) {
                    Ok(Input::Commands(commands)) => {
                        for command in commands {
                            handle.send(command).await?;
                        }
                    }
                    Ok(Input::History) => print_history(&handle),
                    Ok(Input::Show) => print_settings(&handle),
                    Ok(Input::Help) => println!("{}", HELP),
                    Ok(Input::Quit) => {
                        handle.shutdown().await?;
                        break;
                    }
                    Ok(Input::Nothing) => {}
                    Err(message) => eprintln!("{}", message),
                }
            }
            event = handle.next_event() => {
                match event {
                    Some(ClientEvent::StateChanged) => {
                        let interaction = handle.snapshot().interaction;
                        if interaction.phase != last_phase {
                            println!("[{}]", interaction.phase);
                            last_phase = interaction.phase;
                        }
                        if interaction.phase.is_recording()
                            && interaction.recording_seconds != last_seconds
                        {
                            println!("[Recording {}s]", interaction.recording_seconds);
                        }
                        last_seconds = interaction.recording_seconds;
                    }
                    Some(ClientEvent::ScrollToLatest) => print_latest(&handle),
                    Some(ClientEvent::Notice(message)) => println!("{}", message),
                    Some(ClientEvent::Error(message)) => eprintln!("Error: {}", message),
                    Some(ClientEvent::Shutdown) | None => break,
                }
            }
        }
    }
    Ok(())
}

fn print_history(handle: &ClientHandle) {
    let state = handle.state().read();
    if state.log.is_empty() {
        println!("(no conversation yet)");
    }
    for turn in state.log.turns() {
        println!("you: {}", turn.input);
        println!("bot: {}", turn.output);
    }
}

fn print_latest(handle: &ClientHandle) {
    let state = handle.state().read();
    if let Some(turn) = state.log.last() {
        println!("you: {}", turn.input);
        println!("bot: {}", turn.output);
        if let Some(time) = &turn.response_time {
            println!("     ({})", time);
        }
    }
}

fn print_settings(handle: &ClientHandle) {
    let state = handle.state().read();
    let Some(draft) = state.settings.draft() else {
        println!("Settings have not loaded");
        return;
    };

    println!("model: {}", draft.model);
    for model in state.settings.models() {
        println!("  - {} {}", model.name, model.description);
    }
    let options = &draft.options;
    let values = [
        options.temperature as f64,
        options.top_p as f64,
        options.top_k as f64,
        options.repeat_penalty as f64,
        options.num_predict as f64,
    ];
    for (range, value) in OptionRange::ALL.iter().zip(values) {
        println!(
            "{}: {} [{}..{}] {}",
            range.key,
            value,
            range.min,
            range.max,
            draft.option_description(range.key)
        );
    }
    println!("context: {}", draft.context);
    if state.settings.is_dirty() {
        println!("(unsaved changes)");
    }
}
