// Live classroom CLI
// Inspects a running relay and joins rooms as a headless participant

use clap::{Parser, Subcommand};
use colored::*;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::connect_async;

use live_classroom::config::Config;
use live_classroom::media::{MediaConstraints, TrackKind, VirtualDevices};
use live_classroom::model::{LocalUser, MediaFlags, ParticipantId, Role, RoomId};
use live_classroom::peer::WebRtcTransportFactory;
use live_classroom::room::{MembershipState, RoomSessionController, SessionDeps, SessionEvent, SessionHandle};
use live_classroom::signaling::{room_topic, PresenceMeta, RealtimeTransport, SignalMessage, WsRealtimeTransport};
use live_classroom::store::{MemoryStore, RecordStore, RestRecordStore};
use live_classroom::Result;

#[derive(Parser)]
#[command(name = "live-cli")]
#[command(about = "Live classroom relay tool and headless participant", long_about = None)]
struct Cli {
    /// Relay address (default: 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check relay health endpoint
    Health,

    /// Get the ICE servers the relay hands to clients
    Config,

    /// Test WebSocket connection
    Connect,

    /// Print presence, chat and reactions of a room (appears as an observer)
    Watch {
        /// Room ID to watch
        #[arg(short, long)]
        room_id: String,

        /// Display name shown to the room
        #[arg(short, long, default_value = "observer")]
        name: String,
    },

    /// Join a lesson's live room and stay until /leave or Ctrl+C
    Join {
        /// Lesson whose room to join
        #[arg(short, long)]
        lesson_id: String,

        /// User ID of the participant
        #[arg(short, long)]
        user_id: String,

        /// Display name (defaults to the user ID)
        #[arg(short, long)]
        name: Option<String>,

        /// Join as the room's instructor
        #[arg(long)]
        instructor: bool,

        /// Join without a microphone
        #[arg(long)]
        no_audio: bool,

        /// Join without a camera
        #[arg(long)]
        no_video: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Config => {
            check_config(&cli.server).await;
        }
        Commands::Connect => {
            test_connection(&cli.server).await;
        }
        Commands::Watch { room_id, name } => {
            if let Err(e) = watch_room(&cli.server, room_id, name).await {
                println!("{} Watch failed: {}", "✗".red(), e);
            }
        }
        Commands::Join {
            lesson_id,
            user_id,
            name,
            instructor,
            no_audio,
            no_video,
        } => {
            let user = LocalUser {
                user_id: user_id.clone(),
                display_name: name.clone().unwrap_or_else(|| user_id.clone()),
                role: if *instructor { Role::Instructor } else { Role::Attendee },
            };
            let media = MediaConstraints::new(!no_audio, !no_video);
            if let Err(e) = join_lesson(&cli.server, lesson_id, user, media).await {
                println!("{} Join failed: {}", "✗".red(), e);
            }
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking relay health...".cyan());

    let url = format!("http://{}/live/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                    println!("  Active rooms: {}", body["topics"]);
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to relay: {}", "✗".red(), e);
            println!("  Make sure the relay is running on {}", server);
        }
    }
}

async fn check_config(server: &str) {
    println!("{}", "Fetching relay configuration...".cyan());

    let url = format!("http://{}/live/config", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            if resp.status().is_success() {
                println!("{} Config endpoint accessible", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("\nICE servers:");
                    println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
                }
            } else {
                println!("{} Config fetch failed: {}", "✗".red(), resp.status());
            }
        }
        Err(e) => {
            println!("{} Cannot connect to relay: {}", "✗".red(), e);
        }
    }
}

async fn test_connection(server: &str) {
    println!("{}", "Testing WebSocket connection...".cyan());

    let url = ws_url(server);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            println!("{} WebSocket connection established", "✓".green());
            println!("  URL: {}", url);
            drop(ws_stream);
            println!("{} Connection closed cleanly", "✓".green());
        }
        Err(e) => {
            println!("{} WebSocket connection failed: {}", "✗".red(), e);
        }
    }
}

fn ws_url(server: &str) -> String {
    format!("ws://{}/live/ws", server)
}

async fn watch_room(server: &str, room_id: &str, name: &str) -> Result<()> {
    let transport = WsRealtimeTransport::new(ws_url(server));
    let topic = room_topic(&RoomId::from(room_id));
    let meta = PresenceMeta {
        participant_id: ParticipantId::new(),
        user_id: format!("observer-{}", std::process::id()),
        display_name: name.to_string(),
        role: Role::Attendee,
        joined_at: live_classroom::model::now_millis(),
        media: MediaFlags::default(),
    };

    let mut inbound = transport.subscribe(&topic, meta.clone()).await?;
    println!("{} Watching {} (Ctrl+C to stop)", "✓".green(), topic.bold());

    loop {
        tokio::select! {
            envelope = inbound.recv() => {
                let Some(envelope) = envelope else {
                    println!("{} Relay closed the connection", "✗".red());
                    break;
                };
                match envelope.message {
                    SignalMessage::PresenceJoin { meta } => {
                        println!("{} {} joined as {:?} ({})", "+".green(), meta.display_name.bold(), meta.role, meta.participant_id);
                    }
                    SignalMessage::PresenceLeave { participant_id } => {
                        println!("{} {} left", "-".red(), participant_id);
                    }
                    SignalMessage::Chat { text, .. } => {
                        println!("{} {}", format!("[{}]", envelope.from_name).cyan(), text);
                    }
                    SignalMessage::Reaction { emoji, .. } => {
                        println!("{} reacted {}", envelope.from_name.cyan(), emoji);
                    }
                    SignalMessage::RoomStatus { status } => {
                        println!("{} Room is now {}", "●".yellow(), status.to_string().bold());
                    }
                    SignalMessage::MediaState { media } => {
                        println!("  {} media: {}", envelope.from_name, format_media(media));
                    }
                    other => {
                        println!("  {} {:?}", envelope.from_name.dimmed(), other);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    transport.unsubscribe(&topic, &meta.participant_id).await
}

async fn join_lesson(server: &str, lesson_id: &str, user: LocalUser, media: MediaConstraints) -> Result<()> {
    let config = Config::from_env()?;

    let store: Arc<dyn RecordStore> = if config.store.url.is_some() {
        Arc::new(RestRecordStore::new(&config.store)?)
    } else {
        println!(
            "{} STORE_URL is not set, using a local in-memory store (only useful for instructors)",
            "!".yellow()
        );
        MemoryStore::new()
    };

    let deps = SessionDeps {
        store,
        realtime: Arc::new(WsRealtimeTransport::new(ws_url(server))),
        devices: Arc::new(VirtualDevices::new()),
        peers: Arc::new(WebRtcTransportFactory::new(config.ice.clone())?),
        config: config.session.clone(),
    };

    let controller = RoomSessionController::new(deps);
    let mut events = controller.subscribe();

    println!("{}", format!("Joining lesson {}...", lesson_id).cyan());
    let handle = controller.join(lesson_id, user, media).await?;

    println!("\n{}", "═".repeat(50).green());
    println!("{} {}", "Room ID:".bold(), handle.room_id().to_string().green().bold());
    println!("{} {}", "Participant:".bold(), handle.participant_id());
    println!("{}", "═".repeat(50).green());
    print_help(handle.role());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => println!("{} {} events skipped", "!".yellow(), skipped),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => match run_command(&handle, line.trim()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("{} {}", "✗".red(), e),
                },
                Ok(None) | Err(_) => break,
            },
            _ = handle.closed() => {
                println!("{} Session ended", "●".yellow());
                break;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.leave().await;
    println!("{} Left the room", "✓".green());
    Ok(())
}

fn print_help(role: Role) {
    println!("\nCommands (anything else is sent as chat):");
    println!("  /audio on|off   /video on|off   /screen on|off");
    println!("  /mic <device>   /cam <device>   /react <emoji>");
    println!("  /who            /leave");
    if role == Role::Instructor {
        println!("  /start  /end  /record on|off  /lock  /unlock  /mute-all  /remove <participant-id>");
    }
    println!();
}

/// Returns `false` when the user asked to leave.
async fn run_command(handle: &SessionHandle, line: &str) -> Result<bool> {
    if line.is_empty() {
        return Ok(true);
    }
    if !line.starts_with('/') {
        handle.send_chat(line).await?;
        return Ok(true);
    }

    let mut parts = line.splitn(2, ' ');
    let command = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();
    let on = arg != "off";

    match command {
        "/leave" => return Ok(false),
        "/start" => handle.start_stream().await?,
        "/end" => handle.end_stream().await?,
        "/record" => handle.set_recording(on).await?,
        "/lock" => handle.lock_room(true).await?,
        "/unlock" => handle.lock_room(false).await?,
        "/mute-all" => handle.mute_all().await?,
        "/remove" => handle.remove_participant(&ParticipantId::from(arg)).await?,
        "/audio" => handle.set_audio(on).await?,
        "/video" => handle.set_video(on).await?,
        "/mic" => handle.switch_device(TrackKind::Audio, arg).await?,
        "/cam" => handle.switch_device(TrackKind::Video, arg).await?,
        "/screen" if on => handle.start_screen_share().await?,
        "/screen" => handle.stop_screen_share().await?,
        "/react" => {
            handle.send_reaction(arg).await?;
        }
        "/who" => {
            let snapshot = handle.snapshot().await?;
            println!("Room {} is {}", snapshot.room.id, snapshot.room.status.to_string().bold());
            for entry in &snapshot.roster {
                let link = snapshot
                    .links
                    .iter()
                    .find(|l| l.participant_id == entry.participant_id)
                    .map(|l| l.state.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {} {:?} {} link={}{}",
                    entry.display_name.bold(),
                    entry.role,
                    format_media(entry.media),
                    link,
                    if entry.present { "" } else { " (away)" }
                );
            }
        }
        _ => print_help(handle.role()),
    }
    Ok(true)
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::MembershipChanged { state } => {
            let label = format!("{:?}", state);
            match state {
                MembershipState::Joined => println!("{} {}", "●".green(), label),
                MembershipState::Left | MembershipState::NotJoined => println!("{} {}", "●".red(), label),
                MembershipState::Joining => println!("{} {}", "●".yellow(), label),
            }
        }
        SessionEvent::ParticipantListChanged { participants } => {
            let names: Vec<_> = participants.iter().map(|p| p.display_name.as_str()).collect();
            println!("{} Participants: {}", "●".cyan(), names.join(", "));
        }
        SessionEvent::RoomStatusChanged { status } => {
            println!("{} Room is now {}", "●".yellow(), status.to_string().bold());
        }
        SessionEvent::RoomSettingsChanged { settings } => {
            println!("{} recording={} locked={}", "●".yellow(), settings.recording, settings.locked);
        }
        SessionEvent::ChatMessage(chat) => {
            println!("{} {}", format!("[{}]", chat.sender_name).cyan(), chat.text);
        }
        SessionEvent::Reaction(reaction) => {
            println!("{} reacted {}", reaction.sender_name.cyan(), reaction.emoji);
        }
        SessionEvent::LocalMediaError { source, error } => {
            println!("{} {:?} unavailable: {}", "!".yellow(), source, error);
        }
        SessionEvent::PeerStateChanged { participant_id, state } => {
            println!("  link {} {}", participant_id.to_string().dimmed(), state);
        }
        SessionEvent::ParticipantMediaLost { participant_id } => {
            println!("{} Lost media from {}", "!".yellow(), participant_id);
        }
        SessionEvent::RemoteTrack { participant_id, track } => {
            println!("  {} track {} from {}", track.kind, track.track_id, participant_id);
        }
        SessionEvent::RemoteMediaState { participant_id, media } => {
            println!("  {} media: {}", participant_id.to_string().dimmed(), format_media(*media));
        }
        SessionEvent::Moderation { from, action } => {
            println!("{} Moderation from {}: {:?}", "●".magenta(), from, action);
        }
        SessionEvent::Speaking { speaking, level } => {
            if *speaking {
                println!("  speaking ({:.2})", level);
            }
        }
        SessionEvent::Notice { severity, message } => {
            println!("{} {:?}: {}", "!".red(), severity, message);
        }
    }
}

fn format_media(media: MediaFlags) -> String {
    let flag = |on: bool, name: &str| if on { name.green().to_string() } else { name.dimmed().to_string() };
    format!("{} {} {}", flag(media.audio, "mic"), flag(media.video, "cam"), flag(media.screen, "screen"))
}
