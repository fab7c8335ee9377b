mod config;

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use mirsal_client::auth::{SIGN_IN_FALLBACK, SIGN_UP_FALLBACK};
use mirsal_client::settings::{JsonFileStore, ThemeSettings};
use mirsal_client::{ChatClient, ChatError, CoordinatorConfig, JoinOutcome};
use mirsal_store::LocalBackend;
use mirsal_types::events::ChatEvent;
use mirsal_types::models::{MessageWithSender, Theme};

use config::Config;

type Client = ChatClient<LocalBackend>;
type Settings = ThemeSettings<JsonFileStore>;

const HELP: &str = "\
/signup <username> <password>   create an account and sign in
/login <username> <password>    sign in
/logout                         sign out
/rooms                          list rooms
/join <number|name|id>          switch to a room
/leave [number|name|id]         leave a room (default: the current one)
/create <name> [-- description] create a public room
/create-private <name> [-- description]
/theme [dawn|dusk|night|sunset|oasis]
/dark                           toggle dark mode
/help
/quit
Anything else is sent to the current room.";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mirsal=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;

    let backend = Arc::new(LocalBackend::open(&config.db_path)?);
    let client = ChatClient::new(
        backend,
        CoordinatorConfig {
            message_window: config.message_window,
            ..CoordinatorConfig::default()
        },
    );
    let settings = ThemeSettings::new(JsonFileStore::open(&config.settings_path), config.prefers_dark);
    info!("Appearance: {}", settings.appearance().classes().join(" "));

    tokio::spawn(print_events(client.chat().events()));

    if let Some(session) = client.start().await {
        println!("Welcome back, {}.", session.user.identity_key);
    } else {
        println!("Sign in with /login or create an account with /signup. /help lists commands.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !handle_line(&client, &settings, line).await {
            break;
        }
    }

    if client.session().is_signed_in().await {
        client.sign_out().await?;
    }
    info!("Bye");
    Ok(())
}

/// Returns `false` when the session should end.
async fn handle_line(client: &Client, settings: &Settings, line: &str) -> bool {
    let Some(command) = line.strip_prefix('/') else {
        send(client, line).await;
        return true;
    };

    let (name, args) = command.split_once(' ').unwrap_or((command, ""));
    let args = args.trim();

    match name {
        "signup" | "login" => {
            let mut parts = args.split_whitespace();
            let (Some(username), Some(password)) = (parts.next(), parts.next()) else {
                println!("usage: /{} <username> <password>", name);
                return true;
            };
            let result = if name == "signup" {
                client.sign_up(username, password).await.map_err(|e| e.user_message(SIGN_UP_FALLBACK))
            } else {
                client.sign_in(username, password).await.map_err(|e| e.user_message(SIGN_IN_FALLBACK))
            };
            match result {
                Ok(_) => enter(client).await,
                Err(message) => println!("! {}", message),
            }
        }
        "logout" => match client.sign_out().await {
            Ok(()) => println!("Signed out."),
            Err(e) => println!("! {}", e),
        },
        "rooms" => list_rooms(client).await,
        "join" => match resolve_room(client, args).await {
            Some(room_id) => join(client, room_id).await,
            None => println!("! No such room: {}", args),
        },
        "leave" => {
            let target = if args.is_empty() {
                client.chat().current_room().await.map(|r| r.id)
            } else {
                resolve_room(client, args).await
            };
            match target {
                Some(room_id) => match client.chat().leave_room(room_id).await {
                    Ok(()) => println!("Left the room."),
                    Err(e) => println!("! {}", e),
                },
                None => println!("! Not in a room"),
            }
        }
        "create" | "create-private" => {
            let (room_name, description) = match args.split_once(" -- ") {
                Some((n, d)) => (n, Some(d)),
                None => (args, None),
            };
            let private = name == "create-private";
            match client.chat().create_room(room_name, description, private).await {
                Ok(room) => println!("Created '{}'.", room.name),
                Err(ChatError::PartialFailure { room, source }) => {
                    println!("! Created '{}' but could not join it: {}", room.name, source)
                }
                Err(e) => println!("! {}", e),
            }
        }
        "theme" => {
            if args.is_empty() {
                let names: Vec<_> = Theme::ALL.iter().map(|t| t.as_str()).collect();
                println!("Theme: {} (available: {})", settings.theme(), names.join(", "));
            } else {
                match args.parse::<Theme>() {
                    Ok(theme) => {
                        if let Err(e) = settings.set_theme(theme) {
                            warn!("Failed to save theme: {}", e);
                        }
                        println!("Theme set to {}.", theme);
                    }
                    Err(e) => println!("! {}", e),
                }
            }
        }
        "dark" => match settings.toggle_dark_mode() {
            Ok(dark) => println!("Dark mode {}.", if dark { "on" } else { "off" }),
            Err(e) => println!("! {}", e),
        },
        "help" => println!("{}", HELP),
        "quit" | "exit" => return false,
        other => println!("! Unknown command /{} (try /help)", other),
    }
    true
}

/// Load rooms, seeding the defaults on first run, and join the newest.
async fn enter(client: &Client) {
    match client.enter_chat().await {
        Ok(Some(JoinOutcome::Joined(room))) => show_room(client, &room.name).await,
        Ok(_) => list_rooms(client).await,
        Err(e) => println!("! {}", e),
    }
}

async fn join(client: &Client, room_id: Uuid) {
    match client.chat().join_room(room_id).await {
        Ok(JoinOutcome::Joined(room)) => show_room(client, &room.name).await,
        Ok(JoinOutcome::Superseded) => {}
        Err(e) => println!("! {}", e),
    }
}

async fn send(client: &Client, text: &str) {
    match client.chat().send_message(text).await {
        Ok(Some(_)) => {}
        Ok(None) => println!("! Join a room first (/rooms, /join)"),
        Err(e) => println!("! {}", e),
    }
}

async fn show_room(client: &Client, name: &str) {
    println!("== {} ==", name);
    for message in client.chat().messages().await {
        print_message(&message);
    }
}

async fn list_rooms(client: &Client) {
    if let Err(e) = client.chat().refresh_rooms().await {
        println!("! {}", e);
        return;
    }
    let current = client.chat().current_room().await.map(|r| r.id);
    for (i, entry) in client.chat().rooms().await.iter().enumerate() {
        let marker = if Some(entry.room.id) == current { "*" } else { " " };
        let lock = if entry.room.is_private { " (private)" } else { "" };
        println!(
            "{}{:>2}. {}{} [{} member{}]",
            marker,
            i + 1,
            entry.room.name,
            lock,
            entry.member_count,
            if entry.member_count == 1 { "" } else { "s" }
        );
    }
}

/// A 1-based index into the last listing, a room id, or a room name.
async fn resolve_room(client: &Client, arg: &str) -> Option<Uuid> {
    let rooms = client.chat().rooms().await;
    if let Ok(n) = arg.parse::<usize>() {
        return rooms.get(n.checked_sub(1)?).map(|r| r.room.id);
    }
    if let Ok(id) = arg.parse::<Uuid>() {
        return Some(id);
    }
    rooms
        .iter()
        .find(|r| r.room.name.eq_ignore_ascii_case(arg))
        .map(|r| r.room.id)
}

fn print_message(message: &MessageWithSender) {
    println!(
        "[{}] {}: {}",
        message.message.created_at.format("%H:%M"),
        message.sender.shown_name(),
        message.message.content
    );
}

async fn print_events(mut events: broadcast::Receiver<ChatEvent>) {
    loop {
        match events.recv().await {
            Ok(ChatEvent::MessageAppended(message)) => print_message(&message),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event printer lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
