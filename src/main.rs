use anyhow::{anyhow, Result};
use clap::Parser;
use log::{debug, info, warn, LevelFilter};
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod config;
mod utils;

use config::{load_profile, save_profile, Profile};
use parley::api::{MarketplaceApi, RestApi};
use parley::chat::{feed, notify, ChatClient, PollFeed, PushFeed, ReadReceiptCoordinator};
use parley::directory::{resolve_counterpart, ConversationDirectory, DirectoryFilter};
use parley::models::{
    Conversation, ConversationId, Message, MessageId, Participant, Role, SendStatus, UserId,
};
use parley::store::{MessageStore, SharedStore};
use tokio::sync::Mutex;

/// Command line arguments for parley
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Parley: command-line messaging for marketplace conversations."
)]
struct Args {
    /// Marketplace backend base URL, e.g. http://localhost:8000
    #[arg(long)]
    server: Option<String>,

    /// Numeric id of the logged-in user
    #[arg(long)]
    user_id: Option<UserId>,

    /// Display name of the logged-in user
    #[arg(long)]
    name: Option<String>,

    /// Open this conversation directly instead of picking from the list
    #[arg(long)]
    conversation: Option<ConversationId>,

    /// Refresh messages by interval polling instead of the realtime channel
    #[arg(long)]
    poll: bool,

    /// Poll interval in seconds when --poll is active
    #[arg(long, default_value_t = 5)]
    poll_interval: u64,

    /// Mute the audible message cue
    #[arg(long)]
    quiet: bool,

    /// Log file path
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_path = args
        .log_file
        .clone()
        .unwrap_or_else(|| PathBuf::from("parley.log"));
    utils::setup_logging(Some(log_path.as_path()), LevelFilter::Info)?;
    info!("parley starting up");

    notify::set_muted(args.quiet);

    let profile = resolve_profile(&args)?;
    let api: Arc<dyn MarketplaceApi> =
        Arc::new(RestApi::new(&profile.server, profile.get_token()));

    // The backend knows the viewer's role; fall back to the saved profile
    // when it is unreachable.
    let viewer = match api.current_user().await {
        Ok(user) => user,
        Err(e) => {
            warn!("could not resolve current user from backend: {}", e);
            Participant {
                id: profile.user_id,
                full_name: profile.full_name.clone(),
                username: None,
                role: Some(profile.role),
            }
        }
    };
    let viewer_role = viewer.role.unwrap_or(profile.role);

    let mut directory = ConversationDirectory::new();
    if let Err(e) = directory.refresh(api.as_ref()).await {
        warn!("conversation list unavailable: {}", e);
        println!("Could not load conversations: {}", e);
    }

    let conversation = pick_conversation(&directory, viewer_role, args.conversation)?;
    let conversation_id = conversation.id;
    let counterpart = resolve_counterpart(&conversation, viewer_role)
        .ok_or_else(|| anyhow!("conversation {} has no counterpart", conversation_id))?
        .clone();

    println!(
        "Opening conversation with {} (id {}). Type a message, or /quit to leave.",
        counterpart.display_name(),
        conversation_id
    );

    let directory = Arc::new(Mutex::new(directory));
    directory
        .lock()
        .await
        .mark_conversation_read(conversation_id);

    if args.poll {
        run_poll_view(
            api,
            directory,
            &viewer,
            conversation_id,
            Duration::from_secs(args.poll_interval.max(1)),
        )
        .await?;
    } else {
        run_push_view(
            api,
            directory,
            &viewer,
            conversation_id,
            counterpart.id,
            &profile.ws_base(),
        )
        .await?;
    }

    save_profile(&profile)?;
    println!("Bye.");
    Ok(())
}

/// Saved profile, overridden by environment variables and flags, prompted
/// for on first run.
fn resolve_profile(args: &Args) -> Result<Profile> {
    let mut profile = match load_profile()? {
        Some(profile) => profile,
        None => prompt_profile()?,
    };

    if let Ok(server) = env::var("PARLEY_SERVER") {
        profile.server = server;
    }
    if let Ok(user_id) = env::var("PARLEY_USER_ID") {
        profile.user_id = user_id
            .parse()
            .map_err(|_| anyhow!("PARLEY_USER_ID must be a numeric id"))?;
    }
    if let Ok(token) = env::var("PARLEY_TOKEN") {
        profile = Profile::new(
            &profile.server,
            profile.user_id,
            &profile.full_name,
            profile.role,
            Some(&token),
        );
    }
    if let Some(server) = &args.server {
        profile.server = server.clone();
    }
    if let Some(user_id) = args.user_id {
        profile.user_id = user_id;
    }
    if let Some(name) = &args.name {
        profile.full_name = name.clone();
    }
    Ok(profile)
}

fn prompt_profile() -> Result<Profile> {
    eprintln!("Marketplace server URL (e.g. http://localhost:8000):");
    let server = utils::read_line()?;
    eprintln!("Your numeric user id:");
    let user_id: UserId = utils::read_line()?
        .parse()
        .map_err(|_| anyhow!("user id must be numeric"))?;
    eprintln!("Your display name:");
    let full_name = utils::read_line()?;
    eprintln!("API token (leave empty for none):");
    let token = utils::read_line()?;
    let token = if token.is_empty() {
        None
    } else {
        Some(token.as_str())
    };
    Ok(Profile::new(&server, user_id, &full_name, Role::Client, token))
}

fn print_directory(directory: &ConversationDirectory, viewer_role: Role) {
    let visible = directory.visible();
    if visible.is_empty() {
        println!("No conversations.");
        return;
    }
    for (idx, conversation) in visible.iter().enumerate() {
        let name = resolve_counterpart(conversation, viewer_role)
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let preview = conversation
            .last_message
            .as_ref()
            .map(|m| m.preview().to_string())
            .unwrap_or_else(|| "No messages yet".to_string());
        let unread = if conversation.unread_count > 0 {
            format!(" ({} unread)", conversation.unread_count)
        } else {
            String::new()
        };
        let tag = if conversation.has_replied {
            ""
        } else {
            " [request]"
        };
        println!("{:2}. {}{}{}: {}", idx + 1, name, tag, unread, preview);
    }
    if directory.request_count() > 0 {
        println!("{} conversation(s) awaiting a first reply.", directory.request_count());
    }
}

fn pick_conversation(
    directory: &ConversationDirectory,
    viewer_role: Role,
    requested: Option<ConversationId>,
) -> Result<Conversation> {
    if let Some(id) = requested {
        return directory
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("conversation {} not found", id));
    }

    print_directory(directory, viewer_role);
    let visible = directory.visible();
    if visible.is_empty() {
        return Err(anyhow!("no conversations to open"));
    }
    eprintln!("Pick a conversation (1-{}):", visible.len());
    let choice: usize = utils::read_line()?
        .parse()
        .map_err(|_| anyhow!("expected a number"))?;
    visible
        .get(choice.saturating_sub(1))
        .map(|c| (*c).clone())
        .ok_or_else(|| anyhow!("no conversation at position {}", choice))
}

fn print_message(message: &Message, viewer_id: UserId) {
    let who = if message.is_own(viewer_id) {
        "you"
    } else {
        message.sender.full_name.as_str()
    };
    let time = message
        .timestamp()
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());
    let status = match message.status {
        SendStatus::Pending => " (sending)",
        SendStatus::Failed => " (failed)",
        SendStatus::Confirmed => "",
    };
    println!("[{}] {}: {}{}", time, who, message.preview(), status);
}

/// Print the history grouped by calendar day, then return the set of ids
/// already on screen.
async fn print_history(store: &SharedStore, viewer_id: UserId) -> HashSet<MessageId> {
    let mut printed = HashSet::new();
    let store = store.lock().await;
    for group in store.group_by_date() {
        println!("----- {} -----", group.date.format("%B %d, %Y"));
        for message in &group.messages {
            print_message(message, viewer_id);
            printed.insert(message.id);
        }
    }
    printed
}

/// Periodically flush new store entries to the terminal, emitting read
/// confirmations for counterpart messages as they become visible.
async fn render_loop(
    store: SharedStore,
    coordinator: Arc<Mutex<ReadReceiptCoordinator>>,
    client: Option<Arc<Mutex<ChatClient>>>,
    viewer_id: UserId,
    mut printed: HashSet<MessageId>,
) {
    let mut last_revision = 0u64;
    let mut last_date = None;
    let mut was_typing = false;
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        ticker.tick().await;

        if let Some(client) = &client {
            let typing = client.lock().await.counterpart_typing();
            if typing != was_typing {
                if typing {
                    println!("(typing...)");
                }
                was_typing = typing;
            }
        }

        let fresh: Vec<Message> = {
            let store = store.lock().await;
            if store.revision() == last_revision {
                continue;
            }
            last_revision = store.revision();
            store
                .messages()
                .iter()
                .filter(|m| !printed.contains(&m.id))
                .cloned()
                .collect()
        };

        for message in fresh {
            printed.insert(message.id);
            if let Some(date) = message
                .timestamp()
                .map(|t| t.with_timezone(&chrono::Local).date_naive())
            {
                if last_date != Some(date) {
                    println!("----- {} -----", date.format("%B %d, %Y"));
                    last_date = Some(date);
                }
            }
            print_message(&message, viewer_id);

            let should_confirm = coordinator.lock().await.observe_visible(&message);
            if should_confirm {
                if let Some(client) = &client {
                    if let Err(e) = client.lock().await.send_mark_as_read(message.id).await {
                        debug!("read confirmation not sent: {}", e);
                    }
                }
            }
        }
    }
}

/// Realtime surface: channel-connected, push-fed.
async fn run_push_view(
    api: Arc<dyn MarketplaceApi>,
    directory: Arc<Mutex<ConversationDirectory>>,
    viewer: &Participant,
    conversation_id: ConversationId,
    counterpart_id: UserId,
    ws_base: &str,
) -> Result<()> {
    let (mut client, events) = ChatClient::new(viewer, counterpart_id, ws_base);
    client.connect().await?;
    let epoch = client.epoch();

    let store: SharedStore = Arc::new(Mutex::new(MessageStore::new()));
    let coordinator = Arc::new(Mutex::new(ReadReceiptCoordinator::new(viewer.id)));

    seed_history(api.as_ref(), conversation_id, &store).await;

    let push = PushFeed::new(
        events,
        viewer.id,
        conversation_id,
        store.clone(),
        coordinator.clone(),
        epoch.clone(),
    )
    .with_directory(directory.clone());
    let feed_handle = feed::spawn(Box::new(push));

    let printed = print_history(&store, viewer.id).await;
    let client = Arc::new(Mutex::new(client));
    let render = tokio::spawn(render_loop(
        store.clone(),
        coordinator.clone(),
        Some(client.clone()),
        viewer.id,
        printed,
    ));

    loop {
        let line = match tokio::task::spawn_blocking(utils::read_line).await? {
            Ok(line) => line,
            // stdin closed: leave the conversation cleanly.
            Err(_) => break,
        };
        match line.as_str() {
            "" => continue,
            "/quit" => break,
            "/all" | "/primary" | "/requests" => {
                let filter = match line.as_str() {
                    "/primary" => DirectoryFilter::Primary,
                    "/requests" => DirectoryFilter::Requests,
                    _ => DirectoryFilter::All,
                };
                let mut directory = directory.lock().await;
                directory.set_filter(filter);
                print_directory(&directory, viewer.role.unwrap_or(Role::Client));
            }
            text => {
                let client = client.lock().await;
                if !client.is_connected() {
                    // Send affordances are disabled while offline.
                    println!("(offline: message not sent)");
                    continue;
                }
                client.note_composing().await.ok();
                if let Err(e) = client.send_chat_message(text).await {
                    println!("(send failed: {})", e);
                }
            }
        }
    }

    render.abort();
    feed_handle.abort();
    client.lock().await.close().await;
    Ok(())
}

/// Non-realtime surface: no channel, fixed-interval history refresh, REST
/// sends.
async fn run_poll_view(
    api: Arc<dyn MarketplaceApi>,
    directory: Arc<Mutex<ConversationDirectory>>,
    viewer: &Participant,
    conversation_id: ConversationId,
    interval: Duration,
) -> Result<()> {
    let store: SharedStore = Arc::new(Mutex::new(MessageStore::new()));
    let coordinator = Arc::new(Mutex::new(ReadReceiptCoordinator::new(viewer.id)));
    let epoch = parley::chat::ViewEpoch::new();

    seed_history(api.as_ref(), conversation_id, &store).await;

    let poll = PollFeed::new(
        api.clone(),
        conversation_id,
        store.clone(),
        interval,
        epoch.clone(),
    );
    let feed_handle = feed::spawn(Box::new(poll));

    let printed = print_history(&store, viewer.id).await;
    let render = tokio::spawn(render_loop(
        store.clone(),
        coordinator.clone(),
        None,
        viewer.id,
        printed,
    ));

    loop {
        let line = match tokio::task::spawn_blocking(utils::read_line).await? {
            Ok(line) => line,
            Err(_) => break,
        };
        match line.as_str() {
            "" => continue,
            "/quit" => break,
            text => match api.send_message(conversation_id, text).await {
                Ok(message) => {
                    store.lock().await.append(message.clone());
                    directory
                        .lock()
                        .await
                        .record_local_send(conversation_id, &message);
                }
                Err(e) => println!("(send failed: {})", e),
            },
        }
    }

    // Retire the poll feed before tearing the view down; a response still
    // in flight must not touch the store.
    epoch.bump();
    render.abort();
    feed_handle.abort();
    Ok(())
}

async fn seed_history(
    api: &dyn MarketplaceApi,
    conversation_id: ConversationId,
    store: &SharedStore,
) {
    match api.list_messages(conversation_id).await {
        Ok(messages) => {
            info!("seeded {} messages of history", messages.len());
            store.lock().await.seed(messages);
        }
        Err(e) => {
            // The view opens with whatever it has; the feed retries.
            warn!("history fetch failed: {}", e);
            println!("Could not load history yet: {}", e);
        }
    }
}
