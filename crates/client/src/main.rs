//! corpchat - terminal front end for the messaging core.
//!
//! Reads the session persisted by the portal login, connects, and takes
//! commands from stdin. Anything not starting with `/` is sent to the open
//! conversation.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use corpchat_client::audio::TerminalBell;
use corpchat_client::composer::Composer;
use corpchat_client::gate::ConversationStart;
use corpchat_client::notifications::Screen;
use corpchat_client::storage::TokenSource;
use corpchat_client::uploader::LocalFile;
use corpchat_client::ws::WsEvent;
use corpchat_client::{logging, ApiClient, ChatApi, ChatError, ChatSession, ClientConfig, Storage};
use corpchat_shared::{Message, ServerEvent};
use tokio::io::{AsyncBufReadExt, BufReader};

enum Navigation {
    Chat(String),
    Screen(Screen),
}

const HELP: &str = "\
commands:
  /chats                     list conversations
  /open <chat-id|user-id>    open a conversation (files a request if needed)
  /older                     load older messages of the open conversation
  /users                     list the chat directory
  /leaves                    unread leave request count
  /requests                  list incoming message requests
  /request <user-id> [text]  ask a user for permission to chat
  /accept <request-id>       accept a message request
  /reject <request-id>       reject a message request
  /attach <path>...          upload files for the next message
  /quit                      leave
  <text>                     send to the open conversation";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("corpchat_client=debug");

    let config = ClientConfig::from_env();
    let storage = match &config.storage_dir {
        Some(dir) => Storage::new(dir),
        None => Storage::default_location().context("no config directory on this platform")?,
    };
    let Some(identity) = storage.session() else {
        bail!(
            "no saved session in {}; log in through the portal first",
            storage.dir().display()
        );
    };

    let token = storage
        .token()
        .unwrap_or_else(|| identity.auth_token.clone());
    let api = Arc::new(
        ApiClient::new()
            .with_base_url(config.api_base_url.clone())
            .with_token(Some(token)),
    );
    let session = ChatSession::start(
        identity.clone(),
        &config,
        api.clone(),
        Arc::new(storage.clone()),
        Arc::new(TerminalBell),
    );

    let open_chat: Arc<Mutex<Option<String>>> = Arc::default();
    spawn_printers(&session, open_chat.clone());

    println!("signed in as {} ({}). /help for commands", identity.user_id, identity.role);
    let mut composer: Option<Composer> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        let result: Result<(), ChatError> = match command {
            "/quit" => break,
            "/help" => {
                println!("{HELP}");
                Ok(())
            }
            "/chats" => {
                navigate(
                    &session,
                    &open_chat,
                    &mut composer,
                    Navigation::Screen(Screen::Dashboard),
                );
                let store = session.store();
                store.refresh_conversations().await.map(|chats| {
                    for chat in chats {
                        let peer = chat.peer_of(&identity.user_id).unwrap_or("?");
                        let online = if store.is_online(peer) { "*" } else { " " };
                        println!("{online} {}  {peer}  ({} unread)", chat.id, chat.unread_count);
                    }
                })
            }
            "/open" => match open(&session, api.as_ref(), rest).await {
                Ok(Some(chat_id)) => {
                    navigate(&session, &open_chat, &mut composer, Navigation::Chat(chat_id));
                    Ok(())
                }
                Ok(None) => {
                    navigate(
                        &session,
                        &open_chat,
                        &mut composer,
                        Navigation::Screen(Screen::Dashboard),
                    );
                    Ok(())
                }
                Err(e) => Err(e),
            },
            "/older" => match &composer {
                Some(c) => session.store().load_older(c.chat_id()).await.map(|added| {
                    for msg in session.store().messages(c.chat_id()).iter().take(added) {
                        print_message(msg);
                    }
                }),
                None => {
                    println!("no conversation open");
                    Ok(())
                }
            },
            "/users" => {
                navigate(
                    &session,
                    &open_chat,
                    &mut composer,
                    Navigation::Screen(Screen::Dashboard),
                );
                api.list_users()
                    .await
                    .map(|users| {
                        for user in users {
                            println!("{}  {} ({})", user.id, user.name, user.role);
                        }
                    })
                    .map_err(Into::into)
            }
            "/leaves" => {
                navigate(
                    &session,
                    &open_chat,
                    &mut composer,
                    Navigation::Screen(Screen::Leaves),
                );
                api.leave_unread_count()
                    .await
                    .map(|count| println!("{count} unread leave request(s)"))
                    .map_err(Into::into)
            }
            "/requests" => {
                navigate(
                    &session,
                    &open_chat,
                    &mut composer,
                    Navigation::Screen(Screen::MessageRequests),
                );
                let gate = session.gate();
                match gate.refresh_incoming().await {
                    Ok(requests) => {
                        if requests.is_empty() {
                            println!("no pending requests");
                        }
                        for r in requests {
                            println!("{}  from {}: {}", r.id, r.from, r.message.unwrap_or_default());
                        }
                        gate.refresh_outgoing().await.map(|_| {
                            for r in gate.outgoing() {
                                println!("{}  to {} ({})", r.id, r.to, r.status);
                            }
                        })
                    }
                    Err(e) => Err(e),
                }
            }
            "/request" => {
                navigate(
                    &session,
                    &open_chat,
                    &mut composer,
                    Navigation::Screen(Screen::Dashboard),
                );
                let (to, text) = rest.split_once(' ').unwrap_or((rest, ""));
                let message = Some(text.to_string()).filter(|t| !t.is_empty());
                session
                    .gate()
                    .create_request(to, message)
                    .await
                    .map(|r| println!("request {} sent to {}", r.id, r.to))
            }
            "/accept" => session.gate().accept(rest).await.map(|d| {
                if let Some(d) = d {
                    println!("accepted; chat {}", d.chat.map(|c| c.id).unwrap_or_default());
                }
            }),
            "/reject" => session
                .gate()
                .reject(rest)
                .await
                .map(|d| if d.is_some() { println!("rejected") }),
            "/attach" => match &composer {
                Some(c) => {
                    let mut files = Vec::new();
                    for path in rest.split_whitespace() {
                        match LocalFile::read(path).await {
                            Ok(file) => files.push(file),
                            Err(e) => println!("! {e}"),
                        }
                    }
                    let outcome = c.attach(files).await;
                    if !outcome.all_succeeded() {
                        for failed in &outcome.failed {
                            println!("! {}", failed.error);
                        }
                    }
                    println!("{} attachment(s) ready", c.attachments().len());
                    Ok(())
                }
                None => {
                    println!("open a conversation first");
                    Ok(())
                }
            },
            _ if command.starts_with('/') => {
                println!("unknown command {command}. /help for commands");
                Ok(())
            }
            _ => match &composer {
                Some(c) => {
                    c.set_text(line);
                    c.send().await.map(|_| ())
                }
                None => {
                    println!("open a conversation first");
                    Ok(())
                }
            },
        };

        if let Err(e) = result {
            println!("! {}", e.user_message());
        }
    }

    session.end();
    Ok(())
}

/// Open a conversation by chat id, or start one with a user id.
async fn open(
    session: &ChatSession,
    api: &ApiClient,
    target: &str,
) -> Result<Option<String>, ChatError> {
    let store = session.store();
    if !store.is_known(target) {
        store.refresh_conversations().await?;
    }

    let chat_id = if store.is_known(target) {
        target.to_string()
    } else {
        let users = api.list_users().await?;
        let Some(peer) = users.into_iter().find(|u| u.id == target) else {
            println!("no conversation or user named {target}");
            return Ok(None);
        };
        match session.gate().start_conversation(&peer, None).await? {
            ConversationStart::Existing(chat) | ConversationStart::Opened(chat) => chat.id,
            ConversationStart::Requested(request) => {
                println!("{} needs to accept your request {} first", peer.name, request.id);
                return Ok(None);
            }
        }
    };

    for msg in store.fetch_messages(&chat_id).await? {
        print_message(&msg);
    }
    Ok(Some(chat_id))
}

/// Switch to a conversation, or leave it for another screen.
fn navigate(
    session: &ChatSession,
    open_chat: &Mutex<Option<String>>,
    composer: &mut Option<Composer>,
    target: Navigation,
) {
    let mut open = open_chat.lock().unwrap_or_else(|e| e.into_inner());
    match target {
        Navigation::Chat(chat_id) => {
            session.show_chat(&chat_id);
            *composer = Some(session.composer(chat_id.clone()));
            *open = Some(chat_id);
        }
        Navigation::Screen(screen) => {
            session.show(screen);
            *composer = None;
            *open = None;
        }
    }
}

fn print_message(msg: &Message) {
    let time = msg.created_at.format("%H:%M");
    println!("[{time}] {}: {}", msg.sender_id, msg.content);
    for att in &msg.attachments {
        println!("        [{:?}] {} {}", att.kind, att.name, att.url);
    }
}

/// Print toasts, and live messages of the open conversation.
fn spawn_printers(session: &ChatSession, open_chat: Arc<Mutex<Option<String>>>) {
    let toasts = session.notifications().toasts().clone();
    tokio::spawn(async move {
        let mut last_seen = 0;
        loop {
            toasts.changed().await;
            let fresh: Vec<_> = toasts
                .visible()
                .into_iter()
                .filter(|t| t.id > last_seen)
                .collect();
            for toast in fresh {
                last_seen = toast.id;
                println!(">> {}: {}", toast.title, toast.body);
            }
        }
    });

    let me = session.identity().user_id.clone();
    let mut events = session.connection().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                WsEvent::Server(ServerEvent::NewMessage { chat_id, message }) => {
                    let open = open_chat.lock().unwrap_or_else(|e| e.into_inner()).clone();
                    if open.as_deref() == Some(chat_id.as_str()) && message.sender_id != me {
                        print_message(&message);
                    }
                }
                WsEvent::ConnectionStateChanged(state) => tracing::debug!(?state, "connection"),
                _ => {}
            }
        }
    });
}
