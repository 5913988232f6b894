//! A terminal front-end for SophiaAI, built on `sophia` as a library.

#[macro_use]
extern crate tracing;

mod command;

use std::env;
use std::io::Write as _;
use std::mem;
use std::path::Path;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use sophia::core::conversation::{Conversation, Message, RenderHint};
use sophia::core::session::FileStorage;
use sophia::core::{
    Attachment, ConversationStore, Error, GuestChat, LoginOutcome, Role,
    StoreSnapshot, strip_markup,
};
use sophia::http::{HttpBackend, HttpConfigBuilder};
use sophia::{Client, ClientBuilder};
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::command::{Command, HELP};

const BAR_CHAR: &str = "▎";
const SIGNED_IN: &str = "Signed in. Type /list to see your conversations.";

enum Mode {
    Account,
    Guest(GuestChat),
}

struct Repl {
    client: Client,
    mode: Mode,
    attachments: Vec<Attachment>,
    background_errors: mpsc::UnboundedReceiver<String>,
    progress_style: ProgressStyle,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = HttpConfigBuilder::new();
    if let Ok(base_url) = env::var("SOPHIA_BASE_URL") {
        config = config.with_base_url(base_url);
    }
    let backend = match HttpBackend::new(config.build()) {
        Ok(backend) => backend,
        Err(err) => {
            eprintln!("failed to set up the HTTP client: {err}");
            return;
        }
    };

    let storage = match env::var_os("SOPHIA_DATA_DIR") {
        Some(dir) => FileStorage::new(dir),
        None => match FileStorage::in_data_dir() {
            Ok(storage) => storage,
            Err(err) => {
                eprintln!("SOPHIA_DATA_DIR is not set and {err}");
                return;
            }
        },
    };
    debug!("session directory: {}", storage.dir().display());

    let (error_tx, error_rx) = mpsc::unbounded_channel();
    let mut client = ClientBuilder::new(backend, storage)
        .on_error(move |err| {
            error_tx.send(err.display_message().into_owned()).ok();
        })
        .build();

    if client.restore() {
        let name = client
            .session()
            .identity()
            .and_then(|identity| identity.user.username.clone())
            .unwrap_or_else(|| "back".to_owned());
        println!("Welcome {name}! Type /list to see your conversations.");
    } else {
        println!("Type /login <email> <password> to sign in, or /guest.");
    }

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .map(|style| style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"))
        .unwrap_or_else(|_| ProgressStyle::default_spinner());

    let mut repl = Repl {
        client,
        mode: Mode::Account,
        attachments: vec![],
        background_errors: error_rx,
        progress_style,
    };

    loop {
        repl.print_background_errors();
        let prompt = match repl.mode {
            Mode::Account => "> ",
            Mode::Guest(_) => "guest> ",
        };
        print!("{prompt}");
        std::io::stdout().flush().ok();

        let Some(line) = read_line().await else {
            break;
        };
        let cmd = match Command::parse(&line) {
            Ok(cmd) => cmd,
            Err(usage) => {
                println!("{}", usage.bright_red());
                continue;
            }
        };
        if !repl.handle(cmd).await {
            break;
        }
    }
}

impl Repl {
    /// Handles a command, returns `false` when the REPL should exit.
    async fn handle(&mut self, cmd: Command) -> bool {
        let style = self.progress_style.clone();
        match cmd {
            Command::Login { email, password } => {
                let login = self.client.login(&email, &password);
                match with_spinner(&style, "Signing in...", login).await {
                    Ok(LoginOutcome::Authenticated(_)) => {
                        self.mode = Mode::Account;
                        println!("{SIGNED_IN}");
                    }
                    Ok(LoginOutcome::OtpRequired(challenge)) => {
                        println!(
                            "A one-time code was sent to {}. Type /otp <code>.",
                            challenge.email
                        );
                    }
                    Err(err) => print_error(&err),
                }
            }
            Command::Otp(code) => {
                let Some(email) = self
                    .client
                    .session()
                    .pending_challenge()
                    .map(|challenge| challenge.email.clone())
                else {
                    println!("No sign-in is waiting for a code.");
                    return true;
                };
                let verify = self.client.verify_otp(&email, &code);
                match with_spinner(&style, "Verifying...", verify).await {
                    Ok(_) => {
                        self.mode = Mode::Account;
                        println!("{SIGNED_IN}");
                    }
                    Err(err) => print_error(&err),
                }
            }
            Command::Logout => {
                self.client.logout();
                self.attachments.clear();
                println!("Signed out.");
            }
            Command::List => {
                let Some(store) = self.store() else {
                    return true;
                };
                let refresh = store.list_conversations();
                let refreshed =
                    with_spinner(&style, "Loading...", refresh).await;
                if let Err(err) = refreshed {
                    print_error(&err);
                    return true;
                }
                if let Ok(snapshot) = store.snapshot().await {
                    print_list(&snapshot);
                }
            }
            Command::New(kind) => {
                let Some(store) = self.store() else {
                    return true;
                };
                match store.create_draft(kind.clone()) {
                    Ok(()) => println!("Started a new {kind} conversation."),
                    Err(err) => print_error(&err),
                }
            }
            Command::Open(id) => {
                let Some(store) = self.store() else {
                    return true;
                };
                let activate = store.activate(Some(id.clone()));
                let activated =
                    with_spinner(&style, "Loading...", activate).await;
                if let Err(err) = activated {
                    print_error(&err);
                    return true;
                }
                match store.snapshot().await {
                    Ok(snapshot) => match snapshot.active_conversation() {
                        Some(conversation) => print_conversation(conversation),
                        None => println!("No conversation {id}."),
                    },
                    Err(err) => print_error(&err),
                }
            }
            Command::Draft => {
                let Some(store) = self.store() else {
                    return true;
                };
                if let Err(err) = store.set_active(None) {
                    print_error(&err);
                    return true;
                }
                match store.snapshot().await {
                    Ok(snapshot) => match snapshot.draft() {
                        Some(draft) => print_conversation(draft),
                        None => println!("No draft, type /new to start one."),
                    },
                    Err(err) => print_error(&err),
                }
            }
            Command::Delete(id) => {
                let Some(store) = self.store() else {
                    return true;
                };
                let target = match id {
                    Some(id) => Some(id),
                    None => match store.snapshot().await {
                        Ok(snapshot) => snapshot.active_id().cloned(),
                        Err(err) => {
                            print_error(&err);
                            return true;
                        }
                    },
                };
                let delete = store.delete_conversation(target);
                match with_spinner(&style, "Deleting...", delete).await {
                    Ok(()) => println!("Deleted."),
                    Err(err) => print_error(&err),
                }
            }
            Command::Attach(path) => match read_attachment(&path).await {
                Ok(attachment) => {
                    println!(
                        "📎 {} ({} bytes) goes with the next message.",
                        attachment.file_name,
                        attachment.data.len()
                    );
                    self.attachments.push(attachment);
                }
                Err(err) => {
                    let message =
                        format!("cannot read {}: {err}", path.display());
                    println!("{}", message.bright_red());
                }
            },
            Command::Guest => {
                self.mode = Mode::Guest(self.client.guest());
                println!("Guest mode, nothing is saved. /login to sign in.");
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => return false,
            Command::Message(text) => {
                if text.is_empty() && self.attachments.is_empty() {
                    return true;
                }
                let attachments = mem::take(&mut self.attachments);
                self.send(&style, &text, attachments).await;
            }
        }
        true
    }

    async fn send(
        &mut self,
        style: &ProgressStyle,
        text: &str,
        attachments: Vec<Attachment>,
    ) {
        if let Mode::Guest(chat) = &mut self.mode {
            let send = chat.send(text, attachments);
            match with_spinner(style, "🤔 Thinking...", send).await {
                Ok(Some(reply)) => print_message(reply),
                Ok(None) => {}
                Err(err) => print_error(&err),
            }
            return;
        }

        let Some(store) = self.store() else {
            return;
        };
        let send = store.send_message(text, attachments);
        match with_spinner(style, "🤔 Thinking...", send).await {
            Ok(Some(reply)) => print_message(&reply),
            Ok(None) => {}
            Err(err) => print_error(&err),
        }
    }

    fn store(&self) -> Option<ConversationStore> {
        let store = self.client.conversations().cloned();
        if store.is_none() {
            println!("Sign in first, or type /guest to chat as a guest.");
        }
        store
    }

    fn print_background_errors(&mut self) {
        while let Ok(message) = self.background_errors.try_recv() {
            print_warning(&message);
        }
    }
}

async fn with_spinner<F: Future>(
    style: &ProgressStyle,
    message: &'static str,
    fut: F,
) -> F::Output {
    let progress_bar = ProgressBar::new_spinner();
    progress_bar.set_style(style.clone());
    progress_bar.set_message(message);

    tokio::pin!(fut);
    let output = loop {
        progress_bar.inc(1);
        select! {
            output = &mut fut => break output,
            _ = sleep(Duration::from_millis(100)) => {}
        }
    };

    // Clear the spinner before printing anything else.
    progress_bar.finish_and_clear();
    output
}

async fn read_attachment(path: &Path) -> std::io::Result<Attachment> {
    let data = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_owned());
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    Ok(Attachment::new(file_name, data).with_mime(mime))
}

fn print_error(err: &Error) {
    debug!("operation failed: {err}");
    print_warning(&err.display_message());
}

fn print_warning(message: &str) {
    println!("{}⚠️  {}", BAR_CHAR.bright_yellow(), message.bright_red());
}

fn print_list(snapshot: &StoreSnapshot) {
    if snapshot.conversations().is_empty() {
        println!("No conversations yet, type /new to start one.");
        return;
    }
    let active = snapshot.active_conversation();
    for conversation in snapshot.conversations() {
        let marker = if active == Some(conversation) { "*" } else { " " };
        let id = conversation
            .id()
            .map(ToString::to_string)
            .unwrap_or_else(|| "draft".to_owned());
        println!(
            "{marker} {:>8}  {}  {}",
            id.bright_black(),
            conversation.title().bold(),
            conversation.kind().dimmed()
        );
    }
}

fn print_conversation(conversation: &Conversation) {
    println!("{}", conversation.title().bold());
    if conversation.messages().is_empty() {
        println!("{}", "(no messages yet)".dimmed());
    }
    for msg in conversation.messages() {
        print_message(msg);
    }
}

fn print_message(msg: &Message) {
    for attachment in msg.attachments() {
        println!("{}📎 {}", BAR_CHAR.bright_black(), attachment.file_name);
    }
    match msg.role() {
        Role::User => println!("{}{}", BAR_CHAR.bright_green(), msg.content()),
        Role::Assistant => {
            let content = match msg.hint() {
                RenderHint::Html => strip_markup(msg.content()),
                RenderHint::PlainText => msg.content().to_owned(),
            };
            println!(
                "{}🤖 {}",
                BAR_CHAR.bright_cyan(),
                content.bright_white()
            );
        }
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
