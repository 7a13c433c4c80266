use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chapterchat_appcore::AppService;
use chapterchat_appcore::service::default_config_dir;
use chapterchat_core::events::{EventSink, UiEvent};
use chapterchat_core::types::{BookId, ChapterId, ChatMessage, Role};
use chapterchat_engine::session::{LoadOutcome, SendOutcome};

#[derive(Debug, Parser)]
#[command(name = "chapterchat", about = "Chat with your course books from the terminal")]
struct Cli {
    /// Directory holding config.json and the saved sign-in.
    #[arg(long, env = "CHAPTERCHAT_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in with email and password.
    Login {
        email: String,
        /// Read from stdin when omitted.
        #[arg(long, env = "CHAPTERCHAT_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Finish a Google/SSO sign-in from the redirect URL.
    Oauth { callback_url: String },
    Logout,
    Books,
    Chapters { book: String },
    /// Send one message, optionally about a chapter.
    Chat {
        #[arg(long)]
        chapter: Option<String>,
        #[arg(required = true)]
        text: Vec<String>,
    },
    History {
        #[arg(long)]
        chapter: Option<String>,
    },
    Notifications {
        #[arg(long)]
        mark_all: bool,
    },
    /// Transcribe a WAV file.
    Transcribe { wav: PathBuf },
    /// Record from the microphone and send the transcription as a message.
    Record {
        #[arg(long, default_value_t = 5)]
        seconds: u64,
        #[arg(long)]
        chapter: Option<String>,
    },
    /// Ask the backend to (re)process a chapter; can take several minutes.
    Process { chapter: String },
}

/// Surfaces the events a terminal user needs to see.
struct TerminalSink;

impl EventSink for TerminalSink {
    fn emit(&self, event: UiEvent) {
        match event {
            UiEvent::Error { message } => eprintln!("error: {message}"),
            UiEvent::NotificationModal(n) => eprintln!("[notification] {}: {}", n.title, n.message),
            UiEvent::RedirectToLogin => eprintln!("Signed out. Run `chapterchat login` to continue."),
            _ => {}
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_dir = cli
        .config_dir
        .unwrap_or_else(|| default_config_dir(dirs::config_dir()));
    let svc = AppService::open(&config_dir, Arc::new(TerminalSink))
        .with_context(|| format!("open {}", config_dir.display()))?;

    match cli.command {
        Command::Login { email, password } => {
            let password = match password {
                Some(p) => p,
                None => read_line("password: ")?,
            };
            let c = svc.login(&email, &password).await?;
            println!("signed in as {}", c.user_id);
        }
        Command::Oauth { callback_url } => {
            let c = svc.oauth_callback(&callback_url)?;
            println!("signed in as {}", c.user_id);
        }
        Command::Logout => {
            svc.logout()?;
            println!("signed out");
        }
        Command::Books => {
            require_sign_in(&svc)?;
            for b in svc.books().await? {
                println!("{}\t{}", b.id, b.title);
            }
        }
        Command::Chapters { book } => {
            require_sign_in(&svc)?;
            for c in svc.chapters(&BookId::new(book)).await? {
                println!("{}\t{}", c.id, c.title);
            }
        }
        Command::Chat { chapter, text } => {
            require_sign_in(&svc)?;
            open(&svc, chapter).await?;
            match svc.chat().send_message(&text.join(" ")).await? {
                SendOutcome::Answered(reply) => println!("{reply}"),
                SendOutcome::Failed(e) => bail!(e.user_message()),
                SendOutcome::Superseded => {}
            }
        }
        Command::History { chapter } => {
            require_sign_in(&svc)?;
            open(&svc, chapter).await?;
            for m in svc.chat().snapshot().transcript {
                print_message(&m);
            }
        }
        Command::Notifications { mark_all } => {
            require_sign_in(&svc)?;
            svc.notifications().load_all().await.map_err(|e| anyhow!(e.user_message()))?;
            for n in svc.notifications().records() {
                let marker = if n.is_unseen() { "*" } else { " " };
                println!("{marker} {}\t{}\t{}", n.created_at, n.title, n.message);
            }
            if mark_all {
                let out = svc.notifications().mark_all_seen().await;
                println!("marked {} seen", out.marked);
                if !out.failed.is_empty() {
                    eprintln!("{} could not be updated on the server", out.failed.len());
                }
            }
        }
        Command::Transcribe { wav } => {
            require_sign_in(&svc)?;
            println!("{}", svc.transcribe_file(&wav).await?);
        }
        Command::Record { seconds, chapter } => {
            require_sign_in(&svc)?;
            open(&svc, chapter).await?;
            let recorder = svc.recorder();
            recorder.start_recording().await?;
            eprintln!("recording for {seconds}s...");
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            recorder.stop_recording().await?;
            match recorder.send_recording().await? {
                SendOutcome::Answered(reply) => println!("{reply}"),
                SendOutcome::Failed(e) => bail!(e.user_message()),
                SendOutcome::Superseded => {}
            }
        }
        Command::Process { chapter } => {
            require_sign_in(&svc)?;
            let out = svc.process_chapter(&ChapterId::new(chapter)).await?;
            println!("{out}");
        }
    }

    Ok(())
}

fn require_sign_in(svc: &AppService) -> anyhow::Result<()> {
    if !svc.auth().is_authenticated() {
        bail!("not signed in; run `chapterchat login <email>` first");
    }
    Ok(())
}

async fn open(svc: &AppService, chapter: Option<String>) -> anyhow::Result<()> {
    let outcome = match chapter {
        Some(id) => {
            svc.chat()
                .select_chapter(ChapterId::new(id), None, None)
                .await
        }
        None => svc.open_general_chat().await,
    };
    match outcome {
        LoadOutcome::Loaded { .. } => Ok(()),
        LoadOutcome::SignedOut => bail!("not signed in"),
        // The error itself was already printed by the sink.
        LoadOutcome::Failed | LoadOutcome::Superseded => Ok(()),
    }
}

fn print_message(m: &ChatMessage) {
    let who = match m.role {
        Role::User => "you",
        Role::Assistant => "tutor",
        Role::System => "system",
    };
    println!("{who}: {}", m.content);
}

fn read_line(prompt: &str) -> anyhow::Result<String> {
    eprint!("{prompt}");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
