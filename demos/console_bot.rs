use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use star_watch::{
    FatalServiceError, Notifier, NotifyError, RegistrationHandler, WatchConfig, WatchService,
    WatcherId,
};

/// Stand-in for a chat transport: every input line is `<chat id> <message>`, e.g.
///
/// ```text
/// 100 /start
/// 100 https://github.com/jasta/coap-server-rs/stargazers
/// ```
///
/// Try with `RUST_LOG=debug cargo run --example console_bot`.
#[tokio::main]
async fn main() -> Result<(), FatalServiceError> {
    env_logger::init();

    let config = WatchConfig::load_from("star-watch.toml")?;
    let service = WatchService::builder()
        .config(&config)?
        .notifier(Arc::new(ConsoleNotifier))
        .build()
        .await?;

    let shutdown = CancellationToken::new();
    let chat = tokio::spawn(run_chat(service.registration_handler(), shutdown.clone()));
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, shutting down...");
            }
            shutdown.cancel();
        }
    });

    let result = service.serve(shutdown.clone()).await;
    shutdown.cancel();
    let _ = chat.await;
    result
}

struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(&self, watcher: WatcherId, text: &str) -> Result<(), NotifyError> {
        println!("[to {watcher}] {text}");
        Ok(())
    }
}

/// Per-chat conversation state; only a URL sent right after `/start` is registered.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum ChatState {
    #[default]
    Idle,
    AwaitingUrl,
}

async fn run_chat(registration: RegistrationHandler, shutdown: CancellationToken) {
    let mut states: HashMap<WatcherId, ChatState> = HashMap::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed, shutting down...");
                shutdown.cancel();
                return;
            }
            Err(e) => {
                warn!("Error reading stdin: {e}");
                shutdown.cancel();
                return;
            }
        };

        let Some((chat, text)) = parse_line(&line) else {
            println!("expected: <chat id> <message>");
            continue;
        };
        let state = states.entry(chat).or_default();
        match (*state, text) {
            (_, "/start") => {
                *state = ChatState::AwaitingUrl;
                println!("[to {chat}] Hi give me the url of the stargazer repo page");
            }
            (ChatState::AwaitingUrl, url) => {
                *state = ChatState::Idle;
                let outcome = registration.register(url, chat).await;
                println!("[to {chat}] {outcome}");
            }
            (ChatState::Idle, _) => {
                println!("[to {chat}] Send /start to watch a page");
            }
        }
    }
}

fn parse_line(line: &str) -> Option<(WatcherId, &str)> {
    let (chat, text) = line.trim().split_once(char::is_whitespace)?;
    let chat = chat.parse::<i64>().ok()?;
    Some((WatcherId(chat), text.trim()))
}
