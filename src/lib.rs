//! Watch web pages for a changing star counter and tell subscribers when it moves.
//!
//! # Examples
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use star_watch::{FatalServiceError, Notifier, NotifyError, WatchService, WatcherId};
//! use tokio_util::sync::CancellationToken;
//!
//! struct PrintNotifier;
//!
//! #[async_trait]
//! impl Notifier for PrintNotifier {
//!     async fn send(&self, watcher: WatcherId, text: &str) -> Result<(), NotifyError> {
//!         println!("@{watcher}: {text}");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), FatalServiceError> {
//!     let service = WatchService::builder()
//!         .notifier(Arc::new(PrintNotifier))
//!         .state_file("stars.json")
//!         .build()
//!         .await?;
//!
//!     let outcome = service
//!         .registration_handler()
//!         .register("https://github.com/jasta/coap-server-rs/stargazers", WatcherId(42))
//!         .await;
//!     println!("{outcome}");
//!
//!     service.serve(CancellationToken::new()).await
//! }
//! ```
//!
//! See the `console_bot` demo for a complete interactive front-end.

pub use config::WatchConfig;
pub use extract::{ExtractionError, Extractor, HttpExtractor};
pub use notify::{MessageTemplate, Notification, Notifier, NotifyError};
pub use poller::{PollParameters, Poller, TickReport};
pub use registration::{RegistrationHandler, RegistrationOutcome};
pub use server::{FatalServiceError, WatchService, WatchServiceBuilder};
pub use store::{WatchStore, WatchedResource, WatcherId};

pub mod config;
pub mod extract;
pub mod notify;
pub mod poller;
pub mod registration;
pub mod server;
pub mod store;
#[cfg(test)]
mod test_util;
