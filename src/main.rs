use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;

use offgrid::cache::{CacheStorage, SqliteStorage};
use offgrid::host::ConsoleHost;
use offgrid::http::Request;
use offgrid::network::HttpNetwork;
use offgrid::notify::{ClickedNotification, NotificationClick, NotificationData};
use offgrid::{logging, Config, Event, Worker};

#[derive(Parser, Debug)]
#[command(name = "offgrid")]
#[command(about = "Offline cache and mutation queue for the invoice web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offgrid/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the asset allowlist, then activate
  Install,
  /// Evict superseded cache generations
  Activate,
  /// Send a request through the offline layer
  Fetch {
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Accept header (use text/html for document requests)
    #[arg(long)]
    accept: Option<String>,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Replay queued mutations (connectivity restored)
  Sync {
    #[arg(long)]
    tag: Option<String>,
  },
  /// Deliver a push payload (JSON)
  Push { payload: Option<String> },
  /// Simulate a notification click
  Click {
    #[arg(long)]
    action: Option<String>,
    #[arg(long)]
    url: Option<String>,
  },
  /// Send a control message (JSON)
  Message { json: String },
  /// Inspect cache stores
  Cache {
    /// Store to list (default: all store names)
    store: Option<String>,
  },
  /// List queued mutations
  Queue,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _guard = logging::init(&config)?;

  let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);
  let network = Arc::new(HttpNetwork::new(config.fetch_timeout())?);
  let host = Arc::new(ConsoleHost::new(config.background_sync));
  let worker = Worker::new(config, Arc::clone(&storage), network, host.clone())?;

  match args.command {
    Command::Install => {
      settle(&worker, Event::Install).await?;
      if worker.should_activate()? {
        settle(&worker, Event::Activate).await?;
      }
      println!("installed {}", worker.cache().current());
    }
    Command::Activate => {
      // Each run is a fresh instance, so it has to be installed first
      settle(&worker, Event::Install).await?;
      settle(&worker, Event::Activate).await?;
      println!("active {}", worker.cache().current());
    }
    Command::Fetch {
      url,
      method,
      accept,
      data,
    } => {
      let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let mut request = Request::new(method, worker.config().resolve(&url)?);
      if let Some(accept) = accept {
        request = request.with_header("accept", &accept);
      }
      if let Some(data) = data {
        request = request
          .with_header("content-type", "application/json")
          .with_body(data);
      }

      let dispatched = worker.dispatch(Event::Fetch(request)).await?;
      match &dispatched.response {
        Some(response) => {
          println!("{}", response.status);
          println!("{}", response.body_text());
        }
        None => println!("not intercepted"),
      }
      dispatched.completion.settled().await?;
      for tag in host.registered_tags() {
        eprintln!("registered for sync: {}", tag);
      }
    }
    Command::Sync { tag } => {
      let tag = tag.unwrap_or_else(|| worker.queue().tag().to_string());
      settle(&worker, Event::Sync { tag }).await?;
      println!("{} still queued", worker.queue().pending().await?.len());
    }
    Command::Push { payload } => {
      settle(&worker, Event::Push(payload.map(String::into_bytes))).await?;
    }
    Command::Click { action, url } => {
      let click = NotificationClick {
        action,
        notification: ClickedNotification {
          tag: None,
          data: NotificationData { url },
        },
      };
      settle(&worker, Event::NotificationClick(click)).await?;
    }
    Command::Message { json } => {
      let value: serde_json::Value =
        serde_json::from_str(&json).map_err(|e| eyre!("Invalid message JSON: {}", e))?;
      settle(&worker, Event::Message(value)).await?;
    }
    Command::Cache { store } => match store {
      Some(store) => {
        for key in storage.keys(&store)? {
          println!("{} {}", key.method(), key.url());
        }
      }
      None => {
        for name in storage.store_names()? {
          let marker = if name == worker.cache().current() { "*" } else { " " };
          println!("{} {}", marker, name);
        }
      }
    },
    Command::Queue => {
      for record in worker.queue().pending().await? {
        println!(
          "{}\t{}\t{} {}\tattempts={}\t{}",
          record.seq,
          record.enqueued_at.to_rfc3339(),
          record.method,
          record.url,
          record.attempts,
          record.last_error.as_deref().unwrap_or("")
        );
      }
    }
  }

  Ok(())
}

/// Dispatch an event and wait for all work it registered.
async fn settle(worker: &Worker, event: Event) -> Result<()> {
  worker.dispatch(event).await?.completion.settled().await
}
