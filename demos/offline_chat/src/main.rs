//! Offline chat
//!
//! Sends chat messages through the tidal engine while the network is down:
//!
//! 1. messages appear in the local store right away, marked pending
//! 2. nothing is sent while offline
//! 3. when connectivity returns the queue flushes in order
//! 4. the server rejects one message, which is rolled back and replaced by
//!    an error record
//!
//! Run with `RUST_LOG=debug` to watch the queue and dispatcher at work. An
//! optional first argument names the RON config file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tidal_core::{ContextProviders, EnvelopeBuilder, Key, ManualNetwork, PendingAction, Store, Value};
use tidal_queue::Command;
use tidal_sync::{Engine, Reply, ScriptedRemote, SyncConfig};

const ROOM: &str = "chat_lobby";

fn load_config() -> SyncConfig {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/config.ron")));
    match SyncConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "using default config");
            SyncConfig::default()
        }
    }
}

fn send_message(store: &Store, id: u32, text: &str) -> tidal_core::Result<Command> {
    let message = Key::new(format!("message_{id}"))?;
    let envelope = EnvelopeBuilder::new(store)
        .set(
            message.clone(),
            Value::from_pairs([("text", Value::from(text)), ("room", Value::from(ROOM))]),
        )
        .pending(message.clone(), PendingAction::Add)
        .error_marker(message.clone())
        .build();
    Ok(Command::write("AddMessage", Key::new(ROOM)?)
        .with_param("messageID", id)
        .with_param("text", text)
        .with_envelope(envelope))
}

fn print_messages(store: &Store) -> tidal_core::Result<()> {
    for (key, value) in store.members(&Key::new("message_")?) {
        let text = value.get("text").map(ToString::to_string).unwrap_or_default();
        let state = match (value.get("pendingAction"), value.get("errors")) {
            (_, Some(errors)) => format!("failed: {errors}"),
            (Some(_), None) => "pending".to_string(),
            (None, None) => "sent".to_string(),
        };
        println!("  {key:<12} {text:<32} {state}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "offline_chat=info,tidal_sync=info".into()),
        )
        .init();

    let config = load_config();
    let network = Arc::new(ManualNetwork::new(false));
    let remote = ScriptedRemote::with_handler(|request| {
        let text = request.params.get("text").and_then(|t| t.as_str()).unwrap_or("");
        if text.contains("spam") {
            Reply::Reject("Message flagged as spam".to_string())
        } else {
            Reply::Ok.delayed(Duration::from_millis(50))
        }
    });
    let engine = Engine::builder(remote)
        .config(config)
        .context(ContextProviders::default().with_network(network.clone()))
        .build()?;
    engine.restore()?;
    engine.start();

    tracing::info!("offline, composing messages");
    for (id, text) in [(1, "hello from the train"), (2, "buy cheap spam now"), (3, "back online soon")] {
        engine.enqueue(send_message(engine.store(), id, text)?)?;
    }
    println!("while offline ({} queued):", engine.len());
    print_messages(engine.store())?;

    tokio::time::sleep(Duration::from_millis(200)).await;
    network.set_online(true);
    engine.network_changed();
    engine.wait_idle().await;

    println!("after reconnecting:");
    print_messages(engine.store())?;
    engine.shutdown().await;
    Ok(())
}
