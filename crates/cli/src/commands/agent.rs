//! `clawloop agent`: single-message or interactive chat.

use clawloop_agent::AgentRuntime;
use clawloop_config::AppConfig;
use clawloop_core::channel::{Channel, ConversationKey, OutboundMessage, ReplyKind};
use clawloop_core::provider::Provider;
use clawloop_core::storage::MessageStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::channel::{CHANNEL_NAME, StdoutChannel, spawn_stdin_reader};
use crate::stack::Stack;

pub async fn run(
    message: Option<String>,
    session: String,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() && config.default_provider != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    OPENROUTER_API_KEY=sk-or-v1-...   (recommended)");
        eprintln!("    OPENAI_API_KEY=sk-...             (for OpenAI direct)");
        eprintln!("    CLAWLOOP_API_KEY=sk-...           (generic)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let stack = Stack::build(config).await?;
    if verbose {
        stack.trace_events();
    }

    match message {
        Some(text) => single(&stack, &session, &text).await,
        None => interactive(stack, session).await,
    }
}

/// One message through one loop, then the shutdown sequence.
async fn single(stack: &Stack, session: &str, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let key = ConversationKey::new(CHANNEL_NAME, session);
    let mut agent = stack.agent_loop(key.session_id());
    match stack
        .store
        .get_conversation(&key.session_id(), stack.config.agent.session_history_limit)
        .await
    {
        Ok(history) => agent.seed_history(history),
        Err(e) => warn!(error = %e, "Could not reload history"),
    }

    let channel = StdoutChannel::new(false);
    eprint!("  Thinking...");
    let outcome = tokio::select! {
        result = agent.process(text) => Some(result),
        _ = shutdown_signal() => None,
    };
    eprint!("\r              \r");

    let reply = match outcome {
        Some(Ok(reply)) => Some(OutboundMessage::new(&key, reply.content, reply.kind)),
        Some(Err(e)) => Some(OutboundMessage::new(&key, e.to_string(), ReplyKind::Rejected)),
        None => {
            info!("Interrupted");
            None
        }
    };
    if let Some(reply) = &reply {
        channel.send(reply).await?;
    }

    agent.close().await;
    stack.writer.close().await;
    Ok(())
}

async fn interactive(stack: Stack, session: String) -> Result<(), Box<dyn std::error::Error>> {
    println!();
    println!("  clawloop agent, interactive mode");
    println!();
    println!("  Provider:  {}", stack.config.default_provider);
    println!("  Model:     {}", stack.model);
    println!("  Tools:     {}", stack.tools.names().join(", "));
    println!("  Workspace: {}", stack.config.workspace_dir().display());
    println!("  Agent:     {}", stack.identity.name);
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let (in_tx, in_rx) = mpsc::channel(32);
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundMessage>(32);
    let (stop_tx, stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    let channel = Arc::new(StdoutChannel::new(true));
    let printer = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move {
            while let Some(reply) = out_rx.recv().await {
                if let Err(e) = channel.send(&reply).await {
                    warn!(error = %e, "Failed to print reply");
                }
                channel.prompt();
            }
        })
    };

    let provider: Arc<dyn Provider> = stack.provider.clone();
    let history_limit = stack.config.agent.session_history_limit;
    let store = Arc::clone(&stack.store);
    let memory = Arc::clone(&stack.memory);
    let writer = Arc::clone(&stack.writer);
    let idle = stack.config.agent.session_idle_timeout_seconds;
    let mut runtime = AgentRuntime::new(provider, move |key| stack.agent_loop(key.session_id()))
        .with_store(store, history_limit)
        .with_memory(memory)
        .with_persistence(writer);
    if idle > 0 {
        runtime = runtime.with_idle_timeout(Duration::from_secs(idle));
    }

    channel.prompt();
    spawn_stdin_reader(session, in_tx);
    runtime.run(in_rx, out_tx, stop_rx).await;
    let _ = printer.await;

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Resolves on Ctrl+C, or on SIGTERM where the platform has it.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sigterm_triggers_shutdown() {
        let waiter = tokio::spawn(shutdown_signal());
        // Let the handler register before the signal is raised.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let pid = std::process::id().to_string();
        let status = std::process::Command::new("kill")
            .args(["-TERM", &pid])
            .status()
            .unwrap();
        assert!(status.success());
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("shutdown_signal did not resolve")
            .unwrap();
    }
}
