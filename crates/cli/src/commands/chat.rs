//! `flavia chat`: interactive or single-message chat mode.
//!
//! Answers stream to stdout as they are generated. Ctrl+C stops the current
//! answer without saving it; `exit` or `quit` leaves the session.

use std::io::Write;
use std::sync::Arc;

use flavia_agent::{AgentLoop, AgentStreamEvent};
use flavia_core::message::ThreadId;
use tokio::io::{self, AsyncBufReadExt, BufReader};

pub async fn run(
    message: Option<String>,
    thread: Option<String>,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let agent = super::build_agent(&config)?;
    let thread_id = thread.map(ThreadId).unwrap_or_default();

    if let Some(msg) = message {
        // Single message mode
        let ok = stream_answer(&agent, &thread_id, msg, verbose).await?;
        if !ok {
            return Err("Flavia could not answer".into());
        }
        return Ok(());
    }

    println!();
    println!("  Flavia: flood preparedness and response");
    println!();
    println!("  Model:   {}", config.model.deployment);
    println!("  Thread:  {thread_id}");
    println!();
    println!("  Type your question and press Enter.");
    println!("  Type 'exit' or 'quit' to leave.");
    println!();

    let mut lines = BufReader::new(io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if is_exit(input) {
            break;
        }

        stream_answer(&agent, &thread_id, input.to_string(), verbose).await?;
    }

    println!();
    println!("  Stay safe.");
    println!();

    Ok(())
}

fn is_exit(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

/// Run one turn, printing answer text as it arrives. Returns false if the
/// turn failed or was interrupted.
async fn stream_answer(
    agent: &Arc<AgentLoop>,
    thread_id: &ThreadId,
    question: String,
    verbose: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    let mut turn = agent.run_stream(thread_id.clone(), question);
    let mut stdout = std::io::stdout();
    let mut succeeded = false;

    print!("\n  Flavia > ");
    stdout.flush()?;

    loop {
        let event = tokio::select! {
            event = turn.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                turn.cancel();
                eprintln!("\n  [Interrupted]");
                break;
            }
        };

        let Some(event) = event else { break };
        match event {
            AgentStreamEvent::Chunk { content } => {
                print!("{content}");
                stdout.flush()?;
            }
            AgentStreamEvent::ToolCall { name, input, .. } if verbose => {
                eprintln!("\n  [tool] {name} {input}");
            }
            AgentStreamEvent::ToolResult { name, success, .. } if verbose => {
                eprintln!("  [tool] {name} {}", if success { "ok" } else { "failed" });
            }
            AgentStreamEvent::Done { .. } => succeeded = true,
            AgentStreamEvent::Error { message } => {
                eprintln!("\n  [Error] {message}");
            }
            _ => {}
        }
    }

    println!("\n");
    Ok(succeeded)
}
