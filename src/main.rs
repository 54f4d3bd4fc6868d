use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use pagepilot_lib::agent_engine::event_bus::AgentUpdate;
use pagepilot_lib::agent_engine::state::TerminationReason;
use pagepilot_lib::config::{load_config, AppConfig};

const USAGE: &str = "usage: pagepilot [--tools] <goal>";

#[tokio::main]
async fn main() {
    pagepilot_lib::init_tracing();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let tool_chat = args.first().is_some_and(|a| a == "--tools");
    if tool_chat {
        args.remove(0);
    }
    let goal = args.join(" ");
    if goal.trim().is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(2);
    }

    let config = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config; using defaults");
            AppConfig::default()
        }
    };

    let agent = match pagepilot_lib::start(config) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let handle = agent.handle;
    let mut updates = handle.subscribe();

    let started = if tool_chat {
        handle.start_tool_chat(goal).await
    } else {
        handle.start_task(goal).await
    };
    if let Err(e) = started {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut awaiting_answer = false;

    let code = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nStopping...");
                handle.stop_task().await;
                awaiting_answer = false;
            }
            line = stdin.next_line(), if awaiting_answer => {
                let approved = matches!(
                    line.ok().flatten().map(|l| l.trim().to_lowercase()).as_deref(),
                    Some("y" | "yes")
                );
                awaiting_answer = false;
                handle.confirm_action(approved).await;
            }
            update = updates.recv() => match update {
                Ok(AgentUpdate::ConfirmationRequired(req)) => {
                    if let Some(explanation) = &req.explanation {
                        println!("The model asks for confirmation: {explanation}");
                    }
                    let reasons: Vec<String> = req.reasons.iter().map(|r| format!("{r:?}")).collect();
                    println!(
                        "Allow {} {} on {}? [{}] (y/N)",
                        req.action,
                        req.args,
                        req.url.as_deref().unwrap_or("unknown page"),
                        reasons.join(", ")
                    );
                    awaiting_answer = true;
                }
                Ok(AgentUpdate::ModelText(text)) => println!("{text}"),
                Ok(AgentUpdate::ActionStarted { name, args }) => println!("-> {name} {args}"),
                Ok(AgentUpdate::ActionFinished { name, result }) if !result.success => {
                    println!("   {name} failed: {}", result.error.unwrap_or_default());
                }
                Ok(AgentUpdate::Finished(outcome)) => {
                    // Completion text was already printed as model text.
                    if outcome.reason == TerminationReason::Completed {
                        break 0;
                    }
                    println!("{}", outcome.message);
                    break 1;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "update receiver lagged"),
                Err(RecvError::Closed) => break 1,
            },
        }
    };

    if let Err(e) = handle.shutdown().await {
        tracing::warn!(error = %e, "shutdown event not delivered");
    }
    if let Err(e) = agent.task.await {
        tracing::warn!(error = %e, "agent task panicked");
    }
    std::process::exit(code);
}
