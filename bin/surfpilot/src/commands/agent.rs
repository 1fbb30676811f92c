use base64::Engine;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use surfpilot_agent::{allow_all, Agent, LocalSurfaceFactory, SafetyAcknowledger, SurfaceFactory};
use surfpilot_core::types::TranscriptItem;
use surfpilot_core::{Config, NotificationKind, Paths, TurnOutcome, TurnStatus};
use surfpilot_providers::create_oracle;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SESSION_ID: &str = "cli";

fn print_notification(text: &str, kind: NotificationKind) {
    match kind {
        NotificationKind::Action => println!("  → {}", text),
        NotificationKind::Thinking => println!("{}", text),
        NotificationKind::Complete => println!("✓ done"),
        NotificationKind::Error => eprintln!("✗ {}", text),
        NotificationKind::Interrupted => println!("■ interrupted"),
    }
}

type Lines = Arc<Mutex<mpsc::UnboundedReceiver<String>>>;

fn prompt(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

/// Read stdin on a plain thread so the prompt can be abandoned on Ctrl+C.
/// The channel closes at EOF.
fn spawn_stdin_reader() -> Lines {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line.trim().to_string()).is_err() {
                break;
            }
        }
    });
    Arc::new(Mutex::new(rx))
}

fn safety_prompt(lines: Lines) -> SafetyAcknowledger {
    Arc::new(move |message: &str| {
        tokio::task::block_in_place(|| {
            eprintln!("⚠ Safety check: {}", message);
            prompt("Allow? (y/n): ");
            let answer = lines.blocking_lock().blocking_recv();
            matches!(answer.map(|a| a.to_lowercase()).as_deref(), Some("y") | Some("yes"))
        })
    })
}

/// Ctrl+C during a turn interrupts it; at the prompt it asks the main loop
/// to shut down.
fn on_ctrl_c(turn_running: &AtomicBool, interrupt: &AtomicBool, quit: &CancellationToken) {
    if turn_running.load(Ordering::SeqCst) {
        interrupt.store(true, Ordering::SeqCst);
        eprintln!("\nInterrupting after the current step...");
    } else {
        quit.cancel();
    }
}

/// Decode and write each screenshot produced by a turn. Returns how many
/// files were written.
fn save_screenshots(dir: &Path, turn: usize, items: &[TranscriptItem]) -> anyhow::Result<usize> {
    std::fs::create_dir_all(dir)?;
    let mut written = 0;
    for item in items {
        if let TranscriptItem::UiActionResult { screenshot, .. } = item {
            if screenshot.is_empty() {
                continue;
            }
            let bytes = match base64::engine::general_purpose::STANDARD.decode(screenshot) {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable screenshot");
                    continue;
                }
            };
            written += 1;
            let path = dir.join(format!("turn{:03}-{:03}.png", turn, written));
            std::fs::write(&path, bytes)?;
        }
    }
    Ok(written)
}

async fn run_turn(
    agent: &Agent,
    history: &[TranscriptItem],
    text: &str,
    turn: usize,
    turn_running: &AtomicBool,
    screenshots: Option<&Path>,
) -> TurnOutcome {
    turn_running.store(true, Ordering::SeqCst);
    let outcome = agent.run_turn(history, text, &print_notification).await;
    turn_running.store(false, Ordering::SeqCst);
    if let Some(dir) = screenshots {
        match save_screenshots(dir, turn, &outcome.items) {
            Ok(n) if n > 0 => info!(count = n, dir = %dir.display(), "Saved screenshots"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to save screenshots"),
        }
    }
    outcome
}

pub async fn run(message: Option<String>, url: Option<String>, screenshots: Option<PathBuf>) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let config = Config::load_or_default(&paths)?;
    let oracle = create_oracle(&config)?;

    let mut factory = LocalSurfaceFactory::from_config(&config, &paths);
    if let Some(ref url) = url {
        factory = factory.with_start_url(url);
    }
    let provisioned = factory.provision(SESSION_ID).await?;
    let surface = provisioned.surface.clone();

    let lines = spawn_stdin_reader();
    let acknowledge: SafetyAcknowledger = if config.agents.defaults.auto_acknowledge_safety_checks {
        allow_all()
    } else {
        safety_prompt(lines.clone())
    };
    let agent = Agent::from_defaults(SESSION_ID, &config.agents.defaults, oracle, provisioned.surface)
        .with_safety_acknowledger(acknowledge);

    let quit = CancellationToken::new();
    let turn_running = Arc::new(AtomicBool::new(false));
    {
        let interrupt = agent.interrupt_handle();
        let turn_running = turn_running.clone();
        let quit = quit.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                on_ctrl_c(&turn_running, &interrupt, &quit);
            }
        });
    }

    if let Some(msg) = message {
        let outcome = run_turn(&agent, &[], &msg, 1, &turn_running, screenshots.as_deref()).await;
        let failed = outcome.status == TurnStatus::Failed;
        if let Err(e) = surface.close().await {
            warn!(error = %e, "Failed to close browser");
        }
        if failed {
            anyhow::bail!(outcome.error.unwrap_or_else(|| "turn failed".to_string()));
        }
        return Ok(());
    }

    println!("surfpilot interactive mode (Ctrl+C interrupts, /quit exits)");
    println!();
    let mut history: Vec<TranscriptItem> = Vec::new();
    let mut turn = 0;
    loop {
        prompt("> ");
        let next = {
            let mut lines = lines.lock().await;
            tokio::select! {
                _ = quit.cancelled() => None,
                line = lines.recv() => line,
            }
        };
        let Some(line) = next else {
            println!();
            break;
        };
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }
        turn += 1;
        let outcome = run_turn(&agent, &history, &line, turn, &turn_running, screenshots.as_deref()).await;
        history.extend(outcome.items);
    }

    if let Err(e) = surface.close().await {
        warn!(error = %e, "Failed to close browser");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctrl_c_interrupts_turn_or_quits_at_prompt() {
        let running = AtomicBool::new(true);
        let interrupt = AtomicBool::new(false);
        let quit = CancellationToken::new();

        on_ctrl_c(&running, &interrupt, &quit);
        assert!(interrupt.load(Ordering::SeqCst));
        assert!(!quit.is_cancelled());

        running.store(false, Ordering::SeqCst);
        interrupt.store(false, Ordering::SeqCst);
        on_ctrl_c(&running, &interrupt, &quit);
        assert!(!interrupt.load(Ordering::SeqCst));
        assert!(quit.is_cancelled());
    }

    #[test]
    fn test_save_screenshots_skips_empty_and_non_results() {
        let dir = std::env::temp_dir().join(format!("surfpilot-shots-{}", std::process::id()));
        let items = vec![
            TranscriptItem::user("go"),
            TranscriptItem::UiActionResult {
                call_id: "c1".to_string(),
                screenshot: "aGVsbG8=".to_string(),
                current_url: None,
                acknowledged_safety_checks: vec![],
            },
            TranscriptItem::UiActionResult {
                call_id: "c2".to_string(),
                screenshot: String::new(),
                current_url: None,
                acknowledged_safety_checks: vec![],
            },
        ];
        let written = save_screenshots(&dir, 1, &items).unwrap();
        assert_eq!(written, 1);
        assert_eq!(std::fs::read(dir.join("turn001-001.png")).unwrap(), b"hello");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
