//! Terminal rendering of session updates.

use moody_mirror_core::present::Presentation;
use moody_mirror_core::session::{RunState, SessionSnapshot};
use std::io::Write;
use tokio::sync::mpsc::UnboundedReceiver;

/// Writes every update until all senders are gone, then hands the writer back.
pub async fn render<W: Write>(mut rx: UnboundedReceiver<Presentation>, mut out: W) -> W {
    while let Some(update) = rx.recv().await {
        if let Some(text) = format_update(&update) {
            if let Err(e) = writeln!(out, "{text}") {
                tracing::debug!(error = %e, "console write failed");
            }
        }
    }
    out
}

pub fn format_update(update: &Presentation) -> Option<String> {
    let text = match update {
        Presentation::Status(status) => format!("· {status}"),
        Presentation::Roast(text) => format!("\n  \"{text}\""),
        Presentation::Expression { label, glyph } => format!("  {glyph}  ({label})"),
        Presentation::Log(entries) if entries.is_empty() => return None,
        Presentation::Log(entries) => {
            let mut out = String::from("  roast log:");
            for (i, entry) in entries.iter().enumerate() {
                out.push_str(&format!("\n   {:>2}. {entry}", i + 1));
            }
            out
        }
        Presentation::Scores(board) => format!(
            "  roasts: {}  karma: {}%  cringe: {}/100",
            board.roast_count, board.karma_percent, board.cringe_score
        ),
        Presentation::RunningChanged(true) => "[mirror running]".to_owned(),
        Presentation::RunningChanged(false) => "[mirror stopped]".to_owned(),
        Presentation::KarmaModeChanged(enabled) => {
            format!("[karma mode {}]", if *enabled { "on" } else { "off" })
        }
        Presentation::Prompt(text) => format!("\n{text}\n"),
    };
    Some(text)
}

pub fn print_help() {
    println!("commands: start | stop | toggle (t) | roast (r) | karma (k) | share (s) | status | help | quit (q)");
}

pub fn print_snapshot(snapshot: &SessionSnapshot) {
    let state = match snapshot.state {
        RunState::Running => "running",
        RunState::Idle => "idle",
    };
    println!(
        "state: {state}  roasts: {}  karma: {}%  cringe: {}/100  karma mode: {}  expression: {}",
        snapshot.scoreboard.roast_count,
        snapshot.scoreboard.karma_percent,
        snapshot.scoreboard.cringe_score,
        if snapshot.karma_mode { "on" } else { "off" },
        snapshot.last_expression,
    );
    println!("showing: {}", snapshot.display);
}
