//! Full-screen view of a running section.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute, queue,
    style::Print,
    terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};
use tracing::info;

use examgate_core::exam::ActiveSection;
use examgate_core::timer::UnloadRegistry;
use examgate_core::utils::truncate_string;

/// Timeout for polling terminal events (in milliseconds)
const EVENT_POLL_TIMEOUT_MS: u64 = 100;

/// Content lines shown under the clock
const PREVIEW_LINES: usize = 16;

const PREVIEW_WIDTH: usize = 76;

/// How the candidate left the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionExit {
    Submitted,
    TimeUp,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Submit,
    TimeUp,
    Leave,
}

/// Show the section until it is submitted, its time runs out, or the
/// candidate confirms leaving.
pub async fn run(mut section: ActiveSection, unload: &UnloadRegistry) -> Result<SectionExit> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    if let Err(e) = execute!(stdout, EnterAlternateScreen, Hide) {
        let _ = disable_raw_mode();
        return Err(e.into());
    }

    let result = event_loop(&mut stdout, &section, unload).await;

    // Restore terminal even if one of the steps fails, then report the first error
    let raw = disable_raw_mode();
    let screen = execute!(stdout, Show, LeaveAlternateScreen);

    match restored(result, raw, screen)? {
        Action::Submit => {
            section.submit().await?;
            Ok(SectionExit::Submitted)
        }
        Action::TimeUp => {
            // Drain the expiry signal so nothing else waits on it
            section.expired().await;
            section.submit_on_expire().await?;
            Ok(SectionExit::TimeUp)
        }
        Action::Leave => {
            info!(key = section.timer_key(), "Leaving section with clock running");
            drop(section);
            Ok(SectionExit::Left)
        }
    }
}

async fn event_loop(
    out: &mut impl Write,
    section: &ActiveSection,
    unload: &UnloadRegistry,
) -> Result<Action> {
    let preview = preview(section);
    let mut confirming: Option<&'static str> = None;
    let mut last_frame = None;

    loop {
        if section.is_expired() {
            return Ok(Action::TimeUp);
        }

        let frame = (section.countdown().formatted_remaining(), confirming);
        if last_frame.as_ref() != Some(&frame) {
            render(out, section, &preview, &frame.0, confirming)?;
            last_frame = Some(frame);
        }

        if !event::poll(Duration::ZERO)? {
            tokio::time::sleep(Duration::from_millis(EVENT_POLL_TIMEOUT_MS)).await;
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if confirming.is_some() {
            if matches!(key.code, KeyCode::Char('y') | KeyCode::Char('Y')) {
                return Ok(Action::Leave);
            }
            confirming = None;
            continue;
        }

        let quit = matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
            || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL));
        match key.code {
            KeyCode::Char('s') => return Ok(Action::Submit),
            _ if quit => match unload.confirmation() {
                Some(warning) => confirming = Some(warning),
                None => return Ok(Action::Leave),
            },
            _ => {}
        }
    }
}

fn render(
    out: &mut impl Write,
    section: &ActiveSection,
    preview: &[String],
    remaining: &str,
    confirming: Option<&str>,
) -> Result<()> {
    queue!(out, Clear(ClearType::All), MoveTo(0, 0))?;
    let mut lines = vec![
        format!(
            "{} section - attempt {}",
            section.kind().display_name(),
            section.attempt_id()
        ),
        format!("Time left: {}", remaining),
        format!("Answers drafted: {}", section.answers().len()),
        String::new(),
    ];
    lines.extend(preview.iter().cloned());
    lines.push(String::new());
    match confirming {
        Some(warning) => lines.push(format!("{} [y/N]", warning)),
        None => lines.push("[s] submit now   [q] leave".to_string()),
    }

    // Raw mode needs explicit carriage returns
    for line in lines {
        queue!(out, Print(line), Print("\r\n"))?;
    }
    out.flush()?;
    Ok(())
}

fn preview(section: &ActiveSection) -> Vec<String> {
    let pretty = serde_json::to_string_pretty(section.content()).unwrap_or_default();
    let mut lines: Vec<String> = pretty
        .lines()
        .take(PREVIEW_LINES)
        .map(|line| truncate_string(line, PREVIEW_WIDTH))
        .collect();
    if pretty.lines().count() > PREVIEW_LINES {
        lines.push("...".to_string());
    }
    lines
}

/// The loop's own error wins over a failure to restore the terminal.
fn restored<T>(result: Result<T>, raw: io::Result<()>, screen: io::Result<()>) -> Result<T> {
    let value = result?;
    raw?;
    screen?;
    Ok(value)
}
