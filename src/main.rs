use std::io;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::*;
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, Borders, Clear, Gauge, Paragraph};

use squadsim_terminal::config::{self, FeedMode, Settings};
use squadsim_terminal::fake_feed;
use squadsim_terminal::push_feed::PushManager;
use squadsim_terminal::state::{
    MatchOutcome, SyncCommand, SyncDelta, SyncState, TrackTarget, apply_delta,
};
use squadsim_terminal::status_fetch::RestStatusApi;
use squadsim_terminal::sync::{SyncHandle, SyncTuning, spawn_synchronizer};

struct App {
    state: SyncState,
    should_quit: bool,
    help_overlay: bool,
    cmd_tx: mpsc::Sender<SyncCommand>,
    squad_id: Option<String>,
    feed_label: &'static str,
}

impl App {
    fn new(
        target: &TrackTarget,
        cmd_tx: mpsc::Sender<SyncCommand>,
        squad_id: Option<String>,
        feed_label: &'static str,
    ) -> Self {
        Self {
            state: SyncState::tracking(target),
            should_quit: false,
            help_overlay: false,
            cmd_tx,
            squad_id,
            feed_label,
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('n') => self.request_new_match(),
            KeyCode::Char('c') => self.state.console.clear(),
            KeyCode::Char('?') => self.help_overlay = !self.help_overlay,
            _ => {}
        }
    }

    fn request_new_match(&mut self) {
        let Some(squad_id) = self.squad_id.clone() else {
            apply_delta(
                &mut self.state,
                SyncDelta::Console("[WARN] set SQUADSIM_SQUAD_ID to request a match".to_string()),
            );
            return;
        };
        let _ = self.cmd_tx.send(SyncCommand::CreateMatch { squad_id });
        apply_delta(
            &mut self.state,
            SyncDelta::Console("[INFO] requesting a new match".to_string()),
        );
    }

    fn on_complete(&mut self, outcome: MatchOutcome) {
        let line = match outcome {
            MatchOutcome::Finished {
                home_score,
                away_score,
                winner,
            } => match winner {
                Some(winner) => {
                    format!("[INFO] full time {home_score}-{away_score}, {winner} take it")
                }
                None => format!("[INFO] full time {home_score}-{away_score}, honors even"),
            },
            MatchOutcome::JobFailed { error } => {
                format!("[ALERT] match creation failed: {error}")
            }
        };
        apply_delta(&mut self.state, SyncDelta::Console(line));
    }
}

fn main() -> io::Result<()> {
    config::load_env();
    let settings = Settings::from_env();

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = ratatui::Terminal::new(backend)?;

    let (tx, rx) = mpsc::channel();
    let mut live_handle: Option<SyncHandle> = None;

    let cmd_tx = match settings.feed_mode {
        FeedMode::Live => match start_live_feed(&settings, tx.clone()) {
            Ok(handle) => {
                let cmd_tx = handle.commands();
                live_handle = Some(handle);
                cmd_tx
            }
            Err(err) => {
                let _ = tx.send(SyncDelta::Console(format!(
                    "[ALERT] live feed unavailable: {err:#}; running the demo feed"
                )));
                spawn_demo_feed(tx.clone())
            }
        },
        FeedMode::Fake => spawn_demo_feed(tx.clone()),
    };

    let demo = live_handle.is_none();
    let feed_label = if demo {
        FeedMode::Fake.label()
    } else {
        FeedMode::Live.label()
    };
    let squad_id = settings
        .squad_id
        .clone()
        .or_else(|| demo.then(|| "squad-demo".to_string()));

    let mut app = App::new(&settings.target, cmd_tx, squad_id, feed_label);
    let res = run_app(&mut terminal, &mut app, rx);

    if let Some(handle) = live_handle {
        handle.stop();
    }

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("error: {err}");
    }
    Ok(())
}

fn spawn_demo_feed(tx: mpsc::Sender<SyncDelta>) -> mpsc::Sender<SyncCommand> {
    let (cmd_tx, cmd_rx) = mpsc::channel();
    fake_feed::spawn_fake_feed(tx, cmd_rx);
    cmd_tx
}

fn start_live_feed(settings: &Settings, tx: mpsc::Sender<SyncDelta>) -> anyhow::Result<SyncHandle> {
    let api = RestStatusApi::from_settings(settings)
        .ok_or_else(|| anyhow!("SQUADSIM_API_BASE is not set"))?;
    let manager = PushManager::from_settings(settings)
        .ok_or_else(|| anyhow!("no push endpoint; set SQUADSIM_WS_URL or SQUADSIM_API_BASE"))?;
    let subscription = manager.open();
    let tuning = SyncTuning::from_settings(settings);
    Ok(spawn_synchronizer(
        api,
        subscription,
        settings.target.clone(),
        tuning,
        tx,
    ))
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    rx: mpsc::Receiver<SyncDelta>,
) -> io::Result<()> {
    let tick_rate = Duration::from_millis(250);
    let mut last_tick = Instant::now();

    loop {
        while let Ok(delta) = rx.try_recv() {
            apply_delta(&mut app.state, delta);
        }
        if let Some(outcome) = app.state.take_completion() {
            app.on_complete(outcome);
        }

        terminal.draw(|f| ui(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.on_key(key);
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn ui(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(frame.size());

    let header = Paragraph::new(header_text(app)).block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, chunks[0]);

    render_watch(frame, chunks[1], app);

    let footer = Paragraph::new(footer_text()).block(Block::default().borders(Borders::TOP));
    frame.render_widget(footer, chunks[2]);

    if app.help_overlay {
        render_help_overlay(frame, frame.size());
    }
}

fn header_text(app: &App) -> String {
    let title = format!(
        "SQUADSIM WATCH | Feed: {} | Transport: {}",
        app.feed_label,
        app.state.transport.label()
    );
    let line1 = format!("  .--.  {title}");
    let line2 = " ( () )".to_string();
    let line3 = "  '--'".to_string();
    format!("{line1}\n{line2}\n{line3}")
}

fn footer_text() -> String {
    "n New match | c Clear console | ? Help | q/Esc Quit".to_string()
}

fn render_watch(frame: &mut Frame, area: Rect, app: &App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(5),
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(5),
        ])
        .split(area);

    let scoreboard = Paragraph::new(scoreboard_text(&app.state))
        .block(Block::default().title("Scoreboard").borders(Borders::ALL));
    frame.render_widget(scoreboard, rows[0]);

    render_progress(frame, rows[1], &app.state);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(30), Constraint::Length(34)])
        .split(rows[2]);

    let visible = columns[0].height.saturating_sub(2) as usize;
    let tape = Paragraph::new(timeline_text(&app.state, visible.max(1))).block(
        Block::default()
            .title("Match Timeline")
            .borders(Borders::ALL),
    );
    frame.render_widget(tape, columns[0]);

    let sync = Paragraph::new(sync_panel_text(app))
        .block(Block::default().title("Sync").borders(Borders::ALL));
    frame.render_widget(sync, columns[1]);

    let console = Paragraph::new(console_text(&app.state))
        .block(Block::default().title("Console").borders(Borders::ALL));
    frame.render_widget(console, rows[3]);
}

fn scoreboard_text(state: &SyncState) -> String {
    let home = state.home_team.as_deref().unwrap_or("HOME");
    let away = state.away_team.as_deref().unwrap_or("AWAY");
    let line1 = format!("{home} {} - {} {away}", state.home_score, state.away_score);

    let line2 = if let Some(failure) = &state.failure {
        failure.clone()
    } else if state.completed {
        match &state.winner {
            Some(winner) => format!("Full time. {winner} take it."),
            None => "Full time. Honors even.".to_string(),
        }
    } else if state.message.is_empty() {
        "Waiting for the first update...".to_string()
    } else {
        state.message.clone()
    };

    let line3 = match (&state.job_id, &state.match_id) {
        (_, Some(match_id)) => format!("match {match_id}"),
        (Some(job_id), None) => format!("job {job_id}"),
        (None, None) => "nothing tracked; press n to request a match".to_string(),
    };

    format!("{line1}\n{line2}\n{line3}")
}

fn render_progress(frame: &mut Frame, area: Rect, state: &SyncState) {
    let color = if state.failure.is_some() {
        Color::Red
    } else if state.completed {
        Color::Green
    } else {
        Color::Cyan
    };
    let label = match state.status {
        Some(status) => format!("{}% {}", state.progress, status.wire_name()),
        None => format!("{}%", state.progress),
    };
    let gauge = Gauge::default()
        .block(Block::default().title("Progress").borders(Borders::ALL))
        .gauge_style(Style::default().fg(color))
        .percent(u16::from(state.progress.min(100)))
        .label(label);
    frame.render_widget(gauge, area);
}

fn timeline_text(state: &SyncState, visible: usize) -> String {
    if state.logs.is_empty() {
        return "No plays yet".to_string();
    }
    let start = state.logs.len().saturating_sub(visible);
    state.logs[start..]
        .iter()
        .map(|entry| format!("{:>3}' {}", entry.minute, entry.description))
        .collect::<Vec<_>>()
        .join("\n")
}

fn sync_panel_text(app: &App) -> String {
    let state = &app.state;
    let mut lines = vec![format!("Transport: {}", state.transport.label())];
    if let Some(job_id) = &state.job_id {
        lines.push(format!("Job: {job_id}"));
    }
    if let Some(match_id) = &state.match_id {
        lines.push(format!("Match: {match_id}"));
    }
    match state.status {
        Some(status) => lines.push(format!("Status: {}", status.wire_name())),
        None => lines.push("Status: (none yet)".to_string()),
    }
    lines.push(format!("Plays logged: {}", state.logs.len()));
    if let Some(failure) = &state.failure {
        lines.push(format!("Error: {failure}"));
    }
    lines.join("\n")
}

fn console_text(state: &SyncState) -> String {
    if state.console.is_empty() {
        return "No alerts yet".to_string();
    }
    state
        .console
        .iter()
        .rev()
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_help_overlay(frame: &mut Frame, area: Rect) {
    let popup_area = centered_rect(60, 60, area);
    frame.render_widget(Clear, popup_area);

    let text = [
        "Squadsim Watch - Help",
        "",
        "Keys:",
        "  n            Request a new match for your squad",
        "  c            Clear the console",
        "  ?            Toggle help",
        "  q / Esc      Quit",
        "",
        "Transport badge:",
        "  PUSH         live socket events",
        "  PULL         periodic status fetches",
        "  CONNECTING   waiting for the socket",
    ]
    .join("\n");

    let help = Paragraph::new(text)
        .block(Block::default().title("Help").borders(Borders::ALL))
        .style(Style::default());
    frame.render_widget(help, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);

    horizontal[1]
}
