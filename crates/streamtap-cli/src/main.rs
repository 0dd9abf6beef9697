//! streamtap CLI: terminal spectrum and metadata monitor for audio streams

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::Receiver;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use ratatui::widgets::*;
use serde::Deserialize;

use streamtap::audio::{
    fold_bands, AnalyzerConfig, AudioFormat, PlaybackState, SharedSpectrum, SpectrumAnalyzer,
};
use streamtap::config::observer::EVENT_CHANNEL_CAPACITY;
use streamtap::decode::SymphoniaDecoder;
use streamtap::session::{
    ChannelObserver, SessionEvent, SessionOptions, StatsSnapshot, StreamSession,
};
use streamtap::stream::TrackInfo;

/// Magnitudes below this many dB under full scale draw as empty
const DB_RANGE: f32 = 70.0;

#[derive(Parser, Debug)]
#[command(name = "streamtap", about = "Live spectrum and metadata for an audio stream", version)]
struct Cli {
    /// Stream URL, file:// URL or local file path
    url: String,

    /// FFT window size (power of two)
    #[arg(long)]
    window: Option<usize>,

    /// Number of windows averaged per frequency bin
    #[arg(long)]
    smoothing: Option<usize>,

    /// Number of display bands
    #[arg(long, default_value_t = 32, value_parser = clap::value_parser!(u16).range(1..=256))]
    bands: u16,

    /// Do not show stream metadata
    #[arg(long)]
    no_metadata: bool,

    /// Decode local files as fast as possible instead of in real time
    #[arg(long)]
    no_pacing: bool,

    /// TOML file with [analyzer] and [session] tables
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write log output to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Settings loaded from the optional config file
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
struct FileConfig {
    analyzer: AnalyzerConfig,
    session: SessionOptions,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerConfig::default(),
            session: SessionOptions {
                tap_enabled: true,
                metadata_enabled: true,
            },
        }
    }
}

impl FileConfig {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Command-line flags win over the file. The tap is always on: the
    /// spectrum is the whole point of this tool.
    fn apply_flags(mut self, cli: &Cli) -> Self {
        if let Some(window) = cli.window {
            self.analyzer.window_size = window;
        }
        if let Some(smoothing) = cli.smoothing {
            self.analyzer.smoothing_length = smoothing;
        }
        if cli.no_metadata {
            self.session.metadata_enabled = false;
        }
        self.session.tap_enabled = true;
        self
    }
}

fn is_network(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    // The full-screen UI owns stderr, so logs only go to a file
    let default_filter = if log_file.is_some() { "info" } else { "off" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    if let Some(path) = log_file {
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

struct App {
    url: String,
    state: PlaybackState,
    station: Option<String>,
    now_playing: String,
    format: Option<AudioFormat>,
    levels: Vec<u64>,
    bands: usize,
    stats: StatsSnapshot,
    last_error: Option<String>,
    play_started_at: Option<Instant>,
    user_stopped: bool,
    running: bool,
}

impl App {
    fn new(url: &str, bands: usize) -> Self {
        Self {
            url: url.to_string(),
            state: PlaybackState::Stopped,
            station: None,
            now_playing: String::new(),
            format: None,
            levels: vec![0; bands],
            bands,
            stats: StatsSnapshot::default(),
            last_error: None,
            play_started_at: None,
            user_stopped: false,
            running: true,
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged(state) => {
                self.state = state;
                match state {
                    PlaybackState::Playing => {
                        if self.play_started_at.is_none() {
                            self.play_started_at = Some(Instant::now());
                        }
                    }
                    PlaybackState::Stopped => {
                        self.play_started_at = None;
                        // Ended on its own: end of file or a decode failure
                        if !self.user_stopped {
                            self.running = false;
                        }
                    }
                    PlaybackState::Paused => {}
                }
            }
            SessionEvent::Error { message, .. } => {
                self.last_error = Some(message);
            }
            SessionEvent::Audio { format, .. } => {
                self.format = Some(format);
            }
            SessionEvent::Metadata(map) => {
                if let Some(name) = map.get("icy-name") {
                    self.station = Some(name.clone());
                }
                let info = TrackInfo::from_metadata(&map);
                if !info.is_empty() {
                    self.now_playing = info.to_string();
                }
            }
        }
    }

    /// Catch up with the session directly, in case a notification was lost
    fn sync_with(&mut self, session: &StreamSession) {
        if let Some(format) = session.current_format() {
            self.format = Some(format);
        }
        if session.is_stopped() && self.state != PlaybackState::Stopped {
            self.handle_event(SessionEvent::StateChanged(PlaybackState::Stopped));
        }
    }

    fn update_spectrum(&mut self, spectrum: &SharedSpectrum) {
        let frame = spectrum.snapshot();
        let folded = fold_bands(&frame.magnitudes, self.bands);
        for (level, magnitude) in self.levels.iter_mut().zip(folded) {
            *level = magnitude_to_level(magnitude);
        }
    }
}

/// Map a normalised magnitude to 0..=100 on a dB scale
fn magnitude_to_level(magnitude: f32) -> u64 {
    let db = 20.0 * magnitude.max(1e-9).log10();
    ((db + DB_RANGE) / DB_RANGE * 100.0).clamp(0.0, 100.0) as u64
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    let config = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    }
    .apply_flags(&cli);

    let spectrum = Arc::new(SharedSpectrum::new());
    let mut analyzer = SpectrumAnalyzer::new(AudioFormat::interleaved_f32(44100, 2), config.analyzer)
        .context("invalid analyzer settings")?;
    analyzer.set_observer(&spectrum);

    let decoder = SymphoniaDecoder::new().realtime(!cli.no_pacing && !is_network(&cli.url));
    let session = StreamSession::new(cli.url.clone(), config.session, Box::new(decoder))?;
    session.set_tap(Box::new(analyzer))?;

    let (observer, events) = session_observer();
    session.set_observer(&observer);

    let mut app = App::new(&cli.url, cli.bands as usize);

    // Enter TUI
    terminal::enable_raw_mode()?;
    io::stdout().execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)?;

    session.play();
    let result = run_ui(&mut terminal, &session, &spectrum, &events, &mut app);
    session.stop();

    // Restore terminal
    terminal::disable_raw_mode()?;
    io::stdout().execute(LeaveAlternateScreen)?;
    result?;

    if observer.dropped_events() > 0 {
        log::debug!("{} session events dropped", observer.dropped_events());
    }
    if let Some(error) = app.last_error {
        anyhow::bail!(error);
    }
    Ok(())
}

/// Audio events are left out: they would crowd state and error events out of
/// the channel whenever decoding runs ahead of the UI
fn session_observer() -> (Arc<ChannelObserver>, Receiver<SessionEvent>) {
    let (observer, events) = ChannelObserver::new(EVENT_CHANNEL_CAPACITY);
    (Arc::new(observer.without_audio()), events)
}

fn run_ui<B: Backend>(
    terminal: &mut Terminal<B>,
    session: &StreamSession,
    spectrum: &SharedSpectrum,
    events: &Receiver<SessionEvent>,
    app: &mut App,
) -> anyhow::Result<()> {
    let tick_rate = Duration::from_millis(33); // ~30fps
    let mut last_tick = Instant::now();

    while app.running {
        terminal.draw(|f| draw_ui(f, app))?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            app.running = false;
                        }
                        KeyCode::Char(' ') => {
                            if session.is_playing() {
                                session.pause();
                            } else {
                                app.user_stopped = false;
                                session.play();
                            }
                        }
                        KeyCode::Char('p') => {
                            app.user_stopped = false;
                            session.play();
                        }
                        KeyCode::Char('s') => {
                            app.user_stopped = true;
                            session.stop();
                            spectrum.clear();
                        }
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();

            while let Ok(event) = events.try_recv() {
                app.handle_event(event);
            }
            app.sync_with(session);
            app.update_spectrum(spectrum);
            app.stats = session.stats();
        }
    }

    Ok(())
}

fn draw_ui(f: &mut Frame, app: &App) {
    let area = f.area();

    let outer = Block::default()
        .title(format!(" streamtap v{} ", env!("CARGO_PKG_VERSION")))
        .title_alignment(Alignment::Center)
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded);
    let inner = outer.inner(area);
    f.render_widget(outer, area);

    let chunks = Layout::vertical([
        Constraint::Length(4), // metadata
        Constraint::Min(6),    // spectrum
        Constraint::Length(4), // stats
        Constraint::Length(1), // help bar
    ])
    .split(inner);

    draw_metadata(f, app, chunks[0]);
    draw_spectrum(f, app, chunks[1]);
    draw_stats(f, app, chunks[2]);
    draw_help(f, chunks[3]);
}

fn draw_metadata(f: &mut Frame, app: &App, area: Rect) {
    let station = app
        .station
        .as_deref()
        .unwrap_or_else(|| extract_host(&app.url));
    let now = if app.now_playing.is_empty() {
        "---"
    } else {
        &app.now_playing
    };
    let state_color = match app.state {
        PlaybackState::Playing => Color::Green,
        PlaybackState::Paused => Color::Yellow,
        PlaybackState::Stopped => Color::Red,
    };
    let max_url_len = area.width.saturating_sub(9) as usize;
    let text = vec![
        Line::from(vec![
            Span::styled("  Station: ", Style::default().fg(Color::DarkGray)),
            Span::styled(station, Style::default().fg(Color::White).bold()),
            Span::raw("  "),
            Span::styled(app.state.to_string(), Style::default().fg(state_color)),
        ]),
        Line::from(vec![
            Span::styled("  Now Playing: ", Style::default().fg(Color::DarkGray)),
            Span::styled(now, Style::default().fg(Color::Yellow)),
        ]),
        Line::from(vec![
            Span::styled("  URL: ", Style::default().fg(Color::DarkGray)),
            Span::styled(
                truncate_str(&app.url, max_url_len),
                Style::default().fg(Color::DarkGray),
            ),
        ]),
    ];
    f.render_widget(Paragraph::new(text), area);
}

fn draw_spectrum(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Spectrum ")
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::DarkGray));

    // Stretch each band across the available width
    let width = area.width.saturating_sub(2) as usize;
    let repeat = (width / app.bands.max(1)).max(1);
    let data: Vec<u64> = app
        .levels
        .iter()
        .flat_map(|&level| std::iter::repeat(level).take(repeat))
        .collect();

    let sparkline = Sparkline::default()
        .block(block)
        .data(&data)
        .max(100)
        .style(Style::default().fg(Color::Cyan));

    f.render_widget(sparkline, area);
}

fn draw_stats(f: &mut Frame, app: &App, area: Rect) {
    let format_str = app
        .format
        .map(|format| format.to_string())
        .unwrap_or_else(|| "---".to_string());
    let uptime = match app.play_started_at {
        Some(started) => format_uptime(started),
        None => "00:00".to_string(),
    };

    let block = Block::default()
        .title(" Session ")
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::DarkGray));
    let mut lines = vec![Line::from(vec![
        Span::styled("  Format: ", Style::default().fg(Color::DarkGray)),
        Span::styled(format_str, Style::default().fg(Color::White)),
        Span::raw("  "),
        Span::styled("Uptime: ", Style::default().fg(Color::DarkGray)),
        Span::styled(uptime, Style::default().fg(Color::White)),
    ])];
    lines.push(Line::from(vec![
        Span::styled("  Buffers: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            format_number(app.stats.buffers_delivered),
            Style::default().fg(Color::White),
        ),
        Span::raw("  "),
        Span::styled("Frames: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            format_number(app.stats.frames_delivered),
            Style::default().fg(Color::White),
        ),
        Span::raw("  "),
        Span::styled("Metadata: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            format!("{}", app.stats.metadata_updates),
            Style::default().fg(Color::White),
        ),
        Span::raw("  "),
        Span::styled("Errors: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            format!("{}", app.stats.decode_errors),
            Style::default().fg(if app.stats.decode_errors > 0 {
                Color::Red
            } else {
                Color::White
            }),
        ),
    ]));
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_help(f: &mut Frame, area: Rect) {
    let help = Line::from(vec![
        Span::styled("  'q' ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  |  "),
        Span::styled("space ", Style::default().fg(Color::Yellow)),
        Span::raw("pause/play  |  "),
        Span::styled("'s' ", Style::default().fg(Color::Yellow)),
        Span::raw("stop  |  "),
        Span::styled("'p' ", Style::default().fg(Color::Yellow)),
        Span::raw("play"),
    ]);
    f.render_widget(Paragraph::new(help).alignment(Alignment::Left), area);
}

fn extract_host(url: &str) -> &str {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or(url)
}

fn truncate_str(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else if max > 3 {
        let head: String = s.chars().take(max - 3).collect();
        format!("{}...", head)
    } else {
        s.chars().take(max).collect()
    }
}

fn format_uptime(started: Instant) -> String {
    let secs = started.elapsed().as_secs();
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

fn format_number(n: u64) -> String {
    if n >= 10_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 100_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}
