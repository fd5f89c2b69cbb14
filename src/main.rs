use anyhow::Result;
use chrono::Local;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton, MouseEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Cell, Chart, Dataset, GraphType, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufRead, BufReader},
    path::PathBuf,
    sync::mpsc::{self, Receiver, Sender},
    thread,
    time::Duration,
};
use thiserror::Error;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const API_URL_ENV: &str = "STOCKPRO_API_URL";
const REQUEST_TIMEOUT_SECS: u64 = 10;
/// The chart renders at most this many of the newest history points.
const CHART_WINDOW: usize = 90;

/// Message sent from the background search thread to the main thread.
/// `seq` identifies the search generation that produced it.
#[derive(Debug)]
struct SearchOutcome {
    seq: u64,
    result: std::result::Result<(Quote, Analysis), SearchError>,
}

/// Failure classes for one search, each with its user-facing message.
#[derive(Debug, Error)]
enum SearchError {
    /// Quote lookup returned a non-success status.
    #[error("Stock not found")]
    NotFound,
    /// Quote resolved but the analysis lookup did not.
    #[error("Analysis failed")]
    AnalysisUnavailable,
    /// Network, timeout, or decode failure outside the API contract.
    /// The payload keeps the underlying detail.
    #[error("Failed to fetch data")]
    Transport(String),
}

impl SearchError {
    fn transport(err: impl std::fmt::Display) -> Self {
        SearchError::Transport(err.to_string())
    }
}

/// Quote payload returned by `GET /api/stock/{symbol}`.
/// Extra backend fields (dividend_yield, per-point volume) are ignored.
#[derive(Clone, Debug, Deserialize)]
struct Quote {
    symbol: String,
    name: String,
    current_price: Option<f64>,
    market_cap: Option<f64>,
    pe_ratio: Option<f64>,
    #[serde(default)]
    history: Vec<PricePoint>,
}

#[derive(Clone, Debug, Deserialize)]
struct PricePoint {
    date: String,
    price: f64,
}

/// Envelope returned by `GET /api/analyze/{symbol}`.
#[derive(Clone, Debug, Deserialize)]
struct AnalysisEnvelope {
    analysis: Analysis,
}

#[derive(Clone, Debug, Deserialize)]
struct Analysis {
    signal: Signal,
    score: f64,
    #[serde(default)]
    indicators: HashMap<String, Option<f64>>,
}

impl Analysis {
    /// Indicator value by name; `None` covers both a missing key and an
    /// explicit null from the service (not computable for this history).
    fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied().flatten()
    }
}

/// Recommendation produced by the analysis service.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Signal::Buy),
            "SELL" => Some(Signal::Sell),
            "HOLD" => Some(Signal::Hold),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Signal::Buy => "BUY",
            Signal::Sell => "SELL",
            Signal::Hold => "HOLD",
        }
    }

    fn color(self) -> Color {
        match self {
            Signal::Buy => Color::Green,
            Signal::Sell => Color::Red,
            Signal::Hold => Color::Yellow,
        }
    }
}

/// News story sentiment, shown as a colored dot next to the source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    fn color(self) -> Color {
        match self {
            Sentiment::Positive => Color::Green,
            Sentiment::Negative => Color::Red,
            Sentiment::Neutral => Color::Yellow,
        }
    }
}

/// One row of the market movers panel.
#[derive(Clone, Debug)]
struct Mover {
    symbol: String,
    name: String,
    price: f64,
    change: f64,
    change_percent: f64,
    recommendation: Signal,
}

struct NewsItem {
    title: &'static str,
    source: &'static str,
    time: &'static str,
    summary: &'static str,
    sentiment: Sentiment,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum SearchStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Failed,
}

/// State owned by the search flow. Only mutated through `begin` and `apply`,
/// which keeps `quote`/`analysis` both present exactly when the status is
/// Success and `error` present exactly when it is Failed.
#[derive(Default)]
struct SearchState {
    query: String,
    status: SearchStatus,
    quote: Option<Quote>,
    analysis: Option<Analysis>,
    error: Option<String>,
    /// Generation counter of the most recently triggered search.
    seq: u64,
}

impl SearchState {
    /// Start a new search generation: discard prior results and enter Loading.
    fn begin(&mut self) -> u64 {
        self.seq += 1;
        self.status = SearchStatus::Loading;
        self.quote = None;
        self.analysis = None;
        self.error = None;
        self.seq
    }

    /// Install a completed outcome. Outcomes from a superseded search (stale
    /// `seq`) are discarded. Returns whether the outcome was applied.
    fn apply(&mut self, outcome: SearchOutcome) -> bool {
        if outcome.seq != self.seq {
            return false;
        }
        match outcome.result {
            Ok((quote, analysis)) => {
                self.quote = Some(quote);
                self.analysis = Some(analysis);
                self.error = None;
                self.status = SearchStatus::Success;
            }
            Err(err) => {
                self.quote = None;
                self.analysis = None;
                self.error = Some(err.to_string());
                self.status = SearchStatus::Failed;
            }
        }
        true
    }
}

/// Tracks clickable UI regions for mouse interaction
#[derive(Default, Clone)]
struct ClickableRegions {
    search_bar: Rect,
    /// Individual mover rows: (rect, row_index)
    mover_rows: Vec<(Rect, usize)>,
}

#[derive(Debug)]
enum InputMode {
    /// Browsing: keys navigate the movers list and control the app.
    Normal,
    /// Typing in the search bar.
    Search,
}

struct App {
    api_base: String,
    search: SearchState,
    movers: Vec<Mover>,
    news: Vec<NewsItem>,
    sp500: Vec<PricePoint>,
    input_mode: InputMode,
    movers_state: TableState,
    /// Wall-clock stamp of the last completed search.
    last_updated: Option<String>,
    clickable: ClickableRegions,
    outcome_receiver: Receiver<SearchOutcome>,
    outcome_sender: Sender<SearchOutcome>,
}

impl App {
    fn new() -> Self {
        let (outcome_sender, outcome_receiver) = mpsc::channel();
        let mut movers_state = TableState::default();
        movers_state.select(Some(0));

        App {
            api_base: api_base_url(),
            search: SearchState::default(),
            movers: load_movers(),
            news: default_news(),
            sp500: sp500_series(),
            input_mode: InputMode::Search,
            movers_state,
            last_updated: None,
            clickable: ClickableRegions::default(),
            outcome_receiver,
            outcome_sender,
        }
    }

    /// Kick off one search for the current query in a background thread.
    /// An empty or whitespace-only query is a no-op: no state change, no
    /// request issued.
    fn trigger_search(&mut self) {
        let symbol = self.search.query.trim().to_string();
        if symbol.is_empty() {
            return;
        }

        let seq = self.search.begin();
        let base = self.api_base.clone();
        let sender = self.outcome_sender.clone();

        thread::spawn(move || {
            let result = run_search(&base, &symbol);
            let _ = sender.send(SearchOutcome { seq, result });
        });
    }

    /// Process any pending outcomes from the background thread (non-blocking).
    fn process_search_results(&mut self) {
        while let Ok(outcome) = self.outcome_receiver.try_recv() {
            let applied = self.search.apply(outcome);
            if applied && self.search.status == SearchStatus::Success {
                self.last_updated = Some(Local::now().format("%H:%M:%S").to_string());
            }
        }
    }

    fn next_mover(&mut self) {
        if self.movers.is_empty() {
            return;
        }
        let i = match self.movers_state.selected() {
            Some(i) => (i + 1).min(self.movers.len() - 1),
            None => 0,
        };
        self.movers_state.select(Some(i));
    }

    fn prev_mover(&mut self) {
        let i = match self.movers_state.selected() {
            Some(i) => i.saturating_sub(1),
            None => 0,
        };
        self.movers_state.select(Some(i));
    }

    fn selected_mover(&self) -> Option<&Mover> {
        self.movers_state.selected().and_then(|i| self.movers.get(i))
    }
}

/// API origin: environment override, falling back to the local backend.
fn api_base_url() -> String {
    std::env::var(API_URL_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string())
}

/// Blocking quote lookup for use in the background search thread.
/// Non-success responses are classified as "not found"; anything below the
/// API contract (network, timeout, undecodable body) is a transport error.
fn fetch_quote(base: &str, symbol: &str) -> std::result::Result<Quote, SearchError> {
    let url = format!("{}/api/stock/{}", base, symbol);
    let response = reqwest::blocking::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .send()
        .map_err(SearchError::transport)?;

    if !response.status().is_success() {
        return Err(SearchError::NotFound);
    }

    let body = response.text().map_err(SearchError::transport)?;
    serde_json::from_str(&body).map_err(SearchError::transport)
}

/// Blocking analysis lookup for use in the background search thread.
fn fetch_analysis(base: &str, symbol: &str) -> std::result::Result<Analysis, SearchError> {
    let url = format!("{}/api/analyze/{}", base, symbol);
    let response = reqwest::blocking::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .send()
        .map_err(SearchError::transport)?;

    if !response.status().is_success() {
        return Err(SearchError::AnalysisUnavailable);
    }

    let body = response.text().map_err(SearchError::transport)?;
    serde_json::from_str::<AnalysisEnvelope>(&body)
        .map(|envelope| envelope.analysis)
        .map_err(SearchError::transport)
}

/// The two lookups are sequential and dependent: analysis is only requested
/// once the symbol has resolved to a quote.
fn run_search(base: &str, symbol: &str) -> std::result::Result<(Quote, Analysis), SearchError> {
    let quote = fetch_quote(base, symbol)?;
    let analysis = fetch_analysis(base, symbol)?;
    Ok((quote, analysis))
}

/// Last `CHART_WINDOW` points of a price series, oldest first. Shorter
/// histories are returned whole; an empty history stays empty.
fn chart_window(history: &[PricePoint]) -> &[PricePoint] {
    let start = history.len().saturating_sub(CHART_WINDOW);
    &history[start..]
}

/// Render an optional numeric field, or the literal "N/A" when absent.
fn fmt_or_na(value: Option<f64>, fmt: impl Fn(f64) -> String) -> String {
    value.map(fmt).unwrap_or_else(|| "N/A".to_string())
}

fn movers_conf_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".config/stockpro-tui/movers.conf")
}

/// Market movers list: `~/.config/stockpro-tui/movers.conf` when present and
/// parseable, otherwise the built-in defaults.
fn load_movers() -> Vec<Mover> {
    if let Ok(file) = File::open(movers_conf_path()) {
        let movers: Vec<Mover> = BufReader::new(file)
            .lines()
            .filter_map(|line| line.ok())
            .filter_map(|line| parse_mover_line(&line))
            .collect();
        if !movers.is_empty() {
            return movers;
        }
    }
    default_movers()
}

/// Parse one conf line: `SYMBOL|Name|Price|Change|Change%|SIGNAL`.
/// Comments and blank lines yield None, as does anything malformed.
fn parse_mover_line(line: &str) -> Option<Mover> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() < 6 {
        return None;
    }

    Some(Mover {
        symbol: parts[0].trim().to_string(),
        name: parts[1].trim().to_string(),
        price: parts[2].trim().parse().ok()?,
        change: parts[3].trim().parse().ok()?,
        change_percent: parts[4].trim().parse().ok()?,
        recommendation: Signal::parse(parts[5].trim())?,
    })
}

fn default_movers() -> Vec<Mover> {
    vec![
        Mover {
            symbol: "AAPL".to_string(),
            name: "Apple Inc.".to_string(),
            price: 189.45,
            change: 2.34,
            change_percent: 1.25,
            recommendation: Signal::Buy,
        },
        Mover {
            symbol: "TSLA".to_string(),
            name: "Tesla, Inc.".to_string(),
            price: 245.67,
            change: -5.12,
            change_percent: -2.04,
            recommendation: Signal::Hold,
        },
        Mover {
            symbol: "NVDA".to_string(),
            name: "NVIDIA Corp.".to_string(),
            price: 485.09,
            change: 12.45,
            change_percent: 2.63,
            recommendation: Signal::Buy,
        },
        Mover {
            symbol: "AMD".to_string(),
            name: "Adv. Micro Devices".to_string(),
            price: 138.00,
            change: 4.50,
            change_percent: 3.37,
            recommendation: Signal::Buy,
        },
    ]
}

fn default_news() -> Vec<NewsItem> {
    vec![
        NewsItem {
            title: "Fed Signals Potential Rate Cuts in Late 2024",
            source: "Bloomberg",
            time: "2h ago",
            summary: "Federal Reserve officials indicated that inflation data is moving in the right direction, suggesting potential rate cuts later this year.",
            sentiment: Sentiment::Positive,
        },
        NewsItem {
            title: "Tech Stocks Rally Ahead of Earnings Season",
            source: "Reuters",
            time: "4h ago",
            summary: "Major technology companies see stock price increases as investors anticipate strong quarterly earnings reports.",
            sentiment: Sentiment::Positive,
        },
        NewsItem {
            title: "Oil Prices Surge Amid Geopolitical Tensions",
            source: "CNBC",
            time: "5h ago",
            summary: "Crude oil futures rose sharply today following new developments in the Middle East, raising concerns about supply chains.",
            sentiment: Sentiment::Negative,
        },
    ]
}

fn sp500_series() -> Vec<PricePoint> {
    [
        ("Jan", 4000.0),
        ("Feb", 4100.0),
        ("Mar", 4050.0),
        ("Apr", 4200.0),
        ("May", 4150.0),
        ("Jun", 4300.0),
        ("Jul", 4400.0),
    ]
    .into_iter()
    .map(|(date, price)| PricePoint {
        date: date.to_string(),
        price,
    })
    .collect()
}

fn main() -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new();
    let res = run_app(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("Error: {err:?}");
    }

    Ok(())
}

enum Action {
    None,
    Quit,
    Search,
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    loop {
        // Apply any completed searches from the background thread (non-blocking)
        app.process_search_results();

        terminal.draw(|f| ui(f, app))?;
        // Note: clickable regions are updated during ui() rendering

        if event::poll(Duration::from_millis(100))? {
            let action = match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => handle_input(app, key.code),
                Event::Mouse(mouse) => handle_mouse(app, mouse.kind, mouse.column, mouse.row),
                _ => Action::None,
            };

            match action {
                Action::Quit => return Ok(()),
                Action::Search => app.trigger_search(),
                Action::None => {}
            }
        }
    }
}

fn handle_input(app: &mut App, key: KeyCode) -> Action {
    match &app.input_mode {
        InputMode::Search => match key {
            KeyCode::Esc => {
                app.input_mode = InputMode::Normal;
                Action::None
            }
            KeyCode::Enter => {
                app.input_mode = InputMode::Normal;
                Action::Search
            }
            KeyCode::Backspace => {
                app.search.query.pop();
                Action::None
            }
            KeyCode::Char(c) => {
                app.search.query.push(c);
                Action::None
            }
            _ => Action::None,
        },
        InputMode::Normal => match key {
            KeyCode::Char('q') => Action::Quit,
            KeyCode::Char('/') | KeyCode::Char('s') => {
                app.input_mode = InputMode::Search;
                Action::None
            }
            // Explicit retry of the current query; failures never auto-retry
            KeyCode::Char('r') => Action::Search,
            KeyCode::Down | KeyCode::Char('j') => {
                app.next_mover();
                Action::None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                app.prev_mover();
                Action::None
            }
            // Enter analyzes the selected market mover
            KeyCode::Enter => {
                if let Some(symbol) = app.selected_mover().map(|m| m.symbol.clone()) {
                    app.search.query = symbol;
                    Action::Search
                } else {
                    Action::None
                }
            }
            _ => Action::None,
        },
    }
}

/// Check if a point (x, y) is inside a Rect
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, kind: MouseEventKind, x: u16, y: u16) -> Action {
    // Only handle left clicks
    if !matches!(kind, MouseEventKind::Down(MouseButton::Left)) {
        return Action::None;
    }

    if point_in_rect(x, y, app.clickable.search_bar) {
        app.input_mode = InputMode::Search;
        return Action::None;
    }

    // Click selects a mover row; a second click on the selected row analyzes it
    let hit = app
        .clickable
        .mover_rows
        .iter()
        .find(|(rect, _)| point_in_rect(x, y, *rect))
        .map(|(_, idx)| *idx);

    if let Some(idx) = hit {
        app.input_mode = InputMode::Normal;
        if app.movers_state.selected() == Some(idx) {
            if let Some(mover) = app.movers.get(idx) {
                app.search.query = mover.symbol.clone();
                return Action::Search;
            }
        }
        app.movers_state.select(Some(idx));
    }

    Action::None
}

fn ui(f: &mut Frame, app: &mut App) {
    // Clear clickable regions before each render
    app.clickable = ClickableRegions::default();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),  // Header
            Constraint::Length(3),  // Search bar
            Constraint::Length(1),  // Status line
            Constraint::Min(12),    // Main content
            Constraint::Length(1),  // Footer
        ])
        .split(f.area());

    render_header(f, chunks[0]);
    render_search_bar(f, app, chunks[1]);
    render_status_line(f, app, chunks[2]);

    // A successful search replaces the market overview with the result view;
    // any other status (including Failed, which cleared the payloads) shows
    // the overview again.
    if app.search.status == SearchStatus::Success {
        render_result_view(f, app, chunks[3]);
    } else {
        render_market_overview(f, app, chunks[3]);
    }

    render_footer(f, app, chunks[4]);
}

fn render_header(f: &mut Frame, area: Rect) {
    let nav = Line::from(vec![
        Span::styled(" StockPro ", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled("Dashboard", Style::default().fg(Color::White)),
        Span::styled("   Markets   News   Screener", Style::default().fg(Color::DarkGray)),
    ]);

    let header = Paragraph::new(nav).block(Block::default().borders(Borders::ALL));
    f.render_widget(header, area);
}

fn render_search_bar(f: &mut Frame, app: &mut App, area: Rect) {
    app.clickable.search_bar = area;

    let (content, border_style) = match app.input_mode {
        InputMode::Search => (
            Line::from(vec![
                Span::raw(" > "),
                Span::styled(format!("{}█", app.search.query), Style::default().fg(Color::White)),
            ]),
            Style::default().fg(Color::Yellow),
        ),
        InputMode::Normal => {
            let text = if app.search.query.is_empty() {
                Span::styled(
                    "Search symbol (e.g. AAPL, 2330.TW)...",
                    Style::default().fg(Color::DarkGray),
                )
            } else {
                Span::styled(app.search.query.clone(), Style::default().fg(Color::Gray))
            };
            (Line::from(vec![Span::raw(" > "), text]), Style::default())
        }
    };

    let search = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Search ")
            .border_style(border_style),
    );
    f.render_widget(search, area);
}

fn render_status_line(f: &mut Frame, app: &App, area: Rect) {
    let line = match app.search.status {
        SearchStatus::Idle => Line::from(Span::styled(
            "  Enter a symbol and press Enter to analyze",
            Style::default().fg(Color::DarkGray),
        )),
        SearchStatus::Loading => Line::from(Span::styled(
            "  Searching...",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
        SearchStatus::Failed => Line::from(Span::styled(
            format!("  {}", app.search.error.as_deref().unwrap_or("Failed to fetch data")),
            Style::default().fg(Color::Red),
        )),
        SearchStatus::Success => {
            let stamp = app.last_updated.as_deref().unwrap_or("-");
            Line::from(Span::styled(
                format!("  Updated: {}", stamp),
                Style::default().fg(Color::DarkGray),
            ))
        }
    };

    f.render_widget(Paragraph::new(line), area);
}

fn render_result_view(f: &mut Frame, app: &App, area: Rect) {
    // Success guarantees both payloads; bail out quietly if not
    let (Some(quote), Some(analysis)) = (&app.search.quote, &app.search.analysis) else {
        return;
    };

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(68), Constraint::Percentage(32)])
        .split(area);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),  // Company line
            Constraint::Length(3),  // Stat cards
            Constraint::Min(8),     // Price chart
        ])
        .split(cols[0]);

    let company = Line::from(vec![
        Span::styled(format!("  {}", quote.name), Style::default().add_modifier(Modifier::BOLD)),
        Span::styled(format!("  {}", quote.symbol), Style::default().fg(Color::DarkGray)),
    ]);
    f.render_widget(Paragraph::new(company), left[0]);

    render_stat_cards(f, quote, analysis, left[1]);
    render_price_chart(f, quote, left[2]);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(5), Constraint::Min(6)])
        .split(cols[1]);

    render_recommendation(f, analysis, right[0]);
    render_indicators(f, analysis, right[1]);
}

fn render_stat_cards(f: &mut Frame, quote: &Quote, analysis: &Analysis, area: Rect) {
    let cards = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(25),
            Constraint::Percentage(25),
            Constraint::Percentage(25),
            Constraint::Percentage(25),
        ])
        .split(area);

    let values = [
        ("Price", fmt_or_na(quote.current_price, |v| format!("${:.2}", v))),
        ("Market Cap", fmt_or_na(quote.market_cap, |v| format!("${:.2}B", v / 1e9))),
        ("P/E Ratio", fmt_or_na(quote.pe_ratio, |v| format!("{:.2}", v))),
        ("RSI", fmt_or_na(analysis.indicator("RSI"), |v| format!("{:.2}", v))),
    ];

    for (i, (label, value)) in values.into_iter().enumerate() {
        let card = Paragraph::new(Line::from(Span::styled(
            format!(" {}", value),
            Style::default().add_modifier(Modifier::BOLD),
        )))
        .block(Block::default().borders(Borders::ALL).title(format!(" {} ", label)));
        f.render_widget(card, cards[i]);
    }
}

fn render_price_chart(f: &mut Frame, quote: &Quote, area: Rect) {
    let window = chart_window(&quote.history);
    render_line_chart(f, area, " Price History ", window);
}

fn render_recommendation(f: &mut Frame, analysis: &Analysis, area: Rect) {
    let signal = analysis.signal;
    let lines = vec![
        Line::from(""),
        Line::from(Span::styled(
            format!("  {}", signal.label()),
            Style::default().fg(signal.color()).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            format!("  Score: {}", analysis.score),
            Style::default().fg(Color::DarkGray),
        )),
    ];

    let panel = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Recommendation ")
            .border_style(Style::default().fg(signal.color())),
    );
    f.render_widget(panel, area);
}

fn render_indicators(f: &mut Frame, analysis: &Analysis, area: Rect) {
    let rows = [("SMA 20", "SMA_20"), ("SMA 50", "SMA_50"), ("MACD", "MACD")];

    let mut lines = vec![Line::from("")];
    for (label, key) in rows {
        lines.push(Line::from(vec![
            Span::styled(format!("  {:<8}", label), Style::default().fg(Color::DarkGray)),
            Span::raw(fmt_or_na(analysis.indicator(key), |v| format!("{:.2}", v))),
        ]));
    }

    let panel = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Technical Indicators "));
    f.render_widget(panel, area);
}

fn render_market_overview(f: &mut Frame, app: &mut App, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(area);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(7), Constraint::Length(9)])
        .split(cols[0]);

    render_movers_table(f, app, left[0]);
    render_line_chart(f, left[1], " S&P 500 Performance ", &app.sp500);
    render_news(f, app, cols[1]);
}

fn render_movers_table(f: &mut Frame, app: &mut App, area: Rect) {
    // Row regions for click detection (rows start after border + header)
    let row_start_y = area.y + 2;
    let row_width = area.width.saturating_sub(2);
    let row_x = area.x + 1;
    for i in 0..app.movers.len() {
        let row_y = row_start_y + i as u16;
        if row_y < area.y + area.height.saturating_sub(1) {
            app.clickable.mover_rows.push((Rect::new(row_x, row_y, row_width, 1), i));
        }
    }

    let header = Row::new(vec!["Symbol", "Name", "Price", "Change", "Signal"])
        .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
        .height(1);

    let rows: Vec<Row> = app.movers.iter().map(mover_to_row).collect();

    let border_style = if matches!(app.input_mode, InputMode::Normal) {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };

    let table = Table::new(
        rows,
        [
            Constraint::Length(8),
            Constraint::Min(14),
            Constraint::Length(10),
            Constraint::Length(18),
            Constraint::Length(6),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Market Movers ")
            .border_style(border_style),
    )
    .row_highlight_style(Style::default().bg(Color::DarkGray));

    f.render_stateful_widget(table, area, &mut app.movers_state);
}

fn mover_to_row(mover: &Mover) -> Row<'static> {
    let up = mover.change >= 0.0;
    let arrow = if up { "↑" } else { "↓" };
    let change_color = if up { Color::Green } else { Color::Red };

    Row::new(vec![
        Cell::from(mover.symbol.clone()).style(Style::default().add_modifier(Modifier::BOLD)),
        Cell::from(mover.name.clone()),
        Cell::from(Line::from(format!("${:.2}", mover.price)).alignment(Alignment::Right)),
        Cell::from(
            Line::from(format!("{}{:+.2} ({:+.2}%)", arrow, mover.change, mover.change_percent))
                .alignment(Alignment::Right),
        )
        .style(Style::default().fg(change_color)),
        Cell::from(mover.recommendation.label())
            .style(Style::default().fg(mover.recommendation.color())),
    ])
}

fn render_news(f: &mut Frame, app: &App, area: Rect) {
    let mut lines: Vec<Line> = Vec::new();
    for item in &app.news {
        lines.push(Line::from(vec![
            Span::styled("● ", Style::default().fg(item.sentiment.color())),
            Span::styled(item.source, Style::default().fg(Color::Green)),
            Span::styled(format!("  {}", item.time), Style::default().fg(Color::DarkGray)),
        ]));
        lines.push(Line::from(item.title).bold());
        lines.push(Line::from(Span::styled(
            item.summary,
            Style::default().fg(Color::DarkGray),
        )));
        lines.push(Line::from(""));
    }

    let news = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title(" Latest News "));
    f.render_widget(news, area);
}

/// Render an ordered (label, value) series as a braille line chart, with the
/// first and last labels on the x axis. An empty series renders a placeholder.
fn render_line_chart(f: &mut Frame, area: Rect, title: &str, series: &[PricePoint]) {
    if series.is_empty() {
        let empty = Paragraph::new("  No data available")
            .style(Style::default().fg(Color::DarkGray))
            .block(Block::default().borders(Borders::ALL).title(title.to_string()));
        f.render_widget(empty, area);
        return;
    }

    let data: Vec<(f64, f64)> = series
        .iter()
        .enumerate()
        .map(|(i, p)| (i as f64, p.price))
        .collect();

    let min_y = series.iter().map(|p| p.price).fold(f64::INFINITY, f64::min) * 0.98;
    let max_y = series.iter().map(|p| p.price).fold(f64::NEG_INFINITY, f64::max) * 1.02;
    let max_x = series.len() as f64;

    let first_label = series.first().map(|p| p.date.clone()).unwrap_or_default();
    let last_label = series.last().map(|p| p.date.clone()).unwrap_or_default();

    let datasets = vec![Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::Cyan))
        .data(&data)];

    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(title.to_string()))
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, max_x])
                .labels(vec![Span::raw(first_label), Span::raw(last_label)]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([min_y, max_y])
                .labels(vec![
                    Span::raw(format!("{:.1}", min_y)),
                    Span::raw(format!("{:.1}", max_y)),
                ]),
        );

    f.render_widget(chart, area);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let keys = match app.input_mode {
        InputMode::Search => " Type symbol | Enter=Analyze | Esc=Browse ",
        InputMode::Normal => " /=Search | ↑↓jk=Movers | Enter=Analyze | r=Retry | q=Quit ",
    };

    let footer = Paragraph::new(Line::from(Span::styled(keys, Style::default().fg(Color::Yellow))));
    f.render_widget(footer, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price_history(len: usize) -> Vec<PricePoint> {
        (0..len)
            .map(|i| PricePoint {
                date: format!("2024-{:02}-{:02}", i / 28 + 1, i % 28 + 1),
                price: 100.0 + i as f64,
            })
            .collect()
    }

    fn quote_fixture(points: usize) -> Quote {
        Quote {
            symbol: "AAPL".to_string(),
            name: "Apple Inc.".to_string(),
            current_price: Some(189.45),
            market_cap: Some(2.95e12),
            pe_ratio: Some(31.2),
            history: price_history(points),
        }
    }

    fn analysis_fixture() -> Analysis {
        let mut indicators = HashMap::new();
        indicators.insert("RSI".to_string(), Some(61.2));
        Analysis {
            signal: Signal::Buy,
            score: 7.0,
            indicators,
        }
    }

    #[test]
    fn chart_window_keeps_the_newest_points_in_order() {
        let history = price_history(200);
        let window = chart_window(&history);
        assert_eq!(window.len(), CHART_WINDOW);
        // Last 90 of 200: indices 110..200, original order preserved
        assert_eq!(window[0].price, 210.0);
        assert_eq!(window[CHART_WINDOW - 1].price, 299.0);
        assert!(window.windows(2).all(|w| w[0].price < w[1].price));
    }

    #[test]
    fn chart_window_returns_short_histories_whole() {
        let history = price_history(10);
        assert_eq!(chart_window(&history).len(), 10);
        assert!(chart_window(&[]).is_empty());
    }

    #[test]
    fn fmt_or_na_renders_absent_values_as_na() {
        assert_eq!(fmt_or_na(None, |v| format!("{:.2}", v)), "N/A");
        assert_eq!(fmt_or_na(Some(189.447), |v| format!("${:.2}", v)), "$189.45");
        assert_eq!(fmt_or_na(Some(31.2), |v| format!("{:.2}", v)), "31.20");
        // Market cap scales to billions
        assert_eq!(
            fmt_or_na(Some(2.95e12), |v| format!("${:.2}B", v / 1e9)),
            "$2950.00B"
        );
    }

    #[test]
    fn begin_discards_previous_results_and_bumps_the_generation() {
        let mut state = SearchState::default();
        let seq = state.begin();
        assert!(state.apply(SearchOutcome {
            seq,
            result: Ok((quote_fixture(5), analysis_fixture())),
        }));
        assert_eq!(state.status, SearchStatus::Success);

        let next = state.begin();
        assert_eq!(next, seq + 1);
        assert_eq!(state.status, SearchStatus::Loading);
        assert!(state.quote.is_none());
        assert!(state.analysis.is_none());
        assert!(state.error.is_none());
    }

    #[test]
    fn successful_search_presents_both_payloads() {
        let mut state = SearchState::default();
        state.query = "AAPL".to_string();
        let seq = state.begin();

        assert!(state.apply(SearchOutcome {
            seq,
            result: Ok((quote_fixture(100), analysis_fixture())),
        }));

        assert_eq!(state.status, SearchStatus::Success);
        let quote = state.quote.as_ref().expect("quote present on success");
        let analysis = state.analysis.as_ref().expect("analysis present on success");
        assert_eq!(analysis.signal, Signal::Buy);
        assert_eq!(analysis.indicator("RSI"), Some(61.2));
        // 100 history points feed a 90-point chart window
        assert_eq!(chart_window(&quote.history).len(), CHART_WINDOW);
        assert!(state.error.is_none());
    }

    #[test]
    fn quote_failure_reports_not_found_with_nothing_retained() {
        let mut state = SearchState::default();
        state.query = "ZZZZ".to_string();
        let seq = state.begin();

        assert!(state.apply(SearchOutcome {
            seq,
            result: Err(SearchError::NotFound),
        }));

        assert_eq!(state.status, SearchStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("Stock not found"));
        assert!(state.quote.is_none());
        assert!(state.analysis.is_none());
    }

    #[test]
    fn analysis_failure_clears_the_already_fetched_quote() {
        let mut state = SearchState::default();
        state.query = "MSFT".to_string();

        // Seed a prior successful search so there is something to discard
        let seq = state.begin();
        assert!(state.apply(SearchOutcome {
            seq,
            result: Ok((quote_fixture(30), analysis_fixture())),
        }));

        let seq = state.begin();
        assert!(state.apply(SearchOutcome {
            seq,
            result: Err(SearchError::AnalysisUnavailable),
        }));

        assert_eq!(state.status, SearchStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("Analysis failed"));
        // Never a quote without its matching analysis
        assert!(state.quote.is_none());
        assert!(state.analysis.is_none());
    }

    #[test]
    fn stale_outcome_from_a_superseded_search_is_discarded() {
        let mut state = SearchState::default();
        state.query = "AAPL".to_string();
        let first = state.begin();
        let second = state.begin();

        assert!(!state.apply(SearchOutcome {
            seq: first,
            result: Ok((quote_fixture(5), analysis_fixture())),
        }));
        assert_eq!(state.status, SearchStatus::Loading);
        assert!(state.quote.is_none());

        assert!(state.apply(SearchOutcome {
            seq: second,
            result: Err(SearchError::NotFound),
        }));
        assert_eq!(state.status, SearchStatus::Failed);
    }

    #[test]
    fn empty_query_search_is_a_no_op() {
        let mut app = App::new();
        app.search.query = "   ".to_string();
        app.trigger_search();
        assert_eq!(app.search.status, SearchStatus::Idle);
        assert_eq!(app.search.seq, 0);
    }

    #[test]
    fn outcomes_arrive_through_the_channel() {
        let mut app = App::new();
        app.search.query = "MSFT".to_string();
        let seq = app.search.begin();

        app.outcome_sender
            .send(SearchOutcome {
                seq,
                result: Err(SearchError::AnalysisUnavailable),
            })
            .unwrap();
        app.process_search_results();

        assert_eq!(app.search.status, SearchStatus::Failed);
        assert_eq!(app.search.error.as_deref(), Some("Analysis failed"));
        assert!(app.search.quote.is_none());
        assert!(app.search.analysis.is_none());
    }

    #[test]
    fn successful_outcome_stamps_the_update_time() {
        let mut app = App::new();
        app.search.query = "AAPL".to_string();
        let seq = app.search.begin();

        app.outcome_sender
            .send(SearchOutcome {
                seq,
                result: Ok((quote_fixture(100), analysis_fixture())),
            })
            .unwrap();
        app.process_search_results();

        assert_eq!(app.search.status, SearchStatus::Success);
        assert!(app.last_updated.is_some());
    }

    #[test]
    fn quote_decodes_from_the_backend_shape() {
        let json = r#"{
            "symbol": "AAPL",
            "name": "Apple Inc.",
            "current_price": 189.45,
            "market_cap": 2950000000000.0,
            "pe_ratio": null,
            "dividend_yield": 0.005,
            "history": [{"date": "2024-01-02", "price": 185.64, "volume": 82488700}]
        }"#;

        let quote: Quote = serde_json::from_str(json).unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.name, "Apple Inc.");
        assert_eq!(quote.current_price, Some(189.45));
        assert_eq!(quote.pe_ratio, None);
        assert_eq!(quote.history.len(), 1);
        assert_eq!(quote.history[0].date, "2024-01-02");
    }

    #[test]
    fn quote_tolerates_missing_optional_fields() {
        let quote: Quote = serde_json::from_str(r#"{"symbol": "X", "name": "X Corp"}"#).unwrap();
        assert_eq!(quote.current_price, None);
        assert!(quote.history.is_empty());
    }

    #[test]
    fn analysis_envelope_decodes_with_null_indicators() {
        let json = r#"{
            "symbol": "AAPL",
            "analysis": {
                "signal": "BUY",
                "score": 7,
                "indicators": {
                    "RSI": 61.2, "SMA_20": null, "SMA_50": 182.4,
                    "SMA_200": null, "MACD": 1.3, "Signal_Line": 0.9
                }
            }
        }"#;

        let envelope: AnalysisEnvelope = serde_json::from_str(json).unwrap();
        let analysis = envelope.analysis;
        assert_eq!(analysis.signal, Signal::Buy);
        assert_eq!(analysis.score, 7.0);
        assert_eq!(analysis.indicator("RSI"), Some(61.2));
        // Null and missing both come back as None
        assert_eq!(analysis.indicator("SMA_20"), None);
        assert_eq!(analysis.indicator("BOLLINGER"), None);
    }

    #[test]
    fn unknown_signal_fails_to_decode() {
        let json = r#"{"analysis": {"signal": "MOON", "score": 0, "indicators": {}}}"#;
        assert!(serde_json::from_str::<AnalysisEnvelope>(json).is_err());
    }

    #[test]
    fn error_messages_are_the_fixed_user_facing_strings() {
        assert_eq!(SearchError::NotFound.to_string(), "Stock not found");
        assert_eq!(SearchError::AnalysisUnavailable.to_string(), "Analysis failed");

        let transport = SearchError::transport("connection refused");
        assert_eq!(transport.to_string(), "Failed to fetch data");
        match transport {
            SearchError::Transport(detail) => assert!(detail.contains("refused")),
            _ => unreachable!(),
        }
    }

    #[test]
    fn signal_and_sentiment_lookups_are_total() {
        assert_eq!(Signal::Buy.color(), Color::Green);
        assert_eq!(Signal::Sell.color(), Color::Red);
        assert_eq!(Signal::Hold.color(), Color::Yellow);
        assert_eq!(Signal::Buy.label(), "BUY");
        assert_eq!(Signal::Sell.label(), "SELL");
        assert_eq!(Signal::Hold.label(), "HOLD");

        assert_eq!(Sentiment::Positive.color(), Color::Green);
        assert_eq!(Sentiment::Negative.color(), Color::Red);
        assert_eq!(Sentiment::Neutral.color(), Color::Yellow);
    }

    #[test]
    fn mover_line_parses_the_pipe_format() {
        let mover = parse_mover_line("NVDA | NVIDIA Corp. | 485.09 | 12.45 | 2.63 | BUY").unwrap();
        assert_eq!(mover.symbol, "NVDA");
        assert_eq!(mover.name, "NVIDIA Corp.");
        assert_eq!(mover.price, 485.09);
        assert_eq!(mover.recommendation, Signal::Buy);
    }

    #[test]
    fn mover_line_rejects_comments_and_garbage() {
        assert!(parse_mover_line("").is_none());
        assert!(parse_mover_line("# a comment").is_none());
        assert!(parse_mover_line("AAPL|Apple").is_none());
        assert!(parse_mover_line("AAPL|Apple Inc.|not-a-price|2.34|1.25|BUY").is_none());
        assert!(parse_mover_line("AAPL|Apple Inc.|189.45|2.34|1.25|MAYBE").is_none());
    }

    #[test]
    fn built_in_market_data_is_present() {
        assert_eq!(default_movers().len(), 4);
        assert_eq!(default_news().len(), 3);
        assert_eq!(sp500_series().len(), 7);
    }

    #[test]
    fn mover_selection_stays_in_bounds() {
        let mut app = App::new();
        for _ in 0..20 {
            app.next_mover();
        }
        assert_eq!(app.movers_state.selected(), Some(app.movers.len() - 1));
        for _ in 0..20 {
            app.prev_mover();
        }
        assert_eq!(app.movers_state.selected(), Some(0));
    }

    #[test]
    fn search_mode_edits_the_query() {
        let mut app = App::new();
        for c in "aapl".chars() {
            handle_input(&mut app, KeyCode::Char(c));
        }
        handle_input(&mut app, KeyCode::Backspace);
        assert_eq!(app.search.query, "aap");

        let action = handle_input(&mut app, KeyCode::Enter);
        assert!(matches!(action, Action::Search));
        assert!(matches!(app.input_mode, InputMode::Normal));
    }

    #[test]
    fn enter_in_normal_mode_analyzes_the_selected_mover() {
        let mut app = App::new();
        app.input_mode = InputMode::Normal;
        let expected = app.movers[0].symbol.clone();

        let action = handle_input(&mut app, KeyCode::Enter);
        assert!(matches!(action, Action::Search));
        assert_eq!(app.search.query, expected);
    }
}
