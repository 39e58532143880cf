use std::collections::VecDeque;
use std::time::Duration;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph};

use pvsnet::entity::ClientId;
use pvsnet::net::{ClientState, NetworkStats};
use pvsnet::server::ClientRecord;

const MAX_LOG_LINES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn color(self) -> Color {
        match self {
            LogLevel::Info => Color::White,
            LogLevel::Warn => Color::Yellow,
            LogLevel::Error => Color::Red,
        }
    }
}

/// Everything the dashboard shows for one frame.
pub struct ServerStatus {
    pub uptime: Duration,
    pub map: Option<String>,
    pub tick: i32,
    pub tick_rate: u32,
    pub max_clients: usize,
    pub entity_count: usize,
    pub clients: Vec<ClientRecord>,
    pub network: NetworkStats,
}

pub struct TuiState {
    log: VecDeque<(LogLevel, String)>,
    selected: usize,
    pending_kick: Option<ClientId>,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            log: VecDeque::new(),
            selected: 0,
            pending_kick: None,
        }
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back((level, message.into()));
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn select_prev(&mut self, count: usize) {
        if count > 0 {
            self.selected = self.selected.checked_sub(1).unwrap_or(count - 1);
        }
    }

    pub fn select_next(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + 1) % count;
        }
    }

    pub fn request_kick(&mut self, clients: &[ClientRecord]) {
        if let Some(client) = clients.get(self.selected) {
            self.pending_kick = Some(client.client_id);
        }
    }

    pub fn take_pending_kick(&mut self) -> Option<ClientId> {
        self.pending_kick.take()
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, status: &ServerStatus) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Min(6),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], status);
    render_capacity(frame, chunks[1], status);
    render_network(frame, chunks[2], &status.network);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(chunks[3]);
    render_clients(frame, body[0], state, &status.clients);
    render_log(frame, body[1], state);

    render_help(frame, chunks[4]);
}

fn render_header(frame: &mut Frame, area: Rect, status: &ServerStatus) {
    let title = format!(" pvsnet server - Uptime: {} ", format_duration(status.uptime));
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Map: {}  |  Tick: {} @ {}Hz  |  Entities: {}",
        status.map.as_deref().unwrap_or("<none>"),
        status.tick,
        status.tick_rate,
        status.entity_count
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));
    frame.render_widget(paragraph, area);
}

fn render_capacity(frame: &mut Frame, area: Rect, status: &ServerStatus) {
    let block = Block::default()
        .title(" Clients ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let count = status.clients.len();
    let ratio = if status.max_clients == 0 {
        1.0
    } else {
        count as f64 / status.max_clients as f64
    };
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio.min(1.0))
        .label(format!("{}/{} clients", count, status.max_clients));
    frame.render_widget(gauge, area);
}

fn render_network(frame: &mut Frame, area: Rect, net: &NetworkStats) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let label = |text: &'static str| Span::styled(text, Style::default().fg(Color::Gray));
    let value = |text: String| Span::styled(text, Style::default().fg(Color::White));

    let lines = vec![
        Line::from(vec![
            label("Packets: "),
            value(format!(
                "{} sent / {} recv / {} dropped",
                net.packets_sent, net.packets_received, net.packets_dropped
            )),
        ]),
        Line::from(vec![
            label("Bytes: "),
            value(format!(
                "{} sent / {} recv",
                format_bytes(net.bytes_sent),
                format_bytes(net.bytes_received)
            )),
        ]),
        Line::from(vec![
            label("RTT: "),
            value(format!("{:.1}ms (+/- {:.1}ms)", net.rtt_ms, net.rtt_variance)),
        ]),
        Line::from(vec![label("Resent: "), value(net.messages_resent.to_string())]),
    ];

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_clients(frame: &mut Frame, area: Rect, state: &TuiState, clients: &[ClientRecord]) {
    let block = Block::default()
        .title(" Connections ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let items: Vec<ListItem> = clients
        .iter()
        .map(|client| {
            let color = match client.state {
                ClientState::Playing => Color::Green,
                ClientState::Loading => Color::Yellow,
                ClientState::None => Color::DarkGray,
            };
            let player = client
                .owned_entities
                .first()
                .map(|id| format!("entity {id}"))
                .unwrap_or_else(|| "no player".to_string());
            ListItem::new(Line::from(vec![
                Span::raw(format!("#{} ", client.client_id)),
                Span::styled(format!("{:?}", client.state), Style::default().fg(color)),
                Span::styled(format!("  {player}"), Style::default().fg(Color::Gray)),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let mut list_state = ListState::default();
    if !clients.is_empty() {
        list_state.select(Some(state.selected.min(clients.len() - 1)));
    }
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = state
        .log
        .iter()
        .skip(state.log.len().saturating_sub(visible))
        .map(|(level, message)| {
            Line::from(Span::styled(
                message.as_str(),
                Style::default().fg(level.color()),
            ))
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("Up/Down select  |  'k' kick  |  'q' or ESC quit")
        .block(block)
        .style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        );
    frame.render_widget(text, area);
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sizes_and_times() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
    }

    #[test]
    fn log_is_bounded() {
        let mut state = TuiState::new();
        for i in 0..MAX_LOG_LINES + 5 {
            state.log_info(format!("line {i}"));
        }
        assert_eq!(state.log.len(), MAX_LOG_LINES);
        assert_eq!(state.log.front().map(|(_, m)| m.as_str()), Some("line 5"));
    }

    #[test]
    fn selection_wraps() {
        let mut state = TuiState::new();
        state.select_prev(3);
        assert_eq!(state.selected, 2);
        state.select_next(3);
        assert_eq!(state.selected, 0);
        state.select_next(0);
        assert_eq!(state.selected, 0);
    }
}
