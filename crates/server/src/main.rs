mod host;
mod tui;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use pvsnet::bsp::LoadOptions;
use pvsnet::net::{PacketLossSimulation, UdpConfig};
use pvsnet::server::{ServerConfig, ServerEvent};

use host::{Host, describe};
use tui::{LogLevel, ServerStatus, TuiState};

#[derive(Parser)]
#[command(name = "pvsnet-server")]
#[command(about = "Entity replication server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = pvsnet::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = pvsnet::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(long, help = "Map to load at startup, without extension")]
    map: Option<String>,

    #[arg(long, default_value = "maps/")]
    maps_dir: PathBuf,

    #[arg(long, default_value_t = 1.0, help = "Scale applied to loaded map geometry")]
    world_scale: f32,

    #[arg(long, default_value_t = 20, help = "Seconds of silence before a client is dropped")]
    heartbeat_tolerance: u64,

    #[arg(long)]
    headless: bool,

    #[arg(long, help = "Enable packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = ServerConfig {
        port: args.port,
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        heartbeat_tolerance: Duration::from_secs(args.heartbeat_tolerance),
        map: args.map.clone(),
        maps_dir: args.maps_dir.clone(),
        load_options: LoadOptions {
            world_scale: args.world_scale,
            ..Default::default()
        },
    };

    let mut udp = UdpConfig::default();
    if args.simulate_packet_loss {
        udp.packet_loss = PacketLossSimulation::lossy(args.loss_percent);
    }

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        let mut host = Host::new(&args.bind, config, udp)?;
        log::info!("Server started on {}", host.local_addr());
        host.run();
        log::info!("Server shutting down");
        host.shutdown();
    } else {
        let mut host = Host::new(&args.bind, config, udp)?;
        run_with_tui(&mut host)?;
    }

    Ok(())
}

fn run_with_tui(host: &mut Host) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = host.running();
    let mut tui_state = TuiState::new();
    tui_state.log_info(format!("Server started on {}", host.local_addr()));

    while running.load(Ordering::SeqCst) {
        host.frame();

        for event in host.server_mut().drain_events() {
            let level = match &event {
                ServerEvent::ConnectionDenied { .. } => LogLevel::Warn,
                ServerEvent::Error { .. } => LogLevel::Error,
                _ => LogLevel::Info,
            };
            tui_state.log(level, describe(&event));
        }

        if let Some(client_id) = tui_state.take_pending_kick() {
            host.server_mut().kick(client_id);
        }

        let clients: Vec<_> = host.server().clients().cloned().collect();

        if event::poll(Duration::from_millis(1))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::SeqCst);
                        }
                        KeyCode::Up => tui_state.select_prev(clients.len()),
                        KeyCode::Down => tui_state.select_next(clients.len()),
                        KeyCode::Char('k') | KeyCode::Char('K') => {
                            tui_state.request_kick(&clients)
                        }
                        _ => {}
                    }
                }
            }
        }

        let server = host.server();
        let status = ServerStatus {
            uptime: host.uptime(),
            map: server.map_name().map(str::to_string),
            tick: server.tick().tick,
            tick_rate: server.config().tick_rate,
            max_clients: server.config().max_clients,
            entity_count: server.entities().len(),
            clients,
            network: host.stats(),
        };
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &status);
        })?;
    }

    host.shutdown();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
