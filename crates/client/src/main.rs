mod bot;
mod clock;
mod game;
mod interpolate;
mod prediction;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;

use strafe::net::SERVER_PORT;
use strafe::{MAX_PLAYERS, TICK_TIME};

use game::{ClientEvent, ClientGame, InputSample};

#[derive(Parser)]
#[command(name = "strafe-client")]
#[command(about = "strafe game client")]
struct Args {
    /// Local UDP port to bind.
    port: u16,

    #[arg(long, default_value = "127.0.0.1")]
    server: String,

    #[arg(long, default_value = "player")]
    name: String,

    /// Run this many NPC clients instead of an interactive one.
    #[arg(long)]
    npcs: Option<u32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if args.port == SERVER_PORT {
        bail!("port {SERVER_PORT} is reserved for the server");
    }

    let server_addr: SocketAddr = format!("{}:{}", args.server, SERVER_PORT)
        .parse()
        .context("invalid server address")?;

    if let Some(count) = args.npcs {
        let count = count.min(MAX_PLAYERS as u32 - 1);
        bot::run_npcs(server_addr, &args.name, count)?;
        return Ok(());
    }

    run_client(args.port, server_addr, &args.name)
}

/// The windowing, input and render layers plug in on top of
/// `ClientGame`; on its own the loop runs the full netcode with idle
/// input and reports what happens.
fn run_client(port: u16, server_addr: SocketAddr, name: &str) -> Result<()> {
    let mut game = ClientGame::new(port, server_addr)?;
    game.connect(name)?;

    let frame_time = Duration::from_secs_f32(TICK_TIME);
    let mut last = Instant::now();

    loop {
        let now = Instant::now();
        let dt = (now - last).as_secs_f32();
        last = now;

        let input = InputSample::default();
        game.update(dt, &input);

        for event in game.drain_events() {
            match event {
                ClientEvent::PlayerKilled {
                    killer_idx,
                    killed_idx,
                } => log::info!("player {killer_idx} killed player {killed_idx}"),
                ClientEvent::PlayerLeft { player_idx } => {
                    log::info!("player {player_idx} left")
                }
                ClientEvent::Connected { player_index } => {
                    log::info!("joined as player {player_index}")
                }
                ClientEvent::Disconnected => {}
            }
        }

        if !game.is_connected() {
            bail!("server connection lost");
        }

        let elapsed = last.elapsed();
        if elapsed < frame_time {
            std::thread::sleep(frame_time - elapsed);
        }
    }
}
