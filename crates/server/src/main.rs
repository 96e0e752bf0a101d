use anyhow::Result;
use clap::Parser;

use strafe_server::{GameServer, ServerConfig};

#[derive(Parser)]
#[command(name = "strafe-server")]
#[command(about = "Authoritative strafe game server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = strafe::net::SERVER_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 60.0)]
    tick_rate: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        ..Default::default()
    };

    let mut server = GameServer::new(&bind_addr, config)?;
    server.run();

    Ok(())
}
