mod session;

use std::path::PathBuf;

use clap::Parser;

use pvsnet::bsp::LoadOptions;
use pvsnet::client::ClientConfig;

use session::Session;

#[derive(Parser)]
#[command(name = "pvsnet-client")]
#[command(about = "Headless entity replication client")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:27015",
        help = "Server address to connect to"
    )]
    server: String,

    #[arg(long, default_value = "maps/")]
    maps_dir: PathBuf,

    #[arg(long, default_value_t = 1.0, help = "Scale applied to loaded map geometry")]
    world_scale: f32,

    #[arg(long, default_value_t = 60, help = "Client frames per second")]
    frame_rate: u32,

    #[arg(
        short = 'x',
        long = "exec",
        help = "Command sent to the server once playing, may repeat"
    )]
    commands: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ClientConfig {
        maps_dir: args.maps_dir,
        load_options: LoadOptions {
            world_scale: args.world_scale,
            ..Default::default()
        },
        ..Default::default()
    };

    let mut session = Session::connect(&args.server, config, args.commands)?;
    session.run(args.frame_rate.max(1))?;
    Ok(())
}
