use clap::Parser;
use server::config::{Config, generate_session_key};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to listen for connections
    #[arg(long)]
    listen_address: Option<String>,

    /// Address to connect to redis
    #[arg(long)]
    redis_address: Option<String>,

    /// Generate and print a session key and exit instead of running server
    #[arg(long)]
    generate_session_key: bool,

    /// Keep everything in memory instead of redis
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.generate_session_key {
        println!("SESSION_KEY={}", generate_session_key());
        return;
    }

    server::init_tracing();

    let mut config = Config::load();
    if let Some(listen_address) = args.listen_address {
        config.listen_address = listen_address;
    }
    if let Some(redis_address) = args.redis_address {
        config.redis_url = format!("redis://{redis_address}");
    }
    config.memory = args.memory;

    server::start_server(config).await;
}
