use std::path::PathBuf;
use std::process;

use keysub::config::{ENDPOINTS_KEY, NAME_KEY, TIMEOUT_KEY};
use keysub::{Cancelled, Config, Endpoint, Printer, SubscriberClient};
use structopt::StructOpt;

const DEFAULT_ENDPOINT: &str = "tcp/localhost:7447";

/// Subscribes to a key expression and prints every matching message.
#[derive(Debug, StructOpt)]
#[structopt(name = "keysub")]
struct Cli {
    /// JSON configuration file
    #[structopt(long, short, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Router endpoint such as tcp/localhost:7447, may be repeated
    #[structopt(long, short = "e")]
    connect: Vec<Endpoint>,

    /// Key expression to subscribe to
    #[structopt(long, short, default_value = "mqtt/demo/**")]
    key: String,

    /// Client name announced to the router
    #[structopt(long)]
    name: Option<String>,

    /// Connect and handshake timeout per endpoint, in milliseconds
    #[structopt(long)]
    timeout_ms: Option<u64>,
}

fn config(cli: &Cli) -> keysub::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::new(),
    };

    if !cli.connect.is_empty() {
        let endpoints: Vec<String> = cli.connect.iter().map(ToString::to_string).collect();
        config.insert(ENDPOINTS_KEY, endpoints)?;
    } else if config.get(ENDPOINTS_KEY).is_none() {
        config.insert(ENDPOINTS_KEY, vec![DEFAULT_ENDPOINT.to_string()])?;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.insert(TIMEOUT_KEY, timeout_ms)?;
    }
    if let Some(name) = &cli.name {
        config.insert(NAME_KEY, name.as_str())?;
    }

    Ok(config)
}

fn run(cli: &Cli) -> keysub::Result<Cancelled> {
    let config = config(cli)?;

    let mut client = SubscriberClient::open(&config)?;
    client.cancel_on_interrupt()?;
    client.subscribe_with(&cli.key, Printer::stdout())?;

    let reason = client.run_until_cancelled();
    client.close();
    Ok(reason)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::from_args();
    match run(&cli) {
        Ok(Cancelled::ConnectionLost) => process::exit(1),
        Ok(_) => {}
        Err(err) => {
            eprintln!("keysub: {}", err);
            process::exit(1);
        }
    }
}
