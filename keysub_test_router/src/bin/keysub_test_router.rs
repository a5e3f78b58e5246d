use std::io::{self, BufRead};

use keysub_test_router::TestRouter;
use structopt::StructOpt;

/// Runs a test router and publishes one message per line read from stdin.
///
/// Lines have the form `<topic> <payload>`.
#[derive(Debug, StructOpt)]
#[structopt(name = "keysub_test_router")]
struct Args {
    /// Host to listen on
    #[structopt(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[structopt(long, default_value = "7447")]
    port: u16,
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let args = Args::from_args();
    log::info!("starting test router with args {:?}", &args);

    let router = TestRouter::build()
        .address(format!("{}:{}", args.host, args.port))
        .spawn()?;

    for line in io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (topic, payload) = match line.find(' ') {
            Some(i) => (&line[..i], &line[i + 1..]),
            None => (line, ""),
        };
        router.publish(topic, payload);
        log::info!("published on {}", topic);
    }

    log::info!("stdin closed, serving until killed");
    if router.join().is_err() {
        log::error!("test router thread panicked");
    }
    Ok(())
}
