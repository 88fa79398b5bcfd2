//! Probe a parent make jobserver from the command line.
//!
//! Run under `make -jN` (prefix the rule with `+` so make passes the
//! jobserver descriptors through), grab some tokens, hold them, give
//! them back. Useful for checking that a build tree actually shares its
//! concurrency budget.

#[cfg(not(unix))]
fn main() {
    eprintln!("error: the jobserver pipe protocol requires a Unix platform");
    std::process::exit(2);
}

#[cfg(unix)]
fn main() {
    use std::process;

    let args: Vec<String> = std::env::args().collect();

    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: jobclient [--grab N] [--hold-ms MS] [--timeout-ms MS]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --grab N        Acquire at most N tokens [default: drain the pool]");
            eprintln!("  --hold-ms MS    Hold acquired tokens this long before releasing [default: 0]");
            eprintln!("  --timeout-ms MS Bound on each acquire wait [default: 100]");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(options) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

#[cfg(unix)]
struct ProbeOptions {
    grab: Option<usize>,
    hold: std::time::Duration,
    timeout: std::time::Duration,
}

#[cfg(unix)]
fn parse_args(args: &[String]) -> Result<ProbeOptions, String> {
    use std::time::Duration;

    let mut grab = None;
    let mut hold = Duration::ZERO;
    let mut timeout = Duration::from_millis(100);

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--grab" => {
                i += 1;
                let value = args.get(i).ok_or("--grab requires a value")?;
                grab = Some(value.parse().map_err(|_| format!("bad --grab: {value}"))?);
            }
            "--hold-ms" => {
                i += 1;
                let value = args.get(i).ok_or("--hold-ms requires a value")?;
                let ms: u64 = value.parse().map_err(|_| format!("bad --hold-ms: {value}"))?;
                hold = Duration::from_millis(ms);
            }
            "--timeout-ms" => {
                i += 1;
                let value = args.get(i).ok_or("--timeout-ms requires a value")?;
                let ms: u64 = value
                    .parse()
                    .map_err(|_| format!("bad --timeout-ms: {value}"))?;
                timeout = Duration::from_millis(ms);
            }
            "--help" | "-h" => return Err(String::new()),
            arg => return Err(format!("unknown argument: {arg}")),
        }
        i += 1;
    }

    Ok(ProbeOptions { grab, hold, timeout })
}

#[cfg(unix)]
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));
    let _ = subscriber.try_init();
}

#[cfg(unix)]
fn run(options: ProbeOptions) -> anyhow::Result<()> {
    use tokenpool::{ClientOptions, JobClient};

    let client_options = ClientOptions::default().with_read_timeout(options.timeout);
    let Some(client) = JobClient::from_env_with(client_options)? else {
        println!("no jobserver pool available; running with a single slot");
        return Ok(());
    };

    match client.max_jobs() {
        Some(max_jobs) => println!(
            "connected: budget {max_jobs} jobs ({} extra slots)",
            max_jobs.saturating_sub(1)
        ),
        None => println!("connected: no advertised budget"),
    }
    if let Some(max_load) = client.max_load() {
        println!("load limit: {max_load}");
    }

    let mut tokens = Vec::new();
    loop {
        if let Some(limit) = options.grab
            && tokens.len() >= limit
        {
            break;
        }
        match client.acquire()? {
            Some(token) => {
                tracing::debug!(%token, "acquired");
                tokens.push(token);
            }
            None => break,
        }
    }
    println!("acquired {} token(s)", tokens.len());

    if !options.hold.is_zero() && !tokens.is_empty() {
        std::thread::sleep(options.hold);
    }

    for token in tokens.drain(..) {
        client.release(token)?;
        tracing::debug!(%token, "released");
    }
    println!("all tokens returned");

    client.close();
    Ok(())
}
