//! h1-fetch: issue HTTP/1.x requests through the engine.
//!
//! Repeated requests (`--repeat`) to the same authority run back to back
//! on one task, so keep-alive connections are taken straight back out of
//! the pool.

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use http::{Method, Uri};

use h1_engine::config::{load_config, EngineConfig};
use h1_engine::observability::logging;
use h1_engine::proto::ReasonPhrase;
use h1_engine::{Client, RequestHead, TcpConnector};

#[derive(Parser)]
#[command(name = "h1-fetch")]
#[command(about = "Fetch a URL over pooled HTTP/1.x connections", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Extra header, as 'Name: value' (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,

    /// Send the request this many times
    #[arg(short, long, default_value_t = 1)]
    repeat: usize,

    /// Print the status line and response headers
    #[arg(short, long)]
    include: bool,

    url: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    logging::init(&config.observability);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run(cli, config))
}

async fn run(cli: Cli, config: EngineConfig) -> Result<(), Box<dyn Error>> {
    let uri: Uri = cli.url.parse()?;
    let method = Method::from_bytes(cli.method.to_ascii_uppercase().as_bytes())?;

    let mut extra = Vec::with_capacity(cli.headers.len());
    for raw in &cli.headers {
        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| format!("invalid header {:?}, expected 'Name: value'", raw))?;
        extra.push((name.trim().to_string(), value.trim().to_string()));
    }

    let client = Client::new(TcpConnector::from_config(&config.client), &config);
    let mut stdout = std::io::stdout().lock();

    for round in 1..=cli.repeat.max(1) {
        let mut head = RequestHead::new(method.clone(), uri.clone());
        for (name, value) in &extra {
            head.set_header(name.as_str(), value.as_str());
        }

        let response = client
            .send(head, cli.data.clone().unwrap_or_default())
            .await?;
        tracing::info!(
            round,
            status = response.status().as_u16(),
            "Response received"
        );

        if cli.include {
            let reason = response
                .extensions()
                .get::<ReasonPhrase>()
                .map(ReasonPhrase::as_str)
                .unwrap_or("");
            writeln!(stdout, "{:?} {} {}", response.version(), response.status().as_u16(), reason)?;
            for (name, value) in response.headers() {
                writeln!(stdout, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
            }
            writeln!(stdout)?;
        }

        let body = response.into_body().collect().await?;
        stdout.write_all(&body)?;
        stdout.flush()?;

        tracing::debug!(idle = client.pool().idle_count(), "Round finished");
    }

    Ok(())
}
