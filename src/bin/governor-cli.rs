use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "governor-cli")]
#[command(about = "Management CLI for the request governor", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "GOVERNOR_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Version, uptime and store sizes
    Status,
    /// Response cache hit/miss statistics
    Cache,
    /// Remove every cache entry whose key starts with PREFIX
    Invalidate { prefix: String },
    /// Per-endpoint performance records
    Metrics,
    /// Endpoints with the highest average latency
    Slowest {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Clear all performance records
    ResetMetrics,
    /// Blocklisted origins
    Blocklist,
    /// Remove an origin from the blocklist
    Unblock { origin: String },
    /// Run a sweep now: rate_buckets, cache, abuse or metrics
    Sweep { kind: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let (method, path, body) = match cli.command {
        Commands::Status => (Method::GET, "/admin/status".to_string(), None),
        Commands::Cache => (Method::GET, "/admin/cache".to_string(), None),
        Commands::Invalidate { prefix } => (
            Method::POST,
            "/admin/cache/invalidate".to_string(),
            Some(json!({ "prefix": prefix })),
        ),
        Commands::Metrics => (Method::GET, "/admin/metrics".to_string(), None),
        Commands::Slowest { limit } => {
            let path = match limit {
                Some(limit) => format!("/admin/metrics/slowest?limit={limit}"),
                None => "/admin/metrics/slowest".to_string(),
            };
            (Method::GET, path, None)
        }
        Commands::ResetMetrics => (Method::POST, "/admin/metrics/reset".to_string(), None),
        Commands::Blocklist => (Method::GET, "/admin/blocklist".to_string(), None),
        Commands::Unblock { origin } => (Method::DELETE, format!("/admin/blocklist/{origin}"), None),
        Commands::Sweep { kind } => (Method::POST, format!("/admin/sweep/{kind}"), None),
    };

    let mut request = client
        .request(method, format!("{}{}", cli.url, path))
        .headers(headers);
    if let Some(body) = body {
        request = request.json(&body);
    }
    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    if status == reqwest::StatusCode::NO_CONTENT {
        println!("OK");
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
