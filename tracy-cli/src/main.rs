//! tracy-cli: command-line client for the Tracy correlation server
//!
//! Talks to the HTTP API of `tracy-server`. Output is human-readable by
//! default; `--json` prints the server's JSON unchanged.
//!
//! # Subcommands
//! - `tracers <uuid>`        requests and tracers captured in a session
//! - `tracer <id>`           one tracer
//! - `events <id>`           events recorded against a tracer
//! - `event <id> ...`        record an event by hand
//! - `clear-cache`           reset the server's tracer cache
//! - `status`                server health and cache counters

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:7777";
const PREVIEW_CHARS: usize = 80;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "tracy-cli", version, about = "Tracy tracer and event correlation client")]
struct Cli {
    /// Tracy HTTP server URL (overrides TRACY_HTTP_URL env var)
    #[arg(long, env = "TRACY_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List every captured request of a session with its tracers
    Tracers {
        /// Session UUID
        uuid: String,
    },

    /// Show one tracer
    Tracer {
        id: i64,
    },

    /// List events recorded for a tracer
    Events {
        /// Tracer ID
        id: i64,
    },

    /// Record an event against a tracer
    Event {
        /// Tracer ID
        id: i64,

        #[arg(long)]
        data: String,

        #[arg(long)]
        location: String,

        #[arg(long = "event-type")]
        event_type: String,
    },

    /// Reset the server's tracer cache
    ClearCache,

    /// Show Tracy server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TracerView {
    pub id: i64,
    pub tracer_string: String,
    #[serde(default)]
    pub tracer_payload: String,
    #[serde(default)]
    pub screenshot: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RequestView {
    pub id: i64,
    #[serde(default)]
    pub request_method: String,
    #[serde(default)]
    pub raw_request: String,
    #[serde(default)]
    pub tracers: Vec<TracerView>,
}

#[derive(Debug, Deserialize)]
pub struct EventView {
    pub id: i64,
    pub data: String,
    pub location: String,
    pub event_type: String,
    #[serde(default)]
    pub dom_contexts: Vec<serde_json::Value>,
}

// ============================================================================
// Formatting
// ============================================================================

/// First line of `text`, capped at `max` characters with a trailing ellipsis.
pub fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() <= max {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(max).collect();
    cut.push('…');
    cut
}

pub fn format_request(r: &RequestView) -> Vec<String> {
    let method = if r.request_method.is_empty() {
        "?"
    } else {
        r.request_method.as_str()
    };
    let mut lines = vec![format!(
        "request #{} {} {}",
        r.id,
        method,
        preview(&r.raw_request, PREVIEW_CHARS)
    )];
    for t in &r.tracers {
        lines.push(format_tracer(t));
    }
    lines
}

pub fn format_tracer(t: &TracerView) -> String {
    let shot = if t.screenshot.is_some() { " [screenshot]" } else { "" };
    format!(
        "  tracer #{} {} {}{}",
        t.id,
        t.tracer_string,
        preview(&t.tracer_payload, PREVIEW_CHARS),
        shot
    )
}

pub fn format_event(e: &EventView) -> String {
    format!(
        "event #{} {} at {} ({} contexts): {}",
        e.id,
        e.event_type,
        e.location,
        e.dom_contexts.len(),
        preview(&e.data, PREVIEW_CHARS)
    )
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

struct Client {
    server: String,
    http: reqwest::blocking::Client,
}

impl Client {
    fn new(server: &str) -> anyhow::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            server: server.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn get(&self, path: &str) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}{}", self.server, path);
        let resp = self.http.get(&url).send()?;
        read_json(resp)
    }

    fn post(&self, path: &str, body: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}{}", self.server, path);
        let resp = self.http.post(&url).json(body).send()?;
        read_json(resp)
    }
}

fn read_json(resp: reqwest::blocking::Response) -> anyhow::Result<serde_json::Value> {
    let status = resp.status();
    let body: serde_json::Value = resp.json().unwrap_or_default();
    if !status.is_success() {
        let reason = body["error"].as_str().unwrap_or("no error message");
        anyhow::bail!("server returned {}: {}", status, reason);
    }
    Ok(body)
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn do_tracers(client: &Client, uuid: &str, json: bool) -> anyhow::Result<()> {
    let body = client.get(&format!("/sessions/{}/tracers", uuid))?;
    if json {
        return print_json(&body);
    }

    let requests: Vec<RequestView> = serde_json::from_value(body)?;
    if requests.is_empty() {
        eprintln!("No requests captured for session {}", uuid);
        return Ok(());
    }
    for r in &requests {
        for line in format_request(r) {
            println!("{}", line);
        }
    }
    Ok(())
}

fn do_tracer(client: &Client, id: i64, json: bool) -> anyhow::Result<()> {
    let body = client.get(&format!("/tracers/{}", id))?;
    if json {
        return print_json(&body);
    }
    let tracer: TracerView = serde_json::from_value(body)?;
    println!("{}", format_tracer(&tracer).trim_start());
    Ok(())
}

fn do_events(client: &Client, id: i64, json: bool) -> anyhow::Result<()> {
    let body = client.get(&format!("/tracers/{}/events", id))?;
    if json {
        return print_json(&body);
    }
    let events: Vec<EventView> = serde_json::from_value(body)?;
    if events.is_empty() {
        eprintln!("No events recorded for tracer {}", id);
    }
    for e in &events {
        println!("{}", format_event(e));
    }
    Ok(())
}

fn do_event(
    client: &Client,
    id: i64,
    data: String,
    location: String,
    event_type: String,
) -> anyhow::Result<()> {
    let body = serde_json::json!({
        "data": data,
        "location": location,
        "event_type": event_type,
    });
    let stored = client.post(&format!("/tracers/{}/events", id), &body)?;
    println!("Recorded event #{}", stored["id"].as_i64().unwrap_or_default());
    Ok(())
}

fn do_clear_cache(client: &Client) -> anyhow::Result<()> {
    client.post("/cache/clear", &serde_json::json!({}))?;
    println!("Tracer cache cleared");
    Ok(())
}

/// Show the server status by calling GET /health and GET /cache/stats.
fn do_status(client: &Client) -> anyhow::Result<()> {
    let health = client.get("/health")?;
    println!("Tracy server: {}", health["status"].as_str().unwrap_or("unknown"));
    println!("Version:      {}", health["version"].as_str().unwrap_or("?"));
    println!("Store:        {}", health["store"].as_str().unwrap_or("?"));
    println!("Socket:       {}", health["socket"].as_str().unwrap_or("?"));

    let stats = client.get("/cache/stats")?;
    println!("Cold loads:   {}", stats["cold_loads"]);
    println!("Unmatched:    {}", stats["unmatched_screenshot_updates"]);
    println!("Uncached:     {}", stats["uncached_updates"]);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();

    let result = Client::new(&cli.server).and_then(|client| match cli.command {
        Commands::Tracers { uuid } => do_tracers(&client, &uuid, cli.json),
        Commands::Tracer { id } => do_tracer(&client, id, cli.json),
        Commands::Events { id } => do_events(&client, id, cli.json),
        Commands::Event {
            id,
            data,
            location,
            event_type,
        } => do_event(&client, id, data, location, event_type),
        Commands::ClearCache => do_clear_cache(&client),
        Commands::Status => do_status(&client),
    });

    if let Err(e) = result {
        eprintln!("tracy-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
