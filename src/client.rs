//! Terminal client for the duplex channel.
//!
//! Mirrors the browser behavior: connect with a bounded timeout, answer
//! heartbeat probes, retry every few seconds after a drop, and fall back to
//! the HTTP chat route with exponential backoff while the channel is down.

use crate::exchange::ExchangeResult;
use crate::gateway::events::{PING, PONG};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const FALLBACK_ATTEMPTS: u32 = 3;

/// Delay before fallback attempt `attempt` (zero-based): 1s, 2s, 4s, ...
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

/// Derive the HTTP fallback base from the duplex endpoint url.
pub fn http_base(ws_url: &str) -> Result<String> {
    let base = if let Some(rest) = ws_url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = ws_url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        anyhow::bail!("expected a ws:// or wss:// url, got {ws_url}");
    };
    Ok(base.trim_end_matches("/ws").to_string())
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn run_client(url: &str) -> Result<()> {
    let base = http_base(url)?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match connect(url).await {
            Ok(socket) => {
                println!("* connected to {url}");
                duplex_session(socket, &mut stdin).await;
                println!("* connection closed, retrying in {RECONNECT_DELAY:?}");
            }
            Err(e) => {
                eprintln!("* connect failed ({e}), using HTTP fallback");
                offline_window(&http, &base, &mut stdin).await;
                continue;
            }
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn connect(url: &str) -> Result<Socket> {
    let (socket, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
        .await
        .context("connection timed out")??;
    Ok(socket)
}

/// Pump the open connection: stdin lines out as chat frames, inbound frames
/// rendered to the terminal. Returns when the socket closes.
async fn duplex_session(socket: Socket, stdin: &mut Lines<BufReader<Stdin>>) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            inbound = stream.next() => {
                let Some(Ok(msg)) = inbound else { break };
                match msg {
                    Message::Text(text) => {
                        if text.as_str() == PING {
                            if sink.send(Message::Text(PONG.into())).await.is_err() {
                                break;
                            }
                        } else {
                            render_frame(text.as_str());
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            line = stdin.next_line() => {
                let Ok(Some(line)) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let frame = serde_json::json!({ "type": "chat", "message": line });
                if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// While disconnected, route stdin lines through the HTTP fallback until the
/// reconnect timer expires.
async fn offline_window(http: &reqwest::Client, base: &str, stdin: &mut Lines<BufReader<Stdin>>) {
    let deadline = tokio::time::Instant::now() + RECONNECT_DELAY;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match tokio::time::timeout(remaining, stdin.next_line()).await {
            Ok(Ok(Some(line))) if !line.trim().is_empty() => {
                match send_chat_http(http, base, &line).await {
                    Ok(result) => print_result(&result),
                    Err(e) => eprintln!("* fallback send failed: {e}"),
                }
            }
            Ok(Ok(Some(_))) => {}
            _ => return,
        }
    }
}

/// POST one chat message to the fallback route, retrying with exponential
/// backoff on transport errors.
pub async fn send_chat_http(
    http: &reqwest::Client,
    base: &str,
    message: &str,
) -> Result<ExchangeResult> {
    let url = format!("{base}/chat");
    let body = serde_json::json!({ "message": message });

    let mut last_err = None;
    for attempt in 0..FALLBACK_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(attempt - 1)).await;
        }
        match http.post(&url).json(&body).send().await {
            Ok(response) => {
                let result: ExchangeResult = response.json().await?;
                return Ok(result);
            }
            Err(e) => {
                eprintln!("* attempt {} failed: {e}", attempt + 1);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.map_or_else(
        || anyhow::anyhow!("fallback chat failed"),
        |e| anyhow::Error::from(e).context("fallback chat failed"),
    ))
}

fn render_frame(text: &str) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        println!("<< {text}");
        return;
    };
    match value["type"].as_str() {
        Some("info") => println!("* {}", value["message"].as_str().unwrap_or_default()),
        Some("machine_response") => {
            println!("[replay] {}", value["message"].as_str().unwrap_or_default());
        }
        Some("chat_response" | "narrative_response") => {
            match serde_json::from_value::<ExchangeResult>(value) {
                Ok(result) => print_result(&result),
                Err(_) => println!("<< {text}"),
            }
        }
        _ => println!("<< {text}"),
    }
}

fn print_result(result: &ExchangeResult) {
    if result.success {
        println!("machine: {}", result.message);
        if let Some(audio) = &result.audio {
            println!("  (audio: {} base64 chars)", audio.len());
        }
        if let Some(warning) = &result.warning {
            println!("  (warning: {warning})");
        }
    } else {
        println!("error: {}", result.error.as_deref().unwrap_or("unknown"));
    }
}
