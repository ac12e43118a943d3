// Mock display device
// Connects to the daemon socket, logs every envelope, fetches announced assets and
// answers markdown views with a simulated annotation

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use zelland_lib::daemon::protocol::{
    decode_envelope, encode_envelope, ActionType, AnnotationAction, AnnotationData, Envelope,
    FileType, OpenViewRequest, Payload, WS_PATH,
};
use zelland_lib::logging;

/// Pause before the simulated reader annotates a markdown view
const READ_DELAY: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "zelland-mock", about = "Pretend to be a zelland display device", version)]
struct Args {
    /// Daemon host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Daemon port
    #[arg(long, default_value_t = 8083)]
    port: u16,

    /// Use wss/https
    #[arg(long)]
    tls: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init("info").map_err(anyhow::Error::msg)?;

    let (ws_scheme, http_scheme) = if args.tls { ("wss", "https") } else { ("ws", "http") };
    let authority = format!("{}:{}", args.host, args.port);
    let ws_url = format!("{}://{}{}", ws_scheme, authority, WS_PATH);
    let http_base = format!("{}://{}", http_scheme, authority);

    tracing::info!(url = %ws_url, "connecting");
    let (socket, _) = tokio_tungstenite::connect_async(ws_url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", ws_url))?;
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Annotation replies come from spawned tasks; funnel them through one writer
    let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(16);
    let http = reqwest::Client::new();

    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Binary(data))) => match decode_envelope(&data) {
                    Ok(envelope) => on_envelope(envelope, &http, &http_base, &out_tx),
                    Err(e) => tracing::warn!(error = %e, "undecodable frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("daemon closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(error = %e, "read failed");
                    break;
                }
            },
            Some(envelope) = out_rx.recv() => {
                let frame = Message::Binary(encode_envelope(&envelope).into());
                if let Err(e) = ws_tx.send(frame).await {
                    tracing::error!(error = %e, "failed to send annotation");
                } else {
                    tracing::info!("[sent] annotation created");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt");
                if let Err(e) = ws_tx.send(Message::Close(None)).await {
                    tracing::warn!(error = %e, "failed to send close");
                }
                let _ = tokio::time::timeout(Duration::from_secs(1), ws_rx.next()).await;
                break;
            }
        }
    }

    Ok(())
}

fn on_envelope(
    envelope: Envelope,
    http: &reqwest::Client,
    http_base: &str,
    out_tx: &mpsc::Sender<Envelope>,
) {
    match envelope.payload {
        Some(Payload::Ping(ping)) => {
            tracing::info!(timestamp = ping.timestamp, "[ping]");
        }
        Some(Payload::OpenView(view)) => {
            tracing::info!(
                asset_id = %view.asset_id,
                title = %view.title,
                file_type = %view.file_type(),
                url = %view.url,
                "[open view]"
            );

            tokio::spawn(verify_asset(http.clone(), format!("{}{}", http_base, view.url)));

            if view.file_type() == FileType::Markdown {
                tokio::spawn(simulate_reader(view, out_tx.clone()));
            }
        }
        Some(Payload::Annotation(action)) => {
            tracing::info!(
                asset_id = %action.asset_id,
                action = %action.action(),
                "[annotation]"
            );
        }
        None => tracing::info!("envelope without payload"),
    }
}

async fn verify_asset(http: reqwest::Client, url: String) {
    tracing::info!(%url, "[verify] fetching");
    match http.get(&url).send().await {
        Ok(response) if response.status().is_success() => {
            let status = response.status();
            match response.bytes().await {
                Ok(body) => tracing::info!(status = status.as_u16(), bytes = body.len(), "[verify] ok"),
                Err(e) => tracing::warn!(error = %e, "[verify] failed reading body"),
            }
        }
        Ok(response) => tracing::warn!(status = response.status().as_u16(), "[verify] failed"),
        Err(e) => tracing::warn!(error = %e, "[verify] failed"),
    }
}

async fn simulate_reader(view: OpenViewRequest, out_tx: mpsc::Sender<Envelope>) {
    tracing::info!("[sim] reading...");
    tokio::time::sleep(READ_DELAY).await;

    let now = chrono::Utc::now();
    let action = AnnotationAction {
        action: ActionType::Create as i32,
        asset_id: view.asset_id,
        data: Some(AnnotationData {
            id: format!("simulated-ann-{}", now.format("%H%M%S")),
            target_text: "This is interesting".to_string(),
            context_hash: "sha256:dummy".to_string(),
            body: "Simulated annotation from the mock device".to_string(),
            timestamp: now.timestamp(),
        }),
        file_path: String::new(),
    };

    tracing::info!("[sim] creating annotation");
    if out_tx.send(Envelope::annotation(action)).await.is_err() {
        tracing::warn!("connection closed before annotation was sent");
    }
}
