//! Subscribes to Bybit's public trade stream, pings every three seconds and
//! closes after a few ticks.

use std::time::Duration;

use tokio::time::interval;
use wsclient::{Callbacks, ClientSession, Message, Options, close::CloseCode};

#[tokio::main]
async fn main() -> wsclient::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wss://stream.bybit.com/v5/public/linear".to_owned());

    let handler = Callbacks::new()
        .on_ready(|state| tracing::info!(%state, "ready"))
        .on_message(|msg: Message| match msg {
            Message::Text(text) => tracing::info!("{text}"),
            Message::Binary(data) => tracing::info!(len = data.len(), "binary message"),
        })
        .on_pong(|payload| tracing::debug!(len = payload.len(), "pong"))
        .on_error(|err| tracing::warn!(error = %err, "websocket error"))
        .on_close(|code| tracing::info!(%code, "closed"));

    let session = ClientSession::builder(url)
        .with_options(
            Options::default()
                .with_no_delay()
                .with_connect_timeout(Duration::from_secs(10)),
        )
        .with_handler(handler)
        .build()?;

    session.connect().await?;

    let subscribe = r#"{
        "req_id": "1",
        "op": "subscribe",
        "args": [
            "publicTrade.BTCUSDT"
        ]
    }"#;
    session.send_text(subscribe).await?;

    let mut ival = interval(Duration::from_secs(3));
    for _ in 0..10 {
        ival.tick().await;
        if !session.state().can_send() {
            tracing::debug!("Disconnected");
            return Ok(());
        }
        tracing::debug!("Tick");
        session.ping("idk").await?;
    }

    session.close(CloseCode::Normal).await;
    Ok(())
}
