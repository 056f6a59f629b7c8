//! WebSocket relay client.
//!
//! One background task owns the socket. It reconnects after `retry` whenever the connection
//! drops and reports each transition as a `RelayEvent`. Messages queued while disconnected are
//! discarded: the coordinator announces itself again on `Connected`.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use huddle::{
    error::Error,
    relay::{Relay, RelayEvent, RelayEventStream, RelayMessage},
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};

pub struct WsRelay {
    outbound: mpsc::UnboundedSender<RelayMessage>,
    event_ch: broadcast::Sender<RelayEvent>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Drop for WsRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl WsRelay {
    pub fn spawn(url: impl Into<String>, retry: Duration) -> Self {
        let url = url.into();
        let (outbound, rx) = mpsc::unbounded_channel();
        let (event_ch, _rx) = broadcast::channel(1024);
        let connected = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run(
            url,
            retry,
            rx,
            event_ch.clone(),
            connected.clone(),
        ));
        Self {
            outbound,
            event_ch,
            connected,
            task,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl Relay for WsRelay {
    fn send(&self, message: RelayMessage) -> Result<(), Error> {
        if !self.is_connected() {
            log::debug!("relay disconnected. dropping {message}");
            return Ok(());
        }
        self.outbound
            .send(message)
            .map_err(|e| Error::FailedToSendSignal(e.to_string()))
    }

    fn subscribe(&self) -> Result<RelayEventStream, Error> {
        let mut rx = self.event_ch.subscribe();
        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("relay event stream lagged by {n} events");
                    }
                };
            }
        };
        Ok(RelayEventStream(Box::pin(stream)))
    }
}

async fn run(
    url: String,
    retry: Duration,
    mut outbound: mpsc::UnboundedReceiver<RelayMessage>,
    event_ch: broadcast::Sender<RelayEvent>,
    connected: Arc<AtomicBool>,
) {
    loop {
        let ws_stream = match connect_async(url.as_str()).await {
            Ok((r, _)) => r,
            Err(e) => {
                log::warn!("failed to connect to relay {url}: {e}");
                tokio::time::sleep(retry).await;
                continue;
            }
        };
        log::info!("connected to relay {url}");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        // anything queued before now belongs to the previous connection
        while outbound.try_recv().is_ok() {}
        connected.store(true, Ordering::Relaxed);
        let _ = event_ch.send(RelayEvent::Connected);

        loop {
            tokio::select! {
                opt = outbound.recv() => {
                    let message = match opt {
                        Some(r) => r,
                        // the relay handle is gone
                        None => return,
                    };
                    let text = match serde_json::to_string(&message) {
                        Ok(r) => r,
                        Err(e) => {
                            log::error!("failed to serialize {message}: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = ws_write.send(Message::Text(text)).await {
                        log::error!("failed to send relay message: {e}");
                        break;
                    }
                }
                opt = ws_read.next() => match opt {
                    Some(Ok(Message::Text(text))) => dispatch(&event_ch, &text),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => dispatch(&event_ch, &text),
                        Err(_) => log::debug!("ignoring non utf-8 relay frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("relay connection error: {e}");
                        break;
                    }
                }
            }
        }

        connected.store(false, Ordering::Relaxed);
        log::info!("disconnected from relay {url}");
        let _ = event_ch.send(RelayEvent::Disconnected);
        tokio::time::sleep(retry).await;
    }
}

fn dispatch(event_ch: &broadcast::Sender<RelayEvent>, text: &str) {
    match serde_json::from_str::<RelayMessage>(text) {
        Ok(message) => {
            let _ = event_ch.send(RelayEvent::Message(message));
        }
        // the relay carries chat and presence traffic as well
        Err(e) => log::trace!("ignoring relay frame: {e}"),
    }
}
