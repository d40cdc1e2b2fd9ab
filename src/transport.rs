//! Transport strategies used by [exchange connectors](crate::exchange::ExchangeConnector):
//! a WebSocket feed and a fixed-interval HTTP poll.

use async_trait::async_trait;
use futures::prelude::*;
use futures::stream::{SplitSink, SplitStream};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::{net::TcpStream, time::{sleep_until, Instant}};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};

use crate::error::FeedError;


/// Longest wait for an upstream to take our close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;


/// Delivers raw upstream messages for one connector.
#[async_trait]
pub trait Transport: Send {
    /// Open the underlying connection.
    async fn open(&mut self) -> Result<(), FeedError>;

    /// Wait for the next raw message. Must be safe to cancel.
    async fn recv(&mut self) -> Result<String, FeedError>;

    /// Ask for an immediate out-of-cycle fetch. Returns `false` when the
    /// transport is a continuous feed and there is nothing to do.
    fn refresh(&mut self) -> bool;

    /// Release the connection. Idempotent.
    async fn close(&mut self);
}

/// Application-level ping some exchanges require to keep a feed open.
#[derive(Debug, Clone)]
pub struct Keepalive {
    pub interval: Duration,
    pub message: String,
}

/// Map a tungstenite failure onto the feed error taxonomy.
pub fn classify_ws_error(error: tungstenite::Error) -> FeedError {
    match error {
        tungstenite::Error::Http(response) => match response.status().as_u16() {
            401 | 403 => FeedError::Unauthorized(format!("handshake rejected with {}", response.status())),
            _ => FeedError::TransientNetwork(format!("handshake rejected with {}", response.status())),
        },
        tungstenite::Error::Protocol(error) => FeedError::ProtocolViolation(error.to_string()),
        other => FeedError::TransientNetwork(other.to_string()),
    }
}

/// WebSocket feed: connects, sends the subscription messages, answers pings
/// and fails when the feed goes silent for longer than `idle_timeout`.
pub struct WsTransport {
    ws_url: String,
    subscribe_messages: Vec<String>,
    keepalive: Option<Keepalive>,
    idle_timeout: Duration,
    connection: Option<(WsSink, WsStream)>,
    last_activity: Instant,
    next_ping: Instant,
}

impl WsTransport {
    pub fn new(ws_url: String, subscribe_messages: Vec<String>, keepalive: Option<Keepalive>, idle_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            ws_url,
            subscribe_messages,
            keepalive,
            idle_timeout,
            connection: None,
            last_activity: now,
            next_ping: now,
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&mut self) -> Result<(), FeedError> {
        self.close().await;
        info!("Connecting to WebSocket: {}", &self.ws_url);
        let (ws, _) = connect_async(self.ws_url.as_str()).await.map_err(classify_ws_error)?;
        let (mut sink, stream) = ws.split();
        for subscribe_message in &self.subscribe_messages {
            info!("Subscription '{}'.", subscribe_message);
            sink.send(Message::Text(subscribe_message.clone())).await.map_err(classify_ws_error)?;
        }
        let now = Instant::now();
        self.last_activity = now;
        self.next_ping = now + self.keepalive.as_ref().map(|k| k.interval).unwrap_or_default();
        self.connection = Some((sink, stream));
        Ok(())
    }

    async fn recv(&mut self) -> Result<String, FeedError> {
        let (sink, stream) = self.connection.as_mut()
            .ok_or_else(|| FeedError::TransientNetwork("not connected".to_string()))?;
        loop {
            let idle_deadline = self.last_activity + self.idle_timeout;
            tokio::select! {
                frame = stream.next() => {
                    self.last_activity = Instant::now();
                    match frame {
                        Some(Ok(Message::Text(text))) => return Ok(text),
                        Some(Ok(Message::Binary(data))) => {
                            return String::from_utf8(data)
                                .map_err(|_| FeedError::ProtocolViolation("binary frame is not UTF-8".to_string()));
                        },
                        Some(Ok(Message::Ping(data))) => {
                            debug!("Received ping from {}", &self.ws_url);
                            sink.send(Message::Pong(data)).await.map_err(classify_ws_error)?;
                        },
                        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => (),
                        Some(Ok(Message::Close(frame))) => {
                            return Err(FeedError::TransientNetwork(format!("closed by peer: {:?}", frame)));
                        },
                        Some(Err(error)) => return Err(classify_ws_error(error)),
                        None => return Err(FeedError::TransientNetwork("stream ended".to_string())),
                    }
                },
                _ = sleep_until(idle_deadline) => {
                    return Err(FeedError::TransientNetwork(
                        format!("feed stalled for {}s", self.idle_timeout.as_secs())
                    ));
                },
                _ = sleep_until(self.next_ping), if self.keepalive.is_some() => {
                    if let Some(keepalive) = &self.keepalive {
                        sink.send(Message::Text(keepalive.message.clone())).await.map_err(classify_ws_error)?;
                        self.next_ping = Instant::now() + keepalive.interval;
                    }
                },
            }
        }
    }

    fn refresh(&mut self) -> bool {
        false
    }

    async fn close(&mut self) {
        if let Some((mut sink, _)) = self.connection.take() {
            close_within(&self.ws_url, CLOSE_TIMEOUT, sink.close()).await;
        }
    }
}

/// Drive a WebSocket close, giving up after `timeout`. The connection is
/// dropped either way.
async fn close_within<F>(ws_url: &str, timeout: Duration, close: F)
where
    F: Future<Output = Result<(), tungstenite::Error>>,
{
    match tokio::time::timeout(timeout, close).await {
        Ok(Ok(())) => info!("Disconnected from {}", ws_url),
        Ok(Err(error)) => debug!("Error closing {}: {}", ws_url, error),
        Err(_) => warn!("{} did not take the close frame within {}s, dropping it", ws_url, timeout.as_secs_f32()),
    }
}

/// HTTP poll: the first request is immediate, then one every `interval`
/// unless [refresh](Transport::refresh) asks for an early one.
pub struct PollTransport {
    url: String,
    interval: Duration,
    timeout: Duration,
    client: Option<reqwest::Client>,
    next_poll: Instant,
    poll_now: bool,
}

impl PollTransport {
    pub fn new(url: String, interval: Duration, timeout: Duration) -> Self {
        Self {
            url,
            interval,
            timeout,
            client: None,
            next_poll: Instant::now(),
            poll_now: true,
        }
    }

    fn classify_http_error(error: reqwest::Error) -> FeedError {
        match error.status().map(|status| status.as_u16()) {
            Some(401) | Some(403) => FeedError::Unauthorized(error.to_string()),
            _ => FeedError::TransientNetwork(error.to_string()),
        }
    }
}

#[async_trait]
impl Transport for PollTransport {
    async fn open(&mut self) -> Result<(), FeedError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|error| FeedError::TransientNetwork(error.to_string()))?;
        info!("Polling {} every {}ms", &self.url, self.interval.as_millis());
        self.client = Some(client);
        self.poll_now = true;
        Ok(())
    }

    async fn recv(&mut self) -> Result<String, FeedError> {
        if !self.poll_now {
            sleep_until(self.next_poll).await;
        }
        let client = self.client.as_ref()
            .ok_or_else(|| FeedError::TransientNetwork("not connected".to_string()))?;
        self.poll_now = false;
        self.next_poll = Instant::now() + self.interval;
        let response = client.get(&self.url).send().await.map_err(Self::classify_http_error)?;
        let response = response.error_for_status().map_err(Self::classify_http_error)?;
        response.text().await.map_err(|error| {
            warn!("Could not read response body from {}: {}", &self.url, error);
            FeedError::TransientNetwork(error.to_string())
        })
    }

    fn refresh(&mut self) -> bool {
        self.poll_now = true;
        true
    }

    async fn close(&mut self) {
        if self.client.take().is_some() {
            info!("Stopped polling {}", &self.url);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Serve one canned HTTP response per connection.
    async fn http_server(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buffer = [0u8; 1024];
                let _ = socket.read(&mut buffer).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}/orders/BTC-USDT", addr)
    }

    #[tokio::test]
    async fn test_poll_returns_body() {
        let url = http_server("HTTP/1.1 200 OK\r\nContent-Length: 16\r\nConnection: close\r\n\r\n{\"success\":true}").await;
        let mut transport = PollTransport::new(url, Duration::from_secs(60), Duration::from_secs(5));
        transport.open().await.unwrap();
        assert_eq!(transport.recv().await.unwrap(), r#"{"success":true}"#);
        assert!(transport.refresh());
        assert_eq!(transport.recv().await.unwrap(), r#"{"success":true}"#);
        transport.close().await;
        transport.close().await;
    }

    #[tokio::test]
    async fn test_poll_unauthorized() {
        let url = http_server("HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let mut transport = PollTransport::new(url, Duration::from_secs(60), Duration::from_secs(5));
        transport.open().await.unwrap();
        assert!(matches!(transport.recv().await, Err(FeedError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_poll_server_error_is_transient() {
        let url = http_server("HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let mut transport = PollTransport::new(url, Duration::from_secs(60), Duration::from_secs(5));
        transport.open().await.unwrap();
        assert!(matches!(transport.recv().await, Err(FeedError::TransientNetwork(_))));
    }

    #[tokio::test]
    async fn test_ws_subscribes_and_reads_until_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            let subscription = ws.next().await.unwrap().unwrap();
            assert_eq!(subscription, Message::Text("subscribe".to_string()));
            ws.send(Message::Ping(vec![1])).await.unwrap();
            ws.send(Message::Text("book".to_string())).await.unwrap();
            ws.close(None).await.unwrap();
            while ws.next().await.is_some() {}
        });
        let mut transport = WsTransport::new(
            format!("ws://{}", addr),
            vec!["subscribe".to_string()],
            None,
            Duration::from_secs(5),
        );
        transport.open().await.unwrap();
        assert_eq!(transport.recv().await.unwrap(), "book");
        assert!(matches!(transport.recv().await, Err(FeedError::TransientNetwork(_))));
        assert!(!transport.refresh());
        transport.close().await;
    }

    #[tokio::test]
    async fn test_ws_idle_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            while ws.next().await.is_some() {}
        });
        let mut transport = WsTransport::new(format!("ws://{}", addr), vec![], None, Duration::from_millis(100));
        transport.open().await.unwrap();
        match transport.recv().await {
            Err(FeedError::TransientNetwork(reason)) => assert!(reason.contains("stalled")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ws_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let mut transport = WsTransport::new(format!("ws://{}", addr), vec![], None, Duration::from_secs(1));
        assert!(matches!(transport.open().await, Err(FeedError::TransientNetwork(_))));
    }

    #[tokio::test]
    async fn test_stuck_close_gives_up() {
        let stuck = future::pending::<Result<(), tungstenite::Error>>();
        let closing = close_within("ws://stuck.example.com", Duration::from_millis(50), stuck);
        assert!(tokio::time::timeout(Duration::from_secs(2), closing).await.is_ok());
    }
}
