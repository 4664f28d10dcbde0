use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use serde_json::Value;
use skylink_proto::message::Envelope;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::frame::Frame;
use crate::{Backoff, DuplexChannel, LinkError, LinkEvent, LinkState, UplinkConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub tls: bool,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn parse(s: &str) -> Result<Self, LinkError> {
        let (tls, rest) = if let Some(r) = s.strip_prefix("tls://") {
            (true, r)
        } else if let Some(r) = s.strip_prefix("tcp://") {
            (false, r)
        } else {
            return Err(LinkError::Endpoint(format!("{} (expected tls:// or tcp://)", s)));
        };
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| LinkError::Endpoint(format!("{} (missing port)", s)))?;
        if host.is_empty() {
            return Err(LinkError::Endpoint(format!("{} (missing host)", s)));
        }
        let port = port.parse().map_err(|_| LinkError::Endpoint(format!("{} (bad port)", s)))?;
        Ok(Self { tls, host: host.to_string(), port })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", if self.tls { "tls" } else { "tcp" }, self.host, self.port)
    }
}

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

struct Shared {
    state: RwLock<LinkState>,
    writer: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    shutdown: watch::Sender<bool>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl Shared {
    fn set_state(&self, next: LinkState) {
        let mut st = self.state.write();
        if *st != next {
            *st = next;
            let _ = self.events.send(LinkEvent::StateChanged(next));
        }
    }
}

/// Framed duplex channel to the operator server with automatic reconnection.
#[derive(Clone)]
pub struct Uplink {
    shared: Arc<Shared>,
}

impl Uplink {
    /// Spawns the connection loop. Events (state changes, inbound envelopes)
    /// arrive on the returned receiver.
    pub fn start(cfg: UplinkConfig) -> Result<(Self, mpsc::UnboundedReceiver<LinkEvent>), LinkError> {
        let endpoint = Endpoint::parse(&cfg.endpoint)?;
        let tls = if endpoint.tls {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let tls_cfg = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
            Some(TlsConnector::from(Arc::new(tls_cfg)))
        } else {
            warn!("uplink: plain tcp endpoint {}; traffic is not encrypted", endpoint);
            None
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            state: RwLock::new(LinkState::Disconnected),
            writer: Mutex::new(None),
            shutdown,
            events: events_tx,
        });

        tokio::spawn(run(shared.clone(), cfg, endpoint, tls));
        Ok((Self { shared }, events_rx))
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.read()
    }

    /// Stops the connection loop; the channel reports `Disconnected` once closed.
    pub fn close(&self) {
        self.shared.shutdown.send_replace(true);
    }

    fn send(&self, frame: Frame) -> Result<(), LinkError> {
        let writer = self.shared.writer.lock();
        let tx = writer.as_ref().ok_or(LinkError::NotConnected)?;
        tx.send(frame.encode()?).map_err(|_| LinkError::NotConnected)
    }
}

impl DuplexChannel for Uplink {
    fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    fn publish(&self, topic: &str, payload: Value) -> Result<(), LinkError> {
        self.send(Frame::Json(Envelope::new(topic, payload)))
    }

    fn publish_binary(&self, topic: &str, payload: Bytes) -> Result<(), LinkError> {
        self.send(Frame::Binary { topic: topic.to_string(), payload })
    }
}

async fn run(shared: Arc<Shared>, cfg: UplinkConfig, endpoint: Endpoint, tls: Option<TlsConnector>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut backoff = Backoff::new(cfg.reconnect_min_ms, cfg.reconnect_max_ms);
    let timeout = Duration::from_millis(cfg.connect_timeout_ms);

    while !*shutdown.borrow() {
        shared.set_state(LinkState::Connecting);
        let conn = tokio::select! {
            r = connect(&endpoint, tls.as_ref(), timeout) => r,
            _ = shutdown.changed() => break,
        };

        match conn {
            Ok(stream) => {
                backoff.reset();
                info!("uplink: connected to {}", endpoint);
                let lost = serve(&shared, stream, &mut shutdown, cfg.max_frame_bytes).await;
                shared.writer.lock().take();
                match lost {
                    Some(e) => warn!("uplink: connection lost: {}", e),
                    None => break,
                }
            }
            Err(e) => warn!("uplink: connect to {} failed: {}", endpoint, e),
        }

        shared.set_state(LinkState::Disconnected);
        let delay = backoff.next_delay();
        debug!("uplink: reconnecting in {:?}", delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    shared.writer.lock().take();
    shared.set_state(LinkState::Disconnected);
    info!("uplink: closed");
}

async fn connect(
    endpoint: &Endpoint,
    tls: Option<&TlsConnector>,
    timeout: Duration,
) -> Result<Box<dyn Io>, LinkError> {
    let fut = async {
        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        tcp.set_nodelay(true)?;
        let io: Box<dyn Io> = match tls {
            Some(connector) => {
                let name = ServerName::try_from(endpoint.host.clone())
                    .map_err(|e| LinkError::Tls(e.to_string()))?;
                Box::new(connector.connect(name, tcp).await?)
            }
            None => Box::new(tcp),
        };
        Ok::<_, LinkError>(io)
    };
    tokio::time::timeout(timeout, fut).await.map_err(|_| LinkError::Timeout)?
}

/// Pumps one connection until it fails (`Some`) or shutdown is requested (`None`).
async fn serve(
    shared: &Shared,
    stream: Box<dyn Io>,
    shutdown: &mut watch::Receiver<bool>,
    max_frame: usize,
) -> Option<LinkError> {
    let (mut rd, mut wr) = tokio::io::split(stream);
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    *shared.writer.lock() = Some(tx);
    shared.set_state(LinkState::Connected);

    let writer = async {
        while let Some(buf) = rx.recv().await {
            wr.write_all(&buf).await?;
            wr.flush().await?;
        }
        Ok::<(), LinkError>(())
    };
    let reader = read_frames(&mut rd, &shared.events, max_frame);

    tokio::select! {
        r = writer => Some(r.err().unwrap_or(LinkError::NotConnected)),
        e = reader => Some(e),
        _ = shutdown.changed() => None,
    }
}

async fn read_frames<R: AsyncRead + Unpin>(
    rd: &mut R,
    events: &mpsc::UnboundedSender<LinkEvent>,
    max_frame: usize,
) -> LinkError {
    loop {
        let body = match read_frame(rd, max_frame).await {
            Ok(b) => b,
            Err(e) => return e,
        };
        match Frame::decode(body) {
            Ok(Frame::Json(env)) => {
                let _ = events.send(LinkEvent::Message(env));
            }
            Ok(Frame::Binary { topic, payload }) => {
                debug!("uplink: ignoring inbound binary frame on {} ({} bytes)", topic, payload.len());
            }
            Err(e) => warn!("uplink: dropped bad frame: {}", e),
        }
    }
}

async fn read_frame<R: AsyncRead + Unpin>(rd: &mut R, max_frame: usize) -> Result<Bytes, LinkError> {
    let len = rd.read_u32().await? as usize;
    if len > max_frame {
        return Err(LinkError::Frame(format!("frame of {} bytes exceeds {}", len, max_frame)));
    }
    let mut buf = vec![0u8; len];
    rd.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[test]
    fn endpoint_parsing() {
        let e = Endpoint::parse("tls://ops.example.net:7443").unwrap();
        assert!(e.tls);
        assert_eq!(e.host, "ops.example.net");
        assert_eq!(e.port, 7443);
        assert_eq!(e.to_string(), "tls://ops.example.net:7443");
        assert!(!Endpoint::parse("tcp://10.0.0.2:9000").unwrap().tls);
        assert!(Endpoint::parse("ops.example.net:7443").is_err());
        assert!(Endpoint::parse("tcp://:9000").is_err());
        assert!(Endpoint::parse("tcp://host:port").is_err());
    }

    #[tokio::test]
    async fn publish_without_connection_fails_fast() {
        let (link, _events) = Uplink::start(UplinkConfig::new("tcp://127.0.0.1:1")).unwrap();
        assert!(!link.is_connected());
        assert!(matches!(link.publish("ping", json!({})), Err(LinkError::NotConnected)));
        link.close();
    }

    #[tokio::test]
    async fn exchanges_frames_with_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (link, mut events) = Uplink::start(UplinkConfig::new(format!("tcp://127.0.0.1:{}", port))).unwrap();

        let (mut sock, _) = listener.accept().await.unwrap();
        assert_eq!(events.recv().await, Some(LinkEvent::StateChanged(LinkState::Connecting)));
        assert_eq!(events.recv().await, Some(LinkEvent::StateChanged(LinkState::Connected)));

        let inbound = Frame::Json(Envelope::new("drone:command", json!({ "command": "land" })));
        sock.write_all(&inbound.encode().unwrap()).await.unwrap();
        match events.recv().await {
            Some(LinkEvent::Message(env)) => assert_eq!(env.event, "drone:command"),
            other => panic!("unexpected {:?}", other),
        }

        link.publish("ping", json!({ "message": "hi" })).unwrap();
        let len = sock.read_u32().await.unwrap() as usize;
        let mut buf = vec![0u8; len];
        sock.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], 1);
        match Frame::decode(Bytes::from(buf)).unwrap() {
            Frame::Json(env) => assert_eq!(env.data["message"], "hi"),
            other => panic!("unexpected {:?}", other),
        }

        drop(sock);
        assert_eq!(events.recv().await, Some(LinkEvent::StateChanged(LinkState::Disconnected)));
        link.close();
    }
}
