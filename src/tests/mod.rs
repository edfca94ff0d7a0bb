use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::{Overrides, Settings};
use crate::utils::error::{ConfigError, Error, SubscribeError};

const TOPIC: &str = "origin/a/wis2/#";

fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn run_rejects_missing_topic_before_connecting() {
    let tmp = TempDir::new().unwrap();
    let settings = Settings::default().with_overrides(Overrides {
        server: Some("tcp://127.0.0.1:1883".to_string()),
        download: Some(tmp.path().join("out")),
        ..Default::default()
    });

    let err = crate::run(settings, std::future::pending()).await.unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::Missing("topic"))));
    // nothing was prepared
    assert!(!tmp.path().join("out").exists());
}

#[tokio::test]
async fn run_keeps_retrying_unreachable_broker_until_shutdown() {
    let tmp = TempDir::new().unwrap();
    let download = tmp.path().join("out");
    let settings = Settings::default().with_overrides(Overrides {
        server: Some(format!("tcp://127.0.0.1:{}", unused_port())),
        topic: Some("origin/a/wis2/#".to_string()),
        download: Some(download.clone()),
        ..Default::default()
    });

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        crate::run(settings, tokio::time::sleep(Duration::from_millis(300))),
    )
    .await
    .expect("shutdown should end the connect retry loop");

    assert!(result.is_ok());
    assert!(download.is_dir());
}

/// How the in-process broker treats its subscriber.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Script {
    /// Drop the first connection right after SUBACK, publish on the next one.
    DropFirstConnection,
    /// Answer SUBSCRIBE with the failure return code.
    RejectSubscribe,
}

/// Just enough of an MQTT 3.1.1 broker to serve one subscriber.
///
/// Every packet it receives (except PINGREQ) is reported by name.
struct FakeBroker {
    addr: SocketAddr,
    seen: mpsc::UnboundedReceiver<&'static str>,
    task: JoinHandle<()>,
}

impl FakeBroker {
    async fn start(script: Script, payload: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, seen) = mpsc::unbounded_channel();
        let task = tokio::spawn(serve(listener, script, payload, tx));
        Self { addr, seen, task }
    }

    fn server(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    /// Packets received up to and including `last`.
    async fn seen_until(&mut self, last: &str) -> Vec<&'static str> {
        let mut seen = Vec::new();
        timeout(Duration::from_secs(5), async {
            while let Some(packet) = self.seen.recv().await {
                seen.push(packet);
                if packet == last {
                    break;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("broker never saw {last}, got {seen:?}"));
        seen
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    listener: TcpListener,
    script: Script,
    payload: Vec<u8>,
    seen: mpsc::UnboundedSender<&'static str>,
) {
    let mut connections = 0;
    while let Ok((mut socket, _)) = listener.accept().await {
        connections += 1;
        while let Some((header, body)) = read_packet(&mut socket).await {
            let reply = match header >> 4 {
                1 => {
                    let _ = seen.send("CONNECT");
                    vec![0x20, 0x02, 0x00, 0x00]
                }
                8 => {
                    let _ = seen.send("SUBSCRIBE");
                    let code = if script == Script::RejectSubscribe { 0x80 } else { 0x00 };
                    let mut reply = vec![0x90, 0x03, body[0], body[1], code];
                    if script == Script::DropFirstConnection && connections == 1 {
                        let _ = socket.write_all(&reply).await;
                        break;
                    }
                    if script == Script::DropFirstConnection {
                        reply.extend(publish_packet("origin/a/wis2/x/data", &payload));
                    }
                    reply
                }
                10 => {
                    let _ = seen.send("UNSUBSCRIBE");
                    vec![0xb0, 0x02, body[0], body[1]]
                }
                12 => vec![0xd0, 0x00],
                14 => {
                    let _ = seen.send("DISCONNECT");
                    break;
                }
                _ => continue,
            };
            if socket.write_all(&reply).await.is_err() {
                break;
            }
        }
    }
}

async fn read_packet(socket: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let header = socket.read_u8().await.ok()?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = socket.read_u8().await.ok()?;
        len |= usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; len];
    socket.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(payload);

    let mut packet = vec![0x30];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if len == 0 {
            break;
        }
    }
    packet.extend(body);
    packet
}

fn broker_settings(server: String, download: &Path) -> Settings {
    Settings::default().with_overrides(Overrides {
        server: Some(server),
        topic: Some(TOPIC.to_string()),
        download: Some(download.to_path_buf()),
        ..Default::default()
    })
}

#[tokio::test]
async fn run_downloads_published_links_and_resubscribes_after_drop() {
    let http = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/a.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bytes!".to_vec()))
        .mount(&http)
        .await;
    let notification = json!({
        "type": "Feature",
        "properties": { "data_id": "a" },
        "links": [
            { "href": format!("{}/data/a.bin", http.uri()), "rel": "canonical", "type": "application/octet-stream" },
            { "href": format!("{}/data/other.bin", http.uri()), "rel": "via" }
        ]
    });

    let mut broker = FakeBroker::start(
        Script::DropFirstConnection,
        notification.to_string().into_bytes(),
    )
    .await;
    let tmp = TempDir::new().unwrap();
    let download = tmp.path().join("out");
    let file = download.join("a.bin");

    let downloaded = async {
        while !file.exists() {
            sleep(Duration::from_millis(20)).await;
        }
    };
    let result = timeout(
        Duration::from_secs(20),
        crate::run(broker_settings(broker.server(), &download), downloaded),
    )
    .await
    .expect("file should be downloaded after the reconnect");

    assert!(result.is_ok(), "{result:?}");
    assert_eq!(std::fs::read(&file).unwrap(), b"bytes!");
    assert!(!download.join("other.bin").exists());
    assert_eq!(
        broker.seen_until("DISCONNECT").await,
        [
            "CONNECT",
            "SUBSCRIBE",
            "CONNECT",
            "SUBSCRIBE",
            "UNSUBSCRIBE",
            "DISCONNECT"
        ]
    );
}

#[tokio::test]
async fn run_fails_when_broker_rejects_subscription() {
    let mut broker = FakeBroker::start(Script::RejectSubscribe, Vec::new()).await;
    let tmp = TempDir::new().unwrap();

    let result = timeout(
        Duration::from_secs(10),
        crate::run(
            broker_settings(broker.server(), tmp.path()),
            std::future::pending(),
        ),
    )
    .await
    .expect("a rejected subscription should end the run");

    assert!(
        matches!(
            result,
            Err(Error::Subscribe(SubscribeError::Rejected { ref topic })) if topic == TOPIC
        ),
        "{result:?}"
    );
    assert_eq!(
        broker.seen_until("DISCONNECT").await,
        ["CONNECT", "SUBSCRIBE", "DISCONNECT"]
    );
}
