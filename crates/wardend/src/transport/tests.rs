//! Listener tests over real sockets.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use warden_config::{ServiceDescriptor, SocketEndpoint};
use warden_protocol::frame::{decode_line, encode_line};
use warden_protocol::testing::{FixedVerifier, RecordingAuthority};
use warden_protocol::{
    CredentialAuthority, Envelope, EnvelopeCodec, IdentityVerifier, RemoteError, ReplyFrame,
    ReplyOutcome, RequestFrame, ServerFrame, ServerNotice, demo,
};

use super::{ListenerError, SocketListener};
use crate::{HandlerError, HelperService};

const SLOW_GREETING: Duration = Duration::from_millis(750);

fn descriptor(authorized_clients: Option<&str>) -> ServiceDescriptor {
    ServiceDescriptor {
        helper_id: "dev.test.helper".to_owned(),
        version: Some("2".to_owned()),
        program: Utf8PathBuf::from("/nonexistent/helper"),
        socket: SocketEndpoint::tcp("127.0.0.1", 0),
        authorized_clients: authorized_clients.map(str::to_owned),
    }
}

fn service(verifier: FixedVerifier, authorized_clients: Option<&str>) -> Arc<HelperService> {
    Arc::new(HelperService::new(
        Arc::new(demo::registry().expect("registry")),
        Arc::new(RecordingAuthority::new(16)) as Arc<dyn CredentialAuthority>,
        Arc::new(verifier) as Arc<dyn IdentityVerifier>,
        descriptor(authorized_clients),
        "/nonexistent/helper.json",
    ))
}

/// Service whose greeting handler stalls on "slow", plus its authority.
fn greeting_service() -> (Arc<HelperService>, Arc<RecordingAuthority>) {
    let authority = Arc::new(RecordingAuthority::new(16));
    let mut service = HelperService::new(
        Arc::new(demo::registry().expect("registry")),
        Arc::clone(&authority) as Arc<dyn CredentialAuthority>,
        Arc::new(FixedVerifier::accepting()) as Arc<dyn IdentityVerifier>,
        descriptor(None),
        "/nonexistent/helper.json",
    );
    service
        .set_handler(&demo::say_hello(), |message: String, _context| async move {
            if message == "slow" {
                tokio::time::sleep(SLOW_GREETING).await;
            }
            Ok::<_, HandlerError>(format!("pong:{message}"))
        })
        .expect("say-hello handler");
    (Arc::new(service), authority)
}

fn greeting(authority: &RecordingAuthority, id: u64, message: &str) -> Vec<u8> {
    let token = authority.create_token().expect("token");
    let credential = authority.external_form(&token).expect("external form");
    let envelope = EnvelopeCodec::new(authority.minimum_external_form_len())
        .encode(&Envelope::request(
            Some(credential),
            Some("2".to_owned()),
            message.to_owned(),
        ))
        .expect("request envelope");
    encode_line(&RequestFrame {
        id,
        command: demo::SAY_HELLO.to_owned(),
        envelope,
    })
    .expect("request line")
}

struct Running {
    endpoint: SocketEndpoint,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

async fn start(service: Arc<HelperService>) -> Running {
    let listener = SocketListener::bind(&SocketEndpoint::tcp("127.0.0.1", 0))
        .await
        .expect("bind");
    let endpoint = listener.local_endpoint().expect("local endpoint");
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(listener.serve(service, async {
        drop(stopped.await);
    }));
    Running {
        endpoint,
        stop,
        task,
    }
}

async fn connect(endpoint: &SocketEndpoint) -> TcpStream {
    let SocketEndpoint::Tcp { host, port } = endpoint else {
        panic!("tcp endpoint expected");
    };
    TcpStream::connect((host.as_str(), *port)).await.expect("connect")
}

async fn next_frame(lines: &mut tokio::io::Lines<BufReader<TcpStream>>) -> Option<ServerFrame> {
    let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("line within timeout")
        .expect("read")?;
    Some(decode_line(line.as_bytes()).expect("server frame"))
}

#[fixture]
fn open_service() -> Arc<HelperService> {
    service(FixedVerifier::accepting(), None)
}

#[rstest]
#[tokio::test]
async fn ephemeral_ports_are_resolved() {
    let listener = SocketListener::bind(&SocketEndpoint::tcp("127.0.0.1", 0))
        .await
        .expect("bind");

    let endpoint = listener.local_endpoint().expect("local endpoint");

    assert!(matches!(endpoint, SocketEndpoint::Tcp { port, .. } if port != 0));
}

#[rstest]
#[tokio::test]
async fn malformed_frames_with_an_id_are_answered(open_service: Arc<HelperService>) {
    let running = start(open_service).await;
    let mut stream = connect(&running.endpoint).await;

    stream
        .write_all(b"{\"id\":5,\"command\":\"say-hello\"}\n")
        .await
        .expect("write");
    let mut lines = BufReader::new(stream).lines();

    let frame = next_frame(&mut lines).await;
    assert!(
        matches!(
            frame,
            Some(ServerFrame::Reply(ReplyFrame {
                id: 5,
                outcome: ReplyOutcome::Error {
                    error: RemoteError::MalformedFrame { .. }
                }
            }))
        ),
        "{frame:?}"
    );
    running.stop.send(()).expect("listener running");
    running.task.await.expect("listener task");
}

#[rstest]
#[tokio::test]
async fn unknown_commands_are_answered_over_the_socket(open_service: Arc<HelperService>) {
    let running = start(open_service).await;
    let mut stream = connect(&running.endpoint).await;
    let request = encode_line(&RequestFrame {
        id: 3,
        command: "frobnicate".to_owned(),
        envelope: b"{\"body\":null}".to_vec(),
    })
    .expect("request line");

    stream.write_all(&request).await.expect("write");
    let mut lines = BufReader::new(stream).lines();

    assert_eq!(
        next_frame(&mut lines).await,
        Some(ServerFrame::Reply(ReplyFrame {
            id: 3,
            outcome: ReplyOutcome::Error {
                error: RemoteError::UnknownCommand {
                    command: "frobnicate".to_owned()
                }
            }
        }))
    );
    running.stop.send(()).expect("listener running");
    running.task.await.expect("listener task");
}

#[rstest]
#[tokio::test]
async fn slow_handlers_do_not_hold_up_later_frames() {
    let (service, authority) = greeting_service();
    let running = start(service).await;
    let mut stream = connect(&running.endpoint).await;
    let started = tokio::time::Instant::now();

    stream
        .write_all(&greeting(&authority, 1, "slow"))
        .await
        .expect("write slow");
    stream
        .write_all(&greeting(&authority, 2, "fast"))
        .await
        .expect("write fast");
    let mut lines = BufReader::new(stream).lines();

    let first = next_frame(&mut lines).await;
    assert!(
        matches!(first, Some(ServerFrame::Reply(ReplyFrame { id: 2, outcome: ReplyOutcome::Ok { .. } }))),
        "{first:?}"
    );
    assert!(started.elapsed() < SLOW_GREETING, "fast reply waited for the slow handler");
    let second = next_frame(&mut lines).await;
    assert!(
        matches!(second, Some(ServerFrame::Reply(ReplyFrame { id: 1, outcome: ReplyOutcome::Ok { .. } }))),
        "{second:?}"
    );
    running.stop.send(()).expect("listener running");
    running.task.await.expect("listener task");
}

#[rstest]
#[tokio::test]
async fn stopping_announces_termination(open_service: Arc<HelperService>) {
    let running = start(open_service).await;
    let stream = connect(&running.endpoint).await;
    let mut lines = BufReader::new(stream).lines();
    // Give the listener a moment to admit the connection.
    tokio::time::sleep(Duration::from_millis(100)).await;

    running.stop.send(()).expect("listener running");

    assert_eq!(
        next_frame(&mut lines).await,
        Some(ServerFrame::Notice {
            notice: ServerNotice::TerminationImminent
        })
    );
    running.task.await.expect("listener task");
}

#[rstest]
#[tokio::test]
async fn unadmitted_clients_are_disconnected() {
    let running = start(service(FixedVerifier::rejecting(), Some("uid == 0"))).await;
    let stream = connect(&running.endpoint).await;
    let mut lines = BufReader::new(stream).lines();

    assert_eq!(next_frame(&mut lines).await, None);
    running.stop.send(()).expect("listener running");
    running.task.await.expect("listener task");
}

#[cfg(unix)]
mod unix {
    use std::os::unix::net::UnixListener as StdUnixListener;

    use super::*;

    fn socket_path(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join("helper.sock")).expect("utf8 path")
    }

    #[tokio::test]
    async fn stale_socket_files_are_replaced() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = socket_path(&dir);
        drop(StdUnixListener::bind(&path).expect("bind stale listener"));
        assert!(path.exists(), "stale socket left behind");

        let listener = SocketListener::bind(&SocketEndpoint::unix(path.clone())).await;

        assert!(listener.is_ok(), "stale socket should be replaced");
    }

    #[tokio::test]
    async fn live_sockets_are_left_alone() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = socket_path(&dir);
        let _live = StdUnixListener::bind(&path).expect("bind live listener");

        let outcome = SocketListener::bind(&SocketEndpoint::unix(path.clone())).await;

        assert!(matches!(outcome, Err(ListenerError::UnixInUse { .. })));
    }

    #[tokio::test]
    async fn regular_files_are_not_sockets() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = socket_path(&dir);
        std::fs::write(&path, b"not a socket").expect("write file");

        let outcome = SocketListener::bind(&SocketEndpoint::unix(path.clone())).await;

        assert!(matches!(outcome, Err(ListenerError::UnixNotSocket { .. })));
    }

    #[tokio::test]
    async fn socket_files_are_removed_on_shutdown() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = socket_path(&dir);
        let listener = SocketListener::bind(&SocketEndpoint::unix(path.clone()))
            .await
            .expect("bind");

        listener
            .serve(service(FixedVerifier::accepting(), None), async {})
            .await;

        assert!(!path.exists());
    }
}
