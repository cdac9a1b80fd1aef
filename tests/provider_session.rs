use market_provider::clock::SystemClock;
use market_provider::dictionary::DataDictionary;
use market_provider::domains::{Provider, ProviderSettings};
use market_provider::errors::{ServerError, ShutdownReason, TransportError};
use market_provider::message::{DomainType, Message, MsgClass, MsgKey, StreamState};
use market_provider::poller::PollSelector;
use market_provider::server::{ProviderServer, ServerConfig};
use bytes::BytesMut;
use market_provider::transport::consumer::{ConsumerConnection, ConsumerEvent};
use market_provider::transport::frame::{self, Frame, FrameKind};
use market_provider::transport::tcp::{ChannelOptions, TcpEndpoint};
use serde_json::json;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn start_provider(
    capacity: usize,
    run_time: Duration,
) -> (String, JoinHandle<Result<ShutdownReason, ServerError>>) {
    let endpoint = TcpEndpoint::bind("127.0.0.1:0", ChannelOptions::default()).unwrap();
    let addr = endpoint.local_addr().unwrap().to_string();

    let handle = thread::spawn(move || {
        ProviderServer::new(
            endpoint,
            PollSelector,
            provider(),
            SystemClock,
            config(capacity, run_time),
        )
        .run()
    });
    (addr, handle)
}

fn provider() -> Provider {
    let etc = Path::new(env!("CARGO_MANIFEST_DIR")).join("etc");
    let (dictionary, errors) =
        DataDictionary::load(&etc.join("RDMFieldDictionary"), &etc.join("enumtype.def"));
    assert!(errors.is_empty(), "{:?}", errors);
    Provider::new(ProviderSettings::default(), dictionary).unwrap()
}

fn config(capacity: usize, run_time: Duration) -> ServerConfig {
    ServerConfig {
        capacity,
        update_interval: Duration::from_millis(100),
        run_time,
        ..ServerConfig::default()
    }
}

/// Reads one frame from a raw socket.
fn read_frame(stream: &mut TcpStream, input: &mut BytesMut) -> Frame {
    let deadline = Instant::now() + WAIT;
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(f) = frame::decode(input).unwrap() {
            return f;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        assert!(!remaining.is_zero(), "no frame within {:?}", WAIT);
        stream.set_read_timeout(Some(remaining)).unwrap();
        match stream.read(&mut chunk) {
            Ok(0) => panic!("provider closed the connection"),
            Ok(n) => input.extend_from_slice(&chunk[..n]),
            Err(e) => panic!("no frame within {:?}: {}", WAIT, e),
        }
    }
}

fn connect(addr: &str) -> ConsumerConnection {
    ConsumerConnection::connect(addr, Duration::from_secs(30), "integration-test").unwrap()
}

/// Reads until a message matches, skipping everything else.
fn wait_for<F: Fn(&Message) -> bool>(conn: &mut ConsumerConnection, want: F) -> Message {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if let Some(ConsumerEvent::Message(msg)) = conn.next_event(Duration::from_millis(100)).unwrap()
        {
            if want(&msg) {
                return msg;
            }
        }
    }
    panic!("no matching message within {:?}", WAIT);
}

fn login(conn: &mut ConsumerConnection) {
    conn.send(&Message {
        payload: json!({ "application_id": "256" }),
        ..Message::request(DomainType::Login, 1, MsgKey::named("tester"))
    })
    .unwrap();
    let refresh = wait_for(conn, |m| m.domain == DomainType::Login);
    assert_eq!(refresh.class, MsgClass::Refresh);
}

#[test]
fn test_full_session_until_run_time_expires() {
    let (addr, server) = start_provider(4, Duration::from_secs(3));
    let mut conn = connect(&addr);
    login(&mut conn);

    conn.send(&Message::request(DomainType::Source, 2, MsgKey::default()))
        .unwrap();
    let directory = wait_for(&mut conn, |m| m.domain == DomainType::Source);
    assert_eq!(directory.payload["services"][0]["info"]["name"], "DIRECT_FEED");

    conn.send(&Message::request(DomainType::Dictionary, 3, MsgKey::named("RWFFld")))
        .unwrap();
    let dictionary = wait_for(&mut conn, |m| m.domain == DomainType::Dictionary);
    assert_eq!(dictionary.class, MsgClass::Refresh);
    assert!(!dictionary.payload["dictionary"]["fields"]
        .as_array()
        .unwrap()
        .is_empty());

    conn.send(&Message::request(
        DomainType::MarketPrice,
        5,
        MsgKey::named("TRI.N").with_service(1),
    ))
    .unwrap();
    let refresh = wait_for(&mut conn, |m| m.stream_id == 5);
    assert_eq!(refresh.class, MsgClass::Refresh);

    let update = wait_for(&mut conn, |m| m.stream_id == 5);
    assert_eq!(update.class, MsgClass::Update);
    assert!(update.payload["fields"]["6"].is_number());

    // Run time expiry closes every stream before the connection goes away.
    let closed = wait_for(&mut conn, |m| m.class == MsgClass::Status && m.stream_id == 3);
    assert_eq!(closed.domain, DomainType::Dictionary);
    let closed = wait_for(&mut conn, |m| m.class == MsgClass::Status && m.stream_id == 5);
    assert_eq!(closed.state.unwrap().stream, StreamState::Closed);

    assert!(matches!(
        server.join().unwrap(),
        Ok(ShutdownReason::RuntimeExpired)
    ));
}

#[test]
fn test_excess_connection_refused() {
    let (addr, server) = start_provider(1, Duration::from_secs(2));
    let mut first = connect(&addr);
    login(&mut first);

    let second = ConsumerConnection::connect(&addr, Duration::from_secs(30), "second");
    assert!(second.is_err());

    // The admitted session keeps working.
    first
        .send(&Message::request(DomainType::Source, 2, MsgKey::default()))
        .unwrap();
    wait_for(&mut first, |m| m.domain == DomainType::Source);

    assert!(matches!(
        server.join().unwrap(),
        Ok(ShutdownReason::RuntimeExpired)
    ));
}

#[test]
fn test_malformed_message_drops_only_that_session() {
    let (addr, server) = start_provider(4, Duration::from_secs(2));
    let mut bad = connect(&addr);
    let mut good = connect(&addr);
    login(&mut good);

    bad.send_raw(b"not a message").unwrap();
    let deadline = Instant::now() + WAIT;
    loop {
        match bad.next_event(Duration::from_millis(100)) {
            Err(TransportError::ConnectionClosed) | Err(TransportError::Io(_)) => break,
            Ok(_) => assert!(Instant::now() < deadline, "session was not dropped"),
            Err(e) => panic!("unexpected {}", e),
        }
    }

    good.send(&Message::request(DomainType::Source, 2, MsgKey::default()))
        .unwrap();
    wait_for(&mut good, |m| m.domain == DomainType::Source);

    assert!(matches!(
        server.join().unwrap(),
        Ok(ShutdownReason::RuntimeExpired)
    ));
}

#[test]
fn test_login_sent_with_connect_request_is_answered() {
    let (addr, server) = start_provider(4, Duration::from_secs(3));
    let mut stream = TcpStream::connect(&addr).unwrap();

    let login = Message {
        payload: json!({ "application_id": "256" }),
        ..Message::request(DomainType::Login, 1, MsgKey::named("eager"))
    };
    let mut wire = BytesMut::new();
    frame::encode(
        FrameKind::ConnectRequest,
        &frame::encode_handshake(Duration::from_secs(30), "eager-consumer"),
        &mut wire,
    );
    frame::encode(FrameKind::Data, &login.encode().unwrap(), &mut wire);
    stream.write_all(&wire).unwrap();

    let mut input = BytesMut::new();
    let ack = read_frame(&mut stream, &mut input);
    assert_eq!(ack.kind, FrameKind::ConnectAck);

    // Nothing else is sent, so only the pipelined login can produce a reply
    // before the first ping is due.
    let reply = read_frame(&mut stream, &mut input);
    assert_eq!(reply.kind, FrameKind::Data);
    let refresh = Message::decode(&reply.payload).unwrap();
    assert_eq!(refresh.domain, DomainType::Login);
    assert_eq!(refresh.class, MsgClass::Refresh);

    assert!(matches!(
        server.join().unwrap(),
        Ok(ShutdownReason::RuntimeExpired)
    ));
}

#[test]
fn test_endpoint_refuses_connections_after_shutdown() {
    let endpoint = TcpEndpoint::bind("127.0.0.1:0", ChannelOptions::default()).unwrap();
    let addr = endpoint.local_addr().unwrap();
    let mut server = ProviderServer::new(
        endpoint,
        PollSelector,
        provider(),
        SystemClock,
        config(4, Duration::ZERO),
    );

    assert!(matches!(server.run(), Ok(ShutdownReason::RuntimeExpired)));
    assert!(server.is_terminated());
    assert!(TcpStream::connect(addr).is_err());
}
