//! `ReqSocket` against a real ZMTP REP peer on loopback.

use std::time::{Duration, Instant};

use aepsych_client::rpc::message::RequestType;
use aepsych_client::{
    ClientError, QueryMessage, QueryType, ReqSocket, Request, Session, Status, TransportError,
    TrialConfig,
};

use crate::rep_server::{RepServer, ServerOptions};

const PATIENCE: Duration = Duration::from_secs(5);

/// Step that parks the test thread briefly between polls.
fn nap() -> futures_lite::future::YieldNow {
    std::thread::sleep(Duration::from_millis(1));
    futures_lite::future::yield_now()
}

fn wait(s: &mut Session<ReqSocket>) -> Status {
    futures_lite::future::block_on(s.wait_ready_within(PATIENCE, nap)).unwrap()
}

/// A server that answers the way AEPsych does for each request kind.
fn aepsych_like(req: &Request) -> String {
    match req {
        Request::Setup { .. } => "0".into(),
        Request::Resume { strat_id, .. } => strat_id.to_string(),
        Request::Ask => r#"{"freq":[4.5],"amp":[0.25]}"#.into(),
        Request::Tell { config, .. } => serde_json::to_string(config).unwrap(),
        Request::Parameters => r#"{"freq":[1.0,10.0],"amp":[0.0,1.0]}"#.into(),
        Request::Query(q) => {
            let mut answer = q.clone();
            answer.y = 0.75;
            serde_json::to_string(&answer).unwrap()
        }
    }
}

/// Send `ask` and poll until the transport reports a failure, which may
/// surface on the send itself or on a later poll.
fn ask_until_error(s: &mut Session<ReqSocket>) -> ClientError {
    if let Err(e) = s.ask() {
        return e;
    }
    let started = Instant::now();
    loop {
        if let Err(e) = s.poll() {
            return e;
        }
        assert!(started.elapsed() < PATIENCE, "transport failure never observed");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn session_for(server: &RepServer) -> Session<ReqSocket> {
    Session::new(ReqSocket::new(), server.endpoint())
}

#[test]
fn full_exchange_over_zmtp() {
    let server = RepServer::start(aepsych_like);
    let mut s = session_for(&server);

    s.setup("[common]\nparnames = [freq, amp]\n").unwrap();
    assert_eq!(wait(&mut s), Status::ResponseReady);
    assert_eq!(s.take_strategy().unwrap(), 0);

    s.parameters().unwrap();
    wait(&mut s);
    s.take_config().unwrap();
    assert_eq!(
        s.declared_parameters(),
        Some(&["freq".to_string(), "amp".to_string()][..])
    );

    s.ask().unwrap();
    wait(&mut s);
    let trial = s.take_config().unwrap();
    assert_eq!(trial.get("freq"), Some(&[4.5][..]));

    s.tell(trial.clone(), 1).unwrap();
    wait(&mut s);
    assert_eq!(s.take_config().unwrap(), trial);

    let q = QueryMessage::new(QueryType::Max).with_constraint(1, 0.5);
    s.query(q.clone()).unwrap();
    wait(&mut s);
    let answer = s.take_query_response().unwrap();
    assert_eq!(answer.query_type, QueryType::Max);
    assert_eq!(answer.constraints, q.constraints);
    assert_eq!(answer.y, 0.75);

    let kinds: Vec<RequestType> = server.requests().iter().map(Request::kind).collect();
    assert_eq!(
        kinds,
        [
            RequestType::Setup,
            RequestType::Parameters,
            RequestType::Ask,
            RequestType::Tell,
            RequestType::Query
        ]
    );
}

#[test]
fn ping_from_peer_is_answered_transparently() {
    let server = RepServer::start_with(
        ServerOptions {
            ping_before_reply: true,
            ..ServerOptions::default()
        },
        aepsych_like,
    );
    let mut s = session_for(&server);
    s.connect().unwrap();
    for _ in 0..3 {
        s.ask().unwrap();
        wait(&mut s);
        s.take_config().unwrap();
    }
    assert_eq!(server.requests().len(), 3);
}

#[test]
fn router_peer_is_accepted() {
    let server = RepServer::start_with(
        ServerOptions {
            socket_type: "ROUTER",
            ..ServerOptions::default()
        },
        aepsych_like,
    );
    let mut s = session_for(&server);
    s.connect().unwrap();
    s.resume(42).unwrap();
    wait(&mut s);
    assert_eq!(s.take_strategy().unwrap(), 42);
}

#[test]
fn incompatible_peer_fails_the_handshake() {
    let server = RepServer::start_with(
        ServerOptions {
            socket_type: "PUB",
            ..ServerOptions::default()
        },
        aepsych_like,
    );
    let mut s = session_for(&server);
    s.connect().unwrap();
    let err = ask_until_error(&mut s);
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::Handshake(_))
    ));
    assert!(!s.is_connected());
}

#[test]
fn long_frames_cross_the_wire() {
    let mut big = TrialConfig::new();
    for i in 0..64 {
        big.insert(format!("param_{i:02}"), vec![f64::from(i), 0.5]).unwrap();
    }
    let reply = serde_json::to_string(&big).unwrap();
    assert!(reply.len() > 255);

    let server = RepServer::start(move |_| reply.clone());
    let mut s = session_for(&server);
    s.connect().unwrap();

    let long_text = "x".repeat(1000);
    s.setup(&long_text).unwrap();
    wait(&mut s);
    assert_eq!(s.take_config().unwrap(), big);
    assert_eq!(server.requests(), vec![Request::setup(long_text, "0.01")]);
}

#[test]
fn deadline_leaves_request_outstanding_until_reply() {
    let server = RepServer::start_with(
        ServerOptions {
            reply_delay: Duration::from_millis(300),
            ..ServerOptions::default()
        },
        aepsych_like,
    );
    let mut s = session_for(&server);
    s.connect().unwrap();
    s.ask().unwrap();

    let early = futures_lite::future::block_on(
        s.wait_ready_within(Duration::from_millis(20), nap),
    );
    assert!(matches!(
        early,
        Err(ClientError::DeadlineExceeded {
            kind: RequestType::Ask,
            ..
        })
    ));
    assert!(s.is_busy());

    assert_eq!(wait(&mut s), Status::ResponseReady);
    assert!(s.take_config().is_ok());
}

#[test]
fn second_setup_reconnects_to_the_server() {
    let server = RepServer::start(aepsych_like);
    let mut s = session_for(&server);

    s.setup("first").unwrap();
    wait(&mut s);
    s.take_strategy().unwrap();

    s.setup("second").unwrap();
    wait(&mut s);
    s.take_strategy().unwrap();

    assert_eq!(server.accepted(), 2);
    assert_eq!(
        server.requests(),
        vec![Request::setup("first", "0.01"), Request::setup("second", "0.01")]
    );
}

#[test]
fn server_shutdown_surfaces_as_transport_error() {
    let server = RepServer::start_with(
        ServerOptions {
            reply_delay: Duration::from_millis(50),
            ..ServerOptions::default()
        },
        aepsych_like,
    );
    let mut s = session_for(&server);
    s.connect().unwrap();
    s.ask().unwrap();
    wait(&mut s);
    s.take_config().unwrap();

    drop(server);
    assert!(ask_until_error(&mut s).is_transport());
}
