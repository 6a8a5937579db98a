//! Session state machine against a scripted transport.

use aepsych_client::{
    ClientError, Endpoint, ProtocolError, Request, RequestType, Session, Status, TransportError,
    TrialConfig,
};

use crate::mock_transport::ScriptedTransport;

fn connected() -> Session<ScriptedTransport> {
    Session::connect_to(ScriptedTransport::new(), Endpoint::default()).unwrap()
}

#[test]
fn poll_performs_one_receive_per_call() {
    let mut s = connected();
    s.ask().unwrap();
    s.transport_mut().pending(2);
    s.transport_mut().reply(r#"{"x":[0.5]}"#);

    assert_eq!(s.poll().unwrap(), Status::RequestSent);
    assert_eq!(s.poll().unwrap(), Status::RequestSent);
    assert_eq!(s.poll().unwrap(), Status::ResponseReady);
    assert!(s.transport().script.is_empty());
}

#[test]
fn is_busy_tracks_request_sent_only() {
    let mut s = connected();
    assert!(!s.is_busy());
    s.parameters().unwrap();
    assert!(s.is_busy());
    s.transport_mut().reply(r#"{"x":[0.0,1.0]}"#);
    s.poll().unwrap();
    assert!(!s.is_busy());
    s.take_config().unwrap();
    assert!(!s.is_busy());
}

#[test]
fn every_rpc_is_rejected_while_busy() {
    let mut s = connected();
    s.ask().unwrap();
    let cfg = TrialConfig::new().with("x", vec![0.1]).unwrap();

    let attempts: Vec<ClientError> = vec![
        s.ask().unwrap_err(),
        s.parameters().unwrap_err(),
        s.tell(cfg, 1).unwrap_err(),
        s.resume(1).unwrap_err(),
        s.query_default(aepsych_client::QueryType::Min).unwrap_err(),
        s.setup("[common]").unwrap_err(),
    ];
    for err in attempts {
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::RequestInFlight {
                pending: RequestType::Ask
            })
        ));
    }
    assert_eq!(s.transport().sent.len(), 1);
    assert_eq!(s.transport().connects, 1);
    assert_eq!(s.status(), Status::RequestSent);
}

#[test]
fn transport_error_on_poll_keeps_request_outstanding() {
    let mut s = connected();
    s.ask().unwrap();
    s.transport_mut().fail();
    let err = s.poll().unwrap_err();
    assert!(matches!(err, ClientError::Transport(TransportError::PeerClosed)));
    assert_eq!(s.status(), Status::RequestSent);
}

#[test]
fn send_failure_does_not_change_state() {
    let mut s = connected();
    s.transport_mut().fail_next_send = true;
    assert!(s.ask().unwrap_err().is_transport());
    assert_eq!(s.status(), Status::Ready);
    s.ask().unwrap();
    assert_eq!(s.status(), Status::RequestSent);
}

#[test]
fn getters_fail_closed_in_every_non_response_state() {
    let mut s = connected();
    assert!(matches!(
        s.take_query_response(),
        Err(ClientError::Protocol(ProtocolError::NoReply { status: Status::Ready }))
    ));
    s.ask().unwrap();
    assert!(s.take_config().unwrap_err().is_protocol());
    assert!(s.take_strategy().unwrap_err().is_protocol());
    assert!(s.take_query_response().unwrap_err().is_protocol());
    assert_eq!(s.status(), Status::RequestSent);
}

#[test]
fn getter_failure_leaves_reply_unconsumed() {
    let mut s = connected();
    s.ask().unwrap();
    s.transport_mut().reply(r#"{"x":[0.25]}"#);
    s.poll().unwrap();

    assert!(s.take_strategy().unwrap_err().is_serialization());
    assert!(s.take_query_response().unwrap_err().is_serialization());
    assert_eq!(s.status(), Status::ResponseReady);

    let cfg = s.take_config().unwrap();
    assert_eq!(cfg.get("x"), Some(&[0.25][..]));
    assert_eq!(s.base_config(), Some(&cfg));
}

#[test]
fn finished_flag_follows_reserved_key_only() {
    let mut s = connected();
    let ask = |s: &mut Session<ScriptedTransport>, reply: &str| {
        s.ask().unwrap();
        s.transport_mut().reply(reply);
        s.poll().unwrap();
        s.take_config().unwrap();
        s.finished()
    };
    assert!(!ask(&mut s, r#"{"x":[0.1]}"#));
    assert!(ask(&mut s, r#"{"x":[0.2],"finished":[1.0]}"#));
    assert!(ask(&mut s, r#"{"x":[0.3]}"#));
    assert!(!ask(&mut s, r#"{"finished":[0.0]}"#));
    assert!(!ask(&mut s, r#"{"finished":[2.0]}"#));
}

#[test]
fn close_is_idempotent_and_reconnect_is_usable() {
    let mut s = connected();
    s.close();
    s.close();
    assert!(!s.is_connected());
    assert_eq!(s.transport().closes, 1);

    s.connect().unwrap();
    s.ask().unwrap();
    assert_eq!(s.transport().last_request(), Some(Request::Ask));
}

#[test]
fn cancel_discards_in_flight_exchange() {
    let mut s = connected();
    s.tell(TrialConfig::new().with("x", vec![0.1]).unwrap(), 0)
        .unwrap();
    s.cancel().unwrap();
    assert_eq!(s.status(), Status::Ready);
    assert_eq!(s.transport().connects, 2);
    // A late reply from the old exchange is never surfaced: the new
    // connection starts clean.
    s.ask().unwrap();
    assert_eq!(s.status(), Status::RequestSent);
}

#[test]
fn wait_ready_within_succeeds_before_deadline() {
    let mut s = connected();
    s.resume(9).unwrap();
    s.transport_mut().pending(5);
    s.transport_mut().reply("9");
    let status = futures_lite::future::block_on(s.wait_ready_within(
        std::time::Duration::from_secs(5),
        futures_lite::future::yield_now,
    ))
    .unwrap();
    assert_eq!(status, Status::ResponseReady);
    assert_eq!(s.take_strategy().unwrap(), 9);
}

#[test]
fn wait_ready_returns_immediately_when_not_busy() {
    let mut s = connected();
    let mut steps = 0;
    let status = futures_lite::future::block_on(s.wait_ready(|| {
        steps += 1;
        futures_lite::future::yield_now()
    }))
    .unwrap();
    assert_eq!(status, Status::Ready);
    assert_eq!(steps, 0);
}

#[test]
fn wait_ready_paced_completes_on_timer_steps() {
    let mut s = connected();
    s.ask().unwrap();
    s.transport_mut().pending(3);
    s.transport_mut().reply(r#"{"x":[0.25]}"#);

    let started = std::time::Instant::now();
    let status = futures_lite::future::block_on(
        s.wait_ready_paced(std::time::Duration::from_millis(2), None),
    )
    .unwrap();
    assert_eq!(status, Status::ResponseReady);
    // Three pending polls, each followed by one timer step.
    assert!(started.elapsed() >= std::time::Duration::from_millis(6));
    assert_eq!(s.take_config().unwrap().get("x"), Some(&[0.25][..]));
}

#[test]
fn wait_ready_paced_honours_deadline() {
    let mut s = connected();
    s.parameters().unwrap();

    let err = futures_lite::future::block_on(s.wait_ready_paced(
        std::time::Duration::from_millis(5),
        Some(std::time::Duration::from_millis(30)),
    ))
    .unwrap_err();
    assert!(matches!(
        err,
        ClientError::DeadlineExceeded {
            kind: RequestType::Parameters,
            waited
        } if waited >= std::time::Duration::from_millis(30)
    ));
    assert!(s.is_busy());

    s.transport_mut().reply(r#"{"x":[0.0,1.0]}"#);
    let status = futures_lite::future::block_on(s.wait_ready_paced(
        std::time::Duration::from_millis(5),
        Some(std::time::Duration::from_secs(5)),
    ))
    .unwrap();
    assert_eq!(status, Status::ResponseReady);
}
