//! Minimal in-process ZMTP REP peer.
//!
//! Listens on an ephemeral loopback port, serves one connection at a
//! time, decodes each request envelope and answers with whatever the
//! handler returns. Every decoded request is recorded for assertions.

#![allow(dead_code)]

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use aepsych_client::rpc::codec::decode_request;
use aepsych_client::rpc::zmtp::{self, Frame, FrameDecoder};
use aepsych_client::{Endpoint, Request};

pub type Handler = Box<dyn FnMut(&Request) -> String + Send>;

/// Peer behaviour knobs.
#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// Socket type announced in READY.
    pub socket_type: &'static str,
    /// Send a PING command ahead of every reply.
    pub ping_before_reply: bool,
    /// Delay before each reply.
    pub reply_delay: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            socket_type: "REP",
            ping_before_reply: false,
            reply_delay: Duration::ZERO,
        }
    }
}

pub struct RepServer {
    port: u16,
    stop: Arc<AtomicBool>,
    requests: Arc<Mutex<Vec<Request>>>,
    accepted: Arc<AtomicUsize>,
    thread: Option<JoinHandle<()>>,
}

impl RepServer {
    pub fn start(handler: impl FnMut(&Request) -> String + Send + 'static) -> Self {
        Self::start_with(ServerOptions::default(), handler)
    }

    pub fn start_with(
        options: ServerOptions,
        handler: impl FnMut(&Request) -> String + Send + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let port = listener.local_addr().expect("local addr").port();

        let stop = Arc::new(AtomicBool::new(false));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));

        let thread = {
            let stop = Arc::clone(&stop);
            let requests = Arc::clone(&requests);
            let accepted = Arc::clone(&accepted);
            let mut handler: Handler = Box::new(handler);
            std::thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((sock, _)) => {
                            accepted.fetch_add(1, Ordering::SeqCst);
                            let _ = serve(sock, options, &mut handler, &requests, &stop);
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            std::thread::sleep(Duration::from_millis(2));
                        }
                        Err(_) => break,
                    }
                }
            })
        };

        Self {
            port,
            stop,
            requests,
            accepted,
            thread: Some(thread),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: "127.0.0.1".into(),
            port: self.port,
        }
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for RepServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

fn serve(
    mut sock: TcpStream,
    options: ServerOptions,
    handler: &mut Handler,
    requests: &Mutex<Vec<Request>>,
    stop: &AtomicBool,
) -> std::io::Result<()> {
    sock.set_nonblocking(false)?;
    sock.set_read_timeout(Some(Duration::from_millis(20)))?;

    let mut out = zmtp::greeting(true).to_vec();
    zmtp::encode_frame(&Frame::ready(options.socket_type), &mut out);
    sock.write_all(&out)?;

    let mut dec = FrameDecoder::new();
    let mut buf = [0u8; 4096];
    let mut parts: Vec<Frame> = Vec::new();

    while !stop.load(Ordering::SeqCst) {
        let n = match sock.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => return Err(e),
        };
        if dec.feed(&buf[..n]).is_err() {
            return Ok(());
        }
        let _ = dec.take_greeting();

        while let Some(frame) = dec.next_frame() {
            // READY and PONG need no answer.
            if frame.is_command() {
                continue;
            }
            let more = frame.has_more();
            parts.push(frame);
            if more {
                continue;
            }

            let body = parts.pop().map(|f| f.body).unwrap_or_default();
            parts.clear();
            let request = decode_request(&body).expect("client sent a malformed request");
            let reply = handler(&request);
            requests.lock().expect("requests lock").push(request);

            if !options.reply_delay.is_zero() {
                std::thread::sleep(options.reply_delay);
            }
            let mut out = Vec::new();
            if options.ping_before_reply {
                zmtp::encode_frame(&Frame::command("PING", &[0, 0, b'h', b'b']), &mut out);
            }
            zmtp::encode_frame(&Frame::delimiter(), &mut out);
            zmtp::encode_frame(&Frame::message(reply.into_bytes(), false), &mut out);
            sock.write_all(&out)?;
        }
    }
    Ok(())
}
