use std::io::{BufRead, BufReader, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::ops::Range;
use std::thread;
use std::time::{Duration, Instant};

use http::{StatusCode, Uri};
use log::{debug, info, warn};
use rand::Rng;

use crate::{ListenerError, ListenerResult, OAUTH_TOKEN_KEY, OAUTH_VERIFIER_KEY};

/// Where the random start port is drawn from. The port search continues
/// upward past its end.
const START_PORTS: Range<u16> = 1100..20000;
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

const SUCCESS_HTML: &str =
    "<html><body><h1>Flickr authorization complete</h1><p>You may close this window.</p></body></html>";
const ERROR_HTML: &str =
    "<html><body><h1>Flickr authorization failed</h1><p>You may close this window and retry.</p></body></html>";

/// A one-shot HTTP listener on the loopback interface, receiving the
/// redirect the service sends after the user authorized the request token.
#[derive(Debug)]
pub struct CallbackListener {
    listener: TcpListener,
    port: u16,
}

impl CallbackListener {
    /// Binds to the first free port at or above a random start in
    /// `1100..20000`.
    pub fn new() -> ListenerResult<Self> {
        let start = rand::rng().random_range(START_PORTS);
        Self::bind_from(start)
    }

    /// Binds to the first free port at or above `start`, up to 65535.
    pub fn bind_from(start: u16) -> ListenerResult<Self> {
        debug!("finding free port starting at 127.0.0.1:{}", start);
        for port in start.max(START_PORTS.start)..=u16::MAX {
            match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
                Ok(listener) => {
                    info!("callback listener at 127.0.0.1:{}", port);
                    return Ok(CallbackListener { listener, port });
                }
                Err(e) => debug!("127.0.0.1:{} not bindable : {}", port, e),
            }
        }
        Err(ListenerError::PortsExhausted(format!(
            "127.0.0.1:{}..={}",
            start,
            u16::MAX
        )))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn callback_url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    /// Serves exactly one request and returns its `oauth_verifier`.
    ///
    /// The request's `oauth_token` must equal `expected_token`. Blocks until
    /// a request arrives, or until `timeout` when one is given.
    pub fn wait_for_verifier(
        &self,
        expected_token: &str,
        timeout: Option<Duration>,
    ) -> ListenerResult<String> {
        let stream = self.accept(timeout)?;
        let result = read_callback(&stream).and_then(|params| check_callback(params, expected_token));
        let replied = match &result {
            Ok(verifier) => {
                info!("OAuth verifier: {}", verifier);
                respond(&stream, StatusCode::OK, SUCCESS_HTML)
            }
            Err(e) => {
                warn!("rejected callback request : {}", e);
                respond(&stream, StatusCode::BAD_REQUEST, ERROR_HTML)
            }
        };
        if let Err(e) = replied {
            warn!("could not answer the callback request : {}", e);
        }
        result
    }

    fn accept(&self, timeout: Option<Duration>) -> ListenerResult<TcpStream> {
        let timeout = match timeout {
            Some(timeout) => timeout,
            None => return Ok(self.listener.accept()?.0),
        };
        self.listener.set_nonblocking(true)?;
        let started = Instant::now();
        let accepted = loop {
            match self.listener.accept() {
                Ok((stream, _)) => break Ok(stream),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if started.elapsed() >= timeout {
                        break Err(ListenerError::Timeout(timeout));
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => break Err(e.into()),
            }
        };
        self.listener.set_nonblocking(false)?;
        let stream = accepted?;
        stream.set_nonblocking(false)?;
        Ok(stream)
    }
}

fn read_callback(stream: &TcpStream) -> ListenerResult<Vec<(String, String)>> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    // headers are not needed, but the client expects them to be read
    let mut header = String::new();
    while reader.read_line(&mut header)? > 0 && header.trim_end() != "" {
        header.clear();
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    if method != "GET" || target.is_empty() {
        return Err(ListenerError::MalformedRequest(request_line.trim_end().to_string()));
    }
    let uri = target
        .parse::<Uri>()
        .map_err(|e| ListenerError::MalformedRequest(format!("{} : {}", target, e)))?;
    debug!("callback request for {}", uri);
    Ok(url::form_urlencoded::parse(uri.query().unwrap_or_default().as_bytes())
        .into_owned()
        .collect())
}

fn check_callback(params: Vec<(String, String)>, expected_token: &str) -> ListenerResult<String> {
    let find = |key: &'static str| {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .ok_or(ListenerError::MissingParameter(key))
    };
    let token = find(OAUTH_TOKEN_KEY)?;
    let verifier = find(OAUTH_VERIFIER_KEY)?;
    if token != expected_token {
        return Err(ListenerError::TokenMismatch {
            expected: expected_token.to_string(),
            received: token,
        });
    }
    Ok(verifier)
}

fn respond(mut stream: &TcpStream, status: StatusCode, body: &str) -> ListenerResult<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default(),
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::Read;

    use super::*;

    fn send_callback(port: u16, target: &str) -> thread::JoinHandle<String> {
        let request = format!("GET {} HTTP/1.1\r\nHost: 127.0.0.1:{}\r\n\r\n", target, port);
        thread::spawn(move || {
            let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
            stream.write_all(request.as_bytes()).unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).unwrap();
            response
        })
    }

    #[test]
    fn callback_url_uses_loopback() {
        let listener = CallbackListener::new().unwrap();
        assert!(listener.port() >= START_PORTS.start);
        assert_eq!(
            listener.callback_url(),
            format!("http://127.0.0.1:{}/", listener.port())
        );
    }

    #[test]
    fn receives_verifier() {
        let listener = CallbackListener::new().unwrap();
        let client = send_callback(listener.port(), "/?oauth_token=T1&oauth_verifier=V1");
        let verifier = listener
            .wait_for_verifier("T1", Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(verifier, "V1");
        let response = client.join().unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("authorization complete"));
    }

    #[test]
    fn rejects_foreign_token() {
        let listener = CallbackListener::new().unwrap();
        let client = send_callback(listener.port(), "/?oauth_token=other&oauth_verifier=V1");
        let result = listener.wait_for_verifier("T1", Some(Duration::from_secs(5)));
        match result {
            Err(ListenerError::TokenMismatch { expected, received }) => {
                assert_eq!(expected, "T1");
                assert_eq!(received, "other");
            }
            other => panic!("expected a token mismatch, got {:?}", other),
        }
        let response = client.join().unwrap();
        assert!(response.starts_with("HTTP/1.1 400"));
        assert!(response.contains("authorization failed"));
        assert!(response.contains("Content-Type: text/html"));
    }

    #[test]
    fn rejects_other_methods() {
        let listener = CallbackListener::new().unwrap();
        let port = listener.port();
        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
            stream
                .write_all(b"POST /?oauth_token=T1&oauth_verifier=V1 HTTP/1.1\r\n\r\n")
                .unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).unwrap();
            response
        });
        let result = listener.wait_for_verifier("T1", Some(Duration::from_secs(5)));
        assert!(matches!(result, Err(ListenerError::MalformedRequest(_))));
        assert!(client.join().unwrap().starts_with("HTTP/1.1 400"));
    }

    #[test]
    fn requires_verifier() {
        let listener = CallbackListener::new().unwrap();
        let client = send_callback(listener.port(), "/?oauth_token=T1");
        let result = listener.wait_for_verifier("T1", Some(Duration::from_secs(5)));
        assert!(matches!(
            result,
            Err(ListenerError::MissingParameter(OAUTH_VERIFIER_KEY))
        ));
        client.join().unwrap();
    }

    #[test]
    fn times_out_without_request() {
        let listener = CallbackListener::new().unwrap();
        let started = Instant::now();
        let result = listener.wait_for_verifier("T1", Some(Duration::from_millis(200)));
        assert!(matches!(result, Err(ListenerError::Timeout(_))));
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn walks_upward_past_taken_ports() {
        let first = CallbackListener::bind_from(15_000).unwrap();
        let second = CallbackListener::bind_from(first.port()).unwrap();
        assert!(second.port() > first.port());
    }

    #[test]
    fn port_search_continues_past_the_random_start_range() {
        let first = CallbackListener::bind_from(START_PORTS.end - 1).unwrap();
        let second = CallbackListener::bind_from(first.port()).unwrap();
        assert!(second.port() > first.port());

        let high = CallbackListener::bind_from(40_000).unwrap();
        assert!(high.port() >= 40_000);
    }
}
