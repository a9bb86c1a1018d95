//! Synchronous HTTP GET, the only network primitive the worker uses.

use crate::config::FetchConfig;
use crate::error::FetchError;
use std::io::Read;

/// Status and body of a completed request. Non-2xx statuses are responses
/// too; the worker decides what counts as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Blocking GET. Implementations must be callable from the worker thread.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, FetchError>;
}

/// `ureq`-backed transport. No timeout beyond the agent defaults.
pub struct HttpTransport {
    agent: ureq::Agent,
    max_body_bytes: u64,
}

impl HttpTransport {
    pub fn new(config: &FetchConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(&config.user_agent)
            .build();
        Self {
            agent,
            max_body_bytes: config.max_body_bytes,
        }
    }

    fn read_body(&self, response: ureq::Response) -> Result<Vec<u8>, FetchError> {
        // ureq::into_string() has a 10MiB cap, read through the reader instead.
        // One byte past the limit tells an oversized body from one that fits.
        let mut body = Vec::new();
        response
            .into_reader()
            .take(self.max_body_bytes.saturating_add(1))
            .read_to_end(&mut body)?;

        if body.len() as u64 > self.max_body_bytes {
            return Err(FetchError::BodyTooLarge(self.max_body_bytes));
        }
        Ok(body)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(&FetchConfig::default())
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        match self.agent.get(url).call() {
            Ok(response) => {
                let status = response.status();
                let body = self.read_body(response)?;
                Ok(HttpResponse { status, body })
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = self.read_body(response).unwrap_or_default();
                Ok(HttpResponse { status, body })
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(FetchError::Transport(transport.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve one `200 OK` with `body` on a local port, returning its URL
    fn serve_once(body: Vec<u8>) -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/image.png", listener.local_addr().unwrap());

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            // Skip the request up to the blank line ending its headers
            while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                line.clear();
            }

            let mut stream = reader.into_inner();
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )
            .unwrap();
            stream.write_all(&body).unwrap();
        });
        (url, server)
    }

    fn transport_with_limit(max_body_bytes: u64) -> HttpTransport {
        HttpTransport::new(&FetchConfig {
            max_body_bytes,
            ..FetchConfig::default()
        })
    }

    #[test]
    fn test_body_within_limit() {
        let (url, server) = serve_once(vec![7; 10]);
        let response = transport_with_limit(10).get(&url).unwrap();
        server.join().unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, vec![7; 10]);
    }

    #[test]
    fn test_oversized_body_is_rejected() {
        let (url, server) = serve_once(vec![7; 100]);
        let result = transport_with_limit(10).get(&url);
        server.join().unwrap();

        assert!(matches!(result, Err(FetchError::BodyTooLarge(10))));
    }

    #[test]
    fn test_malformed_url_is_transport_error() {
        let transport = HttpTransport::default();
        let result = transport.get("not a url");
        assert!(matches!(result, Err(FetchError::Transport(_))));
    }
}
