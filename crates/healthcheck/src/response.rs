//! Incremental HTTP response stream parsing and body digesting.

use crate::types::ProbeError;
use md5::{Digest, Md5};

/// Number of headers we are prepared to parse in a response.
const MAX_HEADERS: usize = 64;

/// Incremental parser for one HTTP response stream.
///
/// Header bytes are buffered only until the header/body boundary is seen and
/// the status code extracted; after that every chunk goes straight into the
/// MD5 context without being retained.
pub struct ResponseStream {
    want_digest: bool,
    header_buf: Vec<u8>,
    boundary_seen: bool,
    status_code: Option<u16>,
    context: Md5,
    body_len: u64,
}

/// Outcome of a fully-read response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSummary {
    /// Whether the header/body boundary was ever recognized.
    pub boundary_seen: bool,
    /// Parsed status code, when the boundary was seen.
    pub status_code: Option<u16>,
    /// Body digest as 32 lowercase hex chars, when requested.
    pub digest: Option<String>,
    /// Number of body bytes streamed.
    pub body_len: u64,
}

impl ResponseStream {
    /// `want_digest` controls whether body bytes are fed to the MD5 context.
    pub fn new(want_digest: bool) -> Self {
        Self {
            want_digest,
            header_buf: Vec::new(),
            boundary_seen: false,
            status_code: None,
            context: Md5::new(),
            body_len: 0,
        }
    }

    /// Feed one received chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), ProbeError> {
        if self.boundary_seen {
            if self.want_digest {
                self.context.update(chunk);
            }
            self.body_len += chunk.len() as u64;
            return Ok(());
        }

        self.header_buf.extend_from_slice(chunk);
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut headers);
        match response.parse(&self.header_buf) {
            Ok(httparse::Status::Complete(offset)) => {
                self.boundary_seen = true;
                self.status_code = response.code;
                let body = &self.header_buf[offset..];
                if self.want_digest && !body.is_empty() {
                    self.context.update(body);
                }
                self.body_len += body.len() as u64;
                self.header_buf.clear();
                Ok(())
            }
            Ok(httparse::Status::Partial) => Ok(()),
            Err(e) => Err(ProbeError::Malformed(e.to_string())),
        }
    }

    /// Finalize at EOF.
    pub fn finish(self) -> ResponseSummary {
        let digest = (self.want_digest && self.boundary_seen)
            .then(|| hex::encode(self.context.finalize()));
        ResponseSummary {
            boundary_seen: self.boundary_seen,
            status_code: self.status_code,
            digest,
            body_len: self.body_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest_of(body: &[u8]) -> String {
        hex::encode(Md5::digest(body))
    }

    #[test]
    fn extracts_status_and_digest() {
        let mut stream = ResponseStream::new(true);
        stream
            .feed(b"HTTP/1.0 200 OK\r\nContent-Type: text/html\r\n\r\nhello")
            .unwrap();
        let summary = stream.finish();

        assert!(summary.boundary_seen);
        assert_eq!(summary.status_code, Some(200));
        assert_eq!(summary.body_len, 5);
        assert_eq!(summary.digest.as_deref(), Some(digest_of(b"hello").as_str()));
    }

    #[test]
    fn boundary_split_across_reads() {
        let mut stream = ResponseStream::new(true);
        stream.feed(b"HTTP/1.0 200 OK\r\nServer: x\r").unwrap();
        stream.feed(b"\n\r").unwrap();
        stream.feed(b"\nbody ").unwrap();
        stream.feed(b"bytes").unwrap();
        let summary = stream.finish();

        assert_eq!(summary.status_code, Some(200));
        assert_eq!(summary.body_len, 10);
        assert_eq!(
            summary.digest.as_deref(),
            Some(digest_of(b"body bytes").as_str())
        );
    }

    #[test]
    fn digest_is_deterministic_and_sensitive() {
        let run = |body: &[u8]| {
            let mut stream = ResponseStream::new(true);
            stream.feed(b"HTTP/1.0 200 OK\r\n\r\n").unwrap();
            stream.feed(body).unwrap();
            stream.finish().digest.unwrap()
        };

        let first = run(b"same content");
        let second = run(b"same content");
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
        assert!(first.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));

        // One flipped byte changes the digest.
        assert_ne!(first, run(b"same_content"));
    }

    #[test]
    fn no_boundary_reports_empty() {
        let mut stream = ResponseStream::new(true);
        stream.feed(b"HTTP/1.0 200 OK\r\nTruncated").unwrap();
        let summary = stream.finish();

        assert!(!summary.boundary_seen);
        assert!(summary.digest.is_none());
        assert_eq!(summary.body_len, 0);
    }

    #[test]
    fn zero_bytes_reports_empty() {
        let stream = ResponseStream::new(false);
        let summary = stream.finish();
        assert!(!summary.boundary_seen);
        assert_eq!(summary.status_code, None);
    }

    #[test]
    fn malformed_status_line_is_an_error() {
        let mut stream = ResponseStream::new(false);
        let result = stream.feed(b"NOT-HTTP garbage\r\n\r\n");
        assert!(matches!(result, Err(ProbeError::Malformed(_))));
    }

    #[test]
    fn digest_skipped_when_not_wanted() {
        let mut stream = ResponseStream::new(false);
        stream.feed(b"HTTP/1.0 404 Not Found\r\n\r\nbody").unwrap();
        let summary = stream.finish();

        assert_eq!(summary.status_code, Some(404));
        assert!(summary.digest.is_none());
        assert_eq!(summary.body_len, 4);
    }
}
