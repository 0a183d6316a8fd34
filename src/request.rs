use bytes::BufMut;

/// Serializes an HTTP/1.1 request: first line, headers, blank line, body.
///
/// Headers go on `HttpRequest`; `done_with_headers` writes the blank line and
/// hands back an [`HttpRequestBody`], so a header can never follow the body.
#[derive(Debug, Default)]
pub struct HttpRequest {
    buf: bytes::BytesMut,
}

/// A request whose header section is closed.
#[derive(Debug)]
pub struct HttpRequestBody {
    buf: bytes::BytesMut,
}

impl HttpRequest {
    pub fn new() -> Self {
        Default::default()
    }

    /// Replaces anything written so far with `line`.
    pub fn set_first_line(&mut self, line: &str) {
        self.buf.clear();
        put_line(&mut self.buf, line);
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.buf.reserve(name.len() + value.len() + 4);
        self.buf.put_slice(name.as_bytes());
        self.buf.put_slice(b": ");
        put_line(&mut self.buf, value);
    }

    pub fn done_with_headers(mut self) -> HttpRequestBody {
        self.buf.put_slice(b"\r\n");
        HttpRequestBody {
            buf: self.buf,
        }
    }
}

impl HttpRequestBody {
    pub fn read_in_body(&mut self, body: &[u8]) {
        self.buf.extend_from_slice(body);
    }

    pub fn into_bytes(self) -> bytes::BytesMut {
        self.buf
    }
}

fn put_line(buf: &mut bytes::BytesMut, line: &str) {
    buf.put_slice(line.as_bytes());
    buf.put_slice(b"\r\n");
}
