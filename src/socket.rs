use std::io::{Read, Write};

const READ_CHUNK: usize = 16 * 1024;

/// A connected TCP stream in non-blocking mode.
pub struct TcpSocket {
    inner: std::net::TcpStream,
    read_buf: bytes::BytesMut,
}

impl TcpSocket {
    /// Connects (blocking), then switches the stream to non-blocking mode.
    pub fn connect(addr: std::net::SocketAddr) -> std::io::Result<Self> {
        let inner = std::net::TcpStream::connect(addr)?;
        inner.set_nonblocking(true)?;

        let mut read_buf = bytes::BytesMut::with_capacity(READ_CHUNK);
        read_buf.resize(READ_CHUNK, 0);

        Ok(TcpSocket {
            inner,
            read_buf,
        })
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.inner.peer_addr()
    }

    /// One non-blocking read into the socket's own buffer.
    ///
    /// `None` means the read would block, an empty slice means the peer closed.
    /// The slice is overwritten by the next read.
    pub fn nb_read(&mut self) -> std::io::Result<Option<&[u8]>> {
        let read = loop {
            match (&self.inner).read(&mut self.read_buf) {
                Ok(read) => break read,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => (),
                Err(err) => return Err(err),
            }
        };

        Ok(Some(&self.read_buf[..read]))
    }

    /// One non-blocking write. Returns 0 when the write would block.
    pub fn nb_write(&self, buf: &[u8]) -> std::io::Result<usize> {
        loop {
            match (&self.inner).write(buf) {
                Ok(written) => return Ok(written),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(0),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => (),
                Err(err) => return Err(err),
            }
        }
    }
}

impl std::fmt::Debug for TcpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSocket")
            .field("fd", &std::os::unix::io::AsRawFd::as_raw_fd(self))
            .field("peer", &self.inner.peer_addr().ok())
            .finish()
    }
}

impl std::os::unix::io::AsRawFd for TcpSocket {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.inner.as_raw_fd()
    }
}
