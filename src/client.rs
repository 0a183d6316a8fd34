/// Writes line-protocol payloads to an InfluxDB `/write` endpoint over one
/// persistent connection.
///
/// All I/O happens inside the two actions registered on the [`crate::Poller`]:
/// one drains and discards responses, the other flushes queued requests while
/// the queue is non-empty. [`InfluxDbClient::post`] only queues.
///
/// A zero-byte read means the database closed the connection. That surfaces as
/// [`crate::Error::PeerClosed`] from [`crate::Poller::poll_once`]; there is no reconnect.
pub struct InfluxDbClient {
    inner: std::rc::Rc<std::cell::RefCell<ClientInner>>,
    actions: [crate::ActionHandle; 2],
}

struct ClientInner {
    params: crate::ConnectionParams,
    socket: crate::TcpSocket,
    queue: crate::OutboundQueue,
}

impl InfluxDbClient {
    pub fn connect(poller: &mut crate::Poller, params: crate::ConnectionParams) -> crate::Result<Self> {
        let socket = crate::TcpSocket::connect(params.address())?;
        let fd = std::os::unix::io::AsRawFd::as_raw_fd(&socket);
        tracing::debug!(fd, addr = %params.address(), db = params.database(), "connected to InfluxDB");

        let inner = std::rc::Rc::new(std::cell::RefCell::new(ClientInner {
            params,
            socket,
            queue: crate::OutboundQueue::new(),
        }));

        let read_action = poller.add_action_always(fd, crate::Direction::In, {
            let inner = std::rc::Rc::downgrade(&inner);
            move || match inner.upgrade() {
                Some(inner) => {
                    let result = inner.borrow_mut().on_readable();
                    result
                },
                None => Ok(crate::ActionResult::Cancel),
            }
        });

        let write_action = poller.add_action(
            fd,
            crate::Direction::Out,
            {
                let inner = std::rc::Rc::downgrade(&inner);
                move || match inner.upgrade() {
                    Some(inner) => {
                        let result = inner.borrow_mut().on_writable();
                        result
                    },
                    None => Ok(crate::ActionResult::Cancel),
                }
            },
            {
                let inner = std::rc::Rc::downgrade(&inner);
                move || match inner.upgrade() {
                    Some(inner) => {
                        let pending = !inner.borrow().queue.is_empty();
                        pending
                    },
                    None => false,
                }
            },
        );

        Ok(InfluxDbClient {
            inner,
            actions: [read_action, write_action],
        })
    }

    /// Queues one `POST /write` request carrying `payload` verbatim.
    ///
    /// Nothing is sent until the socket becomes writable. Neither the payload nor
    /// the query parameters are validated or escaped.
    pub fn post(&self, payload: &[u8], precision: &str) {
        let mut inner = self.inner.borrow_mut();
        let request = build_write_request(&inner.params, payload, precision);
        let size = request.len();

        inner.queue.push_back(request);
        tracing::trace!(size, pending = inner.queue.len(), "queued write request");
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.inner.borrow().queue.queued_bytes()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.borrow().queue.is_empty()
    }

    pub fn params(&self) -> crate::ConnectionParams {
        self.inner.borrow().params.clone()
    }
}

impl Drop for InfluxDbClient {
    fn drop(&mut self) {
        for action in &self.actions {
            action.cancel();
        }
    }
}

impl std::fmt::Debug for InfluxDbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("InfluxDbClient")
            .field("params", &inner.params)
            .field("socket", &inner.socket)
            .field("pending_requests", &inner.queue.len())
            .finish()
    }
}

impl ClientInner {
    fn on_readable(&mut self) -> crate::Result<crate::ActionResult> {
        match self.socket.nb_read()?.map(<[u8]>::len) {
            None => (),
            Some(0) => {
                let addr = self.params.host();
                tracing::warn!(%addr, "InfluxDB closed the connection");
                return Err(crate::Error::PeerClosed { addr });
            },
            Some(len) => tracing::trace!(len, "discarding InfluxDB response"),
        }

        Ok(crate::ActionResult::Continue)
    }

    fn on_writable(&mut self) -> crate::Result<crate::ActionResult> {
        let socket = &self.socket;
        let written = self.queue.drain(|buf| socket.nb_write(buf))?;
        tracing::trace!(written, pending = self.queue.len(), "flushed write requests");

        Ok(crate::ActionResult::Continue)
    }
}

fn build_write_request(params: &crate::ConnectionParams, payload: &[u8], precision: &str) -> bytes::BytesMut {
    let mut request = crate::HttpRequest::new();
    request.set_first_line(&format!("POST {} HTTP/1.1", params.write_target(precision)));

    request.add_header("Host", &params.host());
    request.add_header("Content-Type", "application/x-www-form-urlencoded");
    request.add_header("Content-Length", &payload.len().to_string());

    let mut request = request.done_with_headers();
    request.read_in_body(payload);

    request.into_bytes()
}
