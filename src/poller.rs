#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn flags(self) -> nix::sys::epoll::EpollFlags {
        match self {
            Direction::In => nix::sys::epoll::EpollFlags::EPOLLIN,
            Direction::Out => nix::sys::epoll::EpollFlags::EPOLLOUT,
        }
    }
}

/// What an action wants after it ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionResult {
    Continue,
    /// Deregister this action.
    Cancel,
    /// Stop the current round and report `PollResult::Exit`.
    Exit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollResult {
    Success,
    Timeout,
    Exit,
}

type Callback = Box<dyn FnMut() -> crate::Result<ActionResult>>;
type Interest = Box<dyn Fn() -> bool>;

/// Deregisters its action when cancelled. Dropping the handle leaves the action registered.
#[derive(Clone, Debug)]
pub struct ActionHandle {
    active: std::rc::Rc<std::cell::Cell<bool>>,
}

impl ActionHandle {
    pub fn cancel(&self) {
        self.active.set(false);
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }
}

struct Action {
    fd: std::os::unix::io::RawFd,
    direction: Direction,
    callback: Callback,
    interest: Interest,
    active: std::rc::Rc<std::cell::Cell<bool>>,
}

/// Level-triggered epoll loop that runs callbacks when their fd is ready
/// and their interest predicate holds.
pub struct Poller {
    epoll_fd: std::os::unix::io::RawFd,
    actions: Vec<Action>,
    registered: std::collections::BTreeMap<std::os::unix::io::RawFd, nix::sys::epoll::EpollFlags>,
}

const MAX_EVENTS: usize = 64;

impl Poller {
    pub fn new() -> crate::Result<Self> {
        let epoll_fd = nix::sys::epoll::epoll_create1(nix::sys::epoll::EpollCreateFlags::EPOLL_CLOEXEC)?;

        Ok(Poller {
            epoll_fd,
            actions: vec![],
            registered: Default::default(),
        })
    }

    pub fn add_action<C, I>(
        &mut self,
        fd: std::os::unix::io::RawFd,
        direction: Direction,
        callback: C,
        interest: I,
    ) -> ActionHandle
    where
        C: FnMut() -> crate::Result<ActionResult> + 'static,
        I: Fn() -> bool + 'static,
    {
        let active = std::rc::Rc::new(std::cell::Cell::new(true));
        tracing::debug!(fd, ?direction, "adding action");

        // Only dead actions know this fd number, so it belongs to a closed and reused fd.
        if self.registered.contains_key(&fd) && !self.actions.iter().any(|action| action.fd == fd && action.active.get()) {
            self.forget(fd);
        }

        self.actions.push(Action {
            fd,
            direction,
            callback: Box::new(callback),
            interest: Box::new(interest),
            active: active.clone(),
        });

        ActionHandle {
            active,
        }
    }

    pub fn add_action_always<C>(
        &mut self,
        fd: std::os::unix::io::RawFd,
        direction: Direction,
        callback: C,
    ) -> ActionHandle
    where
        C: FnMut() -> crate::Result<ActionResult> + 'static,
    {
        self.add_action(fd, direction, callback, || true)
    }

    pub fn action_count(&self) -> usize {
        self.actions.iter().filter(|action| action.active.get()).count()
    }

    /// Waits once for readiness (forever if `timeout` is `None`) and runs the ready actions.
    ///
    /// An error returned by an action is returned from here unchanged.
    pub fn poll_once(&mut self, timeout: Option<std::time::Duration>) -> crate::Result<PollResult> {
        self.prune()?;

        if self.actions.is_empty() {
            return Ok(PollResult::Exit);
        }

        self.update_interest()?;

        let timeout_ms = match timeout {
            Some(timeout) => std::convert::TryFrom::try_from(timeout.as_millis()).unwrap_or(isize::MAX),
            None => -1,
        };

        let mut events = [nix::sys::epoll::EpollEvent::empty(); MAX_EVENTS];
        let num_events = nix::sys::epoll::epoll_wait(self.epoll_fd, &mut events, timeout_ms)?;
        if num_events == 0 {
            return Ok(PollResult::Timeout);
        }

        for event in &events[..num_events] {
            let fd = event.data() as std::os::unix::io::RawFd;
            let flags = event.events();
            let wake_all = nix::sys::epoll::EpollFlags::EPOLLHUP | nix::sys::epoll::EpollFlags::EPOLLERR;

            for action in self.actions.iter_mut().filter(|action| action.fd == fd) {
                if !action.active.get() || !flags.intersects(action.direction.flags() | wake_all) || !(action.interest)() {
                    continue;
                }

                match (action.callback)()? {
                    ActionResult::Continue => (),
                    ActionResult::Cancel => {
                        tracing::debug!(fd, direction = ?action.direction, "action cancelled itself");
                        action.active.set(false);
                    },
                    ActionResult::Exit => return Ok(PollResult::Exit),
                }
            }
        }

        Ok(PollResult::Success)
    }

    pub fn run(&mut self) -> crate::Result<()> {
        loop {
            if self.poll_once(None)? == PollResult::Exit {
                return Ok(());
            }
        }
    }

    fn prune(&mut self) -> crate::Result<()> {
        self.actions.retain(|action| action.active.get());

        let stale: Vec<_> =
            self.registered.keys()
            .copied()
            .filter(|fd| !self.actions.iter().any(|action| action.fd == *fd))
            .collect();

        for fd in stale {
            self.forget(fd);
        }

        Ok(())
    }

    fn forget(&mut self, fd: std::os::unix::io::RawFd) {
        self.registered.remove(&fd);

        // The fd may already be closed, which removed it from the epoll set.
        if let Err(err) = nix::sys::epoll::epoll_ctl(self.epoll_fd, nix::sys::epoll::EpollOp::EpollCtlDel, fd, None) {
            tracing::trace!(fd, %err, "deregistering closed fd");
        }
    }

    fn update_interest(&mut self) -> crate::Result<()> {
        let mut desired: std::collections::BTreeMap<_, _> = Default::default();
        for action in &self.actions {
            let flags = desired.entry(action.fd).or_insert_with(nix::sys::epoll::EpollFlags::empty);
            if (action.interest)() {
                *flags |= action.direction.flags();
            }
        }

        for (fd, flags) in desired {
            let op = match self.registered.get(&fd) {
                None => nix::sys::epoll::EpollOp::EpollCtlAdd,
                Some(&registered) if registered == flags => continue,
                Some(_) => nix::sys::epoll::EpollOp::EpollCtlMod,
            };

            let () = nix::sys::epoll::epoll_ctl(
                self.epoll_fd,
                op,
                fd,
                Some(&mut nix::sys::epoll::EpollEvent::new(flags, fd as _)),
            )?;
            self.registered.insert(fd, flags);
        }

        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Err(err) = nix::unistd::close(self.epoll_fd) {
            tracing::warn!(%err, "could not close epoll fd");
        }
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("epoll_fd", &self.epoll_fd)
            .field("actions", &self.actions.len())
            .field("registered", &self.registered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    fn stream_pair() -> (std::net::TcpStream, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let a = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (b, _) = listener.accept().unwrap();
        a.set_nonblocking(true).unwrap();
        (a, b)
    }

    const SHORT: Option<std::time::Duration> = Some(std::time::Duration::from_millis(50));

    #[test]
    fn no_actions_means_exit() {
        let mut poller = Poller::new().unwrap();
        assert_eq!(poller.poll_once(SHORT).unwrap(), PollResult::Exit);
        poller.run().unwrap();
    }

    #[test]
    fn idle_fd_times_out() {
        let (a, _b) = stream_pair();
        let mut poller = Poller::new().unwrap();
        poller.add_action_always(std::os::unix::io::AsRawFd::as_raw_fd(&a), Direction::In, || panic!("nothing to read"));

        assert_eq!(poller.poll_once(SHORT).unwrap(), PollResult::Timeout);
    }

    #[test]
    fn readable_fd_runs_its_in_action() {
        let (a, mut b) = stream_pair();
        b.write_all(b"x").unwrap();

        let ran = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut poller = Poller::new().unwrap();
        poller.add_action_always(std::os::unix::io::AsRawFd::as_raw_fd(&a), Direction::In, {
            let ran = ran.clone();
            move || {
                ran.set(ran.get() + 1);
                Ok(ActionResult::Cancel)
            }
        });

        assert_eq!(poller.poll_once(SHORT).unwrap(), PollResult::Success);
        assert_eq!(ran.get(), 1);
        assert_eq!(poller.action_count(), 0);
        assert_eq!(poller.poll_once(SHORT).unwrap(), PollResult::Exit);
    }

    #[test]
    fn out_action_waits_for_interest() {
        let (a, _b) = stream_pair();
        let wanted = std::rc::Rc::new(std::cell::Cell::new(false));
        let ran = std::rc::Rc::new(std::cell::Cell::new(0));

        let mut poller = Poller::new().unwrap();
        poller.add_action(
            std::os::unix::io::AsRawFd::as_raw_fd(&a),
            Direction::Out,
            {
                let ran = ran.clone();
                let wanted = wanted.clone();
                move || {
                    ran.set(ran.get() + 1);
                    wanted.set(false);
                    Ok(ActionResult::Continue)
                }
            },
            {
                let wanted = wanted.clone();
                move || wanted.get()
            },
        );

        assert_eq!(poller.poll_once(SHORT).unwrap(), PollResult::Timeout);
        assert_eq!(ran.get(), 0);

        wanted.set(true);
        assert_eq!(poller.poll_once(SHORT).unwrap(), PollResult::Success);
        assert_eq!(ran.get(), 1);

        assert_eq!(poller.poll_once(SHORT).unwrap(), PollResult::Timeout);
        assert_eq!(ran.get(), 1);
    }

    #[test]
    fn action_error_propagates() {
        let (a, mut b) = stream_pair();
        b.write_all(b"x").unwrap();

        let mut poller = Poller::new().unwrap();
        poller.add_action_always(std::os::unix::io::AsRawFd::as_raw_fd(&a), Direction::In, || {
            Err(crate::Error::PeerClosed { addr: "test".to_owned() })
        });

        assert!(matches!(poller.poll_once(SHORT), Err(crate::Error::PeerClosed { .. })));
    }

    #[test]
    fn exit_stops_run() {
        let (a, _b) = stream_pair();
        let mut poller = Poller::new().unwrap();
        poller.add_action_always(std::os::unix::io::AsRawFd::as_raw_fd(&a), Direction::Out, || Ok(ActionResult::Exit));

        poller.run().unwrap();
    }

    #[test]
    fn cancelled_handle_deregisters_closed_fd() {
        let (a, _b) = stream_pair();
        let mut poller = Poller::new().unwrap();
        let handle = poller.add_action_always(std::os::unix::io::AsRawFd::as_raw_fd(&a), Direction::In, || Ok(ActionResult::Continue));
        assert_eq!(poller.poll_once(SHORT).unwrap(), PollResult::Timeout);

        drop(a);
        handle.cancel();
        assert!(!handle.is_active());
        assert_eq!(poller.poll_once(SHORT).unwrap(), PollResult::Exit);
    }

    #[test]
    fn reused_fd_number_is_registered_again() {
        let (a, _b) = stream_pair();
        let fd = std::os::unix::io::AsRawFd::as_raw_fd(&a);

        let mut poller = Poller::new().unwrap();
        let handle = poller.add_action_always(fd, Direction::Out, || Ok(ActionResult::Continue));
        assert_eq!(poller.poll_once(SHORT).unwrap(), PollResult::Success);

        handle.cancel();
        drop(a);

        // Put a different socket on the old fd number.
        let (c, _d) = stream_pair();
        assert_eq!(nix::unistd::dup2(std::os::unix::io::AsRawFd::as_raw_fd(&c), fd).unwrap(), fd);

        let ran = std::rc::Rc::new(std::cell::Cell::new(0));
        poller.add_action_always(fd, Direction::Out, {
            let ran = ran.clone();
            move || {
                ran.set(ran.get() + 1);
                Ok(ActionResult::Continue)
            }
        });

        assert_eq!(poller.poll_once(SHORT).unwrap(), PollResult::Success);
        assert_eq!(ran.get(), 1);

        nix::unistd::close(fd).unwrap();
    }
}
