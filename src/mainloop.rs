//! Event loop abstraction the reactor plugs into.
//!
//! The bridge never talks to a concrete loop directly; it goes through the
//! object-safe [`MainLoop`] trait so the reactor can be driven by a mock loop
//! in tests. [`CalloopLoop`] is the production implementation on top of a
//! `calloop` handle.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::{BorrowedFd, RawFd};
use std::time::Duration;

use calloop::generic::Generic;
use calloop::timer::{TimeoutAction, Timer};
use calloop::{
    EventSource, Interest, LoopHandle, LoopSignal, Mode, PostAction, Readiness, RegistrationToken,
    Token, TokenFactory,
};

/// What an fd source should wake up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoInterest {
    /// Wake on readable.
    pub read: bool,
    /// Wake on writable.
    pub write: bool,
}

/// What actually happened on an fd source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoCondition {
    /// The fd is readable.
    pub read: bool,
    /// The fd is writable.
    pub write: bool,
    /// The fd is in an error state.
    pub error: bool,
    /// The peer hung up.
    pub hangup: bool,
}

/// Identifies a source registered through a [`MainLoop`].
///
/// Ids are only meaningful to the loop that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

impl SourceId {
    /// Creates an id from a raw value. For use by `MainLoop` implementations.
    pub fn from_raw(id: u64) -> SourceId { SourceId(id) }
}

/// A single-threaded, callback-oriented event loop, as seen by the reactor.
///
/// Handlers are not `Send`; everything runs on the loop's thread.
pub trait MainLoop {
    /// Registers a level-triggered fd source. `handler` runs whenever the fd
    /// is ready for any of the requested conditions. Error and hangup are
    /// always reported; loops that cannot tell the two apart report a hangup
    /// as error (or, for a clean EOF, as read) readiness.
    fn io_add(&self, fd: RawFd, interest: IoInterest, handler: Box<dyn FnMut(IoCondition)>)
        -> io::Result<SourceId>;

    /// Registers a recurring timer firing every `interval`.
    fn timer_add(&self, interval: Duration, handler: Box<dyn FnMut()>) -> io::Result<SourceId>;

    /// Registers a check source: each time the loop is about to sleep, if
    /// `ready` returns true, `handler` runs instead of sleeping.
    fn check_add(&self, ready: Box<dyn Fn() -> bool>, handler: Box<dyn FnMut()>)
        -> io::Result<SourceId>;

    /// Deregisters a source. Unknown ids are ignored.
    fn remove(&self, id: SourceId);

    /// Interrupts the loop's sleep from the same process.
    fn wakeup(&self);
}

/// [`MainLoop`] implementation over a calloop handle.
pub struct CalloopLoop<D: 'static> {
    handle: LoopHandle<'static, D>,
    signal: LoopSignal,
    tokens: RefCell<HashMap<SourceId, RegistrationToken>>,
    next_id: Cell<u64>,
}

impl<D> CalloopLoop<D> {
    /// Creates an adapter for the loop behind `handle`.
    pub fn new(handle: LoopHandle<'static, D>, signal: LoopSignal) -> CalloopLoop<D> {
        CalloopLoop {
            handle,
            signal,
            tokens: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
        }
    }

    fn store(&self, token: RegistrationToken) -> SourceId {
        let id = SourceId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.tokens.borrow_mut().insert(id, token);
        id
    }
}

fn insert_failed<S>(e: calloop::InsertError<S>) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.error)
}

impl<D> MainLoop for CalloopLoop<D> {
    fn io_add(&self, fd: RawFd, interest: IoInterest, mut handler: Box<dyn FnMut(IoCondition)>)
        -> io::Result<SourceId>
    {
        // The fd stays owned by libdbus; we only watch it.
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        let interest = Interest { readable: interest.read, writable: interest.write };
        let source = Generic::new(fd, interest, Mode::Level);
        let token = self.handle.insert_source(source, move |readiness, _, _| {
            // The poller folds hangup into error readiness (and EOF into
            // readable), so report both conditions when error is raised.
            handler(IoCondition {
                read: readiness.readable,
                write: readiness.writable,
                error: readiness.error,
                hangup: readiness.error,
            });
            Ok(PostAction::Continue)
        }).map_err(insert_failed)?;
        Ok(self.store(token))
    }

    fn timer_add(&self, interval: Duration, mut handler: Box<dyn FnMut()>) -> io::Result<SourceId> {
        let source = Timer::from_duration(interval);
        let token = self.handle.insert_source(source, move |_, _, _| {
            handler();
            TimeoutAction::ToDuration(interval)
        }).map_err(insert_failed)?;
        Ok(self.store(token))
    }

    fn check_add(&self, ready: Box<dyn Fn() -> bool>, mut handler: Box<dyn FnMut()>)
        -> io::Result<SourceId>
    {
        let source = CheckSource { ready, token: None };
        let token = self.handle.insert_source(source, move |_, _, _| {
            handler();
        }).map_err(insert_failed)?;
        Ok(self.store(token))
    }

    fn remove(&self, id: SourceId) {
        if let Some(token) = self.tokens.borrow_mut().remove(&id) {
            self.handle.remove(token);
        }
    }

    fn wakeup(&self) {
        self.signal.wakeup();
    }
}

/// Event source whose readiness is a predicate checked right before the loop
/// would go to sleep. Backs `MainLoop::check_add`.
struct CheckSource {
    ready: Box<dyn Fn() -> bool>,
    token: Option<Token>,
}

impl EventSource for CheckSource {
    type Event = ();
    type Metadata = ();
    type Ret = ();
    type Error = std::io::Error;

    const NEEDS_EXTRA_LIFECYCLE_EVENTS: bool = true;

    fn process_events<F>(&mut self, _readiness: Readiness, token: Token, mut callback: F)
        -> Result<PostAction, Self::Error>
    where
        F: FnMut(Self::Event, &mut Self::Metadata) -> Self::Ret,
    {
        if Some(token) == self.token {
            callback((), &mut ());
        }
        Ok(PostAction::Continue)
    }

    fn register(&mut self, poll: &mut calloop::Poll, token_factory: &mut TokenFactory)
        -> calloop::Result<()>
    {
        let _ = poll;
        self.token = Some(token_factory.token());
        Ok(())
    }

    fn reregister(&mut self, poll: &mut calloop::Poll, token_factory: &mut TokenFactory)
        -> calloop::Result<()>
    {
        let _ = poll;
        self.token = Some(token_factory.token());
        Ok(())
    }

    fn unregister(&mut self, poll: &mut calloop::Poll) -> calloop::Result<()> {
        let _ = poll;
        self.token = None;
        Ok(())
    }

    fn before_sleep(&mut self) -> calloop::Result<Option<(Readiness, Token)>> {
        match self.token {
            Some(token) if (self.ready)() => Ok(Some((Readiness::EMPTY, token))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{CalloopLoop, IoInterest, MainLoop};
    use calloop::EventLoop;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    fn counter() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
        (Rc::new(Cell::new(0)), Rc::new(Cell::new(0)))
    }

    #[test]
    fn recurring_timer() {
        let mut event_loop: EventLoop<()> = EventLoop::try_new().unwrap();
        let ml = CalloopLoop::new(event_loop.handle(), event_loop.get_signal());

        let fired = Rc::new(Cell::new(0u32));
        let f = fired.clone();
        ml.timer_add(Duration::from_millis(1), Box::new(move || f.set(f.get() + 1))).unwrap();

        for _ in 0..50 {
            event_loop.dispatch(Some(Duration::from_millis(5)), &mut ()).unwrap();
            if fired.get() >= 3 { break; }
        }
        assert!(fired.get() >= 3, "timer did not recur: {}", fired.get());
    }

    #[test]
    fn check_source_runs_while_ready() {
        let mut event_loop: EventLoop<()> = EventLoop::try_new().unwrap();
        let ml = CalloopLoop::new(event_loop.handle(), event_loop.get_signal());

        let (pending, fired) = counter();
        pending.set(2);
        let p = pending.clone();
        let (p2, f) = (pending.clone(), fired.clone());
        ml.check_add(
            Box::new(move || p.get() > 0),
            Box::new(move || {
                p2.set(p2.get() - 1);
                f.set(f.get() + 1);
            }),
        ).unwrap();

        for _ in 0..4 {
            event_loop.dispatch(Some(Duration::from_millis(5)), &mut ()).unwrap();
        }
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn io_source_reports_readable_until_removed() {
        let mut event_loop: EventLoop<()> = EventLoop::try_new().unwrap();
        let ml = CalloopLoop::new(event_loop.handle(), event_loop.get_signal());

        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (rd, wr) = (fds[0], fds[1]);
        assert_eq!(unsafe { libc::write(wr, b"x".as_ptr() as *const _, 1) }, 1);

        let fired = Rc::new(Cell::new(0u32));
        let f = fired.clone();
        let id = ml.io_add(rd, IoInterest { read: true, write: false }, Box::new(move |cond| {
            assert!(cond.read);
            f.set(f.get() + 1);
        })).unwrap();

        event_loop.dispatch(Some(Duration::from_millis(5)), &mut ()).unwrap();
        assert_eq!(fired.get(), 1);

        ml.remove(id);
        event_loop.dispatch(Some(Duration::from_millis(5)), &mut ()).unwrap();
        assert_eq!(fired.get(), 1);

        unsafe { libc::close(rd); libc::close(wr); }
    }

    #[test]
    fn closed_peer_still_wakes_the_source() {
        let mut event_loop: EventLoop<()> = EventLoop::try_new().unwrap();
        let ml = CalloopLoop::new(event_loop.handle(), event_loop.get_signal());

        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (rd, wr) = (fds[0], fds[1]);
        unsafe { libc::close(wr) };

        let seen = Rc::new(Cell::new(super::IoCondition::default()));
        let s = seen.clone();
        let fired = Rc::new(Cell::new(0u32));
        let f = fired.clone();
        ml.io_add(rd, IoInterest { read: true, write: false }, Box::new(move |cond| {
            s.set(cond);
            f.set(f.get() + 1);
        })).unwrap();

        event_loop.dispatch(Some(Duration::from_millis(5)), &mut ()).unwrap();
        assert!(fired.get() >= 1);
        let cond = seen.get();
        assert!(cond.read || cond.hangup);
        // Error readiness always carries the hangup condition along.
        assert!(!cond.error || cond.hangup);

        unsafe { libc::close(rd); }
    }

    #[test]
    fn remove_unknown_id_is_ignored() {
        let event_loop: EventLoop<()> = EventLoop::try_new().unwrap();
        let ml = CalloopLoop::new(event_loop.handle(), event_loop.get_signal());
        ml.remove(super::SourceId::from_raw(42));
    }
}
