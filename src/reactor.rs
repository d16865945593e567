//! Adapters between libdbus's main-loop hooks and a [`MainLoop`].
//!
//! libdbus tells us which fds to watch, which timeouts to arm and when it
//! wants the loop woken up; the reactor keeps one loop source per live,
//! enabled watch or timeout, and a check source that drains the incoming
//! message queue whenever data remains after the fd handlers ran.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::os::raw::{c_uint, c_void};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, warn};

use crate::mainloop::{IoCondition, IoInterest, MainLoop, SourceId};
use crate::{ffi, Connection, Error};

type IoHandler = Box<dyn FnMut(IoCondition)>;
type TimerHandler = Box<dyn FnMut()>;

pub (crate) struct Reactor {
    main_loop: Rc<dyn MainLoop>,
    // Keyed by the native watch/timeout handle. At most one source per key.
    watches: RefCell<HashMap<usize, SourceId>>,
    timeouts: RefCell<HashMap<usize, SourceId>>,
    check: Cell<Option<SourceId>>,
}

impl Reactor {
    pub (crate) fn new(main_loop: Rc<dyn MainLoop>) -> Box<Reactor> {
        Box::new(Reactor {
            main_loop,
            watches: RefCell::new(HashMap::new()),
            timeouts: RefCell::new(HashMap::new()),
            check: Cell::new(None),
        })
    }

    /// Installs the libdbus hooks on `conn`, pointing at this reactor, and
    /// registers the pending-dispatch check source.
    ///
    /// The reactor must stay at its current address until the hooks are
    /// cleared again; the bridge keeps it boxed and shuts it down before drop.
    pub (crate) fn install(&self, conn: &Rc<Connection>) -> Result<(), Error> {
        let data = self as *const Reactor as *mut c_void;
        unsafe {
            if !conn.set_watch_functions(Some(watch_add_cb), Some(watch_remove_cb),
                Some(watch_toggled_cb), data)
            {
                return Err(Error::Remote("out of memory installing watch functions".into()));
            }
            if !conn.set_timeout_functions(Some(timeout_add_cb), Some(timeout_remove_cb),
                Some(timeout_toggled_cb), data)
            {
                return Err(Error::Remote("out of memory installing timeout functions".into()));
            }
            conn.set_wakeup_main_function(Some(wakeup_cb), data);
        }

        let ready = conn.clone();
        let dispatch = conn.clone();
        let id = self.main_loop.check_add(
            Box::new(move || ready.dispatch_status() == ffi::DBusDispatchStatus::DataRemains),
            Box::new(move || { dispatch.dispatch(); }),
        ).map_err(|e| Error::Remote(format!("unable to register dispatch source: {}", e)))?;
        self.check.set(Some(id));
        Ok(())
    }

    /// Removes every source this reactor registered. The caller clears the
    /// connection's hooks first so nothing re-adds behind our back.
    pub (crate) fn shutdown(&self) {
        for (_, id) in self.watches.borrow_mut().drain() {
            self.main_loop.remove(id);
        }
        for (_, id) in self.timeouts.borrow_mut().drain() {
            self.main_loop.remove(id);
        }
        if let Some(id) = self.check.take() {
            self.main_loop.remove(id);
        }
    }

    fn watch_added(&self, key: usize, params: Option<(RawFd, IoInterest, IoHandler)>) -> bool {
        let (fd, interest, handler) = match params {
            // Disabled watches get their source when toggled on.
            None => return true,
            Some(p) => p,
        };
        match self.main_loop.io_add(fd, interest, handler) {
            Ok(id) => {
                debug!("watch source registered for fd {} ({:?})", fd, interest);
                if let Some(old) = self.watches.borrow_mut().insert(key, id) {
                    self.main_loop.remove(old);
                }
                true
            }
            Err(e) => {
                warn!("unable to register watch source for fd {}: {}", fd, e);
                false
            }
        }
    }

    fn watch_removed(&self, key: usize) {
        if let Some(id) = self.watches.borrow_mut().remove(&key) {
            self.main_loop.remove(id);
        }
    }

    fn watch_toggled(&self, key: usize, params: Option<(RawFd, IoInterest, IoHandler)>) {
        self.watch_removed(key);
        if params.is_some() {
            self.watch_added(key, params);
        }
    }

    fn timeout_added(&self, key: usize, params: Option<(Duration, TimerHandler)>) -> bool {
        let (interval, handler) = match params {
            None => return true,
            Some(p) => p,
        };
        match self.main_loop.timer_add(interval, handler) {
            Ok(id) => {
                debug!("timeout source registered at {:?}", interval);
                if let Some(old) = self.timeouts.borrow_mut().insert(key, id) {
                    self.main_loop.remove(old);
                }
                true
            }
            Err(e) => {
                warn!("unable to register timeout source at {:?}: {}", interval, e);
                false
            }
        }
    }

    fn timeout_removed(&self, key: usize) {
        if let Some(id) = self.timeouts.borrow_mut().remove(&key) {
            self.main_loop.remove(id);
        }
    }

    fn timeout_toggled(&self, key: usize, params: Option<(Duration, TimerHandler)>) {
        self.timeout_removed(key);
        if params.is_some() {
            self.timeout_added(key, params);
        }
    }

    fn wakeup(&self) {
        self.main_loop.wakeup();
    }
}

/// Reads fd, flag set and enabled state out of a native watch, and builds the
/// handler that feeds loop readiness back through `dbus_watch_handle`.
/// Returns None for a disabled watch.
fn watch_params(watch: *mut ffi::DBusWatch) -> Option<(RawFd, IoInterest, IoHandler)> {
    unsafe {
        if ffi::dbus_watch_get_enabled(watch) == 0 { return None; }
        let fd = ffi::dbus_watch_get_unix_fd(watch);
        let flags = ffi::dbus_watch_get_flags(watch);
        let interest = IoInterest {
            read: flags & ffi::DBUS_WATCH_READABLE != 0,
            write: flags & ffi::DBUS_WATCH_WRITABLE != 0,
        };
        let watch = watch as usize;
        let handler = Box::new(move |cond: IoCondition| {
            let mut flags: c_uint = 0;
            if cond.read { flags |= ffi::DBUS_WATCH_READABLE; }
            if cond.write { flags |= ffi::DBUS_WATCH_WRITABLE; }
            if cond.error { flags |= ffi::DBUS_WATCH_ERROR; }
            if cond.hangup { flags |= ffi::DBUS_WATCH_HANGUP; }
            unsafe { ffi::dbus_watch_handle(watch as *mut ffi::DBusWatch, flags) };
        });
        Some((fd, interest, handler))
    }
}

fn timeout_params(timeout: *mut ffi::DBusTimeout) -> Option<(Duration, TimerHandler)> {
    unsafe {
        if ffi::dbus_timeout_get_enabled(timeout) == 0 { return None; }
        let interval = ffi::dbus_timeout_get_interval(timeout).max(0) as u64;
        let timeout = timeout as usize;
        let handler = Box::new(move || {
            unsafe { ffi::dbus_timeout_handle(timeout as *mut ffi::DBusTimeout) };
        });
        Some((Duration::from_millis(interval), handler))
    }
}

extern "C" fn watch_add_cb(watch: *mut ffi::DBusWatch, data: *mut c_void) -> u32 {
    let r = unsafe { &*(data as *const Reactor) };
    if r.watch_added(watch as usize, watch_params(watch)) { 1 } else { 0 }
}

extern "C" fn watch_remove_cb(watch: *mut ffi::DBusWatch, data: *mut c_void) {
    let r = unsafe { &*(data as *const Reactor) };
    r.watch_removed(watch as usize);
}

extern "C" fn watch_toggled_cb(watch: *mut ffi::DBusWatch, data: *mut c_void) {
    let r = unsafe { &*(data as *const Reactor) };
    r.watch_toggled(watch as usize, watch_params(watch));
}

extern "C" fn timeout_add_cb(timeout: *mut ffi::DBusTimeout, data: *mut c_void) -> u32 {
    let r = unsafe { &*(data as *const Reactor) };
    if r.timeout_added(timeout as usize, timeout_params(timeout)) { 1 } else { 0 }
}

extern "C" fn timeout_remove_cb(timeout: *mut ffi::DBusTimeout, data: *mut c_void) {
    let r = unsafe { &*(data as *const Reactor) };
    r.timeout_removed(timeout as usize);
}

extern "C" fn timeout_toggled_cb(timeout: *mut ffi::DBusTimeout, data: *mut c_void) {
    let r = unsafe { &*(data as *const Reactor) };
    r.timeout_toggled(timeout as usize, timeout_params(timeout));
}

extern "C" fn wakeup_cb(data: *mut c_void) {
    let r = unsafe { &*(data as *const Reactor) };
    r.wakeup();
}

#[cfg(test)]
mod test {
    use super::Reactor;
    use crate::mainloop::{IoCondition, IoInterest, MainLoop, SourceId};
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::io;
    use std::os::unix::io::RawFd;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Kind {
        Io(RawFd, IoInterest),
        Timer(Duration),
        Check,
    }

    struct MockLoop {
        live: RefCell<HashMap<SourceId, Kind>>,
        next: Cell<u64>,
        wakeups: Cell<u32>,
        fail_next: Cell<bool>,
    }

    impl MockLoop {
        fn new() -> Rc<MockLoop> {
            Rc::new(MockLoop {
                live: RefCell::new(HashMap::new()),
                next: Cell::new(1),
                wakeups: Cell::new(0),
                fail_next: Cell::new(false),
            })
        }

        fn add(&self, kind: Kind) -> io::Result<SourceId> {
            if self.fail_next.replace(false) {
                return Err(io::Error::new(io::ErrorKind::Other, "loop is full"));
            }
            let id = SourceId::from_raw(self.next.get());
            self.next.set(self.next.get() + 1);
            self.live.borrow_mut().insert(id, kind);
            Ok(id)
        }

        fn io_count(&self) -> usize {
            self.live.borrow().values().filter(|k| matches!(k, Kind::Io(..))).count()
        }

        fn timer_count(&self) -> usize {
            self.live.borrow().values().filter(|k| matches!(k, Kind::Timer(..))).count()
        }
    }

    impl MainLoop for MockLoop {
        fn io_add(&self, fd: RawFd, interest: IoInterest, _handler: Box<dyn FnMut(IoCondition)>)
            -> io::Result<SourceId>
        {
            self.add(Kind::Io(fd, interest))
        }

        fn timer_add(&self, interval: Duration, _handler: Box<dyn FnMut()>) -> io::Result<SourceId> {
            self.add(Kind::Timer(interval))
        }

        fn check_add(&self, _ready: Box<dyn Fn() -> bool>, _handler: Box<dyn FnMut()>)
            -> io::Result<SourceId>
        {
            self.add(Kind::Check)
        }

        fn remove(&self, id: SourceId) {
            self.live.borrow_mut().remove(&id);
        }

        fn wakeup(&self) {
            self.wakeups.set(self.wakeups.get() + 1);
        }
    }

    const READ: IoInterest = IoInterest { read: true, write: false };

    fn params(fd: RawFd) -> Option<(RawFd, IoInterest, Box<dyn FnMut(IoCondition)>)> {
        Some((fd, READ, Box::new(|_| {})))
    }

    #[test]
    fn watch_lifecycle() {
        let ml = MockLoop::new();
        let r = Reactor::new(ml.clone());

        assert!(r.watch_added(0x10, params(5)));
        assert_eq!(ml.io_count(), 1);

        r.watch_removed(0x10);
        assert_eq!(ml.io_count(), 0);
        r.watch_removed(0x10); // removing again is fine
        assert_eq!(ml.io_count(), 0);
    }

    #[test]
    fn disabled_watch_has_no_source() {
        let ml = MockLoop::new();
        let r = Reactor::new(ml.clone());

        assert!(r.watch_added(0x10, None));
        assert_eq!(ml.io_count(), 0);

        r.watch_toggled(0x10, params(5));
        assert_eq!(ml.io_count(), 1);

        r.watch_toggled(0x10, None);
        assert_eq!(ml.io_count(), 0);
    }

    #[test]
    fn toggling_twice_keeps_one_source() {
        let ml = MockLoop::new();
        let r = Reactor::new(ml.clone());

        r.watch_added(0x10, params(5));
        r.watch_toggled(0x10, params(5));
        r.watch_toggled(0x10, params(5));
        assert_eq!(ml.io_count(), 1);
    }

    #[test]
    fn two_watches_two_sources() {
        let ml = MockLoop::new();
        let r = Reactor::new(ml.clone());

        r.watch_added(0x10, params(5));
        r.watch_added(0x20, params(6));
        assert_eq!(ml.io_count(), 2);

        r.watch_removed(0x10);
        assert_eq!(ml.io_count(), 1);
    }

    #[test]
    fn registration_failure_reports_back() {
        let ml = MockLoop::new();
        let r = Reactor::new(ml.clone());

        ml.fail_next.set(true);
        assert!(!r.watch_added(0x10, params(5)));
        assert_eq!(ml.io_count(), 0);

        // The failed watch can be removed without anything blowing up.
        r.watch_removed(0x10);
    }

    #[test]
    fn timeout_lifecycle() {
        let ml = MockLoop::new();
        let r = Reactor::new(ml.clone());

        assert!(r.timeout_added(0x30, Some((Duration::from_millis(250), Box::new(|| {})))));
        assert_eq!(ml.timer_count(), 1);

        r.timeout_toggled(0x30, None);
        assert_eq!(ml.timer_count(), 0);

        r.timeout_toggled(0x30, Some((Duration::from_millis(250), Box::new(|| {}))));
        assert_eq!(ml.timer_count(), 1);

        r.timeout_removed(0x30);
        assert_eq!(ml.timer_count(), 0);
    }

    #[test]
    fn shutdown_drops_every_source() {
        let ml = MockLoop::new();
        let r = Reactor::new(ml.clone());

        r.watch_added(0x10, params(5));
        r.watch_added(0x20, params(6));
        r.timeout_added(0x30, Some((Duration::from_millis(100), Box::new(|| {}))));
        assert_eq!(ml.live.borrow().len(), 3);

        r.shutdown();
        assert!(ml.live.borrow().is_empty());
    }

    #[test]
    fn wakeup_forwards_to_the_loop() {
        let ml = MockLoop::new();
        let r = Reactor::new(ml.clone());
        r.wakeup();
        r.wakeup();
        assert_eq!(ml.wakeups.get(), 2);
    }
}
