use std::fmt;
use std::mem;
use std::os::raw::c_void;
use std::ptr;

use crate::{c_str_to_slice, ffi, init_dbus, to_c_str, BusType, Error, Message, RequestNameReply};

/// RAII around a libdbus error slot.
pub (crate) struct NativeError {
    e: ffi::DBusError,
}

impl NativeError {
    pub (crate) fn new() -> NativeError {
        init_dbus();
        let mut e = ffi::DBusError {
            name: ptr::null(),
            message: ptr::null(),
            dummy: 0,
            padding1: ptr::null(),
        };
        unsafe { ffi::dbus_error_init(&mut e); }
        NativeError { e }
    }

    pub (crate) fn get_mut(&mut self) -> *mut ffi::DBusError { &mut self.e }

    /// Error name/type, e g 'org.freedesktop.DBus.Error.Failed'
    pub (crate) fn name(&self) -> Option<&str> {
        c_str_to_slice(&self.e.name)
    }

    /// Custom message, e g 'Could not find a matching object path'
    pub (crate) fn message(&self) -> Option<&str> {
        c_str_to_slice(&self.e.message)
    }
}

impl Drop for NativeError {
    fn drop(&mut self) {
        unsafe { ffi::dbus_error_free(&mut self.e); }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.message().unwrap_or("unknown D-Bus error"),
            self.name().unwrap_or(""))
    }
}

/// Low-level connection - a RAII wrapper around the libdbus connection handle.
///
/// The bridge owns one private connection; the reactor installs libdbus's
/// main-loop hooks on it. Dropping the connection closes it, so hooks must be
/// cleared first (`clear_event_hooks`) or libdbus would call back into freed
/// adapter state during close.
pub struct Connection {
    conn: *mut ffi::DBusConnection,
}

impl Connection {
    /// Creates a new private D-Bus connection to the given bus.
    ///
    /// Blocking: until the connection is up and running.
    pub fn open(bus: BusType) -> Result<Connection, Error> {
        let mut e = NativeError::new();
        let conn = unsafe { ffi::dbus_bus_get_private(bus, e.get_mut()) };
        if conn.is_null() {
            return Err(Error::Remote(format!("unable to obtain bus connection: {}", e)));
        }
        /* No, we don't want our app to suddenly quit if dbus goes down */
        unsafe { ffi::dbus_connection_set_exit_on_disconnect(conn, 0) };
        Ok(Connection { conn })
    }

    /// Get the connection's unique name, e g ":1.54".
    pub fn unique_name(&self) -> Option<&str> {
        let c = unsafe { ffi::dbus_bus_get_unique_name(self.conn) };
        if c.is_null() { return None; }
        let s = unsafe { std::ffi::CStr::from_ptr(c) };
        std::str::from_utf8(s.to_bytes()).ok()
    }

    /// Requests a well-known name on the bus.
    ///
    /// Allows later replacement and refuses to queue: either we become the
    /// primary owner now, or the reply says why not.
    pub fn request_name(&self, name: &str) -> Result<RequestNameReply, Error> {
        let mut e = NativeError::new();
        let n = to_c_str(name);
        let flags = ffi::DBUS_NAME_FLAG_ALLOW_REPLACEMENT | ffi::DBUS_NAME_FLAG_DO_NOT_QUEUE;
        let r = unsafe { ffi::dbus_bus_request_name(self.conn, n.as_ptr(), flags, e.get_mut()) };
        if r == -1 {
            return Err(Error::Remote(format!("unable to request name {}: {}", name, e)));
        }
        Ok(unsafe { mem::transmute(r) })
    }

    pub (crate) unsafe fn try_register_object_path(&self, path: &str,
        vtable: &ffi::DBusObjectPathVTable, user_data: *mut c_void) -> Result<(), Error>
    {
        let mut e = NativeError::new();
        let p = to_c_str(path);
        let r = ffi::dbus_connection_try_register_object_path(self.conn, p.as_ptr(), vtable, user_data, e.get_mut());
        if r == 0 {
            return Err(Error::Remote(format!("unable to register object path {}: {}", path, e)));
        }
        Ok(())
    }

    pub (crate) fn unregister_object_path(&self, path: &str) {
        let p = to_c_str(path);
        unsafe { ffi::dbus_connection_unregister_object_path(self.conn, p.as_ptr()) };
    }

    /// Puts a message into the libdbus out queue, and tries to send it.
    ///
    /// Returns a serial number that can be used to match against a reply.
    pub fn send(&self, msg: Message) -> Result<u32, ()> {
        let mut serial = 0u32;
        let r = unsafe { ffi::dbus_connection_send(self.conn, msg.ptr(), &mut serial) };
        if r == 0 { return Err(()); }
        Ok(serial)
    }

    /// Flush the queue of outgoing messages.
    ///
    /// Blocking: until the outgoing queue is empty.
    pub fn flush(&self) { unsafe { ffi::dbus_connection_flush(self.conn) } }

    /// Processes one batch of the incoming queue. Handler callbacks run from here.
    pub (crate) fn dispatch(&self) -> ffi::DBusDispatchStatus {
        unsafe { ffi::dbus_connection_dispatch(self.conn) }
    }

    /// Whether the incoming queue still holds data to dispatch. Does not block.
    pub (crate) fn dispatch_status(&self) -> ffi::DBusDispatchStatus {
        unsafe { ffi::dbus_connection_get_dispatch_status(self.conn) }
    }

    pub (crate) unsafe fn set_watch_functions(&self, add: ffi::DBusAddWatchFunction,
        remove: ffi::DBusRemoveWatchFunction, toggled: ffi::DBusWatchToggledFunction,
        data: *mut c_void) -> bool
    {
        ffi::dbus_connection_set_watch_functions(self.conn, add, remove, toggled, data, None) != 0
    }

    pub (crate) unsafe fn set_timeout_functions(&self, add: ffi::DBusAddTimeoutFunction,
        remove: ffi::DBusRemoveTimeoutFunction, toggled: ffi::DBusTimeoutToggledFunction,
        data: *mut c_void) -> bool
    {
        ffi::dbus_connection_set_timeout_functions(self.conn, add, remove, toggled, data, None) != 0
    }

    pub (crate) unsafe fn set_wakeup_main_function(&self, wakeup: ffi::DBusWakeupMainFunction,
        data: *mut c_void)
    {
        ffi::dbus_connection_set_wakeup_main_function(self.conn, wakeup, data, None)
    }

    /// Detaches all main-loop hooks. Must run before the adapters they point
    /// at are dropped.
    pub (crate) fn clear_event_hooks(&self) {
        unsafe {
            ffi::dbus_connection_set_watch_functions(self.conn, None, None, None, ptr::null_mut(), None);
            ffi::dbus_connection_set_timeout_functions(self.conn, None, None, None, ptr::null_mut(), None);
            ffi::dbus_connection_set_wakeup_main_function(self.conn, None, ptr::null_mut(), None);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        unsafe {
            ffi::dbus_connection_close(self.conn);
            ffi::dbus_connection_unref(self.conn);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Connection({:?})", self.conn)
    }
}

#[cfg(test)]
mod test {
    use super::Connection;
    use crate::{BusType, Message, RequestNameReply};

    #[test]
    #[ignore = "requires a session bus"]
    fn open_and_name() {
        let c = Connection::open(BusType::Session).unwrap();
        let n = c.unique_name().unwrap();
        assert!(n.starts_with(":1."));

        let r = c.request_name("org.example.dbusbridge.channeltest").unwrap();
        assert_eq!(r, RequestNameReply::PrimaryOwner);
    }

    #[test]
    #[ignore = "requires a session bus"]
    fn send_signal() {
        let c = Connection::open(BusType::Session).unwrap();
        let m = Message::new_signal("/org/example/Obj", "org.example.Iface", "Tick").unwrap();
        let serial = c.send(m).unwrap();
        assert!(serial != 0);
        c.flush();
    }
}
