//! The bridge itself: connection ownership, object registry and dispatch.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::os::raw::c_void;
use std::rc::{Rc, Weak};

use log::{debug, warn};

use crate::binding::method_return;
use crate::reactor::Reactor;
use crate::{ffi, introspect, Binding, BusType, Connection, Error, MainLoop, Message, MessageType,
    RequestNameReply};

const INTROSPECTABLE_IFACE: &str = "org.freedesktop.DBus.Introspectable";

/// Wires a service application into the message bus.
///
/// A `DBus` owns one private bus connection, a registry of per-interface
/// [`Binding`]s and of the service objects connected at each object path, and
/// answers incoming method calls (including introspection) from that registry.
/// All methods are meant to be called from the event loop's thread.
///
/// Service objects are held as `Weak` references. Dropping a service object
/// makes calls to it fail with an "unknown object" error until it is
/// disconnected or replaced.
pub struct DBus {
    conn: RefCell<Option<Rc<Connection>>>,
    reactor: RefCell<Option<Box<Reactor>>>,
    bindings: RefCell<BTreeMap<String, Rc<dyn Binding>>>,
    objects: RefCell<BTreeMap<String, BTreeMap<String, Weak<dyn Any>>>>,
    paths: RefCell<Vec<String>>,
}

static DISPATCH_VTABLE: ffi::DBusObjectPathVTable = ffi::DBusObjectPathVTable {
    unregister_function: None,
    message_function: Some(dispatch_cb),
    dbus_internal_pad1: None,
    dbus_internal_pad2: None,
    dbus_internal_pad3: None,
    dbus_internal_pad4: None,
};

extern "C" fn dispatch_cb(_conn: *mut ffi::DBusConnection, msg: *mut ffi::DBusMessage,
    data: *mut c_void) -> ffi::DBusHandlerResult
{
    let bridge = unsafe { &*(data as *const DBus) };
    let m = Message::from_ptr(msg, true);
    bridge.dispatch(&m)
}

impl DBus {
    /// Creates a bridge with no connection; call [`DBus::init`] to attach it
    /// to the bus.
    pub fn new() -> Rc<DBus> {
        Rc::new(DBus {
            conn: RefCell::new(None),
            reactor: RefCell::new(None),
            bindings: RefCell::new(BTreeMap::new()),
            objects: RefCell::new(BTreeMap::new()),
            paths: RefCell::new(Vec::new()),
        })
    }

    /// Opens the starter bus and plugs its watches, timeouts and wakeup hook
    /// into `main_loop`.
    pub fn init(&self, main_loop: Rc<dyn MainLoop>) -> Result<(), Error> {
        let conn = Rc::new(Connection::open(BusType::Starter)?);
        let reactor = Reactor::new(main_loop);
        if let Err(e) = reactor.install(&conn) {
            conn.clear_event_hooks();
            reactor.shutdown();
            return Err(e);
        }
        *self.conn.borrow_mut() = Some(conn);
        *self.reactor.borrow_mut() = Some(reactor);
        Ok(())
    }

    /// Whether the bridge currently holds a bus connection.
    pub fn is_available(&self) -> bool {
        self.conn.borrow().is_some()
    }

    /// Claims the well-known `name` on the bus.
    ///
    /// Anything but becoming the primary owner is an error, and the bridge
    /// gives up its connection: a service that cannot own its name must not
    /// linger on the bus half-registered.
    pub fn register_service(&self, name: &str) -> Result<(), Error> {
        let conn = self.connection()?;
        match conn.request_name(name) {
            Ok(RequestNameReply::PrimaryOwner) => Ok(()),
            Ok(reply) => {
                self.release();
                Err(Error::Remote(format!("unable to become primary owner of {}: {:?}", name, reply)))
            }
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }

    /// Starts answering method calls sent to `path`.
    ///
    /// The path is unregistered again when the bridge is dropped. The caller
    /// must keep `self` inside its `Rc` for as long as the path is registered.
    pub fn register_object_path(self: &Rc<Self>, path: &str) -> Result<(), Error> {
        let conn = self.connection()?;
        unsafe {
            conn.try_register_object_path(path, &DISPATCH_VTABLE, Rc::as_ptr(self) as *mut c_void)?;
        }
        self.paths.borrow_mut().push(path.to_string());
        Ok(())
    }

    /// Registers (or replaces) the binding for an interface.
    pub fn register_binding(&self, interface: &str, binding: Rc<dyn Binding>) {
        self.bindings.borrow_mut().insert(interface.to_string(), binding);
    }

    /// Looks up the binding registered for an interface.
    pub fn find_binding(&self, interface: &str) -> Option<Rc<dyn Binding>> {
        self.bindings.borrow().get(interface).cloned()
    }

    /// Attaches a service object to `path` under `interface`.
    ///
    /// The interface must have a registered binding. Only a weak reference is
    /// kept; the caller stays the owner of the object.
    pub fn connect(&self, path: &str, interface: &str, handler: &Rc<dyn Any>) -> Result<(), Error> {
        if self.find_binding(interface).is_none() {
            return Err(Error::Usage(format!("no binding registered for interface {}", interface)));
        }
        self.objects.borrow_mut()
            .entry(path.to_string())
            .or_insert_with(BTreeMap::new)
            .insert(interface.to_string(), Rc::downgrade(handler));
        Ok(())
    }

    /// Detaches the service object at `path` under `interface`. Detaching
    /// something that is not attached does nothing.
    pub fn disconnect(&self, path: &str, interface: &str) {
        let mut objects = self.objects.borrow_mut();
        if let Some(ifaces) = objects.get_mut(path) {
            ifaces.remove(interface);
            if ifaces.is_empty() {
                objects.remove(path);
            }
        }
    }

    /// Returns the live service object at `path` under `interface`, if any.
    pub fn find_object(&self, path: &str, interface: &str) -> Option<Rc<dyn Any>> {
        self.objects.borrow().get(path)?.get(interface)?.upgrade()
    }

    /// Queues `msg` on the connection and flushes the outgoing queue.
    pub fn send(&self, msg: Message) -> Result<u32, Error> {
        let conn = self.connection()?;
        let serial = conn.send(msg)
            .map_err(|_| Error::Remote("unable to queue message".into()))?;
        conn.flush();
        Ok(serial)
    }

    fn connection(&self) -> Result<Rc<Connection>, Error> {
        self.conn.borrow().clone()
            .ok_or_else(|| Error::Remote("bus connection is not available".into()))
    }

    /// Ordered teardown. Paths go first so no new calls arrive, then the
    /// main-loop hooks, then the reactor sources, and the connection last.
    fn release(&self) {
        let conn = self.conn.borrow_mut().take();
        if let Some(conn) = &conn {
            for path in self.paths.borrow_mut().drain(..) {
                conn.unregister_object_path(&path);
            }
            conn.clear_event_hooks();
        }
        if let Some(reactor) = self.reactor.borrow_mut().take() {
            reactor.shutdown();
        }
    }

    fn dispatch(&self, m: &Message) -> ffi::DBusHandlerResult {
        match self.try_dispatch(m) {
            Ok(true) => ffi::DBusHandlerResult::Handled,
            Ok(false) => ffi::DBusHandlerResult::NotYetHandled,
            Err(e) => {
                debug!("dispatch of {:?} failed: {}", m, e);
                self.send_error_reply(m, &e);
                // The error reply is this call's answer; without reporting the
                // message handled, libdbus would synthesize a second one.
                ffi::DBusHandlerResult::Handled
            }
        }
    }

    fn try_dispatch(&self, m: &Message) -> Result<bool, Error> {
        if m.msg_type() != MessageType::MethodCall {
            return Ok(false);
        }
        let reply = if m.interface() == Some(INTROSPECTABLE_IFACE) && m.member() == Some("Introspect") {
            // Paths with no connected objects are not ours to describe; leave
            // the call to other handlers.
            let known = m.path().map_or(false, |p| self.objects.borrow().contains_key(p));
            if !known {
                return Ok(false);
            }
            self.handle_introspect(m)?
        } else {
            self.call_for_message(m)?
        };
        self.connection()?.send(reply)
            .map_err(|_| Error::Remote("unable to queue reply".into()))?;
        Ok(true)
    }

    /// Resolves the message's (path, interface) to a handler and a binding,
    /// then runs the method. Both are cloned out of the registry first, so
    /// the handler is free to call back into it.
    fn call_for_message(&self, m: &Message) -> Result<Message, Error> {
        let path = m.path().unwrap_or("");
        let iface = m.interface().unwrap_or("");
        let member = m.member().unwrap_or("");
        let handler = self.find_object(path, iface)
            .ok_or_else(|| Error::Remote(format!("no such object: {} {}", path, iface)))?;
        let binding = self.find_binding(iface)
            .ok_or_else(|| Error::Remote(format!("no such binding: {}", iface)))?;
        binding.call(member, &*handler, m)
    }

    fn handle_introspect(&self, m: &Message) -> Result<Message, Error> {
        let path = m.path()
            .ok_or_else(|| Error::Usage("introspect call without a path".into()))?;
        let interfaces: Vec<_> = {
            let objects = self.objects.borrow();
            objects.get(path).into_iter()
                .flat_map(|ifaces| ifaces.keys())
                .map(|i| (i.clone(), self.find_binding(i)))
                .collect()
        };
        let xml = introspect::node_xml(path, &interfaces)?;
        Ok(method_return(m)?.append1(xml))
    }

    fn send_error_reply(&self, m: &Message, e: &Error) {
        let reply = match Message::new_error(m, e.id(), &e.details()) {
            Some(r) => r,
            None => { warn!("unable to build error reply for {:?}", m); return; }
        };
        match self.connection() {
            Ok(conn) => {
                if conn.send(reply).is_err() {
                    warn!("unable to queue error reply for {:?}", m);
                }
            }
            Err(_) => warn!("dropping error reply for {:?}, bus connection is gone", m),
        }
    }
}

impl Drop for DBus {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod test {
    use super::DBus;
    use crate::binding::testbind::{EchoBinding, EchoService, ECHO_INTERFACE};
    use crate::message::test_method_call;
    use crate::Error;
    use std::any::Any;
    use std::rc::Rc;

    fn echo_bus() -> (Rc<DBus>, Rc<EchoService>) {
        let bus = DBus::new();
        bus.register_binding(ECHO_INTERFACE, Rc::new(EchoBinding));
        let service = Rc::new(EchoService::new());
        bus.connect("/echo", ECHO_INTERFACE, &(service.clone() as Rc<dyn Any>)).unwrap();
        (bus, service)
    }

    #[test]
    fn echo_scenario() {
        let (bus, service) = echo_bus();
        let m = test_method_call("/echo", ECHO_INTERFACE, "Echo").append1("hello there");
        let reply = bus.call_for_message(&m).unwrap();
        assert_eq!(reply.read1::<String>().unwrap(), "hello there");
        assert_eq!(service.calls.get(), 1);
    }

    #[test]
    fn unknown_object_is_a_remote_error() {
        let (bus, _service) = echo_bus();
        let m = test_method_call("/nope", ECHO_INTERFACE, "Echo").append1("x");
        match bus.call_for_message(&m) {
            Err(Error::Remote(s)) => assert_eq!(s, "no such object: /nope org.example.Echo"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn missing_binding_is_a_remote_error() {
        let (bus, _service) = echo_bus();
        bus.bindings.borrow_mut().remove(ECHO_INTERFACE);
        let m = test_method_call("/echo", ECHO_INTERFACE, "Echo").append1("x");
        match bus.call_for_message(&m) {
            Err(Error::Remote(s)) => assert_eq!(s, "no such binding: org.example.Echo"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn dropped_handler_is_an_unknown_object() {
        let (bus, service) = echo_bus();
        drop(service);
        let m = test_method_call("/echo", ECHO_INTERFACE, "Echo").append1("x");
        assert!(matches!(bus.call_for_message(&m), Err(Error::Remote(_))));
        assert!(bus.find_object("/echo", ECHO_INTERFACE).is_none());
    }

    #[test]
    fn connect_requires_a_binding() {
        let bus = DBus::new();
        let service: Rc<dyn Any> = Rc::new(EchoService::new());
        assert!(matches!(bus.connect("/echo", ECHO_INTERFACE, &service), Err(Error::Usage(_))));
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (bus, _service) = echo_bus();
        bus.disconnect("/echo", ECHO_INTERFACE);
        bus.disconnect("/echo", ECHO_INTERFACE);
        assert!(bus.objects.borrow().is_empty());
        bus.disconnect("/never", "org.example.Nothing");
    }

    #[test]
    fn introspect_renders_connected_interfaces() {
        let (bus, _service) = echo_bus();
        let m = test_method_call("/echo", "org.freedesktop.DBus.Introspectable", "Introspect");
        let reply = bus.handle_introspect(&m).unwrap();
        let xml = reply.read1::<String>().unwrap();
        assert!(xml.contains("<node name='/echo'>"));
        assert!(xml.contains("<interface name='org.example.Echo'>"));
        assert!(xml.contains("<method name='Echo'>"));
        assert!(xml.contains("<arg name='text' type='s' direction='in'/>"));
        assert!(xml.contains("<signal name='Echoed'>"));
    }

    #[test]
    fn introspect_on_an_unknown_path_is_not_handled() {
        let (bus, _service) = echo_bus();
        let m = test_method_call("/nope", "org.freedesktop.DBus.Introspectable", "Introspect");
        assert_eq!(bus.try_dispatch(&m).unwrap(), false);
    }

    #[test]
    fn introspect_on_a_disconnected_path_is_not_handled() {
        let (bus, _service) = echo_bus();
        bus.disconnect("/echo", ECHO_INTERFACE);
        let m = test_method_call("/echo", "org.freedesktop.DBus.Introspectable", "Introspect");
        assert_eq!(bus.try_dispatch(&m).unwrap(), false);
    }

    #[test]
    fn send_without_a_connection_fails() {
        let bus = DBus::new();
        assert!(!bus.is_available());
        let m = crate::Message::new_signal("/echo", ECHO_INTERFACE, "Echoed").unwrap();
        assert!(matches!(bus.send(m), Err(Error::Remote(_))));
    }
}
