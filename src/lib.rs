//! Server-side D-Bus bridge for Rust
//!
//! [D-Bus](http://dbus.freedesktop.org/) is a message bus, and is mainly used in Linux
//! for communication between processes. This crate wires a service application into
//! the bus: it owns a private connection, registers object paths and per-interface
//! bindings, dispatches incoming method calls to application objects, answers
//! introspection requests, and plugs libdbus's watch/timeout/wakeup hooks into a
//! callback-oriented event loop (a calloop adapter is included).
//!
//! Everything runs single-threaded and cooperatively: the bridge and the loop live
//! on the same thread, state is `Rc`/`RefCell`, and application callbacks run from
//! inside the loop's dispatch.

#![warn(missing_docs)]

mod ffi;

pub use crate::ffi::DBusBusType as BusType;
pub use crate::ffi::DBusMessageType as MessageType;
pub use crate::ffi::DBusRequestNameReply as RequestNameReply;

mod error;
pub use crate::error::Error;

mod message;
pub use crate::message::Message;

pub mod arg;

mod binding;
pub use crate::binding::{method_return, Argument, Binding, Method, Signal};

mod channel;
pub use crate::channel::Connection;

mod introspect;

mod mainloop;
pub use crate::mainloop::{CalloopLoop, IoCondition, IoInterest, MainLoop, SourceId};

mod reactor;

mod bridge;
pub use crate::bridge::DBus;

static INITDBUS: std::sync::Once = std::sync::Once::new();

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

fn init_dbus() {
    INITDBUS.call_once(|| {
        if unsafe { ffi::dbus_threads_init_default() } == 0 {
            panic!("Out of memory when trying to initialize D-Bus library!");
        }
    });
}

fn c_str_to_slice(c: &*const c_char) -> Option<&str> {
    if *c == ptr::null() { None }
    else { std::str::from_utf8(unsafe { CStr::from_ptr(*c).to_bytes() }).ok() }
}

fn to_c_str(n: &str) -> CString { CString::new(n.as_bytes()).unwrap() }
