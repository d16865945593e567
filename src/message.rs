use std::ffi::CStr;
use std::os::raw::c_char;
use std::{fmt, mem, ptr, str};

use crate::arg::{Append, Arg, Get, Iter, IterAppend, TypeMismatchError};
use crate::{ffi, init_dbus, to_c_str, Error, MessageType};

/// A D-Bus message. A message contains some headers (e g path and member)
/// and a list of arguments.
pub struct Message {
    msg: *mut ffi::DBusMessage,
}

impl Message {
    /// Creates a new method call message.
    pub fn new_method_call(destination: &str, path: &str, iface: &str, method: &str) -> Result<Message, Error> {
        init_dbus();
        let (d, p, i, m) = (to_c_str(destination), to_c_str(path), to_c_str(iface), to_c_str(method));
        let ptr = unsafe { ffi::dbus_message_new_method_call(d.as_ptr(), p.as_ptr(), i.as_ptr(), m.as_ptr()) };
        if ptr.is_null() {
            Err(Error::Usage(format!("invalid method call {} {} {}.{}", destination, path, iface, method)))
        } else {
            Ok(Message { msg: ptr })
        }
    }

    /// Creates a new signal message.
    pub fn new_signal(path: &str, iface: &str, name: &str) -> Result<Message, Error> {
        init_dbus();
        let (p, i, m) = (to_c_str(path), to_c_str(iface), to_c_str(name));
        let ptr = unsafe { ffi::dbus_message_new_signal(p.as_ptr(), i.as_ptr(), m.as_ptr()) };
        if ptr.is_null() {
            Err(Error::Usage(format!("invalid signal {} {}.{}", path, iface, name)))
        } else {
            Ok(Message { msg: ptr })
        }
    }

    /// Creates a method reply for this method call.
    pub fn new_method_return(m: &Message) -> Option<Message> {
        let ptr = unsafe { ffi::dbus_message_new_method_return(m.msg) };
        if ptr.is_null() { None } else { Some(Message { msg: ptr }) }
    }

    /// Creates an error reply for this method call.
    pub fn new_error(m: &Message, error_name: &str, error_message: &str) -> Option<Message> {
        let (en, em) = (to_c_str(error_name), to_c_str(error_message));
        let ptr = unsafe { ffi::dbus_message_new_error(m.msg, en.as_ptr(), em.as_ptr()) };
        if ptr.is_null() { None } else { Some(Message { msg: ptr }) }
    }

    /// Appends one argument to this message.
    /// Use in builder style: e g `Message::new_method_return(m).unwrap().append1(7i32)`
    pub fn append1<A: Append>(mut self, a: A) -> Self {
        {
            let mut m = IterAppend::new(&mut self);
            m.append(a);
        }
        self
    }

    /// Appends two arguments to this message.
    pub fn append2<A1: Append, A2: Append>(mut self, a1: A1, a2: A2) -> Self {
        {
            let mut m = IterAppend::new(&mut self);
            m.append(a1); m.append(a2);
        }
        self
    }

    /// Appends three arguments to this message.
    pub fn append3<A1: Append, A2: Append, A3: Append>(mut self, a1: A1, a2: A2, a3: A3) -> Self {
        {
            let mut m = IterAppend::new(&mut self);
            m.append(a1); m.append(a2); m.append(a3);
        }
        self
    }

    /// Gets the first argument from the message, if that argument is of type G1.
    ///
    /// Returns a TypeMismatchError if there are not enough arguments, or if types don't match.
    pub fn read1<'a, G1: Arg + Get<'a>>(&'a self) -> Result<G1, TypeMismatchError> {
        let mut i = Iter::new(self);
        i.read()
    }

    /// Gets the first two arguments from the message, if those arguments are of type G1 and G2.
    pub fn read2<'a, G1: Arg + Get<'a>, G2: Arg + Get<'a>>(&'a self) -> Result<(G1, G2), TypeMismatchError> {
        let mut i = Iter::new(self);
        Ok((i.read()?, i.read()?))
    }

    /// Gets the first three arguments from the message, if those arguments are of type G1, G2 and G3.
    pub fn read3<'a, G1: Arg + Get<'a>, G2: Arg + Get<'a>, G3: Arg + Get<'a>>(&'a self)
        -> Result<(G1, G2, G3), TypeMismatchError> {
        let mut i = Iter::new(self);
        Ok((i.read()?, i.read()?, i.read()?))
    }

    /// Returns a struct for retrieving the arguments from a message.
    pub fn iter_init(&self) -> Iter<'_> { Iter::new(self) }

    /// Gets the MessageType of the Message.
    pub fn msg_type(&self) -> MessageType {
        unsafe { mem::transmute(ffi::dbus_message_get_type(self.msg)) }
    }

    fn msg_internal_str<'a>(&'a self, c: *const c_char) -> Option<&'a str> {
        if c == ptr::null() { None }
        else { str::from_utf8(unsafe { CStr::from_ptr(c) }.to_bytes()).ok() }
    }

    /// Gets the object path this Message is being sent to.
    pub fn path(&self) -> Option<&str> {
        self.msg_internal_str(unsafe { ffi::dbus_message_get_path(self.msg) })
    }

    /// Gets the interface this Message is being sent to.
    pub fn interface(&self) -> Option<&str> {
        self.msg_internal_str(unsafe { ffi::dbus_message_get_interface(self.msg) })
    }

    /// Gets the interface member being called.
    pub fn member(&self) -> Option<&str> {
        self.msg_internal_str(unsafe { ffi::dbus_message_get_member(self.msg) })
    }

    /// Gets the name of the connection that originated this message.
    pub fn sender(&self) -> Option<&str> {
        self.msg_internal_str(unsafe { ffi::dbus_message_get_sender(self.msg) })
    }

    /// Get the D-Bus serial of a message, if one was specified.
    pub fn get_serial(&self) -> u32 {
        unsafe { ffi::dbus_message_get_serial(self.msg) }
    }

    /// Get the serial of the message this message is a reply to, if present.
    pub fn get_reply_serial(&self) -> Option<u32> {
        let s = unsafe { ffi::dbus_message_get_reply_serial(self.msg) };
        if s == 0 { None } else { Some(s) }
    }

    pub (crate) fn ptr(&self) -> *mut ffi::DBusMessage { self.msg }

    pub (crate) fn from_ptr(ptr: *mut ffi::DBusMessage, add_ref: bool) -> Message {
        if add_ref {
            unsafe { ffi::dbus_message_ref(ptr) };
        }
        Message { msg: ptr }
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        unsafe {
            ffi::dbus_message_unref(self.msg);
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("Message")
            .field("type", &self.msg_type())
            .field("path", &self.path())
            .field("interface", &self.interface())
            .field("member", &self.member())
            .finish()
    }
}

// For purpose of testing the library only. Freshly created method calls have
// no serial until sent, and libdbus refuses to build replies for them.
#[cfg(test)]
pub (crate) fn message_set_serial(m: &Message, s: u32) {
    unsafe { ffi::dbus_message_set_serial(m.msg, s) };
}

#[cfg(test)]
pub (crate) fn test_method_call(path: &str, iface: &str, member: &str) -> Message {
    let m = Message::new_method_call("org.example.dest", path, iface, member).unwrap();
    message_set_serial(&m, 57);
    m
}
