use std::any::Any;

use crate::{Error, Message};

/// A named, typed argument of a method or signal.
///
/// `sig` is the D-Bus type signature of the argument, e g "s" or "u".
#[derive(Debug, Clone, Copy)]
pub struct Argument {
    /// Argument name, as shown in introspection data.
    pub name: &'static str,
    /// D-Bus type signature.
    pub sig: &'static str,
}

/// Description of one method of an interface.
///
/// The direction of an argument follows from the table it sits in.
#[derive(Debug, Clone, Copy)]
pub struct Method {
    /// Member name.
    pub name: &'static str,
    /// Arguments the caller supplies.
    pub in_args: &'static [Argument],
    /// Arguments of the reply.
    pub out_args: &'static [Argument],
}

/// Description of one signal of an interface.
#[derive(Debug, Clone, Copy)]
pub struct Signal {
    /// Member name.
    pub name: &'static str,
    /// Arguments of the signal body.
    pub args: &'static [Argument],
}

/// Per-interface dispatch table.
///
/// Implemented once per D-Bus interface, normally by generated code. The
/// implementation owns the static method and signal descriptions and knows
/// how to unmarshal each method's arguments, invoke the service object and
/// marshal the reply. Service objects reach a binding as `&dyn Any`; the
/// binding downcasts to the concrete type it was generated for.
pub trait Binding {
    /// The methods of this interface, in call index order.
    fn methods(&self) -> &'static [Method];

    /// The signals of this interface.
    fn signals(&self) -> &'static [Signal];

    /// Invokes method number `index` (an index into `methods()`) on `handler`.
    fn call_method(&self, index: usize, handler: &dyn Any, message: &Message) -> Result<Message, Error>;

    /// Looks up `member` by name and invokes it.
    fn call(&self, member: &str, handler: &dyn Any, message: &Message) -> Result<Message, Error> {
        let index = self.methods().iter().position(|m| m.name == member)
            .ok_or_else(|| Error::Usage(format!("no such member: {}", member)))?;
        self.call_method(index, handler, message)
    }
}

/// Starts a method reply, mapping allocation failure to an error the
/// dispatcher can report.
pub fn method_return(message: &Message) -> Result<Message, Error> {
    Message::new_method_return(message)
        .ok_or_else(|| Error::Remote("out of memory building method reply".into()))
}

#[cfg(test)]
pub (crate) mod testbind {
    use std::any::Any;
    use std::cell::Cell;

    use super::{method_return, Argument, Binding, Method, Signal};
    use crate::{Error, Message};

    pub struct EchoService {
        pub calls: Cell<u32>,
    }

    impl EchoService {
        pub fn new() -> EchoService { EchoService { calls: Cell::new(0) } }
    }

    pub const ECHO_INTERFACE: &str = "org.example.Echo";

    static ECHO_METHODS: &[Method] = &[
        Method {
            name: "Echo",
            in_args: &[Argument { name: "text", sig: "s" }],
            out_args: &[Argument { name: "reply", sig: "s" }],
        },
        Method {
            name: "Count",
            in_args: &[],
            out_args: &[Argument { name: "count", sig: "u" }],
        },
    ];

    static ECHO_SIGNALS: &[Signal] = &[
        Signal { name: "Echoed", args: &[Argument { name: "text", sig: "s" }] },
    ];

    pub struct EchoBinding;

    impl Binding for EchoBinding {
        fn methods(&self) -> &'static [Method] { ECHO_METHODS }
        fn signals(&self) -> &'static [Signal] { ECHO_SIGNALS }

        fn call_method(&self, index: usize, handler: &dyn Any, message: &Message) -> Result<Message, Error> {
            let service = handler.downcast_ref::<EchoService>()
                .ok_or_else(|| Error::Usage("handler is not an EchoService".into()))?;
            match index {
                0 => {
                    let text: String = message.read1()?;
                    service.calls.set(service.calls.get() + 1);
                    Ok(method_return(message)?.append1(text))
                }
                1 => Ok(method_return(message)?.append1(service.calls.get())),
                _ => unreachable!(),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::testbind::{EchoBinding, EchoService};
    use super::Binding;
    use crate::message::test_method_call;
    use crate::Error;

    #[test]
    fn call_scans_by_name() {
        let service = EchoService::new();
        let m = test_method_call("/echo", "org.example.Echo", "Echo").append1("bonjour");
        let reply = EchoBinding.call("Echo", &service, &m).unwrap();
        assert_eq!(reply.read1::<String>().unwrap(), "bonjour");
        assert_eq!(service.calls.get(), 1);

        let m = test_method_call("/echo", "org.example.Echo", "Count");
        let reply = EchoBinding.call("Count", &service, &m).unwrap();
        assert_eq!(reply.read1::<u32>().unwrap(), 1);
    }

    #[test]
    fn unknown_member_is_a_usage_error() {
        let service = EchoService::new();
        let m = test_method_call("/echo", "org.example.Echo", "Nope");
        match EchoBinding.call("Nope", &service, &m) {
            Err(Error::Usage(s)) => assert_eq!(s, "no such member: Nope"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert_eq!(service.calls.get(), 0);
    }

    #[test]
    fn bad_argument_type_is_reported() {
        let service = EchoService::new();
        let m = test_method_call("/echo", "org.example.Echo", "Echo").append1(32u32);
        match EchoBinding.call("Echo", &service, &m) {
            Err(Error::TypeMismatch(e)) => assert_eq!(e.pos(), 0),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn wrong_handler_type_is_a_usage_error() {
        let m = test_method_call("/echo", "org.example.Echo", "Echo").append1("x");
        let not_a_service = 7i32;
        assert!(matches!(EchoBinding.call("Echo", &not_a_service, &m), Err(Error::Usage(_))));
    }
}
