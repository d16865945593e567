use crate::arg::TypeMismatchError;

/// Errors raised inside the bridge.
///
/// Only the dispatcher turns these into D-Bus error replies; everything else
/// propagates them with `?`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Local API misuse, e g calling an unknown member or connecting an
    /// object to an interface without a binding.
    #[error("usage error: {0}")]
    Usage(String),
    /// An incoming argument's wire type differs from what the binding expects.
    #[error("{0}")]
    TypeMismatch(#[from] TypeMismatchError),
    /// Failures involving the peer or the bus itself (unknown object,
    /// unavailable connection, name acquisition).
    #[error("{0}")]
    Remote(String),
}

impl Error {
    /// The D-Bus error name this error is reported under on the wire.
    pub fn id(&self) -> &'static str {
        match self {
            Error::Usage(_) => "org.freedesktop.DBus.Error.UnknownMethod",
            Error::TypeMismatch(_) => "org.freedesktop.DBus.Error.InvalidArgs",
            Error::Remote(_) => "org.freedesktop.DBus.Error.Failed",
        }
    }

    /// Human-readable message for the error reply body.
    pub fn details(&self) -> String {
        match self {
            Error::Usage(s) => s.clone(),
            Error::TypeMismatch(t) => t.to_string(),
            Error::Remote(s) => s.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Error;

    #[test]
    fn wire_names() {
        assert_eq!(Error::Usage("no such member: Foo".into()).id(),
            "org.freedesktop.DBus.Error.UnknownMethod");
        assert_eq!(Error::Remote("no such object: /a b.c".into()).id(),
            "org.freedesktop.DBus.Error.Failed");
    }

    #[test]
    fn details_carry_the_message() {
        let e = Error::Remote("Unable to obtain session bus".into());
        assert_eq!(e.details(), "Unable to obtain session bus");
        assert_eq!(format!("{}", e), "Unable to obtain session bus");
    }
}
