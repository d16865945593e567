//! XML generation for `org.freedesktop.DBus.Introspectable.Introspect`.

use std::rc::Rc;

use crate::{Binding, Error};

const DOCTYPE: &str = "<!DOCTYPE node PUBLIC '-//freedesktop//DTD D-BUS Object Introspection 1.0//EN' 'http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd'>\n";

const INTROSPECTABLE: &str = "\
<interface name=\"org.freedesktop.DBus.Introspectable\">\n\
<method name=\"Introspect\">\n\
<arg name=\"data\" direction=\"out\" type=\"s\"/>\n\
</method>\n\
</interface>\n";

/// Renders the introspection document for one object path.
///
/// `interfaces` holds the interfaces connected at the path, with the binding
/// looked up from the registry. An interface without a binding means the
/// registry is inconsistent and is reported as an error rather than silently
/// skipped.
pub (crate) fn node_xml(path: &str, interfaces: &[(String, Option<Rc<dyn Binding>>)])
    -> Result<String, Error>
{
    let mut xml = String::with_capacity(1024);
    xml.push_str(DOCTYPE);
    xml.push_str(&format!("<node name='{}'>\n", path));
    xml.push_str(INTROSPECTABLE);
    for (name, binding) in interfaces {
        let binding = binding.as_ref()
            .ok_or_else(|| Error::Remote("Internal error, unknown interface".into()))?;
        xml.push_str(&format!("<interface name='{}'>\n", name));
        for m in binding.methods() {
            xml.push_str(&format!("<method name='{}'>\n", m.name));
            for a in m.in_args {
                xml.push_str(&format!("<arg name='{}' type='{}' direction='in'/>\n", a.name, a.sig));
            }
            for a in m.out_args {
                xml.push_str(&format!("<arg name='{}' type='{}' direction='out'/>\n", a.name, a.sig));
            }
            xml.push_str("</method>\n");
        }
        for s in binding.signals() {
            xml.push_str(&format!("<signal name='{}'>\n", s.name));
            for a in s.args {
                xml.push_str(&format!("<arg name='{}' type='{}'/>\n", a.name, a.sig));
            }
            xml.push_str("</signal>\n");
        }
        xml.push_str("</interface>\n");
    }
    xml.push_str("</node>\n");
    Ok(xml)
}

#[cfg(test)]
mod test {
    use super::node_xml;
    use crate::binding::testbind::{EchoBinding, ECHO_INTERFACE};
    use crate::{Binding, Error};
    use std::rc::Rc;

    #[test]
    fn renders_interfaces_methods_and_signals() {
        let b: Rc<dyn Binding> = Rc::new(EchoBinding);
        let xml = node_xml("/org/example/Echo",
            &[(ECHO_INTERFACE.to_string(), Some(b))]).unwrap();

        assert_eq!(xml,
"<!DOCTYPE node PUBLIC '-//freedesktop//DTD D-BUS Object Introspection 1.0//EN' 'http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd'>
<node name='/org/example/Echo'>
<interface name=\"org.freedesktop.DBus.Introspectable\">
<method name=\"Introspect\">
<arg name=\"data\" direction=\"out\" type=\"s\"/>
</method>
</interface>
<interface name='org.example.Echo'>
<method name='Echo'>
<arg name='text' type='s' direction='in'/>
<arg name='reply' type='s' direction='out'/>
</method>
<method name='Count'>
<arg name='count' type='u' direction='out'/>
</method>
<signal name='Echoed'>
<arg name='text' type='s'/>
</signal>
</interface>
</node>
");
    }

    #[test]
    fn empty_path_still_exposes_introspectable() {
        let xml = node_xml("/org/example/Empty", &[]).unwrap();
        assert!(xml.contains("org.freedesktop.DBus.Introspectable"));
        assert!(xml.ends_with("</node>\n"));
    }

    #[test]
    fn missing_binding_is_an_internal_error() {
        let r = node_xml("/org/example/Echo", &[("org.example.Gone".to_string(), None)]);
        match r {
            Err(Error::Remote(s)) => assert_eq!(s, "Internal error, unknown interface"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
