use std::sync::Arc;

use super::value::{decode_value, encode_value, NetField, NetValue, PropError, PropKind, PropValue};
use super::vars::NetworkVars;
use crate::net::{Datagram, DatagramIterator};

/// Reads the field behind `prop` out of `vars` and writes its encoding.
pub type SendProxyFn = fn(&SendProp, &NetworkVars, &mut Datagram) -> Result<(), PropError>;

/// Decodes one value from the cursor into the field behind `prop`.
pub type RecvProxyFn =
    fn(&RecvProp, &mut NetworkVars, &mut DatagramIterator<'_>) -> Result<(), PropError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("table '{table}' declares '{prop}' twice")]
    DuplicateProp { table: String, prop: String },
    #[error("table '{table}': prop '{prop}' uses field {found}, expected {expected}")]
    FieldOutOfOrder {
        table: String,
        prop: String,
        expected: u16,
        found: u16,
    },
}

pub fn send_proxy_default(
    prop: &SendProp,
    vars: &NetworkVars,
    dg: &mut Datagram,
) -> Result<(), PropError> {
    let value = vars.value(prop.field).ok_or_else(|| PropError::MissingField {
        prop: prop.name.to_owned(),
        field: prop.field,
    })?;
    if !prop.kind.accepts(value) {
        return Err(PropError::TypeMismatch {
            prop: prop.name.to_owned(),
            expected: prop.kind,
        });
    }
    encode_value(prop.kind, value, dg).map_err(|source| PropError::Datagram {
        prop: prop.name.to_owned(),
        source,
    })
}

pub fn recv_proxy_default(
    prop: &RecvProp,
    vars: &mut NetworkVars,
    dgi: &mut DatagramIterator<'_>,
) -> Result<(), PropError> {
    let value = prop.read(dgi)?;
    prop.store(vars, value)
}

#[derive(Clone)]
pub struct SendProp {
    name: &'static str,
    field: u16,
    kind: PropKind,
    bits: u16,
    proxy: SendProxyFn,
}

impl SendProp {
    pub fn new<T: NetValue>(name: &'static str, field: NetField<T>) -> Self {
        Self::with_kind(name, field.index(), T::KIND)
    }

    /// Entity references travel as u32 ids.
    pub fn entity(name: &'static str, field: NetField<u32>) -> Self {
        Self::new(name, field)
    }

    pub fn cstring(name: &'static str, field: NetField<String>, width: usize) -> Self {
        Self::with_kind(name, field.index(), PropKind::CString(width))
    }

    fn with_kind(name: &'static str, field: u16, kind: PropKind) -> Self {
        Self {
            name,
            field,
            kind,
            bits: kind.bits(),
            proxy: send_proxy_default,
        }
    }

    pub fn bits(mut self, bits: u16) -> Self {
        self.bits = bits;
        self
    }

    pub fn proxy(mut self, proxy: SendProxyFn) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn field(&self) -> u16 {
        self.field
    }

    pub fn kind(&self) -> PropKind {
        self.kind
    }

    pub fn bit_count(&self) -> u16 {
        self.bits
    }

    pub fn encode(&self, vars: &NetworkVars, dg: &mut Datagram) -> Result<(), PropError> {
        (self.proxy)(self, vars, dg)
    }
}

impl std::fmt::Debug for SendProp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendProp")
            .field("name", &self.name)
            .field("field", &self.field)
            .field("kind", &self.kind)
            .field("bits", &self.bits)
            .finish()
    }
}

#[derive(Clone)]
pub struct RecvProp {
    name: &'static str,
    field: u16,
    kind: PropKind,
    proxy: RecvProxyFn,
}

impl RecvProp {
    pub fn new<T: NetValue>(name: &'static str, field: NetField<T>) -> Self {
        Self::with_kind(name, field.index(), T::KIND)
    }

    pub fn entity(name: &'static str, field: NetField<u32>) -> Self {
        Self::new(name, field)
    }

    pub fn cstring(name: &'static str, field: NetField<String>, width: usize) -> Self {
        Self::with_kind(name, field.index(), PropKind::CString(width))
    }

    fn with_kind(name: &'static str, field: u16, kind: PropKind) -> Self {
        Self {
            name,
            field,
            kind,
            proxy: recv_proxy_default,
        }
    }

    pub fn proxy(mut self, proxy: RecvProxyFn) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn field(&self) -> u16 {
        self.field
    }

    pub fn kind(&self) -> PropKind {
        self.kind
    }

    /// Reads this prop's wire value without storing it.
    pub fn read(&self, dgi: &mut DatagramIterator<'_>) -> Result<PropValue, PropError> {
        decode_value(self.kind, dgi).map_err(|source| PropError::Datagram {
            prop: self.name.to_owned(),
            source,
        })
    }

    /// Writes a decoded value into the field behind this prop.
    pub fn store(&self, vars: &mut NetworkVars, value: PropValue) -> Result<(), PropError> {
        if vars.write(self.field, value) {
            Ok(())
        } else {
            Err(PropError::MissingField {
                prop: self.name.to_owned(),
                field: self.field,
            })
        }
    }

    pub fn decode(
        &self,
        vars: &mut NetworkVars,
        dgi: &mut DatagramIterator<'_>,
    ) -> Result<(), PropError> {
        (self.proxy)(self, vars, dgi)
    }
}

impl std::fmt::Debug for RecvProp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecvProp")
            .field("name", &self.name)
            .field("field", &self.field)
            .field("kind", &self.kind)
            .finish()
    }
}

fn validate<'a>(
    table: &str,
    props: impl Iterator<Item = (&'a str, u16)>,
) -> Result<(), SchemaError> {
    let mut seen: Vec<&str> = Vec::new();
    for (position, (name, field)) in props.enumerate() {
        if seen.contains(&name) {
            return Err(SchemaError::DuplicateProp {
                table: table.to_owned(),
                prop: name.to_owned(),
            });
        }
        if field as usize != position {
            return Err(SchemaError::FieldOutOfOrder {
                table: table.to_owned(),
                prop: name.to_owned(),
                expected: position as u16,
                found: field,
            });
        }
        seen.push(name);
    }
    Ok(())
}

/// Ordered send descriptors of one entity class, base props first.
#[derive(Debug, Clone)]
pub struct SendTable {
    name: &'static str,
    props: Vec<SendProp>,
}

impl SendTable {
    pub fn builder(name: &'static str) -> SendTableBuilder {
        SendTableBuilder {
            name,
            props: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn props(&self) -> &[SendProp] {
        &self.props
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&SendProp> {
        self.props.iter().find(|prop| prop.name == name)
    }

    /// Zeroed storage with one slot per prop.
    pub fn new_vars(&self) -> NetworkVars {
        NetworkVars::from_values(self.props.iter().map(|p| p.kind.default_value()).collect())
    }
}

pub struct SendTableBuilder {
    name: &'static str,
    props: Vec<SendProp>,
}

impl SendTableBuilder {
    pub fn inherit(mut self, base: &SendTable) -> Self {
        self.props.extend(base.props.iter().cloned());
        self
    }

    pub fn prop(mut self, prop: SendProp) -> Self {
        self.props.push(prop);
        self
    }

    pub fn build(self) -> Result<Arc<SendTable>, SchemaError> {
        validate(self.name, self.props.iter().map(|p| (p.name, p.field)))?;
        Ok(Arc::new(SendTable {
            name: self.name,
            props: self.props,
        }))
    }
}

/// Ordered receive descriptors of one entity class, base props first.
#[derive(Debug, Clone)]
pub struct RecvTable {
    name: &'static str,
    props: Vec<RecvProp>,
}

impl RecvTable {
    pub fn builder(name: &'static str) -> RecvTableBuilder {
        RecvTableBuilder {
            name,
            props: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn props(&self) -> &[RecvProp] {
        &self.props
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&RecvProp> {
        self.props.iter().find(|prop| prop.name == name)
    }

    pub fn new_vars(&self) -> NetworkVars {
        NetworkVars::from_values(self.props.iter().map(|p| p.kind.default_value()).collect())
    }
}

pub struct RecvTableBuilder {
    name: &'static str,
    props: Vec<RecvProp>,
}

impl RecvTableBuilder {
    pub fn inherit(mut self, base: &RecvTable) -> Self {
        self.props.extend(base.props.iter().cloned());
        self
    }

    pub fn prop(mut self, prop: RecvProp) -> Self {
        self.props.push(prop);
        self
    }

    pub fn build(self) -> Result<Arc<RecvTable>, SchemaError> {
        validate(self.name, self.props.iter().map(|p| (p.name, p.field)))?;
        Ok(Arc::new(RecvTable {
            name: self.name,
            props: self.props,
        }))
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    const HEALTH: NetField<i32> = NetField::new(0);
    const ORIGIN: NetField<Vec3> = NetField::new(1);
    const MODEL: NetField<String> = NetField::new(2);

    fn send_base() -> Arc<SendTable> {
        SendTable::builder("DT_Base")
            .prop(SendProp::new("health", HEALTH))
            .prop(SendProp::new("origin", ORIGIN))
            .build()
            .unwrap()
    }

    #[test]
    fn inherited_props_come_first() {
        let base = send_base();
        let derived = SendTable::builder("DT_Prop")
            .inherit(&base)
            .prop(SendProp::cstring("model", MODEL, 32))
            .build()
            .unwrap();

        let names: Vec<_> = derived.props().iter().map(SendProp::name).collect();
        assert_eq!(names, ["health", "origin", "model"]);
        assert_eq!(derived.find("model").map(SendProp::kind), Some(PropKind::CString(32)));
        assert!(derived.find("velocity").is_none());
    }

    #[test]
    fn duplicate_and_misplaced_fields_are_rejected() {
        let base = send_base();
        let err = SendTable::builder("DT_Bad")
            .inherit(&base)
            .prop(SendProp::new("health", NetField::<i32>::new(2)))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateProp { .. }));

        let err = RecvTable::builder("DT_Gap")
            .prop(RecvProp::new("origin", ORIGIN))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::FieldOutOfOrder {
                table: "DT_Gap".into(),
                prop: "origin".into(),
                expected: 0,
                found: 1,
            }
        );
    }

    fn recv_proxy_wrap_degrees(
        prop: &RecvProp,
        vars: &mut NetworkVars,
        dgi: &mut DatagramIterator<'_>,
    ) -> Result<(), PropError> {
        match prop.read(dgi)? {
            PropValue::Vec3(v) => prop.store(vars, PropValue::Vec3(v.map(|a| a.rem_euclid(360.0)))),
            other => prop.store(vars, other),
        }
    }

    #[test]
    fn proxies_move_values_between_tables() {
        let send = send_base();
        let recv = RecvTable::builder("DT_Base")
            .prop(RecvProp::new("health", HEALTH))
            .prop(RecvProp::new("origin", ORIGIN).proxy(recv_proxy_wrap_degrees))
            .build()
            .unwrap();

        let mut server = send.new_vars();
        server.set(HEALTH, -7);
        server.set(ORIGIN, Vec3::new(370.0, -10.0, 0.0));

        let mut dg = Datagram::new();
        for prop in send.props() {
            prop.encode(&server, &mut dg).unwrap();
        }

        let mut client = recv.new_vars();
        let mut dgi = DatagramIterator::new(dg.as_bytes());
        for prop in recv.props() {
            prop.decode(&mut client, &mut dgi).unwrap();
        }

        assert_eq!(client.get(HEALTH), Some(-7));
        assert_eq!(client.get(ORIGIN), Some(Vec3::new(10.0, 350.0, 0.0)));
        assert!(client.is_changed(HEALTH));
    }

    #[test]
    fn encode_rejects_wrong_storage() {
        let send = send_base();
        let vars = NetworkVars::from_values(vec![PropValue::Str("oops".into())]);
        let err = send.props()[0].encode(&vars, &mut Datagram::new()).unwrap_err();
        assert!(matches!(err, PropError::TypeMismatch { .. }));

        let err = send.props()[1].encode(&vars, &mut Datagram::new()).unwrap_err();
        assert!(matches!(err, PropError::MissingField { field: 1, .. }));
    }
}
