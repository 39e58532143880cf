use std::fmt;
use std::marker::PhantomData;

use glam::{Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::net::{Datagram, DatagramError, DatagramIterator};

/// Wire encoding of a replicated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropKind {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    /// u16 length-prefixed string.
    String,
    /// Fixed-width, NUL padded string.
    CString(usize),
    Vec2,
    Vec3,
    Vec4,
}

impl PropKind {
    /// Nominal bit width, used as the default `bits` of a prop.
    pub fn bits(self) -> u16 {
        match self {
            Self::Int8 | Self::Uint8 => 8,
            Self::Int16 | Self::Uint16 => 16,
            Self::Int32 | Self::Uint32 | Self::Float32 => 32,
            Self::Int64 | Self::Uint64 | Self::Float64 => 64,
            Self::Vec2 => 64,
            Self::Vec3 => 96,
            Self::Vec4 => 128,
            Self::String => 0,
            Self::CString(width) => (width * 8) as u16,
        }
    }

    pub fn default_value(self) -> PropValue {
        match self {
            Self::Int8 => PropValue::I8(0),
            Self::Int16 => PropValue::I16(0),
            Self::Int32 => PropValue::I32(0),
            Self::Int64 => PropValue::I64(0),
            Self::Uint8 => PropValue::U8(0),
            Self::Uint16 => PropValue::U16(0),
            Self::Uint32 => PropValue::U32(0),
            Self::Uint64 => PropValue::U64(0),
            Self::Float32 => PropValue::F32(0.0),
            Self::Float64 => PropValue::F64(0.0),
            Self::String | Self::CString(_) => PropValue::Str(String::new()),
            Self::Vec2 => PropValue::Vec2(Vec2::ZERO),
            Self::Vec3 => PropValue::Vec3(Vec3::ZERO),
            Self::Vec4 => PropValue::Vec4(Vec4::ZERO),
        }
    }

    /// Whether `value` can be stored in a field of this kind.
    pub fn accepts(self, value: &PropValue) -> bool {
        matches!(
            (self, value),
            (Self::Int8, PropValue::I8(_))
                | (Self::Int16, PropValue::I16(_))
                | (Self::Int32, PropValue::I32(_))
                | (Self::Int64, PropValue::I64(_))
                | (Self::Uint8, PropValue::U8(_))
                | (Self::Uint16, PropValue::U16(_))
                | (Self::Uint32, PropValue::U32(_))
                | (Self::Uint64, PropValue::U64(_))
                | (Self::Float32, PropValue::F32(_))
                | (Self::Float64, PropValue::F64(_))
                | (Self::String, PropValue::Str(_))
                | (Self::CString(_), PropValue::Str(_))
                | (Self::Vec2, PropValue::Vec2(_))
                | (Self::Vec3, PropValue::Vec3(_))
                | (Self::Vec4, PropValue::Vec4(_))
        )
    }

    /// Two kinds share a storage type (a `String` field may be sent as a C-string).
    pub fn same_storage(self, other: PropKind) -> bool {
        self.accepts(&other.default_value())
    }
}

/// A replicated field value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PropError {
    #[error("prop '{prop}' expected a {expected:?} value")]
    TypeMismatch { prop: String, expected: PropKind },
    #[error("prop '{prop}' refers to missing field {field}")]
    MissingField { prop: String, field: u16 },
    #[error("prop '{prop}': {source}")]
    Datagram {
        prop: String,
        #[source]
        source: DatagramError,
    },
}

/// Writes `value` with the encoding of `kind`.
pub fn encode_value(kind: PropKind, value: &PropValue, dg: &mut Datagram) -> Result<(), DatagramError> {
    match (kind, value) {
        (PropKind::Int8, PropValue::I8(v)) => dg.add_i8(*v),
        (PropKind::Int16, PropValue::I16(v)) => dg.add_i16(*v),
        (PropKind::Int32, PropValue::I32(v)) => dg.add_i32(*v),
        (PropKind::Int64, PropValue::I64(v)) => dg.add_i64(*v),
        (PropKind::Uint8, PropValue::U8(v)) => dg.add_u8(*v),
        (PropKind::Uint16, PropValue::U16(v)) => dg.add_u16(*v),
        (PropKind::Uint32, PropValue::U32(v)) => dg.add_u32(*v),
        (PropKind::Uint64, PropValue::U64(v)) => dg.add_u64(*v),
        (PropKind::Float32, PropValue::F32(v)) => dg.add_f32(*v),
        (PropKind::Float64, PropValue::F64(v)) => dg.add_f64(*v),
        (PropKind::String, PropValue::Str(v)) => dg.add_string(v)?,
        (PropKind::CString(width), PropValue::Str(v)) => dg.add_fixed_string(v, width),
        (PropKind::Vec2, PropValue::Vec2(v)) => dg.add_vec2(*v),
        (PropKind::Vec3, PropValue::Vec3(v)) => dg.add_vec3(*v),
        (PropKind::Vec4, PropValue::Vec4(v)) => dg.add_vec4(*v),
        // Callers check `accepts` first; a mismatch writes the kind's default
        // so the stream stays aligned with what the receiver will read.
        (kind, _) => return encode_value(kind, &kind.default_value(), dg),
    }
    Ok(())
}

/// Reads one value with the encoding of `kind`.
pub fn decode_value(kind: PropKind, dgi: &mut DatagramIterator<'_>) -> Result<PropValue, DatagramError> {
    Ok(match kind {
        PropKind::Int8 => PropValue::I8(dgi.get_i8()?),
        PropKind::Int16 => PropValue::I16(dgi.get_i16()?),
        PropKind::Int32 => PropValue::I32(dgi.get_i32()?),
        PropKind::Int64 => PropValue::I64(dgi.get_i64()?),
        PropKind::Uint8 => PropValue::U8(dgi.get_u8()?),
        PropKind::Uint16 => PropValue::U16(dgi.get_u16()?),
        PropKind::Uint32 => PropValue::U32(dgi.get_u32()?),
        PropKind::Uint64 => PropValue::U64(dgi.get_u64()?),
        PropKind::Float32 => PropValue::F32(dgi.get_f32()?),
        PropKind::Float64 => PropValue::F64(dgi.get_f64()?),
        PropKind::String => PropValue::Str(dgi.get_string()?),
        PropKind::CString(width) => PropValue::Str(dgi.get_fixed_string(width)?),
        PropKind::Vec2 => PropValue::Vec2(dgi.get_vec2()?),
        PropKind::Vec3 => PropValue::Vec3(dgi.get_vec3()?),
        PropKind::Vec4 => PropValue::Vec4(dgi.get_vec4()?),
    })
}

/// Rust types that can back a replicated field.
pub trait NetValue: Clone + PartialEq + Sized {
    const KIND: PropKind;

    fn into_prop(self) -> PropValue;
    fn from_prop(value: &PropValue) -> Option<Self>;
}

macro_rules! impl_net_value {
    ($ty:ty, $kind:ident, $variant:ident) => {
        impl NetValue for $ty {
            const KIND: PropKind = PropKind::$kind;

            fn into_prop(self) -> PropValue {
                PropValue::$variant(self)
            }

            fn from_prop(value: &PropValue) -> Option<Self> {
                match value {
                    PropValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_net_value!(i8, Int8, I8);
impl_net_value!(i16, Int16, I16);
impl_net_value!(i32, Int32, I32);
impl_net_value!(i64, Int64, I64);
impl_net_value!(u8, Uint8, U8);
impl_net_value!(u16, Uint16, U16);
impl_net_value!(u32, Uint32, U32);
impl_net_value!(u64, Uint64, U64);
impl_net_value!(f32, Float32, F32);
impl_net_value!(f64, Float64, F64);
impl_net_value!(String, String, Str);
impl_net_value!(Vec2, Vec2, Vec2);
impl_net_value!(Vec3, Vec3, Vec3);
impl_net_value!(Vec4, Vec4, Vec4);

/// Typed handle to a field slot of an entity class.
///
/// The index is the field's position in the class table; base fields come
/// first, so subclasses continue numbering where their base table stops.
pub struct NetField<T> {
    index: u16,
    _marker: PhantomData<fn() -> T>,
}

impl<T> NetField<T> {
    pub const fn new(index: u16) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    pub const fn index(self) -> u16 {
        self.index
    }
}

impl<T> Clone for NetField<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NetField<T> {}

impl<T> fmt::Debug for NetField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetField({})", self.index)
    }
}

impl<T> PartialEq for NetField<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for NetField<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(kind: PropKind, value: PropValue) -> PropValue {
        let mut dg = Datagram::new();
        encode_value(kind, &value, &mut dg).unwrap();
        let mut dgi = DatagramIterator::new(dg.as_bytes());
        let decoded = decode_value(kind, &mut dgi).unwrap();
        assert_eq!(dgi.remaining(), 0, "{kind:?} left bytes unread");
        decoded
    }

    #[test]
    fn every_kind_decodes_what_it_encodes() {
        let cases = [
            (PropKind::Int8, PropValue::I8(i8::MIN)),
            (PropKind::Int16, PropValue::I16(-12_345)),
            (PropKind::Int32, PropValue::I32(i32::MIN + 7)),
            (PropKind::Int64, PropValue::I64(i64::MAX - 3)),
            (PropKind::Uint8, PropValue::U8(u8::MAX)),
            (PropKind::Uint16, PropValue::U16(54_321)),
            (PropKind::Uint32, PropValue::U32(0xDEAD_BEEF)),
            (PropKind::Uint64, PropValue::U64(u64::MAX)),
            (PropKind::Float32, PropValue::F32(-0.1)),
            (PropKind::Float64, PropValue::F64(std::f64::consts::PI)),
            (PropKind::String, PropValue::Str("weapon_crowbar".into())),
            (PropKind::Vec2, PropValue::Vec2(Vec2::new(1.5, -2.25))),
            (PropKind::Vec3, PropValue::Vec3(Vec3::new(128.0, -64.5, 0.125))),
            (PropKind::Vec4, PropValue::Vec4(Vec4::new(0.0, 0.0, 0.7071, 0.7071))),
        ];

        for (kind, value) in cases {
            assert_eq!(roundtrip(kind, value.clone()), value, "{kind:?}");
        }
    }

    #[test]
    fn float_bits_survive() {
        let value = PropValue::F32(f32::from_bits(0x3F80_0001));
        match roundtrip(PropKind::Float32, value) {
            PropValue::F32(v) => assert_eq!(v.to_bits(), 0x3F80_0001),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cstring_is_fixed_width() {
        let mut dg = Datagram::new();
        encode_value(PropKind::CString(8), &PropValue::Str("func_door_rotating".into()), &mut dg)
            .unwrap();
        assert_eq!(dg.len(), 8);

        let value = roundtrip(PropKind::CString(16), PropValue::Str("light".into()));
        assert_eq!(value, PropValue::Str("light".into()));
    }

    #[test]
    fn net_value_kinds() {
        assert_eq!(<Vec3 as NetValue>::KIND, PropKind::Vec3);
        assert_eq!(u32::from_prop(&PropValue::U32(9)), Some(9));
        assert_eq!(u32::from_prop(&PropValue::I32(9)), None);
        assert!(PropKind::CString(4).accepts(&PropValue::Str(String::new())));
        assert!(PropKind::String.same_storage(PropKind::CString(32)));
    }
}
