use glam::{Vec2, Vec3, Vec4};

/// Errors raised while reading a datagram.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatagramError {
    #[error("datagram truncated: needed {needed} bytes at offset {offset}, {remaining} remaining")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },
    #[error("string at offset {offset} is not valid utf-8")]
    InvalidString { offset: usize },
    #[error("string of {0} bytes exceeds the u16 length prefix")]
    StringTooLong(usize),
}

/// Growable little-endian message buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Datagram {
    data: Vec<u8>,
}

impl Datagram {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn add_bool(&mut self, value: bool) {
        self.data.push(value as u8);
    }

    pub fn add_i8(&mut self, value: i8) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_i16(&mut self, value: i16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_i64(&mut self, value: i64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn add_u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_f32(&mut self, value: f32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_f64(&mut self, value: f64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u16 length prefix followed by the raw bytes.
    pub fn add_string(&mut self, value: &str) -> Result<(), DatagramError> {
        let len = u16::try_from(value.len()).map_err(|_| DatagramError::StringTooLong(value.len()))?;
        self.add_u16(len);
        self.data.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Writes exactly `width` bytes: the string truncated or NUL padded.
    pub fn add_fixed_string(&mut self, value: &str, width: usize) {
        let mut take = value.len().min(width);
        while !value.is_char_boundary(take) {
            take -= 1;
        }
        self.data.extend_from_slice(&value.as_bytes()[..take]);
        self.data.resize(self.data.len() + (width - take), 0);
    }

    pub fn add_vec2(&mut self, value: Vec2) {
        self.add_f32(value.x);
        self.add_f32(value.y);
    }

    pub fn add_vec3(&mut self, value: Vec3) {
        self.add_f32(value.x);
        self.add_f32(value.y);
        self.add_f32(value.z);
    }

    pub fn add_vec4(&mut self, value: Vec4) {
        self.add_f32(value.x);
        self.add_f32(value.y);
        self.add_f32(value.z);
        self.add_f32(value.w);
    }

    pub fn append_data(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }
}

/// Read cursor over a received datagram.
#[derive(Debug, Clone)]
pub struct DatagramIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

macro_rules! read_le {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> Result<$ty, DatagramError> {
            let bytes = self.take(std::mem::size_of::<$ty>())?;
            let mut raw = [0u8; std::mem::size_of::<$ty>()];
            raw.copy_from_slice(bytes);
            Ok(<$ty>::from_le_bytes(raw))
        }
    };
}

impl<'a> DatagramIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], DatagramError> {
        if self.remaining() < needed {
            return Err(DatagramError::Truncated {
                offset: self.offset,
                needed,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(slice)
    }

    read_le!(get_i8, i8);
    read_le!(get_i16, i16);
    read_le!(get_i32, i32);
    read_le!(get_i64, i64);
    read_le!(get_u8, u8);
    read_le!(get_u16, u16);
    read_le!(get_u32, u32);
    read_le!(get_u64, u64);
    read_le!(get_f32, f32);
    read_le!(get_f64, f64);

    pub fn get_bool(&mut self) -> Result<bool, DatagramError> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_string(&mut self) -> Result<String, DatagramError> {
        let len = self.get_u16()? as usize;
        let start = self.offset;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DatagramError::InvalidString { offset: start })
    }

    /// Reads `width` bytes and stops at the first NUL.
    pub fn get_fixed_string(&mut self, width: usize) -> Result<String, DatagramError> {
        let start = self.offset;
        let bytes = self.take(width)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(width);
        std::str::from_utf8(&bytes[..end])
            .map(str::to_owned)
            .map_err(|_| DatagramError::InvalidString { offset: start })
    }

    pub fn get_vec2(&mut self) -> Result<Vec2, DatagramError> {
        Ok(Vec2::new(self.get_f32()?, self.get_f32()?))
    }

    pub fn get_vec3(&mut self) -> Result<Vec3, DatagramError> {
        Ok(Vec3::new(self.get_f32()?, self.get_f32()?, self.get_f32()?))
    }

    pub fn get_vec4(&mut self) -> Result<Vec4, DatagramError> {
        Ok(Vec4::new(
            self.get_f32()?,
            self.get_f32()?,
            self.get_f32()?,
            self.get_f32()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_prefix_and_fixed_width() {
        let mut dg = Datagram::new();
        dg.add_string("origin").unwrap();
        dg.add_fixed_string("abcdef", 4);
        dg.add_fixed_string("ab", 4);

        assert_eq!(dg.len(), 2 + 6 + 4 + 4);

        let mut dgi = DatagramIterator::new(dg.as_bytes());
        assert_eq!(dgi.get_string().unwrap(), "origin");
        assert_eq!(dgi.get_fixed_string(4).unwrap(), "abcd");
        assert_eq!(dgi.get_fixed_string(4).unwrap(), "ab");
        assert_eq!(dgi.remaining(), 0);
    }

    #[test]
    fn truncated_read_reports_offset() {
        let mut dg = Datagram::new();
        dg.add_u16(7);

        let mut dgi = DatagramIterator::new(dg.as_bytes());
        assert_eq!(dgi.get_u16().unwrap(), 7);
        assert_eq!(
            dgi.get_u32(),
            Err(DatagramError::Truncated {
                offset: 2,
                needed: 4,
                remaining: 0
            })
        );
    }

    #[test]
    fn little_endian_layout() {
        let mut dg = Datagram::new();
        dg.add_u32(0x0102_0304);
        assert_eq!(dg.as_bytes(), &[4, 3, 2, 1]);
    }
}
