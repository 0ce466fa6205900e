//! The numeric tower. Arithmetic happens on [Num], wide enough to hold every
//! fixnum and boxed 64 bit integer, and the result is narrowed back to the
//! smallest representation by [crate::Runtime::number].

use std::cmp::Ordering;

use crate::types::NumType;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i128),
    Float(f64),
}

impl Num {
    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(f) => f,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Num::Float(_))
    }

    fn int_op(self, other: Num, int: fn(i128, i128) -> Option<i128>, float: fn(f64, f64) -> f64) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => match int(a, b) {
                Some(n) => Num::Int(n),
                None => Num::Float(float(a as f64, b as f64)),
            },
            (a, b) => Num::Float(float(a.as_f64(), b.as_f64())),
        }
    }

    pub fn add(self, other: Num) -> Num {
        self.int_op(other, i128::checked_add, |a, b| a + b)
    }

    pub fn sub(self, other: Num) -> Num {
        self.int_op(other, i128::checked_sub, |a, b| a - b)
    }

    pub fn mul(self, other: Num) -> Num {
        self.int_op(other, i128::checked_mul, |a, b| a * b)
    }

    /// Exact integer quotients stay integers, anything else becomes a float.
    /// Returns [None] for an integer division by zero.
    pub fn div(self, other: Num) -> Option<Num> {
        match (self, other) {
            (Num::Int(_), Num::Int(0)) => None,
            (Num::Int(a), Num::Int(b)) if a % b == 0 => Some(Num::Int(a / b)),
            (a, b) => Some(Num::Float(a.as_f64() / b.as_f64())),
        }
    }

    pub fn compare(self, other: Num) -> Option<Ordering> {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

impl NumType {
    pub(crate) fn read(self, bytes: &[u8]) -> Num {
        match self {
            NumType::Int8 => Num::Int(i8::from_ne_bytes(array(bytes)) as i128),
            NumType::Uint8 => Num::Int(bytes[0] as i128),
            NumType::Int16 => Num::Int(i16::from_ne_bytes(array(bytes)) as i128),
            NumType::Uint16 => Num::Int(u16::from_ne_bytes(array(bytes)) as i128),
            NumType::Int32 => Num::Int(i32::from_ne_bytes(array(bytes)) as i128),
            NumType::Uint32 => Num::Int(u32::from_ne_bytes(array(bytes)) as i128),
            NumType::Int64 => Num::Int(i64::from_ne_bytes(array(bytes)) as i128),
            NumType::Uint64 => Num::Int(u64::from_ne_bytes(array(bytes)) as i128),
            NumType::Float => Num::Float(f32::from_ne_bytes(array(bytes)) as f64),
            NumType::Double => Num::Float(f64::from_ne_bytes(array(bytes))),
        }
    }

    /// Stores `num` with C conversion rules: integers wrap, floats truncate.
    pub(crate) fn write(self, num: Num, out: &mut [u8]) {
        let int = match num {
            Num::Int(n) => n,
            Num::Float(f) => f as i128,
        };
        match self {
            NumType::Int8 => out[..1].copy_from_slice(&(int as i8).to_ne_bytes()),
            NumType::Uint8 => out[..1].copy_from_slice(&(int as u8).to_ne_bytes()),
            NumType::Int16 => out[..2].copy_from_slice(&(int as i16).to_ne_bytes()),
            NumType::Uint16 => out[..2].copy_from_slice(&(int as u16).to_ne_bytes()),
            NumType::Int32 => out[..4].copy_from_slice(&(int as i32).to_ne_bytes()),
            NumType::Uint32 => out[..4].copy_from_slice(&(int as u32).to_ne_bytes()),
            NumType::Int64 => out[..8].copy_from_slice(&(int as i64).to_ne_bytes()),
            NumType::Uint64 => out[..8].copy_from_slice(&(int as u64).to_ne_bytes()),
            NumType::Float => out[..4].copy_from_slice(&(num.as_f64() as f32).to_ne_bytes()),
            NumType::Double => out[..8].copy_from_slice(&num.as_f64().to_ne_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_degrades_to_float() {
        let big = Num::Int(u64::MAX as i128);
        assert!(big.mul(big).is_float());
        assert_eq!(Num::Int(2).add(Num::Int(3)), Num::Int(5));
    }

    #[test]
    fn test_division() {
        assert_eq!(Num::Int(6).div(Num::Int(3)), Some(Num::Int(2)));
        assert_eq!(Num::Int(7).div(Num::Int(2)), Some(Num::Float(3.5)));
        assert_eq!(Num::Int(1).div(Num::Int(0)), None);
        assert_eq!(Num::Float(1.0).div(Num::Int(0)), Some(Num::Float(f64::INFINITY)));
    }

    #[test]
    fn test_write_wraps_like_c() {
        let mut out = [0; 8];
        NumType::Uint8.write(Num::Int(300), &mut out);
        assert_eq!(NumType::Uint8.read(&out), Num::Int(44));
        NumType::Int16.write(Num::Float(-2.75), &mut out);
        assert_eq!(NumType::Int16.read(&out), Num::Int(-2));
    }
}
