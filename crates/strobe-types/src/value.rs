use std::fmt;

const NUMBER_TAG: u64 = 0xffff_0000_0000_0000;
const OTHER_TAG: u64 = 0x2;
const BOOL_TAG: u64 = 0x4;
const UNDEFINED_TAG: u64 = 0x8;
const DOUBLE_ENCODE_OFFSET: u64 = 1 << 48;

const VALUE_EMPTY: u64 = 0x0;
const VALUE_NULL: u64 = OTHER_TAG;
const VALUE_FALSE: u64 = OTHER_TAG | BOOL_TAG;
const VALUE_TRUE: u64 = OTHER_TAG | BOOL_TAG | 1;
const VALUE_UNDEFINED: u64 = OTHER_TAG | UNDEFINED_TAG;

/// Address of a heap cell. Only meaningful once the heap has confirmed it is live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellAddress(u64);

impl CellAddress {
    pub const fn new(address: u64) -> Self {
        Self(address)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Base address of the aligned block of `block_size` bytes holding this cell.
    pub const fn block_base(self, block_size: u64) -> u64 {
        self.0 & !(block_size - 1)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell@0x{:x}", self.0)
    }
}

/// Raw 64-bit encoding of an engine value, as read out of a call frame's callee slot.
///
/// Nothing about the bit pattern is trusted until [`EncodedValue::decode`] has
/// classified it and, for cells, the heap has confirmed the address is live.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncodedValue(u64);

impl EncodedValue {
    pub const EMPTY: Self = Self(VALUE_EMPTY);
    pub const NULL: Self = Self(VALUE_NULL);
    pub const UNDEFINED: Self = Self(VALUE_UNDEFINED);
    pub const TRUE: Self = Self(VALUE_TRUE);
    pub const FALSE: Self = Self(VALUE_FALSE);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn from_cell(cell: CellAddress) -> Self {
        debug_assert!(
            cell.get() & (NUMBER_TAG | OTHER_TAG) == 0 && cell.get() != 0,
            "cell addresses must be aligned and below the number tag"
        );
        Self(cell.get())
    }

    pub const fn from_int32(value: i32) -> Self {
        Self(NUMBER_TAG | (value as u32 as u64))
    }

    pub fn from_double(value: f64) -> Self {
        Self(value.to_bits().wrapping_add(DOUBLE_ENCODE_OFFSET))
    }

    pub const fn is_cell(self) -> bool {
        self.0 & (NUMBER_TAG | OTHER_TAG) == 0 && self.0 != VALUE_EMPTY
    }

    pub fn decode(self) -> Value {
        let bits = self.0;
        if bits & NUMBER_TAG == NUMBER_TAG {
            return Value::Int32(bits as u32 as i32);
        }
        if bits & NUMBER_TAG != 0 {
            return Value::Double(f64::from_bits(bits.wrapping_sub(DOUBLE_ENCODE_OFFSET)));
        }
        match bits {
            VALUE_EMPTY => Value::Empty,
            VALUE_NULL => Value::Null,
            VALUE_UNDEFINED => Value::Undefined,
            VALUE_TRUE => Value::Boolean(true),
            VALUE_FALSE => Value::Boolean(false),
            _ if self.is_cell() => Value::Cell(CellAddress(bits)),
            other => Value::Immediate(other),
        }
    }
}

impl fmt::Debug for EncodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedValue(0x{:016x})", self.0)
    }
}

/// A decoded engine value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    /// A candidate heap reference; it may point at freed or foreign memory.
    Cell(CellAddress),
    Int32(i32),
    Double(f64),
    Boolean(bool),
    Undefined,
    Null,
    Empty,
    /// Tagged bits with no known meaning.
    Immediate(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_distinguishes_cells_from_immediates() {
        let cell = CellAddress::new(0x10_0040);
        assert_eq!(EncodedValue::from_cell(cell).decode(), Value::Cell(cell));
        assert_eq!(EncodedValue::from_int32(-3).decode(), Value::Int32(-3));
        assert_eq!(EncodedValue::from_double(1.5).decode(), Value::Double(1.5));
        assert_eq!(EncodedValue::TRUE.decode(), Value::Boolean(true));
        assert_eq!(EncodedValue::FALSE.decode(), Value::Boolean(false));
        assert_eq!(EncodedValue::NULL.decode(), Value::Null);
        assert_eq!(EncodedValue::UNDEFINED.decode(), Value::Undefined);
        assert_eq!(EncodedValue::EMPTY.decode(), Value::Empty);
    }

    #[test]
    fn empty_and_tagged_values_are_never_cells() {
        assert!(!EncodedValue::EMPTY.is_cell());
        assert!(!EncodedValue::NULL.is_cell());
        assert!(!EncodedValue::from_int32(0).is_cell());
        assert!(!EncodedValue::from_double(0.0).is_cell());
        assert!(EncodedValue::from_bits(0x4000).is_cell());
    }

    #[test]
    fn block_base_masks_low_bits() {
        let cell = CellAddress::new(0x10_4060);
        assert_eq!(cell.block_base(0x4000), 0x10_4000);
    }
}
