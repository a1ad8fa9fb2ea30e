//! The closed value-type and operator model
//!
//! Every value the emitter produces carries exactly one `ValueType`.
//! Operators validate their operand types before any instruction is
//! emitted; implicit widening is allowed integer-to-integer and
//! integer-to-float, narrowing always requires an explicit cast.

use crate::error::{EmitError, EmitResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Temporary (virtual register) identifier
pub type TempId = u32;

/// Basic block identifier, scoped to its owning function
pub type BlockId = u32;

/// The closed set of value types the emitter understands
///
/// `Char8` is the character element type; a string value is a pointer to
/// interned `Char8` global data. Pointers are parameterized by their
/// element type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Void,
    /// 8-bit integer (byte)
    Byte,
    /// 16-bit integer
    Int16,
    /// 32-bit integer
    Int32,
    /// 64-bit integer
    Int64,
    /// 64-bit float
    Double,
    /// Character; string data is a pointer to these
    Char8,
    /// Pointer to element type
    Ptr(Box<ValueType>),
}

impl ValueType {
    /// Check if this is an integer type
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ValueType::Byte | ValueType::Int16 | ValueType::Int32 | ValueType::Int64
        )
    }

    /// Check if this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, ValueType::Double)
    }

    /// Check if this is a scalar arithmetic type
    pub fn is_arithmetic(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Check if this is a pointer type
    pub fn is_pointer(&self) -> bool {
        matches!(self, ValueType::Ptr(_))
    }

    /// Get the size of this type in bytes on the target
    pub fn size_in_bytes(&self) -> Option<u64> {
        match self {
            ValueType::Void => None,
            ValueType::Byte | ValueType::Char8 => Some(1),
            ValueType::Int16 => Some(2),
            ValueType::Int32 => Some(4),
            ValueType::Int64 => Some(8),
            ValueType::Double => Some(8),
            // 32-bit pointers on the embedded targets we lower for
            ValueType::Ptr(_) => Some(4),
        }
    }

    /// Get the element type for pointers
    pub fn element_type(&self) -> Option<&ValueType> {
        match self {
            ValueType::Ptr(elem) => Some(elem),
            _ => None,
        }
    }

    /// Build a pointer to this type
    pub fn ptr_to(self) -> ValueType {
        ValueType::Ptr(Box::new(self))
    }

    /// Widening rank among the integer types
    fn int_rank(&self) -> Option<u8> {
        match self {
            ValueType::Byte => Some(0),
            ValueType::Int16 => Some(1),
            ValueType::Int32 => Some(2),
            ValueType::Int64 => Some(3),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Void => write!(f, "void"),
            ValueType::Byte => write!(f, "byte"),
            ValueType::Int16 => write!(f, "int16"),
            ValueType::Int32 => write!(f, "int32"),
            ValueType::Int64 => write!(f, "int64"),
            ValueType::Double => write!(f, "double"),
            ValueType::Char8 => write!(f, "char8"),
            ValueType::Ptr(elem) => write!(f, "{}*", elem),
        }
    }
}

/// Compute the implicitly promoted type of a binary operation
///
/// Integer operands widen to the wider operand; any double operand promotes
/// the whole operation to double. Anything else is a type mismatch and the
/// caller must cast explicitly.
pub fn promote(lhs: &ValueType, rhs: &ValueType) -> EmitResult<ValueType> {
    if !lhs.is_arithmetic() || !rhs.is_arithmetic() {
        return Err(EmitError::type_mismatch(format!(
            "no implicit promotion between {} and {}",
            lhs, rhs
        )));
    }
    if lhs.is_float() || rhs.is_float() {
        return Ok(ValueType::Double);
    }
    // Both integers; widen to the higher rank
    let lr = lhs.int_rank().unwrap();
    let rr = rhs.int_rank().unwrap();
    Ok(if lr >= rr { lhs.clone() } else { rhs.clone() })
}

/// Binary arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorType {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl fmt::Display for OperatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op_str = match self {
            OperatorType::Add => "add",
            OperatorType::Subtract => "subtract",
            OperatorType::Multiply => "multiply",
            OperatorType::Divide => "divide",
            OperatorType::Modulo => "modulo",
        };
        write!(f, "{}", op_str)
    }
}

/// Comparison operators; every comparison produces a 1-bit value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonType {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl fmt::Display for ComparisonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op_str = match self {
            ComparisonType::Eq => "eq",
            ComparisonType::Neq => "neq",
            ComparisonType::Lt => "lt",
            ComparisonType::Lte => "lte",
            ComparisonType::Gt => "gt",
            ComparisonType::Gte => "gte",
        };
        write!(f, "{}", op_str)
    }
}

/// A function argument: name and type
pub type NamedValueType = (String, ValueType);

/// Named argument list for function declarations
pub type NamedValueTypeList = Vec<NamedValueType>;

/// Unnamed argument type list
pub type ValueTypeList = Vec<ValueType>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_type_sizes() {
        assert_eq!(ValueType::Byte.size_in_bytes(), Some(1));
        assert_eq!(ValueType::Int16.size_in_bytes(), Some(2));
        assert_eq!(ValueType::Int32.size_in_bytes(), Some(4));
        assert_eq!(ValueType::Int64.size_in_bytes(), Some(8));
        assert_eq!(ValueType::Double.size_in_bytes(), Some(8));
        assert_eq!(ValueType::Void.size_in_bytes(), None);
        assert_eq!(ValueType::Int32.ptr_to().size_in_bytes(), Some(4));
    }

    #[test]
    fn test_type_classification() {
        assert!(ValueType::Byte.is_integer());
        assert!(ValueType::Int64.is_integer());
        assert!(!ValueType::Double.is_integer());
        assert!(ValueType::Double.is_float());
        assert!(ValueType::Int32.is_arithmetic());
        assert!(!ValueType::Char8.is_arithmetic());
        assert!(ValueType::Double.ptr_to().is_pointer());
    }

    #[test]
    fn test_promotion_widens_integers() {
        assert_eq!(
            promote(&ValueType::Byte, &ValueType::Int32).unwrap(),
            ValueType::Int32
        );
        assert_eq!(
            promote(&ValueType::Int64, &ValueType::Int16).unwrap(),
            ValueType::Int64
        );
        assert_eq!(
            promote(&ValueType::Int32, &ValueType::Int32).unwrap(),
            ValueType::Int32
        );
    }

    #[test]
    fn test_promotion_prefers_double() {
        assert_eq!(
            promote(&ValueType::Int32, &ValueType::Double).unwrap(),
            ValueType::Double
        );
        assert_eq!(
            promote(&ValueType::Double, &ValueType::Byte).unwrap(),
            ValueType::Double
        );
    }

    #[test]
    fn test_promotion_rejects_non_arithmetic() {
        assert!(promote(&ValueType::Void, &ValueType::Int32).is_err());
        assert!(promote(&ValueType::Int32.ptr_to(), &ValueType::Int32).is_err());
        assert!(promote(&ValueType::Char8, &ValueType::Char8).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ValueType::Int32.to_string(), "int32");
        assert_eq!(ValueType::Double.ptr_to().to_string(), "double*");
        assert_eq!(OperatorType::Modulo.to_string(), "modulo");
        assert_eq!(ComparisonType::Lte.to_string(), "lte");
    }
}
