//! Variables and compile-time constants (spec.md §3).
//!
//! Grounded on `gwcc/il.py`'s `Variable`/`Constant`/`CompiledValue`/
//! `CompiledValueType`.

use crate::common::Id;
use crate::types::Types;

/// A named, typed IR value carrying a reference level (0 for scalar, 1 for
/// pointer, 2 for pointer-to-pointer, ...) and the type it points to when
/// `ref_level > 0`. Variables compare and hash by `(name, type, ref_level,
/// ref_type)`, exactly as in the original.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable {
    pub name: Id,
    pub typ: Types,
    pub ref_level: u32,
    pub ref_type: Option<Types>,
}

impl Variable {
    pub fn new(name: Id, typ: Types, ref_level: u32, ref_type: Option<Types>) -> Self {
        if ref_level == 0 {
            assert!(ref_type.is_none(), "scalar variable must not carry a pointed-to type");
        } else {
            assert!(ref_type.is_some(), "pointer variable must carry a pointed-to type");
        }
        Variable {
            name,
            typ,
            ref_level,
            ref_type,
        }
    }

    /// Construct a plain scalar variable (`ref_level == 0`).
    pub fn scalar(name: Id, typ: Types) -> Self {
        Variable::new(name, typ, 0, None)
    }

    /// Reserved names (compiler-synthesized temporaries, return slots,
    /// locals, parameters) are exempt from the def-before-use check in
    /// `Function::verify` (spec.md §3, §4.4).
    pub fn is_reserved(&self) -> bool {
        self.name.starts_with('_')
    }
}

impl std::fmt::Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.typ == Types::Ptr {
            write!(
                f,
                "{}{}.{}",
                self.ref_type.expect("ptr variable always carries a pointed-to type"),
                "*".repeat(self.ref_level as usize),
                self.name
            )
        } else {
            write!(f, "{}.{}", self.typ, self.name)
        }
    }
}

/// A tagged compile-time value for the backend to emit, before it is
/// paired with an IR type. Grounded on `gwcc/il.py`'s `CompiledValue`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompiledValue {
    /// A plain integer, stored in its full machine-word width.
    Integer(i64),
    /// A string literal expanded character-by-character with an appended
    /// NUL (spec.md §8 scenario 6).
    WordArray(Vec<i64>),
    /// The address of a named global, resolved at link time.
    Pointer(Id),
}

impl std::fmt::Display for CompiledValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompiledValue::Integer(v) => write!(f, "{v}"),
            CompiledValue::WordArray(words) => write!(f, "{words:?}"),
            CompiledValue::Pointer(name) => write!(f, "&{name}"),
        }
    }
}

/// A compile-time value paired with its IR type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constant {
    pub value: CompiledValue,
    pub typ: Types,
}

impl Constant {
    pub fn new(value: CompiledValue, typ: Types) -> Self {
        Constant { value, typ }
    }

    pub fn int(value: i64, typ: Types) -> Self {
        Constant::new(CompiledValue::Integer(value), typ)
    }
}

impl std::fmt::Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.typ, self.value)
    }
}

/// A string literal, expanded character-by-character with a trailing NUL,
/// per spec.md §8 scenario 6.
pub fn word_array_from_str(s: &str) -> Vec<i64> {
    let mut words: Vec<i64> = s.chars().map(|c| c as i64).collect();
    words.push(0);
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;

    #[test]
    fn display_scalar() {
        let v = Variable::scalar(id("x"), Types::Int);
        assert_eq!(v.to_string(), "int.x");
    }

    #[test]
    fn display_pointer() {
        let v = Variable::new(id("p"), Types::Ptr, 1, Some(Types::Int));
        assert_eq!(v.to_string(), "int*.p");
    }

    #[test]
    fn word_array_appends_nul() {
        assert_eq!(word_array_from_str("hi"), vec![104, 105, 0]);
    }
}
