//! Discovered value types.
//!
//! Every temp, constant and operator node carries a [`Type`]. Type inference
//! refines it from [`Type::UNKNOWN`] towards a single flag; merges at phis may
//! set several flags at once, which [`Type::merge_phi`] collapses back to a
//! single representation.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Lattice of value representations known to the code generator.
    ///
    /// The empty set is the unknown type. A value whose type has more than one
    /// flag set is only ever seen transiently while a phi is being typed.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Type : u16 {
        /// The `undefined` value.
        const UNDEFINED = 1 << 0;
        /// The `null` value.
        const NULL = 1 << 1;
        /// A boolean.
        const BOOL = 1 << 2;
        /// A signed 32-bit integer.
        const SINT32 = 1 << 3;
        /// An unsigned 32-bit integer.
        const UINT32 = 1 << 4;
        /// An IEEE-754 double.
        const DOUBLE = 1 << 5;
        /// A string.
        const STRING = 1 << 6;
        /// An object whose shape is known statically.
        const OBJECT = 1 << 7;
        /// Any value; the fully generic representation.
        const VAR = 1 << 8;

        /// Any of the numeric representations.
        const NUMBER = Self::SINT32.bits() | Self::UINT32.bits() | Self::DOUBLE.bits();
    }
}

impl Type {
    /// No information yet.
    pub const UNKNOWN: Type = Type::empty();

    /// Returns `true` if nothing is known about the type.
    #[must_use]
    pub fn is_unknown(self) -> bool {
        self.is_empty()
    }

    /// Returns `true` if the type is one or more numeric representations and nothing else.
    #[must_use]
    pub fn is_number(self) -> bool {
        self.intersects(Type::NUMBER) && (self - Type::NUMBER).is_empty()
    }

    /// Returns `true` if the type needs the generic boxed representation
    /// (strings, objects and untyped values).
    #[must_use]
    pub fn is_boxed(self) -> bool {
        self == Type::VAR || self == Type::STRING || self == Type::OBJECT
    }

    /// Collapses the union of incoming phi types into one representation.
    ///
    /// A single flag (or unknown) is returned unchanged; a purely numeric mix
    /// becomes `DOUBLE`; any other mix becomes `VAR`.
    #[must_use]
    pub fn merge_phi(self) -> Type {
        if self.bits().count_ones() <= 1 {
            self
        } else if self.is_number() {
            Type::DOUBLE
        } else {
            Type::VAR
        }
    }

    /// Short name used by the IR printer.
    #[must_use]
    pub fn name(self) -> &'static str {
        const NAMES: [(Type, &str); 9] = [
            (Type::UNDEFINED, "undefined"),
            (Type::NULL, "null"),
            (Type::BOOL, "bool"),
            (Type::SINT32, "int32"),
            (Type::UINT32, "uint32"),
            (Type::DOUBLE, "double"),
            (Type::STRING, "string"),
            (Type::OBJECT, "object"),
            (Type::VAR, "var"),
        ];

        if self.is_unknown() {
            return "unknown";
        }
        if let Some((_, name)) = NAMES.iter().find(|(ty, _)| *ty == self) {
            return name;
        }
        if self.is_number() {
            "number"
        } else {
            "mixed"
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({})", self.name())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
