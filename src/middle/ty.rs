use itertools::Itertools;

/// Largest number of fields a tuple may have. The tag reserves six bits for
/// the length and the pointer mask starts at bit 7.
pub const MAX_TUPLE_FIELDS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// 1, -5, 42
    Int,
    /// true, false
    Bool,
    /// (int, bool, (int,))
    ///
    /// A pointer to a fixed size heap allocation with a one word header
    Tuple(Vec<Type>),
    /// fn(int, bool) -> int
    ///
    /// A pointer to the entry label of a top level function
    Function {
        parameters: Vec<Type>,
        output: Box<Type>,
    },
}

impl Type {
    pub fn function(parameters: impl IntoIterator<Item = Type>, output: Type) -> Self {
        Self::Function {
            parameters: parameters.into_iter().collect(),
            output: Box::new(output),
        }
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Type::Tuple(_))
    }

    /// Whether a value of this type may be passed to `print`
    pub fn is_printable(&self) -> bool {
        matches!(self, Type::Int | Type::Bool)
    }

    /// Bytes needed on the heap for a tuple with these fields, header included
    pub fn tuple_allocation_size(fields: &[Type]) -> usize {
        8 * (fields.len() + 1)
    }

    /// The header word written in front of every heap tuple. Bit 0 marks the
    /// object as not yet forwarded, bits 1 to 6 hold the length and bit `7 + i`
    /// is set when field `i` is itself a tuple pointer.
    pub fn tuple_tag(fields: &[Type]) -> i64 {
        let pointer_mask = fields
            .iter()
            .enumerate()
            .filter(|(_, ty)| ty.is_tuple())
            .fold(0i64, |mask, (i, _)| mask | (1 << i));

        (pointer_mask << 7) | ((fields.len() as i64) << 1) | 1
    }
}

impl core::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "bool"),
            Type::Tuple(fields) if fields.len() == 1 => write!(f, "({},)", fields[0]),
            Type::Tuple(fields) => write!(f, "({})", fields.iter().join(", ")),
            Type::Function { parameters, output } => {
                write!(f, "fn({}) -> {output}", parameters.iter().join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_encodes_length_and_pointer_mask() {
        let fields = [Type::Int, Type::Tuple(vec![Type::Int]), Type::Bool];

        let tag = Type::tuple_tag(&fields);

        assert_eq!(tag & 1, 1);
        assert_eq!((tag >> 1) & 0b11_1111, 3);
        assert_eq!(tag >> 7, 0b010);
    }

    #[test]
    fn allocation_size_includes_header() {
        assert_eq!(Type::tuple_allocation_size(&[Type::Int, Type::Int]), 24);
        assert_eq!(Type::tuple_allocation_size(&[]), 8);
    }

    #[test]
    fn display() {
        let ty = Type::function(
            [Type::Int, Type::Tuple(vec![Type::Bool])],
            Type::Tuple(vec![Type::Int, Type::Int]),
        );

        assert_eq!(ty.to_string(), "fn(int, (bool,)) -> (int, int)");
    }
}
