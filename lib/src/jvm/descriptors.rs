use super::Error;
use crate::util::Width;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

/// Utility trait for converting descriptors to and from string representations
pub trait RenderDescriptor {
    /// Turn the descriptor into a string
    fn render(&self) -> String {
        let mut string = String::new();
        self.render_to(&mut string);
        string
    }

    /// Write the descriptor to a string
    fn render_to(&self, write_to: &mut String);
}

pub trait ParseDescriptor: Sized {
    /// Parse a descriptor from a string
    fn parse(source: &str) -> Result<Self, Error> {
        let mut chars = source.chars().peekable();
        let ret = Self::parse_from(&mut chars)?;
        match chars.next() {
            None => Ok(ret),
            Some(c) => Err(Error::BadDescriptor(format!(
                "unexpected leftover input '{}' in '{}'",
                c, source
            ))),
        }
    }

    /// Read the descriptor from a character buffer
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, Error>;
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    /// Internal name of the class boxing values of this type
    pub const fn wrapper_class(&self) -> &'static str {
        match self {
            BaseType::Byte => "java/lang/Byte",
            BaseType::Char => "java/lang/Character",
            BaseType::Double => "java/lang/Double",
            BaseType::Float => "java/lang/Float",
            BaseType::Int => "java/lang/Integer",
            BaseType::Long => "java/lang/Long",
            BaseType::Short => "java/lang/Short",
            BaseType::Boolean => "java/lang/Boolean",
        }
    }

    /// Primitive type boxed by a wrapper class
    pub fn from_wrapper_class(class_name: &str) -> Option<BaseType> {
        let base = match class_name {
            "java/lang/Byte" => BaseType::Byte,
            "java/lang/Character" => BaseType::Char,
            "java/lang/Double" => BaseType::Double,
            "java/lang/Float" => BaseType::Float,
            "java/lang/Integer" => BaseType::Int,
            "java/lang/Long" => BaseType::Long,
            "java/lang/Short" => BaseType::Short,
            "java/lang/Boolean" => BaseType::Boolean,
            _ => return None,
        };
        Some(base)
    }

    /// Java source name of the type
    pub const fn java_name(&self) -> &'static str {
        match self {
            BaseType::Byte => "byte",
            BaseType::Char => "char",
            BaseType::Double => "double",
            BaseType::Float => "float",
            BaseType::Int => "int",
            BaseType::Long => "long",
            BaseType::Short => "short",
            BaseType::Boolean => "boolean",
        }
    }
}

impl Width for BaseType {
    fn width(&self) -> usize {
        match self {
            BaseType::Byte
            | BaseType::Char
            | BaseType::Float
            | BaseType::Int
            | BaseType::Short
            | BaseType::Boolean => 1,
            BaseType::Double | BaseType::Long => 2,
        }
    }
}

impl RenderDescriptor for BaseType {
    fn render_to(&self, write_to: &mut String) {
        let c = match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        };
        write_to.push(c);
    }
}

impl ParseDescriptor for BaseType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, Error> {
        let typ = match source.next() {
            Some('B') => BaseType::Byte,
            Some('C') => BaseType::Char,
            Some('D') => BaseType::Double,
            Some('F') => BaseType::Float,
            Some('I') => BaseType::Int,
            Some('J') => BaseType::Long,
            Some('S') => BaseType::Short,
            Some('Z') => BaseType::Boolean,
            Some(c) => {
                let msg = format!("invalid base type character '{}'", c);
                return Err(Error::BadDescriptor(msg));
            }
            None => {
                let msg = String::from("missing base type character");
                return Err(Error::BadDescriptor(msg));
            }
        };
        Ok(typ)
    }
}

/// Generic array type
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ArrayType<T> {
    /// Additional dimensions (`A[]` has 0 additional dimensions, `A[][][][]` has 3)
    pub additional_dimensions: usize,

    /// Underlying element type (`A` is the underlying element type of `A[][]`)
    pub element_type: T,
}

impl<T> ArrayType<T> {
    /// Total number of dimensions in the array type
    ///
    /// This is always just `additional_dimensions + 1`
    pub const fn dimensions(&self) -> usize {
        self.additional_dimensions + 1
    }
}

impl<T: RenderDescriptor> RenderDescriptor for ArrayType<T> {
    fn render_to(&self, write_to: &mut String) {
        for _ in 0..=self.additional_dimensions {
            write_to.push('[');
        }
        self.element_type.render_to(write_to);
    }
}

/// Class name in its internal form (eg. `java/lang/Object`)
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ClassName(pub String);

impl RenderDescriptor for ClassName {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('L');
        write_to.push_str(&self.0);
        write_to.push(';');
    }
}

impl ParseDescriptor for ClassName {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, Error> {
        if let Some('L') = source.next() {
            let mut class_name = String::new();
            loop {
                let c: char = source.next().ok_or_else(|| {
                    Error::BadDescriptor(format!("missing terminator for 'L{}'", class_name))
                })?;
                if c == ';' {
                    if class_name.is_empty() {
                        return Err(Error::BadDescriptor(String::from("empty class name")));
                    }
                    return Ok(ClassName(class_name));
                } else {
                    class_name.push(c)
                }
            }
        } else {
            Err(Error::BadDescriptor(String::from(
                "expected object type to start with `L`",
            )))
        }
    }
}

/// Reference type
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum RefType {
    Object(ClassName),
    ObjectArray(ArrayType<ClassName>),
    PrimitiveArray(ArrayType<BaseType>),
}

impl RefType {
    /// Object type from an internal class name
    pub fn object(name: impl Into<String>) -> RefType {
        RefType::Object(ClassName(name.into()))
    }

    /// Reference type as it appears in `ldc`, `checkcast`, `anewarray` and friends
    ///
    /// Arrays use their descriptor, objects their plain internal name.
    pub fn from_internal_name(name: &str) -> Result<RefType, Error> {
        if name.starts_with('[') {
            RefType::parse(name)
        } else if name.is_empty() {
            Err(Error::BadDescriptor(String::from("empty class name")))
        } else {
            Ok(RefType::object(name))
        }
    }

    /// Inverse of `from_internal_name`
    pub fn internal_name(&self) -> String {
        match self {
            RefType::Object(ClassName(name)) => name.clone(),
            arr => arr.render(),
        }
    }

    /// Array whose elements have the given type
    pub fn array(field_type: FieldType) -> RefType {
        match field_type {
            FieldType::Base(element_type) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::Object(element_type)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::PrimitiveArray(arr)) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: arr.additional_dimensions + 1,
                element_type: arr.element_type,
            }),
            FieldType::Ref(RefType::ObjectArray(arr)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: arr.additional_dimensions + 1,
                element_type: arr.element_type,
            }),
        }
    }

    /// Type of the elements of an array type
    pub fn element_type(&self) -> Option<FieldType> {
        match self {
            RefType::Object(_) => None,
            RefType::PrimitiveArray(arr) if arr.additional_dimensions == 0 => {
                Some(FieldType::Base(arr.element_type))
            }
            RefType::ObjectArray(arr) if arr.additional_dimensions == 0 => {
                Some(FieldType::Ref(RefType::Object(arr.element_type.clone())))
            }
            RefType::PrimitiveArray(arr) => {
                Some(FieldType::Ref(RefType::PrimitiveArray(ArrayType {
                    additional_dimensions: arr.additional_dimensions - 1,
                    element_type: arr.element_type,
                })))
            }
            RefType::ObjectArray(arr) => Some(FieldType::Ref(RefType::ObjectArray(ArrayType {
                additional_dimensions: arr.additional_dimensions - 1,
                element_type: arr.element_type.clone(),
            }))),
        }
    }
}

impl RenderDescriptor for RefType {
    fn render_to(&self, write_to: &mut String) {
        match self {
            RefType::Object(cls) => cls.render_to(write_to),
            RefType::PrimitiveArray(arr) => arr.render_to(write_to),
            RefType::ObjectArray(arr) => arr.render_to(write_to),
        }
    }
}

impl ParseDescriptor for RefType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, Error> {
        Ok(match source.peek().copied() {
            Some('L') => RefType::Object(ClassName::parse_from(source)?),
            Some('[') => {
                source.next();
                let mut additional_dimensions = 0;
                while let Some('[') = source.peek().copied() {
                    additional_dimensions += 1;
                    source.next();
                }
                if let Some('L') = source.peek().copied() {
                    RefType::ObjectArray(ArrayType {
                        additional_dimensions,
                        element_type: ClassName::parse_from(source)?,
                    })
                } else {
                    RefType::PrimitiveArray(ArrayType {
                        additional_dimensions,
                        element_type: BaseType::parse_from(source)?,
                    })
                }
            }
            Some(c) => {
                let msg = format!("invalid reference type character '{}'", c);
                return Err(Error::BadDescriptor(msg));
            }
            None => return Err(Error::BadDescriptor(String::from("missing field type"))),
        })
    }
}

/// Type of a class, instance, or local variable
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType {
    Base(BaseType),
    Ref(RefType),
}

impl Width for FieldType {
    fn width(&self) -> usize {
        match self {
            FieldType::Base(base_type) => base_type.width(),
            FieldType::Ref(_) => 1,
        }
    }
}

impl FieldType {
    pub fn object(class_name: impl Into<String>) -> FieldType {
        FieldType::Ref(RefType::object(class_name))
    }

    pub fn array(field_type: FieldType) -> FieldType {
        FieldType::Ref(RefType::array(field_type))
    }

    pub const fn int() -> FieldType {
        FieldType::Base(BaseType::Int)
    }

    pub const fn long() -> FieldType {
        FieldType::Base(BaseType::Long)
    }

    pub const fn float() -> FieldType {
        FieldType::Base(BaseType::Float)
    }

    pub const fn double() -> FieldType {
        FieldType::Base(BaseType::Double)
    }

    pub const fn boolean() -> FieldType {
        FieldType::Base(BaseType::Boolean)
    }

    /// Type of `java.lang.String`
    pub fn string() -> FieldType {
        FieldType::object("java/lang/String")
    }

    /// Type of `java.lang.Object`
    pub fn java_object() -> FieldType {
        FieldType::object("java/lang/Object")
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Ref(_))
    }

    pub fn sort(&self) -> Sort {
        match self {
            FieldType::Base(BaseType::Boolean) => Sort::Boolean,
            FieldType::Base(BaseType::Char) => Sort::Char,
            FieldType::Base(BaseType::Byte) => Sort::Byte,
            FieldType::Base(BaseType::Short) => Sort::Short,
            FieldType::Base(BaseType::Int) => Sort::Int,
            FieldType::Base(BaseType::Float) => Sort::Float,
            FieldType::Base(BaseType::Long) => Sort::Long,
            FieldType::Base(BaseType::Double) => Sort::Double,
            FieldType::Ref(RefType::Object(_)) => Sort::Object,
            FieldType::Ref(_) => Sort::Array,
        }
    }
}

impl RenderDescriptor for FieldType {
    fn render_to(&self, write_to: &mut String) {
        match self {
            FieldType::Base(base_type) => base_type.render_to(write_to),
            FieldType::Ref(reference_type) => reference_type.render_to(write_to),
        }
    }
}

impl ParseDescriptor for FieldType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, Error> {
        match source.peek().copied() {
            None => Err(Error::BadDescriptor(String::from("missing field type"))),
            Some('B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z') => {
                BaseType::parse_from(source).map(FieldType::Base)
            }
            Some('L' | '[') => RefType::parse_from(source).map(FieldType::Ref),
            Some(c) => {
                let msg = format!("invalid field type character '{}'", c);
                Err(Error::BadDescriptor(msg))
            }
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Coarse classification of a type
///
/// The verifier does not distinguish between the `int`-like sorts, so when comparing what a
/// value was expected to be against what it is, compare `verification_sort`s.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Sort {
    Boolean,
    Char,
    Byte,
    Short,
    Int,
    Float,
    Long,
    Double,
    Array,
    Object,
}

impl Sort {
    /// Sort as tracked by the verifier
    pub const fn verification_sort(self) -> Sort {
        match self {
            Sort::Boolean | Sort::Char | Sort::Byte | Sort::Short | Sort::Int => Sort::Int,
            Sort::Float => Sort::Float,
            Sort::Long => Sort::Long,
            Sort::Double => Sort::Double,
            Sort::Array | Sort::Object => Sort::Object,
        }
    }
}

/// Signature of a method
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,
    pub return_type: Option<FieldType>, // `None` is for `void` (ie. no return)
}

impl MethodDescriptor {
    /// Total length of parameters (not the same as the length of the vector)
    pub fn parameter_length(&self, has_this_param: bool) -> usize {
        let this_len = if has_this_param { 1 } else { 0 };
        this_len + self.parameters.iter().map(Width::width).sum::<usize>()
    }

    /// Local variable slot holding a parameter on method entry
    pub fn parameter_slot(&self, index: usize, has_this_param: bool) -> usize {
        let this_len = if has_this_param { 1 } else { 0 };
        this_len
            + self
                .parameters
                .iter()
                .take(index)
                .map(Width::width)
                .sum::<usize>()
    }
}

impl RenderDescriptor for MethodDescriptor {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('(');
        for parameter in &self.parameters {
            parameter.render_to(write_to);
        }
        write_to.push(')');
        match &self.return_type {
            None => write_to.push('V'),
            Some(typ) => typ.render_to(write_to),
        };
    }
}

impl ParseDescriptor for MethodDescriptor {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, Error> {
        // Assert open paren
        if let Some('(') = source.next() {
        } else {
            return Err(Error::BadDescriptor(String::from("expected '(' for method")));
        }

        // Parse parameters
        let mut parameters = vec![];
        while source.peek().copied() != Some(')') {
            if source.peek().is_none() {
                return Err(Error::BadDescriptor(String::from("expected ')' for method")));
            }
            parameters.push(FieldType::parse_from(source)?);
        }
        let _ = source.next();

        // Parse return
        let return_type = if let Some('V') = source.peek().copied() {
            let _ = source.next();
            None
        } else {
            Some(FieldType::parse_from(source)?)
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_and_render_method_descriptor() {
        let desc = MethodDescriptor::parse("(IJ[Ljava/lang/String;[[D)Ljava/lang/Object;").unwrap();
        assert_eq!(desc.parameters.len(), 4);
        assert_eq!(desc.parameters[0], FieldType::int());
        assert_eq!(desc.parameters[1], FieldType::long());
        assert_eq!(desc.parameters[2].sort(), Sort::Array);
        assert_eq!(desc.return_type, Some(FieldType::java_object()));
        assert_eq!(desc.render(), "(IJ[Ljava/lang/String;[[D)Ljava/lang/Object;");
        assert_eq!(desc.parameter_length(true), 1 + 1 + 2 + 1 + 1);
        assert_eq!(desc.parameter_slot(2, false), 3);
    }

    #[test]
    fn reject_malformed_descriptors() {
        assert!(FieldType::parse("Q").is_err());
        assert!(FieldType::parse("Ljava/lang/String").is_err());
        assert!(MethodDescriptor::parse("(I").is_err());
        assert!(FieldType::parse("II").is_err());
    }

    #[test]
    fn internal_names() {
        let arr = RefType::from_internal_name("[I").unwrap();
        assert_eq!(arr.element_type(), Some(FieldType::int()));
        assert_eq!(arr.internal_name(), "[I");
        let obj = RefType::from_internal_name("java/lang/Thread").unwrap();
        assert_eq!(obj.render(), "Ljava/lang/Thread;");
        assert_eq!(obj.internal_name(), "java/lang/Thread");
    }

    #[test]
    fn verification_sorts() {
        assert_eq!(Sort::Boolean.verification_sort(), Sort::Int);
        assert_eq!(Sort::Array.verification_sort(), Sort::Object);
        assert_eq!(Sort::Long.verification_sort(), Sort::Long);
    }
}
