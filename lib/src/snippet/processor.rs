use super::{Code, UnprocessedCode};
use crate::jvm::{BaseType, ClassName, FieldType, RefType};
use crate::localvar::LocalVars;
use crate::weaver::{Error, StaticContextMethod, StaticContexts};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Kinds of arguments a processor method handles
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArgProcessorKind {
    Boolean,
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Object,
}

impl ArgProcessorKind {
    /// Type of the parameter receiving the argument
    pub fn primary_type(&self) -> FieldType {
        match self {
            ArgProcessorKind::Boolean => FieldType::Base(BaseType::Boolean),
            ArgProcessorKind::Byte => FieldType::Base(BaseType::Byte),
            ArgProcessorKind::Char => FieldType::Base(BaseType::Char),
            ArgProcessorKind::Double => FieldType::double(),
            ArgProcessorKind::Float => FieldType::float(),
            ArgProcessorKind::Int => FieldType::int(),
            ArgProcessorKind::Long => FieldType::long(),
            ArgProcessorKind::Short => FieldType::Base(BaseType::Short),
            ArgProcessorKind::Object => FieldType::java_object(),
        }
    }

    /// Other kinds a method taking this kind can be made to handle too
    pub fn secondary_kinds(&self) -> &'static [ArgProcessorKind] {
        match self {
            ArgProcessorKind::Byte => &[ArgProcessorKind::Boolean],
            ArgProcessorKind::Int => &[
                ArgProcessorKind::Boolean,
                ArgProcessorKind::Byte,
                ArgProcessorKind::Short,
            ],
            ArgProcessorKind::Short => &[ArgProcessorKind::Boolean, ArgProcessorKind::Byte],
            _ => &[],
        }
    }

    /// Kind of an argument of the given type
    pub fn of_type(field_type: &FieldType) -> ArgProcessorKind {
        match field_type {
            FieldType::Base(BaseType::Boolean) => ArgProcessorKind::Boolean,
            FieldType::Base(BaseType::Byte) => ArgProcessorKind::Byte,
            FieldType::Base(BaseType::Char) => ArgProcessorKind::Char,
            FieldType::Base(BaseType::Double) => ArgProcessorKind::Double,
            FieldType::Base(BaseType::Float) => ArgProcessorKind::Float,
            FieldType::Base(BaseType::Int) => ArgProcessorKind::Int,
            FieldType::Base(BaseType::Long) => ArgProcessorKind::Long,
            FieldType::Base(BaseType::Short) => ArgProcessorKind::Short,
            FieldType::Ref(_) => ArgProcessorKind::Object,
        }
    }
}

/// Argument a processor method is about to be applied to
#[derive(Debug)]
pub struct ArgumentInfo<'a> {
    pub position: usize,
    pub total_count: usize,
    pub field_type: &'a FieldType,
}

/// Predicate deciding whether a processor method applies to an argument
pub type ArgGuard = Arc<dyn Fn(&ArgumentInfo) -> bool + Send + Sync>;

/// Method of an argument processor, handling arguments of some kinds
pub struct ArgProcessorMethod {
    pub kinds: BTreeSet<ArgProcessorKind>,
    pub guard: Option<ArgGuard>,
    pub code: Code,
}

impl ArgProcessorMethod {
    /// Prepare a processor method
    ///
    /// The first parameter decides the primary kind. `also` adds kinds, which must be secondary
    /// kinds of the primary one.
    pub fn prepare(
        template: &UnprocessedCode,
        also: &[ArgProcessorKind],
        guard: Option<ArgGuard>,
        vars: &LocalVars,
        static_contexts: &StaticContexts,
    ) -> Result<ArgProcessorMethod, Error> {
        let invalid = |message: String| Error::InvalidContextUsage {
            location: template.location(None),
            message,
        };

        let primary = match template.method.descriptor.parameters.first() {
            None => return Err(invalid(String::from("method has no parameters"))),
            Some(FieldType::Ref(RefType::Object(ClassName(name))))
                if name != "java/lang/Object" =>
            {
                return Err(invalid(format!(
                    "type of the first argument must be Object or a primitive type, found {}",
                    name
                )))
            }
            Some(field_type) => ArgProcessorKind::of_type(field_type),
        };

        let mut kinds = BTreeSet::from([primary]);
        for kind in also {
            if !primary.secondary_kinds().contains(kind) {
                return Err(invalid(format!(
                    "{:?} arguments cannot be processed by a method taking {:?}",
                    kind, primary
                )));
            }
            kinds.insert(*kind);
        }

        Ok(ArgProcessorMethod {
            kinds,
            guard,
            code: template.process(vars, static_contexts)?,
        })
    }

    pub fn handles(&self, kind: ArgProcessorKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Whether the method applies to an argument (of a kind it handles)
    pub fn accepts(&self, argument: &ArgumentInfo) -> bool {
        match &self.guard {
            Some(guard) => guard(argument),
            None => true,
        }
    }
}

impl fmt::Debug for ArgProcessorMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ArgProcessorMethod")
            .field("kinds", &self.kinds)
            .field("guarded", &self.guard.is_some())
            .field("method", &self.code.method_name)
            .finish()
    }
}

/// Class whose methods process method or call site arguments one by one
#[derive(Debug)]
pub struct ArgProcessor {
    /// Internal name of the processor class
    pub class_name: String,
    pub methods: Vec<ArgProcessorMethod>,
}

impl ArgProcessor {
    pub fn new(class_name: impl Into<String>, methods: Vec<ArgProcessorMethod>) -> ArgProcessor {
        ArgProcessor {
            class_name: class_name.into(),
            methods,
        }
    }

    /// Static context methods called by any of the processor methods
    pub fn static_context_methods(&self) -> BTreeSet<StaticContextMethod> {
        self.methods
            .iter()
            .flat_map(|method| method.code.static_context_methods.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kinds_of_types() {
        assert_eq!(
            ArgProcessorKind::of_type(&FieldType::array(FieldType::int())),
            ArgProcessorKind::Object
        );
        assert_eq!(
            ArgProcessorKind::of_type(&FieldType::Base(BaseType::Short)),
            ArgProcessorKind::Short
        );
        assert!(ArgProcessorKind::Int
            .secondary_kinds()
            .contains(&ArgProcessorKind::Boolean));
        assert!(ArgProcessorKind::Long.secondary_kinds().is_empty());
    }
}
