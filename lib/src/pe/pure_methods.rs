use super::Const;
use crate::jvm::{BaseType, InvokeType, MethodRef, RenderDescriptor};
use std::collections::{HashMap, HashSet};

/// Computes the result of a pure method from its constant arguments (receiver first)
///
/// Returns `None` when the result cannot be determined (eg. the arguments have unexpected
/// shapes, or the call would throw).
pub type Evaluator = fn(&[Const]) -> Option<Const>;

/// Methods known to have no side effects
///
/// A call to a registered method whose result is discarded can be removed altogether, and a
/// call with an [`Evaluator`] and constant arguments folds into its result. The registry is
/// immutable once built: construct it with a [`PureMethodRegistryBuilder`] at start-up and share
/// it by reference.
#[derive(Clone, Debug, Default)]
pub struct PureMethodRegistry {
    /// Classes all of whose methods are registered
    classes: HashSet<String>,

    /// Individual methods, keyed by `owner.name descriptor`
    methods: HashSet<String>,

    evaluators: HashMap<String, Evaluator>,
}

fn method_key(owner: &str, name: &str, descriptor: &str) -> String {
    format!("{}.{}{}", owner, name, descriptor)
}

impl PureMethodRegistry {
    pub fn builder() -> PureMethodRegistryBuilder {
        PureMethodRegistryBuilder::default()
    }

    /// Registry of the boxing classes, `String` and `StringBuilder`
    pub fn standard() -> PureMethodRegistry {
        let mut builder = PureMethodRegistry::builder();
        for base in [
            BaseType::Boolean,
            BaseType::Byte,
            BaseType::Char,
            BaseType::Double,
            BaseType::Float,
            BaseType::Int,
            BaseType::Long,
            BaseType::Short,
        ] {
            builder.register_class(base.wrapper_class());
        }
        builder
            .register_class("java/lang/String")
            .register_class("java/lang/StringBuilder");

        builder
            .evaluator("java/lang/Boolean", "valueOf", "(Z)Ljava/lang/Boolean;", |a| {
                boxed(BaseType::Boolean, a)
            })
            .evaluator("java/lang/Byte", "valueOf", "(B)Ljava/lang/Byte;", |a| {
                boxed(BaseType::Byte, a)
            })
            .evaluator("java/lang/Character", "valueOf", "(C)Ljava/lang/Character;", |a| {
                boxed(BaseType::Char, a)
            })
            .evaluator("java/lang/Short", "valueOf", "(S)Ljava/lang/Short;", |a| {
                boxed(BaseType::Short, a)
            })
            .evaluator("java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;", |a| {
                boxed(BaseType::Int, a)
            })
            .evaluator("java/lang/Long", "valueOf", "(J)Ljava/lang/Long;", |a| {
                boxed(BaseType::Long, a)
            })
            .evaluator("java/lang/Float", "valueOf", "(F)Ljava/lang/Float;", |a| {
                boxed(BaseType::Float, a)
            })
            .evaluator("java/lang/Double", "valueOf", "(D)Ljava/lang/Double;", |a| {
                boxed(BaseType::Double, a)
            })
            .evaluator("java/lang/Boolean", "booleanValue", "()Z", |a| {
                unboxed(BaseType::Boolean, a)
            })
            .evaluator("java/lang/Byte", "byteValue", "()B", |a| unboxed(BaseType::Byte, a))
            .evaluator("java/lang/Character", "charValue", "()C", |a| unboxed(BaseType::Char, a))
            .evaluator("java/lang/Short", "shortValue", "()S", |a| unboxed(BaseType::Short, a))
            .evaluator("java/lang/Integer", "intValue", "()I", |a| unboxed(BaseType::Int, a))
            .evaluator("java/lang/Long", "longValue", "()J", |a| unboxed(BaseType::Long, a))
            .evaluator("java/lang/Float", "floatValue", "()F", |a| unboxed(BaseType::Float, a))
            .evaluator("java/lang/Double", "doubleValue", "()D", |a| unboxed(BaseType::Double, a))
            .evaluator("java/lang/Integer", "parseInt", "(Ljava/lang/String;)I", |a| match a {
                [Const::String(s)] => s.parse().ok().map(Const::Int),
                _ => None,
            })
            .evaluator("java/lang/Long", "parseLong", "(Ljava/lang/String;)J", |a| match a {
                [Const::String(s)] => s.parse().ok().map(Const::Long),
                _ => None,
            })
            .evaluator("java/lang/Integer", "toString", "(I)Ljava/lang/String;", |a| match a {
                [Const::Int(i)] => Some(Const::String(i.to_string())),
                _ => None,
            })
            .evaluator("java/lang/String", "valueOf", "(I)Ljava/lang/String;", |a| match a {
                [Const::Int(i)] => Some(Const::String(i.to_string())),
                _ => None,
            })
            .evaluator("java/lang/String", "valueOf", "(J)Ljava/lang/String;", |a| match a {
                [Const::Long(l)] => Some(Const::String(l.to_string())),
                _ => None,
            })
            .evaluator("java/lang/String", "valueOf", "(Z)Ljava/lang/String;", |a| match a {
                [Const::Int(b)] => Some(Const::String(String::from(if *b != 0 {
                    "true"
                } else {
                    "false"
                }))),
                _ => None,
            })
            .evaluator("java/lang/String", "length", "()I", |a| match a {
                [Const::String(s)] => i32::try_from(s.encode_utf16().count()).ok().map(Const::Int),
                _ => None,
            })
            .evaluator("java/lang/String", "isEmpty", "()Z", |a| match a {
                [Const::String(s)] => Some(Const::Int(s.is_empty() as i32)),
                _ => None,
            })
            .evaluator("java/lang/String", "hashCode", "()I", |a| match a {
                [Const::String(s)] => Some(Const::Int(
                    s.encode_utf16()
                        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32)),
                )),
                _ => None,
            })
            .evaluator(
                "java/lang/String",
                "concat",
                "(Ljava/lang/String;)Ljava/lang/String;",
                |a| match a {
                    [Const::String(s), Const::String(t)] => {
                        Some(Const::String(format!("{}{}", s, t)))
                    }
                    _ => None,
                },
            )
            .evaluator("java/lang/String", "equals", "(Ljava/lang/Object;)Z", |a| match a {
                [Const::String(s), Const::String(t)] => Some(Const::Int((s == t) as i32)),
                [Const::String(_), Const::Null] => Some(Const::Int(0)),
                _ => None,
            });

        builder.build()
    }

    /// Whether a call to the method can be dropped when its result is unused
    pub fn is_registered(&self, method: &MethodRef) -> bool {
        self.classes.contains(&method.owner)
            || self.methods.contains(&method_key(
                &method.owner,
                &method.name,
                &method.descriptor.render(),
            ))
    }

    /// Fold a call with constant arguments (receiver first)
    pub fn execute(&self, typ: InvokeType, method: &MethodRef, args: &[Const]) -> Option<Const> {
        if typ == InvokeType::Interface || !self.is_registered(method) {
            return None;
        }
        let key = method_key(&method.owner, &method.name, &method.descriptor.render());
        let evaluator = self.evaluators.get(&key)?;
        evaluator(args)
    }
}

fn boxed(base: BaseType, args: &[Const]) -> Option<Const> {
    match args {
        [value @ (Const::Int(_) | Const::Long(_) | Const::Float(_) | Const::Double(_))] => {
            Some(Const::Boxed(base, Box::new(value.clone())))
        }
        _ => None,
    }
}

fn unboxed(base: BaseType, args: &[Const]) -> Option<Const> {
    match args {
        [Const::Boxed(boxed_base, value)] if *boxed_base == base => Some((**value).clone()),
        _ => None,
    }
}

#[derive(Default)]
pub struct PureMethodRegistryBuilder {
    registry: PureMethodRegistry,
}

impl PureMethodRegistryBuilder {
    /// Register every method of a class
    pub fn register_class(&mut self, owner: &str) -> &mut Self {
        self.registry.classes.insert(owner.to_owned());
        self
    }

    pub fn register(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.registry
            .methods
            .insert(method_key(owner, name, descriptor));
        self
    }

    /// Register a method along with a way of computing its result
    pub fn evaluator(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        evaluator: Evaluator,
    ) -> &mut Self {
        self.register(owner, name, descriptor);
        self.registry
            .evaluators
            .insert(method_key(owner, name, descriptor), evaluator);
        self
    }

    pub fn build(&mut self) -> PureMethodRegistry {
        std::mem::take(&mut self.registry)
    }
}
