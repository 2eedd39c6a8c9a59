//! Calls to the context interfaces snippets receive as parameters
//!
//! Snippet code never actually calls these interfaces at runtime: every call is recognized by
//! the interface and method it targets, and replaced with the code computing the value at the
//! weaving location.

use crate::jvm::{Instruction, InvokeType, MethodRef};

pub const DYNAMIC_CONTEXT: &str = "ch/usi/dag/disl/dynamiccontext/DynamicContext";
pub const CLASS_CONTEXT: &str = "ch/usi/dag/disl/classcontext/ClassContext";
pub const ARGUMENT_CONTEXT: &str = "ch/usi/dag/disl/processorcontext/ArgumentContext";
pub const ARGUMENT_PROCESSOR_CONTEXT: &str =
    "ch/usi/dag/disl/processorcontext/ArgumentProcessorContext";
pub const ARGUMENT_PROCESSOR_MODE: &str = "ch/usi/dag/disl/processorcontext/ArgumentProcessorMode";
pub const DYNAMIC_BYPASS: &str = "ch/usi/dag/disl/dynamicbypass/DynamicBypass";
pub const BYPASS_CHECK: &str = "ch/usi/dag/disl/dynamicbypass/BypassCheck";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DynamicContextCall {
    /// `getThis()`
    This,

    /// `getException()`
    Exception,

    /// `getStackValue(int index, Class valueType)`
    StackValue,

    /// `getMethodArgumentValue(int index, Class valueType)`
    MethodArgumentValue,

    /// `getLocalVariableValue(int slot, Class valueType)`
    LocalVariableValue,

    /// `getInstanceFieldValue(Object owner, Class ownerType, String name, Class fieldType)`
    InstanceFieldByType,

    /// `getInstanceFieldValue(Object owner, String ownerName, String name, String desc,
    /// Class valueType)`
    InstanceFieldByName,

    /// `getStaticFieldValue(Class ownerType, String name, Class fieldType)`
    StaticFieldByType,

    /// `getStaticFieldValue(String ownerName, String name, String desc, Class valueType)`
    StaticFieldByName,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArgumentContextCall {
    /// `getPosition()`
    Position,

    /// `getTotalCount()`
    TotalCount,

    /// `getTypeDescriptor()`
    TypeDescriptor,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArgumentProcessorContextCall {
    /// `apply(Class processor, ArgumentProcessorMode mode)`
    Apply,

    /// `getArgs(ArgumentProcessorMode mode)`
    Args,

    /// `getReceiver(ArgumentProcessorMode mode)`
    Receiver,
}

/// Call to one of the context interfaces
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContextCall {
    /// `ClassContext.asClass(String name)`
    AsClass,
    Dynamic(DynamicContextCall),
    Argument(ArgumentContextCall),
    ArgumentProcessor(ArgumentProcessorContextCall),
}

impl ContextCall {
    /// Classify an instruction
    ///
    /// Returns `Ok(None)` for anything but a call to a context interface, and an error for a call
    /// to a context method there is no rewriting for.
    pub fn of(insn: &Instruction) -> Result<Option<ContextCall>, String> {
        let method = match insn {
            Instruction::Invoke(InvokeType::Interface, method) => method,
            _ => return Ok(None),
        };
        let unsupported = |method: &MethodRef| {
            Err(format!(
                "unsupported context method {}.{}",
                method.owner, method.name
            ))
        };

        let call = match (method.owner.as_str(), method.name.as_str()) {
            (CLASS_CONTEXT, "asClass") => ContextCall::AsClass,
            (CLASS_CONTEXT, _) => return unsupported(method),

            (DYNAMIC_CONTEXT, name) => {
                let arity = method.descriptor.parameters.len();
                let call = match (name, arity) {
                    ("getThis", 0) => DynamicContextCall::This,
                    ("getException", 0) => DynamicContextCall::Exception,
                    ("getStackValue", 2) => DynamicContextCall::StackValue,
                    ("getMethodArgumentValue", 2) => DynamicContextCall::MethodArgumentValue,
                    ("getLocalVariableValue", 2) => DynamicContextCall::LocalVariableValue,
                    ("getInstanceFieldValue", 4) => DynamicContextCall::InstanceFieldByType,
                    ("getInstanceFieldValue", 5) => DynamicContextCall::InstanceFieldByName,
                    ("getStaticFieldValue", 3) => DynamicContextCall::StaticFieldByType,
                    ("getStaticFieldValue", 4) => DynamicContextCall::StaticFieldByName,
                    _ => return unsupported(method),
                };
                ContextCall::Dynamic(call)
            }

            (ARGUMENT_CONTEXT, "getPosition") => {
                ContextCall::Argument(ArgumentContextCall::Position)
            }
            (ARGUMENT_CONTEXT, "getTotalCount") => {
                ContextCall::Argument(ArgumentContextCall::TotalCount)
            }
            (ARGUMENT_CONTEXT, "getTypeDescriptor") => {
                ContextCall::Argument(ArgumentContextCall::TypeDescriptor)
            }
            (ARGUMENT_CONTEXT, _) => return unsupported(method),

            (ARGUMENT_PROCESSOR_CONTEXT, "apply") => {
                ContextCall::ArgumentProcessor(ArgumentProcessorContextCall::Apply)
            }
            (ARGUMENT_PROCESSOR_CONTEXT, "getArgs") => {
                ContextCall::ArgumentProcessor(ArgumentProcessorContextCall::Args)
            }
            (ARGUMENT_PROCESSOR_CONTEXT, "getReceiver") => {
                ContextCall::ArgumentProcessor(ArgumentProcessorContextCall::Receiver)
            }
            (ARGUMENT_PROCESSOR_CONTEXT, _) => return unsupported(method),

            _ => return Ok(None),
        };
        Ok(Some(call))
    }
}

/// Mode an argument processor is applied in
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArgumentProcessorMode {
    /// Arguments of the instrumented method
    MethodArgs,

    /// Arguments of the method invoked at the marked call site
    CallSiteArgs,
}

impl ArgumentProcessorMode {
    /// Mode named by an `ArgumentProcessorMode` enum constant
    pub fn from_constant(name: &str) -> Option<ArgumentProcessorMode> {
        match name {
            "METHOD_ARGS" => Some(ArgumentProcessorMode::MethodArgs),
            "CALLSITE_ARGS" => Some(ArgumentProcessorMode::CallSiteArgs),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{FieldType, MethodDescriptor};

    fn interface_call(owner: &str, name: &str, parameters: Vec<FieldType>) -> Instruction {
        let descriptor = MethodDescriptor {
            parameters,
            return_type: Some(FieldType::java_object()),
        };
        Instruction::Invoke(InvokeType::Interface, MethodRef::new(owner, name, descriptor))
    }

    #[test]
    fn classify_context_calls() {
        let class = FieldType::object("java/lang/Class");
        let call = interface_call(
            DYNAMIC_CONTEXT,
            "getStackValue",
            vec![FieldType::int(), class.clone()],
        );
        assert_eq!(
            ContextCall::of(&call),
            Ok(Some(ContextCall::Dynamic(DynamicContextCall::StackValue)))
        );

        let by_type = interface_call(
            DYNAMIC_CONTEXT,
            "getStaticFieldValue",
            vec![class.clone(), FieldType::string(), class],
        );
        assert_eq!(
            ContextCall::of(&by_type),
            Ok(Some(ContextCall::Dynamic(DynamicContextCall::StaticFieldByType)))
        );

        let other = interface_call("java/util/List", "get", vec![FieldType::int()]);
        assert_eq!(ContextCall::of(&other), Ok(None));
        assert_eq!(ContextCall::of(&Instruction::Nop), Ok(None));
    }

    #[test]
    fn unknown_context_methods_are_rejected() {
        let call = interface_call(DYNAMIC_CONTEXT, "getSomethingElse", vec![]);
        assert!(ContextCall::of(&call).is_err());
    }

    #[test]
    fn processor_modes() {
        assert_eq!(
            ArgumentProcessorMode::from_constant("CALLSITE_ARGS"),
            Some(ArgumentProcessorMode::CallSiteArgs)
        );
        assert_eq!(ArgumentProcessorMode::from_constant("OTHER"), None);
    }
}
