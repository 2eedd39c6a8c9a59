use crate::jvm::code::MethodCode;
use crate::jvm::RenderDescriptor;
use crate::weaver::{CodeOptions, Error, Settings};
use log::warn;

/// Revert an instrumented method that no longer fits in a method body
///
/// On revert, `instrumented` gets the code of `original` back and the returned error says by how
/// much the limit was exceeded. Splitting is not available: asking for it only adds a warning.
pub fn fit_method_size(
    instrumented: &mut MethodCode,
    original: &MethodCode,
    settings: &Settings,
) -> Result<(), Error> {
    let size = instrumented.code_size();
    let limit = settings.max_method_size;
    if size <= limit {
        return Ok(());
    }

    if settings.code_options.contains(CodeOptions::SPLIT_METHODS) {
        warn!(
            "cannot split {}, reverting it instead",
            instrumented.display_name()
        );
    }
    let error = Error::MethodTooLarge {
        owner: instrumented.owner.clone(),
        name: instrumented.name.clone(),
        descriptor: instrumented.descriptor.render(),
        size,
        limit,
    };
    warn!("{}", error);
    *instrumented = original.clone();
    Err(error)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{parse_method, Node};
    use crate::jvm::Instruction;

    fn settings(max_method_size: usize) -> Settings {
        Settings {
            max_method_size,
            ..Settings::default()
        }
    }

    #[test]
    fn oversized_methods_are_reverted() {
        let original = parse_method(
            r#"
            method static f ()V
              return
            "#,
        )
        .unwrap();
        let mut instrumented = original.clone();
        for _ in 0..10 {
            instrumented.instructions.push_front(Node::Insn(Instruction::Nop));
        }

        fit_method_size(&mut instrumented, &original, &settings(100)).unwrap();
        assert_eq!(instrumented.code_size(), 11);

        let err = fit_method_size(&mut instrumented, &original, &settings(8)).unwrap_err();
        assert!(matches!(
            err,
            Error::MethodTooLarge {
                size: 11,
                limit: 8,
                ..
            }
        ));
        assert_eq!(instrumented.code_size(), 1);
    }
}
