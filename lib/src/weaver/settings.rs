use bitflags::bitflags;
use std::collections::HashMap;
use std::str::FromStr;

bitflags! {
    /// Code generation options
    pub struct CodeOptions: u8 {
        /// Keep the original code behind a runtime check, to run when instrumentation is off
        const CREATE_BYPASS = 0x01;

        /// Turn the bypass on while a snippet runs, so that code it calls is not instrumented
        const DYNAMIC_BYPASS = 0x02;

        /// Split methods that grow too large instead of reverting them
        const SPLIT_METHODS = 0x04;

        /// Wrap every snippet in a handler reporting (then exiting on) uncaught exceptions
        const CATCH_EXCEPTIONS = 0x08;
    }
}

impl Default for CodeOptions {
    fn default() -> CodeOptions {
        CodeOptions::CREATE_BYPASS | CodeOptions::DYNAMIC_BYPASS | CodeOptions::CATCH_EXCEPTIONS
    }
}

/// How hard to optimize woven snippet code
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PartialEvaluationLevel {
    None,

    /// At most this many rounds, stopping early when a round changes nothing
    Rounds(usize),

    /// Until a round changes nothing
    Fixpoint,
}

impl PartialEvaluationLevel {
    /// Maximum number of rounds (`None` for no limit)
    pub fn max_rounds(&self) -> Option<usize> {
        match self {
            PartialEvaluationLevel::None => Some(0),
            PartialEvaluationLevel::Rounds(n) => Some(*n),
            PartialEvaluationLevel::Fixpoint => None,
        }
    }
}

impl FromStr for PartialEvaluationLevel {
    type Err = String;

    fn from_str(level: &str) -> Result<PartialEvaluationLevel, String> {
        match level {
            "O0" | "none" => Ok(PartialEvaluationLevel::None),
            "O1" => Ok(PartialEvaluationLevel::Rounds(1)),
            "O2" => Ok(PartialEvaluationLevel::Rounds(2)),
            "O3" => Ok(PartialEvaluationLevel::Rounds(3)),
            "Ox" => Ok(PartialEvaluationLevel::Fixpoint),
            other => Err(format!(
                "unknown partial evaluation level `{}` (expected O0, O1, O2, O3 or Ox)",
                other
            )),
        }
    }
}

pub struct Settings {
    /// Code generation options
    pub code_options: CodeOptions,

    /// Partial evaluation of woven snippets
    ///
    /// Runs after local variables are shifted but before dynamic context calls are resolved, so
    /// that branches folded away never force a dynamic value to be materialized.
    pub partial_evaluation: PartialEvaluationLevel,

    /// Largest code size (in bytes) an instrumented method may have
    ///
    /// Methods growing past this are reverted to their original code.
    pub max_method_size: usize,
}

impl Settings {
    /// Largest code size the class file format allows
    pub const MAX_METHOD_SIZE: usize = 64 * 1024;

    /// Settings from system-property style keys
    ///
    ///   - `disl.noexcepthandler=true` drops `CATCH_EXCEPTIONS`
    ///   - `disl.disablebypass=true` drops both bypass options
    ///   - `disl.splitmethods=true` adds `SPLIT_METHODS`
    ///   - `disl.parteval=O1|O2|O3|Ox` picks the partial evaluation level (anything else turns
    ///     it off)
    pub fn from_properties(properties: &HashMap<String, String>) -> Settings {
        let flag = |key: &str| {
            properties
                .get(key)
                .map_or(false, |value| value.trim().eq_ignore_ascii_case("true"))
        };

        let mut code_options = CodeOptions::default();
        if flag("disl.noexcepthandler") {
            code_options.remove(CodeOptions::CATCH_EXCEPTIONS);
        }
        if flag("disl.disablebypass") {
            code_options.remove(CodeOptions::CREATE_BYPASS | CodeOptions::DYNAMIC_BYPASS);
        }
        if flag("disl.splitmethods") {
            code_options.insert(CodeOptions::SPLIT_METHODS);
        }

        let partial_evaluation = properties
            .get("disl.parteval")
            .and_then(|level| level.trim().parse().ok())
            .unwrap_or(PartialEvaluationLevel::None);

        Settings {
            code_options,
            partial_evaluation,
            max_method_size: Settings::MAX_METHOD_SIZE,
        }
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            code_options: CodeOptions::default(),
            partial_evaluation: PartialEvaluationLevel::None,
            max_method_size: Settings::MAX_METHOD_SIZE,
        }
    }
}
