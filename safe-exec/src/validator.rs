//! Lexical screening of submitted scripts.
//!
//! This is a blocklist over source text, not an analysis of the program. It
//! rejects the obvious before anything is spawned; the isolation backend is
//! what actually confines the script.

use regex::{RegexSet, RegexSetBuilder};
use serde_json::Value;
use thiserror::Error;

use crate::error::Error;

/// Maximum script length, in characters
pub const MAX_SCRIPT_CHARS: usize = 10_000;

/// The entry point a script must define
pub const ENTRY_POINT: &str = "def main()";

/// Checked in order; the first match is the one reported.
pub const FORBIDDEN_PATTERNS: &[&str] = &[
    // process spawning
    r"import\s+subprocess",
    r"from\s+os\s+import",
    r"os\.system",
    r"os\.popen",
    r"os\.exec",
    r"os\.spawn",
    // dynamic evaluation
    r"__import__\s*\(",
    r"eval\s*\(",
    r"exec\s*\(",
    r"compile\s*\(",
    // file handles
    r"open\s*\(",
    r"file\s*\(",
    // interactive and introspective builtins
    r"input\s*\(",
    r"raw_input\s*\(",
    r"globals\s*\(",
    r"locals\s*\(",
    r"vars\s*\(",
    r"dir\s*\(",
    r"help\s*\(",
    r"breakpoint\s*\(",
    // interpreter exit
    r"quit\s*\(",
    r"exit\s*\(",
];

/// Why a script was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("Script must be a non-empty string")]
    NotString,

    #[error("Script must be a non-empty string")]
    EmptyScript,

    #[error("Script must contain a 'main()' function")]
    MissingEntryPoint,

    #[error("Dangerous operation detected: {0}")]
    ForbiddenPattern(String),

    #[error("Script too long (max {} characters)", MAX_SCRIPT_CHARS)]
    TooLong,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Accepted,
    Rejected(Rejection),
}

impl ValidationVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationVerdict::Accepted)
    }

    /// Turn the verdict into a `Result`, for `?` at call sites
    pub fn into_result(self) -> Result<(), Rejection> {
        match self {
            ValidationVerdict::Accepted => Ok(()),
            ValidationVerdict::Rejected(rejection) => Err(rejection),
        }
    }
}

/// Stateless once built. Same input, same verdict.
#[derive(Debug, Clone)]
pub struct ScriptValidator {
    patterns: Vec<String>,
    set: RegexSet,
}

impl ScriptValidator {
    /// Validator over the built-in forbidden pattern set
    pub fn new() -> Result<Self, Error> {
        Self::with_patterns(FORBIDDEN_PATTERNS)
    }

    pub fn with_patterns(patterns: &[&str]) -> Result<Self, Error> {
        let set = RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::Config(format!("Invalid forbidden pattern: {}", e)))?;

        Ok(Self {
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            set,
        })
    }

    /// Validate a request field that may not be a string at all
    pub fn validate_value(&self, value: &Value) -> ValidationVerdict {
        match value {
            Value::String(script) => self.validate(script),
            _ => ValidationVerdict::Rejected(Rejection::NotString),
        }
    }

    pub fn validate(&self, script: &str) -> ValidationVerdict {
        match self.check(script) {
            Ok(()) => ValidationVerdict::Accepted,
            Err(rejection) => ValidationVerdict::Rejected(rejection),
        }
    }

    fn check(&self, script: &str) -> Result<(), Rejection> {
        if script.is_empty() {
            return Err(Rejection::EmptyScript);
        }

        if script.chars().count() > MAX_SCRIPT_CHARS {
            return Err(Rejection::TooLong);
        }

        if !script.contains(ENTRY_POINT) {
            return Err(Rejection::MissingEntryPoint);
        }

        // SetMatches iterates in ascending index order
        if let Some(index) = self.set.matches(script).iter().next() {
            return Err(Rejection::ForbiddenPattern(self.patterns[index].clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> ScriptValidator {
        ScriptValidator::new().expect("built-in patterns compile")
    }

    fn rejected(script: &str) -> Rejection {
        match validator().validate(script) {
            ValidationVerdict::Rejected(r) => r,
            ValidationVerdict::Accepted => panic!("expected rejection for {:?}", script),
        }
    }

    #[test]
    fn test_accepts_simple_script() {
        let verdict = validator().validate("def main():\n    return {\"x\": 1}\n");
        assert_eq!(verdict, ValidationVerdict::Accepted);
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(rejected(""), Rejection::EmptyScript);
    }

    #[test]
    fn test_rejects_non_string_values() {
        let v = validator();
        for value in [json!(null), json!(42), json!(["def main():"]), json!({"a": 1})] {
            assert_eq!(
                v.validate_value(&value),
                ValidationVerdict::Rejected(Rejection::NotString)
            );
        }
        assert!(v.validate_value(&json!("def main(): pass")).is_accepted());
    }

    #[test]
    fn test_rejects_missing_entry_point() {
        assert_eq!(rejected("print('hello')"), Rejection::MissingEntryPoint);
        assert_eq!(rejected("def main(x):\n    return x"), Rejection::MissingEntryPoint);
    }

    #[test]
    fn test_too_long_regardless_of_content() {
        let padded = format!("def main():\n    return 1\n#{}", "a".repeat(MAX_SCRIPT_CHARS));
        assert_eq!(rejected(&padded), Rejection::TooLong);

        // No entry point and a forbidden call, still reported as too long
        let noisy = format!("eval(1)\n{}", "x".repeat(MAX_SCRIPT_CHARS));
        assert_eq!(rejected(&noisy), Rejection::TooLong);
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        let body = "é".repeat(MAX_SCRIPT_CHARS - 40);
        let script = format!("def main():\n    return '{}'\n", body);
        assert!(script.len() > MAX_SCRIPT_CHARS);
        assert!(script.chars().count() <= MAX_SCRIPT_CHARS);
        assert!(validator().validate(&script).is_accepted());
    }

    #[test]
    fn test_forbidden_pattern_with_valid_entry_point() {
        let script = "def main():\n    return eval('1 + 1')\n";
        assert_eq!(
            rejected(script),
            Rejection::ForbiddenPattern(r"eval\s*\(".to_string())
        );
    }

    #[test]
    fn test_forbidden_patterns_are_case_insensitive() {
        let script = "IMPORT   SubProcess\ndef main():\n    return 1\n";
        assert_eq!(
            rejected(script),
            Rejection::ForbiddenPattern(r"import\s+subprocess".to_string())
        );
    }

    #[test]
    fn test_first_pattern_in_set_order_wins() {
        // `exit(` appears first in the text but `open(` comes first in the set
        let script = "def main():\n    exit(0)\n    open('/etc/passwd')\n";
        assert_eq!(
            rejected(script),
            Rejection::ForbiddenPattern(r"open\s*\(".to_string())
        );
    }

    #[test]
    fn test_patterns_are_not_line_anchored() {
        let script = "def main():\n    x = [1]; y = __import__ ('os')\n    return x\n";
        assert_eq!(
            rejected(script),
            Rejection::ForbiddenPattern(r"__import__\s*\(".to_string())
        );
    }

    #[test]
    fn test_every_pattern_is_caught() {
        let v = validator();
        let samples = [
            "import subprocess",
            "from os import path",
            "os.system('ls')",
            "os.popen('ls')",
            "os.execv('/bin/sh', [])",
            "os.spawnl(0, 'x')",
            "__import__('os')",
            "eval('1')",
            "exec('1')",
            "compile('1', 'f', 'exec')",
            "open('x')",
            "file('x')",
            "input()",
            "raw_input()",
            "globals()",
            "locals()",
            "vars()",
            "dir()",
            "help()",
            "breakpoint()",
            "quit()",
            "exit()",
        ];
        for sample in samples {
            let script = format!("def main():\n    {}\n", sample);
            assert!(
                matches!(
                    v.validate(&script),
                    ValidationVerdict::Rejected(Rejection::ForbiddenPattern(_))
                ),
                "{} should be rejected",
                sample
            );
        }
    }

    #[test]
    fn test_validation_is_deterministic() {
        let v = validator();
        for script in ["", "def main(): return 1", "def main(): eval('2')"] {
            assert_eq!(v.validate(script), v.validate(script));
        }
    }

    #[test]
    fn test_invalid_custom_pattern_is_config_error() {
        let err = ScriptValidator::with_patterns(&["("]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_verdict_into_result() {
        assert!(ValidationVerdict::Accepted.into_result().is_ok());
        assert_eq!(
            ValidationVerdict::Rejected(Rejection::TooLong).into_result(),
            Err(Rejection::TooLong)
        );
    }
}
