//! The envelope protocol between the sandboxed child and the supervisor.
//!
//! The child runs a fixed wrapper program. The submitted script reaches it on
//! stdin and is never spliced into generated source. The wrapper prints
//! exactly one JSON line to the real stdout:
//!
//! ```text
//! {"result": <json>, "stdout": "<captured print output>"}
//! {"error": "<exception text>"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::types::ExecutionOutcome;

const WRAPPER: &str = r#"import io
import json
import sys
from contextlib import redirect_stdout


def _emit(payload, code):
    sys.__stdout__.write(json.dumps(payload) + "\n")
    sys.__stdout__.flush()
    sys.exit(code)


def _run():
    source = sys.stdin.read()
    captured = io.StringIO()
    namespace = {"__name__": "__sandbox__", "__builtins__": __builtins__}
    try:
        with redirect_stdout(captured):
            exec(compile(source, "<script>", "exec"), namespace)
            entry = namespace.get("main")
            if not callable(entry):
                raise NameError("main() function not found")
            result = entry()
        encoded = json.dumps({"result": result, "stdout": captured.getvalue()})
    except Exception as exc:
        _emit({"error": str(exc)}, 1)
    sys.__stdout__.write(encoded + "\n")
    sys.__stdout__.flush()


_run()
"#;

/// Python source of the in-sandbox wrapper. Invoked as `python3 -c <wrapper>`
/// with the script on stdin.
pub fn wrapper_program() -> &'static str {
    WRAPPER
}

/// One decoded envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Result { result: Value, stdout: String },
    Error { error: String },
}

impl From<Envelope> for ExecutionOutcome {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::Result { result, stdout } => ExecutionOutcome::Success { result, stdout },
            Envelope::Error { error } => ExecutionOutcome::UserError { message: error },
        }
    }
}

/// Decode captured stdout into an outcome.
///
/// The last line that parses as JSON is the envelope; anything the script
/// managed to write before it is ignored.
pub fn decode(stdout: &str) -> ExecutionOutcome {
    match find_envelope(stdout) {
        Some(envelope) => envelope.into(),
        None => {
            debug!("No envelope in {} bytes of output", stdout.len());
            ExecutionOutcome::ProtocolViolation {
                raw_output: stdout.to_string(),
            }
        }
    }
}

/// The envelope, if the output ends with a well-formed one
pub(crate) fn find_envelope(stdout: &str) -> Option<Envelope> {
    let document = stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find_map(|line| serde_json::from_str::<Value>(line).ok())?;

    serde_json::from_value(document).ok()
}
