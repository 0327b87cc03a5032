/// Scripts that should run and succeed
pub mod scripts {
    pub const RETURNS_DICT: &str = "def main():\n    return {\"x\": 1}\n";

    pub const PRINTS_HI: &str = "def main():\n    print(\"hi\")\n    return None\n";

    pub const HELPER_FUNCTIONS: &str = r#"def factorial(n):
    if n <= 1:
        return 1
    return n * factorial(n - 1)


def main():
    print("computing")
    return {"factorial": factorial(5), "items": [factorial(i) for i in range(4)]}
"#;

    pub const TOP_LEVEL_PRINT: &str = "print(\"loading\")\n\ndef main():\n    return 2\n";

    pub const USES_JSON_MODULE: &str = r#"import json


def main():
    return json.loads('{"nested": {"ok": true}}')
"#;
}

/// Scripts whose entry point fails
pub mod failures {
    pub const RAISES_BOOM: &str = "def main():\n    raise Exception(\"boom\")\n";

    pub const NOT_SERIALIZABLE: &str = "def main():\n    return {1, 2, 3}\n";

    pub const SYNTAX_ERROR: &str = "def main():\n    return (\n";

    /// Defines `main` only inside a string, so it passes the textual check
    pub const MAIN_NOT_DEFINED: &str = "NOTE = \"def main()\"\n";

    pub const INFINITE_LOOP: &str = "def main():\n    while True:\n        pass\n";
}

/// Scripts that leave a detached process in a new session
pub mod escapes {
    /// Returns the pid of a forked child that called `setsid()` and sleeps forever
    pub const DETACHED_CHILD_THEN_RETURN: &str = r#"import os
import time


def main():
    pid = os.fork()
    if pid == 0:
        os.setsid()
        while True:
            time.sleep(0.1)
    return pid
"#;

    /// Reports the detached child's pid on stderr, then spins until killed
    pub const DETACHED_CHILD_THEN_SPIN: &str = r#"import os
import time


def main():
    pid = os.fork()
    if pid == 0:
        os.setsid()
        while True:
            time.sleep(0.1)
    os.write(2, (str(pid) + "\n").encode())
    while True:
        pass
"#;
}
