//! Building shell command lines and reading exit codes back out of shell
//! output.
//!
//! The `shell:` service takes a single command line: arguments are separated
//! by spaces, an argument containing whitespace has to be double-quoted, and
//! double quotes themselves cannot be escaped at all.

use crate::error::{AdbError, AdbResult};
use tracing::warn;

/// Appended to a command so its exit status ends the output as `:<status>`.
pub const EXIT_CODE_SENTINEL: [&str; 3] = [";", "echo", ":$?"];

/// Validate `cmd` and `args`, quote arguments that contain whitespace and
/// join everything with single spaces.
pub fn prepare_command_line<S: AsRef<str>>(cmd: &str, args: &[S]) -> AdbResult<String> {
    if cmd.trim().is_empty() {
        return Err(AdbError::assertion("command cannot be empty"));
    }

    let mut line = cmd.to_string();
    for (i, arg) in args.iter().enumerate() {
        let arg = arg.as_ref();
        if arg.contains('"') {
            return Err(AdbError::parse(format!(
                "arg at index {} contains an invalid double quote: {}",
                i, arg
            )));
        }
        line.push(' ');
        if arg.chars().any(char::is_whitespace) {
            line.push('"');
            line.push_str(arg);
            line.push('"');
        } else {
            line.push_str(arg);
        }
    }
    Ok(line)
}

/// `args` followed by the exit code sentinel.
pub fn with_exit_code_sentinel<S: AsRef<str>>(args: &[S]) -> Vec<String> {
    args.iter()
        .map(|a| a.as_ref().to_string())
        .chain(EXIT_CODE_SENTINEL.iter().map(|s| s.to_string()))
        .collect()
}

/// Split raw shell output at the last `:` into the command's own output and
/// its exit code.
///
/// The device shell turns `\n` into `\r\n`; the returned output has that
/// undone. An exit code that does not parse is reported as 0, since the
/// command output itself was received.
pub fn split_exit_code(raw: &str) -> AdbResult<(String, i32)> {
    let Some(idx) = raw.rfind(':') else {
        return Err(AdbError::parse("adb shell error, parse exit code failed"));
    };
    let code_str = raw[idx + 1..].trim();
    let exit_code = code_str.parse::<i32>().unwrap_or_else(|_| {
        warn!("Unparsable shell exit code {:?}, assuming 0", code_str);
        0
    });
    let output = raw[..idx].replace("\r\n", "\n");
    Ok((output, exit_code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const NO_ARGS: [&str; 0] = [];

    #[test]
    fn test_prepare_command_line_no_args() {
        assert_eq!(prepare_command_line("cmd", &NO_ARGS).unwrap(), "cmd");
    }

    #[test]
    fn test_prepare_command_line_empty_command() {
        for cmd in ["", "  "] {
            let err = prepare_command_line(cmd, &NO_ARGS).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Assertion);
            assert_eq!(err.message(), "command cannot be empty");
        }
    }

    #[test]
    fn test_prepare_command_line_clean_args() {
        assert_eq!(
            prepare_command_line("cmd", &["arg1", "arg2"]).unwrap(),
            "cmd arg1 arg2"
        );
    }

    #[test]
    fn test_prepare_command_line_quotes_whitespace() {
        assert_eq!(
            prepare_command_line("cmd", &["arg with spaces"]).unwrap(),
            "cmd \"arg with spaces\""
        );
        assert_eq!(
            prepare_command_line("cmd", &["a\tb", "c"]).unwrap(),
            "cmd \"a\tb\" c"
        );
    }

    #[test]
    fn test_prepare_command_line_rejects_double_quote() {
        let err = prepare_command_line("cmd", &["quoted\"arg"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(
            err.message(),
            "arg at index 0 contains an invalid double quote: quoted\"arg"
        );

        let err = prepare_command_line("cmd", &["ok", "bad\""]).unwrap_err();
        assert!(err.message().starts_with("arg at index 1 "));
    }

    #[test]
    fn test_with_exit_code_sentinel() {
        let args = with_exit_code_sentinel(&["-l"]);
        assert_eq!(args, vec!["-l", ";", "echo", ":$?"]);
        assert_eq!(
            prepare_command_line("ls", &args).unwrap(),
            "ls -l ; echo :$?"
        );
    }

    #[test]
    fn test_split_exit_code() {
        assert_eq!(split_exit_code("output:0").unwrap(), ("output".to_string(), 0));
        assert_eq!(split_exit_code("output:1").unwrap(), ("output".to_string(), 1));
        assert_eq!(
            split_exit_code("a:b\r\nline2\r\n:127\r\n").unwrap(),
            ("a:b\nline2\n".to_string(), 127)
        );
    }

    #[test]
    fn test_split_exit_code_without_colon() {
        let err = split_exit_code("no sentinel here").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_split_exit_code_unparsable_defaults_to_zero() {
        // Kept deliberately: the output arrived, only the status is garbled.
        assert_eq!(split_exit_code("out:oops").unwrap(), ("out".to_string(), 0));
    }
}
