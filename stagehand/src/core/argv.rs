//! Command-line splitting for non-shell invocations.

use crate::error::{Result, StagehandError};

/// Split a command string into argv using POSIX shell word rules.
pub fn split_command(command: &str) -> Result<Vec<String>> {
    let args = shell_words::split(command)
        .map_err(|err| StagehandError::Config(format!("cannot parse `{command}`: {err}")))?;
    if args.is_empty() {
        return Err(StagehandError::Config("empty command".to_string()));
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace_and_quotes() {
        let args = split_command(r#"eslint --fix "a b.js" 'c d.js' e\ f.js"#).expect("split");
        assert_eq!(args, vec!["eslint", "--fix", "a b.js", "c d.js", "e f.js"]);
    }

    #[test]
    fn rejects_unterminated_quotes_and_empty_commands() {
        assert!(matches!(split_command("echo 'oops"), Err(StagehandError::Config(_))));
        assert!(matches!(split_command("   "), Err(StagehandError::Config(_))));
    }

    #[test]
    fn quoted_args_survive_a_split() {
        let line = format!("cat {}", shell_words::quote("it's a file.js"));
        let args = split_command(&line).expect("split");
        assert_eq!(args, vec!["cat", "it's a file.js"]);
        assert_eq!(shell_words::quote("src/plain.js"), "src/plain.js");
    }
}
