// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Minimal POSIX shell quoting for rewritten commands.

use std::borrow::Cow;

/// Characters that are emitted verbatim by [`shell_quote`].
fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '=' | '@' | '%' | '+' | ',')
}

/// Quote `arg` for a POSIX shell.
///
/// Safe words pass through untouched. Anything else is wrapped in single
/// quotes, with each embedded `'` written as `'\''`.
pub fn shell_quote(arg: &str) -> Cow<'_, str> {
    if !arg.is_empty() && arg.chars().all(is_safe) {
        return Cow::Borrowed(arg);
    }
    Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
}

/// Shell syntax that only a shell can interpret (pipes, redirects,
/// expansion, globbing, command chaining).
const SHELL_SYNTAX: &[char] = &[
    '|', '&', ';', '<', '>', '(', ')', '$', '`', '*', '?', '~', '{', '}', '[', ']', '\n', '#',
];

/// Render `command` as arguments for a program that execs its argv.
///
/// Plain commands keep their words, each quoted. Commands that need a
/// shell are passed whole to `sh -c`.
pub fn command_argv(command: &str) -> String {
    let command = command.trim();
    if !command.contains(SHELL_SYNTAX) {
        if let Ok(words) = shell_words::split(command) {
            if !words.is_empty() {
                return words
                    .iter()
                    .map(|w| shell_quote(w))
                    .collect::<Vec<_>>()
                    .join(" ");
            }
        }
    }
    format!("sh -c {}", shell_quote(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_words_unquoted() {
        assert_eq!(shell_quote("npm"), "npm");
        assert_eq!(shell_quote("/clones/api/feat-x"), "/clones/api/feat-x");
        assert_eq!(shell_quote("KEY=v@1:2,3+4%"), "KEY=v@1:2,3+4%");
    }

    #[test]
    fn test_unsafe_words_single_quoted() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn test_command_argv_plain() {
        assert_eq!(command_argv("npm test"), "npm test");
        assert_eq!(
            command_argv(r#"git commit -m "fix it""#),
            "git commit -m 'fix it'"
        );
    }

    #[test]
    fn test_command_argv_needs_shell() {
        assert_eq!(
            command_argv("npm test | tee out.log"),
            "sh -c 'npm test | tee out.log'"
        );
        assert_eq!(command_argv("echo $HOME"), "sh -c 'echo $HOME'");
        assert_eq!(command_argv("echo 'unterminated"), r"sh -c 'echo '\''unterminated'");
    }
}
