//! Command binding
//!
//! Turns a computation's command template into an argv array with a run's
//! parameters substituted. The template is split into arguments before any
//! substitution, so bound values can never introduce new arguments or shell
//! syntax; the result is spawned directly without a shell.

use std::path::Path;

use thiserror::Error;

use crate::types::UserId;

const DATASET_FILE: &str = "{dataset_file}";
const VARIABLE: &str = "{variable}";
const VARIABLES: &str = "{variables}";
const USER_ID: &str = "{user_id}";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("command template is empty")]
    Empty,

    #[error("unterminated {0} quote in command template")]
    UnterminatedQuote(char),

    #[error("program '{0}' must not be a placeholder")]
    PlaceholderProgram(String),
}

/// A command template split into arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    argv: Vec<String>,
}

impl CommandTemplate {
    /// Split a template string into arguments.
    ///
    /// Arguments are separated by whitespace. Single quotes group literally,
    /// double quotes group with backslash escapes, and a backslash outside
    /// quotes escapes the next character.
    pub fn parse(template: &str) -> Result<Self, BindError> {
        let argv = split_args(template)?;
        let program = argv.first().ok_or(BindError::Empty)?;
        if [DATASET_FILE, VARIABLE, VARIABLES, USER_ID]
            .iter()
            .any(|placeholder| program.contains(placeholder))
        {
            return Err(BindError::PlaceholderProgram(program.clone()));
        }
        Ok(Self { argv })
    }

    pub fn args(&self) -> &[String] {
        &self.argv
    }

    /// Substitute placeholders in every argument
    pub fn bind(&self, bindings: &Bindings<'_>) -> BoundCommand {
        let dataset_file = bindings.dataset_file.to_string_lossy();
        let user_id = bindings.user_id.to_string();

        let values = [
            (DATASET_FILE, dataset_file.as_ref()),
            (VARIABLES, bindings.variables),
            (VARIABLE, bindings.variables),
            (USER_ID, user_id.as_str()),
        ];
        let mut argv = self.argv.iter().map(|arg| substitute(arg, &values));

        // parse() guarantees a non-placeholder program
        let program = argv.next().unwrap_or_default();
        BoundCommand {
            program,
            args: argv.collect(),
        }
    }
}

/// Values substituted into a command template
#[derive(Debug, Clone, Copy)]
pub struct Bindings<'a> {
    /// Plaintext working copy of the dataset
    pub dataset_file: &'a Path,
    /// Comma-joined column names, passed as one argument
    pub variables: &'a str,
    /// Id of the dataset owner
    pub user_id: UserId,
}

/// A program and its arguments, ready to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Replace placeholders in one pass so substituted values are never rescanned
fn substitute(arg: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    'scan: while let Some(c) = rest.chars().next() {
        if c == '{' {
            for (placeholder, value) in values {
                if let Some(tail) = rest.strip_prefix(placeholder) {
                    out.push_str(value);
                    rest = tail;
                    continue 'scan;
                }
            }
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

fn split_args(input: &str) -> Result<Vec<String>, BindError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            '\'' => {
                in_arg = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(BindError::UnterminatedQuote('\'')),
                    }
                }
            }
            '"' => {
                in_arg = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(BindError::UnterminatedQuote('"')),
                        },
                        Some(c) => current.push(c),
                        None => return Err(BindError::UnterminatedQuote('"')),
                    }
                }
            }
            '\\' => {
                in_arg = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c => {
                in_arg = true;
                current.push(c);
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    Ok(args)
}
