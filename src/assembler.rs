//! Command assembler: groups a token sequence by `|`, then separates
//! command words from redirection directives within each group.

use std::fmt;

use crate::ast::{Mode, Pipeline, Redirect, Stage, Stream, Token};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssembleError {
    /// Two adjacent pipes, or a leading/trailing pipe.
    EmptyPipeStage,
    /// A redirect operator wasn't immediately followed by a Word.
    MissingRedirectTarget,
    /// The same stream was redirected twice in one stage.
    MultipleRedirections,
    /// A stage's word list was empty (after redirects were stripped out).
    EmptyCommand,
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPipeStage => write!(f, "syntax error near unexpected token `|`"),
            Self::MissingRedirectTarget => write!(f, "syntax error: missing redirect target"),
            Self::MultipleRedirections => write!(f, "syntax error: redirection specified twice"),
            Self::EmptyCommand => write!(f, "syntax error: empty command"),
        }
    }
}

/// Assembles a token sequence into a `Pipeline`. `tokens` empty means
/// the caller should treat the line as a no-op — this function is only
/// called for a non-empty token sequence.
pub fn assemble(tokens: Vec<Token<'_>>) -> Result<Pipeline, AssembleError> {
    let mut stages = Vec::new();
    for group in split_on_pipe(tokens)? {
        stages.push(assemble_stage(group)?);
    }
    Ok(Pipeline { stages })
}

/// Splits on `Pipe` tokens, rejecting empty groups (leading/trailing/
/// doubled pipe).
fn split_on_pipe(tokens: Vec<Token<'_>>) -> Result<Vec<Vec<Token<'_>>>, AssembleError> {
    let mut groups = Vec::new();
    let mut current = Vec::new();
    for tok in tokens {
        if matches!(tok, Token::Pipe) {
            if current.is_empty() {
                return Err(AssembleError::EmptyPipeStage);
            }
            groups.push(std::mem::take(&mut current));
        } else {
            current.push(tok);
        }
    }
    if current.is_empty() {
        return Err(AssembleError::EmptyPipeStage);
    }
    groups.push(current);
    Ok(groups)
}

/// Builds one `Stage` from a pipe-delimited group of tokens: walks left
/// to right, peeling off redirect-operator/target pairs and collecting
/// the rest as command words.
fn assemble_stage(tokens: Vec<Token<'_>>) -> Result<Stage, AssembleError> {
    let mut stage = Stage::default();
    let mut iter = tokens.into_iter().peekable();

    while let Some(tok) = iter.next() {
        match tok {
            Token::Word(w) => stage.words.push(w.into_owned()),
            Token::RedirIn => {
                let target = take_redirect_target(&mut iter)?;
                set_redirect(&mut stage.stdin_redirect, Redirect { target, mode: None })?;
            }
            Token::RedirOut(stream, mode) => {
                let target = take_redirect_target(&mut iter)?;
                let redirect = Redirect { target, mode: Some(mode) };
                match stream {
                    Stream::Stdout => set_redirect(&mut stage.stdout_redirect, redirect)?,
                    Stream::Stderr => set_redirect(&mut stage.stderr_redirect, redirect)?,
                }
            }
            Token::Pipe => unreachable!("pipes are stripped out before stage assembly"),
        }
    }

    if stage.words.is_empty() {
        return Err(AssembleError::EmptyCommand);
    }
    Ok(stage)
}

fn take_redirect_target(
    iter: &mut std::iter::Peekable<std::vec::IntoIter<Token<'_>>>,
) -> Result<String, AssembleError> {
    match iter.next() {
        Some(Token::Word(w)) => Ok(w.into_owned()),
        _ => Err(AssembleError::MissingRedirectTarget),
    }
}

fn set_redirect(slot: &mut Option<Redirect>, redirect: Redirect) -> Result<(), AssembleError> {
    if slot.is_some() {
        return Err(AssembleError::MultipleRedirections);
    }
    *slot = Some(redirect);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn pipeline(line: &str) -> Pipeline {
        assemble(tokenize(line).unwrap()).unwrap()
    }

    #[test]
    fn simple_command() {
        let p = pipeline("echo hello world");
        assert_eq!(p.stages.len(), 1);
        assert_eq!(p.stages[0].words, vec!["echo", "hello", "world"]);
    }

    #[test]
    fn two_stage_pipeline() {
        let p = pipeline("ls | grep Cargo");
        assert_eq!(p.stages.len(), 2);
        assert_eq!(p.stages[0].words, vec!["ls"]);
        assert_eq!(p.stages[1].words, vec!["grep", "Cargo"]);
    }

    #[test]
    fn three_stage_pipeline() {
        let p = pipeline("cat file | grep name | head -1");
        assert_eq!(p.stages.len(), 3);
    }

    #[test]
    fn redirect_output_truncate() {
        let p = pipeline("echo hello > out.txt");
        assert_eq!(p.stages[0].words, vec!["echo", "hello"]);
        let r = p.stages[0].stdout_redirect.as_ref().unwrap();
        assert_eq!(r.target, "out.txt");
        assert_eq!(r.mode, Some(Mode::Truncate));
    }

    #[test]
    fn redirect_output_append() {
        let p = pipeline("echo hello >> out.txt");
        assert_eq!(p.stages[0].stdout_redirect.as_ref().unwrap().mode, Some(Mode::Append));
    }

    #[test]
    fn redirect_stderr() {
        let p = pipeline("ls 2> err.txt");
        let r = p.stages[0].stderr_redirect.as_ref().unwrap();
        assert_eq!(r.target, "err.txt");
        assert_eq!(r.mode, Some(Mode::Truncate));
    }

    #[test]
    fn redirect_input() {
        let p = pipeline("cat < in.txt");
        assert_eq!(p.stages[0].stdin_redirect.as_ref().unwrap().target, "in.txt");
    }

    #[test]
    fn multiple_distinct_redirects() {
        let p = pipeline("cmd < in.txt > out.txt 2> err.txt");
        let s = &p.stages[0];
        assert_eq!(s.stdin_redirect.as_ref().unwrap().target, "in.txt");
        assert_eq!(s.stdout_redirect.as_ref().unwrap().target, "out.txt");
        assert_eq!(s.stderr_redirect.as_ref().unwrap().target, "err.txt");
    }

    #[test]
    fn redirect_before_first_word_is_legal() {
        // Open Question resolved: a redirect preceding any command word
        // is legal, as long as a word eventually makes the stage
        // non-empty.
        let p = pipeline("> out.txt echo hi");
        assert_eq!(p.stages[0].words, vec!["echo", "hi"]);
        assert_eq!(p.stages[0].stdout_redirect.as_ref().unwrap().target, "out.txt");
    }

    #[test]
    fn pipeline_with_redirects_on_each_stage() {
        let p = pipeline("cat < in.txt | grep hello > out.txt");
        assert_eq!(p.stages.len(), 2);
        assert_eq!(p.stages[0].stdin_redirect.as_ref().unwrap().target, "in.txt");
        assert_eq!(p.stages[1].stdout_redirect.as_ref().unwrap().target, "out.txt");
    }

    #[test]
    fn err_leading_pipe() {
        assert_eq!(
            assemble(tokenize("| ls").unwrap()),
            Err(AssembleError::EmptyPipeStage)
        );
    }

    #[test]
    fn err_trailing_pipe() {
        assert_eq!(
            assemble(tokenize("ls |").unwrap()),
            Err(AssembleError::EmptyPipeStage)
        );
    }

    #[test]
    fn err_double_pipe() {
        // `||` tokenizes as two `|`s with nothing between them (no
        // `&&`/`||` connector support in this shell), so this is an
        // empty stage, same as a spaced-out double pipe.
        assert_eq!(
            assemble(tokenize("ls || grep").unwrap()),
            Err(AssembleError::EmptyPipeStage)
        );
        assert_eq!(
            assemble(tokenize("ls | | grep").unwrap()),
            Err(AssembleError::EmptyPipeStage)
        );
    }

    #[test]
    fn err_missing_redirect_target() {
        assert_eq!(
            assemble(tokenize("echo >").unwrap()),
            Err(AssembleError::MissingRedirectTarget)
        );
    }

    #[test]
    fn err_redirect_followed_by_pipe() {
        assert_eq!(
            assemble(tokenize("echo > | cat").unwrap()),
            Err(AssembleError::MissingRedirectTarget)
        );
    }

    #[test]
    fn err_multiple_stdout_redirections() {
        assert_eq!(
            assemble(tokenize("echo hi > a.txt > b.txt").unwrap()),
            Err(AssembleError::MultipleRedirections)
        );
    }

    #[test]
    fn err_empty_command_redirect_only() {
        assert_eq!(
            assemble(tokenize("> out.txt").unwrap()),
            Err(AssembleError::EmptyCommand)
        );
    }
}
