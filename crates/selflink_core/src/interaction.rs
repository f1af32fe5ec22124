use std::env;
use std::fs;
use std::io::{self, BufRead, StdinLock, Stdout, Write};
use std::process::Command;

use anyhow::{Context, Result, bail};
use log::warn;

use crate::choice::format_option;

/// The user-facing side of a run: notices, questions and manual edits.
pub trait Interaction {
    fn output(&mut self, message: &str);

    /// Ask `question` until one of `options` is picked. Returns the chosen
    /// hotkey in lowercase; an empty answer picks `default`.
    fn input_choice(
        &mut self,
        question: &str,
        options: &[(&str, char)],
        default: char,
    ) -> Result<char>;

    /// Let the user edit `text`. `None` means the edit was abandoned or left
    /// the text unchanged.
    fn edit_text(&mut self, text: &str) -> Result<Option<String>>;
}

pub struct TerminalInteraction<R, W> {
    input: R,
    output: W,
    editor: Option<String>,
}

impl TerminalInteraction<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalInteraction<R, W> {
    pub fn new(input: R, output: W) -> Self {
        let editor = env::var("VISUAL")
            .or_else(|_| env::var("EDITOR"))
            .ok()
            .filter(|value| !value.trim().is_empty());
        Self {
            input,
            output,
            editor,
        }
    }

    pub fn with_editor(mut self, editor: impl Into<String>) -> Self {
        self.editor = Some(editor.into());
        self
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R: BufRead, W: Write> Interaction for TerminalInteraction<R, W> {
    fn output(&mut self, message: &str) {
        if let Err(error) = writeln!(self.output, "{message}") {
            warn!("failed to write to terminal: {error}");
        }
    }

    fn input_choice(
        &mut self,
        question: &str,
        options: &[(&str, char)],
        default: char,
    ) -> Result<char> {
        let rendered = options
            .iter()
            .map(|(label, hotkey)| {
                format_option(label, *hotkey, hotkey.eq_ignore_ascii_case(&default))
            })
            .collect::<Vec<_>>()
            .join(", ");

        loop {
            write!(self.output, "{question} ({rendered}) ").context("failed to write prompt")?;
            self.output.flush().context("failed to flush prompt")?;

            let mut line = String::new();
            let read = self
                .input
                .read_line(&mut line)
                .context("failed to read answer")?;
            if read == 0 {
                bail!("input closed while waiting for an answer to: {question}");
            }

            let answer = line.trim();
            if answer.is_empty() {
                return Ok(default.to_ascii_lowercase());
            }
            let mut chars = answer.chars();
            if let (Some(first), None) = (chars.next(), chars.next())
                && let Some((_, hotkey)) = options
                    .iter()
                    .find(|(_, hotkey)| hotkey.eq_ignore_ascii_case(&first))
            {
                return Ok(hotkey.to_ascii_lowercase());
            }
            writeln!(self.output, "Invalid answer: {answer}").context("failed to write prompt")?;
        }
    }

    fn edit_text(&mut self, text: &str) -> Result<Option<String>> {
        let editor = self.editor.clone().unwrap_or_else(|| "vi".to_string());
        let mut parts = editor.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("editor command is empty"))?;

        let mut buffer = tempfile::Builder::new()
            .prefix("selflink-edit-")
            .suffix(".wiki")
            .tempfile()
            .context("failed to create edit buffer")?;
        buffer
            .write_all(text.as_bytes())
            .context("failed to write edit buffer")?;
        buffer.flush().context("failed to write edit buffer")?;

        let status = Command::new(program)
            .args(parts)
            .arg(buffer.path())
            .status()
            .with_context(|| format!("failed to launch editor `{editor}`"))?;
        if !status.success() {
            bail!("editor `{editor}` exited with {status}");
        }
        let edited = fs::read_to_string(buffer.path())
            .with_context(|| format!("failed to read {}", buffer.path().display()))?;

        if edited == text {
            Ok(None)
        } else {
            Ok(Some(edited))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use anyhow::{Result, bail};

    use super::Interaction;

    /// Replays canned answers and records everything shown.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedInteraction {
        pub answers: VecDeque<char>,
        pub edits: VecDeque<Option<String>>,
        pub outputs: Vec<String>,
        pub questions: Vec<String>,
    }

    impl ScriptedInteraction {
        pub(crate) fn with_answers(answers: &str) -> Self {
            Self {
                answers: answers.chars().collect(),
                ..Self::default()
            }
        }
    }

    impl Interaction for ScriptedInteraction {
        fn output(&mut self, message: &str) {
            self.outputs.push(message.to_string());
        }

        fn input_choice(
            &mut self,
            question: &str,
            options: &[(&str, char)],
            _default: char,
        ) -> Result<char> {
            self.questions.push(question.to_string());
            let Some(answer) = self.answers.pop_front() else {
                bail!("no scripted answer left for: {question}");
            };
            if !options.iter().any(|(_, hotkey)| *hotkey == answer) {
                bail!("scripted answer '{answer}' is not offered for: {question}");
            }
            Ok(answer)
        }

        fn edit_text(&mut self, _text: &str) -> Result<Option<String>> {
            Ok(self.edits.pop_front().flatten())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn terminal(input: &str) -> TerminalInteraction<Cursor<Vec<u8>>, Vec<u8>> {
        TerminalInteraction::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    const OPTIONS: &[(&str, char)] = &[("Do not change", 'n'), ("Unlink", 'u'), ("quit", 'q')];

    #[test]
    fn input_choice_accepts_hotkey_in_any_case() {
        let mut ui = terminal("Q\n");
        let answer = ui.input_choice("Proceed?", OPTIONS, 'u').expect("answer");
        assert_eq!(answer, 'q');
        let output = String::from_utf8(ui.into_output()).expect("utf8");
        assert_eq!(output, "Proceed? (Do [n]ot change, [U]nlink, [q]uit) ");
    }

    #[test]
    fn input_choice_uses_default_on_empty_answer() {
        let mut ui = terminal("\n");
        assert_eq!(ui.input_choice("Proceed?", OPTIONS, 'u').expect("answer"), 'u');
    }

    #[test]
    fn input_choice_reprompts_after_invalid_answer() {
        let mut ui = terminal("x\nnope\nn\n");
        assert_eq!(ui.input_choice("Proceed?", OPTIONS, 'u').expect("answer"), 'n');
        let output = String::from_utf8(ui.into_output()).expect("utf8");
        assert!(output.contains("Invalid answer: x"));
        assert!(output.contains("Invalid answer: nope"));
    }

    #[test]
    fn input_choice_fails_when_input_closes() {
        let mut ui = terminal("");
        let error = ui
            .input_choice("Proceed?", OPTIONS, 'u')
            .expect_err("closed input must fail");
        assert!(error.to_string().contains("input closed"));
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn output_survives_closed_stdout_but_prompts_fail() {
        let mut ui = TerminalInteraction::new(Cursor::new(b"u\n".to_vec()), ClosedPipe);
        ui.output("Skipping page [[Paris]] because it contains an image map.");
        let error = ui
            .input_choice("Proceed?", OPTIONS, 'u')
            .expect_err("prompt needs stdout");
        assert!(error.to_string().contains("failed to write prompt"));
    }

    #[test]
    fn edit_text_reports_unchanged_text_as_none() {
        let mut ui = terminal("").with_editor("true");
        assert_eq!(ui.edit_text("[[Paris]]").expect("edit"), None);
    }

    #[test]
    fn edit_text_uses_private_buffer_and_removes_it() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("editor.sh");
        fs::write(&script, "printf '%s' \"$1\" > \"$1\"\n").expect("write editor script");

        let mut ui = terminal("").with_editor(format!("sh {}", script.display()));
        let edited = ui.edit_text("[[Paris]]").expect("edit").expect("changed");
        let buffer = std::path::Path::new(&edited);
        let name = buffer
            .file_name()
            .and_then(|name| name.to_str())
            .expect("buffer name");
        assert!(name.starts_with("selflink-edit-"));
        assert!(name.ends_with(".wiki"));
        assert!(!buffer.exists());
    }

    #[test]
    fn edit_text_fails_when_editor_fails() {
        let mut ui = terminal("").with_editor("false");
        assert!(ui.edit_text("[[Paris]]").is_err());
    }
}
