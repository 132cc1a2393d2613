//! Diagnostic rendering.
//!
//! Errors and warnings are rendered with codespan-reporting against the
//! state's source database: a window of source context with a caret on
//! the offending span, followed by a `label(line): message` note in the
//! classic single-line reporter format.

use crate::Error;
use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::{Files, SimpleFiles};
use codespan_reporting::term::{self, Config};
use lark_parser::{Span, Warning};
use termcolor::WriteColor;

/// The source database held by a state.
pub(crate) type FileDb = SimpleFiles<String, String>;

/// Render an error as a diagnostic.
pub(crate) fn emit_error(
    files: &FileDb,
    file_id: Option<usize>,
    error: &Error,
    writer: &mut dyn WriteColor,
) -> Result<(), codespan_reporting::files::Error> {
    let span = match error {
        Error::Lex(e) => Some(e.span),
        Error::Parse(e) => Some(e.span),
        Error::Compile(e) => Some(e.span),
        _ => None,
    };
    let diagnostic = build(files, file_id, span, error.to_string(), Diagnostic::error());
    term::emit(writer, &Config::default(), files, &diagnostic)
}

/// Render a warning as a diagnostic.
pub(crate) fn emit_warning(
    files: &FileDb,
    file_id: usize,
    warning: &Warning,
    writer: &mut dyn WriteColor,
) -> Result<(), codespan_reporting::files::Error> {
    let diagnostic = build(
        files,
        Some(file_id),
        Some(warning.span),
        warning.message.clone(),
        Diagnostic::warning(),
    );
    term::emit(writer, &Config::default(), files, &diagnostic)
}

fn build(
    files: &FileDb,
    file_id: Option<usize>,
    span: Option<Span>,
    message: String,
    diagnostic: Diagnostic<usize>,
) -> Diagnostic<usize> {
    let mut diagnostic = diagnostic.with_message(&message);
    if let (Some(file), Some(span)) = (file_id, span) {
        diagnostic = diagnostic.with_labels(vec![Label::primary(file, span.start..span.end)]);
        if span.line > 0 {
            if let Ok(name) = files.name(file) {
                diagnostic =
                    diagnostic.with_notes(vec![format!("{}({}): {}", name, span.line, message)]);
            }
        }
    }
    diagnostic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::State;
    use termcolor::Buffer;

    #[test]
    fn test_report_includes_context_and_location() {
        let mut state = State::new();
        let err = state
            .compile_string("script.lk", "x := 1\ny := nope\n")
            .unwrap_err();

        let mut buffer = Buffer::no_color();
        state.report(&err, &mut buffer).unwrap();
        let text = String::from_utf8(buffer.into_inner()).unwrap();

        assert!(text.contains("`nope` is not declared"));
        // The offending source line appears in the context window.
        assert!(text.contains("y := nope"));
        // The single-line reporter note.
        assert!(text.contains("script.lk(2):"));
    }

    #[test]
    fn test_warning_rendering() {
        let mut state = State::new();
        state
            .compile_string("script.lk", "func f() { k :: 3 return k }")
            .unwrap();
        assert_eq!(state.warnings().count(), 1);

        let mut buffer = Buffer::no_color();
        state.report_warnings(&mut buffer).unwrap();
        let text = String::from_utf8(buffer.into_inner()).unwrap();
        assert!(text.contains("warning"));
        assert!(text.contains("global-scoped"));
    }
}
