//! Ariadne-based rendering of inference errors.
//!
//! Output is colourless so it can be snapshotted. Positions with a byte
//! range are labelled exactly; positions that only know their line are
//! labelled across the whole line.

use std::ops::Range;

use ariadne::{Color, Config, Label, Report, ReportKind, Source};

use kiln_common::{LineIndex, Position};

use crate::error::InferenceError;

// ── Error Codes ────────────────────────────────────────────────────────

fn error_code(err: &InferenceError) -> &'static str {
    match err {
        InferenceError::Unresolved(_) => "E0101",
        InferenceError::IncompatibleAssignment { .. } => "E0102",
        InferenceError::ReturnTypeMismatch { .. } => "E0103",
        InferenceError::BranchTypeMismatch { .. } => "E0104",
    }
}

// ── Span Helpers ───────────────────────────────────────────────────────

/// The byte range to label for `position`, clamped to the source and never
/// empty unless the source is.
pub fn position_range(position: Position, index: &LineIndex, source_len: usize) -> Range<usize> {
    let raw = if position.has_range() {
        position.start as usize..position.end as usize
    } else {
        match index.line_range(position.line) {
            Some(r) => r.start as usize..r.end as usize,
            None => 0..source_len,
        }
    };
    let start = raw.start.min(source_len);
    let end = raw.end.min(source_len).max(start);
    if start == end {
        start..(end + 1).min(source_len)
    } else {
        start..end
    }
}

/// Render an inference error into a formatted diagnostic string.
pub fn render_diagnostic(error: &InferenceError, source: &str, _filename: &str) -> String {
    let config = Config::default().with_color(false);
    let index = LineIndex::new(source);
    let source_len = source.len();
    let code = error_code(error);
    let span = position_range(error.position(), &index, source_len);

    let report = match error {
        InferenceError::Unresolved(nodes) => {
            let mut builder = Report::build(ReportKind::Error, span.clone())
                .with_code(code)
                .with_message(format!("could not infer types for {} node(s)", nodes.len()))
                .with_config(config);
            for node in nodes.iter().filter(|n| n.reason.is_some()) {
                let range = position_range(node.position, &index, source_len);
                let reason = node.reason.as_deref().unwrap_or_default();
                builder.add_label(
                    Label::new(range)
                        .with_message(format!("{}: {}", node.description, reason))
                        .with_color(Color::Red),
                );
            }
            builder.set_help("add a type declaration to the method signature");
            builder.finish()
        }

        InferenceError::IncompatibleAssignment {
            name, bound, found, ..
        } => Report::build(ReportKind::Error, span.clone())
            .with_code(code)
            .with_message(error.to_string())
            .with_config(config)
            .with_label(
                Label::new(span)
                    .with_message(format!("`{}` is {}, found {}", name, bound, found))
                    .with_color(Color::Red),
            )
            .with_help(format!("assign a value of type {} or use a new variable", bound))
            .finish(),

        InferenceError::ReturnTypeMismatch {
            declared, found, ..
        } => Report::build(ReportKind::Error, span.clone())
            .with_code(code)
            .with_message(error.to_string())
            .with_config(config)
            .with_label(
                Label::new(span)
                    .with_message(format!("expected {}, found {}", declared, found))
                    .with_color(Color::Red),
            )
            .finish(),

        InferenceError::BranchTypeMismatch {
            then_type,
            else_type,
            ..
        } => Report::build(ReportKind::Error, span.clone())
            .with_code(code)
            .with_message(error.to_string())
            .with_config(config)
            .with_label(
                Label::new(span)
                    .with_message(format!("then is {}, else is {}", then_type, else_type))
                    .with_color(Color::Red),
            )
            .finish(),
    };

    let mut buf = Vec::new();
    let cache = Source::from(source);
    if report.write(cache, &mut buf).is_err() {
        return error.to_string();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_common::TypeRef;

    #[test]
    fn line_only_positions_cover_the_line() {
        let src = "a = 1\na = \"x\"\n";
        let index = LineIndex::new(src);
        assert_eq!(position_range(Position::line(2), &index, src.len()), 6..13);
        assert_eq!(position_range(Position::new(2, 6, 7), &index, src.len()), 6..7);
    }

    #[test]
    fn renders_code_and_message() {
        let src = "a = 1\na = \"x\"\n";
        let err = InferenceError::IncompatibleAssignment {
            name: "a".into(),
            bound: TypeRef::int(),
            found: TypeRef::string(),
            position: Position::line(2),
        };
        let out = render_diagnostic(&err, src, "t.rb");
        assert!(out.contains("E0102"), "{}", out);
        assert!(out.contains("cannot assign string to `a`, which is already int"), "{}", out);
    }
}
