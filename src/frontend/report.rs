// Pretty error reporting with source highlighting using ariadne

use crate::common::span::line_col;
use crate::frontend::sema::SemaError;
use ariadne::{Color, Label, Report, ReportKind, Source};

/// Report a semantic error with source highlighting
pub fn report_sema_error(filename: &str, source: &str, error: &SemaError) {
    let Some(span) = error.span() else {
        eprintln!("error: {}", error);
        return;
    };

    Report::build(ReportKind::Error, span.start..span.end)
        .with_message(error.to_string())
        .with_label(
            Label::new(span.start..span.end)
                .with_message(error.to_string())
                .with_color(Color::Red),
        )
        .finish()
        .eprint(Source::from(source))
        .expect("failed to print error report");

    let (line, col) = line_col(source, span.start);
    eprintln!("  --> {}:{}:{}", filename, line, col);
}
