use std::io::{self, IsTerminal, Write};

use ariadne::{
    Color, ColorGenerator, Config, IndexType, Label, LabelAttach, Report, ReportKind, sources,
};

use crate::source::{FileId, SourceManager, Span};

/// Stable codes attached to every diagnostic the preprocessor emits.
pub mod codes {
    pub const ALIAS_CYCLE: &str = "alias-cycle";
    pub const EVAL_FAILED: &str = "eval-failed";
    pub const UNBALANCED_CLOSE: &str = "unbalanced-close";
    pub const UNCLOSED_SCOPE: &str = "unclosed-scope";
    pub const DUPLICATE_LABEL: &str = "duplicate-label";
    pub const IO: &str = "io";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, Debug)]
pub struct DiagLabel {
    pub file: FileId,
    pub span: Span,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct Diag {
    pub severity: Severity,
    pub message: String,
    pub primary: DiagLabel,
    pub labels: Vec<DiagLabel>,
    pub help: Option<String>,
    pub code: Option<&'static str>,
}

impl Diag {
    pub fn error(file: FileId, span: Span, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, file, span, message)
    }

    pub fn warning(file: FileId, span: Span, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, file, span, message)
    }

    pub fn with_label(mut self, label: DiagLabel) -> Self {
        self.labels.push(label);
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    fn new(severity: Severity, file: FileId, span: Span, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            severity,
            primary: DiagLabel {
                file,
                span,
                message: message.clone(),
            },
            message,
            labels: Vec::new(),
            help: None,
            code: None,
        }
    }
}

pub fn has_errors(diags: &[Diag]) -> bool {
    diags.iter().any(Diag::is_error)
}

/// Writes reports to stderr. Colored only when stderr is a terminal.
pub fn render_diags(source_manager: &SourceManager, diags: &[Diag]) -> io::Result<()> {
    let stderr = io::stderr();
    let use_color = stderr.is_terminal();
    write_diags(source_manager, diags, stderr.lock(), use_color)
}

fn write_diags<W: Write>(
    source_manager: &SourceManager,
    diags: &[Diag],
    mut writer: W,
    use_color: bool,
) -> io::Result<()> {
    if diags.is_empty() {
        return Ok(());
    }

    // Reports are keyed by display name so the header reads `file.s:12:5`.
    let mut cache = sources(
        source_manager
            .files_iter()
            .map(|(_, file)| (file.display_name(), file.text.clone())),
    );
    let name_of = |file: FileId| source_manager.file(file).display_name();

    for diag in diags {
        let report_kind = match diag.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };
        let config = report_config(diag.severity, use_color);

        let mut colors = ColorGenerator::new();
        let primary = (name_of(diag.primary.file), diag.primary.span.clone());
        let mut report = Report::build(report_kind, primary.clone())
            .with_message(diag.message.clone())
            .with_config(config)
            .with_label(
                Label::new(primary)
                    .with_message(diag.primary.message.clone())
                    .with_color(primary_color(diag.severity))
                    .with_order(0),
            );

        if let Some(code) = diag.code {
            report = report.with_code(code);
        }

        for (idx, label) in diag.labels.iter().enumerate() {
            report = report.with_label(
                Label::new((name_of(label.file), label.span.clone()))
                    .with_message(label.message.clone())
                    .with_color(colors.next())
                    .with_order((idx + 1) as i32),
            );
        }

        if let Some(help) = &diag.help {
            report = report.with_help(help.clone());
        }

        report.finish().write(&mut cache, &mut writer)?;
    }

    Ok(())
}

fn primary_color(severity: Severity) -> Color {
    match severity {
        Severity::Error => Color::Red,
        Severity::Warning => Color::Yellow,
    }
}

fn report_config(severity: Severity, use_color: bool) -> Config {
    // Scanner spans are byte offsets, so ariadne must index by byte.
    let base = Config::default()
        .with_color(use_color)
        .with_index_type(IndexType::Byte)
        .with_label_attach(LabelAttach::Middle)
        .with_cross_gap(true)
        .with_tab_width(4);

    match severity {
        Severity::Error => base,
        Severity::Warning => base.with_compact(true),
    }
}
