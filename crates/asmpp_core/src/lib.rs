use std::path::{Path, PathBuf};

pub mod diag;
pub mod dialect;
pub mod eval;
pub mod lex;
pub mod rewrite;
pub mod scope;
pub mod source;

use diag::{Severity, codes, has_errors, render_diags};
use rewrite::Rewriter;
use source::{FileId, SourceManager};
use tracing::debug;

pub use diag::{Diag, DiagLabel, Severity as DiagSeverity};
pub use dialect::{Dialect, LineClass, ScopeMarkers};
pub use eval::{DefineTable, EvalError, MacroEvaluator};

/// What to do with a `}` when no block is open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnbalancedClose {
    /// Pass the brace through and warn.
    #[default]
    Ignore,
    Error,
}

/// Lifetime of the counter that numbers anonymous blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CounterScope {
    #[default]
    PerFile,
    /// Keep counting across every file of one [`Preprocessor`].
    PerBatch,
}

#[derive(Clone, Debug)]
pub struct RewriteOptions {
    pub dialect: Dialect,
    /// Emit `# LINE "FILE"` after every prologue and epilogue.
    pub line_markers: bool,
    pub unbalanced_close: UnbalancedClose,
    pub anon_counter: CounterScope,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            line_markers: true,
            unbalanced_close: UnbalancedClose::default(),
            anon_counter: CounterScope::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Rewritten {
    pub text: String,
    pub warnings: Vec<Diag>,
}

/// A batch session. Every input gets a fresh scope stack; only the source
/// manager, the evaluator and (optionally) the anonymous counter carry over.
pub struct Preprocessor {
    options: RewriteOptions,
    source_manager: SourceManager,
    evaluator: Option<Box<dyn MacroEvaluator>>,
    anon_counter: u32,
}

impl Preprocessor {
    pub fn new(options: RewriteOptions) -> Self {
        Self {
            options,
            source_manager: SourceManager::new(),
            evaluator: None,
            anon_counter: 0,
        }
    }

    pub fn with_evaluator(mut self, evaluator: impl MacroEvaluator + 'static) -> Self {
        self.evaluator = Some(Box::new(evaluator));
        self
    }

    /// Reads and rewrites one file. Diagnostics are rendered to stderr as a
    /// side effect; on error the partial output is discarded.
    pub fn rewrite_path(&mut self, input: &Path) -> Result<Rewritten, Vec<Diag>> {
        let file = match self.source_manager.load_path(input) {
            Ok(file) => file,
            Err(err) => {
                let file = self
                    .source_manager
                    .add_virtual_file(input.to_path_buf(), String::new());
                let diags = vec![
                    Diag::error(file, 0..0, format!("failed to read input file: {err}"))
                        .with_code(codes::IO),
                ];
                let _ = render_diags(&self.source_manager, &diags);
                return Err(diags);
            }
        };

        self.rewrite_file(file)
    }

    /// Same as [`Preprocessor::rewrite_path`] for text that is already in
    /// memory, such as standard input.
    pub fn rewrite_named_text(
        &mut self,
        name: impl Into<PathBuf>,
        text: impl Into<String>,
    ) -> Result<Rewritten, Vec<Diag>> {
        let file = self.source_manager.add_virtual_file(name, text);
        self.rewrite_file(file)
    }

    fn rewrite_file(&mut self, file: FileId) -> Result<Rewritten, Vec<Diag>> {
        if self.options.anon_counter == CounterScope::PerFile {
            self.anon_counter = 0;
        }

        let source = self.source_manager.file(file);
        let name = source.display_name();
        debug!(file = %name, bytes = source.text.len(), "rewriting");

        let mut rewriter = Rewriter::new(&source.text, file, &name, &self.options)
            .with_anon_counter(self.anon_counter);
        if let Some(evaluator) = self.evaluator.as_deref_mut() {
            rewriter = rewriter.with_evaluator(evaluator);
        }
        let result = rewriter.run();
        self.anon_counter = result.anon_counter;

        let _ = render_diags(&self.source_manager, &result.diags);
        if has_errors(&result.diags) {
            return Err(result.diags);
        }

        Ok(Rewritten {
            text: result.text,
            warnings: only_warnings(&result.diags),
        })
    }
}

/// Rewrites a standalone snippet under the name `inline.s` without rendering
/// anything. The text is returned even when an error cut the run short.
pub fn rewrite_source_text(text: &str, options: &RewriteOptions) -> (String, Vec<Diag>) {
    let mut source_manager = SourceManager::new();
    let file = source_manager.add_virtual_file("inline.s", text);
    let source = source_manager.file(file);
    let name = source.display_name();

    let result = Rewriter::new(&source.text, file, &name, options).run();
    (result.text, result.diags)
}

fn only_warnings(diags: &[Diag]) -> Vec<Diag> {
    diags
        .iter()
        .filter(|diag| diag.severity != Severity::Error)
        .cloned()
        .collect()
}
