use std::fmt::Write as _;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::{
    RewriteOptions, UnbalancedClose,
    diag::{Diag, DiagLabel, codes},
    dialect::{LineClass, ScopeMarkers},
    eval::MacroEvaluator,
    lex::{
        AliasForm, AliasSuffix, Ident, ScopeMarker, Scanner, Token, TokenKind,
        is_numeric_label_ref,
    },
    scope::{AliasCycle, ScopeId, ScopeStack},
    source::{FileId, Span},
};

/// Output of one file's run. `diags` holds warnings and, if the run was
/// aborted, the error that stopped it; `text` is then incomplete.
#[derive(Clone, Debug)]
pub struct RewriteResult {
    pub text: String,
    pub diags: Vec<Diag>,
    pub anon_counter: u32,
}

#[derive(Clone, Copy, Debug, Default)]
struct LineState {
    class: Option<LineClass>,
    /// Something other than whitespace or a comment has been seen.
    significant: bool,
    /// The next token begins a top-level operand.
    operand_start: bool,
    brackets: u32,
    parens: u32,
}

/// Pulls tokens from the scanner one at a time and appends their rewritten
/// form in input order. Look-ahead only ever runs on scanner clones.
pub struct Rewriter<'src, 'a> {
    source: &'src str,
    file: FileId,
    file_name: &'a str,
    options: &'a RewriteOptions,
    evaluator: Option<&'a mut dyn MacroEvaluator>,
    anon_counter: u32,
    scanner: Scanner<'src>,
    scopes: ScopeStack,
    open_spans: Vec<Span>,
    line: LineState,
    line_no: usize,
    out: String,
    diags: Vec<Diag>,
}

impl<'src, 'a> Rewriter<'src, 'a> {
    pub fn new(
        source: &'src str,
        file: FileId,
        file_name: &'a str,
        options: &'a RewriteOptions,
    ) -> Self {
        Self {
            source,
            file,
            file_name,
            options,
            evaluator: None,
            anon_counter: 0,
            scanner: Scanner::new(source),
            scopes: ScopeStack::new(),
            open_spans: Vec::new(),
            line: LineState::default(),
            line_no: 1,
            out: String::with_capacity(source.len() + source.len() / 4),
            diags: Vec::new(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: &'a mut dyn MacroEvaluator) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Anonymous blocks are numbered from `counter + 1`.
    pub fn with_anon_counter(mut self, counter: u32) -> Self {
        self.anon_counter = counter;
        self
    }

    pub fn run(mut self) -> RewriteResult {
        if let Err(diag) = self.rewrite_all() {
            self.diags.push(diag);
        }

        RewriteResult {
            text: self.out,
            diags: self.diags,
            anon_counter: self.anon_counter,
        }
    }

    fn rewrite_all(&mut self) -> Result<(), Diag> {
        while let Some(token) = self.scanner.next_token() {
            self.dispatch(&token)?;
            self.line_no += token.text.matches('\n').count();
        }
        self.close_remaining();
        Ok(())
    }

    fn dispatch(&mut self, token: &Token<'src>) -> Result<(), Diag> {
        match token.kind {
            TokenKind::Whitespace | TokenKind::Comment => self.out.push_str(token.text),
            TokenKind::String => {
                self.mark_significant();
                self.out.push_str(token.text);
            }
            TokenKind::Identifier(ident) => self.on_identifier(token, ident)?,
            TokenKind::Argument(name) => {
                self.mark_significant();
                let text = self.options.dialect.argument(name);
                self.out.push_str(&text);
            }
            TokenKind::Variable(name) => {
                self.mark_significant();
                let text = self.options.dialect.variable(name);
                self.out.push_str(&text);
            }
            TokenKind::Number => self.on_number(token),
            TokenKind::IndirectBegin(step) => {
                self.mark_significant();
                self.line.brackets += 1;
                if let Some(step) = step {
                    self.out.push_str(step.as_str());
                }
                self.out.push('(');
            }
            TokenKind::IndirectEnd(step) => {
                self.mark_significant();
                self.line.brackets = self.line.brackets.saturating_sub(1);
                self.out.push(')');
                if let Some(step) = step {
                    self.out.push_str(step.as_str());
                }
            }
            TokenKind::EndOfLine(marker) => {
                self.line = LineState::default();
                match marker {
                    None => self.out.push_str(token.text),
                    Some(ScopeMarker::Open(name)) => self.open_scope(name, token),
                    Some(ScopeMarker::Close) => self.close_scope(token)?,
                }
            }
            TokenKind::Escape(payload) => self.on_escape(token, payload)?,
            TokenKind::Other => self.on_other(token),
        }
        Ok(())
    }

    fn mark_significant(&mut self) {
        self.line.significant = true;
        self.line.operand_start = false;
    }

    fn on_identifier(&mut self, token: &Token<'src>, ident: Ident<'src>) -> Result<(), Diag> {
        if self.line.class.is_none() {
            if ident.label_def {
                let symbol = self.localize(ident.name);
                self.out.push_str(&symbol);
                self.out.push(':');
                self.line.significant = true;
                return Ok(());
            }
            return self.on_mnemonic(token, ident);
        }

        let rewritten = match ident.alias {
            Some(AliasSuffix {
                form: AliasForm::At,
                target,
            }) => self.define_alias(token, ident.name, target)?,
            Some(AliasSuffix {
                form: AliasForm::Assign,
                target,
            }) if self.line.class == Some(LineClass::Instruction) => {
                self.define_alias(token, ident.name, target)?
            }
            Some(AliasSuffix {
                form: AliasForm::Assign,
                target,
            }) => {
                let name = self.resolve(token, ident.name)?;
                let value = self.resolve(token, target)?;
                format!("{name}{}{value}", assign_separator(token.text, ident.name, target))
            }
            None => self.resolve(token, ident.name)?,
        };

        self.mark_significant();
        self.out.push_str(&rewritten);
        if ident.label_def {
            self.out.push(':');
        }
        Ok(())
    }

    fn on_mnemonic(&mut self, token: &Token<'src>, ident: Ident<'src>) -> Result<(), Diag> {
        match ident.alias {
            Some(AliasSuffix {
                form: AliasForm::Assign,
                target,
            }) => {
                // `name = value` at the start of a line is an assembler equate.
                let name = self.localize(ident.name);
                let value = self.resolve(token, target)?;
                self.mark_significant();
                self.line.class = Some(LineClass::Pseudo);
                self.out.push_str(&name);
                self.out.push_str(assign_separator(token.text, ident.name, target));
                self.out.push_str(&value);
            }
            _ => {
                let class = self.options.dialect.classify(ident.name);
                self.line.class = Some(class);
                self.line.significant = true;
                self.line.operand_start = true;
                self.out.push_str(token.text);
            }
        }
        Ok(())
    }

    fn define_alias(
        &mut self,
        token: &Token<'src>,
        name: &str,
        target: &str,
    ) -> Result<String, Diag> {
        debug!(
            alias = name,
            value = target,
            scope = self.scopes.current().qualified.as_deref().unwrap_or("<root>"),
            "define alias"
        );
        self.scopes.define_alias(name, target);
        self.resolve(token, target)
    }

    /// Alias chase followed by local label lookup.
    fn resolve(&mut self, token: &Token<'src>, name: &str) -> Result<String, Diag> {
        let terminal = self
            .scopes
            .chase_alias(name)
            .map_err(|cycle| self.alias_cycle(token, &cycle))?
            .to_string();
        Ok(self.localize(&terminal))
    }

    fn localize(&mut self, name: &str) -> String {
        let Some(local) = self.options.dialect.local_name(name) else {
            return name.to_string();
        };
        match self.scopes.lookup_label(local) {
            Some(symbol) => symbol.to_string(),
            None if self.scopes.depth() == 0 => name.to_string(),
            None => self.bind_label(local),
        }
    }

    /// First use of a local label nobody in the chain defines: it belongs to
    /// the current scope from here on.
    fn bind_label(&mut self, local: &str) -> String {
        let options = self.options;
        let id = self.scopes.current_id();
        let scope = self.scopes.get_mut(id);
        let symbol = options.dialect.qualify(scope.qualified.as_deref(), local);
        trace!(label = local, symbol = %symbol, "bind local label on first use");
        scope.labels.define_if_absent(local, symbol.clone());
        symbol
    }

    fn alias_cycle(&self, token: &Token<'src>, cycle: &AliasCycle) -> Diag {
        Diag::error(self.file, token.span.clone(), cycle.to_string())
            .with_code(codes::ALIAS_CYCLE)
            .with_help(format!(
                "`{}` was aliased back into its own chain; give one side a different name",
                cycle.start
            ))
    }

    fn on_number(&mut self, token: &Token<'src>) {
        if self.immediate_allowed() && self.is_immediate_literal(token, &self.scanner) {
            self.out.push_str(&self.options.dialect.immediate_marker);
        }
        self.mark_significant();
        self.out.push_str(token.text);
    }

    fn immediate_allowed(&self) -> bool {
        self.line.class == Some(LineClass::Instruction)
            && self.line.operand_start
            && self.line.brackets == 0
            && self.line.parens == 0
    }

    /// `literal` is an immediate unless it names a numeric local label or is
    /// a displacement in front of `(` or `[`.
    fn is_immediate_literal(&self, literal: &Token<'src>, after: &Scanner<'src>) -> bool {
        if is_numeric_label_ref(literal.text) {
            return false;
        }
        match after.peek_significant() {
            Some((next, _)) => !matches!(
                (next.kind, next.text),
                (TokenKind::IndirectBegin(_), _) | (TokenKind::Other, "(")
            ),
            None => true,
        }
    }

    fn on_other(&mut self, token: &Token<'src>) {
        match token.text {
            "#" if !self.line.significant => {
                // C preprocessor line.
                self.line.class = Some(LineClass::Pseudo);
            }
            "," if self.line.brackets == 0 && self.line.parens == 0 => {
                self.line.significant = true;
                self.line.operand_start = true;
                self.out.push(',');
                return;
            }
            "(" => self.line.parens += 1,
            ")" => self.line.parens = self.line.parens.saturating_sub(1),
            "-" | "+" | "~" if self.immediate_allowed() => {
                let signed_literal = self
                    .scanner
                    .peek_significant()
                    .is_some_and(|(next, after)| {
                        next.kind == TokenKind::Number && self.is_immediate_literal(&next, &after)
                    });
                if signed_literal {
                    self.out.push_str(&self.options.dialect.immediate_marker);
                }
            }
            _ => {}
        }
        self.mark_significant();
        self.out.push_str(token.text);
    }

    fn on_escape(&mut self, token: &Token<'src>, payload: &str) -> Result<(), Diag> {
        self.mark_significant();
        let Some(evaluator) = self.evaluator.as_deref_mut() else {
            self.out.push_str(token.text);
            return Ok(());
        };

        let text = evaluator.evaluate(payload).map_err(|err| {
            Diag::error(
                self.file,
                token.span.clone(),
                format!("macro escape failed: {err}"),
            )
            .with_code(codes::EVAL_FAILED)
        })?;
        self.out.push_str(&text);
        Ok(())
    }

    fn open_scope(&mut self, name: Option<&str>, token: &Token<'src>) {
        let options = self.options;
        let name = match name {
            Some(name) => name.to_string(),
            None => {
                self.anon_counter += 1;
                options.dialect.anonymous_name(self.anon_counter)
            }
        };
        let qualified = options
            .dialect
            .qualify(self.scopes.current().qualified.as_deref(), &name);

        let id = self.scopes.push(qualified.clone());
        self.open_spans.push(token.span.clone());
        self.prescan_labels(id);
        debug!(
            scope = %qualified,
            depth = self.scopes.depth(),
            line = self.line_no,
            labels = self.scopes.get(id).labels.len(),
            "open scope"
        );

        self.ensure_line_start();
        match options.dialect.markers {
            ScopeMarkers::Cpp => {
                let _ = writeln!(self.out, "#define scope {qualified}");
                let _ = writeln!(self.out, "{qualified}:");
            }
            ScopeMarkers::Fn => {
                let _ = writeln!(self.out, ".fn {qualified}");
            }
        }
        self.emit_line_marker();
    }

    fn close_scope(&mut self, token: &Token<'src>) -> Result<(), Diag> {
        if self.scopes.depth() == 0 {
            return self.unbalanced_close(token);
        }
        self.pop_scope();
        Ok(())
    }

    fn unbalanced_close(&mut self, token: &Token<'src>) -> Result<(), Diag> {
        let message = "`}` does not close any open scope";
        let help = "remove the brace, or open a scope with `name: {`";
        match self.options.unbalanced_close {
            UnbalancedClose::Error => Err(Diag::error(self.file, token.span.clone(), message)
                .with_code(codes::UNBALANCED_CLOSE)
                .with_help(help)),
            UnbalancedClose::Ignore => {
                self.diags.push(
                    Diag::warning(self.file, token.span.clone(), message)
                        .with_code(codes::UNBALANCED_CLOSE)
                        .with_help(help),
                );
                self.out.push_str(token.text);
                Ok(())
            }
        }
    }

    fn pop_scope(&mut self) {
        let Some(scope) = self.scopes.pop() else {
            return;
        };
        self.open_spans.pop();
        debug!(
            scope = scope.qualified.as_deref().unwrap_or_default(),
            line = self.line_no,
            "close scope"
        );

        self.ensure_line_start();
        match self.options.dialect.markers {
            ScopeMarkers::Cpp => {
                let _ = writeln!(self.out, "#undef scope");
                if let Some(parent) = self.scopes.current().qualified.as_deref() {
                    let _ = writeln!(self.out, "#define scope {parent}");
                }
            }
            ScopeMarkers::Fn => {
                let _ = writeln!(self.out, ".endfn");
            }
        }
        self.emit_line_marker();
    }

    fn close_remaining(&mut self) {
        while self.scopes.depth() > 0 {
            let name = self.scopes.current().qualified.clone().unwrap_or_default();
            let span = self
                .open_spans
                .last()
                .cloned()
                .unwrap_or(self.source.len()..self.source.len());
            self.diags.push(
                Diag::warning(
                    self.file,
                    span,
                    format!("scope `{name}` is still open at end of input"),
                )
                .with_code(codes::UNCLOSED_SCOPE)
                .with_help("add the missing `}`"),
            );
            self.pop_scope();
        }
    }

    /// Registers every local label the block defines at its own depth, so
    /// references ahead of a definition resolve like the ones after it.
    fn prescan_labels(&mut self, id: ScopeId) {
        let options = self.options;
        let mut ahead = self.scanner.clone();
        let mut first_seen: FxHashMap<&'src str, Span> = FxHashMap::default();
        let mut depth = 0usize;
        let mut classified = false;
        let mut significant = false;

        while let Some(token) = ahead.next_token() {
            let defined = match token.kind {
                TokenKind::Whitespace | TokenKind::Comment => None,
                TokenKind::EndOfLine(None) => {
                    classified = false;
                    significant = false;
                    None
                }
                TokenKind::EndOfLine(Some(ScopeMarker::Close)) => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    classified = false;
                    significant = false;
                    None
                }
                TokenKind::EndOfLine(Some(ScopeMarker::Open(name))) => {
                    let defined = name.filter(|_| depth == 0);
                    depth += 1;
                    classified = false;
                    significant = false;
                    defined
                }
                TokenKind::Identifier(ident) if !classified && ident.label_def => {
                    significant = true;
                    options
                        .dialect
                        .local_name(ident.name)
                        .filter(|_| depth == 0)
                }
                TokenKind::Identifier(_) => {
                    classified = true;
                    significant = true;
                    None
                }
                TokenKind::Other if token.text == "#" && !significant => {
                    classified = true;
                    significant = true;
                    None
                }
                _ => {
                    significant = true;
                    None
                }
            };

            let Some(local) = defined else {
                continue;
            };
            if let Some(first) = first_seen.get(local) {
                let scope = self.scopes.get(id).qualified.clone().unwrap_or_default();
                self.diags.push(
                    Diag::warning(
                        self.file,
                        token.span.clone(),
                        format!("local label `{local}` is defined more than once in `{scope}`"),
                    )
                    .with_code(codes::DUPLICATE_LABEL)
                    .with_label(DiagLabel {
                        file: self.file,
                        span: first.clone(),
                        message: "first definition; references resolve here".to_string(),
                    }),
                );
                continue;
            }
            first_seen.insert(local, token.span.clone());

            let scope = self.scopes.get_mut(id);
            let symbol = options.dialect.qualify(scope.qualified.as_deref(), local);
            trace!(label = local, symbol = %symbol, "register local label");
            scope.labels.define_if_absent(local, symbol);
        }
    }

    fn ensure_line_start(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
    }

    fn emit_line_marker(&mut self) {
        if self.options.line_markers {
            let _ = writeln!(self.out, "# {} \"{}\"", self.line_no, self.file_name);
        }
    }
}

fn assign_separator<'t>(text: &'t str, name: &str, target: &str) -> &'t str {
    text.get(name.len()..text.len() - target.len()).unwrap_or(" = ")
}
