use logos::Logos;

use crate::source::Span;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
enum RawToken {
    #[regex(r"([ \t\f]|\\\n)+")]
    Whitespace,

    #[token("\n")]
    Newline,

    #[regex(r";[^\n]*", allow_greedy = true)]
    #[regex(r"//[^\n]*", allow_greedy = true)]
    #[regex(r"/\*([^*]|\*+[^*/])*\*+/", allow_greedy = true)]
    Comment,

    #[regex(r#""([^"\\\n]|\\.)*"?"#, allow_greedy = true)]
    #[regex(r#"'([^'\\\n]|\\.)*'?"#, allow_greedy = true)]
    String,

    #[regex(r"\.?[A-Za-z_][A-Za-z0-9_.]*")]
    Ident,

    #[regex(r"\.?[A-Za-z_][A-Za-z0-9_.]*:")]
    LabelDef,

    #[regex(r"\.?[A-Za-z_][A-Za-z0-9_.]*@\.?[A-Za-z_][A-Za-z0-9_.]*")]
    AtAlias,

    #[regex(r"\.?[A-Za-z_][A-Za-z0-9_.]*[ \t]*=[ \t]*\.?[A-Za-z_][A-Za-z0-9_.]*")]
    AssignAlias,

    #[regex(r"@[A-Za-z_][A-Za-z0-9_]*")]
    Argument,

    #[regex(r"\$[A-Za-z_][A-Za-z0-9_]*")]
    Variable,

    #[regex(r"[0-9][A-Za-z0-9_]*")]
    Number,

    #[regex(r"\[[-+]?")]
    IndirectBegin,

    #[regex(r"[-+]?\]")]
    IndirectEnd,

    #[regex(r"`[^`\n]*`", allow_greedy = true)]
    Escape,

    #[token(",")]
    #[token("(")]
    #[token(")")]
    #[token("#")]
    #[token("-")]
    #[token("+")]
    #[token("~")]
    Punct,

    #[regex(r#"[^ \t\f\n\\A-Za-z0-9_.;/"'`@$\[\],()#+~{}-]+"#, allow_greedy = true)]
    #[regex(r"[\\/.@$`{}]")]
    Other,
}

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
enum RawMarker {
    #[regex(r"[ \t]*[A-Za-z_][A-Za-z0-9_]*[ \t]*:[ \t]*\{")]
    Open,

    #[regex(r"[ \t]*\{")]
    Anonymous,

    #[regex(r"[ \t]*\}")]
    Close,
}

/// Increment/decrement marker captured inside an indirect-address bracket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Increment,
    Decrement,
}

impl Step {
    fn from_sign(sign: u8) -> Option<Self> {
        match sign {
            b'+' => Some(Self::Increment),
            b'-' => Some(Self::Decrement),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Increment => "+",
            Self::Decrement => "-",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeMarker<'src> {
    /// `name: {`, or a bare `{` when the name is absent.
    Open(Option<&'src str>),
    Close,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AliasForm {
    /// `name@target`
    At,
    /// `name = target`
    Assign,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AliasSuffix<'src> {
    pub form: AliasForm,
    pub target: &'src str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ident<'src> {
    pub name: &'src str,
    pub alias: Option<AliasSuffix<'src>>,
    /// Lexeme ended in `:`.
    pub label_def: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind<'src> {
    Whitespace,
    Identifier(Ident<'src>),
    Argument(&'src str),
    Variable(&'src str),
    Number,
    IndirectBegin(Option<Step>),
    IndirectEnd(Option<Step>),
    EndOfLine(Option<ScopeMarker<'src>>),
    Comment,
    String,
    Escape(&'src str),
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'src> {
    pub kind: TokenKind<'src>,
    pub span: Span,
    pub text: &'src str,
}

/// Longest-match scanner. Never fails: bytes no pattern accepts come back as
/// one-character [`TokenKind::Other`] tokens. Clone it to look ahead.
#[derive(Clone, Debug)]
pub struct Scanner<'src> {
    source: &'src str,
    cursor: usize,
    at_line_start: bool,
    /// A `{` that was not a scope marker appeared earlier on this line.
    open_brace_on_line: bool,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            cursor: 0,
            at_line_start: true,
            open_brace_on_line: false,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Returns the token anchored at the cursor and advances past it, or
    /// `None` once the input is exhausted.
    pub fn next_token(&mut self) -> Option<Token<'src>> {
        let source = self.source;
        let rest = source.get(self.cursor..).filter(|rest| !rest.is_empty())?;

        let marker = if self.at_line_start {
            scan_marker(rest)
        } else if self.open_brace_on_line {
            None
        } else {
            scan_trailing_close(rest)
        };
        let (kind, len) = marker.unwrap_or_else(|| scan_raw(rest));

        let span = self.cursor..self.cursor + len;
        let text = &source[span.clone()];
        self.cursor = span.end;
        self.at_line_start = matches!(kind, TokenKind::EndOfLine(_));
        match kind {
            TokenKind::EndOfLine(None) => self.open_brace_on_line = false,
            TokenKind::Other if text.contains('{') => self.open_brace_on_line = true,
            _ => {}
        }

        Some(Token { kind, span, text })
    }

    /// Skips whitespace and returns the next token without touching `self`.
    pub fn peek_significant(&self) -> Option<(Token<'src>, Scanner<'src>)> {
        let mut ahead = self.clone();
        loop {
            let token = ahead.next_token()?;
            if token.kind != TokenKind::Whitespace {
                return Some((token, ahead));
            }
        }
    }
}

impl<'src> Iterator for Scanner<'src> {
    type Item = Token<'src>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

fn scan_marker(rest: &str) -> Option<(TokenKind<'_>, usize)> {
    let mut lexer = RawMarker::lexer(rest);
    let raw = lexer.next()?.ok()?;
    let text = lexer.slice();

    let marker = match raw {
        RawMarker::Open => {
            let name = text
                .trim_start_matches([' ', '\t'])
                .split([' ', '\t', ':'])
                .next()
                .unwrap_or_default();
            ScopeMarker::Open(Some(name))
        }
        RawMarker::Anonymous => ScopeMarker::Open(None),
        RawMarker::Close => ScopeMarker::Close,
    };

    Some((TokenKind::EndOfLine(Some(marker)), text.len()))
}

/// A `}` after a statement closes the scope when only blanks, further `}`s
/// and a comment follow it on the line.
fn scan_trailing_close(rest: &str) -> Option<(TokenKind<'_>, usize)> {
    let mut lexer = RawMarker::lexer(rest);
    if lexer.next()? != Ok(RawMarker::Close) {
        return None;
    }

    let len = lexer.span().end;
    only_closers_remain(&rest[len..])
        .then_some((TokenKind::EndOfLine(Some(ScopeMarker::Close)), len))
}

fn only_closers_remain(mut rest: &str) -> bool {
    loop {
        rest = rest.trim_start_matches([' ', '\t']);
        match rest.as_bytes().first().copied() {
            None | Some(b'\n' | b';') => return true,
            Some(b'}') => rest = &rest[1..],
            Some(b'/') => return rest.starts_with("//") || rest.starts_with("/*"),
            Some(_) => return false,
        }
    }
}

fn scan_raw(rest: &str) -> (TokenKind<'_>, usize) {
    let mut lexer = RawToken::lexer(rest);
    let Some(Ok(raw)) = lexer.next() else {
        let len = rest.chars().next().map_or(1, char::len_utf8);
        return (TokenKind::Other, len);
    };

    let text = lexer.slice();
    let kind = match raw {
        RawToken::Whitespace => TokenKind::Whitespace,
        RawToken::Newline => TokenKind::EndOfLine(None),
        RawToken::Comment => TokenKind::Comment,
        RawToken::String => TokenKind::String,
        RawToken::Ident => TokenKind::Identifier(Ident {
            name: text,
            alias: None,
            label_def: false,
        }),
        RawToken::LabelDef => TokenKind::Identifier(Ident {
            name: &text[..text.len() - 1],
            alias: None,
            label_def: true,
        }),
        RawToken::AtAlias => {
            let (name, target) = text.split_once('@').unwrap_or((text, ""));
            TokenKind::Identifier(Ident {
                name,
                alias: Some(AliasSuffix {
                    form: AliasForm::At,
                    target,
                }),
                label_def: false,
            })
        }
        RawToken::AssignAlias => {
            let (name, target) = text.split_once('=').unwrap_or((text, ""));
            TokenKind::Identifier(Ident {
                name: name.trim_end(),
                alias: Some(AliasSuffix {
                    form: AliasForm::Assign,
                    target: target.trim_start(),
                }),
                label_def: false,
            })
        }
        RawToken::Argument => TokenKind::Argument(&text[1..]),
        RawToken::Variable => TokenKind::Variable(&text[1..]),
        RawToken::Number => TokenKind::Number,
        RawToken::IndirectBegin => {
            TokenKind::IndirectBegin(text.bytes().nth(1).and_then(Step::from_sign))
        }
        RawToken::IndirectEnd => {
            TokenKind::IndirectEnd(text.bytes().next().and_then(Step::from_sign))
        }
        RawToken::Escape => TokenKind::Escape(&text[1..text.len() - 1]),
        RawToken::Punct | RawToken::Other => TokenKind::Other,
    };

    (kind, text.len())
}

/// GNU-style numeric local label reference such as `1b` or `42f`.
pub fn is_numeric_label_ref(text: &str) -> bool {
    let Some((last, digits)) = text.as_bytes().split_last() else {
        return false;
    };
    matches!(last, b'f' | b'F' | b'b' | b'B')
        && !digits.is_empty()
        && digits.iter().all(u8::is_ascii_digit)
}
