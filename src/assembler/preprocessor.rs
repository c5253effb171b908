//! The assembler preprocessor.
//!
//! A straight-line, left-to-right transformation of one token stream into
//! output bytes. Directive handlers rewrite the stream in place starting
//! at the cursor; inserted tokens are the next tokens processed, so macro
//! expansions and symbol replacements are themselves reprocessed.
//!
//! Alongside directive handling, the main loop collapses runs of blank
//! lines and converts leading spaces into tabs up to the current scope
//! depth (`.scope` raises the target indent, `.scend` lowers it).
//!
//! Every diagnostic is fatal: the first one abandons the run, the state
//! moves to [`PreprocessState::ProcessedFail`], and the output sink is
//! flushed as-is. A clean run ends in [`PreprocessState::ProcessedSuccess`].

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::assembler::stream::TokenStream;
use crate::assembler::token::{Token, TokenKind, VarType};
use crate::assembler::tokenizer::tokenize;

/// Extension of the intermediate output file.
pub const PROCESSED_EXTENSION: &str = "bi";

/// Preprocessor diagnostics. All are fatal.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("unexpected end of input: {0}")]
    UnexpectedEof(String),

    #[error("unexpected token `{found}`: {context}")]
    UnexpectedToken { found: String, context: String },

    #[error("unknown macro `{name}` with {arity} arguments")]
    UnknownMacro { name: String, arity: usize },

    #[error("ambiguous invocation: several macros named `{name}` take {arity} arguments")]
    AmbiguousMacro { name: String, arity: usize },

    #[error("macro `{name}` with {arity} arguments is already defined")]
    DuplicateMacro { name: String, arity: usize },

    #[error("unclosed scope after #macret")]
    UnclosedScope,

    #[error("unclosed conditional block")]
    UnclosedConditional,

    #[error("include file not found: {0}")]
    MissingInclude(String),

    #[error("multiple matching files in system include directories: {0}")]
    AmbiguousInclude(String),

    #[error("#macret outside of a macro invocation")]
    StrayMacret,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Where a preprocessing run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreprocessState {
    Unprocessed,
    Processing,
    ProcessedSuccess,
    ProcessedFail,
}

/// A macro parameter: name plus optional declared type.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Option<VarType>,
}

/// A parameterised macro. Identity is `(name, arity)`.
#[derive(Debug, Clone)]
pub struct Macro {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<VarType>,
    pub body: Vec<Token>,
}

impl Macro {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// One live `#invoke`, awaiting its `#macret` or closing `.scend`.
#[derive(Debug, Clone)]
struct Frame {
    /// Symbol the return value binds to, when the invoker named one.
    output: Option<String>,
    return_type: Option<VarType>,
    /// Scope depth at the moment of invocation; the `.scend` that brings
    /// the depth back here closes this frame.
    scope_depth: i32,
}

/// Output sink wrapper that remembers the last byte written.
struct Emitter<'a> {
    sink: &'a mut dyn Write,
    last_byte: Option<u8>,
}

impl<'a> Emitter<'a> {
    fn new(sink: &'a mut dyn Write) -> Self {
        Self {
            sink,
            last_byte: None,
        }
    }

    fn write_str(&mut self, text: &str) -> io::Result<()> {
        if !text.is_empty() {
            self.sink.write_all(text.as_bytes())?;
            self.last_byte = text.bytes().last();
        }
        Ok(())
    }

    fn last_byte(&self) -> Option<u8> {
        self.last_byte
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// The preprocessor: token stream, symbol and macro tables, invocation
/// stack, and include search paths.
pub struct Preprocessor {
    stream: TokenStream,
    symbols: HashMap<String, Vec<Token>>,
    macros: HashMap<String, Vec<Macro>>,
    invocations: Vec<Frame>,
    current_indent: i32,
    target_indent: i32,
    state: PreprocessState,
    /// Directory of the file being preprocessed; quote includes resolve
    /// against it.
    source_dir: PathBuf,
    /// System include directories searched by the angle form.
    include_dirs: Vec<PathBuf>,
}

impl Preprocessor {
    /// Build a preprocessor over a source file.
    pub fn from_file(path: &Path, include_dirs: Vec<PathBuf>) -> Result<Self, PreprocessError> {
        let source = fs::read_to_string(path)?;
        let source_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        Ok(Self::from_source(&source, source_dir, include_dirs))
    }

    /// Build a preprocessor over in-memory source text.
    pub fn from_source(
        source: &str,
        source_dir: impl Into<PathBuf>,
        include_dirs: Vec<PathBuf>,
    ) -> Self {
        Self {
            stream: TokenStream::new(tokenize(source)),
            symbols: HashMap::new(),
            macros: HashMap::new(),
            invocations: Vec::new(),
            current_indent: 0,
            target_indent: 0,
            state: PreprocessState::Unprocessed,
            source_dir: source_dir.into(),
            include_dirs,
        }
    }

    /// Where the run stands.
    pub fn state(&self) -> PreprocessState {
        self.state
    }

    /// Default output path: the input with the `.bi` extension.
    pub fn output_path_for(input: &Path) -> PathBuf {
        input.with_extension(PROCESSED_EXTENSION)
    }

    /// Preprocess into an explicit sink.
    ///
    /// The sink is flushed on every exit path, success or fatal.
    pub fn preprocess(&mut self, sink: &mut dyn Write) -> Result<(), PreprocessError> {
        debug_assert_eq!(self.state, PreprocessState::Unprocessed);
        self.state = PreprocessState::Processing;
        log::debug!("preprocessing {} tokens", self.stream.len());

        let mut emitter = Emitter::new(sink);
        let result = self.run(&mut emitter);
        let flushed = emitter.flush();

        match result {
            Ok(()) => {
                self.state = PreprocessState::ProcessedSuccess;
                flushed?;
                Ok(())
            }
            Err(e) => {
                self.state = PreprocessState::ProcessedFail;
                log::error!("preprocessing failed: {}", e);
                Err(e)
            }
        }
    }

    /// Preprocess to a file.
    pub fn preprocess_to_file(&mut self, out_path: &Path) -> Result<(), PreprocessError> {
        let mut file = io::BufWriter::new(fs::File::create(out_path)?);
        self.preprocess(&mut file)
    }

    // ---------------------------------------------------------------- main loop

    fn run(&mut self, emitter: &mut Emitter) -> Result<(), PreprocessError> {
        while let Some(token) = self.stream.peek() {
            let kind = token.kind;
            let is_defined_symbol =
                kind == TokenKind::Symbol && self.symbols.contains_key(&token.text);

            // Collapse runs of blank lines.
            if kind == TokenKind::Newline && emitter.last_byte() == Some(b'\n') {
                self.stream.advance();
                continue;
            }

            // Leading-tab bookkeeping for the current line.
            if kind == TokenKind::Tab {
                self.current_indent += 1;
            } else if kind == TokenKind::Newline {
                self.current_indent = 0;
            }

            // A .scend lowers the target before it is emitted, and closes
            // the innermost invocation frame when it returns to its depth.
            if kind == TokenKind::Scend {
                self.target_indent -= 1;
                if self
                    .invocations
                    .last()
                    .is_some_and(|f| f.scope_depth == self.target_indent)
                {
                    self.invocations.pop();
                }
            }

            // Re-indent under-indented lines: drop spaces, pad with tabs.
            if self.current_indent < self.target_indent {
                if kind == TokenKind::Space {
                    self.stream.advance();
                    continue;
                }
                if kind != TokenKind::Tab && kind != TokenKind::Newline {
                    while self.current_indent < self.target_indent {
                        emitter.write_str("\t")?;
                        self.current_indent += 1;
                    }
                }
            }

            if kind.is_directive() {
                self.dispatch(kind)?;
            } else if is_defined_symbol {
                let token = self.stream.consume("symbol")?;
                let replacement = self.symbols[&token.text].clone();
                log::trace!("substituting `{}` ({} tokens)", token.text, replacement.len());
                self.stream.splice(self.stream.pos(), replacement);
            } else {
                let token = self.stream.consume("token")?;
                emitter.write_str(&token.text)?;
                if kind == TokenKind::Scope {
                    self.target_indent += 1;
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, kind: TokenKind) -> Result<(), PreprocessError> {
        log::trace!("directive {:?} at {}", kind, self.stream.pos());
        match kind {
            TokenKind::Include => self.handle_include(),
            TokenKind::Define => self.handle_define(),
            TokenKind::Undef => self.handle_undef(),
            TokenKind::Macro => self.handle_macro(),
            TokenKind::Macret => self.handle_macret(),
            TokenKind::Invoke => self.handle_invoke(),
            TokenKind::Macend => {
                let token = self.stream.consume("#macend")?;
                Err(PreprocessError::UnexpectedToken {
                    found: token.text,
                    context: "#macend outside of a macro definition".to_string(),
                })
            }
            TokenKind::Else | TokenKind::Endif => {
                self.stream.consume("conditional closer")?;
                self.stream.skip_inline_ws();
                Ok(())
            }
            _ => self.handle_conditional(kind),
        }
    }

    // ---------------------------------------------------------------- includes

    fn handle_include(&mut self) -> Result<(), PreprocessError> {
        self.stream.consume("#include")?;
        self.stream.skip_inline_ws();

        let path = if self
            .stream
            .is_any(&[TokenKind::StrLit], "missing include filename")?
        {
            // Quote form: relative to the including file's directory.
            let name = strip_quotes(&self.stream.consume("include path")?.text);
            let candidate = self.source_dir.join(&name);
            if !candidate.is_file() {
                return Err(PreprocessError::MissingInclude(
                    candidate.display().to_string(),
                ));
            }
            candidate
        } else {
            // Angle form: search the system include directories.
            self.stream
                .consume_expecting(&[TokenKind::OpLt], "expected '<' after #include")?;
            let name = strip_quotes(
                &self
                    .stream
                    .consume_expecting(&[TokenKind::StrLit], "expected include filename")?
                    .text,
            );
            self.stream
                .consume_expecting(&[TokenKind::OpGt], "expected '>' after include filename")?;

            let mut matches: Vec<PathBuf> = self
                .include_dirs
                .iter()
                .map(|dir| dir.join(&name))
                .filter(|p| p.is_file())
                .collect();
            match matches.len() {
                0 => return Err(PreprocessError::MissingInclude(name)),
                1 => matches.remove(0),
                _ => return Err(PreprocessError::AmbiguousInclude(name)),
            }
        };

        log::debug!("including {}", path.display());
        let source = fs::read_to_string(&path)?;
        let tokens = tokenize(&source);
        self.stream.splice(self.stream.pos(), tokens);
        Ok(())
    }

    // ---------------------------------------------------------------- symbols

    fn handle_define(&mut self) -> Result<(), PreprocessError> {
        self.stream.consume("#define")?;
        self.stream.skip_inline_ws();

        let symbol = self
            .stream
            .consume_expecting(&[TokenKind::Symbol], "expected symbol after #define")?
            .text;
        self.stream.skip_inline_ws();

        let mut replacement = Vec::new();
        while !self
            .stream
            .is_any(&[TokenKind::Newline], "expected end of line after #define")?
        {
            replacement.push(self.stream.consume("#define value")?);
        }

        // Redefinition replaces silently.
        self.symbols.insert(symbol, replacement);
        Ok(())
    }

    fn handle_undef(&mut self) -> Result<(), PreprocessError> {
        self.stream.consume("#undef")?;
        self.stream.skip_inline_ws();

        let symbol = self
            .stream
            .consume_expecting(&[TokenKind::Symbol], "expected symbol after #undef")?
            .text;
        self.stream.skip_inline_ws();

        // Removing an undefined symbol is a no-op.
        self.symbols.remove(&symbol);
        Ok(())
    }

    /// A symbol's comparison value: its replacement texts concatenated,
    /// empty when undefined.
    fn symbol_value(&self, symbol: &str) -> String {
        self.symbols
            .get(symbol)
            .map(|tokens| tokens.iter().map(|t| t.text.as_str()).collect())
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------- macros

    fn handle_macro(&mut self) -> Result<(), PreprocessError> {
        self.stream.consume("#macro")?;
        self.stream.skip_inline_ws();

        let name = self
            .stream
            .consume_expecting(&[TokenKind::Symbol], "expected macro name")?
            .text;
        self.stream.skip_ws();
        self.stream
            .consume_expecting(&[TokenKind::OpenParen], "expected '(' after macro name")?;

        let mut params = Vec::new();
        while !self
            .stream
            .is_any(&[TokenKind::CloseParen], "expected macro header")?
        {
            self.stream.skip_ws();
            let pname = self
                .stream
                .consume_expecting(&[TokenKind::Symbol], "expected parameter name")?
                .text;

            self.stream.skip_ws();
            let ty = if self.stream.is_any(&[TokenKind::Colon], "expected macro header")? {
                self.stream.consume("parameter type")?;
                self.stream.skip_ws();
                let token = self
                    .stream
                    .consume_expecting(TokenKind::VARIABLE_TYPES, "expected parameter type")?;
                VarType::from_kind(token.kind)
            } else {
                None
            };
            params.push(Param { name: pname, ty });

            self.stream.skip_ws();
            if self.stream.is_any(&[TokenKind::Comma], "expected macro header")? {
                self.stream.consume("','")?;
            }
        }
        self.stream
            .consume_expecting(&[TokenKind::CloseParen], "expected ')'")?;
        self.stream.skip_ws();

        let return_type = if self
            .stream
            .is_any(&[TokenKind::Colon], "expected macro definition")?
        {
            self.stream.consume("return type")?;
            self.stream.skip_ws();
            let token = self
                .stream
                .consume_expecting(TokenKind::VARIABLE_TYPES, "expected return type")?;
            VarType::from_kind(token.kind)
        } else {
            None
        };

        self.stream.skip_ws();
        let mut body = Vec::new();
        while !self
            .stream
            .is_any(&[TokenKind::Macend], "expected macro definition")?
        {
            body.push(self.stream.consume("macro body")?);
        }
        self.stream
            .consume_expecting(&[TokenKind::Macend], "expected '#macend'")?;

        let arity = params.len();
        let defined = self.macros.entry(name.clone()).or_default();
        if defined.iter().any(|m| m.arity() == arity) {
            return Err(PreprocessError::DuplicateMacro { name, arity });
        }
        log::debug!("defined macro {}/{}", name, arity);
        defined.push(Macro {
            name,
            params,
            return_type,
            body,
        });
        Ok(())
    }

    fn handle_invoke(&mut self) -> Result<(), PreprocessError> {
        self.stream.consume("#invoke")?;
        self.stream.skip_inline_ws();

        let name = self
            .stream
            .consume_expecting(&[TokenKind::Symbol], "expected macro name after #invoke")?
            .text;
        self.stream.skip_ws();
        self.stream
            .consume_expecting(&[TokenKind::OpenParen], "expected '(' after macro name")?;

        // Each argument runs to the next comma or ')' at parenthesis depth
        // zero; newline tokens inside an argument are skipped.
        let mut args: Vec<Vec<Token>> = Vec::new();
        while !self
            .stream
            .is_any(&[TokenKind::CloseParen], "expected ')'")?
        {
            self.stream.skip_ws();

            let mut arg = Vec::new();
            let mut depth = 0usize;
            loop {
                let token = self
                    .stream
                    .peek()
                    .ok_or_else(|| PreprocessError::UnexpectedEof("expected ')'".to_string()))?;
                match token.kind {
                    TokenKind::Comma | TokenKind::CloseParen if depth == 0 => break,
                    TokenKind::Newline => {
                        self.stream.advance();
                        continue;
                    }
                    TokenKind::OpenParen => depth += 1,
                    TokenKind::CloseParen => depth -= 1,
                    _ => {}
                }
                arg.push(self.stream.consume("macro argument")?);
            }
            args.push(arg);

            if self.stream.is_any(&[TokenKind::Comma], "expected ')'")? {
                self.stream.consume("','")?;
            }
        }
        self.stream
            .consume_expecting(&[TokenKind::CloseParen], "expected ')'")?;

        // Optional return symbol, same line only.
        self.stream.skip_inline_ws();
        let output = if self
            .stream
            .peek()
            .is_some_and(|t| t.kind == TokenKind::Symbol)
        {
            Some(self.stream.consume("return symbol")?.text)
        } else {
            None
        };

        // Select by (name, arity).
        let arity = args.len();
        let candidates: Vec<&Macro> = self
            .macros
            .get(&name)
            .map(|list| list.iter().filter(|m| m.arity() == arity).collect())
            .unwrap_or_default();
        let mac = match candidates.len() {
            0 => return Err(PreprocessError::UnknownMacro { name, arity }),
            1 => candidates[0].clone(),
            _ => return Err(PreprocessError::AmbiguousMacro { name, arity }),
        };

        // Splice in:  [.equ OUT 0 : TR]  .scope  .equ p_i arg_i : T_i ...
        //             body  .scend   and push the invocation frame.
        let mut expansion = Vec::new();
        if let (Some(out), Some(ret)) = (&output, mac.return_type) {
            expansion.extend(tokenize(&format!(".equ {} 0 : {}\n", out, ret.name())));
        }
        expansion.push(Token::new(TokenKind::Scope, ".scope"));
        expansion.push(Token::new(TokenKind::Newline, "\n"));
        for (param, arg) in mac.params.iter().zip(&args) {
            expansion.extend(tokenize(&format!(".equ {} ", param.name)));
            expansion.extend(arg.iter().cloned());
            match param.ty {
                Some(ty) => expansion.extend(tokenize(&format!(" : {}\n", ty.name()))),
                None => expansion.push(Token::new(TokenKind::Newline, "\n")),
            }
        }
        expansion.extend(mac.body.iter().cloned());
        expansion.push(Token::new(TokenKind::Newline, "\n"));
        expansion.push(Token::new(TokenKind::Scend, ".scend"));

        log::debug!(
            "invoking {}/{} ({} tokens)",
            mac.name,
            arity,
            expansion.len()
        );
        self.invocations.push(Frame {
            output,
            return_type: mac.return_type,
            scope_depth: self.target_indent,
        });
        self.stream.splice(self.stream.pos(), expansion);
        Ok(())
    }

    fn handle_macret(&mut self) -> Result<(), PreprocessError> {
        self.stream.consume("#macret")?;
        self.stream.skip_inline_ws();

        let frame = self
            .invocations
            .last()
            .cloned()
            .ok_or(PreprocessError::StrayMacret)?;

        // The return expression runs to end of line, and only exists when
        // the macro declares a return type.
        let mut ret_expr = Vec::new();
        if frame.return_type.is_some() {
            while !self
                .stream
                .is_any(&[TokenKind::Newline], "expected end of line after #macret")?
            {
                ret_expr.push(self.stream.consume("#macret expression")?);
            }
        }

        // Fast-forward past the rest of the macro body: consume until the
        // unmatched .scend inserted by the invoke expansion, keeping the
        // target indent in step with the scope tokens skipped over.
        let mut depth: i32 = 0;
        let mut closed = false;
        while !self.stream.is_at_end() {
            match self.stream.peek().map(|t| t.kind) {
                Some(TokenKind::Scope) => {
                    depth += 1;
                    self.target_indent += 1;
                }
                Some(TokenKind::Scend) => {
                    depth -= 1;
                    self.target_indent -= 1;
                }
                _ => {}
            }
            self.stream.advance();
            if depth < 0 {
                closed = true;
                break;
            }
        }
        if !closed {
            return Err(PreprocessError::UnclosedScope);
        }

        if let (Some(out), Some(ret)) = (&frame.output, frame.return_type) {
            let mut insert = tokenize(&format!(".equ {} ", out));
            insert.extend(ret_expr);
            insert.extend(tokenize(&format!(" : {}\n", ret.name())));
            self.stream.splice(self.stream.pos(), insert);
        }

        self.invocations.pop();
        Ok(())
    }

    // ---------------------------------------------------------------- conditionals

    fn handle_conditional(&mut self, kind: TokenKind) -> Result<(), PreprocessError> {
        self.stream.consume("conditional directive")?;
        self.stream.skip_inline_ws();

        let symbol = self
            .stream
            .consume_expecting(
                &[TokenKind::Symbol],
                "expected symbol after conditional directive",
            )?
            .text;
        self.stream.skip_inline_ws();

        let met = match kind {
            TokenKind::Ifdef | TokenKind::Elsedef => self.symbols.contains_key(&symbol),
            TokenKind::Ifndef | TokenKind::Elsendef => !self.symbols.contains_key(&symbol),
            _ => {
                // Lexicographic comparison against a quoted string.
                let comparand = strip_quotes(
                    &self
                        .stream
                        .consume_expecting(
                            &[TokenKind::StrLit],
                            "expected string literal in conditional",
                        )?
                        .text,
                );
                self.stream.skip_inline_ws();
                let value = self.symbol_value(&symbol);
                match kind {
                    TokenKind::Ifequ | TokenKind::Elseequ => value == comparand,
                    TokenKind::Ifnequ | TokenKind::Elsenequ => value != comparand,
                    TokenKind::Ifless | TokenKind::Elseless => value < comparand,
                    _ => value > comparand, // Ifmore | Elsemore
                }
            }
        };

        self.resolve_conditional(met)
    }

    /// Rewrite the stream for one resolved condition.
    ///
    /// When the condition is met, every chained alternate up to the
    /// matching `#endif` is deleted and a comment marker takes the
    /// opener's place. When it is not, the cursor jumps to the first
    /// depth-zero alternate (or to the `#endif` when there is none) so
    /// directive processing re-enters there.
    fn resolve_conditional(&mut self, met: bool) -> Result<(), PreprocessError> {
        let mut depth: i32 = 0;
        let mut cursor = self.stream.pos();
        let mut next_block = None;
        let mut end_if = None;

        while let Some(kind) = self.stream.kind_at(cursor) {
            if depth == 0 && kind == TokenKind::Endif {
                end_if = Some(cursor);
                break;
            }
            if depth == 0 && kind.is_conditional_alternate() {
                if next_block.is_none() {
                    next_block = Some(cursor);
                }
                if !met {
                    break;
                }
            }

            if kind.is_conditional_opener() {
                depth += 1;
            } else if kind == TokenKind::Endif {
                depth -= 1;
            }
            cursor += 1;
        }

        if met {
            let end = end_if.ok_or(PreprocessError::UnclosedConditional)?;
            if let Some(block) = next_block {
                self.stream.delete(block..end);
            }
            self.stream.splice(
                self.stream.pos(),
                vec![Token::new(TokenKind::LineComment, "; conditional")],
            );
        } else {
            let target = next_block
                .or(end_if)
                .ok_or(PreprocessError::UnclosedConditional)?;
            self.stream.set_pos(target);
        }
        Ok(())
    }
}

/// Strip the outer quotes from a string literal's text.
fn strip_quotes(text: &str) -> String {
    text.trim_start_matches('"')
        .trim_end_matches('"')
        .to_string()
}
