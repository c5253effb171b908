//! Cursored editable token sequence.
//!
//! Directive handlers walk and rewrite one [`TokenStream`]. The cursor
//! only moves forward during normal processing; handlers may splice new
//! tokens in at the cursor (they become the next tokens processed) or
//! delete a range ahead of it. Consuming past the end of the stream is a
//! fatal diagnostic carrying the handler's context message.

use std::ops::Range;

use crate::assembler::preprocessor::PreprocessError;
use crate::assembler::token::{Token, TokenKind};

/// An ordered token sequence with a cursor.
#[derive(Debug, Clone, Default)]
pub struct TokenStream {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenStream {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Cursor position.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Move the cursor to an absolute position.
    #[inline]
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Whether the cursor has passed the last token.
    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// The token under the cursor, if any.
    #[inline]
    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// The token at an absolute position.
    #[inline]
    pub fn get(&self, i: usize) -> Option<&Token> {
        self.tokens.get(i)
    }

    /// The kind at an absolute position.
    #[inline]
    pub fn kind_at(&self, i: usize) -> Option<TokenKind> {
        self.tokens.get(i).map(|t| t.kind)
    }

    /// Advance the cursor past the current token without inspecting it.
    #[inline]
    pub fn advance(&mut self) {
        self.pos += 1;
    }

    /// Consume and return the current token.
    pub fn consume(&mut self, context: &str) -> Result<Token, PreprocessError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| PreprocessError::UnexpectedEof(context.to_string()))?;
        self.pos += 1;
        Ok(token)
    }

    /// Consume the current token, requiring one of the given kinds.
    pub fn consume_expecting(
        &mut self,
        kinds: &[TokenKind],
        context: &str,
    ) -> Result<Token, PreprocessError> {
        let token = self.consume(context)?;
        if kinds.contains(&token.kind) {
            Ok(token)
        } else {
            Err(PreprocessError::UnexpectedToken {
                found: token.text,
                context: context.to_string(),
            })
        }
    }

    /// Whether the current token has one of the given kinds.
    ///
    /// End-of-stream is a fatal diagnostic: a handler asking this question
    /// always expects more input.
    pub fn is_any(&self, kinds: &[TokenKind], context: &str) -> Result<bool, PreprocessError> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| PreprocessError::UnexpectedEof(context.to_string()))?;
        Ok(kinds.contains(&token.kind))
    }

    /// Skip spaces and tabs.
    pub fn skip_inline_ws(&mut self) {
        while self
            .peek()
            .is_some_and(|t| t.kind.is_inline_ws())
        {
            self.pos += 1;
        }
    }

    /// Skip spaces, tabs and newlines.
    pub fn skip_ws(&mut self) {
        while self.peek().is_some_and(|t| t.kind.is_ws()) {
            self.pos += 1;
        }
    }

    /// Insert tokens at an absolute position.
    pub fn splice(&mut self, at: usize, tokens: Vec<Token>) {
        self.tokens.splice(at..at, tokens);
    }

    /// Delete a token range ahead of the cursor.
    pub fn delete(&mut self, range: Range<usize>) {
        self.tokens.drain(range);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::tokenizer::tokenize;

    fn stream(source: &str) -> TokenStream {
        TokenStream::new(tokenize(source))
    }

    #[test]
    fn test_consume_walks_forward() {
        let mut s = stream("a b");
        assert_eq!(s.consume("ctx").unwrap().text, "a");
        assert_eq!(s.consume("ctx").unwrap().text, " ");
        assert_eq!(s.consume("ctx").unwrap().text, "b");
        assert!(matches!(
            s.consume("after end"),
            Err(PreprocessError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn test_consume_expecting() {
        let mut s = stream("name 5");
        let tok = s
            .consume_expecting(&[TokenKind::Symbol], "expected name")
            .unwrap();
        assert_eq!(tok.text, "name");

        let err = s
            .consume_expecting(&[TokenKind::Symbol], "expected name")
            .unwrap_err();
        assert!(matches!(err, PreprocessError::UnexpectedToken { .. }));
    }

    #[test]
    fn test_is_any_faults_at_end() {
        let s = stream("");
        assert!(matches!(
            s.is_any(&[TokenKind::Symbol], "ctx"),
            Err(PreprocessError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn test_skip_inline_ws_stops_at_newline() {
        let mut s = stream(" \t\nx");
        s.skip_inline_ws();
        assert_eq!(s.peek().unwrap().kind, TokenKind::Newline);
        s.skip_ws();
        assert_eq!(s.peek().unwrap().text, "x");
    }

    #[test]
    fn test_splice_inserts_before_cursor_target() {
        let mut s = stream("a c");
        s.advance(); // past 'a'
        s.splice(s.pos(), tokenize("b"));
        assert_eq!(s.peek().unwrap().text, "b");
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn test_delete_range() {
        let mut s = stream("a b c");
        s.delete(1..4); // ' b '
        assert_eq!(s.len(), 2);
        assert_eq!(s.get(1).unwrap().text, "c");
    }
}
