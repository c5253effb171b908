//! Regex-driven tokenizer.
//!
//! [`tokenize`] is a pure function from source text to a token list. An
//! ordered table of anchored patterns is tried at the current position;
//! the first match wins. Keyword patterns end in `\b` so `#defined` is a
//! symbol-ish run rather than a directive, and longer directives appear
//! before the directives they extend. A byte no pattern claims becomes a
//! one-character [`TokenKind::Unknown`] token, so no input is ever lost.

use regex::Regex;
use std::sync::LazyLock;

use crate::assembler::token::{Token, TokenKind};

/// Ordered pattern table; first match wins.
static TOKEN_SPEC: LazyLock<Vec<(Regex, TokenKind)>> = LazyLock::new(|| {
    let spec: &[(&str, TokenKind)] = &[
        (r"^ ", TokenKind::Space),
        (r"^\t", TokenKind::Tab),
        (r"^\n", TokenKind::Newline),
        // Comments before the lone-semicolon punctuation.
        (r"^;\*[^*]*\*+(?:[^;*][^*]*\*+)*;", TokenKind::BlockComment),
        (r"^;[^\n]*", TokenKind::LineComment),
        (r"^\{", TokenKind::OpenBrace),
        (r"^\}", TokenKind::CloseBrace),
        (r"^\[", TokenKind::OpenBracket),
        (r"^\]", TokenKind::CloseBracket),
        (r"^\(", TokenKind::OpenParen),
        (r"^\)", TokenKind::CloseParen),
        (r"^,", TokenKind::Comma),
        (r"^:", TokenKind::Colon),
        (r"^;", TokenKind::Semicolon),
        // Preprocessor directives; longer names before their prefixes.
        (r"^#include\b", TokenKind::Include),
        (r"^#macro\b", TokenKind::Macro),
        (r"^#macret\b", TokenKind::Macret),
        (r"^#macend\b", TokenKind::Macend),
        (r"^#invoke\b", TokenKind::Invoke),
        (r"^#define\b", TokenKind::Define),
        (r"^#undef\b", TokenKind::Undef),
        (r"^#ifdef\b", TokenKind::Ifdef),
        (r"^#ifndef\b", TokenKind::Ifndef),
        (r"^#ifequ\b", TokenKind::Ifequ),
        (r"^#ifnequ\b", TokenKind::Ifnequ),
        (r"^#ifless\b", TokenKind::Ifless),
        (r"^#ifmore\b", TokenKind::Ifmore),
        (r"^#elsedef\b", TokenKind::Elsedef),
        (r"^#elsendef\b", TokenKind::Elsendef),
        (r"^#elseequ\b", TokenKind::Elseequ),
        (r"^#elsenequ\b", TokenKind::Elsenequ),
        (r"^#elseless\b", TokenKind::Elseless),
        (r"^#elsemore\b", TokenKind::Elsemore),
        (r"^#else\b", TokenKind::Else),
        (r"^#endif\b", TokenKind::Endif),
        // Variable type keywords.
        (r"^BYTE\b", TokenKind::TypeByte),
        (r"^DBYTE\b", TokenKind::TypeDbyte),
        (r"^WORD\b", TokenKind::TypeWord),
        (r"^DWORD\b", TokenKind::TypeDword),
        (r"^CHAR\b", TokenKind::TypeChar),
        (r"^STRING\b", TokenKind::TypeString),
        (r"^FLOAT\b", TokenKind::TypeFloat),
        (r"^DOUBLE\b", TokenKind::TypeDouble),
        (r"^BOOLEAN\b", TokenKind::TypeBoolean),
        // Assembler directives; starred forms before their prefixes
        // (no \b after '*' - both sides are non-word characters).
        (r"^\.global\b", TokenKind::Global),
        (r"^\.extern\b", TokenKind::Extern),
        (r"^\.equ\b", TokenKind::Equ),
        (r"^\.org\b", TokenKind::Org),
        (r"^\.scope\b", TokenKind::Scope),
        (r"^\.scend\b", TokenKind::Scend),
        (r"^\.ddb\*", TokenKind::DdbHigh),
        (r"^\.ddb\b", TokenKind::Ddb),
        (r"^\.db\b", TokenKind::Db),
        (r"^\.ddw\*", TokenKind::DdwHigh),
        (r"^\.ddw\b", TokenKind::Ddw),
        (r"^\.dw\*", TokenKind::DwHigh),
        (r"^\.dw\b", TokenKind::Dw),
        (r"^\.ascii\b", TokenKind::Ascii),
        (r"^\.asciz\b", TokenKind::Asciz),
        (r"^\.advance\b", TokenKind::Advance),
        (r"^\.fill\b", TokenKind::Fill),
        (r"^\.space\b", TokenKind::SpaceDir),
        (r"^\.checkpc\b", TokenKind::Checkpc),
        (r"^\.align\b", TokenKind::Align),
        (r"^\.bss\*", TokenKind::BssAbs),
        (r"^\.bss\b", TokenKind::Bss),
        (r"^\.data\*", TokenKind::DataAbs),
        (r"^\.data\b", TokenKind::Data),
        (r"^\.code\*", TokenKind::CodeAbs),
        (r"^\.code\b", TokenKind::Code),
        (r"^\.stop\b", TokenKind::Stop),
        // '#' on its own marks a numeric immediate.
        (r"^#", TokenKind::NumberSign),
        // Literals.
        (r"^%[01]+", TokenKind::BinLit),
        (r"^@[0-7]+", TokenKind::OctLit),
        (r"^[0-9]+", TokenKind::DecLit),
        (r"^\$[0-9a-fA-F]+", TokenKind::HexLit),
        (r"^'.'", TokenKind::CharLit),
        (r#"^"[^"\n]*""#, TokenKind::StrLit),
        (r"^[a-zA-Z_][a-zA-Z0-9_]*", TokenKind::Symbol),
        // Operators; multi-character before single.
        (r"^\|\|", TokenKind::OpLogicalOr),
        (r"^&&", TokenKind::OpLogicalAnd),
        (r"^<<", TokenKind::OpShl),
        (r"^>>", TokenKind::OpShr),
        (r"^==", TokenKind::OpEq),
        (r"^!=", TokenKind::OpNe),
        (r"^<=", TokenKind::OpLe),
        (r"^>=", TokenKind::OpGe),
        (r"^\+", TokenKind::OpAdd),
        (r"^-", TokenKind::OpSub),
        (r"^\*", TokenKind::OpMul),
        (r"^/", TokenKind::OpDiv),
        (r"^%", TokenKind::OpMod),
        (r"^\^", TokenKind::OpXor),
        (r"^&", TokenKind::OpAnd),
        (r"^\|", TokenKind::OpOr),
        (r"^~", TokenKind::OpNot),
        (r"^!", TokenKind::OpLogicalNot),
        (r"^<", TokenKind::OpLt),
        (r"^>", TokenKind::OpGt),
    ];

    spec.iter()
        .map(|(pattern, kind)| (Regex::new(pattern).unwrap(), *kind))
        .collect()
});

/// Tokenize source text.
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = source;

    'outer: while !rest.is_empty() {
        for (regex, kind) in TOKEN_SPEC.iter() {
            if let Some(m) = regex.find(rest) {
                tokens.push(Token::new(*kind, m.as_str()));
                rest = &rest[m.end()..];
                continue 'outer;
            }
        }

        // Nothing claimed the next character; keep it as-is.
        let ch = rest.chars().next().unwrap();
        tokens.push(Token::new(TokenKind::Unknown, &rest[..ch.len_utf8()]));
        rest = &rest[ch.len_utf8()..];
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_directives() {
        assert_eq!(
            kinds("#define FOO 1"),
            vec![
                TokenKind::Define,
                TokenKind::Space,
                TokenKind::Symbol,
                TokenKind::Space,
                TokenKind::DecLit,
            ]
        );
        assert_eq!(kinds("#else\n")[0], TokenKind::Else);
        assert_eq!(kinds("#elsedef x")[0], TokenKind::Elsedef);
        assert_eq!(kinds("#ifnequ x \"y\"")[0], TokenKind::Ifnequ);
        assert_eq!(kinds("#endif\n")[0], TokenKind::Endif);
    }

    #[test]
    fn test_directive_requires_boundary() {
        // '#definex' is not a directive: '#' then symbol.
        assert_eq!(
            kinds("#definex"),
            vec![TokenKind::NumberSign, TokenKind::Symbol]
        );
    }

    #[test]
    fn test_directive_at_end_of_input() {
        assert_eq!(kinds("#macend"), vec![TokenKind::Macend]);
        assert_eq!(kinds(".scend"), vec![TokenKind::Scend]);
    }

    #[test]
    fn test_assembler_directives() {
        assert_eq!(
            kinds(".scope\n\t.equ x 5\n.scend"),
            vec![
                TokenKind::Scope,
                TokenKind::Newline,
                TokenKind::Tab,
                TokenKind::Equ,
                TokenKind::Space,
                TokenKind::Symbol,
                TokenKind::Space,
                TokenKind::DecLit,
                TokenKind::Newline,
                TokenKind::Scend,
            ]
        );
    }

    #[test]
    fn test_starred_directives() {
        assert_eq!(kinds(".dw* 5")[0], TokenKind::DwHigh);
        assert_eq!(kinds(".dw 5")[0], TokenKind::Dw);
        assert_eq!(kinds(".ddb* 5")[0], TokenKind::DdbHigh);
        assert_eq!(kinds(".data* ")[0], TokenKind::DataAbs);
    }

    #[test]
    fn test_number_literals() {
        assert_eq!(kinds("%1010")[0], TokenKind::BinLit);
        assert_eq!(kinds("@17")[0], TokenKind::OctLit);
        assert_eq!(kinds("42")[0], TokenKind::DecLit);
        assert_eq!(kinds("$FF1a")[0], TokenKind::HexLit);
        assert_eq!(kinds("#42")[..2], [TokenKind::NumberSign, TokenKind::DecLit]);
    }

    #[test]
    fn test_string_literals_do_not_merge() {
        let tokens = tokenize("\"a\" \"b\"");
        assert_eq!(tokens[0], Token::new(TokenKind::StrLit, "\"a\""));
        assert_eq!(tokens[2], Token::new(TokenKind::StrLit, "\"b\""));
    }

    #[test]
    fn test_char_literal() {
        assert_eq!(tokenize("'x'")[0], Token::new(TokenKind::CharLit, "'x'"));
    }

    #[test]
    fn test_comments() {
        assert_eq!(kinds("; a comment\n")[0], TokenKind::LineComment);
        let tokens = tokenize(";* multi\nline *; x");
        assert_eq!(tokens[0].kind, TokenKind::BlockComment);
        assert_eq!(tokens[0].text, ";* multi\nline *;");
    }

    #[test]
    fn test_variable_types() {
        assert_eq!(kinds("WORD ")[0], TokenKind::TypeWord);
        assert_eq!(kinds("DWORD,")[0], TokenKind::TypeDword);
        assert_eq!(kinds("BOOLEAN)")[0], TokenKind::TypeBoolean);
        // Not followed by a boundary: plain symbol.
        assert_eq!(kinds("WORDS")[0], TokenKind::Symbol);
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a<<2"),
            vec![TokenKind::Symbol, TokenKind::OpShl, TokenKind::DecLit]
        );
        assert_eq!(kinds("<=")[0], TokenKind::OpLe);
        assert_eq!(kinds("<x")[0], TokenKind::OpLt);
        assert_eq!(
            kinds("a||b"),
            vec![
                TokenKind::Symbol,
                TokenKind::OpLogicalOr,
                TokenKind::Symbol
            ]
        );
    }

    #[test]
    fn test_unknown_bytes_are_preserved() {
        let tokens = tokenize("a ? b");
        assert_eq!(tokens[2], Token::new(TokenKind::Unknown, "?"));
    }

    #[test]
    fn test_concatenated_texts_reproduce_input() {
        let source = "#macro add2(a : WORD, b) : WORD\n\t#macret a + b\n#macend\n\
                      .scope\n\t.equ v $1F ; hex\n.scend\n#invoke add2(1, 2) out\n";
        let rebuilt: String = tokenize(source).iter().map(|t| t.text.as_str()).collect();
        assert_eq!(rebuilt, source);
    }
}
