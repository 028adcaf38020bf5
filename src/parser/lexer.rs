use fxhash::FxHashMap;

use crate::arithmetic::{ExceptionalValue, Float};
use crate::atom_table::*;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokKind {
    Atom(Atom),
    Var(String),
    Int(i128),
    Float(Float),
    Str(String),
    Open,
    Close,
    OpenList,
    CloseList,
    OpenCurly,
    CloseCurly,
    Comma,
    Bar,
    End,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Tok {
    pub kind: TokKind,
    /// Whether layout (or a comment) preceded this token; compound-term
    /// and dict-literal syntax require adjacency.
    pub layout_before: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LexError {
    UnexpectedChar(char),
    Unterminated,
    BadEscape,
    /// An integer literal outside the representable range.
    IntOutOfRange,
    /// A float literal that trips the decimal context.
    FloatCondition(ExceptionalValue),
}

pub(crate) struct Lexer {
    chars: Vec<char>,
    pos: usize,
    conversions: FxHashMap<char, char>,
    convert: bool,
}

impl Lexer {
    pub(crate) fn new(text: &str, conversions: FxHashMap<char, char>, convert: bool) -> Lexer {
        Lexer {
            chars: text.chars().collect(),
            pos: 0,
            conversions,
            convert,
        }
    }

    fn peek(&self) -> Option<char> {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    /// Applies the character-conversion map to an unquoted character.
    fn converted(&self, c: char) -> char {
        if self.convert {
            self.conversions.get(&c).copied().unwrap_or(c)
        } else {
            c
        }
    }

    /// Consumes layout and comments; true if anything was consumed.
    fn skip_layout(&mut self) -> Result<bool, LexError> {
        let mut skipped = false;

        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                    skipped = true;
                }
                Some('%') => {
                    skipped = true;
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    skipped = true;
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(LexError::Unterminated),
                        }
                    }
                }
                _ => return Ok(skipped),
            }
        }
    }

    pub(crate) fn next_token(&mut self) -> Result<Option<Tok>, LexError> {
        let layout_before = self.skip_layout()?;

        let raw = match self.peek() {
            Some(c) => c,
            None => return Ok(None),
        };
        let c = self.converted(raw);

        let kind = match c {
            '(' => {
                self.bump();
                TokKind::Open
            }
            ')' => {
                self.bump();
                TokKind::Close
            }
            '[' => {
                self.bump();
                TokKind::OpenList
            }
            ']' => {
                self.bump();
                TokKind::CloseList
            }
            '{' => {
                self.bump();
                TokKind::OpenCurly
            }
            '}' => {
                self.bump();
                TokKind::CloseCurly
            }
            ',' => {
                self.bump();
                TokKind::Comma
            }
            '|' => {
                self.bump();
                TokKind::Bar
            }
            '?' => {
                self.bump();
                TokKind::Placeholder
            }
            '!' | ';' => {
                self.bump();
                TokKind::Atom(AtomTable::build_with(&c.to_string()))
            }
            '\'' => {
                self.bump();
                TokKind::Atom(AtomTable::build_with(&self.quoted_text('\'')?))
            }
            '"' => {
                self.bump();
                TokKind::Str(self.quoted_text('"')?)
            }
            c if c.is_ascii_digit() => self.number()?,
            c if c.is_ascii_lowercase() => {
                let name = self.name_token();
                TokKind::Atom(AtomTable::build_with(&name))
            }
            c if c.is_ascii_uppercase() || c == '_' => {
                let name = self.name_token();
                TokKind::Var(name)
            }
            c if is_graphic_char(c) => {
                let mut text = String::new();
                while let Some(g) = self.peek() {
                    let g = self.converted(g);
                    if is_graphic_char(g) {
                        text.push(g);
                        self.bump();
                    } else {
                        break;
                    }
                }

                if text == "." && self.end_follows() {
                    TokKind::End
                } else {
                    TokKind::Atom(AtomTable::build_with(&text))
                }
            }
            c => return Err(LexError::UnexpectedChar(c)),
        };

        Ok(Some(Tok {
            kind,
            layout_before,
        }))
    }

    /// A `.` read as a graphic token ends the term when layout, a line
    /// comment, or the end of input follows.
    fn end_follows(&self) -> bool {
        match self.peek() {
            None => true,
            Some(c) => c.is_whitespace() || c == '%',
        }
    }

    fn name_token(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            let c = self.converted(c);
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        name
    }

    /// The body of a quoted token, consuming up to and including the
    /// closing quote.
    fn quoted_text(&mut self, quote: char) -> Result<String, LexError> {
        let mut text = String::new();

        loop {
            match self.bump() {
                None => return Err(LexError::Unterminated),
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        self.bump();
                        text.push(quote);
                    } else {
                        return Ok(text);
                    }
                }
                Some('\\') => {
                    if let Some(c) = self.escape()? {
                        text.push(c);
                    }
                }
                Some(c) => text.push(c),
            }
        }
    }

    /// One escape sequence after a backslash; `None` for a line
    /// continuation.
    fn escape(&mut self) -> Result<Option<char>, LexError> {
        let c = self.bump().ok_or(LexError::Unterminated)?;
        let out = match c {
            '\n' => return Ok(None),
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'a' => '\x07',
            'b' => '\x08',
            'f' => '\x0c',
            'v' => '\x0b',
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            '`' => '`',
            'x' => {
                let mut code = 0u32;
                let mut any = false;
                while let Some(h) = self.peek() {
                    if let Some(d) = h.to_digit(16) {
                        code = code.wrapping_mul(16).wrapping_add(d);
                        any = true;
                        self.bump();
                    } else {
                        break;
                    }
                }
                if !any || self.bump() != Some('\\') {
                    return Err(LexError::BadEscape);
                }
                char::from_u32(code).ok_or(LexError::BadEscape)?
            }
            d if d.is_digit(8) => {
                let mut code = d.to_digit(8).expect("checked octal");
                while let Some(o) = self.peek() {
                    if let Some(d) = o.to_digit(8) {
                        code = code.wrapping_mul(8).wrapping_add(d);
                        self.bump();
                    } else {
                        break;
                    }
                }
                if self.bump() != Some('\\') {
                    return Err(LexError::BadEscape);
                }
                char::from_u32(code).ok_or(LexError::BadEscape)?
            }
            _ => return Err(LexError::BadEscape),
        };
        Ok(Some(out))
    }

    fn number(&mut self) -> Result<TokKind, LexError> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }

        if text == "0" {
            match self.peek() {
                Some('\'') => {
                    self.bump();
                    return self.char_code();
                }
                Some('x') => return self.radix(16),
                Some('o') => return self.radix(8),
                Some('b') => return self.radix(2),
                _ => {}
            }
        }

        let mut is_float = false;

        // a fraction only when a digit follows the dot, so `1.` stays an
        // integer followed by the end token.
        if self.peek() == Some('.')
            && self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false)
        {
            is_float = true;
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }

        let exp_follows = match (self.peek(), self.peek_at(1), self.peek_at(2)) {
            (Some('e') | Some('E'), Some(d), _) if d.is_ascii_digit() => true,
            (Some('e') | Some('E'), Some('+') | Some('-'), Some(d)) if d.is_ascii_digit() => true,
            _ => false,
        };
        if exp_follows {
            is_float = true;
            text.push('e');
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                text.push(self.bump().expect("peeked"));
            }
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }

        if is_float {
            let f = Float::parse(&text).map_err(LexError::FloatCondition)?;
            Ok(TokKind::Float(f))
        } else {
            text.parse::<i128>()
                .map(TokKind::Int)
                .map_err(|_| LexError::IntOutOfRange)
        }
    }

    fn radix(&mut self, radix: u32) -> Result<TokKind, LexError> {
        self.bump(); // the radix letter

        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_digit(radix) {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }

        if text.is_empty() {
            return Err(LexError::BadEscape);
        }

        i128::from_str_radix(&text, radix)
            .map(TokKind::Int)
            .map_err(|_| LexError::IntOutOfRange)
    }

    /// A `0'c` character-code literal.
    fn char_code(&mut self) -> Result<TokKind, LexError> {
        match self.bump().ok_or(LexError::Unterminated)? {
            '\\' => {
                let c = self.escape()?.ok_or(LexError::BadEscape)?;
                Ok(TokKind::Int(c as i128))
            }
            '\'' => {
                if self.bump() == Some('\'') {
                    Ok(TokKind::Int('\'' as i128))
                } else {
                    Err(LexError::BadEscape)
                }
            }
            c => Ok(TokKind::Int(c as i128)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(text: &str) -> Vec<TokKind> {
        let mut lexer = Lexer::new(text, FxHashMap::default(), false);
        let mut out = Vec::new();
        while let Some(t) = lexer.next_token().unwrap() {
            out.push(t.kind);
        }
        out
    }

    #[test]
    fn names_variables_and_punctuation() {
        let toks = lex_all("foo(Bar, _baz).");
        assert!(matches!(&toks[0], TokKind::Atom(a) if *a == atom!("foo")));
        assert!(matches!(&toks[1], TokKind::Open));
        assert!(matches!(&toks[2], TokKind::Var(v) if v == "Bar"));
        assert!(matches!(&toks[3], TokKind::Comma));
        assert!(matches!(&toks[4], TokKind::Var(v) if v == "_baz"));
        assert!(matches!(&toks[5], TokKind::Close));
        assert!(matches!(&toks[6], TokKind::End));
    }

    #[test]
    fn graphic_tokens_and_the_end_dot() {
        let toks = lex_all("X =.. L.");
        assert!(matches!(&toks[1], TokKind::Atom(a) if *a == atom!("=..")));
        assert!(matches!(&toks[3], TokKind::End));

        // a dot followed by a name is the dict-access operator.
        let toks = lex_all("a.b.");
        assert!(matches!(&toks[1], TokKind::Atom(a) if *a == atom!(".")));
        assert!(matches!(&toks[3], TokKind::End));
    }

    #[test]
    fn integer_literal_forms() {
        assert!(matches!(lex_all("42")[0], TokKind::Int(42)));
        assert!(matches!(lex_all("0x2a")[0], TokKind::Int(42)));
        assert!(matches!(lex_all("0o52")[0], TokKind::Int(42)));
        assert!(matches!(lex_all("0b101010")[0], TokKind::Int(42)));
        assert!(matches!(lex_all("0'a")[0], TokKind::Int(97)));
        assert!(matches!(lex_all("0'\\n")[0], TokKind::Int(10)));
    }

    #[test]
    fn float_literal_forms() {
        assert!(matches!(lex_all("1.5")[0], TokKind::Float(_)));
        assert!(matches!(lex_all("1.0e10")[0], TokKind::Float(_)));
        assert!(matches!(lex_all("2e8")[0], TokKind::Float(_)));

        // `1.` is an integer then the end token.
        let toks = lex_all("1.");
        assert!(matches!(toks[0], TokKind::Int(1)));
        assert!(matches!(toks[1], TokKind::End));
    }

    #[test]
    fn float_literals_trip_the_decimal_context() {
        let mut lexer = Lexer::new("1.0e40000", FxHashMap::default(), false);
        assert_eq!(
            lexer.next_token(),
            Err(LexError::FloatCondition(ExceptionalValue::FloatOverflow))
        );
    }

    #[test]
    fn quoted_atoms_with_escapes() {
        let toks = lex_all(r"'hello world'");
        assert!(matches!(&toks[0], TokKind::Atom(a) if *a == atom!("hello world")));

        let toks = lex_all(r"'a\nb'");
        assert!(matches!(&toks[0], TokKind::Atom(a) if *a == atom!("a\nb")));

        let toks = lex_all("'it''s'");
        assert!(matches!(&toks[0], TokKind::Atom(a) if *a == atom!("it's")));
    }

    #[test]
    fn comments_are_layout() {
        let toks = lex_all("a % comment\n/* block */ b");
        assert_eq!(toks.len(), 2);
    }

    #[test]
    fn huge_integers_are_out_of_range() {
        let mut lexer = Lexer::new(
            "99999999999999999999999999999999999999999999",
            FxHashMap::default(),
            false,
        );
        assert_eq!(lexer.next_token(), Err(LexError::IntOutOfRange));
    }

    #[test]
    fn character_conversion_applies_outside_quotes() {
        let mut conv = FxHashMap::default();
        conv.insert('a', 'b');

        let mut lexer = Lexer::new("a 'a'", conv, true);
        let t1 = lexer.next_token().unwrap().unwrap();
        assert!(matches!(t1.kind, TokKind::Atom(a) if a == atom!("b")));
        let t2 = lexer.next_token().unwrap().unwrap();
        assert!(matches!(t2.kind, TokKind::Atom(a) if a == atom!("a")));
    }
}
