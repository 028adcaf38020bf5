use std::collections::VecDeque;

use crate::atom_table::*;
use crate::machine::bindings::Env;
use crate::machine::machine_errors::{Exception, RepFlag};
use crate::machine::term::{Term, Variable};
use crate::machine::Machine;
use crate::ops::{OpClass, MAX_PRIORITY};
use crate::parser::lexer::{LexError, Lexer, Tok, TokKind};

/// How a double-quoted literal is read, per the `double_quotes` flag.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DoubleQuotes {
    Codes,
    Chars,
    Atom,
}

impl DoubleQuotes {
    pub fn as_atom(self) -> Atom {
        match self {
            DoubleQuotes::Codes => atom!("codes"),
            DoubleQuotes::Chars => atom!("chars"),
            DoubleQuotes::Atom => atom!("atom"),
        }
    }

    pub fn from_atom(a: Atom) -> Option<DoubleQuotes> {
        match a.as_str() {
            "codes" => Some(DoubleQuotes::Codes),
            "chars" => Some(DoubleQuotes::Chars),
            "atom" => Some(DoubleQuotes::Atom),
            _ => None,
        }
    }
}

/// Reads terms from prolog source text, honoring the machine's operator
/// table, flags and character conversions. The machine is passed into each
/// read so that directives consulted between terms (operator definitions,
/// flag changes) affect the text that follows them.
pub struct Reader {
    lexer: Lexer,
    buffer: Vec<Tok>,
    consumed: usize,
    eof: bool,
    vars: Vec<(String, Variable)>,
    placeholders: VecDeque<Term>,
    env: Env,
}

impl Reader {
    pub fn new(machine: &Machine, text: &str) -> Reader {
        let lexer = Lexer::new(
            text,
            machine.char_conversions(),
            machine.flags().char_conversion,
        );

        Reader {
            lexer,
            buffer: Vec::new(),
            consumed: 0,
            eof: false,
            vars: Vec::new(),
            placeholders: VecDeque::new(),
            env: machine.fresh_env(),
        }
    }

    /// Supplies substitutions for `?` placeholder tokens, in order.
    pub fn set_placeholders(&mut self, terms: Vec<Term>) {
        self.placeholders = terms.into();
    }

    fn lex_error(&self, m: &mut Machine, e: LexError) -> Exception {
        match e {
            LexError::IntOutOfRange => m.representation_error(RepFlag::MaxInteger, &self.env),
            LexError::FloatCondition(ev) => m.evaluation_error(ev, &self.env),
            LexError::UnexpectedChar(c) => {
                let msg = AtomTable::build_with(&format!("unexpected character: {}", c));
                m.syntax_error(Term::Atom(msg), &self.env)
            }
            LexError::Unterminated => {
                m.syntax_error(Term::Atom(atom!("unterminated token")), &self.env)
            }
            LexError::BadEscape => {
                m.syntax_error(Term::Atom(atom!("bad escape sequence")), &self.env)
            }
        }
    }

    fn syntax_error(&self, m: &mut Machine, msg: &str) -> Exception {
        let msg = AtomTable::build_with(msg);
        m.syntax_error(Term::Atom(msg), &self.env)
    }

    fn fill(&mut self, m: &mut Machine, upto: usize) -> Result<(), Exception> {
        while !self.eof && self.buffer.len() < self.consumed + upto {
            match self.lexer.next_token() {
                Ok(Some(tok)) => self.buffer.push(tok),
                Ok(None) => self.eof = true,
                Err(e) => return Err(self.lex_error(m, e)),
            }
        }
        Ok(())
    }

    fn peek(&mut self, m: &mut Machine) -> Result<Option<Tok>, Exception> {
        self.fill(m, 1)?;
        Ok(self.buffer.get(self.consumed).cloned())
    }

    fn advance(&mut self, m: &mut Machine) -> Result<Option<Tok>, Exception> {
        let t = self.peek(m)?;
        if t.is_some() {
            self.consumed += 1;
        }
        Ok(t)
    }

    fn expect_kind(
        &mut self,
        m: &mut Machine,
        kind: &TokKind,
        what: &str,
    ) -> Result<(), Exception> {
        match self.advance(m)? {
            Some(t) if t.kind == *kind => Ok(()),
            _ => Err(self.syntax_error(m, &format!("expected {}", what))),
        }
    }

    fn variable(&mut self, m: &mut Machine, name: &str) -> Result<Term, Exception> {
        if name == "_" {
            let v = m.new_variable(&self.env)?;
            return Ok(Term::Variable(v));
        }

        for (known, v) in &self.vars {
            if known == name {
                return Ok(Term::Variable(*v));
            }
        }

        let v = m.new_variable(&self.env)?;
        self.vars.push((name.to_owned(), v));
        Ok(Term::Variable(v))
    }

    /// Reads the next term up to its end dot; `None` at end of input.
    /// Returns the term along with the named variables it mentions, in
    /// first-appearance order.
    pub fn read_term(
        &mut self,
        m: &mut Machine,
    ) -> Result<Option<(Term, Vec<(String, Variable)>)>, Exception> {
        self.vars.clear();

        if self.peek(m)?.is_none() {
            return Ok(None);
        }

        let t = self.parse(m, MAX_PRIORITY)?;

        match self.advance(m)? {
            Some(tok) if tok.kind == TokKind::End => {}
            _ => return Err(self.syntax_error(m, "operator expected (unterminated term)")),
        }

        Ok(Some((t, std::mem::take(&mut self.vars))))
    }

    fn parse(&mut self, m: &mut Machine, max_priority: u16) -> Result<Term, Exception> {
        Ok(self.parse_expr(m, max_priority)?.0)
    }

    fn parse_expr(
        &mut self,
        m: &mut Machine,
        max_priority: u16,
    ) -> Result<(Term, u16), Exception> {
        let (mut t, mut priority) = self.parse_primary(m, max_priority)?;

        loop {
            let tok = match self.peek(m)? {
                Some(tok) => tok,
                None => break,
            };

            match &tok.kind {
                TokKind::Comma if max_priority >= 1000 && priority < 1000 => {
                    self.advance(m)?;
                    let rhs = self.parse(m, 1000)?;
                    t = atom!(",").apply(vec![t, rhs]);
                    priority = 1000;
                }
                TokKind::Atom(a) => {
                    let a = *a;

                    if let Some(def) = m.ops().lookup(a, OpClass::Infix) {
                        if def.priority <= max_priority
                            && priority <= def.spec.left_priority(def.priority)
                        {
                            self.advance(m)?;
                            let rhs = self.parse(m, def.spec.right_priority(def.priority))?;
                            // the adjacent dot is dict access, which must
                            // not be confused with the list constructor.
                            let functor = if a == atom!(".") { atom!("$dot") } else { a };
                            t = functor.apply(vec![t, rhs]);
                            priority = def.priority;
                            continue;
                        }
                    }

                    if let Some(def) = m.ops().lookup(a, OpClass::Postfix) {
                        if def.priority <= max_priority
                            && priority <= def.spec.left_priority(def.priority)
                        {
                            self.advance(m)?;
                            t = a.apply(vec![t]);
                            priority = def.priority;
                            continue;
                        }
                    }

                    break;
                }
                _ => break,
            }
        }

        Ok((t, priority))
    }

    fn parse_primary(
        &mut self,
        m: &mut Machine,
        max_priority: u16,
    ) -> Result<(Term, u16), Exception> {
        let tok = match self.advance(m)? {
            Some(tok) => tok,
            None => return Err(self.syntax_error(m, "unexpected end of input")),
        };

        match tok.kind {
            TokKind::Int(i) => Ok((self.int_term(m, i, false)?, 0)),
            TokKind::Float(f) => Ok((Term::Float(f), 0)),
            TokKind::Str(s) => {
                let t = match m.flags().double_quotes {
                    DoubleQuotes::Codes => Term::code_list(&s),
                    DoubleQuotes::Chars => Term::char_list(&s),
                    DoubleQuotes::Atom => Term::Atom(AtomTable::build_with(&s)),
                };
                Ok((t, 0))
            }
            TokKind::Placeholder => match self.placeholders.pop_front() {
                Some(t) => Ok((t, 0)),
                None => Err(self.syntax_error(m, "no value for placeholder")),
            },
            TokKind::Open => {
                let t = self.parse(m, MAX_PRIORITY)?;
                self.expect_kind(m, &TokKind::Close, ")")?;
                Ok((t, 0))
            }
            TokKind::OpenList => self.parse_list(m),
            TokKind::OpenCurly => {
                if matches!(self.peek(m)?, Some(t) if t.kind == TokKind::CloseCurly) {
                    self.advance(m)?;
                    return Ok((Term::Atom(atom!("{}")), 0));
                }
                let inner = self.parse(m, MAX_PRIORITY)?;
                self.expect_kind(m, &TokKind::CloseCurly, "}")?;
                Ok((atom!("{}").apply(vec![inner]), 0))
            }
            TokKind::Var(name) => {
                let v = self.variable(m, &name)?;
                if self.dict_literal_follows(m)? {
                    return Ok((self.parse_dict_literal(m, v)?, 0));
                }
                Ok((v, 0))
            }
            TokKind::Atom(a) => self.parse_atom_primary(m, a, max_priority),
            TokKind::Comma
            | TokKind::Bar
            | TokKind::Close
            | TokKind::CloseList
            | TokKind::CloseCurly
            | TokKind::End => Err(self.syntax_error(m, "unexpected token")),
        }
    }

    fn parse_atom_primary(
        &mut self,
        m: &mut Machine,
        a: Atom,
        max_priority: u16,
    ) -> Result<(Term, u16), Exception> {
        // f( with no layout opens an argument list.
        if matches!(self.peek(m)?, Some(t) if t.kind == TokKind::Open && !t.layout_before) {
            self.advance(m)?;
            let args = self.parse_arg_list(m, TokKind::Close, ")")?;
            return Ok((a.apply(args), 0));
        }

        if self.dict_literal_follows(m)? {
            return Ok((self.parse_dict_literal(m, Term::Atom(a))?, 0));
        }

        // a minus adjacent to a number literal is a negative literal.
        if a == atom!("-") {
            match self.peek(m)? {
                Some(Tok {
                    kind: TokKind::Int(i),
                    layout_before: false,
                }) => {
                    self.advance(m)?;
                    return Ok((self.int_term(m, i, true)?, 0));
                }
                Some(Tok {
                    kind: TokKind::Float(f),
                    layout_before: false,
                }) => {
                    self.advance(m)?;
                    return Ok((Term::Float(f.negated()), 0));
                }
                _ => {}
            }
        }

        if let Some(def) = m.ops().lookup(a, OpClass::Prefix) {
            if def.priority <= max_priority && self.term_follows(m)? {
                let arg = self.parse(m, def.spec.right_priority(def.priority))?;
                return Ok((a.apply(vec![arg]), def.priority));
            }
        }

        Ok((Term::Atom(a), 0))
    }

    /// Whether the upcoming token can begin a term, so that a prefix
    /// operator takes an operand rather than standing for itself.
    fn term_follows(&mut self, m: &mut Machine) -> Result<bool, Exception> {
        let tok = match self.peek(m)? {
            Some(tok) => tok,
            None => return Ok(false),
        };

        Ok(match &tok.kind {
            TokKind::Int(_)
            | TokKind::Float(_)
            | TokKind::Str(_)
            | TokKind::Var(_)
            | TokKind::Open
            | TokKind::OpenList
            | TokKind::OpenCurly
            | TokKind::Placeholder => true,
            TokKind::Atom(a) => {
                // an infix-only operator does not begin a term.
                let ops = m.ops();
                !(ops.lookup(*a, OpClass::Infix).is_some()
                    && ops.lookup(*a, OpClass::Prefix).is_none())
            }
            _ => false,
        })
    }

    fn int_term(&self, m: &mut Machine, i: i128, negate: bool) -> Result<Term, Exception> {
        let value = if negate { -i } else { i };

        if value > i64::MAX as i128 {
            return Err(m.representation_error(RepFlag::MaxInteger, &self.env));
        }
        if value < i64::MIN as i128 {
            return Err(m.representation_error(RepFlag::MinInteger, &self.env));
        }

        Ok(Term::Integer(value as i64))
    }

    fn parse_arg_list(
        &mut self,
        m: &mut Machine,
        close: TokKind,
        what: &str,
    ) -> Result<Vec<Term>, Exception> {
        let mut args = Vec::new();

        loop {
            args.push(self.parse(m, 999)?);
            match self.advance(m)? {
                Some(tok) if tok.kind == close => return Ok(args),
                Some(tok) if tok.kind == TokKind::Comma => continue,
                _ => return Err(self.syntax_error(m, &format!("expected , or {}", what))),
            }
        }
    }

    fn parse_list(&mut self, m: &mut Machine) -> Result<(Term, u16), Exception> {
        if matches!(self.peek(m)?, Some(t) if t.kind == TokKind::CloseList) {
            self.advance(m)?;
            return Ok((Term::Atom(atom!("[]")), 0));
        }

        let mut items = Vec::new();
        loop {
            items.push(self.parse(m, 999)?);
            match self.advance(m)? {
                Some(tok) if tok.kind == TokKind::Comma => continue,
                Some(tok) if tok.kind == TokKind::CloseList => {
                    return Ok((Term::list(items), 0));
                }
                Some(tok) if tok.kind == TokKind::Bar => {
                    let tail = self.parse(m, 999)?;
                    self.expect_kind(m, &TokKind::CloseList, "]")?;
                    return Ok((Term::partial_list(tail, items), 0));
                }
                _ => return Err(self.syntax_error(m, "expected , | or ]")),
            }
        }
    }

    fn dict_literal_follows(&mut self, m: &mut Machine) -> Result<bool, Exception> {
        Ok(matches!(
            self.peek(m)?,
            Some(t) if t.kind == TokKind::OpenCurly && !t.layout_before
        ))
    }

    fn parse_dict_literal(&mut self, m: &mut Machine, tag: Term) -> Result<Term, Exception> {
        self.expect_kind(m, &TokKind::OpenCurly, "{")?;

        let mut args = vec![tag];

        if matches!(self.peek(m)?, Some(t) if t.kind == TokKind::CloseCurly) {
            self.advance(m)?;
        } else {
            loop {
                let key = match self.advance(m)? {
                    Some(Tok {
                        kind: TokKind::Atom(a),
                        ..
                    }) => a,
                    _ => return Err(self.syntax_error(m, "key expected")),
                };
                self.expect_kind(m, &TokKind::Atom(atom!(":")), ":")?;
                let value = self.parse(m, 999)?;

                args.push(Term::Atom(key));
                args.push(value);

                match self.advance(m)? {
                    Some(tok) if tok.kind == TokKind::Comma => continue,
                    Some(tok) if tok.kind == TokKind::CloseCurly => break,
                    _ => return Err(self.syntax_error(m, "expected , or }")),
                }
            }
        }

        Term::new_dict(args).map_err(|e| self.syntax_error(m, &e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineBuilder;

    fn read_one(text: &str) -> Term {
        let mut m = MachineBuilder::default().build();
        let mut reader = Reader::new(&m, text);
        reader.read_term(&mut m).unwrap().expect("a term").0
    }

    fn read_err(text: &str) -> Exception {
        let mut m = MachineBuilder::default().build();
        let mut reader = Reader::new(&m, text);
        reader.read_term(&mut m).unwrap_err()
    }

    #[test]
    fn atoms_compounds_and_lists() {
        assert_eq!(read_one("foo."), Term::Atom(atom!("foo")));

        let t = read_one("foo(a, 1).");
        assert_eq!(t.functor(), Some(atom!("foo")));
        assert_eq!(t.arg(1), Some(Term::Integer(1)));

        let t = read_one("[1, 2, 3].");
        assert_eq!(
            t,
            Term::list(vec![Term::Integer(1), Term::Integer(2), Term::Integer(3)])
        );

        let t = read_one("[a | T].");
        assert_eq!(t.functor(), Some(atom!(".")));
        assert!(matches!(t.arg(1), Some(Term::Variable(_))));
    }

    #[test]
    fn operators_bind_by_priority() {
        // 1+2*3 is +(1, *(2, 3)).
        let t = read_one("1+2*3.");
        assert_eq!(t.functor(), Some(atom!("+")));
        assert_eq!(t.arg(1).unwrap().functor(), Some(atom!("*")));

        // a , b ; c is ;(','(a, b), c).
        let t = read_one("a , b ; c.");
        assert_eq!(t.functor(), Some(atom!(";")));
        assert_eq!(t.arg(0).unwrap().functor(), Some(atom!(",")));

        // rules parse at 1200.
        let t = read_one("p :- q, r.");
        assert_eq!(t.functor(), Some(atom!(":-")));
    }

    #[test]
    fn prefix_minus_and_negative_literals() {
        assert_eq!(read_one("-1."), Term::Integer(-1));

        // with layout, minus is an operator.
        let t = read_one("- 1.");
        assert_eq!(t.functor(), Some(atom!("-")));
        assert_eq!(t.arg(0), Some(Term::Integer(1)));

        let t = read_one("1 - 2.");
        assert_eq!(t.functor(), Some(atom!("-")));
    }

    #[test]
    fn variables_are_scoped_to_the_term() {
        let mut m = MachineBuilder::default().build();
        let mut reader = Reader::new(&m, "f(X, X, Y). g(X).");

        let (t1, vars1) = reader.read_term(&mut m).unwrap().unwrap();
        assert_eq!(t1.arg(0), t1.arg(1));
        assert_ne!(t1.arg(0), t1.arg(2));
        assert_eq!(vars1.len(), 2);
        assert_eq!(vars1[0].0, "X");

        // a fresh scope: X names a different variable now.
        let (t2, _) = reader.read_term(&mut m).unwrap().unwrap();
        assert_ne!(t1.arg(0), t2.arg(0));
    }

    #[test]
    fn anonymous_variables_are_always_fresh() {
        let t = read_one("f(_, _).");
        assert_ne!(t.arg(0), t.arg(1));
    }

    #[test]
    fn double_quotes_follow_the_flag() {
        let t = read_one("\"ab\".");
        assert_eq!(t, Term::list(vec![Term::Integer(97), Term::Integer(98)]));
    }

    #[test]
    fn dict_literals() {
        let t = read_one("point{x: 1, y: 2}.");
        assert_eq!(t.dict_len(), 2);
        assert_eq!(t.dict_tag(), Some(Term::Atom(atom!("point"))));
        assert_eq!(t.dict_value(atom!("x")), Some(Term::Integer(1)));

        // an empty dict literal is valid.
        let t = read_one("point{}.");
        assert_eq!(t.dict_len(), 0);

        let e = read_err("point{x: 1, x: 2}.");
        assert_eq!(
            e.term().arg(0).unwrap().functor(),
            Some(atom!("syntax_error"))
        );
    }

    #[test]
    fn adjacent_dot_is_dict_access() {
        let t = read_one("X = P.y.");
        assert_eq!(t.functor(), Some(atom!("=")));
        let access = t.arg(1).unwrap();
        assert_eq!(access.functor(), Some(atom!("$dot")));
        assert_eq!(access.arg(1), Some(Term::Atom(atom!("y"))));
    }

    #[test]
    fn out_of_range_integers_raise_representation_errors() {
        let e = read_err("9223372036854775808.");
        assert_eq!(
            e.term().arg(0).unwrap(),
            atom!("representation_error").apply(vec![Term::Atom(atom!("max_integer"))])
        );

        // the most negative value is still readable.
        assert_eq!(read_one("-9223372036854775808."), Term::Integer(i64::MIN));
    }

    #[test]
    fn float_overflow_in_literals_is_an_evaluation_error() {
        let e = read_err("X is 1.0e400.");
        assert_eq!(
            e.term().arg(0).unwrap(),
            atom!("evaluation_error").apply(vec![Term::Atom(atom!("float_overflow"))])
        );
    }

    #[test]
    fn placeholders_substitute_host_terms() {
        let mut m = MachineBuilder::default().build();
        let mut reader = Reader::new(&m, "f(?, ?).");
        reader.set_placeholders(vec![Term::Integer(1), Term::Atom(atom!("two"))]);

        let (t, _) = reader.read_term(&mut m).unwrap().unwrap();
        assert_eq!(t.arg(0), Some(Term::Integer(1)));
        assert_eq!(t.arg(1), Some(Term::Atom(atom!("two"))));
    }

    #[test]
    fn round_trip_ground_terms() {
        use crate::machine::term_writer::{term_to_string, WriteOptions};
        use crate::ops::OpTable;

        let texts = [
            "f(a,b).",
            "[1,2,3].",
            "1+2*3.",
            "(1+2)*3.",
            "point{x:1,y:2}.",
            "f(-1).",
            "{a,b}.",
            "[a|[b|c]].",
            "7 mod 2.",
            "'hello world'(1).",
        ];

        let opts = WriteOptions {
            quoted: true,
            ..Default::default()
        };
        let ops = OpTable::with_defaults();

        for text in texts {
            let t = read_one(text);
            let written = format!("{}.", term_to_string(&t, &opts, &ops, &Env::new()));
            let t2 = read_one(&written);
            assert_eq!(t, t2, "{} -> {} failed to round-trip", text, written);
        }
    }
}
