use std::fmt;

use fxhash::{FxHashMap, FxHashSet};
use lazy_static::lazy_static;

use crate::atom_table::*;
use crate::machine::bindings::Env;
use crate::machine::term::{Term, Variable};
use crate::ops::{OpClass, OpDef, OpTable, MAX_PRIORITY};

/// Options governing how a term writes itself.
#[derive(Clone, Default)]
pub struct WriteOptions {
    /// Quote atoms that would not read back as a single token.
    pub quoted: bool,
    /// Render every compound in canonical `f(a,b)` form.
    pub ignore_ops: bool,
    /// Render `'$VAR'(N)` as `A, B, ..., Z, A1, ...`.
    pub number_vars: bool,
    /// Elide structures nested deeper than this; zero means no limit.
    pub max_depth: i64,
    /// Printable names for variables.
    pub variable_names: FxHashMap<Variable, Atom>,
}

lazy_static! {
    static ref DEFAULT_OPS: OpTable = OpTable::with_defaults();
}

/// Writes `t` under `opts`, resolving variables against `env` and
/// consulting `ops` for operator priorities.
pub fn write_term<W: fmt::Write>(
    w: &mut W,
    t: &Term,
    opts: &WriteOptions,
    ops: &OpTable,
    env: &Env,
) -> fmt::Result {
    let mut writer = TermWriter {
        w,
        opts,
        ops,
        env,
        path: FxHashSet::default(),
    };
    writer.write(t, MAX_PRIORITY, None, None, 0)
}

pub fn term_to_string(t: &Term, opts: &WriteOptions, ops: &OpTable, env: &Env) -> String {
    let mut out = String::new();
    let _ = write_term(&mut out, t, opts, ops, env);
    out
}

/// Renders with default options and the default operator table; used by
/// `Display` impls.
pub fn fmt_term_default(f: &mut fmt::Formatter, t: &Term) -> fmt::Result {
    write_term(f, t, &WriteOptions::default(), &DEFAULT_OPS, &Env::new())
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_term_default(f, self)
    }
}

fn is_letter_digit_op(op: Option<OpDef>) -> bool {
    matches!(op, Some(def) if def.name.is_letter_digit())
}

pub(crate) fn needs_quotes(s: &str) -> bool {
    match s {
        "[]" | "{}" | "!" | ";" => return false,
        "" => return true,
        _ => {}
    }

    let letter_digit = {
        let mut chars = s.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
            && s.chars().skip(1).all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    if letter_digit {
        return false;
    }

    !s.chars().all(is_graphic_char)
}

fn push_quoted(out: &mut String, s: &str) {
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\x0b' => out.push_str("\\v"),
            '\x0c' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\x{:x}\\", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('\'');
}

pub(crate) fn quoted_atom_text(a: Atom) -> String {
    let s = a.as_str();
    if needs_quotes(s) {
        let mut out = String::with_capacity(s.len() + 2);
        push_quoted(&mut out, s);
        out
    } else {
        s.to_owned()
    }
}

struct TermWriter<'a, W: fmt::Write> {
    w: &'a mut W,
    opts: &'a WriteOptions,
    ops: &'a OpTable,
    env: &'a Env,
    path: FxHashSet<(usize, usize)>,
}

impl<W: fmt::Write> TermWriter<'_, W> {
    fn write(
        &mut self,
        t: &Term,
        priority: u16,
        left: Option<OpDef>,
        right: Option<OpDef>,
        depth: i64,
    ) -> fmt::Result {
        let t = self.env.resolve(t);

        match &t {
            Term::Variable(v) => self.write_variable(*v, left, right),
            Term::Atom(a) => self.write_atom_term(*a, priority, left, right),
            Term::Integer(i) => self.write_number(&i.to_string(), *i < 0, left, right),
            Term::Float(f) => self.write_number(&f.to_string(), f.is_negative(), left, right),
            Term::Stream(s) => write!(self.w, "$stream({})", s.id()),
            _ => self.write_compound(&t, priority, left, right, depth),
        }
    }

    fn write_variable(
        &mut self,
        v: Variable,
        left: Option<OpDef>,
        right: Option<OpDef>,
    ) -> fmt::Result {
        if is_letter_digit_op(left) {
            self.w.write_char(' ')?;
        }

        if let Some(name) = self.opts.variable_names.get(&v) {
            self.w.write_str(name.as_str())?;
        } else {
            write!(self.w, "_{}", v.id())?;
        }

        if is_letter_digit_op(right) {
            self.w.write_char(' ')?;
        }
        Ok(())
    }

    fn write_atom_term(
        &mut self,
        a: Atom,
        priority: u16,
        left: Option<OpDef>,
        right: Option<OpDef>,
    ) -> fmt::Result {
        // a bare operator atom in an operand position is bracketed so it
        // reads back as an operand.
        let op_priority = [OpClass::Prefix, OpClass::Infix, OpClass::Postfix]
            .into_iter()
            .filter_map(|class| self.ops.lookup(a, class))
            .map(|def| def.priority)
            .max();
        let bracket = matches!(op_priority, Some(p) if p > priority);

        if bracket {
            self.w.write_char('(')?;
        } else if is_letter_digit_op(left) {
            self.w.write_char(' ')?;
        }

        if self.opts.quoted {
            self.w.write_str(&quoted_atom_text(a))?;
        } else {
            self.w.write_str(a.as_str())?;
        }

        if bracket {
            self.w.write_char(')')?;
        } else if is_letter_digit_op(right) {
            self.w.write_char(' ')?;
        }
        Ok(())
    }

    fn write_number(
        &mut self,
        text: &str,
        negative: bool,
        left: Option<OpDef>,
        right: Option<OpDef>,
    ) -> fmt::Result {
        // `- 1` must not read back as the literal -1.
        let open_close = matches!(
            left,
            Some(def) if def.name == atom!("-") && def.spec.class() == OpClass::Prefix
        ) && !negative;

        if open_close || (negative && left.is_some()) || is_letter_digit_op(left) {
            self.w.write_char(' ')?;
        }

        if open_close {
            self.w.write_char('(')?;
        }

        self.w.write_str(text)?;

        if open_close {
            self.w.write_char(')')?;
        } else if is_letter_digit_op(right) {
            self.w.write_char(' ')?;
        }
        Ok(())
    }

    fn write_compound(
        &mut self,
        t: &Term,
        priority: u16,
        left: Option<OpDef>,
        right: Option<OpDef>,
        depth: i64,
    ) -> fmt::Result {
        if self.opts.max_depth > 0 && depth >= self.opts.max_depth {
            return self.w.write_str("...");
        }

        let id = t.compound_id().expect("compound-like");
        if !self.path.insert(id) {
            return self.w.write_str("...");
        }
        let result = self.write_compound_inner(t, priority, left, right, depth);
        self.path.remove(&id);
        result
    }

    fn write_compound_inner(
        &mut self,
        t: &Term,
        priority: u16,
        left: Option<OpDef>,
        right: Option<OpDef>,
        depth: i64,
    ) -> fmt::Result {
        let name = t.functor().expect("compound-like");
        let arity = t.arity();

        // '$VAR'(N) under numbervars.
        if self.opts.number_vars && name == atom!("$VAR") && arity == 1 {
            if let Term::Integer(n) = self.env.resolve(&t.arg(0).expect("arity is 1")) {
                if n >= 0 {
                    let letter = (b'A' + (n % 26) as u8) as char;
                    if is_letter_digit_op(left) {
                        self.w.write_char(' ')?;
                    }
                    self.w.write_char(letter)?;
                    if n >= 26 {
                        write!(self.w, "{}", n / 26)?;
                    }
                    if is_letter_digit_op(right) {
                        self.w.write_char(' ')?;
                    }
                    return Ok(());
                }
            }
        }

        if let Term::Dict(_) = t {
            return self.write_dict(t, depth);
        }

        if !self.opts.ignore_ops {
            // list sugar.
            if name == atom!(".") && arity == 2 {
                return self.write_list(t, depth);
            }

            // curly sugar.
            if name == atom!("{}") && arity == 1 {
                self.w.write_char('{')?;
                self.write(
                    &t.arg(0).expect("arity is 1"),
                    MAX_PRIORITY,
                    None,
                    None,
                    depth + 1,
                )?;
                return self.w.write_char('}');
            }

            if arity == 2 {
                if let Some(def) = self.ops.lookup(name, OpClass::Infix) {
                    return self.write_operated(t, def, priority, left, right, depth);
                }
            }
            if arity == 1 {
                if let Some(def) = self.ops.lookup(name, OpClass::Prefix) {
                    return self.write_operated(t, def, priority, left, right, depth);
                }
                if let Some(def) = self.ops.lookup(name, OpClass::Postfix) {
                    return self.write_operated(t, def, priority, left, right, depth);
                }
            }
        }

        // canonical form.
        if is_letter_digit_op(left) {
            self.w.write_char(' ')?;
        }
        if self.opts.quoted {
            self.w.write_str(&quoted_atom_text(name))?;
        } else {
            self.w.write_str(name.as_str())?;
        }
        self.w.write_char('(')?;
        for i in 0..arity {
            if i > 0 {
                self.w.write_char(',')?;
            }
            self.write(
                &t.arg(i).expect("i < arity"),
                999,
                None,
                None,
                depth + 1,
            )?;
        }
        self.w.write_char(')')
    }

    fn write_operated(
        &mut self,
        t: &Term,
        def: OpDef,
        priority: u16,
        left: Option<OpDef>,
        right: Option<OpDef>,
        depth: i64,
    ) -> fmt::Result {
        let bracket = def.priority > priority;

        if bracket {
            self.w.write_char('(')?;
        }

        let (left, right) = if bracket {
            (None, None)
        } else {
            (left, right)
        };

        let op_text = if self.opts.quoted {
            quoted_atom_text(def.name)
        } else {
            def.name.as_str().to_owned()
        };

        match def.spec.class() {
            OpClass::Infix => {
                self.write(
                    &t.arg(0).expect("arity is 2"),
                    def.spec.left_priority(def.priority),
                    left,
                    Some(def),
                    depth + 1,
                )?;
                self.w.write_str(&op_text)?;
                self.write(
                    &t.arg(1).expect("arity is 2"),
                    def.spec.right_priority(def.priority),
                    Some(def),
                    right,
                    depth + 1,
                )?;
            }
            OpClass::Prefix => {
                if is_letter_digit_op(left) {
                    self.w.write_char(' ')?;
                }
                self.w.write_str(&op_text)?;
                self.write(
                    &t.arg(0).expect("arity is 1"),
                    def.spec.right_priority(def.priority),
                    Some(def),
                    right,
                    depth + 1,
                )?;
            }
            OpClass::Postfix => {
                self.write(
                    &t.arg(0).expect("arity is 1"),
                    def.spec.left_priority(def.priority),
                    left,
                    Some(def),
                    depth + 1,
                )?;
                self.w.write_str(&op_text)?;
                if is_letter_digit_op(right) {
                    self.w.write_char(' ')?;
                }
            }
        }

        if bracket {
            self.w.write_char(')')?;
        }
        Ok(())
    }

    fn write_list(&mut self, t: &Term, depth: i64) -> fmt::Result {
        self.w.write_char('[')?;

        let mut current = t.clone();
        let mut count = 0i64;
        loop {
            if count > 0 {
                self.w.write_char(',')?;
            }

            if self.opts.max_depth > 0 && count >= self.opts.max_depth {
                self.w.write_str("...")?;
                break;
            }

            self.write(
                &current.arg(0).expect("arity is 2"),
                999,
                None,
                None,
                depth + 1,
            )?;
            count += 1;

            let tail = self.env.resolve(&current.arg(1).expect("arity is 2"));
            match &tail {
                Term::Atom(a) if *a == atom!("[]") => break,
                cell if cell.functor() == Some(atom!(".")) && cell.arity() == 2 => {
                    // guard against cyclic tails.
                    let id = cell.compound_id().expect("compound-like");
                    if self.path.contains(&id) {
                        self.w.write_str("|...")?;
                        break;
                    }
                    current = tail;
                }
                _ => {
                    self.w.write_char('|')?;
                    self.write(&tail, 999, None, None, depth + 1)?;
                    break;
                }
            }
        }

        self.w.write_char(']')
    }

    fn write_dict(&mut self, t: &Term, depth: i64) -> fmt::Result {
        self.write(
            &t.dict_tag().expect("dict has a tag"),
            0,
            None,
            None,
            depth + 1,
        )?;

        self.w.write_char('{')?;
        for i in 0..t.dict_len() {
            if i > 0 {
                self.w.write_char(',')?;
            }
            let (k, v) = t.dict_at(i).expect("i < len");
            if self.opts.quoted {
                self.w.write_str(&quoted_atom_text(k))?;
            } else {
                self.w.write_str(k.as_str())?;
            }
            self.w.write_char(':')?;
            self.write(&v, 999, None, None, depth + 1)?;
        }
        self.w.write_char('}')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arithmetic::Float;

    fn written(t: &Term) -> String {
        term_to_string(t, &WriteOptions::default(), &DEFAULT_OPS, &Env::new())
    }

    fn written_with(t: &Term, opts: &WriteOptions) -> String {
        term_to_string(t, opts, &DEFAULT_OPS, &Env::new())
    }

    #[test]
    fn atoms_and_numbers() {
        assert_eq!(written(&Term::Atom(atom!("foo"))), "foo");
        assert_eq!(written(&Term::Integer(-42)), "-42");
        assert_eq!(
            written(&Term::Float(Float::parse("2.5").unwrap())),
            "2.5"
        );
    }

    #[test]
    fn canonical_and_operator_forms() {
        let t = atom!("+").apply(vec![
            Term::Integer(1),
            atom!("*").apply(vec![Term::Integer(2), Term::Integer(3)]),
        ]);
        assert_eq!(written(&t), "1+2*3");

        let opts = WriteOptions {
            ignore_ops: true,
            ..Default::default()
        };
        assert_eq!(written_with(&t, &opts), "+(1,*(2,3))");
    }

    #[test]
    fn priority_forces_parentheses() {
        // (1+2)*3 keeps its brackets.
        let t = atom!("*").apply(vec![
            atom!("+").apply(vec![Term::Integer(1), Term::Integer(2)]),
            Term::Integer(3),
        ]);
        assert_eq!(written(&t), "(1+2)*3");

        // 1+(2+3) as +(1, +(2, 3)) needs brackets under a yfx operator.
        let t = atom!("+").apply(vec![
            Term::Integer(1),
            atom!("+").apply(vec![Term::Integer(2), Term::Integer(3)]),
        ]);
        assert_eq!(written(&t), "1+(2+3)");
    }

    #[test]
    fn letter_digit_operators_are_spaced() {
        let t = atom!("mod").apply(vec![Term::Integer(7), Term::Integer(2)]);
        assert_eq!(written(&t), "7 mod 2");

        let t = atom!("is").apply(vec![
            Term::Atom(atom!("x")),
            atom!("+").apply(vec![Term::Integer(1), Term::Integer(2)]),
        ]);
        assert_eq!(written(&t), "x is 1+2");
    }

    #[test]
    fn negative_numbers_next_to_operators_are_spaced() {
        let t = atom!("-").apply(vec![Term::Integer(1), Term::Integer(-2)]);
        assert_eq!(written(&t), "1- -2");

        // prefix minus around a positive literal brackets it.
        let t = atom!("-").apply(vec![Term::Integer(1)]);
        assert_eq!(written(&t), "- (1)");
    }

    #[test]
    fn lists_and_partial_lists() {
        let t = Term::list(vec![Term::Integer(1), Term::Integer(2), Term::Integer(3)]);
        assert_eq!(written(&t), "[1,2,3]");

        let t = Term::partial_list(
            Term::Variable(Variable(7)),
            vec![Term::Integer(1), Term::Integer(2)],
        );
        assert_eq!(written(&t), "[1,2|_7]");
    }

    #[test]
    fn curly_and_dict_sugar() {
        let t = atom!("{}").apply(vec![Term::Atom(atom!("x"))]);
        assert_eq!(written(&t), "{x}");

        let d = Term::new_dict(vec![
            Term::Atom(atom!("point")),
            Term::Atom(atom!("y")),
            Term::Integer(2),
            Term::Atom(atom!("x")),
            Term::Integer(1),
        ])
        .unwrap();
        assert_eq!(written(&d), "point{x:1,y:2}");
    }

    #[test]
    fn quoted_atoms_escape() {
        let opts = WriteOptions {
            quoted: true,
            ..Default::default()
        };

        assert_eq!(
            written_with(&Term::Atom(atom!("hello world")), &opts),
            "'hello world'"
        );
        assert_eq!(written_with(&Term::Atom(atom!("foo")), &opts), "foo");
        assert_eq!(written_with(&Term::Atom(atom!("[]")), &opts), "[]");
        assert_eq!(
            written_with(&Term::Atom(atom!("it's")), &opts),
            "'it\\'s'"
        );
    }

    #[test]
    fn number_vars_render_as_letters() {
        let opts = WriteOptions {
            number_vars: true,
            ..Default::default()
        };

        let t = atom!("f").apply(vec![
            atom!("$VAR").apply(vec![Term::Integer(0)]),
            atom!("$VAR").apply(vec![Term::Integer(25)]),
            atom!("$VAR").apply(vec![Term::Integer(26)]),
        ]);
        assert_eq!(written_with(&t, &opts), "f(A,Z,A1)");
    }

    #[test]
    fn max_depth_elides_structure() {
        let opts = WriteOptions {
            max_depth: 2,
            ..Default::default()
        };

        let t = atom!("f").apply(vec![atom!("g").apply(vec![atom!("h").apply(vec![
            Term::Integer(1),
        ])])]);
        assert_eq!(written_with(&t, &opts), "f(g(...))");

        let l = Term::list(vec![
            Term::Integer(1),
            Term::Integer(2),
            Term::Integer(3),
            Term::Integer(4),
        ]);
        assert_eq!(written_with(&l, &opts), "[1,2,...]");
    }

    #[test]
    fn variables_use_supplied_names() {
        let mut names = FxHashMap::default();
        names.insert(Variable(3), atom!("X"));
        let opts = WriteOptions {
            variable_names: names,
            ..Default::default()
        };

        let t = atom!("f").apply(vec![Term::Variable(Variable(3)), Term::Variable(Variable(4))]);
        assert_eq!(written_with(&t, &opts), "f(X,_4)");
    }
}
