use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::arithmetic::Float;
use crate::atom_table::*;
use crate::machine::bindings::Env;
use crate::machine::streams::Stream;

/// A logical variable, identified by a counter scoped to the owning machine.
/// Identities never collide within a single machine's lifetime.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Variable(pub(crate) u64);

impl Variable {
    #[inline]
    pub fn id(self) -> u64 {
        self.0
    }
}

/// A functor applied to one or more arguments.
#[derive(Debug)]
pub struct Functor {
    pub name: Atom,
    pub args: Vec<Term>,
}

/// A prolog term.
#[derive(Clone, Debug)]
pub enum Term {
    Variable(Variable),
    Atom(Atom),
    Integer(i64),
    Float(Float),
    Compound(Rc<Functor>),
    /// A proper list, stored as a shared vector plus an offset so that
    /// taking the tail is O(1). The vector slice starting at the offset is
    /// never empty; the empty list is the atom `[]`.
    List {
        items: Rc<Vec<Term>>,
        offset: usize,
    },
    /// A list prefix with an arbitrary tail term, e.g. `[a, b | X]`.
    Partial {
        prefix: Rc<Vec<Term>>,
        offset: usize,
        tail: Rc<Term>,
    },
    /// A dict: functor `dict`, args `[tag, k1, v1, ...]` with atom keys
    /// sorted ascending and pairwise distinct.
    Dict(Rc<Functor>),
    /// An opaque stream handle.
    Stream(Stream),
}

impl Atom {
    /// Applies the atom to the given arguments, building a compound term.
    /// With no arguments the atom itself is returned.
    pub fn apply(self, args: Vec<Term>) -> Term {
        if args.is_empty() {
            Term::Atom(self)
        } else {
            Term::Compound(Rc::new(Functor { name: self, args }))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictError {
    InvalidDict,
    KeyExpected,
    DuplicateKey(Atom),
}

impl fmt::Display for DictError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DictError::InvalidDict => write!(f, "invalid dict"),
            DictError::KeyExpected => write!(f, "key expected"),
            DictError::DuplicateKey(key) => write!(f, "duplicate key: {}", key),
        }
    }
}

impl Term {
    /// Convenience constructor for an interned atom.
    pub fn atom(name: &str) -> Term {
        Term::Atom(AtomTable::build_with(name))
    }

    pub fn integer(i: i64) -> Term {
        Term::Integer(i)
    }

    /// Convenience constructor for a compound term.
    pub fn compound(name: &str, args: impl IntoIterator<Item = Term>) -> Term {
        AtomTable::build_with(name).apply(args.into_iter().collect())
    }

    pub fn list(items: Vec<Term>) -> Term {
        if items.is_empty() {
            Term::Atom(atom!("[]"))
        } else {
            Term::List {
                items: Rc::new(items),
                offset: 0,
            }
        }
    }

    pub fn partial_list(tail: Term, prefix: Vec<Term>) -> Term {
        if prefix.is_empty() {
            tail
        } else {
            Term::Partial {
                prefix: Rc::new(prefix),
                offset: 0,
                tail: Rc::new(tail),
            }
        }
    }

    /// Builds a dict from `[tag, k1, v1, k2, v2, ...]`, sorting the pairs
    /// by key and rejecting non-atom or duplicate keys.
    pub fn new_dict(args: Vec<Term>) -> Result<Term, DictError> {
        if args.is_empty() || args.len() % 2 == 0 {
            return Err(DictError::InvalidDict);
        }

        let mut pairs: Vec<(Atom, Term)> = Vec::with_capacity(args.len() / 2);
        let mut args = args.into_iter();
        let tag = args.next().expect("args is non-empty");

        while let Some(key) = args.next() {
            let value = args.next().expect("args length is odd");
            let key = match key {
                Term::Atom(key) => key,
                _ => return Err(DictError::KeyExpected),
            };

            if pairs.iter().any(|(k, _)| *k == key) {
                return Err(DictError::DuplicateKey(key));
            }

            pairs.push((key, value));
        }

        pairs.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut sorted = Vec::with_capacity(1 + pairs.len() * 2);
        sorted.push(tag);
        for (k, v) in pairs {
            sorted.push(Term::Atom(k));
            sorted.push(v);
        }

        Ok(Term::dict_from_sorted(sorted))
    }

    /// Builds a dict from arguments already in canonical sorted form.
    pub(crate) fn dict_from_sorted(args: Vec<Term>) -> Term {
        Term::Dict(Rc::new(Functor {
            name: atom!("dict"),
            args,
        }))
    }

    pub fn char_list(s: &str) -> Term {
        Term::list(
            s.chars()
                .map(|c| Term::Atom(AtomTable::build_with(&c.to_string())))
                .collect(),
        )
    }

    pub fn code_list(s: &str) -> Term {
        Term::list(s.chars().map(|c| Term::Integer(c as i64)).collect())
    }

    /// The functor name of a compound-like term.
    pub fn functor(&self) -> Option<Atom> {
        match self {
            Term::Compound(f) => Some(f.name),
            Term::Dict(f) => Some(f.name),
            Term::List { .. } | Term::Partial { .. } => Some(atom!(".")),
            _ => None,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Term::Compound(f) | Term::Dict(f) => f.args.len(),
            Term::List { .. } | Term::Partial { .. } => 2,
            _ => 0,
        }
    }

    #[inline]
    pub fn is_compound(&self) -> bool {
        self.arity() > 0
    }

    #[inline]
    pub fn is_atomic(&self) -> bool {
        !matches!(self, Term::Variable(_)) && !self.is_compound()
    }

    #[inline]
    pub fn is_callable(&self) -> bool {
        matches!(self, Term::Atom(_)) || self.is_compound()
    }

    pub fn arg(&self, n: usize) -> Option<Term> {
        match self {
            Term::Compound(f) | Term::Dict(f) => f.args.get(n).cloned(),
            Term::List { items, offset } => match n {
                0 => Some(items[*offset].clone()),
                1 if *offset + 1 == items.len() => Some(Term::Atom(atom!("[]"))),
                1 => Some(Term::List {
                    items: items.clone(),
                    offset: *offset + 1,
                }),
                _ => None,
            },
            Term::Partial {
                prefix,
                offset,
                tail,
            } => match n {
                0 => Some(prefix[*offset].clone()),
                1 if *offset + 1 == prefix.len() => Some((**tail).clone()),
                1 => Some(Term::Partial {
                    prefix: prefix.clone(),
                    offset: *offset + 1,
                    tail: tail.clone(),
                }),
                _ => None,
            },
            _ => None,
        }
    }

    /// An identity for compound-like terms, used by cycle guards. Atomic
    /// terms never recurse, so they need no identity.
    pub(crate) fn compound_id(&self) -> Option<(usize, usize)> {
        match self {
            Term::Compound(f) | Term::Dict(f) => Some((Rc::as_ptr(f) as usize, 0)),
            Term::List { items, offset } => Some((Rc::as_ptr(items) as usize, *offset)),
            Term::Partial { prefix, offset, .. } => {
                Some((Rc::as_ptr(prefix) as usize, *offset + 1))
            }
            _ => None,
        }
    }

    pub fn dict_tag(&self) -> Option<Term> {
        match self {
            Term::Dict(f) => f.args.first().cloned(),
            _ => None,
        }
    }

    pub fn dict_len(&self) -> usize {
        match self {
            Term::Dict(f) => (f.args.len() - 1) / 2,
            _ => 0,
        }
    }

    pub fn dict_at(&self, i: usize) -> Option<(Atom, Term)> {
        match self {
            Term::Dict(f) if i < self.dict_len() => {
                let pos = 1 + 2 * i;
                let key = match &f.args[pos] {
                    Term::Atom(key) => *key,
                    _ => return None,
                };
                Some((key, f.args[pos + 1].clone()))
            }
            _ => None,
        }
    }

    /// Binary search over the sorted key area of a dict.
    pub fn dict_value(&self, key: Atom) -> Option<Term> {
        let f = match self {
            Term::Dict(f) => f,
            _ => return None,
        };

        let n = (f.args.len() - 1) / 2;
        let (mut lo, mut hi) = (0isize, n as isize - 1);

        while lo <= hi {
            let mid = (lo + hi) / 2;
            let i = 1 + 2 * mid as usize;
            let k = match &f.args[i] {
                Term::Atom(k) => *k,
                _ => return None,
            };

            match k.cmp(&key) {
                Ordering::Equal => return Some(f.args[i + 1].clone()),
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid - 1,
            }
        }

        None
    }

    /// True iff the term resolves to a proper list under `env`. Cyclic
    /// cell chains are not proper lists.
    pub fn is_proper_list(&self, env: &Env) -> bool {
        let mut seen = fxhash::FxHashSet::default();
        let mut t = env.resolve(self);
        loop {
            match t {
                Term::Atom(a) if a == atom!("[]") => return true,
                ref cell if cell.functor() == Some(atom!(".")) && cell.arity() == 2 => {
                    if let Some(id) = cell.compound_id() {
                        if !seen.insert(id) {
                            return false;
                        }
                    }
                    let tail = cell.arg(1).expect("arity is 2");
                    t = env.resolve(&tail);
                }
                _ => return false,
            }
        }
    }
}

/// Ranks a resolved term in the standard order of terms:
/// Variable < Float < Integer < Atom < Stream < Compound.
fn order_rank(t: &Term) -> u8 {
    match t {
        Term::Variable(_) => 0,
        Term::Float(_) => 1,
        Term::Integer(_) => 2,
        Term::Atom(_) => 3,
        Term::Stream(_) => 4,
        _ => 5,
    }
}

/// Compares two terms in the standard order of terms, resolving variables
/// against `env` as it descends.
pub fn compare(x: &Term, y: &Term, env: &Env) -> Ordering {
    let x = env.resolve(x);
    let y = env.resolve(y);

    let (rx, ry) = (order_rank(&x), order_rank(&y));
    if rx != ry {
        return rx.cmp(&ry);
    }

    match (&x, &y) {
        (Term::Variable(v), Term::Variable(w)) => v.cmp(w),
        (Term::Float(a), Term::Float(b)) => a.cmp(b),
        (Term::Integer(a), Term::Integer(b)) => a.cmp(b),
        (Term::Atom(a), Term::Atom(b)) => a.cmp(b),
        (Term::Stream(a), Term::Stream(b)) => a.id().cmp(&b.id()),
        _ => {
            // both compound-like: arity, then functor, then args.
            let arity_ord = x.arity().cmp(&y.arity());
            if arity_ord != Ordering::Equal {
                return arity_ord;
            }

            let functor_ord = x
                .functor()
                .expect("rank 5 terms are compound")
                .cmp(&y.functor().expect("rank 5 terms are compound"));
            if functor_ord != Ordering::Equal {
                return functor_ord;
            }

            for i in 0..x.arity() {
                let ord = compare(
                    &x.arg(i).expect("i < arity"),
                    &y.arg(i).expect("i < arity"),
                    env,
                );
                if ord != Ordering::Equal {
                    return ord;
                }
            }

            Ordering::Equal
        }
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Term) -> bool {
        compare(self, other, &Env::new()) == Ordering::Equal
    }
}

impl Eq for Term {}

#[derive(Debug)]
pub(crate) enum ListStep {
    Item(Term),
    /// The walk reached an unbound tail variable.
    PartialTail(Term),
    /// The walk reached a non-list, non-variable tail.
    NotList(Term),
}

/// Iterates the elements of a (possibly improper) list, resolving cells
/// against the environment as it goes. A revisited cell ends the walk as a
/// non-list, so cyclic chains terminate.
pub(crate) struct ListWalker<'a> {
    current: Option<Term>,
    seen: fxhash::FxHashSet<(usize, usize)>,
    env: &'a Env,
}

impl<'a> ListWalker<'a> {
    pub(crate) fn new(t: &Term, env: &'a Env) -> Self {
        ListWalker {
            current: Some(t.clone()),
            seen: fxhash::FxHashSet::default(),
            env,
        }
    }
}

impl Iterator for ListWalker<'_> {
    type Item = ListStep;

    fn next(&mut self) -> Option<ListStep> {
        let t = self.env.resolve(&self.current.take()?);
        match t {
            Term::Atom(a) if a == atom!("[]") => None,
            Term::Variable(_) => Some(ListStep::PartialTail(t)),
            ref cell if cell.functor() == Some(atom!(".")) && cell.arity() == 2 => {
                if let Some(id) = cell.compound_id() {
                    if !self.seen.insert(id) {
                        return Some(ListStep::NotList(t.clone()));
                    }
                }
                self.current = Some(cell.arg(1).expect("arity is 2"));
                Some(ListStep::Item(cell.arg(0).expect("arity is 2")))
            }
            _ => Some(ListStep::NotList(t)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_builds_compounds() {
        let t = atom!("foo").apply(vec![Term::Integer(1), Term::Atom(atom!("a"))]);
        assert_eq!(t.functor(), Some(atom!("foo")));
        assert_eq!(t.arity(), 2);
        assert_eq!(t.arg(0), Some(Term::Integer(1)));

        assert_eq!(atom!("bar").apply(vec![]), Term::Atom(atom!("bar")));
    }

    #[test]
    fn lists_decompose_as_cons_cells() {
        let l = Term::list(vec![Term::Integer(1), Term::Integer(2)]);
        assert_eq!(l.functor(), Some(atom!(".")));
        assert_eq!(l.arity(), 2);
        assert_eq!(l.arg(0), Some(Term::Integer(1)));

        let tail = l.arg(1).unwrap();
        assert_eq!(tail.arg(0), Some(Term::Integer(2)));
        assert_eq!(tail.arg(1), Some(Term::Atom(atom!("[]"))));
    }

    #[test]
    fn partial_lists_expose_their_tail() {
        let tail = Term::Variable(Variable(7));
        let l = Term::partial_list(tail.clone(), vec![Term::Integer(1)]);

        assert_eq!(l.functor(), Some(atom!(".")));
        assert_eq!(l.arg(1), Some(tail.clone()));
        assert_eq!(Term::partial_list(tail.clone(), vec![]), tail);
    }

    #[test]
    fn dict_construction_sorts_and_validates() {
        let d = Term::new_dict(vec![
            Term::Atom(atom!("point")),
            Term::Atom(atom!("y")),
            Term::Integer(2),
            Term::Atom(atom!("x")),
            Term::Integer(1),
        ])
        .unwrap();

        assert_eq!(d.dict_len(), 2);
        assert_eq!(d.dict_at(0), Some((atom!("x"), Term::Integer(1))));
        assert_eq!(d.dict_value(atom!("y")), Some(Term::Integer(2)));
        assert_eq!(d.dict_value(atom!("z")), None);

        assert_eq!(
            Term::new_dict(vec![Term::Atom(atom!("t")), Term::Integer(0)]),
            Err(DictError::InvalidDict)
        );
        assert_eq!(
            Term::new_dict(vec![
                Term::Atom(atom!("t")),
                Term::Integer(1),
                Term::Integer(2),
            ]),
            Err(DictError::KeyExpected)
        );
        assert_eq!(
            Term::new_dict(vec![
                Term::Atom(atom!("t")),
                Term::Atom(atom!("k")),
                Term::Integer(1),
                Term::Atom(atom!("k")),
                Term::Integer(2),
            ]),
            Err(DictError::DuplicateKey(atom!("k")))
        );
    }

    #[test]
    fn dict_binary_search_agrees_with_linear_scan() {
        let keys = ["a", "b", "c", "d", "e", "f", "g"];
        let mut args = vec![Term::Atom(atom!("tag"))];
        for (i, k) in keys.iter().enumerate() {
            args.push(Term::Atom(atom!(k)));
            args.push(Term::Integer(i as i64));
        }
        let d = Term::new_dict(args).unwrap();

        for (i, k) in keys.iter().enumerate() {
            let linear = (0..d.dict_len())
                .map(|j| d.dict_at(j).unwrap())
                .find(|(key, _)| *key == atom!(k))
                .map(|(_, v)| v);
            assert_eq!(d.dict_value(atom!(k)), linear);
            assert_eq!(d.dict_value(atom!(k)), Some(Term::Integer(i as i64)));
        }
    }

    #[test]
    fn standard_order_ranks_variants() {
        let env = Env::new();
        let terms = [
            Term::Variable(Variable(0)),
            Term::Float(Float::from_i64(1)),
            Term::Integer(0),
            Term::Atom(atom!("a")),
            atom!("f").apply(vec![Term::Integer(1)]),
        ];

        for i in 0..terms.len() {
            for j in 0..terms.len() {
                assert_eq!(compare(&terms[i], &terms[j], &env), i.cmp(&j));
                // antisymmetry
                assert_eq!(
                    compare(&terms[i], &terms[j], &env),
                    compare(&terms[j], &terms[i], &env).reverse()
                );
            }
        }
    }

    #[test]
    fn compound_order_is_arity_then_functor_then_args() {
        let env = Env::new();
        let f1 = atom!("f").apply(vec![Term::Integer(1)]);
        let g2 = atom!("g").apply(vec![Term::Integer(0), Term::Integer(0)]);
        let f2a = atom!("f").apply(vec![Term::Integer(0), Term::Integer(9)]);
        let f2b = atom!("f").apply(vec![Term::Integer(1), Term::Integer(0)]);

        assert_eq!(compare(&f1, &g2, &env), Ordering::Less);
        assert_eq!(compare(&f2a, &g2, &env), Ordering::Less);
        assert_eq!(compare(&f2a, &f2b, &env), Ordering::Less);
    }
}
