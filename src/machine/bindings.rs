use std::rc::Rc;

use fxhash::FxHashSet;

use crate::machine::term::{Term, Variable};

/// Maps a variable identity to its tree key. New variables are always
/// bigger than the previous ones, so using the identity itself would skew
/// every insertion to one side of the tree; flipping the sign of all but
/// the first two identities keeps the insertion point moving.
#[inline]
fn env_key(v: Variable) -> i64 {
    let k = v.0 as i64;
    if k / 2 != 0 {
        -k
    } else {
        k
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Color {
    Red,
    Black,
}

#[derive(Debug)]
struct Node {
    color: Color,
    left: Link,
    right: Link,
    key: i64,
    value: Term,
}

type Link = Option<Rc<Node>>;

/// A persistent mapping from variables to terms: the red-black tree of
/// Okasaki's Purely Functional Data Structures, with path-copying inserts.
/// Binding returns a new environment; earlier snapshots are unaffected.
#[derive(Clone, Debug, Default)]
pub struct Env {
    root: Link,
}

impl Env {
    /// Creates an empty environment.
    pub fn new() -> Env {
        Env { root: None }
    }

    /// Returns the term the given variable is bound to.
    pub fn lookup(&self, v: Variable) -> Option<Term> {
        let k = env_key(v);
        let mut node = self.root.as_deref();

        while let Some(n) = node {
            node = if k < n.key {
                n.left.as_deref()
            } else if k > n.key {
                n.right.as_deref()
            } else {
                return Some(n.value.clone());
            };
        }

        None
    }

    /// Adds a new entry, returning the extended environment.
    pub fn bind(&self, v: Variable, t: Term) -> Env {
        let root = insert(&self.root, env_key(v), &t);
        Env {
            root: Some(Rc::new(Node {
                color: Color::Black,
                ..clone_node(&root)
            })),
        }
    }

    /// Follows the variable chain and returns the first non-variable term
    /// or the last free variable. Variables already seen along the chain
    /// stop the walk, so cyclic chains terminate.
    pub fn resolve(&self, t: &Term) -> Term {
        let mut t = t.clone();
        let mut seen: Vec<Variable> = Vec::new();

        loop {
            match t {
                Term::Variable(v) => {
                    if seen.contains(&v) {
                        return Term::Variable(v);
                    }
                    match self.lookup(v) {
                        Some(next) => {
                            seen.push(v);
                            t = next;
                        }
                        None => return Term::Variable(v),
                    }
                }
                _ => return t,
            }
        }
    }

    /// Deep-resolves `t`, replacing every bound variable in it. Structures
    /// already on the descent path are returned as-is so that cyclic terms
    /// terminate.
    pub fn simplify(&self, t: &Term) -> Term {
        let mut on_path = FxHashSet::default();
        self.simplify_inner(t, &mut on_path)
    }

    fn simplify_inner(&self, t: &Term, on_path: &mut FxHashSet<(usize, usize)>) -> Term {
        let t = self.resolve(t);

        let id = match t.compound_id() {
            Some(id) => {
                if !on_path.insert(id) {
                    return t;
                }
                id
            }
            None => return t,
        };

        let simplified = match &t {
            Term::Compound(f) => f
                .name
                .apply(f.args.iter().map(|a| self.simplify_inner(a, on_path)).collect()),
            Term::Dict(f) => Term::dict_from_sorted(
                f.args.iter().map(|a| self.simplify_inner(a, on_path)).collect(),
            ),
            Term::List { items, offset } => Term::list(
                items[*offset..]
                    .iter()
                    .map(|a| self.simplify_inner(a, on_path))
                    .collect(),
            ),
            Term::Partial {
                prefix,
                offset,
                tail,
            } => Term::partial_list(
                self.simplify_inner(tail, on_path),
                prefix[*offset..]
                    .iter()
                    .map(|a| self.simplify_inner(a, on_path))
                    .collect(),
            ),
            _ => unreachable!("only compound-like terms have identities"),
        };

        on_path.remove(&id);
        simplified
    }

    /// Collects the distinct free variables of `t` in their
    /// first-encountered (depth-first, left-to-right) order.
    pub fn free_variables(&self, t: &Term) -> Vec<Variable> {
        let mut fvs = Vec::new();
        self.append_free_variables(&mut fvs, t);
        fvs
    }

    pub(crate) fn append_free_variables(&self, fvs: &mut Vec<Variable>, t: &Term) {
        match self.resolve(t) {
            Term::Variable(v) => {
                if !fvs.contains(&v) {
                    fvs.push(v);
                }
            }
            t if t.is_compound() => {
                for i in 0..t.arity() {
                    self.append_free_variables(fvs, &t.arg(i).expect("i < arity"));
                }
            }
            _ => {}
        }
    }
}

fn clone_node(n: &Node) -> Node {
    Node {
        color: n.color,
        left: n.left.clone(),
        right: n.right.clone(),
        key: n.key,
        value: n.value.clone(),
    }
}

fn insert(node: &Link, k: i64, v: &Term) -> Node {
    match node {
        None => Node {
            color: Color::Red,
            left: None,
            right: None,
            key: k,
            value: v.clone(),
        },
        Some(n) => {
            if k < n.key {
                let mut ret = clone_node(n);
                ret.left = Some(Rc::new(insert(&n.left, k, v)));
                balance(&mut ret);
                ret
            } else if k > n.key {
                let mut ret = clone_node(n);
                ret.right = Some(Rc::new(insert(&n.right, k, v)));
                balance(&mut ret);
                ret
            } else {
                let mut ret = clone_node(n);
                ret.value = v.clone();
                ret
            }
        }
    }
}

fn is_red(link: &Link) -> bool {
    matches!(link.as_deref(), Some(n) if n.color == Color::Red)
}

/// Okasaki's balance: rewrites any black node with a red child holding a
/// red child into a red node with two black children.
fn balance(n: &mut Node) {
    #[allow(clippy::type_complexity)]
    let mut parts: Option<(Link, Link, Link, Link, (i64, Term), (i64, Term), (i64, Term))> = None;

    if is_red(&n.left) {
        let l = n.left.as_deref().expect("is_red checked");
        if is_red(&l.left) {
            let ll = l.left.as_deref().expect("is_red checked");
            parts = Some((
                ll.left.clone(),
                ll.right.clone(),
                l.right.clone(),
                n.right.clone(),
                (ll.key, ll.value.clone()),
                (l.key, l.value.clone()),
                (n.key, n.value.clone()),
            ));
        } else if is_red(&l.right) {
            let lr = l.right.as_deref().expect("is_red checked");
            parts = Some((
                l.left.clone(),
                lr.left.clone(),
                lr.right.clone(),
                n.right.clone(),
                (l.key, l.value.clone()),
                (lr.key, lr.value.clone()),
                (n.key, n.value.clone()),
            ));
        }
    }

    if parts.is_none() && is_red(&n.right) {
        let r = n.right.as_deref().expect("is_red checked");
        if is_red(&r.left) {
            let rl = r.left.as_deref().expect("is_red checked");
            parts = Some((
                n.left.clone(),
                rl.left.clone(),
                rl.right.clone(),
                r.right.clone(),
                (n.key, n.value.clone()),
                (rl.key, rl.value.clone()),
                (r.key, r.value.clone()),
            ));
        } else if is_red(&r.right) {
            let rr = r.right.as_deref().expect("is_red checked");
            parts = Some((
                n.left.clone(),
                r.left.clone(),
                rr.left.clone(),
                rr.right.clone(),
                (n.key, n.value.clone()),
                (r.key, r.value.clone()),
                (rr.key, rr.value.clone()),
            ));
        }
    }

    if let Some((a, b, c, d, (xk, xv), (yk, yv), (zk, zv))) = parts {
        *n = Node {
            color: Color::Red,
            left: Some(Rc::new(Node {
                color: Color::Black,
                left: a,
                right: b,
                key: xk,
                value: xv,
            })),
            right: Some(Rc::new(Node {
                color: Color::Black,
                left: c,
                right: d,
                key: zk,
                value: zv,
            })),
            key: yk,
            value: yv,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom_table::*;

    fn var(n: u64) -> Variable {
        Variable(n)
    }

    #[test]
    fn bind_then_lookup() {
        let env = Env::new();
        let env = env.bind(var(1), Term::Atom(atom!("a")));

        assert_eq!(env.lookup(var(1)), Some(Term::Atom(atom!("a"))));
        assert_eq!(env.lookup(var(2)), None);
    }

    #[test]
    fn older_snapshots_are_unaffected_by_bind() {
        let e0 = Env::new();
        let e1 = e0.bind(var(1), Term::Integer(1));
        let e2 = e1.bind(var(2), Term::Integer(2));
        let e3 = e2.bind(var(1), Term::Integer(10));

        assert_eq!(e0.lookup(var(1)), None);
        assert_eq!(e1.lookup(var(1)), Some(Term::Integer(1)));
        assert_eq!(e1.lookup(var(2)), None);
        assert_eq!(e2.lookup(var(1)), Some(Term::Integer(1)));
        assert_eq!(e2.lookup(var(2)), Some(Term::Integer(2)));
        assert_eq!(e3.lookup(var(1)), Some(Term::Integer(10)));
        assert_eq!(e3.lookup(var(2)), Some(Term::Integer(2)));
    }

    #[test]
    fn many_bindings_stay_consistent() {
        let mut env = Env::new();
        let mut snapshots = Vec::new();

        for i in 0..512u64 {
            snapshots.push(env.clone());
            env = env.bind(var(i), Term::Integer(i as i64));
        }

        for (i, snap) in snapshots.iter().enumerate() {
            // snapshot i has exactly the first i bindings.
            for j in 0..512u64 {
                let expected = if (j as usize) < i {
                    Some(Term::Integer(j as i64))
                } else {
                    None
                };
                assert_eq!(snap.lookup(var(j)), expected);
            }
        }
    }

    #[test]
    fn resolve_follows_chains() {
        let env = Env::new()
            .bind(var(1), Term::Variable(var(2)))
            .bind(var(2), Term::Variable(var(3)))
            .bind(var(3), Term::Atom(atom!("end")));

        assert_eq!(
            env.resolve(&Term::Variable(var(1))),
            Term::Atom(atom!("end"))
        );
    }

    #[test]
    fn resolve_terminates_on_cyclic_chains() {
        let env = Env::new()
            .bind(var(1), Term::Variable(var(2)))
            .bind(var(2), Term::Variable(var(1)));

        // the walk stops at the first variable revisited.
        match env.resolve(&Term::Variable(var(1))) {
            Term::Variable(_) => {}
            t => panic!("expected a variable, got {:?}", t),
        }
    }

    #[test]
    fn simplify_replaces_bound_variables_deeply() {
        let env = Env::new().bind(var(1), Term::Integer(42));
        let t = atom!("f").apply(vec![Term::list(vec![
            Term::Variable(var(1)),
            Term::Variable(var(2)),
        ])]);

        let s = env.simplify(&t);
        let inner = s.arg(0).unwrap();
        assert_eq!(inner.arg(0), Some(Term::Integer(42)));
        assert_eq!(inner.arg(1).unwrap().arg(0), Some(Term::Variable(var(2))));
    }

    #[test]
    fn free_variables_in_first_encounter_order() {
        let env = Env::new();
        let t = atom!("f").apply(vec![
            Term::Variable(var(3)),
            atom!("g").apply(vec![Term::Variable(var(1)), Term::Variable(var(3))]),
            Term::Variable(var(2)),
        ]);

        assert_eq!(env.free_variables(&t), vec![var(3), var(1), var(2)]);
    }
}
