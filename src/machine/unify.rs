use crate::machine::bindings::Env;
use crate::machine::term::{Term, Variable};

/// Robinson unification over a persistent environment. Returns the extended
/// environment on success and `None` on failure; failure is not an error.
pub fn unify(env: &Env, x: &Term, y: &Term, occurs_check: bool) -> Option<Env> {
    let x = env.resolve(x);
    let y = env.resolve(y);

    match (&x, &y) {
        (Term::Variable(v), _) => match &y {
            Term::Variable(w) if v == w => Some(env.clone()),
            _ if occurs_check && contains(env, &y, *v) => None,
            _ => Some(env.bind(*v, y)),
        },
        (_, Term::Variable(_)) => unify(env, &y, &x, occurs_check),
        (Term::Integer(a), Term::Integer(b)) => (a == b).then(|| env.clone()),
        (Term::Float(a), Term::Float(b)) => a.eq_value(b).then(|| env.clone()),
        (Term::Atom(a), Term::Atom(b)) => (a == b).then(|| env.clone()),
        (Term::Stream(a), Term::Stream(b)) => (a.id() == b.id()).then(|| env.clone()),
        _ if x.is_compound() && y.is_compound() => {
            if x.functor() != y.functor() || x.arity() != y.arity() {
                return None;
            }

            let mut env = env.clone();
            for i in 0..x.arity() {
                env = unify(
                    &env,
                    &x.arg(i).expect("i < arity"),
                    &y.arg(i).expect("i < arity"),
                    occurs_check,
                )?;
            }
            Some(env)
        }
        _ => None,
    }
}

/// True iff the variable `v` occurs in `t`, chasing bound variables.
fn contains(env: &Env, t: &Term, v: Variable) -> bool {
    match t {
        Term::Variable(w) => {
            if *w == v {
                return true;
            }
            match env.lookup(*w) {
                Some(bound) => contains(env, &bound, v),
                None => false,
            }
        }
        t if t.is_compound() => {
            (0..t.arity()).any(|i| contains(env, &t.arg(i).expect("i < arity"), v))
        }
        _ => false,
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
    fn atomic_unification_is_by_value() {
        let env = Env::new();

        assert!(unify(&env, &Term::Integer(1), &Term::Integer(1), false).is_some());
        assert!(unify(&env, &Term::Integer(1), &Term::Integer(2), false).is_none());
        assert!(unify(
            &env,
            &Term::Atom(atom!("a")),
            &Term::Atom(atom!("a")),
            false
        )
        .is_some());
        assert!(unify(&env, &Term::Atom(atom!("a")), &Term::Integer(1), false).is_none());
    }

    #[test]
    fn compound_unification_threads_bindings() {
        let env = Env::new();
        let lhs = atom!("f").apply(vec![Term::Variable(var(1)), Term::Integer(2)]);
        let rhs = atom!("f").apply(vec![Term::Integer(1), Term::Variable(var(2))]);

        let env = unify(&env, &lhs, &rhs, false).unwrap();
        assert_eq!(env.resolve(&Term::Variable(var(1))), Term::Integer(1));
        assert_eq!(env.resolve(&Term::Variable(var(2))), Term::Integer(2));

        let g = atom!("g").apply(vec![Term::Integer(1)]);
        assert!(unify(&env, &lhs, &g, false).is_none());
    }

    #[test]
    fn unification_is_symmetric() {
        let cases = [
            (
                atom!("f").apply(vec![Term::Variable(var(1))]),
                atom!("f").apply(vec![Term::Integer(7)]),
            ),
            (Term::Variable(var(3)), Term::Atom(atom!("x"))),
            (
                Term::list(vec![Term::Variable(var(4)), Term::Integer(2)]),
                Term::list(vec![Term::Integer(1), Term::Variable(var(5))]),
            ),
        ];

        for (a, b) in &cases {
            let env = Env::new();
            let lr = unify(&env, a, b, false);
            let rl = unify(&env, b, a, false);
            assert_eq!(lr.is_some(), rl.is_some());

            if let (Some(lr), Some(rl)) = (lr, rl) {
                // same bindings modulo which side was bound.
                for v in env
                    .free_variables(a)
                    .into_iter()
                    .chain(env.free_variables(b))
                {
                    assert_eq!(
                        lr.simplify(&Term::Variable(v)),
                        rl.simplify(&Term::Variable(v))
                    );
                }
            }
        }
    }

    #[test]
    fn occurs_check_rejects_self_embedding() {
        let env = Env::new();
        let x = Term::Variable(var(1));
        let fx = atom!("f").apply(vec![x.clone()]);

        assert!(unify(&env, &x, &fx, true).is_none());
        assert!(unify(&env, &x, &fx, false).is_some());
    }

    #[test]
    fn lists_unify_with_cons_compounds() {
        let env = Env::new();
        let l = Term::list(vec![Term::Integer(1), Term::Integer(2)]);
        let cons = atom!(".").apply(vec![
            Term::Integer(1),
            atom!(".").apply(vec![Term::Integer(2), Term::Atom(atom!("[]"))]),
        ]);

        assert!(unify(&env, &l, &cons, false).is_some());
    }
}
