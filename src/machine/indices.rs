use std::fmt;
use std::rc::Rc;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

use crate::atom_table::*;
use crate::codegen::Clause;
use crate::machine::bindings::Env;
use crate::machine::dispatch;
use crate::machine::promise::{Cont, Promise, PromiseFn};
use crate::machine::term::Term;
use crate::machine::Machine;

/// Identifies a procedure, e.g. `(=)/2`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ProcedureIndicator {
    pub name: Atom,
    pub arity: usize,
}

impl ProcedureIndicator {
    pub fn new(name: Atom, arity: usize) -> Self {
        ProcedureIndicator { name, arity }
    }

    pub fn as_term(&self) -> Term {
        atom!("/").apply(vec![
            Term::Atom(self.name),
            Term::Integer(self.arity as i64),
        ])
    }
}

impl fmt::Display for ProcedureIndicator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

pub type Native0 = Rc<dyn Fn(&mut Machine, Cont, &Env) -> Promise>;
pub type Native1 = Rc<dyn Fn(&mut Machine, &Term, Cont, &Env) -> Promise>;
pub type Native2 = Rc<dyn Fn(&mut Machine, &Term, &Term, Cont, &Env) -> Promise>;
pub type Native3 = Rc<dyn Fn(&mut Machine, &Term, &Term, &Term, Cont, &Env) -> Promise>;
pub type Native4 = Rc<dyn Fn(&mut Machine, &Term, &Term, &Term, &Term, Cont, &Env) -> Promise>;
pub type Native5 =
    Rc<dyn Fn(&mut Machine, &Term, &Term, &Term, &Term, &Term, Cont, &Env) -> Promise>;
pub type Native6 =
    Rc<dyn Fn(&mut Machine, &Term, &Term, &Term, &Term, &Term, &Term, Cont, &Env) -> Promise>;
pub type Native7 = Rc<
    dyn Fn(&mut Machine, &Term, &Term, &Term, &Term, &Term, &Term, &Term, Cont, &Env) -> Promise,
>;
pub type Native8 = Rc<
    dyn Fn(
        &mut Machine,
        &Term,
        &Term,
        &Term,
        &Term,
        &Term,
        &Term,
        &Term,
        &Term,
        Cont,
        &Env,
    ) -> Promise,
>;

/// A natively implemented predicate of fixed arity 0..8.
#[derive(Clone)]
pub enum NativePredicate {
    P0(Native0),
    P1(Native1),
    P2(Native2),
    P3(Native3),
    P4(Native4),
    P5(Native5),
    P6(Native6),
    P7(Native7),
    P8(Native8),
}

impl NativePredicate {
    pub fn arity(&self) -> usize {
        match self {
            NativePredicate::P0(_) => 0,
            NativePredicate::P1(_) => 1,
            NativePredicate::P2(_) => 2,
            NativePredicate::P3(_) => 3,
            NativePredicate::P4(_) => 4,
            NativePredicate::P5(_) => 5,
            NativePredicate::P6(_) => 6,
            NativePredicate::P7(_) => 7,
            NativePredicate::P8(_) => 8,
        }
    }

    pub(crate) fn call(
        &self,
        machine: &mut Machine,
        args: &[Term],
        k: Cont,
        env: &Env,
    ) -> Promise {
        if args.len() != self.arity() {
            // an internal error: the database handed over a mismatched
            // argument vector; the predicate is never entered.
            let t = atom!("error").apply(vec![
                atom!("system_error").apply(vec![Term::Atom(atom!(
                    "wrong_number_of_arguments"
                ))]),
                Term::Variable(machine.var_context()),
            ]);
            return Promise::error(machine.exception(t, env));
        }

        match self {
            NativePredicate::P0(f) => f(machine, k, env),
            NativePredicate::P1(f) => f(machine, &args[0], k, env),
            NativePredicate::P2(f) => f(machine, &args[0], &args[1], k, env),
            NativePredicate::P3(f) => f(machine, &args[0], &args[1], &args[2], k, env),
            NativePredicate::P4(f) => f(machine, &args[0], &args[1], &args[2], &args[3], k, env),
            NativePredicate::P5(f) => {
                f(machine, &args[0], &args[1], &args[2], &args[3], &args[4], k, env)
            }
            NativePredicate::P6(f) => f(
                machine, &args[0], &args[1], &args[2], &args[3], &args[4], &args[5], k, env,
            ),
            NativePredicate::P7(f) => f(
                machine, &args[0], &args[1], &args[2], &args[3], &args[4], &args[5], &args[6], k,
                env,
            ),
            NativePredicate::P8(f) => f(
                machine, &args[0], &args[1], &args[2], &args[3], &args[4], &args[5], &args[6],
                &args[7], k, env,
            ),
        }
    }
}

/// Flags attached to a user-defined procedure.
#[derive(Clone, Default)]
pub struct UserDefined {
    pub public: bool,
    pub dynamic: bool,
    pub multifile: bool,
    pub discontiguous: bool,
    /// Closed once the consult pipeline has seen a clause of a different
    /// procedure after this one; further consulted clauses for a
    /// non-discontiguous closed procedure are rejected.
    pub closed: bool,
    pub clauses: Vec<Rc<Clause>>,
}

#[derive(Clone)]
pub enum Procedure {
    UserDefined(UserDefined),
    /// Compiled but non-modifiable clauses.
    Static(Vec<Rc<Clause>>),
    Builtin(NativePredicate),
}

impl Procedure {
    pub(crate) fn call(
        &self,
        machine: &mut Machine,
        args: Vec<Term>,
        k: Cont,
        env: &Env,
    ) -> Promise {
        match self {
            Procedure::UserDefined(user) => {
                clauses_call(Rc::new(user.clauses.clone()), args, k, env)
            }
            Procedure::Static(clauses) => clauses_call(Rc::new(clauses.clone()), args, k, env),
            Procedure::Builtin(native) => native.call(machine, &args, k, env),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Procedure::UserDefined(u) if u.dynamic)
    }
}

/// Tries the clauses of a procedure in database order. Children are
/// generated one at a time so that a caller needing only the first
/// solution does O(1) clauses' worth of work; the returned promise is the
/// cut barrier for `!` inside the clause bodies.
pub(crate) fn clauses_call(
    clauses: Rc<Vec<Rc<Clause>>>,
    args: Vec<Term>,
    k: Cont,
    env: &Env,
) -> Promise {
    let barrier = Promise::pending();

    let mut index = 0;
    let gen_barrier = barrier.clone();
    let env = env.clone();

    barrier.set_delayed(Box::new(move || {
        if index >= clauses.len() {
            return None;
        }

        let clause = clauses[index].clone();
        index += 1;

        let args = args.clone();
        let k = k.clone();
        let env = env.clone();
        let barrier = gen_barrier.clone();

        let f: PromiseFn = Rc::new(move |machine: &mut Machine| {
            let mut vars = Vec::with_capacity(clause.vars.len());
            for _ in 0..clause.vars.len() {
                match machine.new_variable(&env) {
                    Ok(v) => vars.push(v),
                    Err(e) => return Promise::error(e),
                }
            }

            dispatch::exec(
                machine,
                clause.clone(),
                0,
                Rc::new(vars),
                k.clone(),
                std::collections::VecDeque::from(args.clone()),
                Vec::new(),
                env.clone(),
                Some(barrier.clone()),
            )
        });

        Some(f)
    }));

    barrier
}

/// The procedure database: an insertion-ordered mapping from procedure
/// indicators, so that `current_predicate/1` and friends enumerate
/// reproducibly.
#[derive(Default)]
pub struct IndexStore {
    procedures: IndexMap<ProcedureIndicator, Procedure, FxBuildHasher>,
}

impl IndexStore {
    pub fn new() -> IndexStore {
        IndexStore {
            procedures: IndexMap::with_hasher(FxBuildHasher::default()),
        }
    }

    pub fn get(&self, pi: ProcedureIndicator) -> Option<&Procedure> {
        self.procedures.get(&pi)
    }

    pub fn get_mut(&mut self, pi: ProcedureIndicator) -> Option<&mut Procedure> {
        self.procedures.get_mut(&pi)
    }

    pub fn insert(&mut self, pi: ProcedureIndicator, procedure: Procedure) {
        self.procedures.insert(pi, procedure);
    }

    /// Removes while preserving the order of the remaining entries.
    pub fn remove(&mut self, pi: ProcedureIndicator) -> Option<Procedure> {
        self.procedures.shift_remove(&pi)
    }

    pub fn contains(&self, pi: ProcedureIndicator) -> bool {
        self.procedures.contains_key(&pi)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProcedureIndicator, &Procedure)> {
        self.procedures.iter()
    }
}
