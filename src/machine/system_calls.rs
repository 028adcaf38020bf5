use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::arithmetic::{self, ArithmeticError};
use crate::atom_table::*;
use crate::codegen;
use crate::machine::bindings::Env;
use crate::machine::indices::{clauses_call, Procedure, ProcedureIndicator, UserDefined};
use crate::machine::machine_errors::{
    Exception, ObjectType, Operation, PermissionType, RepFlag, ValidDomain, ValidType,
};
use crate::machine::promise::{Cont, Promise, PromiseFn, RecoverFn};
use crate::machine::streams::{Stream, StreamError};
use crate::machine::term::{compare, ListStep, ListWalker, Term, Variable};
use crate::machine::term_writer::{term_to_string, WriteOptions};
use crate::machine::unify::unify;
use crate::machine::{Machine, UnknownAction};
use crate::ops::{OpSpec, OpTableError};
use crate::parser::lexer::{LexError, Lexer, TokKind};
use crate::parser::parser::DoubleQuotes;

/// Continues into `k` under the environment extended by unifying `a` and
/// `b`; fails without error when they do not unify.
pub(crate) fn unify_cont(m: &mut Machine, a: &Term, b: &Term, k: Cont, env: &Env) -> Promise {
    match unify(env, a, b, false) {
        Some(env) => k(m, &env),
        None => Promise::bool(false),
    }
}

fn succeed() -> Cont {
    Rc::new(|_: &mut Machine, _: &Env| Promise::bool(true))
}

/// Executes a goal behind its own cut barrier: an ad-hoc clause
/// `'$call'(FreeVars...) :- Goal` is compiled and called, so `!` inside
/// the goal does not affect the caller's choice points.
pub(crate) fn call_goal(m: &mut Machine, goal: &Term, k: Cont, env: &Env) -> Promise {
    let g = env.resolve(goal);
    if let Term::Variable(_) = g {
        return Promise::error(m.instantiation_error(env));
    }

    let fvs = env.free_variables(&g);
    let args: Vec<Term> = fvs.iter().map(|v| Term::Variable(*v)).collect();
    let head = atom!("$call").apply(args.clone());
    let rule = atom!(":-").apply(vec![head, g]);

    match codegen::compile(m, &rule, env) {
        Err(e) => Promise::error(e),
        Ok(clauses) => clauses_call(Rc::new(clauses), args, k, env),
    }
}

/// Drives `goal` to exhaustion, collecting the simplified `template` of
/// every solution.
fn solutions_of(
    m: &mut Machine,
    template: &Term,
    goal: &Term,
    env: &Env,
) -> Result<Vec<Term>, Exception> {
    let answers: Rc<RefCell<Vec<Term>>> = Rc::new(RefCell::new(Vec::new()));
    let cell = answers.clone();
    let template = template.clone();

    let k: Cont = Rc::new(move |_: &mut Machine, env2: &Env| {
        cell.borrow_mut().push(env2.simplify(&template));
        Promise::bool(false) // ask for more solutions
    });

    call_goal(m, goal, k, env).force(m)?;

    let collected = answers.borrow().clone();
    Ok(collected)
}

/// Reads a proper list into a vector, raising the conventional errors for
/// partial lists and non-lists.
fn proper_list(m: &mut Machine, t: &Term, env: &Env) -> Result<Vec<Term>, Exception> {
    let mut out = Vec::new();
    for step in ListWalker::new(t, env) {
        match step {
            ListStep::Item(item) => out.push(item),
            ListStep::PartialTail(_) => return Err(m.instantiation_error(env)),
            ListStep::NotList(_) => {
                return Err(m.type_error(ValidType::List, env.resolve(t), env))
            }
        }
    }
    Ok(out)
}

/// Resolves a stream-or-alias argument to a stream handle.
fn stream_from(m: &mut Machine, t: &Term, env: &Env) -> Result<Stream, Exception> {
    match env.resolve(t) {
        Term::Variable(_) => Err(m.instantiation_error(env)),
        Term::Stream(s) => Ok(s),
        Term::Atom(alias) => match m.streams().by_alias(alias) {
            Some(s) => Ok(s),
            None => Err(m.existence_error(ObjectType::Stream, Term::Atom(alias), env)),
        },
        other => Err(m.domain_error(ValidDomain::StreamOrAlias, other, env)),
    }
}

fn stream_exception(
    m: &mut Machine,
    e: StreamError,
    culprit: &Term,
    env: &Env,
) -> Exception {
    let culprit = env.resolve(culprit);
    match e {
        StreamError::NotInput => {
            m.permission_error(Operation::Input, PermissionType::Stream, culprit, env)
        }
        StreamError::NotOutput => {
            m.permission_error(Operation::Output, PermissionType::Stream, culprit, env)
        }
        StreamError::NotText => m.permission_error(
            Operation::Input,
            PermissionType::BinaryStream,
            culprit,
            env,
        ),
        StreamError::NotBinary => {
            m.permission_error(Operation::Input, PermissionType::TextStream, culprit, env)
        }
        StreamError::PastEndOfStream => m.permission_error(
            Operation::Input,
            PermissionType::PastEndOfStream,
            culprit,
            env,
        ),
        StreamError::Io(err) => {
            let msg = AtomTable::build_with(&err.to_string());
            let t = atom!("error").apply(vec![
                atom!("system_error").apply(vec![Term::Atom(msg)]),
                Term::Variable(m.var_context()),
            ]);
            m.exception(t, env)
        }
    }
}

fn arithmetic_exception(m: &mut Machine, e: ArithmeticError, env: &Env) -> Exception {
    match e {
        ArithmeticError::Uninstantiated => m.instantiation_error(env),
        ArithmeticError::NonEvaluable(name, arity) => {
            let pi = ProcedureIndicator::new(name, arity);
            m.type_error(ValidType::Evaluable, pi.as_term(), env)
        }
        ArithmeticError::IntegerExpected(culprit) => {
            m.type_error(ValidType::Integer, culprit, env)
        }
        ArithmeticError::Exceptional(ev) => m.evaluation_error(ev, env),
    }
}

// ---------------------------------------------------------------------
// control

fn true_0(m: &mut Machine, k: Cont, env: &Env) -> Promise {
    k(m, env)
}

fn fail_0(_: &mut Machine, _: Cont, _: &Env) -> Promise {
    Promise::bool(false)
}

fn call_1(m: &mut Machine, goal: &Term, k: Cont, env: &Env) -> Promise {
    call_goal(m, goal, k, env)
}

fn goal_with_extra_args(
    m: &mut Machine,
    goal: &Term,
    extras: &[&Term],
    env: &Env,
) -> Result<Term, Exception> {
    match env.resolve(goal) {
        Term::Variable(_) => Err(m.instantiation_error(env)),
        Term::Atom(name) => Ok(name.apply(extras.iter().map(|t| (*t).clone()).collect())),
        g if g.is_compound() => {
            let mut args: Vec<Term> = (0..g.arity()).map(|i| g.arg(i).expect("i < arity")).collect();
            args.extend(extras.iter().map(|t| (*t).clone()));
            Ok(g.functor().expect("compound").apply(args))
        }
        g => Err(m.type_error(ValidType::Callable, g, env)),
    }
}

fn call_with_extras(
    m: &mut Machine,
    goal: &Term,
    extras: &[&Term],
    k: Cont,
    env: &Env,
) -> Promise {
    match goal_with_extra_args(m, goal, extras, env) {
        Ok(g) => call_goal(m, &g, k, env),
        Err(e) => Promise::error(e),
    }
}

/// `\+/1`: succeeds iff the goal has no solution.
fn negation_1(m: &mut Machine, goal: &Term, k: Cont, env: &Env) -> Promise {
    let _ = m;
    let goal = goal.clone();
    let env = env.clone();

    Promise::delay(vec![Rc::new(move |m: &mut Machine| {
        match call_goal(m, &goal, succeed(), &env).force(m) {
            Err(e) => Promise::error(e),
            Ok(true) => Promise::bool(false),
            Ok(false) => k(m, &env),
        }
    }) as PromiseFn])
}

/// If-then-else over a dedicated barrier: the condition's first solution
/// cuts away both its own remaining choices and the else branch.
fn if_then_else(
    cond: Term,
    then: Term,
    else_: Option<Term>,
    k: Cont,
    env: &Env,
) -> Promise {
    let barrier = Promise::pending();
    let env = env.clone();

    let then_fn: PromiseFn = {
        let barrier = barrier.clone();
        let env = env.clone();
        let k = k.clone();
        Rc::new(move |m: &mut Machine| {
            let barrier = barrier.clone();
            let then = then.clone();
            let k = k.clone();

            let k_cond: Cont = Rc::new(move |_: &mut Machine, env2: &Env| {
                let then = then.clone();
                let k = k.clone();
                let env2 = env2.clone();
                Promise::cut(
                    Some(barrier.clone()),
                    Rc::new(move |m: &mut Machine| call_goal(m, &then, k.clone(), &env2)),
                )
            });

            call_goal(m, &cond, k_cond, &env)
        })
    };

    let mut fns = vec![then_fn];
    if let Some(else_) = else_ {
        let env = env.clone();
        fns.push(Rc::new(move |m: &mut Machine| {
            call_goal(m, &else_, k.clone(), &env)
        }) as PromiseFn);
    }

    barrier.set_delayed({
        let mut queue: std::collections::VecDeque<PromiseFn> = fns.into();
        Box::new(move || queue.pop_front())
    });
    barrier
}

fn semicolon_2(m: &mut Machine, lhs: &Term, rhs: &Term, k: Cont, env: &Env) -> Promise {
    let _ = m;
    let l = env.resolve(lhs);

    if l.functor() == Some(atom!("->")) && l.arity() == 2 {
        return if_then_else(
            l.arg(0).expect("arity is 2"),
            l.arg(1).expect("arity is 2"),
            Some(rhs.clone()),
            k,
            env,
        );
    }

    let lhs = lhs.clone();
    let rhs = rhs.clone();
    let env_l = env.clone();
    let env_r = env.clone();
    let k2 = k.clone();

    Promise::delay(vec![
        Rc::new(move |m: &mut Machine| call_goal(m, &lhs, k.clone(), &env_l)) as PromiseFn,
        Rc::new(move |m: &mut Machine| call_goal(m, &rhs, k2.clone(), &env_r)) as PromiseFn,
    ])
}

fn if_then_2(m: &mut Machine, cond: &Term, then: &Term, k: Cont, env: &Env) -> Promise {
    let _ = m;
    if_then_else(cond.clone(), then.clone(), None, k, env)
}

fn repeat_0(m: &mut Machine, k: Cont, env: &Env) -> Promise {
    let _ = m;
    let env = env.clone();
    Promise::repeat(Rc::new(move |m: &mut Machine| k(m, &env)))
}

fn halt_1(m: &mut Machine, code: &Term, _k: Cont, env: &Env) -> Promise {
    match env.resolve(code) {
        Term::Variable(_) => Promise::error(m.instantiation_error(env)),
        Term::Integer(n) => {
            let clamped = n.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
            std::process::exit(clamped)
        }
        other => Promise::error(m.type_error(ValidType::Integer, other, env)),
    }
}

fn throw_1(m: &mut Machine, ball: &Term, _k: Cont, env: &Env) -> Promise {
    let ball = env.resolve(ball);
    if let Term::Variable(_) = ball {
        return Promise::error(m.instantiation_error(env));
    }
    Promise::error(m.exception(ball, env))
}

fn catch_3(
    m: &mut Machine,
    goal: &Term,
    catcher: &Term,
    recovery: &Term,
    k: Cont,
    env: &Env,
) -> Promise {
    let _ = m;
    let child: PromiseFn = {
        let goal = goal.clone();
        let env = env.clone();
        let k = k.clone();
        Rc::new(move |m: &mut Machine| call_goal(m, &goal, k.clone(), &env))
    };

    let recover: RecoverFn = {
        let catcher = catcher.clone();
        let recovery = recovery.clone();
        let env = env.clone();
        Box::new(move |m: &mut Machine, e: &Exception| {
            let env = unify(&env, &catcher, e.term(), false)?;
            Some(call_goal(m, &recovery, k.clone(), &env))
        })
    };

    Promise::catch(recover, child)
}

// ---------------------------------------------------------------------
// unification

pub(crate) fn unify_2(m: &mut Machine, a: &Term, b: &Term, k: Cont, env: &Env) -> Promise {
    unify_cont(m, a, b, k, env)
}

fn not_unifiable_2(m: &mut Machine, a: &Term, b: &Term, k: Cont, env: &Env) -> Promise {
    match unify(env, a, b, false) {
        Some(_) => Promise::bool(false),
        None => k(m, env),
    }
}

fn unify_with_occurs_check_2(
    m: &mut Machine,
    a: &Term,
    b: &Term,
    k: Cont,
    env: &Env,
) -> Promise {
    match unify(env, a, b, true) {
        Some(env) => k(m, &env),
        None => Promise::bool(false),
    }
}

// ---------------------------------------------------------------------
// type tests

fn type_test(holds: bool, m: &mut Machine, k: Cont, env: &Env) -> Promise {
    if holds {
        k(m, env)
    } else {
        Promise::bool(false)
    }
}

fn var_1(m: &mut Machine, t: &Term, k: Cont, env: &Env) -> Promise {
    type_test(matches!(env.resolve(t), Term::Variable(_)), m, k, env)
}

fn nonvar_1(m: &mut Machine, t: &Term, k: Cont, env: &Env) -> Promise {
    type_test(!matches!(env.resolve(t), Term::Variable(_)), m, k, env)
}

fn atom_1(m: &mut Machine, t: &Term, k: Cont, env: &Env) -> Promise {
    type_test(matches!(env.resolve(t), Term::Atom(_)), m, k, env)
}

fn number_1(m: &mut Machine, t: &Term, k: Cont, env: &Env) -> Promise {
    type_test(
        matches!(env.resolve(t), Term::Integer(_) | Term::Float(_)),
        m,
        k,
        env,
    )
}

fn integer_1(m: &mut Machine, t: &Term, k: Cont, env: &Env) -> Promise {
    type_test(matches!(env.resolve(t), Term::Integer(_)), m, k, env)
}

fn float_1(m: &mut Machine, t: &Term, k: Cont, env: &Env) -> Promise {
    type_test(matches!(env.resolve(t), Term::Float(_)), m, k, env)
}

fn atomic_1(m: &mut Machine, t: &Term, k: Cont, env: &Env) -> Promise {
    type_test(env.resolve(t).is_atomic(), m, k, env)
}

fn compound_1(m: &mut Machine, t: &Term, k: Cont, env: &Env) -> Promise {
    type_test(env.resolve(t).is_compound(), m, k, env)
}

fn callable_1(m: &mut Machine, t: &Term, k: Cont, env: &Env) -> Promise {
    type_test(env.resolve(t).is_callable(), m, k, env)
}

fn is_list_1(m: &mut Machine, t: &Term, k: Cont, env: &Env) -> Promise {
    type_test(t.is_proper_list(env), m, k, env)
}

// ---------------------------------------------------------------------
// term inspection

fn functor_3(
    m: &mut Machine,
    t: &Term,
    name: &Term,
    arity: &Term,
    k: Cont,
    env: &Env,
) -> Promise {
    match env.resolve(t) {
        Term::Variable(_) => {
            let n = match env.resolve(arity) {
                Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
                Term::Integer(n) => n,
                other => return Promise::error(m.type_error(ValidType::Integer, other, env)),
            };
            if n < 0 {
                let culprit = Term::Integer(n);
                return Promise::error(m.domain_error(
                    ValidDomain::NotLessThanZero,
                    culprit,
                    env,
                ));
            }

            let name = match env.resolve(name) {
                Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
                name => name,
            };

            if n == 0 {
                if name.is_compound() {
                    return Promise::error(m.type_error(ValidType::Atomic, name, env));
                }
                return unify_cont(m, t, &name, k, env);
            }

            let functor = match name {
                Term::Atom(a) => a,
                name if name.is_compound() => {
                    return Promise::error(m.type_error(ValidType::Atomic, name, env));
                }
                name => return Promise::error(m.type_error(ValidType::Atom, name, env)),
            };

            let mut args = Vec::with_capacity(n as usize);
            for _ in 0..n {
                match m.new_variable(env) {
                    Ok(v) => args.push(Term::Variable(v)),
                    Err(e) => return Promise::error(e),
                }
            }
            unify_cont(m, t, &functor.apply(args), k, env)
        }
        t_resolved => {
            let (name_t, arity_t) = if t_resolved.is_compound() {
                (
                    Term::Atom(t_resolved.functor().expect("compound")),
                    Term::Integer(t_resolved.arity() as i64),
                )
            } else {
                (t_resolved, Term::Integer(0))
            };

            match unify(env, name, &name_t, false) {
                None => Promise::bool(false),
                Some(env) => unify_cont(m, arity, &arity_t, k, &env),
            }
        }
    }
}

fn arg_3(m: &mut Machine, nth: &Term, t: &Term, arg: &Term, k: Cont, env: &Env) -> Promise {
    let t_resolved = env.resolve(t);
    if matches!(t_resolved, Term::Variable(_)) {
        return Promise::error(m.instantiation_error(env));
    }
    if !t_resolved.is_compound() {
        return Promise::error(m.type_error(ValidType::Compound, t_resolved, env));
    }

    match env.resolve(nth) {
        Term::Variable(_) => Promise::error(m.instantiation_error(env)),
        Term::Integer(n) => {
            if n < 1 || n as usize > t_resolved.arity() {
                return Promise::bool(false);
            }
            let nth_arg = t_resolved.arg(n as usize - 1).expect("in range");
            unify_cont(m, arg, &nth_arg, k, env)
        }
        other => Promise::error(m.type_error(ValidType::Integer, other, env)),
    }
}

fn univ_2(m: &mut Machine, t: &Term, list: &Term, k: Cont, env: &Env) -> Promise {
    match env.resolve(t) {
        Term::Variable(_) => {
            let items = match proper_list(m, list, env) {
                Ok(items) => items,
                Err(e) => return Promise::error(e),
            };

            if items.is_empty() {
                let culprit = env.resolve(list);
                return Promise::error(m.domain_error(
                    ValidDomain::NonEmptyList,
                    culprit,
                    env,
                ));
            }

            let head = env.resolve(&items[0]);
            match head {
                Term::Variable(_) => Promise::error(m.instantiation_error(env)),
                Term::Atom(name) => {
                    let built = name.apply(items[1..].to_vec());
                    unify_cont(m, t, &built, k, env)
                }
                head if items.len() == 1 && !head.is_compound() => {
                    unify_cont(m, t, &head, k, env)
                }
                head => Promise::error(m.type_error(ValidType::Atom, head, env)),
            }
        }
        t_resolved => {
            let items = if t_resolved.is_compound() {
                let mut items =
                    vec![Term::Atom(t_resolved.functor().expect("compound"))];
                items.extend((0..t_resolved.arity()).map(|i| t_resolved.arg(i).expect("i < arity")));
                items
            } else {
                vec![t_resolved]
            };
            unify_cont(m, list, &Term::list(items), k, env)
        }
    }
}

fn copy_term_2(m: &mut Machine, t: &Term, copy: &Term, k: Cont, env: &Env) -> Promise {
    match m.renamed_copy(t, env) {
        Ok(c) => unify_cont(m, copy, &c, k, env),
        Err(e) => Promise::error(e),
    }
}

fn compare_3(
    m: &mut Machine,
    order: &Term,
    t1: &Term,
    t2: &Term,
    k: Cont,
    env: &Env,
) -> Promise {
    match env.resolve(order) {
        Term::Variable(_) => {}
        Term::Atom(a) if matches!(a.as_str(), "<" | "=" | ">") => {}
        Term::Atom(a) => {
            return Promise::error(m.domain_error(ValidDomain::Order, Term::Atom(a), env))
        }
        other => return Promise::error(m.type_error(ValidType::Atom, other, env)),
    }

    let d = compare(t1, t2, env);
    let symbol = match d {
        Ordering::Less => atom!("<"),
        Ordering::Equal => atom!("="),
        Ordering::Greater => atom!(">"),
    };
    unify_cont(m, order, &Term::Atom(symbol), k, env)
}

// ---------------------------------------------------------------------
// arithmetic

fn is_2(m: &mut Machine, result: &Term, expr: &Term, k: Cont, env: &Env) -> Promise {
    match arithmetic::eval(expr, env) {
        Ok(n) => unify_cont(m, result, &n.into_term(), k, env),
        Err(e) => Promise::error(arithmetic_exception(m, e, env)),
    }
}

fn arith_cmp(
    m: &mut Machine,
    a: &Term,
    b: &Term,
    k: Cont,
    env: &Env,
    test: fn(Ordering) -> bool,
) -> Promise {
    let lhs = match arithmetic::eval(a, env) {
        Ok(n) => n,
        Err(e) => return Promise::error(arithmetic_exception(m, e, env)),
    };
    let rhs = match arithmetic::eval(b, env) {
        Ok(n) => n,
        Err(e) => return Promise::error(arithmetic_exception(m, e, env)),
    };

    type_test(test(arithmetic::compare_numbers(lhs, rhs)), m, k, env)
}

// ---------------------------------------------------------------------
// all solutions

fn findall_3(
    m: &mut Machine,
    template: &Term,
    goal: &Term,
    instances: &Term,
    k: Cont,
    env: &Env,
) -> Promise {
    let _ = m;
    let template = template.clone();
    let goal = goal.clone();
    let instances = instances.clone();
    let env = env.clone();

    Promise::delay(vec![Rc::new(move |m: &mut Machine| {
        match solutions_of(m, &template, &goal, &env) {
            Err(e) => Promise::error(e),
            Ok(answers) => unify_cont(m, &instances, &Term::list(answers), k.clone(), &env),
        }
    }) as PromiseFn])
}

fn bagof_3(
    m: &mut Machine,
    template: &Term,
    goal: &Term,
    instances: &Term,
    k: Cont,
    env: &Env,
) -> Promise {
    collection_of(m, template, goal, instances, k, env, false)
}

fn setof_3(
    m: &mut Machine,
    template: &Term,
    goal: &Term,
    instances: &Term,
    k: Cont,
    env: &Env,
) -> Promise {
    collection_of(m, template, goal, instances, k, env, true)
}

/// The shared engine of `bagof/3` and `setof/3`: solutions are grouped by
/// the witness (the free variables of the goal not bound by the template
/// or an existential qualifier), groups are enumerated in standard order,
/// and `setof` additionally sorts and deduplicates each group.
fn collection_of(
    m: &mut Machine,
    template: &Term,
    goal: &Term,
    instances: &Term,
    k: Cont,
    env: &Env,
    dedup_sort: bool,
) -> Promise {
    let goal = env.resolve(goal);
    if let Term::Variable(_) = goal {
        return Promise::error(m.instantiation_error(env));
    }

    // strip `Vars ^ Goal` qualifiers.
    let mut ex_vars: Vec<Variable> = Vec::new();
    let mut body = goal;
    while body.functor() == Some(atom!("^")) && body.arity() == 2 {
        env.append_free_variables(&mut ex_vars, &body.arg(0).expect("arity is 2"));
        body = env.resolve(&body.arg(1).expect("arity is 2"));
    }

    let template_vars = env.free_variables(template);
    let grouping: Vec<Variable> = env
        .free_variables(&body)
        .into_iter()
        .filter(|v| !template_vars.contains(v) && !ex_vars.contains(v))
        .collect();

    let template = template.clone();
    let instances = instances.clone();
    let env = env.clone();

    Promise::delay(vec![Rc::new(move |m: &mut Machine| {
        let witness =
            atom!("vars").apply(grouping.iter().map(|v| Term::Variable(*v)).collect());
        let pair_template = atom!("-").apply(vec![witness, template.clone()]);

        let answers = match solutions_of(m, &pair_template, &body, &env) {
            Err(e) => return Promise::error(e),
            Ok(answers) => answers,
        };

        let mut groups: Vec<(Term, Vec<Term>)> = Vec::new();
        for answer in answers {
            let vars_t = answer.arg(0).expect("pair");
            let instance = answer.arg(1).expect("pair");
            match groups
                .iter_mut()
                .find(|(v, _)| compare(v, &vars_t, &env) == Ordering::Equal)
            {
                Some((_, insts)) => insts.push(instance),
                None => groups.push((vars_t, vec![instance])),
            }
        }

        groups.sort_by(|a, b| compare(&a.0, &b.0, &env));

        let fns: Vec<PromiseFn> = groups
            .into_iter()
            .map(|(vars_t, mut insts)| {
                if dedup_sort {
                    insts.sort_by(|a, b| compare(a, b, &env));
                    insts.dedup_by(|a, b| compare(a, b, &env) == Ordering::Equal);
                }

                let grouping = grouping.clone();
                let instances = instances.clone();
                let k = k.clone();
                let env = env.clone();

                Rc::new(move |m: &mut Machine| {
                    let mut env2 = env.clone();
                    if vars_t.is_compound() {
                        for (j, v) in grouping.iter().enumerate() {
                            env2 = env2.bind(*v, vars_t.arg(j).expect("witness arity"));
                        }
                    }
                    unify_cont(m, &instances, &Term::list(insts.clone()), k.clone(), &env2)
                }) as PromiseFn
            })
            .collect();

        Promise::delay(fns)
    }) as PromiseFn])
}

// ---------------------------------------------------------------------
// database updates

fn clause_indicator(m: &mut Machine, t: &Term, env: &Env) -> Result<ProcedureIndicator, Exception> {
    let t = env.resolve(t);
    let head = if t.functor() == Some(atom!(":-")) && t.arity() == 2 {
        env.resolve(&t.arg(0).expect("arity is 2"))
    } else {
        t
    };

    match head {
        Term::Variable(_) => Err(m.instantiation_error(env)),
        Term::Atom(name) => Ok(ProcedureIndicator::new(name, 0)),
        head if head.is_compound() => Ok(ProcedureIndicator::new(
            head.functor().expect("compound"),
            head.arity(),
        )),
        head => Err(m.type_error(ValidType::Callable, head, env)),
    }
}

fn assert_clause(m: &mut Machine, t: &Term, front: bool, k: Cont, env: &Env) -> Promise {
    let pi = match clause_indicator(m, t, env) {
        Ok(pi) => pi,
        Err(e) => return Promise::error(e),
    };

    let compiled = match codegen::compile(m, t, env) {
        Ok(cs) => cs,
        Err(e) => return Promise::error(e),
    };

    let modifiable = match m.indices().get(pi) {
        None => {
            // a procedure first created by assert is dynamic.
            let user = UserDefined {
                dynamic: true,
                ..Default::default()
            };
            m.indices_mut().insert(pi, Procedure::UserDefined(user));
            true
        }
        Some(Procedure::UserDefined(u)) => u.dynamic,
        Some(_) => false,
    };

    if !modifiable {
        return Promise::error(m.permission_error(
            Operation::Modify,
            PermissionType::StaticProcedure,
            pi.as_term(),
            env,
        ));
    }

    if let Some(Procedure::UserDefined(u)) = m.indices_mut().get_mut(pi) {
        if front {
            let mut merged = compiled;
            merged.extend(u.clauses.drain(..));
            u.clauses = merged;
        } else {
            u.clauses.extend(compiled);
        }
    }
    k(m, env)
}

fn assertz_1(m: &mut Machine, t: &Term, k: Cont, env: &Env) -> Promise {
    assert_clause(m, t, false, k, env)
}

fn asserta_1(m: &mut Machine, t: &Term, k: Cont, env: &Env) -> Promise {
    assert_clause(m, t, true, k, env)
}

fn retract_1(m: &mut Machine, t: &Term, k: Cont, env: &Env) -> Promise {
    let t = codegen::rulify(t, env);

    let pi = match clause_indicator(m, &t, env) {
        Ok(pi) => pi,
        Err(e) => return Promise::error(e),
    };

    let snapshot = match m.indices().get(pi) {
        None => return Promise::bool(false),
        Some(Procedure::UserDefined(u)) if u.dynamic => u.clauses.clone(),
        Some(_) => {
            return Promise::error(m.permission_error(
                Operation::Modify,
                PermissionType::StaticProcedure,
                pi.as_term(),
                env,
            ))
        }
    };

    let fns: Vec<PromiseFn> = snapshot
        .into_iter()
        .map(|c| {
            let t = t.clone();
            let env = env.clone();
            let k = k.clone();

            Rc::new(move |m: &mut Machine| {
                let raw = codegen::rulify(&c.raw, &env);
                match unify(&env, &t, &raw, false) {
                    None => Promise::bool(false),
                    Some(env2) => {
                        if let Some(Procedure::UserDefined(u)) = m.indices_mut().get_mut(pi) {
                            if let Some(pos) =
                                u.clauses.iter().position(|x| Rc::ptr_eq(x, &c))
                            {
                                u.clauses.remove(pos);
                            }
                        }
                        k(m, &env2)
                    }
                }
            }) as PromiseFn
        })
        .collect();

    Promise::delay(fns)
}

fn abolish_1(m: &mut Machine, pi: &Term, k: Cont, env: &Env) -> Promise {
    let pi_t = env.resolve(pi);

    let (name, arity) = match &pi_t {
        Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
        t if t.functor() == Some(atom!("/")) && t.arity() == 2 => {
            let name = env.resolve(&t.arg(0).expect("arity is 2"));
            let arity = env.resolve(&t.arg(1).expect("arity is 2"));
            (name, arity)
        }
        _ => {
            return Promise::error(m.type_error(ValidType::PredicateIndicator, pi_t, env))
        }
    };

    let name = match name {
        Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
        Term::Atom(a) => a,
        other => return Promise::error(m.type_error(ValidType::Atom, other, env)),
    };
    let arity = match arity {
        Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
        Term::Integer(n) if n < 0 => {
            return Promise::error(m.domain_error(
                ValidDomain::NotLessThanZero,
                Term::Integer(n),
                env,
            ))
        }
        Term::Integer(n) => n as usize,
        other => return Promise::error(m.type_error(ValidType::Integer, other, env)),
    };

    let key = ProcedureIndicator::new(name, arity);
    let is_dynamic = matches!(
        m.indices().get(key),
        Some(Procedure::UserDefined(u)) if u.dynamic
    );

    if is_dynamic {
        m.indices_mut().remove(key);
        k(m, env)
    } else {
        Promise::error(m.permission_error(
            Operation::Modify,
            PermissionType::StaticProcedure,
            key.as_term(),
            env,
        ))
    }
}

fn current_predicate_1(m: &mut Machine, pi: &Term, k: Cont, env: &Env) -> Promise {
    match env.resolve(pi) {
        Term::Variable(_) => {}
        t if t.functor() == Some(atom!("/")) && t.arity() == 2 => {
            let name = env.resolve(&t.arg(0).expect("arity is 2"));
            let arity = env.resolve(&t.arg(1).expect("arity is 2"));
            let name_ok = matches!(name, Term::Variable(_) | Term::Atom(_));
            let arity_ok = matches!(arity, Term::Variable(_) | Term::Integer(_));
            if !name_ok || !arity_ok {
                return Promise::error(m.type_error(ValidType::PredicateIndicator, t, env));
            }
        }
        t => return Promise::error(m.type_error(ValidType::PredicateIndicator, t, env)),
    }

    let keys: Vec<ProcedureIndicator> = m
        .indices()
        .iter()
        .filter(|(_, p)| matches!(p, Procedure::UserDefined(_) | Procedure::Static(_)))
        .map(|(key, _)| *key)
        .collect();

    let pi = pi.clone();
    let env = env.clone();
    let fns: Vec<PromiseFn> = keys
        .into_iter()
        .map(|key| {
            let pi = pi.clone();
            let env = env.clone();
            let k = k.clone();
            Rc::new(move |m: &mut Machine| {
                unify_cont(m, &pi, &key.as_term(), k.clone(), &env)
            }) as PromiseFn
        })
        .collect();

    Promise::delay(fns)
}

// ---------------------------------------------------------------------
// operators

fn op_3(
    m: &mut Machine,
    priority: &Term,
    specifier: &Term,
    operator: &Term,
    k: Cont,
    env: &Env,
) -> Promise {
    let priority = match env.resolve(priority) {
        Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
        Term::Integer(p) if (0..=1200).contains(&p) => p as u16,
        Term::Integer(p) => {
            return Promise::error(m.domain_error(
                ValidDomain::OperatorPriority,
                Term::Integer(p),
                env,
            ))
        }
        other => return Promise::error(m.type_error(ValidType::Integer, other, env)),
    };

    let spec = match env.resolve(specifier) {
        Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
        Term::Atom(a) => match OpSpec::from_atom(a) {
            Some(spec) => spec,
            None => {
                return Promise::error(m.domain_error(
                    ValidDomain::OperatorSpecifier,
                    Term::Atom(a),
                    env,
                ))
            }
        },
        other => return Promise::error(m.type_error(ValidType::Atom, other, env)),
    };

    let names = match env.resolve(operator) {
        Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
        Term::Atom(a) => vec![a],
        t if t.is_proper_list(env) => {
            let items = match proper_list(m, &t, env) {
                Ok(items) => items,
                Err(e) => return Promise::error(e),
            };
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                match env.resolve(&item) {
                    Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
                    Term::Atom(a) => names.push(a),
                    other => {
                        return Promise::error(m.type_error(ValidType::Atom, other, env))
                    }
                }
            }
            names
        }
        other => return Promise::error(m.type_error(ValidType::List, other, env)),
    };

    for name in names {
        match m.ops_mut().define(priority, spec, name) {
            Ok(()) => {}
            Err(OpTableError::ModifyComma) => {
                return Promise::error(m.permission_error(
                    Operation::Modify,
                    PermissionType::Operator,
                    Term::Atom(atom!(",")),
                    env,
                ))
            }
            Err(OpTableError::InfixPostfixClash(name)) => {
                return Promise::error(m.permission_error(
                    Operation::Create,
                    PermissionType::Operator,
                    Term::Atom(name),
                    env,
                ))
            }
        }
    }

    k(m, env)
}

fn current_op_3(
    m: &mut Machine,
    priority: &Term,
    specifier: &Term,
    operator: &Term,
    k: Cont,
    env: &Env,
) -> Promise {
    let defs: Vec<_> = m.ops().iter().collect();

    let priority = priority.clone();
    let specifier = specifier.clone();
    let operator = operator.clone();
    let env = env.clone();

    let fns: Vec<PromiseFn> = defs
        .into_iter()
        .map(|def| {
            let priority = priority.clone();
            let specifier = specifier.clone();
            let operator = operator.clone();
            let env = env.clone();
            let k = k.clone();

            Rc::new(move |m: &mut Machine| {
                let env = match unify(&env, &priority, &Term::Integer(def.priority as i64), false)
                {
                    Some(env) => env,
                    None => return Promise::bool(false),
                };
                let env = match unify(&env, &specifier, &Term::Atom(def.spec.as_atom()), false) {
                    Some(env) => env,
                    None => return Promise::bool(false),
                };
                unify_cont(m, &operator, &Term::Atom(def.name), k.clone(), &env)
            }) as PromiseFn
        })
        .collect();

    Promise::delay(fns)
}

// ---------------------------------------------------------------------
// atoms and numbers as text

fn atom_length_2(m: &mut Machine, a: &Term, len: &Term, k: Cont, env: &Env) -> Promise {
    let a = match env.resolve(a) {
        Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
        Term::Atom(a) => a,
        other => return Promise::error(m.type_error(ValidType::Atom, other, env)),
    };

    match env.resolve(len) {
        Term::Variable(_) | Term::Integer(_) => {}
        other => return Promise::error(m.type_error(ValidType::Integer, other, env)),
    }

    let n = a.as_str().chars().count() as i64;
    unify_cont(m, len, &Term::Integer(n), k, env)
}

fn atom_chars_2(m: &mut Machine, a: &Term, chars: &Term, k: Cont, env: &Env) -> Promise {
    match env.resolve(a) {
        Term::Atom(a) => unify_cont(m, chars, &Term::char_list(a.as_str()), k, env),
        Term::Variable(_) => {
            let items = match proper_list(m, chars, env) {
                Ok(items) => items,
                Err(e) => return Promise::error(e),
            };

            let mut text = String::new();
            for item in items {
                match env.resolve(&item) {
                    Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
                    Term::Atom(c) => match c.as_char() {
                        Some(c) => text.push(c),
                        None => {
                            return Promise::error(m.type_error(
                                ValidType::Character,
                                Term::Atom(c),
                                env,
                            ))
                        }
                    },
                    other => {
                        return Promise::error(m.type_error(ValidType::Character, other, env))
                    }
                }
            }
            let built = Term::Atom(AtomTable::build_with(&text));
            unify_cont(m, a, &built, k, env)
        }
        other => Promise::error(m.type_error(ValidType::Atom, other, env)),
    }
}

fn atom_codes_2(m: &mut Machine, a: &Term, codes: &Term, k: Cont, env: &Env) -> Promise {
    match env.resolve(a) {
        Term::Atom(a) => unify_cont(m, codes, &Term::code_list(a.as_str()), k, env),
        Term::Variable(_) => {
            let items = match proper_list(m, codes, env) {
                Ok(items) => items,
                Err(e) => return Promise::error(e),
            };

            let mut text = String::new();
            for item in items {
                match env.resolve(&item) {
                    Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
                    Term::Integer(code) => {
                        match u32::try_from(code).ok().and_then(char::from_u32) {
                            Some(c) => text.push(c),
                            None => {
                                return Promise::error(
                                    m.representation_error(RepFlag::CharacterCode, env),
                                )
                            }
                        }
                    }
                    other => {
                        return Promise::error(m.type_error(ValidType::Integer, other, env))
                    }
                }
            }
            let built = Term::Atom(AtomTable::build_with(&text));
            unify_cont(m, a, &built, k, env)
        }
        other => Promise::error(m.type_error(ValidType::Atom, other, env)),
    }
}

fn char_code_2(m: &mut Machine, ch: &Term, code: &Term, k: Cont, env: &Env) -> Promise {
    match env.resolve(ch) {
        Term::Atom(a) => match a.as_char() {
            Some(c) => unify_cont(m, code, &Term::Integer(c as i64), k, env),
            None => Promise::error(m.type_error(ValidType::Character, Term::Atom(a), env)),
        },
        Term::Variable(_) => match env.resolve(code) {
            Term::Variable(_) => Promise::error(m.instantiation_error(env)),
            Term::Integer(n) => match u32::try_from(n).ok().and_then(char::from_u32) {
                Some(c) => {
                    let a = Term::Atom(AtomTable::build_with(&c.to_string()));
                    unify_cont(m, ch, &a, k, env)
                }
                None => Promise::error(m.representation_error(RepFlag::CharacterCode, env)),
            },
            other => Promise::error(m.type_error(ValidType::Integer, other, env)),
        },
        other => Promise::error(m.type_error(ValidType::Character, other, env)),
    }
}

fn number_text(t: &Term) -> Option<String> {
    match t {
        Term::Integer(i) => Some(i.to_string()),
        Term::Float(f) => Some(f.to_string()),
        _ => None,
    }
}

/// Parses the text of a number token (with optional leading minus),
/// mirroring the reader's number syntax.
fn parse_number(m: &mut Machine, text: &str, env: &Env) -> Result<Term, Exception> {
    let mut lexer = Lexer::new(text.trim(), Default::default(), false);

    let lex_err = |m: &mut Machine, e: LexError, env: &Env| match e {
        LexError::IntOutOfRange => m.representation_error(RepFlag::MaxInteger, env),
        LexError::FloatCondition(ev) => m.evaluation_error(ev, env),
        _ => m.syntax_error(Term::Atom(atom!("illegal number")), env),
    };

    let mut negative = false;
    let mut tok = match lexer.next_token() {
        Err(e) => return Err(lex_err(m, e, env)),
        Ok(None) => return Err(m.syntax_error(Term::Atom(atom!("illegal number")), env)),
        Ok(Some(t)) => t,
    };

    if tok.kind == TokKind::Atom(atom!("-")) {
        negative = true;
        tok = match lexer.next_token() {
            Err(e) => return Err(lex_err(m, e, env)),
            Ok(None) => {
                return Err(m.syntax_error(Term::Atom(atom!("illegal number")), env))
            }
            Ok(Some(t)) => t,
        };
    }

    let value = match tok.kind {
        TokKind::Int(i) => {
            let v = if negative { -i } else { i };
            if v > i64::MAX as i128 {
                return Err(m.representation_error(RepFlag::MaxInteger, env));
            }
            if v < i64::MIN as i128 {
                return Err(m.representation_error(RepFlag::MinInteger, env));
            }
            Term::Integer(v as i64)
        }
        TokKind::Float(f) => Term::Float(if negative { f.negated() } else { f }),
        _ => return Err(m.syntax_error(Term::Atom(atom!("illegal number")), env)),
    };

    match lexer.next_token() {
        Ok(None) => Ok(value),
        _ => Err(m.syntax_error(Term::Atom(atom!("illegal number")), env)),
    }
}

fn number_chars_2(m: &mut Machine, n: &Term, chars: &Term, k: Cont, env: &Env) -> Promise {
    let n_resolved = env.resolve(n);
    if let Some(text) = number_text(&n_resolved) {
        return unify_cont(m, chars, &Term::char_list(&text), k, env);
    }

    match n_resolved {
        Term::Variable(_) => {
            let items = match proper_list(m, chars, env) {
                Ok(items) => items,
                Err(e) => return Promise::error(e),
            };

            let mut text = String::new();
            for item in items {
                match env.resolve(&item) {
                    Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
                    Term::Atom(c) => match c.as_char() {
                        Some(c) => text.push(c),
                        None => {
                            return Promise::error(m.type_error(
                                ValidType::Character,
                                Term::Atom(c),
                                env,
                            ))
                        }
                    },
                    other => {
                        return Promise::error(m.type_error(ValidType::Character, other, env))
                    }
                }
            }

            match parse_number(m, &text, env) {
                Ok(v) => unify_cont(m, n, &v, k, env),
                Err(e) => Promise::error(e),
            }
        }
        other => Promise::error(m.type_error(ValidType::Number, other, env)),
    }
}

fn number_codes_2(m: &mut Machine, n: &Term, codes: &Term, k: Cont, env: &Env) -> Promise {
    let n_resolved = env.resolve(n);
    if let Some(text) = number_text(&n_resolved) {
        return unify_cont(m, codes, &Term::code_list(&text), k, env);
    }

    match n_resolved {
        Term::Variable(_) => {
            let items = match proper_list(m, codes, env) {
                Ok(items) => items,
                Err(e) => return Promise::error(e),
            };

            let mut text = String::new();
            for item in items {
                match env.resolve(&item) {
                    Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
                    Term::Integer(code) => {
                        match u32::try_from(code).ok().and_then(char::from_u32) {
                            Some(c) => text.push(c),
                            None => {
                                return Promise::error(
                                    m.representation_error(RepFlag::CharacterCode, env),
                                )
                            }
                        }
                    }
                    other => {
                        return Promise::error(m.type_error(ValidType::Integer, other, env))
                    }
                }
            }

            match parse_number(m, &text, env) {
                Ok(v) => unify_cont(m, n, &v, k, env),
                Err(e) => Promise::error(e),
            }
        }
        other => Promise::error(m.type_error(ValidType::Number, other, env)),
    }
}

// ---------------------------------------------------------------------
// sorting

fn msort_2(m: &mut Machine, list: &Term, sorted: &Term, k: Cont, env: &Env) -> Promise {
    let mut items = match proper_list(m, list, env) {
        Ok(items) => items,
        Err(e) => return Promise::error(e),
    };
    items.sort_by(|a, b| compare(a, b, env));
    unify_cont(m, sorted, &Term::list(items), k, env)
}

fn sort_2(m: &mut Machine, list: &Term, sorted: &Term, k: Cont, env: &Env) -> Promise {
    let mut items = match proper_list(m, list, env) {
        Ok(items) => items,
        Err(e) => return Promise::error(e),
    };
    items.sort_by(|a, b| compare(a, b, env));
    items.dedup_by(|a, b| compare(a, b, env) == Ordering::Equal);
    unify_cont(m, sorted, &Term::list(items), k, env)
}

// ---------------------------------------------------------------------
// dicts

/// Evaluates `Dict.Function`: an atom is a key lookup (a missing key is a
/// domain error), a compound invokes one of the predefined dict functions
/// (`get/1` and `put/1`), a variable enumerates the entries.
fn dict_op_3(
    m: &mut Machine,
    dict: &Term,
    function: &Term,
    result: &Term,
    k: Cont,
    env: &Env,
) -> Promise {
    let d = env.resolve(dict);
    match &d {
        Term::Variable(_) => Promise::error(m.instantiation_error(env)),
        Term::Dict(_) => match env.resolve(function) {
            Term::Variable(_) => get_dict_3(m, function, &d, result, k, env),
            Term::Atom(key) => match d.dict_value(key) {
                Some(value) => unify_cont(m, result, &value, k, env),
                None => Promise::error(m.domain_error(
                    ValidDomain::DictKey,
                    Term::Atom(key),
                    env,
                )),
            },
            f if f.is_compound() && f.arity() == 1 => {
                let name = f.functor().expect("compound");
                let key_path = f.arg(0).expect("arity is 1");
                if name == atom!("get") {
                    get_dict_3(m, &key_path, &d, result, k, env)
                } else if name == atom!("put") {
                    put_dict_3(m, &key_path, &d, result, k, env)
                } else {
                    Promise::error(m.existence_error(ObjectType::Procedure, f, env))
                }
            }
            f if f.is_compound() => {
                Promise::error(m.existence_error(ObjectType::Procedure, f, env))
            }
            f => Promise::error(m.type_error(ValidType::Callable, f, env)),
        },
        _ => Promise::error(m.type_error(ValidType::Dict, d, env)),
    }
}

/// `get_dict/3`: like dict-dot access on a key or a `K1/K2/...` path, but
/// fails silently on a missing key; a variable key enumerates entries.
fn get_dict_3(
    m: &mut Machine,
    key_path: &Term,
    dict: &Term,
    result: &Term,
    k: Cont,
    env: &Env,
) -> Promise {
    let d = env.resolve(dict);
    match &d {
        Term::Variable(_) => Promise::error(m.instantiation_error(env)),
        Term::Dict(_) => match env.resolve(key_path) {
            Term::Variable(_) => {
                let key_path = key_path.clone();
                let result = result.clone();
                let env = env.clone();

                let fns: Vec<PromiseFn> = (0..d.dict_len())
                    .map(|i| {
                        let (key, value) = d.dict_at(i).expect("i < len");
                        let key_path = key_path.clone();
                        let result = result.clone();
                        let env = env.clone();
                        let k = k.clone();

                        Rc::new(move |m: &mut Machine| {
                            let lhs = atom!(",").apply(vec![key_path.clone(), result.clone()]);
                            let rhs =
                                atom!(",").apply(vec![Term::Atom(key), value.clone()]);
                            unify_cont(m, &lhs, &rhs, k.clone(), &env)
                        }) as PromiseFn
                    })
                    .collect();

                Promise::delay(fns)
            }
            Term::Atom(key) => match d.dict_value(key) {
                Some(value) => unify_cont(m, result, &value, k, env),
                None => Promise::bool(false),
            },
            key if key.functor() == Some(atom!("/")) && key.arity() == 2 => {
                let first = key.arg(0).expect("arity is 2");
                let rest = key.arg(1).expect("arity is 2");
                let result = result.clone();

                let mid = match m.new_variable(env) {
                    Ok(v) => Term::Variable(v),
                    Err(e) => return Promise::error(e),
                };
                let mid_c = mid.clone();

                let k_rest: Cont = Rc::new(move |m: &mut Machine, env2: &Env| {
                    get_dict_3(m, &rest, &mid_c, &result, k.clone(), env2)
                });
                get_dict_3(m, &first, &d, &mid, k_rest, env)
            }
            key => Promise::error(m.domain_error(ValidDomain::DictKey, key, env)),
        },
        _ => Promise::error(m.type_error(ValidType::Dict, d, env)),
    }
}

/// `put_dict/3`: a new dict where the given dict or `Key:Value` pair list
/// replaces or extends the entries of the original.
fn put_dict_3(
    m: &mut Machine,
    new: &Term,
    dict_in: &Term,
    dict_out: &Term,
    k: Cont,
    env: &Env,
) -> Promise {
    let d = env.resolve(dict_in);
    match &d {
        Term::Variable(_) => Promise::error(m.instantiation_error(env)),
        Term::Dict(_) => match env.resolve(new) {
            Term::Variable(_) => Promise::error(m.instantiation_error(env)),
            n @ Term::Dict(_) => {
                let merged = merge_dicts(&n, &d);
                unify_cont(m, dict_out, &merged, k, env)
            }
            n if n.is_compound() => {
                let items = match proper_list(m, &n, env) {
                    Ok(items) => items,
                    Err(e) => return Promise::error(e),
                };

                let tag = match m.new_variable(env) {
                    Ok(v) => Term::Variable(v),
                    Err(e) => return Promise::error(e),
                };
                let mut args = vec![tag];
                for item in items {
                    match pair_of(&env.resolve(&item)) {
                        Some((key, value)) => {
                            args.push(Term::Atom(key));
                            args.push(value);
                        }
                        None => {
                            return Promise::error(m.type_error(
                                ValidType::Pair,
                                env.resolve(&item),
                                env,
                            ))
                        }
                    }
                }

                match Term::new_dict(args) {
                    Ok(n) => {
                        let merged = merge_dicts(&n, &d);
                        unify_cont(m, dict_out, &merged, k, env)
                    }
                    Err(_) => {
                        Promise::error(m.type_error(ValidType::Pair, n, env))
                    }
                }
            }
            n => Promise::error(m.type_error(ValidType::Pair, n, env)),
        },
        _ => Promise::error(m.type_error(ValidType::Dict, d, env)),
    }
}

/// Accepts `Key:Value`, `Key=Value`, `Key-Value` and `Key(Value)`.
fn pair_of(t: &Term) -> Option<(Atom, Term)> {
    if t.arity() == 1 {
        return Some((t.functor()?, t.arg(0)?));
    }
    if t.arity() == 2 {
        let f = t.functor()?;
        if f == atom!(":") || f == atom!("=") || f == atom!("-") {
            if let Some(Term::Atom(key)) = t.arg(0) {
                return Some((key, t.arg(1)?));
            }
        }
    }
    None
}

/// Merges `n` into `d`; on a key collision the entry of `n` wins. Both key
/// areas are sorted, so this is a linear two-pointer merge.
fn merge_dicts(n: &Term, d: &Term) -> Term {
    let mut args = Vec::with_capacity(1 + 2 * (n.dict_len() + d.dict_len()));
    args.push(d.dict_tag().expect("dict"));

    let (mut i, mut j) = (0, 0);
    while i < d.dict_len() && j < n.dict_len() {
        let (dk, dv) = d.dict_at(i).expect("i < len");
        let (nk, nv) = n.dict_at(j).expect("j < len");

        match dk.cmp(&nk) {
            Ordering::Equal => {
                args.push(Term::Atom(nk));
                args.push(nv);
                i += 1;
                j += 1;
            }
            Ordering::Less => {
                args.push(Term::Atom(dk));
                args.push(dv);
                i += 1;
            }
            Ordering::Greater => {
                args.push(Term::Atom(nk));
                args.push(nv);
                j += 1;
            }
        }
    }
    while i < d.dict_len() {
        let (dk, dv) = d.dict_at(i).expect("i < len");
        args.push(Term::Atom(dk));
        args.push(dv);
        i += 1;
    }
    while j < n.dict_len() {
        let (nk, nv) = n.dict_at(j).expect("j < len");
        args.push(Term::Atom(nk));
        args.push(nv);
        j += 1;
    }

    Term::dict_from_sorted(args)
}

// ---------------------------------------------------------------------
// flags and char conversion

fn flag_value(m: &Machine, name: Atom) -> Option<Term> {
    Some(match name.as_str() {
        "bounded" => Term::Atom(atom!("true")),
        "max_integer" => Term::Integer(i64::MAX),
        "min_integer" => Term::Integer(i64::MIN),
        "integer_rounding_function" => Term::Atom(atom!("toward_zero")),
        "max_arity" => Term::Atom(atom!("unbounded")),
        "char_conversion" => Term::Atom(on_off(m.flags().char_conversion)),
        "debug" => Term::Atom(on_off(m.flags().debug)),
        "unknown" => Term::Atom(m.flags().unknown.as_atom()),
        "double_quotes" => Term::Atom(m.flags().double_quotes.as_atom()),
        _ => return None,
    })
}

const FLAG_NAMES: &[&str] = &[
    "bounded",
    "max_integer",
    "min_integer",
    "integer_rounding_function",
    "max_arity",
    "char_conversion",
    "debug",
    "unknown",
    "double_quotes",
];

fn on_off(b: bool) -> Atom {
    if b {
        atom!("on")
    } else {
        atom!("off")
    }
}

fn from_on_off(a: Atom) -> Option<bool> {
    match a.as_str() {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

fn set_prolog_flag_2(m: &mut Machine, flag: &Term, value: &Term, k: Cont, env: &Env) -> Promise {
    let flag = match env.resolve(flag) {
        Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
        Term::Atom(a) => a,
        other => return Promise::error(m.type_error(ValidType::Atom, other, env)),
    };
    let value = match env.resolve(value) {
        Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
        value => value,
    };

    let bad_value = |m: &mut Machine, env: &Env, flag: Atom, value: Term| {
        let culprit = atom!("+").apply(vec![Term::Atom(flag), value]);
        Promise::error(m.domain_error(ValidDomain::FlagValue, culprit, env))
    };

    match flag.as_str() {
        "char_conversion" => match value {
            Term::Atom(a) => match from_on_off(a) {
                Some(b) => {
                    m.flags_mut().char_conversion = b;
                    k(m, env)
                }
                None => bad_value(m, env, flag, Term::Atom(a)),
            },
            value => bad_value(m, env, flag, value),
        },
        "debug" => match value {
            Term::Atom(a) => match from_on_off(a) {
                Some(b) => {
                    m.flags_mut().debug = b;
                    k(m, env)
                }
                None => bad_value(m, env, flag, Term::Atom(a)),
            },
            value => bad_value(m, env, flag, value),
        },
        "unknown" => match value {
            Term::Atom(a) => match UnknownAction::from_atom(a) {
                Some(action) => {
                    m.flags_mut().unknown = action;
                    k(m, env)
                }
                None => bad_value(m, env, flag, Term::Atom(a)),
            },
            value => bad_value(m, env, flag, value),
        },
        "double_quotes" => match value {
            Term::Atom(a) => match DoubleQuotes::from_atom(a) {
                Some(dq) => {
                    m.flags_mut().double_quotes = dq;
                    k(m, env)
                }
                None => bad_value(m, env, flag, Term::Atom(a)),
            },
            value => bad_value(m, env, flag, value),
        },
        "bounded" | "max_integer" | "min_integer" | "integer_rounding_function"
        | "max_arity" => Promise::error(m.permission_error(
            Operation::Modify,
            PermissionType::Flag,
            Term::Atom(flag),
            env,
        )),
        _ => Promise::error(m.domain_error(ValidDomain::PrologFlag, Term::Atom(flag), env)),
    }
}

fn current_prolog_flag_2(
    m: &mut Machine,
    flag: &Term,
    value: &Term,
    k: Cont,
    env: &Env,
) -> Promise {
    match env.resolve(flag) {
        Term::Atom(a) => match flag_value(m, a) {
            Some(v) => unify_cont(m, value, &v, k, env),
            None => Promise::error(m.domain_error(ValidDomain::PrologFlag, Term::Atom(a), env)),
        },
        Term::Variable(_) => {
            let flag = flag.clone();
            let value = value.clone();
            let env = env.clone();

            let fns: Vec<PromiseFn> = FLAG_NAMES
                .iter()
                .map(|name| {
                    let name = atom!(name);
                    let flag = flag.clone();
                    let value = value.clone();
                    let env = env.clone();
                    let k = k.clone();

                    Rc::new(move |m: &mut Machine| {
                        let v = flag_value(m, name).expect("known flag");
                        let env = match unify(&env, &flag, &Term::Atom(name), false) {
                            Some(env) => env,
                            None => return Promise::bool(false),
                        };
                        unify_cont(m, &value, &v, k.clone(), &env)
                    }) as PromiseFn
                })
                .collect();

            Promise::delay(fns)
        }
        other => Promise::error(m.type_error(ValidType::Atom, other, env)),
    }
}

fn one_char_atom(m: &mut Machine, t: &Term, env: &Env) -> Result<char, Exception> {
    match env.resolve(t) {
        Term::Variable(_) => Err(m.instantiation_error(env)),
        Term::Atom(a) => match a.as_char() {
            Some(c) => Ok(c),
            None => Err(m.representation_error(RepFlag::Character, env)),
        },
        _ => Err(m.representation_error(RepFlag::Character, env)),
    }
}

fn char_conversion_2(m: &mut Machine, from: &Term, to: &Term, k: Cont, env: &Env) -> Promise {
    let from = match one_char_atom(m, from, env) {
        Ok(c) => c,
        Err(e) => return Promise::error(e),
    };
    let to = match one_char_atom(m, to, env) {
        Ok(c) => c,
        Err(e) => return Promise::error(e),
    };

    if from == to {
        m.char_conversion_table().shift_remove(&from);
    } else {
        m.char_conversion_table().insert(from, to);
    }
    k(m, env)
}

fn current_char_conversion_2(
    m: &mut Machine,
    from: &Term,
    to: &Term,
    k: Cont,
    env: &Env,
) -> Promise {
    match env.resolve(from) {
        Term::Atom(a) => {
            let c = match a.as_char() {
                Some(c) => c,
                None => {
                    return Promise::error(m.representation_error(RepFlag::Character, env))
                }
            };
            match m.char_conversion_entries().iter().find(|(f, _)| *f == c) {
                Some((_, mapped)) => {
                    let mapped = Term::Atom(AtomTable::build_with(&mapped.to_string()));
                    unify_cont(m, to, &mapped, k, env)
                }
                None => Promise::bool(false),
            }
        }
        Term::Variable(_) => {
            let entries = m.char_conversion_entries();
            let from = from.clone();
            let to = to.clone();
            let env = env.clone();

            let fns: Vec<PromiseFn> = entries
                .into_iter()
                .map(|(f, t)| {
                    let from = from.clone();
                    let to = to.clone();
                    let env = env.clone();
                    let k = k.clone();

                    Rc::new(move |m: &mut Machine| {
                        let f = Term::Atom(AtomTable::build_with(&f.to_string()));
                        let t = Term::Atom(AtomTable::build_with(&t.to_string()));
                        let env = match unify(&env, &from, &f, false) {
                            Some(env) => env,
                            None => return Promise::bool(false),
                        };
                        unify_cont(m, &to, &t, k.clone(), &env)
                    }) as PromiseFn
                })
                .collect();

            Promise::delay(fns)
        }
        _ => Promise::error(m.representation_error(RepFlag::Character, env)),
    }
}

// ---------------------------------------------------------------------
// streams

fn current_input_1(m: &mut Machine, stream: &Term, k: Cont, env: &Env) -> Promise {
    match env.resolve(stream) {
        Term::Variable(_) | Term::Stream(_) => {}
        other => return Promise::error(m.domain_error(ValidDomain::Stream, other, env)),
    }
    let current = Term::Stream(m.current_input());
    unify_cont(m, stream, &current, k, env)
}

fn current_output_1(m: &mut Machine, stream: &Term, k: Cont, env: &Env) -> Promise {
    match env.resolve(stream) {
        Term::Variable(_) | Term::Stream(_) => {}
        other => return Promise::error(m.domain_error(ValidDomain::Stream, other, env)),
    }
    let current = Term::Stream(m.current_output());
    unify_cont(m, stream, &current, k, env)
}

fn set_input_1(m: &mut Machine, stream: &Term, k: Cont, env: &Env) -> Promise {
    let s = match stream_from(m, stream, env) {
        Ok(s) => s,
        Err(e) => return Promise::error(e),
    };
    if !s.mode().is_input() {
        let culprit = env.resolve(stream);
        return Promise::error(m.permission_error(
            Operation::Input,
            PermissionType::Stream,
            culprit,
            env,
        ));
    }
    m.set_current_input(s);
    k(m, env)
}

fn set_output_1(m: &mut Machine, stream: &Term, k: Cont, env: &Env) -> Promise {
    let s = match stream_from(m, stream, env) {
        Ok(s) => s,
        Err(e) => return Promise::error(e),
    };
    if s.mode().is_input() {
        let culprit = env.resolve(stream);
        return Promise::error(m.permission_error(
            Operation::Output,
            PermissionType::Stream,
            culprit,
            env,
        ));
    }
    m.set_current_output(s);
    k(m, env)
}

fn get_char_2(m: &mut Machine, stream: &Term, ch: &Term, k: Cont, env: &Env) -> Promise {
    match env.resolve(ch) {
        Term::Variable(_) => {}
        Term::Atom(a) if a == atom!("end_of_file") || a.as_char().is_some() => {}
        other => return Promise::error(m.type_error(ValidType::InCharacter, other, env)),
    }

    let s = match stream_from(m, stream, env) {
        Ok(s) => s,
        Err(e) => return Promise::error(e),
    };

    match s.get_char() {
        Ok(Some(c)) => {
            let read = Term::Atom(AtomTable::build_with(&c.to_string()));
            unify_cont(m, ch, &read, k, env)
        }
        Ok(None) => unify_cont(m, ch, &Term::Atom(atom!("end_of_file")), k, env),
        Err(e) => Promise::error(stream_exception(m, e, stream, env)),
    }
}

fn peek_char_2(m: &mut Machine, stream: &Term, ch: &Term, k: Cont, env: &Env) -> Promise {
    match env.resolve(ch) {
        Term::Variable(_) => {}
        Term::Atom(a) if a == atom!("end_of_file") || a.as_char().is_some() => {}
        other => return Promise::error(m.type_error(ValidType::InCharacter, other, env)),
    }

    let s = match stream_from(m, stream, env) {
        Ok(s) => s,
        Err(e) => return Promise::error(e),
    };

    match s.peek_char() {
        Ok(Some(c)) => {
            let read = Term::Atom(AtomTable::build_with(&c.to_string()));
            unify_cont(m, ch, &read, k, env)
        }
        Ok(None) => unify_cont(m, ch, &Term::Atom(atom!("end_of_file")), k, env),
        Err(e) => Promise::error(stream_exception(m, e, stream, env)),
    }
}

fn put_char_2(m: &mut Machine, stream: &Term, ch: &Term, k: Cont, env: &Env) -> Promise {
    let c = match env.resolve(ch) {
        Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
        Term::Atom(a) => match a.as_char() {
            Some(c) => c,
            None => {
                return Promise::error(m.type_error(ValidType::Character, Term::Atom(a), env))
            }
        },
        other => return Promise::error(m.type_error(ValidType::Character, other, env)),
    };

    let s = match stream_from(m, stream, env) {
        Ok(s) => s,
        Err(e) => return Promise::error(e),
    };

    match s.put_char(c) {
        Ok(()) => k(m, env),
        Err(StreamError::NotOutput) => {
            let culprit = env.resolve(stream);
            Promise::error(m.permission_error(
                Operation::Output,
                PermissionType::Stream,
                culprit,
                env,
            ))
        }
        Err(StreamError::NotText) => {
            let culprit = env.resolve(stream);
            Promise::error(m.permission_error(
                Operation::Output,
                PermissionType::BinaryStream,
                culprit,
                env,
            ))
        }
        Err(e) => Promise::error(stream_exception(m, e, stream, env)),
    }
}

fn get_byte_2(m: &mut Machine, stream: &Term, byte: &Term, k: Cont, env: &Env) -> Promise {
    match env.resolve(byte) {
        Term::Variable(_) => {}
        Term::Integer(b) if (-1..=255).contains(&b) => {}
        other => return Promise::error(m.type_error(ValidType::InByte, other, env)),
    }

    let s = match stream_from(m, stream, env) {
        Ok(s) => s,
        Err(e) => return Promise::error(e),
    };

    match s.get_byte() {
        Ok(Some(b)) => unify_cont(m, byte, &Term::Integer(b as i64), k, env),
        Ok(None) => unify_cont(m, byte, &Term::Integer(-1), k, env),
        Err(e) => Promise::error(stream_exception(m, e, stream, env)),
    }
}

fn peek_byte_2(m: &mut Machine, stream: &Term, byte: &Term, k: Cont, env: &Env) -> Promise {
    match env.resolve(byte) {
        Term::Variable(_) => {}
        Term::Integer(b) if (-1..=255).contains(&b) => {}
        other => return Promise::error(m.type_error(ValidType::InByte, other, env)),
    }

    let s = match stream_from(m, stream, env) {
        Ok(s) => s,
        Err(e) => return Promise::error(e),
    };

    match s.peek_byte() {
        Ok(Some(b)) => unify_cont(m, byte, &Term::Integer(b as i64), k, env),
        Ok(None) => unify_cont(m, byte, &Term::Integer(-1), k, env),
        Err(e) => Promise::error(stream_exception(m, e, stream, env)),
    }
}

fn put_byte_2(m: &mut Machine, stream: &Term, byte: &Term, k: Cont, env: &Env) -> Promise {
    let b = match env.resolve(byte) {
        Term::Variable(_) => return Promise::error(m.instantiation_error(env)),
        Term::Integer(b) if (0..=255).contains(&b) => b as u8,
        other => return Promise::error(m.type_error(ValidType::Byte, other, env)),
    };

    let s = match stream_from(m, stream, env) {
        Ok(s) => s,
        Err(e) => return Promise::error(e),
    };

    match s.put_byte(b) {
        Ok(()) => k(m, env),
        Err(StreamError::NotBinary) => {
            let culprit = env.resolve(stream);
            Promise::error(m.permission_error(
                Operation::Output,
                PermissionType::TextStream,
                culprit,
                env,
            ))
        }
        Err(StreamError::NotOutput) => {
            let culprit = env.resolve(stream);
            Promise::error(m.permission_error(
                Operation::Output,
                PermissionType::Stream,
                culprit,
                env,
            ))
        }
        Err(e) => Promise::error(stream_exception(m, e, stream, env)),
    }
}

fn close_1(m: &mut Machine, stream: &Term, k: Cont, env: &Env) -> Promise {
    let s = match stream_from(m, stream, env) {
        Ok(s) => s,
        Err(e) => return Promise::error(e),
    };

    // output buffers are flushed on close; a failing flush is reported.
    if !s.mode().is_input() {
        if let Err(e) = s.flush() {
            return Promise::error(stream_exception(m, e, stream, env));
        }
    }

    m.remove_stream(&s);
    k(m, env)
}

fn nl_1(m: &mut Machine, stream: &Term, k: Cont, env: &Env) -> Promise {
    put_char_2(m, stream, &Term::Atom(atom!("\n")), k, env)
}

fn flush_output_1(m: &mut Machine, stream: &Term, k: Cont, env: &Env) -> Promise {
    let s = match stream_from(m, stream, env) {
        Ok(s) => s,
        Err(e) => return Promise::error(e),
    };

    match s.flush() {
        Ok(()) => k(m, env),
        Err(e) => Promise::error(stream_exception(m, e, stream, env)),
    }
}

fn write_term_3(
    m: &mut Machine,
    stream: &Term,
    t: &Term,
    options: &Term,
    k: Cont,
    env: &Env,
) -> Promise {
    let opts = match parse_write_options(m, options, env) {
        Ok(opts) => opts,
        Err(e) => return Promise::error(e),
    };

    let s = match stream_from(m, stream, env) {
        Ok(s) => s,
        Err(e) => return Promise::error(e),
    };

    let text = term_to_string(t, &opts, m.ops(), env);
    match s.put_str(&text) {
        Ok(()) => k(m, env),
        Err(StreamError::NotOutput) => {
            let culprit = env.resolve(stream);
            Promise::error(m.permission_error(
                Operation::Output,
                PermissionType::Stream,
                culprit,
                env,
            ))
        }
        Err(StreamError::NotText) => {
            let culprit = env.resolve(stream);
            Promise::error(m.permission_error(
                Operation::Output,
                PermissionType::BinaryStream,
                culprit,
                env,
            ))
        }
        Err(e) => Promise::error(stream_exception(m, e, stream, env)),
    }
}

fn parse_write_options(
    m: &mut Machine,
    options: &Term,
    env: &Env,
) -> Result<WriteOptions, Exception> {
    let mut opts = WriteOptions::default();

    let items = proper_list(m, options, env)?;
    for item in items {
        let opt = env.resolve(&item);
        let bad = |m: &mut Machine, opt: Term| {
            Err(m.domain_error(ValidDomain::WriteOption, opt, env))
        };

        if !opt.is_compound() || opt.arity() != 1 {
            return bad(m, opt);
        }
        let name = opt.functor().expect("compound");
        let arg = env.resolve(&opt.arg(0).expect("arity is 1"));

        match name.as_str() {
            "quoted" | "ignore_ops" | "numbervars" => {
                let value = match arg {
                    Term::Atom(a) if a == atom!("true") => true,
                    Term::Atom(a) if a == atom!("false") => false,
                    _ => return bad(m, opt),
                };
                match name.as_str() {
                    "quoted" => opts.quoted = value,
                    "ignore_ops" => opts.ignore_ops = value,
                    _ => opts.number_vars = value,
                }
            }
            "max_depth" => match arg {
                Term::Integer(n) if n >= 0 => opts.max_depth = n,
                _ => return bad(m, opt),
            },
            "variable_names" => {
                let pairs = proper_list(m, &arg, env)?;
                for pair in pairs {
                    let pair = env.resolve(&pair);
                    if pair.functor() != Some(atom!("=")) || pair.arity() != 2 {
                        return bad(m, pair);
                    }
                    let name = match env.resolve(&pair.arg(0).expect("arity is 2")) {
                        Term::Atom(a) => a,
                        _ => return bad(m, pair),
                    };
                    if let Term::Variable(v) = env.resolve(&pair.arg(1).expect("arity is 2")) {
                        opts.variable_names.entry(v).or_insert(name);
                    }
                }
            }
            _ => return bad(m, opt),
        }
    }

    Ok(opts)
}

// ---------------------------------------------------------------------
// registration

pub(crate) fn register_builtins(m: &mut Machine) {
    // control
    m.register0(atom!("true"), true_0);
    m.register0(atom!("fail"), fail_0);
    m.register0(atom!("false"), fail_0);
    m.register1(atom!("call"), call_1);
    m.register2(atom!("call"), |m: &mut Machine, g: &Term, a: &Term, k: Cont, env: &Env| {
        call_with_extras(m, g, &[a], k, env)
    });
    m.register3(
        atom!("call"),
        |m: &mut Machine, g: &Term, a: &Term, b: &Term, k: Cont, env: &Env| {
            call_with_extras(m, g, &[a, b], k, env)
        },
    );
    m.register4(
        atom!("call"),
        |m: &mut Machine, g: &Term, a: &Term, b: &Term, c: &Term, k: Cont, env: &Env| {
            call_with_extras(m, g, &[a, b, c], k, env)
        },
    );
    m.register5(
        atom!("call"),
        |m: &mut Machine,
         g: &Term,
         a: &Term,
         b: &Term,
         c: &Term,
         d: &Term,
         k: Cont,
         env: &Env| { call_with_extras(m, g, &[a, b, c, d], k, env) },
    );
    m.register6(
        atom!("call"),
        |m: &mut Machine,
         g: &Term,
         a: &Term,
         b: &Term,
         c: &Term,
         d: &Term,
         e: &Term,
         k: Cont,
         env: &Env| { call_with_extras(m, g, &[a, b, c, d, e], k, env) },
    );
    m.register7(
        atom!("call"),
        |m: &mut Machine,
         g: &Term,
         a: &Term,
         b: &Term,
         c: &Term,
         d: &Term,
         e: &Term,
         f: &Term,
         k: Cont,
         env: &Env| { call_with_extras(m, g, &[a, b, c, d, e, f], k, env) },
    );
    m.register8(
        atom!("call"),
        |m: &mut Machine,
         g: &Term,
         a: &Term,
         b: &Term,
         c: &Term,
         d: &Term,
         e: &Term,
         f: &Term,
         h: &Term,
         k: Cont,
         env: &Env| { call_with_extras(m, g, &[a, b, c, d, e, f, h], k, env) },
    );
    m.register1(atom!("\\+"), negation_1);
    m.register2(atom!(";"), semicolon_2);
    m.register2(atom!("->"), if_then_2);
    m.register0(atom!("repeat"), repeat_0);
    m.register1(atom!("halt"), halt_1);
    m.register1(atom!("throw"), throw_1);
    m.register3(atom!("catch"), catch_3);

    // unification
    m.register2(atom!("="), unify_2);
    m.register2(atom!("\\="), not_unifiable_2);
    m.register2(atom!("unify_with_occurs_check"), unify_with_occurs_check_2);

    // type tests
    m.register1(atom!("var"), var_1);
    m.register1(atom!("nonvar"), nonvar_1);
    m.register1(atom!("atom"), atom_1);
    m.register1(atom!("number"), number_1);
    m.register1(atom!("integer"), integer_1);
    m.register1(atom!("float"), float_1);
    m.register1(atom!("atomic"), atomic_1);
    m.register1(atom!("compound"), compound_1);
    m.register1(atom!("callable"), callable_1);
    m.register1(atom!("is_list"), is_list_1);

    // term inspection
    m.register3(atom!("functor"), functor_3);
    m.register3(atom!("arg"), arg_3);
    m.register2(atom!("=.."), univ_2);
    m.register2(atom!("copy_term"), copy_term_2);
    m.register3(atom!("compare"), compare_3);

    // arithmetic
    m.register2(atom!("is"), is_2);
    m.register2(atom!("=:="), |m: &mut Machine, a: &Term, b: &Term, k: Cont, env: &Env| {
        arith_cmp(m, a, b, k, env, |o| o == Ordering::Equal)
    });
    m.register2(atom!("=\\="), |m: &mut Machine, a: &Term, b: &Term, k: Cont, env: &Env| {
        arith_cmp(m, a, b, k, env, |o| o != Ordering::Equal)
    });
    m.register2(atom!("<"), |m: &mut Machine, a: &Term, b: &Term, k: Cont, env: &Env| {
        arith_cmp(m, a, b, k, env, |o| o == Ordering::Less)
    });
    m.register2(atom!(">"), |m: &mut Machine, a: &Term, b: &Term, k: Cont, env: &Env| {
        arith_cmp(m, a, b, k, env, |o| o == Ordering::Greater)
    });
    m.register2(atom!("=<"), |m: &mut Machine, a: &Term, b: &Term, k: Cont, env: &Env| {
        arith_cmp(m, a, b, k, env, |o| o != Ordering::Greater)
    });
    m.register2(atom!(">="), |m: &mut Machine, a: &Term, b: &Term, k: Cont, env: &Env| {
        arith_cmp(m, a, b, k, env, |o| o != Ordering::Less)
    });

    // all solutions
    m.register3(atom!("findall"), findall_3);
    m.register3(atom!("bagof"), bagof_3);
    m.register3(atom!("setof"), setof_3);

    // database
    m.register1(atom!("assertz"), assertz_1);
    m.register1(atom!("asserta"), asserta_1);
    m.register1(atom!("retract"), retract_1);
    m.register1(atom!("abolish"), abolish_1);
    m.register1(atom!("current_predicate"), current_predicate_1);

    // operators
    m.register3(atom!("op"), op_3);
    m.register3(atom!("current_op"), current_op_3);

    // text
    m.register2(atom!("atom_length"), atom_length_2);
    m.register2(atom!("atom_chars"), atom_chars_2);
    m.register2(atom!("atom_codes"), atom_codes_2);
    m.register2(atom!("char_code"), char_code_2);
    m.register2(atom!("number_chars"), number_chars_2);
    m.register2(atom!("number_codes"), number_codes_2);

    // sorting
    m.register2(atom!("msort"), msort_2);
    m.register2(atom!("sort"), sort_2);

    // dicts
    m.register3(atom!("."), dict_op_3);
    m.register3(atom!("get_dict"), get_dict_3);
    m.register3(atom!("put_dict"), put_dict_3);

    // flags and conversions
    m.register2(atom!("set_prolog_flag"), set_prolog_flag_2);
    m.register2(atom!("current_prolog_flag"), current_prolog_flag_2);
    m.register2(atom!("char_conversion"), char_conversion_2);
    m.register2(atom!("current_char_conversion"), current_char_conversion_2);

    // streams
    m.register1(atom!("current_input"), current_input_1);
    m.register1(atom!("current_output"), current_output_1);
    m.register1(atom!("set_input"), set_input_1);
    m.register1(atom!("set_output"), set_output_1);
    m.register2(atom!("get_char"), get_char_2);
    m.register2(atom!("peek_char"), peek_char_2);
    m.register2(atom!("put_char"), put_char_2);
    m.register2(atom!("get_byte"), get_byte_2);
    m.register2(atom!("peek_byte"), peek_byte_2);
    m.register2(atom!("put_byte"), put_byte_2);
    m.register1(atom!("close"), close_1);
    m.register1(atom!("nl"), nl_1);
    m.register1(atom!("flush_output"), flush_output_1);
    m.register3(atom!("write_term"), write_term_3);
}
