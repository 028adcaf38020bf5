use std::collections::VecDeque;
use std::rc::Rc;

use crate::codegen::Clause;
use crate::instructions::Instruction;
use crate::machine::bindings::Env;
use crate::machine::indices::ProcedureIndicator;
use crate::machine::promise::{Cont, Promise};
use crate::machine::term::{Term, Variable};
use crate::machine::unify::unify;
use crate::machine::Machine;

/// A saved argument vector, pushed when entering a substructure and popped
/// by `Pop`. On the head (`Get*`) side the substructure already exists in
/// the argument being matched; on the body (`Put*`) side it is assembled
/// from the collected arguments when the frame pops.
#[derive(Clone)]
pub(crate) enum Frame {
    Restore(VecDeque<Term>),
    Build {
        saved: VecDeque<Term>,
        kind: BuildKind,
    },
}

#[derive(Clone)]
pub(crate) enum BuildKind {
    Functor(ProcedureIndicator),
    List,
    Partial,
    Dict,
}

fn fresh_args(
    machine: &mut Machine,
    n: usize,
    env: &Env,
) -> Result<VecDeque<Term>, crate::machine::machine_errors::Exception> {
    let mut out = VecDeque::with_capacity(n);
    for _ in 0..n {
        out.push_back(Term::Variable(machine.new_variable(env)?));
    }
    Ok(out)
}

/// Executes a clause's bytecode from `pc`. `Call` suspends into a
/// continuation-bearing promise; `Cut` prunes to the clause's parent
/// barrier; `Exit` invokes the continuation.
#[allow(clippy::too_many_arguments)]
pub(crate) fn exec(
    machine: &mut Machine,
    clause: Rc<Clause>,
    pc: usize,
    vars: Rc<Vec<Variable>>,
    cont: Cont,
    mut args: VecDeque<Term>,
    mut astack: Vec<Frame>,
    mut env: Env,
    cut_parent: Option<Promise>,
) -> Promise {
    let mut ok = true;
    let mut pc = pc;

    while ok {
        let instr = clause.code[pc].clone();
        pc += 1;

        if let Some(hook) = machine.hook() {
            if let Err(e) = hook(instr.opcode(), instr.operand().as_ref(), &env) {
                return Promise::error(e);
            }
        }

        match &instr {
            Instruction::GetConst(c) => {
                let arg = args.pop_front().expect("compiler balances head args");
                match unify(&env, &arg, c, false) {
                    Some(e) => env = e,
                    None => ok = false,
                }
            }
            Instruction::PutConst(c) => {
                args.push_back(c.clone());
            }
            Instruction::GetVar(i) => {
                let v = Term::Variable(vars[*i]);
                let arg = args.pop_front().expect("compiler balances head args");
                match unify(&env, &arg, &v, false) {
                    Some(e) => env = e,
                    None => ok = false,
                }
            }
            Instruction::PutVar(i) => {
                args.push_back(Term::Variable(vars[*i]));
            }
            Instruction::GetFunctor(pi) => {
                let arg = env.resolve(&args.pop_front().expect("compiler balances head args"));
                astack.push(Frame::Restore(std::mem::take(&mut args)));
                args = match fresh_args(machine, pi.arity, &env) {
                    Ok(args) => args,
                    Err(e) => return Promise::error(e),
                };
                let shape = pi.name.apply(args.iter().cloned().collect());
                match unify(&env, &arg, &shape, false) {
                    Some(e) => env = e,
                    None => ok = false,
                }
            }
            Instruction::PutFunctor(pi) => {
                astack.push(Frame::Build {
                    saved: std::mem::take(&mut args),
                    kind: BuildKind::Functor(*pi),
                });
            }
            Instruction::GetList(n) => {
                let arg = env.resolve(&args.pop_front().expect("compiler balances head args"));
                astack.push(Frame::Restore(std::mem::take(&mut args)));
                args = match fresh_args(machine, *n, &env) {
                    Ok(args) => args,
                    Err(e) => return Promise::error(e),
                };
                let shape = Term::list(args.iter().cloned().collect());
                match unify(&env, &arg, &shape, false) {
                    Some(e) => env = e,
                    None => ok = false,
                }
            }
            Instruction::PutList(_) => {
                astack.push(Frame::Build {
                    saved: std::mem::take(&mut args),
                    kind: BuildKind::List,
                });
            }
            Instruction::GetPartial(n) => {
                let arg = env.resolve(&args.pop_front().expect("compiler balances head args"));
                astack.push(Frame::Restore(std::mem::take(&mut args)));
                args = match fresh_args(machine, *n + 1, &env) {
                    Ok(args) => args,
                    Err(e) => return Promise::error(e),
                };
                let mut it = args.iter().cloned();
                let tail = it.next().expect("n + 1 arguments");
                let shape = Term::partial_list(tail, it.collect());
                match unify(&env, &arg, &shape, false) {
                    Some(e) => env = e,
                    None => ok = false,
                }
            }
            Instruction::PutPartial(_) => {
                astack.push(Frame::Build {
                    saved: std::mem::take(&mut args),
                    kind: BuildKind::Partial,
                });
            }
            Instruction::GetDict(n) => {
                let arg = env.resolve(&args.pop_front().expect("compiler balances head args"));
                astack.push(Frame::Restore(std::mem::take(&mut args)));
                args = match fresh_args(machine, *n, &env) {
                    Ok(args) => args,
                    Err(e) => return Promise::error(e),
                };
                let shape = Term::dict_from_sorted(args.iter().cloned().collect());
                match unify(&env, &arg, &shape, false) {
                    Some(e) => env = e,
                    None => ok = false,
                }
            }
            Instruction::PutDict(_) => {
                astack.push(Frame::Build {
                    saved: std::mem::take(&mut args),
                    kind: BuildKind::Dict,
                });
            }
            Instruction::Pop => {
                let frame = astack.pop().expect("compiler balances the arg stack");
                match frame {
                    Frame::Restore(saved) => args = saved,
                    Frame::Build { mut saved, kind } => {
                        let collected: Vec<Term> = args.into_iter().collect();
                        let built = match kind {
                            BuildKind::Functor(pi) => pi.name.apply(collected),
                            BuildKind::List => Term::list(collected),
                            BuildKind::Partial => {
                                let mut it = collected.into_iter();
                                let tail = it.next().expect("tail precedes the prefix");
                                Term::partial_list(tail, it.collect())
                            }
                            BuildKind::Dict => Term::dict_from_sorted(collected),
                        };
                        saved.push_back(built);
                        args = saved;
                    }
                }
            }
            Instruction::Enter => {
                // head done; body begins.
            }
            Instruction::Call(pi) => {
                let call_args: Vec<Term> = args.into_iter().collect();
                let clause = clause.clone();
                let vars = vars.clone();
                let cont = cont.clone();
                let cut_parent = cut_parent.clone();

                let k: Cont = Rc::new(move |machine: &mut Machine, env: &Env| {
                    exec(
                        machine,
                        clause.clone(),
                        pc,
                        vars.clone(),
                        cont.clone(),
                        VecDeque::new(),
                        Vec::new(),
                        env.clone(),
                        cut_parent.clone(),
                    )
                });

                return machine.arrive(pi.name, call_args, k, &env);
            }
            Instruction::Cut => {
                let clause = clause.clone();
                let vars = vars.clone();
                let cont = cont.clone();
                let args = args.clone();
                let astack = astack.clone();
                let env = env.clone();
                let cut_parent_inner = cut_parent.clone();

                return Promise::cut(
                    cut_parent,
                    Rc::new(move |machine: &mut Machine| {
                        exec(
                            machine,
                            clause.clone(),
                            pc,
                            vars.clone(),
                            cont.clone(),
                            args.clone(),
                            astack.clone(),
                            env.clone(),
                            cut_parent_inner.clone(),
                        )
                    }),
                );
            }
            Instruction::Exit => {
                return cont(machine, &env);
            }
        }
    }

    Promise::bool(false)
}
