use std::rc::Rc;

use crate::atom_table::*;
use crate::instructions::Instruction;
use crate::machine::bindings::Env;
use crate::machine::indices::ProcedureIndicator;
use crate::machine::machine_errors::{Exception, ValidType};
use crate::machine::term::{Term, Variable};
use crate::machine::Machine;

/// A compiled clause: its indicator, the raw (re-readable) term it was
/// compiled from, the register file of distinct clause variables in
/// first-occurrence order, and the bytecode, which always ends in `Exit`.
#[derive(Debug)]
pub struct Clause {
    pub pi: ProcedureIndicator,
    pub raw: Term,
    pub vars: Vec<Variable>,
    pub code: Vec<Instruction>,
}

/// Builds the right-nested sequence `items_1 op (items_2 op (...))`.
pub(crate) fn seq(op: Atom, mut items: Vec<Term>) -> Term {
    let mut t = items.pop().expect("seq of at least one item");
    while let Some(prev) = items.pop() {
        t = op.apply(vec![prev, t]);
    }
    t
}

/// Wraps a fact as a rule with a `true` body; rules pass through.
pub(crate) fn rulify(t: &Term, env: &Env) -> Term {
    let t = env.resolve(t);
    if t.functor() == Some(atom!(":-")) && t.arity() == 2 {
        t
    } else {
        atom!(":-").apply(vec![t, Term::Atom(atom!("true"))])
    }
}

/// Splits a clause body on its top-level disjunctions. An if-then-else is
/// not an alternative pair, so a `;` whose left side is `->` terminates
/// the split.
fn alternatives(body: &Term, env: &Env) -> Vec<Term> {
    let mut alts = Vec::new();
    let mut t = env.resolve(body);

    loop {
        if t.functor() == Some(atom!(";")) && t.arity() == 2 {
            let lhs = env.resolve(&t.arg(0).expect("arity is 2"));
            if lhs.functor() == Some(atom!("->")) && lhs.arity() == 2 {
                alts.push(t);
                break;
            }
            alts.push(lhs);
            t = env.resolve(&t.arg(1).expect("arity is 2"));
        } else {
            alts.push(t);
            break;
        }
    }

    alts
}

/// Iterates the goals of a body along the right spine of `','/2`.
fn goals_of(body: &Term, env: &Env) -> Vec<Term> {
    let mut goals = Vec::new();
    let mut t = env.resolve(body);

    while t.functor() == Some(atom!(",")) && t.arity() == 2 {
        goals.push(t.arg(0).expect("arity is 2"));
        t = env.resolve(&t.arg(1).expect("arity is 2"));
    }
    goals.push(t);

    goals
}

/// Compiles a fact `H`, or a rule `H :- B` into one clause per top-level
/// body alternative.
pub(crate) fn compile(
    machine: &mut Machine,
    t: &Term,
    env: &Env,
) -> Result<Vec<Rc<Clause>>, Exception> {
    let t = env.resolve(t);

    if t.functor() == Some(atom!(":-")) && t.arity() == 2 {
        let head = t.arg(0).expect("arity is 2");
        let body = t.arg(1).expect("arity is 2");

        let mut out = Vec::new();
        for alt in alternatives(&body, env) {
            match compile_clause(machine, &head, Some(&alt), env) {
                Ok(mut c) => {
                    c.raw = t.clone();
                    out.push(Rc::new(c));
                }
                Err(CompileError::NotCallable) => {
                    return Err(machine.type_error(ValidType::Callable, body.clone(), env));
                }
                Err(CompileError::Exception(e)) => return Err(e),
            }
        }
        return Ok(out);
    }

    match compile_clause(machine, &t, None, env) {
        Ok(mut c) => {
            c.raw = env.simplify(&t);
            Ok(vec![Rc::new(c)])
        }
        Err(CompileError::NotCallable) => {
            Err(machine.type_error(ValidType::Callable, t, env))
        }
        Err(CompileError::Exception(e)) => Err(e),
    }
}

enum CompileError {
    NotCallable,
    Exception(Exception),
}

impl From<Exception> for CompileError {
    fn from(e: Exception) -> Self {
        CompileError::Exception(e)
    }
}

struct ClauseCompiler<'a> {
    machine: &'a mut Machine,
    env: &'a Env,
    pi: Option<ProcedureIndicator>,
    vars: Vec<Variable>,
    code: Vec<Instruction>,
}

fn compile_clause(
    machine: &mut Machine,
    head: &Term,
    body: Option<&Term>,
    env: &Env,
) -> Result<Clause, CompileError> {
    let mut goals = Vec::new();
    let head = desugar(machine, head, &mut goals, env)?;
    let body = match body {
        Some(body) => Some(desugar(machine, body, &mut goals, env)?),
        None => None,
    };

    if let Some(body) = body {
        goals.push(body);
    }
    let body = if goals.is_empty() {
        None
    } else {
        Some(seq(atom!(","), goals))
    };

    let mut c = ClauseCompiler {
        machine,
        env,
        pi: None,
        vars: Vec::new(),
        code: Vec::new(),
    };

    c.compile_head(&head)?;

    if let Some(body) = &body {
        c.compile_body(body)?;
    }

    c.emit(Instruction::Exit);

    Ok(Clause {
        pi: c.pi.expect("head compilation sets the indicator"),
        raw: head,
        vars: c.vars,
        code: c.code,
    })
}

/// Rewrites dict-access dots into explicit goals: each `L.R` becomes a
/// fresh variable `V` plus an auxiliary goal `'.'(L, R, V)` appended to
/// the clause body.
fn desugar(
    machine: &mut Machine,
    t: &Term,
    goals: &mut Vec<Term>,
    env: &Env,
) -> Result<Term, Exception> {
    let t = env.resolve(t);
    match &t {
        Term::Compound(f) if f.name == atom!("$dot") && f.args.len() == 2 => {
            let lhs = desugar(machine, &f.args[0], goals, env)?;
            let rhs = desugar(machine, &f.args[1], goals, env)?;
            let temp = Term::Variable(machine.new_variable(env)?);

            goals.push(atom!(".").apply(vec![lhs, rhs, temp.clone()]));
            Ok(temp)
        }
        Term::Compound(f) => {
            let mut args = Vec::with_capacity(f.args.len());
            for a in &f.args {
                args.push(desugar(machine, a, goals, env)?);
            }
            Ok(f.name.apply(args))
        }
        Term::Dict(f) => {
            let mut args = Vec::with_capacity(f.args.len());
            for a in &f.args {
                args.push(desugar(machine, a, goals, env)?);
            }
            Ok(Term::dict_from_sorted(args))
        }
        Term::List { items, offset } => {
            let mut out = Vec::with_capacity(items.len() - offset);
            for a in &items[*offset..] {
                out.push(desugar(machine, a, goals, env)?);
            }
            Ok(Term::list(out))
        }
        Term::Partial {
            prefix,
            offset,
            tail,
        } => {
            let mut out = Vec::with_capacity(prefix.len() - offset);
            for a in &prefix[*offset..] {
                out.push(desugar(machine, a, goals, env)?);
            }
            let tail = desugar(machine, tail, goals, env)?;
            Ok(Term::partial_list(tail, out))
        }
        _ => Ok(t),
    }
}

impl ClauseCompiler<'_> {
    fn emit(&mut self, i: Instruction) {
        self.code.push(i);
    }

    fn var_offset(&mut self, v: Variable) -> usize {
        for (i, known) in self.vars.iter().enumerate() {
            if *known == v {
                return i;
            }
        }
        self.vars.push(v);
        self.vars.len() - 1
    }

    fn compile_head(&mut self, head: &Term) -> Result<(), CompileError> {
        match self.env.resolve(head) {
            Term::Atom(name) => {
                self.pi = Some(ProcedureIndicator::new(name, 0));
                Ok(())
            }
            head if head.is_compound() => {
                self.pi = Some(ProcedureIndicator::new(
                    head.functor().expect("compound"),
                    head.arity(),
                ));
                for i in 0..head.arity() {
                    self.compile_head_arg(&head.arg(i).expect("i < arity"));
                }
                Ok(())
            }
            _ => Err(CompileError::NotCallable),
        }
    }

    fn compile_body(&mut self, body: &Term) -> Result<(), CompileError> {
        self.emit(Instruction::Enter);
        for goal in goals_of(body, self.env) {
            self.compile_pred(&goal)?;
        }
        Ok(())
    }

    fn compile_pred(&mut self, p: &Term) -> Result<(), CompileError> {
        match self.env.resolve(p) {
            Term::Variable(v) => {
                // a variable goal becomes call(V).
                let call = atom!("call").apply(vec![Term::Variable(v)]);
                self.compile_pred(&call)
            }
            Term::Atom(name) => {
                if name == atom!("!") {
                    self.emit(Instruction::Cut);
                    return Ok(());
                }
                self.emit(Instruction::Call(ProcedureIndicator::new(name, 0)));
                Ok(())
            }
            p if p.is_compound() => {
                for i in 0..p.arity() {
                    self.compile_body_arg(&p.arg(i).expect("i < arity"));
                }
                self.emit(Instruction::Call(ProcedureIndicator::new(
                    p.functor().expect("compound"),
                    p.arity(),
                )));
                Ok(())
            }
            _ => Err(CompileError::NotCallable),
        }
    }

    fn compile_head_arg(&mut self, a: &Term) {
        match self.env.resolve(a) {
            Term::Variable(v) => {
                let slot = self.var_offset(v);
                self.emit(Instruction::GetVar(slot));
            }
            Term::List { items, offset } => {
                self.emit(Instruction::GetList(items.len() - offset));
                for item in &items[offset..] {
                    self.compile_head_arg(item);
                }
                self.emit(Instruction::Pop);
            }
            Term::Partial {
                prefix,
                offset,
                tail,
            } => {
                self.emit(Instruction::GetPartial(prefix.len() - offset));
                self.compile_head_arg(&tail);
                for item in &prefix[offset..] {
                    self.compile_head_arg(item);
                }
                self.emit(Instruction::Pop);
            }
            Term::Dict(f) => {
                self.emit(Instruction::GetDict(f.args.len()));
                for arg in &f.args {
                    self.compile_head_arg(arg);
                }
                self.emit(Instruction::Pop);
            }
            Term::Compound(f) => {
                self.emit(Instruction::GetFunctor(ProcedureIndicator::new(
                    f.name,
                    f.args.len(),
                )));
                for arg in &f.args {
                    self.compile_head_arg(arg);
                }
                self.emit(Instruction::Pop);
            }
            a => self.emit(Instruction::GetConst(a)),
        }
    }

    fn compile_body_arg(&mut self, a: &Term) {
        match self.env.resolve(a) {
            Term::Variable(v) => {
                let slot = self.var_offset(v);
                self.emit(Instruction::PutVar(slot));
            }
            Term::List { items, offset } => {
                self.emit(Instruction::PutList(items.len() - offset));
                for item in &items[offset..] {
                    self.compile_body_arg(item);
                }
                self.emit(Instruction::Pop);
            }
            Term::Partial {
                prefix,
                offset,
                tail,
            } => {
                self.emit(Instruction::PutPartial(prefix.len() - offset));
                self.compile_body_arg(&tail);
                for item in &prefix[offset..] {
                    self.compile_body_arg(item);
                }
                self.emit(Instruction::Pop);
            }
            Term::Dict(f) => {
                self.emit(Instruction::PutDict(f.args.len()));
                for arg in &f.args {
                    self.compile_body_arg(arg);
                }
                self.emit(Instruction::Pop);
            }
            Term::Compound(f) => {
                self.emit(Instruction::PutFunctor(ProcedureIndicator::new(
                    f.name,
                    f.args.len(),
                )));
                for arg in &f.args {
                    self.compile_body_arg(arg);
                }
                self.emit(Instruction::Pop);
            }
            a => self.emit(Instruction::PutConst(a)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::Opcode;
    use crate::machine::MachineBuilder;

    fn opcodes(c: &Clause) -> Vec<Opcode> {
        c.code.iter().map(|i| i.opcode()).collect()
    }

    #[test]
    fn facts_compile_to_head_matching() {
        let mut m = MachineBuilder::default().build();
        let env = Env::new();

        // p(a, X).
        let v = Term::Variable(m.new_variable(&env).unwrap());
        let t = atom!("p").apply(vec![Term::Atom(atom!("a")), v]);
        let cs = compile(&mut m, &t, &env).unwrap();

        assert_eq!(cs.len(), 1);
        let c = &cs[0];
        assert_eq!(c.pi, ProcedureIndicator::new(atom!("p"), 2));
        assert_eq!(c.vars.len(), 1);
        assert_eq!(
            opcodes(c),
            vec![Opcode::GetConst, Opcode::GetVar, Opcode::Exit]
        );
    }

    #[test]
    fn rules_compile_to_body_calls() {
        let mut m = MachineBuilder::default().build();
        let env = Env::new();

        // p(X) :- q(X), r.
        let x = Term::Variable(m.new_variable(&env).unwrap());
        let t = atom!(":-").apply(vec![
            atom!("p").apply(vec![x.clone()]),
            atom!(",").apply(vec![atom!("q").apply(vec![x]), Term::Atom(atom!("r"))]),
        ]);
        let cs = compile(&mut m, &t, &env).unwrap();

        assert_eq!(cs.len(), 1);
        let c = &cs[0];
        assert_eq!(
            opcodes(c),
            vec![
                Opcode::GetVar,
                Opcode::Enter,
                Opcode::PutVar,
                Opcode::Call,
                Opcode::Call,
                Opcode::Exit
            ]
        );
    }

    #[test]
    fn cut_compiles_inline() {
        let mut m = MachineBuilder::default().build();
        let env = Env::new();

        // p :- !, q.
        let t = atom!(":-").apply(vec![
            Term::Atom(atom!("p")),
            atom!(",").apply(vec![Term::Atom(atom!("!")), Term::Atom(atom!("q"))]),
        ]);
        let cs = compile(&mut m, &t, &env).unwrap();

        assert_eq!(
            opcodes(&cs[0]),
            vec![Opcode::Enter, Opcode::Cut, Opcode::Call, Opcode::Exit]
        );
    }

    #[test]
    fn disjunctive_bodies_split_into_alternative_clauses() {
        let mut m = MachineBuilder::default().build();
        let env = Env::new();

        // p :- q ; r.
        let t = atom!(":-").apply(vec![
            Term::Atom(atom!("p")),
            atom!(";").apply(vec![Term::Atom(atom!("q")), Term::Atom(atom!("r"))]),
        ]);
        let cs = compile(&mut m, &t, &env).unwrap();
        assert_eq!(cs.len(), 2);
        assert_eq!(cs[0].pi, cs[1].pi);
    }

    #[test]
    fn if_then_else_is_not_split() {
        let mut m = MachineBuilder::default().build();
        let env = Env::new();

        // p :- (q -> r ; s).
        let ite = atom!(";").apply(vec![
            atom!("->").apply(vec![Term::Atom(atom!("q")), Term::Atom(atom!("r"))]),
            Term::Atom(atom!("s")),
        ]);
        let t = atom!(":-").apply(vec![Term::Atom(atom!("p")), ite]);
        let cs = compile(&mut m, &t, &env).unwrap();
        assert_eq!(cs.len(), 1);
    }

    #[test]
    fn variable_goals_become_call() {
        let mut m = MachineBuilder::default().build();
        let env = Env::new();

        // p(X) :- X.
        let x = Term::Variable(m.new_variable(&env).unwrap());
        let t = atom!(":-").apply(vec![atom!("p").apply(vec![x.clone()]), x]);
        let cs = compile(&mut m, &t, &env).unwrap();

        let calls: Vec<_> = cs[0]
            .code
            .iter()
            .filter_map(|i| match i {
                Instruction::Call(pi) => Some(*pi),
                _ => None,
            })
            .collect();
        assert_eq!(calls, vec![ProcedureIndicator::new(atom!("call"), 1)]);
    }

    #[test]
    fn non_callable_bodies_are_rejected() {
        let mut m = MachineBuilder::default().build();
        let env = Env::new();

        // p :- 42.
        let t = atom!(":-").apply(vec![Term::Atom(atom!("p")), Term::Integer(42)]);
        let err = compile(&mut m, &t, &env).unwrap_err();
        assert_eq!(
            err.term().arg(0).unwrap().functor(),
            Some(atom!("type_error"))
        );
    }

    #[test]
    fn dict_dot_desugars_into_an_auxiliary_goal() {
        let mut m = MachineBuilder::default().build();
        let env = Env::new();

        // p(X) :- q($dot(X, a)).  ~~>  p(X) :- '.'(X, a, V), q(V).
        let x = Term::Variable(m.new_variable(&env).unwrap());
        let t = atom!(":-").apply(vec![
            atom!("p").apply(vec![x.clone()]),
            atom!("q").apply(vec![atom!("$dot").apply(vec![x, Term::Atom(atom!("a"))])]),
        ]);
        let cs = compile(&mut m, &t, &env).unwrap();

        let calls: Vec<_> = cs[0]
            .code
            .iter()
            .filter_map(|i| match i {
                Instruction::Call(pi) => Some(*pi),
                _ => None,
            })
            .collect();
        assert_eq!(
            calls,
            vec![
                ProcedureIndicator::new(atom!("."), 3),
                ProcedureIndicator::new(atom!("q"), 1),
            ]
        );
    }
}
