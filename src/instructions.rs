use std::fmt;

use crate::machine::indices::ProcedureIndicator;
use crate::machine::term::Term;

/// One instruction of the clause bytecode. `Get*` instructions match the
/// next pending argument during head unification; `Put*` instructions build
/// the next call's argument during body execution.
#[derive(Clone, Debug)]
pub enum Instruction {
    GetConst(Term),
    PutConst(Term),
    GetVar(usize),
    PutVar(usize),
    GetFunctor(ProcedureIndicator),
    PutFunctor(ProcedureIndicator),
    GetList(usize),
    PutList(usize),
    GetPartial(usize),
    PutPartial(usize),
    GetDict(usize),
    PutDict(usize),
    Pop,
    Enter,
    Call(ProcedureIndicator),
    Cut,
    Exit,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Opcode {
    GetConst,
    PutConst,
    GetVar,
    PutVar,
    GetFunctor,
    PutFunctor,
    GetList,
    PutList,
    GetPartial,
    PutPartial,
    GetDict,
    PutDict,
    Pop,
    Enter,
    Call,
    Cut,
    Exit,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::GetConst => "get_const",
            Opcode::PutConst => "put_const",
            Opcode::GetVar => "get_var",
            Opcode::PutVar => "put_var",
            Opcode::GetFunctor => "get_functor",
            Opcode::PutFunctor => "put_functor",
            Opcode::GetList => "get_list",
            Opcode::PutList => "put_list",
            Opcode::GetPartial => "get_partial",
            Opcode::PutPartial => "put_partial",
            Opcode::GetDict => "get_dict",
            Opcode::PutDict => "put_dict",
            Opcode::Pop => "pop",
            Opcode::Enter => "enter",
            Opcode::Call => "call",
            Opcode::Cut => "cut",
            Opcode::Exit => "exit",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::GetConst(_) => Opcode::GetConst,
            Instruction::PutConst(_) => Opcode::PutConst,
            Instruction::GetVar(_) => Opcode::GetVar,
            Instruction::PutVar(_) => Opcode::PutVar,
            Instruction::GetFunctor(_) => Opcode::GetFunctor,
            Instruction::PutFunctor(_) => Opcode::PutFunctor,
            Instruction::GetList(_) => Opcode::GetList,
            Instruction::PutList(_) => Opcode::PutList,
            Instruction::GetPartial(_) => Opcode::GetPartial,
            Instruction::PutPartial(_) => Opcode::PutPartial,
            Instruction::GetDict(_) => Opcode::GetDict,
            Instruction::PutDict(_) => Opcode::PutDict,
            Instruction::Pop => Opcode::Pop,
            Instruction::Enter => Opcode::Enter,
            Instruction::Call(_) => Opcode::Call,
            Instruction::Cut => Opcode::Cut,
            Instruction::Exit => Opcode::Exit,
        }
    }

    /// The operand as a term, for the hook and the debug printer.
    pub fn operand(&self) -> Option<Term> {
        match self {
            Instruction::GetConst(t) | Instruction::PutConst(t) => Some(t.clone()),
            Instruction::GetVar(i) | Instruction::PutVar(i) => Some(Term::Integer(*i as i64)),
            Instruction::GetFunctor(pi)
            | Instruction::PutFunctor(pi)
            | Instruction::Call(pi) => Some(pi.as_term()),
            Instruction::GetList(n)
            | Instruction::PutList(n)
            | Instruction::GetPartial(n)
            | Instruction::PutPartial(n)
            | Instruction::GetDict(n)
            | Instruction::PutDict(n) => Some(Term::Integer(*n as i64)),
            Instruction::Pop | Instruction::Enter | Instruction::Cut | Instruction::Exit => None,
        }
    }
}
