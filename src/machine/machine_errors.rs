use std::fmt;

use fxhash::FxHashMap;

use crate::arithmetic::ExceptionalValue;
use crate::atom_table::*;
use crate::machine::bindings::Env;
use crate::machine::term::{Term, Variable};
use crate::machine::Machine;

/// An exception: an error represented by a prolog term, shaped
/// `error(Kind, Context)` for the engine's own signals. The term is copied
/// with a fresh variable mapping at construction time so that no caller
/// variables leak into the error.
#[derive(Clone, Debug, PartialEq)]
pub struct Exception {
    term: Term,
}

impl Exception {
    pub(crate) fn from_term(term: Term) -> Exception {
        Exception { term }
    }

    pub fn term(&self) -> &Term {
        &self.term
    }

    pub fn into_term(self) -> Term {
        self.term
    }

    pub(crate) fn cancelled() -> Exception {
        Exception {
            term: atom!("error").apply(vec![
                Term::Atom(atom!("cancelled")),
                Term::Atom(atom!("root")),
            ]),
        }
    }

    /// True for the driver's cancellation signal, which is reported without
    /// consulting `catch/3` frames.
    pub fn is_cancellation(&self) -> bool {
        self.term.functor() == Some(atom!("error"))
            && self.term.arg(0) == Some(Term::Atom(atom!("cancelled")))
    }

    pub(crate) fn panic_error(msg: &str) -> Exception {
        Exception {
            term: atom!("error").apply(vec![
                atom!("panic_error").apply(vec![Term::Atom(AtomTable::build_with(msg))])
            ]),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        crate::machine::term_writer::fmt_term_default(f, &self.term)
    }
}

// 7.12.2 b) of ISO/IEC 13211-1:1995
#[derive(Copy, Clone, Debug)]
pub enum ValidType {
    Atom,
    Atomic,
    Byte,
    Callable,
    Character,
    Compound,
    Dict,
    Evaluable,
    Float,
    InByte,
    InCharacter,
    Integer,
    List,
    Number,
    Pair,
    PredicateIndicator,
}

impl ValidType {
    pub fn as_atom(self) -> Atom {
        match self {
            ValidType::Atom => atom!("atom"),
            ValidType::Atomic => atom!("atomic"),
            ValidType::Byte => atom!("byte"),
            ValidType::Callable => atom!("callable"),
            ValidType::Character => atom!("character"),
            ValidType::Compound => atom!("compound"),
            ValidType::Dict => atom!("dict"),
            ValidType::Evaluable => atom!("evaluable"),
            ValidType::Float => atom!("float"),
            ValidType::InByte => atom!("in_byte"),
            ValidType::InCharacter => atom!("in_character"),
            ValidType::Integer => atom!("integer"),
            ValidType::List => atom!("list"),
            ValidType::Number => atom!("number"),
            ValidType::Pair => atom!("pair"),
            ValidType::PredicateIndicator => atom!("predicate_indicator"),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub enum ValidDomain {
    CharacterCodeList,
    CloseOption,
    DictKey,
    FlagValue,
    IOMode,
    NonEmptyList,
    NotLessThanZero,
    OperatorPriority,
    OperatorSpecifier,
    Order,
    PrologFlag,
    ReadOption,
    SourceSink,
    Stream,
    StreamOption,
    StreamOrAlias,
    StreamPosition,
    StreamProperty,
    WriteOption,
}

impl ValidDomain {
    pub fn as_atom(self) -> Atom {
        match self {
            ValidDomain::CharacterCodeList => atom!("character_code_list"),
            ValidDomain::CloseOption => atom!("close_option"),
            ValidDomain::DictKey => atom!("dict_key"),
            ValidDomain::FlagValue => atom!("flag_value"),
            ValidDomain::IOMode => atom!("io_mode"),
            ValidDomain::NonEmptyList => atom!("non_empty_list"),
            ValidDomain::NotLessThanZero => atom!("not_less_than_zero"),
            ValidDomain::OperatorPriority => atom!("operator_priority"),
            ValidDomain::OperatorSpecifier => atom!("operator_specifier"),
            ValidDomain::Order => atom!("order"),
            ValidDomain::PrologFlag => atom!("prolog_flag"),
            ValidDomain::ReadOption => atom!("read_option"),
            ValidDomain::SourceSink => atom!("source_sink"),
            ValidDomain::Stream => atom!("stream"),
            ValidDomain::StreamOption => atom!("stream_option"),
            ValidDomain::StreamOrAlias => atom!("stream_or_alias"),
            ValidDomain::StreamPosition => atom!("stream_position"),
            ValidDomain::StreamProperty => atom!("stream_property"),
            ValidDomain::WriteOption => atom!("write_option"),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub enum ObjectType {
    Procedure,
    SourceSink,
    Stream,
}

impl ObjectType {
    pub fn as_atom(self) -> Atom {
        match self {
            ObjectType::Procedure => atom!("procedure"),
            ObjectType::SourceSink => atom!("source_sink"),
            ObjectType::Stream => atom!("stream"),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub enum Operation {
    Access,
    Create,
    Input,
    Modify,
    Open,
    Output,
    Reposition,
}

impl Operation {
    pub fn as_atom(self) -> Atom {
        match self {
            Operation::Access => atom!("access"),
            Operation::Create => atom!("create"),
            Operation::Input => atom!("input"),
            Operation::Modify => atom!("modify"),
            Operation::Open => atom!("open"),
            Operation::Output => atom!("output"),
            Operation::Reposition => atom!("reposition"),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub enum PermissionType {
    BinaryStream,
    Flag,
    Operator,
    PastEndOfStream,
    PrivateProcedure,
    SourceSink,
    StaticProcedure,
    Stream,
    TextStream,
}

impl PermissionType {
    pub fn as_atom(self) -> Atom {
        match self {
            PermissionType::BinaryStream => atom!("binary_stream"),
            PermissionType::Flag => atom!("flag"),
            PermissionType::Operator => atom!("operator"),
            PermissionType::PastEndOfStream => atom!("past_end_of_stream"),
            PermissionType::PrivateProcedure => atom!("private_procedure"),
            PermissionType::SourceSink => atom!("source_sink"),
            PermissionType::StaticProcedure => atom!("static_procedure"),
            PermissionType::Stream => atom!("stream"),
            PermissionType::TextStream => atom!("text_stream"),
        }
    }
}

/// Implementation-defined limits for `representation_error/1`.
#[derive(Copy, Clone, Debug)]
pub enum RepFlag {
    Character,
    CharacterCode,
    InCharacterCode,
    MaxArity,
    MaxInteger,
    MinInteger,
}

impl RepFlag {
    pub fn as_atom(self) -> Atom {
        match self {
            RepFlag::Character => atom!("character"),
            RepFlag::CharacterCode => atom!("character_code"),
            RepFlag::InCharacterCode => atom!("in_character_code"),
            RepFlag::MaxArity => atom!("max_arity"),
            RepFlag::MaxInteger => atom!("max_integer"),
            RepFlag::MinInteger => atom!("min_integer"),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub enum Resource {
    FiniteMemory,
    Memory,
}

impl Resource {
    pub fn as_atom(self) -> Atom {
        match self {
            Resource::FiniteMemory => atom!("finite_memory"),
            Resource::Memory => atom!("memory"),
        }
    }
}

impl Machine {
    /// Creates an exception from a copy of the given term. If copying
    /// itself fails on the variable cap, the preallocated
    /// `resource_error(memory)` is returned instead.
    pub fn exception(&mut self, term: Term, env: &Env) -> Exception {
        match self.renamed_copy(&term, env) {
            Ok(term) => Exception { term },
            Err(e) => e,
        }
    }

    /// Copies a term, replacing every distinct free variable with a fresh
    /// one and resolving bound variables away.
    pub(crate) fn renamed_copy(&mut self, t: &Term, env: &Env) -> Result<Term, Exception> {
        let mut mapping = FxHashMap::default();
        self.renamed_copy_inner(t, &mut mapping, env)
    }

    fn renamed_copy_inner(
        &mut self,
        t: &Term,
        mapping: &mut FxHashMap<Variable, Variable>,
        env: &Env,
    ) -> Result<Term, Exception> {
        let t = env.resolve(t);
        match &t {
            Term::Variable(v) => {
                if let Some(fresh) = mapping.get(v) {
                    return Ok(Term::Variable(*fresh));
                }
                let fresh = self.new_variable(env)?;
                mapping.insert(*v, fresh);
                Ok(Term::Variable(fresh))
            }
            Term::Compound(f) => {
                let mut args = Vec::with_capacity(f.args.len());
                for a in &f.args {
                    args.push(self.renamed_copy_inner(a, mapping, env)?);
                }
                Ok(f.name.apply(args))
            }
            Term::Dict(f) => {
                let mut args = Vec::with_capacity(f.args.len());
                for a in &f.args {
                    args.push(self.renamed_copy_inner(a, mapping, env)?);
                }
                Ok(Term::dict_from_sorted(args))
            }
            Term::List { items, offset } => {
                let mut out = Vec::with_capacity(items.len() - offset);
                for a in &items[*offset..] {
                    out.push(self.renamed_copy_inner(a, mapping, env)?);
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
                    out.push(self.renamed_copy_inner(a, mapping, env)?);
                }
                let tail = self.renamed_copy_inner(tail, mapping, env)?;
                Ok(Term::partial_list(tail, out))
            }
            _ => Ok(t),
        }
    }

    fn error_term(&self, kind: Term) -> Term {
        atom!("error").apply(vec![kind, Term::Variable(self.var_context())])
    }

    pub fn instantiation_error(&mut self, env: &Env) -> Exception {
        let t = self.error_term(Term::Atom(atom!("instantiation_error")));
        self.exception(t, env)
    }

    pub fn type_error(&mut self, valid_type: ValidType, culprit: Term, env: &Env) -> Exception {
        let kind = atom!("type_error").apply(vec![Term::Atom(valid_type.as_atom()), culprit]);
        let t = self.error_term(kind);
        self.exception(t, env)
    }

    pub fn domain_error(&mut self, domain: ValidDomain, culprit: Term, env: &Env) -> Exception {
        let kind = atom!("domain_error").apply(vec![Term::Atom(domain.as_atom()), culprit]);
        let t = self.error_term(kind);
        self.exception(t, env)
    }

    pub fn existence_error(
        &mut self,
        object_type: ObjectType,
        culprit: Term,
        env: &Env,
    ) -> Exception {
        let kind =
            atom!("existence_error").apply(vec![Term::Atom(object_type.as_atom()), culprit]);
        let t = self.error_term(kind);
        self.exception(t, env)
    }

    pub fn permission_error(
        &mut self,
        operation: Operation,
        permission_type: PermissionType,
        culprit: Term,
        env: &Env,
    ) -> Exception {
        let kind = atom!("permission_error").apply(vec![
            Term::Atom(operation.as_atom()),
            Term::Atom(permission_type.as_atom()),
            culprit,
        ]);
        let t = self.error_term(kind);
        self.exception(t, env)
    }

    pub fn representation_error(&mut self, limit: RepFlag, env: &Env) -> Exception {
        let kind = atom!("representation_error").apply(vec![Term::Atom(limit.as_atom())]);
        let t = self.error_term(kind);
        self.exception(t, env)
    }

    /// Unlike the other constructors this performs no copying, so it can be
    /// produced even when the variable budget is exhausted.
    pub fn resource_error(&self, resource: Resource, env: &Env) -> Exception {
        Exception {
            term: atom!("error").apply(vec![
                atom!("resource_error").apply(vec![Term::Atom(resource.as_atom())]),
                env.resolve(&Term::Variable(self.var_context())),
            ]),
        }
    }

    pub fn syntax_error(&mut self, culprit: Term, env: &Env) -> Exception {
        let kind = atom!("syntax_error").apply(vec![culprit]);
        let t = self.error_term(kind);
        self.exception(t, env)
    }

    pub fn evaluation_error(&mut self, ev: ExceptionalValue, env: &Env) -> Exception {
        let kind = atom!("evaluation_error").apply(vec![Term::Atom(ev.as_atom())]);
        let t = self.error_term(kind);
        self.exception(t, env)
    }
}
