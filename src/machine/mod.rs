pub mod bindings;
pub(crate) mod dispatch;
pub mod indices;
pub mod machine_errors;
pub mod promise;
pub mod streams;
pub mod system_calls;
pub mod term;
pub mod term_writer;
pub mod unify;

mod config;

pub use config::{MachineBuilder, StreamConfig};

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fxhash::{FxBuildHasher, FxHashMap};
use indexmap::{IndexMap, IndexSet};

use crate::atom_table::*;
use crate::codegen;
use crate::instructions::Opcode;
use crate::machine::bindings::Env;
use crate::machine::indices::{IndexStore, Procedure, ProcedureIndicator, UserDefined};
use crate::machine::machine_errors::{
    Exception, ObjectType, Operation, PermissionType, Resource, ValidType,
};
use crate::machine::promise::{drive, Cont, Promise};
use crate::machine::streams::{Stream, StreamTable};
use crate::machine::term::{Term, Variable};
use crate::ops::OpTable;
use crate::parser::parser::{DoubleQuotes, Reader};

/// What happens when a goal names a procedure absent from the database,
/// per the `unknown` flag.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UnknownAction {
    Error,
    Fail,
    Warning,
}

impl UnknownAction {
    pub fn as_atom(self) -> Atom {
        match self {
            UnknownAction::Error => atom!("error"),
            UnknownAction::Fail => atom!("fail"),
            UnknownAction::Warning => atom!("warning"),
        }
    }

    pub fn from_atom(a: Atom) -> Option<UnknownAction> {
        match a.as_str() {
            "error" => Some(UnknownAction::Error),
            "fail" => Some(UnknownAction::Fail),
            "warning" => Some(UnknownAction::Warning),
            _ => None,
        }
    }
}

/// The read-write machine flags; the read-only flags are answered directly
/// by `current_prolog_flag/2`.
#[derive(Clone, Debug)]
pub struct MachineFlags {
    pub double_quotes: DoubleQuotes,
    pub char_conversion: bool,
    pub debug: bool,
    pub unknown: UnknownAction,
}

impl Default for MachineFlags {
    fn default() -> Self {
        MachineFlags {
            double_quotes: DoubleQuotes::Codes,
            char_conversion: false,
            debug: false,
            unknown: UnknownAction::Error,
        }
    }
}

/// A hook run before each bytecode instruction; a non-ok result aborts the
/// query with the given exception.
pub type HookFn = Rc<dyn Fn(Opcode, Option<&Term>, &Env) -> Result<(), Exception>>;

/// Callback invoked for calls to unknown procedures when the `unknown`
/// flag is `warning`.
pub type UnknownHandler = Rc<dyn Fn(Atom, &[Term])>;

/// A handle for cancelling a running query from another thread; the driver
/// polls it once per trampoline tick.
#[derive(Clone)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

const BOOTSTRAP: &str = include_str!("lib/bootstrap.pl");

/// The engine: procedure database, operator table, flags, streams, and the
/// per-machine variable counter. One machine drives one query at a time;
/// separate machines are fully independent.
pub struct Machine {
    indices: IndexStore,
    ops: OpTable,
    flags: MachineFlags,
    char_conversions: IndexMap<char, char, FxBuildHasher>,
    streams: StreamTable,
    input: Stream,
    output: Stream,
    sources: IndexMap<Atom, String, FxBuildHasher>,
    loaded: IndexSet<Atom, FxBuildHasher>,
    var_counter: u64,
    max_variables: u64,
    var_context: Variable,
    root_env: Env,
    stream_counter: u64,
    cancelled: Arc<AtomicBool>,
    hook: Option<HookFn>,
    unknown_handler: Option<UnknownHandler>,
}

impl Machine {
    pub(crate) fn from_builder(builder: MachineBuilder) -> Machine {
        let input = builder.streams.input_stream(1);
        let output = builder.streams.output_stream(2);

        let mut machine = Machine {
            indices: IndexStore::new(),
            ops: OpTable::with_defaults(),
            flags: MachineFlags::default(),
            char_conversions: IndexMap::with_hasher(FxBuildHasher::default()),
            streams: StreamTable::new(),
            input: input.clone(),
            output: output.clone(),
            sources: IndexMap::with_hasher(FxBuildHasher::default()),
            loaded: IndexSet::with_hasher(FxBuildHasher::default()),
            var_counter: 0,
            max_variables: 0,
            var_context: Variable(0),
            root_env: Env::new(),
            stream_counter: 2,
            cancelled: Arc::new(AtomicBool::new(false)),
            hook: None,
            unknown_handler: None,
        };

        machine.var_counter += 1;
        machine.var_context = Variable(machine.var_counter);
        machine.root_env = Env::new().bind(
            machine.var_context,
            Term::Atom(atom!("root")),
        );

        machine.streams.alias(atom!("user_input"), &input);
        machine.streams.add(input);
        machine.streams.alias(atom!("user_output"), &output);
        machine.streams.add(output);

        system_calls::register_builtins(&mut machine);

        machine
            .consult(BOOTSTRAP, true)
            .expect("the bootstrap library consults cleanly");

        // the cap applies to user programs, not the bootstrap.
        machine.max_variables = builder.max_variables;

        machine
    }

    /// Creates a fresh variable, failing with `resource_error(memory)` once
    /// the configured cap is exhausted.
    pub fn new_variable(&mut self, env: &Env) -> Result<Variable, Exception> {
        if self.max_variables > 0 && self.var_counter >= self.max_variables {
            return Err(self.resource_error(Resource::Memory, env));
        }
        self.var_counter += 1;
        Ok(Variable(self.var_counter))
    }

    pub(crate) fn var_context(&self) -> Variable {
        self.var_context
    }

    /// The starting environment of a query: just the root binding used by
    /// exception contexts.
    pub fn fresh_env(&self) -> Env {
        self.root_env.clone()
    }

    pub fn ops(&self) -> &OpTable {
        &self.ops
    }

    pub fn ops_mut(&mut self) -> &mut OpTable {
        &mut self.ops
    }

    pub fn flags(&self) -> &MachineFlags {
        &self.flags
    }

    pub fn flags_mut(&mut self) -> &mut MachineFlags {
        &mut self.flags
    }

    pub(crate) fn char_conversions(&self) -> FxHashMap<char, char> {
        self.char_conversions.iter().map(|(k, v)| (*k, *v)).collect()
    }

    pub(crate) fn char_conversion_table(
        &mut self,
    ) -> &mut IndexMap<char, char, FxBuildHasher> {
        &mut self.char_conversions
    }

    pub(crate) fn char_conversion_entries(&self) -> Vec<(char, char)> {
        self.char_conversions.iter().map(|(k, v)| (*k, *v)).collect()
    }

    pub(crate) fn indices(&self) -> &IndexStore {
        &self.indices
    }

    pub(crate) fn indices_mut(&mut self) -> &mut IndexStore {
        &mut self.indices
    }

    pub(crate) fn streams(&self) -> &StreamTable {
        &self.streams
    }

    pub fn current_input(&self) -> Stream {
        self.input.clone()
    }

    pub fn current_output(&self) -> Stream {
        self.output.clone()
    }

    pub(crate) fn set_current_input(&mut self, s: Stream) {
        self.input = s;
    }

    pub(crate) fn set_current_output(&mut self, s: Stream) {
        self.output = s;
    }

    /// Mints the id for a host-created stream.
    pub fn next_stream_id(&mut self) -> u64 {
        self.stream_counter += 1;
        self.stream_counter
    }

    /// Adds a new stream to the table and returns it as a term.
    pub fn add_stream(&mut self, stream: Stream) -> Term {
        self.streams.add(stream.clone());
        Term::Stream(stream)
    }

    /// Removes a stream and every alias referring to it. A closed current
    /// input or output falls back to the user streams.
    pub fn remove_stream(&mut self, stream: &Stream) {
        self.streams.remove(stream);

        if self.input.id() == stream.id() {
            if let Some(user) = self.streams.by_alias(atom!("user_input")) {
                self.input = user;
            }
        }
        if self.output.id() == stream.id() {
            if let Some(user) = self.streams.by_alias(atom!("user_output")) {
                self.output = user;
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// A clonable handle that cancels the machine's running query.
    pub fn cancellation(&self) -> Cancellation {
        Cancellation(self.cancelled.clone())
    }

    pub(crate) fn reset_cancellation(&mut self) {
        self.cancelled.store(false, Ordering::Relaxed);
    }

    pub fn install_hook(&mut self, hook: HookFn) {
        self.hook = Some(hook);
    }

    pub fn clear_hook(&mut self) {
        self.hook = None;
    }

    pub(crate) fn hook(&self) -> Option<HookFn> {
        self.hook.clone()
    }

    pub fn set_unknown_handler(&mut self, handler: UnknownHandler) {
        self.unknown_handler = Some(handler);
    }

    /// Registers an in-memory source text for `include/1` and
    /// `ensure_loaded/1`.
    pub fn register_source(&mut self, name: Atom, text: String) {
        self.sources.insert(name, text);
    }

    /// The entry point of resolution: looks the procedure up and calls it
    /// with the context variable bound to the procedure indicator.
    pub(crate) fn arrive(
        &mut self,
        name: Atom,
        args: Vec<Term>,
        k: Cont,
        env: &Env,
    ) -> Promise {
        let pi = ProcedureIndicator::new(name, args.len());

        let procedure = match self.indices.get(pi) {
            Some(p) => p.clone(),
            None => {
                return match self.flags.unknown {
                    UnknownAction::Error => Promise::error(self.existence_error(
                        ObjectType::Procedure,
                        pi.as_term(),
                        env,
                    )),
                    UnknownAction::Fail => Promise::bool(false),
                    UnknownAction::Warning => {
                        if let Some(handler) = self.unknown_handler.clone() {
                            handler(name, &args);
                        }
                        Promise::bool(false)
                    }
                }
            }
        };

        // inform the callee about its context.
        let env = env.bind(self.var_context, pi.as_term());
        procedure.call(self, args, k, &env)
    }

    /// Native predicate registration, arity 0 through 8.
    pub fn register0(
        &mut self,
        name: Atom,
        f: impl Fn(&mut Machine, Cont, &Env) -> Promise + 'static,
    ) {
        self.indices.insert(
            ProcedureIndicator::new(name, 0),
            Procedure::Builtin(indices::NativePredicate::P0(Rc::new(f))),
        );
    }

    pub fn register1(
        &mut self,
        name: Atom,
        f: impl Fn(&mut Machine, &Term, Cont, &Env) -> Promise + 'static,
    ) {
        self.indices.insert(
            ProcedureIndicator::new(name, 1),
            Procedure::Builtin(indices::NativePredicate::P1(Rc::new(f))),
        );
    }

    pub fn register2(
        &mut self,
        name: Atom,
        f: impl Fn(&mut Machine, &Term, &Term, Cont, &Env) -> Promise + 'static,
    ) {
        self.indices.insert(
            ProcedureIndicator::new(name, 2),
            Procedure::Builtin(indices::NativePredicate::P2(Rc::new(f))),
        );
    }

    pub fn register3(
        &mut self,
        name: Atom,
        f: impl Fn(&mut Machine, &Term, &Term, &Term, Cont, &Env) -> Promise + 'static,
    ) {
        self.indices.insert(
            ProcedureIndicator::new(name, 3),
            Procedure::Builtin(indices::NativePredicate::P3(Rc::new(f))),
        );
    }

    pub fn register4(
        &mut self,
        name: Atom,
        f: impl Fn(&mut Machine, &Term, &Term, &Term, &Term, Cont, &Env) -> Promise + 'static,
    ) {
        self.indices.insert(
            ProcedureIndicator::new(name, 4),
            Procedure::Builtin(indices::NativePredicate::P4(Rc::new(f))),
        );
    }

    pub fn register5(
        &mut self,
        name: Atom,
        f: impl Fn(&mut Machine, &Term, &Term, &Term, &Term, &Term, Cont, &Env) -> Promise
            + 'static,
    ) {
        self.indices.insert(
            ProcedureIndicator::new(name, 5),
            Procedure::Builtin(indices::NativePredicate::P5(Rc::new(f))),
        );
    }

    pub fn register6(
        &mut self,
        name: Atom,
        f: impl Fn(&mut Machine, &Term, &Term, &Term, &Term, &Term, &Term, Cont, &Env) -> Promise
            + 'static,
    ) {
        self.indices.insert(
            ProcedureIndicator::new(name, 6),
            Procedure::Builtin(indices::NativePredicate::P6(Rc::new(f))),
        );
    }

    pub fn register7(
        &mut self,
        name: Atom,
        f: impl Fn(
                &mut Machine,
                &Term,
                &Term,
                &Term,
                &Term,
                &Term,
                &Term,
                &Term,
                Cont,
                &Env,
            ) -> Promise
            + 'static,
    ) {
        self.indices.insert(
            ProcedureIndicator::new(name, 7),
            Procedure::Builtin(indices::NativePredicate::P7(Rc::new(f))),
        );
    }

    #[allow(clippy::type_complexity)]
    pub fn register8(
        &mut self,
        name: Atom,
        f: impl Fn(
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
            ) -> Promise
            + 'static,
    ) {
        self.indices.insert(
            ProcedureIndicator::new(name, 8),
            Procedure::Builtin(indices::NativePredicate::P8(Rc::new(f))),
        );
    }

    /// Consults a program text: clauses are compiled into the database in
    /// order, directives are executed as they are reached.
    pub fn load_module_string(&mut self, _name: &str, source: &str) -> Result<(), Exception> {
        self.consult(source, false)
    }

    pub(crate) fn consult(&mut self, source: &str, static_mode: bool) -> Result<(), Exception> {
        let env = self.fresh_env();
        let mut reader = Reader::new(self, source);
        let mut last_pi: Option<ProcedureIndicator> = None;
        let mut initializations: Vec<Term> = Vec::new();

        while let Some((t, _)) = reader.read_term(self)? {
            if t.functor() == Some(atom!(":-")) && t.arity() == 1 {
                let directive = t.arg(0).expect("arity is 1");
                self.directive(&directive, &mut initializations, static_mode, &env)?;
                continue;
            }

            let clauses = codegen::compile(self, &t, &env)?;
            let pi = clauses[0].pi;

            if last_pi != Some(pi) {
                if let Some(prev) = last_pi {
                    if let Some(Procedure::UserDefined(u)) = self.indices.get_mut(prev) {
                        u.closed = true;
                    }
                }
                last_pi = Some(pi);
            }

            let permission_denied = match self.indices.get(pi) {
                None => {
                    let fresh = if static_mode {
                        Procedure::Static(Vec::new())
                    } else {
                        Procedure::UserDefined(UserDefined::default())
                    };
                    self.indices.insert(pi, fresh);
                    false
                }
                Some(Procedure::UserDefined(u)) => u.closed && !u.discontiguous,
                Some(Procedure::Static(_)) => !static_mode,
                Some(Procedure::Builtin(_)) => true,
            };
            if permission_denied {
                return Err(self.permission_error(
                    Operation::Modify,
                    PermissionType::StaticProcedure,
                    pi.as_term(),
                    &env,
                ));
            }

            match self.indices.get_mut(pi) {
                Some(Procedure::UserDefined(u)) => u.clauses.extend(clauses),
                Some(Procedure::Static(existing)) => existing.extend(clauses),
                _ => unreachable!("checked above"),
            }
        }

        for goal in initializations {
            self.run_goal(&goal)?;
        }

        Ok(())
    }

    fn directive(
        &mut self,
        directive: &Term,
        initializations: &mut Vec<Term>,
        static_mode: bool,
        env: &Env,
    ) -> Result<(), Exception> {
        let d = env.resolve(directive);

        match (d.functor(), d.arity()) {
            (Some(name), 1)
                if name == atom!("dynamic")
                    || name == atom!("multifile")
                    || name == atom!("discontiguous") =>
            {
                let spec = d.arg(0).expect("arity is 1");
                for pi in self.pi_list(&spec, env)? {
                    match self.indices.get(pi) {
                        Some(Procedure::UserDefined(_)) => {}
                        None => {
                            self.indices
                                .insert(pi, Procedure::UserDefined(UserDefined::default()));
                        }
                        Some(_) => {
                            return Err(self.permission_error(
                                Operation::Modify,
                                PermissionType::StaticProcedure,
                                pi.as_term(),
                                env,
                            ));
                        }
                    }

                    if let Some(Procedure::UserDefined(user)) = self.indices.get_mut(pi) {
                        if name == atom!("dynamic") {
                            user.dynamic = true;
                        } else if name == atom!("multifile") {
                            user.multifile = true;
                        } else {
                            user.discontiguous = true;
                        }
                    }
                }
                Ok(())
            }
            (Some(name), 1) if name == atom!("initialization") => {
                initializations.push(d.arg(0).expect("arity is 1"));
                Ok(())
            }
            (Some(name), 1) if name == atom!("include") || name == atom!("ensure_loaded") => {
                let file = env.resolve(&d.arg(0).expect("arity is 1"));
                let file = match file {
                    Term::Atom(a) => a,
                    Term::Variable(_) => return Err(self.instantiation_error(env)),
                    other => {
                        return Err(self.type_error(ValidType::Atom, other, env));
                    }
                };

                if name == atom!("ensure_loaded") && self.loaded.contains(&file) {
                    return Ok(());
                }

                let text = match self.sources.get(&file) {
                    Some(text) => text.clone(),
                    None => {
                        return Err(self.existence_error(
                            ObjectType::SourceSink,
                            Term::Atom(file),
                            env,
                        ));
                    }
                };

                self.loaded.insert(file);
                self.consult(&text, static_mode)
            }
            _ => {
                // any callable directive runs as a goal.
                self.run_goal(&d)
            }
        }
    }

    fn pi_list(&mut self, spec: &Term, env: &Env) -> Result<Vec<ProcedureIndicator>, Exception> {
        let spec = env.resolve(spec);

        // a conjunction or a list of indicators, or a single one.
        if spec.functor() == Some(atom!(",")) && spec.arity() == 2 {
            let mut out = self.pi_list(&spec.arg(0).expect("arity is 2"), env)?;
            out.extend(self.pi_list(&spec.arg(1).expect("arity is 2"), env)?);
            return Ok(out);
        }
        if spec.is_proper_list(env) {
            let mut out = Vec::new();
            let mut current = spec;
            while current.functor() == Some(atom!(".")) && current.arity() == 2 {
                out.extend(self.pi_list(&current.arg(0).expect("arity is 2"), env)?);
                current = env.resolve(&current.arg(1).expect("arity is 2"));
            }
            return Ok(out);
        }

        if spec.functor() == Some(atom!("/")) && spec.arity() == 2 {
            let name = env.resolve(&spec.arg(0).expect("arity is 2"));
            let arity = env.resolve(&spec.arg(1).expect("arity is 2"));
            if let (Term::Atom(name), Term::Integer(arity)) = (&name, &arity) {
                if *arity >= 0 {
                    return Ok(vec![ProcedureIndicator::new(*name, *arity as usize)]);
                }
            }
        }

        Err(self.type_error(ValidType::PredicateIndicator, spec, env))
    }

    /// Runs a goal to its first solution, discarding bindings.
    pub(crate) fn run_goal(&mut self, goal: &Term) -> Result<(), Exception> {
        let env = self.fresh_env();
        let k: Cont = Rc::new(|_: &mut Machine, _: &Env| Promise::bool(true));
        let p = system_calls::call_goal(self, goal, k, &env);
        p.force(self)?;
        Ok(())
    }

    /// Runs a query, returning an iterator over its solutions.
    pub fn run_query<'a>(&'a mut self, query: &str) -> QueryState<'a> {
        self.run_query_with_placeholders(query, Vec::new())
    }

    /// Runs a query after substituting `?` placeholders with the given
    /// terms, in order.
    pub fn run_query_with_placeholders<'a>(
        &'a mut self,
        query: &str,
        placeholders: Vec<Term>,
    ) -> QueryState<'a> {
        self.reset_cancellation();

        let parsed = {
            let mut reader = Reader::new(self, query);
            reader.set_placeholders(placeholders);
            reader.read_term(self)
        };

        let (goal, vars) = match parsed {
            Err(e) => return QueryState::failed(self, e),
            Ok(None) => {
                let env = self.fresh_env();
                let e = self.syntax_error(Term::Atom(atom!("empty query")), &env);
                return QueryState::failed(self, e);
            }
            Ok(Some(parsed)) => parsed,
        };

        let env = self.fresh_env();
        let free_vars = env.free_variables(&goal);
        let args: Vec<Term> = free_vars.iter().map(|v| Term::Variable(*v)).collect();

        let head = atom!("$query").apply(args.clone());
        let rule = atom!(":-").apply(vec![head, goal]);

        let clauses = match codegen::compile(self, &rule, &env) {
            Ok(cs) => cs,
            Err(e) => return QueryState::failed(self, e),
        };

        let bindings: Rc<RefCell<Option<Env>>> = Rc::new(RefCell::new(None));
        let cell = bindings.clone();
        let k: Cont = Rc::new(move |_: &mut Machine, env: &Env| {
            *cell.borrow_mut() = Some(env.clone());
            Promise::bool(true)
        });

        let p = indices::clauses_call(Rc::new(clauses), args, k, &env);

        QueryState {
            machine: self,
            stack: vec![p],
            bindings,
            vars,
            pending_error: None,
            yielded: false,
            done: false,
        }
    }
}

/// One solution of a query, in the shape the embedding host consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafAnswer {
    True,
    False,
    LeafAnswer {
        bindings: IndexMap<String, Term, FxBuildHasher>,
    },
}

impl LeafAnswer {
    pub fn from_bindings<'a>(
        bindings: impl IntoIterator<Item = (&'a str, Term)>,
    ) -> LeafAnswer {
        LeafAnswer::LeafAnswer {
            bindings: bindings
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
        }
    }
}

/// The lazy solution stream of one query; dropping it abandons the
/// remaining choice points.
pub struct QueryState<'a> {
    machine: &'a mut Machine,
    stack: Vec<Promise>,
    bindings: Rc<RefCell<Option<Env>>>,
    vars: Vec<(String, Variable)>,
    pending_error: Option<Exception>,
    yielded: bool,
    done: bool,
}

impl<'a> QueryState<'a> {
    fn failed(machine: &'a mut Machine, e: Exception) -> QueryState<'a> {
        QueryState {
            machine,
            stack: Vec::new(),
            bindings: Rc::new(RefCell::new(None)),
            vars: Vec::new(),
            pending_error: Some(e),
            yielded: false,
            done: false,
        }
    }
}

impl Iterator for QueryState<'_> {
    type Item = Result<LeafAnswer, Term>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if let Some(e) = self.pending_error.take() {
            self.done = true;
            return Some(Err(e.into_term()));
        }

        *self.bindings.borrow_mut() = None;

        match drive(&mut self.stack, self.machine) {
            Err(e) => {
                self.done = true;
                Some(Err(e.into_term()))
            }
            Ok(false) => {
                self.done = true;
                if self.yielded {
                    None
                } else {
                    Some(Ok(LeafAnswer::False))
                }
            }
            Ok(true) => {
                self.yielded = true;
                let env = self
                    .bindings
                    .borrow_mut()
                    .take()
                    .expect("the success continuation recorded its environment");

                if self.vars.is_empty() {
                    return Some(Ok(LeafAnswer::True));
                }

                let bindings = self
                    .vars
                    .iter()
                    .map(|(name, v)| (name.clone(), env.simplify(&Term::Variable(*v))))
                    .collect();
                Some(Ok(LeafAnswer::LeafAnswer { bindings }))
            }
        }
    }
}
