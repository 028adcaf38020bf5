//! A deterministic, embeddable prolog engine.
//!
//! Source text is compiled into a compact clause bytecode and executed by a
//! trampolined resolution driver over persistent binding environments.
//! Identical programs and queries produce identical solution streams across
//! machines: clause order, argument order, table iteration order, variable
//! identities and decimal arithmetic are all reproducible.

#[macro_use]
pub mod atom_table;

pub mod arithmetic;
pub mod codegen;
pub mod instructions;
pub mod machine;
pub mod ops;
pub mod parser;

pub use arithmetic::Float;
pub use machine::bindings::Env;
pub use machine::machine_errors::Exception;
pub use machine::term::Term;
pub use machine::{LeafAnswer, Machine, MachineBuilder, QueryState, StreamConfig};

#[cfg(test)]
mod tests;
