use crate::atom_table::*;
use crate::machine::term::Term;
use crate::machine::{LeafAnswer, Machine, MachineBuilder};

fn collect(machine: &mut Machine, query: &str) -> Vec<Result<LeafAnswer, Term>> {
    machine.run_query(query).collect()
}

fn one_binding(machine: &mut Machine, query: &str, var: &str) -> Term {
    let answers = collect(machine, query);
    assert_eq!(answers.len(), 1, "expected one solution for {}", query);
    match &answers[0] {
        Ok(LeafAnswer::LeafAnswer { bindings }) => bindings
            .get(var)
            .unwrap_or_else(|| panic!("no binding for {} in {}", var, query))
            .clone(),
        other => panic!("expected bindings for {}, got {:?}", query, other),
    }
}

fn error_kind(answer: &Result<LeafAnswer, Term>) -> Term {
    match answer {
        Err(t) => t.arg(0).expect("error/2"),
        other => panic!("expected an error, got {:?}", other),
    }
}

#[test]
fn append_concatenates() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(
        one_binding(&mut m, "append([1,2],[3],X).", "X"),
        Term::list(vec![Term::integer(1), Term::integer(2), Term::integer(3)])
    );
}

#[test]
fn cut_commits_past_a_disjunction() {
    let mut m = MachineBuilder::default().build();

    // the cut prunes the alternative branch, then fail sinks the query.
    assert_eq!(
        collect(&mut m, "X = 1, !, fail ; X = 2."),
        vec![Ok(LeafAnswer::False)]
    );
}

#[test]
fn compiled_rules_bind_their_arguments() {
    let mut m = MachineBuilder::default().build();
    m.load_module_string("facts", "p(X, Y) :- X = a, Y = b.")
        .unwrap();

    let answers = collect(&mut m, "p(U, V).");
    assert_eq!(
        answers,
        vec![Ok(LeafAnswer::from_bindings([
            ("U", Term::atom("a")),
            ("V", Term::atom("b")),
        ]))]
    );
}

#[test]
fn findall_collects_in_order() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(
        one_binding(&mut m, "findall(X, member(X, [1,2,3]), L).", "L"),
        Term::list(vec![Term::integer(1), Term::integer(2), Term::integer(3)])
    );
}

#[test]
fn setof_sorts_and_deduplicates() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(
        one_binding(&mut m, "setof(X, member(X, [3,1,2,1]), L).", "L"),
        Term::list(vec![Term::integer(1), Term::integer(2), Term::integer(3)])
    );
}

#[test]
fn bagof_fails_on_no_solutions_while_findall_succeeds() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(
        collect(&mut m, "bagof(X, member(X, []), L)."),
        vec![Ok(LeafAnswer::False)]
    );
    assert_eq!(
        one_binding(&mut m, "findall(X, member(X, []), L).", "L"),
        Term::atom("[]")
    );
}

#[test]
fn bagof_groups_by_witness_in_standard_order() {
    let mut m = MachineBuilder::default().build();
    m.load_module_string("facts", "f(b, 3).\nf(a, 1).\nf(a, 2).\n")
        .unwrap();

    let answers = collect(&mut m, "bagof(N, f(C, N), L).");
    assert_eq!(
        answers,
        vec![
            Ok(LeafAnswer::from_bindings([
                ("C", Term::atom("a")),
                ("L", Term::list(vec![Term::integer(1), Term::integer(2)])),
            ])),
            Ok(LeafAnswer::from_bindings([
                ("C", Term::atom("b")),
                ("L", Term::list(vec![Term::integer(3)])),
            ])),
        ]
    );
}

#[test]
fn catch_recovers_a_matching_ball() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(
        one_binding(&mut m, "catch(throw(oops), E, true).", "E"),
        Term::atom("oops")
    );
}

#[test]
fn catch_rethrows_a_mismatched_ball() {
    let mut m = MachineBuilder::default().build();

    let answers = collect(&mut m, "catch(throw(oops), mismatch, true).");
    assert_eq!(answers, vec![Err(Term::atom("oops"))]);
}

#[test]
fn float_overflow_is_an_evaluation_error() {
    let mut m = MachineBuilder::default().build();

    let answers = collect(&mut m, "X is 1.0e400.");
    assert_eq!(
        error_kind(&answers[0]),
        Term::compound("evaluation_error", [Term::atom("float_overflow")])
    );
}

#[test]
fn integer_overflow_is_an_evaluation_error() {
    let mut m = MachineBuilder::default().build();

    let answers = collect(&mut m, "X is 9223372036854775807 + 1.");
    assert_eq!(
        error_kind(&answers[0]),
        Term::compound("evaluation_error", [Term::atom("int_overflow")])
    );
}

#[test]
fn dict_dot_access() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(
        one_binding(&mut m, "X = tag{a: 1, b: 2}.a.", "X"),
        Term::integer(1)
    );

    let answers = collect(&mut m, "X = tag{a: 1}.z.");
    assert_eq!(
        error_kind(&answers[0]),
        Term::compound("domain_error", [Term::atom("dict_key"), Term::atom("z")])
    );
}

#[test]
fn dict_get_and_put() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(
        one_binding(&mut m, "get_dict(x, point{x: 1, y: 2}, V).", "V"),
        Term::integer(1)
    );

    // a missing key fails silently, unlike dot access.
    assert_eq!(
        collect(&mut m, "get_dict(z, point{x: 1}, _)."),
        vec![Ok(LeafAnswer::False)]
    );

    assert_eq!(
        one_binding(
            &mut m,
            "put_dict([z: 3], point{x: 1}, D), get_dict(z, D, V).",
            "V"
        ),
        Term::integer(3)
    );

    // the predefined put function through dot access.
    assert_eq!(
        one_binding(&mut m, "X = point{x: 1}.put([y: 2]).y.", "X"),
        Term::integer(2)
    );
}

#[test]
fn cut_is_local_to_call() {
    let mut m = MachineBuilder::default().build();

    // a cut inside call/1 must not prune the disjunction outside it.
    assert_eq!(
        collect(&mut m, "call((!, fail)) ; X = 1."),
        vec![Ok(LeafAnswer::from_bindings([("X", Term::integer(1))]))]
    );
}

#[test]
fn cut_commits_to_the_first_clause() {
    let mut m = MachineBuilder::default().build();
    m.load_module_string(
        "facts",
        "max(X, Y, X) :- X >= Y, !.\nmax(_, Y, Y).\n",
    )
    .unwrap();

    let answers = collect(&mut m, "max(3, 1, R).");
    assert_eq!(
        answers,
        vec![Ok(LeafAnswer::from_bindings([("R", Term::integer(3))]))]
    );
}

#[test]
fn if_then_else() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(
        one_binding(&mut m, "(1 < 2 -> X = yes ; X = no).", "X"),
        Term::atom("yes")
    );
    assert_eq!(
        one_binding(&mut m, "(2 < 1 -> X = yes ; X = no).", "X"),
        Term::atom("no")
    );
}

#[test]
fn if_then_else_commits_to_the_first_condition_solution() {
    let mut m = MachineBuilder::default().build();
    m.load_module_string("facts", "c(1).\nc(2).\n").unwrap();

    let answers = collect(&mut m, "(c(X) -> Y = got ; Y = none).");
    assert_eq!(
        answers,
        vec![Ok(LeafAnswer::from_bindings([
            ("X", Term::integer(1)),
            ("Y", Term::atom("got")),
        ]))]
    );
}

#[test]
fn occurs_check_variants() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(
        collect(&mut m, "unify_with_occurs_check(X, f(X))."),
        vec![Ok(LeafAnswer::False)]
    );

    // without the occurs check the unification succeeds.
    let answers = collect(&mut m, "X = f(X), Y = ok.");
    assert_eq!(answers.len(), 1);
    assert!(matches!(
        &answers[0],
        Ok(LeafAnswer::LeafAnswer { bindings }) if bindings.get("Y") == Some(&Term::atom("ok"))
    ));
}

#[test]
fn unknown_procedures_raise_existence_errors_with_context() {
    let mut m = MachineBuilder::default().build();

    let answers = collect(&mut m, "undefined_pred.");
    let pi = Term::compound("/", [Term::atom("undefined_pred"), Term::integer(0)]);
    assert_eq!(
        answers,
        vec![Err(Term::compound(
            "error",
            [
                Term::compound("existence_error", [Term::atom("procedure"), pi.clone()]),
                pi,
            ]
        ))]
    );
}

#[test]
fn unknown_flag_fail_suppresses_the_error() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(
        collect(&mut m, "set_prolog_flag(unknown, fail), undefined_pred."),
        vec![Ok(LeafAnswer::False)]
    );
}

#[test]
fn assert_and_retract() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(
        collect(&mut m, "assertz(counter(1)), assertz(counter(2))."),
        vec![Ok(LeafAnswer::True)]
    );
    assert_eq!(
        one_binding(&mut m, "findall(X, counter(X), L).", "L"),
        Term::list(vec![Term::integer(1), Term::integer(2)])
    );

    // asserta prepends.
    assert_eq!(
        collect(&mut m, "asserta(counter(0))."),
        vec![Ok(LeafAnswer::True)]
    );
    assert_eq!(
        one_binding(&mut m, "findall(X, counter(X), L).", "L"),
        Term::list(vec![
            Term::integer(0),
            Term::integer(1),
            Term::integer(2),
        ])
    );

    // retract removes the first matching clause only.
    assert_eq!(
        collect(&mut m, "retract(counter(X))."),
        vec![Ok(LeafAnswer::from_bindings([("X", Term::integer(0))]))]
    );
    assert_eq!(
        one_binding(&mut m, "findall(X, counter(X), L).", "L"),
        Term::list(vec![Term::integer(1), Term::integer(2)])
    );
}

#[test]
fn consulted_procedures_reject_modification() {
    let mut m = MachineBuilder::default().build();
    m.load_module_string("facts", "p(1).").unwrap();

    let answers = collect(&mut m, "assertz(p(2)).");
    assert_eq!(
        error_kind(&answers[0]),
        Term::compound(
            "permission_error",
            [
                Term::atom("modify"),
                Term::atom("static_procedure"),
                Term::compound("/", [Term::atom("p"), Term::integer(1)]),
            ]
        )
    );
}

#[test]
fn dynamic_declarations_allow_later_modification() {
    let mut m = MachineBuilder::default().build();
    m.load_module_string("facts", ":- dynamic(q/1).\nq(1).\n")
        .unwrap();

    assert_eq!(collect(&mut m, "assertz(q(2))."), vec![Ok(LeafAnswer::True)]);
    assert_eq!(
        one_binding(&mut m, "findall(X, q(X), L).", "L"),
        Term::list(vec![Term::integer(1), Term::integer(2)])
    );

    assert_eq!(collect(&mut m, "abolish(q/1)."), vec![Ok(LeafAnswer::True)]);
    let answers = collect(&mut m, "q(_).");
    assert_eq!(
        error_kind(&answers[0]),
        Term::compound(
            "existence_error",
            [
                Term::atom("procedure"),
                Term::compound("/", [Term::atom("q"), Term::integer(1)]),
            ]
        )
    );
}

#[test]
fn current_predicate_enumerates_in_insertion_order() {
    let mut m = MachineBuilder::default().build();
    m.load_module_string("facts", "zz_first(1).\nzz_second(2).\n")
        .unwrap();

    let l = one_binding(&mut m, "findall(N/A, current_predicate(N/A), L).", "L");

    let mut names = Vec::new();
    let mut t = l;
    while t.functor() == Some(atom!(".")) && t.arity() == 2 {
        names.push(t.arg(0).unwrap());
        t = t.arg(1).unwrap();
    }

    let first = Term::compound("/", [Term::atom("zz_first"), Term::integer(1)]);
    let second = Term::compound("/", [Term::atom("zz_second"), Term::integer(1)]);
    let pos_first = names.iter().position(|t| *t == first).expect("listed");
    let pos_second = names.iter().position(|t| *t == second).expect("listed");
    assert!(pos_first < pos_second);
}

#[test]
fn arithmetic_evaluates_under_is() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(one_binding(&mut m, "X is 1 + 2 * 3.", "X"), Term::integer(7));
    assert_eq!(one_binding(&mut m, "X is -7 // 2.", "X"), Term::integer(-3));
    assert_eq!(one_binding(&mut m, "X is min(3, 5).", "X"), Term::integer(3));
    assert_eq!(
        one_binding(&mut m, "X is abs(-42).", "X"),
        Term::integer(42)
    );

    let answers = collect(&mut m, "X is foo.");
    assert_eq!(
        error_kind(&answers[0]),
        Term::compound(
            "type_error",
            [
                Term::atom("evaluable"),
                Term::compound("/", [Term::atom("foo"), Term::integer(0)]),
            ]
        )
    );

    let answers = collect(&mut m, "X is 1 / 0.");
    assert_eq!(
        error_kind(&answers[0]),
        Term::compound("evaluation_error", [Term::atom("zero_divisor")])
    );

    // integer division over a float operand is a type error on the operand.
    let answers = collect(&mut m, "X is 1.0 // 2.");
    assert_eq!(
        error_kind(&answers[0]),
        Term::compound(
            "type_error",
            [
                Term::atom("integer"),
                Term::Float(crate::arithmetic::Float::parse("1.0").unwrap()),
            ]
        )
    );
}

#[test]
fn division_is_decimal_even_between_integers() {
    let mut m = MachineBuilder::default().build();

    let x = one_binding(&mut m, "X is 6 / 3.", "X");
    assert_eq!(
        x,
        Term::Float(crate::arithmetic::Float::parse("2").unwrap())
    );
    assert!(matches!(x, Term::Float(_)));

    assert_eq!(
        one_binding(&mut m, "X is 7 / 2.", "X"),
        Term::Float(crate::arithmetic::Float::parse("3.5").unwrap())
    );
}

#[test]
fn decimal_arithmetic_is_exact() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(
        collect(&mut m, "X is 0.1 + 0.2, X =:= 0.3."),
        vec![Ok(LeafAnswer::from_bindings([(
            "X",
            Term::Float(crate::arithmetic::Float::parse("0.3").unwrap()),
        )]))]
    );
}

#[test]
fn output_goes_to_the_current_output_stream() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(
        collect(&mut m, "write(hello), nl, writeq('two words')."),
        vec![Ok(LeafAnswer::True)]
    );
    assert_eq!(
        m.current_output().contents().unwrap(),
        "hello\n'two words'"
    );
}

#[test]
fn host_streams_are_read_through_aliases_until_closed() {
    use crate::machine::streams::Stream;

    let mut m = MachineBuilder::default().build();
    let id = m.next_stream_id();
    let s = Stream::from_string(id, "x");
    s.set_alias(atom!("my_in"));
    m.add_stream(s);

    assert_eq!(
        one_binding(&mut m, "get_char(my_in, C).", "C"),
        Term::atom("x")
    );

    assert_eq!(collect(&mut m, "close(my_in)."), vec![Ok(LeafAnswer::True)]);

    // the alias is gone with the stream.
    let answers = collect(&mut m, "get_char(my_in, _).");
    assert_eq!(
        error_kind(&answers[0]),
        Term::compound(
            "existence_error",
            [Term::atom("stream"), Term::atom("my_in")]
        )
    );
}

#[test]
fn reading_from_an_output_stream_is_a_permission_error() {
    let mut m = MachineBuilder::default().build();

    let answers = collect(&mut m, "current_output(S), get_char(S, _).");
    assert_eq!(
        error_kind(&answers[0]).functor(),
        Some(atom!("permission_error"))
    );
}

#[test]
fn double_quotes_flag_changes_string_reading() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(
        one_binding(&mut m, "X = \"ab\".", "X"),
        Term::list(vec![Term::integer(97), Term::integer(98)])
    );

    assert_eq!(
        collect(&mut m, "set_prolog_flag(double_quotes, atom)."),
        vec![Ok(LeafAnswer::True)]
    );
    assert_eq!(one_binding(&mut m, "X = \"ab\".", "X"), Term::atom("ab"));
}

#[test]
fn user_defined_operators_parse() {
    let mut m = MachineBuilder::default().build();
    m.load_module_string("ops", ":- op(700, xfx, ===).").unwrap();

    let t = one_binding(&mut m, "X = (a === b).", "X");
    assert_eq!(t, Term::compound("===", [Term::atom("a"), Term::atom("b")]));

    assert_eq!(
        collect(&mut m, "current_op(700, xfx, ===)."),
        vec![Ok(LeafAnswer::True)]
    );
}

#[test]
fn variable_cap_raises_a_resource_error() {
    let mut m = MachineBuilder::default().with_max_variables(500).build();

    let answers = collect(&mut m, "findall(X, between(1, 100000, X), _).");
    assert_eq!(
        error_kind(&answers[0]),
        Term::compound("resource_error", [Term::atom("memory")])
    );
}

#[test]
fn cancellation_stops_the_driver() {
    let mut m = MachineBuilder::default().build();
    let cancel = m.cancellation();

    let mut query = m.run_query("repeat, fail.");
    cancel.cancel();

    match query.next() {
        Some(Err(t)) => assert_eq!(t.arg(0), Some(Term::atom("cancelled"))),
        other => panic!("expected a cancellation error, got {:?}", other),
    }
}

#[test]
fn hooks_observe_instruction_execution() {
    use std::cell::Cell;
    use std::rc::Rc;

    let mut m = MachineBuilder::default().build();

    let count = Rc::new(Cell::new(0usize));
    let seen = count.clone();
    m.install_hook(Rc::new(
        move |_opcode: crate::instructions::Opcode,
              _operand: Option<&Term>,
              _env: &crate::machine::bindings::Env| {
            seen.set(seen.get() + 1);
            Ok(())
        },
    ));

    assert_eq!(collect(&mut m, "X = 1."), vec![
        Ok(LeafAnswer::from_bindings([("X", Term::integer(1))]))
    ]);
    assert!(count.get() > 0);
}

#[test]
fn two_machines_produce_identical_solution_streams() {
    let program = "edge(a, b).\nedge(b, c).\nedge(a, d).\npath(X, Y) :- edge(X, Y).\npath(X, Z) :- edge(X, Y), path(Y, Z).\n";
    let queries = [
        "path(a, X).",
        "findall(X-Y, edge(X, Y), L).",
        "setof(X, Y^edge(X, Y), L).",
        "X is 3 * 7 + 1.",
        "catch(throw(boom), E, true).",
    ];

    let run = |query: &str| {
        let mut m = MachineBuilder::default().build();
        m.load_module_string("graph", program).unwrap();
        collect(&mut m, query)
    };

    for query in queries {
        assert_eq!(run(query), run(query), "diverged on {}", query);
    }
}

#[test]
fn solutions_stream_lazily_in_clause_order() {
    let mut m = MachineBuilder::default().build();
    m.load_module_string("facts", "n(1).\nn(2).\nn(3).\n").unwrap();

    let answers = collect(&mut m, "n(X).");
    assert_eq!(
        answers,
        vec![
            Ok(LeafAnswer::from_bindings([("X", Term::integer(1))])),
            Ok(LeafAnswer::from_bindings([("X", Term::integer(2))])),
            Ok(LeafAnswer::from_bindings([("X", Term::integer(3))])),
        ]
    );
}

#[test]
fn once_and_negation() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(
        collect(&mut m, "once(member(X, [1,2,3]))."),
        vec![Ok(LeafAnswer::from_bindings([("X", Term::integer(1))]))]
    );
    assert_eq!(
        collect(&mut m, "\\+ member(4, [1,2,3])."),
        vec![Ok(LeafAnswer::True)]
    );
    assert_eq!(
        collect(&mut m, "\\+ member(2, [1,2,3])."),
        vec![Ok(LeafAnswer::False)]
    );
}

#[test]
fn term_inspection_round_trips() {
    let mut m = MachineBuilder::default().build();

    assert_eq!(
        collect(&mut m, "functor(f(a, b), N, A)."),
        vec![Ok(LeafAnswer::from_bindings([
            ("N", Term::atom("f")),
            ("A", Term::integer(2)),
        ]))]
    );
    assert_eq!(
        one_binding(&mut m, "functor(T, f, 2), functor(T, N, _), N = f, T = f(_, _), X = done.", "X"),
        Term::atom("done")
    );
    assert_eq!(
        one_binding(&mut m, "arg(2, f(a, b, c), X).", "X"),
        Term::atom("b")
    );
    assert_eq!(
        one_binding(&mut m, "f(a, 1) =.. L.", "L"),
        Term::list(vec![Term::atom("f"), Term::atom("a"), Term::integer(1)])
    );
    assert_eq!(
        one_binding(&mut m, "T =.. [g, x], T = g(X).", "X"),
        Term::atom("x")
    );
}

#[test]
fn copy_term_renames_variables() {
    let mut m = MachineBuilder::default().build();

    // the copy unifies with a different instantiation of the original.
    assert_eq!(
        collect(&mut m, "copy_term(f(X, X), f(1, Y)), X = 2."),
        vec![Ok(LeafAnswer::from_bindings([
            ("X", Term::integer(2)),
            ("Y", Term::integer(1)),
        ]))]
    );
}

#[test]
fn placeholders_substitute_into_queries() {
    let mut m = MachineBuilder::default().build();

    let answers: Vec<_> = m
        .run_query_with_placeholders(
            "X = f(?, ?).",
            vec![Term::integer(1), Term::atom("two")],
        )
        .collect();
    assert_eq!(
        answers,
        vec![Ok(LeafAnswer::from_bindings([(
            "X",
            Term::compound("f", [Term::integer(1), Term::atom("two")]),
        )]))]
    );
}

#[test]
fn initialization_directives_run_after_consult() {
    let mut m = MachineBuilder::default().build();
    m.load_module_string(
        "facts",
        ":- dynamic(started/0).\n:- initialization(assertz(started)).\n",
    )
    .unwrap();

    assert_eq!(collect(&mut m, "started."), vec![Ok(LeafAnswer::True)]);
}

#[test]
fn include_resolves_registered_sources() {
    let mut m = MachineBuilder::default().build();
    m.register_source(atom!("lists_extra"), "doubled(X, Y) :- Y is X * 2.".to_owned());

    m.load_module_string("main", ":- include(lists_extra).\n")
        .unwrap();
    assert_eq!(
        one_binding(&mut m, "doubled(21, X).", "X"),
        Term::integer(42)
    );

    // an unregistered source is an existence error.
    let err = m
        .load_module_string("main", ":- include(missing_source).")
        .unwrap_err();
    assert_eq!(
        err.term().arg(0).unwrap().functor(),
        Some(atom!("existence_error"))
    );
}

#[test]
fn discontiguous_clauses_require_the_declaration() {
    let mut m = MachineBuilder::default().build();

    let err = m
        .load_module_string("facts", "a(1).\nb(1).\na(2).\n")
        .unwrap_err();
    assert_eq!(
        err.term().arg(0).unwrap().functor(),
        Some(atom!("permission_error"))
    );

    let mut m = MachineBuilder::default().build();
    m.load_module_string(
        "facts",
        ":- discontiguous(a/1).\na(1).\nb(1).\na(2).\n",
    )
    .unwrap();
    assert_eq!(
        one_binding(&mut m, "findall(X, a(X), L).", "L"),
        Term::list(vec![Term::integer(1), Term::integer(2)])
    );
}

#[test]
fn repeat_provides_unbounded_choice_points() {
    let mut m = MachineBuilder::default().build();
    m.load_module_string(
        "facts",
        ":- dynamic(tick/1).\ntick(0).\nbump :- retract(tick(N)), M is N + 1, assertz(tick(M)).\n",
    )
    .unwrap();

    // repeat retries until the side-effecting counter reaches three.
    assert_eq!(
        collect(&mut m, "repeat, bump, tick(3), !."),
        vec![Ok(LeafAnswer::True)]
    );
}
