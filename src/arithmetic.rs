use std::cmp::Ordering;
use std::fmt;

use dec::{Context, Decimal128, Status};

use crate::atom_table::*;
use crate::machine::bindings::Env;
use crate::machine::term::Term;

/// A prolog floating-point number.
///
/// The underlying representation is not binary floating-point: it is a
/// decimal128 value (34 significant digits, exponent range ±6143) evaluated
/// under a fixed decimal context, so results are bit-identical across
/// platforms. Exceptional conditions are trapped and surface as
/// `evaluation_error/1` terms.
#[derive(Copy, Clone, Debug)]
pub struct Float(Decimal128);

/// An exceptional value produced by an evaluable functor.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ExceptionalValue {
    FloatOverflow,
    IntOverflow,
    Underflow,
    ZeroDivisor,
    Undefined,
}

impl ExceptionalValue {
    pub fn as_atom(self) -> Atom {
        match self {
            ExceptionalValue::FloatOverflow => atom!("float_overflow"),
            ExceptionalValue::IntOverflow => atom!("int_overflow"),
            ExceptionalValue::Underflow => atom!("underflow"),
            ExceptionalValue::ZeroDivisor => atom!("zero_divisor"),
            ExceptionalValue::Undefined => atom!("undefined"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ArithmeticError {
    Uninstantiated,
    /// The functor is not evaluable, e.g. `foo/1`.
    NonEvaluable(Atom, usize),
    /// A known integer-only operator was given this non-integer operand.
    IntegerExpected(Term),
    Exceptional(ExceptionalValue),
}

impl From<ExceptionalValue> for ArithmeticError {
    fn from(ev: ExceptionalValue) -> Self {
        ArithmeticError::Exceptional(ev)
    }
}

fn context() -> Context<Decimal128> {
    // decimal128: 34 digits of precision, exponents in [-6143, 6144].
    Context::<Decimal128>::default()
}

/// Maps trapped decimal conditions to the exceptional value they signal.
fn check(status: Status, result: Decimal128) -> Result<Decimal128, ExceptionalValue> {
    if status.overflow() {
        Err(ExceptionalValue::FloatOverflow)
    } else if status.underflow() || status.subnormal() {
        Err(ExceptionalValue::Underflow)
    } else if status.division_by_zero() {
        Err(ExceptionalValue::ZeroDivisor)
    } else if status.invalid_operation() || result.is_nan() {
        Err(ExceptionalValue::Undefined)
    } else {
        Ok(result)
    }
}

impl Float {
    pub fn parse(s: &str) -> Result<Float, ExceptionalValue> {
        let mut cx = context();
        let dec = cx
            .parse(s)
            .map_err(|_| ExceptionalValue::Undefined)?;
        check(cx.status(), dec).map(Float)
    }

    pub fn from_i64(i: i64) -> Float {
        // every i64 has at most 19 digits, well within the 34-digit context.
        Float::parse(&i.to_string()).expect("i64 is exactly representable")
    }

    pub fn cmp(&self, other: &Float) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }

    pub fn eq_value(&self, other: &Float) -> bool {
        self.cmp(other) == Ordering::Equal
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative() && !self.0.is_zero()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// The additive inverse; negation cannot trip the context.
    pub fn negated(&self) -> Float {
        let mut cx = context();
        let zero = cx.parse("0").expect("0 parses");
        Float(cx.sub(zero, self.0))
    }

    /// Converts to an integer after rounding under the given rounding mode,
    /// failing with `int_overflow` when the value does not fit an `i64`.
    fn to_i64_rounded(&self, rounding: dec::Rounding) -> Result<i64, ExceptionalValue> {
        let mut cx = context();
        cx.set_rounding(rounding);

        let one = cx.parse("1").expect("1 parses");
        let q = cx.quantize(self.0, one);

        if cx.status().invalid_operation() {
            // too many digits to renormalize at exponent 0.
            return Err(ExceptionalValue::IntOverflow);
        }

        q.to_string()
            .parse::<i64>()
            .map_err(|_| ExceptionalValue::IntOverflow)
    }
}

impl PartialEq for Float {
    fn eq(&self, other: &Float) -> bool {
        self.eq_value(other)
    }
}

impl fmt::Display for Float {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut s = self.0.to_string().to_ascii_lowercase();

        // always render a decimal point so the token reads back as a float.
        if !s.contains('.') {
            if let Some(epos) = s.find('e') {
                s.insert_str(epos, ".0");
            } else {
                s.push_str(".0");
            }
        }

        f.write_str(&s)
    }
}

/// The result of evaluating an arithmetic expression.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Number {
    Integer(i64),
    Float(Float),
}

impl Number {
    pub fn into_term(self) -> Term {
        match self {
            Number::Integer(i) => Term::Integer(i),
            Number::Float(f) => Term::Float(f),
        }
    }

    fn to_float(self) -> Float {
        match self {
            Number::Integer(i) => Float::from_i64(i),
            Number::Float(f) => f,
        }
    }
}

fn dec_binary(
    op: impl FnOnce(&mut Context<Decimal128>, Decimal128, Decimal128) -> Decimal128,
    a: Float,
    b: Float,
) -> Result<Number, ArithmeticError> {
    let mut cx = context();
    let r = op(&mut cx, a.0, b.0);
    Ok(Number::Float(Float(check(cx.status(), r)?)))
}

fn int_binary(
    op: impl FnOnce(i64, i64) -> Option<i64>,
    a: i64,
    b: i64,
) -> Result<Number, ArithmeticError> {
    op(a, b)
        .map(Number::Integer)
        .ok_or_else(|| ExceptionalValue::IntOverflow.into())
}

fn add(a: Number, b: Number) -> Result<Number, ArithmeticError> {
    match (a, b) {
        (Number::Integer(a), Number::Integer(b)) => int_binary(i64::checked_add, a, b),
        _ => dec_binary(|cx, a, b| cx.add(a, b), a.to_float(), b.to_float()),
    }
}

fn sub(a: Number, b: Number) -> Result<Number, ArithmeticError> {
    match (a, b) {
        (Number::Integer(a), Number::Integer(b)) => int_binary(i64::checked_sub, a, b),
        _ => dec_binary(|cx, a, b| cx.sub(a, b), a.to_float(), b.to_float()),
    }
}

fn mul(a: Number, b: Number) -> Result<Number, ArithmeticError> {
    match (a, b) {
        (Number::Integer(a), Number::Integer(b)) => int_binary(i64::checked_mul, a, b),
        _ => dec_binary(|cx, a, b| cx.mul(a, b), a.to_float(), b.to_float()),
    }
}

/// `/` always divides in the decimal context, whatever the operand kinds;
/// a zero divisor is trapped by the context.
fn div(a: Number, b: Number) -> Result<Number, ArithmeticError> {
    dec_binary(|cx, a, b| cx.div(a, b), a.to_float(), b.to_float())
}

/// The first operand that is not an integer, as the culprit of a
/// `type_error(integer, ...)`.
fn integer_expected(a: Number, b: Number) -> ArithmeticError {
    let culprit = match a {
        Number::Integer(_) => b,
        _ => a,
    };
    ArithmeticError::IntegerExpected(culprit.into_term())
}

fn int_div(a: Number, b: Number) -> Result<Number, ArithmeticError> {
    match (a, b) {
        (Number::Integer(_), Number::Integer(0)) => Err(ExceptionalValue::ZeroDivisor.into()),
        (Number::Integer(x), Number::Integer(y)) => int_binary(i64::checked_div, x, y),
        _ => Err(integer_expected(a, b)),
    }
}

fn floored_div(a: Number, b: Number) -> Result<Number, ArithmeticError> {
    match (a, b) {
        (Number::Integer(_), Number::Integer(0)) => Err(ExceptionalValue::ZeroDivisor.into()),
        (Number::Integer(x), Number::Integer(y)) => int_binary(i64::checked_div_euclid, x, y),
        _ => Err(integer_expected(a, b)),
    }
}

fn modulo(a: Number, b: Number) -> Result<Number, ArithmeticError> {
    match (a, b) {
        (Number::Integer(_), Number::Integer(0)) => Err(ExceptionalValue::ZeroDivisor.into()),
        (Number::Integer(x), Number::Integer(y)) => {
            // result takes the sign of the divisor.
            int_binary(i64::checked_rem_euclid, x, y).map(|m| match m {
                Number::Integer(m) if m != 0 && y < 0 => Number::Integer(m + y),
                m => m,
            })
        }
        _ => Err(integer_expected(a, b)),
    }
}

fn remainder(a: Number, b: Number) -> Result<Number, ArithmeticError> {
    match (a, b) {
        (Number::Integer(_), Number::Integer(0)) => Err(ExceptionalValue::ZeroDivisor.into()),
        (Number::Integer(x), Number::Integer(y)) => int_binary(i64::checked_rem, x, y),
        _ => Err(integer_expected(a, b)),
    }
}

fn power(a: Number, b: Number) -> Result<Number, ArithmeticError> {
    match (a, b) {
        (Number::Integer(x), Number::Integer(y)) => {
            if y < 0 {
                return match x {
                    1 => Ok(Number::Integer(1)),
                    -1 => Ok(Number::Integer(if y % 2 == 0 { 1 } else { -1 })),
                    _ => Err(ExceptionalValue::Undefined.into()),
                };
            }
            let exp = u32::try_from(y).map_err(|_| ExceptionalValue::IntOverflow)?;
            int_binary(|x, _| x.checked_pow(exp), x, 0)
        }
        _ => Err(integer_expected(a, b)),
    }
}

fn neg(a: Number) -> Result<Number, ArithmeticError> {
    match a {
        Number::Integer(i) => int_binary(|i, _| i.checked_neg(), i, 0),
        Number::Float(f) => dec_binary(|cx, a, b| cx.sub(a, b), Float::from_i64(0), f),
    }
}

fn abs(a: Number) -> Result<Number, ArithmeticError> {
    match a {
        Number::Integer(i) => int_binary(|i, _| i.checked_abs(), i, 0),
        Number::Float(f) => {
            let mut cx = context();
            let r = cx.abs(f.0);
            check(cx.status(), r)
                .map(|d| Number::Float(Float(d)))
                .map_err(ArithmeticError::from)
        }
    }
}

fn sign(a: Number) -> Result<Number, ArithmeticError> {
    Ok(match a {
        Number::Integer(i) => Number::Integer(i.signum()),
        Number::Float(f) => Number::Float(Float::from_i64(if f.is_zero() {
            0
        } else if f.is_negative() {
            -1
        } else {
            1
        })),
    })
}

fn min(a: Number, b: Number) -> Result<Number, ArithmeticError> {
    Ok(if compare_numbers(a, b) == Ordering::Greater {
        b
    } else {
        a
    })
}

fn max(a: Number, b: Number) -> Result<Number, ArithmeticError> {
    Ok(if compare_numbers(a, b) == Ordering::Less {
        b
    } else {
        a
    })
}

fn to_integer(a: Number, rounding: dec::Rounding) -> Result<Number, ArithmeticError> {
    match a {
        Number::Integer(_) => Ok(a),
        Number::Float(f) => f
            .to_i64_rounded(rounding)
            .map(Number::Integer)
            .map_err(ArithmeticError::from),
    }
}

fn bit_and(a: Number, b: Number) -> Result<Number, ArithmeticError> {
    match (a, b) {
        (Number::Integer(x), Number::Integer(y)) => Ok(Number::Integer(x & y)),
        _ => Err(integer_expected(a, b)),
    }
}

fn bit_or(a: Number, b: Number) -> Result<Number, ArithmeticError> {
    match (a, b) {
        (Number::Integer(x), Number::Integer(y)) => Ok(Number::Integer(x | y)),
        _ => Err(integer_expected(a, b)),
    }
}

fn bit_xor(a: Number, b: Number) -> Result<Number, ArithmeticError> {
    match (a, b) {
        (Number::Integer(x), Number::Integer(y)) => Ok(Number::Integer(x ^ y)),
        _ => Err(integer_expected(a, b)),
    }
}

fn bit_not(a: Number) -> Result<Number, ArithmeticError> {
    match a {
        Number::Integer(x) => Ok(Number::Integer(!x)),
        _ => Err(ArithmeticError::IntegerExpected(a.into_term())),
    }
}

fn shift_left(a: Number, b: Number) -> Result<Number, ArithmeticError> {
    match (a, b) {
        (Number::Integer(x), Number::Integer(y)) => {
            let shift = u32::try_from(y).map_err(|_| ExceptionalValue::Undefined)?;
            x.checked_shl(shift)
                .map(Number::Integer)
                .ok_or_else(|| ExceptionalValue::IntOverflow.into())
        }
        _ => Err(integer_expected(a, b)),
    }
}

fn shift_right(a: Number, b: Number) -> Result<Number, ArithmeticError> {
    match (a, b) {
        (Number::Integer(x), Number::Integer(y)) => {
            let shift = u32::try_from(y).map_err(|_| ExceptionalValue::Undefined)?;
            x.checked_shr(shift)
                .map(Number::Integer)
                .ok_or_else(|| ExceptionalValue::Undefined.into())
        }
        _ => Err(integer_expected(a, b)),
    }
}

/// Compares two numbers arithmetically, promoting mixed operands to the
/// decimal context.
pub fn compare_numbers(a: Number, b: Number) -> Ordering {
    match (a, b) {
        (Number::Integer(x), Number::Integer(y)) => x.cmp(&y),
        _ => a.to_float().cmp(&b.to_float()),
    }
}

/// Evaluates an arithmetic expression under `env`.
pub fn eval(t: &Term, env: &Env) -> Result<Number, ArithmeticError> {
    let t = env.resolve(t);

    match &t {
        Term::Variable(_) => Err(ArithmeticError::Uninstantiated),
        Term::Integer(i) => Ok(Number::Integer(*i)),
        Term::Float(f) => Ok(Number::Float(*f)),
        Term::Atom(a) => Err(ArithmeticError::NonEvaluable(*a, 0)),
        _ if t.is_compound() => {
            let name = t.functor().expect("compound");
            let arity = t.arity();

            let unary = |op: fn(Number) -> Result<Number, ArithmeticError>| {
                op(eval(&t.arg(0).expect("arity >= 1"), env)?)
            };
            let binary = |op: fn(Number, Number) -> Result<Number, ArithmeticError>| {
                let a = eval(&t.arg(0).expect("arity >= 2"), env)?;
                let b = eval(&t.arg(1).expect("arity >= 2"), env)?;
                op(a, b)
            };

            match (name.as_str(), arity) {
                ("+", 2) => binary(add),
                ("-", 2) => binary(sub),
                ("*", 2) => binary(mul),
                ("/", 2) => binary(div),
                ("//", 2) => binary(int_div),
                ("div", 2) => binary(floored_div),
                ("mod", 2) => binary(modulo),
                ("rem", 2) => binary(remainder),
                ("^", 2) => binary(power),
                ("min", 2) => binary(min),
                ("max", 2) => binary(max),
                ("/\\", 2) => binary(bit_and),
                ("\\/", 2) => binary(bit_or),
                ("xor", 2) => binary(bit_xor),
                ("<<", 2) => binary(shift_left),
                (">>", 2) => binary(shift_right),
                ("-", 1) => unary(neg),
                ("+", 1) => unary(|n| Ok(n)),
                ("abs", 1) => unary(abs),
                ("sign", 1) => unary(sign),
                ("\\", 1) => unary(bit_not),
                ("truncate", 1) => unary(|n| to_integer(n, dec::Rounding::Down)),
                ("round", 1) => unary(|n| to_integer(n, dec::Rounding::HalfUp)),
                ("floor", 1) => unary(|n| to_integer(n, dec::Rounding::Floor)),
                ("ceiling", 1) => unary(|n| to_integer(n, dec::Rounding::Ceiling)),
                ("integer", 1) => unary(|n| to_integer(n, dec::Rounding::HalfUp)),
                ("float", 1) => unary(|n| Ok(Number::Float(n.to_float()))),
                _ => Err(ArithmeticError::NonEvaluable(name, arity)),
            }
        }
        _ => Err(ArithmeticError::NonEvaluable(
            t.functor().unwrap_or_else(|| atom!("dict")),
            t.arity(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_str_int(expr: &Term) -> i64 {
        match eval(expr, &Env::new()).unwrap() {
            Number::Integer(i) => i,
            n => panic!("expected an integer, got {:?}", n),
        }
    }

    #[test]
    fn integer_arithmetic() {
        let t = atom!("+").apply(vec![
            Term::Integer(1),
            atom!("*").apply(vec![Term::Integer(2), Term::Integer(3)]),
        ]);
        assert_eq!(eval_str_int(&t), 7);

        let t = atom!("//").apply(vec![Term::Integer(-7), Term::Integer(2)]);
        assert_eq!(eval_str_int(&t), -3); // toward zero

        let t = atom!("mod").apply(vec![Term::Integer(-7), Term::Integer(2)]);
        assert_eq!(eval_str_int(&t), 1); // sign of the divisor

        let t = atom!("mod").apply(vec![Term::Integer(7), Term::Integer(-2)]);
        assert_eq!(eval_str_int(&t), -1);

        let t = atom!("rem").apply(vec![Term::Integer(-7), Term::Integer(2)]);
        assert_eq!(eval_str_int(&t), -1);
    }

    #[test]
    fn integer_overflow_is_trapped() {
        let t = atom!("+").apply(vec![Term::Integer(i64::MAX), Term::Integer(1)]);
        assert_eq!(
            eval(&t, &Env::new()),
            Err(ArithmeticError::Exceptional(ExceptionalValue::IntOverflow))
        );

        let t = atom!("-").apply(vec![Term::Integer(i64::MIN)]);
        assert_eq!(
            eval(&t, &Env::new()),
            Err(ArithmeticError::Exceptional(ExceptionalValue::IntOverflow))
        );
    }

    #[test]
    fn zero_divisor_is_trapped() {
        for op in ["/", "//", "mod", "rem"] {
            let t = atom!(op).apply(vec![Term::Integer(1), Term::Integer(0)]);
            assert_eq!(
                eval(&t, &Env::new()),
                Err(ArithmeticError::Exceptional(ExceptionalValue::ZeroDivisor)),
                "op {}",
                op
            );
        }
    }

    #[test]
    fn division_always_yields_a_float() {
        // even an exact integer quotient divides in the decimal context.
        let t = atom!("/").apply(vec![Term::Integer(6), Term::Integer(3)]);
        match eval(&t, &Env::new()).unwrap() {
            Number::Float(f) => assert!(f.eq_value(&Float::parse("2").unwrap())),
            n => panic!("expected a float, got {:?}", n),
        }

        let t = atom!("/").apply(vec![Term::Integer(7), Term::Integer(2)]);
        match eval(&t, &Env::new()).unwrap() {
            Number::Float(f) => assert!(f.eq_value(&Float::parse("3.5").unwrap())),
            n => panic!("expected a float, got {:?}", n),
        }
    }

    #[test]
    fn integer_operators_reject_non_integer_operands() {
        let half = Term::Float(Float::parse("1.5").unwrap());

        for op in ["//", "div", "mod", "rem", "^", "/\\", "\\/", "xor", "<<", ">>"] {
            let t = atom!(op).apply(vec![half.clone(), Term::Integer(2)]);
            assert_eq!(
                eval(&t, &Env::new()),
                Err(ArithmeticError::IntegerExpected(half.clone())),
                "op {}",
                op
            );

            // the culprit is the offending operand, not the first one.
            let t = atom!(op).apply(vec![Term::Integer(2), half.clone()]);
            assert_eq!(
                eval(&t, &Env::new()),
                Err(ArithmeticError::IntegerExpected(half.clone())),
                "op {}",
                op
            );
        }

        let t = atom!("\\").apply(vec![half.clone()]);
        assert_eq!(
            eval(&t, &Env::new()),
            Err(ArithmeticError::IntegerExpected(half))
        );
    }

    #[test]
    fn decimal_overflow_is_trapped() {
        assert_eq!(
            Float::parse("1.0e40000"),
            Err(ExceptionalValue::FloatOverflow)
        );

        let big = Float::parse("9e6144").unwrap_or_else(|_| Float::parse("9e6100").unwrap());
        let t = atom!("*").apply(vec![Term::Float(big), Term::Float(big)]);
        assert_eq!(
            eval(&t, &Env::new()),
            Err(ArithmeticError::Exceptional(
                ExceptionalValue::FloatOverflow
            ))
        );
    }

    #[test]
    fn decimal_results_are_exact_in_context() {
        // 0.1 + 0.2 is exactly 0.3 in decimal, unlike binary floats.
        let t = atom!("+").apply(vec![
            Term::Float(Float::parse("0.1").unwrap()),
            Term::Float(Float::parse("0.2").unwrap()),
        ]);
        match eval(&t, &Env::new()).unwrap() {
            Number::Float(f) => assert!(f.eq_value(&Float::parse("0.3").unwrap())),
            n => panic!("expected a float, got {:?}", n),
        }
    }

    #[test]
    fn rounding_functions() {
        let f = |s: &str| Term::Float(Float::parse(s).unwrap());

        assert_eq!(eval_str_int(&atom!("floor").apply(vec![f("1.7")])), 1);
        assert_eq!(eval_str_int(&atom!("floor").apply(vec![f("-1.2")])), -2);
        assert_eq!(eval_str_int(&atom!("ceiling").apply(vec![f("1.2")])), 2);
        assert_eq!(eval_str_int(&atom!("truncate").apply(vec![f("-1.7")])), -1);
        assert_eq!(eval_str_int(&atom!("round").apply(vec![f("1.5")])), 2);
    }

    #[test]
    fn non_evaluable_functors_are_reported() {
        let t = atom!("foo").apply(vec![Term::Integer(1)]);
        assert_eq!(
            eval(&t, &Env::new()),
            Err(ArithmeticError::NonEvaluable(atom!("foo"), 1))
        );

        assert_eq!(
            eval(&Term::Variable(crate::machine::term::Variable(9)), &Env::new()),
            Err(ArithmeticError::Uninstantiated)
        );
    }

    #[test]
    fn float_display_keeps_a_decimal_point() {
        assert_eq!(Float::parse("1").unwrap().to_string(), "1.0");
        assert_eq!(Float::parse("2.5").unwrap().to_string(), "2.5");

        let s = Float::parse("1e20").unwrap().to_string();
        assert!(s.contains('.'), "{} should contain a decimal point", s);
        assert!(s.contains('e'), "{} should be in exponent form", s);
    }
}
