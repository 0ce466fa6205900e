use knot_runtime::{Arity, Assembler, CallScope, Config, ErrorKind, Op, Result, Runtime, Value};

fn stack_depth(scope: CallScope<'_>) -> Result<Value> {
    Ok(Value::Fixnum(scope.rt.stack_depth() as i64))
}

fn identity(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(1)?;
    Ok(scope.at(0))
}

#[test]
fn test_add_two_immediates() {
    let mut rt = Runtime::default();
    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.load_i8(1).load_i8(2).op(Op::Add).op(Op::Ret);
    let closure = asm.finish(&mut rt).unwrap();
    assert_eq!(rt.execute(closure, &[]).unwrap(), Value::Fixnum(3));
    assert_eq!(rt.stack_depth(), 0);
}

#[test]
fn test_tail_calls_run_in_constant_frames() {
    let mut rt = Runtime::default();
    let countdown = rt.symbol("countdown");
    let done = rt.intern("done");

    let mut asm = Assembler::new(Arity::Fixed(1));
    let recur = asm.label();
    asm.load_arg(0)
        .op(Op::Load0)
        .op(Op::NumEq)
        .branch_false(recur)
        .load_const(done)
        .op(Op::Ret);
    asm.bind(recur)
        .load_global(countdown)
        .load_arg(0)
        .op(Op::Load1)
        .op(Op::Sub)
        .tail_call(1);
    let closure = asm.finish(&mut rt).unwrap();
    rt.set_global(countdown, closure).unwrap();

    let result = rt.execute(closure, &[Value::Fixnum(100_000)]).unwrap();
    assert_eq!(result, done);
    assert!(rt.max_frame_depth() <= 2);
    assert_eq!(rt.frame_depth(), 0);
}

#[test]
fn test_closure_arity_is_checked() {
    let mut rt = Runtime::default();
    let mut asm = Assembler::new(Arity::Fixed(2));
    asm.load_arg(0).load_arg(1).op(Op::Add).op(Op::Ret);
    let closure = asm.finish(&mut rt).unwrap();
    rt.push(closure).unwrap();

    let args = [Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3)];
    let error = rt.execute(closure, &args).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ArgCountError);
    assert_eq!(rt.stack_depth(), 1);
}

#[test]
fn test_car_of_nil_is_a_type_error() {
    let mut rt = Runtime::default();
    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.op(Op::LoadNil).op(Op::Car).op(Op::Ret);
    let closure = asm.finish(&mut rt).unwrap();
    let error = rt.execute(closure, &[]).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::TypeError);
    assert_eq!(rt.frame_depth(), 0);
}

/// `deep(n)` raises `'boom` after `n` nested, non tail, calls.
fn deep(rt: &mut Runtime) -> Value {
    let deep = rt.symbol("deep");
    let raise = rt.symbol("raise");
    let boom = rt.intern("boom");

    let mut asm = Assembler::new(Arity::Fixed(1));
    let recur = asm.label();
    asm.load_arg(0)
        .op(Op::Load0)
        .op(Op::NumEq)
        .branch_false(recur)
        .load_global(raise)
        .load_const(boom)
        .tail_call(1);
    asm.bind(recur)
        .op(Op::Load1)
        .load_global(deep)
        .load_arg(0)
        .op(Op::Load1)
        .op(Op::Sub)
        .call(1)
        .op(Op::Add)
        .op(Op::Ret);
    let closure = asm.finish(rt).unwrap();
    rt.set_global(deep, closure).unwrap();
    closure
}

/// A thunk calling `deep(depth)`.
fn thunk(rt: &mut Runtime, depth: i8) -> Value {
    let deep = rt.symbol("deep");
    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.load_global(deep).load_i8(depth).call(1).op(Op::Ret);
    asm.finish(rt).unwrap()
}

#[test]
fn test_handler_sees_the_stack_depth_of_its_try() {
    let mut rt = Runtime::default();
    rt.intrinsic("stack-depth", stack_depth).unwrap();
    let stack_depth = rt.symbol("stack-depth");
    deep(&mut rt);
    let body = thunk(&mut rt, 10);
    rt.push(body).unwrap();

    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.load_global(stack_depth)
        .load_i8(0)
        .call(1)
        .load_global(stack_depth)
        .closure(body)
        .op(Op::TryCatch)
        .list(2)
        .op(Op::Ret);
    let main = asm.finish(&mut rt).unwrap();

    let base = rt.stack_depth();
    let result = rt.execute(main, &[]).unwrap();
    let depths = rt.list_to_vec(result).unwrap();
    let (before, in_handler) = (depths[0].as_fixnum().unwrap(), depths[1].as_fixnum().unwrap());
    assert_eq!(in_handler, before + 1);
    assert!(rt.max_frame_depth() >= 12);
    assert_eq!(rt.stack_depth(), base);
    assert_eq!(rt.frame_depth(), 0);
}

#[test]
fn test_handler_receives_the_raised_value() {
    let mut rt = Runtime::default();
    rt.intrinsic("identity", identity).unwrap();
    let identity = rt.symbol("identity");
    deep(&mut rt);
    let body = thunk(&mut rt, 3);
    rt.push(body).unwrap();

    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.load_global(identity).load_const(body).op(Op::TryCatch).op(Op::Ret);
    let main = asm.finish(&mut rt).unwrap();
    assert_eq!(rt.execute(main, &[]).unwrap(), rt.intern("boom"));
}

#[test]
fn test_try_without_error_returns_the_body() {
    let mut rt = Runtime::default();
    rt.intrinsic("identity", identity).unwrap();
    let identity = rt.symbol("identity");

    let mut body = Assembler::new(Arity::Fixed(0));
    body.load_i8(42).op(Op::Ret);
    let body = body.finish(&mut rt).unwrap();
    rt.push(body).unwrap();

    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.load_i8(1)
        .load_global(identity)
        .load_const(body)
        .op(Op::TryCatch)
        .list(2)
        .op(Op::Ret);
    let main = asm.finish(&mut rt).unwrap();
    let result = rt.execute(main, &[]).unwrap();
    assert_eq!(rt.display(result), "(1 42)");
}

#[test]
fn test_nested_handlers() {
    let mut rt = Runtime::default();
    rt.intrinsic("identity", identity).unwrap();
    let identity = rt.symbol("identity");
    let raise = rt.symbol("raise");
    deep(&mut rt);
    let body = thunk(&mut rt, 5);
    rt.push(body).unwrap();

    // Inner handler: raise a list wrapping the condition.
    let mut rethrow = Assembler::new(Arity::Fixed(1));
    rethrow.load_global(raise).load_arg(0).list(1).tail_call(1);
    let rethrow = rethrow.finish(&mut rt).unwrap();
    rt.push(rethrow).unwrap();

    let mut inner = Assembler::new(Arity::Fixed(0));
    inner.load_const(rethrow).load_const(body).op(Op::TryCatch).op(Op::Ret);
    let inner = inner.finish(&mut rt).unwrap();
    rt.push(inner).unwrap();

    let mut outer = Assembler::new(Arity::Fixed(0));
    outer.load_global(identity).load_const(inner).op(Op::TryCatch).op(Op::Ret);
    let outer = outer.finish(&mut rt).unwrap();

    let result = rt.execute(outer, &[]).unwrap();
    assert_eq!(rt.display(result), "(boom)");
}

#[test]
fn test_unhandled_errors_reach_the_host_and_reset_the_vm() {
    let mut rt = Runtime::default();
    deep(&mut rt);
    let body = thunk(&mut rt, 10);
    let error = rt.execute(body, &[]).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::UserError);
    assert_eq!(rt.stack_depth(), 0);
    assert_eq!(rt.frame_depth(), 0);

    // The vm is still usable.
    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.load_i8(5).op(Op::Ret);
    let ok = asm.finish(&mut rt).unwrap();
    assert_eq!(rt.execute(ok, &[]).unwrap(), Value::Fixnum(5));
}

#[test]
fn test_invalid_bytecode_is_not_caught() {
    let mut rt = Runtime::default();
    rt.intrinsic("identity", identity).unwrap();
    let identity = rt.symbol("identity");

    let mut body = Assembler::new(Arity::Fixed(0));
    body.op_u8(Op::LoadV, 200).op(Op::Ret);
    let body = body.finish(&mut rt).unwrap();
    rt.push(body).unwrap();

    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.load_global(identity).load_const(body).op(Op::TryCatch).op(Op::Ret);
    let main = asm.finish(&mut rt).unwrap();
    let error = rt.execute(main, &[]).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidBytecode);
}

#[test]
fn test_variadic_closure_collects_rest() {
    let mut rt = Runtime::default();
    let mut asm = Assembler::new(Arity::Variadic(1));
    asm.load_arg(1).op(Op::Ret);
    let closure = asm.finish(&mut rt).unwrap();
    rt.push(closure).unwrap();

    let rest = rt
        .execute(closure, &[Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3)])
        .unwrap();
    assert_eq!(rt.display(rest), "(2 3)");
    let empty = rt.execute(closure, &[Value::Fixnum(1)]).unwrap();
    assert_eq!(empty, Value::NIL);
    let error = rt.execute(closure, &[]).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ArgCountError);
}

#[test]
fn test_closures_capture_let_environments() {
    let mut rt = Runtime::new(Config::default().with_gc_stress(true)).unwrap();

    let mut inner = Assembler::new(Arity::Fixed(1));
    inner.load_closed(0, 0).load_arg(0).op(Op::Add).op(Op::Ret);
    let inner = inner.finish(&mut rt).unwrap();
    rt.push(inner).unwrap();

    let mut adder = Assembler::new(Arity::Fixed(1));
    adder.load_arg(0).let_env(1).closure(inner).op(Op::Ret);
    let adder = adder.finish(&mut rt).unwrap();
    rt.push(adder).unwrap();

    let add10 = rt.execute(adder, &[Value::Fixnum(10)]).unwrap();
    rt.push(add10).unwrap();
    rt.collect();
    assert_eq!(rt.execute(add10, &[Value::Fixnum(5)]).unwrap(), Value::Fixnum(15));
    rt.verify_heap().unwrap();
}

#[test]
fn test_set_closed_and_close() {
    let mut rt = Runtime::default();
    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.load_i8(1)
        .let_env(1)
        .load_i8(2)
        .let_env(1)
        .load_i8(9)
        .set_closed(1, 0)
        .op(Op::Pop)
        .op(Op::Close)
        .load_closed(0, 0)
        .op(Op::Ret);
    let closure = asm.finish(&mut rt).unwrap();
    assert_eq!(rt.execute(closure, &[]).unwrap(), Value::Fixnum(9));
}

#[test]
fn test_apply_spreads_the_last_argument() {
    let mut rt = Runtime::default();
    let string = rt.symbol("string");
    let prefix = rt.string("a").unwrap();
    rt.push(prefix).unwrap();
    let rest = rt.list(&[Value::Fixnum(1), Value::Fixnum(2)]).unwrap();
    rt.push(rest).unwrap();

    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.load_global(string).load_const(prefix).load_const(rest).apply(2).op(Op::Ret);
    let closure = asm.finish(&mut rt).unwrap();
    let result = rt.execute(closure, &[]).unwrap();
    assert_eq!(rt.string_lossy(result).unwrap(), "a12");
}

#[test]
fn test_for_loop_calls_the_body() {
    let mut rt = Runtime::default();
    let sum = rt.symbol("sum");
    rt.set_global(sum, Value::Fixnum(0)).unwrap();

    let mut body = Assembler::new(Arity::Fixed(1));
    body.load_global(sum).load_arg(0).op(Op::Add).set_global(sum).op(Op::Ret);
    let body = body.finish(&mut rt).unwrap();
    rt.push(body).unwrap();

    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.load_i8(1)
        .load_i8(10)
        .load_const(body)
        .op(Op::For)
        .op(Op::Pop)
        .load_global(sum)
        .op(Op::Ret);
    let closure = asm.finish(&mut rt).unwrap();
    assert_eq!(rt.execute(closure, &[]).unwrap(), Value::Fixnum(55));
}

#[test]
fn test_eval_instruction() {
    let mut rt = Runtime::default();
    let length = rt.intern("length");
    let quote = rt.intern("quote");
    let items = rt.list(&[Value::T, Value::T, Value::T]).unwrap();
    rt.push(items).unwrap();
    let quoted = rt.list(&[quote, items]).unwrap();
    rt.push(quoted).unwrap();
    let form = rt.list(&[length, quoted]).unwrap();
    rt.push(form).unwrap();

    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.load_const(form).op(Op::Eval).op(Op::Ret);
    let closure = asm.finish(&mut rt).unwrap();
    assert_eq!(rt.execute(closure, &[]).unwrap(), Value::Fixnum(3));
}

#[test]
fn test_vector_access_and_bounds() {
    let mut rt = Runtime::default();
    let mut asm = Assembler::new(Arity::Fixed(1));
    asm.load_i8(1)
        .load_i8(2)
        .load_i8(3)
        .vector(3)
        .load_arg(0)
        .op(Op::Aref)
        .op(Op::Ret);
    let closure = asm.finish(&mut rt).unwrap();
    rt.push(closure).unwrap();

    assert_eq!(rt.execute(closure, &[Value::Fixnum(2)]).unwrap(), Value::Fixnum(3));
    for index in [3, 4] {
        let error = rt.execute(closure, &[Value::Fixnum(index)]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::BoundsError);
    }
}

#[test]
fn test_string_aref_bounds() {
    let mut rt = Runtime::default();
    let mut asm = Assembler::new(Arity::Fixed(2));
    asm.load_arg(0).load_arg(1).op(Op::Aref).op(Op::Ret);
    let closure = asm.finish(&mut rt).unwrap();
    rt.push(closure).unwrap();
    let s = rt.string("abc").unwrap();
    rt.push(s).unwrap();

    let c = rt.execute(closure, &[s, Value::Fixnum(0)]).unwrap();
    assert_eq!(rt.display(c), "97");
    for index in [3, 4] {
        let error = rt.execute(closure, &[s, Value::Fixnum(index)]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::BoundsError);
    }
}

#[test]
fn test_mutating_pairs() {
    let mut rt = Runtime::default();
    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.load_i8(1)
        .load_i8(2)
        .op(Op::Cons)
        .op(Op::Dup)
        .load_i8(7)
        .op(Op::SetCdr)
        .op(Op::Pop)
        .op(Op::Ret);
    let closure = asm.finish(&mut rt).unwrap();
    let pair = rt.execute(closure, &[]).unwrap();
    assert_eq!(rt.display(pair), "(1 . 7)");
}

#[test]
fn test_arithmetic_edges() {
    let mut rt = Runtime::default();
    let mut asm = Assembler::new(Arity::Fixed(2));
    asm.load_arg(0).load_arg(1).op(Op::Div).op(Op::Ret);
    let divide = asm.finish(&mut rt).unwrap();
    rt.push(divide).unwrap();

    assert_eq!(
        rt.execute(divide, &[Value::Fixnum(6), Value::Fixnum(3)]).unwrap(),
        Value::Fixnum(2)
    );
    let half = rt.execute(divide, &[Value::Fixnum(7), Value::Fixnum(2)]).unwrap();
    assert_eq!(rt.display(half), "3.5");
    let error = rt.execute(divide, &[Value::Fixnum(1), Value::Fixnum(0)]).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::DivideByZero);
    let error = rt.execute(divide, &[Value::T, Value::Fixnum(1)]).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::TypeError);

    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.load_const(Value::Fixnum(knot_runtime::value::FIXNUM_MAX))
        .op(Op::Load1)
        .op(Op::Add)
        .op(Op::Ret);
    let overflow = asm.finish(&mut rt).unwrap();
    let big = rt.execute(overflow, &[]).unwrap();
    assert!(big.is_cvalue());
    assert_eq!(rt.display(big), (knot_runtime::value::FIXNUM_MAX as i128 + 1).to_string());
}

#[test]
fn test_predicates_and_comparison() {
    let mut rt = Runtime::default();
    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.op(Op::LoadNil)
        .op(Op::Nullp)
        .op(Op::Load0)
        .op(Op::Not)
        .load_i8(3)
        .load_i8(4)
        .op(Op::Lt)
        .load_i8(4)
        .load_i8(3)
        .op(Op::Compare)
        .list(4)
        .op(Op::Ret);
    let closure = asm.finish(&mut rt).unwrap();
    let result = rt.execute(closure, &[]).unwrap();
    assert_eq!(rt.display(result), "(#t #f #t 1)");
}

#[test]
fn test_globals() {
    let mut rt = Runtime::default();
    let missing = rt.symbol("missing");
    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.load_global(missing).op(Op::Ret);
    let closure = asm.finish(&mut rt).unwrap();
    let error = rt.execute(closure, &[]).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::UnboundError);

    let constant = rt.symbol("*string-type*");
    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.op(Op::LoadT).set_global(constant).op(Op::Ret);
    let closure = asm.finish(&mut rt).unwrap();
    let error = rt.execute(closure, &[]).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::TypeError);
}

#[test]
fn test_stack_overflow_is_recoverable() {
    let mut rt = Runtime::new(Config::default().with_max_stack(1 << 12)).unwrap();
    let forever = rt.symbol("forever");
    let mut asm = Assembler::new(Arity::Fixed(0));
    asm.load_global(forever).call(0).op(Op::Ret);
    let closure = asm.finish(&mut rt).unwrap();
    rt.set_global(forever, closure).unwrap();

    let error = rt.execute(closure, &[]).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::OutOfMemory);
    assert_eq!(rt.stack_depth(), 0);
    assert_eq!(rt.frame_depth(), 0);
}

#[test]
fn test_builtins_are_first_class() {
    let mut rt = Runtime::default();
    let length = rt.intern("length");
    let function = rt.eval(length).unwrap();
    assert!(function.is_builtin());
    let items = rt.list(&[Value::T]).unwrap();
    assert_eq!(rt.apply(function, &[items]).unwrap(), Value::Fixnum(1));
    assert_eq!(rt.display(function), "#<builtin length>");
}
