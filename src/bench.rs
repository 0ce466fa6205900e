//! Small bytecode programs built with the assembler, used to exercise the vm and
//! the collector from the command line.

use knot_runtime::{Arity, Assembler, HeapStats, Op, Result, Runtime, Value};

use crate::cli::Program;

#[derive(Debug)]
pub struct Report {
    pub result: String,
    pub max_frames: usize,
    pub heap: HeapStats,
}

pub fn run(rt: &mut Runtime, program: Program) -> Result<Report> {
    let result = match program {
        Program::Loop { depth } => countdown(rt, depth)?,
        Program::Churn { rounds } => churn(rt, rounds)?,
    };
    Ok(Report {
        result: rt.display(result),
        max_frames: rt.max_frame_depth(),
        heap: rt.heap_stats(),
    })
}

/// `(define (countdown n) (if (= n 0) 'done (countdown (- n 1))))`
pub fn countdown(rt: &mut Runtime, depth: i64) -> Result<Value> {
    let symbol = rt.symbol("countdown");
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
        .load_global(symbol)
        .load_arg(0)
        .op(Op::Load1)
        .op(Op::Sub)
        .tail_call(1);
    let closure = asm.finish(rt)?;
    rt.set_global(symbol, closure)?;

    tracing::info!(depth, "running countdown");
    rt.execute(closure, &[Value::Fixnum(depth)])
}

/// Builds a ten element list per round and keeps only the last one alive.
pub fn churn(rt: &mut Runtime, rounds: i64) -> Result<Value> {
    let mut body = Assembler::new(Arity::Fixed(1));
    for _ in 0..10 {
        body.load_arg(0);
    }
    body.list(10).op(Op::Ret);
    let body = body.finish(rt)?;
    rt.push(body)?;

    let mut last = Value::NIL;
    for round in 0..rounds {
        last = rt.execute(body, &[Value::Fixnum(round)])?;
    }
    rt.pop();

    tracing::info!(rounds, "churn finished");
    Ok(last)
}

#[cfg(test)]
mod tests {
    use knot_runtime::Config;

    use super::*;

    #[test]
    fn test_countdown_stays_flat() {
        let mut rt = Runtime::default();
        let report = run(&mut rt, Program::Loop { depth: 100_000 }).unwrap();
        assert_eq!(report.result, "done");
        assert!(report.max_frames <= 2);
    }

    #[test]
    fn test_churn_collects() {
        let mut rt = Runtime::new(Config::default().with_heap_words(256)).unwrap();
        let report = run(&mut rt, Program::Churn { rounds: 200 }).unwrap();
        assert_eq!(report.result, "(199 199 199 199 199 199 199 199 199 199)");
        assert!(report.heap.collections > 0);
    }
}
