//! Benchmarks for the compilation pipeline.
//!
//! - Dominator tree and frontier construction over a chain of loops
//! - Full compilation under the default and minimal configurations
//! - Execution of the compiled loop

extern crate ssajit;

use criterion::{criterion_group, criterion_main, Criterion};
use ssajit::{
    analysis::DominatorTree,
    compile_function,
    ir::{AluOp, Expr, Function, FunctionBuilder},
    Config, PrimitiveRuntime, Value,
};
use std::hint::black_box;

/// `loops` consecutive counting loops over one accumulator.
fn nested_sums(loops: usize) -> Function {
    let mut b = FunctionBuilder::new("sums");
    let n = b.formal("n");
    let r = b.local("r");
    b.switch_to(b.entry());
    b.mov(r.clone(), Expr::int(0));

    for k in 0..loops {
        let i = b.local(format!("i{k}"));
        let (header, body, exit) = (b.block(), b.block(), b.block());
        b.mov(i.clone(), Expr::int(0));
        b.jump(header);
        b.switch_to(header);
        b.cjump(Expr::binop(AluOp::Lt, i.clone(), n.clone()), body, exit);
        b.switch_to(body);
        b.mov(r.clone(), Expr::binop(AluOp::Add, r.clone(), i.clone()));
        b.mov(i.clone(), Expr::binop(AluOp::Add, i, Expr::int(1)));
        b.jump(header);
        b.switch_to(exit);
    }
    b.ret(r);
    b.finish().unwrap()
}

fn bench_dominators(c: &mut Criterion) {
    let function = nested_sums(16);

    c.bench_function("dominators_16_loops", |b| {
        b.iter(|| {
            let mut tree = DominatorTree::new(black_box(&function));
            tree.compute_frontiers(&function);
            black_box(tree)
        });
    });
}

fn bench_compile_default(c: &mut Criterion) {
    let function = nested_sums(8);
    let config = Config::default();

    c.bench_function("compile_8_loops_default", |b| {
        b.iter(|| black_box(compile_function(black_box(function.clone()), &config).unwrap()));
    });
}

fn bench_compile_minimal(c: &mut Criterion) {
    let function = nested_sums(8);
    let config = Config::minimal();

    c.bench_function("compile_8_loops_minimal", |b| {
        b.iter(|| black_box(compile_function(black_box(function.clone()), &config).unwrap()));
    });
}

fn bench_execute(c: &mut Criterion) {
    let compiled = compile_function(nested_sums(4), &Config::default()).unwrap();
    let mut runtime = PrimitiveRuntime::new();

    c.bench_function("execute_4_loops_n100", |b| {
        b.iter(|| black_box(compiled.call(&mut runtime, &[Value::Int(black_box(100))]).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_dominators,
    bench_compile_default,
    bench_compile_minimal,
    bench_execute
);
criterion_main!(benches);
