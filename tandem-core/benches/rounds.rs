//! Round throughput benchmarks.
//!
//! Measures how long it takes a pipeline to complete a fixed number of
//! rounds, which is dominated by trigger signaling between node tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use futures_util::future::{BoxFuture, FutureExt};

use tandem_core::{Module, ModuleResult, Pipeline, RelationStore, Result, RoundContext};

const ROUNDS: u64 = 200;

/// Copies its input to its output; the first stage has no input.
struct Stage {
    input: Option<String>,
    output: String,
}

impl Module for Stage {
    fn name(&self) -> &str {
        &self.output
    }

    fn declare(&mut self, relations: &mut RelationStore) -> Result<()> {
        if let Some(input) = &self.input {
            relations.require(input.as_str())?;
        }
        relations.provide(self.output.as_str(), 0)?;
        Ok(())
    }

    fn execute<'a>(&'a mut self, ctx: &'a mut RoundContext<'_>) -> BoxFuture<'a, ModuleResult> {
        async move {
            let value = match &self.input {
                Some(input) => ctx.get_as::<u64>(input)? + 1,
                None => ctx.round(),
            };
            ctx.set(&self.output, value)?;
            Ok(())
        }
        .boxed()
    }
}

/// Counts completed rounds of the last stage.
struct Sink {
    input: String,
    rounds: Arc<AtomicU64>,
}

impl Module for Sink {
    fn declare(&mut self, relations: &mut RelationStore) -> Result<()> {
        relations.require(self.input.as_str())?;
        Ok(())
    }

    fn execute<'a>(&'a mut self, _ctx: &'a mut RoundContext<'_>) -> BoxFuture<'a, ModuleResult> {
        self.rounds.fetch_add(1, Ordering::Release);
        async { Ok(()) }.boxed()
    }
}

fn chain(length: usize, rounds: &Arc<AtomicU64>) -> Vec<Box<dyn Module>> {
    let mut modules: Vec<Box<dyn Module>> = (0..length)
        .map(|i| {
            Box::new(Stage {
                input: (i > 0).then(|| format!("s{}", i - 1)),
                output: format!("s{i}"),
            }) as Box<dyn Module>
        })
        .collect();
    modules.push(Box::new(Sink {
        input: format!("s{}", length - 1),
        rounds: Arc::clone(rounds),
    }));
    modules
}

async fn run_rounds(length: usize) {
    let rounds = Arc::new(AtomicU64::new(0));
    let pipeline = Pipeline::start(chain(length, &rounds)).unwrap();
    let handle = pipeline.stop_handle();
    let run = tokio::spawn(pipeline.run());

    while rounds.load(Ordering::Acquire) < ROUNDS {
        tokio::task::yield_now().await;
    }
    handle.stop().await;
    run.await.unwrap().unwrap();
}

fn bench_chain_rounds(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    let mut group = c.benchmark_group("chain_rounds");
    group.sample_size(20);
    for length in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(length), &length, |b, &length| {
            b.to_async(&runtime).iter(|| run_rounds(length));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chain_rounds);
criterion_main!(benches);
