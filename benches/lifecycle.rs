use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use rulebloom::{
    CandidateRule, Condition, ConfidenceTier, Observation, Outcome, Prediction, RuleEngine, RuleType,
};

const SUBJECTS: [&str; 8] = ["goblin", "troll", "wolf", "bat", "slime", "orc", "golem", "wisp"];
const ACTIONS: [&str; 4] = ["strike", "block", "flee", "cast"];
const INSTRUMENTS: [&str; 3] = ["sword", "bow", "staff"];

fn observations(n: usize) -> Vec<Observation> {
    (0..n)
        .map(|i| {
            let outcome = if i % 3 == 0 {
                Outcome::failure(-1.0)
            } else {
                Outcome::success(1.0).with_delta("hp", -1.0)
            };
            #[allow(clippy::cast_precision_loss)]
            let distance = (i % 7) as f64;
            Observation::new(
                "arena",
                SUBJECTS[i % SUBJECTS.len()],
                ACTIONS[i % ACTIONS.len()],
                outcome,
            )
            .with_instrument(INSTRUMENTS[i % INSTRUMENTS.len()])
            .with_attribute("distance", distance)
        })
        .collect()
}

/// Engine holding `n` unrelated rules, so every insertion scans them all.
fn engine_with_rules(n: usize) -> RuleEngine {
    let mut engine = RuleEngine::new();
    for i in 0..n {
        engine.insert_rule(CandidateRule::draft(
            RuleType::Causal,
            vec![
                Condition::subject(format!("subject-{i}")),
                Condition::action(format!("action-{i}")),
            ],
            vec![Prediction::Outcome { success: true }],
            ConfidenceTier::Grouped,
        ));
    }
    engine
}

fn bench_bloom(c: &mut Criterion) {
    let mut group = c.benchmark_group("bloom");
    for n in [50usize, 200] {
        let batch = observations(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("fresh_engine_{n}_observations"), |b| {
            b.iter_batched(
                RuleEngine::new,
                |mut engine| engine.bloom(&batch),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_similarity_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("similarity_scan");
    group.throughput(Throughput::Elements(1));
    for n in [100usize, 1000] {
        let engine = engine_with_rules(n);
        group.bench_function(format!("insert_into_{n}_rules"), |b| {
            b.iter_batched(
                || {
                    let draft = CandidateRule::draft(
                        RuleType::Causal,
                        vec![Condition::subject("probe"), Condition::action("strike")],
                        vec![Prediction::Outcome { success: false }],
                        ConfidenceTier::Grouped,
                    );
                    (engine.clone(), draft)
                },
                |(mut engine, draft)| engine.insert_rule(draft),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_cycle(c: &mut Criterion) {
    let warm = observations(200);
    let batch = observations(50);
    let mut seeded = RuleEngine::new();
    seeded.bloom(&warm);

    c.bench_function("lifecycle/validate_promote_prune", |b| {
        b.iter_batched(
            || seeded.clone(),
            |mut engine| {
                engine.validate_batch(&batch);
                engine.promote();
                engine.prune()
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(lifecycle, bench_bloom, bench_similarity_scan, bench_cycle);
criterion_main!(lifecycle);
