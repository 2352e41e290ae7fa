/// How long does a whole class take to go through the queue?
///
/// 1) Compiling a typical final-grade formula, which every batch does once per column.
/// 2) Draining a freshly enqueued class: five homeworks, their average and a final grade, for a
///    growing number of students. Every cell exists in both privacy tiers.
use criterion::{
    criterion_group, criterion_main, AxisScale, BatchSize, BenchmarkId, Criterion,
    PlotConfiguration,
};
use lazy_static::lazy_static;
use rand::Rng;
use regrade::config::WorkerConfig;
use regrade::dependency::refresh_class_dependencies;
use regrade::worker::{enqueue_class, QueueWorker};
use regrade_computation::{compile, DependencySourceMap};
use regrade_storage::*;
use std::sync::Arc;
use tokio::runtime::Runtime;
use uuid::Uuid;

const CLASS_ID: ClassId = 1;
const HOMEWORKS: i64 = 5;

lazy_static! {
    // (students, sample size)
    static ref DRAIN_CASES: Vec<(u64, usize)> = vec![(10, 10), (100, 10), (1_000, 10)];
}

fn column(id: ColumnId, slug: &str, expression: &str) -> GradebookColumn {
    GradebookColumn {
        id,
        class_id: CLASS_ID,
        gradebook_id: 1,
        slug: slug.to_string(),
        score_expression: Some(expression.to_string()),
        dependencies: ColumnDependencies::default(),
        max_score: Some(100.0),
    }
}

fn generate_class(students: u64) -> GradebookSnapshot {
    let mut rng = rand::thread_rng();
    let mut snapshot = GradebookSnapshot {
        gradebooks: vec![Gradebook {
            id: 1,
            class_id: CLASS_ID,
            expression_prefix: None,
            incomplete_values_policy: IncompleteValuesPolicy::AssumeZero,
        }],
        ..GradebookSnapshot::default()
    };

    for id in 1..=HOMEWORKS {
        let slug = format!("hw{}", id);
        snapshot.columns.push(column(id, &slug, &format!("assignments('{}')", slug)));
        snapshot.assignments.push(Assignment {
            id,
            class_id: CLASS_ID,
            slug,
            total_points: Some(100.0),
        });
    }
    snapshot.columns.push(column(
        HOMEWORKS + 1,
        "average",
        "mean(drop_lowest(gradebook_columns('hw*'), 1))",
    ));
    snapshot.columns.push(column(
        HOMEWORKS + 2,
        "final",
        "case_when([[gradebook_columns('average') >= 90, 4], [gradebook_columns('average') >= 80, 3], [1, 2]])",
    ));

    let mut next_cell_id = 1;
    for n in 0..students {
        let student_id = Uuid::from_u128(u128::from(n) + 1);

        for id in 1..=HOMEWORKS {
            snapshot.assignment_scores.push(AssignmentScore {
                assignment_id: id,
                class_id: CLASS_ID,
                slug: format!("hw{}", id),
                student_id,
                score: Some(f64::from(rng.gen_range(50u32, 101))),
                released: rng.gen_range(0, 4) != 0,
            });
        }

        for column in &snapshot.columns {
            for &is_private in &[true, false] {
                snapshot.cells.push(ColumnCell {
                    id: next_cell_id,
                    column_id: column.id,
                    class_id: CLASS_ID,
                    gradebook_id: 1,
                    student_id,
                    is_private,
                    column_slug: column.slug.clone(),
                    max_score: column.max_score,
                    score: None,
                    score_override: None,
                    score_override_note: None,
                    is_missing: false,
                    is_excused: false,
                    is_droppable: true,
                    released: true,
                    incomplete_values: None,
                    is_recalculating: false,
                });
                next_cell_id += 1;
            }
        }
    }

    snapshot
}

/// A worker with the whole class already enqueued.
fn prepare(runtime: &Runtime, students: u64) -> QueueWorker {
    let config = WorkerConfig {
        batch_size: 1_000,
        ..WorkerConfig::default()
    };
    let store = Arc::new(InMemoryStore::from_snapshot(generate_class(students)));
    let queue = Arc::new(InMemoryQueue::new());

    runtime.block_on(async {
        refresh_class_dependencies(&*store, CLASS_ID, config.page_size)
            .await
            .expect("Should refresh");
        enqueue_class(&*store, &*queue, &config.queue_name, CLASS_ID, config.page_size)
            .await
            .expect("Should enqueue");
    });

    QueueWorker::new(store, queue, config)
}

fn compile_formula(crit: &mut Criterion) {
    let sources = Arc::new(DependencySourceMap::standard(1_000));
    let formula = "case_when([[mean(gradebook_columns(['hw1', 'hw2', 'hw3'])) >= 90, 4], [1, 2]])";

    crit.bench_function("compile-final-grade", |bencher| {
        bencher.iter(|| compile(None, formula, CLASS_ID, sources.clone()).expect("Should compile"))
    });
}

fn drain_class(crit: &mut Criterion) {
    let runtime = Runtime::new().expect("Should start runtime");
    let plot_config = PlotConfiguration::default().summary_scale(AxisScale::Logarithmic);
    let mut group = crit.benchmark_group("evaluation-drain-class");
    group.plot_config(plot_config);

    for (students, sample_size) in DRAIN_CASES.iter() {
        group.sample_size(*sample_size);
        group.bench_with_input(
            BenchmarkId::new("drain", students),
            students,
            |bencher, students| {
                bencher.iter_batched(
                    || prepare(&runtime, *students),
                    |worker| runtime.block_on(worker.drain()).expect("Should drain"),
                    BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(benches, compile_formula, drain_class);
criterion_main!(benches);
