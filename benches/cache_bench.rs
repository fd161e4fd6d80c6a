use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use wfmeta::activity::{ActivityTree, ArgumentDirection, Declaration, RuntimeArgument, ValueType, Variable};
use wfmeta::id::ActivityId;
use wfmeta::instance::{process_activity_instance_tree, InstanceArena};
use wfmeta::options::ProcessOptions;
use wfmeta::walker::{cache_root_metadata, WorkflowDefinition};

const APPROVAL_DOCUMENT: &str = include_str!("../engine/tests/fixtures/approval.json");

/// Balanced tree of sequences: every inner node declares a variable and
/// every leaf a bound argument.
fn generate_balanced_tree(depth: u32, fan_out: u32) -> (ActivityTree, ActivityId) {
    let mut tree = ActivityTree::new();
    let root = build_level(&mut tree, depth, fan_out);
    (tree, root)
}

fn build_level(tree: &mut ActivityTree, depth: u32, fan_out: u32) -> ActivityId {
    if depth == 0 {
        let value = tree.add("Literal", Declaration::new());
        return tree.add(
            "Write",
            Declaration::new().with_argument(
                RuntimeArgument::new("Text", ValueType::new("String"), ArgumentDirection::In)
                    .required()
                    .with_expression(value),
            ),
        );
    }
    let children: Vec<ActivityId> = (0..fan_out).map(|_| build_level(tree, depth - 1, fan_out)).collect();
    let decl = children
        .into_iter()
        .fold(Declaration::new(), |d, c| d.with_child(c))
        .with_variable(Variable::new("Counter", ValueType::new("Int32")));
    tree.add("Sequence", decl)
}

fn chain(len: u32) -> (ActivityTree, ActivityId) {
    let mut tree = ActivityTree::new();
    for i in 0..len {
        let decl = if i + 1 < len {
            Declaration::new().with_child(ActivityId(i + 1))
        } else {
            Declaration::new()
        };
        tree.add("Step", decl);
    }
    (tree, ActivityId(0))
}

// Cache pass latency on generated trees of growing size.
fn bench_cache_root_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/root_scaling");

    for depth in [2_u32, 4, 6] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("depth{}", depth)), &depth, |b, &depth| {
            b.iter_batched(
                || {
                    let (tree, root) = generate_balanced_tree(depth, 3);
                    WorkflowDefinition::new(tree, root).expect("generated root exists")
                },
                |definition| {
                    let errors = cache_root_metadata(&definition, None, &ProcessOptions::full_caching(), None);
                    black_box(errors)
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

// Deep chains exercise the explicit worklist.
fn bench_deep_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/deep_chain");
    group.sample_size(10);
    group.bench_function("10000", |b| {
        b.iter_batched(
            || {
                let (tree, root) = chain(10_000);
                WorkflowDefinition::new(tree, root).expect("chain root exists")
            },
            |definition| black_box(cache_root_metadata(&definition, None, &ProcessOptions::validation(), None)),
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

// Document load plus cache, end to end.
fn bench_document(c: &mut Criterion) {
    c.bench_function("cache/document/approval", |b| {
        b.iter(|| {
            let loaded = wfmeta::document::from_json(black_box(APPROVAL_DOCUMENT)).expect("fixture parses");
            let definition = WorkflowDefinition::new(loaded.tree, loaded.root).expect("fixture root exists");
            black_box(cache_root_metadata(
                &definition,
                Some(&loaded.host),
                &ProcessOptions::full_caching(),
                None,
            ))
        });
    });
}

// Level-order walk over a wide instance tree.
fn bench_instance_walk(c: &mut Criterion) {
    let mut tree = ActivityTree::new();
    let activity = tree.add("Root", Declaration::new());
    let definition = WorkflowDefinition::new(tree, activity).expect("root exists");
    let (mut arena, root) = InstanceArena::new_root(&definition);
    let mut frontier = vec![root];
    for _ in 0..4 {
        let mut next = Vec::new();
        for &parent in &frontier {
            for _ in 0..8 {
                next.extend(arena.add_child(parent, activity));
            }
        }
        frontier = next;
    }

    c.bench_function("instance/level_order", |b| {
        b.iter(|| {
            let mut visited = 0usize;
            process_activity_instance_tree(&arena, root, &mut visited, |_, n| {
                *n += 1;
                true
            });
            black_box(visited)
        });
    });
}

criterion_group!(
    benches,
    bench_cache_root_scaling,
    bench_deep_chain,
    bench_document,
    bench_instance_walk,
);
criterion_main!(benches);
