use std::collections::HashSet;
use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use relgraph::graph::{connected_projection, neighbor_ids};
use relgraph::models::{Gender, Person, PersonId, Relation, RelationId};

fn lcg_next(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state
}

fn timestamp() -> chrono::NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(2026, 1, 1)
        .expect("valid date")
        .and_hms_opt(0, 0, 0)
        .expect("valid datetime")
}

fn person(id: i32) -> Person {
    Person {
        id: PersonId(id),
        name: format!("P{id}"),
        description: None,
        gender: Gender::Unknown,
        created_at: timestamp(),
    }
}

fn relation(id: i32, from: i32, to: i32) -> Relation {
    Relation {
        id: RelationId(id),
        from_person_id: PersonId(from),
        to_person_id: PersonId(to),
        source: None,
        created_at: timestamp(),
        updated_at: timestamp(),
    }
}

fn synthetic_graph(person_count: usize, relation_count: usize) -> (Vec<Person>, Vec<Relation>) {
    let persons = (1..=person_count as i32).map(person).collect::<Vec<_>>();

    let mut state = 0x1234_5678_9abc_def0u64;
    let mut seen = HashSet::with_capacity(relation_count);
    let mut relations = Vec::with_capacity(relation_count);
    while relations.len() < relation_count {
        let a = (lcg_next(&mut state) as usize) % person_count + 1;
        let b = (lcg_next(&mut state) as usize) % person_count + 1;
        if a == b {
            continue;
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        if seen.insert((lo, hi)) {
            let id = relations.len() as i32 + 1;
            relations.push(relation(id, a as i32, b as i32));
        }
    }

    (persons, relations)
}

fn bench_connected_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("connected_projection");
    for (person_count, relation_count) in [(100, 200), (1_000, 2_000), (5_000, 10_000)] {
        let (persons, relations) = synthetic_graph(person_count, relation_count);
        group.throughput(Throughput::Elements(relation_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{person_count}p/{relation_count}r")),
            &(persons, relations),
            |b, (persons, relations)| {
                b.iter(|| black_box(connected_projection(persons, relations)));
            },
        );
    }
    group.finish();
}

fn bench_neighbor_ids(c: &mut Criterion) {
    let (_, relations) = synthetic_graph(1_000, 2_000);
    c.bench_function("neighbor_ids/1000p", |b| {
        b.iter(|| black_box(neighbor_ids(PersonId(1), &relations)));
    });
}

criterion_group!(benches, bench_connected_projection, bench_neighbor_ids);
criterion_main!(benches);
