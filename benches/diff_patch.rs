use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use promptloop::services::diff_patch::{apply_model_edits, apply_patch, parse_edits, DiffEdit};

fn prompt(lines: usize) -> String {
    (0..lines)
        .map(|i| format!("Rule {i}: when the ticket mentions topic {i}, answer with label_{i}."))
        .collect::<Vec<_>>()
        .join("\n")
}

fn model_output(edits: usize) -> String {
    (0..edits)
        .map(|i| {
            format!(
                "<<<<<<< SEARCH\nRule {i}: when the ticket mentions topic {i}\n=======\n\
                 Rule {i}: only when the ticket clearly mentions topic {i}\n>>>>>>> REPLACE"
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn bench_parse(c: &mut Criterion) {
    let output = model_output(20);
    c.bench_function("parse_edits_20", |b| b.iter(|| parse_edits(black_box(&output))));
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_patch");
    for lines in [50usize, 200, 800] {
        let text = prompt(lines);
        let exact: Vec<DiffEdit> = (0..10)
            .map(|i| DiffEdit::new(format!("topic {i},"), format!("subject {i},")))
            .collect();
        // Collapsed whitespace forces the normalized matcher.
        let drifted: Vec<DiffEdit> = (0..10)
            .map(|i| DiffEdit::new(format!("Rule  {i}:   when the\nticket"), format!("Rule {i}: if the ticket")))
            .collect();

        group.bench_with_input(BenchmarkId::new("exact", lines), &text, |b, text| {
            b.iter(|| apply_patch(black_box(text), black_box(&exact)));
        });
        group.bench_with_input(BenchmarkId::new("whitespace_normalized", lines), &text, |b, text| {
            b.iter(|| apply_patch(black_box(text), black_box(&drifted)));
        });
    }
    group.finish();
}

fn bench_model_edits(c: &mut Criterion) {
    let text = prompt(200);
    let output = model_output(10);
    c.bench_function("apply_model_edits_200_lines", |b| {
        b.iter(|| apply_model_edits(black_box(&text), black_box(&output)));
    });
}

criterion_group!(benches, bench_parse, bench_apply, bench_model_edits);
criterion_main!(benches);
