use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use straybot::db::{CommandRecord, Scope};
use straybot::handlers::CommandResolver;
use straybot::handlers::dispatch::segments;
use straybot::network::parser::parse_line;
use straybot::template::Template;

// Hot paths on every chat line: wire parsing, command resolution, and for
// matched commands template parsing plus output segmentation.

fn wire_parsing_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire");
    let raw = "@badge-info=;badges=moderator/1;color=#1E90FF;display-name=Bob;mod=1;room-id=100;\
               subscriber=0;tmi-sent-ts=1700000000000;user-id=42 :bob!bob@bob.tmi.twitch.tv \
               PRIVMSG #alice :!hi there everyone";
    group.throughput(Throughput::Bytes(raw.len() as u64));

    group.bench_function("parse_privmsg", |b| b.iter(|| parse_line(black_box(raw)).ok()));

    group.finish();
}

fn resolver_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolver");
    let mut records: Vec<CommandRecord> = (0..200)
        .map(|i| CommandRecord {
            scope: Scope::channel("100"),
            name: format!("^!cmd{}$", i),
            template: "ok".to_string(),
            revision: 1,
        })
        .collect();
    records.extend((0..50).map(|i| CommandRecord {
        scope: Scope::Global,
        name: format!("^!global{}\\b", i),
        template: "ok".to_string(),
        revision: 1,
    }));
    let resolver = CommandResolver::default();
    // Warm the pattern cache.
    let _ = resolver.resolve(&records, "warmup");
    group.throughput(Throughput::Elements(records.len() as u64));

    group.bench_function("resolve_hit", |b| {
        b.iter(|| resolver.resolve(&records, black_box("!cmd150")).ok())
    });
    group.bench_function("resolve_miss", |b| {
        b.iter(|| resolver.resolve(&records, black_box("just chatting about the game")).ok())
    });

    group.finish();
}

fn template_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("template");
    let source = "{{ if .IsMod }}hey {{ .User }}{{ else if eq .SelectedUser \"bob\" }}hi bob\
                  {{ else }}{{ upper .SelectedUser }} has {{ counter \"deaths\" }} deaths{{ end }}";
    group.throughput(Throughput::Bytes(source.len() as u64));

    group.bench_function("parse", |b| b.iter(|| Template::parse("bench", black_box(source)).ok()));

    group.finish();
}

fn segmentation_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let output = format!(
        "reply::delay::{}\\n{}",
        "word ".repeat(300),
        "second line"
    );
    group.throughput(Throughput::Bytes(output.len() as u64));

    group.bench_function("segments", |b| b.iter(|| segments(black_box(&output))));

    group.finish();
}

criterion_group!(
    benches,
    wire_parsing_benchmark,
    resolver_benchmark,
    template_benchmark,
    segmentation_benchmark
);
criterion_main!(benches);
