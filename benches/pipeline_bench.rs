use criterion::{black_box, criterion_group, criterion_main, Criterion};
use livepen::{compose, share, ErrorLocator, PlaygroundConfig, SourceBundle};

fn sample() -> SourceBundle {
    let script = (0..200).map(|i| format!("console.log('line {}', {{ n: {} }});\n", i, i)).collect::<String>();
    SourceBundle::new("<main><h1>Bench</h1><p>body</p></main>", "main { display: grid; }", script)
}

fn bench_compose(c: &mut Criterion) {
    let bundle = sample();
    let opts = PlaygroundConfig::default().shim_options();
    c.bench_function("compose_document", |b| b.iter(|| compose::compose(black_box(&bundle), &opts)));
}

fn bench_share(c: &mut Criterion) {
    let bundle = sample();
    let token = share::encode(&bundle);
    c.bench_function("share_encode", |b| b.iter(|| share::encode(black_box(&bundle))));
    c.bench_function("share_decode", |b| b.iter(|| share::decode(black_box(token.as_str())).ok()));
}

fn bench_locate(c: &mut Criterion) {
    let locator = ErrorLocator::for_shim(&PlaygroundConfig::default().shim_options());
    let stack = format!(
        "TypeError: x is not a function\n    at foo (<anonymous>:{}:9)\n    at <anonymous>:{}:3",
        locator.prologue_lines() + 40,
        locator.prologue_lines() + 41
    );
    c.bench_function("locate_stack", |b| b.iter(|| locator.locate(black_box(&stack))));
}

criterion_group!(benches, bench_compose, bench_share, bench_locate);
criterion_main!(benches);
