use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cardpak::macros;
use cardpak::model::{CharacterData, SpecKind};
use cardpak::png_codec::{self, BLANK_PORTRAIT};

fn bench_detect(c: &mut Criterion) {
    let data = CharacterData { name: "Bench".into(), description: "x".repeat(4096), ..Default::default() };
    let png = png_codec::embed(&BLANK_PORTRAIT, &data, SpecKind::Ccv3).unwrap();
    let json = cardpak::model::serialize_card(&data, SpecKind::Ccv3).unwrap();

    c.bench_function("detect_png", |b| b.iter(|| cardpak::detect(black_box(&png), None)));
    c.bench_function("detect_ccv3_json", |b| b.iter(|| cardpak::detect(black_box(&json), None)));
}

fn bench_png_codec(c: &mut Criterion) {
    let data = CharacterData {
        name: "Bench".into(),
        description: "The quick brown fox. ".repeat(500),
        ..Default::default()
    };
    let png = png_codec::embed(&BLANK_PORTRAIT, &data, SpecKind::Ccv3).unwrap();

    c.bench_function("png_embed_10kb_card", |b| {
        b.iter(|| png_codec::embed(black_box(&BLANK_PORTRAIT), black_box(&data), SpecKind::Ccv3))
    });
    c.bench_function("png_extract_10kb_card", |b| {
        b.iter(|| png_codec::extract(black_box(&png)))
    });
}

fn bench_macro_normalize(c: &mut Criterion) {
    let text = "Hello {{ user }}, I am {{char }}. {{random:  a, b,  c }} ".repeat(200);

    c.bench_function("macro_normalize_10kb", |b| {
        b.iter(|| macros::normalize(black_box(&text)))
    });
}

criterion_group!(benches, bench_detect, bench_png_codec, bench_macro_normalize);
criterion_main!(benches);
