use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mindmap_render::assets::{assets_for, D3_SCRIPT, MARKMAP_VIEW_SCRIPT};
use mindmap_render::document::{apply_styles, assemble};
use mindmap_render::{AssetBundle, MarkdownTransformer, Size, StyleConfig, TreeProvider, WatchSettings};

/// A wide, moderately deep outline
fn outline_text() -> String {
    let mut text = String::from("# Roadmap\n");
    for section in 0..20 {
        text.push_str(&format!("## Section {}\n", section));
        for item in 0..10 {
            text.push_str(&format!("- item {} with **bold** and `code`\n", item));
            text.push_str("  - detail\n    - [x] finer detail\n");
        }
    }
    text
}

fn bench_transform(c: &mut Criterion) {
    let text = outline_text();
    let provider = MarkdownTransformer::new();
    c.bench_function("markdown_transform", |b| {
        b.iter(|| provider.transform(black_box(&text)).unwrap())
    });
}

fn bench_style_resolution(c: &mut Criterion) {
    let outline = MarkdownTransformer::new().transform(&outline_text()).unwrap();
    let style = StyleConfig::default();
    c.bench_function("apply_styles", |b| {
        b.iter(|| {
            let mut root = outline.root.clone();
            apply_styles(&mut root, black_box(&style));
            root
        })
    });
}

fn bench_assemble(c: &mut Criterion) {
    let outline = MarkdownTransformer::new().transform(&outline_text()).unwrap();
    let refs = assets_for(&outline.features);
    // stand-in scripts roughly the size of the real bundles
    let bundle = AssetBundle::from_scripts([
        (D3_SCRIPT, "/* d3 */".repeat(35_000)),
        (MARKMAP_VIEW_SCRIPT, "/* view */".repeat(8_000)),
    ]);
    let style = StyleConfig::default();
    let watch = WatchSettings::default();

    c.bench_function("assemble_document", |b| {
        b.iter(|| {
            assemble(
                outline.root.clone(),
                &refs,
                &bundle,
                &style,
                Size::default(),
                &watch,
            )
            .unwrap()
        })
    });
}

criterion_group!(benches, bench_transform, bench_style_resolution, bench_assemble);
criterion_main!(benches);
