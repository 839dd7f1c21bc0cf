use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use hls_gate::hls::codec::{InterceptedUrl, ResourceKind};
use hls_gate::hls::rewriter::{LinkStyle, rewrite_playlist};
use url::Url;

fn media_playlist(segments: usize) -> String {
    let mut out = String::from(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:1000\n",
    );
    for i in 0..segments {
        if i % 50 == 0 {
            out.push_str(&format!(
                "#EXT-X-KEY:METHOD=AES-128,URI=\"https://keys.example.com/k/{}\",IV=0x{:032x}\n",
                i / 50,
                i
            ));
        }
        out.push_str(&format!("#EXTINF:6.006,\nsegment_{i:05}.ts\n"));
    }
    out
}

fn master_playlist(variants: usize) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-INDEPENDENT-SEGMENTS\n");
    for i in 0..variants {
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},CODECS=\"avc1.64001f,mp4a.40.2\"\nvariant_{i}/index.m3u8\n",
            (i + 1) * 400_000
        ));
    }
    out
}

fn benchmark_rewrite(c: &mut Criterion) {
    let base = Url::parse("https://cdn.example.com/live/channel/index.m3u8").unwrap();
    let bridge = LinkStyle::bridge("http://127.0.0.1:3000");

    let mut group = c.benchmark_group("Media playlist rewrite");
    for segments in [10, 500, 5000] {
        let playlist = media_playlist(segments);
        group.bench_with_input(BenchmarkId::new("scheme", segments), &playlist, |b, pl| {
            b.iter(|| {
                rewrite_playlist(black_box(pl.as_bytes()), &base, &LinkStyle::Scheme).unwrap()
            })
        });
        group.bench_with_input(BenchmarkId::new("bridge", segments), &playlist, |b, pl| {
            b.iter(|| rewrite_playlist(black_box(pl.as_bytes()), &base, &bridge).unwrap())
        });
    }
    group.finish();

    let master = master_playlist(8);
    c.bench_function("Master playlist rewrite (8 variants)", |b| {
        b.iter(|| {
            rewrite_playlist(black_box(master.as_bytes()), &base, &LinkStyle::Scheme).unwrap()
        })
    });
}

fn benchmark_codec(c: &mut Criterion) {
    let real =
        Url::parse("https://cdn.example.com/live/channel/segment_00042.ts?token=abc").unwrap();
    let encoded = InterceptedUrl::encode(real.clone(), ResourceKind::Segment)
        .unwrap()
        .to_string();

    c.bench_function("Intercepted URL encode", |b| {
        b.iter(|| {
            InterceptedUrl::encode(black_box(real.clone()), ResourceKind::Segment)
                .unwrap()
                .to_string()
        })
    });
    c.bench_function("Intercepted URL decode", |b| {
        b.iter(|| InterceptedUrl::decode(black_box(&encoded)).unwrap())
    });
}

criterion_group!(benches, benchmark_rewrite, benchmark_codec);
criterion_main!(benches);
