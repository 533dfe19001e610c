use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use bevy_genai_chat::{Highlighter, extract_segments, render_message};

const REPLY: &str = r#"Sure, here is a **small** example with a [link](https://www.rust-lang.org):

1. build the list
2. sort it

```rust
fn main() {
    let mut v = vec![3, 1, 2];
    v.sort();
    println!("{:?}", v);
}
```

| lang | year |
|------|------|
| rust | 2015 |

```
plain block without a tag
```
That is all."#;

fn bench_extract(c: &mut Criterion) {
    c.bench_function("extract_segments", |b| {
        b.iter(|| extract_segments(black_box(REPLY)).count())
    });
}

fn bench_render(c: &mut Criterion) {
    let highlighter = Highlighter::default();
    c.bench_function("render_message", |b| {
        b.iter(|| render_message(black_box(REPLY), &highlighter))
    });
}

criterion_group!(benches, bench_extract, bench_render);
criterion_main!(benches);
