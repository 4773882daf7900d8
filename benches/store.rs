use std::path::{Path, PathBuf};

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use spfs::storage::fs::BlobStorage;

fn generate_bench_file(name: &str, human_size: &str) -> std::io::Result<PathBuf> {
    let out_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("target")
        .join(name);

    if !out_path.exists() {
        eprintln!("generating {}...", out_path.display());

        let status = std::process::Command::new("sh")
            .arg("-c")
            .arg(format!(
                "head -c {} </dev/urandom > {}",
                human_size,
                out_path.display()
            ))
            .status()?;

        eprintln!("process exited with {}", status);
        if !status.success() {
            panic!("failed to create {} for hashing benchmarks", name);
        }
    }

    Ok(out_path)
}

fn write_blob(c: &mut Criterion) {
    let small = generate_bench_file("small_file", "15K").unwrap();
    let medium = generate_bench_file("medium_file", "33M").unwrap();
    let large = generate_bench_file("large_file", "1G").unwrap();

    for (label, path) in [
        ("Small file (15K)", &small),
        ("Medium file (33M)", &medium),
        ("Large file (1G)", &large),
    ] {
        let mut group = c.benchmark_group(label);
        group.bench_function("BlobStorage::write_blob", |b| {
            b.iter_batched(
                || {
                    let dir = tempfile::tempdir().unwrap();
                    let storage = BlobStorage::new(dir.path()).unwrap();
                    let file = std::fs::File::open(path).unwrap();
                    (dir, storage, file)
                },
                |(_dir, storage, file)| storage.write_blob(file).unwrap(),
                BatchSize::LargeInput,
            )
        });
        group.finish();
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = write_blob
}

criterion_main!(benches);
