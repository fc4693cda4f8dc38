//! Benchmarks for strongroom-crypto

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;
use strongroom_crypto::{
    config::KdfConfig,
    erase::SecureEraser,
    password::{sha512_hex, PasswordHasher},
    EncryptedFile, KeyCustody, PgpEnvironment, SecurityConfig,
};

const RECIPIENT: &str = include_str!("../tests/fixtures/recipient.asc");
const RECIPIENT_FPR: &str = "AC9A2BDB43CE574BBC70C7D58B473BAC343F5B53";

fn bench_encrypted_file(c: &mut Criterion) {
    let mut group = c.benchmark_group("encrypted_file");
    let dir = tempfile::tempdir().unwrap();
    let custody = KeyCustody::new(SecurityConfig::new(dir.path().join("state"))).unwrap();

    for size in [1024, 64 * 1024, 1024 * 1024].iter() {
        let data = vec![0u8; *size];
        group.throughput(Throughput::Bytes(*size as u64));

        group.bench_with_input(BenchmarkId::new("aes-ctr-write", size), &data, |b, data| {
            b.iter(|| {
                let mut file = EncryptedFile::create(&custody, dir.path()).unwrap();
                file.write_chunk(data).unwrap();
                file.finalize_write().unwrap();
                let path = file.path().to_path_buf();
                file.close();
                std::fs::remove_file(path).unwrap();
            })
        });

        let mut stored = EncryptedFile::create(&custody, dir.path()).unwrap();
        stored.write_chunk(&data).unwrap();
        stored.avoid_delete();
        stored.close();
        let path = stored.path().to_path_buf();

        group.bench_with_input(BenchmarkId::new("aes-ctr-read", size), &path, |b, path| {
            b.iter(|| {
                let mut file = EncryptedFile::open_existing(&custody, path).unwrap();
                file.read_all().unwrap()
            })
        });
    }

    group.finish();
}

fn bench_password(c: &mut Criterion) {
    let mut group = c.benchmark_group("password");
    group.sample_size(10);

    group.bench_function("sha512", |b| b.iter(|| sha512_hex(b"correct horse battery staple")));

    for log_n in [10u8, 14].iter() {
        let hasher = PasswordHasher::new(KdfConfig { log_n: *log_n, r: 8, p: 1 });
        group.bench_with_input(BenchmarkId::new("scrypt-sha512", log_n), &hasher, |b, hasher| {
            b.iter(|| hasher.derive_auth_hash("correct horse", "c2FsdA==").unwrap())
        });
    }

    group.finish();
}

fn bench_erase(c: &mut Criterion) {
    let mut group = c.benchmark_group("erase");
    group.sample_size(10);
    let dir = tempfile::tempdir().unwrap();

    for size in [64 * 1024, 1024 * 1024].iter() {
        let data = vec![0xA5u8; *size];
        group.throughput(Throughput::Bytes(*size as u64));

        group.bench_with_input(BenchmarkId::new("one-pass", size), &data, |b, data| {
            let path = dir.path().join("victim");
            let mut eraser = SecureEraser::new();
            b.iter(|| {
                std::fs::write(&path, data).unwrap();
                eraser.overwrite_and_remove(&path, 1)
            })
        });
    }

    group.finish();
}

fn bench_pgp(c: &mut Criterion) {
    let mut group = c.benchmark_group("pgp");
    let dir = tempfile::tempdir().unwrap();
    let config = SecurityConfig::new(dir.path());
    let mut env = PgpEnvironment::create(&config).unwrap();
    env.load_key(RECIPIENT).unwrap();

    for size in [1024, 64 * 1024].iter() {
        let data = vec![0u8; *size];
        group.throughput(Throughput::Bytes(*size as u64));

        group.bench_with_input(BenchmarkId::new("encrypt-file", size), &data, |b, data| {
            let output = dir.path().join("out.pgp");
            b.iter(|| {
                env.encrypt_file(RECIPIENT_FPR, Cursor::new(data.as_slice()), &output)
                    .unwrap()
            })
        });
    }

    group.finish();
    env.destroy_environment();
}

criterion_group!(benches, bench_encrypted_file, bench_password, bench_erase, bench_pgp);
criterion_main!(benches);
