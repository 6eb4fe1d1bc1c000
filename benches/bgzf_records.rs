use bamflow::io::bam::{AlignmentReader, AlignmentWriter, CigarOp, Format, Header, Record, TagValue};
use bamflow::io::compression::{decompress_bgzf, BgzfWriter};
use bamflow::io::ReadOptions;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flate2::Compression;
use std::hint::black_box;
use std::io::Write;

const RECORD_COUNTS: &[usize] = &[1_000, 10_000, 100_000];

fn synthetic_header() -> Header {
    let mut header = Header::new();
    header.push_line("@HD\tVN:1.6\tSO:coordinate").unwrap();
    header.push_line("@SQ\tSN:chr1\tLN:248956422").unwrap();
    header
}

fn synthetic_records(count: usize) -> Vec<Record> {
    let bases = b"ACGT";
    (0..count)
        .map(|i| {
            let sequence: Vec<u8> = (0..150).map(|j| bases[(i * 7 + j * 13) % 4]).collect();
            let mut record = Record {
                name: format!("read{}", i),
                reference_id: Some(0),
                position: Some((i * 100 + 1) as i32),
                mapq: Some(60),
                cigar: vec![CigarOp::Match(150)],
                quality: (0..150).map(|j| ((i + j) % 41) as u8).collect(),
                sequence,
                ..Record::default()
            };
            record.tags.insert(*b"NM", TagValue::from_int((i % 5) as i64).unwrap());
            record.tags.insert(*b"RG", TagValue::String("bench".into()));
            record
        })
        .collect()
}

fn encode_stream(header: &Header, records: &[Record], format: Format) -> Vec<u8> {
    let mut writer = AlignmentWriter::open(Vec::new(), header, format).unwrap();
    for record in records {
        writer.write_record(record).unwrap();
    }
    writer.into_inner().unwrap()
}

fn bench_bgzf(c: &mut Criterion) {
    let mut group = c.benchmark_group("bgzf");
    group.sample_size(10);

    let header = synthetic_header();
    let records = synthetic_records(10_000);
    let bam = encode_stream(&header, &records, Format::Bam);
    let payload = decompress_bgzf(&bam, ReadOptions::default()).unwrap();
    group.throughput(Throughput::Bytes(payload.len() as u64));

    for (label, level) in [("fast", Compression::fast()), ("default", Compression::default())] {
        group.bench_with_input(BenchmarkId::new("compress", label), &payload, |b, data| {
            b.iter(|| {
                let mut writer = BgzfWriter::with_level(Vec::new(), level);
                writer.write_all(data).unwrap();
                black_box(writer.into_inner().unwrap().len())
            })
        });
    }

    group.bench_with_input(BenchmarkId::new("decompress", "default"), &bam, |b, data| {
        b.iter(|| black_box(decompress_bgzf(data, ReadOptions::default()).unwrap().len()))
    });

    group.finish();
}

fn bench_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("records");
    group.sample_size(10);

    let header = synthetic_header();
    for &count in RECORD_COUNTS {
        let records = synthetic_records(count);
        group.throughput(Throughput::Elements(count as u64));

        for format in [Format::Bam, Format::Sam] {
            let encoded = encode_stream(&header, &records, format);
            let label = format!("{}/{}", format, count);

            group.bench_with_input(BenchmarkId::new("write", &label), &records, |b, records| {
                b.iter(|| black_box(encode_stream(&header, records, format).len()))
            });

            group.bench_with_input(BenchmarkId::new("read", &label), &encoded, |b, data| {
                b.iter(|| {
                    let mut reader = AlignmentReader::new(&data[..], ReadOptions::default()).unwrap();
                    black_box(reader.records().filter(|r| r.is_ok()).count())
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_bgzf, bench_records);
criterion_main!(benches);
