//! Batch throughput benchmarks
//!
//! Transforms a synthetic corpus of charters with a varying number of workers.
//!
//! Run benchmarks: `cargo bench --bench batch_throughput`

use cei2tei::{BatchConfig, run};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::fs;
use std::hint::black_box;
use std::path::Path;

const DOCUMENTS: usize = 200;

const STYLESHEET: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"
    xmlns:cei="http://www.monasterium.net/NS/cei" xmlns:tei="http://www.tei-c.org/ns/1.0" exclude-result-prefixes="cei">
  <xsl:template match="/">
    <tei:TEI>
      <tei:teiHeader><tei:idno><xsl:value-of select="//cei:idno"/></tei:idno></tei:teiHeader>
      <tei:text><tei:body><xsl:apply-templates select="//cei:tenor"/></tei:body></tei:text>
    </tei:TEI>
  </xsl:template>
  <xsl:template match="cei:tenor"><tei:div type="tenor"><xsl:apply-templates/></tei:div></xsl:template>
  <xsl:template match="cei:pers"><tei:persName><xsl:value-of select="."/></tei:persName></xsl:template>
</xsl:stylesheet>"#;

/// A charter with a few hundred words of tenor.
fn charter(i: usize) -> String {
    let sentence = "Nos <cei:pers>Rudolfus</cei:pers> dei gratia Romanorum rex semper augustus notum facimus universis. ";
    format!(
        r#"<cei:text xmlns:cei="http://www.monasterium.net/NS/cei" type="charter"><cei:idno>{i}</cei:idno><cei:body><cei:tenor>{}</cei:tenor></cei:body></cei:text>"#,
        sentence.repeat(30)
    )
}

fn write_corpus(root: &Path) {
    for i in 0..DOCUMENTS {
        let dir = root.join(format!("{}", 1200 + i % 10));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{}.xml", i)), charter(i)).unwrap();
    }
}

fn bench_worker_scaling(c: &mut Criterion) {
    let scratch = tempfile::tempdir().unwrap();
    let input = scratch.path().join("in");
    write_corpus(&input);
    let stylesheet = scratch.path().join("cei2tei.xsl");
    fs::write(&stylesheet, STYLESHEET).unwrap();

    let mut group = c.benchmark_group("worker_scaling");
    group.sample_size(10);
    group.throughput(Throughput::Elements(DOCUMENTS as u64));

    for workers in [1, 2, 4, 8] {
        let config = BatchConfig::new(&input, scratch.path().join(format!("out-{}", workers)), &stylesheet)
            .with_workers(workers)
            .with_report_path(scratch.path().join("error_log.csv"));
        group.bench_with_input(BenchmarkId::from_parameter(workers), &config, |b, config| {
            b.iter(|| {
                let summary = run(black_box(config)).unwrap();
                assert_eq!(summary.failed, 0);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_worker_scaling);
criterion_main!(benches);
