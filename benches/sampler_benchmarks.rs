use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use system_pulse::{
    metrics::{ElapsedRatioSampler, FrequencySampler, StaticFrequencySource, SysfsFrequencySource},
    CpuLoadEstimator, EstimatorKind, MemoryUsage, PerformanceReport, PeriodicScheduler,
};

fn write_core(root: &Path, core: usize, cur: &str, max: &str) {
    let cpufreq = root.join(format!("cpu{}/cpufreq", core));
    std::fs::create_dir_all(&cpufreq).expect("Should create cpufreq dir");
    std::fs::write(cpufreq.join("scaling_cur_freq"), cur).expect("Should write");
    std::fs::write(cpufreq.join("cpuinfo_min_freq"), "300000").expect("Should write");
    std::fs::write(cpufreq.join("cpuinfo_max_freq"), max).expect("Should write");
}

/// Benchmark the frequency estimate over in-memory readings
fn bench_frequency_static(c: &mut Criterion) {
    for cores in [1usize, 4, 8, 64].iter() {
        let source = (0..*cores).fold(StaticFrequencySource::new(*cores), |source, core| {
            source.with_core(core, 1000 + core as u64 * 10, 2400)
        });
        let sampler = FrequencySampler::with_source(source);

        c.bench_with_input(
            BenchmarkId::new("frequency_estimate_static", cores),
            cores,
            |b, _| b.iter(|| sampler.sample()),
        );
    }
}

/// Benchmark the frequency estimate reading a sysfs tree from disk
fn bench_frequency_sysfs(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    for core in 0..8 {
        write_core(dir.path(), core, "1800000\n", "2400000\n");
    }
    std::fs::write(dir.path().join("present"), "0-7\n").expect("Should write");
    let sampler = FrequencySampler::with_source(SysfsFrequencySource::with_root(dir.path(), None));

    c.bench_function("frequency_estimate_sysfs", |b| b.iter(|| sampler.sample()));
}

/// Benchmark the elapsed-ratio arithmetic
fn bench_elapsed_compute(c: &mut Criterion) {
    c.bench_function("elapsed_ratio_compute", |b| {
        b.iter(|| ElapsedRatioSampler::compute(500.0, 1000.0, 4))
    });
}

/// Benchmark the elapsed-ratio estimate against live procfs counters
fn bench_elapsed_procfs(c: &mut Criterion) {
    let sampler = ElapsedRatioSampler::new();
    c.bench_function("elapsed_ratio_procfs", |b| b.iter(|| sampler.sample()));
}

/// Benchmark JSON serialization of performance reports
fn bench_report_serialization(c: &mut Criterion) {
    let memory = MemoryUsage::from_totals(8 * 1024 * 1024 * 1024, 3 * 1024 * 1024 * 1024);
    let report = PerformanceReport::new(42.5, &memory, EstimatorKind::Frequency);

    c.bench_function("report_json_serialization", |b| {
        b.iter(|| serde_json::to_string(&report).expect("Should serialize"))
    });
}

/// Benchmark the reader side while a sampler is publishing
fn bench_query_reads(c: &mut Criterion) {
    let source = StaticFrequencySource::new(4).with_core(0, 1200, 2400);
    let scheduler = PeriodicScheduler::new(
        Arc::new(FrequencySampler::with_source(source)),
        Duration::from_millis(100),
    );
    scheduler.start().expect("Should start sampler");
    let query = scheduler.query();

    c.bench_function("query_current_cpu_usage", |b| b.iter(|| query.current_cpu_usage()));
    c.bench_function("query_latest_sample", |b| b.iter(|| query.latest_sample()));

    scheduler.shutdown();
}

criterion_group!(
    benches,
    bench_frequency_static,
    bench_frequency_sysfs,
    bench_elapsed_compute,
    bench_elapsed_procfs,
    bench_report_serialization,
    bench_query_reads
);

criterion_main!(benches);
