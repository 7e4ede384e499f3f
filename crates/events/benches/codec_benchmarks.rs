use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use courier_core::{CloudEvent, CorrelationId, SubscriptionId};
use courier_events::{CloudEventEnvelope, QueueMessage, RetryableEventWrapper};

fn envelope(data_len: usize) -> CloudEventEnvelope {
    let event = CloudEvent::new(
        "0192b0a4-7c1e-7000-8000-000000000001",
        "https://platform.example/ttd/app/instances/50001/1f1b",
        "app.instance.process.completed",
    )
    .with_subject("/party/50001")
    .with_resource("urn:altinn:resource:app_ttd_app")
    .with_data(courier_core::EventData::Json(serde_json::json!({ "blob": "x".repeat(data_len) })))
    .with_extension("traceparent", serde_json::json!("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"))
    .unwrap();

    CloudEventEnvelope::new(event, "https://hooks.example/a", "/org/ttd", SubscriptionId::new(42))
}

fn bench_wrapper_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("wrapper_decode");

    for size in [0usize, 1_024, 16_384] {
        let payload = envelope(size).to_json().unwrap();
        let raw = RetryableEventWrapper::new(payload, CorrelationId::from("c1"))
            .to_json()
            .unwrap();

        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::new("wrapped", size), &raw, |b, raw| {
            b.iter(|| QueueMessage::decode(black_box(raw)))
        });
    }

    let bare = envelope(1_024).to_json().unwrap();
    group.bench_function("bare_fallback", |b| b.iter(|| QueueMessage::decode(black_box(&bare))));

    group.finish();
}

fn bench_envelope_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_round_trip");

    for size in [0usize, 1_024, 16_384] {
        let raw = envelope(size).to_json().unwrap();
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &raw, |b, raw| {
            b.iter(|| {
                let decoded = CloudEventEnvelope::from_json(black_box(raw)).unwrap();
                decoded.to_json().unwrap()
            })
        });
    }

    group.finish();
}

fn bench_requeue(c: &mut Criterion) {
    let payload = envelope(1_024).to_json().unwrap();
    let raw = RetryableEventWrapper::new(payload, CorrelationId::from("c1"))
        .to_json()
        .unwrap();

    c.bench_function("requeue_reencode", |b| {
        b.iter(|| {
            let wrapper = QueueMessage::decode(black_box(&raw)).into_wrapper();
            wrapper.requeued().to_json().unwrap()
        })
    });
}

criterion_group!(benches, bench_wrapper_decode, bench_envelope_round_trip, bench_requeue);
criterion_main!(benches);
