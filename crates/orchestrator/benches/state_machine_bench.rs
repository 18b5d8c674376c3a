use broker::InMemoryBroker;
use common::SagaId;
use criterion::{Criterion, criterion_group, criterion_main};
use orchestrator::{
    Operation, Orchestrator, OrchestratorConfig, SagaCatalog, event_machine, saga_machine,
};
use saga_store::{Event, EventStatus, InMemorySagaStore};
use serde_json::json;

fn completed(saga_id: SagaId, name: &str) -> Event {
    let mut event = Event::new(saga_id, name);
    event.event_status = EventStatus::Completed;
    event
}

fn bench_advance(c: &mut Criterion) {
    let mut event = Event::new(SagaId::new(), "create_account");
    event.event_status = EventStatus::InProgress;

    c.bench_function("event_machine/advance", |b| {
        b.iter(|| event_machine::advance(&event, true).unwrap());
    });
}

fn bench_next_compensation(c: &mut Criterion) {
    let catalog = SagaCatalog::banking().unwrap();
    let saga_id = SagaId::new();
    let events = vec![
        completed(saga_id, "get_user_data"),
        completed(saga_id, "get_account_data"),
        completed(saga_id, "withdraw_account_cache"),
    ];

    c.bench_function("saga_machine/next_compensation", |b| {
        b.iter(|| saga_machine::next_compensation(&events, &catalog).unwrap());
    });
}

fn bench_catalog(c: &mut Criterion) {
    c.bench_function("catalog/build_banking", |b| {
        b.iter(|| SagaCatalog::banking().unwrap());
    });

    let catalog = SagaCatalog::banking().unwrap();
    let input = json!({"user_id": "u-1", "currency": "EUR"});
    c.bench_function("catalog/expand_add_account", |b| {
        b.iter(|| catalog.expand(Operation::AddAccount, &input).unwrap());
    });
}

fn bench_start_operation(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let orchestrator = Orchestrator::banking(
        InMemorySagaStore::new(),
        InMemoryBroker::new(),
        OrchestratorConfig::default(),
    )
    .unwrap();
    let fields = json!({"user_id": "u-1", "currency": "EUR"})
        .as_object()
        .cloned()
        .unwrap();

    c.bench_function("orchestrator/start_add_account", |b| {
        b.iter(|| {
            rt.block_on(async {
                orchestrator
                    .start_operation(Operation::AddAccount.code(), fields.clone())
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_advance,
    bench_next_compensation,
    bench_catalog,
    bench_start_operation,
);
criterion_main!(benches);
