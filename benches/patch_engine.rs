//! Patch engine benchmarks
//!
//! Measures path parsing per grammar, element matching over growing relation
//! arrays, and a full JSON Patch Query round trip through the service.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::runtime::Runtime;

use tmf_server::config::ServerConfig;
use tmf_server::events::EventPublisher;
use tmf_server::patch::PatchRequest;
use tmf_server::patch::matcher::match_elements;
use tmf_server::patch::path::{Condition, Selector, parse_path};
use tmf_server::resource::{RequestContext, ResourceDefinition, ResourceService};
use tmf_server::storage::InMemoryStorage;

const PATHS: &[(&str, &str)] = &[
    ("indexed", "$.note[0].text"),
    ("single_condition", "$.note[?(@.id=='n1')].text"),
    ("dotted_condition", "$.relatedParty[?(@.partyOrPartyRole.name==\"Jane\")].role"),
    ("multi_condition", "$.note[?(@.author=='Bob' && @.text=='Line test failed')].text"),
    ("query_string", "/note/text?item.id=n1&author=bob"),
    ("prefixed", "?filter=note[?(@.id=='n1')].text"),
    ("nested_field", "$.productOffering.name"),
    ("simple_field", "/status"),
];

fn bench_parse_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_path");
    for (grammar, path) in PATHS {
        group.bench_with_input(BenchmarkId::from_parameter(grammar), path, |b, path| {
            b.iter(|| parse_path(black_box(path)))
        });
    }
    group.finish();
}

fn create_elements(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "id": format!("rp-{}", i),
                "role": if i % 2 == 0 { "customer" } else { "technician" },
                "partyOrPartyRole": {"id": format!("p{}", i), "name": format!("Party {}", i)}
            })
        })
        .collect()
}

fn bench_match_elements(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_elements");
    let conditions = [
        Condition::new("role", "customer"),
        Condition::new("partyOrPartyRole.name", "Party 42"),
    ];

    for count in [10, 100, 1000] {
        let elements = create_elements(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("and_filter", count), &elements, |b, elements| {
            b.iter(|| match_elements(black_box(elements), Selector::Conditions(&conditions)))
        });
    }
    group.finish();
}

fn bench_service_patch(c: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime");
    let storage = InMemoryStorage::new();
    let config = ServerConfig::default();
    let publisher = Arc::new(EventPublisher::in_memory(
        storage.clone(),
        config.webhook.clone(),
    ));
    let tickets = ResourceService::new(
        ResourceDefinition::trouble_ticket(),
        storage,
        publisher,
        config,
    );
    let ctx = RequestContext::for_tenant("bench");

    let created = runtime
        .block_on(tickets.create(
            &ctx,
            json!({
                "description": "Benchmark ticket",
                "severity": "minor",
                "ticketType": "incident",
                "relatedParty": create_elements(20)
            }),
        ))
        .expect("create ticket");
    let id = created["id"].as_str().unwrap_or_default().to_string();
    let body = json!([
        {"op": "replace", "path": "$.relatedParty[?(@.role=='customer')].partyOrPartyRole.name", "value": "Renamed"},
        {"op": "replace", "path": "$.priority", "value": "high"}
    ]);

    c.bench_function("service_patch_filtered_replace", |b| {
        b.iter(|| {
            let request = PatchRequest::from_body(body.clone()).expect("valid body");
            runtime
                .block_on(tickets.patch(&ctx, &id, request))
                .expect("patch")
        })
    });
}

criterion_group!(
    patch_engine_benches,
    bench_parse_path,
    bench_match_elements,
    bench_service_patch
);
criterion_main!(patch_engine_benches);
