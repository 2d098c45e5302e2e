//! JSON Patch Query behaviour through the resource service.

mod common;

use serde_json::{Value, json};
use std::sync::Arc;

use common::{RecordingStorage, TENANT, id_of, init_logging, product_order, test_config, trouble_ticket};
use tmf_server::TmfError;
use tmf_server::events::EventPublisher;
use tmf_server::patch::PatchRequest;
use tmf_server::resource::{RequestContext, ResourceDefinition, ResourceService};

fn service(
    definition: ResourceDefinition,
    storage: &RecordingStorage,
) -> ResourceService<RecordingStorage> {
    let config = test_config();
    let publisher = Arc::new(EventPublisher::in_memory(
        storage.clone(),
        config.webhook.clone(),
    ));
    ResourceService::new(definition, storage.clone(), publisher, config)
}

async fn patch(
    service: &ResourceService<RecordingStorage>,
    id: &str,
    body: Value,
) -> Result<Value, TmfError> {
    let ctx = RequestContext::for_tenant(TENANT);
    service.patch(&ctx, id, PatchRequest::from_body(body)?).await
}

fn texts(entity: &Value, relation: &str, attribute: &str) -> Vec<String> {
    entity[relation]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| item[attribute].as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_filtered_replace_touches_only_matching_elements() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);

    let patched = patch(
        &tickets,
        &id,
        json!([{"op": "replace", "path": "$.note[?(@.author=='Bob')].text", "value": "Line repaired"}]),
    )
    .await
    .unwrap();

    assert_eq!(
        texts(&patched, "note", "text"),
        vec!["Customer called", "Line repaired"]
    );
    assert_eq!(patched["note"][1]["author"], "Bob");
    assert_eq!(patched["note"][1]["id"], created["note"][1]["id"]);
    assert_eq!(patched["note"][0], created["note"][0]);
}

#[tokio::test]
async fn test_dotted_attribute_preserves_siblings() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);

    let patched = patch(
        &tickets,
        &id,
        json!([{
            "op": "replace",
            "path": "$.relatedParty[?(@.role=='customer')].partyOrPartyRole.name",
            "value": "Janet"
        }]),
    )
    .await
    .unwrap();

    let customer = &patched["relatedParty"][0];
    assert_eq!(customer["partyOrPartyRole"], json!({"id": "p1", "name": "Janet"}));
    assert_eq!(customer["role"], "customer");
    assert_eq!(patched["relatedParty"][1], created["relatedParty"][1]);
}

#[tokio::test]
async fn test_filter_values_compare_as_strings() {
    init_logging();
    let storage = RecordingStorage::new();
    let orders = service(ResourceDefinition::product_order(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = orders.create(&ctx, product_order()).await.unwrap();
    let id = id_of(&created);

    let patched = patch(
        &orders,
        &id,
        json!([{"op": "replace", "path": "$.productOrderItem[?(@.quantity=='3')].action", "value": "modify"}]),
    )
    .await
    .unwrap();
    assert_eq!(
        texts(&patched, "productOrderItem", "action"),
        vec!["add", "modify"]
    );

    let patched = patch(
        &orders,
        &id,
        json!([{"op": "replace", "path": "$.productOrderItem[?(@.productOffering.id==\"po1\")].quantity", "value": 2}]),
    )
    .await
    .unwrap();
    assert_eq!(patched["productOrderItem"][0]["quantity"], 2);
    assert_eq!(patched["productOrderItem"][1]["quantity"], 3);
}

#[tokio::test]
async fn test_conditions_are_combined_with_and() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);

    let result = patch(
        &tickets,
        &id,
        json!([{
            "op": "replace",
            "path": "$.note[?(@.author=='Bob' && @.text=='Customer called')].text",
            "value": "x"
        }]),
    )
    .await;
    assert!(matches!(result, Err(TmfError::NoMatch { .. })));

    let patched = patch(
        &tickets,
        &id,
        json!([{
            "op": "replace",
            "path": "$.note[?(@.author=='Bob' && @.text=='Line test failed')].text",
            "value": "Line test passed"
        }]),
    )
    .await
    .unwrap();
    assert_eq!(
        texts(&patched, "note", "text"),
        vec!["Customer called", "Line test passed"]
    );
}

#[tokio::test]
async fn test_query_string_and_prefixed_filter_grammars() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);

    let patched = patch(
        &tickets,
        &id,
        json!([
            {"op": "replace", "path": "/note/text?author=Alice", "value": "Called back"},
            {"op": "replace", "path": "?filter=note[?(@.author=='Bob')].text", "value": "Dispatched"}
        ]),
    )
    .await
    .unwrap();

    assert_eq!(
        texts(&patched, "note", "text"),
        vec!["Called back", "Dispatched"]
    );
}

#[tokio::test]
async fn test_index_out_of_bounds_is_no_match() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);

    let err = patch(
        &tickets,
        &id,
        json!([{"op": "replace", "path": "$.note[2].text", "value": "x"}]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TmfError::NoMatch { .. }));
    assert_eq!(err.status_code(), 404);

    let patched = patch(
        &tickets,
        &id,
        json!([{"op": "replace", "path": "$.note[1].text", "value": "Second"}]),
    )
    .await
    .unwrap();
    assert_eq!(patched["note"][1]["text"], "Second");
}

#[tokio::test]
async fn test_operations_see_earlier_operations_of_the_batch() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);

    let patched = patch(
        &tickets,
        &id,
        json!([
            {"op": "add", "path": "$.note", "value": {"author": "Carol", "text": "draft"}},
            {"op": "replace", "path": "$.note[?(@.author=='Carol')].text", "value": "final"},
            {"op": "replace", "path": "$.note[2].author", "value": "Caroline"}
        ]),
    )
    .await
    .unwrap();

    assert_eq!(patched["note"].as_array().unwrap().len(), 3);
    assert_eq!(patched["note"][2]["text"], "final");
    assert_eq!(patched["note"][2]["author"], "Caroline");
    assert!(patched["note"][2]["date"].is_string());
}

#[tokio::test]
async fn test_filtered_replace_is_idempotent() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);
    let body = json!([
        {"op": "replace", "path": "$.relatedParty[?(@.role=='technician')].partyOrPartyRole.name", "value": "Max"}
    ]);

    let mut first = patch(&tickets, &id, body.clone()).await.unwrap();
    let mut second = patch(&tickets, &id, body).await.unwrap();

    first.as_object_mut().unwrap().remove("lastUpdate");
    second.as_object_mut().unwrap().remove("lastUpdate");
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_add_then_remove_restores_relation() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);

    let added = patch(
        &tickets,
        &id,
        json!([{"op": "add", "path": "$.note", "value": [{"author": "Dan", "text": "temp"}]}]),
    )
    .await
    .unwrap();
    assert_eq!(added["note"].as_array().unwrap().len(), 3);

    let removed = patch(
        &tickets,
        &id,
        json!([{"op": "remove", "path": "$.note[?(@.author=='Dan')]"}]),
    )
    .await
    .unwrap();
    assert_eq!(removed["note"], created["note"]);
}

#[tokio::test]
async fn test_remove_of_element_attribute_clears_it() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);

    let patched = patch(
        &tickets,
        &id,
        json!([{"op": "remove", "path": "$.note[0].author"}]),
    )
    .await
    .unwrap();
    assert!(patched["note"][0].get("author").is_none());
    assert_eq!(patched["note"][0]["text"], "Customer called");
}

#[tokio::test]
async fn test_status_change_records_history_and_event() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);

    let patched = patch(
        &tickets,
        &id,
        json!([{"op": "replace", "path": "$.status", "value": "inProgress"}]),
    )
    .await
    .unwrap();

    assert_eq!(patched["status"], "inProgress");
    let history = patched["statusChangeHistory"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1]["status"], "inProgress");
    assert_eq!(history[1]["statusChangeReason"], "Status changed to inProgress");
    assert_eq!(patched["statusChangeDate"], history[1]["statusChangeDate"]);

    let published = tickets.publisher().bus().published().await;
    let (topic, envelope) = published.last().unwrap();
    assert_eq!(topic, "troubleTicket.stateChanged");
    assert_eq!(envelope.event_type, "TroubleTicketStatusChangeEvent");
    assert_eq!(envelope.event["changedAttributes"], json!(["status"]));
    assert_eq!(envelope.event["troubleTicket"]["status"], "inProgress");
}

#[tokio::test]
async fn test_writing_same_status_is_attribute_change() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);

    patch(
        &tickets,
        &id,
        json!([
            {"op": "replace", "path": "$.status", "value": "acknowledged"},
            {"op": "replace", "path": "$.severity", "value": "minor"}
        ]),
    )
    .await
    .unwrap();

    let types = tickets.publisher().bus().event_types().await;
    assert_eq!(
        types,
        vec!["TroubleTicketCreateEvent", "TroubleTicketAttributeValueChangeEvent"]
    );
    let published = tickets.publisher().bus().published().await;
    assert_eq!(
        published[1].1.event["changedAttributes"],
        json!(["status", "severity"])
    );
}

#[tokio::test]
async fn test_invalid_batch_performs_no_writes() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);
    storage.reset_writes();

    let err = patch(
        &tickets,
        &id,
        json!([
            {"op": "replace", "path": "$.name", "value": "Renamed"},
            {"op": "replace", "path": "$.note[?(@.author=='Bob'", "value": "x"}
        ]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TmfError::InvalidPath { .. }));

    let err = patch(
        &tickets,
        &id,
        json!([
            {"op": "replace", "path": "$.name", "value": "Renamed"},
            {"op": "replace", "path": "$.description"}
        ]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TmfError::Validation { .. }));

    let err = patch(
        &tickets,
        &id,
        json!([{"op": "move", "path": "$.name", "value": "x"}]),
    )
    .await
    .unwrap_err();
    assert!(err.is_client_error());

    assert_eq!(storage.writes(), 0);
    let current = tickets.get(&ctx, &id, &[]).await.unwrap();
    assert_eq!(current.entity["name"], "Broadband outage");
}

#[tokio::test]
async fn test_rejected_target_late_in_batch_performs_no_writes() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);
    storage.reset_writes();

    let err = patch(
        &tickets,
        &id,
        json!([
            {"op": "replace", "path": "$.name", "value": "Renamed"},
            {"op": "replace", "path": "$.creationDate", "value": "x"}
        ]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TmfError::NonPatchableField { .. }));

    let err = patch(
        &tickets,
        &id,
        json!([
            {"op": "replace", "path": "$.description", "value": "Changed"},
            {"op": "remove", "path": "$.widgets[0]"}
        ]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TmfError::UnknownRelation { .. }));

    let err = patch(
        &tickets,
        &id,
        json!([
            {"op": "add", "path": "$.note", "value": {"author": "Eve", "text": "New"}},
            {"op": "replace", "path": "$.note[1]", "value": "plain text"}
        ]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TmfError::Validation { .. }));

    assert_eq!(storage.writes(), 0);
    let current = tickets.get(&ctx, &id, &[]).await.unwrap();
    assert_eq!(current.entity["name"], "Broadband outage");
    assert_eq!(current.entity["description"], "No sync on the line");
    assert_eq!(current.entity["note"].as_array().unwrap().len(), 2);

    let storage = RecordingStorage::new();
    let orders = service(ResourceDefinition::product_order(), &storage);
    let created = orders.create(&ctx, product_order()).await.unwrap();
    storage.reset_writes();
    let err = patch(
        &orders,
        &id_of(&created),
        json!([
            {"op": "replace", "path": "$.description", "value": "Changed"},
            {"op": "replace", "path": "$.relatedParty[0].partyOrPartyRole.id", "value": "c9"}
        ]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TmfError::NonPatchableField { .. }));
    assert_eq!(storage.writes(), 0);
}

#[tokio::test]
async fn test_remove_ignores_supplied_value() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);

    let patched = patch(
        &tickets,
        &id,
        json!([
            {"op": "remove", "path": "$.severity", "value": "ignored"},
            {"op": "remove", "path": "$.note[?(@.author=='Alice')]", "value": {"author": "Alice"}}
        ]),
    )
    .await
    .unwrap();

    assert!(patched.get("severity").is_none());
    assert_eq!(texts(&patched, "note", "author"), vec!["Bob"]);
}

#[tokio::test]
async fn test_rejected_targets() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);

    let err = patch(
        &tickets,
        &id,
        json!([{"op": "replace", "path": "$.creationDate", "value": "2020-01-01T00:00:00.000Z"}]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TmfError::NonPatchableField { .. }));

    let err = patch(
        &tickets,
        &id,
        json!([{"op": "replace", "path": "$.attachments[0].name", "value": "x"}]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TmfError::UnknownRelation { .. }));
    assert!(err.to_string().contains("statusChangeHistory"));

    let err = patch(
        &tickets,
        &id,
        json!([{"op": "replace", "path": "$.note[0]", "value": "plain text"}]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TmfError::Validation { .. }));
}

#[tokio::test]
async fn test_nested_field_rules_of_product_order() {
    init_logging();
    let storage = RecordingStorage::new();
    let orders = service(ResourceDefinition::product_order(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = orders.create(&ctx, product_order()).await.unwrap();
    let id = id_of(&created);

    let err = patch(
        &orders,
        &id,
        json!([{"op": "replace", "path": "$.relatedParty[0].partyOrPartyRole.id", "value": "c9"}]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TmfError::NonPatchableField { .. }));

    let err = patch(
        &orders,
        &id,
        json!([{"op": "replace", "path": "$.relatedParty[0].partyOrPartyRole.colour", "value": "red"}]),
    )
    .await
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Validation error: Invalid field 'colour' for 'partyOrPartyRole'. This field does not exist in the schema."
    );

    let patched = patch(
        &orders,
        &id,
        json!([{"op": "replace", "path": "$.relatedParty[0].partyOrPartyRole.name", "value": "Janet"}]),
    )
    .await
    .unwrap();
    assert_eq!(
        patched["relatedParty"][0]["partyOrPartyRole"],
        json!({"id": "c1", "name": "Janet"})
    );
}

#[tokio::test]
async fn test_nested_simple_field_keeps_other_keys() {
    init_logging();
    let storage = RecordingStorage::new();
    let products = service(ResourceDefinition::product(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = products
        .create(
            &ctx,
            json!({
                "name": "Fibre 500",
                "productOffering": {"id": "po1", "name": "Fibre", "version": "1"}
            }),
        )
        .await
        .unwrap();
    let id = id_of(&created);

    let patched = patch(
        &products,
        &id,
        json!([{"op": "replace", "path": "$.productOffering.name", "value": "Fibre Plus"}]),
    )
    .await
    .unwrap();

    assert_eq!(
        patched["productOffering"],
        json!({"id": "po1", "name": "Fibre Plus", "version": "1"})
    );
}

#[tokio::test]
async fn test_merge_patch_merges_relations_by_id() {
    init_logging();
    let storage = RecordingStorage::new();
    let orders = service(ResourceDefinition::product_order(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = orders.create(&ctx, product_order()).await.unwrap();
    let id = id_of(&created);
    let second_item = created["productOrderItem"][1]["id"].clone();

    let patched = patch(
        &orders,
        &id,
        json!({
            "description": "Updated order",
            "productOrderItem": [
                {"id": second_item, "quantity": 5},
                {"action": "add", "quantity": 1, "productOffering": {"id": "po3"}}
            ]
        }),
    )
    .await
    .unwrap();

    let items = patched["productOrderItem"].as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["id"], second_item);
    assert_eq!(items[0]["quantity"], 5);
    assert_eq!(items[0]["action"], "add");
    assert_eq!(items[1]["productOffering"]["id"], "po3");
    assert_eq!(items[2], created["productOrderItem"][0]);
    assert_eq!(patched["description"], "Updated order");

    let published = orders.publisher().bus().published().await;
    let (_, envelope) = published.last().unwrap();
    assert_eq!(envelope.event_type, "ProductOrderAttributeValueChangeEvent");
    assert_eq!(
        envelope.event["changedAttributes"],
        json!(["description", "productOrderItem"])
    );
}

#[tokio::test]
async fn test_merge_patch_state_change() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);

    let patched = patch(
        &tickets,
        &id,
        json!({"status": "resolved", "statusChangeReason": "Line replaced"}),
    )
    .await
    .unwrap();

    let history = patched["statusChangeHistory"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1]["status"], "resolved");
    assert_eq!(history[1]["statusChangeReason"], "Line replaced");

    let published = tickets.publisher().bus().published().await;
    let (_, envelope) = published.last().unwrap();
    assert_eq!(envelope.event_type, "TroubleTicketStatusChangeEvent");
    assert_eq!(
        envelope.event["changedAttributes"],
        json!(["status", "statusChangeReason", "statusChangeHistory"])
    );
}

#[tokio::test]
async fn test_merge_patch_rejects_read_only_fields() {
    init_logging();
    let storage = RecordingStorage::new();
    let tickets = service(ResourceDefinition::trouble_ticket(), &storage);
    let ctx = RequestContext::for_tenant(TENANT);
    let created = tickets.create(&ctx, trouble_ticket()).await.unwrap();
    let id = id_of(&created);
    storage.reset_writes();

    let err = patch(
        &tickets,
        &id,
        json!({"href": "http://elsewhere", "creationDate": "2020-01-01", "name": "x"}),
    )
    .await
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Validation error: Cannot update non-patchable fields: creationDate, href"
    );

    let err = patch(&tickets, &id, json!({"note": {"text": "not an array"}}))
        .await
        .unwrap_err();
    assert!(matches!(err, TmfError::Validation { .. }));
    assert_eq!(storage.writes(), 0);
}
