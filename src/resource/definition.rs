//! Per-resource configuration of the generic services.
//!
//! A [`ResourceDefinition`] is everything that differs between the TMF
//! resources: names, relation arrays, which fields a patch may touch, the
//! lifecycle state field and the event names. The patch engine and the
//! resource service are written once against this description.

use serde_json::{Map, Value};

use crate::error::{TmfError, TmfResult};
use crate::events::EventKind;
use crate::resource::relation::{
    Relation, RelationMap, note_child, status_change_child, typed_child,
};

/// Fields no patch may write, in either patch mode.
pub const READ_ONLY_FIELDS: &[&str] = &["id", "href", "@type", "creationDate"];

/// Lifecycle state handling of a resource.
#[derive(Debug, Clone)]
pub struct StateTracking {
    /// Attribute holding the state, `status` or `state`
    pub field: &'static str,
    /// State given to new resources that do not specify one
    pub default: &'static str,
    /// Relation receiving one entry per state change
    pub history: Option<&'static str>,
    /// Attribute stamped with the time of the last state change
    pub date_field: Option<&'static str>,
    /// Suffix of the state change event name
    pub event_suffix: &'static str,
}

/// Allowed and read-only sub-fields of a nested object inside relation
/// elements.
#[derive(Debug, Clone, Copy)]
pub struct NestedFieldRule {
    pub object: &'static str,
    pub fields: &'static [&'static str],
    pub read_only: &'static [&'static str],
}

/// Configuration of one TMF resource type.
#[derive(Debug, Clone)]
pub struct ResourceDefinition {
    /// Resource type name, e.g. `TroubleTicket`
    pub type_name: &'static str,
    /// Storage collection of the parent rows
    pub collection: String,
    /// Path prefix of `href` values, e.g. `/api/v1/tmf621/troubleTicket/get`
    pub api_path: &'static str,
    pub state: Option<StateTracking>,
    pub relations: RelationMap,
    /// Scalar fields a JSON Patch Query may write
    pub patchable_fields: &'static [&'static str],
    pub required_fields: &'static [&'static str],
    /// Fields kept in responses
    pub schema_fields: &'static [&'static str],
    /// Validation of dotted attributes in relation elements; empty means any
    pub nested_rules: &'static [NestedFieldRule],
}

impl ResourceDefinition {
    /// Lower camel case resource name, used as the event payload key.
    ///
    /// ```rust
    /// use tmf_server::resource::definition::ResourceDefinition;
    ///
    /// assert_eq!(ResourceDefinition::trouble_ticket().payload_key(), "troubleTicket");
    /// ```
    pub fn payload_key(&self) -> String {
        let mut chars = self.type_name.chars();
        match chars.next() {
            Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
            None => String::new(),
        }
    }

    /// TMF API family of the resource, taken from its API path.
    ///
    /// ```rust
    /// use tmf_server::resource::definition::ResourceDefinition;
    ///
    /// assert_eq!(ResourceDefinition::product().api_domain(), "tmf637");
    /// ```
    pub fn api_domain(&self) -> &'static str {
        self.api_path
            .split('/')
            .find(|segment| segment.starts_with("tmf"))
            .unwrap_or_default()
    }

    /// Event type name for an event about this resource.
    pub fn event_type(&self, kind: EventKind) -> String {
        match kind {
            EventKind::Create => format!("{}CreateEvent", self.type_name),
            EventKind::AttributeValueChange => {
                format!("{}AttributeValueChangeEvent", self.type_name)
            }
            EventKind::StateChange => {
                let suffix = self
                    .state
                    .as_ref()
                    .map_or("StateChangeEvent", |state| state.event_suffix);
                format!("{}{}", self.type_name, suffix)
            }
            EventKind::Delete => format!("{}DeleteEvent", self.type_name),
        }
    }

    pub fn state_field(&self) -> Option<&'static str> {
        self.state.as_ref().map(|state| state.field)
    }

    /// Relation receiving state history entries, if configured.
    pub fn history_relation(&self) -> Option<&Relation> {
        self.state
            .as_ref()
            .and_then(|state| state.history)
            .and_then(|name| self.relations.get(name))
    }

    /// Look up a relation, failing with the list of valid relation names.
    pub fn relation(&self, name: &str) -> TmfResult<&Relation> {
        self.relations
            .get(name)
            .ok_or_else(|| TmfError::unknown_relation(self.type_name, name, self.relations.names()))
    }

    pub fn is_read_only(field: &str) -> bool {
        READ_ONLY_FIELDS.contains(&field)
    }

    /// Check that a JSON Patch Query may write a top-level scalar field.
    pub fn check_patchable(&self, field: &str) -> TmfResult<()> {
        if Self::is_read_only(field) || !self.patchable_fields.contains(&field) {
            return Err(TmfError::non_patchable(self.type_name, field));
        }
        Ok(())
    }

    /// Check a dotted attribute of a relation element against the nested
    /// field rules.
    ///
    /// Plain attributes and resources without rules always pass.
    pub fn check_nested_attribute(&self, attribute: &str) -> TmfResult<()> {
        if self.nested_rules.is_empty() {
            return Ok(());
        }
        let Some((object, _)) = attribute.split_once('.') else {
            return Ok(());
        };
        let target = attribute.rsplit('.').next().unwrap_or(attribute);

        let rule = self.nested_rules.iter().find(|rule| rule.object == object);
        match rule {
            Some(rule) if rule.read_only.contains(&target) => Err(TmfError::non_patchable(
                self.type_name,
                format!("{}.{}", object, target),
            )),
            Some(rule) if rule.fields.contains(&target) => Ok(()),
            _ => Err(TmfError::validation(format!(
                "Invalid field '{}' for '{}'. This field does not exist in the schema.",
                target, object
            ))),
        }
    }

    /// Required fields that are missing or empty in a create payload.
    pub fn missing_required<'a>(&'a self, payload: &Map<String, Value>) -> Vec<&'a str> {
        self.required_fields
            .iter()
            .copied()
            .filter(|field| is_missing(payload.get(*field)))
            .collect()
    }

    /// The five supported resources.
    pub fn all() -> Vec<ResourceDefinition> {
        vec![
            Self::trouble_ticket(),
            Self::product_order(),
            Self::shopping_cart(),
            Self::product(),
            Self::cancel_product_order(),
        ]
    }

    /// TMF621 Trouble Ticket.
    pub fn trouble_ticket() -> Self {
        Self {
            type_name: "TroubleTicket",
            collection: "trouble_ticket".to_string(),
            api_path: "/api/v1/tmf621/troubleTicket/get",
            state: Some(StateTracking {
                field: "status",
                default: "acknowledged",
                history: Some("statusChangeHistory"),
                date_field: Some("statusChangeDate"),
                event_suffix: "StatusChangeEvent",
            }),
            relations: RelationMap::new()
                .with("attachment", "Attachment", typed_child)
                .with("note", "Note", note_child)
                .with("relatedEntity", "RelatedEntity", typed_child)
                .with("relatedParty", "RelatedPartyRefOrPartyRoleRef", typed_child)
                .with("troubleTicketRelationship", "TroubleTicketRelationship", typed_child)
                .with("troubleTicketCharacteristic", "Characteristic", typed_child)
                .with("externalIdentifier", "ExternalIdentifier", typed_child)
                .with("statusChangeHistory", "StatusChange", status_change_child),
            patchable_fields: &[
                "name",
                "description",
                "severity",
                "ticketType",
                "priority",
                "status",
                "statusChangeReason",
                "requestedResolutionDate",
                "expectedResolutionDate",
                "resolutionDate",
                "channel",
                "troubleTicketSpecification",
            ],
            required_fields: &["description", "severity", "ticketType"],
            schema_fields: &[
                "id",
                "href",
                "name",
                "description",
                "severity",
                "ticketType",
                "priority",
                "status",
                "statusChangeDate",
                "statusChangeReason",
                "creationDate",
                "lastUpdate",
                "requestedResolutionDate",
                "expectedResolutionDate",
                "resolutionDate",
                "attachment",
                "channel",
                "note",
                "relatedEntity",
                "relatedParty",
                "statusChangeHistory",
                "troubleTicketRelationship",
                "troubleTicketSpecification",
                "troubleTicketCharacteristic",
                "externalIdentifier",
                "@type",
                "@baseType",
                "@schemaLocation",
            ],
            nested_rules: &[],
        }
    }

    /// TMF622 Product Order.
    pub fn product_order() -> Self {
        const REFERENCE_READ_ONLY: &[&str] = &[
            "id",
            "href",
            "@type",
            "@referredType",
            "@baseType",
            "@schemaLocation",
        ];

        Self {
            type_name: "ProductOrder",
            collection: "product_order".to_string(),
            api_path: "/api/v1/tmf622/productOrder/get",
            state: Some(StateTracking {
                field: "state",
                default: "acknowledged",
                history: None,
                date_field: None,
                event_suffix: "StateChangeEvent",
            }),
            relations: RelationMap::new()
                .with("agreement", "AgreementRef", typed_child)
                .with("channel", "RelatedChannel", typed_child)
                .with("externalId", "ExternalIdentifier", typed_child)
                .with("note", "Note", typed_child)
                .with("payment", "PaymentRef", typed_child)
                .with(
                    "productOfferingQualification",
                    "ProductOfferingQualificationRef",
                    typed_child,
                )
                .with("quote", "QuoteRef", typed_child)
                .with("productOrderErrorMessage", "ProductOrderErrorMessage", typed_child)
                .with("productOrderJeopardyAlert", "ProductOrderJeopardyAlert", typed_child)
                .with("productOrderMilestone", "ProductOrderMilestone", typed_child)
                .with("productOrderItem", "ProductOrderItem", typed_child)
                .with("relatedParty", "RelatedPartyRefOrPartyRoleRef", typed_child),
            patchable_fields: &[
                "category",
                "description",
                "priority",
                "requestedCompletionDate",
                "requestedStartDate",
                "state",
                "cancellationDate",
                "cancellationReason",
                "expectedCompletionDate",
                "completionDate",
                "notificationContact",
                "billingAccount",
            ],
            required_fields: &["productOrderItem"],
            schema_fields: &[
                "id",
                "href",
                "category",
                "description",
                "priority",
                "requestedCompletionDate",
                "requestedStartDate",
                "state",
                "requestedInitialState",
                "cancellationDate",
                "cancellationReason",
                "expectedCompletionDate",
                "completionDate",
                "creationDate",
                "notificationContact",
                "agreement",
                "billingAccount",
                "channel",
                "externalId",
                "note",
                "payment",
                "productOfferingQualification",
                "quote",
                "productOrderErrorMessage",
                "productOrderJeopardyAlert",
                "productOrderMilestone",
                "productOrderItem",
                "relatedParty",
                "@type",
                "@baseType",
                "@schemaLocation",
            ],
            nested_rules: &[
                NestedFieldRule {
                    object: "partyOrPartyRole",
                    fields: &[
                        "id",
                        "href",
                        "name",
                        "role",
                        "@type",
                        "@referredType",
                        "@baseType",
                        "@schemaLocation",
                    ],
                    read_only: REFERENCE_READ_ONLY,
                },
                NestedFieldRule {
                    object: "channel",
                    fields: &[
                        "id",
                        "href",
                        "name",
                        "role",
                        "@type",
                        "@referredType",
                        "@baseType",
                        "@schemaLocation",
                    ],
                    read_only: REFERENCE_READ_ONLY,
                },
                NestedFieldRule {
                    object: "productOffering",
                    fields: &[
                        "id",
                        "href",
                        "name",
                        "version",
                        "@type",
                        "@referredType",
                        "@baseType",
                        "@schemaLocation",
                    ],
                    read_only: REFERENCE_READ_ONLY,
                },
                NestedFieldRule {
                    object: "product",
                    fields: &[
                        "id",
                        "href",
                        "name",
                        "@type",
                        "@referredType",
                        "@baseType",
                        "@schemaLocation",
                    ],
                    read_only: REFERENCE_READ_ONLY,
                },
                NestedFieldRule {
                    object: "billingAccount",
                    fields: &[
                        "id",
                        "href",
                        "name",
                        "@type",
                        "@referredType",
                        "@baseType",
                        "@schemaLocation",
                    ],
                    read_only: REFERENCE_READ_ONLY,
                },
            ],
        }
    }

    /// TMF663 Shopping Cart.
    pub fn shopping_cart() -> Self {
        Self {
            type_name: "ShoppingCart",
            collection: "shopping_cart".to_string(),
            api_path: "/api/v1/tmf663/shoppingCart/get",
            state: None,
            relations: RelationMap::new()
                .with("contactMedium", "ContactMedium", typed_child)
                .with("cartItem", "CartItem", typed_child)
                .with("cartTotalPrice", "CartPrice", typed_child)
                .with("relatedParty", "RelatedPartyOrPartyRole", typed_child),
            patchable_fields: &["validFor"],
            required_fields: &[],
            schema_fields: &[
                "id",
                "href",
                "validFor",
                "contactMedium",
                "cartItem",
                "cartTotalPrice",
                "relatedParty",
                "creationDate",
                "lastUpdate",
                "@type",
                "@baseType",
                "@schemaLocation",
            ],
            nested_rules: &[],
        }
    }

    /// TMF637 Product inventory item.
    pub fn product() -> Self {
        Self {
            type_name: "Product",
            collection: "product".to_string(),
            api_path: "/api/v1/tmf637/product/get",
            state: Some(StateTracking {
                field: "status",
                default: "created",
                history: None,
                date_field: None,
                event_suffix: "StateChangeEvent",
            }),
            relations: RelationMap::new()
                .with("productCharacteristic", "Characteristic", typed_child)
                .with("productPrice", "ProductPrice", typed_child)
                .with("productRelationship", "ProductRelationship", typed_child)
                .with("productTerm", "ProductTerm", typed_child)
                .with("productOrderItem", "RelatedOrderItem", typed_child)
                .with("relatedParty", "RelatedPartyOrPartyRole", typed_child)
                .with("place", "RelatedPlaceRefOrValue", typed_child)
                .with("agreementItem", "AgreementItemRef", typed_child)
                .with("realizingResource", "ResourceRef", typed_child)
                .with("realizingService", "ServiceRef", typed_child),
            patchable_fields: &[
                "name",
                "description",
                "isBundle",
                "isCustomerVisible",
                "orderDate",
                "productSerialNumber",
                "startDate",
                "terminationDate",
                "status",
                "productOffering",
                "productSpecification",
                "billingAccount",
                "product",
                "intent",
                "@baseType",
                "@schemaLocation",
            ],
            required_fields: &[],
            schema_fields: &[
                "id",
                "href",
                "name",
                "description",
                "isBundle",
                "isCustomerVisible",
                "orderDate",
                "productSerialNumber",
                "startDate",
                "terminationDate",
                "status",
                "creationDate",
                "productOffering",
                "productSpecification",
                "billingAccount",
                "productCharacteristic",
                "productPrice",
                "productRelationship",
                "productTerm",
                "productOrderItem",
                "product",
                "relatedParty",
                "place",
                "agreementItem",
                "realizingResource",
                "realizingService",
                "intent",
                "@type",
                "@baseType",
                "@schemaLocation",
            ],
            nested_rules: &[],
        }
    }

    /// TMF622 Cancel Product Order request.
    pub fn cancel_product_order() -> Self {
        Self {
            type_name: "CancelProductOrder",
            collection: "cancel_product_order".to_string(),
            api_path: "/api/v1/tmf622/cancelProductOrder/get",
            state: Some(StateTracking {
                field: "state",
                default: "acknowledged",
                history: None,
                date_field: None,
                event_suffix: "StateChangeEvent",
            }),
            relations: RelationMap::new(),
            patchable_fields: &[
                "cancellationReason",
                "requestedCancellationDate",
                "effectiveCancellationDate",
                "state",
                "productOrder",
            ],
            required_fields: &["productOrder"],
            schema_fields: &[
                "id",
                "href",
                "cancellationReason",
                "creationDate",
                "requestedCancellationDate",
                "effectiveCancellationDate",
                "state",
                "productOrder",
                "@type",
                "@baseType",
                "@schemaLocation",
            ],
            nested_rules: &[],
        }
    }
}

/// Whether a required value counts as absent: missing, `null`, `false`, `0`,
/// a blank string or an empty array.
fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::Bool(true)) | Some(Value::Object(_)) => false,
    }
}
