//! Shared fixtures for unit tests.

use autoflow_catalog::{
    CONDITION_OPERATORS, Catalog, CatalogDocument, ConfigField, FieldType, IntegrationDefinition,
    NodeKind,
};

pub(crate) const TRIGGER: &str = "webhook.catch_hook";
pub(crate) const NOTIFY: &str = "chat.notify";
pub(crate) const SEND_EMAIL: &str = "mail.send";
pub(crate) const SCORE: &str = "crm.score";
pub(crate) const IF: &str = "logic.if";

/// A small catalog covering every node kind.
pub(crate) fn catalog() -> Catalog {
    let document = CatalogDocument {
        version: "test".to_string(),
        definitions: vec![
            IntegrationDefinition::new(TRIGGER, "Catch Hook", NodeKind::Trigger, "webhooks"),
            IntegrationDefinition::new(NOTIFY, "Notify", NodeKind::Action, "chat")
                .with_field(ConfigField::new("message", "Message", FieldType::Textarea)),
            IntegrationDefinition::new(SEND_EMAIL, "Send Email", NodeKind::Action, "email")
                .with_field(ConfigField::new("to", "To", FieldType::Text).required())
                .with_field(ConfigField::new("subject", "Subject", FieldType::Text)),
            IntegrationDefinition::new(SCORE, "Score Lead", NodeKind::Action, "crm")
                .with_field(ConfigField::new("lead_score", "Score", FieldType::Number)),
            IntegrationDefinition::new(IF, "If / Else", NodeKind::Condition, "logic")
                .with_field(ConfigField::new("left", "Value", FieldType::Text).required())
                .with_field(
                    ConfigField::new("operator", "Operator", FieldType::Select)
                        .required()
                        .with_options(CONDITION_OPERATORS),
                )
                .with_field(ConfigField::new("right", "Compare to", FieldType::Text)),
        ],
    };
    Catalog::from_document(document).expect("test catalog")
}

/// `{{<node>.<path>}}` for a node id.
pub(crate) fn placeholder(node_id: autoflow_core::NodeId, path: &str) -> String {
    format!("{{{{{node_id}.{path}}}}}")
}
