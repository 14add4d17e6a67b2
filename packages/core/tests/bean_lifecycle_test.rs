//! Integration tests for the Bean lifecycle pipeline
//!
//! Tests cover:
//! - Insert, submit, cancel and amend
//! - Optimistic concurrency (timestamp mismatch)
//! - Docstatus transitions
//! - Mandatory and link validation
//! - Inbound link protection on cancel and delete
//! - Permissions and behavior hooks
//! - Single types and renames

mod common;

use anyhow::Result;
use async_trait::async_trait;
use common::{create_customer, create_test_env, create_test_env_with, draft_order, order_item};
use docspace_core::{
    behaviors::{BehaviorRegistry, DocumentBehavior, HookContext},
    config::DocStoreConfig,
    models::{DocField, DocStatus, DocType, Document, FieldKind, Value},
    services::{Bean, DocumentError, LinkMode, PermissionAction, PermissionChecker},
};
use std::sync::{Arc, Mutex};

// =========================================================================
// Insert and Lifecycle
// =========================================================================

#[tokio::test]
async fn test_insert_assigns_name_and_audit_fields() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let service = service.with_user("jane@example.com");

    let mut customer = service.new_bean("Customer").await?;
    customer.set("customer_name", "Acme Corp");
    customer.set("credit_limit", 5000);
    customer.save().await?;

    assert_eq!(customer.name(), Some("CUST-00001"));
    assert!(!customer.is_local());
    assert_eq!(customer.doc().owner.as_deref(), Some("jane@example.com"));
    assert_eq!(customer.doc().modified_by.as_deref(), Some("jane@example.com"));
    assert!(customer.doc().creation.is_some());

    let stored = service.get_document("Customer", "CUST-00001").await?;
    assert_eq!(stored.get_str("customer_name"), Some("Acme Corp"));
    assert_eq!(stored.get("credit_limit"), Some(&Value::Float(5000.0)));
    assert_eq!(stored.modified, customer.modified());

    Ok(())
}

#[tokio::test]
async fn test_new_bean_with_initial_fields_over_defaults() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    service
        .assembler()
        .install_doctype(
            DocType::new("Lead")
                .with_autoname("LEAD-.###")
                .with_field(DocField::new("lead_name", FieldKind::Data).required())
                .with_field(DocField::new("status", FieldKind::Data).with_default("Open"))
                .with_field(DocField::new("source", FieldKind::Data).with_default("Web")),
        )
        .await?;

    let mut lead = service
        .new_bean_with("Lead", [("lead_name", "Ada"), ("source", "Referral")])
        .await?;
    assert!(lead.is_local());
    assert_eq!(lead.get("status"), Some(&Value::Text("Open".to_string())));
    assert_eq!(lead.get("source"), Some(&Value::Text("Referral".to_string())));

    lead.save().await?;
    let stored = service.get_document("Lead", "LEAD-001").await?;
    assert_eq!(stored.get("lead_name"), Some(&Value::Text("Ada".to_string())));
    assert_eq!(stored.get("source"), Some(&Value::Text("Referral".to_string())));

    let err = service
        .new_bean_with("Order Item", [("item_code", "WIDGET")])
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentError::ValidationError(_)));

    Ok(())
}

#[tokio::test]
async fn test_submit_then_cancel_advances_docstatus() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let customer = create_customer(&service, "Acme Corp").await?;

    let mut order = draft_order(&service, &customer, &[("WIDGET", 2), ("GADGET", 1)]).await?;
    assert_eq!(order.docstatus(), DocStatus::Draft);

    order.submit().await?;
    assert_eq!(order.docstatus(), DocStatus::Submitted);

    let reloaded = service.load_bean("Order", order.name().unwrap_or_default()).await?;
    assert_eq!(reloaded.docstatus(), DocStatus::Submitted);
    assert!(reloaded
        .children()
        .iter()
        .all(|row| row.docstatus == DocStatus::Submitted));

    order.cancel().await?;
    assert_eq!(order.docstatus(), DocStatus::Cancelled);
    assert_eq!(
        service
            .get_value("Order", order.name().unwrap_or_default(), "docstatus")
            .await?,
        Some(Value::Int(2))
    );

    Ok(())
}

#[tokio::test]
async fn test_invalid_transitions_are_refused() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let customer = create_customer(&service, "Acme Corp").await?;
    let mut order = draft_order(&service, &customer, &[("WIDGET", 1)]).await?;

    let err = order.cancel().await.unwrap_err();
    assert!(matches!(
        err,
        DocumentError::DocstatusTransitionError { status: DocStatus::Draft, .. }
    ));
    assert_eq!(order.docstatus(), DocStatus::Draft);

    order.submit().await?;
    let err = order.submit().await.unwrap_err();
    assert!(matches!(
        err,
        DocumentError::DocstatusTransitionError { status: DocStatus::Submitted, .. }
    ));

    let err = order.save().await.unwrap_err();
    assert!(matches!(err, DocumentError::DocstatusTransitionError { .. }));

    // Non-submittable types never leave Draft
    let customer_name = create_customer(&service, "Globex").await?;
    let mut customer = service.load_bean("Customer", &customer_name).await?;
    let err = customer.submit().await.unwrap_err();
    assert!(matches!(err, DocumentError::ValidationError(_)));

    Ok(())
}

#[tokio::test]
async fn test_stale_bean_fails_with_timestamp_mismatch() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let name = create_customer(&service, "Acme Corp").await?;

    let mut first = service.load_bean("Customer", &name).await?;
    let mut second = service.load_bean("Customer", &name).await?;

    second.set("territory", "North");
    second.save().await?;

    first.set("territory", "South");
    let err = first.save().await.unwrap_err();
    assert!(matches!(err, DocumentError::TimestampMismatchError { .. }));

    // The failed save changed nothing
    assert_eq!(
        service.get_value("Customer", &name, "territory").await?,
        Some(Value::Text("North".to_string()))
    );

    // Saving the same bean twice keeps working
    second.set("territory", "East");
    second.save().await?;

    Ok(())
}

#[tokio::test]
async fn test_update_after_submit_only_allows_flagged_fields() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let customer = create_customer(&service, "Acme Corp").await?;
    let mut order = draft_order(&service, &customer, &[("WIDGET", 1)]).await?;
    order.submit().await?;

    order.set("status", "Shipped");
    order.update_after_submit().await?;
    assert_eq!(
        service
            .get_value("Order", order.name().unwrap_or_default(), "status")
            .await?,
        Some(Value::Text("Shipped".to_string()))
    );

    order.set("notes", "rush");
    let err = order.update_after_submit().await.unwrap_err();
    match err {
        DocumentError::ValidationError(msg) => assert!(msg.contains("notes")),
        other => panic!("expected ValidationError, got {:?}", other),
    }

    Ok(())
}

fn item_codes(order: &Bean) -> Vec<Option<Value>> {
    order
        .children_of("items")
        .map(|row| row.get("item_code").cloned())
        .collect()
}

#[tokio::test]
async fn test_update_after_submit_locks_child_rows() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let customer = create_customer(&service, "Acme Corp").await?;
    let mut order = draft_order(&service, &customer, &[("WIDGET", 1), ("GADGET", 2)]).await?;
    order.submit().await?;
    let name = order.name().unwrap_or_default().to_string();

    // rows can be neither removed nor added
    let mut edited = service.load_bean("Order", &name).await?;
    let widget = edited.children_of("items").next().and_then(|c| c.name.clone()).unwrap_or_default();
    edited.remove_child(&widget);
    edited.append_child("items", order_item("HACK", 9));
    let err = edited.update_after_submit().await.unwrap_err();
    assert!(matches!(err, DocumentError::ValidationError(ref msg) if msg.contains("items")));

    // nor can values of existing rows change
    let mut edited = service.load_bean("Order", &name).await?;
    if let Some(row) = edited.child_mut(&widget) {
        row.set("qty", 50);
    }
    let err = edited.update_after_submit().await.unwrap_err();
    assert!(matches!(err, DocumentError::ValidationError(ref msg) if msg.contains("items row #1: qty")));

    let stored = service.load_bean("Order", &name).await?;
    assert_eq!(
        item_codes(&stored),
        vec![
            Some(Value::Text("WIDGET".to_string())),
            Some(Value::Text("GADGET".to_string()))
        ]
    );

    // untouched rows pass alongside an allowed parent change
    let mut edited = service.load_bean("Order", &name).await?;
    edited.set("status", "Packed");
    edited.update_after_submit().await?;

    Ok(())
}

#[tokio::test]
async fn test_amend_cancelled_order() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let customer = create_customer(&service, "Acme Corp").await?;
    let mut order = draft_order(&service, &customer, &[("WIDGET", 3)]).await?;

    assert!(matches!(
        order.amend().unwrap_err(),
        DocumentError::DocstatusTransitionError { .. }
    ));

    order.submit().await?;
    order.cancel().await?;

    let mut amended = order.amend()?;
    assert!(amended.is_local());
    assert_eq!(amended.docstatus(), DocStatus::Draft);
    amended.save().await?;

    assert_eq!(amended.name(), Some("ORD-00001-1"));
    assert_eq!(amended.doc().get_str("amended_from"), Some("ORD-00001"));
    assert_eq!(amended.children().len(), 1);
    assert_eq!(amended.children()[0].parent.as_deref(), Some("ORD-00001-1"));

    amended.submit().await?;
    amended.cancel().await?;
    let mut second = amended.amend()?;
    second.save().await?;
    assert_eq!(second.name(), Some("ORD-00001-2"));

    Ok(())
}

// =========================================================================
// Validation
// =========================================================================

#[tokio::test]
async fn test_mandatory_errors_are_aggregated() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;

    let mut order = service.new_bean("Order").await?;
    let err = order.save().await.unwrap_err();
    match err {
        DocumentError::MandatoryError { doctype, fields } => {
            assert_eq!(doctype, "Order");
            assert_eq!(fields, vec!["customer".to_string(), "items".to_string()]);
        }
        other => panic!("expected MandatoryError, got {:?}", other),
    }
    assert!(order.is_local());
    assert!(order.name().is_none());

    let customer = create_customer(&service, "Acme Corp").await?;
    order.set("customer", customer.as_str());
    order.append_child("items", order_item("WIDGET", 1));
    order.append_child("items", Document::new("Order Item"));
    let err = order.save().await.unwrap_err();
    match err {
        DocumentError::MandatoryError { fields, .. } => {
            assert_eq!(fields, vec!["items row #2: item_code".to_string()]);
        }
        other => panic!("expected MandatoryError, got {:?}", other),
    }

    Ok(())
}

#[tokio::test]
async fn test_unresolved_links_in_strict_and_lenient_mode() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let customer = create_customer(&service, "Acme Corp").await?;

    let mut order = service.new_bean("Order").await?;
    order.set("customer", "CUST-404");
    let mut row = order_item("WIDGET", 1);
    row.set("ship_to", "CUST-999");
    order.append_child("items", row);

    let err = order.save().await.unwrap_err();
    match err {
        DocumentError::InvalidLinks { links } => {
            assert_eq!(
                links,
                vec![
                    "customer = CUST-404".to_string(),
                    "items row #1: ship_to = CUST-999".to_string(),
                ]
            );
        }
        other => panic!("expected InvalidLinks, got {:?}", other),
    }

    order.set("customer", customer.as_str());
    order.set_link_mode(LinkMode::Lenient);
    order.save().await?;
    assert_eq!(order.children()[0].get("ship_to"), Some(&Value::Null));

    Ok(())
}

#[tokio::test]
async fn test_tolerant_and_strict_unknown_fields() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let mut customer = service.new_bean("Customer").await?;
    customer.set("customer_name", "Acme Corp");
    customer.set("favourite_colour", "green");
    customer.save().await?;
    assert!(customer.get("favourite_colour").is_none());

    let strict = DocStoreConfig {
        tolerant_writes: false,
        ..DocStoreConfig::default()
    };
    let (service, _temp_dir) = create_test_env_with(strict).await?;
    let mut customer = service.new_bean("Customer").await?;
    customer.set("customer_name", "Acme Corp");
    customer.set("favourite_colour", "green");
    let err = customer.save().await.unwrap_err();
    assert!(matches!(err, DocumentError::ValidationError(_)));
    assert!(!service.exists("Customer", "CUST-00001").await?);

    Ok(())
}

// =========================================================================
// Inbound Links
// =========================================================================

#[tokio::test]
async fn test_cancel_refused_while_referenced() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let customer = create_customer(&service, "Acme Corp").await?;
    let mut order = draft_order(&service, &customer, &[("WIDGET", 1)]).await?;
    order.submit().await?;
    let order_name = order.name().unwrap_or_default().to_string();

    let mut note = service.new_bean("Delivery Note").await?;
    note.set("against_order", order_name.as_str());
    note.save().await?;
    assert_eq!(note.name(), Some("DN-001"));

    let err = order.cancel().await.unwrap_err();
    match err {
        DocumentError::LinkExistsError { linked_with, .. } => {
            assert_eq!(linked_with, vec!["Delivery Note DN-001".to_string()]);
        }
        other => panic!("expected LinkExistsError, got {:?}", other),
    }
    assert_eq!(order.docstatus(), DocStatus::Submitted);

    note.submit().await?;
    note.cancel().await?;
    order.cancel().await?;

    Ok(())
}

#[tokio::test]
async fn test_delete_rules() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let customer = create_customer(&service, "Acme Corp").await?;
    let mut order = draft_order(&service, &customer, &[("WIDGET", 1), ("GADGET", 2)]).await?;
    let order_name = order.name().unwrap_or_default().to_string();

    let err = service.delete_document("Customer", &customer).await.unwrap_err();
    assert!(matches!(err, DocumentError::LinkExistsError { .. }));

    order.submit().await?;
    let err = service.delete_document("Order", &order_name).await.unwrap_err();
    assert!(matches!(
        err,
        DocumentError::DocstatusTransitionError { status: DocStatus::Submitted, .. }
    ));

    order.cancel().await?;
    service.delete_document("Order", &order_name).await?;
    assert!(!service.exists("Order", &order_name).await?);
    let err = service.load_bean("Order", &order_name).await.unwrap_err();
    assert!(matches!(err, DocumentError::RecordNotFound { .. }));

    // Child rows went with the parent, so the customer is free again
    service.delete_document("Customer", &customer).await?;

    Ok(())
}

// =========================================================================
// Permissions and Hooks
// =========================================================================

struct NoSubmit;

#[async_trait]
impl PermissionChecker for NoSubmit {
    async fn has_permission(
        &self,
        _user: &str,
        _doctype: &str,
        action: PermissionAction,
        _doc: &Document,
    ) -> bool {
        action != PermissionAction::Submit
    }
}

#[tokio::test]
async fn test_permission_denial_aborts_operation() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let service = service.with_permissions(NoSubmit).with_user("clerk");
    let customer = create_customer(&service, "Acme Corp").await?;
    let mut order = draft_order(&service, &customer, &[("WIDGET", 1)]).await?;

    let err = order.submit().await.unwrap_err();
    match err {
        DocumentError::BeanPermissionError { action, user, .. } => {
            assert_eq!(action, "submit");
            assert_eq!(user, "clerk");
        }
        other => panic!("expected BeanPermissionError, got {:?}", other),
    }
    assert_eq!(order.docstatus(), DocStatus::Draft);

    Ok(())
}

struct OrderBehavior {
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl DocumentBehavior for OrderBehavior {
    async fn before_insert(&self, ctx: &mut HookContext<'_>) -> Result<(), DocumentError> {
        self.calls.lock().unwrap().push("before_insert".to_string());
        ctx.doc.set("status", "New");
        Ok(())
    }

    async fn validate(&self, ctx: &mut HookContext<'_>) -> Result<(), DocumentError> {
        self.calls.lock().unwrap().push("validate".to_string());
        let total: i64 = ctx.children.iter().filter_map(|row| row.get_i64("qty")).sum();
        if total > 100 {
            return Err(DocumentError::validation("Order exceeds 100 units"));
        }
        Ok(())
    }

    async fn on_update(&self, _ctx: &mut HookContext<'_>) -> Result<(), DocumentError> {
        self.calls.lock().unwrap().push("on_update".to_string());
        Ok(())
    }

    async fn on_submit(&self, ctx: &mut HookContext<'_>) -> Result<(), DocumentError> {
        self.calls.lock().unwrap().push("on_submit".to_string());
        if ctx.doc.get_str("notes") == Some("fail on submit") {
            return Err(DocumentError::validation("submit hook failed"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_hooks_run_in_order_and_errors_roll_back() -> Result<()> {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = BehaviorRegistry::new();
    registry.register(
        "Order",
        OrderBehavior {
            calls: calls.clone(),
        },
    );

    let (service, _temp_dir) = create_test_env().await?;
    let service = service.with_registry(registry);
    let customer = create_customer(&service, "Acme Corp").await?;

    let mut order = draft_order(&service, &customer, &[("WIDGET", 1)]).await?;
    assert_eq!(
        *calls.lock().unwrap(),
        vec!["before_insert", "validate", "on_update"]
    );
    assert_eq!(order.get("status"), Some(&Value::Text("New".to_string())));

    // validate failure leaves nothing behind
    let mut big = service.new_bean("Order").await?;
    big.set("customer", customer.as_str());
    big.append_child("items", order_item("PALLET", 500));
    let err = big.save().await.unwrap_err();
    assert!(matches!(err, DocumentError::ValidationError(_)));
    assert!(big.is_local());
    assert!(!service.exists("Order", "ORD-00002").await?);

    // a failing post hook rolls back the submit
    order.set("notes", "fail on submit");
    order.save().await?;
    let err = order.submit().await.unwrap_err();
    assert!(matches!(err, DocumentError::ValidationError(_)));
    assert_eq!(order.docstatus(), DocStatus::Draft);
    assert_eq!(
        service
            .get_value("Order", order.name().unwrap_or_default(), "docstatus")
            .await?,
        Some(Value::Int(0))
    );

    calls.lock().unwrap().clear();
    order.run_method("on_update").await?;
    assert_eq!(*calls.lock().unwrap(), vec!["on_update"]);
    assert!(matches!(
        order.run_method("on_trash").await.unwrap_err(),
        DocumentError::ValidationError(_)
    ));

    Ok(())
}

// =========================================================================
// Singles and Renames
// =========================================================================

#[tokio::test]
async fn test_single_type_round_trip() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let customer = create_customer(&service, "Acme Corp").await?;

    assert!(matches!(
        service.load_bean("Shop Settings", "Shop Settings").await.unwrap_err(),
        DocumentError::RecordNotFound { .. }
    ));

    let mut settings = service.new_bean("Shop Settings").await?;
    assert_eq!(settings.name(), Some("Shop Settings"));
    settings.set("company", "Acme Retail");
    settings.set("max_discount", 12.5);
    settings.set("default_customer", customer.as_str());
    settings.save().await?;

    assert_eq!(
        service.get_single_value("Shop Settings", "company").await?,
        Some(Value::Text("Acme Retail".to_string()))
    );
    assert_eq!(
        service.get_single_value("Shop Settings", "max_discount").await?,
        Some(Value::Float(12.5))
    );

    service
        .set_single_value("Shop Settings", "company", "Acme Wholesale")
        .await?;
    let mut reloaded = service.load_bean("Shop Settings", "Shop Settings").await?;
    assert_eq!(reloaded.get("company"), Some(&Value::Text("Acme Wholesale".to_string())));

    // the loaded bean is stale after set_single_value bumped modified
    let err = settings.save().await.unwrap_err();
    assert!(matches!(err, DocumentError::TimestampMismatchError { .. }));

    reloaded.set("max_discount", 15);
    reloaded.save().await?;
    assert_eq!(
        service.get_value("Shop Settings", "Shop Settings", "max_discount").await?,
        Some(Value::Float(15.0))
    );

    assert!(matches!(
        service.get_single_value("Customer", "customer_name").await.unwrap_err(),
        DocumentError::ValidationError(_)
    ));

    Ok(())
}

#[tokio::test]
async fn test_rename_rewrites_links_and_children() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let customer = create_customer(&service, "Acme Corp").await?;
    let other = create_customer(&service, "Globex").await?;

    let mut order = service.new_bean("Order").await?;
    order.set("customer", customer.as_str());
    let mut row = order_item("WIDGET", 1);
    row.set("ship_to", customer.as_str());
    order.append_child("items", row);
    order.save().await?;
    let order_name = order.name().unwrap_or_default().to_string();

    service
        .set_single_value("Shop Settings", "default_customer", customer.as_str())
        .await?;

    let err = service
        .rename_document("Customer", &customer, &other)
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentError::NameError(_)));

    let renamed = service
        .rename_document("Customer", &customer, "ACME")
        .await?;
    assert_eq!(renamed, "ACME");
    assert!(!service.exists("Customer", &customer).await?);
    assert!(service.exists("Customer", "ACME").await?);

    let reloaded = service.load_bean("Order", &order_name).await?;
    assert_eq!(reloaded.get("customer"), Some(&Value::Text("ACME".to_string())));
    assert_eq!(reloaded.children()[0].get_str("ship_to"), Some("ACME"));
    assert_eq!(
        service
            .get_single_value("Shop Settings", "default_customer")
            .await?,
        Some(Value::Text("ACME".to_string()))
    );

    // renaming the parent re-points its child rows
    service.rename_document("Order", &order_name, "ORD-RENAMED").await?;
    let moved = service.load_bean("Order", "ORD-RENAMED").await?;
    assert_eq!(moved.children().len(), 1);
    assert_eq!(moved.children()[0].parent.as_deref(), Some("ORD-RENAMED"));

    Ok(())
}
