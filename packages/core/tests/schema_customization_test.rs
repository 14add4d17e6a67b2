//! Integration tests for schema assembly and customization
//!
//! Tests cover:
//! - Property Setters applied and reverted
//! - Custom Fields extending tables and effective field order
//! - Rejected overrides
//! - Cache invalidation across views

mod common;

use anyhow::Result;
use common::{create_customer, create_test_env};
use docspace_core::{
    db::{meta_store, DatabaseService},
    models::{CustomField, DocField, DocType, FieldKind, Value},
    services::{DocumentError, SchemaView},
};

fn fieldnames(doctype: &DocType) -> Vec<&str> {
    doctype.fields.iter().map(|f| f.fieldname.as_str()).collect()
}

#[tokio::test]
async fn test_property_setter_applied_and_reverted() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let assembler = service.assembler();

    assert!(assembler.assemble("Customer").await?.doctype.field("territory").map_or(false, |f| !f.reqd));

    assembler
        .set_property("Customer", Some("territory"), "reqd", "1")
        .await?;
    let schema = assembler.assemble("Customer").await?;
    assert!(schema.doctype.field("territory").map_or(false, |f| f.reqd));

    // the override is enforced on save
    let mut customer = service.new_bean("Customer").await?;
    customer.set("customer_name", "Acme Corp");
    let err = customer.save().await.unwrap_err();
    assert!(matches!(err, DocumentError::MandatoryError { ref fields, .. } if fields == &vec!["territory".to_string()]));

    // replacing keeps one setter per key
    assembler
        .set_property("Customer", Some("territory"), "reqd", "0")
        .await?;
    let conn = service.db().connect_with_timeout().await?;
    assert_eq!(meta_store::load_property_setters(&conn, "Customer").await?.len(), 1);

    assert!(assembler.remove_property("Customer", Some("territory"), "reqd").await?);
    assert!(!assembler.remove_property("Customer", Some("territory"), "reqd").await?);
    let schema = assembler.assemble("Customer").await?;
    assert!(!schema.doctype.field("territory").map_or(true, |f| f.reqd));

    customer.save().await?;

    Ok(())
}

#[tokio::test]
async fn test_doctype_level_property_setter() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let assembler = service.assembler();

    assembler
        .set_property("Customer", None, "autoname", "C-.YY.-.###")
        .await?;
    let name = create_customer(&service, "Acme Corp").await?;
    assert!(name.starts_with("C-"));
    assert!(name.ends_with("-001"));
    assert_eq!(name.len(), "C-24-001".len());

    assembler.remove_property("Customer", None, "autoname").await?;
    assert_eq!(create_customer(&service, "Globex").await?, "CUST-00001");

    Ok(())
}

#[tokio::test]
async fn test_illegal_overrides_are_rejected() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let assembler = service.assembler();

    let err = assembler
        .set_property("Customer", Some("no_such_field"), "reqd", "1")
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentError::ValidationError(_)));

    let err = assembler
        .set_property("Customer", Some("credit_limit"), "fieldtype", "Table")
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentError::ValidationError(_)));

    let err = assembler
        .set_property("Customer", None, "is_single", "1")
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentError::ValidationError(_)));

    let err = assembler
        .set_property("Nope", None, "autoname", "hash")
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentError::RecordNotFound { .. }));

    Ok(())
}

#[tokio::test]
async fn test_custom_field_extends_table_and_order() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let assembler = service.assembler();
    let existing = create_customer(&service, "Acme Corp").await?;

    assembler
        .add_custom_field(CustomField::new(
            "Customer",
            DocField::new("tax_id", FieldKind::Data).after("customer_name"),
        ))
        .await?;

    let schema = assembler.assemble("Customer").await?;
    assert_eq!(
        fieldnames(&schema.doctype),
        vec!["customer_name", "tax_id", "territory", "credit_limit"]
    );

    // rows written before the column existed read back as Null
    assert_eq!(service.get_value("Customer", &existing, "tax_id").await?, Some(Value::Null));

    let mut customer = service.new_bean("Customer").await?;
    customer.set("customer_name", "Globex");
    customer.set("tax_id", "GB-123");
    customer.save().await?;
    assert_eq!(
        service
            .get_value("Customer", customer.name().unwrap_or_default(), "tax_id")
            .await?,
        Some(Value::Text("GB-123".to_string()))
    );

    let err = assembler
        .add_custom_field(CustomField::new("Customer", DocField::new("territory", FieldKind::Data)))
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentError::ValidationError(_)));

    assembler.remove_custom_field("Customer", "tax_id").await?;
    let schema = assembler.assemble("Customer").await?;
    assert!(schema.doctype.field("tax_id").is_none());

    let err = service.get_value("Customer", &existing, "tax_id").await.unwrap_err();
    assert!(matches!(err, DocumentError::ValidationError(_)));

    Ok(())
}

#[tokio::test]
async fn test_child_customization_invalidates_parent_bundle() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let assembler = service.assembler();

    let bundle = assembler.assemble_bundle("Order").await?;
    assert!(bundle.child("Order Item").is_some());
    assert!(bundle.parent.doctype.field("amended_from").is_some());
    assert!(assembler.cache().contains("Order", SchemaView::Decorated).await);

    assembler
        .set_property("Order Item", Some("qty"), "reqd", "1")
        .await?;
    assert!(!assembler.cache().contains("Order", SchemaView::Decorated).await);

    let bundle = assembler.assemble_bundle("Order").await?;
    let qty = bundle
        .child("Order Item")
        .and_then(|child| child.field("qty"))
        .map(|f| f.reqd);
    assert_eq!(qty, Some(true));

    Ok(())
}

#[tokio::test]
async fn test_reinstall_adds_columns_and_bumps_version() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let assembler = service.assembler();
    let existing = create_customer(&service, "Acme Corp").await?;

    let version = assembler
        .install_doctype(
            DocType::new("Customer")
                .with_autoname("CUST-.#####")
                .with_field(DocField::new("customer_name", FieldKind::Data).required())
                .with_field(DocField::new("territory", FieldKind::Data))
                .with_field(DocField::new("credit_limit", FieldKind::Currency))
                .with_field(DocField::new("website", FieldKind::Data)),
        )
        .await?;
    assert_eq!(version, 2);

    let conn = service.db().connect_with_timeout().await?;
    assert!(DatabaseService::table_exists(&conn, "tabCustomer").await?);
    assert_eq!(service.get_value("Customer", &existing, "website").await?, Some(Value::Null));
    assert_eq!(
        service.get_value("Customer", &existing, "customer_name").await?,
        Some(Value::Text("Acme Corp".to_string()))
    );

    Ok(())
}

#[tokio::test]
async fn test_submittable_override_extends_table() -> Result<()> {
    let (service, _temp_dir) = create_test_env().await?;
    let assembler = service.assembler();
    create_customer(&service, "Before Override").await?;

    assembler
        .set_property("Customer", None, "is_submittable", "1")
        .await?;
    let schema = assembler.assemble("Customer").await?;
    assert!(schema.doctype.field("amended_from").is_some());

    let mut customer = service.new_bean("Customer").await?;
    customer.set("customer_name", "Acme Corp");
    customer.save().await?;
    customer.submit().await?;
    customer.cancel().await?;

    let mut amended = customer.amend()?;
    amended.save().await?;
    assert_eq!(
        amended.get("amended_from"),
        Some(&Value::Text(customer.name().unwrap_or_default().to_string()))
    );

    // reverting keeps the column and existing rows stay readable
    assert!(assembler.remove_property("Customer", None, "is_submittable").await?);
    let name = create_customer(&service, "After Revert").await?;
    assert!(service.exists("Customer", &name).await?);

    Ok(())
}
