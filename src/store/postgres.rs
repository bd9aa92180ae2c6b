use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use uuid::Uuid;

use super::{AuditLog, DeletionReport, OrderStore, StoreError, SyncFields, Write, WriteBatch};
use crate::audit::{ModificationLogEntry, StatusLogEntry};
use crate::domain::order::{Actor, FieldChange, LineItem, Order, OrderTypeTag, OrderTypes, Payment};
use crate::domain::subsystems::{InspectionView, InstallationView, ManufacturingView, SubsystemGateway};

const SCHEMA: &str = include_str!("../../migrations/0001_orders.sql");

const ORDER_COLUMNS: &str = "id, customer_id, order_types, status, inspection_status, installation_status, \
    is_fully_completed, status_pinned, subtotal, discount_total, paid_amount, contract_number, invoice_number, notes, \
    delivery_type, delivery_address, expected_delivery, order_date, branch_id, salesperson_id, \
    payment_verified, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, order_id, product_id, product_name, quantity, unit_price, discount_percent, \
    discount_amount, line_total, active, cutting_status";

// ============================================================================
// Postgres Store
// ============================================================================

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        tracing::info!(max_connections, "Connected to Postgres");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("Schema migrations applied");
        Ok(())
    }
}

fn parse_column<T>(raw: &str, column: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("{column}: {e}")))
}

fn parse_optional<T>(raw: Option<String>, column: &str) -> Result<Option<T>, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.map(|value| parse_column(&value, column)).transpose()
}

fn actor_from(id: Option<Uuid>, name: Option<String>) -> Option<Actor> {
    match (id, name) {
        (Some(id), Some(name)) => Some(Actor::new(id, name)),
        (Some(id), None) => Some(Actor::new(id, "")),
        _ => None,
    }
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let order_types: Vec<String> = row.try_get("order_types")?;
    let status: String = row.try_get("status")?;
    let delivery_type: String = row.try_get("delivery_type")?;

    Ok(Order {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        order_types: OrderTypes::parse(&order_types)
            .map_err(|e| StoreError::Corrupt(format!("order_types: {e}")))?,
        status: parse_column(&status, "status")?,
        inspection_status: parse_optional(row.try_get("inspection_status")?, "inspection_status")?,
        installation_status: parse_optional(row.try_get("installation_status")?, "installation_status")?,
        is_fully_completed: row.try_get("is_fully_completed")?,
        status_pinned: row.try_get("status_pinned")?,
        subtotal: row.try_get("subtotal")?,
        discount_total: row.try_get("discount_total")?,
        paid_amount: row.try_get("paid_amount")?,
        contract_number: row.try_get("contract_number")?,
        invoice_number: row.try_get("invoice_number")?,
        notes: row.try_get("notes")?,
        delivery_type: parse_column(&delivery_type, "delivery_type")?,
        delivery_address: row.try_get("delivery_address")?,
        expected_delivery: row.try_get("expected_delivery")?,
        order_date: row.try_get("order_date")?,
        branch_id: row.try_get("branch_id")?,
        salesperson_id: row.try_get("salesperson_id")?,
        payment_verified: row.try_get("payment_verified")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<LineItem, StoreError> {
    Ok(LineItem {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        product_id: row.try_get("product_id")?,
        product_name: row.try_get("product_name")?,
        quantity: row.try_get("quantity")?,
        unit_price: row.try_get("unit_price")?,
        discount_percent: row.try_get("discount_percent")?,
        discount_amount: row.try_get("discount_amount")?,
        line_total: row.try_get("line_total")?,
        active: row.try_get("active")?,
        cutting_status: parse_optional(row.try_get("cutting_status")?, "cutting_status")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, StoreError> {
    let method: String = row.try_get("method")?;
    Ok(Payment {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        amount: row.try_get("amount")?,
        method: parse_column(&method, "method")?,
        paid_at: row.try_get("paid_at")?,
        reference: row.try_get("reference")?,
    })
}

fn status_entry_from_row(row: &PgRow) -> Result<StatusLogEntry, StoreError> {
    let kind: String = row.try_get("kind")?;
    Ok(StatusLogEntry {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        kind: parse_column(&kind, "kind")?,
        field: row.try_get("field")?,
        old_value: row.try_get("old_value")?,
        new_value: row.try_get("new_value")?,
        old_display: row.try_get("old_display")?,
        new_display: row.try_get("new_display")?,
        note: row.try_get("note")?,
        actor: actor_from(row.try_get("actor_id")?, row.try_get("actor_name")?),
        is_automatic: row.try_get("is_automatic")?,
        created_at: row.try_get("created_at")?,
    })
}

fn modification_from_row(row: &PgRow) -> Result<ModificationLogEntry, StoreError> {
    let decode = |column: &str| -> Result<String, StoreError> { Ok(row.try_get::<String, _>(column)?) };
    let corrupt = |column: &'static str| move |e: serde_json::Error| StoreError::Corrupt(format!("{column}: {e}"));

    Ok(ModificationLogEntry {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        actor: Actor::new(row.try_get("actor_id")?, row.try_get::<String, _>("actor_name")?),
        totals_before: serde_json::from_str(&decode("totals_before")?).map_err(corrupt("totals_before"))?,
        totals_after: serde_json::from_str(&decode("totals_after")?).map_err(corrupt("totals_after"))?,
        changes: serde_json::from_str(&decode("changes")?).map_err(corrupt("changes"))?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn ensure_updated(rows: u64, entity: &'static str, id: Uuid) -> Result<(), StoreError> {
    if rows == 0 {
        return Err(StoreError::NotFound { entity, id });
    }
    Ok(())
}

// ============================================================================
// Writes - shared by single calls and committed batches
// ============================================================================

async fn insert_status_entry(conn: &mut PgConnection, entry: &StatusLogEntry) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO order_status_log (
            id, order_id, kind, field, old_value, new_value, old_display,
            new_display, note, actor_id, actor_name, is_automatic, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(entry.id)
    .bind(entry.order_id)
    .bind(entry.kind.as_str())
    .bind(entry.field.as_deref())
    .bind(&entry.old_value)
    .bind(&entry.new_value)
    .bind(&entry.old_display)
    .bind(&entry.new_display)
    .bind(&entry.note)
    .bind(entry.actor.as_ref().map(|a| a.id))
    .bind(entry.actor.as_ref().map(|a| a.name.as_str()))
    .bind(entry.is_automatic)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_modification(conn: &mut PgConnection, entry: &ModificationLogEntry) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO order_modification_log (
            id, order_id, actor_id, actor_name, totals_before, totals_after,
            changes, note, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(entry.id)
    .bind(entry.order_id)
    .bind(entry.actor.id)
    .bind(&entry.actor.name)
    .bind(to_json(&entry.totals_before)?)
    .bind(to_json(&entry.totals_after)?)
    .bind(to_json(&entry.changes)?)
    .bind(&entry.note)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_order(conn: &mut PgConnection, order: &Order) -> Result<(), StoreError> {
    let result = sqlx::query(&format!(
        "INSERT INTO orders ({ORDER_COLUMNS}) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
            $17, $18, $19, $20, $21, $22, $23
        ) ON CONFLICT (id) DO NOTHING"
    ))
    .bind(order.id)
    .bind(order.customer_id)
    .bind(order.order_types.to_strings())
    .bind(order.status.as_str())
    .bind(order.inspection_status.map(|s| s.as_str()))
    .bind(order.installation_status.map(|s| s.as_str()))
    .bind(order.is_fully_completed)
    .bind(order.status_pinned)
    .bind(order.subtotal)
    .bind(order.discount_total)
    .bind(order.paid_amount)
    .bind(order.contract_number.as_deref())
    .bind(order.invoice_number.as_deref())
    .bind(order.notes.as_deref())
    .bind(order.delivery_type.as_str())
    .bind(order.delivery_address.as_deref())
    .bind(order.expected_delivery)
    .bind(order.order_date)
    .bind(order.branch_id)
    .bind(order.salesperson_id)
    .bind(order.payment_verified)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict(format!("order {} already exists", order.id)));
    }
    Ok(())
}

/// `UPDATE orders` setting only the columns named by `changes`.
fn fields_update(id: Uuid, changes: &[FieldChange]) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new("UPDATE orders SET ");
    let mut columns = builder.separated(", ");
    for change in changes {
        match change {
            FieldChange::ContractNumber(v) => {
                columns.push("contract_number = ");
                columns.push_bind_unseparated(v.clone());
            }
            FieldChange::InvoiceNumber(v) => {
                columns.push("invoice_number = ");
                columns.push_bind_unseparated(v.clone());
            }
            FieldChange::Notes(v) => {
                columns.push("notes = ");
                columns.push_bind_unseparated(v.clone());
            }
            FieldChange::DeliveryAddress(v) => {
                columns.push("delivery_address = ");
                columns.push_bind_unseparated(v.clone());
            }
            FieldChange::ExpectedDelivery(d) => {
                columns.push("expected_delivery = ");
                columns.push_bind_unseparated(*d);
            }
            FieldChange::Status(status) => {
                columns.push("status = ");
                columns.push_bind_unseparated(status.as_str());
                columns.push("status_pinned = ");
                columns.push_bind_unseparated(status.is_terminal());
            }
            FieldChange::Customer(customer) => {
                columns.push("customer_id = ");
                columns.push_bind_unseparated(*customer);
            }
            FieldChange::Branch(branch) => {
                columns.push("branch_id = ");
                columns.push_bind_unseparated(*branch);
            }
            FieldChange::Salesperson(salesperson) => {
                columns.push("salesperson_id = ");
                columns.push_bind_unseparated(*salesperson);
            }
            FieldChange::DeliveryType(delivery) => {
                columns.push("delivery_type = ");
                columns.push_bind_unseparated(delivery.as_str());
            }
            FieldChange::PaymentVerified(verified) => {
                columns.push("payment_verified = ");
                columns.push_bind_unseparated(*verified);
            }
            FieldChange::OrderDate(date) => {
                columns.push("order_date = ");
                columns.push_bind_unseparated(*date);
            }
        }
    }
    columns.push("updated_at = now()");
    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder
}

async fn update_fields(conn: &mut PgConnection, id: Uuid, changes: &[FieldChange]) -> Result<(), StoreError> {
    let result = fields_update(id, changes).build().execute(&mut *conn).await?;
    ensure_updated(result.rows_affected(), "order", id)
}

async fn update_order_types(conn: &mut PgConnection, id: Uuid, order_types: &OrderTypes) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE orders SET order_types = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(order_types.to_strings())
        .execute(&mut *conn)
        .await?;
    ensure_updated(result.rows_affected(), "order", id)
}

async fn update_totals(
    conn: &mut PgConnection,
    id: Uuid,
    subtotal: Decimal,
    discount_total: Decimal,
) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE orders SET subtotal = $2, discount_total = $3 WHERE id = $1")
        .bind(id)
        .bind(subtotal)
        .bind(discount_total)
        .execute(&mut *conn)
        .await?;
    ensure_updated(result.rows_affected(), "order", id)
}

async fn update_paid_amount(conn: &mut PgConnection, id: Uuid, paid_amount: Decimal) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE orders SET paid_amount = $2 WHERE id = $1")
        .bind(id)
        .bind(paid_amount)
        .execute(&mut *conn)
        .await?;
    ensure_updated(result.rows_affected(), "order", id)
}

async fn insert_item(conn: &mut PgConnection, item: &LineItem) -> Result<(), StoreError> {
    sqlx::query(&format!(
        "INSERT INTO order_items ({ITEM_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
    ))
    .bind(item.id)
    .bind(item.order_id)
    .bind(item.product_id)
    .bind(&item.product_name)
    .bind(item.quantity)
    .bind(item.unit_price)
    .bind(item.discount_percent)
    .bind(item.discount_amount)
    .bind(item.line_total)
    .bind(item.active)
    .bind(item.cutting_status.map(|s| s.as_str()))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn update_item(conn: &mut PgConnection, item: &LineItem) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE order_items SET
            product_id = $3, product_name = $4, quantity = $5, unit_price = $6,
            discount_percent = $7, discount_amount = $8, line_total = $9, active = $10,
            cutting_status = $11
         WHERE id = $1 AND order_id = $2",
    )
    .bind(item.id)
    .bind(item.order_id)
    .bind(item.product_id)
    .bind(&item.product_name)
    .bind(item.quantity)
    .bind(item.unit_price)
    .bind(item.discount_percent)
    .bind(item.discount_amount)
    .bind(item.line_total)
    .bind(item.active)
    .bind(item.cutting_status.map(|s| s.as_str()))
    .execute(&mut *conn)
    .await?;
    ensure_updated(result.rows_affected(), "line item", item.id)
}

async fn remove_item(conn: &mut PgConnection, order_id: Uuid, item_id: Uuid) -> Result<Option<LineItem>, StoreError> {
    let row = sqlx::query(&format!(
        "DELETE FROM order_items WHERE id = $1 AND order_id = $2 RETURNING {ITEM_COLUMNS}"
    ))
    .bind(item_id)
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(item_from_row).transpose()
}

async fn insert_payment(conn: &mut PgConnection, payment: &Payment) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO order_payments (id, order_id, amount, method, paid_at, reference)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(payment.id)
    .bind(payment.order_id)
    .bind(payment.amount)
    .bind(payment.method.as_str())
    .bind(payment.paid_at)
    .bind(payment.reference.as_deref())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn remove_payment(
    conn: &mut PgConnection,
    order_id: Uuid,
    payment_id: Uuid,
) -> Result<Option<Payment>, StoreError> {
    let row = sqlx::query("DELETE FROM order_payments WHERE id = $1 AND order_id = $2 RETURNING *")
        .bind(payment_id)
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(payment_from_row).transpose()
}

async fn apply(conn: &mut PgConnection, write: &Write) -> Result<(), StoreError> {
    match write {
        Write::InsertOrder(order) => insert_order(conn, order).await,
        Write::Fields { order_id, changes } => update_fields(conn, *order_id, changes).await,
        Write::OrderTypes { order_id, order_types } => update_order_types(conn, *order_id, order_types).await,
        Write::Totals { order_id, subtotal, discount_total } => {
            update_totals(conn, *order_id, *subtotal, *discount_total).await
        }
        Write::PaidAmount { order_id, paid_amount } => update_paid_amount(conn, *order_id, *paid_amount).await,
        Write::InsertItem(item) => insert_item(conn, item).await,
        Write::UpdateItem(item) => update_item(conn, item).await,
        Write::DeleteItem { order_id, item_id } => remove_item(conn, *order_id, *item_id)
            .await?
            .map(|_| ())
            .ok_or(StoreError::NotFound { entity: "line item", id: *item_id }),
        Write::InsertPayment(payment) => insert_payment(conn, payment).await,
        Write::DeletePayment { order_id, payment_id } => remove_payment(conn, *order_id, *payment_id)
            .await?
            .map(|_| ())
            .ok_or(StoreError::NotFound { entity: "payment", id: *payment_id }),
        Write::StatusEntry(entry) => insert_status_entry(conn, entry).await,
        Write::Modification(entry) => insert_modification(conn, entry).await,
    }
}

#[async_trait]
impl AuditLog for PostgresStore {
    async fn append_status_entry(&self, entry: &StatusLogEntry) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_status_entry(&mut conn, entry).await
    }

    async fn append_modification(&self, entry: &ModificationLogEntry) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_modification(&mut conn, entry).await
    }

    async fn status_entries(&self, order_id: Uuid) -> Result<Vec<StatusLogEntry>, StoreError> {
        let rows = sqlx::query("SELECT * FROM order_status_log WHERE order_id = $1 ORDER BY created_at, id")
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(status_entry_from_row).collect()
    }

    async fn modification_entries(&self, order_id: Uuid) -> Result<Vec<ModificationLogEntry>, StoreError> {
        let rows = sqlx::query("SELECT * FROM order_modification_log WHERE order_id = $1 ORDER BY created_at, id")
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(modification_from_row).collect()
    }

    async fn prune_automatic(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM order_status_log WHERE is_automatic AND created_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_order(&mut conn, order).await
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn write_fields(&self, id: Uuid, changes: &[FieldChange]) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        update_fields(&mut conn, id, changes).await
    }

    async fn write_order_types(&self, id: Uuid, order_types: &OrderTypes) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        update_order_types(&mut conn, id, order_types).await
    }

    async fn write_totals(&self, id: Uuid, subtotal: Decimal, discount_total: Decimal) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        update_totals(&mut conn, id, subtotal, discount_total).await
    }

    async fn write_paid_amount(&self, id: Uuid, paid_amount: Decimal) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        update_paid_amount(&mut conn, id, paid_amount).await
    }

    async fn write_sync_fields(&self, id: Uuid, fields: &SyncFields) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE orders SET ");
        let mut columns = builder.separated(", ");
        if let Some(status) = fields.status {
            columns.push("status = ");
            columns.push_bind_unseparated(status.as_str());
            columns.push("status_pinned = FALSE");
        }
        if let Some(inspection) = fields.inspection_status {
            columns.push("inspection_status = ");
            columns.push_bind_unseparated(inspection.map(|s| s.as_str()));
        }
        if let Some(installation) = fields.installation_status {
            columns.push("installation_status = ");
            columns.push_bind_unseparated(installation.map(|s| s.as_str()));
        }
        if let Some(done) = fields.is_fully_completed {
            columns.push("is_fully_completed = ");
            columns.push_bind_unseparated(done);
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id);

        let result = builder.build().execute(&self.pool).await?;
        ensure_updated(result.rows_affected(), "order", id)
    }

    async fn write_expected_delivery(&self, id: Uuid, date: Option<NaiveDate>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE orders SET expected_delivery = $2 WHERE id = $1")
            .bind(id)
            .bind(date)
            .execute(&self.pool)
            .await?;
        ensure_updated(result.rows_affected(), "order", id)
    }

    async fn items(&self, order_id: Uuid) -> Result<Vec<LineItem>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY id"))
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn insert_item(&self, item: &LineItem) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_item(&mut conn, item).await
    }

    async fn update_item(&self, item: &LineItem) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        update_item(&mut conn, item).await
    }

    async fn delete_item(&self, order_id: Uuid, item_id: Uuid) -> Result<Option<LineItem>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        remove_item(&mut conn, order_id, item_id).await
    }

    async fn payments(&self, order_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let rows = sqlx::query("SELECT * FROM order_payments WHERE order_id = $1 ORDER BY paid_at, id")
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_payment(&mut conn, payment).await
    }

    async fn delete_payment(&self, order_id: Uuid, payment_id: Uuid) -> Result<Option<Payment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        remove_payment(&mut conn, order_id, payment_id).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for write in batch.writes() {
            // Dropping `tx` on error rolls the batch back.
            apply(&mut tx, write).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_order_cascade(&self, id: Uuid) -> Result<DeletionReport, StoreError> {
        let mut tx = self.pool.begin().await?;

        let status_entries = sqlx::query("DELETE FROM order_status_log WHERE order_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let modification_entries = sqlx::query("DELETE FROM order_modification_log WHERE order_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let payments = sqlx::query("DELETE FROM order_payments WHERE order_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let items = sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let orders = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if orders == 0 {
            tx.rollback().await?;
            return Err(StoreError::order_not_found(id));
        }
        tx.commit().await?;

        Ok(DeletionReport {
            order_id: id,
            items,
            payments,
            status_entries,
            modification_entries,
        })
    }
}

#[async_trait]
impl SubsystemGateway for PostgresStore {
    async fn inspection(&self, order_id: Uuid) -> Result<Option<InspectionView>, StoreError> {
        let row = sqlx::query("SELECT * FROM inspections WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let status: String = row.try_get("status")?;
        Ok(Some(InspectionView {
            id: row.try_get("id")?,
            order_id,
            status: parse_column(&status, "status")?,
            scheduled_date: row.try_get("scheduled_date")?,
            completed_at: row.try_get("completed_at")?,
        }))
    }

    async fn installation(&self, order_id: Uuid) -> Result<Option<InstallationView>, StoreError> {
        let row = sqlx::query("SELECT * FROM installations WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let status: String = row.try_get("status")?;
        Ok(Some(InstallationView {
            id: row.try_get("id")?,
            order_id,
            status: parse_column(&status, "status")?,
            scheduled_date: row.try_get("scheduled_date")?,
            completed_at: row.try_get("completed_at")?,
        }))
    }

    async fn manufacturing(&self, order_id: Uuid) -> Result<Option<ManufacturingView>, StoreError> {
        let row = sqlx::query("SELECT * FROM manufacturing_orders WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(manufacturing_from_row).transpose()
    }

    async fn ensure_manufacturing(
        &self,
        order_id: Uuid,
        order_type: OrderTypeTag,
        delivery_date: Option<NaiveDate>,
    ) -> Result<(ManufacturingView, bool), StoreError> {
        let view = ManufacturingView::new(order_id, order_type, delivery_date);
        let inserted = sqlx::query(
            "INSERT INTO manufacturing_orders (id, order_id, status, order_type, completion_date, delivery_date, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (order_id) DO NOTHING",
        )
        .bind(view.id)
        .bind(order_id)
        .bind(view.status.as_str())
        .bind(order_type.as_str())
        .bind(view.completion_date)
        .bind(view.delivery_date)
        .bind(view.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok((view, true));
        }
        let existing = self
            .manufacturing(order_id)
            .await?
            .ok_or(StoreError::NotFound { entity: "manufacturing order", id: order_id })?;
        Ok((existing, false))
    }

    async fn set_manufacturing_delivery_date(
        &self,
        order_id: Uuid,
        delivery_date: Option<NaiveDate>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE manufacturing_orders SET delivery_date = $2 WHERE order_id = $1")
            .bind(order_id)
            .bind(delivery_date)
            .execute(&self.pool)
            .await?;
        ensure_updated(result.rows_affected(), "manufacturing order", order_id)
    }
}

fn manufacturing_from_row(row: &PgRow) -> Result<ManufacturingView, StoreError> {
    let status: String = row.try_get("status")?;
    let order_type: String = row.try_get("order_type")?;
    Ok(ManufacturingView {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        status: parse_column(&status, "status")?,
        order_type: parse_column(&order_type, "order_type")?,
        completion_date: row.try_get("completion_date")?,
        delivery_date: row.try_get("delivery_date")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::LifecycleStatus;

    #[test]
    fn test_parse_column_reports_corrupt_value() {
        let err = parse_column::<LifecycleStatus>("finished", "status").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(message) if message.starts_with("status")));
    }

    #[test]
    fn test_actor_requires_id() {
        assert!(actor_from(None, Some("ghost".to_string())).is_none());
        let actor = actor_from(Some(Uuid::nil()), Some("clerk".to_string())).unwrap();
        assert_eq!(actor.name, "clerk");
    }

    #[test]
    fn test_fields_update_names_only_changed_columns() {
        let sql = fields_update(
            Uuid::new_v4(),
            &[FieldChange::Notes(Some("fragile".to_string())), FieldChange::Status(LifecycleStatus::Cancelled)],
        )
        .into_sql();
        assert!(sql.starts_with("UPDATE orders SET notes = $1, status = $2, status_pinned = $3, updated_at = now()"));
        assert!(sql.ends_with("WHERE id = $4"));
        assert!(!sql.contains("expected_delivery"));
        assert!(!sql.contains("contract_number"));
    }

    #[test]
    fn test_order_columns_include_pin() {
        assert!(ORDER_COLUMNS.contains("status_pinned"));
        assert!(SCHEMA.contains("status_pinned"));
    }

    #[test]
    fn test_schema_creates_every_table() {
        for table in [
            "orders",
            "order_items",
            "order_payments",
            "order_status_log",
            "order_modification_log",
            "manufacturing_orders",
        ] {
            assert!(SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")));
        }
    }
}
