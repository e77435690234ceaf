//! Postgres-backed store.
//!
//! ## Locking
//!
//! `lock_*` methods issue `SELECT ... FOR UPDATE`. Under READ COMMITTED two
//! transactions locking the same stock batches are serialized: the second one
//! blocks until the first commits and then reads the decremented quantities.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (check constraint violation) | `23514` | `Conflict` |
//! | Database (serialization failure / deadlock) | `40001` / `40P01` | `Conflict` |
//! | Database (other) | Any other | `Backend` |
//! | ColumnDecode / Decode | N/A | `Corrupt` |
//! | Other | N/A | `Backend` |

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockcart_cart::{
    AuditAction, Cart, CartAuditEntry, CartDetails, CartLine, ClientIdentity, ContactDetails,
    Customer,
};
use stockcart_catalog::{Dimensions, Product};
use stockcart_core::{
    AggregateRoot, CartId, CustomerId, ExpectedVersion, OrderId, ProductId,
};
use stockcart_inventory::StockBatch;
use stockcart_orders::{
    Address, DeliveryAddress, Order, OrderHeader, OrderLine, OrderState, PaymentKind, Receiver,
};

use super::{Store, StoreTx};
use crate::error::StoreError;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the schema. Idempotent.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PgTx { tx }))
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn fetch_cart(&mut self, id: CartId, lock: bool) -> Result<Option<Cart>, StoreError> {
        let sql = if lock {
            "SELECT * FROM carts WHERE id = $1 FOR UPDATE"
        } else {
            "SELECT * FROM carts WHERE id = $1"
        };
        let Some(row) = sqlx::query(sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_cart", e))?
        else {
            return Ok(None);
        };

        let line_rows = sqlx::query(
            r#"
            SELECT p.*, l.amount
            FROM cart_lines l
            JOIN products p ON p.id = l.product_id
            WHERE l.cart_id = $1
            ORDER BY l.position ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_cart_lines", e))?;

        let mut lines = Vec::with_capacity(line_rows.len());
        for r in &line_rows {
            lines.push(CartLine {
                product: product_from_row(r)?,
                amount: get(r, "amount")?,
            });
        }

        let details = CartDetails {
            delivery_method: get(&row, "delivery_method")?,
            payment_method: get(&row, "payment_method")?,
            contact: ContactDetails {
                name: get(&row, "contact_name")?,
                phone: get(&row, "contact_phone")?,
                email: get(&row, "contact_email")?,
            },
        };
        let order_id: Option<Uuid> = get(&row, "order_id")?;

        Ok(Some(Cart::restore(
            id,
            CustomerId::from_uuid(get(&row, "customer_id")?),
            lines,
            details,
            order_id.map(OrderId::from_uuid),
            get(&row, "created_at")?,
            get(&row, "updated_at")?,
            version_from(get(&row, "version")?)?,
        )))
    }

    async fn write_cart_lines(&mut self, cart: &Cart) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM cart_lines WHERE cart_id = $1")
            .bind(cart.cart_id().as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_cart_lines", e))?;

        for (position, line) in cart.lines().iter().enumerate() {
            sqlx::query(
                "INSERT INTO cart_lines (cart_id, product_id, amount, position) VALUES ($1, $2, $3, $4)",
            )
            .bind(cart.cart_id().as_uuid())
            .bind(line.product.id.as_uuid())
            .bind(line.amount)
            .bind(position as i32)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_cart_line", e))?;
        }
        Ok(())
    }

    async fn fetch_order(&mut self, id: OrderId, lock: bool) -> Result<Option<Order>, StoreError> {
        let sql = if lock {
            r#"
            SELECT o.*, a.country, a.city, a.street, a.postal_code, a.details,
                   a.normalized, a.created_at AS address_created_at
            FROM orders o
            JOIN delivery_addresses a ON a.id = o.delivery_address_id
            WHERE o.id = $1
            FOR UPDATE OF o
            "#
        } else {
            r#"
            SELECT o.*, a.country, a.city, a.street, a.postal_code, a.details,
                   a.normalized, a.created_at AS address_created_at
            FROM orders o
            JOIN delivery_addresses a ON a.id = o.delivery_address_id
            WHERE o.id = $1
            "#
        };
        let Some(row) = sqlx::query(sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_order", e))?
        else {
            return Ok(None);
        };

        let line_rows = sqlx::query("SELECT * FROM order_lines WHERE order_id = $1 ORDER BY position ASC")
            .bind(id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_order_lines", e))?;
        let mut lines = Vec::with_capacity(line_rows.len());
        for r in &line_rows {
            lines.push(OrderLine {
                id: get::<Uuid>(r, "id")?.into(),
                order_id: id,
                product_id: get::<Uuid>(r, "product_id")?.into(),
                product_name: get(r, "product_name")?,
                quantity: get(r, "quantity")?,
                unit_price: get(r, "unit_price")?,
                sale_price: get(r, "sale_price")?,
                realized_cost: get(r, "realized_cost")?,
                stock_reduced: get(r, "stock_reduced")?,
            });
        }

        let cart_id: Option<Uuid> = get(&row, "cart_id")?;
        let header = OrderHeader {
            id,
            customer_id: get::<Uuid>(&row, "customer_id")?.into(),
            cart_id: cart_id.map(CartId::from_uuid),
            payment_method: get(&row, "payment_method")?,
            payment_kind: parse(get::<String>(&row, "payment_kind")?)?,
            delivery_method: get(&row, "delivery_method")?,
            delivery_price: get(&row, "delivery_price")?,
            delivery_address: DeliveryAddress {
                id: get::<Uuid>(&row, "delivery_address_id")?.into(),
                address: Address {
                    country: get(&row, "country")?,
                    city: get(&row, "city")?,
                    street: get(&row, "street")?,
                    postal_code: get(&row, "postal_code")?,
                    details: get(&row, "details")?,
                },
                normalized: get(&row, "normalized")?,
                created_at: get(&row, "address_created_at")?,
            },
            receiver: Receiver {
                name: get(&row, "receiver_name")?,
                phone: get(&row, "receiver_phone")?,
                email: get(&row, "receiver_email")?,
            },
            created_at: get(&row, "created_at")?,
        };
        let state: OrderState = parse(get::<String>(&row, "state")?)?;

        Ok(Some(
            Order::restore(
                header,
                state,
                lines,
                get(&row, "updated_at")?,
                version_from(get(&row, "version")?)?,
            )
            .with_payment_reference(get(&row, "payment_reference")?),
        ))
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn load_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query("SELECT * FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_product", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn upsert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, name, price, weight, length, width, height,
                is_unlimited, is_weight, always_visible
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                price = EXCLUDED.price,
                weight = EXCLUDED.weight,
                length = EXCLUDED.length,
                width = EXCLUDED.width,
                height = EXCLUDED.height,
                is_unlimited = EXCLUDED.is_unlimited,
                is_weight = EXCLUDED.is_weight,
                always_visible = EXCLUDED.always_visible
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.price)
        .bind(product.weight)
        .bind(product.dimensions.length)
        .bind(product.dimensions.width)
        .bind(product.dimensions.height)
        .bind(product.is_unlimited)
        .bind(product.is_weight)
        .bind(product.always_visible)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_product", e))?;
        Ok(())
    }

    async fn stock_batches(&mut self, product_id: ProductId) -> Result<Vec<StockBatch>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM stock_batches WHERE product_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(product_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("stock_batches", e))?;
        rows.iter().map(batch_from_row).collect()
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn lock_stock_batches(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<StockBatch>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM stock_batches
            WHERE product_id = $1 AND quantity > 0
            ORDER BY created_at ASC, id ASC
            FOR UPDATE
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_stock_batches", e))?;
        rows.iter().map(batch_from_row).collect()
    }

    async fn insert_stock_batch(&mut self, batch: &StockBatch) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO stock_batches (id, product_id, quantity, unit_cost, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(batch.id.as_uuid())
        .bind(batch.product_id.as_uuid())
        .bind(batch.quantity)
        .bind(batch.unit_cost)
        .bind(batch.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_stock_batch", e))?;
        Ok(())
    }

    async fn update_stock_batch(&mut self, batch: &StockBatch) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE stock_batches SET quantity = $2 WHERE id = $1")
            .bind(batch.id.as_uuid())
            .bind(batch.quantity)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_stock_batch", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("stock batch {}", batch.id)));
        }
        Ok(())
    }

    async fn reserved_quantity(&mut self, product_id: ProductId) -> Result<Decimal, StoreError> {
        let states: Vec<String> = OrderState::reserving()
            .map(|s| s.as_str().to_string())
            .collect();
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(l.quantity), 0) AS reserved
            FROM order_lines l
            JOIN orders o ON o.id = l.order_id
            WHERE l.product_id = $1
              AND NOT l.stock_reduced
              AND o.state = ANY($2)
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(&states)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("reserved_quantity", e))?;
        get(&row, "reserved")
    }

    async fn insert_customer(&mut self, customer: &Customer) -> Result<(), StoreError> {
        let identity = &customer.identity;
        sqlx::query(
            r#"
            INSERT INTO customers (id, created_at, remote_addr, name, phone, email, tracking_ids)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(customer.id.as_uuid())
        .bind(customer.created_at)
        .bind(&identity.remote_addr)
        .bind(&identity.name)
        .bind(&identity.phone)
        .bind(&identity.email)
        .bind(Json(&identity.tracking_ids))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_customer", e))?;
        Ok(())
    }

    async fn load_customer(&mut self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
        let Some(row) = sqlx::query("SELECT * FROM customers WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_customer", e))?
        else {
            return Ok(None);
        };
        let tracking_ids: Json<BTreeMap<String, String>> = get(&row, "tracking_ids")?;
        Ok(Some(Customer {
            id,
            created_at: get(&row, "created_at")?,
            identity: ClientIdentity {
                remote_addr: get(&row, "remote_addr")?,
                tracking_ids: tracking_ids.0,
                name: get(&row, "name")?,
                phone: get(&row, "phone")?,
                email: get(&row, "email")?,
            },
        }))
    }

    async fn update_customer(&mut self, customer: &Customer) -> Result<(), StoreError> {
        let identity = &customer.identity;
        let result = sqlx::query(
            r#"
            UPDATE customers
            SET remote_addr = $2, name = $3, phone = $4, email = $5, tracking_ids = $6
            WHERE id = $1
            "#,
        )
        .bind(customer.id.as_uuid())
        .bind(&identity.remote_addr)
        .bind(&identity.name)
        .bind(&identity.phone)
        .bind(&identity.email)
        .bind(Json(&identity.tracking_ids))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_customer", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("customer {}", customer.id)));
        }
        Ok(())
    }

    async fn insert_cart(&mut self, cart: &Cart) -> Result<(), StoreError> {
        let details = cart.details();
        sqlx::query(
            r#"
            INSERT INTO carts (
                id, customer_id, delivery_method, payment_method,
                contact_name, contact_phone, contact_email,
                order_id, created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(cart.cart_id().as_uuid())
        .bind(cart.customer_id().as_uuid())
        .bind(&details.delivery_method)
        .bind(&details.payment_method)
        .bind(&details.contact.name)
        .bind(&details.contact.phone)
        .bind(&details.contact.email)
        .bind(cart.order_id().map(Uuid::from))
        .bind(cart.created_at())
        .bind(cart.updated_at())
        .bind(version_to(cart.version())?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_cart", e))?;

        self.write_cart_lines(cart).await
    }

    async fn load_cart(&mut self, id: CartId) -> Result<Option<Cart>, StoreError> {
        self.fetch_cart(id, false).await
    }

    #[instrument(skip(self), fields(cart_id = %id), err)]
    async fn lock_cart(&mut self, id: CartId) -> Result<Option<Cart>, StoreError> {
        self.fetch_cart(id, true).await
    }

    async fn save_cart(&mut self, cart: &Cart, expected: ExpectedVersion) -> Result<(), StoreError> {
        let expected_version = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(version_to(v)?),
        };
        let details = cart.details();
        let result = sqlx::query(
            r#"
            UPDATE carts SET
                delivery_method = $2,
                payment_method = $3,
                contact_name = $4,
                contact_phone = $5,
                contact_email = $6,
                order_id = $7,
                updated_at = $8,
                version = $9
            WHERE id = $1 AND ($10::BIGINT IS NULL OR version = $10)
            "#,
        )
        .bind(cart.cart_id().as_uuid())
        .bind(&details.delivery_method)
        .bind(&details.payment_method)
        .bind(&details.contact.name)
        .bind(&details.contact.phone)
        .bind(&details.contact.email)
        .bind(cart.order_id().map(Uuid::from))
        .bind(cart.updated_at())
        .bind(version_to(cart.version())?)
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_cart", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "cart {} missing or not at {expected:?}",
                cart.cart_id()
            )));
        }

        self.write_cart_lines(cart).await
    }

    async fn append_cart_audit(&mut self, entries: &[CartAuditEntry]) -> Result<(), StoreError> {
        for entry in entries {
            sqlx::query(
                "INSERT INTO cart_audit (cart_id, action, message, created_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(entry.cart_id.as_uuid())
            .bind(entry.action.as_str())
            .bind(&entry.message)
            .bind(entry.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("append_cart_audit", e))?;
        }
        Ok(())
    }

    async fn cart_audit(&mut self, cart_id: CartId) -> Result<Vec<CartAuditEntry>, StoreError> {
        let rows = sqlx::query("SELECT * FROM cart_audit WHERE cart_id = $1 ORDER BY seq ASC")
            .bind(cart_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("cart_audit", e))?;
        rows.iter()
            .map(|r| {
                Ok(CartAuditEntry {
                    cart_id,
                    action: parse::<AuditAction>(get::<String>(r, "action")?)?,
                    message: get(r, "message")?,
                    created_at: get(r, "created_at")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, order), fields(order_id = %order.order_id()), err)]
    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        let header = order
            .header()
            .ok_or_else(|| StoreError::Conflict(format!("order {} not placed", order.order_id())))?;
        let address = &header.delivery_address;

        sqlx::query(
            r#"
            INSERT INTO delivery_addresses (
                id, country, city, street, postal_code, details, normalized, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(address.id.as_uuid())
        .bind(&address.address.country)
        .bind(&address.address.city)
        .bind(&address.address.street)
        .bind(&address.address.postal_code)
        .bind(&address.address.details)
        .bind(&address.normalized)
        .bind(address.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_delivery_address", e))?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, customer_id, cart_id, state, payment_method, payment_kind,
                delivery_method, delivery_price, delivery_address_id,
                receiver_name, receiver_phone, receiver_email, payment_reference,
                created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(header.id.as_uuid())
        .bind(header.customer_id.as_uuid())
        .bind(header.cart_id.map(Uuid::from))
        .bind(order.state().as_str())
        .bind(&header.payment_method)
        .bind(header.payment_kind.as_str())
        .bind(&header.delivery_method)
        .bind(header.delivery_price)
        .bind(address.id.as_uuid())
        .bind(&header.receiver.name)
        .bind(&header.receiver.phone)
        .bind(&header.receiver.email)
        .bind(order.payment_reference())
        .bind(header.created_at)
        .bind(order.updated_at().unwrap_or(header.created_at))
        .bind(version_to(order.version())?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;

        for (position, line) in order.lines().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_lines (
                    id, order_id, product_id, product_name, quantity, unit_price,
                    sale_price, realized_cost, stock_reduced, position
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(line.id.as_uuid())
            .bind(line.order_id.as_uuid())
            .bind(line.product_id.as_uuid())
            .bind(&line.product_name)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.sale_price)
            .bind(line.realized_cost)
            .bind(line.stock_reduced)
            .bind(position as i32)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_order_line", e))?;
        }
        Ok(())
    }

    async fn load_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.fetch_order(id, false).await
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.fetch_order(id, true).await
    }

    async fn save_order(
        &mut self,
        order: &Order,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let expected_version = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(version_to(v)?),
        };
        let updated_at: DateTime<Utc> = order.updated_at().unwrap_or_else(Utc::now);
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET state = $2, updated_at = $3, version = $4, payment_reference = $6
            WHERE id = $1 AND ($5::BIGINT IS NULL OR version = $5)
            "#,
        )
        .bind(order.order_id().as_uuid())
        .bind(order.state().as_str())
        .bind(updated_at)
        .bind(version_to(order.version())?)
        .bind(expected_version)
        .bind(order.payment_reference())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_order", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "order {} missing or not at {expected:?}",
                order.order_id()
            )));
        }

        for line in order.lines() {
            sqlx::query(
                "UPDATE order_lines SET realized_cost = $2, stock_reduced = $3 WHERE id = $1",
            )
            .bind(line.id.as_uuid())
            .bind(line.realized_cost)
            .bind(line.stock_reduced)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save_order_line", e))?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Corrupt(format!("column '{column}': {e}")))
}

fn parse<T>(value: String) -> Result<T, StoreError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| StoreError::Corrupt(e.to_string()))
}

fn version_from(v: i64) -> Result<u64, StoreError> {
    u64::try_from(v).map_err(|_| StoreError::Corrupt(format!("negative version {v}")))
}

fn version_to(v: u64) -> Result<i64, StoreError> {
    i64::try_from(v).map_err(|_| StoreError::Conflict(format!("version {v} exceeds i64::MAX")))
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    Ok(Product {
        id: get::<Uuid>(row, "id")?.into(),
        name: get(row, "name")?,
        price: get(row, "price")?,
        weight: get(row, "weight")?,
        dimensions: Dimensions::new(
            get(row, "length")?,
            get(row, "width")?,
            get(row, "height")?,
        ),
        is_unlimited: get(row, "is_unlimited")?,
        is_weight: get(row, "is_weight")?,
        always_visible: get(row, "always_visible")?,
    })
}

fn batch_from_row(row: &PgRow) -> Result<StockBatch, StoreError> {
    Ok(StockBatch {
        id: get::<Uuid>(row, "id")?.into(),
        product_id: get::<Uuid>(row, "product_id")?.into(),
        quantity: get(row, "quantity")?,
        unit_cost: get(row, "unit_cost")?,
        created_at: get(row, "created_at")?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23514") | Some("40001") | Some("40P01") => {
                    StoreError::Conflict(msg)
                }
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {operation}: {err}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
