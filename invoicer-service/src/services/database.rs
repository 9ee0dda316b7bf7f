//! Database service for invoicer-service.

use crate::models::{
    numbering_lock_key, BusinessProfile, Client, CreateClient, CreateDocument,
    CreateProduct, CreateUser, CreatedDocument, Document, DocumentDetail, DocumentItem,
    DocumentStatus, DocumentTotals, DocumentType, DocumentWithClient, DocumentWithItems,
    ItemWithProduct, ListClientsFilter, ListDocumentsFilter, ListProductsFilter, NewDocumentItem,
    Product, Role, UpdateClient, UpdateDocument, UpdateProduct, UpdateProfile, User,
};
use crate::services::metrics::{DB_QUERY_DURATION, DOCUMENTS_CREATED_TOTAL};
use chrono::NaiveDate;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const USER_COLUMNS: &str = "user_id, email, password_hash, business_name, business_id, address, \
     phone, role, logo, vat_rate, created_at, updated_at";

const CLIENT_COLUMNS: &str =
    "client_id, user_id, name, business_id, address, city, phone, email, notes, created_at, updated_at";

const PRODUCT_COLUMNS: &str =
    "product_id, user_id, name, description, price, includes_vat, unit, created_at, updated_at";

pub(crate) const DOCUMENT_COLUMNS: &str = "d.document_id, d.user_id, d.client_id, d.document_number, \
     d.document_type, d.status, d.issue_date, d.due_date, d.subtotal, d.vat_rate, d.vat_amount, \
     d.total, d.notes, d.created_at, d.updated_at";

pub(crate) const CLIENT_SUMMARY_COLUMNS: &str =
    "c.name AS client_name, c.email AS client_email, c.business_id AS client_business_id";

/// Escape `%`, `_` and `\` so user input matches literally inside a LIKE pattern.
pub fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for ch in search.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn offset(page: i64, limit: i64) -> i64 {
    (page.max(1) - 1) * limit
}

fn db_error(action: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", action, e))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "invoicer-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Wrap an existing pool. Lazily-connected pools let the router run without a server.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // User Operations
    // -------------------------------------------------------------------------

    /// Create a user with role USER.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn create_user(&self, input: &CreateUser) -> Result<User, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_user"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (user_id, email, password_hash, business_name, business_id, address, phone, role, vat_rate)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&input.email)
        .bind(&input.password_hash)
        .bind(&input.business_name)
        .bind(&input.business_id)
        .bind(&input.address)
        .bind(&input.phone)
        .bind(Role::User.as_str())
        .bind(input.vat_rate)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::conflict("Email already registered")
            }
            _ => db_error("create user", e),
        })?;

        timer.observe_duration();

        info!(user_id = %user.user_id, "User created");

        Ok(user)
    }

    /// Find a user by normalized email.
    #[instrument(skip(self, email))]
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_user_by_email"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("find user", e))?;

        timer.observe_duration();

        Ok(user)
    }

    /// Get a user by ID.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_user"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get user", e))?;

        timer.observe_duration();

        Ok(user)
    }

    /// Update business profile fields that are present.
    #[instrument(skip(self, input), fields(user_id = %user_id))]
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        input: &UpdateProfile,
    ) -> Result<Option<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_profile"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET business_name = COALESCE($2, business_name),
                business_id = COALESCE($3, business_id),
                address = COALESCE($4, address),
                phone = COALESCE($5, phone),
                logo = COALESCE($6, logo),
                vat_rate = COALESCE($7, vat_rate),
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(&input.business_name)
        .bind(&input.business_id)
        .bind(&input.address)
        .bind(&input.phone)
        .bind(&input.logo)
        .bind(input.vat_rate)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("update profile", e))?;

        timer.observe_duration();

        Ok(user)
    }

    /// List every user, newest first.
    #[instrument(skip(self))]
    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_users"])
            .start_timer();

        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list users", e))?;

        timer.observe_duration();

        Ok(users)
    }

    /// Change a user's role.
    #[instrument(skip(self), fields(user_id = %user_id, role = %role))]
    pub async fn update_user_role(
        &self,
        user_id: Uuid,
        role: Role,
    ) -> Result<Option<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_user_role"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET role = $2, updated_at = NOW()
            WHERE user_id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("update user role", e))?;

        timer.observe_duration();

        if user.is_some() {
            info!("User role changed");
        }

        Ok(user)
    }

    // -------------------------------------------------------------------------
    // Client Operations
    // -------------------------------------------------------------------------

    /// List clients, newest first, with the total count for pagination.
    #[instrument(skip(self, filter), fields(user_id = %user_id))]
    pub async fn list_clients(
        &self,
        user_id: Uuid,
        filter: &ListClientsFilter,
    ) -> Result<(Vec<Client>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_clients"])
            .start_timer();

        let search = filter.search.as_deref().map(like_pattern);
        let condition = r#"
            user_id = $1
            AND ($2::varchar IS NULL
                 OR name ILIKE $2 OR email ILIKE $2 OR phone LIKE $2 OR business_id LIKE $2)
        "#;

        let clients = sqlx::query_as::<_, Client>(&format!(
            r#"
            SELECT {CLIENT_COLUMNS}
            FROM clients
            WHERE {condition}
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(user_id)
        .bind(&search)
        .bind(filter.limit)
        .bind(offset(filter.page, filter.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list clients", e))?;

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM clients WHERE {condition}"))
                .bind(user_id)
                .bind(&search)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| db_error("count clients", e))?;

        timer.observe_duration();

        Ok((clients, total))
    }

    /// Get a client by ID.
    #[instrument(skip(self), fields(user_id = %user_id, client_id = %client_id))]
    pub async fn get_client(
        &self,
        user_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<Client>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_client"])
            .start_timer();

        let client = sqlx::query_as::<_, Client>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE user_id = $1 AND client_id = $2"
        ))
        .bind(user_id)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get client", e))?;

        timer.observe_duration();

        Ok(client)
    }

    /// Create a new client.
    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn create_client(&self, input: &CreateClient) -> Result<Client, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_client"])
            .start_timer();

        let client = sqlx::query_as::<_, Client>(&format!(
            r#"
            INSERT INTO clients (client_id, user_id, name, business_id, address, city, phone, email, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {CLIENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(&input.name)
        .bind(&input.business_id)
        .bind(&input.address)
        .bind(&input.city)
        .bind(&input.phone)
        .bind(&input.email)
        .bind(&input.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("create client", e))?;

        timer.observe_duration();

        info!(client_id = %client.client_id, "Client created");

        Ok(client)
    }

    /// Update client fields that are present.
    #[instrument(skip(self, input), fields(user_id = %user_id, client_id = %client_id))]
    pub async fn update_client(
        &self,
        user_id: Uuid,
        client_id: Uuid,
        input: &UpdateClient,
    ) -> Result<Option<Client>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_client"])
            .start_timer();

        let client = sqlx::query_as::<_, Client>(&format!(
            r#"
            UPDATE clients
            SET name = COALESCE($3, name),
                business_id = COALESCE($4, business_id),
                address = COALESCE($5, address),
                city = COALESCE($6, city),
                phone = COALESCE($7, phone),
                email = COALESCE($8, email),
                notes = COALESCE($9, notes),
                updated_at = NOW()
            WHERE user_id = $1 AND client_id = $2
            RETURNING {CLIENT_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(client_id)
        .bind(&input.name)
        .bind(&input.business_id)
        .bind(&input.address)
        .bind(&input.city)
        .bind(&input.phone)
        .bind(&input.email)
        .bind(&input.notes)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("update client", e))?;

        timer.observe_duration();

        Ok(client)
    }

    /// Delete a client. Returns false when no such client exists.
    #[instrument(skip(self), fields(user_id = %user_id, client_id = %client_id))]
    pub async fn delete_client(&self, user_id: Uuid, client_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_client"])
            .start_timer();

        let result = sqlx::query("DELETE FROM clients WHERE user_id = $1 AND client_id = $2")
            .bind(user_id)
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                    AppError::conflict("Cannot delete client with existing documents")
                }
                _ => db_error("delete client", e),
            })?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    /// Most recently created documents issued to a client.
    #[instrument(skip(self), fields(user_id = %user_id, client_id = %client_id))]
    pub async fn recent_client_documents(
        &self,
        user_id: Uuid,
        client_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Document>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["recent_client_documents"])
            .start_timer();

        let documents = sqlx::query_as::<_, Document>(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS}
            FROM documents d
            WHERE d.user_id = $1 AND d.client_id = $2
            ORDER BY d.created_at DESC
            LIMIT $3
            "#
        ))
        .bind(user_id)
        .bind(client_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list client documents", e))?;

        timer.observe_duration();

        Ok(documents)
    }

    // -------------------------------------------------------------------------
    // Product Operations
    // -------------------------------------------------------------------------

    /// List products by name with the total count for pagination.
    #[instrument(skip(self, filter), fields(user_id = %user_id))]
    pub async fn list_products(
        &self,
        user_id: Uuid,
        filter: &ListProductsFilter,
    ) -> Result<(Vec<Product>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_products"])
            .start_timer();

        let search = filter.search.as_deref().map(like_pattern);
        let condition = r#"
            user_id = $1
            AND ($2::varchar IS NULL OR name ILIKE $2 OR description ILIKE $2)
        "#;

        let products = sqlx::query_as::<_, Product>(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS}
            FROM products
            WHERE {condition}
            ORDER BY name ASC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(user_id)
        .bind(&search)
        .bind(filter.limit)
        .bind(offset(filter.page, filter.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list products", e))?;

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM products WHERE {condition}"))
                .bind(user_id)
                .bind(&search)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| db_error("count products", e))?;

        timer.observe_duration();

        Ok((products, total))
    }

    /// Get a product by ID.
    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn get_product(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<Product>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_product"])
            .start_timer();

        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE user_id = $1 AND product_id = $2"
        ))
        .bind(user_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get product", e))?;

        timer.observe_duration();

        Ok(product)
    }

    /// Create a new product.
    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn create_product(&self, input: &CreateProduct) -> Result<Product, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_product"])
            .start_timer();

        let product = sqlx::query_as::<_, Product>(&format!(
            r#"
            INSERT INTO products (product_id, user_id, name, description, price, includes_vat, unit)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.price)
        .bind(input.includes_vat)
        .bind(&input.unit)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("create product", e))?;

        timer.observe_duration();

        info!(product_id = %product.product_id, "Product created");

        Ok(product)
    }

    /// Update product fields that are present.
    #[instrument(skip(self, input), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn update_product(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        input: &UpdateProduct,
    ) -> Result<Option<Product>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_product"])
            .start_timer();

        let product = sqlx::query_as::<_, Product>(&format!(
            r#"
            UPDATE products
            SET name = COALESCE($3, name),
                description = COALESCE($4, description),
                price = COALESCE($5, price),
                includes_vat = COALESCE($6, includes_vat),
                unit = COALESCE($7, unit),
                updated_at = NOW()
            WHERE user_id = $1 AND product_id = $2
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(product_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.price)
        .bind(input.includes_vat)
        .bind(&input.unit)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("update product", e))?;

        timer.observe_duration();

        Ok(product)
    }

    /// Delete a product. Items that referenced it keep their copy of the line.
    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn delete_product(&self, user_id: Uuid, product_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_product"])
            .start_timer();

        let result = sqlx::query("DELETE FROM products WHERE user_id = $1 AND product_id = $2")
            .bind(user_id)
            .bind(product_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete product", e))?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Document Operations
    // -------------------------------------------------------------------------

    /// List documents, newest first, each with its client block and items.
    #[instrument(skip(self, filter), fields(user_id = %user_id))]
    pub async fn list_documents(
        &self,
        user_id: Uuid,
        filter: &ListDocumentsFilter,
    ) -> Result<(Vec<DocumentWithItems>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_documents"])
            .start_timer();

        let search = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let search_pattern = search.map(like_pattern);
        let search_number = search.and_then(|s| s.parse::<i32>().ok());
        let document_type = filter.document_type.map(|t| t.as_str());
        let status = filter.status.map(|s| s.as_str());

        let condition = r#"
            d.user_id = $1
            AND ($2::varchar IS NULL
                 OR d.document_number = $3
                 OR c.name ILIKE $2
                 OR d.notes ILIKE $2)
            AND ($4::varchar IS NULL OR d.document_type = $4)
            AND ($5::varchar IS NULL OR d.status = $5)
            AND ($6::uuid IS NULL OR d.client_id = $6)
            AND ($7::date IS NULL OR d.issue_date >= $7)
            AND ($8::date IS NULL OR d.issue_date <= $8)
        "#;

        let rows = sqlx::query_as::<_, DocumentWithClient>(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS}, {CLIENT_SUMMARY_COLUMNS}
            FROM documents d
            JOIN clients c ON c.client_id = d.client_id
            WHERE {condition}
            ORDER BY d.created_at DESC
            LIMIT $9 OFFSET $10
            "#
        ))
        .bind(user_id)
        .bind(&search_pattern)
        .bind(search_number)
        .bind(document_type)
        .bind(status)
        .bind(filter.client_id)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(filter.limit)
        .bind(offset(filter.page, filter.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list documents", e))?;

        let total: i64 = sqlx::query_scalar(&format!(
            r#"
            SELECT COUNT(*)
            FROM documents d
            JOIN clients c ON c.client_id = d.client_id
            WHERE {condition}
            "#
        ))
        .bind(user_id)
        .bind(&search_pattern)
        .bind(search_number)
        .bind(document_type)
        .bind(status)
        .bind(filter.client_id)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("count documents", e))?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.document.document_id).collect();
        let mut items_by_document = self.items_by_document(&ids).await?;

        timer.observe_duration();

        let documents = rows
            .into_iter()
            .map(|row| {
                let items = items_by_document
                    .remove(&row.document.document_id)
                    .unwrap_or_default();
                DocumentWithItems {
                    document: row.document,
                    client: row.client,
                    items,
                }
            })
            .collect();

        Ok((documents, total))
    }

    async fn items_by_document(
        &self,
        document_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<DocumentItem>>, AppError> {
        let mut grouped: HashMap<Uuid, Vec<DocumentItem>> = HashMap::new();
        if document_ids.is_empty() {
            return Ok(grouped);
        }

        let items = sqlx::query_as::<_, DocumentItem>(
            r#"
            SELECT item_id, document_id, product_id, description, quantity, unit_price, total, sort_order
            FROM document_items
            WHERE document_id = ANY($1)
            ORDER BY document_id, sort_order
            "#,
        )
        .bind(document_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list document items", e))?;

        for item in items {
            grouped.entry(item.document_id).or_default().push(item);
        }
        Ok(grouped)
    }

    /// Get a document header by ID.
    #[instrument(skip(self), fields(user_id = %user_id, document_id = %document_id))]
    pub async fn get_document(
        &self,
        user_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<Document>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_document"])
            .start_timer();

        let document = sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE d.user_id = $1 AND d.document_id = $2"
        ))
        .bind(user_id)
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get document", e))?;

        timer.observe_duration();

        Ok(document)
    }

    /// Get a document with its client, items, products and the owner's business profile.
    #[instrument(skip(self), fields(user_id = %user_id, document_id = %document_id))]
    pub async fn get_document_detail(
        &self,
        user_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<DocumentDetail>, AppError> {
        let Some(document) = self.get_document(user_id, document_id).await? else {
            return Ok(None);
        };

        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_document_detail"])
            .start_timer();

        let client = sqlx::query_as::<_, Client>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE client_id = $1"
        ))
        .bind(document.client_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("get document client", e))?;

        let items = self
            .items_by_document(&[document.document_id])
            .await?
            .remove(&document.document_id)
            .unwrap_or_default();

        let product_ids: Vec<Uuid> = items
            .iter()
            .filter_map(|i| i.product_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let products: HashMap<Uuid, Product> = if product_ids.is_empty() {
            HashMap::new()
        } else {
            sqlx::query_as::<_, Product>(&format!(
                "SELECT {PRODUCT_COLUMNS} FROM products WHERE product_id = ANY($1)"
            ))
            .bind(&product_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("get document products", e))?
            .into_iter()
            .map(|p| (p.product_id, p))
            .collect()
        };

        let user = sqlx::query_as::<_, BusinessProfile>(
            r#"
            SELECT business_name, business_id, address, phone, email, logo
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("get business profile", e))?;

        timer.observe_duration();

        let items = items
            .into_iter()
            .map(|item| {
                // Several lines may share a product, so clone rather than take.
                let product = item.product_id.and_then(|id| products.get(&id).cloned());
                ItemWithProduct { item, product }
            })
            .collect();

        Ok(Some(DocumentDetail {
            document,
            client,
            items,
            user,
        }))
    }

    /// Number the next document of this type would receive.
    #[instrument(skip(self), fields(user_id = %user_id, document_type = %kind))]
    pub async fn next_document_number(
        &self,
        user_id: Uuid,
        kind: DocumentType,
    ) -> Result<i32, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["next_document_number"])
            .start_timer();

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| db_error("acquire connection", e))?;
        let next = max_number_plus_one(&mut conn, user_id, kind).await?;

        timer.observe_duration();

        Ok(next)
    }

    /// Create a document and its items under the next number of its sequence.
    #[instrument(
        skip(self, input),
        fields(user_id = %input.user_id, document_type = %input.document_type)
    )]
    pub async fn create_document(&self, input: &CreateDocument) -> Result<CreatedDocument, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_document"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        let client = owned_client(&mut tx, input.user_id, input.client_id).await?;
        ensure_products_owned(&mut tx, input.user_id, &input.items).await?;

        let totals = DocumentTotals::compute(input.document_type, input.vat_rate, &input.items)?;
        let document_number = allocate_number(&mut tx, input.user_id, input.document_type).await?;

        let document = insert_document(
            &mut tx,
            NewHeader {
                user_id: input.user_id,
                client_id: input.client_id,
                document_number,
                document_type: input.document_type,
                status: input.status,
                issue_date: input.issue_date,
                due_date: input.due_date,
                notes: input.notes.as_deref(),
                vat_rate: input.vat_rate,
                totals,
            },
        )
        .await?;
        let items = insert_items(&mut tx, document.document_id, &input.items).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("commit document", e))?;

        timer.observe_duration();

        DOCUMENTS_CREATED_TOTAL
            .with_label_values(&[input.document_type.as_str()])
            .inc();

        info!(
            document_id = %document.document_id,
            document_number = document.document_number,
            total = %document.total,
            "Document created"
        );

        Ok(CreatedDocument {
            document,
            client,
            items,
        })
    }

    /// Replace a document's editable fields and items, recomputing totals.
    #[instrument(skip(self, input), fields(user_id = %user_id, document_id = %document_id))]
    pub async fn update_document(
        &self,
        user_id: Uuid,
        document_id: Uuid,
        input: &UpdateDocument,
    ) -> Result<Option<CreatedDocument>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_document"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        let Some(existing) = sqlx::query_as::<_, Document>(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS}
            FROM documents d
            WHERE d.user_id = $1 AND d.document_id = $2
            FOR UPDATE
            "#
        ))
        .bind(user_id)
        .bind(document_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("lock document", e))?
        else {
            return Ok(None);
        };

        let client_id = input.client_id.unwrap_or(existing.client_id);
        let client = owned_client(&mut tx, user_id, client_id).await?;
        ensure_products_owned(&mut tx, user_id, &input.items).await?;

        let vat_rate = input.vat_rate.unwrap_or(existing.vat_rate);
        let totals = DocumentTotals::compute(existing.kind(), vat_rate, &input.items)?;

        let document = sqlx::query_as::<_, Document>(&format!(
            r#"
            UPDATE documents d
            SET client_id = $3,
                status = COALESCE($4, d.status),
                issue_date = COALESCE($5, d.issue_date),
                due_date = $6,
                notes = COALESCE($7, d.notes),
                vat_rate = $8,
                subtotal = $9,
                vat_amount = $10,
                total = $11,
                updated_at = NOW()
            WHERE d.user_id = $1 AND d.document_id = $2
            RETURNING {DOCUMENT_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(document_id)
        .bind(client_id)
        .bind(input.status.map(|s| s.as_str()))
        .bind(input.issue_date)
        .bind(input.due_date)
        .bind(&input.notes)
        .bind(vat_rate)
        .bind(totals.subtotal)
        .bind(totals.vat_amount)
        .bind(totals.total)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("update document", e))?;

        sqlx::query("DELETE FROM document_items WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("delete document items", e))?;

        let items = insert_items(&mut tx, document_id, &input.items).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("commit document update", e))?;

        timer.observe_duration();

        info!(total = %document.total, "Document updated");

        Ok(Some(CreatedDocument {
            document,
            client,
            items,
        }))
    }

    /// Set a document's status.
    #[instrument(skip(self), fields(user_id = %user_id, document_id = %document_id, status = %status))]
    pub async fn update_document_status(
        &self,
        user_id: Uuid,
        document_id: Uuid,
        status: DocumentStatus,
    ) -> Result<Option<Document>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_document_status"])
            .start_timer();

        let document = sqlx::query_as::<_, Document>(&format!(
            r#"
            UPDATE documents d SET status = $3, updated_at = NOW()
            WHERE d.user_id = $1 AND d.document_id = $2
            RETURNING {DOCUMENT_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(document_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("update document status", e))?;

        timer.observe_duration();

        Ok(document)
    }

    /// Delete a document; its items cascade.
    #[instrument(skip(self), fields(user_id = %user_id, document_id = %document_id))]
    pub async fn delete_document(&self, user_id: Uuid, document_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_document"])
            .start_timer();

        let result = sqlx::query("DELETE FROM documents WHERE user_id = $1 AND document_id = $2")
            .bind(user_id)
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete document", e))?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    /// Turn a quote into a draft invoice issued on `issue_date` and cancel the quote.
    #[instrument(skip(self), fields(user_id = %user_id, quote_id = %quote_id))]
    pub async fn convert_quote_to_invoice(
        &self,
        user_id: Uuid,
        quote_id: Uuid,
        issue_date: NaiveDate,
    ) -> Result<CreatedDocument, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["convert_quote_to_invoice"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        let quote = sqlx::query_as::<_, Document>(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS}
            FROM documents d
            WHERE d.user_id = $1 AND d.document_id = $2 AND d.document_type = $3
            FOR UPDATE
            "#
        ))
        .bind(user_id)
        .bind(quote_id)
        .bind(DocumentType::Quote.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("lock quote", e))?
        .ok_or_else(|| AppError::not_found("Quote not found"))?;

        if quote.status() == DocumentStatus::Cancelled {
            return Err(AppError::bad_request(
                "Quote is cancelled and cannot be converted",
            ));
        }

        let quote_items: Vec<NewDocumentItem> = sqlx::query_as::<_, DocumentItem>(
            r#"
            SELECT item_id, document_id, product_id, description, quantity, unit_price, total, sort_order
            FROM document_items
            WHERE document_id = $1
            ORDER BY sort_order
            "#,
        )
        .bind(quote_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| db_error("load quote items", e))?
        .iter()
        .map(NewDocumentItem::from)
        .collect();

        let client = owned_client(&mut tx, user_id, quote.client_id).await?;
        let totals = DocumentTotals::compute(DocumentType::Invoice, quote.vat_rate, &quote_items)?;
        let document_number = allocate_number(&mut tx, user_id, DocumentType::Invoice).await?;

        let invoice = insert_document(
            &mut tx,
            NewHeader {
                user_id,
                client_id: quote.client_id,
                document_number,
                document_type: DocumentType::Invoice,
                status: DocumentStatus::Draft,
                issue_date,
                due_date: None,
                notes: quote.notes.as_deref(),
                vat_rate: quote.vat_rate,
                totals,
            },
        )
        .await?;
        let items = insert_items(&mut tx, invoice.document_id, &quote_items).await?;

        sqlx::query(
            "UPDATE documents SET status = $2, updated_at = NOW() WHERE document_id = $1",
        )
        .bind(quote_id)
        .bind(DocumentStatus::Cancelled.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("cancel quote", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("commit quote conversion", e))?;

        timer.observe_duration();

        DOCUMENTS_CREATED_TOTAL
            .with_label_values(&[DocumentType::Invoice.as_str()])
            .inc();

        info!(
            invoice_id = %invoice.document_id,
            document_number = invoice.document_number,
            "Quote converted to invoice"
        );

        Ok(CreatedDocument {
            document: invoice,
            client,
            items,
        })
    }
}

// -----------------------------------------------------------------------------
// Transaction helpers
// -----------------------------------------------------------------------------

struct NewHeader<'a> {
    user_id: Uuid,
    client_id: Uuid,
    document_number: i32,
    document_type: DocumentType,
    status: DocumentStatus,
    issue_date: NaiveDate,
    due_date: Option<NaiveDate>,
    notes: Option<&'a str>,
    vat_rate: rust_decimal::Decimal,
    totals: DocumentTotals,
}

async fn owned_client(
    conn: &mut PgConnection,
    user_id: Uuid,
    client_id: Uuid,
) -> Result<Client, AppError> {
    sqlx::query_as::<_, Client>(&format!(
        "SELECT {CLIENT_COLUMNS} FROM clients WHERE user_id = $1 AND client_id = $2"
    ))
    .bind(user_id)
    .bind(client_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| db_error("get client", e))?
    .ok_or_else(|| AppError::not_found("Client not found"))
}

async fn ensure_products_owned(
    conn: &mut PgConnection,
    user_id: Uuid,
    items: &[NewDocumentItem],
) -> Result<(), AppError> {
    let product_ids: Vec<Uuid> = items
        .iter()
        .filter_map(|i| i.product_id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    if product_ids.is_empty() {
        return Ok(());
    }

    let owned: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM products WHERE user_id = $1 AND product_id = ANY($2)",
    )
    .bind(user_id)
    .bind(&product_ids)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| db_error("check products", e))?;

    if owned != product_ids.len() as i64 {
        return Err(AppError::not_found("Product not found"));
    }
    Ok(())
}

async fn max_number_plus_one(
    conn: &mut PgConnection,
    user_id: Uuid,
    kind: DocumentType,
) -> Result<i32, AppError> {
    sqlx::query_scalar::<_, i32>(
        r#"
        SELECT COALESCE(MAX(document_number), 0) + 1
        FROM documents
        WHERE user_id = $1 AND document_type = $2
        "#,
    )
    .bind(user_id)
    .bind(kind.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| db_error("compute next document number", e))
}

/// Take the (user, type) advisory lock for the rest of the transaction, then
/// read the next number. Concurrent creators queue on the lock.
async fn allocate_number(
    conn: &mut PgConnection,
    user_id: Uuid,
    kind: DocumentType,
) -> Result<i32, AppError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(numbering_lock_key(user_id, kind))
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error("lock document sequence", e))?;

    max_number_plus_one(conn, user_id, kind).await
}

async fn insert_document(
    conn: &mut PgConnection,
    header: NewHeader<'_>,
) -> Result<Document, AppError> {
    sqlx::query_as::<_, Document>(&format!(
        r#"
        INSERT INTO documents AS d (
            document_id, user_id, client_id, document_number, document_type, status,
            issue_date, due_date, subtotal, vat_rate, vat_amount, total, notes
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING {DOCUMENT_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(header.user_id)
    .bind(header.client_id)
    .bind(header.document_number)
    .bind(header.document_type.as_str())
    .bind(header.status.as_str())
    .bind(header.issue_date)
    .bind(header.due_date)
    .bind(header.totals.subtotal)
    .bind(header.vat_rate)
    .bind(header.totals.vat_amount)
    .bind(header.totals.total)
    .bind(header.notes)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::conflict("Document number already taken")
        }
        _ => db_error("create document", e),
    })
}

async fn insert_items(
    conn: &mut PgConnection,
    document_id: Uuid,
    items: &[NewDocumentItem],
) -> Result<Vec<DocumentItem>, AppError> {
    let mut inserted = Vec::with_capacity(items.len());

    for (position, item) in items.iter().enumerate() {
        let total = item
            .total()
            .ok_or_else(|| AppError::bad_request("Document amounts are too large"))?;
        let row = sqlx::query_as::<_, DocumentItem>(
            r#"
            INSERT INTO document_items (item_id, document_id, product_id, description, quantity, unit_price, total, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING item_id, document_id, product_id, description, quantity, unit_price, total, sort_order
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(document_id)
        .bind(item.product_id)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(total)
        .bind(position as i32)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error("create document item", e))?;

        inserted.push(row);
    }

    Ok(inserted)
}
