//! An in-process Stripe stand-in for integration tests.
//!
//! Implements just enough of the provider's surface for the control plane
//! to run end to end: customers (with idempotency-key dedup), products,
//! prices, subscription schedules, subscriptions, usage records, upcoming
//! invoice lines, test clocks, and the account endpoint. State lives in a
//! mutex behind an axum server bound to a random local port.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

#[derive(Debug, Clone, Default)]
struct Customer {
    id: String,
    email: Option<String>,
    name: Option<String>,
    description: Option<String>,
    phone: Option<String>,
    metadata: BTreeMap<String, String>,
    test_clock: Option<String>,
}

#[derive(Debug, Clone)]
struct Product {
    id: String,
    name: String,
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct Price {
    id: String,
    product: String,
    metadata: BTreeMap<String, String>,
    transform: Option<(i64, String)>,
}

#[derive(Debug, Clone)]
struct SchedulePhase {
    start: i64,
    end: Option<i64>,
    prices: Vec<String>,
}

#[derive(Debug, Clone)]
struct Schedule {
    id: String,
    customer: String,
    status: String,
    phases: Vec<SchedulePhase>,
}

#[derive(Debug, Default)]
struct Inner {
    counter: u64,
    customers: Vec<Customer>,
    customer_idem: HashMap<String, String>,
    products: BTreeMap<String, Product>,
    prices: Vec<Price>,
    schedules: Vec<Schedule>,
    // Stable subscription-item ids per (customer, price).
    item_ids: HashMap<(String, String), String>,
    usage: HashMap<String, i64>,
    usage_idem: HashSet<String>,
    clocks: HashMap<String, i64>,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{prefix}_{:04}", self.counter)
    }

    fn now_for_customer(&self, customer: &Customer) -> i64 {
        customer
            .test_clock
            .as_ref()
            .and_then(|id| self.clocks.get(id).copied())
            .unwrap_or_else(|| chrono::Utc::now().timestamp())
    }

    fn customer(&self, id: &str) -> Option<&Customer> {
        self.customers.iter().find(|c| c.id == id)
    }

    /// The running phase of the customer's active schedule, if any.
    fn current_phase(&self, customer_id: &str) -> Option<&SchedulePhase> {
        let customer = self.customer(customer_id)?;
        let now = self.now_for_customer(customer);
        let schedule = self
            .schedules
            .iter()
            .find(|s| s.customer == customer_id && s.status == "active")?;
        schedule
            .phases
            .iter()
            .filter(|p| p.start <= now)
            .next_back()
    }

    fn item_id(&mut self, customer: &str, price: &str) -> String {
        if let Some(id) = self.item_ids.get(&(customer.to_owned(), price.to_owned())) {
            return id.clone();
        }
        let id = self.next_id("si");
        self.item_ids
            .insert((customer.to_owned(), price.to_owned()), id.clone());
        id
    }

    fn price(&self, id: &str) -> Option<&Price> {
        self.prices.iter().find(|p| p.id == id)
    }
}

type Shared = Arc<Mutex<Inner>>;

/// The running mock server.
pub struct MockStripe {
    /// Base URL to point a stripe client at.
    pub base_url: String,
    state: Shared,
    handle: tokio::task::JoinHandle<()>,
}

impl MockStripe {
    /// Binds the mock to a random local port and serves it.
    pub async fn spawn() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state: Shared = Arc::default();
        let app = router(state.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { base_url: format!("http://{addr}"), state, handle }
    }

    /// How many customers exist, duplicates included.
    pub fn customer_count(&self) -> usize {
        self.state.lock().unwrap().customers.len()
    }

    /// The display name of a product, if it exists.
    pub fn product_name(&self, id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .products
            .get(id)
            .map(|p| p.name.clone())
    }
}

impl Drop for MockStripe {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn router(state: Shared) -> Router {
    Router::new()
        .route("/v1/customers", get(list_customers).post(create_customer))
        .route("/v1/customers/{id}", get(get_customer).post(update_customer))
        .route("/v1/products", post(create_product))
        .route("/v1/products/{id}", get(get_product))
        .route("/v1/prices", get(list_prices).post(create_price))
        .route(
            "/v1/subscription_schedules",
            get(list_schedules).post(create_schedule),
        )
        .route("/v1/subscription_schedules/{id}", post(update_schedule))
        .route("/v1/subscriptions", get(list_subscriptions))
        .route(
            "/v1/subscription_items/{id}/usage_records",
            post(create_usage_record),
        )
        .route("/v1/invoices/upcoming/lines", get(upcoming_lines))
        .route("/v1/test_helpers/test_clocks", post(create_clock))
        .route("/v1/test_helpers/test_clocks/{id}", get(get_clock))
        .route("/v1/test_helpers/test_clocks/{id}/advance", post(advance_clock))
        .route("/v1/account", get(account))
        .with_state(state)
}

// --- form/query plumbing ---

fn pairs_of(raw: &str) -> Vec<(String, String)> {
    serde_urlencoded::from_str(raw).unwrap_or_default()
}

fn get_field<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn collect_bracketed(pairs: &[(String, String)], outer: &str) -> BTreeMap<String, String> {
    let prefix = format!("{outer}[");
    pairs
        .iter()
        .filter_map(|(k, v)| {
            let inner = k.strip_prefix(&prefix)?.strip_suffix(']')?;
            Some((inner.to_owned(), v.clone()))
        })
        .collect()
}

fn parse_phases(pairs: &[(String, String)]) -> Vec<SchedulePhase> {
    let mut phases = Vec::new();
    for i in 0.. {
        let Some(start) = get_field(pairs, &format!("phases[{i}][start_date]")) else {
            break;
        };
        let end = get_field(pairs, &format!("phases[{i}][end_date]"))
            .and_then(|v| v.parse().ok());
        let mut prices = Vec::new();
        for j in 0.. {
            match get_field(pairs, &format!("phases[{i}][items][{j}][price]")) {
                Some(p) => prices.push(p.to_owned()),
                None => break,
            }
        }
        phases.push(SchedulePhase {
            start: start.parse().unwrap_or_default(),
            end,
            prices,
        });
    }
    phases
}

fn missing(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": {
                "type": "invalid_request_error",
                "code": "resource_missing",
                "message": format!("No such {what}"),
            }
        })),
    )
        .into_response()
}

fn paginate(items: Vec<Value>, query: &str) -> Value {
    let pairs = pairs_of(query);
    let limit: usize = get_field(&pairs, "limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);
    let start = match get_field(&pairs, "starting_after") {
        Some(after) => items
            .iter()
            .position(|v| v["id"].as_str() == Some(after))
            .map_or(items.len(), |i| i + 1),
        None => 0,
    };
    let page: Vec<Value> = items.iter().skip(start).take(limit).cloned().collect();
    let has_more = start + page.len() < items.len();
    json!({"data": page, "has_more": has_more})
}

// --- JSON shapes ---

fn customer_json(c: &Customer) -> Value {
    json!({
        "id": c.id,
        "email": c.email,
        "name": c.name,
        "description": c.description,
        "phone": c.phone,
        "metadata": c.metadata,
        "test_clock": c.test_clock,
    })
}

fn price_json(p: &Price) -> Value {
    let transform = p
        .transform
        .as_ref()
        .map(|(d, r)| json!({"divide_by": d, "round": r}));
    json!({
        "id": p.id,
        "product": p.product,
        "metadata": p.metadata,
        "transform_quantity": transform,
    })
}

fn schedule_json(s: &Schedule) -> Value {
    json!({
        "id": s.id,
        "customer": s.customer,
        "status": s.status,
        "phases": s.phases.iter().map(|p| json!({
            "start_date": p.start,
            "end_date": p.end,
            "items": p.prices.iter().map(|pr| json!({"price": pr})).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
    })
}

fn interval_seconds(metadata: &BTreeMap<String, String>) -> i64 {
    match metadata.get("tier.interval").map(String::as_str) {
        Some("@daily") => 86_400,
        Some("@yearly") => 365 * 86_400,
        _ => 30 * 86_400,
    }
}

// --- handlers ---

async fn list_customers(State(state): State<Shared>, RawQuery(q): RawQuery) -> Json<Value> {
    let inner = state.lock().unwrap();
    let items: Vec<Value> = inner.customers.iter().map(customer_json).collect();
    Json(paginate(items, q.as_deref().unwrap_or("")))
}

async fn create_customer(
    State(state): State<Shared>,
    headers: HeaderMap,
    body: String,
) -> Json<Value> {
    let pairs = pairs_of(&body);
    let mut inner = state.lock().unwrap();

    if let Some(key) = headers.get("Idempotency-Key").and_then(|v| v.to_str().ok())
        && let Some(existing) = inner.customer_idem.get(key)
    {
        let c = inner.customer(existing).cloned().unwrap_or_default();
        return Json(customer_json(&c));
    }

    let id = inner.next_id("cus");
    let customer = Customer {
        id: id.clone(),
        email: get_field(&pairs, "email").map(ToOwned::to_owned),
        name: get_field(&pairs, "name").map(ToOwned::to_owned),
        description: get_field(&pairs, "description").map(ToOwned::to_owned),
        phone: get_field(&pairs, "phone").map(ToOwned::to_owned),
        metadata: collect_bracketed(&pairs, "metadata"),
        test_clock: get_field(&pairs, "test_clock").map(ToOwned::to_owned),
    };
    if let Some(key) = headers.get("Idempotency-Key").and_then(|v| v.to_str().ok()) {
        inner.customer_idem.insert(key.to_owned(), id);
    }
    inner.customers.push(customer.clone());
    Json(customer_json(&customer))
}

async fn get_customer(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let inner = state.lock().unwrap();
    match inner.customer(&id) {
        Some(c) => Json(customer_json(c)).into_response(),
        None => missing("customer"),
    }
}

async fn update_customer(
    State(state): State<Shared>,
    Path(id): Path<String>,
    body: String,
) -> Response {
    let pairs = pairs_of(&body);
    let mut inner = state.lock().unwrap();
    let Some(customer) = inner.customers.iter_mut().find(|c| c.id == id) else {
        return missing("customer");
    };

    if let Some(v) = get_field(&pairs, "email") {
        customer.email = Some(v.to_owned());
    }
    if let Some(v) = get_field(&pairs, "name") {
        customer.name = Some(v.to_owned());
    }
    if let Some(v) = get_field(&pairs, "description") {
        customer.description = Some(v.to_owned());
    }
    if let Some(v) = get_field(&pairs, "phone") {
        customer.phone = Some(v.to_owned());
    }
    for (k, v) in collect_bracketed(&pairs, "metadata") {
        // Stripe's idiom: an empty value deletes the key.
        if v.is_empty() {
            customer.metadata.remove(&k);
        } else {
            customer.metadata.insert(k, v);
        }
    }
    let snapshot = customer.clone();
    Json(customer_json(&snapshot)).into_response()
}

async fn create_product(State(state): State<Shared>, body: String) -> Json<Value> {
    let pairs = pairs_of(&body);
    let mut inner = state.lock().unwrap();
    let id = get_field(&pairs, "id")
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| inner.next_id("prod"));
    let product = Product {
        id: id.clone(),
        name: get_field(&pairs, "name").unwrap_or_default().to_owned(),
        metadata: collect_bracketed(&pairs, "metadata"),
    };
    inner.products.insert(id.clone(), product.clone());
    Json(json!({"id": product.id, "name": product.name, "metadata": product.metadata}))
}

async fn get_product(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let inner = state.lock().unwrap();
    match inner.products.get(&id) {
        Some(p) => {
            Json(json!({"id": p.id, "name": p.name, "metadata": p.metadata})).into_response()
        }
        None => missing("product"),
    }
}

async fn list_prices(State(state): State<Shared>, RawQuery(q): RawQuery) -> Json<Value> {
    let inner = state.lock().unwrap();
    let query = q.unwrap_or_default();
    let pairs = pairs_of(&query);
    let product = get_field(&pairs, "product");
    let items: Vec<Value> = inner
        .prices
        .iter()
        .filter(|p| product.is_none_or(|want| p.product == want))
        .map(price_json)
        .collect();
    Json(paginate(items, &query))
}

async fn create_price(State(state): State<Shared>, body: String) -> Json<Value> {
    let pairs = pairs_of(&body);
    let mut inner = state.lock().unwrap();
    let id = inner.next_id("price");
    let transform = get_field(&pairs, "transform_quantity[divide_by]").map(|d| {
        (
            d.parse().unwrap_or_default(),
            get_field(&pairs, "transform_quantity[round]")
                .unwrap_or("up")
                .to_owned(),
        )
    });
    let price = Price {
        id,
        product: get_field(&pairs, "product").unwrap_or_default().to_owned(),
        metadata: collect_bracketed(&pairs, "metadata"),
        transform,
    };
    inner.prices.push(price.clone());
    Json(price_json(&price))
}

async fn list_schedules(State(state): State<Shared>, RawQuery(q): RawQuery) -> Json<Value> {
    let inner = state.lock().unwrap();
    let query = q.unwrap_or_default();
    let pairs = pairs_of(&query);
    let customer = get_field(&pairs, "customer");
    let items: Vec<Value> = inner
        .schedules
        .iter()
        .filter(|s| customer.is_none_or(|want| s.customer == want))
        .map(schedule_json)
        .collect();
    Json(paginate(items, &query))
}

async fn create_schedule(State(state): State<Shared>, body: String) -> Json<Value> {
    let pairs = pairs_of(&body);
    let mut inner = state.lock().unwrap();
    let id = inner.next_id("sub_sched");
    let schedule = Schedule {
        id,
        customer: get_field(&pairs, "customer").unwrap_or_default().to_owned(),
        status: "active".to_owned(),
        phases: parse_phases(&pairs),
    };
    inner.schedules.push(schedule.clone());
    Json(schedule_json(&schedule))
}

async fn update_schedule(
    State(state): State<Shared>,
    Path(id): Path<String>,
    body: String,
) -> Response {
    let pairs = pairs_of(&body);
    let mut inner = state.lock().unwrap();
    let Some(schedule) = inner.schedules.iter_mut().find(|s| s.id == id) else {
        return missing("subscription_schedule");
    };
    let phases = parse_phases(&pairs);
    if !phases.is_empty() {
        schedule.phases = phases;
    }
    let snapshot = schedule.clone();
    Json(schedule_json(&snapshot)).into_response()
}

async fn list_subscriptions(State(state): State<Shared>, RawQuery(q): RawQuery) -> Json<Value> {
    let mut inner = state.lock().unwrap();
    let query = q.unwrap_or_default();
    let pairs = pairs_of(&query);
    let Some(customer) = get_field(&pairs, "customer").map(ToOwned::to_owned) else {
        return Json(json!({"data": [], "has_more": false}));
    };

    let Some(phase) = inner.current_phase(&customer).cloned() else {
        return Json(json!({"data": [], "has_more": false}));
    };
    let mut items = Vec::new();
    for price_id in &phase.prices {
        let item_id = inner.item_id(&customer, price_id);
        if let Some(price) = inner.price(price_id) {
            items.push(json!({"id": item_id, "price": price_json(price)}));
        }
    }
    Json(json!({
        "data": [{"id": format!("sub_{customer}"), "items": {"data": items}}],
        "has_more": false,
    }))
}

async fn create_usage_record(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Json<Value> {
    let pairs = pairs_of(&body);
    let mut inner = state.lock().unwrap();

    if let Some(key) = headers.get("Idempotency-Key").and_then(|v| v.to_str().ok()) {
        if inner.usage_idem.contains(key) {
            return Json(json!({"id": "ur_replayed"}));
        }
        inner.usage_idem.insert(key.to_owned());
    }

    let quantity: i64 = get_field(&pairs, "quantity")
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    match get_field(&pairs, "action") {
        Some("set") => {
            inner.usage.insert(id, quantity);
        }
        _ => {
            *inner.usage.entry(id).or_default() += quantity;
        }
    }
    Json(json!({"id": "ur_ok"}))
}

async fn upcoming_lines(State(state): State<Shared>, RawQuery(q): RawQuery) -> Response {
    let mut inner = state.lock().unwrap();
    let query = q.unwrap_or_default();
    let pairs = pairs_of(&query);
    let Some(customer) = get_field(&pairs, "customer").map(ToOwned::to_owned) else {
        return missing("upcoming invoice");
    };
    let Some(phase) = inner.current_phase(&customer).cloned() else {
        return missing("upcoming invoice");
    };

    let mut lines = Vec::new();
    for price_id in phase.prices.clone() {
        let item_id = inner.item_id(&customer, &price_id);
        let Some(price) = inner.price(&price_id).cloned() else {
            continue;
        };
        let metered = price.metadata.contains_key("tier.tiers");
        let quantity = if metered {
            inner.usage.get(&item_id).copied().unwrap_or_default()
        } else {
            1
        };
        let end = phase
            .end
            .unwrap_or(phase.start + interval_seconds(&price.metadata));
        lines.push(json!({
            "id": format!("il_{item_id}"),
            "quantity": quantity,
            "period": {"start": phase.start, "end": end},
            "price": price_json(&price),
        }));
    }
    Json(paginate(lines, &query)).into_response()
}

async fn create_clock(State(state): State<Shared>, body: String) -> Json<Value> {
    let pairs = pairs_of(&body);
    let mut inner = state.lock().unwrap();
    let id = inner.next_id("clock");
    let frozen: i64 = get_field(&pairs, "frozen_time")
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    inner.clocks.insert(id.clone(), frozen);
    Json(json!({"id": id, "frozen_time": frozen}))
}

async fn get_clock(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let inner = state.lock().unwrap();
    match inner.clocks.get(&id) {
        Some(frozen) => Json(json!({"id": id, "frozen_time": frozen})).into_response(),
        None => missing("test clock"),
    }
}

async fn advance_clock(
    State(state): State<Shared>,
    Path(id): Path<String>,
    body: String,
) -> Response {
    let pairs = pairs_of(&body);
    let mut inner = state.lock().unwrap();
    let Some(frozen) = get_field(&pairs, "frozen_time").and_then(|v| v.parse().ok()) else {
        return missing("frozen_time");
    };
    match inner.clocks.get_mut(&id) {
        Some(slot) => {
            *slot = frozen;
            Json(json!({"id": id, "frozen_time": frozen})).into_response()
        }
        None => missing("test clock"),
    }
}

async fn account(State(_state): State<Shared>) -> Json<Value> {
    Json(json!({"id": "acct_mock", "email": "dev@example.com"}))
}
