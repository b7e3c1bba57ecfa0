//! Read path for related-product recommendations.
//!
//! - `GET /recommendation/{product_id}` returns the anchor's co-viewed,
//!   co-purchased, best-seller and picked-for-you lists as camelCase JSON.
//!
//! Query parameters are parsed leniently and never fail the request:
//! `limit` (default from config, non-integer falls back to the default,
//! negative clamps to zero), `location` (region code), `customer`,
//! `currency` and `pretty`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use relatedrec_core::config::RankingConfig;
use relatedrec_core::domain::catalog::CatalogProduct;
use relatedrec_core::domain::customer::{Customer, CustomerId};
use relatedrec_core::domain::product::ProductId;
use relatedrec_core::domain::record::RecommendationRecord;
use relatedrec_core::domain::region::Region;
use relatedrec_core::engine::{
    BlendingEngine, PreparedRecommendation, RecommendationRequest, SignificancePolicy,
};
use relatedrec_core::errors::ApplicationError;
use relatedrec_db::batch::BatchExecutor;
use relatedrec_db::repositories::{CatalogRepository, CustomerRepository, RecommendationStore};

#[derive(Clone)]
pub struct RecommendState {
    records: Arc<dyn RecommendationStore>,
    catalog: Arc<dyn CatalogRepository>,
    customers: Arc<dyn CustomerRepository>,
    batch: BatchExecutor,
    engine: BlendingEngine,
    defaults: RequestDefaults,
}

/// Values used when the caller omits a parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestDefaults {
    pub limit: usize,
    pub currency: String,
}

impl From<&RankingConfig> for RequestDefaults {
    fn from(config: &RankingConfig) -> Self {
        Self { limit: config.default_limit, currency: config.default_currency.clone() }
    }
}

impl RecommendState {
    pub fn new(
        records: Arc<dyn RecommendationStore>,
        catalog: Arc<dyn CatalogRepository>,
        customers: Arc<dyn CustomerRepository>,
        batch: BatchExecutor,
        ranking: &RankingConfig,
    ) -> Self {
        Self {
            records,
            catalog,
            customers,
            batch,
            engine: BlendingEngine::new(SignificancePolicy { floor: ranking.significance_floor }),
            defaults: RequestDefaults::from(ranking),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecommendationError {
    pub error: &'static str,
    pub correlation_id: String,
}

pub fn router(state: RecommendState) -> Router {
    Router::new().route("/recommendation/{product_id}", get(recommendation)).with_state(state)
}

/// Parsed query string. Unknown keys are ignored and the last occurrence of
/// a repeated key wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecommendationParams {
    pub limit: usize,
    pub location: Option<Region>,
    pub customer: Option<CustomerId>,
    pub currency: String,
    pub pretty: bool,
}

impl RecommendationParams {
    pub fn from_pairs(pairs: &[(String, String)], defaults: &RequestDefaults) -> Self {
        let mut params = Self {
            limit: defaults.limit,
            location: None,
            customer: None,
            currency: defaults.currency.clone(),
            pretty: false,
        };

        for (key, value) in pairs {
            let value = value.trim();
            match key.as_str() {
                "limit" => params.limit = parse_limit(value, defaults.limit),
                "location" => params.location = Region::parse(value),
                "customer" => {
                    params.customer = (!value.is_empty()).then(|| CustomerId::from(value));
                }
                "currency" => {
                    params.currency = if value.is_empty() {
                        defaults.currency.clone()
                    } else {
                        value.to_ascii_uppercase()
                    };
                }
                "pretty" => params.pretty = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }
        params
    }

    fn into_request(self, product_id: ProductId) -> RecommendationRequest {
        RecommendationRequest {
            product_id,
            limit: self.limit,
            location: self.location,
            customer_id: self.customer.map(|id| id.0),
            currency: self.currency,
        }
    }
}

fn parse_limit(value: &str, default: usize) -> usize {
    match value.parse::<i64>() {
        Ok(limit) if limit < 0 => 0,
        Ok(limit) => usize::try_from(limit).unwrap_or(usize::MAX),
        Err(_) => default,
    }
}

pub async fn recommendation(
    Path(product_id): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
    State(state): State<RecommendState>,
) -> Response {
    let params = RecommendationParams::from_pairs(&pairs, &state.defaults);
    let pretty = params.pretty;
    let product_id = ProductId::new(product_id.trim());

    match recommend(&state, product_id.clone(), params).await {
        Ok(record) => render(&record, pretty),
        Err(err) => {
            let correlation_id = Uuid::new_v4().to_string();
            error!(
                event_name = "http.recommendation.failed",
                correlation_id = %correlation_id,
                product_id = %product_id,
                error = %err,
                "recommendation request failed"
            );
            let interface = err.into_interface(correlation_id);
            let status = StatusCode::from_u16(interface.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let body = RecommendationError {
                error: interface.user_message(),
                correlation_id: interface.correlation_id().to_string(),
            };
            (status, Json(body)).into_response()
        }
    }
}

fn render(record: &RecommendationRecord, pretty: bool) -> Response {
    if !pretty {
        return Json(record).into_response();
    }
    match serde_json::to_string_pretty(record) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(err) => {
            warn!(error = %err, "pretty rendering failed, falling back to compact JSON");
            Json(record).into_response()
        }
    }
}

/// Loads the persisted record, resolves catalog metadata for every candidate
/// and blends the final lists. Only a record-table failure is an error; a
/// missing record yields an empty one, and catalog or customer failures
/// degrade the response.
pub async fn recommend(
    state: &RecommendState,
    product_id: ProductId,
    params: RecommendationParams,
) -> Result<RecommendationRecord, ApplicationError> {
    let record = state
        .records
        .get(&product_id)
        .await
        .map_err(|err| ApplicationError::Persistence(err.to_string()))?;
    let record = match record {
        Some(record) => record,
        None => {
            debug!(product_id = %product_id, "no persisted record, serving empty recommendation");
            RecommendationRecord::empty(product_id.clone())
        }
    };

    let customer_id = params.customer.clone();
    let prepared = state.engine.prepare(record, params.into_request(product_id));
    let catalog = load_catalog(state, &prepared).await;
    let customer = match customer_id {
        Some(id) => load_customer(state, &id).await,
        None => None,
    };

    let record = state.engine.blend(prepared, &catalog, customer.as_ref());
    info!(
        event_name = "http.recommendation.served",
        product_id = %record.product_id,
        picked_for_you = record.picked_for_you.len(),
        best_sellers = record.best_sellers.len(),
        "recommendation served"
    );
    Ok(record)
}

async fn load_catalog(
    state: &RecommendState,
    prepared: &PreparedRecommendation,
) -> HashMap<ProductId, CatalogProduct> {
    let mut catalog = HashMap::new();
    if !fetch_catalog(state, &prepared.candidate_ids(), &mut catalog).await {
        return catalog;
    }

    let similar: Vec<ProductId> = prepared
        .similar_ids(&catalog)
        .into_iter()
        .filter(|id| !catalog.contains_key(id))
        .collect();
    if !similar.is_empty() {
        fetch_catalog(state, &similar, &mut catalog).await;
    }
    catalog
}

async fn fetch_catalog(
    state: &RecommendState,
    ids: &[ProductId],
    into: &mut HashMap<ProductId, CatalogProduct>,
) -> bool {
    match state.batch.read_catalog(state.catalog.as_ref(), ids).await {
        Ok(products) => {
            into.extend(products.into_iter().map(|product| (product.product_id.clone(), product)));
            true
        }
        Err(err) => {
            warn!(
                event_name = "http.recommendation.catalog_degraded",
                requested = ids.len(),
                error = %err,
                "catalog lookup failed, serving without metadata"
            );
            false
        }
    }
}

async fn load_customer(state: &RecommendState, id: &CustomerId) -> Option<Customer> {
    match state.customers.find_by_id(id).await {
        Ok(customer) => customer,
        Err(err) => {
            warn!(customer_id = %id, error = %err, "customer lookup failed, using default images");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use rust_decimal::Decimal;
    use serde_json::Value;
    use tower::ServiceExt;

    use relatedrec_core::config::RankingConfig;
    use relatedrec_core::domain::catalog::{CatalogProduct, Price};
    use relatedrec_core::domain::customer::{Customer, CustomerId};
    use relatedrec_core::domain::item::{ItemRole, ItemSet, RelatedItem};
    use relatedrec_core::domain::product::ProductId;
    use relatedrec_core::domain::record::RecommendationRecord;
    use relatedrec_core::domain::region::{Region, RegionScore, RegionScoreSet};
    use relatedrec_db::batch::BatchExecutor;
    use relatedrec_db::repositories::{
        CatalogRepository, CustomerRepository, InMemoryCatalogRepository,
        InMemoryCustomerRepository, InMemoryRecommendationStore, RecommendationStore,
    };

    use super::{router, RecommendState, RecommendationParams, RequestDefaults};

    struct Fixture {
        records: Arc<InMemoryRecommendationStore>,
        catalog: Arc<InMemoryCatalogRepository>,
        customers: Arc<InMemoryCustomerRepository>,
    }

    impl Fixture {
        async fn seeded() -> Self {
            let fixture = Self {
                records: Arc::new(InMemoryRecommendationStore::default()),
                catalog: Arc::new(InMemoryCatalogRepository::default()),
                customers: Arc::new(InMemoryCustomerRepository::default()),
            };

            let mut record = RecommendationRecord::empty("X");
            record.co_viewed = ItemSet::from(vec![
                RelatedItem::new("Y", ItemRole::CoViewed, 5),
                RelatedItem::new("Z", ItemRole::CoViewed, 3)
                    .with_regions(RegionScoreSet::from_scores([RegionScore::new("us-mw", 20)])),
                RelatedItem::new("X", ItemRole::CoViewed, 99),
            ]);
            record.co_purchased =
                ItemSet::from(vec![RelatedItem::new("Y", ItemRole::CoPurchased, 8)]);
            fixture.records.batch_put(&[record]).await.expect("seed record");

            for (id, category, similar) in [
                ("X", "shoes", vec!["S"]),
                ("Y", "shoes", vec![]),
                ("Z", "shoes", vec![]),
                ("S", "shoes", vec![]),
            ] {
                fixture
                    .catalog
                    .upsert(product(id, category, similar))
                    .await
                    .expect("seed catalog");
            }
            fixture
        }

        fn app(&self) -> axum::Router {
            router(RecommendState::new(
                self.records.clone(),
                self.catalog.clone(),
                self.customers.clone(),
                BatchExecutor::default(),
                &RankingConfig {
                    default_limit: 10,
                    significance_floor: 10,
                    default_currency: "USD".to_string(),
                },
            ))
        }
    }

    fn product(id: &str, category: &str, similar: Vec<&str>) -> CatalogProduct {
        CatalogProduct {
            product_id: id.into(),
            name: format!("Product {id}"),
            image_url: format!("https://img.example/{id}/lead.jpg"),
            image_urls_by_color: BTreeMap::from([(
                "red".to_string(),
                format!("https://img.example/{id}/red.jpg"),
            )]),
            parent_category: category.to_string(),
            available: true,
            num_of_purchases: 7,
            prices: BTreeMap::from([(
                "USD".to_string(),
                Price { list_price: Decimal::new(5000, 2), sale_price: Decimal::new(3999, 2) },
            )]),
            similar_item_ids: similar.into_iter().map(ProductId::from).collect(),
            ..CatalogProduct::default()
        }
    }

    async fn get(app: axum::Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, String::from_utf8(body.to_vec()).expect("utf8 body"))
    }

    fn ids(list: &Value) -> Vec<&str> {
        list.as_array()
            .expect("array")
            .iter()
            .map(|item| item["productId"].as_str().expect("productId"))
            .collect()
    }

    fn defaults() -> RequestDefaults {
        RequestDefaults { limit: 10, currency: "USD".to_string() }
    }

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect()
    }

    #[test]
    fn params_fall_back_to_defaults_for_malformed_values() {
        let params = RecommendationParams::from_pairs(
            &pairs(&[("limit", "ten"), ("location", "  "), ("currency", ""), ("pretty", "yes")]),
            &defaults(),
        );

        assert_eq!(params.limit, 10);
        assert_eq!(params.location, None);
        assert_eq!(params.currency, "USD");
        assert!(!params.pretty);
    }

    #[test]
    fn params_normalize_values() {
        let params = RecommendationParams::from_pairs(
            &pairs(&[
                ("limit", "-4"),
                ("location", "us-mw"),
                ("currency", "eur"),
                ("customer", "c-1"),
                ("pretty", "TRUE"),
            ]),
            &defaults(),
        );

        assert_eq!(params.limit, 0);
        assert_eq!(params.location, Some(Region::new("US-MW")));
        assert_eq!(params.currency, "EUR");
        assert_eq!(params.customer, Some(CustomerId::from("c-1")));
        assert!(params.pretty);
    }

    #[tokio::test]
    async fn serves_blended_lists_for_a_known_product() {
        let fixture = Fixture::seeded().await;
        let (status, body) = get(fixture.app(), "/recommendation/X").await;
        assert_eq!(status, StatusCode::OK);

        let json: Value = serde_json::from_str(&body).expect("json body");
        assert_eq!(json["productId"], "X");
        assert_eq!(json["parentCategory"], "shoes");
        assert_eq!(ids(&json["coViewed"]), vec!["Y", "Z"]);
        assert_eq!(ids(&json["bestSellers"]), vec!["S"]);
        assert_eq!(json["pickedForYou"][0]["productId"], "Y");
        assert_eq!(json["pickedForYou"][0]["totalScore"], 16);
        assert_eq!(json["pickedForYou"][0]["role"], "picked");
        assert_eq!(json["coViewed"][0]["onSale"], true);
        assert_eq!(json["coViewed"][0]["totalScore"], 16);
        assert_eq!(json["coViewed"][0]["role"], "picked");
    }

    #[tokio::test]
    async fn location_reorders_by_regional_score() {
        let fixture = Fixture::seeded().await;
        let (_, body) = get(fixture.app(), "/recommendation/X?location=us-mw").await;

        let json: Value = serde_json::from_str(&body).expect("json body");
        assert_eq!(ids(&json["coViewed"]), vec!["Z", "Y"]);
    }

    #[tokio::test]
    async fn limit_truncates_and_negative_limit_empties_lists() {
        let fixture = Fixture::seeded().await;

        let (_, body) = get(fixture.app(), "/recommendation/X?limit=1").await;
        let json: Value = serde_json::from_str(&body).expect("json body");
        assert_eq!(ids(&json["coViewed"]), vec!["Y"]);

        let (status, body) = get(fixture.app(), "/recommendation/X?limit=-3").await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).expect("json body");
        assert!(json["coViewed"].as_array().expect("array").is_empty());
        assert!(json["pickedForYou"].as_array().expect("array").is_empty());
    }

    #[tokio::test]
    async fn unknown_product_returns_an_empty_record() {
        let fixture = Fixture::seeded().await;
        let (status, body) = get(fixture.app(), "/recommendation/NOPE").await;

        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).expect("json body");
        assert_eq!(json["productId"], "NOPE");
        assert!(json["coViewed"].as_array().expect("array").is_empty());
        assert!(json["bestSellers"].as_array().expect("array").is_empty());
    }

    #[tokio::test]
    async fn pretty_output_is_indented() {
        let fixture = Fixture::seeded().await;
        let (_, compact) = get(fixture.app(), "/recommendation/X").await;
        let (_, pretty) = get(fixture.app(), "/recommendation/X?pretty=True").await;

        assert!(!compact.contains('\n'));
        assert!(pretty.contains("\n  \"productId\": \"X\""));
    }

    #[tokio::test]
    async fn customer_colour_preferences_choose_images() {
        let fixture = Fixture::seeded().await;
        fixture
            .customers
            .save(Customer {
                customer_id: CustomerId::from("c-1"),
                color_prefs: vec!["red".to_string()],
            })
            .await
            .expect("seed customer");

        let (_, body) = get(fixture.app(), "/recommendation/X?customer=c-1").await;
        let json: Value = serde_json::from_str(&body).expect("json body");
        assert_eq!(json["imageUrl"], "https://img.example/X/red.jpg");
        assert_eq!(json["coViewed"][0]["imageUrl"], "https://img.example/Y/red.jpg");
    }

    #[tokio::test]
    async fn record_store_failure_returns_service_unavailable() {
        let fixture = Fixture::seeded().await;
        fixture.records.set_unavailable(true);

        let (status, body) = get(fixture.app(), "/recommendation/X").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let json: Value = serde_json::from_str(&body).expect("json body");
        assert_eq!(json["error"], "The service is temporarily unavailable. Please retry shortly.");
        assert!(!json["correlation_id"].as_str().expect("correlation id").is_empty());
    }

    #[tokio::test]
    async fn catalog_failure_degrades_to_unavailable_candidates() {
        let fixture = Fixture::seeded().await;
        fixture.catalog.set_unavailable(true);

        let (status, body) = get(fixture.app(), "/recommendation/X").await;

        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).expect("json body");
        assert_eq!(json["coViewed"][0]["available"], false);
        assert!(json["pickedForYou"].as_array().expect("array").is_empty());
        assert!(json["bestSellers"].as_array().expect("array").is_empty());
    }
}
