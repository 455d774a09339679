use axum::{Json, extract::State};
use chrono::{Duration, Utc};
use serde::Deserialize;

use liberty_types::api::PriceResponse;

use crate::error::ApiError;
use crate::state::AppState;

/// Quotes younger than this are served from memory.
const PRICE_TTL: Duration = Duration::seconds(60);

#[derive(Debug, Deserialize)]
struct SimplePrice {
    bitcoin: UsdQuote,
}

#[derive(Debug, Deserialize)]
struct UsdQuote {
    usd: f64,
}

pub async fn btc_price(State(state): State<AppState>) -> Result<Json<PriceResponse>, ApiError> {
    let now = Utc::now();
    if let Some(cached) = state.price_cache.read().await.as_ref() {
        if now - cached.fetched_at < PRICE_TTL {
            return Ok(Json(cached.clone()));
        }
    }

    let url = format!("{}/simple/price", state.config.price_api.trim_end_matches('/'));
    let resp = state
        .http
        .get(url)
        .query(&[("ids", "bitcoin"), ("vs_currencies", "usd")])
        .send()
        .await
        .map_err(|e| ApiError::Upstream(format!("price lookup: {e}")))?;

    if !resp.status().is_success() {
        return Err(ApiError::Upstream(format!("price lookup returned {}", resp.status())));
    }

    let quote: SimplePrice = resp
        .json()
        .await
        .map_err(|e| ApiError::Upstream(format!("price payload: {e}")))?;

    let price = PriceResponse { usd: quote.bitcoin.usd, fetched_at: now };
    *state.price_cache.write().await = Some(price.clone());
    Ok(Json(price))
}
