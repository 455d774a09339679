//! Airdrop eligibility: BTC balance lookups and the allocation rule.

use std::collections::HashMap;

use axum::{Json, extract::State};
use bech32::{FromBase32, Variant};
use serde::Deserialize;
use tracing::debug;

use liberty_types::api::{CalculatorQuery, CalculatorResponse, EligibilityResponse};

use crate::error::{ApiError, ApiPath, ApiQuery};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityRules {
    pub min_balance_sats: u64,
    /// LBTC allocated per satoshi held at the snapshot.
    pub tokens_per_sat: u64,
}

impl Default for EligibilityRules {
    fn default() -> Self {
        Self { min_balance_sats: 100_000, tokens_per_sat: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub eligible: bool,
    pub tokens: u64,
}

/// `None` when the allocation would overflow.
pub fn evaluate(balance_sats: u64, rules: &EligibilityRules) -> Option<Assessment> {
    if balance_sats < rules.min_balance_sats {
        return Some(Assessment { eligible: false, tokens: 0 });
    }
    let tokens = balance_sats.checked_mul(rules.tokens_per_sat)?;
    Some(Assessment { eligible: true, tokens })
}

const LEGACY_VERSIONS: [u8; 2] = [0x00, 0x05];

/// Mainnet P2PKH/P2SH (base58check) or segwit (bech32/bech32m) address,
/// checksum included, so typos never reach the balance API.
pub fn is_valid_address(address: &str) -> bool {
    if address.get(..3).is_some_and(|prefix| prefix.eq_ignore_ascii_case("bc1")) {
        return is_valid_segwit(address);
    }
    match bs58::decode(address).with_check(None).into_vec() {
        Ok(payload) => payload.len() == 21 && LEGACY_VERSIONS.contains(&payload[0]),
        Err(_) => false,
    }
}

fn is_valid_segwit(address: &str) -> bool {
    let Ok((hrp, data, variant)) = bech32::decode(address) else {
        return false;
    };
    let Some((version, program)) = data.split_first() else {
        return false;
    };
    let Ok(program) = Vec::<u8>::from_base32(program) else {
        return false;
    };

    match version.to_u8() {
        0 => hrp == "bc" && variant == Variant::Bech32 && matches!(program.len(), 20 | 32),
        1..=16 => hrp == "bc" && variant == Variant::Bech32m && (2..=40).contains(&program.len()),
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
struct AddressBalance {
    final_balance: u64,
}

async fn fetch_balance(state: &AppState, address: &str) -> Result<u64, ApiError> {
    let url = format!("{}/balance", state.config.balance_api.trim_end_matches('/'));
    let resp = state
        .http
        .get(url)
        .query(&[("active", address)])
        .send()
        .await
        .map_err(|e| ApiError::Upstream(format!("balance lookup: {e}")))?;

    if !resp.status().is_success() {
        return Err(ApiError::Upstream(format!("balance lookup returned {}", resp.status())));
    }

    let balances: HashMap<String, AddressBalance> = resp
        .json()
        .await
        .map_err(|e| ApiError::Upstream(format!("balance payload: {e}")))?;

    balances
        .get(address)
        .map(|b| b.final_balance)
        .ok_or_else(|| ApiError::Upstream(format!("balance missing for {address}")))
}

pub async fn check(
    State(state): State<AppState>,
    ApiPath(address): ApiPath<String>,
) -> Result<Json<EligibilityResponse>, ApiError> {
    let address = address.trim().to_string();
    if !is_valid_address(&address) {
        return Err(ApiError::BadRequest("not a valid bitcoin address".into()));
    }

    let balance_sats = fetch_balance(&state, &address).await?;
    let assessment = evaluate(balance_sats, &state.config.eligibility)
        .ok_or_else(|| ApiError::BadRequest("balance out of range".into()))?;
    debug!("Eligibility for {}: {} sats, eligible={}", address, balance_sats, assessment.eligible);

    Ok(Json(EligibilityResponse {
        address,
        balance_sats,
        eligible: assessment.eligible,
        tokens: assessment.tokens,
    }))
}

pub async fn calculate(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<CalculatorQuery>,
) -> Result<Json<CalculatorResponse>, ApiError> {
    let rules = state.config.eligibility;
    let assessment = evaluate(query.sats, &rules).ok_or_else(|| ApiError::BadRequest("sats out of range".into()))?;

    Ok(Json(CalculatorResponse {
        balance_sats: query.sats,
        eligible: assessment.eligible,
        tokens: assessment.tokens,
        min_balance_sats: rules.min_balance_sats,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_inclusive() {
        let rules = EligibilityRules::default();
        assert_eq!(evaluate(99_999, &rules), Some(Assessment { eligible: false, tokens: 0 }));
        assert_eq!(evaluate(100_000, &rules), Some(Assessment { eligible: true, tokens: 100_000 }));
    }

    #[test]
    fn overflow_is_rejected() {
        let rules = EligibilityRules { min_balance_sats: 1, tokens_per_sat: 2 };
        assert_eq!(evaluate(u64::MAX, &rules), None);
        assert_eq!(evaluate(10, &rules), Some(Assessment { eligible: true, tokens: 20 }));
    }

    #[test]
    fn legacy_addresses_carry_a_checksum() {
        assert!(is_valid_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"));
        assert!(is_valid_address("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy"));

        assert!(!is_valid_address(""));
        assert!(!is_valid_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb"));
        assert!(!is_valid_address("0A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"));
        assert!(!is_valid_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfN0"));
    }

    #[test]
    fn segwit_addresses_carry_a_checksum() {
        assert!(is_valid_address("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"));
        assert!(is_valid_address("BC1QW508D6QEJXTDG4Y5R3ZARVARY0C5XW7KV8F3T4"));
        assert!(is_valid_address("bc1p0xlxvlhemja6c4dqv22uapctqupfhlxm9h8z3k2e72q4k9hcz7vqzk5jj0"));

        assert!(!is_valid_address("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdp"));
        assert!(!is_valid_address("bc1Qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"));
        assert!(!is_valid_address("tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx"));
        assert!(!is_valid_address("bc1qbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"));
    }
}
