use reqwest::StatusCode;
use serde_json::Value;

use super::error::{ExchangeError, ExchangeResult};

// Issues a GET and returns the JSON body, classifying non-success statuses.
//
// `bad_symbol` inspects a 4xx body and returns true when the venue rejected
// the symbol itself.
pub async fn get_json(
    http: &reqwest::Client,
    url: &str,
    query: &[(&str, String)],
    symbol: &str,
    bad_symbol: fn(&Value) -> bool,
) -> ExchangeResult<Value> {
    let response = http.get(url).query(query).send().await?;
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return Err(ExchangeError::RateLimited);
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            if let Ok(value) = serde_json::from_str::<Value>(&body) {
                if bad_symbol(&value) {
                    return Err(ExchangeError::BadSymbol(symbol.to_string()));
                }
            }
        }
        return Err(ExchangeError::Upstream {
            status: status.as_u16(),
            message: body.chars().take(200).collect(),
        });
    }

    Ok(response.json::<Value>().await?)
}

// Venues quote prices as JSON strings; accept numbers too.
pub fn number(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

pub fn required_number(value: &Value, field: &str) -> ExchangeResult<f64> {
    number(value).ok_or_else(|| ExchangeError::Decode(format!("missing or non-numeric {}", field)))
}
