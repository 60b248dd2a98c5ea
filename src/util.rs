//! Shared utility functions for the marketplace service.

/// Convert a decimal dollar amount (as sent by storefront clients) to integer cents.
///
/// Rounds half away from zero to the nearest cent. Returns `None` for negative,
/// NaN or infinite amounts and for values too large to represent.
pub fn dollars_to_cents(amount: f64) -> Option<i64> {
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    let cents = (amount * 100.0).round();
    if cents > i64::MAX as f64 {
        return None;
    }
    Some(cents as i64)
}

/// Convert integer cents to a decimal dollar amount for display.
pub fn cents_to_dollars(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Append query parameters to a URL, URL-encoding the values.
pub fn append_query_params(base_url: &str, params: &[(&str, &str)]) -> String {
    let query_string: String = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    if query_string.is_empty() {
        return base_url.to_string();
    }

    if base_url.contains('?') {
        format!("{}&{}", base_url, query_string)
    } else {
        format!("{}?{}", base_url, query_string)
    }
}

/// Parse a JSON image list as stored on product rows.
///
/// Older rows may hold a bare URL instead of a JSON array; anything that is
/// neither yields an empty list.
pub fn parse_image_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(images) => images,
        Err(_) if raw.starts_with("http://") || raw.starts_with("https://") || raw.starts_with('/') => {
            vec![raw.to_string()]
        }
        Err(_) => Vec::new(),
    }
}
