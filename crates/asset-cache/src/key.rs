//! Cache key normalization

use crate::types::{AssetConfig, AssetKind};
use url::Url;

/// Canonical form of a URL: fragment dropped, query parameters sorted
///
/// Relative or otherwise unparseable URLs are only trimmed and stripped of
/// their fragment.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    match Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            let mut pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
            if pairs.is_empty() {
                parsed.set_query(None);
            } else {
                pairs.sort();
                parsed.query_pairs_mut().clear().extend_pairs(pairs);
            }
            parsed.to_string()
        }
        Err(_) => trimmed.split('#').next().unwrap_or_default().to_string(),
    }
}

fn transform_params(config: &AssetConfig) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(width) = config.width {
        params.push(("w", width.to_string()));
    }
    if let Some(quality) = config.quality {
        params.push(("q", quality.min(100).to_string()));
    }
    if let Some(format) = config.format.as_param() {
        params.push(("fm", format.to_string()));
    }
    params
}

/// Cache key for an asset: normalized URL plus transform parameters
///
/// Videos are fetched untransformed, so their key is the URL alone.
pub fn asset_key(url: &str, kind: AssetKind, config: &AssetConfig) -> String {
    let mut key = normalize_url(url);
    if kind == AssetKind::Video {
        return key;
    }
    for (name, value) in transform_params(config) {
        key.push('|');
        key.push_str(name);
        key.push('=');
        key.push_str(&value);
    }
    key
}

/// URL to request: image transforms become query parameters, videos are fetched as-is
pub fn request_url(url: &str, kind: AssetKind, config: &AssetConfig) -> String {
    let params = transform_params(config);
    if kind == AssetKind::Video || params.is_empty() {
        return url.to_string();
    }

    match Url::parse(url.trim()) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().extend_pairs(params);
            parsed.to_string()
        }
        Err(_) => {
            let separator = if url.contains('?') { '&' } else { '?' };
            let query = params
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("&");
            format!("{}{}{}", url, separator, query)
        }
    }
}
