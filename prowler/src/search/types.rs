use std::sync::Arc;

use mtop_sign::SignedRequest;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::credentials::CredentialSet;

/// Best-effort summary of one search result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundItem {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl FoundItem {
    /// One-line description for chat messages.
    pub fn summary(&self) -> String {
        match &self.price {
            Some(price) => format!("{} ({})", self.title, price),
            None => self.title.clone(),
        }
    }
}

/// JSON payload of one search request.
pub fn search_payload(query: &str, page: u32, rows_per_page: u32) -> String {
    json!({
        "pageNumber": page,
        "keyword": query,
        "fromFilter": false,
        "rowsPerPage": rows_per_page,
        "sortValue": "desc",
        "sortField": "create",
        "customDistance": "",
        "gps": "",
        "propValueStr": {},
        "customGps": "",
        "searchReqFromPage": "pcSearch",
        "extraFilterValue": "{}",
        "userPositionJson": "{}",
    })
    .to_string()
}

/// A fully prepared, signed search call.
#[derive(Debug, Clone)]
pub struct SearchCall {
    pub query: String,
    pub signed: SignedRequest,
    pub credentials: Arc<CredentialSet>,
}

impl SearchCall {
    pub fn cookie_header(&self) -> String {
        self.credentials.cookie_header()
    }
}

/// Pull item summaries out of a decoded `data` object.
///
/// Unknown shapes produce no items rather than an error.
pub fn extract_items(data: &Value) -> Vec<FoundItem> {
    let Some(results) = data.get("resultList").and_then(Value::as_array) else {
        return Vec::new();
    };

    results
        .iter()
        .filter_map(|entry| {
            let main = entry.pointer("/data/item/main")?;
            let content = main.get("exContent")?;
            let args = main.pointer("/clickParam/args");

            let id = string_at(content, "itemId")
                .or_else(|| args.and_then(|a| string_at(a, "item_id")))?;
            let title = string_at(content, "title")
                .or_else(|| content.pointer("/detailParams/title").and_then(as_string))
                .unwrap_or_default();

            let price = content
                .get("price")
                .and_then(Value::as_array)
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|p| p.get("text").and_then(as_string))
                        .collect::<String>()
                })
                .filter(|s| !s.is_empty())
                .or_else(|| args.and_then(|a| string_at(a, "price")));

            Some(FoundItem {
                url: Some(format!("https://www.goofish.com/item?id={}", id)),
                image_url: string_at(content, "picUrl"),
                location: string_at(content, "area"),
                id,
                title,
                price,
            })
        })
        .collect()
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_at(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(as_string)
}
