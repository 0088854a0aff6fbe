//! HTTP trigger request/response shapes.

use serde::Deserialize;

/// Optional caller name, from the query string or a JSON body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerRequest {
    #[serde(default)]
    pub name: Option<String>,
}

impl TriggerRequest {
    /// Name from the query when present, otherwise from a JSON body. Blank names count as absent.
    pub fn resolve_name(query: TriggerRequest, body: &[u8]) -> Option<String> {
        let from_body = || {
            serde_json::from_slice::<TriggerRequest>(body)
                .ok()
                .and_then(|b| b.name)
        };
        query
            .name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| from_body().filter(|n| !n.trim().is_empty()))
    }
}

/// Response body for a successful trigger.
pub fn trigger_message(name: Option<&str>) -> String {
    match name {
        Some(name) => format!(
            "Hello, {}. This HTTP triggered function executed successfully.",
            name
        ),
        None => "This HTTP triggered function executed successfully. Pass a name in the query string or in the request body for a personalized response.".to_string(),
    }
}
