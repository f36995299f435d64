//! A transport replaying scripted responses, used by the tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use super::{HttpResponse, Transport};

/// Answers each request with the next scripted response, and records
/// what was asked.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, String>>>,
    requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<HttpResponse, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// The URLs requested so far, in order.
    pub fn urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// The headers sent with the n-th request.
    pub fn headers(&self, index: usize) -> Vec<(String, String)> {
        self.requests.lock().unwrap()[index].1.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, String> {
        let headers: Vec<(String, String)> = headers
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), headers));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("no scripted response left".to_string()))
    }
}

/// A 200 response holding the given CVE identifiers.
pub fn page(total: u64, ids: &[String]) -> Result<HttpResponse, String> {
    let vulnerabilities: Vec<_> = ids.iter().map(|id| json!({ "cve": { "id": id } })).collect();
    Ok(HttpResponse {
        status: 200,
        body: json!({
            "resultsPerPage": ids.len(),
            "startIndex": 0,
            "totalResults": total,
            "vulnerabilities": vulnerabilities,
        })
        .to_string(),
    })
}

/// A 200 response holding full CVEs, given as JSON values.
pub fn page_of(total: u64, cves: Vec<serde_json::Value>) -> Result<HttpResponse, String> {
    let vulnerabilities: Vec<_> = cves.into_iter().map(|cve| json!({ "cve": cve })).collect();
    Ok(HttpResponse {
        status: 200,
        body: json!({ "totalResults": total, "vulnerabilities": vulnerabilities }).to_string(),
    })
}

/// A response with an empty body and the given status.
pub fn status(status: u16) -> Result<HttpResponse, String> {
    Ok(HttpResponse {
        status,
        body: String::new(),
    })
}

/// Identifiers CVE-2024-<start> to CVE-2024-<end - 1>.
pub fn cve_ids(start: usize, end: usize) -> Vec<String> {
    (start..end).map(|i| format!("CVE-2024-{:04}", i)).collect()
}
