//! This module implements a vulnerability fetcher which downloads
//! the CVEs from the NVD.
//! https://nvd.nist.gov/developers/vulnerabilities

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use log::{debug, trace, warn};
use rand::Rng;
use reqwest::Url;
use serde::Deserialize;
use tokio::time::sleep;

use super::{FetchError, HttpTransport, Transport};
use crate::models::QueryConfig;

/// The CVE API 2.0 endpoint.
pub const NVD_API_BASE: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";
/// The number of results asked for each page.
pub const RESULTS_PER_PAGE: u64 = 200;
/// How many times a page is requested before giving up.
pub const MAX_ATTEMPTS: u32 = 5;
/// How long to wait for a response.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// The first backoff delay, doubled on each failed attempt.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// The bounds of the pause between two pages, in milliseconds.
const PAGE_DELAY_MIN_MS: u64 = 200;
const PAGE_DELAY_MAX_MS: u64 = 500;
/// The format of pubStartDate and pubEndDate.
/// Example: 2024-02-10T12:30:45.000Z
const WINDOW_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.000Z";
const USER_AGENT: &str = concat!("cvewatch/", env!("CARGO_PKG_VERSION"));

/// This structs represents the NVD vulnerabilities fetcher.
pub struct NVDFetcher<T: Transport = HttpTransport> {
    /// Sends the HTTP requests.
    transport: T,
    /// The optional API key, giving a higher rate limit.
    api_key: Option<String>,
    /// The URL of the CVE API.
    endpoint: Url,
}

impl NVDFetcher<HttpTransport> {
    /// Creates a new NVDFetcher sending real HTTP requests.
    pub fn new(api_key: Option<String>) -> Result<Self, FetchError> {
        let transport = HttpTransport::new(REQUEST_TIMEOUT)?;
        Ok(Self::with_transport(transport, api_key))
    }
}

impl<T: Transport> NVDFetcher<T> {
    /// Creates a new NVDFetcher using the given transport.
    pub fn with_transport(transport: T, api_key: Option<String>) -> Self {
        Self {
            transport,
            api_key: api_key.filter(|k| !k.is_empty()),
            endpoint: Url::parse(NVD_API_BASE).expect("NVD_API_BASE is a valid URL"),
        }
    }

    /// Whether the requests carry an API key.
    pub fn is_authenticated(&self) -> bool {
        self.api_key.is_some()
    }

    /// Searches the CVEs published in the last `query.window_days` days
    /// matching `query.keyword`.
    ///
    /// Nothing is sent until the returned [`CveStream`] is polled. The
    /// severity and score filters aren't supported by the API, they are
    /// applied on the normalized records.
    pub fn search(&self, query: &QueryConfig, now: DateTime<Utc>) -> CveStream<'_, T> {
        trace!("Running NVDFetcher::search()");
        let (start, end) = search_window(query.window_days, now);
        debug!(
            "Searching '{}' published between {} and {}",
            query.keyword, start, end
        );
        CveStream {
            fetcher: self,
            params: vec![
                ("keywordSearch", query.keyword.clone()),
                ("pubStartDate", start),
                ("pubEndDate", end),
            ],
            start_index: 0,
            total_results: None,
            pages_fetched: 0,
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Builds the URL of the page starting at `start_index`.
    fn page_url(&self, params: &[(&'static str, String)], start_index: u64) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(name, value)| (*name, value.as_str())))
            .append_pair("startIndex", &start_index.to_string())
            .append_pair("resultsPerPage", &RESULTS_PER_PAGE.to_string());
        url
    }

    /// The headers sent with every request.
    fn headers(&self) -> Vec<(&str, &str)> {
        let mut headers = vec![("User-Agent", USER_AGENT)];
        if let Some(key) = self.api_key.as_deref() {
            headers.push(("apiKey", key));
        }
        headers
    }

    /// Fetches one page, retrying with an exponential backoff when the
    /// API is rate limiting, failing or unreachable.
    async fn fetch_page(
        &self,
        params: &[(&'static str, String)],
        start_index: u64,
    ) -> Result<APIResponse, FetchError> {
        trace!("Running NVDFetcher::fetch_page()");
        let url = self.page_url(params, start_index);
        let headers = self.headers();
        debug!("GET {}", url);

        let mut attempt: u32 = 0;
        loop {
            let failure = match self.transport.get(url.as_str(), &headers).await {
                Ok(response) if (200..300).contains(&response.status) => {
                    return serde_json::from_str(&response.body).map_err(|e| {
                        debug!("Invalid JSON returned by NVD API: {}", e);
                        FetchError::MalformedResponse(e.to_string())
                    });
                }
                Ok(response) => FetchError::from_status(&response, attempt + 1),
                Err(message) => FetchError::Transport {
                    attempts: attempt + 1,
                    message,
                },
            };

            if !failure.is_retryable() {
                debug!("Request to {} failed: {}", url, failure);
                return Err(failure);
            }
            if attempt + 1 >= MAX_ATTEMPTS {
                debug!("Giving up on {} after {} attempts", url, MAX_ATTEMPTS);
                return Err(failure);
            }

            let delay = backoff_delay(attempt);
            warn!(
                "Attempt {}/{} failed ({}), retrying in {:.2}s",
                attempt + 1,
                MAX_ATTEMPTS,
                failure,
                delay.as_secs_f64()
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

/// A lazy sequence of the CVEs matching a search.
///
/// Pages are requested one at a time, when the items of the previous page
/// have all been consumed. The sequence can't be restarted: once it has
/// ended, or once a page has failed, it only returns `Ok(None)`.
pub struct CveStream<'a, T: Transport> {
    fetcher: &'a NVDFetcher<T>,
    params: Vec<(&'static str, String)>,
    /// Where the next page starts.
    start_index: u64,
    /// The total declared by the first page.
    total_results: Option<u64>,
    pages_fetched: u32,
    /// Items of the last page not consumed yet.
    pending: VecDeque<Vulnerability>,
    /// No more page will be requested.
    exhausted: bool,
}

impl<'a, T: Transport> CveStream<'a, T> {
    /// Returns the next CVE, fetching the next page if needed.
    /// `Ok(None)` marks the end of the sequence.
    pub async fn next_item(&mut self) -> Result<Option<Vulnerability>, FetchError> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Ok(Some(item));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_next_page().await?;
        }
    }

    /// The total number of results declared by the API, known once the
    /// first page has been fetched.
    pub fn total_results(&self) -> Option<u64> {
        self.total_results
    }

    /// How many pages have been fetched successfully.
    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Turns this sequence into a [`Stream`], ending after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vulnerability, FetchError>> + 'a
    where
        T: 'a,
    {
        futures::stream::try_unfold(self, |mut cves| async move {
            Ok::<_, FetchError>(cves.next_item().await?.map(|item| (item, cves)))
        })
    }

    async fn fetch_next_page(&mut self) -> Result<(), FetchError> {
        if self.pages_fetched > 0 {
            let delay = page_delay();
            debug!("Waiting {}ms before the next page", delay.as_millis());
            sleep(delay).await;
        }

        let page = match self.fetcher.fetch_page(&self.params, self.start_index).await {
            Ok(page) => page,
            Err(e) => {
                self.exhausted = true;
                return Err(e);
            }
        };
        self.pages_fetched += 1;

        let total = match self.total_results {
            Some(total) => total,
            None => {
                debug!("Total results: {}", page.total_results);
                self.total_results = Some(page.total_results);
                page.total_results
            }
        };

        if page.vulnerabilities.is_empty() {
            self.exhausted = true;
            return Ok(());
        }

        self.start_index += page.vulnerabilities.len() as u64;
        if self.start_index >= total {
            self.exhausted = true;
        }
        self.pending.extend(page.vulnerabilities);
        Ok(())
    }
}

/// Computes pubStartDate and pubEndDate, `days` days back from `now`.
/// A start earlier than chrono can represent is clamped to its minimum.
pub fn search_window(days: u32, now: DateTime<Utc>) -> (String, String) {
    let start = now
        .checked_sub_signed(chrono::Duration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    (
        start.format(WINDOW_DATE_FORMAT).to_string(),
        now.format(WINDOW_DATE_FORMAT).to_string(),
    )
}

/// The delay after the failed attempt `attempt` (0-indexed): the base
/// doubled for each attempt, plus up to 10% of jitter.
pub fn backoff_delay(attempt: u32) -> Duration {
    let delay = BACKOFF_BASE * 2u32.saturating_pow(attempt);
    let jitter = rand::thread_rng().gen_range(0.0..=0.1) * delay.as_secs_f64();
    delay + Duration::from_secs_f64(jitter)
}

/// The pause between two pages, to stay under the rate limit.
pub fn page_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(PAGE_DELAY_MIN_MS..=PAGE_DELAY_MAX_MS))
}

/// Represents the main JSON object returned by the NVD CVE API.
///
/// Only the fields used are read, and all of them are optional: a CVE
/// missing a field is still reported.
#[derive(Debug, Default, Deserialize)]
pub struct APIResponse {
    /// The number of results matching the search, across all pages.
    #[serde(rename = "totalResults", default)]
    pub total_results: u64,
    /// The list of vulnerabilities.
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
}

/// Represents a vulnerability returned as part of the APIResponse.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Vulnerability {
    /// The CVE.
    #[serde(default)]
    pub cve: CVE,
}

/// Represents a CVE as returned as part of the Vulnerability.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CVE {
    /// The CVE identifier.
    /// Example: CVE-2012-6708
    pub id: Option<String>,
    /// When the CVE was published.
    /// Example: 2018-01-18T23:29:00.213
    pub published: Option<String>,
    /// When the CVE was modified.
    /// Example: 2023-11-07T02:13:33.290
    #[serde(rename = "lastModified")]
    pub last_modified: Option<String>,
    /// The descriptions of the CVE.
    /// Example: [{"lang": "en", "value": "jQuery before 1.9.0 is vulnerable to [...]"}]
    #[serde(default)]
    pub descriptions: Vec<CVEDescription>,
    /// The metrics related to the CVE.
    #[serde(default)]
    pub metrics: CVEMetrics,
    /// The references of the CVE.
    #[serde(default)]
    pub references: Vec<CVEReference>,
}

/// Represents a description as part of a CVE.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CVEDescription {
    /// The language of the description.
    /// Example: en
    #[serde(default)]
    pub lang: String,
    /// The content of the description.
    #[serde(default)]
    pub value: String,
}

/// Represents the metrics as part of a CVE.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CVEMetrics {
    /// The data about CVSS 3.1
    #[serde(rename = "cvssMetricV31", default)]
    pub cvss_metric_v31: Vec<CVSSMetric>,
    /// The data about CVSS 3.0
    #[serde(rename = "cvssMetricV30", default)]
    pub cvss_metric_v30: Vec<CVSSMetric>,
    /// The data about CVSS 2
    #[serde(rename = "cvssMetricV2", default)]
    pub cvss_metric_v2: Vec<CVSSMetric>,
}

/// Represents a CVSS metric, whatever its version.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CVSSMetric {
    /// The CVSS data
    #[serde(rename = "cvssData", default)]
    pub cvss_data: CVSSData,
}

/// Represents the CVSS data. Only the score is common to all versions.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CVSSData {
    /// The base score.
    #[serde(rename = "baseScore")]
    pub base_score: Option<f64>,
}

/// Represents a reference as part of a CVE.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CVEReference {
    /// The URL of the reference.
    pub url: Option<String>,
}
