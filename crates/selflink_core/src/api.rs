use std::collections::BTreeSet;
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::config::{DEFAULT_USER_AGENT, WikiConfig};
use crate::title::PageTitle;

/// A page as handed to the bot: title, current text and the revision
/// timestamp edits are based on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub title: PageTitle,
    pub text: String,
    pub base_timestamp: Option<String>,
    pub exists: bool,
}

impl Page {
    pub fn new(title: &str, text: impl Into<String>) -> Self {
        Self {
            title: PageTitle::parse(title),
            text: text.into(),
            base_timestamp: None,
            exists: true,
        }
    }

    pub fn missing(title: &str) -> Self {
        Self {
            title: PageTitle::parse(title),
            text: String::new(),
            base_timestamp: None,
            exists: false,
        }
    }
}

/// Title listings used by the page generators.
pub trait PageSource {
    fn get_all_pages(&mut self, namespace: i32) -> Result<Vec<String>>;
    fn get_category_members(&mut self, category: &str) -> Result<Vec<String>>;
    fn get_recent_changes(&mut self, since: &str, namespaces: &[i32]) -> Result<Vec<String>>;
    fn search(&mut self, query: &str, namespaces: &[i32], limit: usize) -> Result<Vec<String>>;
    fn request_count(&self) -> usize;
}

/// Page retrieval and saving for one wiki.
pub trait WikiSite: PageSource {
    fn site_name(&self) -> String;
    /// Load `titles` in one go. Titles the wiki does not know come back as
    /// missing pages; order is not guaranteed.
    fn load_pages(&mut self, titles: &[String]) -> Result<Vec<Page>>;
    fn save_page(&mut self, page: &Page, text: &str, summary: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_env() -> Self {
        Self::from_env_with_defaults("", DEFAULT_USER_AGENT)
    }

    pub fn from_config(config: &WikiConfig) -> Self {
        let api_default = config.api_url_owned().unwrap_or_default();
        Self::from_env_with_defaults(&api_default, &config.user_agent())
    }

    fn from_env_with_defaults(api_url_default: &str, user_agent_default: &str) -> Self {
        Self {
            api_url: env_value("WIKI_API_URL", api_url_default),
            user_agent: env_value("WIKI_USER_AGENT", user_agent_default),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    /// GET, read rate limit.
    Query,
    /// POST, write rate limit and write retry budget.
    Action,
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    api_url: Url,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn from_env() -> Result<Self> {
        Self::new(MediaWikiClientConfig::from_env())
    }

    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            bail!("no wiki API URL configured (set WIKI_API_URL, [wiki].api_url, or use --dir)");
        }
        let api_url = Url::parse(config.api_url.trim())
            .with_context(|| format!("invalid WIKI_API_URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            api_url,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json(
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
                ("type", "login".to_string()),
            ],
            RequestKind::Query,
        )?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            RequestKind::Action,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                log::info!("logged in to {} as {username}", self.site_name());
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn request_json(&mut self, params: &[(&str, String)], kind: RequestKind) -> Result<Value> {
        let max_retries = match kind {
            RequestKind::Query => self.config.max_retries,
            RequestKind::Action => self.config.max_write_retries,
        };
        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        for attempt in 0..=max_retries {
            self.apply_rate_limit(kind);
            let request = match kind {
                RequestKind::Query => self.client.get(self.api_url.clone()).query(&pairs),
                RequestKind::Action => self.client.post(self.api_url.clone()).form(&pairs),
            };
            log::debug!("MediaWiki {kind:?} request #{}", self.request_count);
            let response = request
                .header("User-Agent", self.config.user_agent.clone())
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            log::warn!("MediaWiki API returned HTTP {status}, retrying");
                            self.wait_before_retry(attempt, kind);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    if let Some(error) = payload.get("error") {
                        let code = error
                            .get("code")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown_error");
                        let info = error
                            .get("info")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown info");
                        bail!("MediaWiki API error [{code}]: {info}");
                    }
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        log::warn!("MediaWiki API request failed ({error}), retrying");
                        self.wait_before_retry(attempt, kind);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self, kind: RequestKind) {
        let delay = match kind {
            RequestKind::Query => Duration::from_millis(self.config.rate_limit_read_ms),
            RequestKind::Action => Duration::from_millis(self.config.rate_limit_write_ms),
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, kind: RequestKind) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if kind == RequestKind::Action { 2u64 } else { 1u64 };
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json(
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
            ],
            RequestKind::Query,
        )?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }

    fn collect_titles(
        &mut self,
        base_params: Vec<(&'static str, String)>,
        continue_key: &'static str,
        what: &str,
    ) -> Result<Vec<String>> {
        let mut titles = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = base_params.clone();
            if let Some(token) = &continue_token {
                params.push((continue_key, token.clone()));
            }

            let response = self.request_json(&params, RequestKind::Query)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .with_context(|| format!("failed to decode {what} API response"))?;
            let query = parsed.query;
            for item in query
                .allpages
                .into_iter()
                .chain(query.categorymembers)
                .chain(query.recentchanges)
            {
                titles.push(item.title);
            }

            continue_token = parsed
                .continuation
                .and_then(|mut cont| cont.remove(continue_key))
                .and_then(|value| value.as_str().map(ToString::to_string));
            if continue_token.is_none() {
                break;
            }
        }

        Ok(titles)
    }
}

impl PageSource for MediaWikiClient {
    fn get_all_pages(&mut self, namespace: i32) -> Result<Vec<String>> {
        self.collect_titles(
            vec![
                ("action", "query".to_string()),
                ("list", "allpages".to_string()),
                ("apnamespace", namespace.to_string()),
                ("aplimit", "500".to_string()),
            ],
            "apcontinue",
            "allpages",
        )
    }

    fn get_category_members(&mut self, category: &str) -> Result<Vec<String>> {
        let category_title = if category.starts_with("Category:") {
            category.to_string()
        } else {
            format!("Category:{category}")
        };
        self.collect_titles(
            vec![
                ("action", "query".to_string()),
                ("list", "categorymembers".to_string()),
                ("cmtitle", category_title),
                ("cmtype", "page".to_string()),
                ("cmlimit", "500".to_string()),
            ],
            "cmcontinue",
            "categorymembers",
        )
    }

    fn get_recent_changes(&mut self, since: &str, namespaces: &[i32]) -> Result<Vec<String>> {
        let titles = self.collect_titles(
            vec![
                ("action", "query".to_string()),
                ("list", "recentchanges".to_string()),
                ("rcstart", since.to_string()),
                ("rcdir", "newer".to_string()),
                ("rcnamespace", join_namespaces(namespaces)),
                ("rcprop", "title".to_string()),
                ("rclimit", "500".to_string()),
                ("rctype", "edit|new".to_string()),
            ],
            "rccontinue",
            "recentchanges",
        )?;
        let mut seen = BTreeSet::new();
        Ok(titles
            .into_iter()
            .filter(|title| seen.insert(title.clone()))
            .collect())
    }

    fn search(&mut self, query: &str, namespaces: &[i32], limit: usize) -> Result<Vec<String>> {
        let params = vec![
            ("action", "query".to_string()),
            ("list", "search".to_string()),
            ("srsearch", query.to_string()),
            ("srnamespace", join_namespaces(namespaces)),
            ("srlimit", limit.to_string()),
        ];

        let response = self.request_json(&params, RequestKind::Query)?;
        let parsed: QueryResponse =
            serde_json::from_value(response).context("failed to decode search API response")?;
        Ok(parsed
            .query
            .search
            .into_iter()
            .map(|item| item.title)
            .collect())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WikiSite for MediaWikiClient {
    fn site_name(&self) -> String {
        self.api_url
            .host_str()
            .map(ToString::to_string)
            .unwrap_or_else(|| self.api_url.to_string())
    }

    fn load_pages(&mut self, titles: &[String]) -> Result<Vec<Page>> {
        let mut results = Vec::new();
        for batch in titles.chunks(50) {
            let params = vec![
                ("action", "query".to_string()),
                ("titles", batch.join("|")),
                ("prop", "revisions".to_string()),
                ("rvprop", "content|timestamp".to_string()),
                ("rvslots", "main".to_string()),
            ];

            let response = self.request_json(&params, RequestKind::Query)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode page content API response")?;

            for page in parsed.query.pages {
                if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
                    results.push(Page::missing(&page.title));
                    continue;
                }
                let Some(revision) = page.revisions.into_iter().next() else {
                    results.push(Page::missing(&page.title));
                    continue;
                };
                let text = revision
                    .slots
                    .and_then(|slots| slots.main)
                    .map(|slot| slot.content)
                    .unwrap_or_default();

                let mut loaded = Page::new(&page.title, text);
                loaded.base_timestamp = Some(revision.timestamp);
                results.push(loaded);
            }
        }
        Ok(results)
    }

    fn save_page(&mut self, page: &Page, text: &str, summary: &str) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let mut params = vec![
            ("action", "edit".to_string()),
            ("title", page.title.without_section().to_string()),
            ("text", text.to_string()),
            ("summary", summary.to_string()),
            ("bot", "1".to_string()),
            ("minor", "1".to_string()),
            ("nocreate", "1".to_string()),
        ];
        if let Some(timestamp) = &page.base_timestamp {
            params.push(("basetimestamp", timestamp.clone()));
        }
        params.push(("token", token));

        let response = self.request_json(&params, RequestKind::Action)?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = edit_payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                page.title,
                edit.result.unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(())
    }
}

/// Log in with `WIKI_BOT_USER`/`WIKI_BOT_PASS` when both are set.
/// Returns whether a login happened.
pub fn login_from_env(client: &mut MediaWikiClient) -> Result<bool> {
    let username = env::var("WIKI_BOT_USER").unwrap_or_default();
    let password = env::var("WIKI_BOT_PASS").unwrap_or_default();
    if username.trim().is_empty() || password.trim().is_empty() {
        log::warn!("WIKI_BOT_USER/WIKI_BOT_PASS not set; edits will be attempted anonymously");
        return Ok(false);
    }
    client
        .login(username.trim(), password.trim())
        .context("login failed")?;
    Ok(true)
}

fn join_namespaces(namespaces: &[i32]) -> String {
    namespaces
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

fn env_value(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    allpages: Vec<TitleQueryItem>,
    #[serde(default)]
    categorymembers: Vec<TitleQueryItem>,
    #[serde(default)]
    recentchanges: Vec<TitleQueryItem>,
    #[serde(default)]
    pages: Vec<PageQueryItem>,
    #[serde(default)]
    search: Vec<TitleQueryItem>,
}

#[derive(Debug, Deserialize)]
struct TitleQueryItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    timestamp: String,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}
