// Headless Chrome renderer
//
// Spawns chromedriver on a free loopback port and speaks the WebDriver JSON
// protocol to it. Network traffic comes from Chrome's performance log, which
// is enabled per session through `goog:loggingPrefs`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::process::{Child, Command as TokioCommand};
use tokio::time::{sleep, Instant};

use crate::config::BrowserConfig;
use crate::downloader::errors::DownloadError;
use crate::downloader::traits::{CapturedResponse, PageRenderer, RenderSession};

/// W3C key under which element references are returned
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ChromeRenderer {
    driver_path: String,
    config: BrowserConfig,
    client: reqwest::Client,
}

impl ChromeRenderer {
    pub fn new(driver_path: impl Into<String>, config: BrowserConfig) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(COMMAND_TIMEOUT)
            .build()
            .map_err(|e| DownloadError::Renderer(format!("Failed to build WebDriver client: {}", e)))?;
        Ok(Self {
            driver_path: driver_path.into(),
            config,
            client,
        })
    }

    async fn wait_until_ready(&self, base: &str, driver: &mut Child) -> Result<(), DownloadError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.startup_timeout_secs);
        let status_url = format!("{}/status", base);

        loop {
            if let Ok(Some(status)) = driver.try_wait() {
                return Err(DownloadError::Renderer(format!(
                    "chromedriver exited during startup ({})",
                    status
                )));
            }
            if let Ok(resp) = self.client.get(&status_url).send().await {
                if let Ok(body) = resp.json::<Value>().await {
                    if body["value"]["ready"].as_bool().unwrap_or(false) {
                        return Ok(());
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(DownloadError::Timeout {
                    what: "chromedriver startup".to_string(),
                    secs: self.config.startup_timeout_secs,
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    fn name(&self) -> &'static str {
        "chrome"
    }

    async fn open(&self) -> Result<Box<dyn RenderSession>, DownloadError> {
        let port = free_port()?;
        let base = format!("http://127.0.0.1:{}", port);

        let mut driver = TokioCommand::new(&self.driver_path)
            .arg(format!("--port={}", port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => DownloadError::ToolNotFound(self.driver_path.clone()),
                _ => DownloadError::Renderer(format!("Failed to start chromedriver: {}", e)),
            })?;
        tracing::debug!("[chrome] chromedriver pid {:?} on port {}", driver.id(), port);

        self.wait_until_ready(&base, &mut driver).await?;

        let body = json!({ "capabilities": { "alwaysMatch": chrome_capabilities(&self.config) } });
        let value = send(&self.client, Method::POST, &format!("{}/session", base), Some(body))
            .await
            .and_then(check)?;
        let session_id = value["sessionId"]
            .as_str()
            .ok_or_else(|| DownloadError::Renderer("New session response has no sessionId".to_string()))?;
        tracing::info!("[chrome] session {} started", session_id);

        Ok(Box::new(ChromeSession {
            client: self.client.clone(),
            session_url: format!("{}/session/{}", base, session_id),
            driver,
        }))
    }
}

struct ChromeSession {
    client: reqwest::Client,
    session_url: String,
    driver: Child,
}

impl ChromeSession {
    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, DownloadError> {
        let url = format!("{}{}", self.session_url, path);
        send(&self.client, method, &url, body).await.and_then(check)
    }

    /// Element id of the first match, `None` when nothing matches
    async fn find_element(&self, selector: &str) -> Result<Option<String>, DownloadError> {
        let url = format!("{}/element", self.session_url);
        let body = json!({ "using": "css selector", "value": selector });
        let value = send(&self.client, Method::POST, &url, Some(body)).await?;
        if value["error"].as_str() == Some("no such element") {
            return Ok(None);
        }
        let value = check(value)?;
        value[ELEMENT_KEY]
            .as_str()
            .map(|id| Some(id.to_string()))
            .ok_or_else(|| DownloadError::Renderer(format!("Malformed element reference for '{}'", selector)))
    }
}

#[async_trait]
impl RenderSession for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), DownloadError> {
        self.call(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
            .map_err(|e| DownloadError::Navigation {
                url: url.to_string(),
                cause: e.to_string(),
            })
    }

    async fn wait_for_element(&mut self, selector: &str, timeout: Duration) -> Result<bool, DownloadError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.find_element(selector).await?.is_some() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn element_text(&mut self, selector: &str) -> Result<Option<String>, DownloadError> {
        let Some(id) = self.find_element(selector).await? else {
            return Ok(None);
        };
        let value = self.call(Method::GET, &format!("/element/{}/text", id), None).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn play_media(&mut self, selector: &str) -> Result<(), DownloadError> {
        let id = self
            .find_element(selector)
            .await?
            .ok_or_else(|| DownloadError::Renderer(format!("No element matches '{}'", selector)))?;
        let body = json!({
            "script": "arguments[0].play();",
            "args": [{ ELEMENT_KEY: id }],
        });
        self.call(Method::POST, "/execute/sync", Some(body)).await?;
        Ok(())
    }

    async fn drain_responses(&mut self) -> Result<Vec<CapturedResponse>, DownloadError> {
        let entries = self
            .call(Method::POST, "/se/log", Some(json!({ "type": "performance" })))
            .await?;
        Ok(parse_performance_log(&entries))
    }

    async fn close(self: Box<Self>) -> Result<(), DownloadError> {
        let mut session = *self;
        let ended = session.call(Method::DELETE, "", None).await;
        if let Err(e) = session.driver.kill().await {
            tracing::debug!("[chrome] chromedriver already gone: {}", e);
        }
        ended.map(|_| ())
    }
}

/// Send one WebDriver command and return its `value` member, error or not
async fn send(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, DownloadError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request
        .send()
        .await
        .map_err(|e| DownloadError::Renderer(format!("WebDriver request failed: {}", e)))?;
    let mut body: Value = response
        .json()
        .await
        .map_err(|e| DownloadError::Renderer(format!("Malformed WebDriver response: {}", e)))?;
    Ok(body["value"].take())
}

fn check(value: Value) -> Result<Value, DownloadError> {
    match value.get("error").and_then(Value::as_str) {
        Some(code) => {
            let message = value["message"].as_str().unwrap_or("");
            let first_line = message.lines().next().unwrap_or("");
            Err(DownloadError::Renderer(format!("{}: {}", code, first_line)))
        }
        None => Ok(value),
    }
}

fn free_port() -> Result<u16, DownloadError> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

pub(crate) fn chrome_capabilities(config: &BrowserConfig) -> Value {
    let mut args = Vec::new();
    if config.headless {
        args.push("--headless".to_string());
    }
    args.push("--disable-gpu".to_string());
    args.push(format!("--window-size={},{}", config.window_width, config.window_height));
    args.push("--no-sandbox".to_string());
    args.push("--disable-dev-shm-usage".to_string());
    args.push("--autoplay-policy=no-user-gesture-required".to_string());
    args.push("--mute-audio".to_string());
    args.extend(config.extra_args.iter().cloned());

    json!({
        "browserName": "chrome",
        "goog:chromeOptions": {
            "args": args,
            "excludeSwitches": ["enable-logging"],
        },
        "goog:loggingPrefs": { "performance": "ALL" },
    })
}

/// Pull response URLs out of performance log entries. Each entry carries a
/// DevTools event serialized as a JSON string; only `Network.responseReceived`
/// events are kept.
pub(crate) fn parse_performance_log(entries: &Value) -> Vec<CapturedResponse> {
    let Some(entries) = entries.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| entry["message"].as_str())
        .filter_map(|raw| serde_json::from_str::<Value>(raw).ok())
        .filter(|event| event["message"]["method"] == "Network.responseReceived")
        .filter_map(|event| {
            event["message"]["params"]["response"]["url"]
                .as_str()
                .map(|url| CapturedResponse { url: url.to_string() })
        })
        .collect()
}
