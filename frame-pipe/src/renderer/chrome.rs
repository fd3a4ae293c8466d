use std::{path::Path, process::Stdio, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use serde_json::{Value, json};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines},
    process::{Child, ChildStderr, Command},
    sync::broadcast::error::RecvError,
};
use tempfile::TempDir;

use crate::{
    config::RendererConfig,
    error::RendererError,
    renderer::{
        ImageFormat, Renderer,
        cdp::{CdpClient, CdpEvent},
    },
};

const BROWSER_CANDIDATES: [&str; 4] = ["chromium", "chromium-browser", "google-chrome", "chrome"];
const DEVTOOLS_PREFIX: &str = "DevTools listening on ";
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);
const READY_RETRY_DELAY: Duration = Duration::from_millis(500);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Headless Chrome/Chromium driven over the DevTools protocol.
pub struct ChromeRenderer {
    config: RendererConfig,
    width: u32,
    height: u32,
    child: Option<Child>,
    // removed from disk when dropped
    profile: Option<TempDir>,
    client: Option<CdpClient>,
    session_id: Option<String>,
}

impl ChromeRenderer {
    pub fn new(config: RendererConfig, width: u32, height: u32) -> Self {
        Self {
            config,
            width,
            height,
            child: None,
            profile: None,
            client: None,
            session_id: None,
        }
    }

    fn browser_args(&self, profile_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "--headless=new".to_string(),
            "--remote-debugging-port=0".to_string(),
            "--no-sandbox".to_string(),
            "--disable-setuid-sandbox".to_string(),
            "--disable-gpu".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--hide-scrollbars".to_string(),
            "--mute-audio".to_string(),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            format!("--window-size={},{}", self.width, self.height),
            format!("--user-data-dir={}", profile_dir.display()),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args.push("about:blank".to_string());
        args
    }

    fn spawn_browser(&mut self) -> anyhow::Result<Child> {
        let candidates: Vec<&str> = match &self.config.program {
            Some(program) => vec![program.as_str()],
            None => BROWSER_CANDIDATES.to_vec(),
        };
        let profile = create_profile()?;
        let args = self.browser_args(profile.path());
        self.profile = Some(profile);

        for program in candidates {
            let spawned = Command::new(program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn();
            match spawned {
                Ok(child) => {
                    log::info!("chrome: launched {} (pid {:?})", program, child.id());
                    return Ok(child);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    log::debug!("chrome: {} not found", program);
                }
                Err(e) => return Err(e).with_context(|| format!("failed to launch {}", program)),
            }
        }
        anyhow::bail!("no chrome/chromium executable found")
    }

    async fn launch(&mut self) -> anyhow::Result<()> {
        let mut child = self.spawn_browser()?;
        let stderr = child.stderr.take().context("chrome stderr not captured")?;
        let mut lines = BufReader::new(stderr).lines();
        self.child = Some(child);

        let ws_url = tokio::time::timeout(LAUNCH_TIMEOUT, read_devtools_url(&mut lines))
            .await
            .context("timed out waiting for the DevTools endpoint")??;
        // keep draining stderr so the browser never blocks on a full pipe
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                log::trace!("chrome: {}", line);
            }
        });

        let client = CdpClient::connect(&ws_url).await?;
        let target = client
            .call("Target.createTarget", json!({ "url": "about:blank" }), None)
            .await?;
        let target_id = target["targetId"]
            .as_str()
            .context("createTarget returned no targetId")?
            .to_string();
        let attached = client
            .call(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;
        let session_id = attached["sessionId"]
            .as_str()
            .context("attachToTarget returned no sessionId")?
            .to_string();

        let sid = Some(session_id.as_str());
        client
            .call(
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": self.width,
                    "height": self.height,
                    "deviceScaleFactor": 1,
                    "mobile": false,
                }),
                sid,
            )
            .await?;
        client.call("Page.enable", json!({}), sid).await?;
        client
            .call("Page.setLifecycleEventsEnabled", json!({ "enabled": true }), sid)
            .await?;

        self.client = Some(client);
        self.session_id = Some(session_id);
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), RendererError> {
        let client = self.client()?;
        let sid = self.session_id.as_deref();
        let mut events = client.subscribe();

        let nav = client.call("Page.navigate", json!({ "url": url }), sid).await?;
        if let Some(error) = nav.get("errorText").and_then(Value::as_str) {
            return Err(RendererError::Unavailable(format!(
                "navigation to {} failed: {}",
                url, error
            )));
        }
        let loader_id = nav.get("loaderId").and_then(Value::as_str).map(str::to_string);

        let wait_idle = async {
            loop {
                match events.recv().await {
                    Ok(event) if is_network_idle(&event, sid, loader_id.as_deref()) => {
                        return Ok(());
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => {
                        return Err(RendererError::Unavailable(
                            "devtools connection closed while loading".into(),
                        ));
                    }
                }
            }
        };
        let limit = self.config.navigation_timeout();
        tokio::time::timeout(limit, wait_idle)
            .await
            .map_err(|_| RendererError::Unavailable(format!("{} did not settle within {:?}", url, limit)))??;

        log::info!("chrome: page loaded {}", url);
        Ok(())
    }

    fn client(&self) -> Result<&CdpClient, RendererError> {
        match &self.client {
            Some(client) if !client.is_closed() => Ok(client),
            _ => Err(RendererError::Unavailable("renderer not connected".into())),
        }
    }

    fn browser_exited(&mut self) -> bool {
        match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(Some(status))) => {
                log::warn!("chrome: browser exited with {}", status);
                true
            }
            Some(Ok(None)) => false,
            Some(Err(_)) | None => true,
        }
    }
}

#[async_trait]
impl Renderer for ChromeRenderer {
    async fn connect(&mut self, url: &str) -> Result<(), RendererError> {
        wait_until_reachable(url, self.config.ready_attempts).await?;
        if self.client.is_none() {
            if let Err(e) = self.launch().await {
                self.close().await;
                return Err(RendererError::Unavailable(format!("{:#}", e)));
            }
        }
        self.navigate(url).await
    }

    async fn capture(&mut self, format: ImageFormat, quality: u8) -> Result<Bytes, RendererError> {
        if self.browser_exited() {
            return Err(RendererError::Unavailable("browser is not running".into()));
        }
        let client = self.client()?;

        let mut params = json!({ "format": format.as_str() });
        if format == ImageFormat::Jpeg {
            params["quality"] = json!(quality);
        }
        let shot = client
            .call("Page.captureScreenshot", params, self.session_id.as_deref())
            .await?;
        let data = shot["data"]
            .as_str()
            .context("captureScreenshot returned no data")?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .context("captureScreenshot returned invalid base64")?;
        Ok(Bytes::from(bytes))
    }

    async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, client.call("Browser.close", json!({}), None))
                .await;
            client.close();
        }
        self.session_id = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                log::debug!("chrome: kill failed: {}", e);
            }
            log::info!("chrome: browser closed");
        }
        if let Some(profile) = self.profile.take() {
            let path = profile.path().to_path_buf();
            if let Err(e) = profile.close() {
                log::warn!("chrome: failed to remove profile {}: {}", path.display(), e);
            }
        }
    }
}

fn create_profile() -> anyhow::Result<TempDir> {
    tempfile::Builder::new()
        .prefix("page-streamer-chrome-")
        .tempdir()
        .context("failed to create browser profile directory")
}

async fn read_devtools_url(lines: &mut Lines<BufReader<ChildStderr>>) -> anyhow::Result<String> {
    while let Some(line) = lines.next_line().await? {
        if let Some(url) = devtools_url(&line) {
            return Ok(url.to_string());
        }
        log::debug!("chrome: {}", line);
    }
    anyhow::bail!("browser exited before exposing a DevTools endpoint")
}

fn devtools_url(line: &str) -> Option<&str> {
    let url = line.trim().strip_prefix(DEVTOOLS_PREFIX)?.trim();
    url.starts_with("ws://").then_some(url)
}

fn is_network_idle(event: &CdpEvent, session_id: Option<&str>, loader_id: Option<&str>) -> bool {
    if event.method != "Page.lifecycleEvent" || event.session_id.as_deref() != session_id {
        return false;
    }
    if event.params["name"].as_str() != Some("networkIdle") {
        return false;
    }
    match loader_id {
        Some(loader_id) => event.params["loaderId"].as_str() == Some(loader_id),
        None => true,
    }
}

/// The page is served by a collaborator that may still be starting up.
async fn wait_until_reachable(url: &str, attempts: u32) -> Result<(), RendererError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Ok(());
    }
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .context("failed to build http client")?;

    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => log::debug!(
                "chrome: {} answered {} (attempt {}/{})",
                url,
                resp.status(),
                attempt,
                attempts
            ),
            Err(e) => log::debug!(
                "chrome: {} unreachable: {} (attempt {}/{})",
                url,
                e,
                attempt,
                attempts
            ),
        }
        if attempt < attempts {
            tokio::time::sleep(READY_RETRY_DELAY).await;
        }
    }
    Err(RendererError::Unavailable(format!("{} is not reachable", url)))
}
