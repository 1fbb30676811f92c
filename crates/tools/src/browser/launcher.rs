//! Launches one headless (or headed) Chromium-family browser per session
//! and connects to its first page target.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use surfpilot_core::{Config, Error, Paths, Result};
use tokio::process::Command;
use tracing::{debug, info};

use super::cdp::CdpClient;
use super::page::CdpPage;

const CDP_READY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    executable: Option<String>,
    headed: bool,
    profiles_dir: PathBuf,
    width: u32,
    height: u32,
}

impl BrowserLauncher {
    pub fn new(profiles_dir: PathBuf, headed: bool, executable: Option<String>, width: u32, height: u32) -> Self {
        Self {
            executable,
            headed,
            profiles_dir,
            width,
            height,
        }
    }

    pub fn from_config(config: &Config, paths: &Paths) -> Self {
        Self::new(
            config.profiles_dir(paths),
            config.browser.headed,
            config.browser.executable.clone().filter(|e| !e.trim().is_empty()),
            config.agents.defaults.display_width,
            config.agents.defaults.display_height,
        )
    }

    /// Start a browser with a profile dedicated to `session_id` and return
    /// its page.
    pub async fn launch(&self, session_id: &str) -> Result<CdpPage> {
        let browser_path = match self.executable.as_ref() {
            Some(path) => path.clone(),
            None => find_browser_binary()
                .ok_or_else(|| Error::Driver("Chrome/Chromium not found. Please install it or set browser.executable.".to_string()))?,
        };

        let safe_id = session_id.replace([':', '/', '\\', '.'], "_");
        let user_data_dir = self.profiles_dir.join(safe_id);
        std::fs::create_dir_all(&user_data_dir)?;

        let debug_port = find_free_port().await?;
        let args = build_browser_args(debug_port, &user_data_dir, self.headed, self.width, self.height);

        info!(
            session_id = %session_id,
            port = debug_port,
            headed = self.headed,
            browser = %browser_path,
            "Launching browser"
        );

        let child = Command::new(&browser_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Driver(format!("Failed to launch {}: {}", browser_path, e)))?;

        wait_for_cdp_ready(debug_port, CDP_READY_TIMEOUT).await?;
        let page_ws_url = get_page_ws_url(debug_port).await?;
        let cdp = CdpClient::connect(&page_ws_url).await?;

        cdp.enable_domain("Page").await?;
        cdp.enable_domain("Runtime").await?;
        cdp.set_viewport(self.width, self.height).await?;

        info!(session_id = %session_id, ws_url = %page_ws_url, "CDP connection established");
        Ok(CdpPage::new(cdp, child))
    }
}

fn build_browser_args(debug_port: u16, user_data_dir: &Path, headed: bool, width: u32, height: u32) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-popup-blocking".to_string(),
        "--password-store=basic".to_string(),
        format!("--window-size={},{}", width, height),
    ];
    if !headed {
        args.push("--headless=new".to_string());
    }
    args.push("about:blank".to_string());
    args
}

/// First Chrome, Chromium or Edge binary found on this machine.
pub fn find_browser_binary() -> Option<String> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "microsoft-edge",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ]
    };

    candidates.iter().find_map(|candidate| {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        let bare = !candidate.contains('/') && !candidate.contains('\\');
        if bare && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
        None
    })
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Poll `/json/version` until the browser answers.
async fn wait_for_cdp_ready(port: u16, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Driver(format!(
                "Browser CDP endpoint not ready after {}s on port {}",
                timeout.as_secs(),
                port
            )));
        }
        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if body.get("webSocketDebuggerUrl").is_some() {
                    return Ok(());
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// WebSocket URL of the first `page` target listed by `/json/list`.
async fn get_page_ws_url(port: u16) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let targets: Vec<Value> = match reqwest::get(&url).await {
            Ok(resp) => match resp.json().await {
                Ok(t) => t,
                Err(_) => continue,
            },
            Err(_) => continue,
        };
        if let Some(ws_url) = first_page_ws_url(&targets) {
            return Ok(ws_url);
        }
        debug!(attempt, "No page target yet");
    }

    Err(Error::Driver("No page target found after retries".to_string()))
}

fn first_page_ws_url(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
        .find_map(|t| t.get("webSocketDebuggerUrl").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_args_follow_display_and_mode() {
        let args = build_browser_args(9222, Path::new("/tmp/p"), false, 1024, 768);
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/p".to_string()));
        assert!(args.contains(&"--window-size=1024,768".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert_eq!(args.last().map(|s| s.as_str()), Some("about:blank"));

        let headed = build_browser_args(9222, Path::new("/tmp/p"), true, 800, 600);
        assert!(!headed.contains(&"--headless=new".to_string()));
    }

    #[test]
    fn test_first_page_target_is_chosen() {
        let targets = vec![
            json!({"type": "service_worker", "webSocketDebuggerUrl": "ws://sw"}),
            json!({"type": "page", "webSocketDebuggerUrl": "ws://page1"}),
            json!({"type": "page", "webSocketDebuggerUrl": "ws://page2"}),
        ];
        assert_eq!(first_page_ws_url(&targets).as_deref(), Some("ws://page1"));
        assert_eq!(first_page_ws_url(&[]), None);
    }

    #[tokio::test]
    async fn test_free_port_is_nonzero() {
        assert!(find_free_port().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_missing_executable_fails_to_launch() {
        let dir = std::env::temp_dir().join(format!("surfpilot-launch-{}", std::process::id()));
        let launcher = BrowserLauncher::new(dir.clone(), false, Some("/nonexistent/chrome".to_string()), 800, 600);
        let err = launcher.launch("s1").await.unwrap_err();
        assert!(matches!(err, Error::Driver(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
