use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::page::{Page, ScreenshotParamsBuilder};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;

#[derive(Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    pub user_agent: Option<String>,
    pub window: (u32, u32),
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            user_agent: None,
            window: (1280, 800),
        }
    }
}

/// Thin page-level wrapper over a CDP-driven Chromium.
///
/// One page per browser; links are kept in the same tab so the agent never
/// loses the page it is acting on.
pub struct Browser {
    page: Page,
    _browser: OxideBrowser,
}

impl Browser {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        // Isolated profile per launch, otherwise Chromium's ProcessSingleton
        // lock rejects rapid relaunches.
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis();
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("webtrails-profile-{}-{}", std::process::id(), ts));
        let _ = std::fs::create_dir_all(&profile_dir);
        builder = builder
            .user_data_dir(profile_dir.clone())
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        let bcfg = builder.build().map_err(|e| anyhow::anyhow!(e))?;

        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });

        let page = browser.new_page("about:blank").await?;
        if let Some(ua) = cfg.user_agent {
            page.set_user_agent(ua).await?;
        }
        let out = Self { page, _browser: browser };
        out.set_viewport(cfg.window.0, cfg.window.1).await?;
        Ok(out)
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        // New-tab targets would detach the page from under us.
        let _ = self.keep_single_tab().await;
        self.settle().await;
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    pub async fn title(&self) -> Result<Option<String>> {
        Ok(self.page.get_title().await?)
    }

    pub async fn click(&self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("no element matches selector {selector:?}"))?;
        element.scroll_into_view().await?;
        element.click().await?;
        let _ = self.keep_single_tab().await;
        self.settle().await;
        Ok(())
    }

    pub async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("no element matches selector {selector:?}"))?;
        element.focus().await?;
        element.type_str(text).await?;
        Ok(())
    }

    pub async fn press(&self, key: &str) -> Result<()> {
        let quoted = serde_json::to_string(key)?;
        let js = format!(
            "(() => {{ \
               const el = document.activeElement || document.body; \
               const opts = {{ key: {quoted}, code: {quoted}, bubbles: true }}; \
               el.dispatchEvent(new KeyboardEvent('keydown', opts)); \
               el.dispatchEvent(new KeyboardEvent('keyup', opts)); \
             }})()"
        );
        self.page.evaluate(js).await?;
        self.settle().await;
        Ok(())
    }

    pub async fn scroll_by(&self, dx: i64, dy: i64) -> Result<()> {
        self.page
            .evaluate(format!("window.scrollBy({dx}, {dy})"))
            .await?;
        Ok(())
    }

    pub async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(width as i64)
            .height(height as i64)
            .device_scale_factor(1.0)
            .mobile(width < 768)
            .build()
            .map_err(|e| anyhow::anyhow!(e))?;
        self.page.execute(params).await?;
        Ok(())
    }

    /// Full-page screenshot, base64-encoded PNG.
    pub async fn screenshot_b64(&self) -> Result<String> {
        let bytes = self
            .page
            .screenshot(ScreenshotParamsBuilder::default().full_page(true).build())
            .await
            .context("screenshot failed")?;
        Ok(STANDARD.encode(bytes))
    }

    /// Visible text of the page, or of the first element matching `selector`.
    pub async fn visible_text(&self, selector: Option<&str>) -> Result<String> {
        let js = match selector {
            Some(sel) => {
                let quoted = serde_json::to_string(sel)?;
                format!(
                    "(() => {{ const el = document.querySelector({quoted}); \
                       return el ? el.innerText : ''; }})()"
                )
            }
            None => "document.body ? document.body.innerText : ''".to_string(),
        };
        let text: String = self
            .page
            .evaluate(js)
            .await?
            .into_value()
            .context("text extraction returned a non-string value")?;
        Ok(text)
    }

    async fn keep_single_tab(&self) -> Result<()> {
        self.page
            .evaluate(
                "document.querySelectorAll('a[target=\"_blank\"]')\
                 .forEach(a => a.removeAttribute('target'))",
            )
            .await?;
        Ok(())
    }

    async fn settle(&self) {
        sleep(Duration::from_millis(400)).await;
    }
}
