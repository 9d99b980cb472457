//! Stands in for the user's browser: follows the redirects of the login flow, carrying the
//! cookies set by the local server, without rendering anything.

use cookie::Cookie;
use http::{
    StatusCode,
    header::{COOKIE, LOCATION, SET_COOKIE},
};
use std::sync::{Arc, Mutex};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Log in as the user would.
    Complete,
    /// Replace the `state` of the callback with a forged value.
    ForgeState,
    /// Return to the callback with `error=access_denied` instead of visiting the IdP.
    Deny,
    /// Open nothing. The login stays pending.
    Idle,
}

/// Status codes and bodies of the responses to `/callback`.
#[derive(Debug, Clone, Default)]
pub struct BrowserLog {
    callbacks: Arc<Mutex<Vec<(StatusCode, String)>>>,
    opened: Arc<Mutex<Vec<Url>>>,
}

impl BrowserLog {
    pub fn callbacks(&self) -> Vec<(StatusCode, String)> {
        self.callbacks.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<Url> {
        self.opened.lock().unwrap().clone()
    }
}

pub fn fake_browser(
    behavior: Behavior,
    log: BrowserLog,
) -> impl Fn(&Url) -> std::io::Result<()> + Send + Sync + 'static {
    move |url: &Url| {
        log.opened.lock().unwrap().push(url.clone());
        if behavior == Behavior::Idle {
            return Ok(());
        }
        let url = url.clone();
        let log = log.clone();
        tokio::spawn(async move {
            match follow_login(url, behavior).await {
                Ok(callback) => log.callbacks.lock().unwrap().push(callback),
                Err(err) => tracing::error!(?err, "Fake browser failed"),
            }
        });
        Ok(())
    }
}

pub fn failing_browser() -> impl Fn(&Url) -> std::io::Result<()> + Send + Sync + 'static {
    |_url: &Url| Err(std::io::Error::other("no display"))
}

fn location(response: &reqwest::Response) -> anyhow::Result<Url> {
    let location = response
        .headers()
        .get(LOCATION)
        .ok_or_else(|| anyhow::anyhow!("expected a redirect, got {}", response.status()))?
        .to_str()?;
    Ok(Url::parse(location)?)
}

async fn follow_login(login_page: Url, behavior: Behavior) -> anyhow::Result<(StatusCode, String)> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;

    let start = client.get(login_page).send().await?;
    anyhow::ensure!(start.status() == StatusCode::FOUND, "login page did not redirect");
    let cookies = start
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|it| -> anyhow::Result<String> {
            Ok(Cookie::parse(it.to_str()?.to_owned())?.stripped().to_string())
        })
        .collect::<anyhow::Result<Vec<_>>>()?
        .join("; ");
    let authorization_url = location(&start)?;

    let mut callback = match behavior {
        Behavior::Deny => {
            let state = authorization_url
                .query_pairs()
                .find(|(key, _)| key == "state")
                .map(|(_, value)| value.into_owned())
                .unwrap_or_default();
            let redirect_uri = authorization_url
                .query_pairs()
                .find(|(key, _)| key == "redirect_uri")
                .map(|(_, value)| value.into_owned())
                .ok_or_else(|| anyhow::anyhow!("no redirect_uri"))?;
            let mut callback = Url::parse(&redirect_uri)?;
            callback
                .query_pairs_mut()
                .append_pair("error", "access_denied")
                .append_pair("error_description", "User denied consent")
                .append_pair("state", &state);
            callback
        }
        _ => location(&client.get(authorization_url).send().await?)?,
    };

    if behavior == Behavior::ForgeState {
        let forged: Vec<(String, String)> = callback
            .query_pairs()
            .map(|(key, value)| match &*key {
                "state" => (key.into_owned(), "forged-state".to_owned()),
                _ => (key.into_owned(), value.into_owned()),
            })
            .collect();
        callback.query_pairs_mut().clear().extend_pairs(forged);
    }

    let response = client.get(callback).header(COOKIE, cookies).send().await?;
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}
