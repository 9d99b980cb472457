use url::Url;

/// Opens the local login page for the user.
///
/// Implemented for closures, so callers can supply their own strategy, e.g. printing the URL on
/// headless machines.
pub trait BrowserLauncher: Send + Sync + 'static {
    fn open(&self, url: &Url) -> std::io::Result<()>;
}

/// Opens the system's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &Url) -> std::io::Result<()> {
        tracing::info!(%url, "Opening browser to log in");
        webbrowser::open(url.as_str())
    }
}

impl<F> BrowserLauncher for F
where
    F: Fn(&Url) -> std::io::Result<()> + Send + Sync + 'static,
{
    fn open(&self, url: &Url) -> std::io::Result<()> {
        self(url)
    }
}
