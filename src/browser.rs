//! Text-mode rendering of the retail site: pages are fetched with a blocking
//! HTTP client and queried with CSS selectors / accessible names. The
//! [`BrowserSession`] trait is the seam the extractor drives; [`HttpBrowser`]
//! is the production implementation.

use reqwest::{StatusCode, redirect};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to build http client")]
    Client(#[source] reqwest::Error),
    #[error("invalid url {url:?}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("navigation to {url} failed")]
    Navigation {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status { url: String, status: StatusCode },
    #[error("no {role:?} element matching {name:?}")]
    ElementNotFound { role: Role, name: String },
    #[error("invalid selector {selector:?}")]
    InvalidSelector { selector: String },
    #[error("no element matches selector {selector:?}")]
    SelectorNotFound { selector: String },
    #[error("element handle is stale")]
    StaleElement,
    #[error("element does not accept text input")]
    NotATextbox,
    #[error("no page loaded")]
    NoPage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Textbox,
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
}

/// Opaque handle to an element located on the current page. Handles go
/// stale as soon as the session navigates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    index: usize,
    epoch: u64,
}

impl Element {
    pub(crate) fn new(index: usize, epoch: u64) -> Self {
        Self { index, epoch }
    }
}

/// The render-and-query capability the extractor consumes.
pub trait BrowserSession {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;
    fn locate_by_role(&mut self, role: Role, name: &str) -> Result<Element, BrowserError>;
    fn click(&mut self, element: &Element) -> Result<(), BrowserError>;
    fn fill(&mut self, element: &Element, text: &str) -> Result<(), BrowserError>;
    fn press_key(&mut self, element: &Element, key: Key) -> Result<(), BrowserError>;
    /// URL of the page the last click landed in. A `target="_blank"` link
    /// yields the new context's URL; otherwise this is the current page, so
    /// callers always end up with one resolved URL.
    fn await_popup(&mut self) -> Result<String, BrowserError>;
    fn inner_text(&self, selector: &str) -> Result<String, BrowserError>;
}

struct Page {
    url: Url,
    html: String,
}

enum Located {
    Textbox {
        action: Url,
        input_name: String,
        value: String,
    },
    Link {
        href: Url,
        new_context: bool,
    },
}

/// Browser session over plain HTTP fetches of server-rendered pages.
pub struct HttpBrowser {
    client: reqwest::blocking::Client,
    page: Option<Page>,
    located: Vec<Located>,
    epoch: u64,
    popup: Option<Url>,
}

impl HttpBrowser {
    pub fn open() -> Result<Self, BrowserError> {
        let redirect_policy = redirect::Policy::custom(|attempt| {
            if attempt.previous().len() > 10 {
                attempt.error("too many redirects (>10)")
            } else {
                attempt.follow()
            }
        });

        let client = reqwest::blocking::Client::builder()
            .redirect(redirect_policy)
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(BrowserError::Client)?;

        Ok(Self {
            client,
            page: None,
            located: Vec::new(),
            epoch: 0,
            popup: None,
        })
    }

    fn load(&mut self, url: Url) -> Result<(), BrowserError> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|source| BrowserError::Navigation {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BrowserError::Status {
                url: url.to_string(),
                status,
            });
        }

        // Redirects may have moved us; keep the final URL.
        let final_url = response.url().clone();
        let html = response.text().map_err(|source| BrowserError::Navigation {
            url: final_url.to_string(),
            source,
        })?;

        self.page = Some(Page {
            url: final_url,
            html,
        });
        self.located.clear();
        self.epoch += 1;
        self.popup = None;
        Ok(())
    }

    fn page(&self) -> Result<&Page, BrowserError> {
        self.page.as_ref().ok_or(BrowserError::NoPage)
    }

    fn resolve(&self, element: &Element) -> Result<usize, BrowserError> {
        if element.epoch != self.epoch || element.index >= self.located.len() {
            return Err(BrowserError::StaleElement);
        }
        Ok(element.index)
    }
}

impl BrowserSession for HttpBrowser {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        let url = Url::parse(url).map_err(|source| BrowserError::Url {
            url: url.to_string(),
            source,
        })?;
        self.load(url)
    }

    fn locate_by_role(&mut self, role: Role, name: &str) -> Result<Element, BrowserError> {
        let page = self.page()?;
        let located = match role {
            Role::Textbox => find_textbox(&page.html, &page.url, name)
                .map(|(action, input_name)| Located::Textbox {
                    action,
                    input_name,
                    value: String::new(),
                }),
            Role::Link => find_link(&page.html, &page.url, name)
                .map(|(href, new_context)| Located::Link { href, new_context }),
        }
        .ok_or_else(|| BrowserError::ElementNotFound {
            role,
            name: name.to_string(),
        })?;

        self.located.push(located);
        Ok(Element::new(self.located.len() - 1, self.epoch))
    }

    fn click(&mut self, element: &Element) -> Result<(), BrowserError> {
        let index = self.resolve(element)?;
        let (href, new_context) = match &self.located[index] {
            // Clicking a textbox only focuses it.
            Located::Textbox { .. } => return Ok(()),
            Located::Link { href, new_context } => (href.clone(), *new_context),
        };
        if new_context {
            debug!(url = %href, "link opens a new browsing context");
            self.popup = Some(href);
            Ok(())
        } else {
            self.load(href)
        }
    }

    fn fill(&mut self, element: &Element, text: &str) -> Result<(), BrowserError> {
        let index = self.resolve(element)?;
        match &mut self.located[index] {
            Located::Textbox { value, .. } => {
                *value = text.to_string();
                Ok(())
            }
            Located::Link { .. } => Err(BrowserError::NotATextbox),
        }
    }

    fn press_key(&mut self, element: &Element, key: Key) -> Result<(), BrowserError> {
        let index = self.resolve(element)?;
        let submit = match (&self.located[index], key) {
            (
                Located::Textbox {
                    action,
                    input_name,
                    value,
                },
                Key::Enter,
            ) => build_submit_url(action, input_name, value),
            (Located::Link { .. }, Key::Enter) => return Err(BrowserError::NotATextbox),
        };
        self.load(submit)
    }

    fn await_popup(&mut self) -> Result<String, BrowserError> {
        if let Some(url) = self.popup.take() {
            return Ok(url.to_string());
        }
        Ok(self.page()?.url.to_string())
    }

    fn inner_text(&self, selector: &str) -> Result<String, BrowserError> {
        let page = self.page()?;
        select_text(&page.html, selector)?.ok_or_else(|| BrowserError::SelectorNotFound {
            selector: selector.to_string(),
        })
    }
}

impl Drop for HttpBrowser {
    fn drop(&mut self) {
        debug!("browser session closed");
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Accessible-name match for text inputs: any of the labelling attributes
/// contains `name`, case-insensitively. Returns the enclosing form's
/// resolved action and the input's submit name.
fn find_textbox(html: &str, base: &Url, name: &str) -> Option<(Url, String)> {
    let document = Html::parse_document(html);
    let inputs = Selector::parse("input, textarea").unwrap();
    let wanted = normalize(name).to_lowercase();

    for element in document.select(&inputs) {
        let labelled = ["aria-label", "placeholder", "title", "name"]
            .iter()
            .filter_map(|attr| element.value().attr(attr))
            .any(|value| normalize(value).to_lowercase().contains(&wanted));
        if !labelled {
            continue;
        }
        let Some(input_name) = element.value().attr("name") else {
            continue;
        };
        return Some((enclosing_form_action(element, base), input_name.to_string()));
    }
    None
}

fn enclosing_form_action(input: ElementRef<'_>, base: &Url) -> Url {
    input
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "form")
        .and_then(|form| form.value().attr("action"))
        .and_then(|action| base.join(action).ok())
        .unwrap_or_else(|| base.clone())
}

/// Link match by rendered text (case-insensitive substring, whitespace
/// collapsed). Returns the resolved href and whether the link opens a new
/// browsing context.
fn find_link(html: &str, base: &Url, name: &str) -> Option<(Url, bool)> {
    let document = Html::parse_document(html);
    let anchors = Selector::parse("a").unwrap();
    let wanted = normalize(name).to_lowercase();

    for element in document.select(&anchors) {
        let text = normalize(&element.text().collect::<String>()).to_lowercase();
        if text.is_empty() || !text.contains(&wanted) {
            continue;
        }
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(href) = base.join(href) else {
            continue;
        };
        let new_context = element
            .value()
            .attr("target")
            .is_some_and(|target| target.eq_ignore_ascii_case("_blank"));
        return Some((href, new_context));
    }
    None
}

/// A GET form submit replaces the action's query string with the single
/// filled field.
fn build_submit_url(action: &Url, input_name: &str, value: &str) -> Url {
    let mut url = action.clone();
    url.set_query(None);
    url.query_pairs_mut().append_pair(input_name, value);
    url
}

fn select_text(html: &str, selector: &str) -> Result<Option<String>, BrowserError> {
    let compiled = Selector::parse(selector).map_err(|_| BrowserError::InvalidSelector {
        selector: selector.to_string(),
    })?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&compiled)
        .next()
        .map(|element| normalize(&element.text().collect::<String>())))
}
