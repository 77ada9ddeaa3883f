//! Drives a browser session through the retailer search flow and parses the
//! product detail page into a [`ProductRecord`].

use crate::browser::{BrowserError, BrowserSession, HttpBrowser, Key, Role};
use crate::config::SearchTarget;
use crate::models::{MODEL_NUMBER_NA, ProductRecord};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error("product title {title:?} has no name before the delimiter")]
    EmptyName { title: String },
    #[error("price text {text:?} does not parse as a whole price")]
    UnparsablePrice { text: String },
}

/// Extraction capability the pipeline consumes. One complete record per
/// successful call; any failure yields nothing.
pub trait Extract {
    fn extract(&self) -> Result<ProductRecord, ExtractError>;
}

pub struct ProductExtractor {
    target: SearchTarget,
}

impl ProductExtractor {
    pub fn new(target: SearchTarget) -> Self {
        Self { target }
    }

    /// The search flow against any session. The session stays owned by the
    /// caller so tests can drive this with a scripted one.
    pub fn extract_with<S: BrowserSession>(
        &self,
        session: &mut S,
    ) -> Result<ProductRecord, ExtractError> {
        let target = &self.target;
        info!(url = %target.entry_url, query = %target.query, "starting extraction");

        session.navigate(&target.entry_url)?;
        let search_box = session.locate_by_role(Role::Textbox, &target.search_box)?;
        session.click(&search_box)?;
        session.fill(&search_box, &target.query)?;
        session.press_key(&search_box, Key::Enter)?;

        let result_link = session.locate_by_role(Role::Link, &target.result_link)?;
        session.click(&result_link)?;
        // The product link may have opened a new browsing context; normalize
        // to one resolved URL before parsing anything.
        let product_url = session.await_popup()?;
        session.navigate(&product_url)?;

        let title = session.inner_text(&target.title_selector)?;
        let (name, model_number) = split_title(&title)?;
        let price_text = session.inner_text(&target.price_selector)?;
        let price = parse_price(&price_text)?;

        info!(name = %name, price, "extraction completed");
        Ok(ProductRecord::new(name, price, product_url, model_number))
    }
}

impl Extract for ProductExtractor {
    fn extract(&self) -> Result<ProductRecord, ExtractError> {
        // Fresh session per run, dropped on every return path.
        let mut session = HttpBrowser::open()?;
        self.extract_with(&mut session)
    }
}

/// Title region is `<name>, <model>`; everything after the first comma is
/// the model number, `NA` when the comma is absent.
fn split_title(title: &str) -> Result<(String, String), ExtractError> {
    let (name, model) = match title.split_once(',') {
        Some((name, model)) => (name.trim(), model.trim()),
        None => (title.trim(), MODEL_NUMBER_NA),
    };
    if name.is_empty() {
        return Err(ExtractError::EmptyName {
            title: title.to_string(),
        });
    }
    let model = if model.is_empty() { MODEL_NUMBER_NA } else { model };
    Ok((name.to_string(), model.to_string()))
}

/// Strips every non-digit and parses the remainder. Thousands separators
/// are discarded rather than interpreted, so `"1,64,990"` is `164990`.
fn parse_price(text: &str) -> Result<u64, ExtractError> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits
        .parse()
        .map_err(|_| ExtractError::UnparsablePrice {
            text: text.to_string(),
        })
}
