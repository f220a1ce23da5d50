//! Read fields out of rendered HTML.

use crate::models::{RawIndexCard, RawNewsItem};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::session::ExtractError;
use super::sites::{IndexWidget, NewsListing};

fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|_| ExtractError::InvalidSelector(css.to_string()))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

/// Text of the first element matching `css`.
pub fn extract_text(html: &str, css: &str) -> Result<Option<String>, ExtractError> {
    let sel = selector(css)?;
    let doc = Html::parse_document(html);
    Ok(doc.select(&sel).next().map(text_of))
}

/// Text of every element matching `css`, in document order.
pub fn extract_texts(html: &str, css: &str) -> Result<Vec<String>, ExtractError> {
    let sel = selector(css)?;
    let doc = Html::parse_document(html);
    Ok(doc.select(&sel).map(text_of).collect())
}

pub fn extract_attr(html: &str, css: &str, attr: &str) -> Result<Option<String>, ExtractError> {
    let sel = selector(css)?;
    let doc = Html::parse_document(html);
    Ok(doc
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|v| v.to_string()))
}

/// Cell texts per row. `skip_cells` drops leading cells (row-number columns).
pub fn extract_rows(
    html: &str,
    row_css: &str,
    skip_cells: usize,
) -> Result<Vec<Vec<String>>, ExtractError> {
    let row_sel = selector(row_css)?;
    let td_sel = selector("td")?;
    let doc = Html::parse_document(html);

    Ok(doc
        .select(&row_sel)
        .map(|tr| tr.select(&td_sel).skip(skip_cells).map(text_of).collect::<Vec<_>>())
        .filter(|cells| !cells.is_empty() && !cells.iter().all(|c| c.is_empty()))
        .collect())
}

/// Resolve `href` against the page it was found on.
pub fn absolutize(base: &str, href: &str) -> Option<String> {
    match Url::parse(href) {
        Ok(u) => Some(u.to_string()),
        Err(_) => Url::parse(base).ok()?.join(href).ok().map(|u| u.to_string()),
    }
}

// ── News listing ──────────────────────────────────────────────────────────────

pub fn extract_news_items(
    html: &str,
    listing: &NewsListing,
    page_url: &str,
) -> Result<Vec<RawNewsItem>, ExtractError> {
    let item_sel = selector(listing.item)?;
    let title_sel = selector(listing.title)?;
    let image_sel = selector(listing.image)?;
    let link_sel = selector(listing.link)?;
    let date_sel = selector(listing.date)?;
    let doc = Html::parse_document(html);

    Ok(doc
        .select(&item_sel)
        .map(|item| RawNewsItem {
            title: item.select(&title_sel).next().map(text_of).and_then(non_empty),
            image: item
                .select(&image_sel)
                .next()
                .and_then(|img| img.value().attr("src"))
                .and_then(|src| absolutize(page_url, src)),
            link: item
                .select(&link_sel)
                .next()
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| absolutize(page_url, href)),
            date: item.select(&date_sel).next().map(text_of).and_then(non_empty),
        })
        .collect())
}

// ── Index widget ──────────────────────────────────────────────────────────────

/// The card whose heading text is exactly `name`, if it is in the viewport.
pub fn find_index_card(
    html: &str,
    widget: &IndexWidget,
    name: &str,
) -> Result<Option<RawIndexCard>, ExtractError> {
    let viewport_sel = selector(widget.viewport)?;
    let heading_sel = selector(widget.heading)?;
    let turnover_sel = selector(widget.turnover)?;
    let value_sel = selector(widget.value)?;
    let percent_sel = selector(widget.percent)?;
    let doc = Html::parse_document(html);

    let Some(viewport) = doc.select(&viewport_sel).next() else {
        return Ok(None);
    };

    let card = viewport
        .select(&heading_sel)
        .filter(|h4| text_of(*h4) == name)
        .find_map(|h4| h4.parent().and_then(ElementRef::wrap));

    Ok(card.map(|card| RawIndexCard {
        index_name: name.to_string(),
        turnover: card.select(&turnover_sel).next().map(text_of),
        value: card.select(&value_sel).next().map(text_of),
        percent: card.select(&percent_sel).next().map(text_of),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::sites;

    const LISTING: &str = r#"
        <div class="featured-news-list">
          <a href="/newsdetail/abc-1"><img src="https://cdn.x/a.jpg"></a>
          <h4 class="featured-news-title"> Bonus declared </h4>
          <span class="text-org">Friday, October 16, 2026</span>
        </div>
        <div class="featured-news-list">
          <a href="https://www.sharesansar.com/newsdetail/abc-2"></a>
          <h4 class="featured-news-title">IPO opens</h4>
        </div>"#;

    #[test]
    fn news_items_resolve_relative_links() {
        let listing = &sites::sharesansar()[0];
        let items = extract_news_items(LISTING, listing, "https://www.sharesansar.com/category/ipo-fpo-news").unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title.as_deref(), Some("Bonus declared"));
        assert_eq!(items[0].link.as_deref(), Some("https://www.sharesansar.com/newsdetail/abc-1"));
        assert_eq!(items[0].image.as_deref(), Some("https://cdn.x/a.jpg"));
        assert_eq!(items[0].date.as_deref(), Some("Friday, October 16, 2026"));
        assert_eq!(items[1].image, None);
        assert_eq!(items[1].date, None);
    }

    #[test]
    fn rows_skip_leading_cells_and_blank_rows() {
        let html = r#"<table id="t"><tbody>
            <tr><td>1</td><td>A</td><td>B</td></tr>
            <tr><td></td></tr>
            <tr><td>2</td><td>C</td><td>D</td></tr>
        </tbody></table>"#;
        let rows = extract_rows(html, "#t tbody tr", 1).unwrap();
        assert_eq!(rows, vec![vec!["A", "B"], vec!["C", "D"]]);
    }

    #[test]
    fn index_card_matches_heading_exactly() {
        let html = r#"<div class="bx-viewport"><div>
            <div><h4>NEPSE Index</h4>
              <p class="mu-price">4,512,300.10</p>
              <p><span class="mu-value">2,745.31</span> <span class="mu-percent">1.25%</span></p>
            </div>
            <div><h4>Sensitive Index</h4><p class="mu-price">1</p></div>
        </div></div>"#;
        let widget = sites::index_widget();

        let card = find_index_card(html, &widget, "NEPSE Index").unwrap().unwrap();
        assert_eq!(card.turnover.as_deref(), Some("4,512,300.10"));
        assert_eq!(card.value.as_deref(), Some("2,745.31"));
        assert_eq!(card.percent.as_deref(), Some("1.25%"));

        assert!(find_index_card(html, &widget, "NEPSE").unwrap().is_none());
        assert!(find_index_card(html, &widget, "Mutual Fund").unwrap().is_none());
    }

    #[test]
    fn bad_selector_is_an_error() {
        assert!(matches!(
            extract_text("<p></p>", "p[["),
            Err(ExtractError::InvalidSelector(_))
        ));
    }

    #[test]
    fn absolutize_keeps_absolute_urls() {
        assert_eq!(absolutize("https://a.b/x/", "https://c.d/1").as_deref(), Some("https://c.d/1"));
        assert_eq!(absolutize("https://a.b/x/y", "z").as_deref(), Some("https://a.b/x/z"));
        assert_eq!(absolutize("not a url", "z"), None);
    }
}
