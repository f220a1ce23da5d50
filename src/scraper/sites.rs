//! Where each source lives and how its pages are laid out.
//!
//! Selectors target the rendered DOM of the live sites; they are data, kept
//! apart from the traversal logic in the driver modules.

use crate::models::NewsCategory;

// ── News listings ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// Clicking the control appends the next batch to the same page.
    LoadMore(&'static str),
    /// The control is a link to the next listing page.
    NextLink(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    Select { selector: &'static str, value: &'static str },
    Click(&'static str),
}

#[derive(Debug, Clone)]
pub struct NewsListing {
    pub site: &'static str,
    pub url: String,
    pub category: NewsCategory,
    pub setup: Vec<SetupStep>,
    pub item: &'static str,
    pub title: &'static str,
    pub image: &'static str,
    pub link: &'static str,
    pub date: &'static str,
    pub pagination: Pagination,
    pub detail_ready: &'static str,
    pub detail_body: &'static str,
    pub sentence_delimiter: &'static str,
}

pub fn merolagani() -> NewsListing {
    NewsListing {
        site: "merolagani",
        url: "https://merolagani.com/NewsList.aspx".to_string(),
        category: NewsCategory::General,
        setup: vec![
            // "6" is the Stock Market category
            SetupStep::Select { selector: "#ctl00_ContentPlaceHolder1_ddlNewsCategory", value: "6" },
            SetupStep::Click("#ctl00_ContentPlaceHolder1_lbtnSearch"),
        ],
        item: ".media-news",
        title: "h4.media-title a",
        image: "img",
        link: "a",
        date: "span.media-label",
        pagination: Pagination::LoadMore(r#"a.btn.btn-primary.btn-block[data-load="news-block-three"]"#),
        detail_ready: "div.col-md-9",
        detail_body: "div.col-md-9 .media-content p span",
        sentence_delimiter: "। ",
    }
}

const SHARESANSAR_CATEGORIES: [(&str, NewsCategory); 5] = [
    ("ipo-fpo-news", NewsCategory::Ipo),
    ("dividend-right-bonus", NewsCategory::DividendRightBonus),
    ("exclusive", NewsCategory::General),
    ("financial-analysis", NewsCategory::FinancialAnalysis),
    ("share-listed", NewsCategory::ListedShares),
];

pub fn sharesansar() -> Vec<NewsListing> {
    SHARESANSAR_CATEGORIES
        .iter()
        .map(|(slug, category)| NewsListing {
            site: "sharesansar",
            url: format!("https://www.sharesansar.com/category/{}", slug),
            category: *category,
            setup: Vec::new(),
            item: ".featured-news-list",
            title: "h4.featured-news-title",
            image: "img",
            link: "a",
            date: "span.text-org",
            pagination: Pagination::NextLink(r#"a.page-link[rel="next"]"#),
            detail_ready: "div#newsdetail-content",
            detail_body: "div#newsdetail-content p",
            sentence_delimiter: ". ",
        })
        .collect()
}

pub fn all_news_listings() -> Vec<NewsListing> {
    let mut listings = vec![merolagani()];
    listings.extend(sharesansar());
    listings
}

// ── Company announcements ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AnnouncementPage {
    pub base_url: String,
    pub tab_button: &'static str,
    pub body: &'static str,
    pub rows: &'static str,
}

impl AnnouncementPage {
    pub fn url_for(&self, symbol: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), symbol)
    }
}

pub fn announcements() -> AnnouncementPage {
    AnnouncementPage {
        base_url: "https://www.sharesansar.com/company".to_string(),
        tab_button: "#btn_cannouncements",
        body: "#myTableCAnnouncements tbody",
        rows: "#myTableCAnnouncements tbody tr",
    }
}

// ── Floorsheet ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FloorsheetPage {
    pub url: String,
    pub stock_picker: &'static str,
    pub stock_search: &'static str,
    pub stock_options: &'static str,
    pub date_input: &'static str,
    pub submit: &'static str,
    pub page_length: &'static str,
    pub page_length_value: &'static str,
    pub headers: &'static str,
    pub rows: &'static str,
    pub next: &'static str,
}

pub fn floorsheet() -> FloorsheetPage {
    FloorsheetPage {
        url: "https://www.sharesansar.com/floorsheet".to_string(),
        stock_picker: "#frm_floorsheet > div:nth-of-type(1) > span",
        stock_search: "span.select2-search input.select2-search__field",
        stock_options: "#select2-company-results li",
        date_input: "#date",
        submit: "#btn_flsheet_submit",
        page_length: r#"select[name="myTable_length"]"#,
        page_length_value: "500",
        headers: "#myTable thead th",
        rows: "#myTable tbody tr",
        next: "#myTable_next",
    }
}

// ── Live index widget ─────────────────────────────────────────────────────────

pub const INDEX_NAMES: [&str; 17] = [
    "NEPSE Index",
    "Non Life Insurance",
    "Others Index",
    "Sensitive Float Inde.",
    "Sensitive Index",
    "Trading Index",
    "Banking SubIndex",
    "Development Bank Ind.",
    "Finance Index",
    "Float Index",
    "Hotels And Tourism",
    "HydroPower Index",
    "Investment",
    "Life Insurance",
    "Manufacturing And Pr.",
    "Microfinance Index",
    "Mutual Fund",
];

#[derive(Debug, Clone)]
pub struct IndexWidget {
    pub url: String,
    pub viewport: &'static str,
    pub heading: &'static str,
    pub turnover: &'static str,
    pub value: &'static str,
    pub percent: &'static str,
    pub next: &'static str,
}

pub fn index_widget() -> IndexWidget {
    IndexWidget {
        url: "https://www.sharesansar.com/live-trading".to_string(),
        viewport: ".bx-viewport",
        heading: "div > h4",
        turnover: "p.mu-price",
        value: "p span.mu-value",
        percent: "p span.mu-percent",
        next: ".bx-controls-direction a.bx-next",
    }
}

// ── EPS / PE table ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EpsTable {
    pub url: String,
    pub headers: &'static str,
    pub rows: &'static str,
    pub page_size_dropdown: &'static str,
    pub page_size_options: &'static str,
    pub symbol_column: &'static str,
    pub eps_column: &'static str,
    pub pe_column: &'static str,
}

pub fn eps_table() -> EpsTable {
    EpsTable {
        url: "https://chukul.com/stock-filter".to_string(),
        headers: "table thead tr th",
        rows: "table tbody tr",
        page_size_dropdown: "main .q-table__bottom .q-field__append i",
        page_size_options: ".q-virtual-scroll__content .q-item__label",
        symbol_column: "Symbol",
        eps_column: "EPS",
        pe_column: "P/E Ratio",
    }
}

// ── Market status ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StatusIndicator {
    pub url: String,
    pub selector: &'static str,
    pub live_marker: &'static str,
}

pub fn market_status() -> StatusIndicator {
    StatusIndicator {
        url: "https://www.nepalstock.com.np/".to_string(),
        selector: "app-dashboard > div:nth-of-type(1) > div:nth-of-type(1) > div > div:nth-of-type(1) \
                   > div:nth-of-type(1) > div:nth-of-type(2) > span:nth-of-type(2)",
        live_marker: "Live Market",
    }
}
