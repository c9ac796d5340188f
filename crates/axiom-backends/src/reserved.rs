//! Pages served locally under the reserved `axiom:` scheme

use url::Url;

use crate::search::SearchHit;

pub const RESERVED_SCHEME: &str = "axiom";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservedPage {
    /// `axiom://home`
    Home,
    /// `axiom://search?q=…`
    Search(String),
}

impl ReservedPage {
    /// `None` for URLs outside the reserved scheme or unknown reserved pages.
    pub fn parse(raw: &str) -> Option<Self> {
        let url = Url::parse(raw).ok()?;
        if url.scheme() != RESERVED_SCHEME {
            return None;
        }

        match url.host_str().unwrap_or_default() {
            "home" | "" => Some(ReservedPage::Home),
            "search" => {
                let query = url
                    .query_pairs()
                    .find(|(k, _)| k == "q")
                    .map(|(_, v)| v.trim().to_string())
                    .unwrap_or_default();
                Some(ReservedPage::Search(query))
            }
            _ => None,
        }
    }

    pub fn is_reserved(raw: &str) -> bool {
        raw.trim_start()
            .to_ascii_lowercase()
            .starts_with(&format!("{}:", RESERVED_SCHEME))
    }

    pub fn title(&self) -> String {
        match self {
            ReservedPage::Home => "Home".to_string(),
            ReservedPage::Search(q) if q.is_empty() => "Search".to_string(),
            ReservedPage::Search(q) => format!("{} - Search", q),
        }
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{}</title></head>\n<body>\n{}</body></html>\n",
        escape_html(title),
        body
    )
}

fn search_form(query: &str) -> String {
    format!(
        "<form action=\"{}://search\"><input name=\"q\" value=\"{}\" autofocus></form>\n",
        RESERVED_SCHEME,
        escape_html(query)
    )
}

pub(crate) fn render_home() -> String {
    let mut body = String::from("<h1>AXIOM</h1>\n");
    body.push_str(&search_form(""));
    page(&ReservedPage::Home.title(), &body)
}

pub(crate) fn render_search(query: &str, hits: &[SearchHit]) -> String {
    let mut body = search_form(query);

    if hits.is_empty() {
        body.push_str("<p>No results</p>\n");
    } else {
        body.push_str("<ol>\n");
        for hit in hits {
            body.push_str("<li><a href=\"");
            body.push_str(&escape_html(&hit.url));
            body.push_str("\">");
            body.push_str(&escape_html(&hit.title));
            body.push_str("</a>");
            if !hit.snippet.is_empty() {
                body.push_str("<p>");
                body.push_str(&escape_html(&hit.snippet));
                body.push_str("</p>");
            }
            body.push_str("</li>\n");
        }
        body.push_str("</ol>\n");
    }

    page(&ReservedPage::Search(query.to_string()).title(), &body)
}
