use std::sync::OnceLock;

use async_trait::async_trait;
use kaiqu_core::{AdmissionPolicy, RawListing};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::{AdapterError, FetchedPage, PayloadShape, SourceAdapter};

/// Listing rows carry a hover handler; header and layout rows usually don't.
pub const DEFAULT_ROW_SELECTOR: &str = "tr[onmouseover]";
const MIN_CELLS: usize = 7;

pub(crate) fn default_row_selector() -> String {
    DEFAULT_ROW_SELECTOR.to_string()
}

fn cell_selector() -> &'static Selector {
    static CELL: OnceLock<Selector> = OnceLock::new();
    CELL.get_or_init(|| Selector::parse("td").expect("valid td selector"))
}

fn link_selector() -> &'static Selector {
    static LINK: OnceLock<Selector> = OnceLock::new();
    LINK.get_or_init(|| Selector::parse("a").expect("valid a selector"))
}

/// Rows of an HTML listing table: name + link, category, time, minimum spend,
/// description, features.
#[derive(Debug, Clone)]
pub struct TableAdapter {
    source_id: String,
    row_selector: Selector,
    policy: AdmissionPolicy,
}

impl TableAdapter {
    pub fn new(source_id: impl Into<String>, row_selector: &str) -> Result<Self, AdapterError> {
        let parsed = Selector::parse(row_selector).map_err(|e| AdapterError::Selector {
            selector: row_selector.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            source_id: source_id.into(),
            row_selector: parsed,
            policy: AdmissionPolicy::table(),
        })
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().map(str::trim).collect()
}

fn first_link(cell: ElementRef<'_>) -> Option<ElementRef<'_>> {
    cell.select(link_selector()).next()
}

fn extract_row(row: ElementRef<'_>) -> Option<RawListing> {
    let cells: Vec<ElementRef<'_>> = row.select(cell_selector()).collect();
    if cells.len() < MIN_CELLS {
        debug!(cells = cells.len(), "skipping short table row");
        return None;
    }

    let (name, url) = first_link(cells[0])
        .map(|a| {
            let href = a.value().attr("href").unwrap_or_default().trim().to_string();
            (text_of(a), href)
        })
        .unwrap_or_default();
    let category = first_link(cells[1]).map(text_of).unwrap_or_default();

    Some(RawListing {
        name,
        url,
        category,
        time_text: text_of(cells[2]),
        min_spend: text_of(cells[3]),
        description: text_of(cells[4]),
        features: text_of(cells[5]),
    })
}

#[async_trait]
impl SourceAdapter for TableAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn shape(&self) -> PayloadShape {
        PayloadShape::Table
    }

    fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    fn extract(&self, page: &FetchedPage) -> Result<Vec<RawListing>, AdapterError> {
        let document = Html::parse_document(&page.body);
        Ok(document
            .select(&self.row_selector)
            .filter_map(extract_row)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(rows: &str) -> FetchedPage {
        FetchedPage::new(
            "https://listing.example/",
            format!("<html><body><table>{rows}</table></body></html>"),
        )
    }

    #[test]
    fn extracts_link_text_href_and_plain_cells() {
        let adapter = TableAdapter::new("t", DEFAULT_ROW_SELECTOR).unwrap();
        let rows = adapter
            .extract(&page(
                r#"<tr onmouseover="hl(this)">
                    <td><a href=" http://lcby.example/?from=9pk ">龙城霸业</a></td>
                    <td><a href="/type/1">1.76复古</a></td>
                    <td> 10月20日/13:00 </td><td>30元</td><td>散人天堂</td><td>高爆率</td><td>查看</td>
                </tr>"#,
            ))
            .unwrap();
        assert_eq!(
            rows,
            vec![RawListing {
                name: "龙城霸业".into(),
                url: "http://lcby.example/?from=9pk".into(),
                category: "1.76复古".into(),
                time_text: "10月20日/13:00".into(),
                min_spend: "30元".into(),
                description: "散人天堂".into(),
                features: "高爆率".into(),
            }]
        );
    }

    #[test]
    fn skips_short_rows_and_rows_without_marker() {
        let adapter = TableAdapter::new("t", DEFAULT_ROW_SELECTOR).unwrap();
        let rows = adapter
            .extract(&page(
                r#"<tr onmouseover="x"><td><a href="http://a.example">A</a></td><td>b</td><td>c</td></tr>
                   <tr><td><a href="http://b.example">B</a></td><td>b</td><td>c</td><td>d</td><td>e</td><td>f</td><td>g</td></tr>"#,
            ))
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn missing_links_become_empty_fields() {
        let adapter = TableAdapter::new("t", DEFAULT_ROW_SELECTOR).unwrap();
        let rows = adapter
            .extract(&page(
                r#"<tr onmouseover="x"><td>无链接</td><td>类型</td><td>今日14:00</td><td>1</td><td>2</td><td>3</td><td>4</td></tr>"#,
            ))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "");
        assert_eq!(rows[0].url, "");
        assert_eq!(rows[0].category, "");
        assert_eq!(rows[0].time_text, "今日14:00");
    }
}
