//! Heuristics for table header rows that slip through row selectors.

use crate::RawListing;

const HEADER_NAME: &str = "服务器名称";
const HEADER_URL_KEYWORD: &str = "链接";
const HEADER_CATEGORY: &str = "服务器类型";
const HEADER_MIN_SPEND: &str = "最低消费";
const HEADER_DESCRIPTION: &str = "描述";
const HEADER_FEATURES: &str = "特色";
const HEADER_SERVER_KEYWORD: &str = "服务器";

const HEADER_KEYWORDS: &[&str] = &[
    "链接", "服务器", "名称", "时间", "消费", "描述", "特色", "最低", "类型",
];

const KEYWORD_FIELD_THRESHOLD: usize = 3;

pub fn is_header_row(raw: &RawListing) -> bool {
    if is_literal_header(raw) {
        return true;
    }

    let fields = [
        raw.name.as_str(),
        raw.category.as_str(),
        raw.url.as_str(),
        raw.min_spend.as_str(),
        raw.description.as_str(),
        raw.features.as_str(),
    ];
    let keyword_fields = fields
        .iter()
        .filter(|field| HEADER_KEYWORDS.iter().any(|kw| field.contains(kw)))
        .count();
    if keyword_fields >= KEYWORD_FIELD_THRESHOLD {
        return true;
    }

    raw.name.contains(HEADER_SERVER_KEYWORD) && raw.url.contains(HEADER_URL_KEYWORD)
}

fn is_literal_header(raw: &RawListing) -> bool {
    raw.name == HEADER_NAME
        && raw.url.contains(HEADER_URL_KEYWORD)
        && raw.category == HEADER_CATEGORY
        && raw.min_spend == HEADER_MIN_SPEND
        && raw.description == HEADER_DESCRIPTION
        && raw.features == HEADER_FEATURES
}
